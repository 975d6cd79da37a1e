//! Execution engine: the sole holder of the broker adapter. Submits
//! approved trades exactly once and tracks each order to a terminal state
//! via an independent monitor task.
//!
//! Grounded on
//! `examples/original_source/trading-system/engines/execution/engine.py`
//! (status machine, 300-iteration/1s monitor loop, exactly-once
//! `place_order`) and on this crate's `tokio::spawn` + `sleep` task idiom
//! already used for the Polymarket adapter's simulated latency.

use crate::audit::AuditSink;
use crate::broker::BrokerAdapter;
use crate::domain::{ApprovedTrade, DomainEvent, OrderEvent, OrderStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use uuid::Uuid;

const MONITOR_MAX_POLLS: u32 = 300;
const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Processing,
    Error,
}

#[derive(Debug, Clone)]
struct ActiveOrder {
    broker_order_id: String,
    signal_id: Uuid,
    symbol: String,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionStatistics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub orders_rejected: u64,
}

struct ExecutionState {
    status: EngineStatus,
    active_orders: HashMap<Uuid, ActiveOrder>,
    order_history: HashMap<Uuid, OrderEvent>,
    stats: ExecutionStatistics,
}

pub struct ExecutionEngine {
    broker: Arc<dyn BrokerAdapter>,
    audit: Arc<dyn AuditSink>,
    state: Mutex<ExecutionState>,
}

impl ExecutionEngine {
    pub fn new(broker: Arc<dyn BrokerAdapter>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            broker,
            audit,
            state: Mutex::new(ExecutionState {
                status: EngineStatus::Idle,
                active_orders: HashMap::new(),
                order_history: HashMap::new(),
                stats: ExecutionStatistics::default(),
            }),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.state.lock().status
    }

    pub fn get_statistics(&self) -> ExecutionStatistics {
        self.state.lock().stats.clone()
    }

    pub fn get_order_history(&self, limit: Option<usize>) -> Vec<OrderEvent> {
        let state = self.state.lock();
        let mut events: Vec<OrderEvent> = state.order_history.values().cloned().collect();
        events.sort_by_key(|e| e.timestamp);
        if let Some(limit) = limit {
            let start = events.len().saturating_sub(limit);
            events[start..].to_vec()
        } else {
            events
        }
    }

    pub fn active_order_count(&self) -> usize {
        self.state.lock().active_orders.len()
    }

    /// Submit an approved trade. Refuses re-entry while already processing;
    /// calls `broker.place_order` exactly once per invocation.
    pub async fn execute_approved_trade(
        self: &Arc<Self>,
        approved: ApprovedTrade,
    ) -> anyhow::Result<OrderEvent> {
        {
            let mut state = self.state.lock();
            if state.status != EngineStatus::Idle {
                anyhow::bail!("execution engine busy (status: {:?})", state.status);
            }
            state.status = EngineStatus::Processing;
        }

        let result = self.broker.place_order(&approved.signal).await;

        let event = match result {
            Ok(event) if event.status == OrderStatus::Submitted => {
                let broker_order_id = event.broker_order_id.clone().ok_or_else(|| {
                    anyhow::anyhow!("broker returned SUBMITTED without a broker order id")
                })?;

                {
                    let mut state = self.state.lock();
                    state.active_orders.insert(
                        event.order_id,
                        ActiveOrder {
                            broker_order_id: broker_order_id.clone(),
                            signal_id: approved.signal.id,
                            symbol: approved.signal.symbol.clone(),
                            submitted_at: event.timestamp,
                        },
                    );
                    state.order_history.insert(event.order_id, event.clone());
                    state.stats.orders_submitted += 1;
                }

                self.audit
                    .record(DomainEvent::OrderSubmitted {
                        id: Uuid::new_v4(),
                        timestamp: event.timestamp,
                        order: event.clone(),
                    })
                    .await;

                self.spawn_monitor(event.order_id, broker_order_id);
                event
            }
            Ok(event) => {
                let mut state = self.state.lock();
                state.stats.orders_rejected += 1;
                state.order_history.insert(event.order_id, event.clone());
                drop(state);
                self.audit
                    .record(DomainEvent::OrderRejected {
                        id: Uuid::new_v4(),
                        timestamp: event.timestamp,
                        order: event.clone(),
                    })
                    .await;
                event
            }
            Err(e) => {
                let event = OrderEvent {
                    order_id: Uuid::new_v4(),
                    signal_id: approved.signal.id,
                    status: OrderStatus::Rejected,
                    timestamp: chrono::Utc::now(),
                    broker_order_id: None,
                    filled_qty: 0,
                    filled_avg_price: None,
                    rejection_reason: Some(format!("Execution error: {e}")),
                    metadata: HashMap::new(),
                };
                let mut state = self.state.lock();
                state.stats.orders_rejected += 1;
                state.order_history.insert(event.order_id, event.clone());
                drop(state);
                self.audit
                    .record(DomainEvent::OrderRejected {
                        id: Uuid::new_v4(),
                        timestamp: event.timestamp,
                        order: event.clone(),
                    })
                    .await;
                event
            }
        };

        self.state.lock().status = EngineStatus::Idle;
        Ok(event)
    }

    fn spawn_monitor(self: &Arc<Self>, order_id: Uuid, broker_order_id: String) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            for _ in 0..MONITOR_MAX_POLLS {
                sleep(MONITOR_POLL_INTERVAL).await;

                let status = match engine.broker.get_order_status(&broker_order_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(order_id = %order_id, error = %e, "monitor: status query failed");
                        continue;
                    }
                };

                match status.status {
                    OrderStatus::Filled => {
                        engine.handle_terminal(order_id, status, true).await;
                        return;
                    }
                    OrderStatus::Cancelled | OrderStatus::Rejected => {
                        engine.handle_terminal(order_id, status, false).await;
                        return;
                    }
                    OrderStatus::PartiallyFilled => {
                        let mut state = engine.state.lock();
                        state.order_history.insert(order_id, status.clone());
                    }
                    OrderStatus::Submitted | OrderStatus::Pending => {}
                }
            }
            warn!(order_id = %order_id, "monitor: gave up after {MONITOR_MAX_POLLS} polls");
        });
    }

    async fn handle_terminal(self: &Arc<Self>, order_id: Uuid, event: OrderEvent, filled: bool) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.active_orders.remove(&order_id);
            state.order_history.insert(order_id, event.clone());
            if filled {
                state.stats.orders_filled += 1;
            } else if event.status == OrderStatus::Cancelled {
                state.stats.orders_cancelled += 1;
            } else {
                state.stats.orders_rejected += 1;
            }
            removed
        };

        if filled {
            if let Some(active) = &removed {
                let latency_seconds =
                    (event.timestamp - active.submitted_at).num_milliseconds() as f64 / 1000.0;
                let mut metadata = HashMap::new();
                metadata.insert("order_id".to_string(), serde_json::json!(order_id.to_string()));
                metadata.insert("symbol".to_string(), serde_json::json!(active.symbol));
                self.audit
                    .record(DomainEvent::PerformanceMetricRecorded {
                        id: Uuid::new_v4(),
                        timestamp: event.timestamp,
                        metric_type: "order_fill_latency_seconds".to_string(),
                        value: latency_seconds,
                        metadata,
                    })
                    .await;
            }
        }

        let domain_event = if filled {
            DomainEvent::OrderFilled {
                id: Uuid::new_v4(),
                timestamp: event.timestamp,
                order: event,
            }
        } else if event.status == OrderStatus::Cancelled {
            DomainEvent::OrderCancelled {
                id: Uuid::new_v4(),
                timestamp: event.timestamp,
                order: event,
            }
        } else {
            DomainEvent::OrderRejected {
                id: Uuid::new_v4(),
                timestamp: event.timestamp,
                order: event,
            }
        };
        self.audit.record(domain_event).await;
        info!(order_id = %order_id, "order reached terminal state");
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> anyhow::Result<OrderEvent> {
        let broker_order_id = {
            let state = self.state.lock();
            state
                .active_orders
                .get(&order_id)
                .map(|o| o.broker_order_id.clone())
        }
        .ok_or_else(|| anyhow::anyhow!("order {order_id} is not active"))?;

        let event = self.broker.cancel_order(&broker_order_id).await?;
        if event.status == OrderStatus::Cancelled {
            let mut state = self.state.lock();
            state.active_orders.remove(&order_id);
            state.order_history.insert(order_id, event.clone());
            state.stats.orders_cancelled += 1;
        }
        Ok(event)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let order_ids: Vec<Uuid> = self.state.lock().active_orders.keys().copied().collect();
        for order_id in order_ids {
            if let Err(e) = self.cancel_order(order_id).await {
                warn!(order_id = %order_id, error = %e, "shutdown: failed to cancel order");
            }
        }
        self.broker.disconnect().await.map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::broker::paper::{PaperBrokerAdapter, PaperBrokerConfig};
    use crate::domain::{OrderType, Side, SignalSource, TradeSignal};

    fn approved_trade(symbol: &str) -> ApprovedTrade {
        let signal = TradeSignal::new(
            symbol,
            Side::Buy,
            10,
            OrderType::Market,
            0.8,
            SignalSource::Strategy,
            Some("test".to_string()),
            None,
            None,
            HashMap::new(),
        )
        .unwrap();
        ApprovedTrade {
            signal,
            approved_at: chrono::Utc::now(),
            rule_outcomes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn approved_trade_results_in_exactly_one_fill_lifecycle() {
        let broker = Arc::new(PaperBrokerAdapter::new(PaperBrokerConfig {
            fill_after_polls: 1,
            ..Default::default()
        }));
        broker.set_price("AAPL", 150.0);
        let audit = Arc::new(InMemoryAuditSink::new());
        let engine = Arc::new(ExecutionEngine::new(broker, audit.clone()));

        let event = engine
            .execute_approved_trade(approved_trade("AAPL"))
            .await
            .unwrap();
        assert_eq!(event.status, OrderStatus::Submitted);
        assert_eq!(engine.get_statistics().orders_submitted, 1);

        // Give the spawned monitor task a moment to observe the fill.
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(engine.active_order_count(), 0);
        assert_eq!(engine.get_statistics().orders_filled, 1);

        let events = audit.events();
        assert!(events.iter().any(|e| matches!(
            e,
            DomainEvent::PerformanceMetricRecorded { metric_type, .. }
                if metric_type == "order_fill_latency_seconds"
        )));
    }

    #[tokio::test]
    async fn rejected_symbol_produces_no_active_order() {
        let broker = Arc::new(PaperBrokerAdapter::new(PaperBrokerConfig {
            reject_symbols: vec!["AAPL".to_string()],
            ..Default::default()
        }));
        let audit = Arc::new(InMemoryAuditSink::new());
        let engine = Arc::new(ExecutionEngine::new(broker, audit));

        let event = engine
            .execute_approved_trade(approved_trade("AAPL"))
            .await
            .unwrap();
        assert_eq!(event.status, OrderStatus::Rejected);
        assert_eq!(engine.active_order_count(), 0);
        assert_eq!(engine.get_statistics().orders_rejected, 1);
    }
}
