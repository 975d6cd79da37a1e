//! Deterministic paper broker adapter used by tests and by the disabled
//! advisory/live-trading-less deployment mode. Grounded on
//! `PaperExecutionAdapter`'s simulated-latency/slippage shape, simplified
//! to a configurable, deterministic fill schedule rather than randomized
//! outcomes so pipeline tests are reproducible.

use super::{BrokerAdapter, BrokerError, BrokerResult, MarketDataCallback};
use crate::domain::{
    AccountSnapshot, OrderEvent, OrderStatus, PositionSnapshot, Side, TradeSignal,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PaperBrokerConfig {
    pub equity: f64,
    pub cash: f64,
    pub reject_symbols: Vec<String>,
    /// Status returned by `get_order_status` the first time it's polled for
    /// a given order; subsequent polls return `Filled`. Lets tests exercise
    /// the execution engine's monitor loop deterministically.
    pub fill_after_polls: u32,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            equity: 100_000.0,
            cash: 100_000.0,
            reject_symbols: Vec::new(),
            fill_after_polls: 1,
        }
    }
}

struct TrackedOrder {
    signal_id: Uuid,
    symbol: String,
    side: Side,
    qty: i64,
    polls: u32,
}

pub struct PaperBrokerAdapter {
    config: PaperBrokerConfig,
    connected: Mutex<bool>,
    orders: Mutex<HashMap<String, TrackedOrder>>,
    positions: Mutex<HashMap<String, PositionSnapshot>>,
    prices: Mutex<HashMap<String, f64>>,
}

impl PaperBrokerAdapter {
    pub fn new(config: PaperBrokerConfig) -> Self {
        Self {
            config,
            connected: Mutex::new(false),
            orders: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
        }
    }

    /// Test hook: seed a last-trade price used by `get_current_price`.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices
            .lock()
            .insert(symbol.to_ascii_uppercase(), price);
    }
}

impl Default for PaperBrokerAdapter {
    fn default() -> Self {
        Self::new(PaperBrokerConfig::default())
    }
}

#[async_trait]
impl BrokerAdapter for PaperBrokerAdapter {
    async fn connect(&self) -> BrokerResult<()> {
        *self.connected.lock() = true;
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        *self.connected.lock() = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn get_account(&self) -> BrokerResult<AccountSnapshot> {
        Ok(AccountSnapshot {
            equity: self.config.equity,
            buying_power: self.config.cash,
            cash: self.config.cash,
            day_trades_remaining: 3,
        })
    }

    async fn get_positions(&self) -> BrokerResult<Vec<PositionSnapshot>> {
        Ok(self.positions.lock().values().cloned().collect())
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<PositionSnapshot>> {
        Ok(self
            .positions
            .lock()
            .get(&symbol.to_ascii_uppercase())
            .cloned())
    }

    async fn place_order(&self, signal: &TradeSignal) -> BrokerResult<OrderEvent> {
        if self
            .config
            .reject_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&signal.symbol))
        {
            return Ok(OrderEvent {
                order_id: Uuid::new_v4(),
                signal_id: signal.id,
                status: OrderStatus::Rejected,
                timestamp: Utc::now(),
                broker_order_id: None,
                filled_qty: 0,
                filled_avg_price: None,
                rejection_reason: Some(format!("{} not tradeable (paper)", signal.symbol)),
                metadata: HashMap::new(),
            });
        }

        let broker_order_id = format!("paper-{}", Uuid::new_v4());
        self.orders.lock().insert(
            broker_order_id.clone(),
            TrackedOrder {
                signal_id: signal.id,
                symbol: signal.symbol.clone(),
                side: signal.side,
                qty: signal.qty,
                polls: 0,
            },
        );

        Ok(OrderEvent {
            order_id: Uuid::new_v4(),
            signal_id: signal.id,
            status: OrderStatus::Submitted,
            timestamp: Utc::now(),
            broker_order_id: Some(broker_order_id),
            filled_qty: 0,
            filled_avg_price: None,
            rejection_reason: None,
            metadata: HashMap::new(),
        })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> BrokerResult<OrderEvent> {
        let tracked = self
            .orders
            .lock()
            .remove(broker_order_id)
            .ok_or_else(|| BrokerError::Order(format!("unknown order {broker_order_id}")))?;
        Ok(OrderEvent {
            order_id: Uuid::new_v4(),
            signal_id: tracked.signal_id,
            status: OrderStatus::Cancelled,
            timestamp: Utc::now(),
            broker_order_id: Some(broker_order_id.to_string()),
            filled_qty: 0,
            filled_avg_price: None,
            rejection_reason: None,
            metadata: HashMap::new(),
        })
    }

    async fn get_order_status(&self, broker_order_id: &str) -> BrokerResult<OrderEvent> {
        let mut orders = self.orders.lock();
        let tracked = orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::Order(format!("unknown order {broker_order_id}")))?;
        tracked.polls += 1;

        if tracked.polls < self.config.fill_after_polls {
            return Ok(OrderEvent {
                order_id: Uuid::new_v4(),
                signal_id: tracked.signal_id,
                status: OrderStatus::Submitted,
                timestamp: Utc::now(),
                broker_order_id: Some(broker_order_id.to_string()),
                filled_qty: 0,
                filled_avg_price: None,
                rejection_reason: None,
                metadata: HashMap::new(),
            });
        }

        let fill_price = self
            .prices
            .lock()
            .get(&tracked.symbol)
            .copied()
            .unwrap_or(100.0);
        let event = OrderEvent {
            order_id: Uuid::new_v4(),
            signal_id: tracked.signal_id,
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
            broker_order_id: Some(broker_order_id.to_string()),
            filled_qty: tracked.qty,
            filled_avg_price: Some(fill_price),
            rejection_reason: None,
            metadata: HashMap::new(),
        };

        let mut positions = self.positions.lock();
        let delta = match tracked.side {
            Side::Buy => tracked.qty,
            Side::Sell => -tracked.qty,
        };
        positions
            .entry(tracked.symbol.clone())
            .and_modify(|p| p.qty += delta)
            .or_insert(PositionSnapshot {
                symbol: tracked.symbol.clone(),
                qty: delta,
                avg_entry_price: fill_price,
                unrealized_pnl: 0.0,
                exposure_pct: 0.0,
            });
        drop(positions);
        orders.remove(broker_order_id);

        Ok(event)
    }

    async fn stream_market_data(
        &self,
        _symbols: &[String],
        _callback: MarketDataCallback,
    ) -> BrokerResult<()> {
        Ok(())
    }

    async fn get_current_price(&self, symbol: &str) -> BrokerResult<f64> {
        self.prices
            .lock()
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| BrokerError::MarketData(format!("no price seeded for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, SignalSource};

    fn sample_signal() -> TradeSignal {
        TradeSignal::new(
            "AAPL",
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
        .unwrap()
    }

    #[tokio::test]
    async fn place_and_fill_updates_positions() {
        let broker = PaperBrokerAdapter::new(PaperBrokerConfig {
            fill_after_polls: 1,
            ..Default::default()
        });
        broker.set_price("AAPL", 150.0);
        let signal = sample_signal();

        let submitted = broker.place_order(&signal).await.unwrap();
        assert_eq!(submitted.status, OrderStatus::Submitted);
        let broker_id = submitted.broker_order_id.unwrap();

        let filled = broker.get_order_status(&broker_id).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.filled_qty, 10);

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].qty, 10);
    }

    #[tokio::test]
    async fn rejected_symbol_never_tracked() {
        let broker = PaperBrokerAdapter::new(PaperBrokerConfig {
            reject_symbols: vec!["AAPL".to_string()],
            ..Default::default()
        });
        let event = broker.place_order(&sample_signal()).await.unwrap();
        assert_eq!(event.status, OrderStatus::Rejected);
        assert!(event.broker_order_id.is_none());
    }
}
