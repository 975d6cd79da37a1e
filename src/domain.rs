//! Domain model for the trading pipeline.
//!
//! Every value here is immutable once constructed. Where the original
//! system's invariants are non-trivial (confidence bounds, positive
//! quantities, positive prices) construction goes through a smart
//! constructor that returns `Err` instead of building a bad value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("confidence must be within [0.0, 1.0], got {0}")]
    ConfidenceOutOfRange(f64),
    #[error("qty must be positive, got {0}")]
    NonPositiveQty(i64),
    #[error("price must be positive, got {0}")]
    NonPositivePrice(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Strategy,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketEventType {
    Tick,
    Bar,
    Volatility,
    OptionChain,
}

/// A proposed trade, emitted by a strategy or minted from an approved AI idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    pub confidence: f64,
    pub source: SignalSource,
    pub created_at: DateTime<Utc>,
    pub strategy_name: Option<String>,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TradeSignal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        side: Side,
        qty: i64,
        order_type: OrderType,
        confidence: f64,
        source: SignalSource,
        strategy_name: Option<String>,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }
        if qty <= 0 {
            return Err(ValidationError::NonPositiveQty(qty));
        }
        if let Some(p) = limit_price {
            if p <= 0.0 {
                return Err(ValidationError::NonPositivePrice(p));
            }
        }
        if let Some(p) = stop_price {
            if p <= 0.0 {
                return Err(ValidationError::NonPositivePrice(p));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_ascii_uppercase(),
            side,
            qty,
            order_type,
            confidence,
            source,
            created_at: Utc::now(),
            strategy_name,
            limit_price,
            stop_price,
            metadata,
        })
    }
}

/// Outcome of one risk rule's evaluation, kept in `ApprovedTrade`/`RejectedTrade` metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub passed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedTrade {
    pub signal: TradeSignal,
    pub approved_at: DateTime<Utc>,
    pub rule_outcomes: HashMap<String, RuleOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedTrade {
    pub signal: TradeSignal,
    pub rejected_at: DateTime<Utc>,
    pub rejection_reason: String,
    pub rule_outcomes: HashMap<String, RuleOutcome>,
}

/// A point on an order's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub signal_id: Uuid,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub broker_order_id: Option<String>,
    pub filled_qty: i64,
    pub filled_avg_price: Option<f64>,
    pub rejection_reason: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub qty: i64,
    pub avg_entry_price: f64,
    pub unrealized_pnl: f64,
    pub exposure_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub buying_power: f64,
    pub cash: f64,
    pub day_trades_remaining: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub event_type: MarketEventType,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub payload: HashMap<String, serde_json::Value>,
}

impl MarketEvent {
    /// Extract a usable trade price following the original's field-priority
    /// list: `price`, `close`, `last`, `mid`, then bid/ask midpoint.
    pub fn extract_price(&self) -> Option<f64> {
        for key in ["price", "close", "last", "mid"] {
            if let Some(v) = self.payload.get(key).and_then(|v| v.as_f64()) {
                return Some(v);
            }
        }
        let bid = self.payload.get("bid").and_then(|v| v.as_f64());
        let ask = self.payload.get("ask").and_then(|v| v.as_f64());
        match (bid, ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((b + a) / 2.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilitySnapshot {
    pub symbol: String,
    pub implied_vol: Option<f64>,
    pub historical_vol: Option<f64>,
    pub vol_rank: Option<f64>,
    pub vix_level: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChainSummary {
    pub symbol: String,
    pub expiration: DateTime<Utc>,
    pub put_call_ratio: f64,
    pub max_pain: Option<f64>,
    pub volume: i64,
    pub open_interest: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIdeaApproval {
    pub approved: bool,
    pub decided_at: DateTime<Utc>,
    pub user_notes: Option<String>,
}

/// Advisory-only suggestion. Never enters the risk engine unless a user
/// explicitly approves it, at which point a fresh `TradeSignal` is minted
/// with `source = Ai`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIdea {
    pub id: Uuid,
    pub description: String,
    pub rationale: String,
    pub risk_notes: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub suggested_signal: Option<TradeSignal>,
    pub market_context: HashMap<String, serde_json::Value>,
    pub approval: Option<TradeIdeaApproval>,
}

/// Tagged union of every event the pipeline can publish. Dispatch downstream
/// is always by tag (`match`), never by a class hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    MarketDataReceived {
        id: Uuid,
        timestamp: DateTime<Utc>,
        event: MarketEvent,
    },
    SignalGenerated {
        id: Uuid,
        timestamp: DateTime<Utc>,
        signal: TradeSignal,
    },
    SignalApproved {
        id: Uuid,
        timestamp: DateTime<Utc>,
        trade: ApprovedTrade,
    },
    SignalRejected {
        id: Uuid,
        timestamp: DateTime<Utc>,
        trade: RejectedTrade,
    },
    OrderSubmitted {
        id: Uuid,
        timestamp: DateTime<Utc>,
        order: OrderEvent,
    },
    OrderFilled {
        id: Uuid,
        timestamp: DateTime<Utc>,
        order: OrderEvent,
    },
    OrderCancelled {
        id: Uuid,
        timestamp: DateTime<Utc>,
        order: OrderEvent,
    },
    OrderRejected {
        id: Uuid,
        timestamp: DateTime<Utc>,
        order: OrderEvent,
    },
    TradeIdeaGenerated {
        id: Uuid,
        timestamp: DateTime<Utc>,
        idea: TradeIdea,
    },
    TradeIdeaActioned {
        id: Uuid,
        timestamp: DateTime<Utc>,
        idea_id: Uuid,
        approved: bool,
    },
    RiskLimitBreached {
        id: Uuid,
        timestamp: DateTime<Utc>,
        rule: String,
        reason: String,
    },
    PerformanceMetricRecorded {
        id: Uuid,
        timestamp: DateTime<Utc>,
        metric_type: String,
        value: f64,
        metadata: HashMap<String, serde_json::Value>,
    },
}

impl DomainEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::MarketDataReceived { timestamp, .. }
            | DomainEvent::SignalGenerated { timestamp, .. }
            | DomainEvent::SignalApproved { timestamp, .. }
            | DomainEvent::SignalRejected { timestamp, .. }
            | DomainEvent::OrderSubmitted { timestamp, .. }
            | DomainEvent::OrderFilled { timestamp, .. }
            | DomainEvent::OrderCancelled { timestamp, .. }
            | DomainEvent::OrderRejected { timestamp, .. }
            | DomainEvent::TradeIdeaGenerated { timestamp, .. }
            | DomainEvent::TradeIdeaActioned { timestamp, .. }
            | DomainEvent::RiskLimitBreached { timestamp, .. }
            | DomainEvent::PerformanceMetricRecorded { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::MarketDataReceived { .. } => "market_data_received",
            DomainEvent::SignalGenerated { .. } => "signal_generated",
            DomainEvent::SignalApproved { .. } => "signal_approved",
            DomainEvent::SignalRejected { .. } => "signal_rejected",
            DomainEvent::OrderSubmitted { .. } => "order_submitted",
            DomainEvent::OrderFilled { .. } => "order_filled",
            DomainEvent::OrderCancelled { .. } => "order_cancelled",
            DomainEvent::OrderRejected { .. } => "order_rejected",
            DomainEvent::TradeIdeaGenerated { .. } => "trade_idea_generated",
            DomainEvent::TradeIdeaActioned { .. } => "trade_idea_actioned",
            DomainEvent::RiskLimitBreached { .. } => "risk_limit_breached",
            DomainEvent::PerformanceMetricRecorded { .. } => "performance_metric_recorded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_rejects_out_of_range_confidence() {
        let err = TradeSignal::new(
            "aapl",
            Side::Buy,
            10,
            OrderType::Market,
            1.5,
            SignalSource::Strategy,
            None,
            None,
            None,
            HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::ConfidenceOutOfRange(_)));
    }

    #[test]
    fn signal_uppercases_symbol_and_validates_bounds() {
        let sig = TradeSignal::new(
            "aapl",
            Side::Buy,
            10,
            OrderType::Market,
            0.75,
            SignalSource::Strategy,
            Some("ma_crossover".to_string()),
            None,
            None,
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(sig.symbol, "AAPL");

        assert!(TradeSignal::new(
            "AAPL",
            Side::Buy,
            0,
            OrderType::Market,
            0.5,
            SignalSource::Strategy,
            None,
            None,
            None,
            HashMap::new(),
        )
        .is_err());
    }

    #[test]
    fn market_event_extracts_price_by_priority() {
        let mut payload = HashMap::new();
        payload.insert("close".to_string(), serde_json::json!(101.5));
        payload.insert("bid".to_string(), serde_json::json!(99.0));
        payload.insert("ask".to_string(), serde_json::json!(100.0));
        let evt = MarketEvent {
            event_type: MarketEventType::Tick,
            symbol: "AAPL".to_string(),
            timestamp: Utc::now(),
            payload,
        };
        assert_eq!(evt.extract_price(), Some(101.5));
    }

    #[test]
    fn market_event_falls_back_to_midpoint() {
        let mut payload = HashMap::new();
        payload.insert("bid".to_string(), serde_json::json!(99.0));
        payload.insert("ask".to_string(), serde_json::json!(101.0));
        let evt = MarketEvent {
            event_type: MarketEventType::Tick,
            symbol: "AAPL".to_string(),
            timestamp: Utc::now(),
            payload,
        };
        assert_eq!(evt.extract_price(), Some(100.0));
    }
}
