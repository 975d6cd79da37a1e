//! Broker adapter contract.
//!
//! The execution engine is the sole holder of a `BrokerAdapter`; nothing
//! else in the pipeline is allowed a handle to it.

pub mod alpaca;
pub mod paper;

use crate::domain::{AccountSnapshot, MarketEvent, OrderEvent, PositionSnapshot, TradeSignal};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("order error: {0}")]
    Order(String),
    #[error("market data error: {0}")]
    MarketData(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Open/close times for the current or next trading session.
#[derive(Debug, Clone)]
pub struct MarketHoursInfo {
    pub is_open: bool,
    pub next_open: Option<chrono::DateTime<chrono::Utc>>,
    pub next_close: Option<chrono::DateTime<chrono::Utc>>,
}

/// A callback invoked once per streamed `MarketEvent`.
pub type MarketDataCallback = Box<dyn Fn(MarketEvent) + Send + Sync>;

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;
    async fn disconnect(&self) -> BrokerResult<()>;
    fn is_connected(&self) -> bool;

    async fn get_account(&self) -> BrokerResult<AccountSnapshot>;
    async fn get_positions(&self) -> BrokerResult<Vec<PositionSnapshot>>;
    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<PositionSnapshot>>;

    async fn place_order(&self, signal: &TradeSignal) -> BrokerResult<OrderEvent>;
    async fn cancel_order(&self, broker_order_id: &str) -> BrokerResult<OrderEvent>;
    async fn get_order_status(&self, broker_order_id: &str) -> BrokerResult<OrderEvent>;

    async fn stream_market_data(
        &self,
        symbols: &[String],
        callback: MarketDataCallback,
    ) -> BrokerResult<()>;

    async fn get_current_price(&self, symbol: &str) -> BrokerResult<f64>;

    /// Optional: present on adapters that can consult a real market calendar.
    /// Not used by the default `MarketHoursRule`, which uses a naive local
    /// clock check (see `crate::risk`), but available for a calendar-aware
    /// deployment.
    async fn get_market_hours(&self) -> BrokerResult<MarketHoursInfo> {
        Err(BrokerError::MarketData(
            "market hours lookup not supported by this adapter".to_string(),
        ))
    }
}

/// Normalizes a vendor order status string into the internal `OrderStatus`.
/// Grounded on the Alpaca status table; other vendors should provide their
/// own mapping to these same six states.
pub fn normalize_vendor_status(vendor_status: &str) -> crate::domain::OrderStatus {
    use crate::domain::OrderStatus::*;
    match vendor_status {
        "new" | "accepted" | "accepted_for_bidding" | "calculated" | "pending_new" => Submitted,
        "partially_filled" => PartiallyFilled,
        "filled" => Filled,
        "done_for_day" | "canceled" | "expired" | "replaced" | "stopped" | "suspended" => {
            Cancelled
        }
        "pending_cancel" | "pending_replace" => Pending,
        "rejected" => Rejected,
        _ => Rejected,
    }
}

pub fn empty_metadata() -> HashMap<String, serde_json::Value> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderStatus;

    #[test]
    fn vendor_status_table_round_trips() {
        let cases = [
            ("new", OrderStatus::Submitted),
            ("accepted", OrderStatus::Submitted),
            ("accepted_for_bidding", OrderStatus::Submitted),
            ("calculated", OrderStatus::Submitted),
            ("pending_new", OrderStatus::Submitted),
            ("partially_filled", OrderStatus::PartiallyFilled),
            ("filled", OrderStatus::Filled),
            ("done_for_day", OrderStatus::Cancelled),
            ("canceled", OrderStatus::Cancelled),
            ("expired", OrderStatus::Cancelled),
            ("replaced", OrderStatus::Cancelled),
            ("stopped", OrderStatus::Cancelled),
            ("suspended", OrderStatus::Cancelled),
            ("pending_cancel", OrderStatus::Pending),
            ("pending_replace", OrderStatus::Pending),
            ("rejected", OrderStatus::Rejected),
        ];
        for (vendor, expected) in cases {
            assert_eq!(normalize_vendor_status(vendor), expected, "{vendor}");
        }
    }
}
