//! Live broker adapter for Alpaca's trading REST API.
//!
//! Grounded on `examples/original_source/trading-system/adapters/brokers/alpaca.py`
//! for the wire contract (endpoints, field names, status table) and on
//! `vault::execution::PolymarketClobAdapter` for the reqwest client shape
//! (builder construction, `Debug` impl redacting secrets, header-based
//! request signing). Alpaca authenticates with a plain API-key/secret
//! header pair, not HMAC, so no signing step is needed here.

use super::{normalize_vendor_status, BrokerAdapter, BrokerError, BrokerResult, MarketDataCallback};
use crate::domain::{
    AccountSnapshot, OrderEvent, OrderStatus, OrderType, PositionSnapshot, Side, TradeSignal,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

const DEFAULT_PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const DEFAULT_DATA_BASE_URL: &str = "https://data.alpaca.markets";

#[derive(Clone)]
pub struct AlpacaBrokerAdapter {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    data_base_url: String,
    connected: std::sync::Arc<AtomicBool>,
}

impl std::fmt::Debug for AlpacaBrokerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaBrokerAdapter")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AlpacaBrokerAdapter {
    pub fn from_env(http: Client) -> anyhow::Result<Self> {
        let api_key = std::env::var("ALPACA_API_KEY")?;
        let secret_key = std::env::var("ALPACA_SECRET_KEY")?;
        let base_url = std::env::var("ALPACA_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_PAPER_BASE_URL.to_string());
        Ok(Self {
            http,
            api_key,
            secret_key,
            base_url,
            data_base_url: DEFAULT_DATA_BASE_URL.to_string(),
            connected: std::sync::Arc::new(AtomicBool::new(false)),
        })
    }

    fn auth_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    fn order_side_str(side: Side) -> &'static str {
        match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    fn order_type_str(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    equity: String,
    buying_power: String,
    cash: String,
    daytrade_count: i32,
    #[serde(default)]
    trading_blocked: bool,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    unrealized_pl: String,
    #[serde(default)]
    current_price: Option<String>,
    market_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
}

fn parse_f64(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

fn order_event_from_alpaca(signal_id: Uuid, order: AlpacaOrder) -> OrderEvent {
    OrderEvent {
        order_id: Uuid::new_v4(),
        signal_id,
        status: normalize_vendor_status(&order.status),
        timestamp: Utc::now(),
        broker_order_id: Some(order.id),
        filled_qty: order
            .filled_qty
            .as_deref()
            .map(|s| s.parse().unwrap_or(0))
            .unwrap_or(0),
        filled_avg_price: order.filled_avg_price.as_deref().map(parse_f64),
        rejection_reason: None,
        metadata: HashMap::new(),
    }
}

#[async_trait]
impl BrokerAdapter for AlpacaBrokerAdapter {
    async fn connect(&self) -> BrokerResult<()> {
        let account = self.get_account_raw().await?;
        if account.trading_blocked {
            return Err(BrokerError::Connection(
                "account is flagged as trading_blocked".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_account(&self) -> BrokerResult<AccountSnapshot> {
        let account = self.get_account_raw().await?;
        Ok(AccountSnapshot {
            equity: parse_f64(&account.equity),
            buying_power: parse_f64(&account.buying_power),
            cash: parse_f64(&account.cash),
            day_trades_remaining: (3 - account.daytrade_count).max(0),
        })
    }

    async fn get_positions(&self) -> BrokerResult<Vec<PositionSnapshot>> {
        let url = format!("{}/v2/positions", self.base_url);
        let resp = self
            .auth_headers(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Connection(format!(
                "positions request failed: {}",
                resp.status()
            )));
        }
        let positions: Vec<AlpacaPosition> = resp
            .json()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let equity = self.get_account().await?.equity;
        Ok(positions
            .into_iter()
            .map(|p| {
                let qty: i64 = p.qty.parse().unwrap_or(0);
                let avg_entry_price = parse_f64(&p.avg_entry_price);
                let market_value = p
                    .market_value
                    .as_deref()
                    .map(parse_f64)
                    .unwrap_or(qty as f64 * avg_entry_price);
                PositionSnapshot {
                    symbol: p.symbol,
                    qty,
                    avg_entry_price,
                    unrealized_pnl: parse_f64(&p.unrealized_pl),
                    exposure_pct: if equity > 0.0 {
                        (market_value.abs() / equity) * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect())
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<PositionSnapshot>> {
        let positions = self.get_positions().await?;
        Ok(positions
            .into_iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol)))
    }

    async fn place_order(&self, signal: &TradeSignal) -> BrokerResult<OrderEvent> {
        let mut body = serde_json::json!({
            "symbol": signal.symbol,
            "qty": signal.qty.to_string(),
            "side": Self::order_side_str(signal.side),
            "type": Self::order_type_str(signal.order_type),
            "time_in_force": "day",
        });
        if let Some(limit) = signal.limit_price {
            body["limit_price"] = serde_json::json!(limit.to_string());
        }
        if let Some(stop) = signal.stop_price {
            body["stop_price"] = serde_json::json!(stop.to_string());
        }

        let url = format!("{}/v2/orders", self.base_url);
        let resp = self
            .auth_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::Order(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Ok(OrderEvent {
                order_id: Uuid::new_v4(),
                signal_id: signal.id,
                status: OrderStatus::Rejected,
                timestamp: Utc::now(),
                broker_order_id: None,
                filled_qty: 0,
                filled_avg_price: None,
                rejection_reason: Some(text),
                metadata: HashMap::new(),
            });
        }

        let order: AlpacaOrder = serde_json::from_str(&text)
            .map_err(|e| BrokerError::Order(format!("parse order response: {e}")))?;
        Ok(order_event_from_alpaca(signal.id, order))
    }

    async fn cancel_order(&self, broker_order_id: &str) -> BrokerResult<OrderEvent> {
        let url = format!("{}/v2/orders/{}", self.base_url, broker_order_id);
        let resp = self
            .auth_headers(self.http.delete(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Order(e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 204 {
            return Err(BrokerError::Order(format!(
                "cancel failed: {}",
                resp.status()
            )));
        }
        self.get_order_status(broker_order_id).await
    }

    async fn get_order_status(&self, broker_order_id: &str) -> BrokerResult<OrderEvent> {
        let url = format!("{}/v2/orders/{}", self.base_url, broker_order_id);
        let resp = self
            .auth_headers(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Order(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Order(format!(
                "order status request failed: {}",
                resp.status()
            )));
        }
        let order: AlpacaOrder = resp
            .json()
            .await
            .map_err(|e| BrokerError::Order(e.to_string()))?;
        // signal_id is unknown at this call site; callers that need the
        // linkage should track it against the broker order id themselves,
        // as the execution engine does in `active_orders`.
        Ok(order_event_from_alpaca(Uuid::nil(), order))
    }

    async fn stream_market_data(
        &self,
        symbols: &[String],
        callback: MarketDataCallback,
    ) -> BrokerResult<()> {
        // A full streaming implementation consumes Alpaca's websocket feed;
        // the polling fallback below keeps the adapter usable without it.
        for symbol in symbols {
            if let Ok(price) = self.get_current_price(symbol).await {
                let mut payload = HashMap::new();
                payload.insert("price".to_string(), serde_json::json!(price));
                callback(crate::domain::MarketEvent {
                    event_type: crate::domain::MarketEventType::Tick,
                    symbol: symbol.clone(),
                    timestamp: Utc::now(),
                    payload,
                });
            }
        }
        Ok(())
    }

    async fn get_current_price(&self, symbol: &str) -> BrokerResult<f64> {
        let url = format!(
            "{}/v2/stocks/{}/trades/latest",
            self.data_base_url, symbol
        );
        let resp = self
            .auth_headers(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::MarketData(e.to_string()))?;
        if resp.status().is_success() {
            if let Ok(v) = resp.json::<serde_json::Value>().await {
                if let Some(p) = v.pointer("/trade/p").and_then(|p| p.as_f64()) {
                    return Ok(p);
                }
            }
        }

        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_base_url, symbol);
        let resp = self
            .auth_headers(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::MarketData(e.to_string()))?;
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::MarketData(e.to_string()))?;
        let bid = v.pointer("/quote/bp").and_then(|p| p.as_f64());
        let ask = v.pointer("/quote/ap").and_then(|p| p.as_f64());
        match (bid, ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Ok((b + a) / 2.0),
            _ => Err(BrokerError::MarketData(format!(
                "no price available for {symbol}"
            ))),
        }
    }
}

impl AlpacaBrokerAdapter {
    async fn get_account_raw(&self) -> BrokerResult<AlpacaAccount> {
        let url = format!("{}/v2/account", self.base_url);
        let resp = self
            .auth_headers(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Connection(format!(
                "account request failed: {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}
