//! Moving-Average Crossover strategy, the pipeline's reference strategy.
//!
//! Grounded on
//! `examples/original_source/trading-system/engines/strategy/ma_crossover.py`:
//! same price-history bound (`long_period + 10`), same strict-inequality
//! crossover detection, same confidence formula, same position-sizing
//! formula, same 5-minute cooldown.

use super::Strategy;
use crate::domain::{MarketEvent, OrderType, Side, SignalSource, TradeSignal};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct MaCrossoverConfig {
    pub short_period: usize,
    pub long_period: usize,
    pub min_confidence: f64,
    pub symbols: Vec<String>,
}

impl Default for MaCrossoverConfig {
    fn default() -> Self {
        Self {
            short_period: 5,
            long_period: 20,
            min_confidence: 0.6,
            symbols: Vec::new(),
        }
    }
}

#[derive(Clone, Copy)]
struct PricePoint {
    price: f64,
}

struct SymbolState {
    history: VecDeque<PricePoint>,
    last_signal_at: Option<DateTime<Utc>>,
}

pub struct MovingAverageCrossover {
    config: MaCrossoverConfig,
    state: Mutex<HashMap<String, SymbolState>>,
}

const COOLDOWN_MINUTES: i64 = 5;

impl MovingAverageCrossover {
    pub fn new(config: MaCrossoverConfig) -> Self {
        assert!(
            config.short_period < config.long_period,
            "short_period must be less than long_period"
        );
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn history_cap(&self) -> usize {
        self.config.long_period + 10
    }

    fn simple_mean(window: &[f64]) -> f64 {
        window.iter().sum::<f64>() / window.len() as f64
    }
}

enum Crossover {
    None,
    Bullish,
    Bearish,
}

#[async_trait]
impl Strategy for MovingAverageCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn required_symbols(&self) -> Vec<String> {
        self.config.symbols.clone()
    }

    async fn process_market_event(&self, event: &MarketEvent) -> anyhow::Result<Vec<TradeSignal>> {
        let Some(price) = event.extract_price() else {
            return Ok(Vec::new());
        };

        let mut states = self.state.lock();
        let entry = states.entry(event.symbol.clone()).or_insert_with(|| SymbolState {
            history: VecDeque::with_capacity(self.history_cap()),
            last_signal_at: None,
        });

        if entry.history.len() >= self.history_cap() {
            entry.history.pop_front();
        }
        entry.history.push_back(PricePoint { price });

        let long = self.config.long_period;
        let short = self.config.short_period;
        if entry.history.len() < long + 1 {
            return Ok(Vec::new());
        }

        let prices: Vec<f64> = entry.history.iter().map(|p| p.price).collect();
        let n = prices.len();

        let short_ma = Self::simple_mean(&prices[n - short..]);
        let long_ma = Self::simple_mean(&prices[n - long..]);
        let prev_short_ma = Self::simple_mean(&prices[n - 1 - short..n - 1]);
        let prev_long_ma = Self::simple_mean(&prices[n - 1 - long..n - 1]);

        let crossover = if prev_short_ma <= prev_long_ma && short_ma > long_ma {
            Crossover::Bullish
        } else if prev_short_ma >= prev_long_ma && short_ma < long_ma {
            Crossover::Bearish
        } else {
            Crossover::None
        };

        let side = match crossover {
            Crossover::None => return Ok(Vec::new()),
            Crossover::Bullish => Side::Buy,
            Crossover::Bearish => Side::Sell,
        };

        let gap_factor = ((short_ma - long_ma).abs() / long_ma * 10.0).min(0.3);
        let price_delta = match side {
            Side::Buy => price - long_ma,
            Side::Sell => long_ma - price,
        };
        let price_factor = (price_delta / long_ma * 5.0).max(0.0).min(0.2);
        let confidence = (0.5 + gap_factor + price_factor).min(1.0);

        if confidence < self.config.min_confidence {
            return Ok(Vec::new());
        }

        if let Some(last) = entry.last_signal_at {
            if Utc::now() - last < ChronoDuration::minutes(COOLDOWN_MINUTES) {
                return Ok(Vec::new());
            }
        }

        let qty = (100.0 * (0.5 + confidence * 0.5)).floor().max(1.0) as i64;

        let mut metadata = HashMap::new();
        metadata.insert("short_ma".to_string(), serde_json::json!(short_ma));
        metadata.insert("long_ma".to_string(), serde_json::json!(long_ma));
        metadata.insert("price".to_string(), serde_json::json!(price));
        metadata.insert(
            "crossover_type".to_string(),
            serde_json::json!(match side {
                Side::Buy => "bullish",
                Side::Sell => "bearish",
            }),
        );

        let signal = TradeSignal::new(
            &event.symbol,
            side,
            qty,
            OrderType::Market,
            confidence,
            SignalSource::Strategy,
            Some(self.name().to_string()),
            None,
            None,
            metadata,
        )?;

        entry.last_signal_at = Some(signal.created_at);

        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, price: f64) -> MarketEvent {
        let mut payload = HashMap::new();
        payload.insert("price".to_string(), serde_json::json!(price));
        MarketEvent {
            event_type: crate::domain::MarketEventType::Tick,
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    #[tokio::test]
    async fn bullish_crossover_emits_one_buy_signal() {
        let strategy = MovingAverageCrossover::new(MaCrossoverConfig {
            short_period: 5,
            long_period: 10,
            min_confidence: 0.0,
            symbols: vec!["SPY".to_string()],
        });

        let mut signals = Vec::new();
        for i in 0..13 {
            let price = 100.0 + i as f64;
            let mut out = strategy.process_market_event(&tick("SPY", price)).await.unwrap();
            signals.append(&mut out);
        }

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Buy);
        assert_eq!(signals[0].symbol, "SPY");
        assert!(signals[0].confidence >= 0.5);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_signal() {
        let strategy = MovingAverageCrossover::new(MaCrossoverConfig {
            short_period: 3,
            long_period: 5,
            min_confidence: 0.0,
            symbols: vec!["AAPL".to_string()],
        });

        let mut total_signals = 0;
        for i in 0..7 {
            let out = strategy
                .process_market_event(&tick("AAPL", 100.0 + i as f64))
                .await
                .unwrap();
            total_signals += out.len();
        }
        // Prices keep rising so multiple crossover-eligible steps occur;
        // the cooldown must collapse them to at most one emitted signal.
        assert!(total_signals <= 1);
    }

    #[tokio::test]
    async fn non_matching_symbol_is_ignored_by_registry_filter() {
        let strategy = MovingAverageCrossover::new(MaCrossoverConfig {
            symbols: vec!["AAPL".to_string()],
            ..Default::default()
        });
        assert_eq!(strategy.required_symbols(), vec!["AAPL".to_string()]);
    }
}
