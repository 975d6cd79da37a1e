//! Strategy engine: routes market events to registered strategies and
//! publishes the signals they emit.
//!
//! Grounded on `signals::detector::SignalDetector`'s struct-of-config shape
//! for how a single detector is built, generalized here into a registry of
//! pluggable `Strategy` trait objects (a capability, not a class hierarchy),
//! matching the `ExecutionAdapter`/`Rule` style used elsewhere in this crate.

pub mod ma_crossover;

use crate::domain::{MarketEvent, TradeSignal};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    /// Symbols this strategy wants to see events for.
    fn required_symbols(&self) -> Vec<String>;
    async fn process_market_event(&self, event: &MarketEvent) -> anyhow::Result<Vec<TradeSignal>>;
}

/// A registered strategy plus its own active flag, toggled independently of
/// registration (grounded on `BaseStrategy.activate()`/`deactivate()`).
struct RegisteredStrategy {
    strategy: Box<dyn Strategy>,
    active: AtomicBool,
}

pub struct StrategyEngine {
    strategies: RwLock<HashMap<String, RegisteredStrategy>>,
    running: AtomicBool,
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            running: AtomicBool::new(true),
        }
    }

    pub fn register(&self, strategy: Box<dyn Strategy>) {
        self.strategies.write().insert(
            strategy.name().to_string(),
            RegisteredStrategy {
                strategy,
                active: AtomicBool::new(true),
            },
        );
    }

    pub fn unregister(&self, name: &str) {
        self.strategies.write().remove(name);
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.strategies.read().keys().cloned().collect()
    }

    /// Non-destructively toggles a registered strategy's active flag.
    /// Returns `false` if no strategy with that name is registered.
    pub fn set_strategy_active(&self, name: &str, active: bool) -> bool {
        match self.strategies.read().get(name) {
            Some(entry) => {
                entry.active.store(active, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_strategy_active(&self, name: &str) -> Option<bool> {
        self.strategies
            .read()
            .get(name)
            .map(|entry| entry.active.load(Ordering::SeqCst))
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch a market event to every active strategy whose symbol set
    /// contains the event's symbol. A strategy that errors is logged and
    /// isolated; siblings still run.
    pub async fn process_market_event(&self, event: &MarketEvent) -> Vec<TradeSignal> {
        if !self.is_running() {
            return Vec::new();
        }

        let names: Vec<String> = {
            let strategies = self.strategies.read();
            strategies
                .iter()
                .filter(|(_, entry)| {
                    entry.active.load(Ordering::SeqCst)
                        && entry
                            .strategy
                            .required_symbols()
                            .iter()
                            .any(|s| s == &event.symbol)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        let mut signals = Vec::new();
        for name in names {
            let result = {
                let guard = self.strategies.read();
                let strategy = match guard.get(&name) {
                    Some(entry) => &entry.strategy,
                    None => continue,
                };
                strategy.process_market_event(event).await
            };
            match result {
                Ok(mut new_signals) => signals.append(&mut new_signals),
                Err(e) => error!(strategy = %name, error = %e, "strategy processing failed"),
            }
        }

        if !signals.is_empty() {
            info!(count = signals.len(), symbol = %event.symbol, "strategies emitted signals");
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketEventType;

    struct EchoStrategy {
        symbols: Vec<String>,
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Strategy for EchoStrategy {
        fn name(&self) -> &str {
            "echo"
        }

        fn required_symbols(&self) -> Vec<String> {
            self.symbols.clone()
        }

        async fn process_market_event(&self, _event: &MarketEvent) -> anyhow::Result<Vec<TradeSignal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn tick(symbol: &str) -> MarketEvent {
        MarketEvent {
            event_type: MarketEventType::Tick,
            symbol: symbol.to_string(),
            timestamp: chrono::Utc::now(),
            payload: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn deactivated_strategy_is_skipped_without_unregistering() {
        let engine = StrategyEngine::new();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        engine.register(Box::new(EchoStrategy {
            symbols: vec!["AAPL".to_string()],
            calls: calls.clone(),
        }));

        assert!(engine.set_strategy_active("echo", false));
        engine.process_market_event(&tick("AAPL")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.is_strategy_active("echo"), Some(false));
        assert!(engine.registered_names().contains(&"echo".to_string()));

        assert!(engine.set_strategy_active("echo", true));
        engine.process_market_event(&tick("AAPL")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.is_strategy_active("echo"), Some(true));
    }

    #[tokio::test]
    async fn toggling_unknown_strategy_reports_failure() {
        let engine = StrategyEngine::new();
        assert!(!engine.set_strategy_active("missing", true));
        assert_eq!(engine.is_strategy_active("missing"), None);
    }

    #[tokio::test]
    async fn empty_symbol_set_matches_nothing() {
        let engine = StrategyEngine::new();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        engine.register(Box::new(EchoStrategy {
            symbols: Vec::new(),
            calls,
        }));

        let signals = engine.process_market_event(&tick("AAPL")).await;
        assert!(signals.is_empty());
    }
}
