//! Risk engine: an ordered rule pipeline gating every signal before it may
//! reach the execution engine.
//!
//! Grounded on
//! `examples/original_source/trading-system/engines/risk/engine.py` for the
//! rule set, thresholds, and short-circuit/disabled/error semantics; the
//! `Vec<Box<dyn Rule>>` + `parking_lot`-guarded engine state shape follows
//! this crate's existing `RiskManager` (see the now-removed `src/risk.rs`,
//! superseded by this module — its Kelly/VaR machinery had no counterpart
//! in this pipeline's risk model).

use crate::domain::{
    AccountSnapshot, ApprovedTrade, PositionSnapshot, RejectedTrade, RuleOutcome, Side, TradeSignal,
};
use chrono::{Datelike, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

const MAX_RECENT_SIGNALS: usize = 1000;
const DUPLICATE_WINDOW_SECONDS: i64 = 60;
const MAX_POSITION_SIZE_PCT: f64 = 0.05;
const MAX_POSITIONS_PER_SYMBOL: usize = 2;
const MIN_CONFIDENCE: f64 = 0.6;
/// Stand-in per-share price used when no live quote is available (see
/// SPEC_FULL.md §9, open question 1).
const PLACEHOLDER_PRICE_PER_SHARE: f64 = 100.0;

/// Read-only snapshot of engine state a rule needs to evaluate a signal.
/// `current_price` is populated from `BrokerAdapter::get_current_price` by
/// the caller when available; `None` falls back to the placeholder price.
pub struct RiskContext<'a> {
    pub account: &'a AccountSnapshot,
    pub positions: &'a [PositionSnapshot],
    pub recent_signals: &'a VecDeque<TradeSignal>,
    pub current_price: Option<f64>,
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, signal: &TradeSignal, ctx: &RiskContext) -> anyhow::Result<(bool, Option<String>)>;
}

pub struct MaxPositionSizeRule {
    pub max_pct: f64,
}

impl Rule for MaxPositionSizeRule {
    fn name(&self) -> &str {
        "max_position_size"
    }

    fn validate(&self, signal: &TradeSignal, ctx: &RiskContext) -> anyhow::Result<(bool, Option<String>)> {
        let price = ctx.current_price.unwrap_or(PLACEHOLDER_PRICE_PER_SHARE);
        let estimated_value = signal.qty as f64 * price;
        let limit = ctx.account.equity * self.max_pct;
        if estimated_value > limit {
            Ok((
                false,
                Some(format!(
                    "estimated position value {estimated_value:.2} exceeds {:.0}% of equity ({limit:.2})",
                    self.max_pct * 100.0
                )),
            ))
        } else {
            Ok((true, None))
        }
    }
}

pub struct MaxPositionsPerSymbolRule {
    pub max_positions: usize,
}

impl Rule for MaxPositionsPerSymbolRule {
    fn name(&self) -> &str {
        "max_positions_per_symbol"
    }

    fn validate(&self, signal: &TradeSignal, ctx: &RiskContext) -> anyhow::Result<(bool, Option<String>)> {
        let count = ctx
            .positions
            .iter()
            .filter(|p| p.symbol.eq_ignore_ascii_case(&signal.symbol) && p.qty != 0)
            .count();
        if count >= self.max_positions {
            Ok((
                false,
                Some(format!(
                    "already holding {count} position(s) in {}, max is {}",
                    signal.symbol, self.max_positions
                )),
            ))
        } else {
            Ok((true, None))
        }
    }
}

pub struct MinConfidenceRule {
    pub min_confidence: f64,
}

impl Rule for MinConfidenceRule {
    fn name(&self) -> &str {
        "min_confidence"
    }

    fn validate(&self, signal: &TradeSignal, _ctx: &RiskContext) -> anyhow::Result<(bool, Option<String>)> {
        if signal.confidence < self.min_confidence {
            Ok((
                false,
                Some(format!(
                    "confidence {:.2} below minimum {:.2}",
                    signal.confidence, self.min_confidence
                )),
            ))
        } else {
            Ok((true, None))
        }
    }
}

pub struct DuplicateSignalRule {
    pub window_seconds: i64,
}

impl Rule for DuplicateSignalRule {
    fn name(&self) -> &str {
        "duplicate_signal"
    }

    fn validate(&self, signal: &TradeSignal, ctx: &RiskContext) -> anyhow::Result<(bool, Option<String>)> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.window_seconds);
        let duplicate = ctx.recent_signals.iter().any(|s| {
            s.symbol.eq_ignore_ascii_case(&signal.symbol)
                && s.side == signal.side
                && s.created_at > cutoff
        });
        if duplicate {
            Ok((
                false,
                Some(format!(
                    "duplicate {:?} {} within {}s",
                    signal.side, signal.symbol, self.window_seconds
                )),
            ))
        } else {
            Ok((true, None))
        }
    }
}

pub struct MarketHoursRule;

impl Rule for MarketHoursRule {
    fn name(&self) -> &str {
        "market_hours"
    }

    fn validate(&self, _signal: &TradeSignal, _ctx: &RiskContext) -> anyhow::Result<(bool, Option<String>)> {
        let now = chrono::Local::now();
        let is_weekday = now.weekday().num_days_from_monday() < 5;
        let hour = now.hour();
        if is_weekday && (9..16).contains(&hour) {
            Ok((true, None))
        } else {
            Ok((
                false,
                Some("Market is closed (outside trading hours)".to_string()),
            ))
        }
    }
}

fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(MaxPositionSizeRule {
            max_pct: MAX_POSITION_SIZE_PCT,
        }),
        Box::new(MaxPositionsPerSymbolRule {
            max_positions: MAX_POSITIONS_PER_SYMBOL,
        }),
        Box::new(MinConfidenceRule {
            min_confidence: MIN_CONFIDENCE,
        }),
        Box::new(DuplicateSignalRule {
            window_seconds: DUPLICATE_WINDOW_SECONDS,
        }),
        Box::new(MarketHoursRule),
    ]
}

pub enum RiskDecision {
    Approved(ApprovedTrade),
    Rejected(RejectedTrade),
}

struct RiskEngineState {
    rules: Vec<Box<dyn Rule>>,
    is_active: bool,
    recent_signals: VecDeque<TradeSignal>,
    signals_approved: u64,
    signals_rejected: u64,
}

pub struct RiskEngine {
    state: RwLock<RiskEngineState>,
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RiskEngineState {
                rules: default_rules(),
                is_active: true,
                recent_signals: VecDeque::new(),
                signals_approved: 0,
                signals_rejected: 0,
            }),
        }
    }

    pub fn add_rule(&self, rule: Box<dyn Rule>) {
        self.state.write().rules.push(rule);
    }

    pub fn remove_rule(&self, name: &str) {
        self.state.write().rules.retain(|r| r.name() != name);
    }

    pub fn list_rules(&self) -> Vec<String> {
        self.state.read().rules.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn activate(&self) {
        self.state.write().is_active = true;
    }

    pub fn deactivate(&self) {
        self.state.write().is_active = false;
    }

    pub fn is_active(&self) -> bool {
        self.state.read().is_active
    }

    pub fn get_statistics(&self) -> (u64, u64) {
        let s = self.state.read();
        (s.signals_approved, s.signals_rejected)
    }

    /// Evaluate a signal against every rule in order, using a single
    /// consistent snapshot of account/positions/recent-signals. Approval
    /// appends the signal to the recent-signals buffer; rejection does not.
    pub fn validate_signal(
        &self,
        signal: TradeSignal,
        account: &AccountSnapshot,
        positions: &[PositionSnapshot],
        current_price: Option<f64>,
    ) -> RiskDecision {
        let mut state = self.state.write();

        if !state.is_active {
            state.signals_rejected += 1;
            return RiskDecision::Rejected(RejectedTrade {
                signal,
                rejected_at: Utc::now(),
                rejection_reason: "Risk engine is disabled".to_string(),
                rule_outcomes: HashMap::new(),
            });
        }

        let ctx = RiskContext {
            account,
            positions,
            recent_signals: &state.recent_signals,
            current_price,
        };

        let mut rule_outcomes = HashMap::new();
        let mut rejection: Option<String> = None;

        for rule in &state.rules {
            let (passed, reason) = match rule.validate(&signal, &ctx) {
                Ok(outcome) => outcome,
                Err(e) => (false, Some(format!("Risk validation error: {e}"))),
            };

            rule_outcomes.insert(
                rule.name().to_string(),
                RuleOutcome {
                    passed,
                    reason: reason.clone(),
                },
            );

            if !passed {
                rejection = Some(format!(
                    "{}: {}",
                    rule.name(),
                    reason.unwrap_or_default()
                ));
                break;
            }
        }

        drop(ctx);

        match rejection {
            Some(reason) => {
                state.signals_rejected += 1;
                RiskDecision::Rejected(RejectedTrade {
                    signal,
                    rejected_at: Utc::now(),
                    rejection_reason: reason,
                    rule_outcomes,
                })
            }
            None => {
                state.signals_approved += 1;
                if state.recent_signals.len() >= MAX_RECENT_SIGNALS {
                    let keep_from = state.recent_signals.len() - MAX_RECENT_SIGNALS / 2;
                    state.recent_signals.drain(0..keep_from);
                }
                state.recent_signals.push_back(signal.clone());
                RiskDecision::Approved(ApprovedTrade {
                    signal,
                    approved_at: Utc::now(),
                    rule_outcomes,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, SignalSource};

    fn account(equity: f64) -> AccountSnapshot {
        AccountSnapshot {
            equity,
            buying_power: equity,
            cash: equity,
            day_trades_remaining: 3,
        }
    }

    fn signal(symbol: &str, qty: i64, confidence: f64) -> TradeSignal {
        TradeSignal::new(
            symbol,
            Side::Buy,
            qty,
            OrderType::Market,
            confidence,
            SignalSource::Strategy,
            Some("test".to_string()),
            None,
            None,
            HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn oversized_position_is_rejected() {
        let engine = RiskEngine::new();
        let decision = engine.validate_signal(signal("AAPL", 100, 0.8), &account(10_000.0), &[], None);
        match decision {
            RiskDecision::Rejected(r) => assert!(r.rejection_reason.starts_with("max_position_size")),
            RiskDecision::Approved(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn disabled_engine_rejects_everything() {
        let engine = RiskEngine::new();
        engine.deactivate();
        let decision = engine.validate_signal(signal("AAPL", 1, 0.9), &account(1_000_000.0), &[], None);
        match decision {
            RiskDecision::Rejected(r) => assert_eq!(r.rejection_reason, "Risk engine is disabled"),
            RiskDecision::Approved(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn low_confidence_is_rejected() {
        let engine = RiskEngine::new();
        let decision = engine.validate_signal(signal("AAPL", 1, 0.3), &account(1_000_000.0), &[], None);
        match decision {
            RiskDecision::Rejected(r) => assert!(r.rejection_reason.starts_with("min_confidence")),
            RiskDecision::Approved(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn recent_signals_buffer_is_bounded() {
        let engine = RiskEngine::new();
        // Remove the wall-clock-dependent rule so this test is deterministic
        // regardless of when it runs.
        engine.remove_rule("market_hours");
        for i in 0..(MAX_RECENT_SIGNALS + 50) {
            let sig = TradeSignal::new(
                &format!("SYM{i}"),
                Side::Buy,
                1,
                OrderType::Market,
                0.9,
                SignalSource::Strategy,
                None,
                None,
                None,
                HashMap::new(),
            )
            .unwrap();
            engine.validate_signal(sig, &account(10_000_000.0), &[], Some(1.0));
        }
        assert!(engine.state.read().recent_signals.len() <= MAX_RECENT_SIGNALS);
    }
}
