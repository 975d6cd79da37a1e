//! End-to-end tests driving a synthetic market event through strategy,
//! risk, and execution against the deterministic paper broker, asserting
//! on the resulting audit trail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use trading_pipeline::audit::{AuditSink, InMemoryAuditSink};
use trading_pipeline::broker::paper::{PaperBrokerAdapter, PaperBrokerConfig};
use trading_pipeline::broker::BrokerAdapter;
use trading_pipeline::domain::{
    DomainEvent, MarketEvent, MarketEventType, OrderStatus, OrderType, Side, SignalSource,
    TradeSignal,
};
use trading_pipeline::execution::ExecutionEngine;
use trading_pipeline::risk::{RiskDecision, RiskEngine};
use trading_pipeline::strategy::ma_crossover::{MaCrossoverConfig, MovingAverageCrossover};
use trading_pipeline::strategy::{Strategy, StrategyEngine};

fn tick(symbol: &str, price: f64) -> MarketEvent {
    let mut payload = HashMap::new();
    payload.insert("price".to_string(), serde_json::json!(price));
    MarketEvent {
        event_type: MarketEventType::Tick,
        symbol: symbol.to_string(),
        timestamp: chrono::Utc::now(),
        payload,
    }
}

#[tokio::test(start_paused = true)]
async fn manually_sourced_signal_is_approved_and_fills() {
    let broker = Arc::new(PaperBrokerAdapter::new(PaperBrokerConfig {
        fill_after_polls: 1,
        ..Default::default()
    }));
    broker.set_price("AAPL", 150.0);
    broker.connect().await.unwrap();

    let audit = Arc::new(InMemoryAuditSink::new());
    let risk_engine = RiskEngine::new();
    risk_engine.remove_rule("market_hours");

    let execution_engine = Arc::new(ExecutionEngine::new(
        broker.clone() as Arc<dyn BrokerAdapter>,
        audit.clone() as Arc<dyn AuditSink>,
    ));

    let signal = TradeSignal::new(
        "aapl",
        Side::Buy,
        10,
        OrderType::Market,
        0.9,
        SignalSource::Strategy,
        Some("test".to_string()),
        None,
        None,
        HashMap::new(),
    )
    .unwrap();

    let account = broker.get_account().await.unwrap();
    let positions = broker.get_positions().await.unwrap();
    let current_price = broker.get_current_price(&signal.symbol).await.ok();

    let decision = risk_engine.validate_signal(signal, &account, &positions, current_price);
    let approved = match decision {
        RiskDecision::Approved(trade) => trade,
        RiskDecision::Rejected(rejected) => {
            panic!("expected approval, got rejection: {}", rejected.rejection_reason)
        }
    };
    assert_eq!(approved.signal.symbol, "AAPL");

    let submitted = execution_engine
        .execute_approved_trade(approved)
        .await
        .unwrap();
    assert_eq!(submitted.status, OrderStatus::Submitted);

    // The monitor task polls once a second; advance paused time past the
    // first poll so the paper broker's fill_after_polls=1 schedule resolves.
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;

    let history = execution_engine.get_order_history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OrderStatus::Filled);
    assert_eq!(execution_engine.active_order_count(), 0);

    let events = audit.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, DomainEvent::OrderSubmitted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, DomainEvent::OrderFilled { .. })));
}

#[tokio::test(start_paused = true)]
async fn ma_crossover_signal_flows_through_risk_into_execution() {
    let strategy = MovingAverageCrossover::new(MaCrossoverConfig {
        short_period: 5,
        long_period: 10,
        min_confidence: 0.0,
        symbols: vec!["SPY".to_string()],
    });

    let mut emitted = Vec::new();
    for i in 0..13 {
        let price = 100.0 + i as f64;
        let mut out = strategy
            .process_market_event(&tick("SPY", price))
            .await
            .unwrap();
        emitted.append(&mut out);
    }
    assert_eq!(emitted.len(), 1);
    let signal = emitted.remove(0);
    assert_eq!(signal.side, Side::Buy);

    let broker = Arc::new(PaperBrokerAdapter::new(PaperBrokerConfig {
        fill_after_polls: 1,
        ..Default::default()
    }));
    broker.set_price("SPY", 112.0);
    broker.connect().await.unwrap();

    let audit = Arc::new(InMemoryAuditSink::new());
    let risk_engine = RiskEngine::new();
    risk_engine.remove_rule("market_hours");
    risk_engine.remove_rule("min_confidence");

    let execution_engine = Arc::new(ExecutionEngine::new(
        broker.clone() as Arc<dyn BrokerAdapter>,
        audit.clone() as Arc<dyn AuditSink>,
    ));

    let account = broker.get_account().await.unwrap();
    let positions = broker.get_positions().await.unwrap();
    let current_price = broker.get_current_price(&signal.symbol).await.ok();

    let approved = match risk_engine.validate_signal(signal, &account, &positions, current_price) {
        RiskDecision::Approved(trade) => trade,
        RiskDecision::Rejected(rejected) => {
            panic!("expected approval, got rejection: {}", rejected.rejection_reason)
        }
    };

    execution_engine
        .execute_approved_trade(approved)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;

    let history = execution_engine.get_order_history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OrderStatus::Filled);
}

#[tokio::test]
async fn oversized_signal_is_rejected_before_reaching_execution() {
    let broker = PaperBrokerAdapter::new(PaperBrokerConfig::default());
    broker.set_price("AAPL", 150.0);

    let risk_engine = RiskEngine::new();
    risk_engine.remove_rule("market_hours");

    let signal = TradeSignal::new(
        "AAPL",
        Side::Buy,
        100_000,
        OrderType::Market,
        0.9,
        SignalSource::Strategy,
        Some("test".to_string()),
        None,
        None,
        HashMap::new(),
    )
    .unwrap();

    let account = broker.get_account().await.unwrap();
    let positions = broker.get_positions().await.unwrap();
    let current_price = broker.get_current_price("AAPL").await.ok();

    let decision = risk_engine.validate_signal(signal, &account, &positions, current_price);
    match decision {
        RiskDecision::Rejected(rejected) => {
            assert!(rejected.rule_outcomes.contains_key("max_position_size"));
        }
        RiskDecision::Approved(_) => panic!("expected rejection for oversized position"),
    }

    let (approved_count, rejected_count) = risk_engine.get_statistics();
    assert_eq!(approved_count, 0);
    assert_eq!(rejected_count, 1);
}
