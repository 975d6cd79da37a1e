//! Composition root: loads config, wires the strategy/risk/execution engines
//! around a broker adapter and an audit sink, and serves the HTTP surface.
//!
//! Grounded on the teacher's `main.rs` startup idiom (`init_tracing`,
//! `AppState` construction, axum router assembly with an auth middleware
//! layer), scaled down to this pipeline's component set.

mod advisory;
mod api;
mod audit;
mod auth;
mod broker;
mod config;
mod domain;
mod execution;
mod risk;
mod strategy;

use crate::advisory::AdvisoryService;
use crate::audit::{AuditSink, SqliteAuditSink};
use crate::broker::alpaca::AlpacaBrokerAdapter;
use crate::broker::paper::{PaperBrokerAdapter, PaperBrokerConfig};
use crate::broker::BrokerAdapter;
use crate::config::Config;
use crate::domain::TradeIdea;
use crate::execution::ExecutionEngine;
use crate::risk::RiskEngine;
use crate::strategy::ma_crossover::{MaCrossoverConfig, MovingAverageCrossover};
use crate::strategy::StrategyEngine;
use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;
use parking_lot::RwLock as ParkingRwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub strategy_engine: Arc<StrategyEngine>,
    pub risk_engine: Arc<RiskEngine>,
    pub execution_engine: Arc<ExecutionEngine>,
    pub broker: Arc<dyn BrokerAdapter>,
    pub audit: Arc<dyn AuditSink>,
    pub audit_trail: Option<Arc<SqliteAuditSink>>,
    pub advisory_service: Arc<AdvisoryService>,
    pub pending_ideas: Arc<ParkingRwLock<HashMap<Uuid, TradeIdea>>>,
}

/// Command-line overrides layered on top of environment configuration.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Override the HTTP listen port (defaults to PORT env var or 8080).
    #[arg(long)]
    port: Option<u16>,
    /// Load additional environment variables from this file before parsing config.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = CliArgs::parse();
    if let Some(path) = &cli.config {
        dotenv::from_path(path).ok();
    }

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!(port = config.port, paper = config.use_paper_broker, "starting trading pipeline");

    let broker: Arc<dyn BrokerAdapter> = if config.use_paper_broker {
        Arc::new(PaperBrokerAdapter::new(PaperBrokerConfig::default()))
    } else {
        Arc::new(AlpacaBrokerAdapter::from_env(reqwest::Client::new())?)
    };
    broker.connect().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let audit_sink = SqliteAuditSink::new(&config.database_path)?;

    let strategy_engine = Arc::new(StrategyEngine::new());
    strategy_engine.register(Box::new(MovingAverageCrossover::new(MaCrossoverConfig {
        symbols: config.strategy_symbols.clone(),
        ..Default::default()
    })));

    let risk_engine = Arc::new(RiskEngine::new());
    let execution_engine = Arc::new(ExecutionEngine::new(Arc::clone(&broker), audit_sink.clone() as Arc<dyn AuditSink>));
    let advisory_service = Arc::new(AdvisoryService::from_env());

    let state = AppState {
        strategy_engine,
        risk_engine,
        execution_engine,
        broker,
        audit: audit_sink.clone() as Arc<dyn AuditSink>,
        audit_trail: Some(audit_sink),
        advisory_service,
        pending_ideas: Arc::new(ParkingRwLock::new(HashMap::new())),
    };

    let trading_api_key = Arc::new(config.trading_api_key.clone());

    let protected = Router::new()
        .route("/status", get(api::routes::get_status))
        .route("/strategies", get(api::routes::list_strategies))
        .route("/strategies/:name/activate", post(api::routes::activate_strategy))
        .route("/strategies/:name/deactivate", post(api::routes::deactivate_strategy))
        .route("/risk/status", get(api::routes::get_risk_status))
        .route("/risk/activate", post(api::routes::activate_risk))
        .route("/risk/deactivate", post(api::routes::deactivate_risk))
        .route("/execution/status", get(api::routes::get_execution_status))
        .route("/execution/history", get(api::routes::get_execution_history))
        .route("/account", get(api::routes::get_account))
        .route("/positions", get(api::routes::get_positions))
        .route("/ai/analyze", post(api::routes::post_ai_analyze))
        .route("/ai/ideas/:id/action", post(api::routes::post_ai_idea_action))
        .route("/events", get(api::routes::get_events))
        .route("/market/simulate", post(api::routes::post_market_simulate))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&trading_api_key),
            auth::auth_middleware,
        ));

    let public = Router::new().route("/health", get(api::routes::health));

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining in-flight orders");
    let _ = state.execution_engine.shutdown().await;
    state.audit.shutdown().await;
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trading_pipeline=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
