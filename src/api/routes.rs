//! HTTP route handlers.
//!
//! Grounded on the teacher's `api::routes` handler shape (`Query`/`AxumState<AppState>`/
//! `Json` in, `Result<Json<_>, StatusCode>` out).

use crate::advisory::{AdvisoryRequest, AdvisoryResponse};
use crate::domain::{MarketEvent, MarketEventType, TradeSignal};
use crate::risk::RiskDecision;
use crate::AppState;
use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub strategy_engine_running: bool,
    pub risk_engine_active: bool,
    pub broker_connected: bool,
    pub active_orders: usize,
    pub advisory_enabled: bool,
}

pub async fn get_status(AxumState(state): AxumState<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        strategy_engine_running: state.strategy_engine.is_running(),
        risk_engine_active: state.risk_engine.is_active(),
        broker_connected: state.broker.is_connected(),
        active_orders: state.execution_engine.active_order_count(),
        advisory_enabled: state.advisory_service.is_enabled(),
    })
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct StrategiesResponse {
    pub registered: Vec<String>,
}

pub async fn list_strategies(AxumState(state): AxumState<AppState>) -> Json<StrategiesResponse> {
    Json(StrategiesResponse {
        registered: state.strategy_engine.registered_names(),
    })
}

pub async fn activate_strategy(
    Path(name): Path<String>,
    AxumState(state): AxumState<AppState>,
) -> StatusCode {
    if state.strategy_engine.set_strategy_active(&name, true) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn deactivate_strategy(
    Path(name): Path<String>,
    AxumState(state): AxumState<AppState>,
) -> StatusCode {
    if state.strategy_engine.set_strategy_active(&name, false) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Serialize)]
pub struct RiskStatusResponse {
    pub active: bool,
    pub rules: Vec<String>,
    pub signals_approved: u64,
    pub signals_rejected: u64,
}

pub async fn get_risk_status(AxumState(state): AxumState<AppState>) -> Json<RiskStatusResponse> {
    let (approved, rejected) = state.risk_engine.get_statistics();
    Json(RiskStatusResponse {
        active: state.risk_engine.is_active(),
        rules: state.risk_engine.list_rules(),
        signals_approved: approved,
        signals_rejected: rejected,
    })
}

#[derive(Debug, Serialize)]
pub struct RiskToggleResponse {
    pub active: bool,
    pub warning: Option<String>,
}

pub async fn activate_risk(AxumState(state): AxumState<AppState>) -> Json<RiskToggleResponse> {
    state.risk_engine.activate();
    Json(RiskToggleResponse {
        active: true,
        warning: None,
    })
}

pub async fn deactivate_risk(AxumState(state): AxumState<AppState>) -> Json<RiskToggleResponse> {
    state.risk_engine.deactivate();
    Json(RiskToggleResponse {
        active: false,
        warning: Some("Risk gate disabled: no signal will be validated until reactivated".to_string()),
    })
}

#[derive(Debug, Serialize)]
pub struct ExecutionStatusResponse {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub orders_rejected: u64,
    pub active_orders: usize,
}

pub async fn get_execution_status(AxumState(state): AxumState<AppState>) -> Json<ExecutionStatusResponse> {
    let stats = state.execution_engine.get_statistics();
    Json(ExecutionStatusResponse {
        orders_submitted: stats.orders_submitted,
        orders_filled: stats.orders_filled,
        orders_cancelled: stats.orders_cancelled,
        orders_rejected: stats.orders_rejected,
        active_orders: state.execution_engine.active_order_count(),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn get_execution_history(
    Query(params): Query<HistoryQuery>,
    AxumState(state): AxumState<AppState>,
) -> Json<Vec<crate::domain::OrderEvent>> {
    Json(state.execution_engine.get_order_history(params.limit))
}

pub async fn get_account(AxumState(state): AxumState<AppState>) -> Result<Json<crate::domain::AccountSnapshot>, StatusCode> {
    state
        .broker
        .get_account()
        .await
        .map(Json)
        .map_err(|_| StatusCode::BAD_GATEWAY)
}

pub async fn get_positions(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<Vec<crate::domain::PositionSnapshot>>, StatusCode> {
    state
        .broker
        .get_positions()
        .await
        .map(Json)
        .map_err(|_| StatusCode::BAD_GATEWAY)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AiAnalyzeRequest {
    PortfolioRisk,
    TradeIdeas { max_ideas: Option<usize> },
    Question { text: String },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AiAnalyzeResponseBody {
    PortfolioRisk(crate::advisory::PortfolioRiskAnalysis),
    TradeIdeas(Vec<crate::domain::TradeIdea>),
    Text(String),
}

pub async fn post_ai_analyze(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<AiAnalyzeRequest>,
) -> Result<Json<AiAnalyzeResponseBody>, StatusCode> {
    let account = state.broker.get_account().await.map_err(|_| StatusCode::BAD_GATEWAY)?;
    let positions = state.broker.get_positions().await.map_err(|_| StatusCode::BAD_GATEWAY)?;

    let advisory_req = match &req {
        AiAnalyzeRequest::PortfolioRisk => AdvisoryRequest::PortfolioRisk,
        AiAnalyzeRequest::TradeIdeas { max_ideas } => AdvisoryRequest::TradeIdeas {
            max_ideas: max_ideas.unwrap_or(3),
        },
        AiAnalyzeRequest::Question { text } => AdvisoryRequest::Question { text },
    };

    let response = state
        .advisory_service
        .analyze(advisory_req, &account, &positions)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let body = match response {
        AdvisoryResponse::PortfolioRisk(r) => AiAnalyzeResponseBody::PortfolioRisk(r),
        AdvisoryResponse::TradeIdeas(ideas) => {
            let mut pending = state.pending_ideas.write();
            for idea in &ideas {
                pending.insert(idea.id, idea.clone());
            }
            AiAnalyzeResponseBody::TradeIdeas(ideas)
        }
        AdvisoryResponse::OptionsAnalysis(text) | AdvisoryResponse::Answer(text) => {
            AiAnalyzeResponseBody::Text(text)
        }
    };

    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct IdeaActionRequest {
    pub approved: bool,
    pub user_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IdeaActionResponse {
    pub minted_signal_id: Option<Uuid>,
}

pub async fn post_ai_idea_action(
    Path(idea_id): Path<Uuid>,
    AxumState(state): AxumState<AppState>,
    Json(req): Json<IdeaActionRequest>,
) -> Result<Json<IdeaActionResponse>, StatusCode> {
    let mut idea = {
        let mut pending = state.pending_ideas.write();
        pending.remove(&idea_id).ok_or(StatusCode::NOT_FOUND)?
    };

    let minted = crate::advisory::AdvisoryService::mint_signal_from_approval(
        &mut idea,
        req.approved,
        req.user_notes,
    )
    .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    state
        .audit
        .record(crate::domain::DomainEvent::TradeIdeaActioned {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            idea_id,
            approved: req.approved,
        })
        .await;

    let minted_signal_id = match minted {
        Some(signal) => {
            let id = signal.id;
            submit_signal_through_pipeline(&state, signal).await;
            Some(id)
        }
        None => None,
    };

    Ok(Json(IdeaActionResponse { minted_signal_id }))
}

async fn submit_signal_through_pipeline(state: &AppState, signal: TradeSignal) {
    state
        .audit
        .record(crate::domain::DomainEvent::SignalGenerated {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            signal: signal.clone(),
        })
        .await;

    let account = match state.broker.get_account().await {
        Ok(a) => a,
        Err(_) => return,
    };
    let positions = state.broker.get_positions().await.unwrap_or_default();
    let current_price = state.broker.get_current_price(&signal.symbol).await.ok();

    let decision = state
        .risk_engine
        .validate_signal(signal, &account, &positions, current_price);

    match decision {
        RiskDecision::Approved(trade) => {
            state
                .audit
                .record(crate::domain::DomainEvent::SignalApproved {
                    id: Uuid::new_v4(),
                    timestamp: chrono::Utc::now(),
                    trade: trade.clone(),
                })
                .await;
            let _ = state.execution_engine.execute_approved_trade(trade).await;
        }
        RiskDecision::Rejected(trade) => {
            state
                .audit
                .record(crate::domain::DomainEvent::SignalRejected {
                    id: Uuid::new_v4(),
                    timestamp: chrono::Utc::now(),
                    trade,
                })
                .await;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventSummary>,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub event_type: String,
    pub timestamp: String,
}

pub async fn get_events(
    Query(params): Query<EventsQuery>,
    AxumState(state): AxumState<AppState>,
) -> Json<EventsResponse> {
    let limit = params.limit.unwrap_or(100);
    let events = state
        .audit_trail
        .as_ref()
        .map(|sink| sink.query_trail(limit))
        .unwrap_or_default();
    Json(EventsResponse {
        events: events
            .into_iter()
            .map(|e| EventSummary {
                event_type: e.event_type,
                timestamp: e.timestamp.to_rfc3339(),
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SimulateTickRequest {
    pub symbol: String,
    pub price: f64,
}

pub async fn post_market_simulate(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<SimulateTickRequest>,
) -> Result<StatusCode, StatusCode> {
    let mut payload = HashMap::new();
    payload.insert("price".to_string(), serde_json::json!(req.price));
    let event = MarketEvent {
        event_type: MarketEventType::Tick,
        symbol: req.symbol.to_ascii_uppercase(),
        timestamp: chrono::Utc::now(),
        payload,
    };

    state
        .audit
        .record(crate::domain::DomainEvent::MarketDataReceived {
            id: Uuid::new_v4(),
            timestamp: event.timestamp,
            event: event.clone(),
        })
        .await;

    let signals = state.strategy_engine.process_market_event(&event).await;
    for signal in signals {
        submit_signal_through_pipeline(&state, signal).await;
    }

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_serializes() {
        let resp = StatusResponse {
            strategy_engine_running: true,
            risk_engine_active: true,
            broker_connected: false,
            active_orders: 0,
            advisory_enabled: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("strategy_engine_running"));
    }
}
