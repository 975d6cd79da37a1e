//! Advisory service: LLM-backed, human-approval-gated trade ideas.
//!
//! The chat-completion transport is grounded on `vault::llm::OpenRouterClient`
//! (single endpoint, bearer key, system+user message pair, small typed
//! response). The scoring formulas and disabled-stub behavior follow
//! `examples/original_source/trading-system/services/ai/advisor.py`.

use crate::domain::{AccountSnapshot, PositionSnapshot, TradeIdea, TradeIdeaApproval, VolatilitySnapshot};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f64 = 0.3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const SYSTEM_PROMPT: &str = "You are a conservative trading risk advisor. Frame every suggestion \
in terms of risk first, never guarantee returns, and keep position sizing modest.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRiskAnalysis {
    pub risk_score: f64,
    pub diversification_score: f64,
    pub commentary: String,
}

pub enum AdvisoryRequest<'a> {
    PortfolioRisk,
    TradeIdeas { max_ideas: usize },
    OptionsAnalysis { volatility: &'a VolatilitySnapshot },
    Question { text: &'a str },
}

pub enum AdvisoryResponse {
    PortfolioRisk(PortfolioRiskAnalysis),
    TradeIdeas(Vec<TradeIdea>),
    OptionsAnalysis(String),
    Answer(String),
}

/// `reqwest`-based chat-completion transport, following the teacher's
/// `OpenRouterClient` shape.
struct ChatClient {
    http: reqwest::Client,
    api_key: String,
}

impl ChatClient {
    fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
        })
    }

    async fn chat_completion(&self, system: &str, user: &str) -> Result<String> {
        let req = ChatCompletionRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
        };

        let resp = self
            .http
            .post("https://openrouter.ai/api/v1/chat/completions")
            .timeout(DEFAULT_TIMEOUT)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .context("openrouter request")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("openrouter {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).context("openrouter json parse")?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

/// Advisory-only: everything here is suggestion, never order flow. A user
/// must separately approve a `TradeIdea` before `mint_signal_from_approval`
/// is ever called.
pub struct AdvisoryService {
    client: Option<ChatClient>,
}

impl AdvisoryService {
    pub fn from_env() -> Self {
        let client = ChatClient::from_env();
        if client.is_none() {
            tracing::warn!("OPENROUTER_API_KEY not set, advisory service running in disabled stub mode");
        }
        Self { client }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn portfolio_risk_score(account: &AccountSnapshot, positions: &[PositionSnapshot]) -> PortfolioRiskAnalysis {
        let max_position_pct = positions
            .iter()
            .map(|p| p.exposure_pct)
            .fold(0.0_f64, f64::max);
        let total_exposure: f64 = positions.iter().map(|p| p.exposure_pct).sum();
        let n = positions.len() as f64;

        let risk_score = (max_position_pct * 2.0).min(50.0)
            + (total_exposure / 2.0).min(30.0)
            + (20.0 - 2.0 * n).max(0.0);
        let diversification_score = (10.0 * n).min(60.0) + (40.0 - max_position_pct).max(0.0);

        let commentary = if account.equity <= 0.0 {
            "Account has no equity to analyze.".to_string()
        } else if risk_score > 70.0 {
            "Portfolio concentration is high; consider trimming the largest position.".to_string()
        } else {
            "Portfolio risk is within typical bounds.".to_string()
        };

        PortfolioRiskAnalysis {
            risk_score,
            diversification_score,
            commentary,
        }
    }

    pub async fn analyze(
        &self,
        request: AdvisoryRequest<'_>,
        account: &AccountSnapshot,
        positions: &[PositionSnapshot],
    ) -> Result<AdvisoryResponse> {
        match request {
            AdvisoryRequest::PortfolioRisk => {
                Ok(AdvisoryResponse::PortfolioRisk(Self::portfolio_risk_score(account, positions)))
            }
            AdvisoryRequest::TradeIdeas { max_ideas } => {
                Ok(AdvisoryResponse::TradeIdeas(self.generate_trade_ideas(account, positions, max_ideas).await?))
            }
            AdvisoryRequest::OptionsAnalysis { volatility } => {
                Ok(AdvisoryResponse::OptionsAnalysis(self.options_commentary(volatility).await?))
            }
            AdvisoryRequest::Question { text } => Ok(AdvisoryResponse::Answer(self.answer_question(text, account, positions).await?)),
        }
    }

    async fn generate_trade_ideas(
        &self,
        account: &AccountSnapshot,
        positions: &[PositionSnapshot],
        max_ideas: usize,
    ) -> Result<Vec<TradeIdea>> {
        let Some(client) = &self.client else {
            return Ok(vec![stub_idea()]);
        };

        let user_prompt = format!(
            "Account equity ${:.2}, {} open position(s). Suggest up to {max_ideas} trade ideas with \
             rationale and risk notes. Keep each idea to two sentences.",
            account.equity,
            positions.len()
        );

        let content = client.chat_completion(SYSTEM_PROMPT, &user_prompt).await?;
        Ok(vec![TradeIdea {
            id: Uuid::new_v4(),
            description: content.lines().next().unwrap_or("Trade idea").to_string(),
            rationale: content,
            risk_notes: "Position sizing left to the risk engine upon approval.".to_string(),
            confidence: 0.5,
            created_at: Utc::now(),
            suggested_signal: None,
            market_context: HashMap::new(),
            approval: None,
        }])
    }

    async fn options_commentary(&self, volatility: &VolatilitySnapshot) -> Result<String> {
        let Some(client) = &self.client else {
            return Ok(format!(
                "Advisory disabled: implied vol {:?}, historical vol {:?}.",
                volatility.implied_vol, volatility.historical_vol
            ));
        };
        let user_prompt = format!(
            "Symbol {}: implied vol {:?}, historical vol {:?}, vol rank {:?}, VIX {:?}. Give a brief options \
             positioning note.",
            volatility.symbol, volatility.implied_vol, volatility.historical_vol, volatility.vol_rank, volatility.vix_level
        );
        client.chat_completion(SYSTEM_PROMPT, &user_prompt).await
    }

    async fn answer_question(&self, question: &str, account: &AccountSnapshot, positions: &[PositionSnapshot]) -> Result<String> {
        let Some(client) = &self.client else {
            return Ok("Advisory service is disabled (no API key configured).".to_string());
        };
        let user_prompt = format!(
            "Account equity ${:.2}, {} open position(s). Question: {question}",
            account.equity,
            positions.len()
        );
        client.chat_completion(SYSTEM_PROMPT, &user_prompt).await
    }

    /// User approval of a `TradeIdea` mints a fresh `TradeSignal` with
    /// `source = AI`; the idea itself never enters the risk engine directly.
    pub fn mint_signal_from_approval(
        idea: &mut TradeIdea,
        approved: bool,
        user_notes: Option<String>,
    ) -> Result<Option<crate::domain::TradeSignal>> {
        idea.approval = Some(TradeIdeaApproval {
            approved,
            decided_at: Utc::now(),
            user_notes,
        });

        if !approved {
            return Ok(None);
        }

        match &idea.suggested_signal {
            Some(signal) => {
                let mut minted = signal.clone();
                minted.id = Uuid::new_v4();
                minted.source = crate::domain::SignalSource::Ai;
                minted.created_at = Utc::now();
                Ok(Some(minted))
            }
            None => Err(anyhow!("trade idea {} has no suggested signal to mint", idea.id)),
        }
    }
}

fn stub_idea() -> TradeIdea {
    TradeIdea {
        id: Uuid::new_v4(),
        description: "Advisory service disabled".to_string(),
        rationale: "Set OPENROUTER_API_KEY to enable LLM-backed trade ideas.".to_string(),
        risk_notes: "No live analysis performed.".to_string(),
        confidence: 0.0,
        created_at: Utc::now(),
        suggested_signal: None,
        market_context: HashMap::new(),
        approval: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(equity: f64) -> AccountSnapshot {
        AccountSnapshot {
            equity,
            buying_power: equity,
            cash: equity,
            day_trades_remaining: 3,
        }
    }

    fn position(symbol: &str, exposure_pct: f64) -> PositionSnapshot {
        PositionSnapshot {
            symbol: symbol.to_string(),
            qty: 10,
            avg_entry_price: 100.0,
            unrealized_pnl: 0.0,
            exposure_pct,
        }
    }

    #[test]
    fn risk_and_diversification_scores_match_formula() {
        let positions = vec![position("AAPL", 10.0), position("MSFT", 5.0)];
        let analysis = AdvisoryService::portfolio_risk_score(&account(100_000.0), &positions);

        let expected_risk = (10.0_f64 * 2.0).min(50.0) + (15.0_f64 / 2.0).min(30.0) + (20.0 - 4.0).max(0.0);
        assert!((analysis.risk_score - expected_risk).abs() < 1e-9);

        let expected_div = (10.0 * 2.0_f64).min(60.0) + (40.0 - 10.0_f64).max(0.0);
        assert!((analysis.diversification_score - expected_div).abs() < 1e-9);
    }

    #[tokio::test]
    async fn disabled_service_returns_stub_idea() {
        let service = AdvisoryService { client: None };
        assert!(!service.is_enabled());
        let ideas = service
            .generate_trade_ideas(&account(10_000.0), &[], 3)
            .await
            .unwrap();
        assert_eq!(ideas.len(), 1);
        assert_eq!(ideas[0].confidence, 0.0);
    }

    #[test]
    fn rejecting_an_idea_never_mints_a_signal() {
        let mut idea = stub_idea();
        let minted = AdvisoryService::mint_signal_from_approval(&mut idea, false, None).unwrap();
        assert!(minted.is_none());
        assert_eq!(idea.approval.unwrap().approved, false);
    }

    #[test]
    fn approving_idea_without_suggested_signal_errors() {
        let mut idea = stub_idea();
        let result = AdvisoryService::mint_signal_from_approval(&mut idea, true, None);
        assert!(result.is_err());
    }
}
