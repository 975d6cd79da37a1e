//! Application configuration, loaded once at startup.
//!
//! Grounded on `models::Config::from_env`'s per-field `env::var(...)` idiom;
//! required variables exit the process instead of falling back silently.

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub alpaca_api_key: String,
    pub alpaca_secret_key: String,
    pub alpaca_base_url: String,
    pub trading_api_key: String,
    pub database_path: String,
    pub openrouter_api_key: Option<String>,
    pub port: u16,
    pub use_paper_broker: bool,
    pub strategy_symbols: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let use_paper_broker = std::env::var("USE_PAPER_BROKER")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let alpaca_api_key = std::env::var("ALPACA_API_KEY").unwrap_or_default();
        let alpaca_secret_key = std::env::var("ALPACA_SECRET_KEY").unwrap_or_default();

        if !use_paper_broker && (alpaca_api_key.is_empty() || alpaca_secret_key.is_empty()) {
            bail!("ALPACA_API_KEY and ALPACA_SECRET_KEY are required unless USE_PAPER_BROKER=1");
        }

        let trading_api_key = std::env::var("TRADING_API_KEY")
            .map_err(|_| anyhow::anyhow!("TRADING_API_KEY must be set"))?;
        if trading_api_key.trim().is_empty() {
            bail!("TRADING_API_KEY must not be empty");
        }

        let alpaca_base_url = std::env::var("ALPACA_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());

        let database_path =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "./trading_audit.db".to_string());

        let openrouter_api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let strategy_symbols = std::env::var("STRATEGY_SYMBOLS")
            .unwrap_or_else(|_| "AAPL,MSFT,SPY".to_string())
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            alpaca_api_key,
            alpaca_secret_key,
            alpaca_base_url,
            trading_api_key,
            database_path,
            openrouter_api_key,
            port,
            use_paper_broker,
            strategy_symbols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_trading_api_key_is_an_error() {
        std::env::remove_var("TRADING_API_KEY");
        std::env::set_var("USE_PAPER_BROKER", "1");
        let result = Config::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn paper_broker_does_not_require_alpaca_keys() {
        std::env::remove_var("ALPACA_API_KEY");
        std::env::remove_var("ALPACA_SECRET_KEY");
        std::env::set_var("TRADING_API_KEY", "test-secret");
        std::env::set_var("USE_PAPER_BROKER", "1");
        let config = Config::from_env().unwrap();
        assert!(config.use_paper_broker);
    }
}
