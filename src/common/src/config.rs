//! Configuration loading from environment variables.

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// CLOB REST API base URL
    pub api_url: String,

    /// CLOB WebSocket URL
    pub ws_url: String,

    /// External volatility feed base URL
    pub volatility_api_url: String,

    /// Orderbook refresh interval in seconds
    pub scan_interval_secs: f64,

    /// Market discovery interval in seconds
    pub markets_refresh_secs: u64,

    /// Keywords used for market discovery
    pub keywords: Vec<String>,

    /// Directory for persisted state (trading params, trades)
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional (with defaults):
    /// - CLOB_API_URL: REST API base URL
    /// - CLOB_WS_URL: WebSocket URL
    /// - VOLATILITY_API_URL: external volatility feed base URL
    /// - SCAN_INTERVAL_SECS: orderbook refresh interval (default: 1.0)
    /// - MARKETS_REFRESH_SECS: discovery interval (default: 60)
    /// - MARKET_KEYWORDS: comma-separated discovery keywords
    /// - DATA_DIR: persisted state directory (default: ./data)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let api_url =
            env::var("CLOB_API_URL").unwrap_or_else(|_| "https://clob.polymarket.com".to_string());

        let ws_url = env::var("CLOB_WS_URL")
            .unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws".to_string());

        let volatility_api_url = env::var("VOLATILITY_API_URL")
            .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string());

        for url in [&api_url, &volatility_api_url] {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }
        let parsed_ws = Url::parse(&ws_url).map_err(|_| ConfigError::InvalidUrl(ws_url.clone()))?;
        if parsed_ws.scheme() != "ws" && parsed_ws.scheme() != "wss" {
            return Err(ConfigError::InvalidUrl(ws_url));
        }

        let scan_interval_secs = match env::var("SCAN_INTERVAL_SECS") {
            Ok(s) => s
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SCAN_INTERVAL_SECS".to_string(), s))?,
            Err(_) => 1.0,
        };

        let markets_refresh_secs = match env::var("MARKETS_REFRESH_SECS") {
            Ok(s) => s
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MARKETS_REFRESH_SECS".to_string(), s))?,
            Err(_) => 60,
        };

        let keywords: Vec<String> = env::var("MARKET_KEYWORDS")
            .unwrap_or_else(|_| "BTC,ETH,SOL,XRP".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));

        Ok(Self {
            api_url,
            ws_url,
            volatility_api_url,
            scan_interval_secs,
            markets_refresh_secs,
            keywords,
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_vars() {
        for var in [
            "CLOB_API_URL",
            "CLOB_WS_URL",
            "VOLATILITY_API_URL",
            "SCAN_INTERVAL_SECS",
            "MARKETS_REFRESH_SECS",
            "MARKET_KEYWORDS",
            "DATA_DIR",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_vars();

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.api_url, "https://clob.polymarket.com");
        assert_eq!(
            config.ws_url,
            "wss://ws-subscriptions-clob.polymarket.com/ws"
        );
        assert_eq!(config.scan_interval_secs, 1.0);
        assert_eq!(config.markets_refresh_secs, 60);
        assert_eq!(config.keywords, vec!["BTC", "ETH", "SOL", "XRP"]);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    #[serial]
    fn test_config_rejects_bad_ws_scheme() {
        clear_vars();
        env::set_var("CLOB_WS_URL", "https://not-a-websocket.example.com");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));

        env::remove_var("CLOB_WS_URL");
    }

    #[test]
    #[serial]
    fn test_config_rejects_bad_interval() {
        clear_vars();
        env::set_var("SCAN_INTERVAL_SECS", "not-a-number");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidValue(_, _))));

        env::remove_var("SCAN_INTERVAL_SECS");
    }

    #[test]
    #[serial]
    fn test_config_parses_keywords() {
        clear_vars();
        env::set_var("MARKET_KEYWORDS", "BTC, DOGE ,ADA");

        let config = Config::from_env_only().unwrap();
        assert_eq!(config.keywords, vec!["BTC", "DOGE", "ADA"]);

        env::remove_var("MARKET_KEYWORDS");
    }
}
