use super::error::{AlpacaError, AlpacaResult};
use std::env;

pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";
pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
pub const DEFAULT_STREAM_URL: &str = "wss://stream.data.alpaca.markets";

/// Connection settings for the Alpaca data and trading APIs
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub secret_key: String,
    /// Use the paper trading endpoint for trading-API lookups (assets, contracts)
    pub paper: bool,
    pub data_url: String,
    pub trading_url: String,
    /// Base URL of the real-time websocket feeds
    pub stream_url: String,
    /// Stock data feed (`iex` on free plans, `sip` with a subscription)
    pub stock_feed: String,
    /// Option data feed (`indicative` on free plans, `opra` with a subscription)
    pub option_feed: String,
    pub requests_per_minute: u32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    /// Time-to-live of cached GET responses; 0 disables caching
    pub cache_ttl_seconds: u64,
    /// `limit` sent on paginated requests
    pub page_limit: u32,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            paper: true,
            data_url: DEFAULT_DATA_URL.to_string(),
            trading_url: PAPER_TRADING_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            stock_feed: "iex".to_string(),
            option_feed: "indicative".to_string(),
            requests_per_minute: 200,
            timeout_seconds: 30,
            max_retries: 3,
            cache_ttl_seconds: 60,
            page_limit: 1000,
        }
    }
}

impl AlpacaConfig {
    /// Config with explicit credentials and defaults elsewhere
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            ..Default::default()
        }
    }

    /// Load from the environment (and `.env` if present).
    ///
    /// Credentials come from `API_KEY`/`API_SECRET`, falling back to
    /// `APCA_API_KEY_ID`/`APCA_API_SECRET_KEY`.
    pub fn from_env() -> AlpacaResult<Self> {
        dotenv::dotenv().ok();
        tracing::info!("Loading Alpaca configuration from environment");

        let api_key = first_env(&["API_KEY", "APCA_API_KEY_ID"])
            .ok_or_else(|| AlpacaError::MissingCredentials("API_KEY or APCA_API_KEY_ID".into()))?;
        let secret_key = first_env(&["API_SECRET", "APCA_API_SECRET_KEY"]).ok_or_else(|| {
            AlpacaError::MissingCredentials("API_SECRET or APCA_API_SECRET_KEY".into())
        })?;

        let paper = match env::var("ALPACA_PAPER") {
            Ok(v) => v.parse::<bool>().map_err(|_| {
                AlpacaError::Config(format!("ALPACA_PAPER must be true or false, got '{}'", v))
            })?,
            Err(_) => true,
        };

        let mut config = Self::new(api_key, secret_key).with_paper(paper);

        if let Ok(url) = env::var("ALPACA_DATA_URL") {
            config.data_url = url;
        }
        if let Ok(url) = env::var("ALPACA_TRADING_URL") {
            config.trading_url = url;
        }
        if let Ok(url) = env::var("ALPACA_STREAM_URL") {
            config.stream_url = url;
        }
        if let Ok(feed) = env::var("ALPACA_STOCK_FEED") {
            config.stock_feed = feed;
        }
        if let Ok(feed) = env::var("ALPACA_OPTION_FEED") {
            config.option_feed = feed;
        }

        Ok(config)
    }

    /// Switch between paper and live trading endpoints
    pub fn with_paper(mut self, paper: bool) -> Self {
        self.paper = paper;
        self.trading_url = if paper {
            PAPER_TRADING_URL.to_string()
        } else {
            LIVE_TRADING_URL.to_string()
        };
        self
    }

    pub fn validate(&self) -> AlpacaResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AlpacaError::MissingCredentials("api_key".into()));
        }
        if self.secret_key.trim().is_empty() {
            return Err(AlpacaError::MissingCredentials("secret_key".into()));
        }
        if self.requests_per_minute == 0 {
            return Err(AlpacaError::Config("requests_per_minute must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(AlpacaError::Config("max_retries must be > 0".into()));
        }
        for url in [&self.data_url, &self.trading_url] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AlpacaError::Config(format!("invalid base URL: {}", url)));
            }
        }
        if !self.stream_url.starts_with("ws://") && !self.stream_url.starts_with("wss://") {
            return Err(AlpacaError::Config(format!(
                "invalid stream URL: {}",
                self.stream_url
            )));
        }
        Ok(())
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}
