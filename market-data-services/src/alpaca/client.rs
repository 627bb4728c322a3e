use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use moka::future::Cache;
use reqwest::{header, Url};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::config::AlpacaConfig;
use super::error::{AlpacaError, AlpacaResult};

/// Upper bound on pages followed for one paginated request
const MAX_PAGES: usize = 500;

/// Base delay of the exponential retry backoff
const BACKOFF_BASE_MS: u64 = 500;

const CACHE_CAPACITY: u64 = 1_024;

/// Which Alpaca host a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    /// Market data (stocks, options, screener)
    Data,
    /// Trading (assets, option contracts)
    Trading,
}

/// Response type that carries a `next_page_token`
pub trait Paginated: Sized {
    fn next_page_token(&self) -> Option<&str>;

    /// Append the records of a later page to this one
    fn merge_page(&mut self, next: Self);
}

/// Authenticated Alpaca REST client with rate limiting, caching and retries
pub struct AlpacaClient {
    http: reqwest::Client,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    cache: Option<Cache<String, Arc<String>>>,
    config: AlpacaConfig,
}

impl AlpacaClient {
    /// Create a new client from configuration
    pub fn new(config: AlpacaConfig) -> AlpacaResult<Self> {
        config.validate()?;

        tracing::info!(
            "Initializing Alpaca client: data_url={}, trading_url={}, paper={}, rate_limit={}/min",
            config.data_url,
            config.trading_url,
            config.paper,
            config.requests_per_minute
        );

        let mut headers = header::HeaderMap::new();
        headers.insert(
            "apca-api-key-id",
            header::HeaderValue::from_str(&config.api_key)
                .map_err(|e| AlpacaError::Config(format!("invalid api key header: {}", e)))?,
        );
        headers.insert(
            "apca-api-secret-key",
            header::HeaderValue::from_str(&config.secret_key)
                .map_err(|e| AlpacaError::Config(format!("invalid secret key header: {}", e)))?,
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| AlpacaError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let requests_per_minute = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| AlpacaError::Config("requests_per_minute must be > 0".into()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute)));

        let cache = (config.cache_ttl_seconds > 0).then(|| {
            Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
                .build()
        });

        Ok(Self {
            http,
            rate_limiter,
            cache,
            config,
        })
    }

    pub fn config(&self) -> &AlpacaConfig {
        &self.config
    }

    /// Build the full request URL for an endpoint
    pub fn build_url(
        &self,
        api: Api,
        path: &str,
        query: &[(String, String)],
    ) -> AlpacaResult<Url> {
        let base = match api {
            Api::Data => &self.config.data_url,
            Api::Trading => &self.config.trading_url,
        };
        let raw = format!("{}{}", base.trim_end_matches('/'), path);

        if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query)
        }
        .map_err(|e| AlpacaError::Config(format!("invalid URL {}: {}", raw, e)))
    }

    /// GET a JSON document and decode it
    pub async fn get<T: DeserializeOwned>(
        &self,
        api: Api,
        path: &str,
        query: &[(String, String)],
    ) -> AlpacaResult<T> {
        let url = self.build_url(api, path, query)?;
        let body = self.fetch_body(url).await?;

        serde_json::from_str(&body).map_err(|e| AlpacaError::Decode {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }

    /// GET every page of a paginated endpoint and merge them
    pub async fn get_paginated<T>(
        &self,
        api: Api,
        path: &str,
        query: &[(String, String)],
    ) -> AlpacaResult<T>
    where
        T: DeserializeOwned + Paginated,
    {
        let mut merged: T = self.get(api, path, query).await?;
        let mut pages = 1;

        while let Some(token) = merged.next_page_token().map(str::to_string) {
            if pages >= MAX_PAGES {
                tracing::warn!(
                    "Stopping pagination of {} after {} pages",
                    path,
                    MAX_PAGES
                );
                break;
            }

            let mut page_query = query.to_vec();
            page_query.push(("page_token".to_string(), token.clone()));

            let page: T = self.get(api, path, &page_query).await?;
            if page.next_page_token() == Some(token.as_str()) {
                tracing::warn!("Pagination token repeated for {}, stopping", path);
                merged.merge_page(page);
                break;
            }

            merged.merge_page(page);
            pages += 1;
        }

        tracing::debug!("Fetched {} page(s) from {}", pages, path);
        Ok(merged)
    }

    /// Response body for a URL, served from cache when fresh
    async fn fetch_body(&self, url: Url) -> AlpacaResult<Arc<String>> {
        let key = url.to_string();

        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(&key).await {
                tracing::debug!("Cache hit: {}", key);
                return Ok(body);
            }
        }

        let body = Arc::new(self.fetch_with_retry(url).await?);

        if let Some(cache) = &self.cache {
            cache.insert(key, body.clone()).await;
        }

        Ok(body)
    }

    async fn fetch_with_retry(&self, url: Url) -> AlpacaResult<String> {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            // Wait for rate limiter
            self.rate_limiter.until_ready().await;

            match self.send_once(&url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_retries => {
                    let backoff = backoff_delay(attempt);
                    tracing::warn!(
                        "Alpaca request failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt + 1,
                        self.config.max_retries,
                        backoff.as_millis(),
                        e
                    );
                    last_error = Some(e);
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AlpacaError::Http("All retry attempts failed".into())))
    }

    async fn send_once(&self, url: &Url) -> AlpacaResult<String> {
        tracing::debug!("GET {}", url);

        // Covers the body read as well as the response head
        let request = async {
            let response = self.http.get(url.clone()).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, AlpacaError>((status, body))
        };

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let (status, body) = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| AlpacaError::Timeout {
                endpoint: url.path().to_string(),
                seconds: self.config.timeout_seconds,
            })??;

        if !status.is_success() {
            return Err(AlpacaError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(body)
    }
}

/// Delay before retry number `attempt + 1`: 500ms, 1s, 2s, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(2_u64.saturating_pow(attempt).saturating_mul(BACKOFF_BASE_MS))
}

/// Extract Alpaca's `message` field from an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Build an owned query list, skipping unset parameters
pub(crate) fn query_params<'a, I>(params: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    params
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::test_server::{Reply, TestServer};
    use crate::alpaca::wire::BarsResponse;

    fn client() -> AlpacaClient {
        AlpacaClient::new(AlpacaConfig::new("key", "secret")).unwrap()
    }

    #[test]
    fn test_build_url_with_query() {
        let url = client()
            .build_url(
                Api::Data,
                "/v2/stocks/bars",
                &[
                    ("symbols".to_string(), "AAPL,MSFT".to_string()),
                    ("timeframe".to_string(), "1Day".to_string()),
                ],
            )
            .unwrap();

        assert_eq!(url.host_str(), Some("data.alpaca.markets"));
        assert_eq!(url.path(), "/v2/stocks/bars");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("symbols".to_string(), "AAPL,MSFT".to_string())));
        assert!(pairs.contains(&("timeframe".to_string(), "1Day".to_string())));
    }

    #[test]
    fn test_build_url_trading_host() {
        let url = client().build_url(Api::Trading, "/v2/assets", &[]).unwrap();
        assert_eq!(url.as_str(), "https://paper-api.alpaca.markets/v2/assets");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"code":42210000,"message":"invalid symbol"}"#),
            "invalid symbol"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_query_params_skip_none() {
        let params = query_params([
            ("symbols", Some("AAPL".to_string())),
            ("limit", None),
            ("feed", Some("iex".to_string())),
        ]);
        assert_eq!(
            params,
            vec![
                ("symbols".to_string(), "AAPL".to_string()),
                ("feed".to_string(), "iex".to_string())
            ]
        );
    }

    #[test]
    fn test_new_rejects_missing_credentials() {
        assert!(AlpacaClient::new(AlpacaConfig::default()).is_err());
    }

    fn bars_page(close: f64, token: Option<&str>) -> String {
        let token = token.map_or("null".to_string(), |t| format!("\"{}\"", t));
        format!(
            r#"{{"bars":{{"AAPL":[{{"t":"2024-03-01T05:00:00Z","o":1,"h":2,"l":0.5,"c":{},"v":10}}]}},"next_page_token":{}}}"#,
            close, token
        )
    }

    fn closes(resp: BarsResponse) -> Vec<f64> {
        resp.into_bars()
            .remove("AAPL")
            .unwrap_or_default()
            .iter()
            .map(|b| b.close)
            .collect()
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2_000));
        // Saturates instead of overflowing
        assert_eq!(backoff_delay(100), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_paginated_merges_pages_and_passes_token() {
        let server = TestServer::start(vec![
            Reply::ok(bars_page(1.0, Some("p2"))),
            Reply::ok(bars_page(2.0, Some("p3"))),
            Reply::ok(bars_page(3.0, None)),
        ])
        .await;
        let client = AlpacaClient::new(server.config()).unwrap();

        let query = vec![("symbols".to_string(), "AAPL".to_string())];
        let resp: BarsResponse = client
            .get_paginated(Api::Data, "/v2/stocks/bars", &query)
            .await
            .unwrap();
        assert_eq!(closes(resp), vec![1.0, 2.0, 3.0]);

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].contains("page_token"));
        assert!(requests[1].contains("symbols=AAPL"));
        assert!(requests[1].contains("page_token=p2"));
        assert!(requests[2].contains("page_token=p3"));
    }

    #[tokio::test]
    async fn test_paginated_stops_on_repeated_token() {
        let server = TestServer::start(vec![
            Reply::ok(bars_page(1.0, Some("same"))),
            Reply::ok(bars_page(2.0, Some("same"))),
            Reply::ok(bars_page(3.0, None)),
        ])
        .await;
        let client = AlpacaClient::new(server.config()).unwrap();

        let resp: BarsResponse = client
            .get_paginated(Api::Data, "/v2/stocks/bars", &[])
            .await
            .unwrap();
        assert_eq!(closes(resp), vec![1.0, 2.0]);
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_paginated_stops_at_page_cap() {
        let server =
            TestServer::with_handler(|i| Reply::ok(bars_page(i as f64, Some(&format!("p{}", i + 1)))))
                .await;
        let client = AlpacaClient::new(server.config()).unwrap();

        let resp: BarsResponse = client
            .get_paginated(Api::Data, "/v2/stocks/bars", &[])
            .await
            .unwrap();
        assert_eq!(closes(resp).len(), MAX_PAGES);
        assert_eq!(server.requests().len(), MAX_PAGES);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = TestServer::start(vec![
            Reply::status(503, "unavailable"),
            Reply::ok(bars_page(7.0, None)),
        ])
        .await;
        let client = AlpacaClient::new(server.config()).unwrap();

        let resp: BarsResponse = client.get(Api::Data, "/v2/stocks/bars", &[]).await.unwrap();
        assert_eq!(closes(resp), vec![7.0]);
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let server = TestServer::start(vec![
            Reply::status(422, "invalid symbol"),
            Reply::ok(bars_page(7.0, None)),
        ])
        .await;
        let client = AlpacaClient::new(server.config()).unwrap();

        let err = client
            .get::<BarsResponse>(Api::Data, "/v2/stocks/bars", &[])
            .await
            .unwrap_err();
        match err {
            AlpacaError::Status { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "invalid symbol");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = TestServer::with_handler(|_| Reply::status(429, "too many requests")).await;
        let config = AlpacaConfig {
            max_retries: 2,
            ..server.config()
        };
        let client = AlpacaClient::new(config).unwrap();

        let err = client
            .get::<BarsResponse>(Api::Data, "/v2/stocks/bars", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AlpacaError::Status { status: 429, .. }));
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_serves_repeated_request() {
        let server = TestServer::start(vec![
            Reply::ok(bars_page(1.0, None)),
            Reply::ok(bars_page(2.0, None)),
        ])
        .await;
        let config = AlpacaConfig {
            cache_ttl_seconds: 60,
            ..server.config()
        };
        let client = AlpacaClient::new(config).unwrap();

        let first: BarsResponse = client.get(Api::Data, "/v2/stocks/bars", &[]).await.unwrap();
        let second: BarsResponse = client.get(Api::Data, "/v2/stocks/bars", &[]).await.unwrap();
        assert_eq!(closes(first), vec![1.0]);
        assert_eq!(closes(second), vec![1.0]);
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_covers_stalled_body() {
        let server = TestServer::start(vec![Reply::StallBody]).await;
        let config = AlpacaConfig {
            timeout_seconds: 1,
            max_retries: 1,
            ..server.config()
        };
        let client = AlpacaClient::new(config).unwrap();

        let err = client
            .get::<BarsResponse>(Api::Data, "/v2/stocks/bars", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AlpacaError::Timeout { seconds: 1, .. }));
    }
}
