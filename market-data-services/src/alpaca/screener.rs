use market_core::{MarketMovers, MostActive};
use std::sync::Arc;

use super::client::{query_params, AlpacaClient, Api};
use super::error::AlpacaResult;
use super::wire::{MostActivesResponse, MoversResponse};

/// Ranking used by the most-actives screener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveBy {
    #[default]
    Volume,
    Trades,
}

impl ActiveBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveBy::Volume => "volume",
            ActiveBy::Trades => "trades",
        }
    }
}

/// Stock screener endpoints
pub struct ScreenerClient {
    client: Arc<AlpacaClient>,
}

impl ScreenerClient {
    pub fn new(client: Arc<AlpacaClient>) -> Self {
        Self { client }
    }

    /// Most active stocks of the session
    pub async fn get_most_actives(&self, by: ActiveBy, top: u32) -> AlpacaResult<Vec<MostActive>> {
        let query = query_params([
            ("by", Some(by.as_str().to_string())),
            ("top", Some(top.to_string())),
        ]);

        let response: MostActivesResponse = self
            .client
            .get(Api::Data, "/v1beta1/screener/stocks/most-actives", &query)
            .await?;

        tracing::info!(
            "Screener returned {} most active stocks (by {}, last_updated={:?})",
            response.most_actives.len(),
            by.as_str(),
            response.last_updated
        );

        Ok(response.most_actives)
    }

    /// Top gainers and losers of the session
    pub async fn get_market_movers(&self, top: u32) -> AlpacaResult<MarketMovers> {
        let query = query_params([("top", Some(top.to_string()))]);

        let response: MoversResponse = self
            .client
            .get(Api::Data, "/v1beta1/screener/stocks/movers", &query)
            .await?;

        tracing::info!(
            "Screener returned {} gainers and {} losers",
            response.gainers.len(),
            response.losers.len()
        );

        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::AlpacaConfig;

    #[test]
    fn test_active_by_param() {
        assert_eq!(ActiveBy::default(), ActiveBy::Volume);
        assert_eq!(ActiveBy::Trades.as_str(), "trades");
    }

    #[tokio::test]
    #[ignore] // Requires Alpaca credentials in the environment
    async fn test_live_most_actives() {
        let client = AlpacaClient::new(AlpacaConfig::from_env().unwrap()).unwrap();
        let screener = ScreenerClient::new(Arc::new(client));
        let actives = screener.get_most_actives(ActiveBy::Volume, 10).await.unwrap();
        assert!(actives.len() <= 10);
    }
}
