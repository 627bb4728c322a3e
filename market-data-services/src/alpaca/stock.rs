use chrono::{DateTime, Duration, Utc};
use market_core::{Bar, StockQuote, StockTrade, TimeFrame};
use std::collections::HashMap;
use std::sync::Arc;

use super::client::{query_params, AlpacaClient, Api};
use super::error::AlpacaResult;
use super::wire::{BarsResponse, LatestQuotesResponse, QuotesResponse, TradesResponse};

/// Historical and latest stock market data
pub struct StockDataCollector {
    client: Arc<AlpacaClient>,
}

impl StockDataCollector {
    pub fn new(client: Arc<AlpacaClient>) -> Self {
        Self { client }
    }

    /// Bars for one or more symbols in `[start, end]`, following all pages
    ///
    /// # Arguments
    /// * `symbols` - Tickers (e.g., ["AAPL", "MSFT"])
    /// * `timeframe` - Bar aggregation window
    /// * `start` - Window start (inclusive)
    /// * `end` - Window end; `None` lets the API default to now
    /// * `limit` - Page size; every page is followed. `None` uses the configured page limit
    ///
    /// # Returns
    /// Bars per symbol in API order. Symbols with no data are absent.
    pub async fn get_historical_bars(
        &self,
        symbols: &[String],
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> AlpacaResult<HashMap<String, Vec<Bar>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let config = self.client.config();
        let query = query_params([
            ("symbols", Some(symbols.join(","))),
            ("timeframe", Some(timeframe.as_api_str())),
            ("start", Some(start.to_rfc3339())),
            ("end", end.map(|e| e.to_rfc3339())),
            ("limit", Some(limit.unwrap_or(config.page_limit).to_string())),
            ("feed", Some(config.stock_feed.clone())),
            ("adjustment", Some("raw".to_string())),
        ]);

        let response: BarsResponse = self
            .client
            .get_paginated(Api::Data, "/v2/stocks/bars", &query)
            .await?;
        let bars = response.into_bars();

        tracing::info!(
            "Fetched {} bars for {} symbol(s) ({}, from {})",
            bars.values().map(Vec::len).sum::<usize>(),
            symbols.len(),
            timeframe,
            start.to_rfc3339()
        );

        Ok(bars)
    }

    /// Bars for one symbol covering the last `days_back` days
    pub async fn get_stock_data(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        days_back: u32,
    ) -> AlpacaResult<Vec<Bar>> {
        let symbol = symbol.to_uppercase();
        let end = Utc::now();
        let start = end - Duration::days(days_back as i64);

        let mut bars = self
            .get_historical_bars(&[symbol.clone()], timeframe, start, Some(end), None)
            .await?;

        Ok(bars.remove(&symbol).unwrap_or_default())
    }

    /// Trades for the last `days_back` days
    pub async fn get_historical_trades(
        &self,
        symbols: &[String],
        days_back: u32,
        limit: Option<u32>,
    ) -> AlpacaResult<HashMap<String, Vec<StockTrade>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Utc::now() - Duration::days(days_back as i64);
        let query = query_params([
            ("symbols", Some(symbols.join(","))),
            ("start", Some(start.to_rfc3339())),
            ("limit", limit.map(|l| l.to_string())),
            ("feed", Some(self.client.config().stock_feed.clone())),
        ]);

        let response: TradesResponse = self
            .client
            .get_paginated(Api::Data, "/v2/stocks/trades", &query)
            .await?;

        Ok(response
            .trades
            .into_iter()
            .map(|(symbol, trades)| (symbol, trades.into_iter().map(StockTrade::from).collect()))
            .collect())
    }

    /// Quotes for the last `days_back` days
    pub async fn get_historical_quotes(
        &self,
        symbols: &[String],
        days_back: u32,
        limit: Option<u32>,
    ) -> AlpacaResult<HashMap<String, Vec<StockQuote>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Utc::now() - Duration::days(days_back as i64);
        let query = query_params([
            ("symbols", Some(symbols.join(","))),
            ("start", Some(start.to_rfc3339())),
            ("limit", limit.map(|l| l.to_string())),
            ("feed", Some(self.client.config().stock_feed.clone())),
        ]);

        let response: QuotesResponse = self
            .client
            .get_paginated(Api::Data, "/v2/stocks/quotes", &query)
            .await?;

        Ok(response
            .quotes
            .into_iter()
            .map(|(symbol, quotes)| (symbol, quotes.into_iter().map(StockQuote::from).collect()))
            .collect())
    }

    /// Latest quote per symbol
    pub async fn get_latest_quote(
        &self,
        symbols: &[String],
    ) -> AlpacaResult<HashMap<String, StockQuote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let query = query_params([
            ("symbols", Some(symbols.join(","))),
            ("feed", Some(self.client.config().stock_feed.clone())),
        ]);

        let response: LatestQuotesResponse = self
            .client
            .get(Api::Data, "/v2/stocks/quotes/latest", &query)
            .await?;

        Ok(response
            .quotes
            .into_iter()
            .map(|(symbol, quote)| (symbol, StockQuote::from(quote)))
            .collect())
    }
}
