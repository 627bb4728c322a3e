use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::America::New_York;
use market_core::{
    Asset, Bar, ContractStatus, ExerciseStyle, OptionChain, OptionContract, OptionSnapshot,
    OptionType, TimeFrame,
};
use std::sync::Arc;

use super::client::{query_params, AlpacaClient, Api};
use super::error::AlpacaResult;
use super::wire::{BarsResponse, OptionContractsResponse, OptionSnapshotsResponse, WireAsset};

/// Server-side filters for the option chain endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainQuery {
    pub option_type: Option<OptionType>,
    pub strike_price_gte: Option<f64>,
    pub strike_price_lte: Option<f64>,
    pub expiration_date_gte: Option<NaiveDate>,
    pub expiration_date_lte: Option<NaiveDate>,
}

impl ChainQuery {
    fn to_params(&self) -> Vec<(String, String)> {
        query_params([
            ("type", self.option_type.map(|t| t.as_str().to_string())),
            ("strike_price_gte", self.strike_price_gte.map(|v| v.to_string())),
            ("strike_price_lte", self.strike_price_lte.map(|v| v.to_string())),
            ("expiration_date_gte", self.expiration_date_gte.map(|d| d.to_string())),
            ("expiration_date_lte", self.expiration_date_lte.map(|d| d.to_string())),
        ])
    }
}

/// Filters for the trading API option contracts listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractQuery {
    pub underlying_symbols: Vec<String>,
    pub status: Option<ContractStatus>,
    pub expiration_date_gte: Option<NaiveDate>,
    pub expiration_date_lte: Option<NaiveDate>,
    pub option_type: Option<OptionType>,
    pub style: Option<ExerciseStyle>,
    pub strike_price_gte: Option<f64>,
    pub strike_price_lte: Option<f64>,
    /// Page size
    pub limit: Option<u32>,
}

impl ContractQuery {
    pub fn for_underlyings<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            underlying_symbols: symbols.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    fn to_params(&self) -> Vec<(String, String)> {
        let underlyings =
            (!self.underlying_symbols.is_empty()).then(|| self.underlying_symbols.join(","));

        query_params([
            ("underlying_symbols", underlyings),
            ("status", self.status.map(|s| s.as_str().to_string())),
            ("expiration_date_gte", self.expiration_date_gte.map(|d| d.to_string())),
            ("expiration_date_lte", self.expiration_date_lte.map(|d| d.to_string())),
            ("type", self.option_type.map(|t| t.as_str().to_string())),
            ("style", self.style.map(|s| s.as_str().to_string())),
            ("strike_price_gte", self.strike_price_gte.map(|v| v.to_string())),
            ("strike_price_lte", self.strike_price_lte.map(|v| v.to_string())),
            ("limit", self.limit.map(|l| l.to_string())),
        ])
    }
}

/// Calendar date of `at` on the New York exchange clock
pub fn exchange_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&New_York).date_naive()
}

pub fn exchange_today() -> NaiveDate {
    exchange_date(Utc::now())
}

/// Option chains, snapshots, option bars and contract listings
pub struct OptionsDataCollector {
    client: Arc<AlpacaClient>,
}

impl OptionsDataCollector {
    pub fn new(client: Arc<AlpacaClient>) -> Self {
        Self { client }
    }

    /// Snapshot of every contract listed for an underlying
    pub async fn get_option_chain(
        &self,
        underlying: &str,
        query: &ChainQuery,
    ) -> AlpacaResult<OptionChain> {
        let underlying = underlying.to_uppercase();
        let config = self.client.config();
        let mut params = query.to_params();
        params.push(("feed".to_string(), config.option_feed.clone()));
        params.push(("limit".to_string(), config.page_limit.to_string()));

        let path = format!("/v1beta1/options/snapshots/{}", underlying);
        let response: OptionSnapshotsResponse = self
            .client
            .get_paginated(Api::Data, &path, &params)
            .await?;

        let mut chain = OptionChain::new(underlying.as_str(), response.into_snapshots());
        chain.sort();

        tracing::info!(
            "Fetched option chain for {}: {} contracts across {} expirations",
            underlying,
            chain.len(),
            chain.expirations().len()
        );

        Ok(chain)
    }

    /// Snapshots for specific contracts
    pub async fn get_option_snapshot(&self, symbols: &[String]) -> AlpacaResult<Vec<OptionSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let params = query_params([
            ("symbols", Some(symbols.join(","))),
            ("feed", Some(self.client.config().option_feed.clone())),
        ]);

        let response: OptionSnapshotsResponse = self
            .client
            .get_paginated(Api::Data, "/v1beta1/options/snapshots", &params)
            .await?;

        Ok(response.into_snapshots())
    }

    /// Historical bars for one contract in `[start, end]`
    pub async fn get_option_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> AlpacaResult<Vec<Bar>> {
        let symbol = symbol.to_uppercase();
        let params = query_params([
            ("symbols", Some(symbol.clone())),
            ("timeframe", Some(timeframe.as_api_str())),
            ("start", Some(start.to_rfc3339())),
            ("end", end.map(|e| e.to_rfc3339())),
            ("limit", Some(self.client.config().page_limit.to_string())),
        ]);

        let response: BarsResponse = self
            .client
            .get_paginated(Api::Data, "/v1beta1/options/bars", &params)
            .await?;

        let mut bars = response.into_bars();
        Ok(bars.remove(&symbol).unwrap_or_default())
    }

    /// Historical bars for one contract over the last `days_back` days
    pub async fn get_historical_option_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        days_back: u32,
    ) -> AlpacaResult<Vec<Bar>> {
        let start = Utc::now() - Duration::days(days_back as i64);
        self.get_option_bars(symbol, timeframe, start, None).await
    }

    /// Active assets with options trading enabled
    pub async fn get_optionable_assets(&self) -> AlpacaResult<Vec<Asset>> {
        let params = query_params([
            ("status", Some("active".to_string())),
            ("attributes", Some("options_enabled".to_string())),
        ]);

        let assets: Vec<WireAsset> = self.client.get(Api::Trading, "/v2/assets", &params).await?;
        let assets: Vec<Asset> = assets.into_iter().map(Asset::from).collect();

        tracing::info!("Found {} optionable assets", assets.len());
        Ok(assets)
    }

    /// Contract definitions matching the query, following all pages
    pub async fn get_option_contracts(&self, query: &ContractQuery) -> AlpacaResult<Vec<OptionContract>> {
        let response: OptionContractsResponse = self
            .client
            .get_paginated(Api::Trading, "/v2/options/contracts", &query.to_params())
            .await?;

        let contracts = response.into_contracts();
        tracing::info!(
            "Fetched {} option contracts for {:?}",
            contracts.len(),
            query.underlying_symbols
        );

        Ok(contracts)
    }

    /// Active American puts expiring within `days_forward` days of today (New York)
    ///
    /// # Arguments
    /// * `underlyings` - Underlying tickers (e.g., ["SPY"])
    /// * `days_forward` - Inclusive expiration window in days from today, e.g. (1, 60)
    /// * `limit` - Page size
    pub async fn get_put_options(
        &self,
        underlyings: &[String],
        days_forward: (u32, u32),
        limit: u32,
    ) -> AlpacaResult<Vec<OptionContract>> {
        let query = put_options_query(underlyings, days_forward, limit, exchange_today());
        self.get_option_contracts(&query).await
    }
}

fn put_options_query(
    underlyings: &[String],
    days_forward: (u32, u32),
    limit: u32,
    today: NaiveDate,
) -> ContractQuery {
    ContractQuery {
        underlying_symbols: underlyings.to_vec(),
        status: Some(ContractStatus::Active),
        expiration_date_gte: Some(today + Duration::days(days_forward.0 as i64)),
        expiration_date_lte: Some(today + Duration::days(days_forward.1 as i64)),
        option_type: Some(OptionType::Put),
        style: Some(ExerciseStyle::American),
        limit: Some(limit),
        ..Default::default()
    }
}
