use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{Bar, MarketMovers, MostActive, OptionChain, TimeFrame};
use std::collections::HashMap;
use std::sync::Arc;

use crate::alpaca::{
    ActiveBy, AlpacaClient, AlpacaConfig, ChainQuery, OptionsDataCollector, ScreenerClient,
    StockDataCollector,
};
use crate::collector::CollectionReport;

/// Source of screener, bar and chain data for the processing pipeline
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Most active stocks by volume
    async fn most_actives(&self, top: u32) -> Result<Vec<MostActive>>;

    async fn market_movers(&self, top: u32) -> Result<MarketMovers>;

    /// Bars for one stock in `[start, end]`
    async fn stock_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;

    async fn option_chain(&self, underlying: &str, query: &ChainQuery) -> Result<OptionChain>;

    /// Bars for one option contract in `[start, end]`
    async fn option_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;
}

/// Live provider backed by the Alpaca REST API
pub struct AlpacaProvider {
    stocks: StockDataCollector,
    options: OptionsDataCollector,
    screener: ScreenerClient,
}

impl AlpacaProvider {
    pub fn new(config: AlpacaConfig) -> Result<Self> {
        let client = AlpacaClient::new(config).context("Failed to create Alpaca client")?;
        Ok(Self::from_client(Arc::new(client)))
    }

    /// Share one client (and its rate limit budget) across all collectors
    pub fn from_client(client: Arc<AlpacaClient>) -> Self {
        Self {
            stocks: StockDataCollector::new(client.clone()),
            options: OptionsDataCollector::new(client.clone()),
            screener: ScreenerClient::new(client),
        }
    }

    pub fn stocks(&self) -> &StockDataCollector {
        &self.stocks
    }

    pub fn options(&self) -> &OptionsDataCollector {
        &self.options
    }
}

#[async_trait]
impl MarketDataProvider for AlpacaProvider {
    async fn most_actives(&self, top: u32) -> Result<Vec<MostActive>> {
        self.screener
            .get_most_actives(ActiveBy::Volume, top)
            .await
            .context("Failed to fetch most active stocks")
    }

    async fn market_movers(&self, top: u32) -> Result<MarketMovers> {
        self.screener
            .get_market_movers(top)
            .await
            .context("Failed to fetch market movers")
    }

    async fn stock_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let symbol = symbol.to_uppercase();
        let mut bars = self
            .stocks
            .get_historical_bars(&[symbol.clone()], timeframe, start, Some(end), None)
            .await
            .with_context(|| format!("Failed to fetch {} bars for {}", timeframe, symbol))?;

        Ok(bars.remove(&symbol).unwrap_or_default())
    }

    async fn option_chain(&self, underlying: &str, query: &ChainQuery) -> Result<OptionChain> {
        self.options
            .get_option_chain(underlying, query)
            .await
            .with_context(|| format!("Failed to fetch option chain for {}", underlying))
    }

    async fn option_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        self.options
            .get_option_bars(symbol, timeframe, start, Some(end))
            .await
            .with_context(|| format!("Failed to fetch {} bars for {}", timeframe, symbol))
    }
}

/// In-memory provider for tests and for replaying a saved collection run.
///
/// Bar lookups are filtered to the requested window and chain lookups apply
/// the same filters the live endpoint applies server-side. Unknown symbols
/// yield empty results rather than errors, matching the live API.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    most_actives: Vec<MostActive>,
    movers: MarketMovers,
    stock_bars: HashMap<String, Vec<Bar>>,
    chains: HashMap<String, OptionChain>,
    option_bars: HashMap<String, Vec<Bar>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_most_actives(mut self, rows: Vec<MostActive>) -> Self {
        self.most_actives = rows;
        self
    }

    pub fn with_movers(mut self, movers: MarketMovers) -> Self {
        self.movers = movers;
        self
    }

    pub fn with_stock_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.stock_bars.insert(symbol.to_uppercase(), bars);
        self
    }

    pub fn with_chain(mut self, chain: OptionChain) -> Self {
        self.chains.insert(chain.underlying.to_uppercase(), chain);
        self
    }

    pub fn with_option_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.option_bars.insert(symbol.to_string(), bars);
        self
    }

    /// Rebuild the inputs of a previous run from its report.
    ///
    /// Watchlist entries become most-actives rows so that screening a
    /// replayed run yields the same symbols.
    pub fn from_report(report: &CollectionReport) -> Self {
        let most_actives = report
            .watchlist
            .iter()
            .map(|(symbol, entry)| MostActive {
                symbol: symbol.clone(),
                volume: entry.volume.unwrap_or_default(),
                trade_count: entry.trade_count.unwrap_or_default(),
            })
            .collect();

        let mut provider = Self::new().with_most_actives(most_actives);
        for data in &report.data {
            provider = provider
                .with_stock_bars(&data.symbol, data.bars.bars.clone())
                .with_chain(data.chain.clone());
        }
        provider
    }
}

fn bars_in_window(bars: Option<&Vec<Bar>>, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Bar> {
    bars.map(|bars| {
        bars.iter()
            .filter(|b| b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect()
    })
    .unwrap_or_default()
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn most_actives(&self, top: u32) -> Result<Vec<MostActive>> {
        let mut rows = self.most_actives.clone();
        rows.sort_by(|a, b| {
            b.volume
                .partial_cmp(&a.volume)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(top as usize);
        Ok(rows)
    }

    async fn market_movers(&self, top: u32) -> Result<MarketMovers> {
        let mut movers = self.movers.clone();
        movers.gainers.truncate(top as usize);
        movers.losers.truncate(top as usize);
        Ok(movers)
    }

    async fn stock_bars(
        &self,
        symbol: &str,
        _timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        Ok(bars_in_window(
            self.stock_bars.get(&symbol.to_uppercase()),
            start,
            end,
        ))
    }

    async fn option_chain(&self, underlying: &str, query: &ChainQuery) -> Result<OptionChain> {
        let Some(chain) = self.chains.get(&underlying.to_uppercase()) else {
            return Ok(OptionChain::new(underlying, Vec::new()));
        };

        let snapshots = chain
            .snapshots
            .iter()
            .filter(|s| {
                let sym = &s.symbol;
                query.option_type.map_or(true, |t| sym.option_type == t)
                    && query.strike_price_gte.map_or(true, |k| sym.strike >= k)
                    && query.strike_price_lte.map_or(true, |k| sym.strike <= k)
                    && query.expiration_date_gte.map_or(true, |d| sym.expiration >= d)
                    && query.expiration_date_lte.map_or(true, |d| sym.expiration <= d)
            })
            .cloned()
            .collect();

        let mut chain = OptionChain::new(chain.underlying.clone(), snapshots);
        chain.sort();
        Ok(chain)
    }

    async fn option_bars(
        &self,
        symbol: &str,
        _timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        Ok(bars_in_window(self.option_bars.get(symbol), start, end))
    }
}
