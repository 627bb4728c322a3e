use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use market_core::{AlignedChain, BarSeries, OptionChain, TimeFrame, Watchlist};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::processing::{align_data, AlignmentConfig, ChainFilter, DataProcessor};
use crate::provider::MarketDataProvider;

/// Settings for a watchlist collection run
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Number of most-active stocks (and of gainers/losers) to screen
    pub top: u32,
    /// Also add the session's top gainers and losers
    pub include_movers: bool,
    pub timeframe: TimeFrame,
    /// History of underlying bars to load
    pub days_back: u32,
    pub chain_filter: ChainFilter,
    /// Symbols processed at the same time
    pub max_concurrency: usize,
    /// Fixed evaluation instant (replays); `None` uses the wall clock at the start of a run
    pub as_of: Option<DateTime<Utc>>,
    /// Strike band centers by symbol, taking precedence over `chain_filter.reference_price`
    pub strike_centers: BTreeMap<String, f64>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            top: 10,
            include_movers: false,
            timeframe: TimeFrame::day(),
            days_back: 30,
            chain_filter: ChainFilter::default(),
            max_concurrency: 4,
            as_of: None,
            strike_centers: BTreeMap::new(),
        }
    }
}

/// Everything collected for one underlying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedData {
    pub symbol: String,
    pub bars: BarSeries,
    pub chain: OptionChain,
    /// Strike band center the chain was filtered with
    #[serde(default)]
    pub strike_center: Option<f64>,
    pub aligned: AlignedChain,
}

/// Result of a watchlist run. Symbols that failed are listed in `failures`
/// with the error message and have no entry in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub collected_at: DateTime<Utc>,
    pub timeframe: TimeFrame,
    pub watchlist: Watchlist,
    /// Sorted by symbol
    pub data: Vec<CollectedData>,
    pub failures: BTreeMap<String, String>,
}

impl CollectionReport {
    pub fn get(&self, symbol: &str) -> Option<&CollectedData> {
        self.data.iter().find(|d| d.symbol == symbol)
    }

    pub fn aligned_rows(&self) -> usize {
        self.data.iter().map(|d| d.aligned.rows.len()).sum()
    }

    /// Strike band centers used per symbol, for re-running the same filter
    pub fn strike_centers(&self) -> BTreeMap<String, f64> {
        self.data
            .iter()
            .filter_map(|d| d.strike_center.map(|c| (d.symbol.clone(), c)))
            .collect()
    }

    /// Load a report written by [`CollectionReport::write_json`]
    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse report {}", path.display()))
    }

    /// Write the report as pretty JSON
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!("Wrote collection report to {}", path.display());
        Ok(())
    }
}

/// Screens a watchlist and collects aligned underlying/option data for it
pub struct MarketDataCollector {
    provider: Arc<dyn MarketDataProvider>,
    processor: DataProcessor,
    config: CollectorConfig,
    watchlist: Watchlist,
}

impl MarketDataCollector {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: CollectorConfig) -> Self {
        Self {
            processor: DataProcessor::new(provider.clone()).with_as_of(config.as_of),
            provider,
            config,
            watchlist: Watchlist::new(),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    /// Replace the watchlist with a manual list of symbols
    pub fn set_watchlist<I, S>(&mut self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.watchlist = Watchlist::from_symbols(symbols);
        tracing::info!("Watchlist set to {} symbols", self.watchlist.len());
    }

    /// Rebuild the watchlist from the most-actives screener (and movers when enabled)
    pub async fn populate_watchlist(&mut self) -> Result<&Watchlist> {
        let top = self.config.top;

        let actives = self
            .provider
            .most_actives(top)
            .await
            .context("Failed to populate watchlist")?;
        let mut watchlist = Watchlist::from_most_actives(&actives);

        if self.config.include_movers {
            let movers = self
                .provider
                .market_movers(top)
                .await
                .context("Failed to populate watchlist")?;
            watchlist.add_movers(&movers);
        }

        tracing::info!(
            "Populated watchlist with {} symbols ({} most active, movers={})",
            watchlist.len(),
            actives.len(),
            self.config.include_movers
        );

        self.watchlist = watchlist;
        Ok(&self.watchlist)
    }

    /// Bars, filtered chain and their alignment for one symbol
    pub async fn collect_symbol(&self, symbol: &str) -> Result<CollectedData> {
        self.collect_symbol_with(&self.processor, symbol).await
    }

    async fn collect_symbol_with(
        &self,
        processor: &DataProcessor,
        symbol: &str,
    ) -> Result<CollectedData> {
        let symbol = symbol.to_uppercase();
        let timeframe = self.config.timeframe;

        let mut filter = self.config.chain_filter.clone();
        if let Some(center) = self.config.strike_centers.get(&symbol) {
            filter.reference_price = Some(*center);
        }

        let bars = processor
            .process_underlying_asset_data(&symbol, self.config.days_back, timeframe)
            .await?;
        let filtered = processor
            .process_option_chain_data(&symbol, &filter)
            .await?;

        let aligned = align_data(
            &bars,
            &filtered.chain,
            &AlignmentConfig::for_timeframe(timeframe),
        );

        tracing::info!(
            "Collected {}: {} bars, {} contracts, {} aligned ({:.0}% match)",
            symbol,
            bars.len(),
            filtered.chain.len(),
            aligned.rows.len(),
            aligned.stats.match_rate() * 100.0
        );

        Ok(CollectedData {
            symbol,
            bars,
            chain: filtered.chain,
            strike_center: filtered.strike_center,
            aligned,
        })
    }

    /// Collect every watchlist symbol, screening first if the watchlist is empty.
    ///
    /// Every symbol is evaluated at the same instant, which becomes the
    /// report's `collected_at`. A failing symbol is recorded in the report
    /// and does not stop the run.
    pub async fn collect_data_for_watchlist(&mut self) -> Result<CollectionReport> {
        if self.watchlist.is_empty() {
            self.populate_watchlist().await?;
        }

        let collected_at = self.config.as_of.unwrap_or_else(Utc::now);
        let processor = DataProcessor::new(self.provider.clone()).with_as_of(Some(collected_at));

        let started = Instant::now();
        let symbols = self.watchlist.ranked_by_volume();
        let concurrency = self.config.max_concurrency.max(1);

        tracing::info!(
            "Collecting data for {} symbols as of {} (concurrency {})",
            symbols.len(),
            collected_at.to_rfc3339(),
            concurrency
        );

        let this = &*self;
        let processor = &processor;
        let results: Vec<(String, Result<CollectedData>)> = stream::iter(symbols)
            .map(|symbol| async move {
                let result = this.collect_symbol_with(processor, &symbol).await;
                (symbol, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut data = Vec::with_capacity(results.len());
        let mut failures = BTreeMap::new();

        for (symbol, result) in results {
            match result {
                Ok(collected) => data.push(collected),
                Err(e) => {
                    tracing::error!("Failed to collect {}: {:#}", symbol, e);
                    failures.insert(symbol, format!("{:#}", e));
                }
            }
        }
        data.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        tracing::info!(
            "Collection complete in {:.1}s: {} succeeded, {} failed",
            started.elapsed().as_secs_f64(),
            data.len(),
            failures.len()
        );

        Ok(CollectionReport {
            collected_at,
            timeframe: self.config.timeframe,
            watchlist: self.watchlist.clone(),
            data,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::ChainQuery;
    use crate::provider::StaticProvider;
    use async_trait::async_trait;
    use market_core::{Bar, MarketMovers, MostActive, Mover, WatchlistSource};

    /// Delegates to a static provider but fails chain lookups for one symbol
    struct FailingChainProvider {
        inner: StaticProvider,
        failing: &'static str,
    }

    #[async_trait]
    impl MarketDataProvider for FailingChainProvider {
        async fn most_actives(&self, top: u32) -> Result<Vec<MostActive>> {
            self.inner.most_actives(top).await
        }

        async fn market_movers(&self, top: u32) -> Result<MarketMovers> {
            self.inner.market_movers(top).await
        }

        async fn stock_bars(
            &self,
            symbol: &str,
            timeframe: TimeFrame,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Bar>> {
            self.inner.stock_bars(symbol, timeframe, start, end).await
        }

        async fn option_chain(&self, underlying: &str, query: &ChainQuery) -> Result<OptionChain> {
            if underlying == self.failing {
                anyhow::bail!("chain endpoint unavailable");
            }
            self.inner.option_chain(underlying, query).await
        }

        async fn option_bars(
            &self,
            symbol: &str,
            timeframe: TimeFrame,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Bar>> {
            self.inner.option_bars(symbol, timeframe, start, end).await
        }
    }

    fn active(symbol: &str, volume: f64) -> MostActive {
        MostActive {
            symbol: symbol.to_string(),
            volume,
            trade_count: 100,
        }
    }

    fn mover(symbol: &str, pct: f64) -> Mover {
        Mover {
            symbol: symbol.to_string(),
            percent_change: pct,
            change: pct,
            price: 10.0,
        }
    }

    #[tokio::test]
    async fn test_populate_watchlist_with_movers() {
        let provider = StaticProvider::new()
            .with_most_actives(vec![active("AAPL", 3.0), active("TSLA", 2.0), active("F", 1.0)])
            .with_movers(MarketMovers {
                gainers: vec![mover("GME", 40.0), mover("TSLA", 5.0)],
                losers: vec![mover("BYND", -20.0)],
            });

        let config = CollectorConfig {
            top: 2,
            include_movers: true,
            ..Default::default()
        };
        let mut collector = MarketDataCollector::new(Arc::new(provider), config);
        let watchlist = collector.populate_watchlist().await.unwrap();

        assert_eq!(watchlist.symbols(), vec!["AAPL", "BYND", "GME", "TSLA"]);
        assert_eq!(
            watchlist.get("TSLA").map(|e| e.source),
            Some(WatchlistSource::MostActive)
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_run() {
        let provider = FailingChainProvider {
            inner: StaticProvider::new(),
            failing: "MSFT",
        };

        let mut collector = MarketDataCollector::new(Arc::new(provider), CollectorConfig::default());
        collector.set_watchlist(["aapl", "MSFT"]);

        let report = collector.collect_data_for_watchlist().await.unwrap();
        assert_eq!(report.data.len(), 1);
        assert_eq!(report.data[0].symbol, "AAPL");
        assert!(report.data[0].aligned.rows.is_empty());
        assert!(report.failures["MSFT"].contains("chain endpoint unavailable"));
        assert!(report.get("MSFT").is_none());
    }

    #[tokio::test]
    async fn test_empty_watchlist_is_screened_first() {
        let provider = StaticProvider::new().with_most_actives(vec![active("SPY", 1.0)]);
        let mut collector = MarketDataCollector::new(Arc::new(provider), CollectorConfig::default());

        let report = collector.collect_data_for_watchlist().await.unwrap();
        assert_eq!(report.watchlist.symbols(), vec!["SPY"]);
        assert_eq!(report.data.len(), 1);
        assert!(report.failures.is_empty());
    }

    /// Records the window end of every bar request; chain lookups are slow
    #[derive(Default)]
    struct SlowChainProvider {
        inner: StaticProvider,
        bar_ends: std::sync::Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl MarketDataProvider for SlowChainProvider {
        async fn most_actives(&self, top: u32) -> Result<Vec<MostActive>> {
            self.inner.most_actives(top).await
        }

        async fn market_movers(&self, top: u32) -> Result<MarketMovers> {
            self.inner.market_movers(top).await
        }

        async fn stock_bars(
            &self,
            symbol: &str,
            timeframe: TimeFrame,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Bar>> {
            self.bar_ends.lock().unwrap().push(end);
            self.inner.stock_bars(symbol, timeframe, start, end).await
        }

        async fn option_chain(&self, underlying: &str, query: &ChainQuery) -> Result<OptionChain> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.option_chain(underlying, query).await
        }

        async fn option_bars(
            &self,
            symbol: &str,
            timeframe: TimeFrame,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Bar>> {
            self.inner.option_bars(symbol, timeframe, start, end).await
        }
    }

    #[tokio::test]
    async fn test_run_uses_one_instant_for_every_symbol() {
        let provider = Arc::new(SlowChainProvider::default());
        let config = CollectorConfig {
            max_concurrency: 1,
            ..Default::default()
        };
        let mut collector = MarketDataCollector::new(provider.clone(), config);
        collector.set_watchlist(["AAPL", "MSFT", "TSLA"]);

        let report = collector.collect_data_for_watchlist().await.unwrap();

        let ends = provider.bar_ends.lock().unwrap().clone();
        assert_eq!(ends.len(), 3);
        assert!(ends.iter().all(|end| *end == report.collected_at));
    }

    #[tokio::test]
    async fn test_strike_centers_are_recorded_and_override_filter() {
        use chrono::TimeZone;
        use market_core::{OptionSnapshot, OptionSymbol};

        let as_of = Utc.with_ymd_and_hms(2024, 1, 10, 21, 0, 0).unwrap();
        let chain = OptionChain::new(
            "AAPL",
            ["AAPL240119C00090000", "AAPL240119C00100000", "AAPL240119C00140000"]
                .iter()
                .map(|s| OptionSnapshot::new(OptionSymbol::parse(s).unwrap()))
                .collect(),
        );
        let provider = Arc::new(StaticProvider::new().with_chain(chain));

        let config = CollectorConfig {
            as_of: Some(as_of),
            ..Default::default()
        };
        let mut collector = MarketDataCollector::new(provider.clone(), config.clone());
        collector.set_watchlist(["AAPL"]);
        let report = collector.collect_data_for_watchlist().await.unwrap();

        // Average strike 110 keeps [82.5, 137.5]
        assert_eq!(report.data[0].strike_center, Some(110.0));
        assert_eq!(report.data[0].chain.len(), 2);
        assert_eq!(report.strike_centers().get("AAPL"), Some(&110.0));

        let pinned = CollectorConfig {
            strike_centers: BTreeMap::from([("AAPL".to_string(), 140.0)]),
            ..config
        };
        let collector = MarketDataCollector::new(provider, pinned);
        let data = collector.collect_symbol("aapl").await.unwrap();
        assert_eq!(data.strike_center, Some(140.0));
        let strikes: Vec<f64> = data.chain.snapshots.iter().map(|s| s.symbol.strike).collect();
        assert_eq!(strikes, vec![140.0]);
    }
}
