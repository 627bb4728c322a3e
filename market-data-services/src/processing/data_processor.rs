use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use market_core::{AlignedBars, BarSeries, OptionChain, OptionSymbol, OptionType, TimeFrame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::alignment::align_bar_series;
use crate::alpaca::{exchange_date, ChainQuery};
use crate::provider::MarketDataProvider;

/// Which contracts of a chain to keep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainFilter {
    /// Earliest expiration, in days from today (New York)
    pub min_days_to_expiry: u32,
    /// Latest expiration, in days from today (New York)
    pub max_days_to_expiry: u32,
    /// Half-width of the strike band as a fraction of its center; `None` keeps all strikes
    pub strike_band_pct: Option<f64>,
    pub option_type: Option<OptionType>,
    /// Band center. Defaults to the average strike of the expiration-filtered chain.
    pub reference_price: Option<f64>,
}

impl Default for ChainFilter {
    fn default() -> Self {
        Self {
            min_days_to_expiry: 0,
            max_days_to_expiry: 60,
            strike_band_pct: Some(0.25),
            option_type: None,
            reference_price: None,
        }
    }
}

impl ChainFilter {
    /// Expiration window as dates
    pub fn expiration_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            today + Duration::days(self.min_days_to_expiry as i64),
            today + Duration::days(self.max_days_to_expiry as i64),
        )
    }

    /// Server-side part of the filter (expiration window and type)
    pub fn to_query(&self, today: NaiveDate) -> ChainQuery {
        let (from, to) = self.expiration_window(today);
        ChainQuery {
            option_type: self.option_type,
            expiration_date_gte: Some(from),
            expiration_date_lte: Some(to),
            ..Default::default()
        }
    }
}

/// Contracts kept by a [`ChainFilter`] and the strike band center it applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredChain {
    pub chain: OptionChain,
    /// `None` when no strike band was applied
    pub strike_center: Option<f64>,
}

/// Apply `filter` to a chain as of `today`. Never fails; the chain is sorted.
pub fn filter_chain(chain: OptionChain, filter: &ChainFilter, today: NaiveDate) -> FilteredChain {
    let (from, to) = filter.expiration_window(today);
    let total = chain.len();

    let in_window: Vec<_> = chain
        .snapshots
        .into_iter()
        .filter(|s| s.symbol.expiration >= from && s.symbol.expiration <= to)
        .filter(|s| filter.option_type.map_or(true, |t| s.symbol.option_type == t))
        .collect();

    let mut filtered = OptionChain::new(chain.underlying, in_window);

    let mut strike_center = None;
    if let Some(pct) = filter.strike_band_pct {
        strike_center = filter.reference_price.or_else(|| filtered.average_strike());
        if let Some(center) = strike_center {
            let half_width = pct * center;
            filtered
                .snapshots
                .retain(|s| (s.symbol.strike - center).abs() <= half_width);
        }
    }

    filtered.sort();

    tracing::debug!(
        "Filtered chain for {}: kept {}/{} contracts (expiring {}..={}, strike center {:?})",
        filtered.underlying,
        filtered.len(),
        total,
        from,
        to,
        strike_center
    );

    FilteredChain {
        chain: filtered,
        strike_center,
    }
}

/// Fetches and normalizes the inputs of the alignment step
pub struct DataProcessor {
    provider: Arc<dyn MarketDataProvider>,
    /// Evaluation instant; `None` means the wall clock
    as_of: Option<DateTime<Utc>>,
}

impl DataProcessor {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            as_of: None,
        }
    }

    /// Evaluate lookback windows and expiration windows at a fixed instant
    pub fn with_as_of(mut self, as_of: Option<DateTime<Utc>>) -> Self {
        self.as_of = as_of;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Underlying bars over the last `days_back` days, sorted and de-duplicated
    pub async fn process_underlying_asset_data(
        &self,
        symbol: &str,
        days_back: u32,
        timeframe: TimeFrame,
    ) -> Result<BarSeries> {
        let symbol = symbol.to_uppercase();
        let symbol = symbol.as_str();
        let end = self.now();
        let start = end - Duration::days(days_back as i64);

        let raw = self
            .provider
            .stock_bars(symbol, timeframe, start, end)
            .await
            .with_context(|| format!("Failed to load underlying data for {}", symbol))?;

        let (series, dropped) = BarSeries::from_raw(symbol, timeframe, raw);

        if series.is_empty() {
            tracing::warn!(
                "No {} bars for {} in the last {} days",
                timeframe,
                symbol,
                days_back
            );
        } else {
            tracing::info!(
                "Processed {} {} bars for {} ({} dropped)",
                series.len(),
                timeframe,
                symbol,
                dropped
            );
        }

        Ok(series)
    }

    /// Option chain for `symbol` restricted by `filter`
    pub async fn process_option_chain_data(
        &self,
        symbol: &str,
        filter: &ChainFilter,
    ) -> Result<FilteredChain> {
        let symbol = symbol.to_uppercase();
        let symbol = symbol.as_str();
        let today = exchange_date(self.now());

        let chain = self
            .provider
            .option_chain(symbol, &filter.to_query(today))
            .await
            .with_context(|| format!("Failed to load option chain for {}", symbol))?;

        let filtered = filter_chain(chain, filter, today);
        tracing::info!(
            "Processed option chain for {}: {} contracts",
            symbol,
            filtered.chain.len()
        );

        Ok(filtered)
    }

    /// Historical bars of one contract on the same timeline as its underlying
    pub async fn process_option_bars(
        &self,
        option_symbol: &str,
        timeframe: TimeFrame,
        days_back: u32,
    ) -> Result<AlignedBars> {
        let contract = OptionSymbol::parse(option_symbol)
            .with_context(|| format!("Invalid option symbol {}", option_symbol))?;
        let occ = contract.to_occ();

        let end = self.now();
        let start = end - Duration::days(days_back as i64);

        let underlying = self
            .process_underlying_asset_data(&contract.root, days_back, timeframe)
            .await?;

        let raw = self
            .provider
            .option_bars(&occ, timeframe, start, end)
            .await
            .with_context(|| format!("Failed to load option bars for {}", occ))?;
        let (option, _) = BarSeries::from_raw(occ, timeframe, raw);

        let aligned = align_bar_series(&underlying, &option);
        tracing::info!(
            "Aligned {} bars of {} with {}: {} rows, {} complete",
            option.len(),
            option.symbol,
            underlying.symbol,
            aligned.rows.len(),
            aligned.complete_rows().count()
        );

        Ok(aligned)
    }
}
