use crate::types::{MarketMovers, MostActive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a watchlist symbol came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistSource {
    MostActive,
    Gainer,
    Loser,
    Manual,
}

/// Screener metadata kept for a watched symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub volume: Option<f64>,
    pub trade_count: Option<u64>,
    pub percent_change: Option<f64>,
    pub source: WatchlistSource,
}

impl WatchlistEntry {
    pub fn manual() -> Self {
        Self {
            volume: None,
            trade_count: None,
            percent_change: None,
            source: WatchlistSource::Manual,
        }
    }

    /// Fill metrics this entry is missing from another entry for the same symbol
    fn merge_from(&mut self, other: WatchlistEntry) {
        self.volume = self.volume.or(other.volume);
        self.trade_count = self.trade_count.or(other.trade_count);
        self.percent_change = self.percent_change.or(other.percent_change);
    }
}

/// Symbols to collect, keyed by upper-cased ticker.
///
/// Accepts both screener output (symbol with volume / trade-count metadata)
/// and plain symbol lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    entries: BTreeMap<String, WatchlistEntry>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a plain list of tickers
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut watchlist = Self::new();
        for symbol in symbols {
            watchlist.insert(symbol.as_ref(), WatchlistEntry::manual());
        }
        watchlist
    }

    /// Build from most-actives screener rows
    pub fn from_most_actives(rows: &[MostActive]) -> Self {
        let mut watchlist = Self::new();
        watchlist.add_most_actives(rows);
        watchlist
    }

    /// Insert or merge an entry. The first source recorded for a symbol is kept.
    ///
    /// Blank symbols are ignored; returns whether the symbol was new.
    pub fn insert(&mut self, symbol: &str, entry: WatchlistEntry) -> bool {
        let key = symbol.trim().to_uppercase();
        if key.is_empty() {
            return false;
        }

        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.merge_from(entry);
                false
            }
            None => {
                self.entries.insert(key, entry);
                true
            }
        }
    }

    pub fn add_most_actives(&mut self, rows: &[MostActive]) {
        for row in rows {
            self.insert(
                &row.symbol,
                WatchlistEntry {
                    volume: Some(row.volume),
                    trade_count: Some(row.trade_count),
                    percent_change: None,
                    source: WatchlistSource::MostActive,
                },
            );
        }
    }

    pub fn add_movers(&mut self, movers: &MarketMovers) {
        let tagged = movers
            .gainers
            .iter()
            .map(|m| (m, WatchlistSource::Gainer))
            .chain(movers.losers.iter().map(|m| (m, WatchlistSource::Loser)));

        for (mover, source) in tagged {
            self.insert(
                &mover.symbol,
                WatchlistEntry {
                    volume: None,
                    trade_count: None,
                    percent_change: Some(mover.percent_change),
                    source,
                },
            );
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&WatchlistEntry> {
        self.entries.get(&symbol.trim().to_uppercase())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    pub fn remove(&mut self, symbol: &str) -> Option<WatchlistEntry> {
        self.entries.remove(&symbol.trim().to_uppercase())
    }

    /// Symbols in alphabetical order
    pub fn symbols(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Symbols ordered by volume descending; symbols without volume go last
    pub fn ranked_by_volume(&self) -> Vec<String> {
        let mut ranked: Vec<(&String, &WatchlistEntry)> = self.entries.iter().collect();
        ranked.sort_by(|(sa, a), (sb, b)| match (a.volume, b.volume) {
            (Some(va), Some(vb)) => vb
                .partial_cmp(&va)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| sa.cmp(sb)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => sa.cmp(sb),
        });
        ranked.into_iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WatchlistEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
