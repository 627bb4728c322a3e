//! JSON shapes returned by the Alpaca REST endpoints and their conversion
//! into `market-core` records.

use chrono::{DateTime, NaiveDate, Utc};
use market_core::{
    Asset, Bar, ContractStatus, ExerciseStyle, Greeks, MarketMovers, MostActive, Mover,
    OptionContract, OptionQuote, OptionSnapshot, OptionSymbol, OptionTrade, OptionType,
    StockQuote, StockTrade,
};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use super::client::Paginated;

/// Treat JSON `null` as the type's default (Alpaca sends `"bars": null` for empty results)
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn merge_symbol_maps<T>(into: &mut HashMap<String, Vec<T>>, from: HashMap<String, Vec<T>>) {
    for (symbol, records) in from {
        into.entry(symbol).or_default().extend(records);
    }
}

// ═══════════════════════════════════════════════════
// BARS
// ═══════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct WireBar {
    pub t: DateTime<Utc>,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    pub n: Option<u64>,
    pub vw: Option<f64>,
}

impl From<WireBar> for Bar {
    fn from(w: WireBar) -> Self {
        Bar {
            timestamp: w.t,
            open: w.o,
            high: w.h,
            low: w.l,
            close: w.c,
            volume: w.v,
            trade_count: w.n,
            vwap: w.vw,
        }
    }
}

/// `/v2/stocks/bars` and `/v1beta1/options/bars`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BarsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub bars: HashMap<String, Vec<WireBar>>,
    pub next_page_token: Option<String>,
}

impl Paginated for BarsResponse {
    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    fn merge_page(&mut self, next: Self) {
        merge_symbol_maps(&mut self.bars, next.bars);
        self.next_page_token = next.next_page_token;
    }
}

impl BarsResponse {
    pub fn into_bars(self) -> HashMap<String, Vec<Bar>> {
        self.bars
            .into_iter()
            .map(|(symbol, bars)| (symbol, bars.into_iter().map(Bar::from).collect()))
            .collect()
    }
}

// ═══════════════════════════════════════════════════
// STOCK TRADES / QUOTES
// ═══════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct WireStockTrade {
    pub t: DateTime<Utc>,
    pub p: f64,
    pub s: f64,
    pub x: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub c: Vec<String>,
    pub i: Option<u64>,
    pub z: Option<String>,
}

impl From<WireStockTrade> for StockTrade {
    fn from(w: WireStockTrade) -> Self {
        StockTrade {
            timestamp: w.t,
            price: w.p,
            size: w.s,
            exchange: w.x,
            conditions: w.c,
            id: w.i,
            tape: w.z,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireStockQuote {
    pub t: DateTime<Utc>,
    pub bp: f64,
    pub bs: f64,
    pub ap: f64,
    #[serde(rename = "as")]
    pub ask_size: f64,
    pub bx: Option<String>,
    pub ax: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub c: Vec<String>,
    pub z: Option<String>,
}

impl From<WireStockQuote> for StockQuote {
    fn from(w: WireStockQuote) -> Self {
        StockQuote {
            timestamp: w.t,
            bid_price: w.bp,
            bid_size: w.bs,
            ask_price: w.ap,
            ask_size: w.ask_size,
            bid_exchange: w.bx,
            ask_exchange: w.ax,
            conditions: w.c,
            tape: w.z,
        }
    }
}

/// `/v2/stocks/trades`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub trades: HashMap<String, Vec<WireStockTrade>>,
    pub next_page_token: Option<String>,
}

impl Paginated for TradesResponse {
    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    fn merge_page(&mut self, next: Self) {
        merge_symbol_maps(&mut self.trades, next.trades);
        self.next_page_token = next.next_page_token;
    }
}

/// `/v2/stocks/quotes`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub quotes: HashMap<String, Vec<WireStockQuote>>,
    pub next_page_token: Option<String>,
}

impl Paginated for QuotesResponse {
    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    fn merge_page(&mut self, next: Self) {
        merge_symbol_maps(&mut self.quotes, next.quotes);
        self.next_page_token = next.next_page_token;
    }
}

/// `/v2/stocks/quotes/latest`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LatestQuotesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub quotes: HashMap<String, WireStockQuote>,
}

// ═══════════════════════════════════════════════════
// SCREENER
// ═══════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct MostActivesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub most_actives: Vec<MostActive>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoversResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub gainers: Vec<Mover>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub losers: Vec<Mover>,
    pub market_type: Option<String>,
    pub last_updated: Option<String>,
}

impl From<MoversResponse> for MarketMovers {
    fn from(w: MoversResponse) -> Self {
        MarketMovers {
            gainers: w.gainers,
            losers: w.losers,
        }
    }
}

// ═══════════════════════════════════════════════════
// OPTION SNAPSHOTS
// ═══════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct WireOptionQuote {
    pub t: DateTime<Utc>,
    pub bp: f64,
    pub bs: f64,
    pub ap: f64,
    #[serde(rename = "as")]
    pub ask_size: f64,
    pub bx: Option<String>,
    pub ax: Option<String>,
    pub c: Option<String>,
}

impl From<WireOptionQuote> for OptionQuote {
    fn from(w: WireOptionQuote) -> Self {
        OptionQuote {
            timestamp: w.t,
            bid_price: w.bp,
            bid_size: w.bs,
            ask_price: w.ap,
            ask_size: w.ask_size,
            bid_exchange: w.bx,
            ask_exchange: w.ax,
            condition: w.c,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireOptionTrade {
    pub t: DateTime<Utc>,
    pub p: f64,
    pub s: f64,
    pub x: Option<String>,
    pub c: Option<String>,
}

impl From<WireOptionTrade> for OptionTrade {
    fn from(w: WireOptionTrade) -> Self {
        OptionTrade {
            timestamp: w.t,
            price: w.p,
            size: w.s,
            exchange: w.x,
            condition: w.c,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireGreeks {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
}

impl From<WireGreeks> for Greeks {
    fn from(w: WireGreeks) -> Self {
        Greeks {
            delta: w.delta,
            gamma: w.gamma,
            theta: w.theta,
            vega: w.vega,
            rho: w.rho,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOptionSnapshot {
    pub latest_quote: Option<WireOptionQuote>,
    pub latest_trade: Option<WireOptionTrade>,
    pub greeks: Option<WireGreeks>,
    pub implied_volatility: Option<f64>,
}

impl WireOptionSnapshot {
    /// Attach the parsed contract symbol
    pub fn into_snapshot(self, symbol: OptionSymbol) -> OptionSnapshot {
        OptionSnapshot {
            symbol,
            latest_quote: self.latest_quote.map(OptionQuote::from),
            latest_trade: self.latest_trade.map(OptionTrade::from),
            greeks: self.greeks.map(Greeks::from),
            implied_volatility: self.implied_volatility,
        }
    }
}

/// `/v1beta1/options/snapshots/{underlying}` and `/v1beta1/options/snapshots`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionSnapshotsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub snapshots: HashMap<String, WireOptionSnapshot>,
    pub next_page_token: Option<String>,
}

impl Paginated for OptionSnapshotsResponse {
    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    fn merge_page(&mut self, next: Self) {
        self.snapshots.extend(next.snapshots);
        self.next_page_token = next.next_page_token;
    }
}

impl OptionSnapshotsResponse {
    /// Convert to snapshots, skipping contracts whose OCC symbol does not parse
    pub fn into_snapshots(self) -> Vec<OptionSnapshot> {
        self.snapshots
            .into_iter()
            .filter_map(|(symbol, wire)| match OptionSymbol::parse(&symbol) {
                Ok(parsed) => Some(wire.into_snapshot(parsed)),
                Err(e) => {
                    tracing::warn!("Skipping option snapshot: {}", e);
                    None
                }
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════
// TRADING API: ASSETS & CONTRACTS
// ═══════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct WireAsset {
    pub id: String,
    pub class: String,
    pub exchange: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub status: String,
    pub tradable: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: Vec<String>,
}

impl From<WireAsset> for Asset {
    fn from(w: WireAsset) -> Self {
        Asset {
            id: w.id,
            class: w.class,
            exchange: w.exchange,
            symbol: w.symbol,
            name: w.name,
            status: w.status,
            tradable: w.tradable,
            attributes: w.attributes,
        }
    }
}

/// Option contract as listed by `/v2/options/contracts`.
///
/// Numeric fields arrive as strings (`"strike_price": "100"`).
#[derive(Debug, Clone, Deserialize)]
pub struct WireOptionContract {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub status: ContractStatus,
    pub tradable: bool,
    pub expiration_date: NaiveDate,
    pub root_symbol: String,
    pub underlying_symbol: String,
    #[serde(rename = "type")]
    pub option_type: OptionType,
    pub style: ExerciseStyle,
    pub strike_price: String,
    pub size: String,
    pub open_interest: Option<String>,
    pub open_interest_date: Option<NaiveDate>,
    pub close_price: Option<String>,
    pub close_price_date: Option<NaiveDate>,
}

impl TryFrom<WireOptionContract> for OptionContract {
    type Error = String;

    fn try_from(w: WireOptionContract) -> Result<Self, Self::Error> {
        let strike_price = w
            .strike_price
            .parse::<f64>()
            .map_err(|_| format!("{}: invalid strike_price '{}'", w.symbol, w.strike_price))?;
        let size = w
            .size
            .parse::<f64>()
            .map_err(|_| format!("{}: invalid size '{}'", w.symbol, w.size))?;

        Ok(OptionContract {
            id: w.id,
            symbol: w.symbol,
            name: w.name,
            status: w.status,
            tradable: w.tradable,
            expiration_date: w.expiration_date,
            root_symbol: w.root_symbol,
            underlying_symbol: w.underlying_symbol,
            option_type: w.option_type,
            style: w.style,
            strike_price,
            size,
            open_interest: w.open_interest.and_then(|v| v.parse().ok()),
            open_interest_date: w.open_interest_date,
            close_price: w.close_price.and_then(|v| v.parse().ok()),
            close_price_date: w.close_price_date,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionContractsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub option_contracts: Vec<WireOptionContract>,
    pub next_page_token: Option<String>,
}

impl Paginated for OptionContractsResponse {
    fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    fn merge_page(&mut self, next: Self) {
        self.option_contracts.extend(next.option_contracts);
        self.next_page_token = next.next_page_token;
    }
}

impl OptionContractsResponse {
    pub fn into_contracts(self) -> Vec<OptionContract> {
        self.option_contracts
            .into_iter()
            .filter_map(|w| match OptionContract::try_from(w) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!("Skipping option contract: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bars_page() {
        let json = r#"{
            "bars": {
                "AAPL": [
                    {"t":"2024-03-01T05:00:00Z","o":179.55,"h":180.53,"l":177.38,"c":179.66,"v":73563082,"n":911722,"vw":179.1}
                ]
            },
            "next_page_token": "QUFQTHxEfDIwMjQ"
        }"#;

        let resp: BarsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.next_page_token(), Some("QUFQTHxEfDIwMjQ"));

        let bars = resp.into_bars();
        let aapl = &bars["AAPL"];
        assert_eq!(aapl.len(), 1);
        assert_eq!(aapl[0].close, 179.66);
        assert_eq!(aapl[0].trade_count, Some(911722));
    }

    #[test]
    fn test_null_bars_decode_as_empty() {
        let resp: BarsResponse =
            serde_json::from_str(r#"{"bars": null, "next_page_token": null}"#).unwrap();
        assert!(resp.bars.is_empty());
        assert!(resp.next_page_token().is_none());
    }

    #[test]
    fn test_merge_pages_appends_per_symbol() {
        let first: BarsResponse = serde_json::from_str(
            r#"{"bars":{"AAPL":[{"t":"2024-03-01T05:00:00Z","o":1,"h":2,"l":0.5,"c":1.5,"v":10}]},"next_page_token":"abc"}"#,
        )
        .unwrap();
        let second: BarsResponse = serde_json::from_str(
            r#"{"bars":{"AAPL":[{"t":"2024-03-02T05:00:00Z","o":1.5,"h":2,"l":1,"c":1.8,"v":12}],"MSFT":[{"t":"2024-03-02T05:00:00Z","o":400,"h":401,"l":399,"c":400.5,"v":5}]},"next_page_token":null}"#,
        )
        .unwrap();

        let mut merged = first;
        merged.merge_page(second);
        assert!(merged.next_page_token().is_none());
        assert_eq!(merged.bars["AAPL"].len(), 2);
        assert_eq!(merged.bars["MSFT"].len(), 1);
    }

    #[test]
    fn test_decode_option_chain_snapshot() {
        let json = r#"{
            "snapshots": {
                "AAPL240119C00100000": {
                    "latestQuote": {"ap":86.1,"as":10,"ax":"C","bp":85.4,"bs":12,"bx":"A","c":"A","t":"2024-01-10T20:59:59.9Z"},
                    "latestTrade": {"c":"I","p":85.6,"s":1,"t":"2024-01-10T19:30:00Z","x":"C"},
                    "greeks": {"delta":0.99,"gamma":0.0001,"rho":0.02,"theta":-0.01,"vega":0.001},
                    "impliedVolatility": 1.21
                },
                "NOT_AN_OCC_SYMBOL": {}
            },
            "next_page_token": null
        }"#;

        let resp: OptionSnapshotsResponse = serde_json::from_str(json).unwrap();
        let snapshots = resp.into_snapshots();
        assert_eq!(snapshots.len(), 1);

        let snap = &snapshots[0];
        assert_eq!(snap.symbol.strike, 100.0);
        assert_eq!(snap.greeks.as_ref().unwrap().delta, Some(0.99));
        assert_eq!(snap.implied_volatility, Some(1.21));
        assert!((snap.mid().unwrap() - 85.75).abs() < 1e-9);
    }

    #[test]
    fn test_decode_option_contract_strings() {
        let json = r#"{
            "option_contracts": [{
                "id": "6e58f870-fe73-4583-81e4-b9a37892c36f",
                "symbol": "SPY240315P00500000",
                "name": "SPY Mar 15 2024 500 Put",
                "status": "active",
                "tradable": true,
                "expiration_date": "2024-03-15",
                "root_symbol": "SPY",
                "underlying_symbol": "SPY",
                "type": "put",
                "style": "american",
                "strike_price": "500",
                "size": "100",
                "open_interest": "1520",
                "open_interest_date": "2024-03-01",
                "close_price": "3.45",
                "close_price_date": "2024-03-01"
            }],
            "next_page_token": null
        }"#;

        let resp: OptionContractsResponse = serde_json::from_str(json).unwrap();
        let contracts = resp.into_contracts();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].option_type, OptionType::Put);
        assert_eq!(contracts[0].strike_price, 500.0);
        assert_eq!(contracts[0].open_interest, Some(1520));
        assert_eq!(contracts[0].close_price, Some(3.45));
    }

    #[test]
    fn test_decode_screener_payloads() {
        let actives: MostActivesResponse = serde_json::from_str(
            r#"{"most_actives":[{"symbol":"NVDA","trade_count":1208373,"volume":57032930}],"last_updated":"2024-03-01T21:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(actives.most_actives[0].symbol, "NVDA");
        assert_eq!(actives.most_actives[0].trade_count, 1208373);

        let movers: MoversResponse = serde_json::from_str(
            r#"{"gainers":[{"symbol":"ABC","percent_change":45.2,"change":1.1,"price":3.53}],"losers":[],"market_type":"stocks","last_updated":"2024-03-01T21:00:00Z"}"#,
        )
        .unwrap();
        let movers = MarketMovers::from(movers);
        assert_eq!(movers.gainers.len(), 1);
        assert!(movers.losers.is_empty());
    }

    #[test]
    fn test_decode_stock_trades_page() {
        let json = r#"{
            "trades": {
                "AAPL": [
                    {"c":["@","I"],"i":52983525029461,"p":179.66,"s":100,"t":"2024-03-01T14:30:00.123Z","x":"V","z":"C"},
                    {"c":null,"i":52983525029462,"p":179.70,"s":5,"t":"2024-03-01T14:30:01Z","x":"V","z":"C"}
                ]
            },
            "next_page_token": "QUFQTHwy"
        }"#;

        let mut resp: TradesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.next_page_token(), Some("QUFQTHwy"));

        resp.merge_page(serde_json::from_str(r#"{"trades":null,"next_page_token":null}"#).unwrap());
        assert!(resp.next_page_token().is_none());

        let trades: Vec<StockTrade> = resp
            .trades
            .remove("AAPL")
            .unwrap()
            .into_iter()
            .map(StockTrade::from)
            .collect();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].conditions, vec!["@", "I"]);
        assert_eq!(trades[0].id, Some(52983525029461));
        assert_eq!(trades[0].tape.as_deref(), Some("C"));
        assert!(trades[1].conditions.is_empty());
    }

    #[test]
    fn test_decode_stock_quotes_page() {
        let json = r#"{
            "quotes": {
                "MSFT": [
                    {"ap":415.2,"as":3,"ax":"Q","bp":415.1,"bs":2,"bx":"K","c":["R"],"t":"2024-03-01T14:30:00Z","z":"C"}
                ]
            },
            "next_page_token": null
        }"#;

        let mut resp: QuotesResponse = serde_json::from_str(json).unwrap();
        assert!(resp.next_page_token().is_none());

        let quote = StockQuote::from(resp.quotes.remove("MSFT").unwrap().remove(0));
        assert_eq!(quote.ask_size, 3.0);
        assert_eq!(quote.bid_exchange.as_deref(), Some("K"));
        assert_eq!(quote.conditions, vec!["R"]);
    }

    #[test]
    fn test_decode_latest_quotes() {
        let json = r#"{
            "quotes": {
                "SPY": {"ap":509.9,"as":1,"ax":"V","bp":509.8,"bs":4,"bx":"V","c":["R"],"t":"2024-03-01T20:59:59Z","z":"B"}
            }
        }"#;

        let resp: LatestQuotesResponse = serde_json::from_str(json).unwrap();
        let quote = StockQuote::from(resp.quotes["SPY"].clone());
        assert_eq!(quote.bid_price, 509.8);
        assert_eq!(quote.tape.as_deref(), Some("B"));

        let empty: LatestQuotesResponse = serde_json::from_str(r#"{"quotes":null}"#).unwrap();
        assert!(empty.quotes.is_empty());
    }

    #[test]
    fn test_decode_assets() {
        let json = r#"[
            {
                "id": "b0b6dd9d-8b9b-48a9-ba46-b9d54906e415",
                "class": "us_equity",
                "exchange": "NASDAQ",
                "symbol": "AAPL",
                "name": "Apple Inc. Common Stock",
                "status": "active",
                "tradable": true,
                "marginable": true,
                "attributes": ["fractional_eh_enabled", "options_enabled"]
            },
            {
                "id": "3b1d3a3e-0000-4b7c-9c8e-9f8f0c3f4a11",
                "class": "us_equity",
                "exchange": "NYSE",
                "symbol": "XYZ",
                "status": "inactive",
                "tradable": false,
                "attributes": null
            }
        ]"#;

        let assets: Vec<Asset> = serde_json::from_str::<Vec<WireAsset>>(json)
            .unwrap()
            .into_iter()
            .map(Asset::from)
            .collect();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].class, "us_equity");
        assert!(assets[0].attributes.contains(&"options_enabled".to_string()));
        assert!(assets[1].name.is_empty());
        assert!(assets[1].attributes.is_empty());
    }
}
