mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use market_core::{OptionType, TimeFrame};
use market_data_services::{ChainFilter, CollectorConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Options market data collector
///
/// Screens active stocks, downloads underlying bars and option chains from
/// Alpaca and aligns them into per-contract rows. Results are printed as
/// JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "market-collector")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Use the live trading endpoint instead of paper
    #[arg(long, global = true)]
    live: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a watchlist from the most-actives screener
    Watchlist {
        /// Number of symbols to take from each screener
        #[arg(long, default_value = "10")]
        top: u32,

        /// Also add the top gainers and losers
        #[arg(long)]
        movers: bool,
    },

    /// Historical bars for one stock
    Bars {
        symbol: String,

        #[command(flatten)]
        history: HistoryArgs,
    },

    /// Filtered option chain for one underlying
    Chain {
        symbol: String,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Option contract definitions from the trading API
    Contracts {
        /// Underlying symbols
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Only active American puts
        #[arg(long)]
        puts: bool,

        /// Page size
        #[arg(long, default_value = "100")]
        limit: u32,

        /// Earliest expiration in days from today
        #[arg(long, default_value = "1")]
        min_days: u32,

        /// Latest expiration in days from today
        #[arg(long, default_value = "60")]
        max_days: u32,
    },

    /// Collect bars, chains and aligned rows for a watchlist
    Collect {
        /// Watchlist symbols (comma-separated); screened when omitted
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Number of symbols to screen when no symbols are given
        #[arg(long, default_value = "10")]
        top: u32,

        /// Include gainers and losers when screening
        #[arg(long)]
        movers: bool,

        /// Symbols processed at the same time
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        history: HistoryArgs,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Aligned option rows, live or replayed from a saved report
    Align {
        /// Report written by `collect --output`
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Symbols to align (comma-separated); defaults to the report's watchlist
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        #[command(flatten)]
        history: HistoryArgs,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Historical bars of one contract on the timeline of its underlying
    OptionBars {
        /// OCC option symbol (e.g. AAPL240119C00100000)
        symbol: String,

        #[command(flatten)]
        history: HistoryArgs,
    },

    /// Stream real-time trades and quotes as JSON lines until Ctrl-C
    Stream {
        /// Stock symbols, or OCC option symbols with --options
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Use the option feed
        #[arg(long)]
        options: bool,

        /// Skip trades
        #[arg(long)]
        no_trades: bool,

        /// Skip quotes
        #[arg(long)]
        no_quotes: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct HistoryArgs {
    /// Bar timeframe (1D, 1H, 15T, 1Day, 15Min, ...)
    #[arg(long, default_value = "1D")]
    timeframe: TimeFrame,

    /// Days of history to load
    #[arg(long, default_value = "30")]
    days_back: u32,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Earliest expiration in days from today
    #[arg(long, default_value = "0")]
    min_days: u32,

    /// Latest expiration in days from today
    #[arg(long, default_value = "60")]
    max_days: u32,

    /// Strike band half-width as a fraction of its center (0 disables)
    #[arg(long, default_value = "0.25")]
    strike_band: f64,

    /// Only calls or only puts
    #[arg(long = "type")]
    option_type: Option<OptionType>,

    /// Strike band center (defaults to the average strike)
    #[arg(long)]
    reference_price: Option<f64>,
}

impl FilterArgs {
    fn to_filter(&self) -> ChainFilter {
        ChainFilter {
            min_days_to_expiry: self.min_days,
            max_days_to_expiry: self.max_days,
            strike_band_pct: (self.strike_band > 0.0).then_some(self.strike_band),
            option_type: self.option_type,
            reference_price: self.reference_price,
        }
    }
}

/// Collector settings shared by `collect` and `align`
fn collector_config(history: &HistoryArgs, filter: &FilterArgs) -> CollectorConfig {
    CollectorConfig {
        timeframe: history.timeframe,
        days_back: history.days_back,
        chain_filter: filter.to_filter(),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "market_collector={},market_data_services={},market_core={}",
                cli.log_level, cli.log_level, cli.log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Market collector starting");
    tracing::info!("  Command: {:?}", cli.command);
    tracing::info!("  Endpoint: {}", if cli.live { "live" } else { "paper" });

    commands::run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain_filter_flags() {
        let cli = Cli::try_parse_from([
            "market-collector",
            "chain",
            "AAPL",
            "--max-days",
            "30",
            "--strike-band",
            "0",
            "--type",
            "put",
        ])
        .unwrap();

        match cli.command {
            Command::Chain { symbol, filter } => {
                assert_eq!(symbol, "AAPL");
                let filter = filter.to_filter();
                assert_eq!(filter.min_days_to_expiry, 0);
                assert_eq!(filter.max_days_to_expiry, 30);
                assert_eq!(filter.strike_band_pct, None);
                assert_eq!(filter.option_type, Some(OptionType::Put));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_collect_defaults() {
        let cli = Cli::try_parse_from([
            "market-collector",
            "--live",
            "collect",
            "--symbols",
            "AAPL,MSFT",
            "--timeframe",
            "1H",
        ])
        .unwrap();
        assert!(cli.live);

        match cli.command {
            Command::Collect {
                symbols,
                concurrency,
                output,
                history,
                filter,
                ..
            } => {
                assert_eq!(symbols, vec!["AAPL", "MSFT"]);
                assert_eq!(concurrency, 4);
                assert!(output.is_none());

                let config = collector_config(&history, &filter);
                assert_eq!(config.timeframe, TimeFrame::hour());
                assert_eq!(config.days_back, 30);
                assert_eq!(config.chain_filter, ChainFilter::default());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_reject_bad_timeframe() {
        let result = Cli::try_parse_from(["market-collector", "bars", "AAPL", "--timeframe", "7X"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_stream_flags() {
        let cli = Cli::try_parse_from([
            "market-collector",
            "stream",
            "SPY240315P00500000",
            "--options",
            "--no-trades",
        ])
        .unwrap();

        match cli.command {
            Command::Stream {
                symbols,
                options,
                no_trades,
                no_quotes,
            } => {
                assert_eq!(symbols, vec!["SPY240315P00500000"]);
                assert!(options);
                assert!(no_trades);
                assert!(!no_quotes);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["market-collector", "stream"]).is_err());
    }

    #[test]
    fn test_contracts_requires_symbol() {
        assert!(Cli::try_parse_from(["market-collector", "contracts"]).is_err());

        let cli = Cli::try_parse_from(["market-collector", "contracts", "SPY", "QQQ", "--puts"])
            .unwrap();
        match cli.command {
            Command::Contracts { symbols, puts, limit, .. } => {
                assert_eq!(symbols, vec!["SPY", "QQQ"]);
                assert!(puts);
                assert_eq!(limit, 100);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
