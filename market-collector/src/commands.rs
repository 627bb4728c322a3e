use anyhow::{bail, Context, Result};
use market_core::{AlignedChain, ContractStatus};
use market_data_services::alpaca::{
    ContractQuery, MarketDataStream, StreamCallback, StreamEvent, StreamHandlers,
};
use market_data_services::{
    AlpacaConfig, AlpacaProvider, CollectionReport, CollectorConfig, DataProcessor,
    MarketDataCollector, MarketDataProvider, StaticProvider,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{collector_config, Cli, Command, FilterArgs, HistoryArgs};

/// Output of the `align` command
#[derive(Debug, Serialize)]
struct AlignOutput {
    aligned: Vec<AlignedChain>,
    failures: BTreeMap<String, String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn alpaca_provider(live: bool) -> Result<AlpacaProvider> {
    let mut config = AlpacaConfig::from_env().context("Failed to load Alpaca configuration")?;
    // --live overrides ALPACA_PAPER
    if live {
        config = config.with_paper(false);
    }
    AlpacaProvider::new(config)
}

pub async fn run(cli: Cli) -> Result<()> {
    let live = cli.live;

    match cli.command {
        Command::Watchlist { top, movers } => {
            let provider = Arc::new(alpaca_provider(live)?);
            let config = CollectorConfig {
                top,
                include_movers: movers,
                ..Default::default()
            };
            let mut collector = MarketDataCollector::new(provider, config);
            let watchlist = collector.populate_watchlist().await?;
            print_json(watchlist)
        }

        Command::Bars { symbol, history } => {
            let processor = DataProcessor::new(Arc::new(alpaca_provider(live)?));
            let series = processor
                .process_underlying_asset_data(&symbol, history.days_back, history.timeframe)
                .await?;
            print_json(&series)
        }

        Command::Chain { symbol, filter } => {
            let processor = DataProcessor::new(Arc::new(alpaca_provider(live)?));
            let filtered = processor
                .process_option_chain_data(&symbol, &filter.to_filter())
                .await?;
            print_json(&filtered)
        }

        Command::Contracts {
            symbols,
            puts,
            limit,
            min_days,
            max_days,
        } => {
            let provider = alpaca_provider(live)?;
            let options = provider.options();

            let contracts = if puts {
                options
                    .get_put_options(&symbols, (min_days, max_days), limit)
                    .await?
            } else {
                let today = market_data_services::alpaca::exchange_today();
                let query = ContractQuery {
                    status: Some(ContractStatus::Active),
                    expiration_date_gte: Some(today + chrono::Duration::days(min_days as i64)),
                    expiration_date_lte: Some(today + chrono::Duration::days(max_days as i64)),
                    limit: Some(limit),
                    ..ContractQuery::for_underlyings(symbols)
                };
                options.get_option_contracts(&query).await?
            };
            print_json(&contracts)
        }

        Command::Collect {
            symbols,
            top,
            movers,
            concurrency,
            output,
            history,
            filter,
        } => {
            let provider = Arc::new(alpaca_provider(live)?);
            let config = CollectorConfig {
                top,
                include_movers: movers,
                max_concurrency: concurrency,
                ..collector_config(&history, &filter)
            };

            let mut collector = MarketDataCollector::new(provider, config);
            if !symbols.is_empty() {
                collector.set_watchlist(&symbols);
            }

            let report = collector.collect_data_for_watchlist().await?;
            log_report(&report);

            match output {
                Some(path) => report.write_json(path),
                None => print_json(&report),
            }
        }

        Command::Align {
            replay,
            symbols,
            history,
            filter,
        } => {
            let report = match replay {
                Some(path) => replay_report(&path, symbols, &history, &filter).await?,
                None => {
                    let provider = Arc::new(alpaca_provider(live)?);
                    let mut collector =
                        MarketDataCollector::new(provider, collector_config(&history, &filter));
                    if !symbols.is_empty() {
                        collector.set_watchlist(&symbols);
                    }
                    collector.collect_data_for_watchlist().await?
                }
            };
            log_report(&report);

            print_json(&AlignOutput {
                aligned: report.data.into_iter().map(|d| d.aligned).collect(),
                failures: report.failures,
            })
        }

        Command::OptionBars { symbol, history } => {
            let processor = DataProcessor::new(Arc::new(alpaca_provider(live)?));
            let aligned = processor
                .process_option_bars(&symbol, history.timeframe, history.days_back)
                .await?;
            print_json(&aligned)
        }

        Command::Stream {
            symbols,
            options,
            no_trades,
            no_quotes,
        } => {
            if no_trades && no_quotes {
                bail!("--no-trades and --no-quotes leave nothing to stream");
            }

            let config = AlpacaConfig::from_env().context("Failed to load Alpaca configuration")?;
            let stream = if options {
                MarketDataStream::options(&config)
            } else {
                MarketDataStream::stocks(&config)
            };

            let print: StreamCallback = Arc::new(|event: StreamEvent| {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to serialize {} event: {}", event.symbol(), e),
                }
            });
            let handlers = StreamHandlers {
                on_trade: (!no_trades).then(|| print.clone()),
                on_quote: (!no_quotes).then(|| print.clone()),
            };

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl-C received, stopping stream");
                    let _ = shutdown_tx.send(());
                }
            });

            stream.run(&symbols, handlers, shutdown_rx).await?;
            Ok(())
        }
    }
}

/// Re-run collection against a saved report, evaluated at the time it was collected
async fn replay_report(
    path: &Path,
    symbols: Vec<String>,
    history: &HistoryArgs,
    filter: &FilterArgs,
) -> Result<CollectionReport> {
    let saved = CollectionReport::read_json(path)?;
    tracing::info!(
        "Replaying report from {} collected at {} ({} symbols)",
        path.display(),
        saved.collected_at.to_rfc3339(),
        saved.data.len()
    );

    let symbols = if symbols.is_empty() {
        saved.watchlist.symbols()
    } else {
        symbols
    };

    // Reuse the saved strike band centers; the saved chains are already band-filtered
    let config = CollectorConfig {
        timeframe: saved.timeframe,
        as_of: Some(saved.collected_at),
        strike_centers: saved.strike_centers(),
        ..collector_config(history, filter)
    };

    let provider: Arc<dyn MarketDataProvider> = Arc::new(StaticProvider::from_report(&saved));
    let mut collector = MarketDataCollector::new(provider, config);
    collector.set_watchlist(&symbols);
    collector.collect_data_for_watchlist().await
}

fn log_report(report: &CollectionReport) {
    tracing::info!(
        "Report: {} symbols collected, {} aligned rows, {} failures",
        report.data.len(),
        report.aligned_rows(),
        report.failures.len()
    );
    for (symbol, message) in &report.failures {
        tracing::warn!("  {}: {}", symbol, message);
    }
}
