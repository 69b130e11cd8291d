//! Command-line interface
//!
//! - `fetch-oi` / `fetch-funding`: snapshots, history and incremental syncs
//! - `stream-liquidations`: live liquidations, optionally stored
//! - `daemon`: scheduled collection and its control files
//! - `query`: read stored records back

pub mod daemon;
pub mod fetch;
pub mod query;
pub mod stream;
mod time;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use perpflow_market_data::Venue;

/// Perpetual-futures telemetry collector
#[derive(Parser)]
#[command(name = "perpflow")]
#[command(about = "Collect open interest, funding rates and liquidations from perpetual venues")]
#[command(version)]
pub struct Cli {
    /// Catalog directory (overrides PERPFLOW_CATALOG_PATH)
    #[arg(long, global = true, value_name = "DIR")]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch open interest
    FetchOi(fetch::FetchArgs),
    /// Fetch funding rates
    FetchFunding(fetch::FetchArgs),
    /// Stream live liquidations until interrupted
    StreamLiquidations(stream::StreamArgs),
    /// Run or control the collection daemon
    #[command(subcommand)]
    Daemon(daemon::DaemonCommands),
    /// Show stored records, newest first
    Query(query::QueryArgs),
}

/// Venue selection shared by every command.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct VenueArgs {
    /// Venue to use; repeat for several (default: all)
    #[arg(short = 'e', long = "exchange", value_name = "EXCHANGE")]
    pub exchanges: Vec<Venue>,
}

impl VenueArgs {
    /// Selected venues without duplicates, in the order given.
    pub fn venues(&self) -> Vec<Venue> {
        let mut venues = Vec::with_capacity(self.exchanges.len());
        for venue in &self.exchanges {
            if !venues.contains(venue) {
                venues.push(*venue);
            }
        }
        venues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_fetch_with_repeated_exchanges() {
        let cli = Cli::try_parse_from([
            "perpflow",
            "fetch-oi",
            "btcusdt-perp",
            "-e",
            "binance",
            "--exchange",
            "BYBIT",
            "-e",
            "binance",
            "--store",
        ])
        .unwrap();
        let Commands::FetchOi(args) = cli.command else {
            panic!("expected fetch-oi");
        };
        assert_eq!(args.symbol.as_str(), "BTCUSDT-PERP");
        assert_eq!(args.venue.venues(), vec![Venue::Binance, Venue::Bybit]);
        assert!(args.store);
    }

    #[test]
    fn rejects_unknown_exchange() {
        let parsed =
            Cli::try_parse_from(["perpflow", "fetch-funding", "BTCUSDT-PERP", "-e", "ftx"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_daemon_and_query_commands() {
        let cli = Cli::try_parse_from([
            "perpflow",
            "--catalog",
            "/tmp/catalog",
            "daemon",
            "start",
            "-s",
            "BTCUSDT-PERP",
            "--oi-interval",
            "1",
        ])
        .unwrap();
        assert_eq!(cli.catalog, Some(PathBuf::from("/tmp/catalog")));
        assert!(matches!(cli.command, Commands::Daemon(daemon::DaemonCommands::Start(_))));

        let cli = Cli::try_parse_from([
            "perpflow",
            "query",
            "funding",
            "ETHUSDT-PERP",
            "-n",
            "5",
            "--format",
            "json",
        ])
        .unwrap();
        let Commands::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(args.limit, 5);
        assert_eq!(args.format, crate::output::OutputFormat::Json);
    }
}
