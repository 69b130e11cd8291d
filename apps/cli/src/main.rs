mod commands;
mod config;
mod main_lib;
mod output;

use clap::Parser;
use perpflow_market_data::RecordKind;

use commands::{Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }
    main_lib::init_tracing(config.log_format);

    match cli.command {
        Commands::FetchOi(args) => {
            commands::fetch::execute(RecordKind::OpenInterest, args, &config).await
        }
        Commands::FetchFunding(args) => {
            commands::fetch::execute(RecordKind::FundingRate, args, &config).await
        }
        Commands::StreamLiquidations(args) => commands::stream::execute(args, &config).await,
        Commands::Daemon(command) => commands::daemon::execute(command, &config).await,
        Commands::Query(args) => commands::query::execute(args, &config).await,
    }
}
