//! `query`

use anyhow::Result;
use clap::Args;
use perpflow_core::{RecordQuery, RecordStore};
use perpflow_market_data::{Record, RecordKind, Symbol};

use super::time::parse_range;
use super::VenueArgs;
use crate::config::Config;
use crate::main_lib::open_store;
use crate::output::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Record kind: oi, funding or liquidations
    pub kind: RecordKind,

    /// Canonical symbol, e.g. BTCUSDT-PERP
    pub symbol: Symbol,

    #[command(flatten)]
    pub venue: VenueArgs,

    /// Earliest timestamp to include
    #[arg(long)]
    pub from: Option<String>,

    /// Latest timestamp to include (default: now)
    #[arg(long)]
    pub to: Option<String>,

    /// Maximum number of records shown
    #[arg(short = 'n', long, default_value_t = 10)]
    pub limit: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

pub async fn execute(args: QueryArgs, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let records = select(store.as_ref(), &args).await?;
    if records.is_empty() {
        println!(
            "No {} records for {} in {}",
            args.kind,
            args.symbol,
            config.catalog_path.display()
        );
        return Ok(());
    }
    output::print_records(args.kind, &records, args.format)?;
    Ok(())
}

/// Matching records, newest first, at most `args.limit` of them.
async fn select(store: &dyn RecordStore, args: &QueryArgs) -> Result<Vec<Record>> {
    let (start, end) = parse_range(args.from.as_deref(), args.to.as_deref())?;
    let venues = args.venue.venues();
    let query = RecordQuery::new(args.kind, args.symbol.clone())
        .start(start)
        .end(Some(end));

    let mut records: Vec<Record> = store
        .read(&query)
        .await?
        .into_iter()
        .filter(|record| venues.is_empty() || venues.contains(&record.venue()))
        .collect();
    records.reverse();
    records.truncate(args.limit);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use perpflow_core::InMemoryRecordStore;
    use perpflow_market_data::{OpenInterest, Venue};
    use rust_decimal_macros::dec;

    fn args(venues: Vec<Venue>, limit: usize) -> QueryArgs {
        QueryArgs {
            kind: RecordKind::OpenInterest,
            symbol: Symbol::new("BTCUSDT-PERP").unwrap(),
            venue: VenueArgs { exchanges: venues },
            from: None,
            to: None,
            limit,
            format: OutputFormat::Table,
        }
    }

    #[tokio::test]
    async fn newest_first_with_limit_and_venues() {
        let store = InMemoryRecordStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let symbol = Symbol::new("BTCUSDT-PERP").unwrap();
        let records: Vec<Record> = (0..6)
            .map(|i| {
                let venue = if i % 2 == 0 { Venue::Binance } else { Venue::Bybit };
                let ts = t0 + TimeDelta::hours(i);
                OpenInterest::new(ts, symbol.clone(), venue, dec!(1), dec!(1))
                    .unwrap()
                    .into()
            })
            .collect();
        store.write(&records).await.unwrap();

        let all = select(&store, &args(Vec::new(), 4)).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].timestamp(), t0 + TimeDelta::hours(5));
        assert!(all.windows(2).all(|w| w[0].timestamp() >= w[1].timestamp()));

        let bybit = select(&store, &args(vec![Venue::Bybit], 10)).await.unwrap();
        assert_eq!(bybit.len(), 3);
        assert!(bybit.iter().all(|r| r.venue() == Venue::Bybit));
    }
}
