//! Terminal rendering of records, fetch reports and daemon status.

use std::io;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use perpflow_core::{DaemonStatus, SyncReport};
use perpflow_market_data::{Liquidation, Record, RecordKind};
use rust_decimal::Decimal;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

/// Header plus string cells, rendered as aligned columns or CSV.
#[derive(Debug, Default)]
struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(headers: Vec<&'static str>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        let line = |cells: &[&str]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let rules: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        let rules: Vec<&str> = rules.iter().map(String::as_str).collect();
        let mut out = vec![line(&self.headers), line(&rules)];
        for row in &self.rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            out.push(line(&cells));
        }
        out.join("\n")
    }

    fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decimal(value: Decimal, dp: u32) -> String {
    value.round_dp(dp).normalize().to_string()
}

fn records_table(kind: RecordKind, records: &[Record]) -> Table {
    match kind {
        RecordKind::OpenInterest => {
            let mut table = Table::new(vec!["TIMESTAMP", "VENUE", "SYMBOL", "AMOUNT", "VALUE"]);
            for oi in records.iter().filter_map(Record::as_open_interest) {
                table.push(vec![
                    timestamp(oi.timestamp()),
                    oi.venue().to_string(),
                    oi.symbol().to_string(),
                    decimal(oi.amount(), 4),
                    decimal(oi.value(), 2),
                ]);
            }
            table
        }
        RecordKind::FundingRate => {
            let mut table = Table::new(vec![
                "TIMESTAMP",
                "VENUE",
                "SYMBOL",
                "RATE",
                "ANNUALIZED_%",
                "NEXT_FUNDING",
                "PREDICTED",
            ]);
            for fr in records.iter().filter_map(Record::as_funding_rate) {
                table.push(vec![
                    timestamp(fr.timestamp()),
                    fr.venue().to_string(),
                    fr.symbol().to_string(),
                    fr.rate().normalize().to_string(),
                    decimal(fr.annualized_percent(), 2),
                    fr.next_funding_time().map(timestamp).unwrap_or_default(),
                    fr.predicted_rate()
                        .map(|r| r.normalize().to_string())
                        .unwrap_or_default(),
                ]);
            }
            table
        }
        RecordKind::Liquidation => {
            let mut table = Table::new(vec![
                "TIMESTAMP", "VENUE", "SYMBOL", "SIDE", "QUANTITY", "PRICE", "VALUE",
            ]);
            for liq in records.iter().filter_map(Record::as_liquidation) {
                table.push(vec![
                    timestamp(liq.timestamp()),
                    liq.venue().to_string(),
                    liq.symbol().to_string(),
                    liq.side().to_string(),
                    liq.quantity().normalize().to_string(),
                    liq.price().normalize().to_string(),
                    decimal(liq.value(), 2),
                ]);
            }
            table
        }
    }
}

/// Print records of one kind in `format`.
pub fn print_records(kind: RecordKind, records: &[Record], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", records_table(kind, records).render()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Csv => records_table(kind, records).write_csv(io::stdout().lock())?,
    }
    Ok(())
}

/// Records of every successful venue followed by one line per failure.
pub fn print_fetch_report(kind: RecordKind, report: &SyncReport) {
    let records: Vec<Record> = report.records().cloned().collect();
    if !records.is_empty() {
        println!("{}", records_table(kind, &records).render());
    }
    for result in &report.results {
        match &result.error {
            None if result.rejected > 0 => println!(
                "{}: {} record(s), {} rejected by validation",
                result.venue,
                result.records.len(),
                result.rejected
            ),
            None => {}
            Some(e) => println!("{}: failed after {:?}: {}", result.venue, result.elapsed, e),
        }
    }
}

/// One line per live liquidation.
pub fn print_liquidation(liquidation: &Liquidation) {
    println!(
        "{}  {:<11}  {:<14}  {:<5}  {} @ {}  (${})",
        timestamp(liquidation.timestamp()),
        liquidation.venue(),
        liquidation.symbol(),
        liquidation.side(),
        liquidation.quantity().normalize(),
        liquidation.price().normalize(),
        decimal(liquidation.value(), 2)
    );
}

pub fn print_daemon_status(status: &DaemonStatus, stale: bool) {
    let state = match (status.running, stale) {
        (true, false) => "running",
        (true, true) => "running (stale status, the daemon may have died)",
        (false, _) => "stopped",
    };
    println!("State:        {}", state);
    println!("PID:          {}", status.pid);
    if let Some(started) = status.started_at {
        println!("Started:      {}", timestamp(started));
    }
    println!("Uptime:       {}s", status.uptime_seconds);
    println!(
        "Symbols:      {}",
        status.symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "Venues:       {}",
        status.venues.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("Fetches:      {}", status.fetch_count);
    println!("Errors:       {}", status.error_count);
    println!(
        "Liquidations: {} ({} buffered)",
        status.liquidation_count, status.buffered_liquidations
    );
    if let Some(last) = status.last_fetch_time {
        println!("Last fetch:   {}", timestamp(last));
    }
    if let Some(error) = &status.last_error {
        println!("Last error:   {}", error);
    }
    println!("Updated:      {}", timestamp(status.updated_at));

    if !status.circuits.is_empty() {
        let mut table = Table::new(vec!["CIRCUIT", "STATE", "FAILURES", "CALLS", "REJECTED"]);
        for circuit in &status.circuits {
            table.push(vec![
                circuit.name.clone(),
                circuit.state.to_string(),
                circuit.consecutive_failures.to_string(),
                circuit.stats.total_calls.to_string(),
                circuit.stats.rejected_calls.to_string(),
            ]);
        }
        println!();
        println!("{}", table.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use perpflow_market_data::{FundingRate, Side, Symbol, Venue};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn table_aligns_columns() {
        let mut table = Table::new(vec!["A", "LONGER"]);
        table.push(vec!["wide cell".to_string(), "x".to_string()]);
        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "A          LONGER");
        assert_eq!(lines[1], "---------  ------");
        assert_eq!(lines[2], "wide cell  x");
    }

    #[test]
    fn funding_table_includes_annualized_rate() {
        let symbol = Symbol::new("BTCUSDT-PERP").unwrap();
        let record: Record = FundingRate::new(t0(), symbol, Venue::Binance, dec!(0.0001))
            .unwrap()
            .into();
        let table = records_table(RecordKind::FundingRate, &[record]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][3], "0.0001");
        assert_eq!(table.rows[0][4], "10.95");
        assert_eq!(table.rows[0][5], "");
    }

    #[test]
    fn csv_output_has_header_and_rows() {
        let symbol = Symbol::new("ETHUSDT-PERP").unwrap();
        let record: Record = Liquidation::new(
            t0(),
            symbol,
            Venue::Bybit,
            Side::Short,
            dec!(2),
            dec!(3000.5),
        )
        .unwrap()
        .into();
        let mut out = Vec::new();
        records_table(RecordKind::Liquidation, &[record])
            .write_csv(&mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("TIMESTAMP,VENUE,SYMBOL,SIDE,QUANTITY,PRICE,VALUE")
        );
        assert_eq!(
            lines.next(),
            Some("2024-05-01T08:00:00.000Z,BYBIT,ETHUSDT-PERP,SHORT,2,3000.5,6001")
        );
    }

    #[test]
    fn rows_of_other_kinds_are_skipped() {
        let symbol = Symbol::new("BTCUSDT-PERP").unwrap();
        let record: Record = FundingRate::new(t0(), symbol, Venue::Bybit, dec!(0.0002))
            .unwrap()
            .into();
        assert!(records_table(RecordKind::OpenInterest, &[record]).rows.is_empty());
    }
}
