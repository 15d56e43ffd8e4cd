// Database inspection output for the `inspect` subcommands.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use marketlens_core::watchlist::Watchlist;

const HEADERS: [&str; 6] = ["id", "user", "name", "description", "symbols", "createdAt"];

fn row(w: &Watchlist) -> [String; 6] {
    [
        w.id.to_string(),
        w.user_id.clone(),
        w.name.clone(),
        w.description.clone().unwrap_or_default(),
        w.symbols.join(","),
        w.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    ]
}

/// Keep only watchlists owned by `user`, or all of them when `None`.
pub fn filter_by_user(watchlists: Vec<Watchlist>, user: Option<&str>) -> Vec<Watchlist> {
    match user {
        Some(user) => watchlists.into_iter().filter(|w| w.user_id == user).collect(),
        None => watchlists,
    }
}

/// Print watchlists as a left-aligned table with a header row.
pub fn write_table<W: Write>(out: &mut W, watchlists: &[Watchlist]) -> Result<()> {
    let rows: Vec<[String; 6]> = watchlists.iter().map(row).collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for r in &rows {
        for (width, cell) in widths.iter_mut().zip(r) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header = HEADERS.map(str::to_string);
    for r in std::iter::once(&header).chain(&rows) {
        let line = r
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "{}", line.trim_end()).context("failed to write table")?;
    }
    writeln!(out, "({} watchlists)", rows.len()).context("failed to write table")?;
    Ok(())
}

/// Print watchlists as CSV with a header row.
pub fn write_csv<W: Write>(out: &mut W, watchlists: &[Watchlist]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(HEADERS).context("failed to write CSV header")?;
    for w in watchlists {
        writer.write_record(row(w)).context("failed to write CSV row")?;
    }
    writer.flush().context("failed to flush CSV output")?;
    Ok(())
}

/// Print per-table row counts.
pub fn write_stats<W: Write>(out: &mut W, counts: &[(&str, i64)]) -> Result<()> {
    let width = counts.iter().map(|(t, _)| t.len()).max().unwrap_or(0);
    for (table, count) in counts {
        writeln!(out, "{table:<width$}  {count}").context("failed to write stats")?;
    }
    Ok(())
}
