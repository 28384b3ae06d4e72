use nu_ansi_term::Color::{Cyan, DarkGray, Green, Yellow};
use sqlbind_core::{
    events::{CollectorSink, SqlEvent},
    RowMap, Value,
};
use tabled::{
    builder::Builder,
    settings::{themes::BorderCorrection, Panel, Style},
};
use tracing::info;

use crate::utils::{rows_to_json, Colored};

fn cell(value: &Value) -> String {
    if value.is_null() {
        format!("{}", Colored(DarkGray, "NULL"))
    } else {
        value.to_string()
    }
}

pub fn print_rows(rows: &[RowMap], json: bool) {
    if json {
        println!("{}", rows_to_json(rows));
        return;
    }

    let Some(first) = rows.first() else {
        info!("{}", Colored(Yellow, "No rows"));
        return;
    };

    let mut builder = Builder::new();
    builder.push_record(
        first
            .columns()
            .iter()
            .map(|c| format!("{}", Colored(Cyan, c))),
    );
    for row in rows {
        builder.push_record(row.values().iter().map(cell));
    }

    let table = builder
        .build()
        .with(Panel::footer(format!("{} row(s)", rows.len())))
        .with(Style::rounded())
        .with(BorderCorrection {})
        .to_string();

    info!("\n{table}");
}

pub fn print_counts(counts: &[i64], json: bool) {
    if json {
        println!("{}", serde_json::json!({ "counts": counts }));
        return;
    }
    let total: i64 = counts.iter().filter(|c| **c > 0).sum();
    info!(
        "{} statement(s) run, {} row(s) affected",
        Colored(Green, counts.len()),
        Colored(Green, total)
    );
}

pub fn print_count(count: u64, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "updated": count }));
    } else {
        info!("{} row(s) affected", Colored(Green, count));
    }
}

/// Prints one line per executed statement or batch chunk.
pub fn print_timings(sink: &CollectorSink) {
    let mut builder = Builder::new();
    builder.push_record(["Kind", "Elapsed", "SQL"].map(|h| format!("{}", Colored(Cyan, h))));

    let mut total = 0;
    for event in sink.events() {
        let kind = match &event {
            SqlEvent::StatementExecuted {
                kind,
                ..
            } => kind.to_string(),
            SqlEvent::BatchExecuted {
                parts,
                ..
            } => format!("batch of {parts}"),
            _ => continue,
        };
        let elapsed = event.elapsed_ms().unwrap_or(0);
        total += elapsed;
        builder.push_record([
            kind,
            format!("{elapsed} ms"),
            event.sql().unwrap_or_default().to_string(),
        ]);
    }

    let table = builder
        .build()
        .with(Panel::header("Statement Timings"))
        .with(Panel::footer(format!("{total} ms total")))
        .with(Style::rounded())
        .with(BorderCorrection {})
        .to_string();

    info!("\n{table}");
}
