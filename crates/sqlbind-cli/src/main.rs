use std::sync::Arc;

use clap::Parser;
use cli::{Args, Commands};
use commands::{run_batch, run_exec, run_query, run_script};
use error::CliResult;
use logging::setup_logging;
use output::print_timings;
use sqlbind_config::{
    config::{config_path, set_config_path},
    generate_default_config, Config,
};
use sqlbind_core::{events::CollectorSink, Dbi, Handle};
use tracing::{debug, info};
use utils::set_color;

mod cli;
mod commands;
mod error;
mod logging;
mod output;
mod utils;

fn run_command(handle: &Handle, command: Commands, json: bool) -> CliResult<()> {
    match command {
        Commands::Query {
            sql,
            params,
            args,
            limit,
        } => run_query(handle, &sql, &params, &args, limit, json),
        Commands::Exec {
            sql,
            params,
            args,
            keys,
        } => run_exec(handle, &sql, &params, &args, &keys, json),
        Commands::Batch {
            sql,
            file,
            chunk_size,
            transaction,
        } => run_batch(handle, &sql, file, chunk_size, transaction, json),
        Commands::Script {
            file,
        } => run_script(handle, &file, json),
        Commands::DefConfig {
            ..
        } => Ok(()),
    }
}

fn handle_cli() -> CliResult<()> {
    let args = Args::parse();

    setup_logging(&args);
    set_color(!args.no_color);

    if let Some(path) = &args.config {
        set_config_path(path.clone());
    }

    if let Commands::DefConfig {
        path,
    } = &args.command
    {
        let path = path.clone().unwrap_or_else(config_path);
        generate_default_config(&path)?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = Config::new()?;
    if let Some(db) = args.db {
        config.database = Some(db);
    }

    let mut dbi = Dbi::from_config(&config)?;
    if args.verbose > 0 {
        dbi.set_log_sql(true);
    }

    let sink = Arc::new(CollectorSink::default());
    if args.timings {
        dbi.set_event_sink_handle(sink.clone());
    }

    let handle = dbi.open()?;
    debug!("opened {}", config.database.as_deref().unwrap_or_default());

    let result = run_command(&handle, args.command, args.json);
    let closed = handle.close();
    result?;
    closed?;

    if args.timings {
        print_timings(&sink);
    }
    Ok(())
}

fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    if let Err(err) = handle_cli() {
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(1);
    }
}
