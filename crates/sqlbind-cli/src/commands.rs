use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use sqlbind_core::{Bindable, Handle, MapArguments};
use tracing::debug;

use crate::{
    error::{CliResult, ErrorContext},
    output::{print_count, print_counts, print_rows},
    utils::{parse_batch, parse_param, parse_value},
};

/// Binds `name=value` params by name and plain args by position.
fn bind_inputs<B: Bindable>(mut target: B, params: &[String], args: &[String]) -> CliResult<B> {
    for raw in params {
        let (name, value) = parse_param(raw)?;
        target = target.bind_value(&name, value);
    }
    Ok(target.bind_values(args.iter().map(|arg| parse_value(arg))))
}

pub fn run_query(
    handle: &Handle,
    sql: &str,
    params: &[String],
    args: &[String],
    limit: Option<usize>,
    json: bool,
) -> CliResult<()> {
    let query = bind_inputs(handle.create_query(sql), params, args)?;
    let rows = match limit {
        Some(max) => query.list_max(max)?,
        None => query.list()?,
    };
    print_rows(&rows, json);
    Ok(())
}

pub fn run_exec(
    handle: &Handle,
    sql: &str,
    params: &[String],
    args: &[String],
    keys: &[String],
    json: bool,
) -> CliResult<()> {
    let update = bind_inputs(handle.create_update(sql), params, args)?;
    if keys.is_empty() {
        let count = update.execute()?;
        print_count(count, json);
    } else {
        let rows = update
            .execute_and_return_generated_keys(keys.iter().cloned())?
            .list()?;
        print_rows(&rows, json);
    }
    Ok(())
}

fn read_batch_input(file: Option<&Path>) -> CliResult<String> {
    match file {
        Some(path) => {
            fs::read_to_string(path)
                .with_context(|| format!("reading batch file {}", path.display()))
        }
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .with_context(|| "reading batch from stdin".to_string())?;
            Ok(input)
        }
    }
}

pub fn run_batch(
    handle: &Handle,
    sql: &str,
    file: Option<PathBuf>,
    chunk_size: Option<usize>,
    transaction: bool,
    json: bool,
) -> CliResult<()> {
    let input = read_batch_input(file.as_deref())?;
    let parts = parse_batch(&input)?;
    debug!(parts = parts.len(), "read batch input");

    let mut batch = handle.prepare_batch(sql);
    for fields in parts {
        batch.add().bind_map(MapArguments::new(fields));
    }
    if let Some(size) = chunk_size {
        batch = batch.chunk_size(size);
    }

    let counts = if transaction {
        handle.in_transaction(|_| batch.execute())?
    } else {
        batch.execute()?
    };
    print_counts(&counts, json);
    Ok(())
}

pub fn run_script(handle: &Handle, file: &Path, json: bool) -> CliResult<()> {
    let sql = fs::read_to_string(file)
        .with_context(|| format!("reading script {}", file.display()))?;
    let counts = handle.create_script(&sql).execute()?;
    print_counts(&counts, json);
    Ok(())
}
