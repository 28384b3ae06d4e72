use std::{
    fmt::Display,
    sync::{LazyLock, RwLock},
};

use nu_ansi_term::Color;
use sqlbind_core::{RowMap, Value};

use crate::error::{CliError, CliResult};

pub static COLOR: LazyLock<RwLock<bool>> = LazyLock::new(|| RwLock::new(true));

pub fn set_color(enabled: bool) {
    match COLOR.write() {
        Ok(mut color) => *color = enabled,
        Err(poisoned) => *poisoned.into_inner() = enabled,
    }
}

fn color_enabled() -> bool {
    match COLOR.read() {
        Ok(color) => *color,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

pub struct Colored<T: Display>(pub Color, pub T);

impl<T: Display> Display for Colored<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if color_enabled() {
            write!(f, "{}", self.0.prefix())?;
            self.1.fmt(f)?;
            write!(f, "{}", self.0.suffix())
        } else {
            self.1.fmt(f)
        }
    }
}

/// Reads a command line value as JSON, falling back to plain text.
pub fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_json(&json),
        Err(_) => Value::Text(raw.to_string()),
    }
}

/// Splits `name=value` into its parts.
pub fn parse_param(raw: &str) -> CliResult<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidParam(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidParam(raw.to_string()));
    }
    Ok((name.to_string(), parse_value(value)))
}

/// Reads a JSON array of objects into one map per batch part.
pub fn parse_batch(input: &str) -> CliResult<Vec<Vec<(String, Value)>>> {
    let json: serde_json::Value =
        serde_json::from_str(input).map_err(|e| CliError::InvalidBatch(e.to_string()))?;
    let serde_json::Value::Array(items) = json else {
        return Err(CliError::InvalidBatch("expected an array".into()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            match item {
                serde_json::Value::Object(fields) => {
                    Ok(fields
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect())
                }
                _ => Err(CliError::InvalidBatch(format!("element {index} is not an object"))),
            }
        })
        .collect()
}

pub fn rows_to_json(rows: &[RowMap]) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string())
}
