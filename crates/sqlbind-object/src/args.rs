//! Arguments passed to, and outcomes returned from, SQL object methods.

use std::collections::HashMap;

use serde::Serialize;
use sqlbind_core::{
    driver::{ResultSet, VecResultSet},
    DbiError, FromRow, OutParameters, Result, Row, RowMap, Value,
};

/// One argument of a method call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    /// A serialized bean, read field by field.
    Bean(serde_json::Value),
    Map(HashMap<String, Value>),
    /// One element per batch part.
    List(Vec<Arg>),
}

impl Arg {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Arg::Value(_) => "value",
            Arg::Bean(_) => "bean",
            Arg::Map(_) => "map",
            Arg::List(_) => "list",
        }
    }
}

/// Positional arguments of a method call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.0.push(arg);
        self
    }

    pub fn value<V: Into<Value>>(self, value: V) -> Self {
        self.arg(Arg::Value(value.into()))
    }

    pub fn bean<T: Serialize>(self, bean: &T) -> Result<Self> {
        let json = serde_json::to_value(bean)
            .map_err(|e| DbiError::configuration(format!("Unable to serialize bean: {e}")))?;
        Ok(self.arg(Arg::Bean(json)))
    }

    pub fn map<I, K, V>(self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.arg(Arg::Map(map))
    }

    /// A list of values, one per batch part.
    pub fn values<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = values
            .into_iter()
            .map(|v| Arg::Value(v.into()))
            .collect();
        self.arg(Arg::List(items))
    }

    /// A list of beans, one per batch part.
    pub fn beans<'a, T, I>(self, beans: I) -> Result<Self>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut items = Vec::new();
        for bean in beans {
            let json = serde_json::to_value(bean)
                .map_err(|e| DbiError::configuration(format!("Unable to serialize bean: {e}")))?;
            items.push(Arg::Bean(json));
        }
        Ok(self.arg(Arg::List(items)))
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }
}

impl FromIterator<Arg> for Args {
    fn from_iter<I: IntoIterator<Item = Arg>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a method call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Unit,
    Value(Value),
    Row(Option<RowMap>),
    Rows(Vec<RowMap>),
    Count(u64),
    Counts(Vec<i64>),
    Keys(Vec<RowMap>),
    Out(OutParameters),
}

impl Outcome {
    fn kind(&self) -> &'static str {
        match self {
            Outcome::Unit => "unit",
            Outcome::Value(_) => "value",
            Outcome::Row(_) => "row",
            Outcome::Rows(_) => "rows",
            Outcome::Count(_) => "count",
            Outcome::Counts(_) => "counts",
            Outcome::Keys(_) => "keys",
            Outcome::Out(_) => "out parameters",
        }
    }

    fn mismatch(&self, expected: &str) -> DbiError {
        DbiError::configuration(format!("expected {expected}, method returned {}", self.kind()))
    }

    pub fn into_rows(self) -> Result<Vec<RowMap>> {
        match self {
            Outcome::Rows(rows) | Outcome::Keys(rows) => Ok(rows),
            Outcome::Row(row) => Ok(row.into_iter().collect()),
            other => Err(other.mismatch("rows")),
        }
    }

    pub fn into_row(self) -> Result<Option<RowMap>> {
        match self {
            Outcome::Row(row) => Ok(row),
            Outcome::Rows(rows) | Outcome::Keys(rows) => Ok(rows.into_iter().next()),
            other => Err(other.mismatch("a row")),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            Outcome::Count(count) => Ok(count),
            other => Err(other.mismatch("an update count")),
        }
    }

    pub fn into_counts(self) -> Result<Vec<i64>> {
        match self {
            Outcome::Counts(counts) => Ok(counts),
            other => Err(other.mismatch("batch update counts")),
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Outcome::Value(value) => Ok(value),
            other => Err(other.mismatch("a value")),
        }
    }

    pub fn into_out(self) -> Result<OutParameters> {
        match self {
            Outcome::Out(out) => Ok(out),
            other => Err(other.mismatch("out parameters")),
        }
    }

    /// Decodes returned rows into `T`.
    pub fn decode<T: FromRow>(self) -> Result<Vec<T>> {
        self.into_rows()?.iter().map(decode_row).collect()
    }
}

fn decode_row<T: FromRow>(row: &RowMap) -> Result<T> {
    let mut rs = VecResultSet::new(row.columns().to_vec(), vec![row.values().to_vec()]);
    let advanced = rs
        .next()
        .map_err(|e| DbiError::configuration(format!("Unable to decode row: {e}")))?;
    if !advanced {
        return Err(DbiError::configuration("Unable to decode row: empty result"));
    }
    T::from_row(&Row::new(&rs)).map_err(|e| DbiError::configuration(format!("Unable to decode row: {e}")))
}
