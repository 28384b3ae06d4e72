//! Row and column mappers and their registries.

use std::{
    any::{type_name, Any, TypeId},
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use miette::Diagnostic;
use serde::{ser::SerializeMap, Serialize, Serializer};
use thiserror::Error;

use crate::{
    context::StatementContext,
    driver::{DriverError, ResultSet},
    registry::FactoryRegistry,
    value::{Decimal, Value},
};

#[derive(Error, Diagnostic, Debug)]
pub enum MappingError {
    #[error("No column named '{0}'")]
    #[diagnostic(code(sqlbind::mapping::column))]
    ColumnNotFound(String),

    #[error("Column index {index} out of range for {count} columns")]
    #[diagnostic(code(sqlbind::mapping::index))]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Cannot convert {found} in column '{column}' to {expected}")]
    #[diagnostic(
        code(sqlbind::mapping::conversion),
        help("Map the column to a compatible type or register a column mapper")
    )]
    Conversion {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("No mapper registered for {0}")]
    #[diagnostic(
        code(sqlbind::mapping::no_mapper),
        help("Register a row mapper or column mapper for this type")
    )]
    NoMapper(&'static str),

    #[error(transparent)]
    #[diagnostic(code(sqlbind::mapping::driver))]
    Driver(#[from] DriverError),

    #[error("{0}")]
    #[diagnostic(code(sqlbind::mapping::custom))]
    Custom(String),
}

/// The current row of a result set.
pub struct Row<'r> {
    rs: &'r dyn ResultSet,
}

impl<'r> Row<'r> {
    pub fn new(rs: &'r dyn ResultSet) -> Self {
        Self {
            rs,
        }
    }

    pub fn columns(&self) -> &[String] {
        self.rs.columns()
    }

    pub fn len(&self) -> usize {
        self.rs.columns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of a column, compared case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns()
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns().get(index).map(String::as_str)
    }

    pub fn value<I: ColumnIndex>(&self, index: I) -> Result<&Value, MappingError> {
        let index = index.index(self)?;
        Ok(self.rs.get(index)?)
    }

    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T, MappingError> {
        let index = index.index(self)?;
        let value = self.rs.get(index)?;
        T::from_value(value).ok_or_else(|| {
            MappingError::Conversion {
                column: self.column_name(index).unwrap_or_default().to_string(),
                expected: type_name::<T>(),
                found: format!("{value:?}"),
            }
        })
    }
}

/// Addresses a column by 0-based index or by name.
pub trait ColumnIndex {
    fn index(&self, row: &Row<'_>) -> Result<usize, MappingError>;
}

impl ColumnIndex for usize {
    fn index(&self, row: &Row<'_>) -> Result<usize, MappingError> {
        if *self < row.len() {
            Ok(*self)
        } else {
            Err(MappingError::IndexOutOfRange {
                index: *self,
                count: row.len(),
            })
        }
    }
}

impl ColumnIndex for &str {
    fn index(&self, row: &Row<'_>) -> Result<usize, MappingError> {
        row.index_of(self)
            .ok_or_else(|| MappingError::ColumnNotFound(self.to_string()))
    }
}

impl ColumnIndex for String {
    fn index(&self, row: &Row<'_>) -> Result<usize, MappingError> {
        self.as_str().index(row)
    }
}

/// Conversion from a single column value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

macro_rules! from_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Option<Self> {
                    value.as_i64().and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null(_) | Value::Bytes(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Decimal(s) => Some(Decimal(s.clone())),
            Value::Int(v) => Some(Decimal(v.to_string())),
            Value::Double(v) => Some(Decimal(v.to_string())),
            Value::Text(s) if s.trim().parse::<f64>().is_ok() => Some(Decimal(s.trim().to_string())),
            _ => None,
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_date()
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_time()
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_timestamp()
    }
}

/// Types that know how to build themselves from a row.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> Result<Self, MappingError>;
}

/// Maps one row to a `T`.
pub trait RowMapper<T>: Send + Sync {
    fn map(&self, row: &Row<'_>, ctx: &StatementContext) -> Result<T, MappingError>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&Row<'_>) -> Result<T, MappingError> + Send + Sync,
{
    fn map(&self, row: &Row<'_>, _ctx: &StatementContext) -> Result<T, MappingError> {
        self(row)
    }
}

/// Maps one column of a row to a `T`.
pub trait ColumnMapper<T>: Send + Sync {
    fn map(&self, row: &Row<'_>, column: usize, ctx: &StatementContext) -> Result<T, MappingError>;
}

impl<T, F> ColumnMapper<T> for F
where
    F: Fn(&Value) -> Result<T, MappingError> + Send + Sync,
{
    fn map(&self, row: &Row<'_>, column: usize, _ctx: &StatementContext) -> Result<T, MappingError> {
        self(row.value(column)?)
    }
}

/// Row mapper backed by [`FromRow`].
pub struct FromRowMapper<T>(PhantomData<fn() -> T>);

impl<T> Default for FromRowMapper<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: FromRow> RowMapper<T> for FromRowMapper<T> {
    fn map(&self, row: &Row<'_>, _ctx: &StatementContext) -> Result<T, MappingError> {
        T::from_row(row)
    }
}

/// Column mapper backed by [`FromValue`].
pub struct FromValueMapper<T>(PhantomData<fn() -> T>);

impl<T> Default for FromValueMapper<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: FromValue> ColumnMapper<T> for FromValueMapper<T> {
    fn map(&self, row: &Row<'_>, column: usize, _ctx: &StatementContext) -> Result<T, MappingError> {
        row.get(column)
    }
}

/// Adapts a column mapper into a row mapper reading the first column.
pub struct SingleColumnRowMapper<T> {
    column: Arc<dyn ColumnMapper<T>>,
}

impl<T> SingleColumnRowMapper<T> {
    pub fn new(column: Arc<dyn ColumnMapper<T>>) -> Self {
        Self {
            column,
        }
    }
}

impl<T> RowMapper<T> for SingleColumnRowMapper<T> {
    fn map(&self, row: &Row<'_>, ctx: &StatementContext) -> Result<T, MappingError> {
        self.column.map(row, 0, ctx)
    }
}

/// Ordered column name to value map, the default row type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl RowMap {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            columns,
            values,
        }
    }

    /// Value of a column, compared case-insensitively.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl FromRow for RowMap {
    fn from_row(row: &Row<'_>) -> Result<Self, MappingError> {
        let mut values = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            values.push(row.value(index)?.clone());
        }
        Ok(RowMap::new(row.columns().to_vec(), values))
    }
}

impl Serialize for RowMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl fmt::Display for RowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (column, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        write!(f, "}}")
    }
}

/// A mapper held behind `Arc<dyn Any>`: either `Arc<dyn RowMapper<T>>` or
/// `Arc<dyn ColumnMapper<T>>`.
pub type ErasedMapper = Arc<dyn Any + Send + Sync>;

/// Produces mappers for the types it knows, keyed by `TypeId`.
pub trait MapperFactory: Send + Sync {
    fn build(&self, target: TypeId) -> Option<ErasedMapper>;
}

struct SingleTypeFactory {
    target: TypeId,
    mapper: ErasedMapper,
}

impl MapperFactory for SingleTypeFactory {
    fn build(&self, target: TypeId) -> Option<ErasedMapper> {
        (target == self.target).then(|| self.mapper.clone())
    }
}

fn erase_row<T: 'static>(mapper: Arc<dyn RowMapper<T>>) -> ErasedMapper {
    Arc::new(mapper)
}

fn erase_column<T: 'static>(mapper: Arc<dyn ColumnMapper<T>>) -> ErasedMapper {
    Arc::new(mapper)
}

struct BuiltinRowMappers;

impl MapperFactory for BuiltinRowMappers {
    fn build(&self, target: TypeId) -> Option<ErasedMapper> {
        (target == TypeId::of::<RowMap>())
            .then(|| erase_row::<RowMap>(Arc::new(FromRowMapper::<RowMap>::default())))
    }
}

struct BuiltinColumnMappers;

macro_rules! builtin_column_mappers {
    ($target:ident; $($ty:ty),* $(,)?) => {
        $(
            if $target == TypeId::of::<$ty>() {
                return Some(erase_column::<$ty>(Arc::new(FromValueMapper::<$ty>::default())));
            }
            if $target == TypeId::of::<Option<$ty>>() {
                return Some(erase_column::<Option<$ty>>(Arc::new(
                    FromValueMapper::<Option<$ty>>::default(),
                )));
            }
        )*
    };
}

impl MapperFactory for BuiltinColumnMappers {
    fn build(&self, target: TypeId) -> Option<ErasedMapper> {
        builtin_column_mappers!(target;
            Value, bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String, Vec<u8>,
            Decimal, NaiveDate, NaiveTime, NaiveDateTime,
        );
        None
    }
}

/// Registry of row mappers, newest registration first.
pub struct RowMappers {
    inner: FactoryRegistry<dyn MapperFactory, ErasedMapper>,
}

impl Default for RowMappers {
    fn default() -> Self {
        Self::new()
    }
}

impl RowMappers {
    pub fn new() -> Self {
        Self {
            inner: FactoryRegistry::new(vec![Arc::new(BuiltinRowMappers)]),
        }
    }

    pub fn register<T: 'static, M: RowMapper<T> + 'static>(&self, mapper: M) {
        let mapper: Arc<dyn RowMapper<T>> = Arc::new(mapper);
        self.inner.register(Arc::new(SingleTypeFactory {
            target: TypeId::of::<T>(),
            mapper: erase_row(mapper),
        }));
    }

    pub fn register_from_row<T: FromRow + 'static>(&self) {
        self.register::<T, _>(FromRowMapper::<T>::default());
    }

    pub fn register_factory<F: MapperFactory + 'static>(&self, factory: F) {
        self.inner.register(Arc::new(factory));
    }

    pub fn find<T: 'static>(&self) -> Option<Arc<dyn RowMapper<T>>> {
        resolve(&self.inner, TypeId::of::<T>())
            .and_then(|m| m.downcast_ref::<Arc<dyn RowMapper<T>>>().cloned())
    }

    pub fn fork(&self) -> Self {
        Self {
            inner: self.inner.fork(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of column mappers, newest registration first.
pub struct ColumnMappers {
    inner: FactoryRegistry<dyn MapperFactory, ErasedMapper>,
}

impl Default for ColumnMappers {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnMappers {
    pub fn new() -> Self {
        Self {
            inner: FactoryRegistry::new(vec![Arc::new(BuiltinColumnMappers)]),
        }
    }

    pub fn register<T: 'static, M: ColumnMapper<T> + 'static>(&self, mapper: M) {
        let mapper: Arc<dyn ColumnMapper<T>> = Arc::new(mapper);
        self.inner.register(Arc::new(SingleTypeFactory {
            target: TypeId::of::<T>(),
            mapper: erase_column(mapper),
        }));
    }

    pub fn register_factory<F: MapperFactory + 'static>(&self, factory: F) {
        self.inner.register(Arc::new(factory));
    }

    pub fn find<T: 'static>(&self) -> Option<Arc<dyn ColumnMapper<T>>> {
        resolve(&self.inner, TypeId::of::<T>())
            .and_then(|m| m.downcast_ref::<Arc<dyn ColumnMapper<T>>>().cloned())
    }

    pub fn fork(&self) -> Self {
        Self {
            inner: self.inner.fork(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn resolve(
    registry: &FactoryRegistry<dyn MapperFactory, ErasedMapper>,
    target: TypeId,
) -> Option<ErasedMapper> {
    if let Some(mapper) = registry.cached(target) {
        return Some(mapper);
    }

    let factories = registry.snapshot();
    let mapper = factories.iter().find_map(|f| f.build(target))?;
    registry.store(target, mapper.clone(), &factories);
    Some(mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{driver::VecResultSet, registry::Registries};

    fn ctx() -> StatementContext {
        StatementContext::new("select 1", Arc::new(Registries::new()))
    }

    fn result_set() -> VecResultSet {
        let mut rs = VecResultSet::new(
            vec!["ID".into(), "name".into(), "born".into()],
            vec![vec![
                Value::Int(7),
                Value::Text("ada".into()),
                Value::Text("1815-12-10".into()),
            ]],
        );
        rs.next().unwrap();
        rs
    }

    #[derive(Debug, PartialEq)]
    struct Person {
        id: i64,
        name: String,
    }

    impl FromRow for Person {
        fn from_row(row: &Row<'_>) -> Result<Self, MappingError> {
            Ok(Self {
                id: row.get("id")?,
                name: row.get("name")?,
            })
        }
    }

    #[test]
    fn test_row_access() {
        let rs = result_set();
        let row = Row::new(&rs);

        assert_eq!(row.index_of("id"), Some(0));
        assert_eq!(row.get::<i32, _>(0).unwrap(), 7);
        assert_eq!(row.get::<String, _>("NAME").unwrap(), "ada");
        assert_eq!(
            row.get::<NaiveDate, _>("born").unwrap(),
            NaiveDate::from_ymd_opt(1815, 12, 10).unwrap()
        );
        assert!(matches!(
            row.get::<i64, _>("name"),
            Err(MappingError::Conversion { .. })
        ));
        assert!(matches!(
            row.get::<i64, _>("missing"),
            Err(MappingError::ColumnNotFound(_))
        ));
        assert!(matches!(
            row.get::<i64, _>(5),
            Err(MappingError::IndexOutOfRange { index: 5, count: 3 })
        ));
    }

    #[test]
    fn test_row_map() {
        let rs = result_set();
        let map = RowMap::from_row(&Row::new(&rs)).unwrap();
        assert_eq!(map.get("id"), Some(&Value::Int(7)));
        assert_eq!(map.to_string(), "{ID=7, name=ada, born=1815-12-10}");
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!({"ID": 7, "name": "ada", "born": "1815-12-10"})
        );
    }

    #[test]
    fn test_builtin_column_mappers() {
        let mappers = ColumnMappers::new();
        let rs = result_set();
        let row = Row::new(&rs);
        let ctx = ctx();

        let mapper = mappers.find::<Option<i64>>().unwrap();
        assert_eq!(mapper.map(&row, 0, &ctx).unwrap(), Some(7));
        assert!(mappers.find::<Person>().is_none());
    }

    #[test]
    fn test_row_mapper_falls_back_to_column_mapper() {
        let registries = Registries::new();
        let rs = result_set();
        let row = Row::new(&rs);

        let mapper = registries.row_mapper::<i64>().unwrap();
        assert_eq!(mapper.map(&row, &ctx()).unwrap(), 7);
        assert!(registries.row_mapper::<Person>().is_none());
    }

    #[test]
    fn test_registered_mapper_replaces_cached_one() {
        let mappers = RowMappers::new();
        mappers.register_from_row::<Person>();

        let rs = result_set();
        let row = Row::new(&rs);
        let ctx = ctx();

        let first = mappers.find::<Person>().unwrap();
        assert_eq!(first.map(&row, &ctx).unwrap().name, "ada");

        mappers.register::<Person, _>(|row: &Row<'_>| -> Result<Person, MappingError> {
            Ok(Person {
                id: row.get("id")?,
                name: "replaced".into(),
            })
        });

        let second = mappers.find::<Person>().unwrap();
        assert_eq!(second.map(&row, &ctx).unwrap().name, "replaced");
    }

    #[test]
    fn test_closure_column_mapper() {
        let mappers = ColumnMappers::new();
        mappers.register::<String, _>(|value: &Value| -> Result<String, MappingError> {
            Ok(format!("<{value}>"))
        });

        let rs = result_set();
        let row = Row::new(&rs);
        let mapper = mappers.find::<String>().unwrap();
        assert_eq!(mapper.map(&row, 1, &ctx()).unwrap(), "<ada>");
    }
}
