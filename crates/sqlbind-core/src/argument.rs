//! Arguments and the factories that turn bound values into them.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::{
    context::StatementContext,
    driver::{DriverError, DriverResult, PreparedStatement},
    registry::FactoryRegistry,
    value::{Decimal, SqlType, Value},
};

/// A bound value that knows how to write itself into a prepared statement.
pub trait Argument: Send + Sync + fmt::Debug {
    /// Writes the value at the 1-based `position`.
    fn apply(
        &self,
        position: usize,
        stmt: &mut dyn PreparedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<()>;

    /// Short rendering used in error context.
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Argument for a plain [`Value`]. Nulls are written with their SQL type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueArgument(pub Value);

impl Argument for ValueArgument {
    fn apply(
        &self,
        position: usize,
        stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        match self.0 {
            Value::Null(sql_type) => stmt.set_null(position, sql_type),
            ref value => stmt.set_value(position, value),
        }
    }

    fn describe(&self) -> String {
        match self.0 {
            Value::Text(ref s) => format!("'{s}'"),
            ref other => other.to_string(),
        }
    }
}

/// Placeholder for a value no factory could handle. Binding it fails.
#[derive(Debug, Clone)]
pub struct UnresolvedArgument {
    type_name: &'static str,
}

impl UnresolvedArgument {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
        }
    }
}

impl Argument for UnresolvedArgument {
    fn apply(
        &self,
        _position: usize,
        _stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        Err(DriverError::Failure(format!(
            "no argument factory registered for type {}",
            self.type_name
        )))
    }

    fn describe(&self) -> String {
        format!("<unresolved {}>", self.type_name)
    }
}

/// Turns a value of some runtime type into an [`Argument`].
pub trait ArgumentFactory: Send + Sync {
    fn build(&self, value: &dyn Any) -> Option<Arc<dyn Argument>>;
}

impl<F> ArgumentFactory for F
where
    F: Fn(&dyn Any) -> Option<Arc<dyn Argument>> + Send + Sync,
{
    fn build(&self, value: &dyn Any) -> Option<Arc<dyn Argument>> {
        self(value)
    }
}

/// Factory for one concrete type, converting it to a [`Value`].
pub struct TypedArgumentFactory<T, F> {
    convert: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> TypedArgumentFactory<T, F>
where
    T: 'static,
    F: Fn(&T) -> Value + Send + Sync,
{
    pub fn new(convert: F) -> Self {
        Self {
            convert,
            _marker: PhantomData,
        }
    }
}

impl<T, F> ArgumentFactory for TypedArgumentFactory<T, F>
where
    T: 'static,
    F: Fn(&T) -> Value + Send + Sync,
{
    fn build(&self, value: &dyn Any) -> Option<Arc<dyn Argument>> {
        value
            .downcast_ref::<T>()
            .map(|v| Arc::new(ValueArgument((self.convert)(v))) as Arc<dyn Argument>)
    }
}

macro_rules! builtin_values {
    ($value:ident; $($ty:ty => $null:expr),* $(,)?) => {
        $(
            if let Some(v) = $value.downcast_ref::<$ty>() {
                return Some(Value::from(v.clone()));
            }
            if let Some(v) = $value.downcast_ref::<Option<$ty>>() {
                return Some(match v {
                    Some(v) => Value::from(v.clone()),
                    None => Value::Null($null),
                });
            }
        )*
    };
}

/// Converts the primitive, string, byte and chrono types.
pub fn builtin_value(value: &dyn Any) -> Option<Value> {
    if let Some(v) = value.downcast_ref::<Value>() {
        return Some(v.clone());
    }
    if let Some(v) = value.downcast_ref::<&'static str>() {
        return Some(Value::Text((*v).to_string()));
    }
    if let Some(v) = value.downcast_ref::<Option<&'static str>>() {
        return Some(match v {
            Some(v) => Value::Text((*v).to_string()),
            None => Value::Null(SqlType::Varchar),
        });
    }

    builtin_values!(value;
        bool => SqlType::Boolean,
        i8 => SqlType::TinyInt,
        i16 => SqlType::SmallInt,
        i32 => SqlType::Integer,
        i64 => SqlType::BigInt,
        u8 => SqlType::SmallInt,
        u16 => SqlType::Integer,
        u32 => SqlType::BigInt,
        f32 => SqlType::Real,
        f64 => SqlType::Double,
        String => SqlType::Varchar,
        Vec<u8> => SqlType::VarBinary,
        Decimal => SqlType::Numeric,
        NaiveDate => SqlType::Date,
        NaiveTime => SqlType::Time,
        NaiveDateTime => SqlType::Timestamp,
    );

    None
}

struct BuiltinArgumentFactory;

impl ArgumentFactory for BuiltinArgumentFactory {
    fn build(&self, value: &dyn Any) -> Option<Arc<dyn Argument>> {
        builtin_value(value).map(|v| Arc::new(ValueArgument(v)) as Arc<dyn Argument>)
    }
}

/// Registry of [`ArgumentFactory`]s.
///
/// The most recently registered factory is consulted first; the built-in
/// conversions come last.
pub struct ArgumentFactories {
    inner: FactoryRegistry<dyn ArgumentFactory, Arc<dyn ArgumentFactory>>,
}

impl Default for ArgumentFactories {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgumentFactories {
    pub fn new() -> Self {
        Self {
            inner: FactoryRegistry::new(vec![Arc::new(BuiltinArgumentFactory)]),
        }
    }

    pub fn register<F: ArgumentFactory + 'static>(&self, factory: F) {
        self.inner.register(Arc::new(factory));
    }

    /// Registers a conversion for values of type `T`.
    pub fn register_for<T, F>(&self, convert: F)
    where
        T: 'static,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.register(TypedArgumentFactory::<T, F>::new(convert));
    }

    /// Finds an argument for `value`, or an [`UnresolvedArgument`] that
    /// fails when bound.
    pub fn build<T: Any>(&self, value: &T) -> Arc<dyn Argument> {
        self.build_dyn(value, type_name::<T>())
    }

    pub fn build_dyn(&self, value: &dyn Any, type_name: &'static str) -> Arc<dyn Argument> {
        let target = value.type_id();

        if let Some(factory) = self.inner.cached(target) {
            if let Some(arg) = factory.build(value) {
                return arg;
            }
        }

        let factories = self.inner.snapshot();
        for factory in factories.iter() {
            if let Some(arg) = factory.build(value) {
                self.inner.store(target, factory.clone(), &factories);
                return arg;
            }
        }

        Arc::new(UnresolvedArgument::new(type_name))
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

    pub(crate) fn cached_types(&self) -> usize {
        self.inner.cache_len()
    }

    pub(crate) fn is_cached<T: 'static>(&self) -> bool {
        self.inner.cached(TypeId::of::<T>()).is_some()
    }
}

/// A lazy source of named arguments consulted when a name has no direct
/// binding.
pub trait NamedArgumentFinder: Send + Sync + fmt::Debug {
    fn find(&self, name: &str, ctx: &StatementContext) -> Option<Arc<dyn Argument>>;
}

/// Named arguments backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MapArguments {
    values: HashMap<String, Value>,
    prefix: Option<String>,
}

impl MapArguments {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            prefix: None,
        }
    }

    /// Only answers names of the form `<prefix>.<key>`.
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl NamedArgumentFinder for MapArguments {
    fn find(&self, name: &str, _ctx: &StatementContext) -> Option<Arc<dyn Argument>> {
        let key = match self.prefix {
            Some(ref prefix) => name.strip_prefix(prefix.as_str())?.strip_prefix('.')?,
            None => name,
        };
        self.values
            .get(key)
            .map(|v| Arc::new(ValueArgument(v.clone())) as Arc<dyn Argument>)
    }
}

/// Named arguments read from the serialized fields of a value.
///
/// Nested fields are addressed with dots, e.g. `address.city`.
#[derive(Debug, Clone)]
pub struct BeanArguments {
    bean: serde_json::Value,
    prefix: Option<String>,
}

impl BeanArguments {
    pub fn new<T: Serialize>(bean: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            bean: serde_json::to_value(bean)?,
            prefix: None,
        })
    }

    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl NamedArgumentFinder for BeanArguments {
    fn find(&self, name: &str, _ctx: &StatementContext) -> Option<Arc<dyn Argument>> {
        let path = match self.prefix {
            Some(ref prefix) => name.strip_prefix(prefix.as_str())?.strip_prefix('.')?,
            None => name,
        };

        let mut current = &self.bean;
        for part in path.split('.') {
            current = current.as_object()?.get(part)?;
        }
        Some(Arc::new(ValueArgument(Value::from_json(current))))
    }
}
