//! Copy-on-write factory lists with a per-type resolution cache.

use std::{
    any::TypeId,
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    argument::ArgumentFactories,
    mapper::{ColumnMapper, ColumnMappers, RowMapper, RowMappers, SingleColumnRowMapper},
};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Ordered factories consulted first-match-wins, newest first.
///
/// Registration swaps in a new list and clears the cache. A resolution
/// racing with a registration only stores its result if the list it
/// searched is still current.
pub(crate) struct FactoryRegistry<F: ?Sized, V> {
    factories: RwLock<Arc<Vec<Arc<F>>>>,
    cache: RwLock<HashMap<TypeId, V>>,
}

impl<F: ?Sized, V: Clone> FactoryRegistry<F, V> {
    pub(crate) fn new(factories: Vec<Arc<F>>) -> Self {
        Self {
            factories: RwLock::new(Arc::new(factories)),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<F>>> {
        read(&self.factories).clone()
    }

    pub(crate) fn register(&self, factory: Arc<F>) {
        {
            let mut factories = write(&self.factories);
            let mut updated = Vec::with_capacity(factories.len() + 1);
            updated.push(factory);
            updated.extend(factories.iter().cloned());
            *factories = Arc::new(updated);
        }
        write(&self.cache).clear();
    }

    pub(crate) fn cached(&self, target: TypeId) -> Option<V> {
        read(&self.cache).get(&target).cloned()
    }

    pub(crate) fn store(&self, target: TypeId, value: V, searched: &Arc<Vec<Arc<F>>>) {
        let mut cache = write(&self.cache);
        let current = read(&self.factories);
        if Arc::ptr_eq(&*current, searched) {
            cache.insert(target, value);
        }
    }

    pub(crate) fn fork(&self) -> Self {
        let cache = read(&self.cache).clone();
        Self {
            factories: RwLock::new(self.snapshot()),
            cache: RwLock::new(cache),
        }
    }

    pub(crate) fn len(&self) -> usize {
        read(&self.factories).len()
    }

    pub(crate) fn cache_len(&self) -> usize {
        read(&self.cache).len()
    }
}

/// The argument, row mapper and column mapper registries of a `Dbi` or
/// `Handle`.
pub struct Registries {
    pub arguments: ArgumentFactories,
    pub row_mappers: RowMappers,
    pub column_mappers: ColumnMappers,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    pub fn new() -> Self {
        Self {
            arguments: ArgumentFactories::new(),
            row_mappers: RowMappers::new(),
            column_mappers: ColumnMappers::new(),
        }
    }

    /// Snapshots every registry. Later registrations on either side are not
    /// visible to the other.
    pub fn fork(&self) -> Self {
        Self {
            arguments: self.arguments.fork(),
            row_mappers: self.row_mappers.fork(),
            column_mappers: self.column_mappers.fork(),
        }
    }

    /// Resolves a row mapper for `T`, falling back to a column mapper applied
    /// to the first column.
    pub fn row_mapper<T: 'static>(&self) -> Option<Arc<dyn RowMapper<T>>> {
        if let Some(mapper) = self.row_mappers.find::<T>() {
            return Some(mapper);
        }
        self.column_mappers
            .find::<T>()
            .map(|column| Arc::new(SingleColumnRowMapper::new(column)) as Arc<dyn RowMapper<T>>)
    }

    pub fn column_mapper<T: 'static>(&self) -> Option<Arc<dyn ColumnMapper<T>>> {
        self.column_mappers.find::<T>()
    }
}

impl fmt::Debug for Registries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registries")
            .field("arguments", &self.arguments.len())
            .field("row_mappers", &self.row_mappers.len())
            .field("column_mappers", &self.column_mappers.len())
            .finish()
    }
}
