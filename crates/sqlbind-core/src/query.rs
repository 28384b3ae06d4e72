//! Statements returning rows.

use std::{any::type_name, marker::PhantomData, sync::Arc};

use sqlbind_events::StatementKind;

use crate::{
    error::{DbiError, Result},
    handle::Handle,
    mapper::{ColumnMapper, MappingError, RowMap, RowMapper, SingleColumnRowMapper},
    statement::{delegate_statement, Executed, FoldController, SqlStatement},
};

/// A query whose rows are mapped to `T`, [`RowMap`] unless told otherwise.
///
/// The mapper is either given explicitly with [`map`](Query::map) and
/// [`map_column`](Query::map_column) or resolved from the registries when
/// the query runs.
pub struct Query<'h, T = RowMap> {
    base: SqlStatement<'h>,
    mapper: Option<Arc<dyn RowMapper<T>>>,
}

delegate_statement!(impl<'h, T> for Query<'h, T>);

impl<'h> Query<'h, RowMap> {
    pub(crate) fn new(handle: &'h Handle, sql: &str) -> Self {
        Self {
            base: SqlStatement::new(handle, sql),
            mapper: None,
        }
    }
}

impl<'h, T: 'static> Query<'h, T> {
    /// Maps rows through whatever the registries resolve for `U`.
    pub fn map_to<U: 'static>(self) -> Query<'h, U> {
        Query {
            base: self.base,
            mapper: None,
        }
    }

    pub fn map<U, M>(self, mapper: M) -> Query<'h, U>
    where
        M: RowMapper<U> + 'static,
    {
        Query {
            base: self.base,
            mapper: Some(Arc::new(mapper)),
        }
    }

    /// Maps the first column of each row.
    pub fn map_column<U: 'static, M>(self, mapper: M) -> Query<'h, U>
    where
        M: ColumnMapper<U> + 'static,
    {
        Query {
            base: self.base,
            mapper: Some(Arc::new(SingleColumnRowMapper::new(Arc::new(mapper)))),
        }
    }

    fn run(self, limit_one: bool) -> Result<Rows<'h, T>> {
        let mapper = match self.mapper {
            Some(mapper) => mapper,
            None => resolve_mapper::<T>(&self.base)?,
        };
        let (mut executed, _) = self.base.run(
            StatementKind::Query,
            |stmt, _| if limit_one { stmt.set_max_rows(1) } else { Ok(()) },
            |stmt| stmt.execute(),
        )?;
        if let Err(err) = executed.open_results() {
            return executed.finish(Err(err));
        }
        Ok(Rows::new(executed, mapper))
    }

    /// Reads every row.
    pub fn list(self) -> Result<Vec<T>> {
        self.run(false)?.list(None)
    }

    /// Reads at most `max` rows.
    pub fn list_max(self, max: usize) -> Result<Vec<T>> {
        self.run(false)?.list(Some(max))
    }

    /// Reads the first row, hinting the driver that one row is enough.
    pub fn first(self) -> Result<Option<T>> {
        self.run(true)?.first()
    }

    /// Returns a lazy cursor over the rows.
    pub fn iter(self) -> Result<ResultIter<'h, T>> {
        Ok(self.run(false)?.iter())
    }

    /// Threads an accumulator through every row. The controller can stop
    /// the fold before the next row is read.
    pub fn fold<A, F>(self, init: A, step: F) -> Result<A>
    where
        F: FnMut(A, T, &mut FoldController) -> std::result::Result<A, MappingError>,
    {
        self.run(false)?.fold(init, step)
    }
}

pub(crate) fn resolve_mapper<T: 'static>(base: &SqlStatement<'_>) -> Result<Arc<dyn RowMapper<T>>> {
    base.context()
        .registries()
        .row_mapper::<T>()
        .ok_or_else(|| {
            DbiError::result_set(
                format!("No row mapper registered for {}", type_name::<T>()),
                base.context().snapshot(base.binding().describe()),
                Some(Box::new(MappingError::NoMapper(type_name::<T>()))),
            )
        })
}

/// An executed statement with an open result set and the mapper for it.
pub(crate) struct Rows<'h, T> {
    executed: Executed<'h>,
    mapper: Arc<dyn RowMapper<T>>,
}

impl<'h, T> Rows<'h, T> {
    pub(crate) fn new(executed: Executed<'h>, mapper: Arc<dyn RowMapper<T>>) -> Self {
        Self {
            executed,
            mapper,
        }
    }

    pub(crate) fn fold<A, F>(self, init: A, step: F) -> Result<A>
    where
        F: FnMut(A, T, &mut FoldController) -> std::result::Result<A, MappingError>,
    {
        let Rows {
            mut executed,
            mapper,
        } = self;
        let outcome = executed.fold(mapper.as_ref(), init, step);
        executed.finish(outcome)
    }

    pub(crate) fn list(self, max: Option<usize>) -> Result<Vec<T>> {
        if max == Some(0) {
            return self.executed.finish(Ok(Vec::new()));
        }
        self.fold(Vec::new(), |mut rows, row, control| {
            rows.push(row);
            if max.is_some_and(|max| rows.len() >= max) {
                control.abort();
            }
            Ok(rows)
        })
    }

    pub(crate) fn first(self) -> Result<Option<T>> {
        self.fold(None, |_, row, control| {
            control.abort();
            Ok(Some(row))
        })
    }

    pub(crate) fn iter(self) -> ResultIter<'h, T> {
        ResultIter {
            executed: Some(self.executed),
            mapper: self.mapper,
            _marker: PhantomData,
        }
    }
}

/// Forward-only cursor over mapped rows.
///
/// Resources are released when the rows run out, when a row fails, on
/// [`close`](ResultIter::close), or when the cursor is dropped.
pub struct ResultIter<'h, T> {
    executed: Option<Executed<'h>>,
    mapper: Arc<dyn RowMapper<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResultIter<'_, T> {
    pub fn is_closed(&self) -> bool {
        self.executed.is_none()
    }

    pub fn close(mut self) -> Result<()> {
        match self.executed.take() {
            Some(executed) => executed.finish(Ok(())),
            None => Ok(()),
        }
    }
}

impl<T> Iterator for ResultIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let executed = self.executed.as_mut()?;
        let outcome = match executed.advance() {
            Ok(true) => executed.map_current(self.mapper.as_ref()),
            Ok(false) => {
                let executed = self.executed.take()?;
                return executed.finish(Ok(())).err().map(Err);
            }
            Err(err) => Err(err),
        };
        match outcome {
            Ok(item) => Some(Ok(item)),
            Err(err) => {
                let executed = self.executed.take()?;
                Some(executed.finish(Err(err)))
            }
        }
    }
}
