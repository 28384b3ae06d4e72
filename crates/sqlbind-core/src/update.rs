//! Statements returning an update count, optionally with generated keys.

use std::{any::type_name, sync::Arc};

use sqlbind_events::StatementKind;

use crate::{
    driver::GeneratedKeys,
    error::Result,
    handle::Handle,
    mapper::{MappingError, RowMap, RowMapper},
    query::{ResultIter, Rows},
    statement::{delegate_statement, Executed, FoldController, SqlStatement},
};

pub struct Update<'h> {
    base: SqlStatement<'h>,
}

delegate_statement!(impl<'h> for Update<'h>);

impl<'h> Update<'h> {
    pub(crate) fn new(handle: &'h Handle, sql: &str) -> Self {
        Self {
            base: SqlStatement::new(handle, sql),
        }
    }

    /// Runs the statement and returns the driver's update count.
    pub fn execute(self) -> Result<u64> {
        let (executed, count) = self.base.run(StatementKind::Update, |_, _| Ok(()), |stmt| {
            stmt.execute()?;
            Ok(stmt.update_count().unwrap_or(0))
        })?;
        executed.finish(Ok(count))
    }

    /// Runs the statement requesting generated keys.
    ///
    /// With no `columns` the driver returns its own notion of generated
    /// keys; otherwise exactly the named columns are requested.
    pub fn execute_and_return_generated_keys<I, S>(mut self, columns: I) -> Result<GeneratedKeyRows<'h>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base
            .context_mut()
            .set_generated_keys(GeneratedKeys::columns(columns));
        let (mut executed, count) = self.base.run(StatementKind::Update, |_, _| Ok(()), |stmt| {
            stmt.execute()?;
            Ok(stmt.update_count().unwrap_or(0))
        })?;
        if let Err(err) = executed.open_generated_keys() {
            return executed.finish(Err(err));
        }
        Ok(GeneratedKeyRows {
            executed,
            update_count: count,
            mapper: None,
        })
    }
}

/// Generated keys of an executed update, mapped like query rows.
pub struct GeneratedKeyRows<'h, T = RowMap> {
    executed: Executed<'h>,
    update_count: u64,
    mapper: Option<Arc<dyn RowMapper<T>>>,
}

impl<'h, T: 'static> GeneratedKeyRows<'h, T> {
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn map_to<U: 'static>(self) -> GeneratedKeyRows<'h, U> {
        GeneratedKeyRows {
            executed: self.executed,
            update_count: self.update_count,
            mapper: None,
        }
    }

    pub fn map<U, M: RowMapper<U> + 'static>(self, mapper: M) -> GeneratedKeyRows<'h, U> {
        GeneratedKeyRows {
            executed: self.executed,
            update_count: self.update_count,
            mapper: Some(Arc::new(mapper)),
        }
    }

    fn rows(self) -> Result<Rows<'h, T>> {
        let mapper = match self.mapper {
            Some(mapper) => mapper,
            None => match self.executed.context().registries().row_mapper::<T>() {
                Some(mapper) => mapper,
                None => {
                    let err = self.executed.result_error(
                        &format!("No row mapper registered for {}", type_name::<T>()),
                        Some(Box::new(MappingError::NoMapper(type_name::<T>()))),
                    );
                    return self.executed.finish(Err(err));
                }
            },
        };
        Ok(Rows::new(self.executed, mapper))
    }

    pub fn list(self) -> Result<Vec<T>> {
        self.rows()?.list(None)
    }

    pub fn first(self) -> Result<Option<T>> {
        self.rows()?.first()
    }

    pub fn iter(self) -> Result<ResultIter<'h, T>> {
        Ok(self.rows()?.iter())
    }

    pub fn fold<A, F>(self, init: A, step: F) -> Result<A>
    where
        F: FnMut(A, T, &mut FoldController) -> std::result::Result<A, MappingError>,
    {
        self.rows()?.fold(init, step)
    }
}
