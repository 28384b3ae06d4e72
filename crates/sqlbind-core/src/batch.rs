//! One statement template executed with many bindings.

use std::sync::Arc;

use tracing::debug;

use crate::{
    binding::{bind_parsed, BindFailure, Binding},
    context::StatementContext,
    driver::{GeneratedKeys, PreparedStatement},
    error::{Cause, DbiError, Result},
    handle::Handle,
    mapper::RowMap,
    query::resolve_mapper,
    registry::Registries,
    rewriter::ParsedStatement,
    statement::{delegate_statement, execute, Bindable, Executed, Plan, SqlStatement, Step},
};

/// A batch of parts sharing one SQL template.
///
/// Arguments bound on the batch itself are defaults for every part. Parts
/// run in the order they were added, split into chunks of at most the
/// configured size; each chunk is one driver batch.
pub struct PreparedBatch<'h> {
    base: SqlStatement<'h>,
    parts: Vec<Binding>,
    chunk_size: Option<usize>,
    transactional: bool,
}

delegate_statement!(impl<'h> for PreparedBatch<'h>);

impl<'h> PreparedBatch<'h> {
    pub(crate) fn new(handle: &'h Handle, sql: &str) -> Self {
        Self {
            base: SqlStatement::new(handle, sql),
            parts: Vec::new(),
            chunk_size: None,
            transactional: false,
        }
    }

    /// Starts a new part and returns it for binding.
    pub fn add(&mut self) -> PreparedBatchPart<'_, 'h> {
        self.parts.push(Binding::new());
        let index = self.parts.len() - 1;
        PreparedBatchPart {
            batch: self,
            index,
        }
    }

    pub fn add_binding(&mut self, binding: Binding) -> &mut Self {
        self.parts.push(binding);
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Upper bound on parts per driver batch. Overrides the handle default.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Runs each chunk in its own transaction unless one is already open.
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    fn resolved_chunk_size(&self, explicit: Option<usize>) -> Result<Option<usize>> {
        match explicit
            .or(self.chunk_size)
            .or(self.base.handle().batch_chunk_size())
        {
            Some(0) => Err(DbiError::configuration("batch chunk size must be greater than 0")),
            size => Ok(size),
        }
    }

    /// Runs every part and returns the update counts in part order.
    pub fn execute(self) -> Result<Vec<i64>> {
        let size = self.resolved_chunk_size(None)?;
        self.run_chunks(size, GeneratedKeys::None, |_, counts| Ok(counts))
            .map(|chunks| chunks.into_iter().flatten().collect())
    }

    /// Runs the parts in chunks of at most `size`, concatenating the
    /// update counts in chunk order.
    pub fn execute_chunked(self, size: usize) -> Result<Vec<i64>> {
        let size = self.resolved_chunk_size(Some(size))?;
        self.run_chunks(size, GeneratedKeys::None, |_, counts| Ok(counts))
            .map(|chunks| chunks.into_iter().flatten().collect())
    }

    /// Runs every part requesting generated keys and maps them as
    /// [`RowMap`]s.
    pub fn execute_and_generate_keys<I, S>(self, columns: I) -> Result<Vec<RowMap>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute_and_generate_keys_as::<RowMap, _, _>(columns)
    }

    /// Runs every part requesting generated keys, mapping them to `T`.
    pub fn execute_and_generate_keys_as<T: 'static, I, S>(self, columns: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let size = self.resolved_chunk_size(None)?;
        let mapper = resolve_mapper::<T>(&self.base)?;
        let chunks = self.run_chunks(size, GeneratedKeys::columns(columns), |executed, _| {
            if !executed.open_generated_keys()? {
                return Ok(Vec::new());
            }
            executed.fold(mapper.as_ref(), Vec::new(), |mut keys, key, _| {
                keys.push(key);
                Ok(keys)
            })
        })?;
        Ok(chunks.into_iter().flatten().collect())
    }

    fn run_chunks<R, F>(self, size: Option<usize>, keys: GeneratedKeys, mut collect: F) -> Result<Vec<R>>
    where
        F: FnMut(&mut Executed<'h>, Vec<i64>) -> Result<R>,
    {
        let PreparedBatch {
            mut base,
            parts,
            transactional,
            ..
        } = self;
        base.take_pending()?;
        if parts.is_empty() {
            return Ok(Vec::new());
        }

        let handle = base.handle();
        let customizers = base.all_customizers();
        let mut ctx = base.context().clone();
        ctx.set_generated_keys(keys);
        let defaults = base.binding().clone();
        let size = size.unwrap_or(parts.len());
        let chunks: Vec<&[Binding]> = parts.chunks(size).collect();
        debug!("executing batch of {} parts in {} chunk(s)", parts.len(), chunks.len());

        let mut results = Vec::with_capacity(chunks.len());
        for (number, chunk) in chunks.into_iter().enumerate() {
            let offset = number * size;
            let mut run = || -> Result<R> {
                let plan = Plan {
                    step: Step::Batch {
                        parts: chunk.len(),
                    },
                    call: false,
                    arguments: describe_parts(chunk, offset, &defaults),
                    customizers: &customizers,
                };
                let (mut executed, counts) = execute(
                    handle,
                    ctx.clone(),
                    plan,
                    |stmt, parsed, ctx| bind_parts(chunk, offset, &defaults, stmt, parsed, ctx),
                    |_, _| Ok(()),
                    |stmt| stmt.execute_batch(),
                )?;
                let collected = collect(&mut executed, counts);
                executed.finish(collected)
            };
            let result = if transactional && !handle.is_in_transaction() {
                handle.in_transaction(|_| run())
            } else {
                run()
            };
            results.push(result?);
        }
        Ok(results)
    }
}

fn bind_parts(
    parts: &[Binding],
    offset: usize,
    defaults: &Binding,
    stmt: &mut dyn PreparedStatement,
    parsed: &ParsedStatement,
    ctx: &StatementContext,
) -> std::result::Result<(), BindFailure> {
    for (index, part) in parts.iter().enumerate() {
        let part_number = offset + index;
        let merged = part.merged_with_defaults(defaults);
        bind_parsed(parsed, &merged, stmt, ctx).map_err(|failure| {
            BindFailure::InPart {
                part: part_number,
                failure: Box::new(failure),
            }
        })?;
        stmt.add_batch().map_err(|source| {
            BindFailure::AddBatch {
                part: part_number,
                source,
            }
        })?;
    }
    Ok(())
}

fn describe_parts(parts: &[Binding], offset: usize, defaults: &Binding) -> Vec<String> {
    let mut out: Vec<String> = parts
        .iter()
        .enumerate()
        .map(|(index, part)| format!("part {}: {:?}", offset + index, part))
        .collect();
    if !defaults.is_empty() {
        out.push(format!("defaults: {defaults:?}"));
    }
    out
}

/// One part of a [`PreparedBatch`], bound like a statement.
pub struct PreparedBatchPart<'b, 'h> {
    batch: &'b mut PreparedBatch<'h>,
    index: usize,
}

impl Bindable for PreparedBatchPart<'_, '_> {
    fn binding_mut(&mut self) -> &mut Binding {
        &mut self.batch.parts[self.index]
    }

    fn registries(&self) -> &Arc<Registries> {
        self.batch.base.context().registries()
    }

    fn defer(&mut self, message: &str, cause: Cause) {
        self.batch.base.defer(message, cause);
    }
}
