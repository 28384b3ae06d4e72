//! Stored procedure calls with output parameters.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use sqlbind_events::StatementKind;

use crate::{
    argument::Argument,
    context::StatementContext,
    driver::{DriverError, DriverResult, PreparedStatement},
    error::Result,
    handle::Handle,
    mapper::FromValue,
    rewriter::Slot,
    statement::{delegate_statement, SqlStatement},
    value::{SqlType, Value},
};

/// Reads an output parameter at a 1-based position after the call ran.
pub type OutExtractor =
    Arc<dyn Fn(&mut dyn PreparedStatement, usize) -> DriverResult<Value> + Send + Sync>;

/// Registers an output parameter when bound.
struct OutParamArgument {
    sql_type: SqlType,
}

impl fmt::Debug for OutParamArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OUT {:?}", self.sql_type)
    }
}

impl Argument for OutParamArgument {
    fn apply(
        &self,
        position: usize,
        stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        stmt.register_out_parameter(position, self.sql_type)
    }
}

#[derive(Clone)]
enum OutTarget {
    Position(usize),
    Name(String),
}

#[derive(Clone)]
struct OutParam {
    target: OutTarget,
    sql_type: SqlType,
    extractor: Option<OutExtractor>,
}

/// Reads an output parameter and converts it by the family of its
/// declared SQL type.
fn extract_default(
    stmt: &mut dyn PreparedStatement,
    position: usize,
    sql_type: SqlType,
) -> DriverResult<Value> {
    let value = stmt.out_parameter(position)?;
    if value.is_null() {
        return Ok(Value::Null(sql_type));
    }
    value.coerce(sql_type).ok_or_else(|| {
        DriverError::Failure(format!(
            "output parameter {position} cannot be read as {sql_type:?}"
        ))
    })
}

pub struct Call<'h> {
    base: SqlStatement<'h>,
    outs: Vec<OutParam>,
}

delegate_statement!(impl<'h> for Call<'h>);

impl<'h> Call<'h> {
    pub(crate) fn new(handle: &'h Handle, sql: &str) -> Self {
        Self {
            base: SqlStatement::new(handle, sql),
            outs: Vec::new(),
        }
    }

    /// Registers the output parameter at the 0-based `position`.
    pub fn register_out(self, position: usize, sql_type: SqlType) -> Self {
        self.push_out(OutTarget::Position(position), sql_type, None)
    }

    pub fn register_out_named(self, name: &str, sql_type: SqlType) -> Self {
        self.push_out(OutTarget::Name(name.to_string()), sql_type, None)
    }

    /// Registers an output parameter read by `extractor` instead of the
    /// type-driven default.
    pub fn register_out_with<F>(self, position: usize, sql_type: SqlType, extractor: F) -> Self
    where
        F: Fn(&mut dyn PreparedStatement, usize) -> DriverResult<Value> + Send + Sync + 'static,
    {
        self.push_out(OutTarget::Position(position), sql_type, Some(Arc::new(extractor)))
    }

    pub fn register_out_named_with<F>(self, name: &str, sql_type: SqlType, extractor: F) -> Self
    where
        F: Fn(&mut dyn PreparedStatement, usize) -> DriverResult<Value> + Send + Sync + 'static,
    {
        self.push_out(OutTarget::Name(name.to_string()), sql_type, Some(Arc::new(extractor)))
    }

    fn push_out(mut self, target: OutTarget, sql_type: SqlType, extractor: Option<OutExtractor>) -> Self {
        let argument: Arc<dyn Argument> = Arc::new(OutParamArgument {
            sql_type,
        });
        match target {
            OutTarget::Position(position) => self.base.binding_mut().add_positional(position, argument),
            OutTarget::Name(ref name) => self.base.binding_mut().add_named(name.clone(), argument),
        }
        self.outs.push(OutParam {
            target,
            sql_type,
            extractor,
        });
        self
    }

    /// Runs the call and collects every registered output parameter.
    pub fn invoke(self) -> Result<OutParameters> {
        let outs = self.outs;
        let (mut executed, _) = self.base.run(StatementKind::Call, |_, _| Ok(()), |stmt| {
            stmt.execute()?;
            Ok(())
        })?;

        let slots: Vec<Slot> = match executed.context().parsed() {
            Some(parsed) => parsed.slots().to_vec(),
            None => Vec::new(),
        };

        let mut params = OutParameters::default();
        let mut outcome = Ok(());
        for out in &outs {
            let (index, name) = match out.target {
                OutTarget::Position(index) => {
                    let name = match slots.get(index) {
                        Some(Slot::Named(name)) => Some(name.clone()),
                        _ => None,
                    };
                    (Some(index), name)
                }
                OutTarget::Name(ref name) => {
                    let index = slots
                        .iter()
                        .position(|slot| matches!(slot, Slot::Named(n) if n == name));
                    (index, Some(name.clone()))
                }
            };
            let Some(index) = index else {
                outcome = Err(executed.result_error(
                    &format!("Output parameter '{}' does not appear in the statement", name.unwrap_or_default()),
                    None,
                ));
                break;
            };

            let stmt = match executed.statement() {
                Ok(stmt) => stmt,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            };
            let read = match out.extractor {
                Some(ref extractor) => extractor(stmt, index + 1),
                None => extract_default(stmt, index + 1, out.sql_type),
            };
            match read {
                Ok(value) => params.insert(index, name, value),
                Err(err) => {
                    outcome = Err(executed.result_error(
                        &format!("Unable to read output parameter {}", index + 1),
                        Some(Box::new(err)),
                    ));
                    break;
                }
            }
        }

        executed.finish(outcome.map(|()| params))
    }
}

/// Output parameters of a call, by 0-based position and by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutParameters {
    by_position: BTreeMap<usize, Value>,
    by_name: HashMap<String, usize>,
}

impl OutParameters {
    fn insert(&mut self, index: usize, name: Option<String>, value: Value) {
        self.by_position.insert(index, value);
        if let Some(name) = name {
            self.by_name.insert(name, index);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.by_name
            .get(name)
            .and_then(|index| self.by_position.get(index))
    }

    pub fn get_at(&self, position: usize) -> Option<&Value> {
        self.by_position.get(&position)
    }

    /// Typed read by name; `None` when absent or not convertible.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(T::from_value)
    }

    pub fn get_at_as<T: FromValue>(&self, position: usize) -> Option<T> {
        self.get_at(position).and_then(T::from_value)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_as(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_as(name)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get_as(name)
    }

    pub fn get_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.get_as(name)
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }
}
