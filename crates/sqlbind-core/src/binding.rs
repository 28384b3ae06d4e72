//! Positional and named arguments collected for one statement execution.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use crate::{
    argument::{Argument, NamedArgumentFinder},
    context::StatementContext,
    driver::{DriverError, PreparedStatement},
    rewriter::{ParsedStatement, Slot},
};

/// Arguments keyed by 0-based position and by name, plus lazy finders
/// consulted in order when a name has no direct entry.
///
/// Positions and names are independent namespaces. A named slot falls back
/// to the positional argument at its slot index.
#[derive(Clone, Default)]
pub struct Binding {
    positionals: BTreeMap<usize, Arc<dyn Argument>>,
    named: HashMap<String, Arc<dyn Argument>>,
    finders: Vec<Arc<dyn NamedArgumentFinder>>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_positional(&mut self, position: usize, argument: Arc<dyn Argument>) {
        self.positionals.insert(position, argument);
    }

    pub fn add_named<N: Into<String>>(&mut self, name: N, argument: Arc<dyn Argument>) {
        self.named.insert(name.into(), argument);
    }

    pub fn add_finder(&mut self, finder: Arc<dyn NamedArgumentFinder>) {
        self.finders.push(finder);
    }

    pub fn positional(&self, position: usize) -> Option<&Arc<dyn Argument>> {
        self.positionals.get(&position)
    }

    /// Direct named entry first, then each finder in registration order.
    pub fn named(&self, name: &str, ctx: &StatementContext) -> Option<Arc<dyn Argument>> {
        if let Some(arg) = self.named.get(name) {
            return Some(arg.clone());
        }
        self.finders.iter().find_map(|finder| finder.find(name, ctx))
    }

    pub fn is_empty(&self) -> bool {
        self.positionals.is_empty() && self.named.is_empty() && self.finders.is_empty()
    }

    pub fn clear(&mut self) {
        self.positionals.clear();
        self.named.clear();
        self.finders.clear();
    }

    /// Returns a binding where entries of `self` win over `defaults`.
    pub fn merged_with_defaults(&self, defaults: &Binding) -> Binding {
        let mut merged = defaults.clone();
        merged
            .positionals
            .extend(self.positionals.iter().map(|(k, v)| (*k, v.clone())));
        merged
            .named
            .extend(self.named.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut finders = self.finders.clone();
        finders.extend(defaults.finders.iter().cloned());
        merged.finders = finders;
        merged
    }

    /// Renders the direct entries for error context. Finders are not
    /// enumerated.
    pub fn describe(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .positionals
            .iter()
            .map(|(pos, arg)| format!("{pos}:{}", arg.describe()))
            .collect();
        let mut named: Vec<_> = self.named.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        out.extend(
            named
                .into_iter()
                .map(|(name, arg)| format!("{name}:{}", arg.describe())),
        );
        if !self.finders.is_empty() {
            out.push(format!("<{} finder(s)>", self.finders.len()));
        }
        out
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}

/// Why a parameter could not be bound.
#[derive(Debug)]
pub enum BindFailure {
    Missing {
        name: Option<String>,
        position: usize,
    },
    Apply {
        name: Option<String>,
        position: usize,
        source: DriverError,
    },
    /// A failure while binding one part of a batch.
    InPart {
        part: usize,
        failure: Box<BindFailure>,
    },
    /// The driver rejected a completed batch part.
    AddBatch {
        part: usize,
        source: DriverError,
    },
}

impl BindFailure {
    fn label(name: &Option<String>, position: usize) -> String {
        match name {
            Some(name) => format!("named parameter '{name}' at position {position}"),
            None => format!("positional parameter {position}"),
        }
    }

    pub fn message(&self) -> String {
        match self {
            BindFailure::Missing {
                name,
                position,
            } => format!("Missing {}", Self::label(name, *position)),
            BindFailure::Apply {
                name,
                position,
                ..
            } => format!("Unable to bind {}", Self::label(name, *position)),
            BindFailure::InPart {
                part,
                failure,
            } => format!("{} in batch part {part}", failure.message()),
            BindFailure::AddBatch {
                part,
                ..
            } => format!("Unable to add batch part {part}"),
        }
    }

    pub fn into_source(self) -> Option<DriverError> {
        match self {
            BindFailure::Missing {
                ..
            } => None,
            BindFailure::Apply {
                source,
                ..
            }
            | BindFailure::AddBatch {
                source,
                ..
            } => Some(source),
            BindFailure::InPart {
                failure,
                ..
            } => failure.into_source(),
        }
    }
}

fn resolve(
    slot: &Slot,
    index: usize,
    binding: &Binding,
    ctx: &StatementContext,
) -> Option<Arc<dyn Argument>> {
    match slot {
        Slot::Named(name) => binding
            .named(name, ctx)
            .or_else(|| binding.positional(index).cloned()),
        Slot::Positional => binding.positional(index).cloned(),
    }
}

/// Writes every slot of `parsed` into `stmt` at its 1-based position.
pub fn bind_parsed(
    parsed: &ParsedStatement,
    binding: &Binding,
    stmt: &mut dyn PreparedStatement,
    ctx: &StatementContext,
) -> Result<(), BindFailure> {
    for (index, slot) in parsed.slots().iter().enumerate() {
        let position = index + 1;
        let name = match slot {
            Slot::Named(name) => Some(name.clone()),
            Slot::Positional => None,
        };
        let argument = resolve(slot, index, binding, ctx).ok_or_else(|| {
            BindFailure::Missing {
                name: name.clone(),
                position,
            }
        })?;
        argument
            .apply(position, stmt, ctx)
            .map_err(|source| {
                BindFailure::Apply {
                    name,
                    position,
                    source,
                }
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        argument::{MapArguments, ValueArgument},
        driver::{DriverResult, FetchDirection, ResultSet},
        registry::Registries,
        rewriter::{ColonPrefixRewriter, StatementRewriter},
        value::{SqlType, Value},
    };

    #[derive(Default)]
    struct Recorder {
        set: Vec<(usize, Value)>,
    }

    impl PreparedStatement for Recorder {
        fn set_value(&mut self, position: usize, value: &Value) -> DriverResult<()> {
            self.set.push((position, value.clone()));
            Ok(())
        }

        fn set_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
            self.set.push((position, Value::Null(sql_type)));
            Ok(())
        }

        fn clear_parameters(&mut self) -> DriverResult<()> {
            self.set.clear();
            Ok(())
        }

        fn add_batch(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
            Ok(vec![])
        }

        fn execute(&mut self) -> DriverResult<bool> {
            Ok(false)
        }

        fn result_set(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>> {
            Ok(None)
        }

        fn update_count(&self) -> Option<u64> {
            None
        }

        fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>> {
            Ok(None)
        }

        fn set_fetch_size(&mut self, _rows: u32) -> DriverResult<()> {
            Ok(())
        }

        fn set_max_rows(&mut self, _rows: u64) -> DriverResult<()> {
            Ok(())
        }

        fn set_query_timeout(&mut self, _timeout: std::time::Duration) -> DriverResult<()> {
            Ok(())
        }

        fn set_fetch_direction(&mut self, _direction: FetchDirection) -> DriverResult<()> {
            Ok(())
        }

        fn close(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    fn ctx() -> StatementContext {
        StatementContext::new("test", Arc::new(Registries::new()))
    }

    fn arg(v: impl Into<Value>) -> Arc<dyn Argument> {
        Arc::new(ValueArgument(v.into()))
    }

    #[test]
    fn test_named_binding_positions() {
        let parsed = ColonPrefixRewriter::new()
            .rewrite("select * from t where id = :id and name = :name")
            .unwrap();
        let mut binding = Binding::new();
        binding.add_named("name", arg("x"));
        binding.add_named("id", arg(5));

        let mut stmt = Recorder::default();
        bind_parsed(&parsed, &binding, &mut stmt, &ctx()).unwrap();
        assert_eq!(
            stmt.set,
            vec![(1, Value::Int(5)), (2, Value::Text("x".into()))]
        );
    }

    #[test]
    fn test_named_slot_falls_back_to_index() {
        let parsed = ColonPrefixRewriter::new()
            .rewrite("insert into t values (:a, :b)")
            .unwrap();
        let mut binding = Binding::new();
        binding.add_positional(0, arg(1));
        binding.add_named("b", arg(2));

        let mut stmt = Recorder::default();
        bind_parsed(&parsed, &binding, &mut stmt, &ctx()).unwrap();
        assert_eq!(stmt.set, vec![(1, Value::Int(1)), (2, Value::Int(2))]);
    }

    #[test]
    fn test_missing_parameter_is_reported_with_position() {
        let parsed = ColonPrefixRewriter::new()
            .rewrite("select * from t where a = :a and b = :b")
            .unwrap();
        let mut binding = Binding::new();
        binding.add_named("a", arg(1));

        let mut stmt = Recorder::default();
        let err = bind_parsed(&parsed, &binding, &mut stmt, &ctx()).unwrap_err();
        assert_eq!(err.message(), "Missing named parameter 'b' at position 2");
    }

    #[test]
    fn test_positional_only_missing_position_fails() {
        let parsed = ColonPrefixRewriter::new()
            .rewrite("select * from t where a = ? and b = ?")
            .unwrap();
        let mut binding = Binding::new();
        binding.add_positional(0, arg(1));

        let mut stmt = Recorder::default();
        let err = bind_parsed(&parsed, &binding, &mut stmt, &ctx()).unwrap_err();
        assert_eq!(err.message(), "Missing positional parameter 2");
    }

    #[test]
    fn test_finders_are_consulted_in_order() {
        let parsed = ColonPrefixRewriter::new()
            .rewrite("select :a, :b")
            .unwrap();
        let mut binding = Binding::new();
        binding.add_finder(Arc::new(MapArguments::new([("a", 1)])));
        binding.add_finder(Arc::new(MapArguments::new([("a", 9), ("b", 2)])));

        let mut stmt = Recorder::default();
        bind_parsed(&parsed, &binding, &mut stmt, &ctx()).unwrap();
        assert_eq!(stmt.set, vec![(1, Value::Int(1)), (2, Value::Int(2))]);
    }

    #[test]
    fn test_merged_with_defaults() {
        let mut defaults = Binding::new();
        defaults.add_named("tenant", arg(7));
        defaults.add_named("id", arg(0));

        let mut part = Binding::new();
        part.add_named("id", arg(3));

        let merged = part.merged_with_defaults(&defaults);
        let ctx = ctx();
        assert_eq!(merged.named("id", &ctx).unwrap().describe(), "3");
        assert_eq!(merged.named("tenant", &ctx).unwrap().describe(), "7");
    }
}
