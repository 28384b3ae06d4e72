//! Method handlers: what runs when a SQL object method is called.

use std::sync::Arc;

use sqlbind_core::{
    argument::ValueArgument, Bindable, Configurable, DbiError, Handle, MapArguments, MethodInfo,
    Result, Value,
};

use crate::{
    args::{Arg, Args, Outcome},
    definition::{BatchSpec, CallSpec, ParamSpec, QuerySpec, Returns, UpdateSpec},
    object::SqlObjectType,
};

/// Runs one method call against the handle of an [`Invocation`].
pub trait Handler: Send + Sync {
    fn invoke(&self, invocation: &Invocation<'_>, args: &Args) -> Result<Outcome>;
}

impl<F> Handler for F
where
    F: Fn(&Invocation<'_>, &Args) -> Result<Outcome> + Send + Sync,
{
    fn invoke(&self, invocation: &Invocation<'_>, args: &Args) -> Result<Outcome> {
        self(invocation, args)
    }
}

/// One method call in flight.
///
/// Calls made through [`Invocation::call`] run on the same handle, so
/// nested calls share its connection and any open transaction.
pub struct Invocation<'a> {
    object: &'a SqlObjectType,
    instance: u64,
    handle: &'a Handle,
    method: MethodInfo,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(object: &'a SqlObjectType, instance: u64, handle: &'a Handle, method: MethodInfo) -> Self {
        Self {
            object,
            instance,
            handle,
            method,
        }
    }

    pub fn handle(&self) -> &'a Handle {
        self.handle
    }

    pub fn method(&self) -> &MethodInfo {
        &self.method
    }

    /// Calls another method of the same object on this handle.
    pub fn call(&self, method: &str, args: Args) -> Result<Outcome> {
        self.object
            .dispatch(self.instance, self.handle, method, &args)
    }
}

fn check_arity(method: &MethodInfo, params: &[ParamSpec], args: &Args) -> Result<()> {
    if params.len() != args.len() {
        return Err(DbiError::configuration(format!(
            "{method} takes {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    Ok(())
}

fn wrong_arg(method: &MethodInfo, index: usize, expected: &str, arg: &Arg) -> DbiError {
    DbiError::configuration(format!(
        "{method}: argument {index} must be a {expected}, got a {}",
        arg.kind()
    ))
}

/// Binds one argument according to its parameter declaration.
fn bind_arg<B: Bindable>(target: B, method: &MethodInfo, index: usize, param: &ParamSpec, arg: &Arg) -> Result<B> {
    let bound = match (param, arg) {
        (ParamSpec::Bind(name), Arg::Value(value)) => target.bind_value(name, value.clone()),
        (ParamSpec::Bind(_), other) => return Err(wrong_arg(method, index, "value", other)),
        (ParamSpec::Positional, Arg::Value(value)) => {
            target.bind_pos_argument(index, Arc::new(ValueArgument(value.clone())))
        }
        (ParamSpec::Positional, other) => return Err(wrong_arg(method, index, "value", other)),
        (ParamSpec::BindBean(None), Arg::Bean(bean)) => target.bind_bean(bean),
        (ParamSpec::BindBean(Some(prefix)), Arg::Bean(bean)) => target.bind_bean_prefixed(prefix, bean),
        (ParamSpec::BindBean(_), other) => return Err(wrong_arg(method, index, "bean", other)),
        (
            ParamSpec::BindMap {
                keys,
                prefix,
            },
            Arg::Map(map),
        ) => {
            let arguments = if keys.is_empty() {
                MapArguments::new(map.clone())
            } else {
                MapArguments::new(keys.iter().map(|key| {
                    let value = map.get(key).cloned().unwrap_or(Value::NULL);
                    (key.clone(), value)
                }))
            };
            match prefix {
                Some(prefix) => target.bind_map(arguments.with_prefix(prefix.clone())),
                None => target.bind_map(arguments),
            }
        }
        (ParamSpec::BindMap { .. }, other) => return Err(wrong_arg(method, index, "map", other)),
        (ParamSpec::Define(_) | ParamSpec::ChunkSize, _) => target,
    };
    Ok(bound)
}

fn bind_args<B: Bindable>(mut target: B, method: &MethodInfo, params: &[ParamSpec], args: &Args) -> Result<B> {
    for (index, (param, arg)) in params.iter().zip(args.iter()).enumerate() {
        target = bind_arg(target, method, index, param, arg)?;
    }
    Ok(target)
}

fn apply_defines<'h, C: Configurable<'h>>(
    mut target: C,
    method: &MethodInfo,
    params: &[ParamSpec],
    args: &Args,
) -> Result<C> {
    for (index, (param, arg)) in params.iter().zip(args.iter()).enumerate() {
        if let ParamSpec::Define(name) = param {
            match arg {
                Arg::Value(value) => target = target.define(name.clone(), value.clone()),
                other => return Err(wrong_arg(method, index, "value", other)),
            }
        }
    }
    Ok(target)
}

pub(crate) struct QueryHandler {
    pub spec: QuerySpec,
    pub params: Vec<ParamSpec>,
}

impl Handler for QueryHandler {
    fn invoke(&self, invocation: &Invocation<'_>, args: &Args) -> Result<Outcome> {
        let method = invocation.method();
        check_arity(method, &self.params, args)?;
        let mut query = invocation
            .handle()
            .create_query(&self.spec.sql)
            .on_behalf_of(method.clone());
        if let Some(rows) = self.spec.max_rows {
            query = query.max_rows(rows);
        }
        if let Some(rows) = self.spec.fetch_size {
            query = query.fetch_size(rows);
        }
        let query = apply_defines(query, method, &self.params, args)?;
        let query = bind_args(query, method, &self.params, args)?;
        match self.spec.returns {
            Returns::List => query.list().map(Outcome::Rows),
            Returns::First => query.first().map(Outcome::Row),
        }
    }
}

pub(crate) struct UpdateHandler {
    pub spec: UpdateSpec,
    pub params: Vec<ParamSpec>,
}

impl Handler for UpdateHandler {
    fn invoke(&self, invocation: &Invocation<'_>, args: &Args) -> Result<Outcome> {
        let method = invocation.method();
        check_arity(method, &self.params, args)?;
        let update = invocation
            .handle()
            .create_update(&self.spec.sql)
            .on_behalf_of(method.clone());
        let update = apply_defines(update, method, &self.params, args)?;
        let update = bind_args(update, method, &self.params, args)?;
        match &self.spec.generated_keys {
            Some(columns) => update
                .execute_and_return_generated_keys(columns.iter().cloned())?
                .list()
                .map(Outcome::Keys),
            None => update.execute().map(Outcome::Count),
        }
    }
}

pub(crate) struct BatchHandler {
    pub spec: BatchSpec,
    pub params: Vec<ParamSpec>,
    /// Method chunk size, else the type's.
    pub chunk_size: Option<usize>,
}

impl BatchHandler {
    /// Number of parts: the length of the list arguments, which must agree.
    fn part_count(&self, method: &MethodInfo, args: &Args) -> Result<usize> {
        let mut count = None;
        for (param, arg) in self.params.iter().zip(args.iter()) {
            if matches!(param, ParamSpec::ChunkSize | ParamSpec::Define(_)) {
                continue;
            }
            if let Arg::List(items) = arg {
                match count {
                    None => count = Some(items.len()),
                    Some(n) if n != items.len() => {
                        return Err(DbiError::configuration(format!(
                            "{method}: list arguments differ in length ({n} and {})",
                            items.len()
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        count.ok_or_else(|| {
            DbiError::configuration(format!("{method}: a batch method needs at least one list argument"))
        })
    }

    fn explicit_chunk_size(&self, method: &MethodInfo, args: &Args) -> Result<Option<usize>> {
        for (index, (param, arg)) in self.params.iter().zip(args.iter()).enumerate() {
            if *param == ParamSpec::ChunkSize {
                return match arg {
                    Arg::Value(Value::Int(size)) => usize::try_from(*size).map(Some).map_err(|_| {
                        DbiError::configuration(format!("{method}: chunk size {size} is negative"))
                    }),
                    other => Err(wrong_arg(method, index, "integer", other)),
                };
            }
        }
        Ok(None)
    }
}

impl Handler for BatchHandler {
    fn invoke(&self, invocation: &Invocation<'_>, args: &Args) -> Result<Outcome> {
        let method = invocation.method();
        check_arity(method, &self.params, args)?;
        let parts = self.part_count(method, args)?;
        let chunk_size = self.explicit_chunk_size(method, args)?.or(self.chunk_size);

        let batch = invocation
            .handle()
            .prepare_batch(&self.spec.sql)
            .on_behalf_of(method.clone());
        let mut batch = apply_defines(batch, method, &self.params, args)?
            .transactional(self.spec.transactional);
        if let Some(size) = chunk_size {
            batch = batch.chunk_size(size);
        }

        for part in 0..parts {
            let row: Args = args
                .iter()
                .map(|arg| match arg {
                    Arg::List(items) => items[part].clone(),
                    other => other.clone(),
                })
                .collect();
            bind_args(batch.add(), method, &self.params, &row)?;
        }

        batch.execute().map(Outcome::Counts)
    }
}

pub(crate) struct CallHandler {
    pub spec: CallSpec,
    pub params: Vec<ParamSpec>,
}

impl Handler for CallHandler {
    fn invoke(&self, invocation: &Invocation<'_>, args: &Args) -> Result<Outcome> {
        let method = invocation.method();
        check_arity(method, &self.params, args)?;
        let mut call = invocation
            .handle()
            .create_call(&self.spec.sql)
            .on_behalf_of(method.clone());
        for (name, sql_type) in &self.spec.outs {
            call = call.register_out_named(name, *sql_type);
        }
        let call = apply_defines(call, method, &self.params, args)?;
        let call = bind_args(call, method, &self.params, args)?;
        call.invoke().map(Outcome::Out)
    }
}
