use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

use serde::Serialize;
use sqlbind_core::{
    driver::{sqlite::SqliteConnectionFactory, Connection, DriverResult},
    events::{CollectorSink, SqlEvent},
    ConnectionFactory, Dbi, DbiError, FromRow, Handle, IsolationLevel, MappingError, MethodInfo, Result,
    Row, SqlType, Value,
};
use sqlbind_object::{
    Args, BatchSpec, CallSpec, Handler, HandlerDecorator, Invocation, MethodDef, Outcome, QuerySpec,
    SqlObject, SqlObjectDef, SqlObjectType, UpdateSpec,
};
use tempfile::tempdir;

const USERS: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    score REAL,
    tenant INTEGER
)";

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: String,
}

impl FromRow for User {
    fn from_row(row: &Row<'_>) -> std::result::Result<Self, MappingError> {
        Ok(User {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }
}

#[derive(Serialize)]
struct NewUser {
    id: i64,
    name: String,
    score: f64,
}

fn users_def() -> SqlObjectDef {
    SqlObjectDef::new("Users")
        .method(
            MethodDef::new("insert")
                .update(UpdateSpec::new("INSERT INTO users (id, name) VALUES (:id, :name)"))
                .bind("id")
                .bind("name"),
        )
        .method(
            MethodDef::new("insert_bean")
                .update(UpdateSpec::new(
                    "INSERT INTO users (id, name, score) VALUES (:u.id, :u.name, :u.score)",
                ))
                .bind_bean_prefixed("u"),
        )
        .method(
            MethodDef::new("insert_map")
                .update(UpdateSpec::new(
                    "INSERT INTO users (id, name, score) VALUES (:id, :name, :score)",
                ))
                .bind_map(["id", "name", "score"], None),
        )
        .method(
            MethodDef::new("insert_returning")
                .update(UpdateSpec::new("INSERT INTO users (name) VALUES (:name)").returning_keys(["id"]))
                .bind("name"),
        )
        .method(
            MethodDef::new("insert_all")
                .batch(BatchSpec::new(
                    "INSERT INTO users (id, name, tenant) VALUES (:id, :name, :tenant)",
                ))
                .bind("id")
                .bind("name")
                .bind("tenant"),
        )
        .method(
            MethodDef::new("find")
                .query(QuerySpec::new("SELECT id, name FROM users WHERE id = :id").first())
                .bind("id"),
        )
        .method(MethodDef::new("all").query(QuerySpec::new("SELECT id, name FROM users ORDER BY id")))
        .method(
            MethodDef::new("count_tenant")
                .query(QuerySpec::new("SELECT count(*) AS n FROM users WHERE tenant = ?").first())
                .positional(),
        )
        .method(
            MethodDef::new("score_of")
                .query(QuerySpec::new("SELECT score FROM users WHERE id = :id").first())
                .bind("id"),
        )
        .method(
            MethodDef::new("tally")
                .call(CallSpec::new("CALL tally(:n)").out("n", SqlType::Integer)),
        )
        .method(MethodDef::new("insert_pair").default_impl(
            |invocation: &Invocation<'_>, args: &Args| -> Result<Outcome> {
                invocation.call("insert", Args::new().value(1).value("first"))?;
                invocation.call("insert", Args::new().value(2).value("second"))?;
                match args.get(0) {
                    Some(sqlbind_object::Arg::Value(Value::Bool(true))) => {
                        Err(DbiError::configuration("second thoughts"))
                    }
                    _ => Ok(Outcome::Unit),
                }
            },
        ))
}

fn users() -> Arc<SqlObjectType> {
    SqlObjectType::resolve(users_def()).unwrap()
}

fn memory_handle(dbi: &Dbi) -> Handle {
    let handle = dbi.open().unwrap();
    handle.execute(USERS, &[]).unwrap();
    handle
}

fn sqlite() -> Dbi {
    Dbi::new(SqliteConnectionFactory::memory())
}

fn row_count(handle: &Handle) -> i64 {
    let rows = handle.select("SELECT count(*) AS n FROM users", &[]).unwrap();
    match rows[0].get("n") {
        Some(Value::Int(n)) => *n,
        other => panic!("unexpected count {other:?}"),
    }
}

#[test]
fn test_update_and_query_methods() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let inserted = object
        .call("insert", Args::new().value(1).value("ada"))
        .unwrap();
    assert_eq!(inserted, Outcome::Count(1));
    object
        .call("insert", Args::new().value(2).value("grace"))
        .unwrap();

    let found = object.call("find", Args::new().value(2)).unwrap();
    let row = found.into_row().unwrap().unwrap();
    assert_eq!(row.get("name"), Some(&Value::Text("grace".into())));

    let missing = object.call("find", Args::new().value(9)).unwrap();
    assert_eq!(missing, Outcome::Row(None));

    let all: Vec<User> = object.call("all", Args::new()).unwrap().decode().unwrap();
    assert_eq!(
        all,
        vec![
            User {
                id: 1,
                name: "ada".into()
            },
            User {
                id: 2,
                name: "grace".into()
            },
        ]
    );
}

#[test]
fn test_bean_map_and_positional_binding() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let bean = NewUser {
        id: 1,
        name: "ada".into(),
        score: 9.5,
    };
    object
        .call("insert_bean", Args::new().bean(&bean).unwrap())
        .unwrap();

    object
        .call(
            "insert_map",
            Args::new().map([
                ("id", Value::Int(2)),
                ("name", Value::Text("grace".into())),
                ("ignored", Value::Int(0)),
            ]),
        )
        .unwrap();

    let score = object
        .call("score_of", Args::new().value(1))
        .unwrap()
        .into_row()
        .unwrap()
        .unwrap();
    assert_eq!(score.get("score"), Some(&Value::Double(9.5)));

    let absent = object
        .call("score_of", Args::new().value(2))
        .unwrap()
        .into_row()
        .unwrap()
        .unwrap();
    assert!(absent.get("score").unwrap().is_null());

    handle
        .execute("UPDATE users SET tenant = 7", &[])
        .unwrap();
    let count = object
        .call("count_tenant", Args::new().value(7))
        .unwrap()
        .into_row()
        .unwrap()
        .unwrap();
    assert_eq!(count.get("n"), Some(&Value::Int(2)));
}

#[test]
fn test_generated_keys_method() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    object
        .call("insert", Args::new().value(4).value("ada"))
        .unwrap();
    let keys = object
        .call("insert_returning", Args::new().value("grace"))
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].get("id"), Some(&Value::Int(5)));
}

#[test]
fn test_batch_method_broadcasts_scalars() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let counts = object
        .call(
            "insert_all",
            Args::new()
                .values([1, 2, 3])
                .values(["a", "b", "c"])
                .value(7),
        )
        .unwrap()
        .into_counts()
        .unwrap();
    assert_eq!(counts, vec![1, 1, 1]);
    assert!(!handle.is_in_transaction());

    let tenant = object
        .call("count_tenant", Args::new().value(7))
        .unwrap()
        .into_row()
        .unwrap()
        .unwrap();
    assert_eq!(tenant.get("n"), Some(&Value::Int(3)));
}

#[test]
fn test_batch_method_needs_matching_lists() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let err = object
        .call(
            "insert_all",
            Args::new()
                .values([1, 2, 3])
                .values(["a", "b"])
                .value(7),
        )
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("differ in length"));

    let err = object
        .call("insert_all", Args::new().value(1).value("a").value(7))
        .unwrap_err();
    assert!(err.to_string().contains("at least one list argument"));
    assert_eq!(row_count(&handle), 0);
}

#[test]
fn test_argument_errors() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let err = object.call("find", Args::new()).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("Users::find takes 1 arguments, got 0"));

    let err = object
        .call("find", Args::new().map([("id", 1)]))
        .unwrap_err();
    assert!(err.to_string().contains("argument 0 must be a value, got a map"));

    let err = object.call("nope", Args::new()).unwrap_err();
    assert!(err.to_string().contains("Users has no method named 'nope'"));
}

#[test]
fn test_call_method_on_driver_without_calls() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let err = object.call("tally", Args::new()).unwrap_err();
    assert!(err.is_statement_creation());
}

#[test]
fn test_default_method_redispatches_on_same_handle() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let object = SqlObject::attach(users(), &handle);

    let outcome = object
        .call("insert_pair", Args::new().value(false))
        .unwrap();
    assert_eq!(outcome, Outcome::Unit);
    assert_eq!(row_count(&handle), 2);
}

#[test]
fn test_transactional_method_rolls_back() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let def = users_def().transactional(None);
    let object = SqlObject::attach(SqlObjectType::resolve(def).unwrap(), &handle);

    let err = object
        .call("insert_pair", Args::new().value(true))
        .unwrap_err();
    assert!(err.to_string().contains("second thoughts"));
    assert!(!handle.is_in_transaction());
    assert_eq!(row_count(&handle), 0);

    object
        .call("insert_pair", Args::new().value(false))
        .unwrap();
    assert_eq!(row_count(&handle), 2);
}

#[test]
fn test_nested_transactional_methods_share_transaction() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let def = SqlObjectDef::new("Nested")
        .method(
            MethodDef::new("insert")
                .update(UpdateSpec::new("INSERT INTO users (id, name) VALUES (:id, :name)"))
                .bind("id")
                .bind("name")
                .transactional(None),
        )
        .method(
            MethodDef::new("insert_then_fail")
                .transactional(None)
                .default_impl(|invocation: &Invocation<'_>, _args: &Args| -> Result<Outcome> {
                    invocation.call("insert", Args::new().value(1).value("a"))?;
                    assert!(invocation.handle().is_in_transaction());
                    Err(DbiError::configuration("abort"))
                }),
        );
    let object = SqlObject::attach(SqlObjectType::resolve(def).unwrap(), &handle);

    assert!(object.call("insert_then_fail", Args::new()).is_err());
    assert_eq!(row_count(&handle), 0);
}

#[test]
fn test_transactional_batch_method_commits_each_chunk() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let def = SqlObjectDef::new("Chunks").method(
        MethodDef::new("insert_all")
            .batch(BatchSpec::new("INSERT INTO users (id, name) VALUES (:id, :name)").chunk_size(2))
            .bind("id")
            .bind("name"),
    );
    let object = SqlObject::attach(SqlObjectType::resolve(def).unwrap(), &handle);

    let err = object
        .call(
            "insert_all",
            Args::new()
                .values([1, 2, 3, 3])
                .values(["a", "b", "c", "d"]),
        )
        .unwrap_err();
    assert!(err.is_statement_execution());
    assert!(!handle.is_in_transaction());
    assert_eq!(row_count(&handle), 2);
}

#[test]
fn test_nested_method_with_other_isolation_fails() {
    let dbi = sqlite();
    let handle = memory_handle(&dbi);
    let def = SqlObjectDef::new("Isolated")
        .method(
            MethodDef::new("insert_dirty")
                .update(UpdateSpec::new("INSERT INTO users (id, name) VALUES (:id, :name)"))
                .bind("id")
                .bind("name")
                .transactional(Some(IsolationLevel::ReadUncommitted)),
        )
        .method(
            MethodDef::new("insert_via")
                .transactional(None)
                .default_impl(|invocation: &Invocation<'_>, _args: &Args| -> Result<Outcome> {
                    invocation.call("insert_dirty", Args::new().value(1).value("a"))
                }),
        );
    let object = SqlObject::attach(SqlObjectType::resolve(def).unwrap(), &handle);

    let err = object.call("insert_via", Args::new()).unwrap_err();
    assert!(err.is_transaction());
    assert!(err.to_string().contains("isolation"));
    assert!(!handle.is_in_transaction());
    assert_eq!(row_count(&handle), 0);

    object
        .call("insert_dirty", Args::new().value(2).value("b"))
        .unwrap();
    assert_eq!(row_count(&handle), 1);
}

#[derive(Debug)]
struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl HandlerDecorator for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn decorate(&self, inner: Arc<dyn Handler>, _method: &MethodInfo) -> Arc<dyn Handler> {
        let name = self.name;
        let log = self.log.clone();
        Arc::new(move |invocation: &Invocation<'_>, args: &Args| -> Result<Outcome> {
            log.lock().unwrap().push(format!("enter {name}"));
            let outcome = inner.invoke(invocation, args);
            log.lock().unwrap().push(format!("exit {name}"));
            outcome
        })
    }
}

fn recorded(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Recording {
    Recording {
        name,
        log: log.clone(),
    }
}

fn body(log: &Arc<Mutex<Vec<String>>>) -> impl Handler {
    let log = log.clone();
    move |_: &Invocation<'_>, _: &Args| -> Result<Outcome> {
        log.lock().unwrap().push("body".into());
        Ok(Outcome::Unit)
    }
}

#[test]
fn test_decorator_order_first_is_outermost() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let def = SqlObjectDef::new("Ordered").method(
        MethodDef::new("ping")
            .decorate(recorded(&log, "a"))
            .decorate(recorded(&log, "b"))
            .decorate(recorded(&log, "c"))
            .decorator_order(["b", "c", "a"])
            .default_impl(body(&log)),
    );
    let dbi = sqlite();
    let handle = dbi.open().unwrap();
    let object = SqlObject::attach(SqlObjectType::resolve(def).unwrap(), &handle);

    object.call("ping", Args::new()).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["enter b", "enter c", "enter a", "body", "exit a", "exit c", "exit b"]
    );
}

#[test]
fn test_type_order_applies_when_method_has_none() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let def = SqlObjectDef::new("Ordered")
        .decorator_order(["c", "a"])
        .decorate(recorded(&log, "b"))
        .method(
            MethodDef::new("ping")
                .decorate(recorded(&log, "a"))
                .decorate(recorded(&log, "c"))
                .default_impl(body(&log)),
        );
    let dbi = sqlite();
    let handle = dbi.open().unwrap();
    let object = SqlObject::attach(SqlObjectType::resolve(def).unwrap(), &handle);

    object.call("ping", Args::new()).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["enter c", "enter a", "enter b", "body", "exit b", "exit a", "exit c"]
    );
}

fn chunk_parts(sink: &CollectorSink) -> Vec<usize> {
    sink.events()
        .iter()
        .filter_map(|event| {
            match event {
                SqlEvent::BatchExecuted {
                    parts,
                    ..
                } => Some(*parts),
                _ => None,
            }
        })
        .collect()
}

#[test]
fn test_chunk_size_precedence() {
    let sink = Arc::new(CollectorSink::default());
    let mut dbi = sqlite();
    dbi.set_event_sink_handle(sink.clone());
    dbi.set_batch_chunk_size(1).unwrap();
    let handle = memory_handle(&dbi);

    let insert = "INSERT INTO users (id, name) VALUES (:id, :name)";
    let typed = SqlObjectDef::new("Chunked")
        .chunk_size(4)
        .method(
            MethodDef::new("by_type")
                .batch(BatchSpec::new(insert))
                .bind("id")
                .bind("name"),
        )
        .method(
            MethodDef::new("by_method")
                .batch(BatchSpec::new(insert).chunk_size(2))
                .bind("id")
                .bind("name"),
        )
        .method(
            MethodDef::new("by_arg")
                .batch(BatchSpec::new(insert).chunk_size(2))
                .bind("id")
                .bind("name")
                .chunk_size_param(),
        );
    let untyped = SqlObjectDef::new("Unchunked").method(
        MethodDef::new("by_handle")
            .batch(BatchSpec::new(insert))
            .bind("id")
            .bind("name"),
    );
    let typed = SqlObject::attach(SqlObjectType::resolve(typed).unwrap(), &handle);
    let untyped = SqlObject::attach(SqlObjectType::resolve(untyped).unwrap(), &handle);

    let five = |base: i64| {
        Args::new()
            .values((base..base + 5).collect::<Vec<_>>())
            .values(["a", "b", "c", "d", "e"])
    };

    sink.clear();
    typed.call("by_type", five(10)).unwrap();
    assert_eq!(chunk_parts(&sink), vec![4, 1]);

    sink.clear();
    typed.call("by_method", five(20)).unwrap();
    assert_eq!(chunk_parts(&sink), vec![2, 2, 1]);

    sink.clear();
    typed.call("by_arg", five(30).value(3)).unwrap();
    assert_eq!(chunk_parts(&sink), vec![3, 2]);

    sink.clear();
    untyped.call("by_handle", five(40)).unwrap();
    assert_eq!(chunk_parts(&sink), vec![1, 1, 1, 1, 1]);

    let err = typed.call("by_arg", five(50).value(0)).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(row_count(&handle), 20);
}

fn counting_dbi(path: &Path) -> (Arc<Dbi>, Arc<AtomicUsize>) {
    let factory = SqliteConnectionFactory::file(path);
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = opens.clone();
    let dbi = Dbi::new(move || -> DriverResult<Box<dyn Connection>> {
        counter.fetch_add(1, Ordering::SeqCst);
        factory.open()
    });
    dbi.with_handle(|handle| handle.execute(USERS, &[]))
        .unwrap();
    opens.store(0, Ordering::SeqCst);
    (Arc::new(dbi), opens)
}

#[test]
fn test_on_demand_opens_per_call() {
    let dir = tempdir().unwrap();
    let (dbi, opens) = counting_dbi(&dir.path().join("users.db"));
    let object = SqlObject::on_demand(users(), dbi);

    object
        .call("insert", Args::new().value(1).value("ada"))
        .unwrap();
    assert!(!object.is_open());
    let found = object.call("find", Args::new().value(1)).unwrap();
    assert!(found.into_row().unwrap().is_some());
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_object_methods_need_no_handle() {
    let dir = tempdir().unwrap();
    let (dbi, opens) = counting_dbi(&dir.path().join("users.db"));
    let object = SqlObject::on_demand(users(), dbi);

    let text = object
        .call("to_string", Args::new())
        .unwrap()
        .into_value()
        .unwrap();
    assert_eq!(text, Value::Text(object.to_string()));

    let hash = object
        .call("hash_code", Args::new())
        .unwrap()
        .into_value()
        .unwrap();
    assert_eq!(hash, Value::Int(object.hash_code()));

    let same = object
        .call("equals", Args::new().value(object.hash_code()))
        .unwrap();
    assert_eq!(same, Outcome::Value(Value::Bool(true)));
    assert!(object.equals(&object));

    assert_eq!(opens.load(Ordering::SeqCst), 0);
}

#[test]
fn test_lease_shares_handle_across_threads() {
    let dir = tempdir().unwrap();
    let (dbi, opens) = counting_dbi(&dir.path().join("users.db"));
    let object = Arc::new(SqlObject::on_demand(users(), dbi));

    let lease = object.lease("bulk load").unwrap();
    assert_eq!(lease.reason(), "bulk load");
    assert!(object.is_open());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let object = object.clone();
            thread::spawn(move || {
                object
                    .call("insert", Args::new().value(i).value(format!("user{i}")))
                    .unwrap()
                    .into_count()
                    .unwrap()
            })
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), 1);
    }

    let rows = lease
        .with(|handle| handle.select("SELECT id FROM users", &[]))
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(lease.holders(), 1);

    let second = lease.retain("nested");
    drop(lease);
    assert!(object.is_open());
    drop(second);
    assert!(!object.is_open());
}

#[test]
fn test_owned_object_keeps_its_handle() {
    let dbi = sqlite();
    let object = SqlObject::open(users(), &dbi).unwrap();
    object.handle().execute(USERS, &[]).unwrap();

    object
        .call("insert", Args::new().value(1).value("ada"))
        .unwrap();
    assert_eq!(row_count(object.handle()), 1);
    object.close().unwrap();
}
