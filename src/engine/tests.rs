use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::client::Client;
use crate::decode::{DecodeArena, QueryResult};
use crate::modify::ops;
use crate::query::{Operator, Order};
use crate::schema::{PropDef, SchemaDef, TypeDef};
use crate::types::{TypeTag, Value};

fn blog() -> SchemaDef {
    SchemaDef::new()
        .locale("en")
        .locale("de")
        .with_type(
            TypeDef::new("user")
                .prop(PropDef::string("name"))
                .prop(PropDef::string("city"))
                .prop(PropDef::number("age"))
                .prop(PropDef::alias("email"))
                .prop(PropDef::new("visits", TypeTag::Uint32))
                .prop(PropDef::references("posts", "post").inverse("author")),
        )
        .with_type(
            TypeDef::new("post")
                .prop(PropDef::string("title"))
                .prop(PropDef::reference("author", "user").inverse("posts")),
        )
}

/// `RUST_LOG=quarrydb=trace cargo test` shows the engine's batch and query logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (MemoryEngine, Client) {
    init_tracing();
    let engine = MemoryEngine::new();
    let client = Client::new(engine.clone()).unwrap();
    client.set_schema(&blog()).unwrap();
    (engine, client)
}

fn type_id(client: &Client, name: &str) -> u16 {
    client.schema().unwrap().type_layout(name).unwrap().id
}

fn names(result: &QueryResult) -> Vec<String> {
    let mut arena = DecodeArena::new();
    result
        .records()
        .map(|r| r.get("name", &mut arena).unwrap().as_str().unwrap().to_string())
        .collect()
}

fn create_user(client: &Client, name: &str, age: i64) -> u32 {
    client
        .create("user", Value::object([("name", Value::from(name)), ("age", Value::from(age))]))
        .unwrap()
        .id()
        .unwrap()
}

#[test]
fn created_record_reads_back() {
    let (engine, client) = setup();
    let outcome = client.create("user", Value::object([("name", "a")])).unwrap();
    assert_eq!(outcome.id(), Some(1));

    let result = client.query("user").include(["name"]).get().unwrap();
    let value = result.to_value(&mut DecodeArena::new()).unwrap();
    assert_eq!(
        value,
        Value::List(vec![Value::object([
            ("id", Value::Int(1)),
            ("name", Value::from("a")),
        ])])
    );
    assert_eq!(engine.record_count(type_id(&client, "user")), 1);
    assert_eq!(engine.flushes(), 1);
}

#[test]
fn schema_hash_matches_the_client() {
    let (engine, client) = setup();
    assert_ne!(engine.schema_hash(), 0);
    assert_eq!(client.schema_hash(), Some(engine.schema_hash()));
}

#[test]
fn failed_batch_leaves_no_trace() {
    let (engine, client) = setup();
    create_user(&client, "keep", 1);
    client.drain().unwrap();
    let user = type_id(&client, "user");

    let mut batch = vec![ops::SWITCH_TYPE];
    batch.extend_from_slice(&user.to_le_bytes());
    batch.push(ops::DELETE_RECORD);
    batch.extend_from_slice(&1u32.to_le_bytes());
    batch.push(0xee);
    assert!(engine.flush_modify(&batch).is_err());

    assert_eq!(engine.record_count(user), 1);
    assert_eq!(engine.flushes(), 1);
    assert_eq!(names(&client.query("user").get().unwrap()), ["keep"]);
}

#[test]
fn queries_need_a_schema() {
    let engine = MemoryEngine::new();
    assert!(engine.get_query_buf(&[0; 31]).is_err());
    assert!(engine.flush_modify(&[ops::SWITCH_TYPE, 0, 0]).is_err());
}

#[test]
fn provisional_ids_shift_past_other_writers() {
    let engine = MemoryEngine::new();
    let first = Client::new(engine.clone()).unwrap();
    let second = Client::new(engine.clone()).unwrap();
    first.set_schema(&blog()).unwrap();
    second.set_schema(&blog()).unwrap();

    create_user(&first, "x", 1);
    create_user(&first, "y", 2);
    first.drain().unwrap();

    let provisional = create_user(&second, "z", 3);
    assert_eq!(provisional, 1);
    let report = second.drain().unwrap();
    let user = type_id(&second, "user");
    assert_eq!(report.id_of(user, provisional), Some(3));

    let result = second.query("user").id(3).include(["name"]).get().unwrap();
    assert_eq!(names(&result), ["z"]);
}

#[test]
fn inverse_references_follow_both_sides() {
    let (_engine, client) = setup();
    let ann = create_user(&client, "ann", 30);
    let post = client
        .create(
            "post",
            Value::object([("title", Value::from("hello")), ("author", Value::reference(ann))]),
        )
        .unwrap()
        .id()
        .unwrap();

    let result = client.query("user").id(ann).include(["posts"]).get().unwrap();
    let record = result.record(0).unwrap();
    let posts: Vec<u32> = record.references("posts").unwrap().iter().map(|p| p.id()).collect();
    assert_eq!(posts, [post]);

    let mut arena = DecodeArena::new();
    let titles = record.get("posts.title", &mut arena).unwrap();
    assert_eq!(titles, Value::List(vec![Value::from("hello")]));

    client.delete("post", post).unwrap();
    let result = client.query("user").id(ann).include(["posts"]).get().unwrap();
    assert!(result.record(0).unwrap().references("posts").unwrap().is_empty());
}

#[test]
fn reassigning_a_single_reference_moves_the_inverse() {
    let (_engine, client) = setup();
    let ann = create_user(&client, "ann", 30);
    let bob = create_user(&client, "bob", 40);
    let post = client
        .create("post", Value::object([("author", Value::reference(ann))]))
        .unwrap()
        .id()
        .unwrap();
    client
        .update("post", post, Value::object([("author", Value::reference(bob))]))
        .unwrap();

    let result = client.query("user").include(["posts"]).sort("name", Order::Asc).get().unwrap();
    let counts: Vec<usize> = result
        .records()
        .map(|r| r.references("posts").unwrap().len())
        .collect();
    assert_eq!(counts, [0, 1]);
}

#[test]
fn indexed_reference_add_reorders() {
    let (_engine, client) = setup();
    let ann = create_user(&client, "ann", 30);
    let posts: Vec<u32> = (0..3)
        .map(|_| {
            client
                .create("post", Value::object([("author", Value::reference(ann))]))
                .unwrap()
                .id()
                .unwrap()
        })
        .collect();
    client
        .update("user", ann, Value::object([("posts", Value::refs_add_at([posts[2]], 0))]))
        .unwrap();

    let result = client.query("user").id(ann).include(["posts"]).get().unwrap();
    let order: Vec<u32> = result
        .record(0)
        .unwrap()
        .references("posts")
        .unwrap()
        .iter()
        .map(|p| p.id())
        .collect();
    assert_eq!(order, [posts[2], posts[0], posts[1]]);
}

#[test]
fn aliases_are_unique_and_released_on_delete() {
    let (_engine, client) = setup();
    let a = client
        .create("user", Value::object([("name", "a"), ("email", "x@y.z")]))
        .unwrap()
        .id()
        .unwrap();
    let b = client
        .create("user", Value::object([("name", "b"), ("email", "x@y.z")]))
        .unwrap()
        .id()
        .unwrap();

    let mut arena = DecodeArena::new();
    let holder = client.query("user").alias("email", "x@y.z").include(["name"]).get().unwrap();
    assert_eq!(holder.ids(), [b]);

    let old = client.query("user").id(a).include(["email"]).get().unwrap();
    let email = old.record(0).unwrap().get("email", &mut arena).unwrap();
    assert_ne!(email, Value::from("x@y.z"));

    client.delete("user", b).unwrap();
    let gone = client.query("user").alias("email", "x@y.z").get().unwrap();
    assert_eq!(gone.to_value(&mut arena).unwrap(), Value::Null);
}

#[test]
fn or_filter_with_descending_sort() {
    let (_engine, client) = setup();
    for (name, age) in [("a", 5), ("b", 9), ("c", 0), ("d", 12)] {
        create_user(&client, name, age);
    }
    let result = client
        .query("user")
        .filter("age", Operator::Gt, 8)
        .or(|f| f.filter("age", Operator::Lt, 1))
        .sort("age", Order::Desc)
        .include(["name"])
        .get()
        .unwrap();
    assert_eq!(names(&result), ["d", "b", "c"]);

    let page = client
        .query("user")
        .sort("age", Order::Asc)
        .range(1, 2)
        .include(["name"])
        .get()
        .unwrap();
    assert_eq!(names(&page), ["a", "b"]);
}

#[test]
fn any_group_binds_inside_the_conjunction() {
    let (_engine, client) = setup();
    for (name, city) in [("bob", "ams"), ("cat", "rot"), ("cat", "ams"), ("dan", "ams")] {
        client
            .create("user", Value::object([("name", Value::from(name)), ("city", Value::from(city))]))
            .unwrap();
    }

    let grouped = client
        .query("user")
        .filter("city", Operator::Equal, "ams")
        .any(|f| f.filter("name", Operator::Equal, "bob").or(|f| f.filter("name", Operator::Equal, "cat")))
        .include(["name", "city"])
        .get()
        .unwrap();
    assert_eq!(grouped.ids(), [1, 3]);

    // Without the group the OR splits the whole filter.
    let chained = client
        .query("user")
        .filter("city", Operator::Equal, "ams")
        .filter("name", Operator::Equal, "bob")
        .or(|f| f.filter("name", Operator::Equal, "cat"))
        .include(["name"])
        .get()
        .unwrap();
    assert_eq!(chained.ids(), [1, 2, 3]);
}

#[test]
fn grouped_aggregates() {
    let (_engine, client) = setup();
    for (city, age) in [("nyc", 10), ("nyc", 20), ("sf", 5)] {
        client
            .create("user", Value::object([("city", Value::from(city)), ("age", Value::from(age))]))
            .unwrap();
    }
    let result = client.query("user").sum(["age"]).group_by("city").get().unwrap();
    let value = result.aggregate(&mut DecodeArena::new()).unwrap();
    assert_eq!(value.pointer("nyc.age.sum"), Some(&Value::Float(30.0)));
    assert_eq!(value.pointer("sf.age.sum"), Some(&Value::Float(5.0)));

    let count = client.query("user").count().get().unwrap();
    assert_eq!(count.count(), 3);

    let filtered = client
        .query("user")
        .count()
        .filter("age", Operator::Ge, 10)
        .get()
        .unwrap();
    let value = filtered.aggregate(&mut DecodeArena::new()).unwrap();
    assert_eq!(value.get("count"), Some(&Value::Int(2)));
}

#[test]
fn counters_increment_in_place() {
    let (_engine, client) = setup();
    let id = create_user(&client, "a", 1);
    client
        .update("user", id, Value::object([("visits", Value::increment(3))]))
        .unwrap();
    client
        .update("user", id, Value::object([("visits", Value::decrement(1))]))
        .unwrap();

    let result = client.query("user").id(id).include(["visits"]).get().unwrap();
    let visits = result.record(0).unwrap().get("visits", &mut DecodeArena::new()).unwrap();
    assert_eq!(visits.as_f64(), Some(2.0));
}

#[test]
fn subscriptions_push_only_changes() {
    let (engine, client) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = client
        .query("user")
        .include(["name"])
        .subscribe(move |result| sink.lock().push(result.len()))
        .unwrap();
    assert_eq!(*seen.lock(), [0]);
    assert_eq!(engine.subscription_count(), 1);

    create_user(&client, "a", 1);
    client.drain().unwrap();
    assert_eq!(*seen.lock(), [0, 1]);

    client.create("post", Value::object([("title", "unrelated")])).unwrap();
    client.drain().unwrap();
    assert_eq!(*seen.lock(), [0, 1]);

    drop(handle);
    assert_eq!(engine.subscription_count(), 0);
    create_user(&client, "b", 2);
    client.drain().unwrap();
    assert_eq!(*seen.lock(), [0, 1]);
}

#[test]
fn injected_flush_failure_rejects_one_batch() {
    let (engine, client) = setup();
    engine.fail_next_flush();
    create_user(&client, "lost", 1);
    assert!(client.drain().is_err());
    assert_eq!(engine.record_count(type_id(&client, "user")), 0);

    let id = create_user(&client, "kept", 2);
    assert_eq!(id, 1);
    client.drain().unwrap();
    assert_eq!(names(&client.query("user").get().unwrap()), ["kept"]);
}
