//! # Reference Tests
//!
//! Single and multiple references through the client and the loopback
//! engine: edge properties, indexed inserts, deletes, nested includes and
//! filters that walk a reference.

#![cfg(feature = "loopback")]

use quarrydb::{
    Client, DecodeArena, MemoryEngine, Operator, Order, PropDef, QueryResult, SchemaDef, TypeDef, Value,
};

fn social() -> SchemaDef {
    SchemaDef::new().with_type(
        TypeDef::new("person")
            .prop(PropDef::string("name"))
            .prop(PropDef::reference("best", "person"))
            .prop(PropDef::references("friends", "person").edge(PropDef::number("$weight"))),
    )
}

/// A client holding ann (1), bob (2), cat (3) and dan (4).
fn populated() -> Client {
    let client = Client::new(MemoryEngine::new()).unwrap();
    client.set_schema(&social()).unwrap();
    for name in ["ann", "bob", "cat", "dan"] {
        client.create("person", Value::object([("name", name)])).unwrap();
    }
    client.drain().unwrap();
    client
}

fn friend_ids(result: &QueryResult) -> Vec<u32> {
    result
        .record(0)
        .unwrap()
        .references("friends")
        .unwrap()
        .iter()
        .map(|f| f.id())
        .collect()
}

fn friends_of(client: &Client, id: u32) -> Vec<u32> {
    friend_ids(&client.query("person").id(id).include(["friends"]).get().unwrap())
}

mod edge_tests {
    use super::*;

    #[test]
    fn edge_properties_travel_with_the_reference() {
        let client = populated();
        client
            .update(
                "person",
                1,
                Value::object([(
                    "friends",
                    Value::list([
                        Value::edge(2, [("$weight", 0.5)]),
                        Value::edge(3, [("$weight", 2.0)]),
                    ]),
                )]),
            )
            .unwrap();

        let result = client
            .query("person")
            .id(1)
            .include_ref("friends", |q| q.include(["name", "$weight"]))
            .get()
            .unwrap();
        let record = result.record(0).unwrap();
        let mut arena = DecodeArena::new();
        let friends: Vec<(Value, Value)> = record
            .references("friends")
            .unwrap()
            .iter()
            .map(|f| (f.get("name", &mut arena).unwrap(), f.get("$weight", &mut arena).unwrap()))
            .collect();
        assert_eq!(
            friends,
            [
                (Value::from("bob"), Value::Float(0.5)),
                (Value::from("cat"), Value::Float(2.0)),
            ]
        );
    }

    #[test]
    fn filters_can_test_edge_properties() {
        let client = populated();
        client
            .update(
                "person",
                1,
                Value::object([(
                    "friends",
                    Value::list([
                        Value::edge(2, [("$weight", 0.5)]),
                        Value::edge(3, [("$weight", 2.0)]),
                    ]),
                )]),
            )
            .unwrap();

        let result = client
            .query("person")
            .id(1)
            .include_ref("friends", |q| q.filter("$weight", Operator::Gt, 1.0))
            .get()
            .unwrap();
        assert_eq!(friend_ids(&result), [3]);
    }
}

mod ordering_tests {
    use super::*;

    #[test]
    fn indexed_add_is_stable_under_repeats() {
        let client = populated();
        client
            .update("person", 1, Value::object([("friends", Value::list([2, 3, 4]))]))
            .unwrap();
        client
            .update("person", 1, Value::object([("friends", Value::refs_add_at([4], 0))]))
            .unwrap();
        assert_eq!(friends_of(&client, 1), [4, 2, 3]);

        client
            .update("person", 1, Value::object([("friends", Value::refs_add_at([4], 0))]))
            .unwrap();
        assert_eq!(friends_of(&client, 1), [4, 2, 3]);
    }

    #[test]
    fn indexed_overwrite_is_stable_under_repeats() {
        let client = populated();
        let list = Value::list([
            Value::from(2),
            Value::from(4),
            Value::object([("id", Value::from(3)), ("$index", Value::from(0))]),
        ]);
        for _ in 0..2 {
            client
                .update("person", 1, Value::object([("friends", list.clone())]))
                .unwrap();
            assert_eq!(friends_of(&client, 1), [3, 2, 4]);
        }
    }

    #[test]
    fn add_and_delete_edit_the_list() {
        let client = populated();
        client
            .update("person", 1, Value::object([("friends", Value::refs_add([2, 3]))]))
            .unwrap();
        client
            .update("person", 1, Value::object([("friends", Value::refs_add([3, 4]))]))
            .unwrap();
        assert_eq!(friends_of(&client, 1), [2, 3, 4]);

        client
            .update("person", 1, Value::object([("friends", Value::refs_delete([3]))]))
            .unwrap();
        assert_eq!(friends_of(&client, 1), [2, 4]);

        client
            .update("person", 1, Value::object([("friends", Value::list([4]))]))
            .unwrap();
        assert_eq!(friends_of(&client, 1), [4]);
    }

    #[test]
    fn deleting_a_target_removes_it_from_lists() {
        let client = populated();
        client
            .update("person", 1, Value::object([("friends", Value::list([2, 3]))]))
            .unwrap();
        client.delete("person", 2).unwrap();
        assert_eq!(friends_of(&client, 1), [3]);
    }

    #[test]
    fn nested_includes_sort_and_page() {
        let client = populated();
        client
            .update("person", 1, Value::object([("friends", Value::list([2, 4, 3]))]))
            .unwrap();
        let result = client
            .query("person")
            .id(1)
            .include_ref("friends", |q| q.sort("name", Order::Desc).range(0, 2).include(["name"]))
            .get()
            .unwrap();
        assert_eq!(friend_ids(&result), [4, 3]);
    }
}

mod path_tests {
    use super::*;

    #[test]
    fn filters_walk_single_references() {
        let client = populated();
        client
            .update("person", 1, Value::object([("best", Value::reference(2))]))
            .unwrap();
        client
            .update("person", 3, Value::object([("best", Value::reference(4))]))
            .unwrap();

        let result = client
            .query("person")
            .filter("best.name", Operator::Equal, "bob")
            .include(["name", "best.name"])
            .get()
            .unwrap();
        assert_eq!(result.ids(), [1]);
        let mut arena = DecodeArena::new();
        let best = result.record(0).unwrap().get("best.name", &mut arena).unwrap();
        assert_eq!(best, Value::from("bob"));
    }

    #[test]
    fn single_reference_reads_as_an_object() {
        let client = populated();
        client
            .update("person", 1, Value::object([("best", Value::reference(3))]))
            .unwrap();
        let result = client.query("person").id(1).include(["best"]).get().unwrap();
        let value = result.to_value(&mut DecodeArena::new()).unwrap();
        assert_eq!(value.pointer("best.name"), Some(&Value::from("cat")));
        assert_eq!(value.pointer("best.id"), Some(&Value::Int(3)));
    }
}
