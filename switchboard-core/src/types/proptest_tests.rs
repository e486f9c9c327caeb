//! Property-based tests for the wire codec round-trip laws.

#![allow(clippy::expect_used, clippy::float_cmp)]

use proptest::prelude::*;

use crate::schema::{AtomKind, ColumnType, DatabaseSchema};
use crate::types::{Row, RowUuid, Value};

fn bridge_schema() -> DatabaseSchema {
    DatabaseSchema::from_json(&serde_json::json!({
        "name": "db",
        "tables": {
            "Bridge": {
                "columns": {
                    "name": { "type": "string" },
                    "ports": {
                        "type": { "key": "uuid", "min": 0, "max": "unlimited" }
                    },
                    "external_ids": {
                        "type": {
                            "key": "string",
                            "value": "string",
                            "min": 0,
                            "max": "unlimited"
                        }
                    }
                }
            }
        }
    }))
    .expect("schema")
}

proptest! {
    #[test]
    fn scalar_values_round_trip(n in any::<i64>(), s in ".*", b in any::<bool>()) {
        for (ty, value) in [
            (ColumnType::atom(AtomKind::Integer), Value::from(n)),
            (ColumnType::atom(AtomKind::String), Value::from(s.as_str())),
            (ColumnType::atom(AtomKind::Boolean), Value::from(b)),
        ] {
            let decoded = Value::from_wire(&ty, &value.to_wire()).expect("decode");
            prop_assert_eq!(decoded, value);
        }
    }

    #[test]
    fn real_values_round_trip(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
        let ty = ColumnType::atom(AtomKind::Real);
        let value = Value::from(f);
        let decoded = Value::from_wire(&ty, &value.to_wire()).expect("decode");
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn uuid_sets_round_trip(ids in prop::collection::vec("[a-zA-Z0-9_-]{1,36}", 0..8)) {
        let ty = ColumnType::set(AtomKind::Uuid, 0, None);
        let value = Value::set(ids.iter().map(|id| RowUuid::new(id.clone())));
        let decoded = Value::from_wire(&ty, &value.to_wire()).expect("decode");
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn string_maps_round_trip(
        entries in prop::collection::btree_map("[a-z]{1,12}", ".*", 0..8)
    ) {
        let ty = ColumnType::map(AtomKind::String, AtomKind::String);
        let value = Value::map(entries);
        let decoded = Value::from_wire(&ty, &value.to_wire()).expect("decode");
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn rows_round_trip(
        name in "[a-z0-9_]{0,16}",
        ports in prop::collection::vec("[a-zA-Z0-9_-]{1,36}", 0..6),
        external_ids in prop::collection::btree_map("[a-z]{1,10}", "[a-z0-9]{0,10}", 0..6),
    ) {
        let schema = bridge_schema();
        let table = schema.table("Bridge").expect("Bridge");

        let mut row = Row::new(RowUuid::generate())
            .with("name", name.as_str())
            .with("ports", Value::set(ports.iter().map(|p| RowUuid::new(p.clone()))))
            .with("external_ids", Value::map(external_ids));
        row.normalize(table);

        let decoded = Row::decode(table, row.uuid().clone(), &row.encode()).expect("decode");
        prop_assert_eq!(decoded, row);
    }
}
