//! Property tests: incremental computation must agree with full
//! recomputation after any interleaving of creates, updates, and deletes.
//!
//! Weights are small integers (exactly representable as f64), so the
//! incremental sum and the recomputed sum are bit-identical.

use proptest::prelude::*;

use deriva_core::computation::{Count, Summation};
use deriva_core::computation::{Computed, DataContext};
use deriva_core::id::RecordId;
use deriva_core::record::Fields;
use deriva_core::schema::{Entity, Property, PropertyType, SchemaRegistry};
use deriva_engine::Scheduler;
use deriva_storage::{InMemoryStore, MatchExpr, Modifier, RecordStore};
use serde_json::json;

/// One random storage operation. Indices select from the live record
/// list modulo its length.
#[derive(Debug, Clone)]
enum Op {
    Create(i32),
    Update(usize, i32),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..100i32).prop_map(Op::Create),
        (0..64usize, 0..100i32).prop_map(|(i, w)| Op::Update(i, w)),
        (0..64usize).prop_map(Op::Delete),
    ]
}

fn build() -> (Scheduler, SchemaRegistry) {
    let mut schema = SchemaRegistry::new();
    schema
        .add_entity(Entity::new("Item").with_property(Property::new("w", PropertyType::Number)))
        .unwrap();
    schema.add_global("item_count", Computed::Count(Count::of("Item")));
    schema.add_global("item_sum", Computed::Summation(Summation::of("Item", "w")));

    let mut scheduler = Scheduler::new();
    for global in schema.globals() {
        scheduler
            .register(
                DataContext::Global {
                    key: global.key.clone(),
                },
                &global.computation,
                &schema,
            )
            .unwrap();
    }
    (scheduler, schema)
}

fn weight_fields(w: i32) -> Fields {
    let mut fields = Fields::new();
    fields.insert("w".to_string(), json!(f64::from(w)));
    fields
}

proptest! {
    #[test]
    fn incremental_count_and_sum_match_full_recompute(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let (scheduler, _schema) = build();
        let mut store = InMemoryStore::new();
        store.install_record_type("Item").unwrap();
        scheduler.seed_initial_values(&mut store).unwrap();

        let mut live: Vec<RecordId> = Vec::new();
        for op in ops {
            let events = match op {
                Op::Create(w) => {
                    let (record, events) = store.create("Item", weight_fields(w)).unwrap();
                    live.push(record.id);
                    events
                }
                Op::Update(index, w) => {
                    if live.is_empty() {
                        continue;
                    }
                    let id = live[index % live.len()];
                    store.update("Item", id, weight_fields(w)).unwrap()
                }
                Op::Delete(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let id = live.remove(index % live.len());
                    store.delete("Item", id).unwrap()
                }
            };
            scheduler.dispatch(&mut store, events).unwrap();
        }

        // Full recompute over the surviving records.
        let records = store.find("Item", &MatchExpr::All, &Modifier::none()).unwrap();
        let expected_count = records.len() as i64;
        let expected_sum: f64 = records.iter().filter_map(|r| r.get_f64("w")).sum();

        let count = store.get_state("item_count").unwrap().and_then(|v| v.as_i64());
        prop_assert_eq!(count, Some(expected_count));

        let sum = store
            .get_state("item_sum")
            .unwrap()
            .and_then(|v| v.as_f64());
        prop_assert_eq!(sum, Some(expected_sum));
    }
}
