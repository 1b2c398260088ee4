use area_core::state_machine::ExecutionEvent;
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Any lifecycle event, legal or not for the current state
pub fn execution_event_strategy() -> impl Strategy<Value = ExecutionEvent> {
    prop_oneof![
        Just(ExecutionEvent::Claim),
        Just(ExecutionEvent::Succeed),
        Just(ExecutionEvent::Fail),
        Just(ExecutionEvent::Retry),
        Just(ExecutionEvent::Cancel),
    ]
}

pub fn event_sequence_strategy() -> impl Strategy<Value = Vec<ExecutionEvent>> {
    prop::collection::vec(execution_event_strategy(), 0..32)
}

/// Field names that never collide with the default volatile fields
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}".prop_filter("volatile field names are reserved", |name| {
        !matches!(
            name.as_str(),
            "received_at" | "delivered_at" | "timestamp" | "retry_count"
        )
    })
}

pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

/// Flat JSON object payloads
pub fn payload_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(field_name_strategy(), scalar_strategy(), 0..8)
        .prop_map(|fields| fields.into_iter().collect())
}
