//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random emits, payloads and
//! record-store edits.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating event kind tags (`domain.action`).
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "case.registered",
        "case.updated",
        "shelter.opened",
        "team.dispatched",
        "supply.requested",
    ])
    .prop_map(str::to_string)
}

/// Strategy for generating operation scopes (`None` = unscoped).
pub fn scope_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(
        prop::sample::select(vec!["flood-north", "quake-east"]).prop_map(str::to_string),
    )
}

/// Strategy for generating small JSON payloads.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z ]{0,16}".prop_map(Value::String),
    ];
    prop::collection::btree_map("[a-z]{1,8}", leaf, 0..4)
        .prop_map(|fields| Value::Object(fields.into_iter().collect()))
}

/// One generated emit.
#[derive(Debug, Clone)]
pub struct PlannedEmit {
    /// Kind tag.
    pub kind: String,
    /// Payload.
    pub payload: Value,
    /// Operation scope.
    pub scope: Option<String>,
}

/// Strategy for generating a sequence of emits.
pub fn emit_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<PlannedEmit>> {
    prop::collection::vec(
        (kind_strategy(), payload_strategy(), scope_strategy())
            .prop_map(|(kind, payload, scope)| PlannedEmit { kind, payload, scope }),
        0..=max_len,
    )
}

/// One edit against a [`RecordStore`](crate::RecordStore).
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Insert or replace a record.
    Upsert {
        /// Record id.
        id: String,
        /// New value.
        value: i64,
    },
    /// Delete a record (skipped if absent).
    Delete {
        /// Record id.
        id: String,
    },
}

/// Strategy for generating edits over a small id space, so that updates
/// and deletes of existing records are common.
pub fn edit_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Edit>> {
    let id = prop::sample::select(vec!["r1", "r2", "r3"]).prop_map(str::to_string);
    let edit = prop_oneof![
        3 => (id.clone(), any::<i64>()).prop_map(|(id, value)| Edit::Upsert { id, value }),
        1 => id.prop_map(|id| Edit::Delete { id }),
    ];
    prop::collection::vec(edit, 1..=max_len)
}
