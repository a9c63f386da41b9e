//! Shake core types: entity identity, operation requests/results, observers and errors.
//!
//! Everything here is plain data or a narrow contract; the stores live in
//! `shake-store` and the execution pipeline in `shake-client`.

#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod error;
pub mod id_serializer;
pub mod observer;
pub mod request;
pub mod result;
pub mod snapshot;
pub mod sync;

pub use error::{ShakeError, ShakeResult};
pub use id_serializer::{EntityIdSerializer, JsonEntityIdSerializer};
pub use observer::{observer_fn, Observable, Observer, Subscribers, Subscription};
pub use request::{Document, DocumentHash, OperationKind, OperationRequest, RequestStrategy};
pub use result::{
    ClientError, DataInfo, Location, OperationResult, OperationResultDataFactory,
    OperationResultDataInfo,
};
pub use snapshot::{Entity, EntityInfo, EntityMap, EntityStoreSnapshot};

/// Set of entity ids as used for dependency tracking.
pub type EntityIdSet = rustc_hash::FxHashSet<EntityId>;

/// Identity of one normalized entity, e.g. `Author:1`.
///
/// The default value (empty type name) is the invalid id; stores reject it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityId {
    type_name: String,
    value: Value,
}

impl EntityId {
    pub fn new(type_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { type_name: type_name.into(), value: value.into() }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// True for the zero id produced by `EntityId::default()`.
    pub fn is_default(&self) -> bool {
        self.type_name.is_empty()
    }
}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_name.hash(state);
        hash_value(&self.value, state);
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(s) => write!(f, "{}:{}", self.type_name, s),
            other => write!(f, "{}:{}", self.type_name, other),
        }
    }
}

/// Hash a JSON value consistently with `Value`'s `PartialEq`.
///
/// Arrays hash in order; objects hash in key order (the map is a `BTreeMap`).
pub fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            if let Some(u) = n.as_u64() {
                (0u8, u).hash(state);
            } else if let Some(i) = n.as_i64() {
                (1u8, i).hash(state);
            } else if let Some(f) = n.as_f64() {
                // 0.0 and -0.0 compare equal
                let f = if f == 0.0 { 0.0f64 } else { f };
                (2u8, f.to_bits()).hash(state);
            }
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            for (k, v) in map {
                k.hash(state);
                hash_value(v, state);
            }
        }
    }
}

pub mod prelude {
    pub use super::{
        observer_fn, ClientError, DataInfo, Document, EntityId, EntityIdSet, EntityStoreSnapshot,
        Observable, Observer, OperationKind, OperationRequest, OperationResult,
        OperationResultDataFactory, OperationResultDataInfo, ShakeError, ShakeResult,
        Subscription,
    };
}
