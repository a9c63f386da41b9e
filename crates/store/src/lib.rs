//! Shake store: normalized entity store plus the operation result cache built on top of it.
//!
//! Data flow: a result builder decomposes a response into entities through
//! [`EntityStore::update`]; the commit publishes a new snapshot and queues an
//! [`EntityUpdate`]; the [`OperationStore`] checks each stored operation's
//! dependency set against the touched ids and has overlapping operations
//! rebuild their results from the latest snapshot.

#![forbid(unsafe_code)]

mod cache_policy;
mod entity_store;
mod operation_store;
mod session;
mod stored_operation;

pub use cache_policy::{CachePolicy, CacheSweeper, DEFAULT_TIME_TO_LIVE};
pub use entity_store::{EntityStore, EntityUpdate};
pub use operation_store::{OperationObservable, OperationStore, OperationUpdate, OperationUpdateKind};
pub use session::EntityStoreUpdateSession;
pub use stored_operation::{AnyStoredOperation, StoredOperation};
