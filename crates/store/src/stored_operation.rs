use std::any::Any;
use std::sync::{Arc, Mutex};

use metrics::counter;
use shake_core::sync::lock;
use shake_core::{
    EntityIdSet, EntityStoreSnapshot, Observer, OperationRequest, OperationResult, Subscribers, Subscription,
};
use tokio::time::Instant;
use tracing::{debug, warn};

type SharedResult<T> = Arc<OperationResult<T>>;

struct OperationState<T> {
    last_result: Option<SharedResult<T>>,
    last_modified: Instant,
}

/// Cache entry for one request: the last result plus the request's own subscribers.
pub struct StoredOperation<T> {
    request: OperationRequest,
    state: Mutex<OperationState<T>>,
    subscribers: Subscribers<SharedResult<T>>,
}

impl<T: Send + Sync + 'static> StoredOperation<T> {
    pub fn new(request: OperationRequest) -> Self {
        Self {
            request,
            state: Mutex::new(OperationState { last_result: None, last_modified: Instant::now() }),
            subscribers: Subscribers::new(),
        }
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn last_result(&self) -> Option<SharedResult<T>> {
        lock(&self.state).last_result.clone()
    }

    pub fn last_modified(&self) -> Instant {
        lock(&self.state).last_modified
    }

    /// Store version the last result was built at; 0 without a result.
    pub fn version(&self) -> u64 {
        self.last_result().and_then(|r| r.data_info().map(|i| i.version())).unwrap_or(0)
    }

    /// Entities the last result was built from; empty without a result.
    pub fn entity_ids(&self) -> EntityIdSet {
        self.last_result()
            .and_then(|r| r.data_info().map(|i| i.entity_ids().clone()))
            .unwrap_or_default()
    }

    /// Install `result` and push it to this operation's subscribers on the calling thread.
    pub fn set_result(&self, result: SharedResult<T>) {
        {
            let mut state = lock(&self.state);
            state.last_result = Some(Arc::clone(&result));
            state.last_modified = Instant::now();
        }
        self.subscribers.notify(result);
    }

    /// Rebuild the data of the last result from `snapshot` and republish it as `version`.
    ///
    /// Results without data info (error-only results) are never rebuilt. The
    /// factory runs unlocked; the rebuilt result is dropped if another result
    /// was installed meanwhile or `version` is no longer newer. Returns whether
    /// a rebuilt result was published.
    pub fn update_result(&self, version: u64, snapshot: &EntityStoreSnapshot) -> bool {
        let Some(last) = self.last_result() else { return false };
        let Some(info) = last.data_info().cloned() else { return false };
        let data = match last.data_factory().create(info.as_ref(), snapshot) {
            Ok(data) => data,
            Err(e) => {
                warn!(operation = %self.request.name(), version, error = %e, "failed to rebuild operation result");
                return false;
            }
        };
        let rebuilt = Arc::new(last.with_data(data, info.with_version(version)));
        {
            let mut state = lock(&self.state);
            let current = match &state.last_result {
                Some(current) if Arc::ptr_eq(current, &last) => current,
                _ => {
                    debug!(operation = %self.request.name(), version, "result replaced during rebuild, dropping");
                    counter!("operation_store_recompute_dropped_total", 1u64);
                    return false;
                }
            };
            if current.data_info().map_or(false, |i| i.version() >= version) {
                counter!("operation_store_recompute_dropped_total", 1u64);
                return false;
            }
            state.last_result = Some(Arc::clone(&rebuilt));
            state.last_modified = Instant::now();
        }
        debug!(operation = %self.request.name(), version, "operation result rebuilt");
        counter!("operation_store_recompute_total", 1u64);
        self.subscribers.notify(rebuilt);
        true
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<SharedResult<T>>>) -> Subscription {
        self.subscribers.subscribe(observer)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Complete and detach all subscribers.
    pub fn complete(&self) {
        self.subscribers.complete();
    }
}

/// Type-erased view of a [`StoredOperation`], as held by the operation store.
pub trait AnyStoredOperation: Send + Sync {
    fn request(&self) -> &OperationRequest;

    fn version(&self) -> u64;

    fn entity_ids(&self) -> EntityIdSet;

    /// True if the last result was built from any of `ids`.
    fn depends_on(&self, ids: &EntityIdSet) -> bool;

    fn has_result(&self) -> bool;

    fn last_modified(&self) -> Instant;

    fn subscriber_count(&self) -> usize;

    /// Rebuild from `snapshot` at `version`; true if a new result was published.
    fn update_result(&self, version: u64, snapshot: &EntityStoreSnapshot) -> bool;

    fn complete(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> AnyStoredOperation for StoredOperation<T> {
    fn request(&self) -> &OperationRequest {
        StoredOperation::request(self)
    }

    fn version(&self) -> u64 {
        StoredOperation::version(self)
    }

    fn entity_ids(&self) -> EntityIdSet {
        StoredOperation::entity_ids(self)
    }

    fn depends_on(&self, ids: &EntityIdSet) -> bool {
        let Some(last) = self.last_result() else { return false };
        let Some(info) = last.data_info() else { return false };
        let deps = info.entity_ids();
        let (small, large) = if deps.len() < ids.len() { (deps, ids) } else { (ids, deps) };
        small.iter().any(|id| large.contains(id))
    }

    fn has_result(&self) -> bool {
        lock(&self.state).last_result.is_some()
    }

    fn last_modified(&self) -> Instant {
        StoredOperation::last_modified(self)
    }

    fn subscriber_count(&self) -> usize {
        StoredOperation::subscriber_count(self)
    }

    fn update_result(&self, version: u64, snapshot: &EntityStoreSnapshot) -> bool {
        StoredOperation::update_result(self, version, snapshot)
    }

    fn complete(&self) {
        StoredOperation::complete(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
