use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use metrics::gauge;
use rustc_hash::FxHashMap;
use shake_core::sync::lock;
use shake_core::{Observable, Observer, OperationRequest, OperationResult, ShakeError, ShakeResult, Subscribers, Subscription};
use tracing::debug;

use crate::entity_store::{EntityStore, EntityUpdate};
use crate::stored_operation::{AnyStoredOperation, StoredOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationUpdateKind {
    Updated,
    Removed,
}

/// Change notification for stored operations, consumed by cache policies.
#[derive(Clone)]
pub struct OperationUpdate {
    kind: OperationUpdateKind,
    operations: Arc<Vec<Arc<dyn AnyStoredOperation>>>,
}

impl OperationUpdate {
    fn new(kind: OperationUpdateKind, operations: Vec<Arc<dyn AnyStoredOperation>>) -> Self {
        Self { kind, operations: Arc::new(operations) }
    }

    pub fn kind(&self) -> OperationUpdateKind {
        self.kind
    }

    pub fn operations(&self) -> &[Arc<dyn AnyStoredOperation>] {
        &self.operations
    }
}

impl fmt::Debug for OperationUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.operations.iter().map(|o| o.request().name()).collect();
        f.debug_struct("OperationUpdate").field("kind", &self.kind).field("operations", &names).finish()
    }
}

pub(crate) struct OperationStoreInner {
    entity_store: Arc<EntityStore>,
    operations: Mutex<FxHashMap<OperationRequest, Arc<dyn AnyStoredOperation>>>,
    updates: Subscribers<OperationUpdate>,
    disposed: AtomicBool,
}

impl OperationStoreInner {
    fn ensure_open(&self) -> ShakeResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ShakeError::Disposed("OperationStore"));
        }
        Ok(())
    }

    fn typed<T: Send + Sync + 'static>(
        request: &OperationRequest,
        entry: Arc<dyn AnyStoredOperation>,
    ) -> ShakeResult<Arc<StoredOperation<T>>> {
        entry
            .into_any()
            .downcast::<StoredOperation<T>>()
            .map_err(|_| ShakeError::ResultTypeMismatch { operation: request.name().to_string() })
    }

    fn get_or_add<T: Send + Sync + 'static>(&self, request: &OperationRequest) -> ShakeResult<Arc<StoredOperation<T>>> {
        let (entry, count) = {
            let mut operations = lock(&self.operations);
            self.ensure_open()?;
            let entry = operations
                .entry(request.clone())
                .or_insert_with(|| Arc::new(StoredOperation::<T>::new(request.clone())) as Arc<dyn AnyStoredOperation>)
                .clone();
            (entry, operations.len())
        };
        gauge!("operation_store_operations", count as f64);
        Self::typed(request, entry)
    }

    fn subscribe<T: Send + Sync + 'static>(
        &self,
        request: &OperationRequest,
        observer: Arc<dyn Observer<Arc<OperationResult<T>>>>,
    ) -> ShakeResult<Subscription> {
        // Subscribe under the map lock so a concurrent sweep cannot evict the
        // entry between lookup and subscription. `dispose` flags before it
        // drains, so checking here keeps disposed stores from regaining entries.
        let mut operations = lock(&self.operations);
        self.ensure_open()?;
        let entry = operations
            .entry(request.clone())
            .or_insert_with(|| Arc::new(StoredOperation::<T>::new(request.clone())) as Arc<dyn AnyStoredOperation>)
            .clone();
        let op = Self::typed::<T>(request, entry)?;
        Ok(op.subscribe(observer))
    }

    fn on_entity_update(&self, update: EntityUpdate) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let operations: Vec<Arc<dyn AnyStoredOperation>> = lock(&self.operations).values().cloned().collect();
        let snapshot = self.entity_store.current_snapshot();
        let mut updated = Vec::new();
        for op in operations {
            if op.version() < update.version()
                && op.depends_on(update.updated_entity_ids())
                && op.update_result(update.version(), &snapshot)
            {
                updated.push(op);
            }
        }
        if !updated.is_empty() {
            debug!(version = update.version(), operations = updated.len(), "operations recomputed after entity update");
            self.updates.notify(OperationUpdate::new(OperationUpdateKind::Updated, updated));
        }
    }

    pub(crate) fn remove_where(&self, pred: impl Fn(&dyn AnyStoredOperation) -> bool) -> Vec<Arc<dyn AnyStoredOperation>> {
        let (removed, count) = {
            let mut operations = lock(&self.operations);
            let keys: Vec<OperationRequest> =
                operations.iter().filter(|(_, op)| pred(op.as_ref())).map(|(k, _)| k.clone()).collect();
            let removed: Vec<_> = keys.iter().filter_map(|k| operations.remove(k)).collect();
            (removed, operations.len())
        };
        if !removed.is_empty() {
            gauge!("operation_store_operations", count as f64);
            for op in &removed {
                op.complete();
            }
            self.updates.notify(OperationUpdate::new(OperationUpdateKind::Removed, removed.clone()));
        }
        removed
    }
}

struct EntityUpdateObserver {
    store: Weak<OperationStoreInner>,
}

impl Observer<EntityUpdate> for EntityUpdateObserver {
    fn on_next(&self, update: EntityUpdate) {
        if let Some(store) = self.store.upgrade() {
            store.on_entity_update(update);
        }
    }
}

/// Registry of stored operations keyed by request.
///
/// Listens to the entity store and asks every operation whose dependency set
/// overlaps a newer update to rebuild its result from the latest snapshot.
pub struct OperationStore {
    inner: Arc<OperationStoreInner>,
    entity_subscription: Mutex<Option<Subscription>>,
}

impl OperationStore {
    pub fn new(entity_store: Arc<EntityStore>) -> ShakeResult<Self> {
        let watch = entity_store.watch()?;
        let inner = Arc::new(OperationStoreInner {
            entity_store,
            operations: Mutex::new(FxHashMap::default()),
            updates: Subscribers::new(),
            disposed: AtomicBool::new(false),
        });
        let subscription = watch.subscribe(Arc::new(EntityUpdateObserver { store: Arc::downgrade(&inner) }));
        Ok(Self { inner, entity_subscription: Mutex::new(Some(subscription)) })
    }

    pub fn entity_store(&self) -> &Arc<EntityStore> {
        &self.inner.entity_store
    }

    /// Install `result` for `request` and notify the request's subscribers.
    pub fn set<T: Send + Sync + 'static>(&self, request: &OperationRequest, result: Arc<OperationResult<T>>) -> ShakeResult<()> {
        self.inner.ensure_open()?;
        let op = self.inner.get_or_add::<T>(request)?;
        op.set_result(result);
        let erased: Arc<dyn AnyStoredOperation> = op;
        self.inner.updates.notify(OperationUpdate::new(OperationUpdateKind::Updated, vec![erased]));
        Ok(())
    }

    /// Cached result for `request`, if one exists with result type `T`.
    pub fn try_get<T: Send + Sync + 'static>(&self, request: &OperationRequest) -> Option<Arc<OperationResult<T>>> {
        let entry = lock(&self.inner.operations).get(request).cloned()?;
        entry.into_any().downcast::<StoredOperation<T>>().ok()?.last_result()
    }

    /// Results for `request`. Subscribing creates the entry if needed; it never triggers execution.
    pub fn watch<T: Send + Sync + 'static>(&self, request: &OperationRequest) -> ShakeResult<OperationObservable<T>> {
        self.inner.ensure_open()?;
        Ok(OperationObservable { store: Arc::clone(&self.inner), request: request.clone(), _marker: Default::default() })
    }

    /// Every stored-operation change (updates and removals).
    pub fn watch_all(&self) -> ShakeResult<Observable<OperationUpdate>> {
        self.inner.ensure_open()?;
        Ok(self.inner.updates.observable())
    }

    pub fn stored_operations(&self) -> Vec<Arc<dyn AnyStoredOperation>> {
        lock(&self.inner.operations).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.operations).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, request: &OperationRequest) -> bool {
        lock(&self.inner.operations).contains_key(request)
    }

    /// Drop the entry for `request`, completing its subscribers.
    pub fn remove(&self, request: &OperationRequest) -> bool {
        !self.inner.remove_where(|op| op.request() == request).is_empty()
    }

    /// Drop entries matching `pred`; returns what was removed.
    pub fn remove_where(&self, pred: impl Fn(&dyn AnyStoredOperation) -> bool) -> Vec<Arc<dyn AnyStoredOperation>> {
        self.inner.remove_where(pred)
    }

    pub fn clear(&self) {
        let removed = self.inner.remove_where(|_| true);
        debug!(removed = removed.len(), "operation store cleared");
    }

    pub(crate) fn downgrade(&self) -> Weak<OperationStoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Detach from the entity store and complete every subscriber. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.entity_subscription).take();
        let operations: Vec<_> = lock(&self.inner.operations).drain().map(|(_, op)| op).collect();
        for op in &operations {
            op.complete();
        }
        self.inner.updates.complete();
        debug!(operations = operations.len(), "operation store disposed");
    }
}

impl Drop for OperationStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Subscribe-only handle onto one request's results.
pub struct OperationObservable<T> {
    store: Arc<OperationStoreInner>,
    request: OperationRequest,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for OperationObservable<T> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), request: self.request.clone(), _marker: Default::default() }
    }
}

impl<T: Send + Sync + 'static> OperationObservable<T> {
    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<Arc<OperationResult<T>>>>) -> ShakeResult<Subscription> {
        self.store.subscribe(&self.request, observer)
    }

    pub fn subscribe_fn(&self, f: impl Fn(Arc<OperationResult<T>>) + Send + Sync + 'static) -> ShakeResult<Subscription> {
        self.subscribe(shake_core::observer_fn(f))
    }
}
