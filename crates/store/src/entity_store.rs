use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use metrics::{counter, gauge, histogram};
use shake_core::sync::lock;
use shake_core::{EntityIdSet, EntityStoreSnapshot, Observable, ShakeError, Subscribers};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::EntityStoreUpdateSession;

/// Ids touched by one committed update session, tagged with the resulting version.
#[derive(Debug, Clone)]
pub struct EntityUpdate {
    updated_entity_ids: Arc<EntityIdSet>,
    version: u64,
}

impl EntityUpdate {
    pub fn new(updated_entity_ids: EntityIdSet, version: u64) -> Self {
        Self { updated_entity_ids: Arc::new(updated_entity_ids), version }
    }

    pub fn updated_entity_ids(&self) -> &EntityIdSet {
        &self.updated_entity_ids
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// True if any id in `ids` was touched by this update.
    pub fn overlaps(&self, ids: &EntityIdSet) -> bool {
        let (small, large) = if ids.len() < self.updated_entity_ids.len() {
            (ids, self.updated_entity_ids.as_ref())
        } else {
            (self.updated_entity_ids.as_ref(), ids)
        };
        small.iter().any(|id| large.contains(id))
    }
}

/// Owner of the current entity snapshot.
///
/// Updates are serialized; each commit installs a new snapshot and queues an
/// [`EntityUpdate`]. A background task drains the queue and fans updates out
/// to watchers one at a time, in commit order. Must be created inside a Tokio
/// runtime.
pub struct EntityStore {
    current: ArcSwap<EntityStoreSnapshot>,
    // Held for the whole update: snapshot install and enqueue happen under one lock.
    queue: Mutex<Option<mpsc::UnboundedSender<EntityUpdate>>>,
    subscribers: Subscribers<EntityUpdate>,
    shutdown: CancellationToken,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::with_snapshot(EntityStoreSnapshot::default())
    }

    /// Start from an existing snapshot (e.g. one prepared for tests or a restored session).
    pub fn with_snapshot(snapshot: EntityStoreSnapshot) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<EntityUpdate>();
        let subscribers = Subscribers::new();
        let shutdown = CancellationToken::new();
        tokio::spawn(drain_updates(rx, subscribers.clone(), shutdown.clone()));
        Self {
            current: ArcSwap::from_pointee(snapshot),
            queue: Mutex::new(Some(tx)),
            subscribers,
            shutdown,
        }
    }

    /// Latest committed snapshot. Never blocks.
    pub fn current_snapshot(&self) -> Arc<EntityStoreSnapshot> {
        self.current.load_full()
    }

    /// Run `action` against a session over the current snapshot and commit it.
    ///
    /// If `action` fails nothing is installed and no update is emitted. The
    /// action must not call `update` on the same store.
    pub fn update<R, E>(&self, action: impl FnOnce(&mut EntityStoreUpdateSession) -> Result<R, E>) -> Result<R, E>
    where
        E: From<ShakeError>,
    {
        let started = Instant::now();
        let queue = lock(&self.queue);
        let Some(tx) = queue.as_ref() else {
            return Err(ShakeError::Disposed("EntityStore").into());
        };

        let mut session = EntityStoreUpdateSession::new(&self.current.load());
        let out = action(&mut session)?;
        let (snapshot, updated) = session.commit();
        let version = snapshot.version();
        let entities = snapshot.len();
        let touched = updated.len();

        self.current.store(Arc::new(snapshot));
        if tx.send(EntityUpdate::new(updated, version)).is_err() {
            debug!(version, "entity update consumer gone; update not broadcast");
        }
        drop(queue);

        debug!(version, touched, entities, "entity store updated");
        counter!("entity_store_updates_total", 1u64);
        histogram!("entity_store_update_ms", started.elapsed().as_secs_f64() * 1000.0);
        gauge!("entity_store_entities", entities as f64);
        Ok(out)
    }

    /// Stream of committed updates, in commit order.
    pub fn watch(&self) -> Result<Observable<EntityUpdate>, ShakeError> {
        if self.is_disposed() {
            return Err(ShakeError::Disposed("EntityStore"));
        }
        Ok(self.subscribers.observable())
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.queue).is_none()
    }

    /// Stop the consumer and complete all watchers. Idempotent.
    ///
    /// Updates still queued at this point are dropped.
    pub fn dispose(&self) {
        let tx = lock(&self.queue).take();
        if tx.is_some() {
            self.shutdown.cancel();
            debug!("entity store disposed");
        }
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn drain_updates(
    mut rx: mpsc::UnboundedReceiver<EntityUpdate>,
    subscribers: Subscribers<EntityUpdate>,
    shutdown: CancellationToken,
) {
    debug!("entity update consumer started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(update) => subscribers.notify(update),
                None => break,
            },
        }
    }
    rx.close();
    subscribers.complete();
    info!("entity update consumer stopped");
}
