use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use metrics::counter;
use shake_core::sync::lock;
use shake_core::{Observer, ShakeResult, Subscription};
use tokio::time::Instant;
use tracing::debug;

use crate::operation_store::{OperationStore, OperationStoreInner, OperationUpdate, OperationUpdateKind};

pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(300);

/// Eviction of unsubscribed stored operations.
///
/// Purely reactive: sweeps run on the back of operation store updates, never on a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Evict operations without subscribers once untouched for `time_to_live`.
    /// Sweeps run at most once per `time_to_live`.
    Default { time_to_live: Duration },
    /// Evict every operation without subscribers on each update.
    NoCache,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Default { time_to_live: DEFAULT_TIME_TO_LIVE }
    }
}

impl CachePolicy {
    /// Start applying the policy to `store`. The policy stays active while the sweeper lives.
    pub fn attach(self, store: &OperationStore) -> ShakeResult<CacheSweeper> {
        let updates = store.watch_all()?;
        let observer = SweepObserver {
            store: store.downgrade(),
            policy: self,
            last_sweep: Mutex::new(Instant::now()),
            sweeping: AtomicBool::new(false),
        };
        let subscription = updates.subscribe(Arc::new(observer));
        Ok(CacheSweeper { policy: self, _subscription: subscription })
    }
}

/// Guard keeping a [`CachePolicy`] attached to its store.
#[derive(Debug)]
pub struct CacheSweeper {
    policy: CachePolicy,
    _subscription: Subscription,
}

impl CacheSweeper {
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }
}

struct SweepObserver {
    store: Weak<OperationStoreInner>,
    policy: CachePolicy,
    last_sweep: Mutex<Instant>,
    sweeping: AtomicBool,
}

impl SweepObserver {
    fn sweep_stale(&self, store: &OperationStoreInner, ttl: Duration) {
        let now = Instant::now();
        if now.duration_since(*lock(&self.last_sweep)) < ttl {
            return;
        }
        if self.sweeping.swap(true, Ordering::AcqRel) {
            return;
        }
        let due = {
            let mut last = lock(&self.last_sweep);
            if now.duration_since(*last) >= ttl {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            let removed = store.remove_where(|op| {
                op.subscriber_count() == 0 && now.duration_since(op.last_modified()) >= ttl
            });
            if !removed.is_empty() {
                debug!(removed = removed.len(), ttl_secs = ttl.as_secs(), "evicted stale operations");
                counter!("cache_policy_evictions_total", removed.len() as u64);
            }
        }
        self.sweeping.store(false, Ordering::Release);
    }
}

impl Observer<OperationUpdate> for SweepObserver {
    fn on_next(&self, update: OperationUpdate) {
        if update.kind() == OperationUpdateKind::Removed {
            return;
        }
        let Some(store) = self.store.upgrade() else { return };
        match self.policy {
            CachePolicy::NoCache => {
                let removed = store.remove_where(|op| op.subscriber_count() == 0);
                if !removed.is_empty() {
                    counter!("cache_policy_evictions_total", removed.len() as u64);
                }
            }
            CachePolicy::Default { time_to_live } => self.sweep_stale(&store, time_to_live),
        }
    }
}
