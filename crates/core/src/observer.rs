//! Push-based fan-out: observers, copy-on-write subscriber lists and RAII subscriptions.
//!
//! Subscribe/unsubscribe swap in a new list; notification iterates whatever
//! list it loaded, so it never blocks on (or is disturbed by) concurrent
//! subscription changes.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;

use crate::error::ShakeError;
use crate::sync::lock;

/// Receiver of a push sequence.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);

    fn on_error(&self, _error: &ShakeError) {}

    fn on_completed(&self) {}
}

struct FnObserver<F, T> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

impl<F, T> Observer<T> for FnObserver<F, T>
where
    F: Fn(T) + Send + Sync,
{
    fn on_next(&self, value: T) {
        (self.f)(value)
    }
}

/// Wrap a closure as an observer that only cares about values.
pub fn observer_fn<T, F>(f: F) -> Arc<dyn Observer<T>>
where
    T: 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(FnObserver { f, _marker: PhantomData })
}

/// Handle that detaches an observer (or cancels a session) when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self { teardown: Some(Box::new(teardown)) }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(f) = self.teardown.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.teardown.is_some()).finish()
    }
}

struct Slot<T> {
    id: u64,
    observer: Arc<dyn Observer<T>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, observer: Arc::clone(&self.observer) }
    }
}

struct SubscriberList<T> {
    slots: ArcSwap<Vec<Slot<T>>>,
    write: Mutex<()>,
    next_id: AtomicU64,
}

impl<T> SubscriberList<T> {
    fn remove(&self, id: u64) {
        let _guard = lock(&self.write);
        let current = self.slots.load_full();
        if current.iter().any(|s| s.id == id) {
            let next: Vec<Slot<T>> = current.iter().filter(|s| s.id != id).cloned().collect();
            self.slots.store(Arc::new(next));
        }
    }
}

/// Copy-on-write list of observers. Cloning yields another handle to the same list.
pub struct Subscribers<T> {
    inner: Arc<SubscriberList<T>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriberList {
                slots: ArcSwap::from_pointee(Vec::new()),
                write: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `error` to every current observer.
    pub fn error(&self, error: &ShakeError) {
        let slots = self.inner.slots.load_full();
        for slot in slots.iter() {
            slot.observer.on_error(error);
        }
    }

    /// Complete every current observer and detach them all.
    pub fn complete(&self) {
        let slots = {
            let _guard = lock(&self.inner.write);
            self.inner.slots.swap(Arc::new(Vec::new()))
        };
        for slot in slots.iter() {
            slot.observer.on_completed();
        }
    }

    /// Read-only view that only allows subscribing.
    pub fn observable(&self) -> Observable<T> {
        Observable { subscribers: self.clone() }
    }
}

impl<T: 'static> Subscribers<T> {
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let _guard = lock(&self.inner.write);
            let mut next: Vec<Slot<T>> = self.inner.slots.load().iter().cloned().collect();
            next.push(Slot { id, observer });
            self.inner.slots.store(Arc::new(next));
        }
        let list: Weak<SubscriberList<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(list) = list.upgrade() {
                list.remove(id);
            }
        })
    }
}

impl<T: Clone> Subscribers<T> {
    /// Deliver `value` to the observers subscribed at the time of the call, in subscription order.
    pub fn notify(&self, value: T) {
        let slots = self.inner.slots.load_full();
        for slot in slots.iter() {
            slot.observer.on_next(value.clone());
        }
    }
}

/// Subscribe-only handle onto a [`Subscribers`] list.
pub struct Observable<T> {
    subscribers: Subscribers<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { subscribers: self.subscribers.clone() }
    }
}

impl<T: 'static> Observable<T> {
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        self.subscribers.subscribe(observer)
    }

    pub fn subscribe_fn(&self, f: impl Fn(T) + Send + Sync + 'static) -> Subscription {
        self.subscribe(observer_fn(f))
    }
}
