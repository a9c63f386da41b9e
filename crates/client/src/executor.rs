use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use shake_core::sync::lock;
use shake_core::{
    observer_fn, Observer, OperationKind, OperationRequest, OperationResult, ShakeError, ShakeResult, Subscription,
};
use shake_store::OperationStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::builder::OperationResultBuilder;
use crate::patcher::{PatcherFactory, ResultPatcher};
use crate::transport::{Connection, Response};

type SharedResult<T> = Arc<OperationResult<T>>;
type ResultObserver<T> = Arc<dyn Observer<SharedResult<T>>>;

/// Where a watched operation gets its results from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    /// Always fetch; results are still written through to the store.
    #[default]
    NetworkOnly,
    /// Serve a cached result when one exists, fetch otherwise.
    CacheFirst,
    /// Emit the cached result right away, then fetch anyway.
    CacheAndNetwork,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::NetworkOnly => "network-only",
            ExecutionStrategy::CacheFirst => "cache-first",
            ExecutionStrategy::CacheAndNetwork => "cache-and-network",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = ShakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "network-only" | "networkonly" => Ok(ExecutionStrategy::NetworkOnly),
            "cache-first" | "cachefirst" => Ok(ExecutionStrategy::CacheFirst),
            "cache-and-network" | "cacheandnetwork" => Ok(ExecutionStrategy::CacheAndNetwork),
            other => Err(ShakeError::Argument { name: "strategy", reason: format!("unknown execution strategy `{other}`") }),
        }
    }
}

struct ExecutorInner<B, T> {
    connection: Arc<dyn Connection<B>>,
    result_builder: Arc<dyn OperationResultBuilder<B, T>>,
    result_patcher: PatcherFactory<B>,
    operation_store: Arc<OperationStore>,
    strategy: ExecutionStrategy,
}

/// Runs operations against a connection and keeps their results in the operation store.
pub struct OperationExecutor<B, T> {
    inner: Arc<ExecutorInner<B, T>>,
}

impl<B, T> Clone for OperationExecutor<B, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B, T> OperationExecutor<B, T>
where
    B: Send + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(
        connection: Arc<dyn Connection<B>>,
        result_builder: Arc<dyn OperationResultBuilder<B, T>>,
        result_patcher: PatcherFactory<B>,
        operation_store: Arc<OperationStore>,
        strategy: ExecutionStrategy,
    ) -> Self {
        Self { inner: Arc::new(ExecutorInner { connection, result_builder, result_patcher, operation_store, strategy }) }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.inner.strategy
    }

    pub fn operation_store(&self) -> &Arc<OperationStore> {
        &self.inner.operation_store
    }

    /// Fetch `request` and return the final result of the response sequence.
    ///
    /// Every intermediate result (incremental payloads) is written to the store too.
    pub async fn execute(&self, request: &OperationRequest) -> ShakeResult<SharedResult<T>> {
        let mut last = None;
        let mut responses = self.inner.connection.execute(request);
        let mut patcher = (self.inner.result_patcher)();
        while let Some(next) = responses.next().await {
            let response = next.map_err(ShakeError::Transport)?;
            let result = self.inner.process(request, response, patcher.as_mut())?;
            last = Some(result);
        }
        last.ok_or_else(|| ShakeError::InvalidOperation(format!("operation `{}` produced no response", request.name())))
    }

    /// Lazy handle: nothing happens until [`OperationWatch::subscribe`].
    ///
    /// `strategy` overrides the executor default for this watch.
    pub fn watch(&self, request: OperationRequest, strategy: Option<ExecutionStrategy>) -> OperationWatch<B, T> {
        OperationWatch { executor: self.clone(), request, strategy: strategy.unwrap_or(self.inner.strategy) }
    }
}

impl<B, T> ExecutorInner<B, T>
where
    B: Send + 'static,
    T: Send + Sync + 'static,
{
    fn process(
        &self,
        request: &OperationRequest,
        response: Response<B>,
        patcher: &mut dyn ResultPatcher<B>,
    ) -> ShakeResult<SharedResult<T>> {
        let response = if response.is_patch() {
            patcher.patch_response(response).map_err(ShakeError::Transport)?
        } else {
            patcher.set_response(&response);
            response
        };
        let result = Arc::new(self.result_builder.build(&response));
        counter!("executor_responses_total", 1u64);
        self.operation_store.set(request, Arc::clone(&result))?;
        Ok(result)
    }
}

/// A watched operation. Each subscription is an independent session.
pub struct OperationWatch<B, T> {
    executor: OperationExecutor<B, T>,
    request: OperationRequest,
    strategy: ExecutionStrategy,
}

impl<B, T> Clone for OperationWatch<B, T> {
    fn clone(&self) -> Self {
        Self { executor: self.executor.clone(), request: self.request.clone(), strategy: self.strategy }
    }
}

impl<B, T> OperationWatch<B, T>
where
    B: Send + 'static,
    T: Send + Sync + 'static,
{
    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Start a session for `observer`. Network work runs on a spawned task, so
    /// this must be called inside a Tokio runtime. Dropping the returned
    /// subscription cancels the request and detaches from the store.
    pub fn subscribe(&self, observer: ResultObserver<T>) -> ShakeResult<Subscription> {
        let store = &self.executor.inner.operation_store;
        let session = Arc::new(ObserverSession::default());

        if self.strategy == ExecutionStrategy::NetworkOnly || self.request.document().kind() == OperationKind::Subscription {
            self.begin_execute(observer, Arc::clone(&session));
            return Ok(session.into_subscription());
        }

        let cached = store.try_get::<T>(&self.request);
        let has_cached = cached.is_some();
        if let Some(result) = cached {
            observer.on_next(result);
        }

        let store_subscription = store.watch::<T>(&self.request)?.subscribe(Arc::clone(&observer))?;
        session.set_store_subscription(store_subscription);

        if self.strategy != ExecutionStrategy::CacheFirst || !has_cached {
            self.begin_execute(observer, Arc::clone(&session));
        }
        Ok(session.into_subscription())
    }

    pub fn subscribe_fn(&self, f: impl Fn(SharedResult<T>) + Send + Sync + 'static) -> ShakeResult<Subscription> {
        self.subscribe(observer_fn(f))
    }

    fn begin_execute(&self, observer: ResultObserver<T>, session: Arc<ObserverSession>) {
        let inner = Arc::clone(&self.executor.inner);
        let request = self.request.clone();
        tokio::spawn(async move {
            let outcome = run_session(&inner, &request, &observer, &session).await;
            if session.is_cancelled() {
                debug!(operation = request.name(), "watch session cancelled");
                return;
            }
            if let Err(error) = outcome {
                warn!(operation = request.name(), error = %error, "operation stream failed");
                observer.on_error(&error);
            }
            observer.on_completed();
        });
    }
}

async fn run_session<B, T>(
    inner: &ExecutorInner<B, T>,
    request: &OperationRequest,
    observer: &ResultObserver<T>,
    session: &ObserverSession,
) -> ShakeResult<()>
where
    B: Send + 'static,
    T: Send + Sync + 'static,
{
    let mut responses = inner.connection.execute(request);
    let mut patcher = (inner.result_patcher)();
    loop {
        let next = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Ok(()),
            next = responses.next() => next,
        };
        let Some(next) = next else { return Ok(()) };
        let result = inner.process(request, next.map_err(ShakeError::Transport)?, patcher.as_mut())?;
        if session.is_cancelled() {
            return Ok(());
        }
        // The first result goes straight to the observer; afterwards the store
        // subscription delivers, so nothing arrives twice.
        if !session.has_store_subscription() {
            observer.on_next(result);
            let store_subscription = inner.operation_store.watch::<T>(request)?.subscribe(Arc::clone(observer))?;
            session.set_store_subscription(store_subscription);
        }
    }
}

/// State shared by one subscriber's network task and its subscription handle.
#[derive(Default)]
struct ObserverSession {
    cancel: CancellationToken,
    store_subscription: Mutex<Option<Subscription>>,
}

impl ObserverSession {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn has_store_subscription(&self) -> bool {
        lock(&self.store_subscription).is_some()
    }

    fn set_store_subscription(&self, subscription: Subscription) {
        let mut slot = lock(&self.store_subscription);
        if self.cancel.is_cancelled() {
            drop(slot);
            drop(subscription);
            return;
        }
        *slot = Some(subscription);
    }

    fn into_subscription(self: Arc<Self>) -> Subscription {
        Subscription::new(move || {
            self.cancel.cancel();
            let detached = lock(&self.store_subscription).take();
            drop(detached);
        })
    }
}
