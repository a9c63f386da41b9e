#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::{json, Value};
use shake_client::{Connection, Response, ResponseStream, ResultDataBuilder};
use shake_core::sync::lock;
use shake_core::{
    DataInfo, Document, EntityIdSerializer, EntityIdSet, EntityStoreSnapshot, JsonEntityIdSerializer, Observer,
    OperationKind, OperationRequest, OperationResult, OperationResultDataFactory, OperationResultDataInfo, ShakeError,
};
use shake_store::EntityStoreUpdateSession;

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// `{"book": {"__typename": "Book", "id": .., "title": .., "author": ..}}` -> `Book` entity.
#[derive(Default)]
pub struct BookDataBuilder;

impl ResultDataBuilder<String> for BookDataBuilder {
    fn update_entities(
        &self,
        session: &mut EntityStoreUpdateSession,
        data: &Value,
    ) -> anyhow::Result<Arc<dyn OperationResultDataInfo>> {
        let book = data.get("book").ok_or_else(|| anyhow!("response has no book"))?;
        let key = json!({"__typename": book.get("__typename"), "id": book.get("id")});
        let id = JsonEntityIdSerializer::default().parse(&key)?;
        let existing = session.get_entity::<Book>(&id);
        let field = |name: &str| book.get(name).and_then(Value::as_str).map(str::to_string);
        let merged = Book {
            title: field("title").or_else(|| existing.as_ref().and_then(|b| b.title.clone())),
            author: field("author").or_else(|| existing.as_ref().and_then(|b| b.author.clone())),
        };
        session.set_entity(id.clone(), merged)?;
        let ids: EntityIdSet = std::iter::once(id).collect();
        Ok(Arc::new(DataInfo::new(ids, 0, ())))
    }

    fn factory(&self) -> Arc<dyn OperationResultDataFactory<String>> {
        Arc::new(BookTitleFactory)
    }
}

/// Renders "Title" or "Title by Author" from the single book in the closure.
pub struct BookTitleFactory;

impl OperationResultDataFactory<String> for BookTitleFactory {
    fn create(&self, info: &dyn OperationResultDataInfo, snapshot: &EntityStoreSnapshot) -> anyhow::Result<String> {
        let book = snapshot
            .get_entities_by_ids::<Book>(info.entity_ids().iter())
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("book missing from snapshot"))?;
        let title = book.title.clone().unwrap_or_default();
        Ok(match &book.author {
            Some(author) => format!("{title} by {author}"),
            None => title,
        })
    }
}

pub fn book(id: u64, title: &str) -> Value {
    json!({"data": {"book": {"__typename": "Book", "id": id, "title": title}}})
}

pub fn query(name: &str) -> OperationRequest {
    OperationRequest::new(name, Arc::new(Document::new(OperationKind::Query, format!("query {name} {{ book {{ id title }} }}"))))
}

pub fn subscription(name: &str) -> OperationRequest {
    OperationRequest::new(
        name,
        Arc::new(Document::new(OperationKind::Subscription, format!("subscription {name} {{ book {{ id title }} }}"))),
    )
}

/// One step of a scripted response stream.
#[derive(Clone)]
pub enum Step {
    Body(Value),
    Patch(Value),
    Exception(&'static str),
    Fail(&'static str),
    Sleep(Duration),
    Hang,
}

/// Connection replaying one script per `execute` call, in order.
/// Calls beyond the last script replay the last one.
pub struct ScriptedConnection {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    last: Mutex<Vec<Step>>,
    pub calls: AtomicUsize,
}

impl ScriptedConnection {
    pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self { scripts: Mutex::new(scripts.into()), last: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Connection<Value> for ScriptedConnection {
    fn execute(&self, _request: &OperationRequest) -> ResponseStream<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = match lock(&self.scripts).pop_front() {
            Some(script) => {
                *lock(&self.last) = script.clone();
                script
            }
            None => lock(&self.last).clone(),
        };
        Box::pin(async_stream::stream! {
            for step in script {
                match step {
                    Step::Body(body) => { yield Ok(Response::new(body)); }
                    Step::Patch(body) => { yield Ok(Response::new(body).patch()); }
                    Step::Exception(msg) => { yield Ok(Response::from_exception(anyhow!(msg))); }
                    Step::Fail(msg) => { yield Err(anyhow!(msg)); }
                    Step::Sleep(d) => tokio::time::sleep(d).await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        })
    }
}

pub type Shared = Arc<OperationResult<String>>;

/// Records everything an observer receives.
#[derive(Default)]
pub struct Recorder {
    pub values: Mutex<Vec<Shared>>,
    pub errors: Mutex<Vec<String>>,
    pub completed: AtomicUsize,
}

impl Recorder {
    pub fn data(&self) -> Vec<String> {
        lock(&self.values).iter().map(|r| r.data().cloned().unwrap_or_default()).collect()
    }

    /// Received data with consecutive repeats collapsed. A result set right
    /// after an overlapping entity commit may also arrive as a recompute.
    pub fn distinct_data(&self) -> Vec<String> {
        let mut out = self.data();
        out.dedup();
        out
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl Observer<Shared> for Recorder {
    fn on_next(&self, value: Shared) {
        lock(&self.values).push(value);
    }

    fn on_error(&self, error: &ShakeError) {
        lock(&self.errors).push(error.to_string());
    }

    fn on_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
