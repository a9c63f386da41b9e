#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shake_core::sync::lock;
use shake_core::{
    DataInfo, Document, EntityId, EntityIdSet, EntityStoreSnapshot, Observer, OperationKind, OperationRequest,
    OperationResult, OperationResultDataFactory, OperationResultDataInfo,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub name: String,
}

pub fn author(name: &str) -> Author {
    Author { name: name.to_string() }
}

pub fn author_id(n: u64) -> EntityId {
    EntityId::new("Author", n)
}

/// Joins the names of all authors in the dependency set, sorted.
#[derive(Default)]
pub struct AuthorNamesFactory {
    pub calls: Mutex<usize>,
}

impl OperationResultDataFactory<String> for AuthorNamesFactory {
    fn create(&self, info: &dyn OperationResultDataInfo, snapshot: &EntityStoreSnapshot) -> anyhow::Result<String> {
        *lock(&self.calls) += 1;
        let mut names: Vec<String> = snapshot
            .get_entities_by_ids::<Author>(info.entity_ids().iter())
            .iter()
            .map(|a| a.name.clone())
            .collect();
        names.sort();
        Ok(names.join(","))
    }
}

pub fn request(name: &str) -> OperationRequest {
    let doc = Arc::new(Document::new(OperationKind::Query, format!("query {name} {{ authors {{ id name }} }}")));
    OperationRequest::new(name, doc)
}

pub fn result_for(
    data: &str,
    ids: &[EntityId],
    version: u64,
    factory: Arc<AuthorNamesFactory>,
) -> Arc<OperationResult<String>> {
    let ids: EntityIdSet = ids.iter().cloned().collect();
    let info: Arc<dyn OperationResultDataInfo> = Arc::new(DataInfo::new(ids, version, ()));
    Arc::new(OperationResult::new(Some(data.to_string()), Some(info), factory))
}

/// Records everything an observer receives.
pub struct Recorder<T> {
    pub values: Mutex<Vec<T>>,
    pub errors: Mutex<Vec<String>>,
    pub completed: Mutex<usize>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self { values: Mutex::new(Vec::new()), errors: Mutex::new(Vec::new()), completed: Mutex::new(0) }
    }
}

impl<T> Recorder<T> {
    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn completed(&self) -> usize {
        *lock(&self.completed)
    }
}

impl<T: Send> Observer<T> for Recorder<T> {
    fn on_next(&self, value: T) {
        lock(&self.values).push(value);
    }

    fn on_error(&self, error: &shake_core::ShakeError) {
        lock(&self.errors).push(error.to_string());
    }

    fn on_completed(&self) {
        *lock(&self.completed) += 1;
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
