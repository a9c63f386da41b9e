//! Operation results, client errors and the data-info/data-factory contracts
//! that let a cached result be rebuilt from entities alone.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::{ShakeError, ShakeResult};
use crate::snapshot::EntityStoreSnapshot;
use crate::EntityIdSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// A GraphQL-level error attached to a result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "SmallVec::is_empty")]
    pub locations: SmallVec<[Location; 2]>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    #[serde(skip)]
    pub exception: Option<Arc<anyhow::Error>>,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Client error standing in for a failure that happened on our side
    /// (transport exception, response decomposition).
    pub fn from_exception(exception: Arc<anyhow::Error>) -> Self {
        let mut extensions = Map::new();
        extensions.insert("message".to_string(), Value::String(exception.to_string()));
        extensions.insert("stackTrace".to_string(), Value::String(format!("{exception:?}")));
        Self {
            message: format!("{exception:#}"),
            extensions,
            exception: Some(exception),
            ..Default::default()
        }
    }
}

/// Dependency record of a result: which entities it was built from, at which store version.
///
/// Implementations may carry extra non-entity payload for their factory; the
/// factory recovers the concrete type through [`OperationResultDataInfo::as_any`].
pub trait OperationResultDataInfo: Any + Send + Sync + fmt::Debug {
    fn entity_ids(&self) -> &EntityIdSet;

    fn version(&self) -> u64;

    /// Same record tagged with another version.
    fn with_version(&self, version: u64) -> Arc<dyn OperationResultDataInfo>;

    fn as_any(&self) -> &dyn Any;
}

/// Ready-made data info: entity closure plus an arbitrary payload of leaf values.
#[derive(Debug, Clone)]
pub struct DataInfo<P = ()> {
    entity_ids: Arc<EntityIdSet>,
    version: u64,
    payload: P,
}

impl<P> DataInfo<P> {
    pub fn new(entity_ids: EntityIdSet, version: u64, payload: P) -> Self {
        Self { entity_ids: Arc::new(entity_ids), version, payload }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl<P> OperationResultDataInfo for DataInfo<P>
where
    P: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn entity_ids(&self) -> &EntityIdSet {
        &self.entity_ids
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn with_version(&self, version: u64) -> Arc<dyn OperationResultDataInfo> {
        Arc::new(Self { entity_ids: Arc::clone(&self.entity_ids), version, payload: self.payload.clone() })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Rebuilds a typed result purely from a data info and an entity snapshot.
pub trait OperationResultDataFactory<T>: Send + Sync {
    fn create(&self, info: &dyn OperationResultDataInfo, snapshot: &EntityStoreSnapshot) -> anyhow::Result<T>;
}

/// Outcome of one operation. Immutable; observers receive it behind an `Arc`.
pub struct OperationResult<T> {
    data: Option<T>,
    data_info: Option<Arc<dyn OperationResultDataInfo>>,
    data_factory: Arc<dyn OperationResultDataFactory<T>>,
    errors: Arc<Vec<ClientError>>,
    extensions: Arc<Map<String, Value>>,
    context_data: Arc<Map<String, Value>>,
}

impl<T> OperationResult<T> {
    pub fn new(
        data: Option<T>,
        data_info: Option<Arc<dyn OperationResultDataInfo>>,
        data_factory: Arc<dyn OperationResultDataFactory<T>>,
    ) -> Self {
        Self {
            data,
            data_info,
            data_factory,
            errors: Arc::new(Vec::new()),
            extensions: Arc::new(Map::new()),
            context_data: Arc::new(Map::new()),
        }
    }

    pub fn with_errors(mut self, errors: Vec<ClientError>) -> Self {
        self.errors = Arc::new(errors);
        self
    }

    pub fn with_extensions(mut self, extensions: Map<String, Value>) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    pub fn with_context_data(mut self, context_data: Map<String, Value>) -> Self {
        self.context_data = Arc::new(context_data);
        self
    }

    /// New result with replaced data and data info; factory, errors,
    /// extensions and context data are shared with `self`.
    pub fn with_data(&self, data: T, data_info: Arc<dyn OperationResultDataInfo>) -> Self {
        Self {
            data: Some(data),
            data_info: Some(data_info),
            data_factory: Arc::clone(&self.data_factory),
            errors: Arc::clone(&self.errors),
            extensions: Arc::clone(&self.extensions),
            context_data: Arc::clone(&self.context_data),
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn data_info(&self) -> Option<&Arc<dyn OperationResultDataInfo>> {
        self.data_info.as_ref()
    }

    pub fn data_factory(&self) -> &Arc<dyn OperationResultDataFactory<T>> {
        &self.data_factory
    }

    pub fn errors(&self) -> &[ClientError] {
        &self.errors
    }

    pub fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    pub fn context_data(&self) -> &Map<String, Value> {
        &self.context_data
    }

    pub fn is_error_result(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.data.is_some()
    }

    pub fn ensure_no_errors(&self) -> ShakeResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ShakeError::Client(self.errors.as_ref().clone()))
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OperationResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationResult")
            .field("data", &self.data)
            .field("data_info", &self.data_info)
            .field("errors", &self.errors)
            .field("extensions", &self.extensions)
            .finish()
    }
}
