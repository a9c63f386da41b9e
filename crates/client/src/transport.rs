use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::{Map, Value};
use shake_core::OperationRequest;

/// One transport payload: a body or the failure that replaced it.
#[derive(Debug, Clone)]
pub struct Response<B> {
    body: Option<B>,
    exception: Option<Arc<anyhow::Error>>,
    is_patch: bool,
    has_next: bool,
    extensions: Option<Map<String, Value>>,
    context_data: Option<Map<String, Value>>,
}

impl<B> Response<B> {
    pub fn new(body: B) -> Self {
        Self { body: Some(body), exception: None, is_patch: false, has_next: false, extensions: None, context_data: None }
    }

    /// Response that carries a transport failure instead of a body.
    pub fn from_exception(exception: anyhow::Error) -> Self {
        Self {
            body: None,
            exception: Some(Arc::new(exception)),
            is_patch: false,
            has_next: false,
            extensions: None,
            context_data: None,
        }
    }

    /// Incremental payload to be merged into the previous response.
    pub fn patch(mut self) -> Self {
        self.is_patch = true;
        self
    }

    pub fn with_has_next(mut self, has_next: bool) -> Self {
        self.has_next = has_next;
        self
    }

    pub fn with_extensions(mut self, extensions: Map<String, Value>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn with_context_data(mut self, context_data: Map<String, Value>) -> Self {
        self.context_data = Some(context_data);
        self
    }

    pub fn with_body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    pub fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<B> {
        self.body
    }

    pub fn exception(&self) -> Option<&Arc<anyhow::Error>> {
        self.exception.as_ref()
    }

    pub fn is_patch(&self) -> bool {
        self.is_patch
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn extensions(&self) -> Option<&Map<String, Value>> {
        self.extensions.as_ref()
    }

    pub fn context_data(&self) -> Option<&Map<String, Value>> {
        self.context_data.as_ref()
    }
}

pub type ResponseStream<B> = BoxStream<'static, anyhow::Result<Response<B>>>;

/// Transport seam. One call per execution; the stream ends when the server is done.
///
/// Yielding `Err` aborts the execution; a [`Response::from_exception`] item is
/// instead turned into a client error on an otherwise regular result.
pub trait Connection<B>: Send + Sync {
    fn execute(&self, request: &OperationRequest) -> ResponseStream<B>;
}
