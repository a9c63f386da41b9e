use std::sync::Arc;

use serde_json::Value;
use shake_core::{
    ClientError, Location, OperationResult, OperationResultDataFactory, OperationResultDataInfo,
};
use shake_store::{EntityStore, EntityStoreUpdateSession};
use smallvec::SmallVec;
use tracing::warn;

use crate::transport::Response;

/// Turns one (possibly patched) response into a typed result.
///
/// Building never fails: problems end up as client errors on the result.
pub trait OperationResultBuilder<B, T>: Send + Sync {
    fn build(&self, response: &Response<B>) -> OperationResult<T>;
}

/// Operation specific half of [`JsonResultBuilder`]: normalizes `data` into
/// entities and knows the factory that materializes the typed view.
pub trait ResultDataBuilder<T>: Send + Sync {
    /// Write the entities found in `data` and describe the result's dependency closure.
    fn update_entities(
        &self,
        session: &mut EntityStoreUpdateSession,
        data: &Value,
    ) -> anyhow::Result<Arc<dyn OperationResultDataInfo>>;

    fn factory(&self) -> Arc<dyn OperationResultDataFactory<T>>;
}

/// Result builder for GraphQL JSON bodies (`data`, `errors`, `extensions`).
pub struct JsonResultBuilder<T> {
    entity_store: Arc<EntityStore>,
    data_builder: Arc<dyn ResultDataBuilder<T>>,
}

impl<T> Clone for JsonResultBuilder<T> {
    fn clone(&self) -> Self {
        Self { entity_store: Arc::clone(&self.entity_store), data_builder: Arc::clone(&self.data_builder) }
    }
}

impl<T: Send + Sync + 'static> JsonResultBuilder<T> {
    pub fn new(entity_store: Arc<EntityStore>, data_builder: Arc<dyn ResultDataBuilder<T>>) -> Self {
        Self { entity_store, data_builder }
    }

    fn build_data(&self, data: &Value) -> anyhow::Result<(T, Arc<dyn OperationResultDataInfo>)> {
        let info = self.entity_store.update(|session| {
            let info = self.data_builder.update_entities(session, data)?;
            Ok::<_, anyhow::Error>(info.with_version(session.version()))
        })?;
        let snapshot = self.entity_store.current_snapshot();
        let value = self.data_builder.factory().create(info.as_ref(), &snapshot)?;
        Ok((value, info))
    }
}

impl<T: Send + Sync + 'static> OperationResultBuilder<Value, T> for JsonResultBuilder<T> {
    fn build(&self, response: &Response<Value>) -> OperationResult<T> {
        let mut errors = Vec::new();
        let mut extensions = response.extensions().cloned().unwrap_or_default();
        let mut data = None;
        let mut info = None;

        if let Some(exception) = response.exception() {
            errors.push(ClientError::from_exception(Arc::clone(exception)));
        }

        if let Some(body) = response.body() {
            if let Some(list) = body.get("errors").and_then(Value::as_array) {
                errors.extend(list.iter().map(parse_client_error));
            }
            if let Some(ext) = body.get("extensions").and_then(Value::as_object) {
                extensions.extend(ext.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            match body.get("data") {
                Some(payload) if !payload.is_null() => match self.build_data(payload) {
                    Ok((value, data_info)) => {
                        data = Some(value);
                        info = Some(data_info);
                    }
                    Err(error) => {
                        warn!(error = %format!("{error:#}"), "failed to normalize response data");
                        errors.push(ClientError::from_exception(Arc::new(error)));
                    }
                },
                _ => {}
            }
        }

        OperationResult::new(data, info, self.data_builder.factory())
            .with_errors(errors)
            .with_extensions(extensions)
            .with_context_data(response.context_data().cloned().unwrap_or_default())
    }
}

/// GraphQL error object to [`ClientError`]; unknown shapes keep what they can.
fn parse_client_error(error: &Value) -> ClientError {
    let Some(obj) = error.as_object() else {
        return ClientError::new(error.to_string());
    };
    let message = obj.get("message").and_then(Value::as_str).unwrap_or("unknown error");
    let mut out = ClientError::new(message);
    out.path = obj.get("path").and_then(Value::as_array).cloned();
    if let Some(locations) = obj.get("locations").and_then(Value::as_array) {
        out.locations = locations
            .iter()
            .filter_map(|l| {
                let line = u32::try_from(l.get("line")?.as_u64()?).ok()?;
                let column = u32::try_from(l.get("column")?.as_u64()?).ok()?;
                Some(Location { line, column })
            })
            .collect::<SmallVec<_>>();
    }
    if let Some(ext) = obj.get("extensions").and_then(Value::as_object) {
        out.code = ext.get("code").and_then(Value::as_str).map(str::to_string);
        out.extensions = ext.clone();
    }
    out
}
