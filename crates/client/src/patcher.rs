use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

use crate::transport::Response;

/// Keeps the latest full response of one execution and folds incremental
/// payloads into it, so each patch can be built as a complete result.
pub trait ResultPatcher<B>: Send {
    fn set_response(&mut self, response: &Response<B>);

    /// Merge `response` into the held response and return the merged whole.
    fn patch_response(&mut self, response: Response<B>) -> Result<Response<B>>;
}

/// Creates a fresh patcher per execution.
pub type PatcherFactory<B> = Arc<dyn Fn() -> Box<dyn ResultPatcher<B>> + Send + Sync>;

/// Patcher for GraphQL incremental delivery over JSON.
///
/// Understands `@defer` payloads (`data` merged into the object at `path`)
/// and `@stream` payloads (`items` placed into the list at `path`, whose last
/// segment is the index of the first item), either at the top level of the
/// patch or inside an `incremental` array.
#[derive(Debug, Default, Clone)]
pub struct JsonResultPatcher {
    current: Option<Value>,
}

impl JsonResultPatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory() -> PatcherFactory<Value> {
        Arc::new(|| Box::new(JsonResultPatcher::new()) as Box<dyn ResultPatcher<Value>>)
    }
}

impl ResultPatcher<Value> for JsonResultPatcher {
    fn set_response(&mut self, response: &Response<Value>) {
        self.current = response.body().cloned();
    }

    fn patch_response(&mut self, response: Response<Value>) -> Result<Response<Value>> {
        let current = self.current.as_mut().ok_or_else(|| anyhow!("patch received before the initial response"))?;
        let patch = response.body().ok_or_else(|| anyhow!("patch response has no body"))?;

        match patch.get("incremental").and_then(Value::as_array) {
            Some(increments) => {
                for increment in increments {
                    apply_increment(current, increment)?;
                }
                append_errors(current, patch);
            }
            None => apply_increment(current, patch)?,
        }

        let has_next = patch.get("hasNext").and_then(Value::as_bool).unwrap_or(response.has_next());
        let mut merged = Response::new(current.clone()).with_has_next(has_next);
        if let Some(ext) = response.extensions() {
            merged = merged.with_extensions(ext.clone());
        }
        if let Some(ctx) = response.context_data() {
            merged = merged.with_context_data(ctx.clone());
        }
        Ok(merged)
    }
}

fn apply_increment(current: &mut Value, increment: &Value) -> Result<()> {
    let path = increment
        .get("path")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("incremental payload has no path"))?;
    append_errors(current, increment);

    let data = match current.get_mut("data") {
        Some(d) if !d.is_null() => d,
        _ => bail!("cannot patch a response without data"),
    };

    if let Some(patch) = increment.get("data") {
        merge(navigate(data, path)?, patch);
    } else if let Some(items) = increment.get("items").and_then(Value::as_array) {
        let (index, parent) = match path.split_last() {
            Some((Value::Number(n), parent)) => (n.as_u64().ok_or_else(|| anyhow!("negative stream index"))? as usize, parent),
            _ => bail!("stream path must end with an index"),
        };
        let list = navigate(data, parent)?
            .as_array_mut()
            .ok_or_else(|| anyhow!("stream target at {parent:?} is not a list"))?;
        for (offset, item) in items.iter().enumerate() {
            let at = index + offset;
            match at.cmp(&list.len()) {
                std::cmp::Ordering::Less => list[at] = item.clone(),
                std::cmp::Ordering::Equal => list.push(item.clone()),
                std::cmp::Ordering::Greater => bail!("stream item {at} skips past list end {}", list.len()),
            }
        }
    }
    Ok(())
}

fn navigate<'a>(mut value: &'a mut Value, path: &[Value]) -> Result<&'a mut Value> {
    for segment in path {
        value = match segment {
            Value::String(key) => value.get_mut(key.as_str()),
            Value::Number(n) => n.as_u64().and_then(|i| value.get_mut(i as usize)),
            _ => None,
        }
        .ok_or_else(|| anyhow!("patch path segment {segment} not found"))?;
    }
    Ok(value)
}

/// Objects merge key by key; anything else is replaced.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn append_errors(current: &mut Value, source: &Value) {
    let Some(errors) = source.get("errors").and_then(Value::as_array) else { return };
    if errors.is_empty() {
        return;
    }
    if let Some(obj) = current.as_object_mut() {
        let slot = obj.entry("errors").or_insert_with(|| Value::Array(Vec::new()));
        if let Some(list) = slot.as_array_mut() {
            list.extend(errors.iter().cloned());
        }
    }
}
