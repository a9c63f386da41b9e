//! Entity id <-> JSON conversion used by generated mapping code.

use serde_json::{Map, Value};

use crate::error::{ShakeError, ShakeResult};
use crate::EntityId;

const TYPENAME: &str = "__typename";

pub trait EntityIdSerializer: Send + Sync {
    fn parse(&self, obj: &Value) -> ShakeResult<EntityId>;

    fn format(&self, id: &EntityId) -> ShakeResult<Value>;
}

/// Default serializer: `{"__typename": "Author", "id": 1}` <-> `Author:1`.
///
/// Objects carrying more key fields than the id field become composite ids
/// whose value is the object of those fields.
#[derive(Debug, Clone)]
pub struct JsonEntityIdSerializer {
    id_field: String,
}

impl Default for JsonEntityIdSerializer {
    fn default() -> Self {
        Self { id_field: "id".to_string() }
    }
}

impl JsonEntityIdSerializer {
    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        Self { id_field: id_field.into() }
    }
}

impl EntityIdSerializer for JsonEntityIdSerializer {
    fn parse(&self, obj: &Value) -> ShakeResult<EntityId> {
        let map = obj
            .as_object()
            .ok_or_else(|| ShakeError::InvalidEntityId(format!("expected an object, got {obj}")))?;
        let type_name = map
            .get(TYPENAME)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ShakeError::InvalidEntityId(format!("missing {TYPENAME} in {obj}")))?;

        let keys: Map<String, Value> =
            map.iter().filter(|(k, _)| k.as_str() != TYPENAME).map(|(k, v)| (k.clone(), v.clone())).collect();
        match keys.len() {
            0 => Err(ShakeError::InvalidEntityId(format!("no key fields for {type_name}"))),
            1 if keys.contains_key(&self.id_field) => Ok(EntityId::new(type_name, keys[&self.id_field].clone())),
            _ => Ok(EntityId::new(type_name, Value::Object(keys))),
        }
    }

    fn format(&self, id: &EntityId) -> ShakeResult<Value> {
        if id.is_default() {
            return Err(ShakeError::InvalidEntityId("cannot format the default id".to_string()));
        }
        let mut out = Map::new();
        out.insert(TYPENAME.to_string(), Value::String(id.type_name().to_string()));
        match id.value() {
            Value::Object(keys) => out.extend(keys.iter().map(|(k, v)| (k.clone(), v.clone()))),
            scalar => {
                out.insert(self.id_field.clone(), scalar.clone());
            }
        }
        Ok(Value::Object(out))
    }
}
