use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::EntityId;

/// An opaque entity value. Only generated mapping code knows its concrete type.
pub type Entity = Arc<dyn Any + Send + Sync>;

/// Persistent map backing snapshots; clones share structure.
pub type EntityMap = im::HashMap<EntityId, Entity>;

/// An entity together with its id.
#[derive(Clone)]
pub struct EntityInfo {
    pub id: EntityId,
    pub entity: Entity,
}

impl EntityInfo {
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.entity).downcast::<T>().ok()
    }
}

impl fmt::Debug for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInfo").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Immutable, versioned view of every entity at one point in time.
///
/// A published snapshot is never mutated; updates build a new one.
#[derive(Clone, Default)]
pub struct EntityStoreSnapshot {
    version: u64,
    entities: EntityMap,
}

impl EntityStoreSnapshot {
    pub fn new(version: u64, entities: EntityMap) -> Self {
        Self { version, entities }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Entity stored under `id`, if present and of type `T`.
    pub fn get_entity<T: Any + Send + Sync>(&self, id: &EntityId) -> Option<Arc<T>> {
        self.entities.get(id).and_then(|e| Arc::clone(e).downcast::<T>().ok())
    }

    /// All entities of `type_name` that are of type `T`, in no particular order.
    pub fn get_entities<T: Any + Send + Sync>(&self, type_name: &str) -> Vec<Arc<T>> {
        self.entities
            .iter()
            .filter(|(id, _)| id.type_name() == type_name)
            .filter_map(|(_, e)| Arc::clone(e).downcast::<T>().ok())
            .collect()
    }

    /// Entities for `ids` in the given order, skipping missing ids and type mismatches.
    pub fn get_entities_by_ids<'a, T: Any + Send + Sync>(
        &self,
        ids: impl IntoIterator<Item = &'a EntityId>,
    ) -> Vec<Arc<T>> {
        ids.into_iter().filter_map(|id| self.get_entity::<T>(id)).collect()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> + '_ {
        self.entities.keys()
    }

    pub fn entity_infos(&self) -> Vec<EntityInfo> {
        self.entities
            .iter()
            .map(|(id, entity)| EntityInfo { id: id.clone(), entity: Arc::clone(entity) })
            .collect()
    }
}

impl fmt::Debug for EntityStoreSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStoreSnapshot")
            .field("version", &self.version)
            .field("entities", &self.entities.len())
            .finish()
    }
}
