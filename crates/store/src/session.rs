use std::any::Any;
use std::sync::Arc;

use shake_core::{Entity, EntityId, EntityIdSet, EntityMap, EntityStoreSnapshot, ShakeError, ShakeResult};

/// Single-writer mutation scope over a private copy of the current snapshot.
///
/// Nothing done here is visible to readers until the owning
/// [`EntityStore::update`](crate::EntityStore::update) commits the session.
pub struct EntityStoreUpdateSession {
    entities: EntityMap,
    updated: EntityIdSet,
    version: u64,
}

impl EntityStoreUpdateSession {
    pub(crate) fn new(snapshot: &EntityStoreSnapshot) -> Self {
        Self {
            entities: snapshot.entities().clone(),
            updated: EntityIdSet::default(),
            version: snapshot.version().wrapping_add(1),
        }
    }

    /// Version the snapshot will carry once committed.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_entity<T: Any + Send + Sync>(&mut self, id: EntityId, entity: T) -> ShakeResult<()> {
        self.set_entity_arc(id, Arc::new(entity))
    }

    pub fn set_entity_arc(&mut self, id: EntityId, entity: Entity) -> ShakeResult<()> {
        ensure_valid(&id)?;
        self.entities.insert(id.clone(), entity);
        self.updated.insert(id);
        Ok(())
    }

    /// Remove `id`; the id counts as updated even if it was absent.
    pub fn remove_entity(&mut self, id: &EntityId) -> ShakeResult<()> {
        ensure_valid(id)?;
        self.entities.remove(id);
        self.updated.insert(id.clone());
        Ok(())
    }

    /// Remove every id; all ids are validated before anything is removed.
    pub fn remove_entity_range<'a>(&mut self, ids: impl IntoIterator<Item = &'a EntityId>) -> ShakeResult<()> {
        let ids: Vec<&EntityId> = ids.into_iter().collect();
        for id in &ids {
            ensure_valid(id)?;
        }
        for id in ids {
            self.entities.remove(id);
            self.updated.insert(id.clone());
        }
        Ok(())
    }

    /// Read through the pending state, including this session's writes.
    pub fn get_entity<T: Any + Send + Sync>(&self, id: &EntityId) -> Option<Arc<T>> {
        self.entities.get(id).and_then(|e| Arc::clone(e).downcast::<T>().ok())
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn updated_entity_ids(&self) -> &EntityIdSet {
        &self.updated
    }

    pub(crate) fn commit(self) -> (EntityStoreSnapshot, EntityIdSet) {
        (EntityStoreSnapshot::new(self.version, self.entities), self.updated)
    }
}

fn ensure_valid(id: &EntityId) -> ShakeResult<()> {
    if id.is_default() {
        return Err(ShakeError::InvalidEntityId("the default entity id cannot be stored".to_string()));
    }
    Ok(())
}
