//! IdentityMap - one tracked snapshot per document id within a session.

use std::collections::HashMap;
use std::sync::Arc;

use crate::document::ErasedDocument;

/// A document the session has loaded or saved.
#[derive(Clone)]
pub struct Tracked {
    pub entity: Arc<dyn ErasedDocument>,
    /// Version read from the Document table when the entity was loaded.
    pub version: i64,
}

impl std::fmt::Debug for Tracked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("type", &self.entity.type_name())
            .field("id", &self.entity.document_id())
            .field("version", &self.version)
            .finish()
    }
}

/// Session-confined, never shared between sessions.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(String, i64), Tracked>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entity` under `id`, replacing any previous snapshot.
    pub fn add(&mut self, collection: &str, id: i64, entity: Arc<dyn ErasedDocument>, version: i64) {
        self.entries
            .insert((collection.to_string(), id), Tracked { entity, version });
    }

    /// Id under which `entity` is tracked, if it is tracked as the same type.
    pub fn try_get_id(&self, collection: &str, entity: &dyn ErasedDocument) -> Option<i64> {
        let id = entity.document_id();
        self.entries
            .get(&(collection.to_string(), id))
            .filter(|tracked| tracked.entity.document_type() == entity.document_type())
            .map(|_| id)
    }

    pub fn try_get_entity_by_id(&self, collection: &str, id: i64) -> Option<&Tracked> {
        self.entries.get(&(collection.to_string(), id))
    }

    /// Replace the snapshot of an already tracked entity, keeping its version.
    pub fn refresh(&mut self, collection: &str, id: i64, entity: Arc<dyn ErasedDocument>) -> bool {
        match self.entries.get_mut(&(collection.to_string(), id)) {
            Some(tracked) => {
                tracked.entity = entity;
                true
            }
            None => false,
        }
    }

    pub fn set_version(&mut self, collection: &str, id: i64, version: i64) {
        if let Some(tracked) = self.entries.get_mut(&(collection.to_string(), id)) {
            tracked.version = version;
        }
    }

    pub fn remove(&mut self, collection: &str, id: i64) -> Option<Tracked> {
        self.entries.remove(&(collection.to_string(), id))
    }

    pub fn contains(&self, collection: &str, id: i64) -> bool {
        self.entries.contains_key(&(collection.to_string(), id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
