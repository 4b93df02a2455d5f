//! Documents - typed entities and their type-erased form inside a session.
//!
//! ## Example
//!
//! ```ignore
//! use docweave::Document;
//!
//! #[derive(Serialize, Deserialize, Clone, Document)]
//! #[document(type_name = "Article")]
//! struct Article {
//!     #[document(id)]
//!     pub id: i64,
//!     pub title: String,
//!     pub day: u32,
//! }
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Result;

/// An entity persisted as serialized content in the Document table.
///
/// An id of `0` means the entity has not been assigned one yet.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stored in the `Type` column.
    const TYPE_NAME: &'static str;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);
}

/// Object-safe view of a [`Document`], so one session can hold many types.
pub trait ErasedDocument: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn document_type(&self) -> TypeId;

    fn document_id(&self) -> i64;

    fn to_value(&self) -> Result<Value>;

    /// Deserialize `content` into the same concrete type as `self`.
    fn decode(&self, content: Value) -> Result<Arc<dyn ErasedDocument>>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Document> ErasedDocument for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn document_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn document_id(&self) -> i64 {
        Document::id(self)
    }

    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn decode(&self, content: Value) -> Result<Arc<dyn ErasedDocument>> {
        let entity: T = serde_json::from_value(content)?;
        Ok(Arc::new(entity))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast an erased snapshot back to `T`.
pub(crate) fn downcast<T: Document>(entity: &dyn ErasedDocument) -> Option<T> {
    entity.as_any().downcast_ref::<T>().cloned()
}

/// One row of a collection's Document table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: i64,
    pub type_name: String,
    /// Serialized content, `None` when content lives outside the Document row.
    pub content: Option<String>,
    pub version: i64,
}

impl DocumentRecord {
    pub fn new(id: i64, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            content: None,
            version: 0,
        }
    }
}
