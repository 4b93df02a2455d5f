//! Store configuration.
//!
//! Plain settings live in [`StoreConfig`], which deserializes from JSON so it
//! can come from a settings file. Collaborators (backend, serializer, content
//! storage, identifier generator) are wired through
//! [`StoreBuilder`](crate::StoreBuilder).

use serde::{Deserialize, Serialize};

/// Transaction isolation requested from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prepended to every table name.
    pub table_prefix: String,
    /// Maximum number of idle session states kept for reuse.
    pub session_pool_size: usize,
    /// Collapse concurrent identical expensive calls into one execution.
    pub query_gating_enabled: bool,
    /// Maximum statements sent in one batch by the command queue.
    pub command_batch_size: usize,
    /// Maximum ids per content-storage round trip.
    pub content_page_size: usize,
    /// Ids reserved per round trip by the block identifier generator.
    pub id_block_size: i64,
    pub isolation_level: IsolationLevel,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            session_pool_size: 16,
            query_gating_enabled: true,
            command_batch_size: 128,
            content_page_size: 128,
            id_block_size: 20,
            isolation_level: IsolationLevel::default(),
        }
    }
}

impl StoreConfig {
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_session_pool_size(mut self, size: usize) -> Self {
        self.session_pool_size = size;
        self
    }

    pub fn with_query_gating(mut self, enabled: bool) -> Self {
        self.query_gating_enabled = enabled;
        self
    }

    pub fn with_command_batch_size(mut self, size: usize) -> Self {
        self.command_batch_size = size.max(1);
        self
    }

    pub fn with_content_page_size(mut self, size: usize) -> Self {
        self.content_page_size = size.max(1);
        self
    }

    pub fn with_id_block_size(mut self, size: i64) -> Self {
        self.id_block_size = size.max(1);
        self
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }
}
