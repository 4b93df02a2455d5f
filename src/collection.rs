//! Table naming per collection.
//!
//! Each collection owns its own Document table, index tables and id sequence.
//! The default collection is the empty name and uses unqualified tables.

pub const DOCUMENT_TABLE: &str = "Document";
pub const CONTENT_TABLE: &str = "Content";
pub const IDENTIFIERS_TABLE: &str = "Identifiers";

/// Resolves physical table names for one collection under a table prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    prefix: String,
    collection: String,
}

impl TableNames {
    pub fn new(prefix: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `name` qualified by the collection, without the table prefix.
    pub fn collection_name(&self, name: &str) -> String {
        if self.collection.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.collection, name)
        }
    }

    /// Physical name of a collection-scoped table.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, self.collection_name(name))
    }

    pub fn document(&self) -> String {
        self.table(DOCUMENT_TABLE)
    }

    pub fn content(&self) -> String {
        self.table(CONTENT_TABLE)
    }

    pub fn index(&self, index_name: &str) -> String {
        self.table(index_name)
    }

    /// Bridge table linking a reduce index row to its documents.
    pub fn bridge(&self, index_name: &str) -> String {
        format!(
            "{}{}_{}",
            self.prefix,
            self.collection_name(index_name),
            self.collection_name(DOCUMENT_TABLE)
        )
    }

    /// Column in the bridge table holding the reduce index row id.
    pub fn bridge_index_column(index_name: &str) -> String {
        format!("{}Id", index_name)
    }

    /// Store-wide table, not scoped by collection.
    pub fn identifiers(&self) -> String {
        format!("{}{}", self.prefix, IDENTIFIERS_TABLE)
    }
}
