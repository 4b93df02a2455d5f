//! Content storage - where serialized document content lives.
//!
//! Writes are returned as statements so they join the session's command
//! queue; reads run against the session transaction, paged by id.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{Filter, Row, Statement, Transaction};
use crate::collection::TableNames;
use crate::document::DocumentRecord;
use crate::error::{Result, StoreError};
use crate::schema::SchemaBuilder;

#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Insert the Document row of `record` and its content.
    fn create(&self, names: &TableNames, record: &DocumentRecord, content: &str) -> Vec<Statement>;

    fn update(&self, names: &TableNames, id: i64, content: &str) -> Vec<Statement>;

    /// Remove the Document row and its content.
    fn delete(&self, names: &TableNames, id: i64) -> Vec<Statement>;

    /// Content by document id; missing ids are absent from the result.
    async fn get(
        &self,
        tx: &mut dyn Transaction,
        names: &TableNames,
        ids: &[i64],
    ) -> Result<HashMap<i64, String>>;

    /// Extra tables the storage needs in a collection.
    fn define_schema(&self, _schema: &mut SchemaBuilder) {}
}

fn document_row(record: &DocumentRecord, content: Option<&str>) -> Row {
    let mut row = Row::new();
    row.insert("Id".into(), Value::from(record.id));
    row.insert("Type".into(), Value::from(record.type_name.clone()));
    if let Some(content) = content {
        row.insert("Content".into(), Value::from(content));
    }
    row.insert("Version".into(), Value::from(record.version));
    row
}

fn content_values(content: &str) -> Row {
    let mut row = Row::new();
    row.insert("Content".into(), Value::from(content));
    row
}

async fn read_content(
    tx: &mut dyn Transaction,
    table: &str,
    ids: &[i64],
    page_size: usize,
) -> Result<HashMap<i64, String>> {
    let mut found = HashMap::with_capacity(ids.len());
    for page in ids.chunks(page_size.max(1)) {
        let rows = tx
            .query(&Statement::select(table, Filter::is_in("Id", page.iter().copied())))
            .await?;
        for row in rows {
            let id = row
                .get("Id")
                .and_then(Value::as_i64)
                .ok_or_else(|| StoreError::Backend(format!("row of {} has no Id", table)))?;
            if let Some(content) = row.get("Content").and_then(Value::as_str) {
                found.insert(id, content.to_string());
            }
        }
    }
    Ok(found)
}

/// Content kept in the `Content` column of the Document table.
#[derive(Debug, Clone)]
pub struct DocumentTableStorage {
    page_size: usize,
}

impl DocumentTableStorage {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl DocumentStorage for DocumentTableStorage {
    fn create(&self, names: &TableNames, record: &DocumentRecord, content: &str) -> Vec<Statement> {
        vec![Statement::Insert {
            table: names.document(),
            row: document_row(record, Some(content)),
        }]
    }

    fn update(&self, names: &TableNames, id: i64, content: &str) -> Vec<Statement> {
        vec![Statement::Update {
            table: names.document(),
            values: content_values(content),
            filter: Filter::eq("Id", id),
        }]
    }

    fn delete(&self, names: &TableNames, id: i64) -> Vec<Statement> {
        vec![Statement::Delete {
            table: names.document(),
            filter: Filter::eq("Id", id),
        }]
    }

    async fn get(
        &self,
        tx: &mut dyn Transaction,
        names: &TableNames,
        ids: &[i64],
    ) -> Result<HashMap<i64, String>> {
        read_content(tx, &names.document(), ids, self.page_size).await
    }
}

/// Content kept in a separate `<Collection>_Content` table keyed by document id.
#[derive(Debug, Clone)]
pub struct ContentTableStorage {
    page_size: usize,
}

impl ContentTableStorage {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl DocumentStorage for ContentTableStorage {
    fn create(&self, names: &TableNames, record: &DocumentRecord, content: &str) -> Vec<Statement> {
        let mut row = Row::new();
        row.insert("Id".into(), Value::from(record.id));
        row.insert("Content".into(), Value::from(content));
        vec![
            Statement::Insert {
                table: names.document(),
                row: document_row(record, None),
            },
            Statement::Insert {
                table: names.content(),
                row,
            },
        ]
    }

    fn update(&self, names: &TableNames, id: i64, content: &str) -> Vec<Statement> {
        vec![Statement::Update {
            table: names.content(),
            values: content_values(content),
            filter: Filter::eq("Id", id),
        }]
    }

    fn delete(&self, names: &TableNames, id: i64) -> Vec<Statement> {
        vec![
            Statement::Delete {
                table: names.content(),
                filter: Filter::eq("Id", id),
            },
            Statement::Delete {
                table: names.document(),
                filter: Filter::eq("Id", id),
            },
        ]
    }

    async fn get(
        &self,
        tx: &mut dyn Transaction,
        names: &TableNames,
        ids: &[i64],
    ) -> Result<HashMap<i64, String>> {
        read_content(tx, &names.content(), ids, self.page_size).await
    }

    fn define_schema(&self, schema: &mut SchemaBuilder) {
        schema.create_content_table();
    }
}
