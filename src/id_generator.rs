//! Identifier generation per collection.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::{Backend, Filter, Row, Statement, Transaction};
use crate::collection::{TableNames, DOCUMENT_TABLE, IDENTIFIERS_TABLE};
use crate::config::{IsolationLevel, StoreConfig};
use crate::error::{Result, StoreError};
use crate::gate::WorkGate;
use crate::schema::{ColumnType, SchemaBuilder};

/// Hands out document ids, strictly increasing per collection.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// Store-wide setup, run once when the store is built.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Prepare `collection`; its Document table already exists.
    async fn initialize_collection(&self, collection: &str) -> Result<()>;

    async fn next_id(&self, collection: &str) -> Result<i64>;
}

/// Highest document id already stored in `collection`.
async fn max_document_id(tx: &mut dyn Transaction, names: &TableNames) -> Result<i64> {
    let rows = tx
        .query(&Statement::Max {
            table: names.document(),
            column: "Id".into(),
            filter: Filter::All,
        })
        .await?;
    Ok(rows
        .first()
        .and_then(|r| r.get("max"))
        .and_then(Value::as_i64)
        .unwrap_or(0))
}

const RESERVE_ATTEMPTS: usize = 32;

/// Reserves blocks of ids from a shared high-water mark in the
/// `Identifiers` table, so several processes can allocate concurrently.
///
/// Callers of one collection that find the current block exhausted share a
/// single refill through a [`WorkGate`].
pub struct BlockIdGenerator {
    backend: Arc<dyn Backend>,
    names: TableNames,
    block_size: i64,
    isolation: IsolationLevel,
    blocks: DashMap<String, VecDeque<Range<i64>>>,
    gate: WorkGate<String, ()>,
}

impl BlockIdGenerator {
    pub fn new(backend: Arc<dyn Backend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            names: TableNames::new(config.table_prefix.clone(), ""),
            block_size: config.id_block_size.max(1),
            isolation: config.isolation_level,
            blocks: DashMap::new(),
            gate: WorkGate::new(config.query_gating_enabled),
        }
    }

    fn dimension(collection: &str) -> String {
        TableNames::new("", collection).collection_name(DOCUMENT_TABLE)
    }

    fn take(&self, collection: &str) -> Option<i64> {
        let mut ranges = self.blocks.get_mut(collection)?;
        while let Some(range) = ranges.front_mut() {
            if let Some(id) = range.next() {
                return Some(id);
            }
            ranges.pop_front();
        }
        None
    }

    async fn refill(&self, collection: &str) -> Result<()> {
        let mut last_error = None;
        for attempt in 0..RESERVE_ATTEMPTS {
            match self.reserve(collection).await {
                Ok(Some(start)) => {
                    debug!(collection, start, size = self.block_size, "identifier block reserved");
                    self.blocks
                        .entry(collection.to_string())
                        .or_default()
                        .push_back(start..start + self.block_size);
                    return Ok(());
                }
                Ok(None) => {
                    debug!(collection, attempt, "identifier block contended");
                }
                Err(err @ (StoreError::Backend(_) | StoreError::Constraint(_))) => {
                    debug!(collection, attempt, error = %err, "identifier block reservation failed");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
            tokio::task::yield_now().await;
        }
        warn!(collection, "giving up on identifier block reservation");
        Err(last_error.unwrap_or_else(|| {
            StoreError::Backend(format!(
                "no identifier block reserved for {} after {} attempts",
                collection, RESERVE_ATTEMPTS
            ))
        }))
    }

    /// Advance the high-water mark by one block; `None` when another writer won.
    async fn reserve(&self, collection: &str) -> Result<Option<i64>> {
        let table = self.names.identifiers();
        let dimension = Self::dimension(collection);
        let mut tx = self.backend.begin(self.isolation).await?;

        let rows = tx
            .query(&Statement::select(&table, Filter::eq("dimension", dimension.clone())))
            .await?;
        let current = match rows.first() {
            Some(row) => row
                .get("nextval")
                .and_then(Value::as_i64)
                .ok_or_else(|| StoreError::Backend(format!("{} row without nextval", table)))?,
            None => {
                let start = max_document_id(tx.as_mut(), &TableNames::new(self.names.prefix(), collection)).await? + 1;
                tx.execute(&Statement::Insert {
                    table: table.clone(),
                    row: identifier_row(&dimension, start + self.block_size),
                })
                .await?;
                tx.commit().await?;
                return Ok(Some(start));
            }
        };

        let mut values = Row::new();
        values.insert("nextval".into(), Value::from(current + self.block_size));
        let outcome = tx
            .execute(&Statement::Update {
                table,
                values,
                filter: Filter::eq("dimension", dimension).and(Filter::eq("nextval", current)),
            })
            .await?;
        if outcome.rows_affected == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(current))
    }
}

fn identifier_row(dimension: &str, next: i64) -> Row {
    let mut row = Row::new();
    row.insert("dimension".into(), Value::from(dimension));
    row.insert("nextval".into(), Value::from(next));
    row
}

#[async_trait]
impl IdGenerator for BlockIdGenerator {
    async fn initialize(&self) -> Result<()> {
        let mut schema = SchemaBuilder::new(self.names.clone(), self.backend.dialect()).tolerate_existing(true);
        schema.create_table(IDENTIFIERS_TABLE, |table| {
            table
                .column_with("dimension", ColumnType::text(), |c| {
                    c.primary_key();
                })
                .column_with("nextval", ColumnType::BigInt, |c| {
                    c.not_null();
                });
        });
        let mut tx = self.backend.begin(self.isolation).await?;
        schema.apply(tx.as_mut()).await?;
        tx.commit().await
    }

    async fn initialize_collection(&self, collection: &str) -> Result<()> {
        let table = self.names.identifiers();
        let dimension = Self::dimension(collection);
        let mut tx = self.backend.begin(self.isolation).await?;
        let existing = tx
            .query(&Statement::select(&table, Filter::eq("dimension", dimension.clone())))
            .await?;
        if !existing.is_empty() {
            return tx.rollback().await;
        }
        let start = max_document_id(tx.as_mut(), &TableNames::new(self.names.prefix(), collection)).await? + 1;
        tx.execute(&Statement::Insert {
            table,
            row: identifier_row(&dimension, start),
        })
        .await?;
        match tx.commit().await {
            // Another process seeded the collection first.
            Err(StoreError::Constraint(_)) => Ok(()),
            other => other,
        }
    }

    async fn next_id(&self, collection: &str) -> Result<i64> {
        loop {
            if let Some(id) = self.take(collection) {
                return Ok(id);
            }
            self.gate
                .produce(collection.to_string(), || self.refill(collection))
                .await?;
        }
    }
}

/// Seeds from `max(Id)` of the Document table, then counts up in memory.
///
/// Only safe when a single process writes the collection.
pub struct SequentialIdGenerator {
    backend: Arc<dyn Backend>,
    prefix: String,
    isolation: IsolationLevel,
    last: Mutex<HashMap<String, i64>>,
}

impl SequentialIdGenerator {
    pub fn new(backend: Arc<dyn Backend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            prefix: config.table_prefix.clone(),
            isolation: config.isolation_level,
            last: Mutex::new(HashMap::new()),
        }
    }

    async fn seed(&self, collection: &str) -> Result<i64> {
        let mut tx = self.backend.begin(self.isolation).await?;
        let max = max_document_id(tx.as_mut(), &TableNames::new(self.prefix.clone(), collection)).await?;
        tx.rollback().await?;
        Ok(max)
    }
}

#[async_trait]
impl IdGenerator for SequentialIdGenerator {
    async fn initialize_collection(&self, collection: &str) -> Result<()> {
        let mut last = self.last.lock().await;
        if !last.contains_key(collection) {
            let max = self.seed(collection).await?;
            last.insert(collection.to_string(), max);
        }
        Ok(())
    }

    async fn next_id(&self, collection: &str) -> Result<i64> {
        let mut last = self.last.lock().await;
        let current = match last.get(collection) {
            Some(current) => *current,
            None => self.seed(collection).await?,
        };
        let next = current + 1;
        last.insert(collection.to_string(), next);
        Ok(next)
    }
}
