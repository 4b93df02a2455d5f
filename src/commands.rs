//! Pending writes of one flush, executed in foreign-key safe order.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, trace};

use crate::backend::{Filter, Row, Statement, Transaction};
use crate::collection::TableNames;
use crate::error::{Result, StoreError};

/// Execution rank of a command. Commands run sorted by rank, never by the
/// order they were queued in, so index rows referencing a document are
/// removed before the document and created after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionOrder {
    CreateDocument = 0,
    DeleteIndex = 1,
    CreateIndex = 2,
    UpdateIndex = 3,
    DeleteDocument = 4,
}

/// Bridge table linking reduce index rows to documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub table: String,
    pub index_column: String,
}

impl Bridge {
    pub fn new(names: &TableNames, index_name: &str) -> Self {
        Self {
            table: names.bridge(index_name),
            index_column: TableNames::bridge_index_column(index_name),
        }
    }

    fn link(&self, index_id: i64, document_id: i64) -> Statement {
        let mut row = Row::new();
        row.insert(self.index_column.clone(), Value::from(index_id));
        row.insert("DocumentId".into(), Value::from(document_id));
        Statement::Insert {
            table: self.table.clone(),
            row,
        }
    }

    fn unlink(&self, index_id: i64, documents: &BTreeSet<i64>) -> Statement {
        Statement::Delete {
            table: self.table.clone(),
            filter: Filter::eq(self.index_column.clone(), index_id)
                .and(Filter::is_in("DocumentId", documents.iter().copied())),
        }
    }

    fn unlink_all(&self, index_id: i64) -> Statement {
        Statement::Delete {
            table: self.table.clone(),
            filter: Filter::eq(self.index_column.clone(), index_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexCommand {
    /// Document row and content, as produced by the content storage.
    CreateDocument { id: i64, statements: Vec<Statement> },
    DeleteDocument { id: i64, statements: Vec<Statement> },
    /// Insert an index row. Reduce rows also link their documents through
    /// the bridge, which needs the generated row id.
    CreateIndex {
        table: String,
        row: Row,
        bridge: Option<Bridge>,
        added_documents: BTreeSet<i64>,
    },
    UpdateIndex {
        table: String,
        id: i64,
        row: Row,
        bridge: Option<Bridge>,
        added_documents: BTreeSet<i64>,
        removed_documents: BTreeSet<i64>,
    },
    /// Every row of a map index belonging to one document.
    DeleteMapIndex { table: String, document_id: i64 },
    /// A reduce row and all of its bridge links.
    DeleteReduceIndex { table: String, id: i64, bridge: Bridge },
}

impl IndexCommand {
    pub fn execution_order(&self) -> ExecutionOrder {
        match self {
            IndexCommand::CreateDocument { .. } => ExecutionOrder::CreateDocument,
            IndexCommand::DeleteMapIndex { .. } | IndexCommand::DeleteReduceIndex { .. } => {
                ExecutionOrder::DeleteIndex
            }
            IndexCommand::CreateIndex { .. } => ExecutionOrder::CreateIndex,
            IndexCommand::UpdateIndex { .. } => ExecutionOrder::UpdateIndex,
            IndexCommand::DeleteDocument { .. } => ExecutionOrder::DeleteDocument,
        }
    }

    /// Statements of a command that needs no generated value, `None` otherwise.
    pub fn batch_statements(&self) -> Option<Vec<Statement>> {
        match self {
            IndexCommand::CreateDocument { statements, .. }
            | IndexCommand::DeleteDocument { statements, .. } => Some(statements.clone()),
            IndexCommand::CreateIndex {
                table, row, bridge, ..
            } => match bridge {
                Some(_) => None,
                None => Some(vec![Statement::Insert {
                    table: table.clone(),
                    row: row.clone(),
                }]),
            },
            IndexCommand::UpdateIndex {
                table,
                id,
                row,
                bridge,
                added_documents,
                removed_documents,
            } => {
                let mut statements = vec![Statement::Update {
                    table: table.clone(),
                    values: row.clone(),
                    filter: Filter::eq("Id", *id),
                }];
                if let Some(bridge) = bridge {
                    if !removed_documents.is_empty() {
                        statements.push(bridge.unlink(*id, removed_documents));
                    }
                    statements.extend(added_documents.iter().map(|doc| bridge.link(*id, *doc)));
                }
                Some(statements)
            }
            IndexCommand::DeleteMapIndex { table, document_id } => Some(vec![Statement::Delete {
                table: table.clone(),
                filter: Filter::eq("DocumentId", *document_id),
            }]),
            IndexCommand::DeleteReduceIndex { table, id, bridge } => Some(vec![
                bridge.unlink_all(*id),
                Statement::Delete {
                    table: table.clone(),
                    filter: Filter::eq("Id", *id),
                },
            ]),
        }
    }

    /// Run the command on its own.
    pub async fn execute(&self, tx: &mut dyn Transaction) -> Result<()> {
        if let Some(statements) = self.batch_statements() {
            for statement in &statements {
                tx.execute(statement).await?;
            }
            return Ok(());
        }
        match self {
            IndexCommand::CreateIndex {
                table,
                row,
                bridge: Some(bridge),
                added_documents,
            } => {
                let outcome = tx
                    .execute(&Statement::Insert {
                        table: table.clone(),
                        row: row.clone(),
                    })
                    .await?;
                let id = outcome.last_insert_id.ok_or_else(|| {
                    StoreError::Backend(format!("no identity returned for insert into {}", table))
                })?;
                for document_id in added_documents {
                    tx.execute(&bridge.link(id, *document_id)).await?;
                }
                Ok(())
            }
            other => Err(StoreError::InvariantViolation(format!(
                "command {:?} has neither batch statements nor a direct path",
                other.execution_order()
            ))),
        }
    }
}

/// Commands queued during one flush.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<IndexCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: IndexCommand) {
        self.commands.push(command);
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = IndexCommand>) {
        self.commands.extend(commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Commands in execution order; the sort is stable within one rank.
    pub fn ordered(&self) -> Vec<&IndexCommand> {
        let mut ordered: Vec<&IndexCommand> = self.commands.iter().collect();
        ordered.sort_by_key(|c| c.execution_order());
        ordered
    }

    /// Execute and drain every command. Consecutive batchable commands are
    /// sent together, at most `batch_size` statements per round trip.
    pub async fn execute(&mut self, tx: &mut dyn Transaction, batch_size: usize) -> Result<()> {
        let batch_size = batch_size.max(1);
        let mut pending: Vec<Statement> = Vec::new();
        let mut round_trips = 0usize;

        let mut ordered = std::mem::take(&mut self.commands);
        ordered.sort_by_key(|c| c.execution_order());

        for command in &ordered {
            trace!(order = ?command.execution_order(), "queued command");
            match command.batch_statements() {
                Some(statements) => {
                    for statement in statements {
                        pending.push(statement);
                        if pending.len() >= batch_size {
                            tx.execute_batch(&pending).await?;
                            pending.clear();
                            round_trips += 1;
                        }
                    }
                }
                None => {
                    if !pending.is_empty() {
                        tx.execute_batch(&pending).await?;
                        pending.clear();
                        round_trips += 1;
                    }
                    command.execute(tx).await?;
                    round_trips += 1;
                }
            }
        }
        if !pending.is_empty() {
            tx.execute_batch(&pending).await?;
            round_trips += 1;
        }

        debug!(commands = ordered.len(), round_trips, "command queue executed");
        Ok(())
    }
}
