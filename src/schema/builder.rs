//! SchemaBuilder - DDL for document, index and bridge tables.
//!
//! ## Example
//!
//! ```ignore
//! let mut schema = store.schema("");
//! schema
//!     .create_map_index_table("UserByName", |table| {
//!         table.column("name", ColumnType::text());
//!     })
//!     .create_reduce_index_table("ArticlesByDay", |table| {
//!         table
//!             .column("day", ColumnType::Integer)
//!             .column("count", ColumnType::Integer);
//!     });
//! store.apply_schema(&schema).await?;
//! ```

use tracing::warn;

use super::{AlterTableCommand, ColumnType, CreateTableCommand, SchemaCommand};
use crate::backend::{Statement, Transaction};
use crate::collection::{TableNames, CONTENT_TABLE};
use crate::error::Result;
use crate::sql::{render, SqlDialect};

/// Collects DDL steps for one collection and applies them in order.
///
/// Each call records one step. When `tolerate_existing` is set, a failing
/// step is logged and skipped (its remaining commands are not attempted) and
/// the next step runs; otherwise the first failure is returned.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    names: TableNames,
    supports_cascade: bool,
    tolerate_existing: bool,
    steps: Vec<Vec<SchemaCommand>>,
}

impl SchemaBuilder {
    pub fn new(names: TableNames, dialect: &dyn SqlDialect) -> Self {
        Self {
            names,
            supports_cascade: dialect.supports_cascade(),
            tolerate_existing: false,
            steps: Vec::new(),
        }
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    /// Swallow errors per step, for idempotent bootstrap.
    pub fn tolerate_existing(mut self, tolerate: bool) -> Self {
        self.tolerate_existing = tolerate;
        self
    }

    pub fn is_tolerant(&self) -> bool {
        self.tolerate_existing
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn create_table(
        &mut self,
        name: &str,
        define: impl FnOnce(&mut CreateTableCommand),
    ) -> &mut Self {
        let mut table = CreateTableCommand::new(self.names.table(name));
        define(&mut table);
        self.steps.push(vec![SchemaCommand::CreateTable(table)]);
        self
    }

    pub fn alter_table(
        &mut self,
        name: &str,
        define: impl FnOnce(&mut AlterTableCommand),
    ) -> &mut Self {
        let mut table = AlterTableCommand::new(self.names.table(name));
        define(&mut table);
        self.steps.push(vec![SchemaCommand::AlterTable(table)]);
        self
    }

    pub fn drop_table(&mut self, name: &str) -> &mut Self {
        self.steps.push(vec![SchemaCommand::DropTable {
            name: self.names.table(name),
            cascade: self.supports_cascade,
        }]);
        self
    }

    pub fn create_foreign_key(
        &mut self,
        name: &str,
        src_table: &str,
        src_columns: &[&str],
        dest_table: &str,
        dest_columns: &[&str],
    ) -> &mut Self {
        let command = self.foreign_key(name, src_table, src_columns, dest_table, dest_columns);
        self.steps.push(vec![command]);
        self
    }

    pub fn drop_foreign_key(&mut self, src_table: &str, name: &str) -> &mut Self {
        self.steps.push(vec![SchemaCommand::DropForeignKey {
            table: self.names.table(src_table),
            name: name.to_string(),
        }]);
        self
    }

    /// Document table of the collection: `Id`, `Type`, `Content`, `Version`.
    pub fn create_document_table(&mut self) -> &mut Self {
        let document = self.names.document();
        let mut table = CreateTableCommand::new(document.clone());
        table
            .column_with("Id", ColumnType::BigInt, |c| {
                c.primary_key();
            })
            .column_with("Type", ColumnType::text(), |c| {
                c.not_null();
            })
            .column("Content", ColumnType::unlimited_text())
            .column_with("Version", ColumnType::BigInt, |c| {
                c.not_null().default_value(0);
            });

        let mut alter = AlterTableCommand::new(document.clone());
        alter.create_index(&format!("IX_{}_Type", document), &["Type"]);

        self.steps.push(vec![
            SchemaCommand::CreateTable(table),
            SchemaCommand::AlterTable(alter),
        ]);
        self
    }

    /// Separate content table used by `ContentTableStorage`.
    pub fn create_content_table(&mut self) -> &mut Self {
        self.create_table(CONTENT_TABLE, |table| {
            table
                .column_with("Id", ColumnType::BigInt, |c| {
                    c.primary_key();
                })
                .column("Content", ColumnType::unlimited_text());
        })
    }

    /// Map index table: own identity `Id`, `DocumentId` referencing the Document table.
    pub fn create_map_index_table(
        &mut self,
        name: &str,
        define: impl FnOnce(&mut CreateTableCommand),
    ) -> &mut Self {
        let index_table = self.names.index(name);
        let mut table = CreateTableCommand::new(index_table.clone());
        table
            .column_with("Id", ColumnType::BigInt, |c| {
                c.primary_key().identity();
            })
            .column("DocumentId", ColumnType::BigInt);
        define(&mut table);

        let fk = SchemaCommand::CreateForeignKey {
            name: format!("FK_{}", index_table),
            src_table: index_table,
            src_columns: vec!["DocumentId".into()],
            dest_table: self.names.document(),
            dest_columns: vec!["Id".into()],
        };
        self.steps.push(vec![SchemaCommand::CreateTable(table), fk]);
        self
    }

    /// Reduce index table plus its `<Index>_<Document>` bridge table.
    pub fn create_reduce_index_table(
        &mut self,
        name: &str,
        define: impl FnOnce(&mut CreateTableCommand),
    ) -> &mut Self {
        let index_table = self.names.index(name);
        let bridge_table = self.names.bridge(name);
        let bridge_column = TableNames::bridge_index_column(name);

        let mut table = CreateTableCommand::new(index_table.clone());
        table.column_with("Id", ColumnType::BigInt, |c| {
            c.primary_key().identity();
        });
        define(&mut table);

        let mut bridge = CreateTableCommand::new(bridge_table.clone());
        bridge
            .column_with(&bridge_column, ColumnType::BigInt, |c| {
                c.not_null();
            })
            .column_with("DocumentId", ColumnType::BigInt, |c| {
                c.not_null();
            });

        self.steps.push(vec![
            SchemaCommand::CreateTable(table),
            SchemaCommand::CreateTable(bridge),
            SchemaCommand::CreateForeignKey {
                name: format!("FK_{}_Id", bridge_table),
                src_table: bridge_table.clone(),
                src_columns: vec![bridge_column],
                dest_table: index_table,
                dest_columns: vec!["Id".into()],
            },
            SchemaCommand::CreateForeignKey {
                name: format!("FK_{}_DocumentId", bridge_table),
                src_table: bridge_table,
                src_columns: vec!["DocumentId".into()],
                dest_table: self.names.document(),
                dest_columns: vec!["Id".into()],
            },
        ]);
        self
    }

    pub fn drop_map_index_table(&mut self, name: &str) -> &mut Self {
        let index_table = self.names.index(name);
        let mut step = Vec::new();
        if !self.supports_cascade {
            step.push(SchemaCommand::DropForeignKey {
                table: index_table.clone(),
                name: format!("FK_{}", index_table),
            });
        }
        step.push(SchemaCommand::DropTable {
            name: index_table,
            cascade: self.supports_cascade,
        });
        self.steps.push(step);
        self
    }

    pub fn drop_reduce_index_table(&mut self, name: &str) -> &mut Self {
        let index_table = self.names.index(name);
        let bridge_table = self.names.bridge(name);
        let mut step = Vec::new();
        if !self.supports_cascade {
            step.push(SchemaCommand::DropForeignKey {
                table: bridge_table.clone(),
                name: format!("FK_{}_Id", bridge_table),
            });
            step.push(SchemaCommand::DropForeignKey {
                table: bridge_table.clone(),
                name: format!("FK_{}_DocumentId", bridge_table),
            });
        }
        step.push(SchemaCommand::DropTable {
            name: bridge_table,
            cascade: self.supports_cascade,
        });
        step.push(SchemaCommand::DropTable {
            name: index_table,
            cascade: self.supports_cascade,
        });
        self.steps.push(step);
        self
    }

    /// All recorded commands in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &SchemaCommand> {
        self.steps.iter().flatten()
    }

    /// Render the recorded DDL for a dialect without executing it.
    pub fn sql(&self, dialect: &dyn SqlDialect) -> Vec<String> {
        self.commands()
            .flat_map(|command| render(dialect, &Statement::Schema(command.clone())))
            .map(|rendered| rendered.sql)
            .collect()
    }

    /// Execute every step inside `tx`.
    pub async fn apply(&self, tx: &mut dyn Transaction) -> Result<()> {
        for step in &self.steps {
            for command in step {
                let statement = Statement::Schema(command.clone());
                if let Err(err) = tx.execute(&statement).await {
                    if !self.tolerate_existing {
                        return Err(err);
                    }
                    warn!(table = command.table(), error = %err, "schema step skipped");
                    break;
                }
            }
        }
        Ok(())
    }

    fn foreign_key(
        &self,
        name: &str,
        src_table: &str,
        src_columns: &[&str],
        dest_table: &str,
        dest_columns: &[&str],
    ) -> SchemaCommand {
        SchemaCommand::CreateForeignKey {
            name: name.to_string(),
            src_table: self.names.table(src_table),
            src_columns: src_columns.iter().map(|c| c.to_string()).collect(),
            dest_table: self.names.table(dest_table),
            dest_columns: dest_columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}
