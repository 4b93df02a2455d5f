//! Schema commands - declarative DDL consumed by backends and dialects.

mod builder;

use serde_json::Value;

pub use builder::SchemaBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Double,
    /// `None` length means unlimited text.
    Text(Option<u32>),
    DateTime,
    Binary,
}

impl ColumnType {
    pub fn text() -> Self {
        ColumnType::Text(Some(255))
    }

    pub fn unlimited_text() -> Self {
        ColumnType::Text(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub identity: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            identity: false,
            not_null: false,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn identity(&mut self) -> &mut Self {
        self.identity = true;
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.not_null = true;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn default_value(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableCommand {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl CreateTableCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(&mut self, name: &str, column_type: ColumnType) -> &mut Self {
        self.columns.push(ColumnSpec::new(name, column_type));
        self
    }

    pub fn column_with(
        &mut self,
        name: &str,
        column_type: ColumnType,
        configure: impl FnOnce(&mut ColumnSpec),
    ) -> &mut Self {
        let mut spec = ColumnSpec::new(name, column_type);
        configure(&mut spec);
        self.columns.push(spec);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterOperation {
    AddColumn(ColumnSpec),
    DropColumn(String),
    CreateIndex { name: String, columns: Vec<String> },
    DropIndex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableCommand {
    pub name: String,
    pub operations: Vec<AlterOperation>,
}

impl AlterTableCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> &mut Self {
        self.add_column_with(name, column_type, |_| {})
    }

    pub fn add_column_with(
        &mut self,
        name: &str,
        column_type: ColumnType,
        configure: impl FnOnce(&mut ColumnSpec),
    ) -> &mut Self {
        let mut spec = ColumnSpec::new(name, column_type);
        configure(&mut spec);
        self.operations.push(AlterOperation::AddColumn(spec));
        self
    }

    pub fn drop_column(&mut self, name: &str) -> &mut Self {
        self.operations.push(AlterOperation::DropColumn(name.to_string()));
        self
    }

    pub fn create_index(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.operations.push(AlterOperation::CreateIndex {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn drop_index(&mut self, name: &str) -> &mut Self {
        self.operations.push(AlterOperation::DropIndex(name.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaCommand {
    CreateTable(CreateTableCommand),
    AlterTable(AlterTableCommand),
    /// `cascade` also removes foreign keys that reference the table.
    DropTable { name: String, cascade: bool },
    CreateForeignKey {
        name: String,
        src_table: String,
        src_columns: Vec<String>,
        dest_table: String,
        dest_columns: Vec<String>,
    },
    DropForeignKey { table: String, name: String },
}

impl SchemaCommand {
    /// Table the command operates on.
    pub fn table(&self) -> &str {
        match self {
            SchemaCommand::CreateTable(c) => &c.name,
            SchemaCommand::AlterTable(c) => &c.name,
            SchemaCommand::DropTable { name, .. } => name,
            SchemaCommand::CreateForeignKey { src_table, .. } => src_table,
            SchemaCommand::DropForeignKey { table, .. } => table,
        }
    }
}
