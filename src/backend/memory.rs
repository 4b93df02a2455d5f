use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace};

use super::{compare_values, values_equal, Backend, Filter, OrderBy, Outcome, Row, Statement, Transaction};
use crate::config::IsolationLevel;
use crate::error::{Result, StoreError};
use crate::schema::{AlterOperation, ColumnSpec, CreateTableCommand, SchemaCommand};
use crate::sql::{SqlDialect, SqliteDialect};

static NULL: Value = Value::Null;

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnSpec>,
    indexes: BTreeSet<String>,
    rows: Vec<Row>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn identity(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.identity)
            .map(|c| c.name.as_str())
    }

    /// Column sets that must be unique: the primary key, then each unique column.
    fn unique_keys(&self) -> Vec<Vec<&str>> {
        let mut keys = Vec::new();
        let primary: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        if !primary.is_empty() {
            keys.push(primary);
        }
        for column in self.columns.iter().filter(|c| c.unique && !c.primary_key) {
            keys.push(vec![column.name.as_str()]);
        }
        keys
    }
}

#[derive(Debug, Clone)]
struct ForeignKey {
    name: String,
    table: String,
    columns: Vec<String>,
    dest_table: String,
    dest_columns: Vec<String>,
}

impl ForeignKey {
    fn references(&self, child: &Row, parent: &Row) -> bool {
        self.columns
            .iter()
            .zip(&self.dest_columns)
            .all(|(c, d)| values_equal(cell(child, c), cell(parent, d)))
    }
}

/// Tables and constraints. Every statement either applies fully or leaves
/// the database untouched.
#[derive(Debug, Clone, Default)]
struct Database {
    tables: HashMap<String, Table>,
    foreign_keys: Vec<ForeignKey>,
}

impl Database {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {}", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {}", name)))
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        match statement {
            Statement::Select {
                table,
                filter,
                order_by,
                page,
            } => {
                let mut rows: Vec<Row> = self
                    .table(table)?
                    .rows
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect();
                sort_rows(&mut rows, order_by);
                if let Some(page) = page {
                    rows = rows.into_iter().skip(page.offset).take(page.limit).collect();
                }
                Ok(rows)
            }
            Statement::Count { table, filter } => {
                let count = self
                    .table(table)?
                    .rows
                    .iter()
                    .filter(|r| filter.matches(r))
                    .count();
                Ok(vec![single("count", Value::from(count as u64))])
            }
            Statement::Max {
                table,
                column,
                filter,
            } => {
                let max = self
                    .table(table)?
                    .rows
                    .iter()
                    .filter(|r| filter.matches(r))
                    .map(|r| cell(r, column))
                    .filter(|v| !v.is_null())
                    .fold(None::<&Value>, |acc, v| match acc {
                        Some(current) if compare_values(current, v) != Some(Ordering::Less) => {
                            Some(current)
                        }
                        _ => Some(v),
                    });
                Ok(vec![single("max", max.cloned().unwrap_or(Value::Null))])
            }
            other => Err(StoreError::Argument(format!(
                "write statement passed to query on {}",
                other.table()
            ))),
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        match statement {
            Statement::Insert { table, row } => self.insert(table, row),
            Statement::Update {
                table,
                values,
                filter,
            } => self.update(table, values, filter),
            Statement::Delete { table, filter } => self.delete(table, filter),
            Statement::Schema(command) => {
                self.schema(command)?;
                Ok(Outcome::default())
            }
            other => Err(StoreError::Argument(format!(
                "query passed to execute on {}",
                other.table()
            ))),
        }
    }

    fn insert(&mut self, name: &str, row: &Row) -> Result<Outcome> {
        let table = self.table(name)?;
        check_columns(name, table, row)?;

        let mut full = Row::new();
        for column in &table.columns {
            let value = row
                .get(&column.name)
                .cloned()
                .or_else(|| column.default.clone())
                .unwrap_or(Value::Null);
            full.insert(column.name.clone(), value);
        }
        check_not_null(name, table, &full)?;
        check_unique(name, table, &full, table.rows.iter())?;
        self.check_references(name, &full)?;

        let id = table
            .identity()
            .and_then(|c| full.get(c))
            .and_then(Value::as_i64);
        self.table_mut(name)?.rows.push(full);
        Ok(Outcome {
            rows_affected: 1,
            last_insert_id: id,
        })
    }

    fn update(&mut self, name: &str, values: &Row, filter: &Filter) -> Result<Outcome> {
        let table = self.table(name)?;
        check_columns(name, table, values)?;

        let mut rows = table.rows.clone();
        let mut changed = Vec::new();
        for (i, row) in rows.iter_mut().enumerate() {
            if filter.matches(row) {
                for (column, value) in values {
                    row.insert(column.clone(), value.clone());
                }
                changed.push(i);
            }
        }

        for &i in &changed {
            check_not_null(name, table, &rows[i])?;
            let others = rows
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, r)| r);
            check_unique(name, table, &rows[i], others)?;
            self.check_references(name, &rows[i])?;
        }

        let moved: Vec<&Row> = changed
            .iter()
            .filter(|&&i| {
                values.keys().any(|column| {
                    self.is_referenced(name, column)
                        && !values_equal(cell(&table.rows[i], column), cell(&rows[i], column))
                })
            })
            .map(|&i| &table.rows[i])
            .collect();
        let remaining: Vec<&Row> = rows.iter().collect();
        self.check_not_referenced(name, &moved, &remaining)?;

        let count = changed.len() as u64;
        self.table_mut(name)?.rows = rows;
        Ok(Outcome {
            rows_affected: count,
            last_insert_id: None,
        })
    }

    fn delete(&mut self, name: &str, filter: &Filter) -> Result<Outcome> {
        let table = self.table(name)?;
        let (removed, kept): (Vec<&Row>, Vec<&Row>) =
            table.rows.iter().partition(|r| filter.matches(r));
        self.check_not_referenced(name, &removed, &kept)?;

        let count = removed.len() as u64;
        self.table_mut(name)?.rows.retain(|r| !filter.matches(r));
        Ok(Outcome {
            rows_affected: count,
            last_insert_id: None,
        })
    }

    fn is_referenced(&self, table: &str, column: &str) -> bool {
        self.foreign_keys
            .iter()
            .any(|fk| fk.dest_table == table && fk.dest_columns.iter().any(|c| c == column))
    }

    /// Outgoing foreign keys of `table` must resolve for `row`.
    fn check_references(&self, table: &str, row: &Row) -> Result<()> {
        for fk in self.foreign_keys.iter().filter(|fk| fk.table == table) {
            if fk.columns.iter().any(|c| cell(row, c).is_null()) {
                continue;
            }
            let parent = self.table(&fk.dest_table)?;
            if !parent.rows.iter().any(|p| fk.references(row, p)) {
                return Err(StoreError::Constraint(format!(
                    "insert or update on {} violates foreign key {}",
                    table, fk.name
                )));
            }
        }
        Ok(())
    }

    /// No child row may still reference one of the `removed` rows of `table`.
    fn check_not_referenced(&self, table: &str, removed: &[&Row], remaining: &[&Row]) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        for fk in self.foreign_keys.iter().filter(|fk| fk.dest_table == table) {
            let children: Vec<&Row> = if fk.table == table {
                remaining.to_vec()
            } else {
                match self.tables.get(&fk.table) {
                    Some(child) => child.rows.iter().collect(),
                    None => continue,
                }
            };
            for parent in removed {
                if fk.dest_columns.iter().any(|c| cell(parent, c).is_null()) {
                    continue;
                }
                if children.iter().any(|child| fk.references(child, parent)) {
                    return Err(StoreError::Constraint(format!(
                        "row of {} is still referenced through {}",
                        table, fk.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn schema(&mut self, command: &SchemaCommand) -> Result<()> {
        match command {
            SchemaCommand::CreateTable(create) => self.create_table(create),
            SchemaCommand::AlterTable(alter) => {
                let mut table = self.table(&alter.name)?.clone();
                for operation in &alter.operations {
                    self.alter(&alter.name, &mut table, operation)?;
                }
                self.tables.insert(alter.name.clone(), table);
                Ok(())
            }
            SchemaCommand::DropTable { name, cascade } => {
                self.table(name)?;
                let referencing: Vec<&str> = self
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.dest_table == *name && fk.table != *name)
                    .map(|fk| fk.name.as_str())
                    .collect();
                if !referencing.is_empty() && !cascade {
                    return Err(StoreError::Constraint(format!(
                        "table {} is referenced by {}",
                        name,
                        referencing.join(", ")
                    )));
                }
                self.foreign_keys
                    .retain(|fk| fk.table != *name && fk.dest_table != *name);
                self.tables.remove(name);
                Ok(())
            }
            SchemaCommand::CreateForeignKey {
                name,
                src_table,
                src_columns,
                dest_table,
                dest_columns,
            } => {
                if self.foreign_keys.iter().any(|fk| fk.name == *name) {
                    return Err(StoreError::Backend(format!("constraint {} already exists", name)));
                }
                if src_columns.len() != dest_columns.len() {
                    return Err(StoreError::Argument(format!(
                        "foreign key {} maps {} columns onto {}",
                        name,
                        src_columns.len(),
                        dest_columns.len()
                    )));
                }
                for (table, columns) in [(src_table, src_columns), (dest_table, dest_columns)] {
                    let target = self.table(table)?;
                    if let Some(missing) = columns.iter().find(|c| target.column(c).is_none()) {
                        return Err(unknown_column(table, missing));
                    }
                }
                let fk = ForeignKey {
                    name: name.clone(),
                    table: src_table.clone(),
                    columns: src_columns.clone(),
                    dest_table: dest_table.clone(),
                    dest_columns: dest_columns.clone(),
                };
                self.foreign_keys.push(fk);
                let rows = self.table(src_table)?.rows.clone();
                for row in &rows {
                    if let Err(err) = self.check_references(src_table, row) {
                        self.foreign_keys.pop();
                        return Err(err);
                    }
                }
                Ok(())
            }
            SchemaCommand::DropForeignKey { table, name } => {
                let before = self.foreign_keys.len();
                self.foreign_keys
                    .retain(|fk| !(fk.table == *table && fk.name == *name));
                if self.foreign_keys.len() == before {
                    return Err(StoreError::Backend(format!(
                        "no constraint {} on {}",
                        name, table
                    )));
                }
                Ok(())
            }
        }
    }

    fn create_table(&mut self, create: &CreateTableCommand) -> Result<()> {
        if self.tables.contains_key(&create.name) {
            return Err(StoreError::Backend(format!(
                "table {} already exists",
                create.name
            )));
        }
        let mut seen = BTreeSet::new();
        for column in &create.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(StoreError::Backend(format!(
                    "duplicate column {} in {}",
                    column.name, create.name
                )));
            }
        }
        self.tables.insert(
            create.name.clone(),
            Table {
                columns: create.columns.clone(),
                indexes: BTreeSet::new(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn alter(&self, name: &str, table: &mut Table, operation: &AlterOperation) -> Result<()> {
        match operation {
            AlterOperation::AddColumn(spec) => {
                if table.column(&spec.name).is_some() {
                    return Err(StoreError::Backend(format!(
                        "column {} already exists in {}",
                        spec.name, name
                    )));
                }
                let value = spec.default.clone().unwrap_or(Value::Null);
                if spec.not_null && value.is_null() && !table.rows.is_empty() {
                    return Err(StoreError::Constraint(format!(
                        "cannot add NOT NULL column {} without default to {}",
                        spec.name, name
                    )));
                }
                for row in &mut table.rows {
                    row.insert(spec.name.clone(), value.clone());
                }
                table.columns.push(spec.clone());
            }
            AlterOperation::DropColumn(column) => {
                if table.column(column).is_none() {
                    return Err(unknown_column(name, column));
                }
                let constrained = self.foreign_keys.iter().any(|fk| {
                    (fk.table == name && fk.columns.contains(column))
                        || (fk.dest_table == name && fk.dest_columns.contains(column))
                });
                if constrained {
                    return Err(StoreError::Constraint(format!(
                        "column {}.{} is part of a foreign key",
                        name, column
                    )));
                }
                table.columns.retain(|c| c.name != *column);
                for row in &mut table.rows {
                    row.remove(column);
                }
            }
            AlterOperation::CreateIndex {
                name: index,
                columns,
            } => {
                if let Some(missing) = columns.iter().find(|c| table.column(c).is_none()) {
                    return Err(unknown_column(name, missing));
                }
                if !table.indexes.insert(index.clone()) {
                    return Err(StoreError::Backend(format!("index {} already exists", index)));
                }
            }
            AlterOperation::DropIndex(index) => {
                if !table.indexes.remove(index) {
                    return Err(StoreError::Backend(format!("no index {} on {}", index, name)));
                }
            }
        }
        Ok(())
    }
}

fn single(column: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), value);
    row
}

fn unknown_column(table: &str, column: &str) -> StoreError {
    StoreError::Backend(format!("table {} has no column named {}", table, column))
}

fn check_columns(name: &str, table: &Table, row: &Row) -> Result<()> {
    match row.keys().find(|k| table.column(k).is_none()) {
        Some(missing) => Err(unknown_column(name, missing)),
        None => Ok(()),
    }
}

fn check_not_null(name: &str, table: &Table, row: &Row) -> Result<()> {
    for column in table.columns.iter().filter(|c| c.not_null) {
        if cell(row, &column.name).is_null() {
            return Err(StoreError::Constraint(format!(
                "NOT NULL constraint failed: {}.{}",
                name, column.name
            )));
        }
    }
    Ok(())
}

fn check_unique<'a>(
    name: &str,
    table: &Table,
    candidate: &Row,
    others: impl Iterator<Item = &'a Row>,
) -> Result<()> {
    let keys = table.unique_keys();
    if keys.is_empty() {
        return Ok(());
    }
    for other in others {
        for key in &keys {
            if key
                .iter()
                .all(|c| values_equal(cell(candidate, c), cell(other, c)))
            {
                return Err(StoreError::Constraint(format!(
                    "UNIQUE constraint failed: {}.{}",
                    name,
                    key.join(", ")
                )));
            }
        }
    }
    Ok(())
}

/// `NULL`s sort first, as SQLite does.
fn sort_rows(rows: &mut [Row], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for order in order_by {
            let (left, right) = (cell(a, &order.column), cell(b, &order.column));
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

struct Shared {
    db: RwLock<Database>,
    /// Identity sequences are not transactional, as in the engines they model.
    sequences: Mutex<HashMap<String, i64>>,
}

/// Embedded engine interpreting [`Statement`]s directly.
///
/// Transactions read committed data until their first write, then work on a
/// private copy. Commit replays the write log against the latest committed
/// state; an update or delete that now touches a different number of rows
/// fails the commit as a write conflict.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
    dialect: Arc<dyn SqlDialect>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_dialect(SqliteDialect)
    }

    /// Engine reporting another dialect, e.g. to exercise cascading drops.
    pub fn with_dialect(dialect: impl SqlDialect + 'static) -> Self {
        MemoryBackend {
            shared: Arc::new(Shared {
                db: RwLock::new(Database::default()),
                sequences: Mutex::new(HashMap::new()),
            }),
            dialect: Arc::new(dialect),
        }
    }

    /// Committed table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.db.read().tables.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn Transaction>> {
        trace!(?isolation, "memory transaction started");
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            working: None,
            log: Vec::new(),
        }))
    }
}

struct LoggedWrite {
    statement: Statement,
    rows_affected: u64,
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Option<Database>,
    log: Vec<LoggedWrite>,
}

impl MemoryTransaction {
    /// Fill a missing identity column from the table's sequence.
    fn assign_identity(&self, db: &Database, statement: &Statement) -> Result<Statement> {
        let Statement::Insert { table, row } = statement else {
            return Ok(statement.clone());
        };
        let target = db.table(table)?;
        let Some(identity) = target.identity() else {
            return Ok(statement.clone());
        };
        if !cell(row, identity).is_null() {
            return Ok(statement.clone());
        }

        let highest = target
            .rows
            .iter()
            .filter_map(|r| cell(r, identity).as_i64())
            .max()
            .unwrap_or(0);
        let mut sequences = self.shared.sequences.lock();
        let next = sequences.entry(table.clone()).or_insert(0);
        *next = (*next).max(highest) + 1;

        let mut row = row.clone();
        row.insert(identity.to_string(), Value::from(*next));
        Ok(Statement::Insert {
            table: table.clone(),
            row,
        })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        trace!(table = statement.table(), ?statement, "execute");
        if self.working.is_none() {
            self.working = Some(self.shared.db.read().clone());
        }
        let resolved = match &self.working {
            Some(db) => self.assign_identity(db, statement)?,
            None => statement.clone(),
        };
        let working = self.working.get_or_insert_with(Database::default);
        let outcome = working.execute(&resolved)?;
        self.log.push(LoggedWrite {
            statement: resolved,
            rows_affected: outcome.rows_affected,
        });
        Ok(outcome)
    }

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        trace!(table = statement.table(), ?statement, "query");
        match &self.working {
            Some(db) => db.query(statement),
            None => self.shared.db.read().query(statement),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.log.is_empty() {
            return Ok(());
        }
        let mut db = self.shared.db.write();
        let mut next = db.clone();
        for write in &self.log {
            let outcome = next.execute(&write.statement)?;
            if outcome.rows_affected != write.rows_affected {
                return Err(StoreError::Backend(format!(
                    "write conflict on {}: {} rows affected at commit, {} in transaction",
                    write.statement.table(),
                    outcome.rows_affected,
                    write.rows_affected
                )));
            }
        }
        *db = next;
        debug!(writes = self.log.len(), "memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(writes = self.log.len(), "memory transaction rolled back");
        Ok(())
    }
}
