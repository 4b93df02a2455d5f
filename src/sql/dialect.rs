use crate::backend::Page;
use crate::schema::ColumnType;

/// Engine-specific SQL syntax the core needs at the boundary.
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn type_name(&self, column_type: &ColumnType) -> String;

    /// Full column definition for an identity primary key of `column_type`.
    fn identity_column(&self, column_type: &ColumnType) -> String;

    /// `true` when dropping a table can cascade to its constraints.
    fn supports_cascade(&self) -> bool {
        false
    }

    fn cascade_clause(&self) -> &'static str {
        if self.supports_cascade() {
            " CASCADE"
        } else {
            ""
        }
    }

    fn batch_separator(&self) -> &'static str {
        ";\n"
    }

    /// Append the pagination clause for `page` to `sql`.
    fn page(&self, sql: &mut String, page: &Page) {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset));
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        )
    }
}

fn text_type(length: Option<u32>, bounded: &str, unbounded: &str) -> String {
    match length {
        Some(len) => format!("{}({})", bounded, len),
        None => unbounded.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean | ColumnType::Integer | ColumnType::BigInt => "INTEGER".into(),
            ColumnType::Double => "REAL".into(),
            ColumnType::Text(_) | ColumnType::DateTime => "TEXT".into(),
            ColumnType::Binary => "BLOB".into(),
        }
    }

    fn identity_column(&self, _column_type: &ColumnType) -> String {
        "INTEGER PRIMARY KEY AUTOINCREMENT".into()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSqlDialect;

impl SqlDialect for PostgreSqlDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "boolean".into(),
            ColumnType::Integer => "int4".into(),
            ColumnType::BigInt => "int8".into(),
            ColumnType::Double => "float8".into(),
            ColumnType::Text(len) => text_type(*len, "varchar", "text"),
            ColumnType::DateTime => "timestamp".into(),
            ColumnType::Binary => "bytea".into(),
        }
    }

    fn identity_column(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::BigInt => "bigserial PRIMARY KEY".into(),
            _ => "serial PRIMARY KEY".into(),
        }
    }

    fn supports_cascade(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "bit".into(),
            ColumnType::Integer => "int".into(),
            ColumnType::BigInt => "bigint".into(),
            ColumnType::Double => "double".into(),
            ColumnType::Text(len) => text_type(*len, "varchar", "longtext"),
            ColumnType::DateTime => "datetime".into(),
            ColumnType::Binary => "longblob".into(),
        }
    }

    fn identity_column(&self, column_type: &ColumnType) -> String {
        format!("{} AUTO_INCREMENT PRIMARY KEY", self.type_name(column_type))
    }

    fn page(&self, sql: &mut String, page: &Page) {
        sql.push_str(&format!(" LIMIT {}, {}", page.offset, page.limit));
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "BIT".into(),
            ColumnType::Integer => "INT".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Double => "FLOAT".into(),
            ColumnType::Text(len) => text_type(*len, "NVARCHAR", "NVARCHAR(max)"),
            ColumnType::DateTime => "DATETIME2".into(),
            ColumnType::Binary => "VARBINARY(max)".into(),
        }
    }

    fn identity_column(&self, column_type: &ColumnType) -> String {
        format!("{} IDENTITY(1,1) PRIMARY KEY", self.type_name(column_type))
    }

    fn batch_separator(&self) -> &'static str {
        ";\nGO\n"
    }

    fn page(&self, sql: &mut String, page: &Page) {
        if !sql.contains(" ORDER BY ") {
            sql.push_str(" ORDER BY (SELECT NULL)");
        }
        sql.push_str(&format!(
            " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            page.offset, page.limit
        ));
    }
}
