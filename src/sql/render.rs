//! Statement rendering - structured statements to parameterized SQL text.

use serde_json::Value;

use super::SqlDialect;
use crate::backend::{Filter, OrderBy, Statement};
use crate::schema::{AlterOperation, ColumnSpec, SchemaCommand};

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlText {
    pub sql: String,
    pub params: Vec<Value>,
}

struct Params<'d> {
    dialect: &'d dyn SqlDialect,
    values: Vec<Value>,
}

impl<'d> Params<'d> {
    fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

/// Render one statement. Schema commands may expand to several statements.
pub fn render(dialect: &dyn SqlDialect, statement: &Statement) -> Vec<SqlText> {
    let mut params = Params {
        dialect,
        values: Vec::new(),
    };
    let sql = render_into(statement, &mut params);
    let values = params.values;
    sql.into_iter()
        .map(|sql| SqlText {
            sql,
            params: values.clone(),
        })
        .collect()
}

/// Render several statements as one batch with continuous parameter numbering.
pub fn render_batch(dialect: &dyn SqlDialect, statements: &[Statement]) -> SqlText {
    let mut params = Params {
        dialect,
        values: Vec::new(),
    };
    let parts: Vec<String> = statements
        .iter()
        .flat_map(|statement| render_into(statement, &mut params))
        .collect();
    SqlText {
        sql: parts.join(dialect.batch_separator()),
        params: params.values,
    }
}

fn render_into(statement: &Statement, params: &mut Params<'_>) -> Vec<String> {
    let dialect = params.dialect;
    match statement {
        Statement::Insert { table, row } => {
            if row.is_empty() {
                return vec![format!("INSERT INTO {} DEFAULT VALUES", dialect.quote_identifier(table))];
            }
            let columns: Vec<String> = row.keys().map(|c| dialect.quote_identifier(c)).collect();
            let values: Vec<String> = row.values().map(|v| params.bind(v.clone())).collect();
            vec![format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_identifier(table),
                columns.join(", "),
                values.join(", ")
            )]
        }
        Statement::Update {
            table,
            values,
            filter,
        } => {
            let assignments: Vec<String> = values
                .iter()
                .map(|(column, value)| format!("{} = {}", dialect.quote_identifier(column), params.bind(value.clone())))
                .collect();
            let mut sql = format!("UPDATE {} SET {}", dialect.quote_identifier(table), assignments.join(", "));
            push_where(&mut sql, filter, params);
            vec![sql]
        }
        Statement::Delete { table, filter } => {
            let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(table));
            push_where(&mut sql, filter, params);
            vec![sql]
        }
        Statement::Select {
            table,
            filter,
            order_by,
            page,
        } => {
            let mut sql = format!("SELECT * FROM {}", dialect.quote_identifier(table));
            push_where(&mut sql, filter, params);
            push_order(&mut sql, order_by, dialect);
            if let Some(page) = page {
                dialect.page(&mut sql, page);
            }
            vec![sql]
        }
        Statement::Count { table, filter } => {
            let mut sql = format!("SELECT COUNT(*) AS {} FROM {}", dialect.quote_identifier("count"), dialect.quote_identifier(table));
            push_where(&mut sql, filter, params);
            vec![sql]
        }
        Statement::Max {
            table,
            column,
            filter,
        } => {
            let mut sql = format!("SELECT MAX({}) AS {} FROM {}", dialect.quote_identifier(column), dialect.quote_identifier("max"), dialect.quote_identifier(table));
            push_where(&mut sql, filter, params);
            vec![sql]
        }
        Statement::Schema(command) => render_schema(command, dialect),
    }
}

fn push_where(sql: &mut String, filter: &Filter, params: &mut Params<'_>) {
    if *filter == Filter::All {
        return;
    }
    sql.push_str(" WHERE ");
    sql.push_str(&render_filter(filter, params));
}

fn push_order(sql: &mut String, order_by: &[OrderBy], dialect: &dyn SqlDialect) {
    if order_by.is_empty() {
        return;
    }
    let parts: Vec<String> = order_by
        .iter()
        .map(|o| {
            let direction = if o.descending { "DESC" } else { "ASC" };
            format!("{} {}", dialect.quote_identifier(&o.column), direction)
        })
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&parts.join(", "));
}

fn render_filter(filter: &Filter, params: &mut Params<'_>) -> String {
    let comparison = |column: &str, op: &str, value: &Value, params: &mut Params<'_>| {
        format!(
            "{} {} {}",
            params.dialect.quote_identifier(column),
            op,
            params.bind(value.clone())
        )
    };
    match filter {
        Filter::All => "1 = 1".into(),
        Filter::Eq(c, Value::Null) => format!("{} IS NULL", params.dialect.quote_identifier(c)),
        Filter::NotEq(c, Value::Null) => {
            format!("{} IS NOT NULL", params.dialect.quote_identifier(c))
        }
        Filter::Eq(c, v) => comparison(c, "=", v, params),
        Filter::NotEq(c, v) => comparison(c, "<>", v, params),
        Filter::Gt(c, v) => comparison(c, ">", v, params),
        Filter::Ge(c, v) => comparison(c, ">=", v, params),
        Filter::Lt(c, v) => comparison(c, "<", v, params),
        Filter::Le(c, v) => comparison(c, "<=", v, params),
        Filter::StartsWith(c, prefix) => {
            let pattern = format!(
                "{}%",
                prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
            );
            format!(
                "{} LIKE {} ESCAPE '\\'",
                params.dialect.quote_identifier(c),
                params.bind(Value::String(pattern))
            )
        }
        Filter::In(_, values) if values.is_empty() => "1 = 0".into(),
        Filter::In(c, values) => {
            let placeholders: Vec<String> =
                values.iter().map(|v| params.bind(v.clone())).collect();
            format!(
                "{} IN ({})",
                params.dialect.quote_identifier(c),
                placeholders.join(", ")
            )
        }
        Filter::And(parts) => join_filters(parts, " AND ", params),
        Filter::Or(parts) => join_filters(parts, " OR ", params),
    }
}

fn join_filters(parts: &[Filter], separator: &str, params: &mut Params<'_>) -> String {
    let rendered: Vec<String> = parts.iter().map(|f| render_filter(f, params)).collect();
    format!("({})", rendered.join(separator))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_definition(column: &ColumnSpec, dialect: &dyn SqlDialect) -> String {
    let name = dialect.quote_identifier(&column.name);
    if column.identity {
        return format!("{} {}", name, dialect.identity_column(&column.column_type));
    }
    let mut sql = format!("{} {}", name, dialect.type_name(&column.column_type));
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {}", literal(default)));
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    sql
}

fn render_schema(command: &SchemaCommand, dialect: &dyn SqlDialect) -> Vec<String> {
    match command {
        SchemaCommand::CreateTable(table) => {
            let mut parts: Vec<String> = table
                .columns
                .iter()
                .map(|c| column_definition(c, dialect))
                .collect();
            let keys: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.primary_key && !c.identity)
                .map(|c| dialect.quote_identifier(&c.name))
                .collect();
            if !keys.is_empty() {
                parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
            }
            vec![format!("CREATE TABLE {} ({})", dialect.quote_identifier(&table.name), parts.join(", "))]
        }
        SchemaCommand::AlterTable(table) => table
            .operations
            .iter()
            .map(|operation| match operation {
                AlterOperation::AddColumn(column) => format!(
                    "ALTER TABLE {} ADD {}",
                    dialect.quote_identifier(&table.name),
                    column_definition(column, dialect)
                ),
                AlterOperation::DropColumn(column) => {
                    format!("ALTER TABLE {} DROP COLUMN {}", dialect.quote_identifier(&table.name), dialect.quote_identifier(column))
                }
                AlterOperation::CreateIndex { name, columns } => {
                    let columns: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
                    format!(
                        "CREATE INDEX {} ON {} ({})",
                        dialect.quote_identifier(name),
                        dialect.quote_identifier(&table.name),
                        columns.join(", ")
                    )
                }
                AlterOperation::DropIndex(name) => format!("DROP INDEX {}", dialect.quote_identifier(name)),
            })
            .collect(),
        SchemaCommand::DropTable { name, cascade } => {
            let clause = if *cascade { dialect.cascade_clause() } else { "" };
            vec![format!("DROP TABLE {}{}", dialect.quote_identifier(name), clause)]
        }
        SchemaCommand::CreateForeignKey {
            name,
            src_table,
            src_columns,
            dest_table,
            dest_columns,
        } => {
            let src: Vec<String> = src_columns.iter().map(|c| dialect.quote_identifier(c)).collect();
            let dest: Vec<String> = dest_columns.iter().map(|c| dialect.quote_identifier(c)).collect();
            vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                dialect.quote_identifier(src_table),
                dialect.quote_identifier(name),
                src.join(", "),
                dialect.quote_identifier(dest_table),
                dest.join(", ")
            )]
        }
        SchemaCommand::DropForeignKey { table, name } => {
            vec![dialect.drop_foreign_key(table, name)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Page, Row};
    use crate::sql::{MySqlDialect, PostgreSqlDialect, SqlServerDialect};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn select_with_filter_order_and_page() {
        let statement = Statement::Select {
            table: "UserByName".into(),
            filter: Filter::starts_with("name", "B").and(Filter::gt("age", 20)),
            order_by: vec![OrderBy::asc("name")],
            page: Some(Page::new(0, 10)),
        };
        let rendered = render(&PostgreSqlDialect, &statement);
        assert_eq!(
            rendered[0].sql,
            "SELECT * FROM \"UserByName\" WHERE (\"name\" LIKE $1 ESCAPE '\\' AND \"age\" > $2) ORDER BY \"name\" ASC LIMIT 10 OFFSET 0"
        );
        assert_eq!(rendered[0].params, vec![json!("B%"), json!(20)]);
    }

    #[test]
    fn update_binds_values_before_filter() {
        let statement = Statement::Update {
            table: "Document".into(),
            values: row(json!({ "Content": "{}", "Version": 2 })),
            filter: Filter::eq("Id", 7).and(Filter::eq("Version", 1)),
        };
        let rendered = render(&SqlServerDialect, &statement);
        assert_eq!(
            rendered[0].sql,
            "UPDATE [Document] SET [Content] = @p1, [Version] = @p2 WHERE ([Id] = @p3 AND [Version] = @p4)"
        );
    }

    #[test]
    fn batch_numbers_parameters_across_statements() {
        let statements = vec![
            Statement::Delete {
                table: "UserByName".into(),
                filter: Filter::eq("DocumentId", 1),
            },
            Statement::Delete {
                table: "Document".into(),
                filter: Filter::eq("Id", 1),
            },
        ];
        let batch = render_batch(&PostgreSqlDialect, &statements);
        assert_eq!(
            batch.sql,
            "DELETE FROM \"UserByName\" WHERE \"DocumentId\" = $1;\nDELETE FROM \"Document\" WHERE \"Id\" = $2"
        );
        assert_eq!(batch.params.len(), 2);
    }

    #[test]
    fn null_equality_renders_is_null_and_empty_in_is_false() {
        let select = Statement::select("T", Filter::eq("A", Value::Null).and(Filter::In("B".into(), vec![])));
        let rendered = render(&MySqlDialect, &select);
        assert_eq!(rendered[0].sql, "SELECT * FROM `T` WHERE (`A` IS NULL AND 1 = 0)");
        assert!(rendered[0].params.is_empty());
    }
}
