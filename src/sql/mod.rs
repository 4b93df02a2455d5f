//! SQL dialects - quoting, placeholders, type names and pagination per engine.

mod dialect;
mod render;

pub use dialect::{MySqlDialect, PostgreSqlDialect, SqlDialect, SqlServerDialect, SqliteDialect};
pub use render::{render, render_batch, SqlText};
