//! docweave - a document store over relational engines.
//!
//! Entities are stored as serialized content in a `Document` table, keyed by
//! a generated id. Map and reduce indexes declared per document type are
//! kept consistent with the documents inside the same transaction.

extern crate self as docweave;

pub mod backend;
mod collection;
mod commands;
mod config;
mod document;
mod error;
mod gate;
mod id_generator;
mod identity_map;
pub mod index;
mod reduce;
pub mod schema;
mod serializer;
mod session;
pub mod sql;
mod storage;
mod store;

pub use backend::{Backend, Filter, MemoryBackend, OrderBy, Outcome, Page, Row, Statement, Transaction};
pub use collection::TableNames;
pub use commands::{CommandQueue, ExecutionOrder, IndexCommand};
pub use config::{IsolationLevel, StoreConfig};
pub use document::{Document, DocumentRecord, ErasedDocument};
pub use error::{Result, StoreError};
pub use gate::WorkGate;
pub use id_generator::{BlockIdGenerator, IdGenerator, SequentialIdGenerator};
pub use identity_map::IdentityMap;
pub use index::{DescribeContext, Grouping, Index, IndexDescriptor, IndexProvider};
pub use reduce::ReduceEngine;
pub use schema::{ColumnType, SchemaBuilder};
pub use serializer::{ContentSerializer, JsonSerializer};
pub use session::Session;
pub use sql::{MySqlDialect, PostgreSqlDialect, SqlDialect, SqlServerDialect, SqliteDialect};
pub use storage::{ContentTableStorage, DocumentStorage, DocumentTableStorage};
pub use store::{Store, StoreBuilder};

// Derive macros share their trait's name, like serde's.
pub use docweave_macros::{Document, Index};
