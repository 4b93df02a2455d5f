//! Store - long-lived owner of collaborators and shared caches.
//!
//! ## Example
//!
//! ```ignore
//! let store = Store::builder()
//!     .config(StoreConfig::default().with_table_prefix("app_"))
//!     .backend(MemoryBackend::new())
//!     .build()
//!     .await?;
//!
//! store.register_indexes(ArticleIndexes);
//! let mut schema = store.schema("");
//! schema.create_map_index_table("ArticleByTitle", |t| {
//!     t.column("title", ColumnType::text());
//! });
//! store.apply_schema(&schema).await?;
//! ```

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::collection::TableNames;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::id_generator::{BlockIdGenerator, IdGenerator};
use crate::index::{Descriptors, IndexProvider, IndexRegistry};
use crate::schema::SchemaBuilder;
use crate::serializer::{ContentSerializer, JsonSerializer};
use crate::session::{Session, SessionPool};
use crate::storage::{DocumentStorage, DocumentTableStorage};

pub(crate) struct StoreInner {
    pub(crate) config: StoreConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) serializer: Arc<dyn ContentSerializer>,
    pub(crate) storage: Arc<dyn DocumentStorage>,
    pub(crate) id_generator: Arc<dyn IdGenerator>,
    pub(crate) registry: IndexRegistry,
    pub(crate) pool: SessionPool,
    /// Table names of initialized collections.
    collections: DashMap<String, TableNames>,
}

impl StoreInner {
    pub(crate) fn names(&self, collection: &str) -> TableNames {
        match self.collections.get(collection) {
            Some(names) => names.clone(),
            None => TableNames::new(self.config.table_prefix.clone(), collection),
        }
    }
}

/// Cheap to clone; clones share caches, pool and collaborators.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("collections", &self.inner.collections.len())
            .finish()
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn names(&self, collection: &str) -> TableNames {
        self.inner.names(collection)
    }

    /// Lease a session from the pool.
    pub fn create_session(&self) -> Session {
        Session::new(self.clone(), self.inner.pool.acquire())
    }

    /// Create the collection's Document table (and whatever the content
    /// storage needs) if missing, and prepare its id sequence.
    pub async fn initialize_collection(&self, collection: &str) -> Result<()> {
        let names = TableNames::new(self.inner.config.table_prefix.clone(), collection);
        let mut schema = SchemaBuilder::new(names.clone(), self.inner.backend.dialect()).tolerate_existing(true);
        schema.create_document_table();
        self.inner.storage.define_schema(&mut schema);
        self.apply_schema(&schema).await?;
        self.inner.id_generator.initialize_collection(collection).await?;
        self.inner.collections.insert(collection.to_string(), names);
        info!(collection, "collection initialized");
        Ok(())
    }

    pub fn is_collection_initialized(&self, collection: &str) -> bool {
        self.inner.collections.contains_key(collection)
    }

    /// Empty schema builder for `collection`.
    pub fn schema(&self, collection: &str) -> SchemaBuilder {
        SchemaBuilder::new(self.names(collection), self.inner.backend.dialect())
    }

    /// Run the builder's DDL in its own transaction.
    pub async fn apply_schema(&self, schema: &SchemaBuilder) -> Result<()> {
        let mut tx = self.inner.backend.begin(self.inner.config.isolation_level).await?;
        if let Err(err) = schema.apply(tx.as_mut()).await {
            tx.rollback().await?;
            return Err(err);
        }
        tx.commit().await?;
        debug!(collection = schema.names().collection(), "schema applied");
        Ok(())
    }

    pub fn register_indexes<P: IndexProvider>(&self, provider: P) {
        self.inner.registry.register(provider);
    }

    /// Index descriptors applying to `T` in `collection`.
    pub async fn describe<T: Document>(&self, collection: &str) -> Result<Descriptors> {
        self.inner.registry.describe(TypeId::of::<T>(), collection).await
    }

    pub async fn next_id(&self, collection: &str) -> Result<i64> {
        self.inner.id_generator.next_id(collection).await
    }

    /// Number of idle session states waiting in the pool.
    pub fn pooled_sessions(&self) -> usize {
        self.inner.pool.idle()
    }
}

/// Wires the store's collaborators. Only the backend is required.
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    backend: Option<Arc<dyn Backend>>,
    serializer: Option<Arc<dyn ContentSerializer>>,
    storage: Option<Arc<dyn DocumentStorage>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(self, backend: impl Backend + 'static) -> Self {
        self.shared_backend(Arc::new(backend))
    }

    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn serializer(mut self, serializer: impl ContentSerializer + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    pub fn storage(mut self, storage: impl DocumentStorage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Build the store and initialize the default collection.
    pub async fn build(self) -> Result<Store> {
        let StoreBuilder {
            config,
            backend,
            serializer,
            storage,
            id_generator,
        } = self;
        let backend = backend.ok_or_else(|| StoreError::Configuration("a backend is required".into()))?;
        let serializer = serializer.unwrap_or_else(|| Arc::new(JsonSerializer));
        let storage = storage.unwrap_or_else(|| Arc::new(DocumentTableStorage::new(config.content_page_size)));
        let id_generator =
            id_generator.unwrap_or_else(|| Arc::new(BlockIdGenerator::new(backend.clone(), &config)));
        id_generator.initialize().await?;

        let store = Store {
            inner: Arc::new(StoreInner {
                registry: IndexRegistry::new(config.query_gating_enabled),
                pool: SessionPool::new(config.session_pool_size),
                config,
                backend,
                serializer,
                storage,
                id_generator,
                collections: DashMap::new(),
            }),
        };
        store.initialize_collection("").await?;
        Ok(store)
    }
}
