use std::any::TypeId;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{DescribeContext, IndexDescriptor, IndexProvider};
use crate::error::Result;
use crate::gate::WorkGate;

pub type Descriptors = Arc<[Arc<IndexDescriptor>]>;

type DescriptorKey = (TypeId, String);

trait DescriptorSource: Send + Sync {
    fn document_type(&self) -> TypeId;

    fn collection(&self) -> &str;

    fn descriptors(&self) -> Vec<IndexDescriptor>;
}

impl<P: IndexProvider> DescriptorSource for P {
    fn document_type(&self) -> TypeId {
        TypeId::of::<P::Document>()
    }

    fn collection(&self) -> &str {
        IndexProvider::collection(self)
    }

    fn descriptors(&self) -> Vec<IndexDescriptor> {
        let mut context = DescribeContext::new();
        self.describe(&mut context);
        context.into_descriptors()
    }
}

/// Registered index providers and the descriptors resolved from them.
///
/// Resolution is cached per `(document type, collection)`; the collection
/// is matched case-insensitively. Registering a provider clears the cache.
pub struct IndexRegistry {
    providers: RwLock<Vec<Arc<dyn DescriptorSource>>>,
    index_names: RwLock<BTreeSet<&'static str>>,
    cache: DashMap<DescriptorKey, Descriptors>,
    generation: AtomicU64,
    gate: WorkGate<DescriptorKey, Descriptors>,
}

impl IndexRegistry {
    pub fn new(gating: bool) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            index_names: RwLock::new(BTreeSet::new()),
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
            gate: WorkGate::new(gating),
        }
    }

    pub fn register<P: IndexProvider>(&self, provider: P) {
        let names: Vec<&'static str> = provider.descriptors().iter().map(|d| d.name()).collect();
        debug!(
            collection = IndexProvider::collection(&provider),
            indexes = ?names,
            "index provider registered"
        );
        self.index_names.write().extend(names);
        self.providers.write().push(Arc::new(provider));
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
    }

    /// `true` when `name` is the table name of a registered index.
    pub fn is_index_name(&self, name: &str) -> bool {
        self.index_names.read().contains(name)
    }

    /// Descriptors applying to documents of `document_type` in `collection`.
    pub async fn describe(&self, document_type: TypeId, collection: &str) -> Result<Descriptors> {
        let key = (document_type, collection.to_lowercase());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.value().clone());
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let resolved = self
            .gate
            .produce(key.clone(), || async { Ok(self.resolve(document_type, &key.1)) })
            .await?;
        if self.generation.load(Ordering::SeqCst) == generation {
            self.cache.insert(key, resolved.clone());
        }
        Ok(resolved)
    }

    fn resolve(&self, document_type: TypeId, collection: &str) -> Descriptors {
        self.providers
            .read()
            .iter()
            .filter(|p| p.document_type() == document_type)
            .filter(|p| p.collection().to_lowercase() == collection)
            .flat_map(|p| p.descriptors())
            .map(Arc::new)
            .collect()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
