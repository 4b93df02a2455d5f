//! Session - unit of work over one lazily opened backend transaction.
//!
//! `save`, `delete`, `import` and `detach` only touch in-memory state. The
//! pending work is written by [`Session::flush`], which every read runs
//! first, and made durable by [`Session::commit`] or [`Session::dispose`].
//!
//! ## Example
//!
//! ```ignore
//! let mut session = store.create_session();
//! let mut article = Article { id: 0, title: "Hello".into(), day: 1 };
//! session.save(&mut article).await?;
//! let found: Vec<Article> = session
//!     .query::<Article, ArticleByTitle>(Filter::starts_with("title", "He"))
//!     .await?;
//! session.dispose().await?;
//! ```

mod pool;

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::backend::{Filter, OrderBy, Page, Row, Statement, Transaction};
use crate::collection::{TableNames, DOCUMENT_TABLE};
use crate::commands::{Bridge, CommandQueue, IndexCommand};
use crate::document::{downcast, Document, DocumentRecord, ErasedDocument};
use crate::error::{Result, StoreError};
use crate::identity_map::IdentityMap;
use crate::index::{from_row, Index, IndexDescriptor, IndexRecord, MapState, MapStateKind};
use crate::reduce::ReduceEngine;
use crate::store::{Store, StoreInner};

pub(crate) use pool::SessionPool;

type Key = (String, i64);

#[derive(Clone)]
struct Pending {
    entity: Arc<dyn ErasedDocument>,
    check_concurrency: bool,
}

/// Everything a session owns; recycled through the store's pool.
#[derive(Default)]
pub(crate) struct SessionState {
    identity: IdentityMap,
    saved: BTreeMap<Key, Pending>,
    updated: BTreeMap<Key, Pending>,
    deleted: BTreeMap<Key, Pending>,
    queue: CommandQueue,
    transaction: Option<Box<dyn Transaction>>,
    pub(crate) cancelled: bool,
}

impl SessionState {
    pub(crate) fn has_pending(&self) -> bool {
        !(self.saved.is_empty() && self.updated.is_empty() && self.deleted.is_empty() && self.queue.is_empty())
    }

    /// Back to the state of a freshly created session.
    pub(crate) fn reset(&mut self) {
        self.discard();
        self.cancelled = false;
    }

    /// Drop pending work, tracked entities and the transaction handle.
    fn discard(&mut self) {
        self.identity.clear();
        self.saved.clear();
        self.updated.clear();
        self.deleted.clear();
        self.queue.clear();
        self.transaction = None;
    }
}

async fn open<'t>(slot: &'t mut Option<Box<dyn Transaction>>, store: &StoreInner) -> Result<&'t mut dyn Transaction> {
    if slot.is_none() {
        *slot = Some(store.backend.begin(store.config.isolation_level).await?);
        debug!(isolation = ?store.config.isolation_level, "session transaction opened");
    }
    match slot.as_deref_mut() {
        Some(tx) => Ok(tx),
        None => Err(StoreError::Backend("session transaction unavailable".into())),
    }
}

fn record_from_row(row: &Row) -> Result<DocumentRecord> {
    let id = row
        .get("Id")
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::Backend("document row without Id".into()))?;
    let type_name = row
        .get("Type")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Backend(format!("document {} without Type", id)))?;
    Ok(DocumentRecord {
        id,
        type_name: type_name.to_string(),
        content: row.get("Content").and_then(Value::as_str).map(str::to_string),
        version: row.get("Version").and_then(Value::as_i64).unwrap_or(0),
    })
}

async fn load_record(tx: &mut dyn Transaction, names: &TableNames, id: i64) -> Result<Option<DocumentRecord>> {
    let rows = tx
        .query(&Statement::select(names.document(), Filter::eq("Id", id)))
        .await?;
    rows.first().map(record_from_row).transpose()
}

/// Stored content of one document, decoded as the type of `like`.
async fn load_previous(
    tx: &mut dyn Transaction,
    store: &StoreInner,
    names: &TableNames,
    id: i64,
    like: &dyn ErasedDocument,
) -> Result<Option<Arc<dyn ErasedDocument>>> {
    match store.storage.get(tx, names, &[id]).await?.remove(&id) {
        Some(content) => Ok(Some(like.decode(store.serializer.deserialize(&content)?)?)),
        None => Ok(None),
    }
}

fn map_new(
    descriptors: &[Arc<IndexDescriptor>],
    entity: &dyn ErasedDocument,
    id: i64,
    states: &mut Vec<MapState>,
) -> Result<()> {
    for descriptor in descriptors {
        for row in descriptor.map(entity)? {
            states.push(MapState::new(
                descriptor.clone(),
                IndexRecord::new(row).with_added(id),
                MapStateKind::New,
            ));
        }
    }
    Ok(())
}

fn map_deleted(
    descriptors: &[Arc<IndexDescriptor>],
    entity: &dyn ErasedDocument,
    id: i64,
    states: &mut Vec<MapState>,
) -> Result<()> {
    for descriptor in descriptors {
        if descriptor.is_reduce() {
            for row in descriptor.map(entity)? {
                states.push(MapState::new(
                    descriptor.clone(),
                    IndexRecord::new(row).with_removed(id),
                    MapStateKind::Delete,
                ));
            }
        } else {
            // Map rows are removed wholesale by document id.
            states.push(MapState::new(
                descriptor.clone(),
                IndexRecord::default().with_removed(id),
                MapStateKind::Delete,
            ));
        }
    }
    Ok(())
}

async fn flush_pending(state: &mut SessionState, store: &StoreInner) -> Result<()> {
    let SessionState {
        identity,
        saved,
        updated,
        deleted,
        queue,
        transaction,
        ..
    } = state;
    let tx = open(transaction, store).await?;
    let mut states: BTreeMap<String, Vec<MapState>> = BTreeMap::new();

    for ((collection, id), pending) in updated.iter() {
        let key = (collection.clone(), *id);
        if deleted.contains_key(&key) {
            continue;
        }
        let (collection, id) = (collection.as_str(), *id);
        let names = store.names(collection);
        let descriptors = store.registry.describe(pending.entity.document_type(), collection).await?;

        let stored = load_record(tx, &names, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("document {} in {}", id, names.document())))?;
        let expected = match identity.try_get_entity_by_id(collection, id) {
            Some(tracked) if pending.check_concurrency => tracked.version,
            _ => stored.version,
        };
        if expected != stored.version {
            return Err(StoreError::Concurrency {
                collection: collection.to_string(),
                id,
                expected,
                actual: stored.version,
            });
        }

        let collected = states.entry(collection.to_string()).or_default();
        if let Some(previous) = load_previous(tx, store, &names, id, pending.entity.as_ref()).await? {
            map_deleted(&descriptors, previous.as_ref(), id, collected)?;
        }
        map_new(&descriptors, pending.entity.as_ref(), id, collected)?;

        let mut filter = Filter::eq("Id", id);
        if pending.check_concurrency {
            filter = filter.and(Filter::eq("Version", expected));
        }
        let mut values = Row::new();
        values.insert("Version".into(), Value::from(expected + 1));
        let outcome = tx
            .execute(&Statement::Update {
                table: names.document(),
                values,
                filter,
            })
            .await?;
        if outcome.rows_affected == 0 {
            let actual = load_record(tx, &names, id).await?.map_or(expected, |r| r.version);
            return Err(StoreError::Concurrency {
                collection: collection.to_string(),
                id,
                expected,
                actual,
            });
        }

        let content = store.serializer.serialize(&pending.entity.to_value()?)?;
        for statement in store.storage.update(&names, id, &content) {
            trace!(table = statement.table(), id, "updating content");
            tx.execute(&statement).await?;
        }
        if !identity.refresh(collection, id, pending.entity.clone()) {
            identity.add(collection, id, pending.entity.clone(), expected + 1);
        }
        identity.set_version(collection, id, expected + 1);
    }

    for ((collection, id), pending) in saved.iter() {
        let names = store.names(collection);
        let descriptors = store.registry.describe(pending.entity.document_type(), collection).await?;
        let content = store.serializer.serialize(&pending.entity.to_value()?)?;
        let record = DocumentRecord {
            id: *id,
            type_name: pending.entity.type_name().to_string(),
            content: Some(content.clone()),
            version: 0,
        };
        queue.push(IndexCommand::CreateDocument {
            id: *id,
            statements: store.storage.create(&names, &record, &content),
        });
        map_new(&descriptors, pending.entity.as_ref(), *id, states.entry(collection.clone()).or_default())?;
        identity.add(collection, *id, pending.entity.clone(), 0);
    }

    for ((collection, id), pending) in deleted.iter() {
        let (collection, id) = (collection.as_str(), *id);
        let names = store.names(collection);
        identity.remove(collection, id);
        if load_record(tx, &names, id).await?.is_none() {
            debug!(collection, id, "deleted document was not stored");
            continue;
        }
        let descriptors = store.registry.describe(pending.entity.document_type(), collection).await?;
        let previous = load_previous(tx, store, &names, id, pending.entity.as_ref())
            .await?
            .unwrap_or_else(|| pending.entity.clone());
        map_deleted(&descriptors, previous.as_ref(), id, states.entry(collection.to_string()).or_default())?;
        queue.push(IndexCommand::DeleteDocument {
            id,
            statements: store.storage.delete(&names, id),
        });
    }

    for (collection, collected) in states {
        let names = store.names(&collection);
        let commands = ReduceEngine::new(&names).run(tx, collected).await?;
        queue.extend(commands);
    }
    queue.execute(tx, store.config.command_batch_size).await?;

    saved.clear();
    updated.clear();
    deleted.clear();
    Ok(())
}

/// Flush; on failure roll the transaction back and drop all session state.
async fn flush_state(state: &mut SessionState, store: &StoreInner) -> Result<()> {
    if !state.has_pending() {
        return Ok(());
    }
    debug!(
        saved = state.saved.len(),
        updated = state.updated.len(),
        deleted = state.deleted.len(),
        "flushing session"
    );
    match flush_pending(state, store).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(error = %err, "flush failed, rolling back");
            if let Some(tx) = state.transaction.take() {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed flush failed");
                }
            }
            state.discard();
            Err(err)
        }
    }
}

/// A unit of work. Not shared between tasks; create one per logical operation.
pub struct Session {
    store: Store,
    state: Option<SessionState>,
}

impl Session {
    pub(crate) fn new(store: Store, state: SessionState) -> Self {
        Self {
            store,
            state: Some(state),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_none()
    }

    /// `true` while saves, updates or deletes wait for a flush.
    pub fn has_pending(&self) -> bool {
        self.state.as_ref().is_some_and(SessionState::has_pending)
    }

    fn check_entity<T: Document>(&self, entity: &T) -> Result<()> {
        let type_name = T::TYPE_NAME;
        if type_name.is_empty() || type_name == DOCUMENT_TABLE || self.store.inner.registry.is_index_name(type_name) {
            return Err(StoreError::Argument(format!(
                "{:?} is an internal record type and cannot be stored as a document",
                type_name
            )));
        }
        if entity.id() < 0 {
            return Err(StoreError::Argument(format!(
                "{} has negative id {}",
                type_name,
                entity.id()
            )));
        }
        Ok(())
    }

    pub async fn save<T: Document>(&mut self, entity: &mut T) -> Result<()> {
        self.save_in("", entity, false).await
    }

    /// Save, failing the flush if the stored version moved since the entity was loaded.
    pub async fn save_checked<T: Document>(&mut self, entity: &mut T) -> Result<()> {
        self.save_in("", entity, true).await
    }

    /// Schedule `entity` for writing. A new entity gets its id here.
    ///
    /// The session keeps a snapshot; changes made to `entity` afterwards
    /// need another save.
    pub async fn save_in<T: Document>(
        &mut self,
        collection: &str,
        entity: &mut T,
        check_concurrency: bool,
    ) -> Result<()> {
        self.check_entity(entity)?;
        let Session { store, state } = self;
        let state = state.as_mut().ok_or(StoreError::Disposed)?;

        if entity.id() == 0 {
            let id = store.next_id(collection).await?;
            entity.set_id(id);
            let snapshot: Arc<dyn ErasedDocument> = Arc::new(entity.clone());
            state.identity.add(collection, id, snapshot.clone(), 0);
            state.saved.insert(
                (collection.to_string(), id),
                Pending {
                    entity: snapshot,
                    check_concurrency,
                },
            );
            trace!(collection, id, type_name = T::TYPE_NAME, "new document scheduled");
            return Ok(());
        }

        let id = entity.id();
        let key = (collection.to_string(), id);
        let snapshot: Arc<dyn ErasedDocument> = Arc::new(entity.clone());
        if state.deleted.remove(&key).is_some() {
            trace!(collection, id, "save after delete keeps the document");
        }
        if let Some(pending) = state.saved.get_mut(&key) {
            pending.entity = snapshot.clone();
            state.identity.refresh(collection, id, snapshot);
            return Ok(());
        }
        if let Some(pending) = state.updated.get_mut(&key) {
            pending.entity = snapshot.clone();
            pending.check_concurrency |= check_concurrency;
            state.identity.refresh(collection, id, snapshot);
            return Ok(());
        }
        if state.identity.try_get_id(collection, &*entity).is_some() {
            state.identity.refresh(collection, id, snapshot.clone());
        }
        state.updated.insert(
            key,
            Pending {
                entity: snapshot,
                check_concurrency,
            },
        );
        trace!(collection, id, type_name = T::TYPE_NAME, "document update scheduled");
        Ok(())
    }

    pub fn delete<T: Document>(&mut self, entity: &T) -> Result<()> {
        self.delete_in("", entity)
    }

    /// Schedule removal of a stored document. Deleting an entity saved in
    /// this session but not yet flushed cancels the save; saving it again
    /// afterwards cancels the delete.
    pub fn delete_in<T: Document>(&mut self, collection: &str, entity: &T) -> Result<()> {
        self.check_entity(entity)?;
        let id = entity.id();
        if id == 0 {
            return Err(StoreError::Argument(format!(
                "cannot delete a {} that was never saved",
                T::TYPE_NAME
            )));
        }
        let state = self.state.as_mut().ok_or(StoreError::Disposed)?;
        let key = (collection.to_string(), id);
        if state.saved.remove(&key).is_some() {
            state.identity.remove(collection, id);
            return Ok(());
        }
        state.deleted.insert(
            key,
            Pending {
                entity: Arc::new(entity.clone()),
                check_concurrency: false,
            },
        );
        Ok(())
    }

    pub fn import<T: Document>(&mut self, entity: &T, version: i64) -> Result<()> {
        self.import_in("", entity, version)
    }

    /// Track an entity that is already stored, as if it had been loaded.
    pub fn import_in<T: Document>(&mut self, collection: &str, entity: &T, version: i64) -> Result<()> {
        self.check_entity(entity)?;
        if entity.id() == 0 {
            return Err(StoreError::Argument(format!(
                "cannot import a {} without an id",
                T::TYPE_NAME
            )));
        }
        let state = self.state.as_mut().ok_or(StoreError::Disposed)?;
        state
            .identity
            .add(collection, entity.id(), Arc::new(entity.clone()), version);
        Ok(())
    }

    pub fn detach<T: Document>(&mut self, entity: &T) -> Result<()> {
        self.detach_in("", entity)
    }

    /// Stop tracking an entity and forget any work pending for it.
    pub fn detach_in<T: Document>(&mut self, collection: &str, entity: &T) -> Result<()> {
        let state = self.state.as_mut().ok_or(StoreError::Disposed)?;
        let id = entity.id();
        let key = (collection.to_string(), id);
        state.identity.remove(collection, id);
        state.saved.remove(&key);
        state.updated.remove(&key);
        state.deleted.remove(&key);
        Ok(())
    }

    pub async fn get<T: Document>(&mut self, id: i64) -> Result<Option<T>> {
        self.get_in("", id).await
    }

    pub async fn get_in<T: Document>(&mut self, collection: &str, id: i64) -> Result<Option<T>> {
        Ok(self.get_many_in::<T>(collection, &[id]).await?.pop())
    }

    pub async fn get_many<T: Document>(&mut self, ids: &[i64]) -> Result<Vec<T>> {
        self.get_many_in("", ids).await
    }

    /// Documents of type `T` by id, in the order of `ids`. Missing ids and
    /// documents of another type are skipped; a repeated id yields a copy
    /// for each occurrence.
    pub async fn get_many_in<T: Document>(&mut self, collection: &str, ids: &[i64]) -> Result<Vec<T>> {
        let Session { store, state } = self;
        let store = &*store.inner;
        let state = state.as_mut().ok_or(StoreError::Disposed)?;
        flush_state(state, store).await?;

        let mut found: HashMap<i64, T> = HashMap::with_capacity(ids.len());
        let mut missing: BTreeSet<i64> = BTreeSet::new();
        for &id in ids {
            match state.identity.try_get_entity_by_id(collection, id) {
                Some(tracked) => {
                    if let Some(entity) = downcast::<T>(tracked.entity.as_ref()) {
                        found.insert(id, entity);
                    }
                }
                None => {
                    missing.insert(id);
                }
            }
        }

        if !missing.is_empty() {
            let names = store.names(collection);
            let tx = open(&mut state.transaction, store).await?;
            let missing: Vec<i64> = missing.into_iter().collect();
            let mut records = Vec::with_capacity(missing.len());
            for page in missing.chunks(store.config.content_page_size.max(1)) {
                let rows = tx
                    .query(&Statement::select(
                        names.document(),
                        Filter::is_in("Id", page.iter().copied()),
                    ))
                    .await?;
                for row in &rows {
                    let record = record_from_row(row)?;
                    if record.type_name == T::TYPE_NAME {
                        records.push(record);
                    } else {
                        trace!(id = record.id, stored = %record.type_name, requested = T::TYPE_NAME, "type mismatch");
                    }
                }
            }

            let loaded: Vec<i64> = records.iter().map(|r| r.id).collect();
            let mut contents = store.storage.get(tx, &names, &loaded).await?;
            for record in records {
                let Some(content) = contents.remove(&record.id) else {
                    continue;
                };
                let entity: T = serde_json::from_value(store.serializer.deserialize(&content)?)?;
                state
                    .identity
                    .add(collection, record.id, Arc::new(entity.clone()), record.version);
                found.insert(record.id, entity);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    pub async fn query_index<I: Index>(&mut self, filter: Filter, page: Option<Page>) -> Result<Vec<I>> {
        self.query_index_in("", filter, page).await
    }

    /// Rows of index `I` matching `filter`, ordered by row id.
    pub async fn query_index_in<I: Index>(
        &mut self,
        collection: &str,
        filter: Filter,
        page: Option<Page>,
    ) -> Result<Vec<I>> {
        let rows = self.index_rows(collection, I::NAME, filter, page).await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn count_index<I: Index>(&mut self, filter: Filter) -> Result<u64> {
        self.count_index_in::<I>("", filter).await
    }

    pub async fn count_index_in<I: Index>(&mut self, collection: &str, filter: Filter) -> Result<u64> {
        let Session { store, state } = self;
        let store = &*store.inner;
        let state = state.as_mut().ok_or(StoreError::Disposed)?;
        flush_state(state, store).await?;
        let tx = open(&mut state.transaction, store).await?;
        let rows = tx
            .query(&Statement::Count {
                table: store.names(collection).index(I::NAME),
                filter,
            })
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    pub async fn query<T: Document, I: Index>(&mut self, filter: Filter) -> Result<Vec<T>> {
        self.query_in::<T, I>("", filter).await
    }

    /// Documents whose rows in index `I` match `filter`. Map index rows
    /// point at their document; reduce index rows go through the bridge.
    pub async fn query_in<T: Document, I: Index>(&mut self, collection: &str, filter: Filter) -> Result<Vec<T>> {
        let descriptors = self
            .store
            .inner
            .registry
            .describe(TypeId::of::<T>(), collection)
            .await?;
        let descriptor = descriptors
            .iter()
            .find(|d| d.index_type() == TypeId::of::<I>())
            .cloned()
            .ok_or_else(|| {
                StoreError::Configuration(format!(
                    "index {} is not declared for {} in collection {:?}",
                    I::NAME,
                    T::TYPE_NAME,
                    collection
                ))
            })?;

        let rows = self.index_rows(collection, I::NAME, filter, None).await?;
        let document_ids = if descriptor.is_reduce() {
            let index_ids: Vec<i64> = rows
                .iter()
                .filter_map(|r| r.get("Id").and_then(Value::as_i64))
                .collect();
            if index_ids.is_empty() {
                return Ok(Vec::new());
            }
            let bridge = Bridge::new(&self.store.inner.names(collection), I::NAME);
            let links = self
                .rows(Statement::Select {
                    table: bridge.table.clone(),
                    filter: Filter::is_in(bridge.index_column.clone(), index_ids),
                    order_by: vec![OrderBy::asc("DocumentId")],
                    page: None,
                })
                .await?;
            column_values(&links, "DocumentId")
        } else {
            column_values(&rows, "DocumentId")
        };

        self.get_many_in::<T>(collection, &document_ids).await
    }

    async fn index_rows(
        &mut self,
        collection: &str,
        index_name: &str,
        filter: Filter,
        page: Option<Page>,
    ) -> Result<Vec<Row>> {
        let table = self.store.inner.names(collection).index(index_name);
        self.rows(Statement::Select {
            table,
            filter,
            order_by: vec![OrderBy::asc("Id")],
            page,
        })
        .await
    }

    async fn rows(&mut self, statement: Statement) -> Result<Vec<Row>> {
        let Session { store, state } = self;
        let store = &*store.inner;
        let state = state.as_mut().ok_or(StoreError::Disposed)?;
        flush_state(state, store).await?;
        let tx = open(&mut state.transaction, store).await?;
        trace!(table = statement.table(), "query");
        tx.query(&statement).await
    }

    /// Write pending work into the session transaction without committing.
    pub async fn flush(&mut self) -> Result<()> {
        let Session { store, state } = self;
        let state = state.as_mut().ok_or(StoreError::Disposed)?;
        flush_state(state, &store.inner).await
    }

    /// Flush and commit. The session stays usable and opens a new
    /// transaction on its next backend access.
    pub async fn commit(&mut self) -> Result<()> {
        self.flush().await?;
        let state = self.state.as_mut().ok_or(StoreError::Disposed)?;
        if let Some(tx) = state.transaction.take() {
            if let Err(err) = tx.commit().await {
                state.discard();
                return Err(err);
            }
            debug!("session committed");
        }
        Ok(())
    }

    /// Roll back instead of committing when the session is disposed.
    pub fn cancel(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(StoreError::Disposed)?;
        state.cancelled = true;
        Ok(())
    }

    /// Commit pending work (or roll back after [`cancel`](Self::cancel)) and
    /// return the session's state to the store. Later calls fail with
    /// [`StoreError::Disposed`].
    pub async fn dispose(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        let inner = &*self.store.inner;
        let result = if state.cancelled {
            match state.transaction.take() {
                Some(tx) => {
                    debug!("session cancelled, rolling back");
                    tx.rollback().await
                }
                None => Ok(()),
            }
        } else {
            match flush_state(&mut state, inner).await {
                Ok(()) => match state.transaction.take() {
                    Some(tx) => {
                        debug!("session committed on dispose");
                        tx.commit().await
                    }
                    None => Ok(()),
                },
                Err(err) => Err(err),
            }
        };
        inner.pool.release(state);
        result
    }
}

fn column_values(rows: &[Row], column: &str) -> Vec<i64> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_i64))
        .filter(|id| seen.insert(*id))
        .collect()
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if state.has_pending() || state.transaction.is_some() {
                warn!(
                    pending = state.has_pending(),
                    "session dropped without dispose, its work is discarded"
                );
            }
            self.store.inner.pool.release(state);
        }
    }
}
