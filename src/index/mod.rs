//! Indexes - map and reduce projections declared per document type.
//!
//! A provider describes, for one document type, which index rows each
//! document produces. Map indexes store one row per mapped object; reduce
//! indexes group mapped objects by a key column and merge them into one row
//! per group.
//!
//! ## Example
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, Clone, Index)]
//! #[index(name = "ArticlesByDay")]
//! struct ArticlesByDay {
//!     day: u32,
//!     count: i64,
//! }
//!
//! struct ArticleIndexes;
//!
//! impl IndexProvider for ArticleIndexes {
//!     type Document = Article;
//!
//!     fn describe(&self, context: &mut DescribeContext<Article>) {
//!         context
//!             .for_index::<ArticlesByDay>()
//!             .map(|a| Some(ArticlesByDay { day: a.day, count: 1 }))
//!             .group_by("day")
//!             .reduce(|group| {
//!                 let day = group.iter().next()?.day;
//!                 Some(ArticlesByDay { day, count: group.iter().map(|i| i.count).sum() })
//!             })
//!             .delete(|mut index, group| {
//!                 index.count -= group.len() as i64;
//!                 (index.count > 0).then_some(index)
//!             });
//!     }
//! }
//! ```

mod registry;

use std::any::TypeId;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::backend::Row;
use crate::document::{downcast, Document, ErasedDocument};
use crate::error::{Result, StoreError};

pub use registry::{Descriptors, IndexRegistry};

/// A row type stored in its own index table.
pub trait Index: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Index table name, before collection and prefix qualification.
    const NAME: &'static str;
}

/// Declares the indexes of one document type.
pub trait IndexProvider: Send + Sync + 'static {
    type Document: Document;

    /// Collection the indexes apply to; the default collection is `""`.
    fn collection(&self) -> &str {
        ""
    }

    fn describe(&self, context: &mut DescribeContext<Self::Document>);
}

/// Index objects sharing one group key.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping<I> {
    key: Value,
    items: Vec<I>,
}

impl<I> Grouping<I> {
    pub fn new(key: Value, items: Vec<I>) -> Self {
        Self { key, items }
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, I> {
        self.items.iter()
    }

    pub fn into_items(self) -> Vec<I> {
        self.items
    }
}

impl<I> IntoIterator for Grouping<I> {
    type Item = I;
    type IntoIter = std::vec::IntoIter<I>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, I> IntoIterator for &'a Grouping<I> {
    type Item = &'a I;
    type IntoIter = std::slice::Iter<'a, I>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

type MapFn = Arc<dyn Fn(&dyn ErasedDocument) -> Result<Vec<Row>> + Send + Sync>;
type ReduceFn = Arc<dyn Fn(Grouping<Row>) -> Result<Option<Row>> + Send + Sync>;
type DeleteFn = Arc<dyn Fn(Row, Grouping<Row>) -> Result<Option<Row>> + Send + Sync>;
type UpdateFn = Arc<dyn Fn(Row, Grouping<Row>) -> Result<Row> + Send + Sync>;

/// Type-erased rules producing rows of one index table from one document type.
#[derive(Clone)]
pub struct IndexDescriptor {
    name: &'static str,
    index_type: TypeId,
    document_type: TypeId,
    map: MapFn,
    group_key: Option<String>,
    reduce: Option<ReduceFn>,
    delete: Option<DeleteFn>,
    update: Option<UpdateFn>,
}

impl std::fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("name", &self.name)
            .field("group_key", &self.group_key)
            .field("reduce", &self.reduce.is_some())
            .field("delete", &self.delete.is_some())
            .field("update", &self.update.is_some())
            .finish()
    }
}

impl IndexDescriptor {
    fn new<T: Document, I: Index>() -> Self {
        Self {
            name: I::NAME,
            index_type: TypeId::of::<I>(),
            document_type: TypeId::of::<T>(),
            map: Arc::new(|_: &dyn ErasedDocument| Ok(Vec::new())),
            group_key: None,
            reduce: None,
            delete: None,
            update: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn index_type(&self) -> TypeId {
        self.index_type
    }

    pub fn document_type(&self) -> TypeId {
        self.document_type
    }

    pub fn group_key(&self) -> Option<&str> {
        self.group_key.as_deref()
    }

    /// `true` for aggregating descriptors.
    pub fn is_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    /// Rows mapped from `entity`.
    pub fn map(&self, entity: &dyn ErasedDocument) -> Result<Vec<Row>> {
        (self.map)(entity)
    }

    pub fn reduce(&self, group: Grouping<Row>) -> Result<Option<Row>> {
        match &self.reduce {
            Some(reduce) => reduce(group),
            None => Err(StoreError::Configuration(format!(
                "index {} has no reduce function",
                self.name
            ))),
        }
    }

    pub fn delete(&self, index: Row, group: Grouping<Row>) -> Result<Option<Row>> {
        match &self.delete {
            Some(delete) => delete(index, group),
            None => Err(StoreError::Configuration(format!(
                "reduce index {} removes documents but declares no delete function",
                self.name
            ))),
        }
    }

    /// Without an update function the index is left unchanged.
    pub fn update(&self, index: Row, group: Grouping<Row>) -> Result<Row> {
        match &self.update {
            Some(update) => update(index, group),
            None => Ok(index),
        }
    }
}

/// Collects the descriptors a provider declares for document type `T`.
pub struct DescribeContext<T> {
    descriptors: Vec<IndexDescriptor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> DescribeContext<T> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Start describing index `I` for `T`.
    pub fn for_index<I: Index>(&mut self) -> IndexBuilder<'_, T, I> {
        self.descriptors.push(IndexDescriptor::new::<T, I>());
        let last = self.descriptors.len() - 1;
        IndexBuilder {
            descriptor: &mut self.descriptors[last],
            filter: None,
            _marker: PhantomData,
        }
    }

    pub fn into_descriptors(self) -> Vec<IndexDescriptor> {
        self.descriptors
    }
}

impl<T: Document> Default for DescribeContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Fluent configuration of one descriptor.
pub struct IndexBuilder<'a, T, I> {
    descriptor: &'a mut IndexDescriptor,
    filter: Option<Predicate<T>>,
    _marker: PhantomData<fn() -> I>,
}

impl<'a, T: Document, I: Index> IndexBuilder<'a, T, I> {
    /// Only documents matching `predicate` are mapped. Call before [`map`](Self::map).
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn map<F, R>(self, map: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoIterator<Item = I>,
    {
        let filter = self.filter.clone();
        self.descriptor.map = Arc::new(move |entity: &dyn ErasedDocument| -> Result<Vec<Row>> {
            let document = downcast::<T>(entity).ok_or_else(|| {
                StoreError::Configuration(format!(
                    "index {} maps {} but received {}",
                    I::NAME,
                    T::TYPE_NAME,
                    entity.type_name()
                ))
            })?;
            if let Some(filter) = &filter {
                if !filter(&document) {
                    return Ok(Vec::new());
                }
            }
            map(&document).into_iter().map(|index| to_row(&index)).collect()
        });
        self
    }

    /// Column whose value partitions mapped objects into reduce groups.
    pub fn group_by(self, column: &str) -> Self {
        self.descriptor.group_key = Some(column.to_string());
        self
    }

    pub fn reduce<F>(self, reduce: F) -> Self
    where
        F: Fn(Grouping<I>) -> Option<I> + Send + Sync + 'static,
    {
        self.descriptor.reduce = Some(Arc::new(move |group: Grouping<Row>| -> Result<Option<Row>> {
            reduce(typed_group(group)?).as_ref().map(to_row).transpose()
        }));
        self
    }

    /// Remove a group of mapped objects from a reduced row; `None` drops the row.
    pub fn delete<F>(self, delete: F) -> Self
    where
        F: Fn(I, Grouping<I>) -> Option<I> + Send + Sync + 'static,
    {
        self.descriptor.delete = Some(Arc::new(move |index: Row, group: Grouping<Row>| -> Result<Option<Row>> {
            delete(from_row(index)?, typed_group(group)?)
                .as_ref()
                .map(to_row)
                .transpose()
        }));
        self
    }

    pub fn update<F>(self, update: F) -> Self
    where
        F: Fn(I, Grouping<I>) -> I + Send + Sync + 'static,
    {
        self.descriptor.update = Some(Arc::new(move |index: Row, group: Grouping<Row>| -> Result<Row> {
            to_row(&update(from_row(index)?, typed_group(group)?))
        }));
        self
    }
}

/// Serialize an index object into a row; it must be a JSON object.
pub fn to_row<I: Serialize>(index: &I) -> Result<Row> {
    match serde_json::to_value(index)? {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Serialization(format!(
            "index objects must serialize to a map, got {}",
            other
        ))),
    }
}

pub fn from_row<I: DeserializeOwned>(row: Row) -> Result<I> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

fn typed_group<I: DeserializeOwned>(group: Grouping<Row>) -> Result<Grouping<I>> {
    let Grouping { key, items } = group;
    let items = items.into_iter().map(from_row).collect::<Result<Vec<I>>>()?;
    Ok(Grouping::new(key, items))
}

/// An index row with its table id and bridge bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRecord {
    /// Assigned by the backend once persisted.
    pub id: Option<i64>,
    pub row: Row,
    pub added_documents: BTreeSet<i64>,
    pub removed_documents: BTreeSet<i64>,
}

impl IndexRecord {
    pub fn new(row: Row) -> Self {
        Self {
            row,
            ..Self::default()
        }
    }

    pub fn with_added(mut self, document_id: i64) -> Self {
        self.added_documents.insert(document_id);
        self
    }

    pub fn with_removed(mut self, document_id: i64) -> Self {
        self.removed_documents.insert(document_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapStateKind {
    New,
    Update,
    Delete,
}

/// A partial index result collected during flush, before the reduce pass.
#[derive(Debug, Clone)]
pub struct MapState {
    pub descriptor: Arc<IndexDescriptor>,
    pub index: IndexRecord,
    pub state: MapStateKind,
}

impl MapState {
    pub fn new(descriptor: Arc<IndexDescriptor>, index: IndexRecord, state: MapStateKind) -> Self {
        Self {
            descriptor,
            index,
            state,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Article {
        pub id: i64,
        pub title: String,
        pub day: u32,
        pub published: bool,
    }

    impl Document for Article {
        const TYPE_NAME: &'static str = "Article";

        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ArticlesByDay {
        pub day: u32,
        pub count: i64,
    }

    impl Index for ArticlesByDay {
        const NAME: &'static str = "ArticlesByDay";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ArticleByTitle {
        pub title: String,
    }

    impl Index for ArticleByTitle {
        const NAME: &'static str = "ArticleByTitle";
    }

    pub fn describe_articles(context: &mut DescribeContext<Article>) {
        context
            .for_index::<ArticleByTitle>()
            .when(|a| a.published)
            .map(|a| Some(ArticleByTitle { title: a.title.clone() }));
        context
            .for_index::<ArticlesByDay>()
            .map(|a| Some(ArticlesByDay { day: a.day, count: 1 }))
            .group_by("day")
            .reduce(|group| {
                let day = group.iter().next()?.day;
                Some(ArticlesByDay {
                    day,
                    count: group.iter().map(|i| i.count).sum(),
                })
            })
            .delete(|mut index, group| {
                index.count -= group.len() as i64;
                (index.count > 0).then_some(index)
            });
    }

    pub fn article(id: i64, day: u32) -> Article {
        Article {
            id,
            title: format!("article {}", id),
            day,
            published: true,
        }
    }

    #[test]
    fn map_respects_when_predicate() {
        let mut context = DescribeContext::<Article>::new();
        describe_articles(&mut context);
        let descriptors = context.into_descriptors();
        assert_eq!(descriptors.len(), 2);
        assert!(!descriptors[0].is_reduce());
        assert!(descriptors[1].is_reduce());
        assert_eq!(descriptors[1].group_key(), Some("day"));

        let mut draft = article(1, 3);
        draft.published = false;
        assert!(descriptors[0].map(&draft).unwrap().is_empty());
        let rows = descriptors[0].map(&article(2, 3)).unwrap();
        assert_eq!(rows[0]["title"], json!("article 2"));
    }

    #[test]
    fn reduce_and_delete_operate_on_rows() {
        let mut context = DescribeContext::<Article>::new();
        describe_articles(&mut context);
        let by_day = &context.into_descriptors()[1];

        let row = |count: i64| to_row(&ArticlesByDay { day: 3, count }).unwrap();
        let reduced = by_day
            .reduce(Grouping::new(json!(3), vec![row(1), row(2)]))
            .unwrap()
            .unwrap();
        assert_eq!(reduced["count"], json!(3));

        let remaining = by_day
            .delete(reduced, Grouping::new(json!(3), vec![row(1), row(1), row(1)]))
            .unwrap();
        assert!(remaining.is_none());

        let unchanged = by_day
            .update(row(5), Grouping::new(json!(3), vec![row(1)]))
            .unwrap();
        assert_eq!(unchanged["count"], json!(5));
    }

    #[test]
    fn descriptor_without_delete_is_a_configuration_error() {
        let mut context = DescribeContext::<Article>::new();
        context
            .for_index::<ArticlesByDay>()
            .map(|a| Some(ArticlesByDay { day: a.day, count: 1 }))
            .group_by("day")
            .reduce(|group| group.into_items().into_iter().next());
        let descriptor = &context.into_descriptors()[0];
        let err = descriptor
            .delete(Row::new(), Grouping::new(json!(1), Vec::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
