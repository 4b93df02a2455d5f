//! People with a map index on their name, articles with a reduce index
//! counting them per day.

use docweave::{ColumnType, DescribeContext, Document, Index, IndexProvider, Store};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Document)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub nicknames: Vec<String>,
}

impl Person {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            nicknames: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Index)]
pub struct PersonByName {
    pub name: String,
}

/// One row per nickname.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Index)]
pub struct PersonByNickname {
    pub nickname: String,
}

pub struct PersonIndexes;

impl IndexProvider for PersonIndexes {
    type Document = Person;

    fn describe(&self, context: &mut DescribeContext<Person>) {
        context
            .for_index::<PersonByName>()
            .map(|p: &Person| Some(PersonByName { name: p.name.clone() }));
        context.for_index::<PersonByNickname>().map(|p: &Person| {
            p.nicknames
                .iter()
                .map(|n| PersonByNickname { nickname: n.clone() })
                .collect::<Vec<_>>()
        });
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Document)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub day: u32,
}

impl Article {
    pub fn new(title: &str, day: u32) -> Self {
        Self {
            id: 0,
            title: title.to_string(),
            day,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Index)]
#[index(name = "ArticlesByDay")]
pub struct ArticlesByDay {
    pub day: u32,
    pub count: i64,
}

pub struct ArticleIndexes;

impl IndexProvider for ArticleIndexes {
    type Document = Article;

    fn describe(&self, context: &mut DescribeContext<Article>) {
        context
            .for_index::<ArticlesByDay>()
            .map(|a: &Article| Some(ArticlesByDay { day: a.day, count: 1 }))
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
}

/// Reduce index without a group key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Index)]
pub struct ArticleTotals {
    pub count: i64,
}

pub struct UngroupedIndexes;

impl IndexProvider for UngroupedIndexes {
    type Document = Article;

    fn describe(&self, context: &mut DescribeContext<Article>) {
        context
            .for_index::<ArticleTotals>()
            .map(|_: &Article| Some(ArticleTotals { count: 1 }))
            .reduce(|group| {
                Some(ArticleTotals {
                    count: group.iter().map(|i| i.count).sum(),
                })
            });
    }
}

/// Store with both providers registered and their tables created.
pub async fn indexed_store(store: Store) -> Store {
    store.register_indexes(PersonIndexes);
    store.register_indexes(ArticleIndexes);
    let mut schema = store.schema("");
    schema
        .create_map_index_table("PersonByName", |t| {
            t.column("name", ColumnType::text());
        })
        .create_map_index_table("PersonByNickname", |t| {
            t.column("nickname", ColumnType::text());
        })
        .create_reduce_index_table("ArticlesByDay", |t| {
            t.column("day", ColumnType::Integer).column("count", ColumnType::BigInt);
        });
    store.apply_schema(&schema).await.unwrap();
    store
}
