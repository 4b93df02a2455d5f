//! Integration tests for map and reduce indexes maintained by the session.

mod model;

use docweave::{
    Backend, ColumnType, Filter, IsolationLevel, MemoryBackend, Page, Statement, Store, StoreError, Transaction,
};
use model::{
    indexed_store, Article, ArticlesByDay, Person, PersonByName, PersonByNickname, UngroupedIndexes,
};

async fn store() -> Store {
    indexed_store(Store::builder().backend(MemoryBackend::new()).build().await.unwrap()).await
}

async fn count(store: &Store, table: &str) -> usize {
    let mut tx = store.backend().begin(IsolationLevel::default()).await.unwrap();
    tx.query(&Statement::select(table, Filter::All)).await.unwrap().len()
}

async fn day(store: &Store, day: u32) -> Option<ArticlesByDay> {
    let mut session = store.create_session();
    let mut rows: Vec<ArticlesByDay> = session
        .query_index(Filter::eq("day", day), None)
        .await
        .unwrap();
    session.dispose().await.unwrap();
    assert!(rows.len() <= 1, "more than one row for day {}", day);
    rows.pop()
}

#[tokio::test]
async fn map_index_answers_prefix_queries() {
    let store = store().await;
    let mut session = store.create_session();
    session.save(&mut Person::new("Bill")).await.unwrap();
    session.save(&mut Person::new("Steve")).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let rows: Vec<PersonByName> = session
        .query_index(Filter::starts_with("name", "B"), None)
        .await
        .unwrap();
    assert_eq!(rows, vec![PersonByName { name: "Bill".into() }]);

    let people: Vec<Person> = session
        .query::<Person, PersonByName>(Filter::starts_with("name", "B"))
        .await
        .unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "Bill");
}

#[tokio::test]
async fn map_rows_follow_document_updates_and_deletes() {
    let store = store().await;
    let mut session = store.create_session();
    let mut bill = Person::new("Bill");
    bill.nicknames = vec!["Billy".into(), "Will".into()];
    session.save(&mut bill).await.unwrap();
    session.dispose().await.unwrap();
    assert_eq!(count(&store, "PersonByNickname").await, 2);

    let mut session = store.create_session();
    let mut loaded: Person = session.get(bill.id).await.unwrap().unwrap();
    loaded.name = "William".into();
    loaded.nicknames = vec!["Liam".into()];
    session.save(&mut loaded).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let names: Vec<PersonByName> = session.query_index(Filter::All, None).await.unwrap();
    assert_eq!(names, vec![PersonByName { name: "William".into() }]);
    let nicknames: Vec<PersonByNickname> = session.query_index(Filter::All, None).await.unwrap();
    assert_eq!(nicknames, vec![PersonByNickname { nickname: "Liam".into() }]);

    session.delete(&loaded).unwrap();
    session.dispose().await.unwrap();
    assert_eq!(count(&store, "PersonByName").await, 0);
    assert_eq!(count(&store, "PersonByNickname").await, 0);
    assert_eq!(count(&store, "Document").await, 0);
}

#[tokio::test]
async fn reduce_index_counts_per_day() {
    let store = store().await;
    let mut session = store.create_session();
    let mut articles = Vec::new();
    for title in ["a", "b", "c"] {
        let mut article = Article::new(title, 1);
        session.save(&mut article).await.unwrap();
        articles.push(article);
    }
    session.dispose().await.unwrap();
    assert_eq!(day(&store, 1).await, Some(ArticlesByDay { day: 1, count: 3 }));
    assert_eq!(count(&store, "ArticlesByDay_Document").await, 3);

    let mut session = store.create_session();
    session.delete(&articles[0]).unwrap();
    session.dispose().await.unwrap();
    assert_eq!(day(&store, 1).await, Some(ArticlesByDay { day: 1, count: 2 }));
    assert_eq!(count(&store, "ArticlesByDay_Document").await, 2);

    let mut session = store.create_session();
    session.delete(&articles[1]).unwrap();
    session.delete(&articles[2]).unwrap();
    session.dispose().await.unwrap();
    assert_eq!(day(&store, 1).await, None);
    assert_eq!(count(&store, "ArticlesByDay").await, 0);
    assert_eq!(count(&store, "ArticlesByDay_Document").await, 0);
}

#[tokio::test]
async fn moving_a_document_between_groups() {
    let store = store().await;
    let mut session = store.create_session();
    let mut first = Article::new("first", 1);
    let mut second = Article::new("second", 1);
    session.save(&mut first).await.unwrap();
    session.save(&mut second).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let mut moved: Article = session.get(second.id).await.unwrap().unwrap();
    moved.day = 2;
    session.save(&mut moved).await.unwrap();
    session.dispose().await.unwrap();

    assert_eq!(day(&store, 1).await, Some(ArticlesByDay { day: 1, count: 1 }));
    assert_eq!(day(&store, 2).await, Some(ArticlesByDay { day: 2, count: 1 }));

    let mut session = store.create_session();
    let on_day_two: Vec<Article> = session
        .query::<Article, ArticlesByDay>(Filter::eq("day", 2))
        .await
        .unwrap();
    assert_eq!(on_day_two, vec![moved]);
}

#[tokio::test]
async fn resaving_an_unchanged_document_keeps_the_count() {
    let store = store().await;
    let mut session = store.create_session();
    let mut article = Article::new("stable", 4);
    session.save(&mut article).await.unwrap();
    session.commit().await.unwrap();
    session.save(&mut article).await.unwrap();
    session.dispose().await.unwrap();

    assert_eq!(day(&store, 4).await, Some(ArticlesByDay { day: 4, count: 1 }));
    assert_eq!(count(&store, "ArticlesByDay_Document").await, 1);
}

#[tokio::test]
async fn one_flush_mixing_groups() {
    let store = store().await;
    let mut session = store.create_session();
    for (title, d) in [("a", 1), ("b", 2), ("c", 1), ("d", 3), ("e", 2), ("f", 1)] {
        session.save(&mut Article::new(title, d)).await.unwrap();
    }
    session.flush().await.unwrap();
    assert_eq!(session.count_index::<ArticlesByDay>(Filter::All).await.unwrap(), 3);
    assert_eq!(
        session.count_index::<ArticlesByDay>(Filter::ge("count", 2)).await.unwrap(),
        2
    );
    let page: Vec<ArticlesByDay> = session
        .query_index(Filter::All, Some(Page::new(1, 1)))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    session.dispose().await.unwrap();

    assert_eq!(day(&store, 1).await.map(|r| r.count), Some(3));
    assert_eq!(day(&store, 2).await.map(|r| r.count), Some(2));
    assert_eq!(day(&store, 3).await.map(|r| r.count), Some(1));
}

#[tokio::test]
async fn reduce_without_group_key_fails_the_flush() {
    let store = store().await;
    store.register_indexes(UngroupedIndexes);
    let mut schema = store.schema("");
    schema.create_reduce_index_table("ArticleTotals", |t| {
        t.column("count", ColumnType::BigInt);
    });
    store.apply_schema(&schema).await.unwrap();

    let mut session = store.create_session();
    session.save(&mut Article::new("x", 1)).await.unwrap();
    let err = session.flush().await.unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
    assert!(!session.has_pending());
    session.dispose().await.unwrap();

    assert_eq!(count(&store, "Document").await, 0);
    assert_eq!(count(&store, "ArticlesByDay").await, 0);
}

#[tokio::test]
async fn query_through_an_undeclared_index_is_a_configuration_error() {
    let store = store().await;
    let mut session = store.create_session();
    let result = session.query::<Person, ArticlesByDay>(Filter::All).await;
    assert!(matches!(result, Err(StoreError::Configuration(_))));
}

#[tokio::test]
async fn indexes_are_scoped_to_their_collection() {
    let store = store().await;
    store.initialize_collection("Archive").await.unwrap();

    let mut session = store.create_session();
    session
        .save_in("Archive", &mut Person::new("Bill"), false)
        .await
        .unwrap();
    session.dispose().await.unwrap();

    assert_eq!(count(&store, "Archive_Document").await, 1);
    assert_eq!(count(&store, "PersonByName").await, 0);
}
