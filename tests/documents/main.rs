//! Integration tests for the session lifecycle: saving, loading, deleting,
//! collections and content storage.

mod model;

use docweave::{
    Backend, ColumnType, ContentTableStorage, Filter, IsolationLevel, MemoryBackend, Row, Statement, Store,
    StoreConfig, StoreError, Transaction,
};
use model::{Impostor, Invoice, Note, NoteByText, NoteIndexes, RawDocument};

async fn store() -> Store {
    Store::builder().backend(MemoryBackend::new()).build().await.unwrap()
}

async fn table(store: &Store, name: &str) -> Vec<Row> {
    let mut tx = store.backend().begin(IsolationLevel::default()).await.unwrap();
    tx.query(&Statement::select(name, Filter::All)).await.unwrap()
}

#[tokio::test]
async fn first_save_gets_the_first_id() {
    let store = store().await;
    let mut session = store.create_session();

    let mut note = Note::new("hello");
    session.save(&mut note).await.unwrap();
    session.dispose().await.unwrap();

    let rows = table(&store, "Document").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Id"], 1);
    assert_eq!(rows[0]["Type"], "Note");
    assert_eq!(rows[0]["Version"], 0);
    assert_eq!(note.id, 1);
}

#[tokio::test]
async fn saving_a_tracked_instance_twice_writes_once() {
    let store = store().await;
    let mut session = store.create_session();
    let mut note = Note::new("draft");
    session.save(&mut note).await.unwrap();
    session.commit().await.unwrap();

    note.text = "first edit".into();
    session.save(&mut note).await.unwrap();
    note.text = "second edit".into();
    session.save(&mut note).await.unwrap();
    session.dispose().await.unwrap();

    let rows = table(&store, "Document").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Version"], 1);

    let mut session = store.create_session();
    let stored: Note = session.get(note.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "second edit");
    session.dispose().await.unwrap();
}

#[tokio::test]
async fn save_then_delete_leaves_no_row() {
    let store = store().await;
    let mut session = store.create_session();
    let mut note = Note::new("ephemeral");
    session.save(&mut note).await.unwrap();
    session.delete(&note).unwrap();
    session.dispose().await.unwrap();

    assert!(table(&store, "Document").await.is_empty());
}

#[tokio::test]
async fn delete_then_save_keeps_the_document() {
    let store = store().await;
    let mut session = store.create_session();
    let mut note = Note::new("original");
    session.save(&mut note).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let mut loaded: Note = session.get(note.id).await.unwrap().unwrap();
    session.delete(&loaded).unwrap();
    loaded.text = "restored".into();
    session.save(&mut loaded).await.unwrap();
    session.dispose().await.unwrap();

    let rows = table(&store, "Document").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Version"], 1);

    let mut session = store.create_session();
    let stored: Note = session.get(note.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "restored");
}

#[tokio::test]
async fn delete_removes_a_stored_document() {
    let store = store().await;
    let mut session = store.create_session();
    let mut keep = Note::new("keep");
    let mut gone = Note::new("gone");
    session.save(&mut keep).await.unwrap();
    session.save(&mut gone).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let loaded: Note = session.get(gone.id).await.unwrap().unwrap();
    session.delete(&loaded).unwrap();
    assert!(session.get::<Note>(gone.id).await.unwrap().is_none());
    session.dispose().await.unwrap();

    let rows = table(&store, "Document").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Id"], keep.id);
}

#[tokio::test]
async fn saving_an_untracked_entity_with_an_id_updates_it() {
    let store = store().await;
    let mut session = store.create_session();
    let mut note = Note::new("original");
    session.save(&mut note).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let mut replacement = Note {
        id: note.id,
        text: "replaced".into(),
    };
    session.save(&mut replacement).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let stored: Note = session.get(note.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "replaced");
    assert_eq!(table(&store, "Document").await.len(), 1);
}

#[tokio::test]
async fn custom_id_field_and_type_name() {
    let store = store().await;
    let mut session = store.create_session();
    let mut invoice = Invoice { number: 0, total: 120 };
    session.save(&mut invoice).await.unwrap();
    session.dispose().await.unwrap();
    assert_eq!(invoice.number, 1);

    let mut session = store.create_session();
    let stored: Invoice = session.get(1).await.unwrap().unwrap();
    assert_eq!(stored, invoice);
    assert!(session.get::<Note>(1).await.unwrap().is_none());
}

#[tokio::test]
async fn get_many_keeps_the_requested_order() {
    let store = store().await;
    let mut session = store.create_session();
    let mut ids = Vec::new();
    for text in ["a", "b", "c"] {
        let mut note = Note::new(text);
        session.save(&mut note).await.unwrap();
        ids.push(note.id);
    }
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let found: Vec<Note> = session.get_many(&[ids[2], 99, ids[0]]).await.unwrap();
    let texts: Vec<&str> = found.iter().map(|n| n.text.as_str()).collect();
    assert_eq!(texts, vec!["c", "a"]);
}

#[tokio::test]
async fn get_many_repeats_duplicate_ids() {
    let store = store().await;
    let mut session = store.create_session();
    let mut note = Note::new("twice");
    session.save(&mut note).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let found: Vec<Note> = session.get_many(&[note.id, note.id]).await.unwrap();
    assert_eq!(found, vec![note.clone(), note]);
}

#[tokio::test]
async fn internal_record_types_are_rejected() {
    let store = store().await;
    store.register_indexes(NoteIndexes);
    let mut session = store.create_session();

    let mut raw = RawDocument { id: 0 };
    assert!(matches!(session.save(&mut raw).await, Err(StoreError::Argument(_))));

    let mut impostor = Impostor { id: 0 };
    assert!(matches!(session.save(&mut impostor).await, Err(StoreError::Argument(_))));

    let mut negative = Note {
        id: -4,
        text: "bad".into(),
    };
    assert!(matches!(session.save(&mut negative).await, Err(StoreError::Argument(_))));
    assert!(matches!(session.delete(&Note::new("unsaved")), Err(StoreError::Argument(_))));
}

#[tokio::test]
async fn collections_have_their_own_tables_and_sequences() {
    let store = store().await;
    store.initialize_collection("Drafts").await.unwrap();

    let mut session = store.create_session();
    let mut published = Note::new("published");
    let mut draft = Note::new("draft");
    session.save(&mut published).await.unwrap();
    session.save_in("Drafts", &mut draft, false).await.unwrap();
    session.dispose().await.unwrap();

    assert_eq!(published.id, 1);
    assert_eq!(draft.id, 1);
    assert_eq!(table(&store, "Document").await.len(), 1);
    assert_eq!(table(&store, "Drafts_Document").await.len(), 1);

    let mut session = store.create_session();
    let found: Note = session.get_in("Drafts", 1).await.unwrap().unwrap();
    assert_eq!(found.text, "draft");
    let found: Note = session.get(1).await.unwrap().unwrap();
    assert_eq!(found.text, "published");
}

#[tokio::test]
async fn content_can_live_in_its_own_table() {
    let backend = MemoryBackend::new();
    let store = Store::builder()
        .config(StoreConfig::default().with_content_page_size(2))
        .backend(backend.clone())
        .storage(ContentTableStorage::new(2))
        .build()
        .await
        .unwrap();

    let mut session = store.create_session();
    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        let mut note = Note::new(text);
        session.save(&mut note).await.unwrap();
        ids.push(note.id);
    }
    session.dispose().await.unwrap();

    assert!(backend.table_names().contains(&"Content".to_string()));
    let documents = table(&store, "Document").await;
    assert!(documents.iter().all(|r| r.get("Content").map_or(true, |c| c.is_null())));
    assert_eq!(table(&store, "Content").await.len(), 3);

    let mut session = store.create_session();
    let found: Vec<Note> = session.get_many(&ids).await.unwrap();
    assert_eq!(found.len(), 3);
    session.delete(&found[1]).unwrap();
    session.dispose().await.unwrap();
    assert_eq!(table(&store, "Content").await.len(), 2);
    assert_eq!(table(&store, "Document").await.len(), 2);
}

#[tokio::test]
async fn import_and_detach_control_tracking() {
    let store = store().await;
    let mut session = store.create_session();
    let mut note = Note::new("stored");
    session.save(&mut note).await.unwrap();
    session.dispose().await.unwrap();

    let mut session = store.create_session();
    let stale = Note {
        id: note.id,
        text: "local copy".into(),
    };
    session.import(&stale, 0).unwrap();
    let tracked: Note = session.get(note.id).await.unwrap().unwrap();
    assert_eq!(tracked.text, "local copy");

    session.detach(&stale).unwrap();
    let reloaded: Note = session.get(note.id).await.unwrap().unwrap();
    assert_eq!(reloaded.text, "stored");
}

#[tokio::test]
async fn commit_keeps_the_session_usable() {
    let store = store().await;
    let mut session = store.create_session();
    let mut first = Note::new("first");
    session.save(&mut first).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(table(&store, "Document").await.len(), 1);

    let mut second = Note::new("second");
    session.save(&mut second).await.unwrap();
    session.cancel().unwrap();
    session.dispose().await.unwrap();
    assert_eq!(table(&store, "Document").await.len(), 1);

    assert!(matches!(session.flush().await, Err(StoreError::Disposed)));
    assert!(matches!(session.get::<Note>(1).await, Err(StoreError::Disposed)));
}

#[tokio::test]
async fn dropped_session_discards_its_work() {
    let store = store().await;
    {
        let mut session = store.create_session();
        let mut note = Note::new("lost");
        session.save(&mut note).await.unwrap();
        session.flush().await.unwrap();
    }
    assert!(table(&store, "Document").await.is_empty());
    assert_eq!(store.pooled_sessions(), 1);
}

#[tokio::test]
async fn index_name_registry_sees_derived_names() {
    let store = store().await;
    store.register_indexes(NoteIndexes);
    let mut schema = store.schema("");
    schema.create_map_index_table("NoteByText", |t| {
        t.column("text", ColumnType::text());
    });
    store.apply_schema(&schema).await.unwrap();

    let mut session = store.create_session();
    let mut note = Note::new("indexed");
    session.save(&mut note).await.unwrap();
    let rows: Vec<NoteByText> = session.query_index(Filter::All, None).await.unwrap();
    assert_eq!(rows, vec![NoteByText { text: "indexed".into() }]);
}
