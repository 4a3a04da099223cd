//! Store contract shared by the memory and SQLite implementations

use chrono::{TimeZone, Utc};
use threadlab_common::{AnnotationSource, Error, ThreadAnnotation, Turn};
use threadlab_engine::store::fetch_all_turns;
use threadlab_engine::{
    AnnotationStore, AnnotationWrite, MemoryStore, PageRequest, SqliteStore, TurnSource,
};

fn turns(container: &str, count: u64) -> Vec<Turn> {
    (0..count)
        .map(|i| {
            let turn = Turn::new(container, format!("t{}", i), "u", format!("text {}", i), i)
                .at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, i as u32).unwrap());
            if i == 0 {
                turn
            } else {
                turn.replying_to(format!("t{}", i - 1))
            }
        })
        .collect()
}

fn seeded(turn_id: &str, thread: &str) -> ThreadAnnotation {
    ThreadAnnotation {
        turn_id: turn_id.to_string(),
        thread_id: thread.to_string(),
        confidence: 1.0,
        notes: Some("seed".to_string()),
        source: AnnotationSource::Import,
        created_by: "importer".to_string(),
        created_at: 0,
    }
}

async fn check_turn_paging<S: TurnSource>(store: &S) {
    store.store_turns(&turns("c1", 7)).await.unwrap();
    store.store_turns(&turns("c2", 2)).await.unwrap();

    let first = store.fetch_turns("c1", PageRequest::first(3)).await.unwrap();
    let ids: Vec<&str> = first.iter().map(|t| t.turn_id.as_str()).collect();
    assert_eq!(ids, vec!["t0", "t1", "t2"]);
    assert_eq!(first[1].reply_to_turn.as_deref(), Some("t0"));
    assert_eq!(first[2].timestamp, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 2).unwrap()));

    let last = store
        .fetch_turns("c1", PageRequest::first(3).next().next())
        .await
        .unwrap();
    assert_eq!(last.len(), 1);

    let all = fetch_all_turns(store, "c1", 3).await.unwrap();
    assert_eq!(all.len(), 7);
    assert_eq!(store.next_ingest_seq("c1").await.unwrap(), 7);
    assert_eq!(store.next_ingest_seq("unknown").await.unwrap(), 0);
    assert!(store
        .fetch_turns("unknown", PageRequest::first(10))
        .await
        .unwrap()
        .is_empty());
}

async fn check_turn_upsert<S: TurnSource>(store: &S) {
    let original = turns("c1", 2);
    store.store_turns(&original).await.unwrap();

    let mut corrected = original[1].clone();
    corrected.text = "edited".to_string();
    corrected.reply_to_turn = None;
    store.store_turns(&[corrected.clone()]).await.unwrap();

    let all = fetch_all_turns(store, "c1", 10).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1], corrected);
}

async fn check_annotation_log<S: AnnotationStore>(store: &S) {
    let imported = store
        .append_imported("c1", &[seeded("t0", "A"), seeded("t1", "A")])
        .await
        .unwrap();
    assert!(imported[0].created_at > 0);
    assert!(imported[1].created_at > imported[0].created_at);

    let manual = store
        .write_annotation(
            "c1",
            AnnotationWrite::new("t1", "B", "alice")
                .with_confidence(0.6)
                .with_notes("moved"),
        )
        .await
        .unwrap();
    assert_eq!(manual.source, AnnotationSource::Manual);
    assert!(manual.created_at > imported[1].created_at);

    // Full history, not only the latest per turn
    let history = store
        .fetch_annotations("c1", &["t1".to_string()])
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.contains(&imported[1]));
    assert!(history.contains(&manual));

    assert!(store
        .fetch_annotations("c2", &["t1".to_string()])
        .await
        .unwrap()
        .is_empty());
    assert!(store.fetch_annotations("c1", &[]).await.unwrap().is_empty());
}

async fn check_invalid_write_rejected<S: AnnotationStore>(store: &S) {
    let result = store
        .write_annotation("c1", AnnotationWrite::new("t1", "B", "alice").with_confidence(2.0))
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(store
        .fetch_annotations("c1", &["t1".to_string()])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_memory_turn_paging() {
    check_turn_paging(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_turn_upsert() {
    check_turn_upsert(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_annotation_log() {
    check_annotation_log(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_invalid_write_rejected() {
    check_invalid_write_rejected(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_turn_paging() {
    check_turn_paging(&SqliteStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn test_sqlite_turn_upsert() {
    check_turn_upsert(&SqliteStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn test_sqlite_annotation_log() {
    check_annotation_log(&SqliteStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn test_sqlite_invalid_write_rejected() {
    check_invalid_write_rejected(&SqliteStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn test_sqlite_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("threadlab.db");

    {
        let store = SqliteStore::open(&db_path).await.unwrap();
        store.store_turns(&turns("c1", 3)).await.unwrap();
        store
            .write_annotation("c1", AnnotationWrite::new("t0", "A", "alice"))
            .await
            .unwrap();
        store.pool().close().await;
    }

    let reopened = SqliteStore::open(&db_path).await.unwrap();
    assert_eq!(fetch_all_turns(&reopened, "c1", 2).await.unwrap().len(), 3);
    let annotations = reopened
        .fetch_annotations("c1", &["t0".to_string()])
        .await
        .unwrap();
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].thread_id, "A");
}
