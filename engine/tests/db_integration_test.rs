/// Integration tests for the context store
///
/// Tests the SQLite backend end to end:
/// - Database creation, WAL mode and migrations
/// - Backend selection from connection strings
/// - Record ordering, deletes and task persistence across reopen
use chrono::{Duration as ChronoDuration, SubsecRound, Utc};
use tempfile::TempDir;

use arbiter_engine::db::{open_store, ConversationRecord, Database};

fn record(id: &str, session: &str, seq: u64, age_secs: i64) -> ConversationRecord {
    ConversationRecord {
        id: id.to_string(),
        session_id: session.to_string(),
        source: "judge-plan".to_string(),
        input: "{}".to_string(),
        output: "{}".to_string(),
        tokens: 1,
        context_ids: Vec::new(),
        timestamp: (Utc::now() - ChronoDuration::seconds(age_secs)).trunc_subsecs(6),
        seq,
    }
}

#[tokio::test]
async fn test_database_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("arbiter.db");

    let db = Database::new(&db_path).await.unwrap();
    assert!(db_path.exists());

    // WAL file exists once WAL mode is enabled
    assert!(temp_dir.path().join("arbiter.db-wal").exists());

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert!(tables.contains(&"conversation_history".to_string()));
    assert!(tables.contains(&"tasks".to_string()));

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_open_store_selects_backend() {
    let temp_dir = TempDir::new().unwrap();

    let memory = open_store("").await.unwrap();
    assert_eq!(memory.name(), "memory");
    let memory = open_store("memory://").await.unwrap();
    assert_eq!(memory.name(), "memory");

    let path = temp_dir.path().join("nested").join("store.db");
    let sqlite = open_store(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    assert_eq!(sqlite.name(), "sqlite");
    assert!(path.exists());

    let bare = temp_dir.path().join("bare.db");
    let sqlite = open_store(bare.to_str().unwrap()).await.unwrap();
    assert_eq!(sqlite.name(), "sqlite");

    assert!(open_store("postgres://localhost/db").await.is_err());
}

#[tokio::test]
async fn test_records_survive_reopen_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("arbiter.db").display());

    {
        let store = open_store(&url).await.unwrap();
        store.insert_record(&record("old", "s", 0, 30)).await.unwrap();
        store.insert_record(&record("mid", "s", 1, 20)).await.unwrap();
        store.insert_record(&record("new", "s", 2, 10)).await.unwrap();
        store.insert_record(&record("other", "t", 3, 5)).await.unwrap();
    }

    let store = open_store(&url).await.unwrap();
    let records = store.session_records("s", None).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);

    let limited = store.session_records("s", Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, "new");

    let mut sessions = store.session_ids().await.unwrap();
    sessions.sort();
    assert_eq!(sessions, vec!["s", "t"]);

    let cutoff = Utc::now() - ChronoDuration::seconds(15);
    assert_eq!(store.delete_session_records_before("s", cutoff).await.unwrap(), 2);
    assert_eq!(store.count_session_records("s").await.unwrap(), 1);
    assert_eq!(store.count_session_records("t").await.unwrap(), 1);

    assert_eq!(store.delete_records_before(Utc::now()).await.unwrap(), 2);
    assert!(store.session_ids().await.unwrap().is_empty());
}
