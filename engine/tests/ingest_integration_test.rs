//! Integration tests for directory ingestion

use chrono::NaiveDate;
use ecu_engine::config::IngestionConfig;
use ecu_engine::db::{Database, ScanFilter};
use ecu_engine::embedding::HashingEmbedder;
use ecu_engine::ingest::{IngestReport, Ingestor, ADJACENT_CHUNKS};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> IngestionConfig {
    IngestionConfig {
        chunk_size: 10,
        chunk_overlap: 2,
        min_observation_length: 1,
        max_observation_length: 1000,
        flush_threshold: 500,
        file_batch_size: 100,
    }
}

fn numbered_words(count: usize) -> String {
    (0..count)
        .map(|i| format!("word{:02}", i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// a.txt (30 words), b.txt (dated), empty.txt, notes.md and sub/c.txt
fn corpus() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), numbered_words(30)).unwrap();
    fs::write(dir.path().join("b.txt"), "Filed March 15, 2021 downtown").unwrap();
    fs::write(dir.path().join("empty.txt"), "").unwrap();
    fs::write(dir.path().join("notes.md"), numbered_words(30)).unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(
        dir.path().join("sub").join("c.txt"),
        "another short document lives here",
    )
    .unwrap();
    dir
}

async fn database() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("ecu.db")).await.unwrap();
    (dir, db)
}

#[tokio::test]
async fn test_ingest_directory() {
    let docs = corpus();
    let (_db_dir, db) = database().await;
    let store = db.observations(16, 1);

    let ingestor =
        Ingestor::new(store.clone(), Arc::new(HashingEmbedder::new(16)), config()).unwrap();
    let report = ingestor.ingest_directory(docs.path(), None).await.unwrap();

    assert_eq!(
        report,
        IngestReport {
            files_seen: 4,
            files_failed: 0,
            observations_stored: 6,
            edges_stored: 3,
            batches_rolled_back: 0,
        }
    );
    assert_eq!(store.count().await.unwrap(), 6);
    assert_eq!(store.document_count().await.unwrap(), 3);
    assert_eq!(store.stored_dimension().await.unwrap(), Some(16));

    let chunks = store
        .scan(&ScanFilter {
            doc_id: Some("a".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(chunks.len(), 4);
    assert!(chunks[0].context.starts_with("word00"));
    assert!(chunks[3].context.ends_with("word29"));
    assert_eq!(chunks[2].metadata["chunk_index"], 2);
    assert_eq!(chunks[2].metadata["total_chunks"], 4);
    assert!(chunks.iter().all(|c| c.surface_form.is_none()));

    // Overlapping windows: word08 starts at 56, the first chunk ends at 69
    let edges = store.neighbors(chunks[0].id, 0.0).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].other(chunks[0].id), Some(chunks[1].id));
    assert_eq!(edges[0].kind, ADJACENT_CHUNKS);
    assert_eq!(edges[0].distance, Some(13));
    assert_eq!(edges[0].strength, 1.0);

    let dated = store
        .scan(&ScanFilter {
            doc_id: Some("b".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(dated.len(), 1);
    assert_eq!(dated[0].surface_form.as_deref(), Some("Filed, March"));
    assert_eq!(
        dated[0].doc_timestamp.map(|t| t.date_naive()),
        NaiveDate::from_ymd_opt(2021, 3, 15)
    );

    // Undated files fall back to their modification time
    let nested = store
        .scan(&ScanFilter {
            doc_id: Some("c".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(nested[0].doc_timestamp.is_some());
}

#[tokio::test]
async fn test_ingest_limit() {
    let docs = corpus();
    let (_db_dir, db) = database().await;
    let store = db.observations(16, 1);

    let ingestor =
        Ingestor::new(store.clone(), Arc::new(HashingEmbedder::new(16)), config()).unwrap();
    let report = ingestor.ingest_directory(docs.path(), Some(1)).await.unwrap();

    assert_eq!(report.files_seen, 1);
    assert_eq!(report.observations_stored, 4);
    assert_eq!(store.document_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_dimension_mismatch_rolls_back_flush() {
    let docs = corpus();
    let (_db_dir, db) = database().await;
    let store = db.observations(16, 1);

    let ingestor =
        Ingestor::new(store.clone(), Arc::new(HashingEmbedder::new(8)), config()).unwrap();
    let report = ingestor.ingest_directory(docs.path(), None).await.unwrap();

    assert_eq!(report.batches_rolled_back, 1);
    assert_eq!(report.observations_stored, 0);
    assert_eq!(report.edges_stored, 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_small_flush_threshold_splits_batches() {
    let docs = corpus();
    let (_db_dir, db) = database().await;
    let store = db.observations(16, 1);

    let config = IngestionConfig {
        flush_threshold: 1,
        ..config()
    };
    let ingestor = Ingestor::new(store.clone(), Arc::new(HashingEmbedder::new(16)), config).unwrap();
    let report = ingestor.ingest_directory(docs.path(), None).await.unwrap();

    assert_eq!(report.observations_stored, 6);
    assert_eq!(report.edges_stored, 3);
}

#[tokio::test]
async fn test_missing_directory_fails() {
    let (db_dir, db) = database().await;
    let ingestor = Ingestor::new(
        db.observations(16, 1),
        Arc::new(HashingEmbedder::new(16)),
        config(),
    )
    .unwrap();

    let missing = db_dir.path().join("nowhere");
    assert!(ingestor.ingest_directory(&missing, None).await.is_err());
}
