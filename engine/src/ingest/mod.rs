//! Document ingestion
//!
//! Populates the observation store from a directory of `.txt` files. Each
//! file is chunked into overlapping word windows; every chunk becomes one
//! observation, embedded with the injected embedder, and adjacent chunks of
//! a document are linked by an `adjacent_chunks` edge.
//!
//! Observations are written in flushes. A flush is one `put` call, so a
//! constraint violation rolls back that flush only; ingestion logs it and
//! carries on with the next one.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ecu_sdk::types::Metadata;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::IngestionConfig;
use crate::db::{EdgeEndpoint, NewEdge, NewObservation, ObservationStore};
use crate::embedding::Embedder;

pub mod chunker;

use chunker::{chunk_document, surface_forms, DateExtractor};

/// Edge type linking consecutive chunks of one document
pub const ADJACENT_CHUNKS: &str = "adjacent_chunks";

/// Totals for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_failed: usize,
    pub observations_stored: usize,
    pub edges_stored: usize,
    pub batches_rolled_back: usize,
}

/// Chunked and embedded observations of one file, not yet written
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub doc_id: String,
    pub observations: Vec<NewObservation>,
}

pub struct Ingestor {
    store: ObservationStore,
    embedder: Arc<dyn Embedder>,
    config: IngestionConfig,
    dates: DateExtractor,
}

impl Ingestor {
    pub fn new(
        store: ObservationStore,
        embedder: Arc<dyn Embedder>,
        config: IngestionConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            config,
            dates: DateExtractor::new().context("Failed to compile date patterns")?,
        })
    }

    /// Ingest every `.txt` file under `dir`, at most `limit` of them
    ///
    /// Files are visited in path order. Only a missing directory fails the
    /// run; unreadable files and rolled-back flushes are counted in the
    /// report.
    pub async fn ingest_directory(&self, dir: &Path, limit: Option<usize>) -> Result<IngestReport> {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }

        let files = discover_text_files(dir, limit);
        info!("Found {} text files to process", files.len());

        let mut report = IngestReport::default();
        let batch_size = self.config.file_batch_size.max(1);
        let batches = files.len().div_ceil(batch_size);

        for (number, batch) in files.chunks(batch_size).enumerate() {
            info!("Processing file batch {}/{}", number + 1, batches);
            self.ingest_batch(batch, &mut report).await;
        }

        info!(
            "Ingestion complete: {} files, {} observations, {} edges, {} rolled back batches",
            report.files_seen,
            report.observations_stored,
            report.edges_stored,
            report.batches_rolled_back
        );
        Ok(report)
    }

    async fn ingest_batch(&self, files: &[PathBuf], report: &mut IngestReport) {
        let mut pending: Vec<PreparedDocument> = Vec::new();
        let mut pending_observations = 0;

        for path in files {
            report.files_seen += 1;

            match self.prepare_file(path).await {
                Ok(document) if document.observations.is_empty() => {
                    debug!("No observations in {}", path.display());
                }
                Ok(document) => {
                    pending_observations += document.observations.len();
                    pending.push(document);

                    if pending_observations >= self.config.flush_threshold {
                        self.flush(&mut pending, report).await;
                        pending_observations = 0;
                    }
                }
                Err(e) => {
                    report.files_failed += 1;
                    error!("Error processing file {}: {:#}", path.display(), e);
                }
            }
        }

        self.flush(&mut pending, report).await;
    }

    /// Read, chunk and embed one file
    pub async fn prepare_file(&self, path: &Path) -> Result<PreparedDocument> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let content = String::from_utf8_lossy(&bytes);

        let doc_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let doc_timestamp = match self.dates.extract(&content) {
            Some(found) => Some(found),
            None => modified_time(path).await,
        };

        let chunks = chunk_document(
            &content,
            self.config.chunk_size,
            self.config.chunk_overlap,
            self.config.min_observation_length,
            self.config.max_observation_length,
        );
        if chunks.is_empty() {
            return Ok(PreparedDocument {
                doc_id,
                observations: Vec::new(),
            });
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .with_context(|| format!("Failed to embed chunks of {}", path.display()))?;

        let total_chunks = chunks.len();
        let observations = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut metadata = Metadata::new();
                metadata.insert("file_path".into(), path.display().to_string().into());
                metadata.insert("chunk_index".into(), chunk.index.into());
                metadata.insert("total_chunks".into(), total_chunks.into());

                NewObservation {
                    doc_id: doc_id.clone(),
                    span_start: Some(chunk.start),
                    span_end: Some(chunk.end),
                    surface_form: surface_forms(&chunk.text),
                    context: chunk.text,
                    embedding,
                    doc_timestamp,
                    source_reliability: 1.0,
                    metadata,
                }
            })
            .collect();

        Ok(PreparedDocument {
            doc_id,
            observations,
        })
    }

    async fn flush(&self, pending: &mut Vec<PreparedDocument>, report: &mut IngestReport) {
        if pending.is_empty() {
            return;
        }

        let (observations, edges) = assemble_batch(pending);
        pending.clear();

        match self.store.put(&observations, &edges).await {
            Ok(ids) => {
                report.observations_stored += ids.len();
                report.edges_stored += edges.len();
                debug!(
                    "Flushed {} observations (total: {})",
                    ids.len(),
                    report.observations_stored
                );
            }
            Err(e) => {
                report.batches_rolled_back += 1;
                error!(
                    "Rolled back batch of {} observations: {:#}",
                    observations.len(),
                    e
                );
            }
        }
    }
}

/// Flatten pending documents into one `put` batch with adjacency edges
pub fn assemble_batch(documents: &[PreparedDocument]) -> (Vec<NewObservation>, Vec<NewEdge>) {
    let mut observations = Vec::new();
    let mut edges = Vec::new();

    for document in documents {
        let offset = observations.len();
        for (i, pair) in document.observations.windows(2).enumerate() {
            let distance = match (pair[0].span_end, pair[1].span_start) {
                (Some(end), Some(start)) => Some((start - end).abs()),
                _ => None,
            };
            edges.push(NewEdge {
                a: EdgeEndpoint::Batch(offset + i),
                b: EdgeEndpoint::Batch(offset + i + 1),
                doc_id: document.doc_id.clone(),
                distance,
                kind: ADJACENT_CHUNKS.to_string(),
                strength: 1.0,
                metadata: Metadata::new(),
            });
        }
        observations.extend(document.observations.iter().cloned());
    }

    (observations, edges)
}

/// `.txt` files under `dir`, sorted by path
fn discover_text_files(dir: &Path, limit: Option<usize>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error walking directory: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .collect();

    if let Some(limit) = limit {
        files.truncate(limit);
    }
    files
}

async fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}
