/// Observation store persistence
///
/// Append-only storage for observations and the co-occurrence graph. The
/// only write path is `put`, which validates and commits a whole batch in a
/// single transaction: either every observation and edge of the batch lands,
/// or none does.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ecu_sdk::errors::EngineError;
use ecu_sdk::types::{CooccurrenceEdge, Metadata, Observation, ObservationId};
use ecu_sdk::vector::{decode_embedding, encode_embedding};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

const OBSERVATION_COLUMNS: &str = "id, doc_id, span_start, span_end, surface_form, context, \
     embedding, doc_timestamp, source_reliability, metadata";

const EDGE_COLUMNS: &str = "id, obs_a_id, obs_b_id, doc_id, distance, edge_type, strength, metadata";

/// SQLite caps bound parameters per statement; id lists are chunked below it.
const ID_CHUNK: usize = 500;

/// An observation waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub doc_id: String,
    pub span_start: Option<i64>,
    pub span_end: Option<i64>,
    pub surface_form: Option<String>,
    pub context: String,
    pub embedding: Vec<f32>,
    pub doc_timestamp: Option<DateTime<Utc>>,
    pub source_reliability: f64,
    pub metadata: Metadata,
}

/// Where an edge endpoint lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEndpoint {
    /// Index into the observations of the same `put` call
    Batch(usize),
    /// An observation committed by an earlier `put`
    Stored(ObservationId),
}

/// A co-occurrence edge waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewEdge {
    pub a: EdgeEndpoint,
    pub b: EdgeEndpoint,
    pub doc_id: String,
    pub distance: Option<i64>,
    pub kind: String,
    pub strength: f64,
    pub metadata: Metadata,
}

/// Optional equality and time-range filters for a full scan
///
/// `start` and `end` are inclusive and apply independently. Observations
/// without a timestamp never match a time bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFilter {
    pub doc_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Filters for a time-ordered query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalFilter {
    /// Substring that must appear in the surface form
    pub surface_form: Option<String>,
    /// Substring that must appear in the context
    pub keyword: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Span bounds of a resolved edge endpoint
#[derive(Debug, Clone, Copy)]
struct ResolvedEndpoint {
    id: ObservationId,
    span_start: Option<i64>,
    span_end: Option<i64>,
}

/// Observation store for database operations
#[derive(Clone)]
pub struct ObservationStore {
    pool: SqlitePool,
    dimension: usize,
    min_context_length: usize,
}

impl ObservationStore {
    /// Create a new observation store
    pub fn new(pool: SqlitePool, dimension: usize, min_context_length: usize) -> Self {
        Self {
            pool,
            dimension,
            min_context_length,
        }
    }

    /// Embedding dimension every stored vector must have
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append a batch of observations and edges atomically
    ///
    /// Returns the assigned ids in input order. Any constraint violation
    /// rolls back the whole batch and surfaces as `EngineError::InvalidBatch`.
    pub async fn put(
        &self,
        observations: &[NewObservation],
        edges: &[NewEdge],
    ) -> Result<Vec<ObservationId>> {
        if observations.is_empty() && edges.is_empty() {
            return Ok(Vec::new());
        }

        for (index, observation) in observations.iter().enumerate() {
            self.validate_observation(index, observation)?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin observation batch")?;

        match Self::write_batch(&mut tx, observations, edges).await {
            Ok(ids) => {
                tx.commit()
                    .await
                    .context("Failed to commit observation batch")?;
                debug!(
                    observations = ids.len(),
                    edges = edges.len(),
                    "Committed observation batch"
                );
                Ok(ids)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of observation batch failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn validate_observation(&self, index: usize, observation: &NewObservation) -> Result<()> {
        let invalid = |reason: String| -> anyhow::Error {
            EngineError::InvalidBatch(format!("observation {}: {}", index, reason)).into()
        };

        if observation.context.trim().is_empty() {
            return Err(invalid("context is empty".to_string()));
        }
        let length = observation.context.chars().count();
        if length < self.min_context_length {
            return Err(invalid(format!(
                "context has {} characters, minimum is {}",
                length, self.min_context_length
            )));
        }
        if observation.embedding.len() != self.dimension {
            return Err(invalid(format!(
                "embedding has dimension {}, store expects {}",
                observation.embedding.len(),
                self.dimension
            )));
        }
        if let Some(position) = observation.embedding.iter().position(|v| !v.is_finite()) {
            return Err(invalid(format!(
                "embedding value {} at position {} is not finite",
                observation.embedding[position], position
            )));
        }
        if !(0.0..=1.0).contains(&observation.source_reliability) {
            return Err(invalid(format!(
                "source reliability {} outside [0, 1]",
                observation.source_reliability
            )));
        }
        if let (Some(start), Some(end)) = (observation.span_start, observation.span_end) {
            if start > end {
                return Err(invalid(format!("span start {} after end {}", start, end)));
            }
        }
        Ok(())
    }

    async fn write_batch(
        tx: &mut Transaction<'_, Sqlite>,
        observations: &[NewObservation],
        edges: &[NewEdge],
    ) -> Result<Vec<ObservationId>> {
        let now = Utc::now().timestamp();
        let mut ids = Vec::with_capacity(observations.len());

        for observation in observations {
            let metadata = serde_json::to_string(&observation.metadata)
                .context("Failed to serialize observation metadata")?;

            let result = sqlx::query(
                "INSERT INTO observations (doc_id, span_start, span_end, surface_form, context, \
                 embedding, doc_timestamp, source_reliability, metadata, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&observation.doc_id)
            .bind(observation.span_start)
            .bind(observation.span_end)
            .bind(&observation.surface_form)
            .bind(&observation.context)
            .bind(encode_embedding(&observation.embedding))
            .bind(observation.doc_timestamp.map(|t| t.timestamp()))
            .bind(observation.source_reliability)
            .bind(metadata)
            .bind(now)
            .execute(&mut **tx)
            .await
            .context("Failed to insert observation")?;

            ids.push(result.last_insert_rowid());
        }

        for (index, edge) in edges.iter().enumerate() {
            let a = Self::resolve_endpoint(tx, edge.a, &ids, observations).await?;
            let b = Self::resolve_endpoint(tx, edge.b, &ids, observations).await?;
            validate_edge(index, edge, &a, &b)?;

            let metadata = serde_json::to_string(&edge.metadata)
                .context("Failed to serialize edge metadata")?;

            sqlx::query(
                "INSERT INTO cooccurrence_edges (obs_a_id, obs_b_id, doc_id, distance, edge_type, \
                 strength, metadata) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(a.id)
            .bind(b.id)
            .bind(&edge.doc_id)
            .bind(edge.distance)
            .bind(&edge.kind)
            .bind(edge.strength)
            .bind(metadata)
            .execute(&mut **tx)
            .await
            .context("Failed to insert co-occurrence edge")?;
        }

        Ok(ids)
    }

    async fn resolve_endpoint(
        tx: &mut Transaction<'_, Sqlite>,
        endpoint: EdgeEndpoint,
        batch_ids: &[ObservationId],
        observations: &[NewObservation],
    ) -> Result<ResolvedEndpoint> {
        match endpoint {
            EdgeEndpoint::Batch(index) => {
                let (Some(id), Some(observation)) = (batch_ids.get(index), observations.get(index))
                else {
                    return Err(EngineError::InvalidBatch(format!(
                        "edge endpoint references batch index {} of {}",
                        index,
                        observations.len()
                    ))
                    .into());
                };
                Ok(ResolvedEndpoint {
                    id: *id,
                    span_start: observation.span_start,
                    span_end: observation.span_end,
                })
            }
            EdgeEndpoint::Stored(id) => {
                let row = sqlx::query("SELECT span_start, span_end FROM observations WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut **tx)
                    .await
                    .context("Failed to look up edge endpoint")?;

                let Some(row) = row else {
                    return Err(EngineError::InvalidBatch(format!(
                        "edge endpoint references missing observation {}",
                        id
                    ))
                    .into());
                };
                Ok(ResolvedEndpoint {
                    id,
                    span_start: row.try_get("span_start")?,
                    span_end: row.try_get("span_end")?,
                })
            }
        }
    }

    /// Get an observation by id
    pub async fn get(&self, id: ObservationId) -> Result<Option<Observation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM observations WHERE id = ?",
            OBSERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch observation")?;

        row.as_ref().map(row_to_observation).transpose()
    }

    /// Get observations by id, in input order
    ///
    /// Missing ids are omitted rather than reported.
    pub async fn get_many(&self, ids: &[ObservationId]) -> Result<Vec<Observation>> {
        let mut found = std::collections::HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(ID_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {} FROM observations WHERE id IN (",
                OBSERVATION_COLUMNS
            ));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch observations")?;

            for row in &rows {
                let observation = row_to_observation(row)?;
                found.insert(observation.id, observation);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    /// Edges touching `id` on either side with strength at least `min_strength`
    pub async fn neighbors(
        &self,
        id: ObservationId,
        min_strength: f64,
    ) -> Result<Vec<CooccurrenceEdge>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cooccurrence_edges \
             WHERE (obs_a_id = ? OR obs_b_id = ?) AND strength >= ? ORDER BY id ASC",
            EDGE_COLUMNS
        ))
        .bind(id)
        .bind(id)
        .bind(min_strength)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch co-occurrence edges")?;

        rows.iter().map(row_to_edge).collect()
    }

    /// Every observation matching the filter, embeddings included, by id
    pub async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Observation>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM observations WHERE 1 = 1",
            OBSERVATION_COLUMNS
        ));
        if let Some(doc_id) = &filter.doc_id {
            builder.push(" AND doc_id = ").push_bind(doc_id.clone());
        }
        if let Some(start) = filter.start {
            builder
                .push(" AND doc_timestamp >= ")
                .push_bind(start.timestamp());
        }
        if let Some(end) = filter.end {
            builder.push(" AND doc_timestamp <= ").push_bind(end.timestamp());
        }
        builder.push(" ORDER BY id ASC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to scan observations")?;

        rows.iter().map(row_to_observation).collect()
    }

    /// Observations whose surface form contains `pattern`, lowest ids first
    pub async fn find_by_surface_form(
        &self,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM observations \
             WHERE surface_form IS NOT NULL AND instr(surface_form, ?) > 0 \
             ORDER BY id ASC LIMIT ?",
            OBSERVATION_COLUMNS
        ))
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to search surface forms")?;

        rows.iter().map(row_to_observation).collect()
    }

    /// Observations matching the filter, ascending by timestamp
    ///
    /// Observations without a timestamp sort after every dated one.
    pub async fn temporal(&self, filter: &TemporalFilter) -> Result<Vec<Observation>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM observations WHERE 1 = 1",
            OBSERVATION_COLUMNS
        ));
        if let Some(start) = filter.start {
            builder
                .push(" AND doc_timestamp >= ")
                .push_bind(start.timestamp());
        }
        if let Some(end) = filter.end {
            builder.push(" AND doc_timestamp <= ").push_bind(end.timestamp());
        }
        if let Some(surface_form) = &filter.surface_form {
            builder
                .push(" AND surface_form IS NOT NULL AND instr(surface_form, ")
                .push_bind(surface_form.clone())
                .push(") > 0");
        }
        if let Some(keyword) = &filter.keyword {
            builder
                .push(" AND instr(context, ")
                .push_bind(keyword.clone())
                .push(") > 0");
        }
        builder
            .push(" ORDER BY doc_timestamp IS NULL, doc_timestamp ASC, id ASC LIMIT ")
            .push_bind(filter.limit as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to run temporal query")?;

        rows.iter().map(row_to_observation).collect()
    }

    /// Total number of stored observations
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM observations")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count observations")
    }

    /// Number of distinct source documents
    pub async fn document_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(DISTINCT doc_id) FROM observations")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count documents")
    }

    /// Dimension of the vectors already in the store, if any
    pub async fn stored_dimension(&self) -> Result<Option<usize>> {
        let bytes: Option<i64> =
            sqlx::query_scalar("SELECT length(embedding) FROM observations ORDER BY id LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to inspect stored embeddings")?;

        Ok(bytes.map(|b| (b / 4) as usize))
    }
}

fn validate_edge(
    index: usize,
    edge: &NewEdge,
    a: &ResolvedEndpoint,
    b: &ResolvedEndpoint,
) -> Result<()> {
    let invalid = |reason: String| -> anyhow::Error {
        EngineError::InvalidBatch(format!("edge {}: {}", index, reason)).into()
    };

    if a.id == b.id {
        return Err(invalid(format!("endpoints are both observation {}", a.id)));
    }
    if !(0.0..=1.0).contains(&edge.strength) {
        return Err(invalid(format!("strength {} outside [0, 1]", edge.strength)));
    }
    if let Some(distance) = edge.distance {
        if distance < 0 {
            return Err(invalid(format!("negative distance {}", distance)));
        }
        if let (Some(a_end), Some(b_start)) = (a.span_end, b.span_start) {
            let expected = (b_start - a_end).abs();
            if distance != expected {
                return Err(invalid(format!(
                    "distance {} does not match span gap {}",
                    distance, expected
                )));
            }
        }
    }
    Ok(())
}

fn parse_metadata(raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_observation(row: &SqliteRow) -> Result<Observation> {
    let embedding: Vec<u8> = row.try_get("embedding")?;
    let doc_timestamp: Option<i64> = row.try_get("doc_timestamp")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(Observation {
        id: row.try_get("id")?,
        doc_id: row.try_get("doc_id")?,
        span_start: row.try_get("span_start")?,
        span_end: row.try_get("span_end")?,
        surface_form: row.try_get("surface_form")?,
        context: row.try_get("context")?,
        embedding: decode_embedding(&embedding),
        doc_timestamp: doc_timestamp.and_then(|secs| DateTime::from_timestamp(secs, 0)),
        source_reliability: row.try_get("source_reliability")?,
        metadata: parse_metadata(&metadata),
    })
}

fn row_to_edge(row: &SqliteRow) -> Result<CooccurrenceEdge> {
    let metadata: String = row.try_get("metadata")?;

    Ok(CooccurrenceEdge {
        id: row.try_get("id")?,
        obs_a_id: row.try_get("obs_a_id")?,
        obs_b_id: row.try_get("obs_b_id")?,
        doc_id: row.try_get("doc_id")?,
        distance: row.try_get("distance")?,
        kind: row.try_get("edge_type")?,
        strength: row.try_get("strength")?,
        metadata: parse_metadata(&metadata),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, ObservationStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let store = db.observations(3, 10);
        (temp_dir, store)
    }

    fn obs(doc: &str, context: &str, embedding: [f32; 3]) -> NewObservation {
        NewObservation {
            doc_id: doc.to_string(),
            span_start: None,
            span_end: None,
            surface_form: None,
            context: context.to_string(),
            embedding: embedding.to_vec(),
            doc_timestamp: None,
            source_reliability: 1.0,
            metadata: Metadata::new(),
        }
    }

    fn edge(a: EdgeEndpoint, b: EdgeEndpoint, strength: f64) -> NewEdge {
        NewEdge {
            a,
            b,
            doc_id: "doc".to_string(),
            distance: None,
            kind: "adjacent_chunks".to_string(),
            strength,
            metadata: Metadata::new(),
        }
    }

    fn is_invalid_batch(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidBatch(_))
        )
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_dir, store) = setup().await;

        let mut first = obs("doc", "Smith approved the permit", [1.0, 0.0, 0.5]);
        first.surface_form = Some("Smith".to_string());
        first.doc_timestamp = Some(Utc.with_ymd_and_hms(1962, 3, 4, 0, 0, 0).unwrap());
        first.metadata.insert("chunk_index".to_string(), 0.into());

        let ids = store.put(&[first.clone()], &[]).await.unwrap();
        assert_eq!(ids.len(), 1);

        let fetched = store.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(fetched.context, first.context);
        assert_eq!(fetched.embedding, first.embedding);
        assert_eq!(fetched.doc_timestamp, first.doc_timestamp);
        assert_eq!(fetched.metadata, first.metadata);

        assert!(store.get(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_many_omits_missing_and_keeps_order() {
        let (_dir, store) = setup().await;
        let ids = store
            .put(
                &[
                    obs("doc", "first observation text", [1.0, 0.0, 0.0]),
                    obs("doc", "second observation text", [0.0, 1.0, 0.0]),
                ],
                &[],
            )
            .await
            .unwrap();

        let fetched = store.get_many(&[ids[1], 4242, ids[0]]).await.unwrap();
        let fetched_ids: Vec<_> = fetched.iter().map(|o| o.id).collect();
        assert_eq!(fetched_ids, vec![ids[1], ids[0]]);
    }

    #[tokio::test]
    async fn test_neighbors_both_directions_and_strength() {
        let (_dir, store) = setup().await;
        let ids = store
            .put(
                &[
                    obs("doc", "observation number one", [1.0, 0.0, 0.0]),
                    obs("doc", "observation number two", [0.0, 1.0, 0.0]),
                    obs("doc", "observation number three", [0.0, 0.0, 1.0]),
                ],
                &[
                    edge(EdgeEndpoint::Batch(0), EdgeEndpoint::Batch(1), 0.9),
                    edge(EdgeEndpoint::Batch(2), EdgeEndpoint::Batch(1), 0.2),
                ],
            )
            .await
            .unwrap();

        let all = store.neighbors(ids[1], 0.0).await.unwrap();
        assert_eq!(all.len(), 2);

        let strong = store.neighbors(ids[1], 0.5).await.unwrap();
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].other(ids[1]), Some(ids[0]));
    }

    #[tokio::test]
    async fn test_dangling_edge_rolls_back_whole_batch() {
        let (_dir, store) = setup().await;

        let err = store
            .put(
                &[obs("doc", "an observation that must vanish", [1.0, 0.0, 0.0])],
                &[edge(EdgeEndpoint::Batch(0), EdgeEndpoint::Stored(777), 1.0)],
            )
            .await
            .unwrap_err();

        assert!(is_invalid_batch(&err));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_self_loop_rejected() {
        let (_dir, store) = setup().await;
        let err = store
            .put(
                &[obs("doc", "lonely observation text", [1.0, 0.0, 0.0])],
                &[edge(EdgeEndpoint::Batch(0), EdgeEndpoint::Batch(0), 1.0)],
            )
            .await
            .unwrap_err();
        assert!(is_invalid_batch(&err));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_distance_must_match_spans() {
        let (_dir, store) = setup().await;

        let mut a = obs("doc", "observation with span a", [1.0, 0.0, 0.0]);
        a.span_start = Some(0);
        a.span_end = Some(100);
        let mut b = obs("doc", "observation with span b", [0.0, 1.0, 0.0]);
        b.span_start = Some(90);
        b.span_end = Some(200);

        let mut wrong = edge(EdgeEndpoint::Batch(0), EdgeEndpoint::Batch(1), 1.0);
        wrong.distance = Some(5);
        let err = store
            .put(&[a.clone(), b.clone()], &[wrong])
            .await
            .unwrap_err();
        assert!(is_invalid_batch(&err));

        let mut right = edge(EdgeEndpoint::Batch(0), EdgeEndpoint::Batch(1), 1.0);
        right.distance = Some(10);
        store.put(&[a, b], &[right]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_observation_constraints() {
        let (_dir, store) = setup().await;

        let short = obs("doc", "tiny", [1.0, 0.0, 0.0]);
        assert!(is_invalid_batch(&store.put(&[short], &[]).await.unwrap_err()));

        let mut wrong_dim = obs("doc", "long enough context", [1.0, 0.0, 0.0]);
        wrong_dim.embedding.push(1.0);
        assert!(is_invalid_batch(
            &store.put(&[wrong_dim], &[]).await.unwrap_err()
        ));

        let mut unreliable = obs("doc", "long enough context", [1.0, 0.0, 0.0]);
        unreliable.source_reliability = 1.5;
        assert!(is_invalid_batch(
            &store.put(&[unreliable], &[]).await.unwrap_err()
        ));

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_embedding_rejects_batch() {
        let (_dir, store) = setup().await;

        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let good = obs("doc", "a perfectly fine observation", [1.0, 0.0, 0.0]);
            let corrupt = obs("doc", "an observation with a broken vector", [bad, 0.0, 0.0]);
            let err = store.put(&[good, corrupt], &[]).await.unwrap_err();
            assert!(is_invalid_batch(&err), "accepted embedding value {}", bad);
        }

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_edges_to_previously_stored_observations() {
        let (_dir, store) = setup().await;
        let first = store
            .put(&[obs("doc", "stored in batch one", [1.0, 0.0, 0.0])], &[])
            .await
            .unwrap();

        store
            .put(
                &[obs("doc", "stored in batch two", [0.0, 1.0, 0.0])],
                &[edge(EdgeEndpoint::Stored(first[0]), EdgeEndpoint::Batch(0), 1.0)],
            )
            .await
            .unwrap();

        assert_eq!(store.neighbors(first[0], 0.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_filters_apply_independently() {
        let (_dir, store) = setup().await;

        let mut early = obs("a", "early observation text", [1.0, 0.0, 0.0]);
        early.doc_timestamp = Some(Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap());
        let mut late = obs("b", "late observation text", [0.0, 1.0, 0.0]);
        late.doc_timestamp = Some(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        let undated = obs("a", "undated observation text", [0.0, 0.0, 1.0]);
        store.put(&[early, late, undated], &[]).await.unwrap();

        assert_eq!(store.scan(&ScanFilter::default()).await.unwrap().len(), 3);

        let by_doc = ScanFilter {
            doc_id: Some("a".to_string()),
            ..Default::default()
        };
        assert_eq!(store.scan(&by_doc).await.unwrap().len(), 2);

        let from_1965 = ScanFilter {
            start: Some(Utc.with_ymd_and_hms(1965, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let hits = store.scan(&from_1965).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "b");
    }

    #[tokio::test]
    async fn test_temporal_orders_undated_last() {
        let (_dir, store) = setup().await;

        let undated = obs("doc", "memo without any date", [1.0, 0.0, 0.0]);
        let mut late = obs("doc", "memo dated in 1970", [0.0, 1.0, 0.0]);
        late.doc_timestamp = Some(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        let mut early = obs("doc", "memo dated in 1960", [0.0, 0.0, 1.0]);
        early.doc_timestamp = Some(Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap());
        store.put(&[undated, late, early], &[]).await.unwrap();

        let results = store
            .temporal(&TemporalFilter {
                keyword: Some("memo".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let contexts: Vec<_> = results.iter().map(|o| o.context.as_str()).collect();
        assert_eq!(
            contexts,
            vec![
                "memo dated in 1960",
                "memo dated in 1970",
                "memo without any date"
            ]
        );
    }

    #[tokio::test]
    async fn test_find_by_surface_form_substring_and_limit() {
        let (_dir, store) = setup().await;

        let mut batch = Vec::new();
        for i in 0..4 {
            let mut o = obs("doc", &format!("observation number {}", i), [1.0, 0.0, 0.0]);
            o.surface_form = Some("John Smith, Dallas".to_string());
            batch.push(o);
        }
        store.put(&batch, &[]).await.unwrap();

        assert_eq!(store.find_by_surface_form("Smith", 3).await.unwrap().len(), 3);
        assert!(store
            .find_by_surface_form("Nobody", 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_counts_and_stored_dimension() {
        let (_dir, store) = setup().await;
        assert_eq!(store.stored_dimension().await.unwrap(), None);

        store
            .put(
                &[
                    obs("a", "observation in doc a", [1.0, 0.0, 0.0]),
                    obs("b", "observation in doc b", [0.0, 1.0, 0.0]),
                    obs("b", "another one in doc b", [0.0, 0.0, 1.0]),
                ],
                &[],
            )
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.document_count().await.unwrap(), 2);
        assert_eq!(store.stored_dimension().await.unwrap(), Some(3));
    }
}
