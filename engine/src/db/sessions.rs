/// Query session persistence
///
/// One row per reasoning session in `query_sessions`. The row carries the
/// audit fields (status, iteration count, confidence, answer, evidence
/// trail) plus the serialized `WorkingMemory` snapshot used to resume an
/// interrupted session.
use anyhow::{Context, Result};
use chrono::Utc;
use ecu_sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::agent::WorkingMemory;

/// Number of recent completed sessions averaged by `stats`
const STATS_WINDOW: i64 = 10;

const SESSION_COLUMNS: &str = "id, query, status, iteration_count, confidence_score, \
     final_answer, stop_reason, evidence_trail, state_snapshot, tokens_used, created_at, \
     completed_at";

/// Session status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown session status '{}'", other)),
        }
    }
}

/// Session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub query: String,
    pub status: SessionStatus,
    pub iteration_count: i64,
    pub confidence_score: f64,
    pub final_answer: Option<String>,
    pub stop_reason: Option<String>,
    pub evidence_trail: Vec<String>,
    #[serde(skip_serializing)]
    pub state_snapshot: Option<String>,
    pub tokens_used: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Aggregate numbers for `ecu stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub completed_sessions: i64,
    /// Over the most recent completed sessions
    pub avg_confidence: f64,
    pub avg_iterations: f64,
}

/// Session repository for database operations
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an `in_progress` row for a new session
    pub async fn create(&self, id: &str, query: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_sessions (id, query, status, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(query)
        .bind(SessionStatus::InProgress.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;

        debug!(session_id = id, "Created session record");
        Ok(())
    }

    /// Persist the current state of a running session
    pub async fn save_snapshot(&self, memory: &WorkingMemory) -> Result<()> {
        self.write(memory, SessionStatus::InProgress, None).await
    }

    /// Mark a session completed and store its final state
    pub async fn complete(&self, memory: &WorkingMemory) -> Result<()> {
        self.write(
            memory,
            SessionStatus::Completed,
            Some(Utc::now().timestamp()),
        )
        .await
    }

    /// Mark a session failed and store whatever state it reached
    pub async fn fail(&self, memory: &WorkingMemory) -> Result<()> {
        self.write(memory, SessionStatus::Failed, Some(Utc::now().timestamp()))
            .await
    }

    async fn write(
        &self,
        memory: &WorkingMemory,
        status: SessionStatus,
        completed_at: Option<i64>,
    ) -> Result<()> {
        let trail = serde_json::to_string(&memory.evidence_trail)
            .context("Failed to serialize evidence trail")?;
        let snapshot =
            serde_json::to_string(memory).context("Failed to serialize session snapshot")?;

        let result = sqlx::query(
            "UPDATE query_sessions SET status = ?, iteration_count = ?, confidence_score = ?, \
             final_answer = ?, stop_reason = ?, evidence_trail = ?, state_snapshot = ?, \
             tokens_used = ?, completed_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(memory.iteration as i64)
        .bind(memory.confidence)
        .bind(&memory.answer)
        .bind(memory.stop_reason.map(|r| r.as_str().to_string()))
        .bind(trail)
        .bind(snapshot)
        .bind(memory.tokens_used as i64)
        .bind(completed_at)
        .bind(&memory.session_id)
        .execute(&self.pool)
        .await
        .context("Failed to update session")?;

        if result.rows_affected() == 0 {
            return Err(EngineError::SessionNotFound(memory.session_id.clone()).into());
        }

        debug!(
            session_id = %memory.session_id,
            status = status.as_str(),
            iteration = memory.iteration,
            "Saved session state"
        );
        Ok(())
    }

    /// Get a session by id
    pub async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM query_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch session")?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// Load the working memory snapshot of a session
    pub async fn load_memory(&self, id: &str) -> Result<WorkingMemory> {
        let snapshot: Option<Option<String>> =
            sqlx::query_scalar("SELECT state_snapshot FROM query_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch session snapshot")?;

        match snapshot {
            None => Err(EngineError::SessionNotFound(id.to_string()).into()),
            Some(None) => Err(anyhow::anyhow!(
                "Session {} has no saved state to resume from",
                id
            )),
            Some(Some(json)) => {
                serde_json::from_str(&json).context("Failed to parse session snapshot")
            }
        }
    }

    /// Most recent sessions first
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM query_sessions ORDER BY created_at DESC, rowid DESC LIMIT ?",
            SESSION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sessions")?;

        rows.iter().map(row_to_session).collect()
    }

    /// Session counts and recent averages
    pub async fn stats(&self) -> Result<SessionStats> {
        let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_sessions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count sessions")?;

        let completed_sessions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM query_sessions WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await
                .context("Failed to count completed sessions")?;

        let row = sqlx::query(
            "SELECT AVG(confidence_score) AS avg_confidence, AVG(iteration_count) AS avg_iterations \
             FROM (SELECT confidence_score, iteration_count FROM query_sessions \
             WHERE status = 'completed' ORDER BY created_at DESC, rowid DESC LIMIT ?)",
        )
        .bind(STATS_WINDOW)
        .fetch_one(&self.pool)
        .await
        .context("Failed to average recent sessions")?;

        Ok(SessionStats {
            total_sessions,
            completed_sessions,
            avg_confidence: row
                .try_get::<Option<f64>, _>("avg_confidence")?
                .unwrap_or(0.0),
            avg_iterations: row
                .try_get::<Option<f64>, _>("avg_iterations")?
                .unwrap_or(0.0),
        })
    }
}

fn row_to_session(row: &SqliteRow) -> Result<SessionRecord> {
    let status: String = row.try_get("status")?;
    let trail: String = row.try_get("evidence_trail")?;

    Ok(SessionRecord {
        id: row.try_get("id")?,
        query: row.try_get("query")?,
        status: SessionStatus::parse(&status)?,
        iteration_count: row.try_get("iteration_count")?,
        confidence_score: row.try_get("confidence_score")?,
        final_answer: row.try_get("final_answer")?,
        stop_reason: row.try_get("stop_reason")?,
        evidence_trail: serde_json::from_str(&trail).context("Failed to parse evidence trail")?,
        state_snapshot: row.try_get("state_snapshot")?,
        tokens_used: row.try_get("tokens_used")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
