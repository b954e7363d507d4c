//! Outcome recorder - one persisted record per judged attempt.
//!
//! Persistence is best-effort: store failures are logged and swallowed so a
//! broken learning store never changes the verification outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::types::{Judgment, VerificationRecord, VerificationTask, VerifyError};
use crate::util::content_hash;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS verification_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    turn INTEGER NOT NULL,
    task_hash TEXT NOT NULL,
    root_hash TEXT NOT NULL,
    task_text TEXT NOT NULL,
    shard_type TEXT NOT NULL,
    attempt_index INTEGER NOT NULL,
    success INTEGER NOT NULL,
    confidence REAL NOT NULL,
    reason TEXT NOT NULL,
    violations TEXT NOT NULL,
    corrective_action TEXT,
    evidence TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_session ON verification_records(session_id, turn);
CREATE INDEX IF NOT EXISTS idx_records_root ON verification_records(root_hash);
CREATE INDEX IF NOT EXISTS idx_records_shard ON verification_records(shard_type, success);
"#;

/// Session identifier and turn counter that key every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTurn {
    pub session_id: String,
    pub turn: u64,
}

impl SessionTurn {
    pub fn new(session_id: impl Into<String>, turn: u64) -> Self {
        Self {
            session_id: session_id.into(),
            turn,
        }
    }
}

/// Learning store for verification outcomes.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn store_verification(&self, record: &VerificationRecord) -> anyhow::Result<()>;
}

/// SQLite-backed store.
pub struct SqliteVerificationStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteVerificationStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create store dir {}", parent.display()))?;
        }

        let db_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .with_context(|| format!("Failed to open SQLite database {}", db_path.display()))?;
            conn.execute_batch(SCHEMA)
                .context("Failed to run verification schema")?;
            Ok::<_, anyhow::Error>(conn)
        })
        .await
        .context("Task join error")??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records for one session, oldest first.
    pub async fn records_for_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Vec<VerificationRecord>> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT session_id, turn, task_hash, root_hash, task_text, shard_type,
                        attempt_index, success, confidence, reason, violations,
                        corrective_action, evidence, created_at
                 FROM verification_records WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok(RecordRow {
                    session_id: row.get(0)?,
                    turn: row.get(1)?,
                    task_hash: row.get(2)?,
                    root_hash: row.get(3)?,
                    task_text: row.get(4)?,
                    shard_type: row.get(5)?,
                    attempt_index: row.get(6)?,
                    success: row.get(7)?,
                    confidence: row.get(8)?,
                    reason: row.get(9)?,
                    violations: row.get(10)?,
                    corrective_action: row.get(11)?,
                    evidence: row.get(12)?,
                    created_at: row.get(13)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?.into_record()?);
            }
            Ok::<_, anyhow::Error>(records)
        })
        .await
        .context("Task join error")?
    }
}

/// Raw row; JSON columns are decoded afterwards.
struct RecordRow {
    session_id: String,
    turn: i64,
    task_hash: String,
    root_hash: String,
    task_text: String,
    shard_type: String,
    attempt_index: i64,
    success: bool,
    confidence: f64,
    reason: String,
    violations: String,
    corrective_action: Option<String>,
    evidence: String,
    created_at: String,
}

impl RecordRow {
    fn into_record(self) -> anyhow::Result<VerificationRecord> {
        Ok(VerificationRecord {
            session_id: self.session_id,
            turn: self.turn as u64,
            task_hash: self.task_hash,
            root_hash: self.root_hash,
            task_text: self.task_text,
            shard_type: self.shard_type,
            attempt_index: self.attempt_index as usize,
            success: self.success,
            confidence: self.confidence,
            reason: self.reason,
            violations: serde_json::from_str(&self.violations)?,
            corrective_action: self
                .corrective_action
                .as_deref()
                .map(|json| serde_json::from_str(json))
                .transpose()?,
            evidence: serde_json::from_str(&self.evidence)?,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl VerificationStore for SqliteVerificationStore {
    async fn store_verification(&self, record: &VerificationRecord) -> anyhow::Result<()> {
        let conn = self.conn.clone();
        let r = record.clone();
        let violations = serde_json::to_string(&r.violations)?;
        let corrective = r
            .corrective_action
            .as_ref()
            .map(|action| serde_json::to_string(action))
            .transpose()?;
        let evidence = serde_json::to_string(&r.evidence)?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO verification_records (session_id, turn, task_hash, root_hash, task_text,
                    shard_type, attempt_index, success, confidence, reason, violations,
                    corrective_action, evidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    r.session_id,
                    r.turn as i64,
                    r.task_hash,
                    r.root_hash,
                    r.task_text,
                    r.shard_type,
                    r.attempt_index as i64,
                    r.success,
                    r.confidence,
                    r.reason,
                    violations,
                    corrective,
                    evidence,
                    r.created_at,
                ],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("Task join error")?
    }
}

/// Non-persistent store, mainly for tests and dry runs.
#[derive(Clone, Default)]
pub struct InMemoryVerificationStore {
    records: Arc<RwLock<Vec<VerificationRecord>>>,
}

impl InMemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<VerificationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn store_verification(&self, record: &VerificationRecord) -> anyhow::Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

/// Builds and persists records; never fails the caller.
#[derive(Clone, Default)]
pub struct OutcomeRecorder {
    store: Option<Arc<dyn VerificationStore>>,
}

impl OutcomeRecorder {
    pub fn new(store: Option<Arc<dyn VerificationStore>>) -> Self {
        Self { store }
    }

    /// Record of one judged attempt.
    pub fn build_record(
        scope: &SessionTurn,
        task: &VerificationTask,
        judgment: &Judgment,
    ) -> VerificationRecord {
        VerificationRecord {
            session_id: scope.session_id.clone(),
            turn: scope.turn,
            task_hash: content_hash(task.text()),
            root_hash: content_hash(task.original()),
            task_text: task.text().to_string(),
            shard_type: task.shard_type.clone(),
            attempt_index: task.attempt,
            success: judgment.success,
            confidence: judgment.confidence,
            reason: judgment.reason.clone(),
            violations: judgment.violations.clone(),
            corrective_action: judgment.corrective_action.clone(),
            evidence: judgment.evidence.clone(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Persist the attempt. Store errors are logged and swallowed.
    ///
    /// # Errors
    /// [`VerifyError::Cancelled`] when `cancel` fires before or during the
    /// store call.
    pub async fn record(
        &self,
        cancel: &CancellationToken,
        scope: &SessionTurn,
        task: &VerificationTask,
        judgment: &Judgment,
    ) -> Result<(), VerifyError> {
        let Some(store) = &self.store else {
            return if cancel.is_cancelled() {
                Err(VerifyError::Cancelled)
            } else {
                Ok(())
            };
        };
        let record = Self::build_record(scope, task, judgment);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(attempt = task.attempt, "Verification record skipped: cancelled");
                return Err(VerifyError::Cancelled);
            }
            result = store.store_verification(&record) => {
                if let Err(e) = result {
                    tracing::warn!(
                        attempt = task.attempt,
                        shard = %task.shard_type,
                        "Failed to store verification record: {:#}",
                        e
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::types::{ActionKind, CorrectiveAction, QualityViolation};

    struct Broken;

    #[async_trait]
    impl VerificationStore for Broken {
        async fn store_verification(&self, _record: &VerificationRecord) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn failed_judgment() -> Judgment {
        let mut judgment =
            Judgment::from_violations(vec![QualityViolation::HallucinatedApi], 0.9, "made up")
                .with_evidence(vec!["calls fs::read_magic".to_string()]);
        judgment.corrective_action = Some(CorrectiveAction::new(
            ActionKind::Docs,
            "std::fs API",
            "hallucinated",
        ));
        judgment
    }

    #[test]
    fn record_hashes_current_and_original_text() {
        let mut task = VerificationTask::new("write a parser", "coder", 3);
        task.append("\n\nfix it");
        task.attempt = 1;

        let record =
            OutcomeRecorder::build_record(&SessionTurn::new("s1", 4), &task, &failed_judgment());

        assert_eq!(record.task_hash, content_hash("write a parser\n\nfix it"));
        assert_eq!(record.root_hash, content_hash("write a parser"));
        assert_eq!(record.attempt_index, 1);
        assert_eq!(record.turn, 4);
        assert!(!record.success);
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVerificationStore::new(dir.path().join("nested").join("verify.db"))
            .await
            .unwrap();

        let task = VerificationTask::new("write a parser", "coder", 3);
        let record =
            OutcomeRecorder::build_record(&SessionTurn::new("s1", 0), &task, &failed_judgment());
        store.store_verification(&record).await.unwrap();

        let other =
            OutcomeRecorder::build_record(&SessionTurn::new("s2", 0), &task, &Judgment::pass(0.9, "ok"));
        store.store_verification(&other).await.unwrap();

        let loaded = store.records_for_session("s1").await.unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let recorder = OutcomeRecorder::new(Some(Arc::new(Broken)));
        let task = VerificationTask::new("t", "coder", 1);
        recorder
            .record(
                &CancellationToken::new(),
                &SessionTurn::new("s", 0),
                &task,
                &Judgment::pass(0.9, "ok"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_scope_skips_store() {
        let store = InMemoryVerificationStore::new();
        let recorder = OutcomeRecorder::new(Some(Arc::new(store.clone())));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = VerificationTask::new("t", "coder", 1);
        let outcome = recorder
            .record(&cancel, &SessionTurn::new("s", 0), &task, &Judgment::pass(0.9, "ok"))
            .await;

        assert!(matches!(outcome, Err(VerifyError::Cancelled)));
        assert!(store.records().await.is_empty());
    }
}
