//! SQLite history of finished Requests.
//!
//! Records every terminal Request with its ordered messages so a caller can
//! inspect a failure or resubmit the original input. Uses `rusqlite` in
//! synchronous mode; WAL is enabled so a reader can list history while a
//! submission is being recorded.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::errors::{CoordinationError, HistoryError};
use super::types::{AgentMessage, Request, RequestStatus};

// ─── Summary ────────────────────────────────────────────────────────────────

/// One row of `history` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSummary {
    pub id: String,
    pub input: String,
    pub status: RequestStatus,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub message_count: usize,
    /// Stage of origin for failed Requests.
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}

// ─── RequestHistory ─────────────────────────────────────────────────────────

pub struct RequestHistory {
    conn: Connection,
}

impl RequestHistory {
    /// Open (or create) the history database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, HistoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let history = Self { conn };
        history.create_tables()?;
        Ok(history)
    }

    fn create_tables(&self) -> Result<(), HistoryError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                input TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                finished_at TEXT,
                failed_stage TEXT,
                error TEXT
            );

            CREATE TABLE IF NOT EXISTS request_messages (
                request_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                source TEXT NOT NULL,
                intent TEXT NOT NULL,
                confidence REAL NOT NULL,
                message TEXT NOT NULL,
                PRIMARY KEY (request_id, seq),
                FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_requests_created
                ON requests(created_at);
            ",
        )?;
        Ok(())
    }

    /// Record a Request that completed.
    pub fn record(&self, request: &Request) -> Result<(), HistoryError> {
        self.insert(request, None, None)
    }

    /// Record the failed Request carried by a coordination error.
    pub fn record_failure(&self, err: &CoordinationError) -> Result<(), HistoryError> {
        self.insert(
            &err.request,
            Some(err.stage.as_str()),
            Some(err.cause.to_string()),
        )
    }

    fn insert(
        &self,
        request: &Request,
        failed_stage: Option<&str>,
        error: Option<String>,
    ) -> Result<(), HistoryError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO requests
             (id, input, status, created_at, finished_at, failed_stage, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.id,
                request.input,
                request.status().as_str(),
                request.created_at,
                request.finished_at,
                failed_stage,
                error,
            ],
        )?;
        tx.execute(
            "DELETE FROM request_messages WHERE request_id = ?1",
            params![request.id],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO request_messages
                 (request_id, seq, source, intent, confidence, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, message) in request.messages().iter().enumerate() {
                stmt.execute(params![
                    request.id,
                    seq as i64,
                    message.source().as_str(),
                    message.intent().as_str(),
                    message.confidence(),
                    serde_json::to_string(message)?,
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            request_id = %request.id,
            status = request.status().as_str(),
            messages = request.messages().len(),
            "history: request recorded"
        );
        Ok(())
    }

    /// Most recent Requests first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<RequestSummary>, HistoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.input, r.status, r.created_at, r.finished_at,
                    r.failed_stage, r.error,
                    (SELECT COUNT(*) FROM request_messages m WHERE m.request_id = r.id)
             FROM requests r
             ORDER BY r.created_at DESC, r.rowid DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RequestSummary {
                id: row.get(0)?,
                input: row.get(1)?,
                status: RequestStatus::from_str_value(&row.get::<_, String>(2)?),
                created_at: row.get(3)?,
                finished_at: row.get(4)?,
                failed_stage: row.get(5)?,
                error: row.get(6)?,
                message_count: row.get::<_, i64>(7)? as usize,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Reload a recorded Request with its messages in stage order.
    ///
    /// State transitions are not persisted; the reloaded Request only
    /// carries its terminal status.
    pub fn get(&self, request_id: &str) -> Result<Request, HistoryError> {
        let header = self
            .conn
            .query_row(
                "SELECT input, status, created_at, finished_at FROM requests WHERE id = ?1",
                params![request_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((input, status, created_at, finished_at)) = header else {
            return Err(HistoryError::RequestNotFound {
                request_id: request_id.to_string(),
            });
        };

        let mut stmt = self.conn.prepare(
            "SELECT message FROM request_messages WHERE request_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![request_id], |row| row.get::<_, String>(0))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(serde_json::from_str::<AgentMessage>(&row?)?);
        }

        Ok(Request::restore(
            request_id.to_string(),
            input,
            messages,
            RequestStatus::from_str_value(&status),
            created_at,
            finished_at,
        ))
    }

    /// Delete a recorded Request and its messages.
    pub fn delete(&self, request_id: &str) -> Result<(), HistoryError> {
        let removed = self
            .conn
            .execute("DELETE FROM requests WHERE id = ?1", params![request_id])?;
        if removed == 0 {
            return Err(HistoryError::RequestNotFound {
                request_id: request_id.to_string(),
            });
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::errors::{DataPhase, Stage, StageError};
    use crate::agent_core::types::{Intent, Interpretation, MessageContent, RowSet, Source};
    use serde_json::json;

    fn test_history() -> RequestHistory {
        RequestHistory::open(":memory:").unwrap()
    }

    fn completed_request() -> Request {
        Request::new("show me recent revenue")
            .with_message(AgentMessage::new(
                Source::Interpreter,
                Intent::Query,
                MessageContent::Interpretation(Interpretation {
                    suggestion: "Fetch revenue".into(),
                    signals: vec!["revenue".into()],
                    display: None,
                }),
                0.85,
            ))
            .with_message(AgentMessage::new(
                Source::Retriever,
                Intent::Query,
                MessageContent::Rows(RowSet::new(
                    vec!["ticker".into(), "value".into()],
                    vec![vec![json!("ACME"), json!(1200.5)]],
                )),
                0.95,
            ))
            .finish(RequestStatus::Completed)
    }

    #[test]
    fn test_record_and_reload() {
        let history = test_history();
        let request = completed_request();
        history.record(&request).unwrap();

        let loaded = history.get(&request.id).unwrap();
        assert_eq!(loaded.id, request.id);
        assert_eq!(loaded.input, request.input);
        assert_eq!(loaded.status(), RequestStatus::Completed);
        assert_eq!(loaded.messages(), request.messages());
        assert_eq!(loaded.finished_at, request.finished_at);
    }

    #[test]
    fn test_record_failure_keeps_stage_and_cause() {
        let history = test_history();
        let cause = StageError::Data {
            phase: DataPhase::Execution,
            reason: "database is locked".into(),
        };
        let request = Request::new("show revenue")
            .with_message(AgentMessage::failure(Source::Retriever, cause.clone()))
            .finish(RequestStatus::Failed);
        let err = CoordinationError::new(Stage::Retrieval, cause, request.clone());
        history.record_failure(&err).unwrap();

        let summaries = history.list_recent(10).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, RequestStatus::Failed);
        assert_eq!(summaries[0].failed_stage.as_deref(), Some("retrieval"));
        assert!(summaries[0].error.as_deref().unwrap().contains("locked"));
        assert_eq!(summaries[0].message_count, 1);

        let loaded = history.get(&request.id).unwrap();
        assert_eq!(loaded.messages()[0].failure_cause(), err.request.messages()[0].failure_cause());
    }

    #[test]
    fn test_list_recent_respects_limit() {
        let history = test_history();
        for _ in 0..5 {
            history.record(&completed_request()).unwrap();
        }
        assert_eq!(history.list_recent(3).unwrap().len(), 3);
        assert_eq!(history.list_recent(10).unwrap().len(), 5);
    }

    #[test]
    fn test_rerecord_replaces_messages() {
        let history = test_history();
        let request = completed_request();
        history.record(&request).unwrap();
        history.record(&request).unwrap();

        assert_eq!(history.list_recent(10).unwrap()[0].message_count, 2);
    }

    #[test]
    fn test_missing_request() {
        let history = test_history();
        assert!(matches!(
            history.get("nope"),
            Err(HistoryError::RequestNotFound { .. })
        ));
        assert!(matches!(
            history.delete("nope"),
            Err(HistoryError::RequestNotFound { .. })
        ));
    }

    #[test]
    fn test_delete_cascades() {
        let history = test_history();
        let request = completed_request();
        history.record(&request).unwrap();
        history.delete(&request.id).unwrap();

        assert!(history.list_recent(10).unwrap().is_empty());
        let orphans: i64 = history
            .conn
            .query_row("SELECT COUNT(*) FROM request_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_file_backed_history_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let path = path.to_str().unwrap();
        let request = completed_request();

        RequestHistory::open(path).unwrap().record(&request).unwrap();
        let reopened = RequestHistory::open(path).unwrap();
        assert_eq!(reopened.get(&request.id).unwrap().messages().len(), 2);
    }
}
