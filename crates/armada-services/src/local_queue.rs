//! LocalQueue: the agent's SQLite-backed durable store.
//!
//! Three tables:
//! - `inbound_commands`: every command received, persisted before it is
//!   acknowledged upstream. The primary key on `command_id` makes
//!   redelivery a no-op.
//! - `policy_executions`: latest snapshot of each policy run, keyed by
//!   `execution_id`.
//! - `outbound_results`: results awaiting delivery to the server. Rows are
//!   flipped to sent exactly once and removed only by the retention purge.
//!
//! Every mutation is a single statement or a single transaction, so callers
//! need no locking of their own.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;

use armada_core::{
    now_ms, Command, CommandResult, PolicyExecutionCommand, PolicyExecutionResult, ResultEvent,
};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue lock poisoned")]
    Poisoned,
}

/// Lifecycle of an inbound command row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundStatus {
    Received,
    Running,
    Completed,
    Expired,
    Failed,
    Cancelled,
}

impl InboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "received" => Self::Received,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "expired" => Self::Expired,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    /// Already present by id; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundStatus {
    Pending,
    Sent,
    /// Dead-lettered after too many failed deliveries. Kept for inspection.
    Failed,
}

impl OutboundStatus {
    fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A result row awaiting (or past) delivery.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub id: i64,
    pub result_id: String,
    pub agent_id: String,
    pub event: ResultEvent,
    pub status: OutboundStatus,
    pub retry_count: u32,
    pub response_code: Option<u16>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub last_attempt_at: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub inbound_received: u64,
    pub inbound_running: u64,
    pub inbound_done: u64,
    pub outbound_pending: u64,
    pub outbound_sent: u64,
    pub outbound_failed: u64,
    pub policies: u64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS inbound_commands (
    command_id   TEXT PRIMARY KEY,
    agent_id     TEXT NOT NULL,
    command_type TEXT NOT NULL,
    body         TEXT NOT NULL,
    issued_at    INTEGER NOT NULL,
    ttl_seconds  INTEGER NOT NULL,
    status       TEXT NOT NULL,
    received_at  INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_inbound_agent ON inbound_commands(agent_id);
CREATE INDEX IF NOT EXISTS idx_inbound_status ON inbound_commands(status);
CREATE INDEX IF NOT EXISTS idx_inbound_agent_status ON inbound_commands(agent_id, status);

CREATE TABLE IF NOT EXISTS policy_executions (
    execution_id       TEXT PRIMARY KEY,
    agent_id           TEXT NOT NULL,
    policy_id          TEXT NOT NULL,
    status             TEXT NOT NULL,
    progress           REAL NOT NULL DEFAULT 0,
    body               TEXT NOT NULL,
    reported_to_server INTEGER NOT NULL DEFAULT 0,
    created_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_policy_agent ON policy_executions(agent_id);
CREATE INDEX IF NOT EXISTS idx_policy_status ON policy_executions(status);
CREATE INDEX IF NOT EXISTS idx_policy_agent_status ON policy_executions(agent_id, status);

CREATE TABLE IF NOT EXISTS outbound_results (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    result_id       TEXT NOT NULL,
    kind            TEXT NOT NULL,
    agent_id        TEXT NOT NULL,
    body            TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    sent_to_server  INTEGER NOT NULL DEFAULT 0,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    response_code   INTEGER,
    last_error      TEXT,
    created_at      INTEGER NOT NULL,
    last_attempt_at INTEGER,
    next_attempt_at INTEGER,
    reported_at     INTEGER,
    UNIQUE(kind, result_id)
);
CREATE INDEX IF NOT EXISTS idx_outbound_agent ON outbound_results(agent_id);
CREATE INDEX IF NOT EXISTS idx_outbound_status ON outbound_results(status);
CREATE INDEX IF NOT EXISTS idx_outbound_agent_status ON outbound_results(agent_id, status);
";

/// Durable queue for one agent. Cheap to clone.
#[derive(Clone)]
pub struct LocalQueue {
    conn: Arc<Mutex<Connection>>,
    agent_id: Arc<str>,
}

impl LocalQueue {
    /// Open (or create) the queue at `path`, enabling WAL.
    pub fn open(path: &Path, agent_id: &str) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, agent_id)
    }

    pub fn open_in_memory(agent_id: &str) -> Result<Self, QueueError> {
        Self::init(Connection::open_in_memory()?, agent_id)
    }

    fn init(conn: Connection, agent_id: &str) -> Result<Self, QueueError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Self::migrate(&conn)?;
        tracing::info!(agent_id, "local queue opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            agent_id: Arc::from(agent_id),
        })
    }

    /// Bring queues created by older builds up to the current schema.
    fn migrate(conn: &Connection) -> Result<(), QueueError> {
        let has_next_attempt: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('outbound_results') WHERE name = 'next_attempt_at'",
            [],
            |row| row.get(0),
        )?;
        if has_next_attempt == 0 {
            conn.execute_batch("ALTER TABLE outbound_results ADD COLUMN next_attempt_at INTEGER")?;
            tracing::info!("local queue migrated: outbound_results.next_attempt_at");
        }
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_outbound_due
                 ON outbound_results(agent_id, status, next_attempt_at)",
        )?;
        Ok(())
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn.lock().map_err(|_| QueueError::Poisoned)
    }

    // ── Inbound commands ──────────────────────────────────────────────────────

    /// Persist a received command. Returns `Duplicate` if its id is known.
    pub fn record_command(&self, cmd: &Command) -> Result<RecordOutcome, QueueError> {
        self.insert_command(cmd, InboundStatus::Received)
    }

    /// Persist a command that arrived past its expiry. It is never run.
    pub fn record_expired(&self, cmd: &Command) -> Result<RecordOutcome, QueueError> {
        self.insert_command(cmd, InboundStatus::Expired)
    }

    fn insert_command(
        &self,
        cmd: &Command,
        status: InboundStatus,
    ) -> Result<RecordOutcome, QueueError> {
        let body = serde_json::to_string(cmd)?;
        let now = now_ms() as i64;
        let conn = self.lock()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO inbound_commands
                (command_id, agent_id, command_type, body, issued_at, ttl_seconds, status, received_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                cmd.id,
                &*self.agent_id,
                cmd.command_type,
                body,
                cmd.issued_at as i64,
                cmd.ttl_seconds as i64,
                status.as_str(),
                now,
            ],
        )?;
        Ok(if n == 1 {
            RecordOutcome::Accepted
        } else {
            RecordOutcome::Duplicate
        })
    }

    /// Take up to `limit` received commands, oldest first, and mark them
    /// running.
    pub fn claim_received(&self, limit: usize) -> Result<Vec<Command>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let bodies: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT command_id, body FROM inbound_commands
                 WHERE agent_id = ?1 AND status = 'received'
                 ORDER BY received_at, rowid LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![&*self.agent_id, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };
        let now = now_ms() as i64;
        let mut commands = Vec::with_capacity(bodies.len());
        for (id, body) in bodies {
            tx.execute(
                "UPDATE inbound_commands SET status = 'running', updated_at = ?2 WHERE command_id = ?1",
                params![id, now],
            )?;
            match serde_json::from_str::<Command>(&body) {
                Ok(cmd) => commands.push(cmd),
                Err(e) => {
                    tracing::warn!(command_id = %id, error = %e, "stored command unreadable");
                    tx.execute(
                        "UPDATE inbound_commands SET status = 'failed' WHERE command_id = ?1",
                        params![id],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(commands)
    }

    pub fn set_command_status(
        &self,
        command_id: &str,
        status: InboundStatus,
    ) -> Result<(), QueueError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE inbound_commands SET status = ?2, updated_at = ?3 WHERE command_id = ?1",
            params![command_id, status.as_str(), now_ms() as i64],
        )?;
        Ok(())
    }

    pub fn command_status(&self, command_id: &str) -> Result<Option<InboundStatus>, QueueError> {
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM inbound_commands WHERE command_id = ?1",
                params![command_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(InboundStatus::parse))
    }

    /// Commands left `running` by a crash go back to `received`; policy
    /// snapshots caught mid-run go back to `pending`.
    pub fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_ms() as i64;
        let n = tx.execute(
            "UPDATE inbound_commands SET status = 'received', updated_at = ?2
             WHERE agent_id = ?1 AND status = 'running'",
            params![&*self.agent_id, now],
        )?;
        tx.execute(
            "UPDATE policy_executions SET status = 'pending', updated_at = ?2
             WHERE agent_id = ?1 AND status = 'running'",
            params![&*self.agent_id, now],
        )?;
        tx.commit()?;
        if n > 0 {
            tracing::info!(recovered = n, "requeued interrupted commands");
        }
        Ok(n)
    }

    // ── Policy executions ─────────────────────────────────────────────────────

    /// Create the pending snapshot for a policy run. `Duplicate` if this
    /// execution id was seen before.
    pub fn record_policy(&self, cmd: &PolicyExecutionCommand) -> Result<RecordOutcome, QueueError> {
        let snapshot = PolicyExecutionResult::pending(cmd);
        let body = serde_json::to_string(&snapshot)?;
        let now = now_ms() as i64;
        let conn = self.lock()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO policy_executions
                (execution_id, agent_id, policy_id, status, progress, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?5)",
            params![cmd.execution_id, &*self.agent_id, cmd.policy_id, body, now],
        )?;
        Ok(if n == 1 {
            RecordOutcome::Accepted
        } else {
            RecordOutcome::Duplicate
        })
    }

    /// Overwrite the stored snapshot of a run.
    pub fn update_policy_progress(&self, result: &PolicyExecutionResult) -> Result<(), QueueError> {
        let conn = self.lock()?;
        Self::write_policy(&conn, result)
    }

    fn write_policy(conn: &Connection, result: &PolicyExecutionResult) -> Result<(), QueueError> {
        let body = serde_json::to_string(result)?;
        let status = serde_json::to_value(result.status)?;
        conn.execute(
            "UPDATE policy_executions SET status = ?2, progress = ?3, body = ?4, updated_at = ?5
             WHERE execution_id = ?1",
            params![
                result.execution_id,
                status.as_str().unwrap_or("running"),
                result.progress,
                body,
                now_ms() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn policy_result(
        &self,
        execution_id: &str,
    ) -> Result<Option<PolicyExecutionResult>, QueueError> {
        let conn = self.lock()?;
        let row: Option<(String, bool)> = conn
            .query_row(
                "SELECT body, reported_to_server FROM policy_executions WHERE execution_id = ?1",
                params![execution_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((body, reported)) => {
                let mut result: PolicyExecutionResult = serde_json::from_str(&body)?;
                result.reported_to_server = reported;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    // ── Outbound results ──────────────────────────────────────────────────────

    /// Store a command's result and mark the command finished, atomically.
    pub fn complete_command(
        &self,
        result: CommandResult,
        status: InboundStatus,
    ) -> Result<(), QueueError> {
        let command_id = result.command_id.clone();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::insert_outbound(&tx, &ResultEvent::Command(result))?;
        tx.execute(
            "UPDATE inbound_commands SET status = ?2, updated_at = ?3 WHERE command_id = ?1",
            params![command_id, status.as_str(), now_ms() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Store the final snapshot of a run, queue it for delivery, and mark the
    /// carrying command finished, atomically.
    pub fn complete_policy(
        &self,
        command_id: &str,
        result: PolicyExecutionResult,
    ) -> Result<(), QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::write_policy(&tx, &result)?;
        let status = match result.status {
            armada_core::PolicyStatus::Cancelled => InboundStatus::Cancelled,
            _ => InboundStatus::Completed,
        };
        Self::insert_outbound(&tx, &ResultEvent::Policy(result))?;
        tx.execute(
            "UPDATE inbound_commands SET status = ?2, updated_at = ?3 WHERE command_id = ?1",
            params![command_id, status.as_str(), now_ms() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Queue a result for delivery. Re-enqueueing an undelivered result
    /// replaces its body; an already reported result is left alone.
    pub fn enqueue_result(&self, event: &ResultEvent) -> Result<(), QueueError> {
        let conn = self.lock()?;
        Self::insert_outbound(&conn, event)
    }

    fn insert_outbound(conn: &Connection, event: &ResultEvent) -> Result<(), QueueError> {
        let kind = match event {
            ResultEvent::Command(_) => "command",
            ResultEvent::Policy(_) => "policy",
        };
        let body = serde_json::to_string(event)?;
        conn.execute(
            "INSERT INTO outbound_results (result_id, kind, agent_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, result_id) DO UPDATE SET body = excluded.body
             WHERE outbound_results.sent_to_server = 0",
            params![event.key(), kind, event.agent_id(), body, now_ms() as i64],
        )?;
        Ok(())
    }

    /// Pending results whose backoff has elapsed, oldest first. Rows still
    /// backing off are filtered before the limit, so they never crowd out
    /// rows that are due.
    pub fn due_results(&self, now: u64, limit: usize) -> Result<Vec<OutboundRecord>, QueueError> {
        self.outbound_where(
            "status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?3)",
            &[&(now as i64) as &dyn ToSql],
            limit,
        )
    }

    /// Dead-lettered results.
    pub fn failed_results(&self, limit: usize) -> Result<Vec<OutboundRecord>, QueueError> {
        self.outbound_where("status = 'failed'", &[], limit)
    }

    fn outbound_where(
        &self,
        clause: &str,
        extra: &[&dyn ToSql],
        limit: usize,
    ) -> Result<Vec<OutboundRecord>, QueueError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, result_id, agent_id, body, status, retry_count, response_code,
                    last_error, created_at, last_attempt_at
             FROM outbound_results
             WHERE agent_id = ?1 AND {clause}
             ORDER BY id LIMIT ?2"
        );
        let agent_id: &str = &self.agent_id;
        let limit = limit as i64;
        let mut args: Vec<&dyn ToSql> = Vec::with_capacity(2 + extra.len());
        args.push(&agent_id);
        args.push(&limit);
        args.extend_from_slice(extra);
        let mut stmt = conn.prepare(&sql)?;
        type Row = (
            i64,
            String,
            String,
            String,
            String,
            u32,
            Option<u16>,
            Option<String>,
            i64,
            Option<i64>,
        );
        let rows: Vec<Row> = stmt
            .query_map(&*args, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, result_id, agent_id, body, status, retry_count, code, err, created, attempt) in rows
        {
            let event: ResultEvent = match serde_json::from_str(&body) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(id, error = %e, "stored result unreadable; skipping");
                    continue;
                }
            };
            out.push(OutboundRecord {
                id,
                result_id,
                agent_id,
                event,
                status: OutboundStatus::parse(&status),
                retry_count,
                response_code: code,
                last_error: err,
                created_at: created as u64,
                last_attempt_at: attempt.map(|a| a as u64),
            });
        }
        Ok(out)
    }

    /// Flip a result to sent. Returns false if it was already sent, so a
    /// result is reported at most once.
    pub fn mark_sent(&self, id: i64, response_code: u16) -> Result<bool, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_ms() as i64;
        let n = tx.execute(
            "UPDATE outbound_results
             SET status = 'sent', sent_to_server = 1, response_code = ?2,
                 reported_at = ?3, last_attempt_at = ?3
             WHERE id = ?1 AND sent_to_server = 0",
            params![id, response_code, now],
        )?;
        if n == 1 {
            tx.execute(
                "UPDATE policy_executions SET reported_to_server = 1, updated_at = ?2
                 WHERE execution_id = (
                     SELECT result_id FROM outbound_results WHERE id = ?1 AND kind = 'policy'
                 )",
                params![id, now],
            )?;
        }
        tx.commit()?;
        Ok(n == 1)
    }

    /// Record a failed delivery attempt; the row is not due again until
    /// `retry_after` has passed. With `max_retries > 0` the row is
    /// dead-lettered once that many attempts have failed; it is never deleted.
    pub fn record_failure(
        &self,
        id: i64,
        error: &str,
        max_retries: u32,
        retry_after: Duration,
    ) -> Result<OutboundStatus, QueueError> {
        let now = now_ms();
        let next_attempt = now.saturating_add(retry_after.as_millis() as u64);
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "UPDATE outbound_results
                 SET retry_count = retry_count + 1,
                     last_error = ?2,
                     last_attempt_at = ?3,
                     next_attempt_at = ?5,
                     status = CASE
                         WHEN ?4 > 0 AND retry_count + 1 >= ?4 THEN 'failed'
                         ELSE status
                     END
                 WHERE id = ?1 AND sent_to_server = 0
                 RETURNING status",
                params![id, error, now as i64, max_retries, next_attempt as i64],
                |row| row.get(0),
            )
            .optional()?;
        let status = status
            .as_deref()
            .map(OutboundStatus::parse)
            .unwrap_or(OutboundStatus::Sent);
        if status == OutboundStatus::Failed {
            tracing::warn!(id, error, "result dead-lettered");
        }
        Ok(status)
    }

    /// Return dead-lettered results to the pending set with a fresh counter.
    pub fn requeue_failed(&self) -> Result<usize, QueueError> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE outbound_results SET status = 'pending', retry_count = 0, last_attempt_at = NULL,
                 next_attempt_at = NULL
             WHERE agent_id = ?1 AND status = 'failed'",
            params![&*self.agent_id],
        )?;
        Ok(n)
    }

    /// Delete reported results and finished commands older than `retention`.
    pub fn purge_reported(&self, retention: Duration) -> Result<usize, QueueError> {
        let cutoff = now_ms().saturating_sub(retention.as_millis() as u64) as i64;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let results = tx.execute(
            "DELETE FROM outbound_results
             WHERE agent_id = ?1 AND sent_to_server = 1 AND reported_at < ?2",
            params![&*self.agent_id, cutoff],
        )?;
        let commands = tx.execute(
            "DELETE FROM inbound_commands
             WHERE agent_id = ?1 AND status IN ('completed', 'expired', 'cancelled', 'failed')
               AND updated_at < ?2
               AND command_id NOT IN (
                   SELECT json_extract(body, '$.commandId') FROM outbound_results
                   WHERE kind = 'command' AND sent_to_server = 0
               )",
            params![&*self.agent_id, cutoff],
        )?;
        let policies = tx.execute(
            "DELETE FROM policy_executions
             WHERE agent_id = ?1 AND reported_to_server = 1 AND updated_at < ?2",
            params![&*self.agent_id, cutoff],
        )?;
        tx.commit()?;
        let total = results + commands + policies;
        if total > 0 {
            tracing::debug!(results, commands, policies, "purged reported rows");
        }
        Ok(total)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(sql, params![&*self.agent_id], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
        };
        Ok(QueueStats {
            inbound_received: count(
                "SELECT COUNT(*) FROM inbound_commands WHERE agent_id = ?1 AND status = 'received'",
            )?,
            inbound_running: count(
                "SELECT COUNT(*) FROM inbound_commands WHERE agent_id = ?1 AND status = 'running'",
            )?,
            inbound_done: count(
                "SELECT COUNT(*) FROM inbound_commands
                 WHERE agent_id = ?1 AND status NOT IN ('received', 'running')",
            )?,
            outbound_pending: count(
                "SELECT COUNT(*) FROM outbound_results WHERE agent_id = ?1 AND status = 'pending'",
            )?,
            outbound_sent: count(
                "SELECT COUNT(*) FROM outbound_results WHERE agent_id = ?1 AND status = 'sent'",
            )?,
            outbound_failed: count(
                "SELECT COUNT(*) FROM outbound_results WHERE agent_id = ?1 AND status = 'failed'",
            )?,
            policies: count("SELECT COUNT(*) FROM policy_executions WHERE agent_id = ?1")?,
        })
    }
}
