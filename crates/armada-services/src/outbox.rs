//! CommandOutbox: commands accepted while the broker was unreachable.
//!
//! Rows are kept in SQLite so a server restart does not lose a command that
//! was answered `queued`. The outbox is bounded: once `capacity` commands are
//! waiting, further pushes fail with `Full` and the submitter is told to back
//! off instead.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use armada_core::{now_ms, Command};

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("command outbox full ({0} waiting)")]
    Full(usize),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("outbox lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pending_commands (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    command_id TEXT NOT NULL UNIQUE,
    target_key TEXT NOT NULL,
    body       TEXT NOT NULL,
    parked_at  INTEGER NOT NULL
);
";

pub struct CommandOutbox {
    conn: Mutex<Connection>,
    capacity: usize,
}

impl CommandOutbox {
    /// Open (or create) the outbox at `path`. Commands parked by a previous
    /// run are kept.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, OutboxError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let outbox = Self::init(conn, capacity)?;
        let waiting = outbox.len()?;
        if waiting > 0 {
            tracing::info!(waiting, path = %path.display(), "parked commands recovered");
        }
        Ok(outbox)
    }

    pub fn in_memory(capacity: usize) -> Result<Self, OutboxError> {
        Self::init(Connection::open_in_memory()?, capacity)
    }

    fn init(conn: Connection, capacity: usize) -> Result<Self, OutboxError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            capacity: capacity.max(1),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, OutboxError> {
        self.conn.lock().map_err(|_| OutboxError::Poisoned)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Park `cmd` behind everything already waiting. A command whose id is
    /// already parked is not added twice.
    pub fn push(&self, cmd: &Command) -> Result<(), OutboxError> {
        let body = serde_json::to_string(cmd)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let waiting: i64 = tx.query_row("SELECT COUNT(*) FROM pending_commands", [], |r| r.get(0))?;
        if waiting as usize >= self.capacity {
            return Err(OutboxError::Full(waiting as usize));
        }
        tx.execute(
            "INSERT OR IGNORE INTO pending_commands (command_id, target_key, body, parked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![cmd.id, cmd.target_key, body, now_ms() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Oldest parked command with its sequence number. Unreadable rows are
    /// dropped with a warning.
    pub fn front(&self) -> Result<Option<(i64, Command)>, OutboxError> {
        let conn = self.lock()?;
        loop {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT seq, body FROM pending_commands ORDER BY seq LIMIT 1",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let Some((seq, body)) = row else {
                return Ok(None);
            };
            match serde_json::from_str(&body) {
                Ok(cmd) => return Ok(Some((seq, cmd))),
                Err(e) => {
                    tracing::warn!(seq, error = %e, "parked command unreadable; dropping");
                    conn.execute("DELETE FROM pending_commands WHERE seq = ?1", params![seq])?;
                }
            }
        }
    }

    pub fn remove(&self, seq: i64) -> Result<(), OutboxError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM pending_commands WHERE seq = ?1", params![seq])?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, OutboxError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pending_commands", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }
}
