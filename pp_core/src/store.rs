//! SQLite persistence for the snipe history and cycle stats snapshots.
//!
//! Only this module issues SQL. The ingestion path talks to it through
//! [`StoreWriter`], which queues commands for a dedicated writer thread so a
//! slow disk never stalls the feed.

use std::path::Path;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Sender};
use pp_schema::{CycleStats, PowerplayRecord, SnipeEvent};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::snipe_log::{CycleSnapshotSink, SnipeLog};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS snipe_history (
    id INTEGER PRIMARY KEY,
    system TEXT,
    type TEXT,
    power TEXT,
    amount INTEGER,
    old_dump TEXT,
    new_dump TEXT
);
CREATE TABLE IF NOT EXISTS cycle_stats (
    id INTEGER PRIMARY KEY,
    timestamp TEXT,
    snapshot TEXT
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One `snipe_history` row with its dumps decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSnipe {
    pub id: i64,
    pub system: String,
    pub category: String,
    pub power: String,
    pub amount: i64,
    pub previous: Option<PowerplayRecord>,
    pub current: Option<PowerplayRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredCycleStats {
    pub id: i64,
    pub timestamp: String,
    pub stats: CycleStats,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn append_snipe(&self, event: &SnipeEvent) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO snipe_history (system, type, power, amount, old_dump, new_dump)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.system,
                event.category.as_str(),
                event.power,
                event.amount,
                serde_json::to_string(&event.previous)?,
                serde_json::to_string(&event.current)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest first.
    pub fn recent_snipes(&self, limit: usize) -> StoreResult<Vec<StoredSnipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, system, type, power, amount, old_dump, new_dump
             FROM snipe_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, system, category, power, amount, old_dump, new_dump)| {
                Ok(StoredSnipe {
                    id,
                    system,
                    category,
                    power,
                    amount,
                    previous: decode_dump(old_dump)?,
                    current: decode_dump(new_dump)?,
                })
            })
            .collect()
    }

    pub fn insert_cycle_stats(
        &self,
        timestamp: DateTime<Utc>,
        stats: &CycleStats,
    ) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO cycle_stats (timestamp, snapshot) VALUES (?1, ?2)",
            params![timestamp.to_rfc3339(), serde_json::to_string(stats)?],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Stored snapshot ids and timestamps, oldest first.
    pub fn cycle_stats_history(&self) -> StoreResult<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, timestamp FROM cycle_stats ORDER BY id ASC")?;
        let history = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    pub fn cycle_stats_by_id(&self, id: i64) -> StoreResult<Option<StoredCycleStats>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, timestamp, snapshot FROM cycle_stats WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((id, timestamp, snapshot)) => Ok(Some(StoredCycleStats {
                id,
                timestamp,
                stats: serde_json::from_str(&snapshot)?,
            })),
            None => Ok(None),
        }
    }
}

fn decode_dump(dump: Option<String>) -> StoreResult<Option<PowerplayRecord>> {
    match dump {
        Some(dump) => Ok(serde_json::from_str(&dump)?),
        None => Ok(None),
    }
}

pub enum StoreCommand {
    Snipe(Box<SnipeEvent>),
    CycleStats {
        timestamp: DateTime<Utc>,
        stats: Box<CycleStats>,
    },
}

/// Cloneable handle feeding the writer thread.
#[derive(Clone)]
pub struct StoreWriter {
    sender: Sender<StoreCommand>,
}

impl StoreWriter {
    fn submit(&self, command: StoreCommand) {
        if let Err(err) = self.sender.send(command) {
            tracing::error!(target: "powerplay::store", error = %err, "store.queue_failed");
        }
    }
}

impl SnipeLog for StoreWriter {
    fn log_snipe(&self, event: &SnipeEvent) {
        self.submit(StoreCommand::Snipe(Box::new(event.clone())));
    }
}

impl CycleSnapshotSink for StoreWriter {
    fn record_cycle_stats(&self, timestamp: DateTime<Utc>, stats: &CycleStats) {
        self.submit(StoreCommand::CycleStats {
            timestamp,
            stats: Box::new(stats.clone()),
        });
    }
}

/// Moves `db` onto a writer thread. The thread exits once every
/// [`StoreWriter`] clone has been dropped and the queue is drained.
pub fn spawn_store_writer(db: Database) -> (StoreWriter, JoinHandle<()>) {
    let (sender, receiver) = unbounded::<StoreCommand>();
    let handle = thread::spawn(move || {
        for command in receiver.iter() {
            match command {
                StoreCommand::Snipe(event) => match db.append_snipe(&event) {
                    Ok(id) => tracing::debug!(
                        target: "powerplay::store",
                        id,
                        system = %event.system,
                        "snipe.persisted"
                    ),
                    Err(err) => tracing::error!(
                        target: "powerplay::store",
                        system = %event.system,
                        error = %err,
                        "snipe.persist_failed"
                    ),
                },
                StoreCommand::CycleStats { timestamp, stats } => {
                    match db.insert_cycle_stats(timestamp, &stats) {
                        Ok(id) => tracing::info!(
                            target: "powerplay::store",
                            id,
                            cycle = stats.cycle,
                            "cycle_stats.persisted"
                        ),
                        Err(err) => tracing::error!(
                            target: "powerplay::store",
                            cycle = stats.cycle,
                            error = %err,
                            "cycle_stats.persist_failed"
                        ),
                    }
                }
            }
        }
        tracing::debug!(target: "powerplay::store", "store.writer_stopped");
    });
    (StoreWriter { sender }, handle)
}
