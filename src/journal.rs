// 📓 Run Journal - SQLite audit trail of every catalog write
//
// "Every change is an event": each create, update and bulk write the
// governor performs (or suppresses in dry-run mode) lands here, keyed by
// run. A run row carries the final counters once the run finishes.

use crate::context::RunContext;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// One journaled write
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JournalEvent {
    pub event_id: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub dry_run: bool,
}

impl JournalEvent {
    pub fn new(
        run_id: Uuid,
        event_type: &str,
        entity_kind: &str,
        entity_id: &str,
        data: serde_json::Value,
        dry_run: bool,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_kind: entity_kind.to_string(),
            entity_id: entity_id.to_string(),
            data,
            dry_run,
        }
    }
}

pub struct RunJournal {
    conn: Connection,
}

impl RunJournal {
    pub fn open(path: &Path) -> Result<Self> {
        let journal = RunJournal {
            conn: Connection::open(path)?,
        };
        journal.setup()?;
        Ok(journal)
    }

    pub fn open_in_memory() -> Result<Self> {
        let journal = RunJournal {
            conn: Connection::open_in_memory()?,
        };
        journal.setup()?;
        Ok(journal)
    }

    fn setup(&self) -> Result<()> {
        // WAL for crash recovery
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                dry_run INTEGER NOT NULL,
                finished_at TEXT,
                summary TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT UNIQUE NOT NULL,
                run_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                data TEXT NOT NULL,
                dry_run INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_kind, entity_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id)",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // RUNS
    // ========================================================================

    pub fn start_run(&self, ctx: &RunContext) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO runs (run_id, started_at, dry_run) VALUES (?1, ?2, ?3)",
            params![
                ctx.run_id.to_string(),
                ctx.started_at.to_rfc3339(),
                ctx.dry_run()
            ],
        )?;
        Ok(())
    }

    pub fn has_run(&self, run_id: Uuid) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM runs WHERE run_id = ?1",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn finish_run(&self, run_id: Uuid, summary: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET finished_at = ?1, summary = ?2 WHERE run_id = ?3",
            params![
                Utc::now().to_rfc3339(),
                serde_json::to_string(summary)?,
                run_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn run_summary(&self, run_id: Uuid) -> Result<Option<serde_json::Value>> {
        let summary: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT summary FROM runs WHERE run_id = ?1",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match summary.flatten() {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    pub fn record(&self, event: &JournalEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (event_id, run_id, timestamp, event_type, entity_kind, entity_id, data, dry_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.event_id,
                event.run_id.to_string(),
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.entity_kind,
                event.entity_id,
                serde_json::to_string(&event.data)?,
                event.dry_run,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_entity(&self, entity_kind: &str, entity_id: &str) -> Result<Vec<JournalEvent>> {
        self.select_events(
            "WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY id ASC",
            &[entity_kind, entity_id],
        )
    }

    pub fn events_for_run(&self, run_id: Uuid) -> Result<Vec<JournalEvent>> {
        let run_id = run_id.to_string();
        self.select_events("WHERE run_id = ?1 ORDER BY id ASC", &[run_id.as_str()])
    }

    fn select_events(&self, clause: &str, args: &[&str]) -> Result<Vec<JournalEvent>> {
        let sql = format!(
            "SELECT event_id, run_id, timestamp, event_type, entity_kind, entity_id, data, dry_run
             FROM events {clause}"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, bool>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (event_id, run_id, timestamp, event_type, entity_kind, entity_id, data, dry_run) in rows {
            events.push(JournalEvent {
                event_id,
                run_id: Uuid::parse_str(&run_id).unwrap_or_default(),
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
                event_type,
                entity_kind,
                entity_id,
                data: serde_json::from_str(&data)?,
                dry_run,
            });
        }

        Ok(events)
    }
}
