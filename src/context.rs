// 🧭 Run Context - Per-run state injected into every component
//
// One RunContext per sync run. Nothing here is global: two runs in the
// same process never see each other's caches, counters or journal.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::journal::RunJournal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: SyncConfig,
}

impl RunContext {
    pub fn new(config: SyncConfig) -> Self {
        RunContext {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Open the configured journal and register this run in it
    pub fn open_journal(&self) -> Result<Option<RunJournal>> {
        match &self.config.journal_path {
            Some(path) => {
                let journal = RunJournal::open(path)?;
                journal.start_run(self)?;
                Ok(Some(journal))
            }
            None => Ok(None),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_get_distinct_ids() {
        let a = RunContext::default();
        let b = RunContext::default();
        assert_ne!(a.run_id, b.run_id);
        assert!(!a.dry_run());
    }

    #[test]
    fn test_no_journal_without_path() {
        let ctx = RunContext::default();
        assert!(ctx.open_journal().unwrap().is_none());
    }

    #[test]
    fn test_open_journal_registers_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::default();
        config.journal_path = Some(dir.path().join("journal.db"));

        let ctx = RunContext::new(config);
        let journal = ctx.open_journal().unwrap().unwrap();
        assert!(journal.has_run(ctx.run_id).unwrap());
    }
}
