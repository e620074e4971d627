//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the FingerprintStore trait.

use crate::dedup::{Fingerprint, IndexEntry};
use crate::job::Site;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FingerprintStore, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, StoredFingerprint};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;

/// SQLite fingerprint store
pub struct SqliteFingerprintStore {
    conn: Connection,
}

impl SqliteFingerprintStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl FingerprintStore for SqliteFingerprintStore {
    // ===== Run Management =====

    fn create_run(
        &mut self,
        site: Site,
        search_tags: &str,
        config_hash: &str,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (site, search_tags, started_at, config_hash, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                site.name(),
                search_tags,
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site, search_tags, started_at, finished_at, config_hash, status
             FROM runs WHERE id = ?1",
        )?;

        let run = stmt
            .query_row(params![run_id], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    site: row.get(1)?,
                    search_tags: row.get(2)?,
                    started_at: row.get(3)?,
                    finished_at: row.get(4)?,
                    config_hash: row.get(5)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(6)?)
                        .unwrap_or(RunStatus::Running),
                })
            })
            .map_err(|_| StorageError::RunNotFound(run_id))?;

        Ok(run)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Fingerprints =====

    fn load_fingerprints(&self, site: Site) -> StorageResult<Vec<IndexEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT post_id, fingerprint FROM fingerprints WHERE site = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![site.name()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (post_id, hex) = row?;
            let fingerprint: Fingerprint = hex.parse().map_err(StorageError::Serialization)?;
            entries.push(IndexEntry {
                fingerprint,
                post_id,
            });
        }

        Ok(entries)
    }

    fn save_fingerprints(
        &mut self,
        site: Site,
        run_id: Option<i64>,
        entries: &[StoredFingerprint],
    ) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO fingerprints
                 (site, post_id, fingerprint, local_path, added_at, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                inserted += stmt.execute(params![
                    site.name(),
                    entry.post_id,
                    entry.fingerprint.to_string(),
                    entry.local_path,
                    now,
                    run_id
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            "Saved {} of {} fingerprints for {}",
            inserted,
            entries.len(),
            site
        );
        Ok(inserted)
    }

    fn count_fingerprints(&self, site: Site) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fingerprints WHERE site = ?1",
            params![site.name()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
