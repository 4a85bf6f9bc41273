//! Profiles: named searches with one checkpoint and their recorded matches.

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rule::RuleExpr;
use crate::search::CheckpointStore;
use crate::types::{Checkpoint, ExportJob, MatchResult, ProfileInfo, StoredMatch};
use crate::utils::config::ProfileIds;

use super::{INSERT_MATCH_SQL, open_db, open_db_in_memory};

const SELECT_PROGRESS_SQL: &str = "SELECT profile_id, start_seed, end_seed, current_seed, found, \
     concurrency, autosave, star_count, resource_multiplier, rule FROM progress WHERE profile_id = ?1";

/// Upsert that never moves `current_seed` backwards.
const UPSERT_PROGRESS_SQL: &str = r#"
INSERT INTO progress (profile_id, start_seed, end_seed, current_seed, found, concurrency,
                      autosave, star_count, resource_multiplier, rule)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(profile_id) DO UPDATE SET
    start_seed = excluded.start_seed,
    end_seed = excluded.end_seed,
    current_seed = excluded.current_seed,
    concurrency = excluded.concurrency,
    autosave = excluded.autosave,
    star_count = excluded.star_count,
    resource_multiplier = excluded.resource_multiplier,
    rule = excluded.rule
WHERE excluded.current_seed >= progress.current_seed
"#;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `profile_` + the first hex chars of a blake3 digest over name and creation time.
fn profile_id(name: &str, created_at: i64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&created_at.to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{}{}", ProfileIds::PREFIX, &hex[..ProfileIds::HEX_LEN])
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileInfo> {
    Ok(ProfileInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

/// Raw progress row; the rule is decoded outside the rusqlite closure.
fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<(Checkpoint, String)> {
    let seed = |i: usize| -> rusqlite::Result<u32> { Ok(row.get::<_, i64>(i)?.max(0) as u32) };
    let checkpoint = Checkpoint {
        id: row.get(0)?,
        start: seed(1)?,
        end: seed(2)?,
        current: seed(3)?,
        found: row.get::<_, i64>(4)?.max(0) as u64,
        concurrency: row.get::<_, i64>(5)?.max(0) as usize,
        autosave: row.get(6)?,
        star_count: seed(7)?,
        resource_multiplier: row.get::<_, f64>(8)? as f32,
        rule: RuleExpr::And(Vec::new()),
    };
    Ok((checkpoint, row.get(9)?))
}

/// SQLite-backed profile storage; also the [`CheckpointStore`] used by the CLI.
pub struct ProfileStore {
    conn: Connection,
}

impl ProfileStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    pub fn create_profile(&mut self, name: &str) -> Result<ProfileInfo> {
        let name = name.trim();
        if name.is_empty() {
            bail!("profile name is empty");
        }
        let created_at = now_ms();
        let info = ProfileInfo {
            id: profile_id(name, created_at),
            name: name.to_string(),
            created_at,
        };
        self.conn
            .execute(
                "INSERT INTO profiles (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![info.id, info.name, info.created_at],
            )
            .context("insert profile")?;
        debug!("created profile {} ({})", info.id, info.name);
        Ok(info)
    }

    /// All profiles, oldest first.
    pub fn list_profiles(&self) -> Result<Vec<ProfileInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM profiles ORDER BY created_at, id")?;
        let rows = stmt.query_map([], profile_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("list profiles")
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileInfo>> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM profiles WHERE id = ?1",
                [id],
                profile_from_row,
            )
            .optional()
            .context("load profile")
    }

    fn require_profile(&self, id: &str) -> Result<()> {
        match self.get_profile(id)? {
            Some(_) => Ok(()),
            None => Err(anyhow!("no profile {}", id)),
        }
    }

    /// Store `checkpoint` as the profile's configuration, replacing any stored frontier.
    pub fn put_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.require_profile(&checkpoint.id)?;
        let rule = serde_json::to_string(&checkpoint.rule).context("encode rule")?;
        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute("DELETE FROM progress WHERE profile_id = ?1", [&checkpoint.id])
            .context("replace progress")?;
        tx.execute(
            UPSERT_PROGRESS_SQL,
            params![
                checkpoint.id,
                checkpoint.start as i64,
                checkpoint.end as i64,
                checkpoint.current as i64,
                checkpoint.found as i64,
                checkpoint.concurrency as i64,
                checkpoint.autosave,
                checkpoint.star_count as i64,
                checkpoint.resource_multiplier as f64,
                rule
            ],
        )
        .context("insert progress")?;
        tx.commit().context("commit transaction")?;
        Ok(())
    }

    /// Drop every match and reset the frontier to the range start. Returns false for unknown ids.
    pub fn clear_profile(&mut self, id: &str) -> Result<bool> {
        if self.get_profile(id)?.is_none() {
            return Ok(false);
        }
        let tx = self.conn.transaction().context("begin transaction")?;
        let removed = tx
            .execute("DELETE FROM matches WHERE profile_id = ?1", [id])
            .context("delete matches")?;
        tx.execute(
            "UPDATE progress SET current_seed = start_seed, found = 0 WHERE profile_id = ?1",
            [id],
        )
        .context("reset progress")?;
        tx.commit().context("commit transaction")?;
        debug!("cleared profile {} ({} match row(s))", id, removed);
        Ok(true)
    }

    /// Remove the profile with its progress and matches. Returns false for unknown ids.
    pub fn delete_profile(&mut self, id: &str) -> Result<bool> {
        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute("DELETE FROM matches WHERE profile_id = ?1", [id])
            .context("delete matches")?;
        tx.execute("DELETE FROM progress WHERE profile_id = ?1", [id])
            .context("delete progress")?;
        let n = tx
            .execute("DELETE FROM profiles WHERE id = ?1", [id])
            .context("delete profile")?;
        tx.commit().context("commit transaction")?;
        Ok(n > 0)
    }

    /// One page of stored matches, ordered by seed then star index.
    pub fn results_page(&self, id: &str, offset: usize, limit: usize) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT seed, star_index FROM matches WHERE profile_id = ?1 \
             ORDER BY seed, star_index LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![id, limit as i64, offset as i64], |row| {
            Ok(StoredMatch {
                seed: row.get::<_, i64>(0)?.max(0) as u32,
                index: row.get::<_, i64>(1)?.max(0) as u32,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("load results page")
    }

    /// Stored match rows (seed, star index pairs) for the profile.
    pub fn match_count(&self, id: &str) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM matches WHERE profile_id = ?1",
                [id],
                |row| row.get(0),
            )
            .context("count matches")?;
        Ok(n.max(0) as u64)
    }

    /// Stored matches grouped per seed, seeds ascending.
    pub fn export_jobs(&self, id: &str) -> Result<Vec<ExportJob>> {
        self.export_jobs_range(id, 0, u32::MAX)
    }

    /// Like [`export_jobs`](Self::export_jobs), limited to seeds in `[start, end]` (inclusive).
    pub fn export_jobs_range(&self, id: &str, start: u32, end: u32) -> Result<Vec<ExportJob>> {
        let mut stmt = self.conn.prepare(
            "SELECT seed, star_index FROM matches WHERE profile_id = ?1 \
             AND seed >= ?2 AND seed <= ?3 ORDER BY seed, star_index",
        )?;
        let rows = stmt.query_map(params![id, start as i64, end as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?.max(0) as u32,
                row.get::<_, i64>(1)?.max(0) as u32,
            ))
        })?;
        let mut jobs: Vec<ExportJob> = Vec::new();
        for row in rows {
            let (seed, index) = row.context("load match")?;
            match jobs.last_mut() {
                Some(job) if job.seed == seed => job.indexes.push(index),
                _ => jobs.push(ExportJob {
                    seed,
                    indexes: vec![index],
                }),
            }
        }
        Ok(jobs)
    }
}

impl CheckpointStore for ProfileStore {
    fn load(&mut self, id: &str) -> Result<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(SELECT_PROGRESS_SQL, [id], checkpoint_from_row)
            .optional()
            .context("load progress")?;
        let Some((mut checkpoint, rule)) = row else {
            return Ok(None);
        };
        checkpoint.rule = serde_json::from_str(&rule)
            .with_context(|| format!("decode stored rule of {}", id))?;
        Ok(Some(checkpoint))
    }

    fn save(&mut self, checkpoint: &Checkpoint, new_matches: &[MatchResult]) -> Result<bool> {
        let rule = serde_json::to_string(&checkpoint.rule).context("encode rule")?;
        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute(
            "INSERT OR IGNORE INTO profiles (id, name, created_at) VALUES (?1, ?1, ?2)",
            params![checkpoint.id, now_ms()],
        )
        .context("ensure profile")?;
        {
            let mut stmt = tx.prepare(INSERT_MATCH_SQL).context("prepare insert")?;
            let rows = new_matches
                .iter()
                .flat_map(|m| m.indexes.iter().map(move |i| (m.seed, *i)));
            for (seed, index) in rows {
                stmt.execute(params![checkpoint.id, seed as i64, index as i64])
                    .context("insert match")?;
            }
        }
        let advanced = tx
            .execute(
                UPSERT_PROGRESS_SQL,
                params![
                    checkpoint.id,
                    checkpoint.start as i64,
                    checkpoint.end as i64,
                    checkpoint.current as i64,
                    checkpoint.found as i64,
                    checkpoint.concurrency as i64,
                    checkpoint.autosave,
                    checkpoint.star_count as i64,
                    checkpoint.resource_multiplier as f64,
                    rule
                ],
            )
            .context("save progress")?
            > 0;
        tx.execute(
            "UPDATE progress SET found = \
             (SELECT COUNT(DISTINCT seed) FROM matches WHERE profile_id = ?1) WHERE profile_id = ?1",
            [&checkpoint.id],
        )
        .context("update found count")?;
        tx.commit().context("commit transaction")?;
        if !advanced {
            debug!(
                "{}: stale checkpoint at seed {} ignored",
                checkpoint.id, checkpoint.current
            );
        }
        Ok(advanced)
    }
}
