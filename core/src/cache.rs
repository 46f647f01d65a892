//! Incremental analytics cache.
//!
//! The engine keeps a snapshot of everything derived from the archive: the
//! server-wide word counter, the homepage bundle and the merge forest, keyed
//! by the highest message seq already counted. A refresh only counts the
//! messages above that mark.
//!
//! The snapshot lives in one bincode file that is replaced atomically, so a
//! crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::claims;
use crate::config::{AnalyticsConfig, Config};
use crate::db::{max_message_seq, open_archive};
use crate::error::CoreError;
use crate::homepage::compute_homepage;
use crate::merges::{self, load_merges, MergeForest};
use crate::models::{ClaimRequest, HomepageBundle};
use crate::wordfreq::{compute_delta, DeltaOptions, WordCounter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Highest message seq whose words are in `word_counter`.
    pub last_msg_id: i64,
    pub word_counter: WordCounter,
    pub homepage: HomepageBundle,
    pub merges: MergeForest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub state: CacheState,
    pub previous_high_water: i64,
    pub high_water: i64,
    /// The store's max seq fell below the snapshot; the counter was rebuilt.
    pub rebuilt: bool,
    pub delta_messages: usize,
    pub partitions: usize,
    pub failed_partitions: usize,
    pub persisted: bool,
}

impl RefreshReport {
    fn fresh(high_water: i64) -> Self {
        Self {
            state: CacheState::Fresh,
            previous_high_water: high_water,
            high_water,
            rebuilt: false,
            delta_messages: 0,
            partitions: 0,
            failed_partitions: 0,
            persisted: false,
        }
    }
}

pub struct AnalyticsEngine {
    archive_path: PathBuf,
    snapshot_path: PathBuf,
    options: AnalyticsConfig,
    snapshot: Snapshot,
    homepage_dirty: bool,
}

impl AnalyticsEngine {
    pub fn new(archive_path: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>, options: AnalyticsConfig) -> Self {
        Self {
            archive_path: archive_path.into(),
            snapshot_path: snapshot_path.into(),
            options,
            snapshot: Snapshot::default(),
            homepage_dirty: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.archive.path.clone(),
            config.archive.snapshot_path.clone(),
            config.analytics.clone(),
        )
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn high_water(&self) -> i64 {
        self.snapshot.last_msg_id
    }

    pub fn word_counter(&self) -> &WordCounter {
        &self.snapshot.word_counter
    }

    pub fn merges(&self) -> &MergeForest {
        &self.snapshot.merges
    }

    pub fn homepage(&self) -> &HomepageBundle {
        &self.snapshot.homepage
    }

    fn delta_options(&self) -> DeltaOptions {
        DeltaOptions {
            workers: self.options.worker_count(),
            partitions_per_worker: self.options.partitions_per_worker.max(1),
            char_budget: self.options.char_budget,
        }
    }

    /// Startup path: read the snapshot (a missing or unreadable one means a
    /// cold start), take merge edges from the store, then bring everything up
    /// to the store's max seq. The homepage is recomputed even when nothing
    /// new was counted.
    pub fn load_or_compute(&mut self) -> Result<RefreshReport, CoreError> {
        self.snapshot = match load_snapshot(&self.snapshot_path) {
            Ok(Some(snapshot)) => {
                info!(
                    path = %self.snapshot_path.display(),
                    high_water = snapshot.last_msg_id,
                    words = snapshot.word_counter.len(),
                    "snapshot loaded"
                );
                snapshot
            }
            Ok(None) => {
                info!(path = %self.snapshot_path.display(), "no snapshot, starting cold");
                Snapshot::default()
            }
            Err(err) => {
                warn!(path = %self.snapshot_path.display(), error = %err, "snapshot unreadable, starting cold");
                Snapshot::default()
            }
        };
        let removed = self.snapshot.word_counter.retain_valid();
        if removed > 0 {
            debug!(removed, "invalid words dropped from loaded counter");
        }

        let archive = open_archive(&self.archive_path)?;
        self.snapshot.merges = load_merges(&archive.conn)?;
        self.refresh(&archive.conn, true)
    }

    /// Counts new messages when the store has moved past the snapshot.
    /// Does nothing when already fresh.
    pub fn refresh_if_stale(&mut self) -> Result<RefreshReport, CoreError> {
        let archive = open_archive(&self.archive_path)?;
        self.refresh(&archive.conn, false)
    }

    fn refresh(&mut self, conn: &Connection, recompute_when_fresh: bool) -> Result<RefreshReport, CoreError> {
        let store_max = max_message_seq(conn)?;
        let previous = self.snapshot.last_msg_id;
        if store_max == previous {
            if recompute_when_fresh || self.homepage_dirty {
                self.recompute_homepage(conn)?;
            }
            debug!(high_water = previous, "analytics cache fresh");
            return Ok(RefreshReport::fresh(previous));
        }

        let rebuilt = store_max < previous;
        let after = if rebuilt {
            warn!(previous, store_max, "store max below snapshot high-water, rebuilding word counts");
            self.snapshot.word_counter = WordCounter::new();
            0
        } else {
            previous
        };

        let delta = compute_delta(&self.archive_path, after, store_max, &self.delta_options())?;
        if delta.failed_partitions > 0 {
            warn!(failed = delta.failed_partitions, partitions = delta.partitions, "some word count partitions failed");
        }
        self.snapshot.word_counter.merge(delta.counter);
        self.snapshot.word_counter.retain_valid();
        self.recompute_homepage(conn)?;
        self.snapshot.last_msg_id = store_max;
        save_snapshot(&self.snapshot_path, &self.snapshot)?;
        info!(
            previous,
            high_water = store_max,
            messages = delta.messages,
            words = self.snapshot.word_counter.len(),
            "analytics cache refreshed"
        );
        Ok(RefreshReport {
            state: CacheState::Stale,
            previous_high_water: previous,
            high_water: store_max,
            rebuilt,
            delta_messages: delta.messages,
            partitions: delta.partitions,
            failed_partitions: delta.failed_partitions,
            persisted: true,
        })
    }

    fn recompute_homepage(&mut self, conn: &Connection) -> Result<(), CoreError> {
        self.snapshot.homepage = compute_homepage(
            conn,
            &self.snapshot.word_counter,
            &self.snapshot.merges,
            self.options.transitive_merges,
            self.options.local_offset_hours,
        )?;
        self.homepage_dirty = false;
        Ok(())
    }

    /// The homepage bundle, recomputed first if a merge change made it stale.
    pub fn homepage_or_refresh(&mut self) -> Result<&HomepageBundle, CoreError> {
        if self.homepage_dirty {
            let archive = open_archive(&self.archive_path)?;
            self.recompute_homepage(&archive.conn)?;
        }
        Ok(&self.snapshot.homepage)
    }

    /// The id set every per-user aggregate must union for `user_id`.
    pub fn resolve_identity(&self, user_id: &str) -> Vec<String> {
        self.snapshot.merges.resolve_with(user_id, self.options.transitive_merges)
    }

    /// Whether merges expand to every descendant rather than one level.
    pub fn transitive_merges(&self) -> bool {
        self.options.transitive_merges
    }

    pub fn canonical_parent(&self, user_id: &str) -> Option<&str> {
        self.snapshot.merges.canonical_of(user_id)
    }

    /// The account whose profile shows `user_id`'s activity. A grandchild
    /// left without an owner by one-level resolution goes to its parent.
    pub fn profile_owner<'a>(&'a self, user_id: &'a str) -> &'a str {
        let merges = &self.snapshot.merges;
        merges
            .owner_of(user_id, self.options.transitive_merges)
            .or_else(|| merges.canonical_of(user_id))
            .unwrap_or(user_id)
    }

    pub fn merge_accounts(&mut self, conn: &mut Connection, target: &str, parent: &str) -> Result<(), CoreError> {
        self.snapshot.merges.validate_edge(target, parent)?;
        merges::insert_merge(conn, target, parent)?;
        self.snapshot.merges.insert(target, parent)?;
        self.homepage_dirty = true;
        Ok(())
    }

    pub fn unmerge(&mut self, conn: &Connection, target: &str) -> Result<bool, CoreError> {
        let removed = merges::remove_merge(conn, target)?;
        if self.snapshot.merges.remove(target).is_some() || removed {
            self.homepage_dirty = true;
        }
        Ok(removed)
    }

    pub fn approve_claim(&mut self, conn: &mut Connection, claim_id: i64) -> Result<ClaimRequest, CoreError> {
        let claim = claims::approve_claim(conn, claim_id)?;
        self.snapshot.merges.insert(&claim.target_id, &claim.requester_id)?;
        self.homepage_dirty = true;
        Ok(claim)
    }

    pub fn reset_all_claims(&mut self, conn: &mut Connection) -> Result<(usize, usize), CoreError> {
        let removed = claims::reset_claims(conn)?;
        self.snapshot.merges.clear();
        self.homepage_dirty = true;
        Ok(removed)
    }

    pub fn save(&self) -> Result<(), CoreError> {
        save_snapshot(&self.snapshot_path, &self.snapshot)
    }
}

/// `Ok(None)` when no snapshot file exists.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let snapshot: Snapshot = bincode::deserialize(&bytes)?;
    Ok(Some(snapshot))
}

/// Writes to a temp file beside `path`, then renames over it.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), CoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let temp = NamedTempFile::new_in(&dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        bincode::serialize_into(&mut writer, snapshot)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| CoreError::Io(e.error))?;
    debug!(path = %path.display(), high_water = snapshot.last_msg_id, "snapshot persisted");
    Ok(())
}
