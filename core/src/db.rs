use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::migrations::{MIGRATIONS, SECONDARY_INDEXES};

pub struct ArchiveDb {
    pub path: PathBuf,
    pub conn: Connection,
}

pub fn open_archive(path: impl AsRef<Path>) -> Result<ArchiveDb, CoreError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(&path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA journal_size_limit = 67108864; \
         PRAGMA temp_store = MEMORY;",
    )?;
    apply_migrations(&conn)?;
    conn.execute(
        "UPDATE imports \
         SET status = 'failed', \
             stats_json = COALESCE(stats_json, '{\"error\":\"import interrupted\"}') \
         WHERE status = 'running';",
        [],
    )?;
    Ok(ArchiveDb { path, conn })
}

/// Read-only handle for worker threads. Each worker owns one.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Connection, CoreError> {
    let conn = Connection::open_with_flags(
        path.as_ref(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

pub fn apply_migrations(conn: &Connection) -> Result<(), CoreError> {
    let current_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let mut version = current_version as usize;
    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let next_version = idx + 1;
        if next_version <= version {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", next_version))?;
        version = next_version;
    }
    Ok(())
}

pub fn ensure_indexes(conn: &Connection) -> Result<(), CoreError> {
    for sql in SECONDARY_INDEXES {
        conn.execute_batch(sql)?;
    }
    debug!(count = SECONDARY_INDEXES.len(), "secondary indexes ensured");
    Ok(())
}

/// Deletes the archive and its WAL side files. Re-import rebuilds from zero.
pub fn reset_archive(path: &Path) -> Result<(), CoreError> {
    let mut removed = 0;
    for suffix in ["", "-wal", "-shm"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            fs::remove_file(&candidate)?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!(path = %path.display(), "discarded existing archive");
    }
    Ok(())
}

/// Highest numeric message id in the store, 0 when empty.
pub fn max_message_seq(conn: &Connection) -> Result<i64, CoreError> {
    let max: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM messages;", [], |row| row.get(0))?;
    Ok(max)
}
