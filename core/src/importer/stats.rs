use rusqlite::Connection;
use tracing::debug;

use crate::db::ensure_indexes;
use crate::error::CoreError;

/// Builds secondary indexes and the per-user summary table from the loaded
/// rows. Runs once, after the last flush.
pub(super) fn finalize_archive<F>(conn: &mut Connection, progress: &F) -> Result<i64, CoreError>
where
    F: Fn(&str),
{
    progress("Building indexes...");
    ensure_indexes(conn)?;

    progress("Computing user statistics...");
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM user_stats;", [])?;
    let users = tx.execute(
        "INSERT OR REPLACE INTO user_stats (user_id, msg_count, first_msg_at, last_msg_at)
         SELECT author_id, COUNT(*), MIN(timestamp), MAX(timestamp)
         FROM messages
         GROUP BY author_id;",
        [],
    )?;
    tx.execute(
        "UPDATE user_stats SET reaction_received_count = (
           SELECT COUNT(r.id)
           FROM messages m
           JOIN reactions r ON r.message_id = m.message_id
           WHERE m.author_id = user_stats.user_id
         );",
        [],
    )?;
    tx.commit()?;
    debug!(users, "user statistics rebuilt");
    Ok(users as i64)
}
