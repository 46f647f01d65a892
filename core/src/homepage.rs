//! Server-wide aggregates shown on the landing page.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::CoreError;
use crate::merges::MergeForest;
use crate::models::{DailyCount, EmojiCount, HomepageBundle, HotMessage, MessageRow, ThreadRow, TopThread, TopUser};
use crate::query::{emoji_breakdown, hourly_buckets, ranked_owners, top_emojis_received, user_ref};
use crate::wordfreq::{format_word_cloud, WordCounter};

pub const TOP_USERS: usize = 12;
pub const TOP_USER_EMOJIS: i64 = 5;
pub const TOP_THREADS: i64 = 10;
pub const TOP_HOT_MESSAGES: i64 = 10;
pub const WORD_CLOUD_SIZE: usize = 60;
pub const WORD_RANK_SIZE: usize = 15;

/// `merges` and `transitive` attribute messages to accounts exactly as
/// profile pages resolve them.
pub fn compute_homepage(
    conn: &Connection,
    words: &WordCounter,
    merges: &MergeForest,
    transitive: bool,
    offset_hours: i64,
) -> Result<HomepageBundle, CoreError> {
    let server_word_cloud = format_word_cloud(words, Some(WORD_CLOUD_SIZE));
    let server_word_rank = server_word_cloud.iter().take(WORD_RANK_SIZE).cloned().collect();
    let count = |sql: &str| -> Result<i64, CoreError> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

    let bundle = HomepageBundle {
        total_msgs: count("SELECT COUNT(*) FROM messages;")?,
        total_threads: count("SELECT COUNT(*) FROM threads;")?,
        total_users: count("SELECT COUNT(*) FROM users;")?,
        chart_daily: daily_chart(conn)?,
        chart_hourly: {
            let mut stmt = conn.prepare("SELECT strftime('%H', timestamp) AS hour, COUNT(*) FROM messages GROUP BY hour;")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)))?;
            hourly_buckets(rows.filter_map(Result::ok), offset_hours)
        },
        top_users: top_users(conn, merges, transitive)?,
        top_threads: top_threads(conn)?,
        top_hot_msgs: top_hot_messages(conn)?,
        server_word_cloud,
        server_word_rank,
    };
    debug!(
        messages = bundle.total_msgs,
        top_users = bundle.top_users.len(),
        words = bundle.server_word_cloud.len(),
        "homepage aggregates computed"
    );
    Ok(bundle)
}

fn daily_chart(conn: &Connection) -> Result<Vec<DailyCount>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT substr(timestamp, 1, 10) AS day, COUNT(*) \
         FROM messages \
         WHERE timestamp IS NOT NULL \
         GROUP BY day \
         ORDER BY day;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(DailyCount {
            day: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    Ok(rows.filter_map(Result::ok).collect())
}

/// Ranked through the merge forest, so a merged account never appears on
/// its own.
fn top_users(conn: &Connection, merges: &MergeForest, transitive: bool) -> Result<Vec<TopUser>, CoreError> {
    let mut users = Vec::new();
    for (user_id, msg_count) in ranked_owners(conn, merges, transitive)? {
        if users.len() >= TOP_USERS {
            break;
        }
        let Some(user) = user_ref(conn, &user_id)? else {
            continue;
        };
        let ids = merges.resolve_with(&user_id, transitive);
        users.push(TopUser {
            user,
            msg_count,
            top_emojis: top_emojis_received(conn, &ids, TOP_USER_EMOJIS)?,
        });
    }
    Ok(users)
}

fn top_threads(conn: &Connection) -> Result<Vec<TopThread>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.thread_id, t.category_id, t.name, t.exported_at, COUNT(*) AS c \
         FROM messages m \
         JOIN threads t ON t.thread_id = m.thread_id \
         GROUP BY t.thread_id \
         ORDER BY c DESC, t.thread_id ASC \
         LIMIT ?1;",
    )?;
    let rows = stmt.query_map(params![TOP_THREADS], |row| {
        Ok((
            ThreadRow {
                thread_id: row.get(0)?,
                category_id: row.get(1)?,
                name: row.get(2)?,
                exported_at: row.get(3)?,
            },
            row.get::<_, i64>(4)?,
        ))
    })?;
    let ranked: Vec<(ThreadRow, i64)> = rows.filter_map(Result::ok).collect();

    let mut threads = Vec::with_capacity(ranked.len());
    for (thread, msg_count) in ranked {
        let opener: Option<String> = conn
            .query_row(
                "SELECT author_id FROM messages WHERE thread_id = ?1 ORDER BY seq ASC LIMIT 1;",
                params![thread.thread_id],
                |row| row.get(0),
            )
            .optional()?;
        let op_user = match opener {
            Some(author_id) => user_ref(conn, &author_id)?,
            None => None,
        };
        let top_emoji = thread_top_emoji(conn, &thread.thread_id)?;
        threads.push(TopThread {
            thread,
            msg_count,
            op_user,
            top_emoji,
        });
    }
    Ok(threads)
}

fn thread_top_emoji(conn: &Connection, thread_id: &str) -> Result<Option<EmojiCount>, CoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT r.emoji_name, MAX(r.emoji_url), COUNT(*) AS c \
         FROM reactions r \
         JOIN messages m ON m.message_id = r.message_id \
         WHERE m.thread_id = ?1 \
         GROUP BY r.emoji_name \
         ORDER BY c DESC, r.emoji_name ASC \
         LIMIT 1;",
    )?;
    let mut rows = stmt.query_map(params![thread_id], |row| {
        Ok(EmojiCount {
            emoji_name: row.get(0)?,
            emoji_url: row.get(1)?,
            count: row.get(2)?,
        })
    })?;
    let top = rows.next().transpose()?;
    Ok(top)
}

fn top_hot_messages(conn: &Connection) -> Result<Vec<HotMessage>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT m.message_id, m.thread_id, m.author_id, m.content, m.timestamp, m.reply_to_msg_id, \
                t.name, hot.c \
         FROM ( \
           SELECT message_id, COUNT(*) AS c FROM reactions GROUP BY message_id \
           ORDER BY c DESC, message_id ASC LIMIT ?1 \
         ) hot \
         JOIN messages m ON m.message_id = hot.message_id \
         LEFT JOIN threads t ON t.thread_id = m.thread_id \
         ORDER BY hot.c DESC, m.seq ASC;",
    )?;
    let rows = stmt.query_map(params![TOP_HOT_MESSAGES], |row| {
        Ok((
            MessageRow {
                message_id: row.get(0)?,
                thread_id: row.get(1)?,
                author_id: row.get(2)?,
                content: row.get(3)?,
                timestamp: row.get(4)?,
                reply_to_msg_id: row.get(5)?,
            },
            row.get::<_, Option<String>>(6)?,
            row.get::<_, i64>(7)?,
        ))
    })?;
    let ranked: Vec<(MessageRow, Option<String>, i64)> = rows.filter_map(Result::ok).collect();

    let mut messages = Vec::with_capacity(ranked.len());
    for (message, thread_name, total_reactions) in ranked {
        let author = user_ref(conn, &message.author_id)?;
        let detailed_reactions = emoji_breakdown(conn, &message.message_id)?;
        messages.push(HotMessage {
            message,
            author,
            thread_name,
            total_reactions,
            detailed_reactions,
        });
    }
    Ok(messages)
}
