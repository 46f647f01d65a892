use std::collections::HashMap;
use std::str::FromStr;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::config::DEFAULT_CHAR_BUDGET;
use crate::error::CoreError;
use crate::merges::MergeForest;
use crate::models::{
    ArchiveStats, DailyCount, EmojiCount, HourlyCount, InteractionPartner, LeaderboardEntry, MessageRow, OpenedThread,
    ThreadActivity, UserMessage, UserProfile, UserRef, UserReport, UserRow, WordWeight,
};
use crate::wordfreq::{count_words, format_word_cloud};

const MESSAGE_COLUMNS: &str = "m.message_id, m.thread_id, m.author_id, m.content, m.timestamp, m.reply_to_msg_id";

/// Messages feeding a per-user word cloud, newest first.
const WORD_CLOUD_MESSAGES: i64 = 2000;
const WORD_CLOUD_SIZE: usize = 50;

/// `?, ?, ?` for an `IN (...)` list.
pub(crate) fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(", ")
}

fn require_ids(ids: &[String]) -> Result<(), CoreError> {
    if ids.is_empty() {
        return Err(CoreError::InvalidArgument("id set must not be empty".to_string()));
    }
    Ok(())
}

fn message_from_row(row: &Row, start: usize) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message_id: row.get(start)?,
        thread_id: row.get(start + 1)?,
        author_id: row.get(start + 2)?,
        content: row.get(start + 3)?,
        timestamp: row.get(start + 4)?,
        reply_to_msg_id: row.get(start + 5)?,
    })
}

fn user_ref_from_row(row: &Row, start: usize) -> rusqlite::Result<UserRef> {
    Ok(UserRef {
        user_id: row.get(start)?,
        username: row.get(start + 1)?,
        nickname: row.get(start + 2)?,
        avatar_url: row.get(start + 3)?,
    })
}

fn emoji_from_row(row: &Row) -> rusqlite::Result<EmojiCount> {
    Ok(EmojiCount {
        emoji_name: row.get(0)?,
        emoji_url: row.get(1)?,
        count: row.get(2)?,
    })
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<UserRow, CoreError> {
    conn.query_row(
        "SELECT user_id, username, nickname, avatar_url, is_bot FROM users WHERE user_id = ?1;",
        params![user_id],
        |row| {
            Ok(UserRow {
                user_id: row.get(0)?,
                username: row.get(1)?,
                nickname: row.get(2)?,
                avatar_url: row.get(3)?,
                is_bot: row.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))
}

pub(crate) fn user_ref(conn: &Connection, user_id: &str) -> Result<Option<UserRef>, CoreError> {
    Ok(conn
        .query_row(
            "SELECT user_id, username, nickname, avatar_url FROM users WHERE user_id = ?1;",
            params![user_id],
            |row| user_ref_from_row(row, 0),
        )
        .optional()?)
}

/// Per-emoji reaction counts on one message.
pub fn emoji_breakdown(conn: &Connection, message_id: &str) -> Result<Vec<EmojiCount>, CoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT emoji_name, MAX(emoji_url), COUNT(*) AS c \
         FROM reactions \
         WHERE message_id = ?1 \
         GROUP BY emoji_name \
         ORDER BY c DESC, emoji_name ASC;",
    )?;
    let rows = stmt.query_map(params![message_id], emoji_from_row)?;
    Ok(rows.filter_map(Result::ok).collect())
}

/// Folds `HH` hour labels in UTC into 24 local-time buckets labelled `HH:00`.
pub fn hourly_buckets<I>(utc_hours: I, offset_hours: i64) -> Vec<HourlyCount>
where
    I: IntoIterator<Item = (Option<String>, i64)>,
{
    let mut buckets = [0i64; 24];
    for (hour, count) in utc_hours {
        let Some(hour) = hour.and_then(|h| h.parse::<i64>().ok()) else {
            continue;
        };
        if !(0..24).contains(&hour) {
            continue;
        }
        buckets[(hour + offset_hours).rem_euclid(24) as usize] += count;
    }
    buckets
        .iter()
        .enumerate()
        .map(|(hour, count)| HourlyCount {
            hour: format!("{hour:02}:00"),
            count: *count,
        })
        .collect()
}

pub fn archive_stats(conn: &Connection) -> Result<ArchiveStats, CoreError> {
    let count = |table: &str| -> Result<i64, CoreError> {
        Ok(conn.query_row(&format!("SELECT COUNT(1) FROM {table};"), [], |row| row.get(0))?)
    };
    Ok(ArchiveStats {
        threads: count("threads")?,
        messages: count("messages")?,
        users: count("users")?,
        reactions: count("reactions")?,
        attachments: count("attachments")?,
        mentions: count("mentions")?,
    })
}

/// Message totals per owning account, highest first. Merged accounts are
/// folded into their owner (see [`MergeForest::owner_of`]) and never ranked
/// on their own.
pub(crate) fn ranked_owners(
    conn: &Connection,
    merges: &MergeForest,
    transitive: bool,
) -> Result<Vec<(String, i64)>, CoreError> {
    let mut stmt = conn.prepare("SELECT author_id, COUNT(*) FROM messages GROUP BY author_id;")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut totals: HashMap<String, i64> = HashMap::new();
    for (author_id, count) in rows.filter_map(Result::ok) {
        if let Some(owner) = merges.owner_of(&author_id, transitive) {
            *totals.entry(owner.to_string()).or_insert(0) += count;
        }
    }
    let mut ranked: Vec<(String, i64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(ranked)
}

/// Users ranked by message count, attributed through `merges` the same way
/// profiles resolve their id sets.
pub fn leaderboard(
    conn: &Connection,
    merges: &MergeForest,
    transitive: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<LeaderboardEntry>, CoreError> {
    let limit = usize::try_from(limit).unwrap_or(0);
    let offset = usize::try_from(offset).unwrap_or(0);
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (user_id, msg_count) in ranked_owners(conn, merges, transitive)? {
        if entries.len() >= limit {
            break;
        }
        let Some(user) = user_ref(conn, &user_id)? else {
            continue;
        };
        if skipped < offset {
            skipped += 1;
            continue;
        }
        let ids = merges.resolve_with(&user_id, transitive);
        let top_emoji_urls = top_emojis_received(conn, &ids, 3)?
            .into_iter()
            .filter_map(|emoji| emoji.emoji_url)
            .collect();
        entries.push(LeaderboardEntry {
            user,
            msg_count,
            top_emoji_urls,
        });
    }
    Ok(entries)
}

/// Exact id match or a substring of username/nickname, at most 20 rows.
pub fn search_users(conn: &Connection, query: &str) -> Result<Vec<UserRow>, CoreError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("%{query}%");
    let mut stmt = conn.prepare(
        "SELECT user_id, username, nickname, avatar_url, is_bot \
         FROM users \
         WHERE user_id = ?1 OR username LIKE ?2 OR nickname LIKE ?2 \
         ORDER BY (user_id = ?1) DESC, username ASC \
         LIMIT 20;",
    )?;
    let rows = stmt.query_map(params![query, pattern], |row| {
        Ok(UserRow {
            user_id: row.get(0)?,
            username: row.get(1)?,
            nickname: row.get(2)?,
            avatar_url: row.get(3)?,
            is_bot: row.get::<_, i64>(4)? != 0,
        })
    })?;
    Ok(rows.filter_map(Result::ok).collect())
}

pub fn message_count(conn: &Connection, ids: &[String]) -> Result<i64, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT COUNT(*) FROM messages WHERE author_id IN ({});",
        placeholders(ids.len())
    );
    Ok(conn.query_row(&sql, params_from_iter(ids.iter()), |row| row.get(0))?)
}

pub fn reactions_received(conn: &Connection, ids: &[String]) -> Result<i64, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT COUNT(*) FROM reactions r JOIN messages m ON m.message_id = r.message_id \
         WHERE m.author_id IN ({});",
        placeholders(ids.len())
    );
    Ok(conn.query_row(&sql, params_from_iter(ids.iter()), |row| row.get(0))?)
}

pub fn top_emojis_given(conn: &Connection, ids: &[String], limit: i64) -> Result<Vec<EmojiCount>, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT emoji_name, MAX(emoji_url), COUNT(*) AS c \
         FROM reactions \
         WHERE user_id IN ({}) \
         GROUP BY emoji_name \
         ORDER BY c DESC, emoji_name ASC \
         LIMIT {limit};",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), emoji_from_row)?;
    Ok(rows.filter_map(Result::ok).collect())
}

pub fn top_emojis_received(conn: &Connection, ids: &[String], limit: i64) -> Result<Vec<EmojiCount>, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT r.emoji_name, MAX(r.emoji_url), COUNT(*) AS c \
         FROM reactions r \
         JOIN messages m ON m.message_id = r.message_id \
         WHERE m.author_id IN ({}) \
         GROUP BY r.emoji_name \
         ORDER BY c DESC, r.emoji_name ASC \
         LIMIT {limit};",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), emoji_from_row)?;
    Ok(rows.filter_map(Result::ok).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Others mentioning the user or reacting to the user's messages.
    Incoming,
    /// The user mentioning others or reacting to their messages.
    Outgoing,
}

/// Partners ranked by mentions plus reactions in the given direction. Ids in
/// the set never appear as their own partner.
pub fn interaction_partners(
    conn: &Connection,
    ids: &[String],
    direction: Direction,
    limit: i64,
) -> Result<Vec<InteractionPartner>, CoreError> {
    require_ids(ids)?;
    let ph = placeholders(ids.len());
    let raw = match direction {
        Direction::Incoming => format!(
            "SELECT author_id AS partner FROM mentions WHERE mentioned_user_id IN ({ph}) \
             UNION ALL \
             SELECT r.user_id AS partner FROM reactions r JOIN messages m ON m.message_id = r.message_id \
             WHERE m.author_id IN ({ph})"
        ),
        Direction::Outgoing => format!(
            "SELECT mentioned_user_id AS partner FROM mentions WHERE author_id IN ({ph}) \
             UNION ALL \
             SELECT m.author_id AS partner FROM reactions r JOIN messages m ON m.message_id = r.message_id \
             WHERE r.user_id IN ({ph})"
        ),
    };
    let sql = format!(
        "SELECT u.user_id, u.username, u.nickname, u.avatar_url, COUNT(*) AS score \
         FROM ({raw}) raw \
         JOIN users u ON u.user_id = raw.partner \
         WHERE u.user_id NOT IN ({ph}) \
         GROUP BY u.user_id \
         ORDER BY score DESC, u.user_id ASC \
         LIMIT {limit};"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter().chain(ids).chain(ids)), |row| {
        Ok(InteractionPartner {
            user: user_ref_from_row(row, 0)?,
            score: row.get(4)?,
        })
    })?;
    Ok(rows.filter_map(Result::ok).collect())
}

pub fn daily_activity(conn: &Connection, ids: &[String]) -> Result<Vec<DailyCount>, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT substr(timestamp, 1, 10) AS day, COUNT(*) \
         FROM messages \
         WHERE author_id IN ({}) AND timestamp IS NOT NULL \
         GROUP BY day \
         ORDER BY day;",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok(DailyCount {
            day: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    Ok(rows.filter_map(Result::ok).collect())
}

pub fn hourly_activity(conn: &Connection, ids: &[String], offset_hours: i64) -> Result<Vec<HourlyCount>, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT strftime('%H', timestamp) AS hour, COUNT(*) \
         FROM messages \
         WHERE author_id IN ({}) \
         GROUP BY hour;",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
    })?;
    Ok(hourly_buckets(rows.filter_map(Result::ok), offset_hours))
}

/// Word cloud over the newest messages of the id set.
pub fn user_word_cloud(conn: &Connection, ids: &[String]) -> Result<Vec<WordWeight>, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT content FROM messages \
         WHERE author_id IN ({}) AND content IS NOT NULL \
         ORDER BY timestamp DESC, seq DESC \
         LIMIT {WORD_CLOUD_MESSAGES};",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, String>(0))?;
    let texts: Vec<String> = rows.filter_map(Result::ok).collect();
    Ok(format_word_cloud(&count_words(texts, DEFAULT_CHAR_BUDGET), Some(WORD_CLOUD_SIZE)))
}

pub fn user_profile(conn: &Connection, ids: &[String], user_id: &str, offset_hours: i64) -> Result<UserProfile, CoreError> {
    require_ids(ids)?;
    let user = get_user(conn, user_id)?;
    Ok(UserProfile {
        user,
        merged_ids: ids.to_vec(),
        msg_count: message_count(conn, ids)?,
        reaction_received_count: reactions_received(conn, ids)?,
        top_emojis_given: top_emojis_given(conn, ids, 8)?,
        top_emojis_received: top_emojis_received(conn, ids, 8)?,
        interactions_incoming: interaction_partners(conn, ids, Direction::Incoming, 5)?,
        interactions_outgoing: interaction_partners(conn, ids, Direction::Outgoing, 5)?,
        chart_daily: daily_activity(conn, ids)?,
        chart_hourly: hourly_activity(conn, ids, offset_hours)?,
        word_cloud: user_word_cloud(conn, ids)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageSort {
    /// Most reactions first.
    #[default]
    Hot,
    Newest,
}

impl FromStr for MessageSort {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hot" => Ok(MessageSort::Hot),
            "new" | "newest" => Ok(MessageSort::Newest),
            other => Err(CoreError::InvalidArgument(format!("unknown sort: {other}"))),
        }
    }
}

fn user_messages_where(
    conn: &Connection,
    ids: &[String],
    extra_filter: &str,
    order: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<UserMessage>, CoreError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}, t.name, \
           (SELECT COUNT(*) FROM reactions r WHERE r.message_id = m.message_id) AS total_reactions \
         FROM messages m \
         LEFT JOIN threads t ON t.thread_id = m.thread_id \
         WHERE m.author_id IN ({}) {extra_filter} \
         ORDER BY {order} \
         LIMIT {limit} OFFSET {offset};",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((message_from_row(row, 0)?, row.get::<_, Option<String>>(6)?, row.get::<_, i64>(7)?))
    })?;
    let mut messages = Vec::new();
    for (message, thread_name, total_reactions) in rows.filter_map(Result::ok) {
        let detailed_reactions = emoji_breakdown(conn, &message.message_id)?;
        messages.push(UserMessage {
            message,
            thread_name,
            total_reactions,
            detailed_reactions,
        });
    }
    Ok(messages)
}

pub fn user_messages(
    conn: &Connection,
    ids: &[String],
    sort: MessageSort,
    limit: i64,
    offset: i64,
) -> Result<Vec<UserMessage>, CoreError> {
    require_ids(ids)?;
    let order = match sort {
        MessageSort::Hot => "total_reactions DESC, m.timestamp DESC, m.seq DESC",
        MessageSort::Newest => "m.timestamp DESC, m.seq DESC",
    };
    user_messages_where(conn, ids, "", order, limit, offset)
}

/// Threads whose first message was written by the id set, most replied first.
pub fn user_threads(conn: &Connection, ids: &[String], limit: i64, offset: i64) -> Result<Vec<OpenedThread>, CoreError> {
    require_ids(ids)?;
    let sql = format!(
        "SELECT t.thread_id, t.name, m.timestamp, \
           (SELECT COUNT(*) FROM messages c WHERE c.thread_id = t.thread_id) AS reply_count, \
           m.content, m.message_id \
         FROM threads t \
         JOIN messages m ON m.thread_id = t.thread_id \
         WHERE m.author_id IN ({}) \
           AND m.seq = (SELECT MIN(f.seq) FROM messages f WHERE f.thread_id = t.thread_id) \
         ORDER BY reply_count DESC, t.thread_id ASC \
         LIMIT ?{} OFFSET ?{};",
        placeholders(ids.len()),
        ids.len() + 1,
        ids.len() + 2
    );
    let mut params_vec: Vec<rusqlite::types::Value> = ids.iter().cloned().map(|v| v.into()).collect();
    params_vec.push(limit.into());
    params_vec.push(offset.into());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params_vec), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;
    let mut threads = Vec::new();
    for (thread_id, name, created_at, reply_count, first_content, opener_id) in rows.filter_map(Result::ok) {
        let top_emoji = emoji_breakdown(conn, &opener_id)?.into_iter().next();
        threads.push(OpenedThread {
            thread_id,
            name,
            created_at,
            reply_count,
            first_content,
            top_emoji,
        });
    }
    Ok(threads)
}

/// Year-in-review style summary for one (possibly merged) account.
pub fn user_report(conn: &Connection, ids: &[String], user_id: &str, offset_hours: i64) -> Result<UserReport, CoreError> {
    require_ids(ids)?;
    let ph = placeholders(ids.len());

    let join_date: Option<String> = conn.query_row(
        &format!("SELECT MIN(timestamp) FROM messages WHERE author_id IN ({ph});"),
        params_from_iter(ids.iter()),
        |row| row.get(0),
    )?;
    let join_date = join_date.map(|ts| ts.chars().take(10).collect());

    let most_active_day = conn
        .query_row(
            &format!(
                "SELECT substr(timestamp, 1, 10) AS day, COUNT(*) AS c FROM messages \
                 WHERE author_id IN ({ph}) AND timestamp IS NOT NULL \
                 GROUP BY day ORDER BY c DESC, day ASC LIMIT 1;"
            ),
            params_from_iter(ids.iter()),
            |row| {
                Ok(DailyCount {
                    day: row.get(0)?,
                    count: row.get(1)?,
                })
            },
        )
        .optional()?;

    // Late night in local time; the hours are UTC in the store.
    let late_hours = late_night_utc_hours(offset_hours);
    let latest_late_msg = user_messages_where(
        conn,
        ids,
        &format!("AND strftime('%H', m.timestamp) IN ({late_hours})"),
        "m.timestamp DESC, m.seq DESC",
        1,
        0,
    )?
    .into_iter()
    .next();

    let most_replied_thread = user_threads(conn, ids, 1, 0)?.into_iter().next().map(|t| ThreadActivity {
        thread_id: t.thread_id,
        name: t.name,
        count: t.reply_count,
    });

    let most_active_topic = conn
        .query_row(
            &format!(
                "SELECT t.thread_id, t.name, COUNT(*) AS c \
                 FROM messages m JOIN threads t ON t.thread_id = m.thread_id \
                 WHERE m.author_id IN ({ph}) \
                 GROUP BY t.thread_id ORDER BY c DESC, t.thread_id ASC LIMIT 1;"
            ),
            params_from_iter(ids.iter()),
            |row| {
                Ok(ThreadActivity {
                    thread_id: row.get(0)?,
                    name: row.get(1)?,
                    count: row.get(2)?,
                })
            },
        )
        .optional()?;

    let most_liked_msg = user_messages(conn, ids, MessageSort::Hot, 1, 0)?
        .into_iter()
        .find(|m| m.total_reactions > 0);

    Ok(UserReport {
        user_id: user_id.to_string(),
        join_date,
        most_active_day,
        latest_late_msg,
        most_replied_thread,
        most_active_topic,
        most_liked_msg,
        top_friend_incoming: interaction_partners(conn, ids, Direction::Incoming, 1)?.into_iter().next(),
        top_friend_outgoing: interaction_partners(conn, ids, Direction::Outgoing, 1)?.into_iter().next(),
        word_cloud: user_word_cloud(conn, ids)?,
    })
}

/// Quoted UTC hour labels covering local 00:00 to 05:59.
fn late_night_utc_hours(offset_hours: i64) -> String {
    (0..6)
        .map(|local| format!("'{:02}'", (local - offset_hours).rem_euclid(24)))
        .collect::<Vec<_>>()
        .join(",")
}
