use std::collections::{HashMap, HashSet};

use rusqlite::{params, Transaction};

use super::export::ExportUser;
use crate::error::CoreError;
use crate::models::{MessageRow, ThreadRow, UserRow};

struct AttachmentRow {
    message_id: String,
    url: Option<String>,
    filename: Option<String>,
    size_bytes: Option<i64>,
}

struct ReactionRow {
    message_id: String,
    user_id: String,
    emoji_name: Option<String>,
    emoji_url: Option<String>,
}

struct MentionRow {
    message_id: String,
    mentioned_user_id: String,
    author_id: String,
}

/// Rows committed by a single flush.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct FlushCounts {
    pub threads: i64,
    pub messages: i64,
    pub duplicate_messages: i64,
    pub attachments: i64,
    pub reactions: i64,
    pub mentions: i64,
}

/// Rows buffered between flushes. Users are keyed by id so the last
/// occurrence in a batch wins before the upsert runs.
#[derive(Default)]
pub(super) struct ImportBatch {
    users: HashMap<String, UserRow>,
    threads: Vec<(ThreadRow, Option<String>)>,
    messages: Vec<(i64, MessageRow)>,
    message_ids: HashSet<String>,
    attachments: Vec<AttachmentRow>,
    reactions: Vec<ReactionRow>,
    mentions: Vec<MentionRow>,
}

impl ImportBatch {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.threads.is_empty() && self.messages.is_empty()
    }

    /// Buffers the user and returns its id, or `None` when it has none.
    pub fn push_user(&mut self, user: &ExportUser) -> Option<String> {
        let user_id = user.id.clone()?;
        let incoming = UserRow {
            user_id: user_id.clone(),
            username: user.name.clone(),
            nickname: user.nickname.clone(),
            avatar_url: user.avatar_url.clone(),
            is_bot: user.is_bot.unwrap_or(false),
        };
        match self.users.get_mut(&user_id) {
            Some(existing) => {
                if incoming.username.is_some() {
                    existing.username = incoming.username;
                }
                if incoming.nickname.is_some() {
                    existing.nickname = incoming.nickname;
                }
                if incoming.avatar_url.is_some() {
                    existing.avatar_url = incoming.avatar_url;
                }
                existing.is_bot = incoming.is_bot;
            }
            None => {
                self.users.insert(user_id.clone(), incoming);
            }
        }
        Some(user_id)
    }

    pub fn push_thread(&mut self, thread: ThreadRow, guild_id: Option<String>) {
        self.threads.push((thread, guild_id));
    }

    /// Returns false, buffering nothing, when the id is already in this batch.
    pub fn push_message(&mut self, seq: i64, message: MessageRow) -> bool {
        if !self.message_ids.insert(message.message_id.clone()) {
            return false;
        }
        self.messages.push((seq, message));
        true
    }

    pub fn push_attachment(&mut self, message_id: &str, url: Option<String>, filename: Option<String>, size_bytes: Option<i64>) {
        self.attachments.push(AttachmentRow {
            message_id: message_id.to_string(),
            url,
            filename,
            size_bytes,
        });
    }

    pub fn push_reaction(&mut self, message_id: &str, user_id: String, emoji_name: Option<String>, emoji_url: Option<String>) {
        self.reactions.push(ReactionRow {
            message_id: message_id.to_string(),
            user_id,
            emoji_name,
            emoji_url,
        });
    }

    pub fn push_mention(&mut self, message_id: &str, mentioned_user_id: String, author_id: &str) {
        self.mentions.push(MentionRow {
            message_id: message_id.to_string(),
            mentioned_user_id,
            author_id: author_id.to_string(),
        });
    }

    /// Writes every buffered row in dependency order and empties the batch.
    /// Children of a message already in the store are dropped with it.
    pub fn flush(&mut self, tx: &Transaction) -> Result<FlushCounts, CoreError> {
        let mut counts = FlushCounts::default();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO users (user_id, username, nickname, avatar_url, is_bot)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                   username = COALESCE(excluded.username, users.username),
                   nickname = COALESCE(excluded.nickname, users.nickname),
                   avatar_url = COALESCE(excluded.avatar_url, users.avatar_url),
                   is_bot = excluded.is_bot;",
            )?;
            for user in self.users.values() {
                stmt.execute(params![
                    user.user_id,
                    user.username,
                    user.nickname,
                    user.avatar_url,
                    user.is_bot as i64
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO threads (thread_id, category_id, name, exported_at, guild_id)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for (thread, guild_id) in &self.threads {
                counts.threads += stmt.execute(params![
                    thread.thread_id,
                    thread.category_id,
                    thread.name,
                    thread.exported_at,
                    guild_id
                ])? as i64;
            }
        }

        let mut duplicates: HashSet<&str> = HashSet::new();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO messages (seq, message_id, thread_id, author_id, content, timestamp, reply_to_msg_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )?;
            for (seq, msg) in &self.messages {
                let inserted = stmt.execute(params![
                    seq,
                    msg.message_id,
                    msg.thread_id,
                    msg.author_id,
                    msg.content,
                    msg.timestamp,
                    msg.reply_to_msg_id
                ])?;
                if inserted == 0 {
                    duplicates.insert(msg.message_id.as_str());
                } else {
                    counts.messages += 1;
                }
            }
        }
        counts.duplicate_messages = duplicates.len() as i64;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO attachments (message_id, url, filename, size_bytes) VALUES (?1, ?2, ?3, ?4);",
            )?;
            for row in self.attachments.iter().filter(|r| !duplicates.contains(r.message_id.as_str())) {
                stmt.execute(params![row.message_id, row.url, row.filename, row.size_bytes])?;
                counts.attachments += 1;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO reactions (message_id, user_id, emoji_name, emoji_url) VALUES (?1, ?2, ?3, ?4);",
            )?;
            for row in self.reactions.iter().filter(|r| !duplicates.contains(r.message_id.as_str())) {
                stmt.execute(params![row.message_id, row.user_id, row.emoji_name, row.emoji_url])?;
                counts.reactions += 1;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO mentions (message_id, mentioned_user_id, author_id) VALUES (?1, ?2, ?3);",
            )?;
            for row in self.mentions.iter().filter(|r| !duplicates.contains(r.message_id.as_str())) {
                stmt.execute(params![row.message_id, row.mentioned_user_id, row.author_id])?;
                counts.mentions += 1;
            }
        }

        drop(duplicates);
        self.clear();
        Ok(counts)
    }

    fn clear(&mut self) {
        self.users.clear();
        self.threads.clear();
        self.messages.clear();
        self.message_ids.clear();
        self.attachments.clear();
        self.reactions.clear();
        self.mentions.clear();
    }
}
