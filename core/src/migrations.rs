pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS imports (
      id TEXT PRIMARY KEY,
      imported_at INTEGER NOT NULL,
      source_filename TEXT NOT NULL,
      status TEXT NOT NULL,
      stats_json TEXT
    );

    CREATE TABLE IF NOT EXISTS users (
      user_id TEXT PRIMARY KEY,
      username TEXT,
      nickname TEXT,
      avatar_url TEXT,
      is_bot INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS threads (
      thread_id TEXT PRIMARY KEY,
      category_id TEXT,
      name TEXT,
      exported_at TEXT,
      guild_id TEXT
    );

    CREATE TABLE IF NOT EXISTS messages (
      seq INTEGER PRIMARY KEY,
      message_id TEXT NOT NULL UNIQUE,
      thread_id TEXT NOT NULL REFERENCES threads(thread_id),
      author_id TEXT NOT NULL REFERENCES users(user_id),
      content TEXT,
      timestamp TEXT,
      reply_to_msg_id TEXT
    );

    CREATE TABLE IF NOT EXISTS attachments (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      message_id TEXT NOT NULL REFERENCES messages(message_id),
      url TEXT,
      filename TEXT,
      size_bytes INTEGER
    );

    CREATE TABLE IF NOT EXISTS reactions (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      message_id TEXT NOT NULL REFERENCES messages(message_id),
      user_id TEXT NOT NULL REFERENCES users(user_id),
      emoji_name TEXT,
      emoji_url TEXT
    );

    CREATE TABLE IF NOT EXISTS mentions (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      message_id TEXT NOT NULL REFERENCES messages(message_id),
      mentioned_user_id TEXT NOT NULL REFERENCES users(user_id),
      author_id TEXT NOT NULL REFERENCES users(user_id)
    );

    CREATE TABLE IF NOT EXISTS user_stats (
      user_id TEXT PRIMARY KEY,
      msg_count INTEGER NOT NULL DEFAULT 0,
      reaction_received_count INTEGER NOT NULL DEFAULT 0,
      first_msg_at TEXT,
      last_msg_at TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_merges (
      target_id TEXT PRIMARY KEY,
      parent_id TEXT NOT NULL,
      created_at TEXT NOT NULL,
      CHECK (target_id <> parent_id)
    );

    CREATE INDEX IF NOT EXISTS idx_user_merges_parent ON user_merges(parent_id);

    CREATE TABLE IF NOT EXISTS claim_requests (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      requester_id TEXT NOT NULL,
      target_id TEXT NOT NULL,
      target_name TEXT,
      status INTEGER NOT NULL DEFAULT 0,
      created_at TEXT NOT NULL,
      UNIQUE (requester_id, target_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS web_visitors (
      user_id TEXT PRIMARY KEY,
      username TEXT,
      nickname TEXT,
      avatar_url TEXT,
      last_visit TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS profile_views (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      target_user_id TEXT NOT NULL,
      viewer_user_id TEXT NOT NULL,
      viewer_name TEXT,
      viewer_avatar TEXT,
      viewed_at TEXT NOT NULL,
      UNIQUE (target_user_id, viewer_user_id)
    );

    CREATE INDEX IF NOT EXISTS idx_profile_views_target ON profile_views(target_user_id, viewed_at);
    "#,
];

/// Built after bulk load rather than in a migration; inserting into indexed
/// tables is much slower for multi-million row imports.
pub const SECONDARY_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_msg_author ON messages(author_id);",
    "CREATE INDEX IF NOT EXISTS idx_msg_timestamp ON messages(timestamp);",
    "CREATE INDEX IF NOT EXISTS idx_msg_thread ON messages(thread_id);",
    "CREATE INDEX IF NOT EXISTS idx_react_user ON reactions(user_id);",
    "CREATE INDEX IF NOT EXISTS idx_react_msg ON reactions(message_id);",
    "CREATE INDEX IF NOT EXISTS idx_mention_target ON mentions(mentioned_user_id);",
    "CREATE INDEX IF NOT EXISTS idx_mention_author ON mentions(author_id);",
    "CREATE INDEX IF NOT EXISTS idx_stats_count ON user_stats(msg_count);",
];
