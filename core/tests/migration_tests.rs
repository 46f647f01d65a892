mod common;

use common::count;
use guild_archive_core::open_archive;
use rusqlite::params;
use tempfile::tempdir;

#[test]
fn fresh_archive_is_at_latest_schema() {
    let tmp = tempdir().expect("temp");
    let db = open_archive(tmp.path().join("nested").join("guild.sqlite")).expect("open");
    assert_eq!(count(&db.conn, "PRAGMA user_version;"), 3);
    for table in ["imports", "user_stats", "attachments", "user_merges", "claim_requests", "web_visitors", "profile_views"] {
        let sql = format!("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}';");
        assert_eq!(count(&db.conn, &sql), 1, "missing table {table}");
    }
    let mode: String = db
        .conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("journal mode");
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn reopening_does_not_reapply_migrations() {
    let tmp = tempdir().expect("temp");
    let path = tmp.path().join("guild.sqlite");
    {
        let db = open_archive(&path).expect("open");
        db.conn
            .execute(
                "INSERT INTO user_merges (target_id, parent_id, created_at) VALUES ('a', 'b', 'now');",
                [],
            )
            .expect("insert");
    }
    let db = open_archive(&path).expect("reopen");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM user_merges;"), 1);
    assert_eq!(count(&db.conn, "PRAGMA user_version;"), 3);
}

#[test]
fn schema_rejects_self_merge_and_duplicate_claims() {
    let tmp = tempdir().expect("temp");
    let db = open_archive(tmp.path().join("guild.sqlite")).expect("open");
    let self_merge = db.conn.execute(
        "INSERT INTO user_merges (target_id, parent_id, created_at) VALUES ('a', 'a', 'now');",
        [],
    );
    assert!(self_merge.is_err());

    let insert_claim = "INSERT INTO claim_requests (requester_id, target_id, status, created_at) VALUES (?1, ?2, 0, 'now');";
    db.conn.execute(insert_claim, params!["a", "b"]).expect("first claim");
    assert!(db.conn.execute(insert_claim, params!["a", "b"]).is_err());
    db.conn.execute(insert_claim, params!["b", "a"]).expect("reverse claim");
}

#[test]
fn interrupted_import_is_marked_failed_on_open() {
    let tmp = tempdir().expect("temp");
    let path = tmp.path().join("guild.sqlite");
    {
        let db = open_archive(&path).expect("open");
        db.conn
            .execute(
                "INSERT INTO imports (id, imported_at, source_filename, status) VALUES ('x', 0, 'a.json', 'running');",
                [],
            )
            .expect("insert");
    }
    let db = open_archive(&path).expect("reopen");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM imports WHERE status = 'failed';"), 1);
}
