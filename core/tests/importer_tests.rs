mod common;

use std::fs;

use common::{count, import_doc, message, react, sample_guild, thread, write_export};
use guild_archive_core::{import_export, open_archive, CoreError, ImportOptions};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn sample_guild_flushes_in_three_batches() {
    let tmp = tempdir().expect("temp");
    let (archive, report) = import_doc(tmp.path(), &sample_guild(), 5);

    assert_eq!(report.flushes, 3);
    assert_eq!(report.threads, 3);
    assert_eq!(report.messages, 12);
    assert_eq!(report.reactions, 5);
    assert_eq!(report.mentions, 2);
    assert_eq!(report.users, 3);
    assert_eq!(report.skipped_messages, 0);

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM messages;"), 12);
    assert_eq!(count(&db.conn, "SELECT COUNT(DISTINCT message_id) FROM messages;"), 12);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM users;"), 3);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM reactions;"), 5);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM mentions;"), 2);
    assert_eq!(count(&db.conn, "SELECT SUM(msg_count) FROM user_stats;"), 12);
    assert_eq!(
        count(&db.conn, "SELECT msg_count FROM user_stats WHERE user_id = '1';"),
        5
    );
    assert_eq!(
        count(&db.conn, "SELECT reaction_received_count FROM user_stats WHERE user_id = '3';"),
        2
    );
    assert_eq!(
        count(&db.conn, "SELECT COUNT(*) FROM imports WHERE status = 'success';"),
        1
    );
}

#[test]
fn exact_multiple_of_batch_size_skips_empty_final_flush() {
    let tmp = tempdir().expect("temp");
    let doc = json!([
        thread("a", "a", (1..=4).map(|i| message(i, "1", "火锅", "2024-01-01T00:00:00+00:00")).collect()),
        thread("b", "b", (5..=8).map(|i| message(i, "2", "烧烤", "2024-01-01T00:00:00+00:00")).collect()),
    ]);
    let (_, report) = import_doc(tmp.path(), &doc, 4);
    assert_eq!(report.flushes, 2);
    assert_eq!(report.messages, 8);
}

#[test]
fn trailing_threads_without_messages_join_the_last_batch() {
    let tmp = tempdir().expect("temp");
    let doc = json!([
        thread("a", "a", (1..=10).map(|i| message(i, "1", "火锅", "2024-01-01T00:00:00+00:00")).collect()),
        thread("empty", "empty", vec![]),
        thread("also-empty", "also empty", vec![]),
    ]);
    let (archive, report) = import_doc(tmp.path(), &doc, 5);
    assert_eq!(report.flushes, 2);
    assert_eq!(report.messages, 10);
    assert_eq!(report.threads, 3);

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM threads;"), 3);
}

#[test]
fn repeated_user_keeps_latest_attributes() {
    let tmp = tempdir().expect("temp");
    let mut first = message(1, "7", "火锅", "2024-01-01T00:00:00+00:00");
    first["author"]["name"] = json!("old-name");
    first["author"]["nickname"] = json!("老昵称");
    let mut second = message(2, "7", "烧烤", "2024-01-02T00:00:00+00:00");
    second["author"]["name"] = json!("new-name");
    second["author"]["nickname"] = serde_json::Value::Null;
    second["author"]["avatarUrl"] = json!("https://cdn.example/new.png");
    let doc = json!([thread("t", "t", vec![first, second])]);

    // One message per batch so the upsert runs against committed rows.
    let (archive, report) = import_doc(tmp.path(), &doc, 1);
    assert_eq!(report.flushes, 2);

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM users WHERE user_id = '7';"), 1);
    let (name, nickname, avatar): (String, Option<String>, String) = db
        .conn
        .query_row(
            "SELECT username, nickname, avatar_url FROM users WHERE user_id = '7';",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("user");
    assert_eq!(name, "new-name");
    assert_eq!(nickname.as_deref(), Some("老昵称"));
    assert_eq!(avatar, "https://cdn.example/new.png");

    // Within a single batch the last occurrence wins as well.
    let tmp = tempdir().expect("temp");
    let mut a = message(1, "8", "火锅", "2024-01-01T00:00:00+00:00");
    a["author"]["name"] = json!("first");
    let mut b = message(2, "8", "烧烤", "2024-01-01T00:00:00+00:00");
    b["author"]["name"] = json!("second");
    let (archive, _) = import_doc(tmp.path(), &json!([thread("t", "t", vec![a, b])]), 100);
    let db = open_archive(&archive).expect("open");
    let name: String = db
        .conn
        .query_row("SELECT username FROM users WHERE user_id = '8';", [], |row| row.get(0))
        .expect("user");
    assert_eq!(name, "second");
}

#[test]
fn truncated_document_keeps_committed_batches() {
    let tmp = tempdir().expect("temp");
    let complete = thread(
        "a",
        "complete",
        (1..=5).map(|i| message(i, "1", "火锅", "2024-01-01T00:00:00+00:00")).collect(),
    );
    let partial = thread(
        "b",
        "partial",
        (6..=9).map(|i| message(i, "2", "bbq later", "2024-01-01T00:00:00+00:00")).collect(),
    );
    let partial_text = serde_json::to_string(&partial).expect("serialize");
    let text = format!(
        "[{}, {}",
        serde_json::to_string(&complete).expect("serialize"),
        &partial_text[..partial_text.len() / 2]
    );
    let source = tmp.path().join("broken.json");
    fs::write(&source, text).expect("write");
    let archive = tmp.path().join("guild.sqlite");

    let options = ImportOptions {
        batch_size: 2,
        ..ImportOptions::default()
    };
    let err = import_export(&source, &archive, &options).unwrap_err();
    match err {
        CoreError::ImportAborted { threads, messages, .. } => {
            assert_eq!(threads, 1);
            assert_eq!(messages, 4);
        }
        other => panic!("unexpected error: {other}"),
    }

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM messages;"), 4);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM imports WHERE status = 'failed';"), 1);
}

#[test]
fn wrapped_document_skips_unusable_records() {
    let tmp = tempdir().expect("temp");
    let mut no_author = message(3, "1", "火锅", "2024-01-01T00:00:00+00:00");
    no_author["author"] = serde_json::Value::Null;
    let mut no_id = message(4, "1", "火锅", "2024-01-01T00:00:00+00:00");
    no_id.as_object_mut().expect("object").remove("id");
    let mut word_id = message(5, "1", "火锅", "2024-01-01T00:00:00+00:00");
    word_id["id"] = json!("not-a-number");
    let doc = json!({
        "guild": { "id": "g1", "name": "guild" },
        "threads": [
            { "channel": { "name": "no id" }, "messages": [message(1, "1", "x", "2024-01-01T00:00:00+00:00")] },
            thread("t", "t", vec![no_author, no_id, word_id, message(6, "2", "烧烤", "2024-01-01T00:00:00+00:00")]),
        ],
        "messageCount": 5
    });
    let (archive, report) = import_doc(tmp.path(), &doc, 10);
    assert_eq!(report.threads, 1);
    assert_eq!(report.messages, 1);
    assert_eq!(report.skipped_threads, 1);
    assert_eq!(report.skipped_messages, 4);

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM messages;"), 1);
    assert_eq!(count(&db.conn, "SELECT seq FROM messages;"), 6);
}

#[test]
fn duplicate_message_ids_are_stored_once() {
    let tmp = tempdir().expect("temp");
    let doc = json!([
        thread("a", "a", vec![message(1, "1", "火锅", "2024-01-01T00:00:00+00:00")]),
        thread("b", "b", vec![
            react(message(1, "1", "火锅", "2024-01-01T00:00:00+00:00"), "joy", &["2"]),
            message(2, "2", "烧烤", "2024-01-01T00:00:00+00:00"),
        ]),
    ]);
    let (archive, report) = import_doc(tmp.path(), &doc, 1);
    assert_eq!(report.messages, 2);
    assert_eq!(report.duplicate_messages, 1);

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM messages;"), 2);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM reactions;"), 0);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM users;"), 2);
}

#[test]
fn reimport_replaces_previous_archive() {
    let tmp = tempdir().expect("temp");
    let (archive, _) = import_doc(tmp.path(), &sample_guild(), 5);
    {
        let db = open_archive(&archive).expect("open");
        db.conn
            .execute(
                "INSERT INTO user_merges (target_id, parent_id, created_at) VALUES ('2', '1', 'now');",
                [],
            )
            .expect("merge");
    }

    let doc = json!([thread("n", "new", vec![message(500, "9", "新的开始", "2024-05-01T00:00:00+00:00")])]);
    let source = write_export(tmp.path(), "second.json", &doc);
    let report = import_export(&source, &archive, &ImportOptions::default()).expect("reimport");
    assert_eq!(report.messages, 1);

    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM messages;"), 1);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM users;"), 1);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM user_merges;"), 0);
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM imports;"), 1);
}

#[test]
fn missing_source_is_rejected_before_touching_archive() {
    let tmp = tempdir().expect("temp");
    let (archive, _) = import_doc(tmp.path(), &json!([thread("a", "a", vec![message(1, "1", "x", "2024")])]), 10);
    let err = import_export(&tmp.path().join("nope.json"), &archive, &ImportOptions::default()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
    let db = open_archive(&archive).expect("open");
    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM messages;"), 1);
}
