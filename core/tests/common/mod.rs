#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use guild_archive_core::config::AnalyticsConfig;
use guild_archive_core::{import_export, AnalyticsEngine, ImportOptions, ImportReport};
use serde_json::{json, Value};

pub fn user(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("user{id}"),
        "nickname": format!("nick{id}"),
        "avatarUrl": format!("https://cdn.example/avatars/{id}.png"),
        "isBot": false
    })
}

pub fn message(id: u64, author: &str, content: &str, timestamp: &str) -> Value {
    json!({
        "id": id.to_string(),
        "author": user(author),
        "content": content,
        "timestamp": timestamp,
        "attachments": [],
        "reactions": [],
        "mentions": []
    })
}

pub fn react(mut msg: Value, emoji: &str, users: &[&str]) -> Value {
    let reaction = json!({
        "emoji": { "name": emoji, "imageUrl": format!("https://cdn.example/emoji/{emoji}.png") },
        "users": users.iter().map(|u| user(u)).collect::<Vec<_>>()
    });
    if let Some(list) = msg["reactions"].as_array_mut() {
        list.push(reaction);
    }
    msg
}

pub fn mention(mut msg: Value, users: &[&str]) -> Value {
    if let Some(list) = msg["mentions"].as_array_mut() {
        list.extend(users.iter().map(|u| user(u)));
    }
    msg
}

pub fn thread(id: &str, name: &str, messages: Vec<Value>) -> Value {
    json!({
        "channel": { "id": id, "categoryId": "900", "name": name },
        "exportedAt": "2024-06-01T00:00:00+00:00",
        "messages": messages
    })
}

pub fn write_export(dir: &Path, name: &str, doc: &Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_vec(doc).expect("serialize export")).expect("write export");
    path
}

pub fn import_doc(dir: &Path, doc: &Value, batch_size: usize) -> (PathBuf, ImportReport) {
    let source = write_export(dir, "export.json", doc);
    let archive = dir.join("archive").join("guild.sqlite");
    let options = ImportOptions {
        batch_size,
        ..ImportOptions::default()
    };
    let report = import_export(&source, &archive, &options).expect("import");
    (archive, report)
}

/// Three threads, twelve messages by users 1/2/3, five reaction rows and
/// two mentions.
pub fn sample_guild() -> Value {
    let ts = |minute: u32| format!("2024-03-0{}T1{}:{:02}:00.000+00:00", 1 + minute % 3, minute % 10, minute);
    json!([
        thread(
            "t1",
            "火锅讨论",
            vec![
                react(message(101, "1", "今天吃火锅", &ts(1)), "thumbs", &["2", "3"]),
                mention(message(102, "2", "火锅好吃", &ts(2)), &["1"]),
                message(103, "1", "烧烤也行", &ts(3)),
                message(104, "3", "火锅火锅", &ts(4)),
            ],
        ),
        thread(
            "t2",
            "周末计划",
            vec![
                react(message(105, "2", "周末爬山", &ts(5)), "joy", &["1"]),
                message(106, "1", "爬山太累", &ts(6)),
                message(107, "2", "那就看电影", &ts(7)),
                message(108, "3", "看电影好", &ts(8)),
                message(109, "1", "电影院见", &ts(9)),
            ],
        ),
        thread(
            "t3",
            "闲聊",
            vec![
                react(message(110, "3", "奶茶续命", &ts(10)), "thumbs", &["1", "2"]),
                mention(message(111, "1", "奶茶好喝", &ts(11)), &["3"]),
                message(112, "2", "hello world", &ts(12)),
            ],
        ),
    ])
}

pub fn analytics_options(workers: usize) -> AnalyticsConfig {
    AnalyticsConfig {
        workers: Some(workers),
        ..AnalyticsConfig::default()
    }
}

pub fn engine_for(dir: &Path, archive: &Path, workers: usize) -> AnalyticsEngine {
    AnalyticsEngine::new(archive, dir.join("cache").join("snapshot.bin"), analytics_options(workers))
}

pub fn count(conn: &rusqlite::Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).expect("count query")
}
