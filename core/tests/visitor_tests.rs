mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{count, import_doc, sample_guild};
use guild_archive_core::visitors::{
    list_visitors, profile_views, record_profile_view_at, record_visit_at, RECENT_VIEWERS,
};
use guild_archive_core::{open_archive, CoreError};
use tempfile::tempdir;

#[test]
fn repeat_visits_keep_one_row_and_refresh_time() {
    let tmp = tempdir().expect("temp");
    let db = open_archive(tmp.path().join("guild.sqlite")).expect("open");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    record_visit_at(&db.conn, "7", Some("seven"), Some("a.png"), t0).expect("visit");
    record_visit_at(&db.conn, "9", Some("nine"), None, t0 + Duration::minutes(1)).expect("visit");
    record_visit_at(&db.conn, "7", Some("renamed"), Some("b.png"), t0 + Duration::minutes(2)).expect("again");

    assert_eq!(count(&db.conn, "SELECT COUNT(*) FROM web_visitors;"), 2);
    let visitors = list_visitors(&db.conn).expect("visitors");
    assert_eq!(visitors[0].user_id, "7");
    assert_eq!(visitors[0].username.as_deref(), Some("seven"));
    assert_eq!(visitors[0].nickname.as_deref(), Some("seven"));
    assert_eq!(visitors[0].avatar_url.as_deref(), Some("b.png"));
    assert_eq!(visitors[1].user_id, "9");
    assert!(visitors[0].last_visit > visitors[1].last_visit);

    assert!(matches!(
        record_visit_at(&db.conn, " ", None, None, t0).unwrap_err(),
        CoreError::InvalidArgument(_)
    ));
}

#[test]
fn profile_views_count_distinct_viewers() {
    let tmp = tempdir().expect("temp");
    let (archive, _) = import_doc(tmp.path(), &sample_guild(), 100);
    let db = open_archive(&archive).expect("open");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    assert!(record_profile_view_at(&db.conn, "1", "2", Some("two"), None, t0).expect("view"));
    assert!(record_profile_view_at(&db.conn, "1", "3", Some("three"), None, t0 + Duration::seconds(1)).expect("view"));
    assert!(record_profile_view_at(&db.conn, "1", "2", Some("two"), None, t0 + Duration::seconds(2)).expect("again"));
    assert!(!record_profile_view_at(&db.conn, "1", "1", None, None, t0).expect("self view"));

    let views = profile_views(&db.conn, "1").expect("views");
    assert_eq!(views.view_count, 2);
    let order: Vec<&str> = views.recent.iter().map(|v| v.viewer_user_id.as_str()).collect();
    assert_eq!(order, vec!["2", "3"]);
    assert_eq!(views.recent[1].viewer_name.as_deref(), Some("three"));

    assert_eq!(profile_views(&db.conn, "2").expect("none").view_count, 0);
    assert!(matches!(
        record_profile_view_at(&db.conn, "404", "2", None, None, t0).unwrap_err(),
        CoreError::NotFound(_)
    ));
}

#[test]
fn recent_viewers_are_capped() {
    let tmp = tempdir().expect("temp");
    let (archive, _) = import_doc(tmp.path(), &sample_guild(), 100);
    let db = open_archive(&archive).expect("open");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    for i in 0..RECENT_VIEWERS + 5 {
        let viewer = format!("v{i:02}");
        record_profile_view_at(&db.conn, "3", &viewer, None, None, t0 + Duration::seconds(i)).expect("view");
    }
    let views = profile_views(&db.conn, "3").expect("views");
    assert_eq!(views.view_count, RECENT_VIEWERS + 5);
    assert_eq!(views.recent.len() as i64, RECENT_VIEWERS);
    assert_eq!(views.recent[0].viewer_user_id, format!("v{:02}", RECENT_VIEWERS + 4));
}
