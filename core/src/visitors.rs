//! Site visitors and per-profile viewers.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::CoreError;
use crate::models::{ProfileViewer, ProfileViews, SiteVisitor};
use crate::query::get_user;

/// Viewers listed on a profile, newest first.
pub const RECENT_VIEWERS: i64 = 20;

// Fixed width so text order matches time order.
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn visitor_from_row(row: &Row) -> rusqlite::Result<SiteVisitor> {
    Ok(SiteVisitor {
        user_id: row.get(0)?,
        username: row.get(1)?,
        nickname: row.get(2)?,
        avatar_url: row.get(3)?,
        last_visit: row.get(4)?,
    })
}

pub fn record_visit(
    conn: &Connection,
    user_id: &str,
    username: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<(), CoreError> {
    record_visit_at(conn, user_id, username, avatar_url, Utc::now())
}

/// One row per visitor. A repeat visit refreshes the timestamp and avatar
/// and keeps the stored names.
pub fn record_visit_at(
    conn: &Connection,
    user_id: &str,
    username: Option<&str>,
    avatar_url: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), CoreError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(CoreError::InvalidArgument("visitor id must not be empty".to_string()));
    }
    conn.execute(
        "INSERT INTO web_visitors (user_id, username, nickname, avatar_url, last_visit) \
         VALUES (?1, ?2, ?2, ?3, ?4) \
         ON CONFLICT(user_id) DO UPDATE SET last_visit = excluded.last_visit, avatar_url = excluded.avatar_url;",
        params![user_id, username, avatar_url, stamp(at)],
    )?;
    debug!(%user_id, "visit recorded");
    Ok(())
}

pub fn list_visitors(conn: &Connection) -> Result<Vec<SiteVisitor>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, username, nickname, avatar_url, last_visit \
         FROM web_visitors \
         ORDER BY last_visit DESC, user_id ASC;",
    )?;
    let rows = stmt.query_map([], visitor_from_row)?;
    Ok(rows.filter_map(Result::ok).collect())
}

pub fn record_profile_view(
    conn: &Connection,
    target_user_id: &str,
    viewer_user_id: &str,
    viewer_name: Option<&str>,
    viewer_avatar: Option<&str>,
) -> Result<bool, CoreError> {
    record_profile_view_at(conn, target_user_id, viewer_user_id, viewer_name, viewer_avatar, Utc::now())
}

/// Records that `viewer_user_id` opened `target_user_id`'s profile. Viewing
/// your own profile is not recorded and returns `false`. A repeat view only
/// moves the timestamp.
pub fn record_profile_view_at(
    conn: &Connection,
    target_user_id: &str,
    viewer_user_id: &str,
    viewer_name: Option<&str>,
    viewer_avatar: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let target_user_id = target_user_id.trim();
    let viewer_user_id = viewer_user_id.trim();
    if viewer_user_id.is_empty() {
        return Err(CoreError::InvalidArgument("viewer id must not be empty".to_string()));
    }
    get_user(conn, target_user_id)?;
    if target_user_id == viewer_user_id {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO profile_views (target_user_id, viewer_user_id, viewer_name, viewer_avatar, viewed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(target_user_id, viewer_user_id) DO UPDATE SET viewed_at = excluded.viewed_at;",
        params![target_user_id, viewer_user_id, viewer_name, viewer_avatar, stamp(at)],
    )?;
    Ok(true)
}

pub fn profile_views(conn: &Connection, target_user_id: &str) -> Result<ProfileViews, CoreError> {
    let view_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM profile_views WHERE target_user_id = ?1;",
        params![target_user_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT viewer_user_id, viewer_name, viewer_avatar, viewed_at \
         FROM profile_views \
         WHERE target_user_id = ?1 \
         ORDER BY viewed_at DESC, viewer_user_id ASC \
         LIMIT ?2;",
    )?;
    let recent = stmt
        .query_map(params![target_user_id, RECENT_VIEWERS], |row| {
            Ok(ProfileViewer {
                viewer_user_id: row.get(0)?,
                viewer_name: row.get(1)?,
                viewer_avatar: row.get(2)?,
                viewed_at: row.get(3)?,
            })
        })?
        .filter_map(Result::ok)
        .collect();
    Ok(ProfileViews { view_count, recent })
}
