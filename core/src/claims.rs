//! Account claims: a user asks for another account to be merged into theirs
//! and an admin approves the request.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::CoreError;
use crate::merges::{clear_merges, write_merge};
use crate::models::ClaimRequest;

pub const CLAIM_PENDING: i64 = 0;
pub const CLAIM_APPROVED: i64 = 1;

const CLAIM_COLUMNS: &str = "c.id, c.requester_id, u.username, c.target_id, c.target_name, c.status, c.created_at";

fn claim_from_row(row: &rusqlite::Row) -> rusqlite::Result<ClaimRequest> {
    Ok(ClaimRequest {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        requester_name: row.get(2)?,
        target_id: row.get(3)?,
        target_name: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn submit_claim(conn: &Connection, requester_id: &str, target_id: &str) -> Result<i64, CoreError> {
    let requester_id = requester_id.trim();
    let target_id = target_id.trim();
    if requester_id.is_empty() || target_id.is_empty() {
        return Err(CoreError::InvalidRequest("claim ids must not be empty".to_string()));
    }
    if requester_id == target_id {
        return Err(CoreError::InvalidRequest("cannot claim your own account".to_string()));
    }
    let target_name: Option<Option<String>> = conn
        .query_row(
            "SELECT COALESCE(nickname, username) FROM users WHERE user_id = ?1;",
            params![target_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(target_name) = target_name else {
        return Err(CoreError::NotFound(format!("user {target_id}")));
    };
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO claim_requests (requester_id, target_id, target_name, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![requester_id, target_id, target_name, CLAIM_PENDING, Utc::now().to_rfc3339()],
    )?;
    if inserted == 0 {
        return Err(CoreError::InvalidRequest("claim already exists".to_string()));
    }
    let id = conn.last_insert_rowid();
    info!(claim = id, %requester_id, %target_id, "claim submitted");
    Ok(id)
}

pub fn list_pending_claims(conn: &Connection) -> Result<Vec<ClaimRequest>, CoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLAIM_COLUMNS} \
         FROM claim_requests c \
         LEFT JOIN users u ON u.user_id = c.requester_id \
         WHERE c.status = ?1 \
         ORDER BY c.created_at ASC, c.id ASC;"
    ))?;
    let rows = stmt.query_map(params![CLAIM_PENDING], claim_from_row)?;
    Ok(rows.filter_map(Result::ok).collect())
}

pub fn get_claim(conn: &Connection, claim_id: i64) -> Result<ClaimRequest, CoreError> {
    conn.query_row(
        &format!(
            "SELECT {CLAIM_COLUMNS} \
             FROM claim_requests c \
             LEFT JOIN users u ON u.user_id = c.requester_id \
             WHERE c.id = ?1;"
        ),
        params![claim_id],
        claim_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("claim {claim_id}")))
}

/// Marks the claim approved and records `target -> requester` in one
/// transaction. Returns the approved claim.
pub fn approve_claim(conn: &mut Connection, claim_id: i64) -> Result<ClaimRequest, CoreError> {
    let tx = conn.transaction()?;
    let claim = get_claim(&tx, claim_id)?;
    write_merge(&tx, &claim.target_id, &claim.requester_id)?;
    tx.execute(
        "UPDATE claim_requests SET status = ?2 WHERE id = ?1;",
        params![claim_id, CLAIM_APPROVED],
    )?;
    tx.commit()?;
    info!(claim = claim_id, target = %claim.target_id, parent = %claim.requester_id, "claim approved");
    Ok(ClaimRequest {
        status: CLAIM_APPROVED,
        ..claim
    })
}

/// Deletes every claim and every merge edge. Returns `(claims, merges)` removed.
pub fn reset_claims(conn: &mut Connection) -> Result<(usize, usize), CoreError> {
    let tx = conn.transaction()?;
    let claims = tx.execute("DELETE FROM claim_requests;", [])?;
    let merges = clear_merges(&tx)?;
    tx.commit()?;
    info!(claims, merges, "all claims and merges reset");
    Ok((claims, merges))
}
