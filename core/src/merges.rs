//! Duplicate-account merges.
//!
//! An edge `target -> parent` attributes everything `target` did to `parent`.
//! Edges form a forest: a target has at most one parent, and no chain of
//! parents may lead back to the target. Stored rows are never rewritten; the
//! resolver expands an account into the id set every aggregate must union.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::models::MergeEdge;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeForest {
    parents: BTreeMap<String, String>,
}

impl MergeForest {
    pub fn from_edges<I, T, P>(edges: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<String>,
    {
        let mut forest = Self::default();
        for (target, parent) in edges {
            forest.insert(&target.into(), &parent.into())?;
        }
        Ok(forest)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn canonical_of(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    pub fn children_of(&self, id: &str) -> Vec<String> {
        self.parents
            .iter()
            .filter(|(_, parent)| parent.as_str() == id)
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// `{id}` plus its direct children. Grandchildren are not included.
    pub fn resolve(&self, id: &str) -> Vec<String> {
        let mut ids = vec![id.to_string()];
        ids.extend(self.children_of(id));
        ids
    }

    /// `{id}` plus every descendant at any depth.
    pub fn resolve_transitive(&self, id: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.children_of(&next));
            ids.push(next);
        }
        ids
    }

    pub fn resolve_with(&self, id: &str, transitive: bool) -> Vec<String> {
        if transitive {
            self.resolve_transitive(id)
        } else {
            self.resolve(id)
        }
    }

    pub fn validate_edge(&self, target: &str, parent: &str) -> Result<(), CoreError> {
        if target.trim().is_empty() || parent.trim().is_empty() {
            return Err(CoreError::InvalidRequest("merge ids must not be empty".to_string()));
        }
        if target == parent {
            return Err(CoreError::InvalidRequest(format!(
                "account {target} cannot be merged into itself"
            )));
        }
        let mut cursor = parent;
        for _ in 0..=self.parents.len() {
            if cursor == target {
                return Err(CoreError::InvalidRequest(format!(
                    "merging {target} into {parent} would create a cycle"
                )));
            }
            match self.parents.get(cursor) {
                Some(next) => cursor = next.as_str(),
                None => return Ok(()),
            }
        }
        Err(CoreError::InvalidRequest("merge forest already contains a cycle".to_string()))
    }

    /// Validates and inserts, replacing any previous parent of `target`.
    pub fn insert(&mut self, target: &str, parent: &str) -> Result<Option<String>, CoreError> {
        self.validate_edge(target, parent)?;
        Ok(self.parents.insert(target.to_string(), parent.to_string()))
    }

    pub fn remove(&mut self, target: &str) -> Option<String> {
        self.parents.remove(target)
    }

    pub fn clear(&mut self) {
        self.parents.clear();
    }

    /// The account whose aggregates include `id`'s activity, in the same mode
    /// as [`MergeForest::resolve_with`]. Owners are always roots.
    ///
    /// With one-level resolution a grandchild belongs to no root: its parent
    /// is merged itself, and no `resolve` set contains it. `None` then.
    pub fn owner_of<'a>(&'a self, id: &'a str, transitive: bool) -> Option<&'a str> {
        let Some(parent) = self.canonical_of(id) else {
            return Some(id);
        };
        if transitive {
            let mut root = parent;
            for _ in 0..self.parents.len() {
                match self.canonical_of(root) {
                    Some(next) => root = next,
                    None => break,
                }
            }
            return Some(root);
        }
        match self.canonical_of(parent) {
            Some(_) => None,
            None => Some(parent),
        }
    }
}

pub fn load_merges(conn: &Connection) -> Result<MergeForest, CoreError> {
    let mut stmt = conn.prepare("SELECT target_id, parent_id FROM user_merges ORDER BY created_at, target_id;")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut forest = MergeForest::default();
    for row in rows {
        let (target, parent) = row?;
        // Rows written by older tools may violate the forest shape; keep the
        // first consistent edge and skip the rest.
        if let Err(err) = forest.insert(&target, &parent) {
            warn!(%target, %parent, error = %err, "skipping invalid stored merge edge");
        }
    }
    Ok(forest)
}

/// Validates against the stored edges and writes in one transaction.
pub fn insert_merge(conn: &mut Connection, target: &str, parent: &str) -> Result<(), CoreError> {
    let tx = conn.transaction()?;
    write_merge(&tx, target, parent)?;
    tx.commit()?;
    info!(%target, %parent, "merge edge recorded");
    Ok(())
}

pub(crate) fn write_merge(tx: &rusqlite::Transaction, target: &str, parent: &str) -> Result<(), CoreError> {
    let forest = load_merges(tx)?;
    forest.validate_edge(target, parent)?;
    tx.execute(
        "INSERT OR REPLACE INTO user_merges (target_id, parent_id, created_at) VALUES (?1, ?2, ?3);",
        params![target, parent, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn remove_merge(conn: &Connection, target: &str) -> Result<bool, CoreError> {
    let changed = conn.execute("DELETE FROM user_merges WHERE target_id = ?1;", params![target])?;
    if changed > 0 {
        info!(%target, "merge edge removed");
    }
    Ok(changed > 0)
}

pub fn clear_merges(conn: &Connection) -> Result<usize, CoreError> {
    Ok(conn.execute("DELETE FROM user_merges;", [])?)
}

pub fn canonical_parent(conn: &Connection, target: &str) -> Result<Option<String>, CoreError> {
    Ok(conn
        .query_row(
            "SELECT parent_id FROM user_merges WHERE target_id = ?1;",
            params![target],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn list_merges(conn: &Connection) -> Result<Vec<MergeEdge>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT m.target_id, m.parent_id, u.username, m.created_at \
         FROM user_merges m \
         LEFT JOIN users u ON u.user_id = m.parent_id \
         ORDER BY m.created_at DESC, m.target_id ASC;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(MergeEdge {
            target_id: row.get(0)?,
            parent_id: row.get(1)?,
            parent_name: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    Ok(rows.filter_map(Result::ok).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_one_level() {
        let forest = MergeForest::from_edges([("b", "a"), ("c", "a"), ("d", "b")]).expect("forest");
        assert_eq!(forest.resolve("a"), vec!["a", "b", "c"]);
        assert_eq!(forest.resolve("b"), vec!["b", "d"]);
        assert_eq!(forest.resolve("z"), vec!["z"]);
        assert_eq!(forest.canonical_of("d"), Some("b"));
        assert_eq!(forest.canonical_of("a"), None);
    }

    #[test]
    fn transitive_resolve_walks_descendants() {
        let forest = MergeForest::from_edges([("b", "a"), ("d", "b")]).expect("forest");
        let mut ids = forest.resolve_transitive("a");
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "d"]);
        assert!(!forest.resolve_transitive("b").contains(&"a".to_string()));
    }

    #[test]
    fn self_and_cyclic_edges_rejected() {
        let mut forest = MergeForest::default();
        assert!(matches!(forest.insert("a", "a"), Err(CoreError::InvalidRequest(_))));
        forest.insert("a", "b").expect("a->b");
        assert!(matches!(forest.insert("b", "a"), Err(CoreError::InvalidRequest(_))));
        forest.insert("b", "c").expect("b->c");
        assert!(matches!(forest.insert("c", "a"), Err(CoreError::InvalidRequest(_))));
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn owner_matches_resolution_mode() {
        let forest = MergeForest::from_edges([("42", "7"), ("7", "9"), ("5", "9")]).expect("forest");
        assert_eq!(forest.owner_of("9", false), Some("9"));
        assert_eq!(forest.owner_of("7", false), Some("9"));
        assert_eq!(forest.owner_of("42", false), None);
        assert_eq!(forest.owner_of("42", true), Some("9"));
        assert_eq!(forest.owner_of("7", true), Some("9"));
        assert_eq!(forest.owner_of("other", true), Some("other"));
        for transitive in [false, true] {
            for id in ["9", "7", "42", "5"] {
                if let Some(owner) = forest.owner_of(id, transitive) {
                    assert!(forest.resolve_with(owner, transitive).contains(&id.to_string()));
                }
            }
        }
    }

    #[test]
    fn reinsert_replaces_parent() {
        let mut forest = MergeForest::default();
        forest.insert("x", "p1").expect("first");
        let previous = forest.insert("x", "p2").expect("second");
        assert_eq!(previous.as_deref(), Some("p1"));
        assert_eq!(forest.resolve("p1"), vec!["p1"]);
        assert_eq!(forest.resolve("p2"), vec!["p2", "x"]);
    }
}
