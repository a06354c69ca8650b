//! Persisted job and partition state
//!
//! Everything a task needs travels inside its [`WorkUnit`] as plain string
//! properties, so the coordinator can hand each task an immutable snapshot by
//! value. Keys for fork branches are namespaced with [`Branch::key`].

pub mod keys;
pub mod store;
pub mod work_unit;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StateError;

pub use store::{next_low_watermarks, FsStateStore, MemoryStateStore, StateStore};
pub use work_unit::{TaskStatus, WorkUnit, WorkUnitState};

/// String property bag with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_prop(key, value);
        self
    }

    pub fn set_prop(&mut self, key: impl Into<String>, value: impl ToString) {
        self.properties.insert(key.into(), value.to_string());
    }

    pub fn remove_prop(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    /// Value of `key`; empty strings count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn require(&self, key: &str) -> Result<&str, StateError> {
        self.get(key).ok_or_else(|| StateError::Missing(key.to_string()))
    }

    /// `true` only for a case-insensitive "true"; anything else is `false`
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, StateError> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<i64>().map_err(|_| StateError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                })
            })
            .transpose()
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, StateError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse::<usize>().map_err(|_| StateError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            }),
        }
    }

    /// Comma-separated list, entries trimmed, empty entries dropped
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One fork branch of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Branch {
    pub branches: usize,
    pub id: usize,
}

impl Branch {
    pub const SINGLE: Branch = Branch { branches: 1, id: 0 };

    pub fn new(branches: usize, id: usize) -> Self {
        Self { branches, id }
    }

    /// All branches configured for a job (`fork.branches`, default 1)
    pub fn all(state: &State) -> Result<Vec<Branch>, StateError> {
        let branches = state.get_usize_or(keys::FORK_BRANCHES, 1)?.max(1);
        Ok((0..branches).map(|id| Branch::new(branches, id)).collect())
    }

    /// `key` when the job has a single branch, `key.<id>` otherwise
    pub fn key(&self, key: &str) -> String {
        if self.branches > 1 {
            format!("{}.{}", key, self.id)
        } else {
            key.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_are_absent() {
        let state = State::new().with_prop("a", "").with_prop("b", "  x ");
        assert_eq!(state.get("a"), None);
        assert_eq!(state.get("b"), Some("  x "));
        assert!(state.require("a").is_err());
    }

    #[test]
    fn test_bool_parsing_is_strict_true() {
        let state = State::new()
            .with_prop("yes", "TRUE")
            .with_prop("one", "1")
            .with_prop("no", "false");
        assert!(state.get_bool("yes"));
        assert!(!state.get_bool("one"));
        assert!(!state.get_bool("no"));
        assert!(!state.get_bool("missing"));
    }

    #[test]
    fn test_numeric_parsing() {
        let state = State::new().with_prop("n", "42").with_prop("bad", "4x");
        assert_eq!(state.get_i64("n").unwrap(), Some(42));
        assert_eq!(state.get_i64("missing").unwrap(), None);
        assert!(state.get_i64("bad").is_err());
        assert_eq!(state.get_usize_or("missing", 7).unwrap(), 7);
    }

    #[test]
    fn test_list_parsing_trims_and_drops_empty() {
        let state = State::new().with_prop("fields", " name, address.city ,,");
        assert_eq!(state.get_list("fields"), vec!["name", "address.city"]);
    }

    #[test]
    fn test_branch_key_namespacing() {
        assert_eq!(Branch::SINGLE.key("writer.staging.table"), "writer.staging.table");
        assert_eq!(Branch::new(3, 2).key("writer.staging.table"), "writer.staging.table.2");

        let state = State::new().with_prop(keys::FORK_BRANCHES, 2);
        let branches = Branch::all(&state).unwrap();
        assert_eq!(branches, vec![Branch::new(2, 0), Branch::new(2, 1)]);
        assert_eq!(Branch::all(&State::new()).unwrap(), vec![Branch::SINGLE]);
    }
}
