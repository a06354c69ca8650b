//! Path trie of selected fields

use std::collections::BTreeMap;

use crate::error::ProjectionError;
use crate::state::split_list;

/// One path segment; each node owns its children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrieNode {
    children: BTreeMap<String, TrieNode>,
    /// A selection ended exactly here
    terminal: bool,
}

impl TrieNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trie of a comma-separated list of dotted paths
    pub fn from_field_list(fields: &str) -> Result<Self, ProjectionError> {
        let mut root = TrieNode::new();
        for path in split_list(fields) {
            root.insert(&path)?;
        }
        Ok(root)
    }

    /// Add a dotted path; segments are trimmed and empty segments skipped
    ///
    /// Selecting the same path twice is rejected. A selected path that later
    /// gains a longer sibling (`a` then `a.b`, in either order) is kept and
    /// narrows to the named children.
    pub fn insert(&mut self, path: &str) -> Result<(), ProjectionError> {
        let segments: Vec<&str> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Ok(());
        }

        let mut node = self;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        if node.terminal {
            return Err(ProjectionError::DuplicatePath(path.trim().to_string()));
        }
        node.terminal = true;
        Ok(())
    }

    /// Leaves take the whole field
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, segment: &str) -> Option<&TrieNode> {
        self.children.get(segment)
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &TrieNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }
}
