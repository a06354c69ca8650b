//! Field selection over nested record schemas
//!
//! A comma-separated list of dotted paths (`name,address.city`) becomes a
//! [`TrieNode`]; the trie prunes the source schema once per partition and
//! every record is then copied through the pruned schema.

pub mod project;
pub mod schema;
pub mod trie;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::ProjectionError;
use crate::state::{keys, Branch, State};

pub use project::{convert_record, project};
pub use schema::{RecordSchema, SchemaParseError};
pub use trie::TrieNode;

/// Keeps only the configured fields of each record
#[derive(Debug, Clone)]
pub struct FieldPickConverter {
    fields: String,
    trie: TrieNode,
    output: Option<RecordSchema>,
}

impl FieldPickConverter {
    pub fn new(fields: &str) -> Result<Self, ProjectionError> {
        let trie = TrieNode::from_field_list(fields)?;
        if trie.is_empty() {
            return Err(ProjectionError::NoFieldsSelected(
                keys::CONVERTER_FIELD_PICK_FIELDS.to_string(),
            ));
        }
        Ok(Self {
            fields: fields.to_string(),
            trie,
            output: None,
        })
    }

    /// Converter for `branch`, reading `converter.field_pick.fields[.<branch>]`
    pub fn from_state(state: &State, branch: Branch) -> Result<Self, ProjectionError> {
        let key = branch.key(keys::CONVERTER_FIELD_PICK_FIELDS);
        let fields = state
            .get(&key)
            .ok_or_else(|| ProjectionError::NoFieldsSelected(key.clone()))?;
        Self::new(fields)
    }

    pub fn output_schema(&self) -> Option<&RecordSchema> {
        self.output.as_ref()
    }

    /// Prune `input` to the selected fields; must run before any record
    pub fn convert_schema(&mut self, input: &RecordSchema) -> Result<RecordSchema, ProjectionError> {
        info!(schema = %input.full_name(), fields = %self.fields, "Converting schema to selected fields");
        let output = project(input, &self.trie)?;
        debug!(kept = output.fields().len(), dropped = input.fields().len() - output.fields().len(), "Projected schema");
        self.output = Some(output.clone());
        Ok(output)
    }

    /// Exactly one output record per input record
    pub fn convert_record(&self, record: &Value) -> Result<Value, ProjectionError> {
        let schema = self
            .output
            .as_ref()
            .ok_or_else(|| ProjectionError::RecordMismatch {
                path: String::new(),
                message: "schema has not been converted".to_string(),
            })?;
        convert_record(schema, record)
    }
}
