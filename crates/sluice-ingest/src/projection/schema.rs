//! Nested record schemas in Avro JSON form
//!
//! Parsing and serialization go through `apache_avro`, so logical types,
//! aliases and custom attributes are carried along untouched. Named types are
//! indexed by full name so a `"type": "addr"` reference can be followed like
//! the inline definition it points at.

use apache_avro::schema::{RecordField, RecordSchema as AvroRecord};
use apache_avro::Schema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Schema JSON that is not a valid Avro record
#[derive(Debug, Error)]
#[error("Invalid schema: {0}")]
pub struct SchemaParseError(pub String);

impl From<apache_avro::Error> for SchemaParseError {
    fn from(e: apache_avro::Error) -> Self {
        SchemaParseError(e.to_string())
    }
}

/// A record schema and the named types defined anywhere inside it
///
/// Equality follows Avro's parsing canonical form.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    record: AvroRecord,
    names: HashMap<String, Schema>,
}

pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn collect_names(schema: &Schema, names: &mut HashMap<String, Schema>) {
    match schema {
        Schema::Record(record) => {
            names.insert(record.name.fullname(None), schema.clone());
            for field in &record.fields {
                collect_names(&field.schema, names);
            }
        }
        Schema::Enum(inner) => {
            names.insert(inner.name.fullname(None), schema.clone());
        }
        Schema::Fixed(inner) => {
            names.insert(inner.name.fullname(None), schema.clone());
        }
        Schema::Array(array) => collect_names(&array.items, names),
        Schema::Map(map) => collect_names(&map.types, names),
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_names(variant, names);
            }
        }
        _ => {}
    }
}

impl RecordSchema {
    pub fn parse_str(input: &str) -> Result<Self, SchemaParseError> {
        Self::try_from(Schema::parse_str(input)?)
    }

    pub fn parse(value: &Value) -> Result<Self, SchemaParseError> {
        Self::try_from(Schema::parse(value)?)
    }

    pub(crate) fn from_record(record: AvroRecord) -> Self {
        let mut names = HashMap::new();
        names.insert(record.name.fullname(None), Schema::Record(record.clone()));
        for field in &record.fields {
            collect_names(&field.schema, &mut names);
        }
        Self { record, names }
    }

    pub fn name(&self) -> &str {
        &self.record.name.name
    }

    pub fn full_name(&self) -> String {
        self.record.name.fullname(None)
    }

    pub fn doc(&self) -> Option<&str> {
        self.record.doc.as_deref()
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.record.fields
    }

    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.record.fields.iter().find(|f| f.name == name)
    }

    pub fn avro_record(&self) -> &AvroRecord {
        &self.record
    }

    pub fn to_avro(&self) -> Schema {
        Schema::Record(self.record.clone())
    }

    /// Definition of a named type by full name
    pub fn named(&self, full_name: &str) -> Option<&Schema> {
        self.names.get(full_name)
    }

    /// Follows a named reference to its definition
    pub fn resolve<'a>(&'a self, schema: &'a Schema) -> &'a Schema {
        match schema {
            Schema::Ref { name } => self.names.get(&name.fullname(None)).unwrap_or(schema),
            _ => schema,
        }
    }

    /// The record behind a field type: a record (inline or referenced), or
    /// the only record branch of a union such as `["null", {record}]`
    pub fn nested_record<'a>(&'a self, schema: &'a Schema) -> Option<&'a AvroRecord> {
        match self.resolve(schema) {
            Schema::Record(record) => Some(record),
            Schema::Union(union) => {
                let mut records = union.variants().iter().filter_map(|v| match self.resolve(v) {
                    Schema::Record(record) => Some(record),
                    _ => None,
                });
                match (records.next(), records.next()) {
                    (Some(record), None) => Some(record),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Every dotted path down to a non-record field (or an empty record)
    ///
    /// A record that contains itself is listed once, at its outermost use.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        let mut visiting = HashSet::from([self.full_name()]);
        self.collect_leaf_paths(&self.record, "", &mut visiting, &mut paths);
        paths
    }

    fn collect_leaf_paths(
        &self,
        record: &AvroRecord,
        prefix: &str,
        visiting: &mut HashSet<String>,
        paths: &mut Vec<String>,
    ) {
        for field in &record.fields {
            let path = join(prefix, &field.name);
            match self.nested_record(&field.schema) {
                Some(nested) if !nested.fields.is_empty() && visiting.insert(nested.name.fullname(None)) => {
                    self.collect_leaf_paths(nested, &path, visiting, paths);
                    visiting.remove(&nested.name.fullname(None));
                }
                _ => paths.push(path),
            }
        }
    }
}

impl TryFrom<Schema> for RecordSchema {
    type Error = SchemaParseError;

    fn try_from(schema: Schema) -> Result<Self, Self::Error> {
        match schema {
            Schema::Record(record) => Ok(Self::from_record(record)),
            other => Err(SchemaParseError(format!(
                "expected a record at the root, found {}",
                other.canonical_form()
            ))),
        }
    }
}

impl PartialEq for RecordSchema {
    fn eq(&self, other: &Self) -> bool {
        self.to_avro() == other.to_avro()
    }
}

impl Serialize for RecordSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_avro().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RecordSchema::parse(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> Value {
        json!({
            "namespace": "example.avro",
            "type": "record",
            "name": "user",
            "doc": "A user",
            "fields": [
                {"name": "name", "type": "string"},
                {"name": "favorite_number", "type": ["int", "null"]},
                {"name": "home", "type": ["null", {
                    "type": "record",
                    "name": "address",
                    "fields": [
                        {"name": "city", "type": "string"},
                        {"name": "zip", "type": {"type": "fixed", "name": "zip5", "size": 5}}
                    ]
                }]},
                {"name": "work", "type": "address"},
                {"name": "tags", "type": {"type": "array", "items": "string"}}
            ]
        })
    }

    #[test]
    fn test_parse_and_serialize_round_trip() {
        let schema: RecordSchema = serde_json::from_value(user_schema()).unwrap();
        assert_eq!(schema.full_name(), "example.avro.user");
        assert_eq!(schema.doc(), Some("A user"));
        assert_eq!(schema.fields().len(), 5);

        let written = serde_json::to_value(&schema).unwrap();
        let reparsed = RecordSchema::parse(&written).unwrap();
        assert_eq!(reparsed, schema);
    }

    #[test]
    fn test_logical_types_and_aliases_survive() {
        let schema = RecordSchema::parse(&json!({
            "type": "record",
            "name": "payment",
            "fields": [
                {"name": "ts", "type": {"type": "long", "logicalType": "timestamp-millis"}},
                {"name": "id", "type": "long", "aliases": ["event_id"]}
            ]
        }))
        .unwrap();

        assert_eq!(schema.field("ts").unwrap().schema, Schema::TimestampMillis);
        assert_eq!(
            schema.field("id").unwrap().aliases,
            Some(vec!["event_id".to_string()])
        );
        let written = serde_json::to_string(&schema).unwrap();
        assert!(written.contains("timestamp-millis"));
    }

    #[test]
    fn test_named_reference_resolves_to_definition() {
        let schema: RecordSchema = serde_json::from_value(user_schema()).unwrap();
        let work = schema.field("work").unwrap();
        assert!(matches!(work.schema, Schema::Ref { .. }));

        let address = schema.nested_record(&work.schema).unwrap();
        assert_eq!(address.name.fullname(None), "example.avro.address");
        assert!(schema.named("example.avro.zip5").is_some());
    }

    #[test]
    fn test_nullable_record_is_nested_record() {
        let schema: RecordSchema = serde_json::from_value(user_schema()).unwrap();
        let home = schema.nested_record(&schema.field("home").unwrap().schema).unwrap();
        assert_eq!(home.name.name, "address");
        assert!(schema.nested_record(&schema.field("tags").unwrap().schema).is_none());
    }

    #[test]
    fn test_leaf_paths_descend_into_records_and_references() {
        let schema: RecordSchema = serde_json::from_value(user_schema()).unwrap();
        assert_eq!(
            schema.leaf_paths(),
            vec!["name", "favorite_number", "home.city", "home.zip", "work.city", "work.zip", "tags"]
        );
    }

    #[test]
    fn test_recursive_record_listed_once() {
        let schema = RecordSchema::parse(&json!({
            "type": "record",
            "name": "node",
            "fields": [
                {"name": "value", "type": "long"},
                {"name": "next", "type": ["null", "node"]}
            ]
        }))
        .unwrap();
        assert_eq!(schema.leaf_paths(), vec!["value", "next"]);
    }

    #[test]
    fn test_root_must_be_record() {
        assert!(RecordSchema::parse(&json!("string")).is_err());
        assert!(RecordSchema::parse(&json!({"type": "enum", "name": "e", "symbols": ["A"]})).is_err());
        assert!(RecordSchema::parse_str(r#"{"type": "record", "name": "r", "fields": [{"name": "a", "type": "missing"}]}"#).is_err());
    }
}
