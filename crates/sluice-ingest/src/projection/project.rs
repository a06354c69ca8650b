//! Schema pruning and record projection

use apache_avro::schema::{RecordField, RecordSchema as AvroRecord, UnionSchema};
use apache_avro::Schema;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::schema::{join, RecordSchema};
use super::trie::TrieNode;
use crate::error::ProjectionError;

/// Keep only the fields reachable through `trie`
///
/// Depth 0 is the root record, so paths never start with its name. Kept
/// fields appear in the order of the input schema and leaf fields are copied
/// unchanged. A named type can be written only once: later uses with the same
/// shape become references, a different shape is an error.
pub fn project(schema: &RecordSchema, trie: &TrieNode) -> Result<RecordSchema, ProjectionError> {
    let mut projector = Projector {
        input: schema,
        emitted: HashMap::new(),
    };
    projector
        .emitted
        .insert(schema.full_name(), Emitted::Narrowed(trie.clone()));
    let root = projector.record(schema.avro_record(), trie, "")?;
    Ok(RecordSchema::from_record(root))
}

/// How a named type has been written into the output so far
enum Emitted {
    Whole,
    Narrowed(TrieNode),
}

struct Projector<'a> {
    input: &'a RecordSchema,
    emitted: HashMap<String, Emitted>,
}

impl<'a> Projector<'a> {
    fn record(
        &mut self,
        record: &'a AvroRecord,
        trie: &TrieNode,
        prefix: &str,
    ) -> Result<AvroRecord, ProjectionError> {
        for (name, _) in trie.children() {
            if !record.fields.iter().any(|f| f.name == name) {
                return Err(ProjectionError::UnknownField {
                    path: join(prefix, name),
                    schema: record.name.fullname(None),
                });
            }
        }

        let mut fields = Vec::new();
        for field in &record.fields {
            let Some(node) = trie.child(&field.name) else {
                continue;
            };
            let path = join(prefix, &field.name);
            let schema = if node.is_leaf() {
                self.whole(&field.schema, &path)?
            } else {
                self.narrowed(&field.schema, node, &path)?
            };
            let mut kept = field.clone();
            kept.schema = schema;
            kept.position = fields.len();
            fields.push(kept);
        }

        let mut output = record.clone();
        output.lookup = lookup(&fields);
        output.fields = fields;
        Ok(output)
    }

    /// Field type with its record part narrowed to `trie`
    fn narrowed(&mut self, schema: &'a Schema, trie: &TrieNode, path: &str) -> Result<Schema, ProjectionError> {
        let input = self.input;
        if input.nested_record(schema).is_none() {
            return Err(ProjectionError::NotARecord {
                path: path.to_string(),
            });
        }
        match schema {
            Schema::Union(union) => {
                let mut variants = Vec::with_capacity(union.variants().len());
                for variant in union.variants() {
                    if input.nested_record(variant).is_some() {
                        variants.push(self.named_record(variant, trie, path)?);
                    } else {
                        variants.push(variant.clone());
                    }
                }
                Ok(Schema::Union(union_of(variants, path)?))
            }
            _ => self.named_record(schema, trie, path),
        }
    }

    fn named_record(&mut self, schema: &'a Schema, trie: &TrieNode, path: &str) -> Result<Schema, ProjectionError> {
        let input = self.input;
        let record = input
            .nested_record(schema)
            .ok_or_else(|| ProjectionError::NotARecord {
                path: path.to_string(),
            })?;
        let full_name = record.name.fullname(None);
        match self.emitted.get(&full_name) {
            Some(Emitted::Narrowed(previous)) if previous == trie => {
                return Ok(Schema::Ref {
                    name: record.name.clone(),
                })
            }
            Some(_) => {
                return Err(ProjectionError::ConflictingNamedType {
                    name: full_name,
                    path: path.to_string(),
                })
            }
            None => {}
        }
        self.emitted.insert(full_name, Emitted::Narrowed(trie.clone()));
        Ok(Schema::Record(self.record(record, trie, path)?))
    }

    /// Field type kept as is, with named types defined at their first use
    fn whole(&mut self, schema: &'a Schema, path: &str) -> Result<Schema, ProjectionError> {
        let input = self.input;
        match schema {
            Schema::Ref { name } => match input.named(&name.fullname(None)) {
                Some(definition) if !self.emitted.contains_key(&name.fullname(None)) => {
                    self.whole(definition, path)
                }
                _ => self.reference(&name.fullname(None), schema, path),
            },
            Schema::Record(record) => {
                let full_name = record.name.fullname(None);
                if self.emitted.contains_key(&full_name) {
                    return self.reference(&full_name, schema, path);
                }
                self.emitted.insert(full_name, Emitted::Whole);
                let mut fields = Vec::with_capacity(record.fields.len());
                for field in &record.fields {
                    let mut kept = field.clone();
                    kept.schema = self.whole(&field.schema, &join(path, &field.name))?;
                    fields.push(kept);
                }
                let mut output = record.clone();
                output.fields = fields;
                Ok(Schema::Record(output))
            }
            Schema::Enum(inner) => self.named_leaf(inner.name.fullname(None), schema, path),
            Schema::Fixed(inner) => self.named_leaf(inner.name.fullname(None), schema, path),
            Schema::Array(array) => {
                let items = self.whole(&array.items, path)?;
                let mut output = array.clone();
                output.items = Box::new(items);
                Ok(Schema::Array(output))
            }
            Schema::Map(map) => {
                let types = self.whole(&map.types, path)?;
                let mut output = map.clone();
                output.types = Box::new(types);
                Ok(Schema::Map(output))
            }
            Schema::Union(union) => {
                let mut variants = Vec::with_capacity(union.variants().len());
                for variant in union.variants() {
                    variants.push(self.whole(variant, path)?);
                }
                Ok(Schema::Union(union_of(variants, path)?))
            }
            other => Ok(other.clone()),
        }
    }

    fn named_leaf(&mut self, full_name: String, schema: &Schema, path: &str) -> Result<Schema, ProjectionError> {
        if self.emitted.contains_key(&full_name) {
            return self.reference(&full_name, schema, path);
        }
        self.emitted.insert(full_name, Emitted::Whole);
        Ok(schema.clone())
    }

    /// Reference to a named type already written whole
    fn reference(&self, full_name: &str, schema: &Schema, path: &str) -> Result<Schema, ProjectionError> {
        let name = match schema {
            Schema::Ref { name } => name.clone(),
            Schema::Record(inner) => inner.name.clone(),
            Schema::Enum(inner) => inner.name.clone(),
            Schema::Fixed(inner) => inner.name.clone(),
            _ => return Ok(schema.clone()),
        };
        match self.emitted.get(full_name) {
            Some(Emitted::Narrowed(_)) => Err(ProjectionError::ConflictingNamedType {
                name: full_name.to_string(),
                path: path.to_string(),
            }),
            _ => Ok(Schema::Ref { name }),
        }
    }
}

fn union_of(variants: Vec<Schema>, path: &str) -> Result<UnionSchema, ProjectionError> {
    UnionSchema::new(variants).map_err(|e| ProjectionError::InvalidSchema {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn lookup(fields: &[RecordField]) -> BTreeMap<String, usize> {
    let mut lookup = BTreeMap::new();
    for field in fields {
        lookup.insert(field.name.clone(), field.position);
        for alias in field.aliases.iter().flatten() {
            lookup.insert(alias.clone(), field.position);
        }
    }
    lookup
}

/// Copy only the fields of `schema` out of `record`
///
/// Absent values fall back to the field default, then null.
pub fn convert_record(schema: &RecordSchema, record: &Value) -> Result<Value, ProjectionError> {
    convert_at(schema, schema.avro_record(), record, "")
}

fn convert_at(
    schema: &RecordSchema,
    record_schema: &AvroRecord,
    record: &Value,
    prefix: &str,
) -> Result<Value, ProjectionError> {
    let input = record.as_object().ok_or_else(|| ProjectionError::RecordMismatch {
        path: if prefix.is_empty() {
            record_schema.name.name.clone()
        } else {
            prefix.to_string()
        },
        message: "expected an object".to_string(),
    })?;

    let mut output = Map::new();
    for field in &record_schema.fields {
        let value = input
            .get(&field.name)
            .cloned()
            .or_else(|| field.default.clone())
            .unwrap_or(Value::Null);

        let value = match (schema.nested_record(&field.schema), &value) {
            (Some(nested), Value::Object(_)) => {
                convert_at(schema, nested, &value, &join(prefix, &field.name))?
            }
            _ => value,
        };
        output.insert(field.name.clone(), value);
    }
    Ok(Value::Object(output))
}
