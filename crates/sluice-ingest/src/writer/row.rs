//! Projected JSON records to sink rows

use chrono::DateTime;
use serde_json::Value;
use std::collections::BTreeMap;

use super::commands::{DateType, Row, SinkValue};
use crate::error::{StateError, WriterError};
use crate::state::{keys, Branch, State};

/// Converts records for one branch, typing date columns from the
/// initializer-provided mapping
#[derive(Debug, Clone, Default)]
pub struct RowConverter {
    date_columns: BTreeMap<String, DateType>,
}

impl RowConverter {
    pub fn new(date_columns: BTreeMap<String, DateType>) -> Self {
        Self { date_columns }
    }

    /// Reads `converter.row.date_fields[.<branch>]`; absent means no date columns
    pub fn from_state(state: &State, branch: Branch) -> Result<Self, StateError> {
        let key = branch.key(keys::CONVERTER_ROW_DATE_FIELDS);
        let date_columns = match state.get(&key) {
            Some(json) => serde_json::from_str(json).map_err(|_| StateError::InvalidValue {
                key: key.clone(),
                value: json.to_string(),
            })?,
            None => BTreeMap::new(),
        };
        Ok(Self { date_columns })
    }

    pub fn date_columns(&self) -> &BTreeMap<String, DateType> {
        &self.date_columns
    }

    pub fn convert(&self, table: &str, record: &Value) -> Result<Row, WriterError> {
        let object = record.as_object().ok_or_else(|| WriterError::RowMismatch {
            table: table.to_string(),
            message: "record is not an object".to_string(),
        })?;

        let mut row = Row::new();
        for (column, value) in object {
            let converted = match self.date_columns.get(column) {
                Some(date_type) => temporal(table, column, *date_type, value)?,
                None => scalar(table, column, value)?,
            };
            row.push(column.clone(), converted);
        }
        Ok(row)
    }
}

/// Integers outside the signed 64-bit range are rejected rather than rounded
fn scalar(table: &str, column: &str, value: &Value) -> Result<SinkValue, WriterError> {
    Ok(match value {
        Value::Null => SinkValue::Null,
        Value::Bool(b) => SinkValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SinkValue::Int(i),
            (None, Some(f)) if !n.is_u64() => SinkValue::Float(f),
            _ => {
                return Err(WriterError::RowMismatch {
                    table: table.to_string(),
                    message: format!("column '{}' value {} does not fit a signed 64-bit integer", column, n),
                })
            }
        },
        Value::String(s) => SinkValue::Text(s.clone()),
        nested => SinkValue::Text(nested.to_string()),
    })
}

/// Epoch milliseconds (UTC) to the column's temporal type
fn temporal(table: &str, column: &str, date_type: DateType, value: &Value) -> Result<SinkValue, WriterError> {
    let millis = match value {
        Value::Null => return Ok(SinkValue::Null),
        Value::Number(n) => n.as_i64(),
        Value::String(s) => return Ok(SinkValue::Text(s.clone())),
        _ => None,
    };
    let ts = millis
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| WriterError::RowMismatch {
            table: table.to_string(),
            message: format!("column '{}' expects epoch milliseconds, got {}", column, value),
        })?
        .naive_utc();

    Ok(match date_type {
        DateType::Date => SinkValue::Date(ts.date()),
        DateType::Time => SinkValue::Time(ts.time()),
        DateType::Timestamp => SinkValue::Timestamp(ts),
    })
}
