//! Intermediate type representation for source columns

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fallback for native types the source does not map
pub const DEFAULT_DATA_TYPE: &str = "string";

/// `{type, elementType?, name?, symbols?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "elementType", skip_serializing_if = "Option::is_none", default)]
    pub element_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub symbols: Option<Vec<String>>,
}

/// Map a native column type through the source's type map
///
/// Unknown native types degrade to `string`. Maps and arrays carry their
/// element type; enums carry the column name and symbols.
pub fn convert_data_type(
    type_map: &HashMap<String, String>,
    column: &str,
    native_type: &str,
    element_type: Option<&str>,
    symbols: &[String],
) -> DataType {
    let kind = type_map
        .get(native_type)
        .map(String::as_str)
        .unwrap_or(DEFAULT_DATA_TYPE);

    let mut data_type = DataType {
        kind: kind.to_string(),
        element_type: None,
        name: None,
        symbols: None,
    };
    match kind {
        "map" | "array" => data_type.element_type = element_type.map(str::to_string),
        "enum" => {
            data_type.name = Some(column.to_string());
            data_type.symbols = Some(symbols.to_vec());
        }
        _ => {}
    }
    data_type
}
