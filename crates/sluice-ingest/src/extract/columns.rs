//! Column classification helpers for schema extraction
//!
//! Column lists are comma separated and compared case-insensitively.

fn lowered_list(list: &str) -> Vec<String> {
    list.to_lowercase().split(',').map(|c| c.trim().to_string()).collect()
}

/// Whether `column` is one of the configured delta (watermark) fields
pub fn is_watermark_column(delta_fields: Option<&str>, column: &str) -> bool {
    match delta_fields {
        Some(fields) if !fields.trim().is_empty() => {
            lowered_list(fields).contains(&column.trim().to_lowercase())
        }
        _ => false,
    }
}

/// 1-based position of `column` among the primary key fields, 0 when absent
pub fn primary_key_index(primary_key_fields: Option<&str>, column: &str) -> usize {
    match primary_key_fields {
        Some(fields) if !fields.trim().is_empty() => {
            let column = column.trim().to_lowercase();
            lowered_list(fields)
                .iter()
                .position(|c| *c == column)
                .map(|i| i + 1)
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Whether `column` belongs to a list of lowercase metadata columns
pub fn is_metadata_column(column: &str, metadata_columns: &[String]) -> bool {
    let column = column.trim().to_lowercase();
    metadata_columns.iter().any(|c| *c == column)
}
