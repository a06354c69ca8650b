//! Watermark types and literal formatting

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StateError;
use crate::state::keys;

/// Numeric encoding shared by DATE, HOUR and TIMESTAMP watermarks
pub const WATERMARK_ENCODING: &str = "%Y%m%d%H%M%S";

/// Semantic type of a watermark column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkType {
    None,
    Simple,
    Date,
    Hour,
    Timestamp,
}

impl WatermarkType {
    pub fn as_str(&self) -> &str {
        match self {
            WatermarkType::None => "none",
            WatermarkType::Simple => "simple",
            WatermarkType::Date => "date",
            WatermarkType::Hour => "hour",
            WatermarkType::Timestamp => "timestamp",
        }
    }

    /// Whether values must be valid `yyyyMMddHHmmss` encodings
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            WatermarkType::Date | WatermarkType::Hour | WatermarkType::Timestamp
        )
    }
}

impl fmt::Display for WatermarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatermarkType {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(WatermarkType::None),
            "simple" => Ok(WatermarkType::Simple),
            "date" => Ok(WatermarkType::Date),
            "hour" => Ok(WatermarkType::Hour),
            "timestamp" => Ok(WatermarkType::Timestamp),
            _ => Err(StateError::InvalidValue {
                key: keys::SOURCE_WATERMARK_TYPE.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Decode a `yyyyMMddHHmmss` watermark
pub fn decode_timestamp(value: i64) -> Option<NaiveDateTime> {
    if value < 0 {
        return None;
    }
    NaiveDateTime::parse_from_str(&value.to_string(), WATERMARK_ENCODING).ok()
}

/// Renders a bound as a source-native literal
///
/// Returning `None` means the value cannot be expressed for this type and the
/// predicate is omitted.
pub trait WatermarkFormatter: Send + Sync {
    fn literal(&self, watermark_type: WatermarkType, value: i64) -> Option<String>;
}

/// Emits the raw numeric value
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFormatter;

impl WatermarkFormatter for IdentityFormatter {
    fn literal(&self, _watermark_type: WatermarkType, value: i64) -> Option<String> {
        Some(value.to_string())
    }
}

/// Quoted SQL literals for SQL-speaking sources
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlLiteralFormatter;

impl WatermarkFormatter for SqlLiteralFormatter {
    fn literal(&self, watermark_type: WatermarkType, value: i64) -> Option<String> {
        let pattern = match watermark_type {
            WatermarkType::None => return None,
            WatermarkType::Simple => return Some(value.to_string()),
            WatermarkType::Date => "%Y-%m-%d",
            WatermarkType::Hour => "%H",
            WatermarkType::Timestamp => "%Y-%m-%d %H:%M:%S",
        };
        decode_timestamp(value).map(|ts| format!("'{}'", ts.format(pattern)))
    }
}
