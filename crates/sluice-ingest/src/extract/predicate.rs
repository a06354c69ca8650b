//! Watermark range predicates

use serde::{Deserialize, Serialize};
use std::fmt;

use super::watermark::{decode_timestamp, WatermarkFormatter, WatermarkType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    GreaterOrEqual,
    LessOrEqual,
}

impl Comparison {
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessOrEqual => "<=",
        }
    }
}

/// One bound of a watermark range, already rendered for the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub watermark_type: WatermarkType,
    /// Raw watermark value the literal was built from
    pub value: i64,
    pub comparison: Comparison,
    /// Source-native rendering of `value`
    pub literal: String,
}

impl Predicate {
    /// `column <op> literal`
    pub fn condition(&self) -> String {
        format!("{} {} {}", self.column, self.comparison.operator(), self.literal)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.condition())
    }
}

/// Build one bound, or `None` when the bound does not apply
///
/// A bound is skipped for type NONE, for negative (unset) values, for temporal
/// types whose value is not a valid `yyyyMMddHHmmss` encoding, and when the
/// formatter cannot render it.
pub fn build_predicate(
    column: &str,
    watermark_type: WatermarkType,
    value: i64,
    comparison: Comparison,
    formatter: &dyn WatermarkFormatter,
) -> Option<Predicate> {
    if watermark_type == WatermarkType::None || value < 0 {
        return None;
    }
    if watermark_type.is_temporal() && decode_timestamp(value).is_none() {
        return None;
    }
    let literal = formatter.literal(watermark_type, value)?;
    Some(Predicate {
        column: column.to_string(),
        watermark_type,
        value,
        comparison,
        literal,
    })
}

/// Lower and upper bound for one column, omitting bounds that do not apply
pub fn range_predicates(
    column: &str,
    watermark_type: WatermarkType,
    low: i64,
    high: i64,
    formatter: &dyn WatermarkFormatter,
) -> Vec<Predicate> {
    [
        build_predicate(column, watermark_type, low, Comparison::GreaterOrEqual, formatter),
        build_predicate(column, watermark_type, high, Comparison::LessOrEqual, formatter),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Conjunction of all predicates, `None` when there are none
pub fn conjunction(predicates: &[Predicate]) -> Option<String> {
    if predicates.is_empty() {
        return None;
    }
    Some(
        predicates
            .iter()
            .map(Predicate::condition)
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}
