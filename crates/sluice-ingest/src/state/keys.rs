//! Property keys understood by the pipeline
//!
//! Keys marked "per branch" are looked up through `Branch::key`.

pub const JOB_NAME: &str = "job.name";

// ============================================================================
// Source / extract
// ============================================================================

pub const SOURCE_SCHEMA: &str = "source.schema";
pub const SOURCE_ENTITY: &str = "source.entity";
/// none, simple, date, hour, timestamp
pub const SOURCE_WATERMARK_TYPE: &str = "source.watermark.type";
pub const SOURCE_SKIP_HIGH_WATERMARK_CALC: &str = "source.skip.high.watermark.calc";
pub const SOURCE_IS_HOURLY_EXTRACT: &str = "source.is.hourly.extract";
pub const SOURCE_HOUR_COLUMN: &str = "source.hour.column";
/// Per-call timeout in milliseconds
pub const SOURCE_TIMEOUT_MS: &str = "source.timeout.ms";
pub const EXTRACT_DELTA_FIELDS: &str = "extract.delta.fields";
pub const EXTRACT_PRIMARY_KEY_FIELDS: &str = "extract.primary.key.fields";
pub const EXTRACT_IS_FULL: &str = "extract.is.full";

// ============================================================================
// Converters (per branch)
// ============================================================================

/// Comma-separated converter names, e.g. `field_pick,row`
pub const CONVERTER_CLASSES: &str = "converter.classes";
/// Comma-separated dotted field paths kept by the field-pick converter
pub const CONVERTER_FIELD_PICK_FIELDS: &str = "converter.field_pick.fields";
/// JSON object column -> DATE|TIME|TIMESTAMP, written by the date-column initializer
pub const CONVERTER_ROW_DATE_FIELDS: &str = "converter.row.date_fields";

pub const CONVERTER_FIELD_PICK: &str = "field_pick";
pub const CONVERTER_ROW: &str = "row";

// ============================================================================
// Fork
// ============================================================================

pub const FORK_BRANCHES: &str = "fork.branches";

// ============================================================================
// Writer / publisher (per branch)
// ============================================================================

/// mysql, postgres, memory; enables the staging-table initializer
pub const WRITER_DESTINATION_TYPE: &str = "writer.destination.type";
pub const WRITER_STAGING_TABLE: &str = "writer.staging.table";
pub const WRITER_BATCH_SIZE: &str = "writer.batch.size";
pub const PUBLISHER_FINAL_TABLE: &str = "publisher.final.table";
/// Replace final-table contents instead of appending
pub const PUBLISHER_REPLACE_FINAL: &str = "publisher.replace.final";
