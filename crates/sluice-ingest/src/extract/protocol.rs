//! Source protocol consumed by the extractor
//!
//! Concrete clients (REST, JDBC, files) implement [`SourceProtocol`]; the
//! extractor only drives the lifecycle around them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::predicate::Predicate;
use super::watermark::{IdentityFormatter, WatermarkFormatter, WatermarkType};
use crate::error::SourceError;
use crate::state::WorkUnit;

#[async_trait]
pub trait SourceProtocol: Send {
    type Schema: Clone + Send + Sync;
    type Record: Send;

    /// Per-call timeout from `source.timeout.ms`; applied before any other call
    fn set_timeout(&mut self, _timeout: Option<Duration>) {}

    /// Schema of `schema.entity`; predicate independent
    async fn extract_metadata(
        &mut self,
        schema: &str,
        entity: &str,
        work_unit: &WorkUnit,
    ) -> Result<Self::Schema, SourceError>;

    /// Largest value of `column` under `predicates`, `None` when no row qualifies
    async fn get_max_watermark(
        &mut self,
        schema: &str,
        entity: &str,
        column: &str,
        predicates: &[Predicate],
        watermark_type: WatermarkType,
    ) -> Result<Option<i64>, SourceError>;

    /// Expected number of records under `predicates`
    async fn get_source_count(
        &mut self,
        schema: &str,
        entity: &str,
        work_unit: &WorkUnit,
        predicates: &[Predicate],
    ) -> Result<u64, SourceError>;

    /// Next page of records; `None` or an empty page means no more data
    async fn get_record_set(
        &mut self,
        schema: &str,
        entity: &str,
        work_unit: &WorkUnit,
        predicates: &[Predicate],
    ) -> Result<Option<Vec<Self::Record>>, SourceError>;

    /// Native type name -> string, map, array, enum, record, numeric, boolean
    fn data_type_map(&self) -> HashMap<String, String>;

    fn watermark_formatter(&self) -> &dyn WatermarkFormatter {
        &IdentityFormatter
    }
}
