//! Incremental extraction of one work unit
//!
//! Lifecycle: `build()` prepares the watermark window, predicates, schema and
//! expected count; `read_record()` serves records one page ahead of the
//! consumer; `close()` hands back the work unit state carrying the new high
//! watermark.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::columns;
use super::predicate::{range_predicates, Predicate};
use super::protocol::SourceProtocol;
use super::watermark::WatermarkType;
use crate::error::{BoxError, ExtractError, PrepareStage, SourceError};
use crate::state::{keys, WorkUnitState};

/// Lookahead state of the record stream
pub enum PullState<R> {
    NotStarted,
    /// Records from the last fetched page not yet handed out
    Buffered(VecDeque<R>),
    Exhausted,
}

struct Prepared<S> {
    schema: S,
    high_watermark: i64,
    predicates: Vec<Predicate>,
    expected_count: u64,
}

pub struct Extractor<P: SourceProtocol> {
    protocol: P,
    state: WorkUnitState,
    name: String,
    timeout: Option<Duration>,
    prepared: Option<Prepared<P::Schema>>,
    pull: PullState<P::Record>,
    page_fetches: usize,
}

async fn bounded<T, F>(timeout: Option<Duration>, call: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| SourceError::Timeout(limit))?,
        None => call.await,
    }
}

impl<P: SourceProtocol> Extractor<P> {
    pub fn new(protocol: P, state: WorkUnitState) -> Self {
        let name = state.display_name();
        Self {
            protocol,
            state,
            name,
            timeout: None,
            prepared: None,
            pull: PullState::NotStarted,
            page_fetches: 0,
        }
    }

    pub fn work_unit_name(&self) -> &str {
        &self.name
    }

    pub fn work_unit_state(&self) -> &WorkUnitState {
        &self.state
    }

    pub fn phase(&self) -> &'static str {
        match (&self.prepared, &self.pull) {
            (None, _) => "unprepared",
            (Some(_), PullState::NotStarted) => "prepared",
            (Some(_), PullState::Buffered(_)) => "pulling",
            (Some(_), PullState::Exhausted) => "exhausted",
        }
    }

    pub fn schema(&self) -> Option<&P::Schema> {
        self.prepared.as_ref().map(|p| &p.schema)
    }

    /// Monitoring estimate only
    pub fn expected_record_count(&self) -> Option<u64> {
        self.prepared.as_ref().map(|p| p.expected_count)
    }

    pub fn high_watermark(&self) -> Option<i64> {
        self.prepared.as_ref().map(|p| p.high_watermark)
    }

    pub fn predicates(&self) -> &[Predicate] {
        self.prepared
            .as_ref()
            .map(|p| p.predicates.as_slice())
            .unwrap_or(&[])
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches
    }

    /// Whether `column` is one of this unit's delta fields
    pub fn is_watermark_column(&self, column: &str) -> bool {
        columns::is_watermark_column(self.state.work_unit.state.get(keys::EXTRACT_DELTA_FIELDS), column)
    }

    /// 1-based position of `column` in this unit's primary key, 0 when absent
    pub fn primary_key_index(&self, column: &str) -> usize {
        columns::primary_key_index(self.state.work_unit.state.get(keys::EXTRACT_PRIMARY_KEY_FIELDS), column)
    }

    fn prepare_error(&self, stage: PrepareStage, source: impl Into<BoxError>) -> ExtractError {
        ExtractError::Prepare {
            work_unit: self.name.clone(),
            stage,
            source: source.into(),
        }
    }

    /// Prepare the extract; nothing is kept unless every step succeeds
    pub async fn build(&mut self) -> Result<(), ExtractError> {
        if self.prepared.is_some() {
            return Err(ExtractError::InvalidPhase {
                work_unit: self.name.clone(),
                operation: "build",
                phase: self.phase(),
            });
        }

        let unit = &self.state.work_unit;
        let low = unit.low_watermark;
        let configured_high = unit.high_watermark;
        info!(
            work_unit = %self.name,
            low_watermark = low,
            high_watermark = configured_high,
            "Preparing extract"
        );

        unit.validate_range()
            .map_err(|e| self.prepare_error(PrepareStage::Configuration, e))?;
        let watermark_type = match unit.state.get(keys::SOURCE_WATERMARK_TYPE) {
            Some(value) => value
                .parse::<WatermarkType>()
                .map_err(|e| self.prepare_error(PrepareStage::Configuration, e))?,
            None => WatermarkType::None,
        };
        let timeout = unit
            .state
            .get_i64(keys::SOURCE_TIMEOUT_MS)
            .map_err(|e| self.prepare_error(PrepareStage::Configuration, e))?
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms.unsigned_abs()));

        let schema_id = unit.schema().to_string();
        let entity = unit.entity().to_string();
        let delta_column = unit.state.get_list(keys::EXTRACT_DELTA_FIELDS).into_iter().next();
        let skip_high_calc = unit.state.get_bool(keys::SOURCE_SKIP_HIGH_WATERMARK_CALC);
        let full_dump = unit.is_full_dump();
        let hour_column = if unit.state.get_bool(keys::SOURCE_IS_HOURLY_EXTRACT) {
            unit.state.get(keys::SOURCE_HOUR_COLUMN).map(str::to_string)
        } else {
            None
        };

        self.timeout = timeout;
        self.protocol.set_timeout(timeout);

        let schema = bounded(
            self.timeout,
            self.protocol
                .extract_metadata(&schema_id, &entity, &self.state.work_unit),
        )
        .await
        .map_err(|e| self.prepare_error(PrepareStage::Schema, e))?;

        let mut high = configured_high;
        let mut predicates = Vec::new();
        if let Some(column) = delta_column.as_deref() {
            if !skip_high_calc {
                debug!(work_unit = %self.name, column = %column, "Getting high watermark");
                let window = range_predicates(
                    column,
                    watermark_type,
                    low,
                    configured_high,
                    self.protocol.watermark_formatter(),
                );
                let latest = bounded(
                    self.timeout,
                    self.protocol
                        .get_max_watermark(&schema_id, &entity, column, &window, watermark_type),
                )
                .await
                .map_err(|e| self.prepare_error(PrepareStage::HighWatermark, e))?;
                // No qualifying rows: nothing newer than the low watermark
                high = match latest {
                    Some(value) => value,
                    None if low >= 0 => low,
                    None => configured_high,
                };
            }

            if !full_dump {
                let formatter = self.protocol.watermark_formatter();
                predicates = range_predicates(column, watermark_type, low, high, formatter);
                if let Some(hour_column) = hour_column.as_deref() {
                    predicates.extend(range_predicates(
                        hour_column,
                        WatermarkType::Hour,
                        low,
                        high,
                        formatter,
                    ));
                }
            }
        }

        let expected_count = bounded(
            self.timeout,
            self.protocol
                .get_source_count(&schema_id, &entity, &self.state.work_unit, &predicates),
        )
        .await
        .map_err(|e| self.prepare_error(PrepareStage::RecordCount, e))?;

        info!(
            work_unit = %self.name,
            high_watermark = high,
            predicates = predicates.len(),
            expected_count,
            full_dump,
            "Prepared extract"
        );

        self.prepared = Some(Prepared {
            schema,
            high_watermark: high,
            predicates,
            expected_count,
        });
        Ok(())
    }

    async fn fetch_page(&mut self) -> Result<Option<VecDeque<P::Record>>, ExtractError> {
        let predicates = self
            .prepared
            .as_ref()
            .map(|p| p.predicates.as_slice())
            .unwrap_or(&[]);
        let unit = &self.state.work_unit;

        self.page_fetches += 1;
        let page = bounded(
            self.timeout,
            self.protocol
                .get_record_set(unit.schema(), unit.entity(), unit, predicates),
        )
        .await
        .map_err(|source| ExtractError::Pull {
            work_unit: self.name.clone(),
            source,
        })?;

        Ok(page.filter(|records| !records.is_empty()).map(VecDeque::from))
    }

    /// Next record, or `None` once the source is exhausted
    ///
    /// When handing out the last buffered record the next page is fetched
    /// first, so exhaustion is known before the consumer asks again. If that
    /// fetch fails the record stays buffered and the error is returned; a
    /// retry resumes from the same record.
    pub async fn read_record(&mut self) -> Result<Option<P::Record>, ExtractError> {
        if self.prepared.is_none() {
            return Err(ExtractError::InvalidPhase {
                work_unit: self.name.clone(),
                operation: "read records",
                phase: self.phase(),
            });
        }

        if matches!(self.pull, PullState::NotStarted) {
            debug!(work_unit = %self.name, "Initial pull");
            self.pull = match self.fetch_page().await? {
                Some(page) => PullState::Buffered(page),
                None => PullState::Exhausted,
            };
        }

        let (record, drained) = match &mut self.pull {
            PullState::Buffered(buffer) => match buffer.pop_front() {
                Some(record) => (record, buffer.is_empty()),
                None => {
                    self.pull = PullState::Exhausted;
                    return Ok(None);
                }
            },
            _ => return Ok(None),
        };

        if drained {
            debug!(work_unit = %self.name, "Next pull");
            match self.fetch_page().await {
                Ok(Some(page)) => self.pull = PullState::Buffered(page),
                Ok(None) => {
                    debug!(work_unit = %self.name, pages = self.page_fetches, "No more records");
                    self.pull = PullState::Exhausted;
                }
                Err(e) => {
                    warn!(work_unit = %self.name, error = %e, "Lookahead fetch failed");
                    if let PullState::Buffered(buffer) = &mut self.pull {
                        buffer.push_front(record);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Some(record))
    }

    /// Record the computed high watermark and release the source
    pub fn close(mut self) -> WorkUnitState {
        if let Some(prepared) = &self.prepared {
            self.state.actual_high_watermark = Some(prepared.high_watermark);
            info!(
                work_unit = %self.name,
                high_watermark = prepared.high_watermark,
                "Closed extract"
            );
        }
        self.state
    }

    /// Release the source without advancing the watermark
    pub fn abandon(self) -> WorkUnitState {
        debug!(work_unit = %self.name, phase = self.phase(), "Abandoned extract");
        self.state
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::state::{State, WorkUnit};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        log: Vec<String>,
        max_predicates: Vec<String>,
        count_predicates: Vec<String>,
    }

    struct PagedSource {
        pages: VecDeque<Result<Vec<u32>, String>>,
        max_watermark: Option<i64>,
        fail_schema: bool,
        calls: Arc<Mutex<Calls>>,
    }

    impl PagedSource {
        fn new(pages: Vec<Vec<u32>>) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            (
                Self {
                    pages: pages.into_iter().map(Ok).collect(),
                    max_watermark: Some(20240102000000),
                    fail_schema: false,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl SourceProtocol for PagedSource {
        type Schema = String;
        type Record = u32;

        async fn extract_metadata(
            &mut self,
            schema: &str,
            entity: &str,
            _work_unit: &WorkUnit,
        ) -> Result<String, SourceError> {
            self.calls.lock().unwrap().log.push("schema".into());
            if self.fail_schema {
                return Err(SourceError::Query("no such table".into()));
            }
            Ok(format!("{}.{}", schema, entity))
        }

        async fn get_max_watermark(
            &mut self,
            _schema: &str,
            _entity: &str,
            _column: &str,
            predicates: &[Predicate],
            _watermark_type: WatermarkType,
        ) -> Result<Option<i64>, SourceError> {
            let mut calls = self.calls.lock().unwrap();
            calls.log.push("max".into());
            calls.max_predicates = predicates.iter().map(Predicate::condition).collect();
            Ok(self.max_watermark)
        }

        async fn get_source_count(
            &mut self,
            _schema: &str,
            _entity: &str,
            _work_unit: &WorkUnit,
            predicates: &[Predicate],
        ) -> Result<u64, SourceError> {
            let mut calls = self.calls.lock().unwrap();
            calls.log.push("count".into());
            calls.count_predicates = predicates.iter().map(Predicate::condition).collect();
            Ok(3)
        }

        async fn get_record_set(
            &mut self,
            _schema: &str,
            _entity: &str,
            _work_unit: &WorkUnit,
            _predicates: &[Predicate],
        ) -> Result<Option<Vec<u32>>, SourceError> {
            self.calls.lock().unwrap().log.push("page".into());
            match self.pages.pop_front() {
                Some(Ok(page)) => Ok(Some(page)),
                Some(Err(message)) => Err(SourceError::Query(message)),
                None => Ok(None),
            }
        }

        fn data_type_map(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    fn unit_state(extra: &[(&str, &str)]) -> WorkUnitState {
        let mut state = State::new()
            .with_prop(keys::SOURCE_SCHEMA, "sales")
            .with_prop(keys::SOURCE_ENTITY, "orders")
            .with_prop(keys::EXTRACT_DELTA_FIELDS, "updated_at")
            .with_prop(keys::SOURCE_WATERMARK_TYPE, "timestamp");
        for (k, v) in extra {
            state.set_prop(*k, *v);
        }
        WorkUnitState::new(
            WorkUnit::with_id("nightly_20240101_0", state)
                .with_watermarks(20240101000000, 20240103000000),
        )
    }

    #[test]
    fn test_column_roles_come_from_unit_state() {
        let (source, _) = PagedSource::new(vec![]);
        let extractor = Extractor::new(
            source,
            unit_state(&[(keys::EXTRACT_PRIMARY_KEY_FIELDS, "tenant_id, order_id")]),
        );
        assert!(extractor.is_watermark_column("UPDATED_AT"));
        assert!(!extractor.is_watermark_column("order_id"));
        assert_eq!(extractor.primary_key_index("order_id"), 2);
        assert_eq!(extractor.primary_key_index("updated_at"), 0);
    }

    #[tokio::test]
    async fn test_lookahead_pull_fetches_three_pages() {
        let (source, calls) = PagedSource::new(vec![vec![1, 2], vec![3], vec![]]);
        let mut extractor = Extractor::new(source, unit_state(&[]));
        extractor.build().await.unwrap();

        assert_eq!(extractor.read_record().await.unwrap(), Some(1));
        assert_eq!(extractor.read_record().await.unwrap(), Some(2));
        assert_eq!(extractor.read_record().await.unwrap(), Some(3));
        assert_eq!(extractor.phase(), "exhausted");
        assert_eq!(extractor.read_record().await.unwrap(), None);
        assert_eq!(extractor.read_record().await.unwrap(), None);
        assert_eq!(extractor.page_fetches(), 3);

        let pages = calls.lock().unwrap().log.iter().filter(|c| *c == "page").count();
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_build_order_and_predicates() {
        let (source, calls) = PagedSource::new(vec![]);
        let mut extractor = Extractor::new(source, unit_state(&[]));
        extractor.build().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.log, vec!["schema", "max", "count"]);
        assert_eq!(
            calls.max_predicates,
            vec!["updated_at >= 20240101000000", "updated_at <= 20240103000000"]
        );
        assert_eq!(
            calls.count_predicates,
            vec!["updated_at >= 20240101000000", "updated_at <= 20240102000000"]
        );
        assert_eq!(extractor.high_watermark(), Some(20240102000000));
        assert_eq!(extractor.expected_record_count(), Some(3));
        assert_eq!(extractor.schema().map(String::as_str), Some("sales.orders"));
    }

    #[tokio::test]
    async fn test_hourly_extract_appends_hour_pair() {
        let (source, _calls) = PagedSource::new(vec![]);
        let mut extractor = Extractor::new(
            source,
            unit_state(&[
                (keys::SOURCE_IS_HOURLY_EXTRACT, "true"),
                (keys::SOURCE_HOUR_COLUMN, "hr"),
            ]),
        );
        extractor.build().await.unwrap();

        let conditions: Vec<_> = extractor.predicates().iter().map(Predicate::condition).collect();
        assert_eq!(
            conditions,
            vec![
                "updated_at >= 20240101000000",
                "updated_at <= 20240102000000",
                "hr >= 20240101000000",
                "hr <= 20240102000000",
            ]
        );
    }

    #[tokio::test]
    async fn test_skip_high_watermark_calc_uses_configured_high() {
        let (source, calls) = PagedSource::new(vec![]);
        let mut extractor = Extractor::new(
            source,
            unit_state(&[(keys::SOURCE_SKIP_HIGH_WATERMARK_CALC, "true")]),
        );
        extractor.build().await.unwrap();

        assert_eq!(extractor.high_watermark(), Some(20240103000000));
        assert!(!calls.lock().unwrap().log.contains(&"max".to_string()));
    }

    #[tokio::test]
    async fn test_full_dump_records_high_watermark_without_predicates() {
        let (source, _calls) = PagedSource::new(vec![vec![1]]);
        let mut extractor =
            Extractor::new(source, unit_state(&[(keys::EXTRACT_IS_FULL, "true")]));
        extractor.build().await.unwrap();
        assert!(extractor.predicates().is_empty());

        assert_eq!(extractor.read_record().await.unwrap(), Some(1));
        let state = extractor.close();
        assert_eq!(state.actual_high_watermark, Some(20240102000000));
    }

    #[tokio::test]
    async fn test_schema_failure_aborts_before_watermark_query() {
        let (mut source, calls) = PagedSource::new(vec![vec![1]]);
        source.fail_schema = true;
        let mut extractor = Extractor::new(source, unit_state(&[]));

        let err = extractor.build().await.unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Prepare { stage: PrepareStage::Schema, .. }
        ));
        assert_eq!(calls.lock().unwrap().log, vec!["schema"]);
        assert!(extractor.read_record().await.is_err());
        assert_eq!(extractor.abandon().actual_high_watermark, None);
    }

    #[tokio::test]
    async fn test_invalid_watermark_type_is_configuration_failure() {
        let (source, calls) = PagedSource::new(vec![]);
        let mut extractor =
            Extractor::new(source, unit_state(&[(keys::SOURCE_WATERMARK_TYPE, "weekly")]));
        let err = extractor.build().await.unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Prepare { stage: PrepareStage::Configuration, .. }
        ));
        assert!(calls.lock().unwrap().log.is_empty());
    }

    #[tokio::test]
    async fn test_failed_lookahead_keeps_record_for_retry() {
        let (mut source, _calls) = PagedSource::new(vec![vec![1]]);
        source.pages.push_back(Err("connection reset".into()));
        source.pages.push_back(Ok(vec![2]));
        let mut extractor = Extractor::new(source, unit_state(&[]));
        extractor.build().await.unwrap();

        let err = extractor.read_record().await.unwrap_err();
        assert!(matches!(err, ExtractError::Pull { .. }));
        assert_eq!(extractor.read_record().await.unwrap(), Some(1));
        assert_eq!(extractor.read_record().await.unwrap(), Some(2));
        assert_eq!(extractor.read_record().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_watermark_type_builds_no_predicates() {
        let (source, _calls) = PagedSource::new(vec![]);
        let mut state = unit_state(&[]);
        state.work_unit.state.remove_prop(keys::SOURCE_WATERMARK_TYPE);
        let mut extractor = Extractor::new(source, state);
        extractor.build().await.unwrap();
        assert!(extractor.predicates().is_empty());
        assert_eq!(extractor.read_record().await.unwrap(), None);
    }
}
