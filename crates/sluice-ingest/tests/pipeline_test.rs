//! End-to-end job runs against the in-memory sink
//!
//! Covers the one-time initializer broadcast across parallel partitions,
//! staging publish, and watermark carry-over between runs.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sluice_ingest::error::SourceError;
use sluice_ingest::extract::{Predicate, SourceProtocol, WatermarkType};
use sluice_ingest::job::{JobCoordinator, SourceFactory};
use sluice_ingest::projection::RecordSchema;
use sluice_ingest::state::{keys, next_low_watermarks, MemoryStateStore, State, StateStore, TaskStatus, WorkUnit};
use sluice_ingest::writer::memory::Statement;
use sluice_ingest::writer::{MemoryCommandsFactory, MemoryDatabase, SinkValue, StagingPublisher};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const JOB: &str = "orders";
// 2024-03-05T14:30:00Z
const PLACED_MILLIS: i64 = 1_709_649_000_000;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sluice_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Serves two pages per region: ids 1 and 2, then id 3
struct RegionSource {
    region: String,
    pages: VecDeque<Vec<Value>>,
    fail_pull: bool,
}

#[async_trait]
impl SourceProtocol for RegionSource {
    type Schema = RecordSchema;
    type Record = Value;

    async fn extract_metadata(&mut self, _: &str, entity: &str, _: &WorkUnit) -> Result<RecordSchema, SourceError> {
        RecordSchema::parse(&json!({
            "type": "record",
            "name": entity,
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "placed", "type": {"type": "long", "logicalType": "timestamp-millis"}},
                {"name": "region", "type": "string"},
                {"name": "internal_note", "type": ["null", "string"], "default": null}
            ]
        }))
        .map_err(|e| SourceError::Query(e.to_string()))
    }

    async fn get_max_watermark(
        &mut self,
        _: &str,
        _: &str,
        _: &str,
        _: &[Predicate],
        _: WatermarkType,
    ) -> Result<Option<i64>, SourceError> {
        Ok(Some(3))
    }

    async fn get_source_count(&mut self, _: &str, _: &str, _: &WorkUnit, _: &[Predicate]) -> Result<u64, SourceError> {
        Ok(3)
    }

    async fn get_record_set(
        &mut self,
        _: &str,
        _: &str,
        _: &WorkUnit,
        _: &[Predicate],
    ) -> Result<Option<Vec<Value>>, SourceError> {
        if self.fail_pull {
            return Err(SourceError::Query(format!("{} replica unavailable", self.region)));
        }
        Ok(self.pages.pop_front())
    }

    fn data_type_map(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

#[derive(Default)]
struct RegionSources {
    failing: Option<String>,
    opened: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl SourceFactory for RegionSources {
    type Protocol = RegionSource;

    async fn open(&self, work_unit: &WorkUnit) -> Result<RegionSource, SourceError> {
        let region = work_unit.entity().to_string();
        if let Ok(mut opened) = self.opened.lock() {
            opened.push((region.clone(), work_unit.low_watermark));
        }
        let record = |id: i64| {
            json!({"id": id, "placed": PLACED_MILLIS, "region": region, "internal_note": "drop me"})
        };
        Ok(RegionSource {
            fail_pull: self.failing.as_deref() == Some(region.as_str()),
            pages: VecDeque::from(vec![vec![record(1), record(2)], vec![record(3)]]),
            region,
        })
    }
}

fn job_state() -> State {
    State::new()
        .with_prop(keys::JOB_NAME, JOB)
        .with_prop(keys::SOURCE_SCHEMA, "sales")
        .with_prop(keys::SOURCE_WATERMARK_TYPE, "simple")
        .with_prop(keys::EXTRACT_DELTA_FIELDS, "id")
        .with_prop(keys::CONVERTER_CLASSES, "field_pick,row")
        .with_prop(keys::CONVERTER_FIELD_PICK_FIELDS, "id,placed,region")
        .with_prop(keys::WRITER_DESTINATION_TYPE, "memory")
        .with_prop(keys::PUBLISHER_FINAL_TABLE, "orders")
}

fn work_units() -> Vec<WorkUnit> {
    ["eu", "us", "apac"]
        .iter()
        .enumerate()
        .map(|(seq, region)| {
            let state = job_state().with_prop(keys::SOURCE_ENTITY, *region);
            WorkUnit::new(JOB, seq, state).with_watermarks(-1, 1_000)
        })
        .collect()
}

async fn sink() -> Result<MemoryDatabase> {
    let db = MemoryDatabase::new();
    db.create_table(
        "orders",
        &[("id", "bigint"), ("placed", "timestamp"), ("region", "varchar")],
    )
    .await?;
    Ok(db)
}

fn coordinator(
    db: &MemoryDatabase,
    sources: Arc<RegionSources>,
    store: Arc<MemoryStateStore>,
) -> JobCoordinator<RegionSources> {
    let commands = Arc::new(MemoryCommandsFactory::new(db.clone(), 2));
    JobCoordinator::new(JOB, job_state(), sources, commands.clone(), store)
        .with_publisher(Box::new(StagingPublisher::new(commands)))
        .with_max_concurrent_tasks(3)
}

fn count(statements: &[Statement], pred: impl Fn(&Statement) -> bool) -> usize {
    statements.iter().filter(|s| pred(s)).count()
}

#[tokio::test]
async fn test_initializer_runs_once_and_every_partition_sees_its_output() -> Result<()> {
    init_tracing();
    let db = sink().await?;
    let store = Arc::new(MemoryStateStore::new());

    let report = coordinator(&db, Arc::new(RegionSources::default()), store.clone())
        .run(work_units())
        .await?;

    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.records, 9);
    assert!(report.published);

    let statements = db.statements().await;
    assert_eq!(count(&statements, |s| matches!(s, Statement::Introspect { .. })), 1);
    assert_eq!(count(&statements, |s| matches!(s, Statement::CreateFromReference { .. })), 1);

    let date_fields: Vec<_> = report
        .states
        .iter()
        .map(|s| s.work_unit.state.get(keys::CONVERTER_ROW_DATE_FIELDS).map(str::to_string))
        .collect();
    assert_eq!(date_fields.len(), 3);
    assert!(date_fields.iter().all(|d| d.as_deref() == Some(r#"{"placed":"TIMESTAMP"}"#)));

    let staging: Vec<_> = report
        .states
        .iter()
        .map(|s| s.work_unit.state.get(keys::WRITER_STAGING_TABLE).map(str::to_string))
        .collect();
    assert!(staging[0].is_some());
    assert!(staging.iter().all(|t| *t == staging[0]));
    Ok(())
}

#[tokio::test]
async fn test_rows_are_projected_typed_and_published() -> Result<()> {
    init_tracing();
    let db = sink().await?;
    let store = Arc::new(MemoryStateStore::new());

    coordinator(&db, Arc::new(RegionSources::default()), store)
        .run(work_units())
        .await?;

    let orders = db.table("orders").await.expect("final table");
    assert_eq!(orders.rows.len(), 9);
    for row in &orders.rows {
        assert!(row.get("internal_note").is_none());
        assert!(matches!(row.get("placed"), Some(SinkValue::Timestamp(_))));
    }

    // staging table created for the run is gone again
    assert_eq!(db.table_names().await, vec!["orders".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_staged_rows_are_published_without_explicit_publisher() -> Result<()> {
    init_tracing();
    let db = sink().await?;
    let store = Arc::new(MemoryStateStore::new());
    let commands = Arc::new(MemoryCommandsFactory::new(db.clone(), 2));

    let report = JobCoordinator::new(JOB, job_state(), Arc::new(RegionSources::default()), commands, store.clone())
        .with_max_concurrent_tasks(3)
        .run(work_units())
        .await?;

    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert!(report.published);
    assert_eq!(report.committed(), 3);
    assert_eq!(db.table("orders").await.expect("final table").rows.len(), 9);
    assert_eq!(db.table_names().await, vec!["orders".to_string()]);

    let lows = next_low_watermarks(&store.load_previous(JOB).await?);
    assert!(lows.values().all(|low| *low == 3));
    Ok(())
}

#[tokio::test]
async fn test_next_run_resumes_from_committed_high_watermark() -> Result<()> {
    init_tracing();
    let db = sink().await?;
    let store = Arc::new(MemoryStateStore::new());

    let first = coordinator(&db, Arc::new(RegionSources::default()), store.clone())
        .run(work_units())
        .await?;
    assert_eq!(first.committed(), 3);
    assert!(first.states.iter().all(|s| s.actual_high_watermark == Some(3)));

    let sources = Arc::new(RegionSources::default());
    coordinator(&db, sources.clone(), store.clone())
        .run(work_units())
        .await?;

    let opened = sources.opened.lock().expect("lock").clone();
    assert_eq!(opened.len(), 3);
    assert!(opened.iter().all(|(_, low)| *low == 3));
    Ok(())
}

#[tokio::test]
async fn test_failed_partition_blocks_publish_and_watermark_advance() -> Result<()> {
    init_tracing();
    let db = sink().await?;
    let store = Arc::new(MemoryStateStore::new());
    let sources = Arc::new(RegionSources {
        failing: Some("apac".to_string()),
        ..Default::default()
    });

    let report = coordinator(&db, sources, store.clone()).run(work_units()).await?;

    assert!(!report.is_success());
    assert!(!report.published);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.committed(), 0);
    assert!(db.table("orders").await.expect("final table").rows.is_empty());

    let committed = store.load_previous(JOB).await?;
    assert_eq!(committed.len(), 3);
    assert!(committed.iter().all(|s| s.status != TaskStatus::Committed));
    let lows = next_low_watermarks(&committed);
    assert!(lows.values().all(|low| *low == -1));
    Ok(())
}
