//! Sluice - operational commands for the ingestion pipeline

use anyhow::{Context, Result};
use clap::Parser;
use sluice_common::logging::{init_logging, LogConfig, LogLevel};
use sluice_common::SluiceError;
use sluice_ingest::projection::{FieldPickConverter, RecordSchema};
use sluice_ingest::state::{next_low_watermarks, Branch, FsStateStore, State, StateStore};
use sluice_ingest::writer::{publish_staging, CommandsFactory, PublishMode, SqlCommandsFactory};
use sluice_ingest::SluiceConfig;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about = "Incremental ingestion pipeline tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML); `SLUICE__*` variables override it
    #[arg(short, long, env = "SLUICE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Apply a field selection to an Avro JSON record schema
    ProjectSchema {
        /// Schema file
        #[arg(short, long)]
        schema: PathBuf,

        /// Comma-separated dotted paths, e.g. `id,address.city`
        #[arg(short, long)]
        fields: String,
    },

    /// List the date-typed columns of a sink table
    DateColumns {
        #[arg(short, long)]
        table: String,
    },

    /// Copy a staging table into its final table
    Publish {
        #[arg(long)]
        staging: String,

        #[arg(long = "final")]
        final_table: String,

        /// Delete the final table's rows first
        #[arg(long)]
        replace: bool,

        /// Leave the staging table in place afterwards
        #[arg(long)]
        keep_staging: bool,
    },

    /// Show where the next run of a job resumes
    State {
        /// Job name (defaults to job.name from configuration)
        #[arg(short, long)]
        job: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sluice")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = SluiceConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::ProjectSchema { schema, fields } => {
            let input = read_schema(&schema)
                .with_context(|| format!("Failed to read schema {}", schema.display()))?;
            let mut converter = FieldPickConverter::new(&fields)?;
            let output = converter.convert_schema(&input)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        },
        Command::DateColumns { table } => {
            let factory = SqlCommandsFactory::new(config.sink.clone());
            let mut commands = factory.open(&State::new(), Branch::SINGLE).await?;
            let dates = commands.introspect_date_columns(&table).await;
            commands.close().await?;
            let dates = dates.with_context(|| format!("Failed to introspect {}", table))?;
            println!("{}", serde_json::to_string_pretty(&dates)?);
        },
        Command::Publish {
            staging,
            final_table,
            replace,
            keep_staging,
        } => {
            let mode = if replace {
                PublishMode::Replace
            } else {
                PublishMode::Append
            };
            let factory = SqlCommandsFactory::new(config.sink.clone());
            let mut commands = factory.open(&State::new(), Branch::SINGLE).await?;
            let outcome = publish_staging(commands.as_mut(), &staging, &final_table, mode, !keep_staging).await;
            commands.close().await?;
            let outcome = outcome?;
            info!(outcome = ?outcome, "Publish complete");
        },
        Command::State { job } => {
            let job = job.unwrap_or_else(|| config.job.name.clone());
            let store = FsStateStore::new(&config.job.state_dir);
            let previous = store.load_previous(&job).await?;
            let lows = next_low_watermarks(&previous);
            info!(job = %job, work_units = previous.len(), partitions = lows.len(), "Loaded job state");
            println!("{}", serde_json::to_string_pretty(&lows)?);
        },
    }

    Ok(())
}

fn read_schema(path: &Path) -> sluice_common::Result<RecordSchema> {
    let body = std::fs::read_to_string(path)?;
    let schema: RecordSchema = serde_json::from_str(&body)?;
    if schema.fields().is_empty() {
        return Err(SluiceError::invalid_property(
            path.display().to_string(),
            "record schema declares no fields",
        ));
    }
    Ok(schema)
}
