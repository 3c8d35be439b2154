//! Retail ETL - extract, normalize and load the retail warehouse

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retail_common::logging::{init_logging, LogConfig, LogLevel};
use retail_etl::config::{PipelineConfig, DEFAULT_CONFIG_PATH};
use retail_etl::load::{LoadAdapter, MemoryLoader, PostgresLoader};
use retail_etl::normalize::WarehouseTable;
use retail_etl::pipeline::{jobs_from_config, Pipeline};
use retail_etl::sources::{RelationalReader, SourceDescriptor};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "retail-etl")]
#[command(author, version, about = "Retail data centralisation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, normalize and load the configured datasets
    Run {
        /// Pipeline configuration file (YAML or TOML)
        #[arg(short, long, env = "RETAIL_ETL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Only process these tables (repeatable)
        #[arg(long = "only", value_name = "TABLE")]
        only: Vec<String>,

        /// Load into memory instead of the destination database
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a configuration file without running it
    CheckConfig {
        #[arg(short, long, env = "RETAIL_ETL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// List the warehouse tables and their key columns
    Tables,

    /// List the tables of every relational source database
    SourceTables {
        #[arg(short, long, env = "RETAIL_ETL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

async fn run(config_path: PathBuf, only: Vec<String>, dry_run: bool) -> Result<bool> {
    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let only = only
        .iter()
        .map(|t| t.parse::<WarehouseTable>())
        .collect::<retail_common::Result<Vec<_>>>()?;

    let jobs = jobs_from_config(&config, &only)?;
    let loader: Arc<dyn LoadAdapter> = if dry_run {
        Arc::new(MemoryLoader::new())
    } else {
        Arc::new(PostgresLoader::new(&config.destination)?)
    };

    let report = Pipeline::new(loader, config.concurrency).run(jobs).await;
    print!("{}", report);

    if !report.is_success() {
        eprintln!("Failed datasets: {}", report.failed().join(", "));
    }
    Ok(report.is_success())
}

async fn source_tables(config_path: PathBuf) -> Result<()> {
    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let mut listed = HashSet::new();
    for dataset in &config.datasets {
        let SourceDescriptor::Relational(source) = &dataset.source else {
            continue;
        };
        if !listed.insert((source.database.url.clone(), source.database.schema.clone())) {
            continue;
        }

        let reader = RelationalReader::new(source.clone(), config.retry.clone())?;
        for table in reader.list_tables().await? {
            println!("{}.{}", source.database.schema, table);
        }
    }

    if listed.is_empty() {
        println!("No relational sources configured");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("retail-etl")
        .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            config,
            only,
            dry_run,
        } => {
            let success = run(config, only, dry_run).await?;
            info!(success, "Run complete");
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        },
        Command::CheckConfig { config } => {
            let loaded = PipelineConfig::load(&config)
                .with_context(|| format!("Invalid configuration {}", config.display()))?;
            jobs_from_config(&loaded, &[])?;
            println!(
                "{}: {} dataset(s), concurrency {}",
                config.display(),
                loaded.datasets.len(),
                loaded.concurrency
            );
            Ok(ExitCode::SUCCESS)
        },
        Command::SourceTables { config } => {
            source_tables(config).await?;
            Ok(ExitCode::SUCCESS)
        },
        Command::Tables => {
            for table in WarehouseTable::all() {
                let schema = table.schema();
                println!(
                    "{:<20} key={:<14} columns={}",
                    table.as_str(),
                    schema.key_column,
                    schema.rules.len()
                );
            }
            Ok(ExitCode::SUCCESS)
        },
    }
}
