//! Lead import orchestrator - runs fetch, parse, map, filter, write

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lead_import::config::{table_from_env, Backend, Config};
use lead_import::ingestion::pipeline::{self, ImportOptions};
use lead_import::ingestion::remote::{self, postgres::schema_sql, PgTable, RemoteTable};
use lead_import::ingestion::{fetch, Filter, ImportReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lead-import")]
#[command(about = "Import CRM lead exports into the leads table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    import: ImportArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read the CSV and write it to the remote table (default)
    Import(ImportArgs),
    /// Print the remote row count and a few stored rows
    Verify {
        /// Only sample rows where column=value
        #[arg(long = "where")]
        filter: Option<Filter>,
    },
    /// Delete every row of the remote table
    Purge {
        #[arg(long)]
        yes: bool,
    },
    /// Print the table schema, or apply it over a Postgres connection
    Schema {
        #[arg(long)]
        apply: bool,
    },
}

/// Overrides for the environment configuration
#[derive(Debug, Clone, Default, Args)]
struct ImportArgs {
    /// CSV file to import
    #[arg(long)]
    csv: Option<PathBuf>,

    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: Option<u64>,

    /// Pause between batches in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Disable row-level security while writing
    #[arg(long)]
    toggle_rls: bool,

    /// Delete existing rows before writing
    #[arg(long)]
    clear: bool,

    /// Write even when the table already holds rows
    #[arg(long)]
    allow_existing: bool,

    /// Read, map and filter only
    #[arg(long)]
    dry_run: bool,
}

impl ImportArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(csv) = &self.csv {
            config.csv_path = csv.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = usize::try_from(batch_size).unwrap_or(usize::MAX);
        }
        if let Some(delay_ms) = self.delay_ms {
            config.inter_batch_delay = Duration::from_millis(delay_ms);
        }
        config.toggle_rls |= self.toggle_rls;
        config.clear_before_import |= self.clear;
        config.allow_existing_rows |= self.allow_existing;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Import(cli.import)) {
        Commands::Import(args) => {
            let mut config = load_config()?;
            args.apply(&mut config);

            let run_id = Uuid::new_v4();
            run_import(config, args.dry_run, run_id)
                .instrument(info_span!("import", run_id = %run_id))
                .await
        }
        Commands::Verify { filter } => {
            verify(&load_config()?, &filter.unwrap_or(Filter::All)).await
        }
        Commands::Purge { yes } => {
            if !yes {
                bail!("Refusing to delete every row without --yes");
            }
            purge(&load_config()?).await
        }
        Commands::Schema { apply: false } => {
            let table = table_from_env().context("Failed to load configuration")?;
            println!("{}", schema_sql(&table));
            Ok(())
        }
        Commands::Schema { apply: true } => apply_schema(&load_config()?).await,
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    info!("Configuration loaded");
    Ok(config)
}

async fn run_import(config: Config, dry_run: bool, run_id: Uuid) -> Result<()> {
    info!("=== Lead Import ===");

    // Step 1: Locate the export
    info!("Step 1/4: Fetching CSV...");
    let raw = fetch::fetch_leads_csv(&config.csv_path)?;
    info!("✓ Fetch complete");

    // Step 2: Parse, map and filter
    info!("Step 2/4: Parsing and mapping...");
    let prepared = pipeline::prepare(raw)?;
    info!("✓ {} records ready", prepared.records.len());

    if prepared.unreadable_lines > 0 {
        warn!("{} CSV lines could not be read", prepared.unreadable_lines);
    }

    if dry_run {
        warn!("Dry run: nothing will be written");
        print_summary(&prepared.dry_run_report(run_id));
        return Ok(());
    }

    // Step 3: Connect
    info!("Step 3/4: Connecting to remote table...");
    let table = remote::connect(&config)
        .await
        .context("Failed to set up remote table")?;
    info!("✓ Connected (credential: {})", config.backend.tier());

    // Step 4: Write and verify
    info!("Step 4/4: Writing records...");
    let options = ImportOptions::from(&config);
    let report = pipeline::run_import(table.as_ref(), prepared, &options, run_id).await?;
    info!("✓ Write complete");

    print_summary(&report);

    Ok(())
}

async fn verify(config: &Config, filter: &Filter) -> Result<()> {
    let table = remote::connect(config).await?;
    let (count, sample) = pipeline::verify(table.as_ref(), filter, config.sample_size).await?;

    println!("📊 {} rows in {}", count, table.describe());
    for record in sample {
        println!("{}", serde_json::to_string(&record)?);
    }

    Ok(())
}

async fn purge(config: &Config) -> Result<()> {
    let table = remote::connect(config).await?;
    let deleted = pipeline::purge(table.as_ref()).await?;
    let remaining = table.count().await.context("Failed to recount remote rows")?;

    println!("🗑  Deleted {} rows, {} remaining", deleted, remaining);

    Ok(())
}

async fn apply_schema(config: &Config) -> Result<()> {
    let Backend::Postgres { database_url } = &config.backend else {
        bail!("Applying the schema needs a postgres:// REMOTE_URL");
    };

    let table = PgTable::connect(database_url, &config.table, config.request_timeout).await?;
    table.apply_schema().await?;
    println!("✅ Schema applied to {}", config.table);

    Ok(())
}

fn print_summary(report: &ImportReport) {
    let remote_count = report
        .final_remote_count
        .map_or_else(|| "unavailable".to_string(), |c| c.to_string());

    println!();
    println!("📊 Import summary (run {})", report.run_id);
    println!("   Rows read:        {}", report.rows_read);
    println!("   Dropped:          {}", report.dropped);
    println!("   Inserted:         {}", report.total_inserted);
    println!("   Errors:           {}", report.total_errors);
    println!("   Error rate:       {:.2}%", report.error_rate());
    println!("   Batches:          {} ({} retried row by row)", report.batches, report.failed_batches);
    println!("   Remote row count: {}", remote_count);
    if let Some(existing) = report.existing_rows {
        println!(
            "   ⚠️  Write skipped: table already held {} rows (use --clear or --allow-existing)",
            existing
        );
    }

    info!("Run summary: {}", report);
}
