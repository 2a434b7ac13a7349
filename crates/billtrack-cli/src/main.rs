use std::sync::Arc;

use anyhow::{Context, Result};
use billtrack_sync::{SyncConfig, SyncInput, SyncPipeline};
use billtrack_vector::{probe_destination, query_similar, VectorStore};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "billtrack")]
#[command(about = "NY Senate signed-bill harvester and vector index sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Probe counts, crawl when needed and upload into an empty index.
    Sync(RunArgs),
    /// Print the source and destination counts and the decision a sync would take.
    Check {
        #[arg(long)]
        force: bool,
    },
    /// Describe the destination index and sample a few matches.
    Status,
    /// Similarity search over the destination index.
    Query {
        text: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Copy the dataset into the backup directory.
    Backup,
    /// Copy the backup directory back into the dataset.
    Restore,
    /// Run sync on the configured cron schedule until interrupted.
    Schedule(RunArgs),
}

#[derive(Debug, Args, Default)]
struct RunArgs {
    /// Crawl and upload regardless of counts.
    #[arg(long)]
    force: bool,
    #[arg(long)]
    skip_upload: bool,
    #[arg(long)]
    max_requests: Option<usize>,
    /// Listing URL to start from; repeatable.
    #[arg(long = "start-url")]
    start_urls: Vec<String>,
}

impl RunArgs {
    fn apply(self, mut input: SyncInput) -> SyncInput {
        input.force_run |= self.force;
        input.skip_upload |= self.skip_upload;
        if let Some(max) = self.max_requests {
            input.max_requests_per_crawl = max;
        }
        if !self.start_urls.is_empty() {
            input.start_urls = self.start_urls;
        }
        input
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn load_input(config: &SyncConfig, args: RunArgs) -> Result<SyncInput> {
    let input = SyncInput::load_or_default(&config.input_path).await?;
    Ok(args.apply(input))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync(RunArgs::default())) {
        Commands::Sync(args) => {
            let input = load_input(&config, args).await?;
            let pipeline = SyncPipeline::new(config)?;
            let summary = pipeline.run_once(&input).await?;
            println!(
                "sync complete: run_id={} crawl={} upload={} new={} deferred={} reports={}",
                summary.run_id,
                summary.decision.should_crawl,
                summary.upload.is_some(),
                summary.new_titles().len(),
                summary.upload_deferred_records,
                summary.reports_dir
            );
        }
        Commands::Check { force } => {
            let pipeline = SyncPipeline::new(config)?;
            print_json(&pipeline.check_counts(force).await)?;
        }
        Commands::Status => {
            let pipeline = SyncPipeline::new(config)?;
            let index = pipeline.config().index_name.clone();
            let indexes = pipeline
                .store()
                .list_indexes()
                .await
                .context("listing indexes")?;
            for entry in &indexes {
                println!("index {} host={}", entry.name, entry.host);
            }
            let probe = probe_destination(pipeline.store(), &index).await;
            match &probe.snapshot {
                Some(snapshot) => print_json(snapshot)?,
                None => println!("index {index}: {}", probe.observation),
            }
            if probe.index_exists {
                let sample = query_similar(
                    pipeline.store(),
                    pipeline.embedder(),
                    &index,
                    "bill signed into law",
                    3,
                )
                .await
                .context("sampling index")?;
                print_json(&sample)?;
            }
        }
        Commands::Query { text, top_k } => {
            let pipeline = SyncPipeline::new(config)?;
            let index = pipeline.config().index_name.clone();
            let matches = query_similar(pipeline.store(), pipeline.embedder(), &index, &text, top_k)
                .await
                .context("querying index")?;
            print_json(&matches)?;
        }
        Commands::Backup => {
            let report = billtrack_sync::backup_dataset(&config).await?;
            println!("backed up {} of {} files", report.copied, report.total);
        }
        Commands::Restore => {
            let report = billtrack_sync::restore_dataset(&config).await?;
            println!("restored {} of {} files", report.copied, report.total);
        }
        Commands::Schedule(args) => {
            let input = load_input(&config, args).await?;
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let mut sched = billtrack_sync::build_scheduler(pipeline, input).await?;
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
