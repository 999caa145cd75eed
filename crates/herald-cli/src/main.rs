use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use herald_client::{HttpArticleExtractor, HttpFeedReader};
use herald_core::item::{ItemStatus, NewItem, NewsItem};
use herald_core::source::NewSource;
use herald_core::traits::{ContentExtractor, ItemStore, SourceStore};
use herald_core::{
    FeedPuller, JobScheduler, LifoJobQueue, MetricsSink, PipelineConfig, RateLimiter, TracingMetrics,
    TracingWorkerReporter, WorkerPool,
};
use herald_db::{Database, DatabaseConfig, ItemRepository, SourceRepository};

mod telemetry;

#[derive(Parser)]
#[command(name = "herald", version, about = "News scrape-job pipeline")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feed puller, scheduler and worker pool until Ctrl-C
    Run(RunArgs),

    /// Read every registered feed once and save new items
    Pull,

    /// Manage the feeds new items are discovered on
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },

    /// Add a pending news item
    Add {
        /// Article URL
        #[arg(short, long)]
        url: String,

        /// Feed or site the item was discovered on
        #[arg(short, long, default_value = "manual")]
        source: String,

        /// Headline
        #[arg(short, long, default_value = "")]
        title: String,
    },

    /// List items, newest first
    List {
        /// Only show items in this status (pending, in_queue, scraped, retry, failed)
        #[arg(short, long)]
        status: Option<ItemStatus>,

        /// Number of items to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show item counts per status
    Stats,

    /// Extract a single article and print it as JSON (no database needed)
    Extract {
        /// Target URL
        #[arg(short, long)]
        url: String,
    },
}

#[derive(Subcommand)]
enum SourceCommand {
    /// Register an RSS or Atom feed
    Add {
        /// Unique source name, stamped on every item from this feed
        #[arg(short, long)]
        name: String,

        /// Feed URL
        #[arg(short, long)]
        url: String,
    },

    /// List registered feeds
    List,
}

/// Overrides for the `HERALD_*` pipeline settings.
#[derive(Args)]
struct RunArgs {
    /// Don't pull feeds; only scrape items that are already stored
    #[arg(long)]
    no_pull: bool,

    /// OTLP gRPC endpoint for metrics export (e.g. http://localhost:4317)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    metrics_endpoint: Option<String>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Items reserved per scheduling cycle
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between scheduling cycles
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// In-memory job queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(workers) = self.workers {
            config.worker.worker_count = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.scheduler.batch_size = batch_size;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.scheduler.poll_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let db = connect_db(cli.database_url).await?;
            cmd_run(&db, &args).await?;
        }
        Commands::Pull => {
            let db = connect_db(cli.database_url).await?;
            cmd_pull(&db).await?;
        }
        Commands::Source { command } => {
            let db = connect_db(cli.database_url).await?;
            match command {
                SourceCommand::Add { name, url } => {
                    cmd_source_add(&db.source_repo(), NewSource::new(name, url)).await?;
                }
                SourceCommand::List => cmd_source_list(&db.source_repo()).await?,
            }
        }
        Commands::Add { url, source, title } => {
            let db = connect_db(cli.database_url).await?;
            cmd_add(&db.item_repo(), NewItem::new(source, url, title)).await?;
        }
        Commands::List { status, limit } => {
            let db = connect_db(cli.database_url).await?;
            cmd_list(&db.item_repo(), status, limit).await?;
        }
        Commands::Stats => {
            let db = connect_db(cli.database_url).await?;
            cmd_stats(&db.item_repo()).await?;
        }
        Commands::Extract { url } => cmd_extract(&url).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL and apply pending migrations.
async fn connect_db(database_url: Option<String>) -> Result<Database> {
    let config = DatabaseConfig::from_lookup(|name| match (name, &database_url) {
        ("DATABASE_URL", Some(url)) => Some(url.clone()),
        _ => std::env::var(name).ok(),
    })
    .context("Invalid database configuration")?;

    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;

    Ok(db)
}

async fn cmd_run(db: &Database, args: &RunArgs) -> Result<()> {
    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid pipeline configuration")?;

    let repo = db.item_repo();
    let queue = Arc::new(LifoJobQueue::new(config.queue_capacity)?);
    let (metrics, _metrics_guard) =
        telemetry::init_metrics(args.metrics_endpoint.as_deref(), &queue)?;
    let limiter = RateLimiter::new(config.rate_limiter.clone())?;
    let extractor = HttpArticleExtractor::new().context("Failed to create HTTP client")?;

    let puller = if args.no_pull {
        None
    } else {
        Some(FeedPuller::new(
            repo.clone(),
            db.source_repo(),
            HttpFeedReader::new().context("Failed to create HTTP client")?,
            config.puller.clone(),
            Arc::clone(&metrics),
        )?)
    };
    let scheduler = JobScheduler::new(
        repo.clone(),
        Arc::clone(&queue),
        config.scheduler.clone(),
        Arc::clone(&metrics),
    )?;
    let pool = WorkerPool::new(
        Arc::clone(&queue),
        limiter,
        extractor,
        repo,
        config.worker.clone(),
        metrics,
    )?;

    tracing::info!(
        workers = config.worker.worker_count,
        queue_capacity = config.queue_capacity,
        batch_size = config.scheduler.batch_size,
        pull_feeds = puller.is_some(),
        "Starting scrape pipeline"
    );

    // Any component stopping on its own brings the whole pipeline down.
    let shutdown = CancellationToken::new();
    let puller_task = puller.map(|puller| {
        let guard = shutdown.clone().drop_guard();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let _guard = guard;
            puller.run(cancel).await
        })
    });
    let scheduler_task = {
        let guard = shutdown.clone().drop_guard();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let _guard = guard;
            scheduler.run(cancel).await
        })
    };
    let workers_task = {
        let guard = shutdown.clone().drop_guard();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let _guard = guard;
            pool.run(cancel, Arc::new(TracingWorkerReporter)).await
        })
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to install Ctrl-C handler")?;
            tracing::info!("Shutdown signal received");
        }
        () = shutdown.cancelled() => {
            tracing::warn!("Pipeline component stopped unexpectedly, shutting down");
        }
    }
    shutdown.cancel();

    let (scheduler_result, workers_result) = tokio::join!(scheduler_task, workers_task);
    if let Some(task) = puller_task {
        task.await
            .context("Feed puller task panicked")?
            .context("Feed puller failed")?;
    }
    scheduler_result
        .context("Scheduler task panicked")?
        .context("Scheduler failed")?;
    workers_result
        .context("Worker pool task panicked")?
        .context("Worker pool failed")?;

    tracing::info!(queued = queue.len(), "Scrape pipeline stopped");
    Ok(())
}

async fn cmd_pull(db: &Database) -> Result<()> {
    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let puller = FeedPuller::new(
        db.item_repo(),
        db.source_repo(),
        HttpFeedReader::new().context("Failed to create HTTP client")?,
        config.puller,
        Arc::new(TracingMetrics),
    )?;

    let saved = puller.pull_all(&CancellationToken::new()).await?;
    println!("Saved {saved} new items");
    Ok(())
}

async fn cmd_source_add(repo: &SourceRepository, source: NewSource) -> Result<()> {
    let name = source.name.clone();
    let added = repo
        .add_sources(vec![source])
        .await
        .context("Failed to add source")?;

    if added == 0 {
        println!("Source '{name}' not added: name or URL already registered");
    } else {
        tracing::info!(%name, "Registered source");
        println!("Added source '{name}'");
    }
    Ok(())
}

async fn cmd_source_list(repo: &SourceRepository) -> Result<()> {
    let sources = repo.list_sources().await?;
    if sources.is_empty() {
        println!("No sources registered");
        return Ok(());
    }

    for source in &sources {
        println!("  {:<24} {}", source.name, source.url);
    }
    println!("\nTotal: {} sources", sources.len());
    Ok(())
}

async fn cmd_add(repo: &ItemRepository, item: NewItem) -> Result<()> {
    let created = repo.create_item(item).await.context("Failed to add item")?;
    TracingMetrics.items_saved(1);
    tracing::info!(item_id = %created.id, url = %created.url, "Added pending item");

    println!("{}", serde_json::to_string_pretty(&created)?);
    Ok(())
}

async fn cmd_list(repo: &ItemRepository, status: Option<ItemStatus>, limit: usize) -> Result<()> {
    let mut items: Vec<NewsItem> = Vec::new();
    let statuses = match status {
        Some(status) => vec![status],
        None => ItemStatus::ALL.to_vec(),
    };
    for status in statuses {
        items.extend(repo.list_by_status(status, limit).await?);
    }
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items.truncate(limit);

    if items.is_empty() {
        println!("No items found");
        return Ok(());
    }

    for item in &items {
        let note = match (&item.error_message, item.retry_count) {
            (Some(error), _) => format!(" ({error})"),
            (None, 0) => String::new(),
            (None, retries) => format!(" (retries: {retries})"),
        };
        println!(
            "  [{:<8}] {} {} {}{}",
            item.status.as_str(),
            item.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            item.id,
            item.url,
            note,
        );
    }
    println!("\nTotal: {} items", items.len());

    Ok(())
}

async fn cmd_stats(repo: &ItemRepository) -> Result<()> {
    let mut total = 0;
    for status in ItemStatus::ALL {
        let count = repo.count_by_status(status).await?;
        total += count;
        println!("  {:<8} {count}", status.as_str());
    }
    println!("  {:<8} {total}", "total");
    Ok(())
}

async fn cmd_extract(url: &str) -> Result<()> {
    tracing::info!("Extracting {}", url);

    let extractor = HttpArticleExtractor::new().context("Failed to create HTTP client")?;
    let article = extractor.extract(url).await?;

    println!("{}", serde_json::to_string_pretty(&article)?);
    Ok(())
}
