//! workclaim CLI: operator interface to the work-claim queue.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use workclaim::clock::SystemClock;
use workclaim::config::Config;
use workclaim::config::secrets::ExposeSecret;
use workclaim::db::Db;
use workclaim::engine::{Claimer, Reaper, ReaperConfig, StepTracker};
use workclaim::model::work::{
    NewWorkItem, OwnerId, ResourceId, Step, WorkFilter, WorkId, WorkItem,
};
use workclaim::store::WorkStore;
use workclaim::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workclaim", about = "Persisted work-claim queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reaper loop until interrupted
    Serve,
    /// Run a single reaper sweep
    Sweep,
    /// Work item operations
    Work {
        #[command(subcommand)]
        action: WorkAction,
    },
}

#[derive(Subcommand)]
enum WorkAction {
    /// Schedule a new work item for a resource
    Submit {
        /// Resource the work pertains to
        resource: i64,
        /// Sequence number, scoped to the resource
        sequence: i64,
    },
    /// List work items
    List {
        /// Filter by step
        #[arg(long)]
        step: Option<String>,
        /// Filter by resource
        #[arg(long)]
        resource: Option<i64>,
        /// Include removed items
        #[arg(long)]
        removed: bool,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a work item
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Claim one scheduled work item
    Take {
        /// Worker identity recorded as the owner
        owner: String,
    },
    /// Mark a work item done or error
    Advance {
        /// Target step (done | error)
        step: String,
        /// Work item ID (full UUID or prefix)
        #[arg(long, conflicts_with_all = ["resource", "sequence"], required_unless_present = "resource")]
        id: Option<String>,
        /// Resource of the item, together with --sequence
        #[arg(long, requires = "sequence")]
        resource: Option<i64>,
        /// Sequence number of the item, together with --resource
        #[arg(long, requires = "resource")]
        sequence: Option<i64>,
    },
    /// Soft-delete a work item
    Remove {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Sweep => {
            let store = open_store(&config).await?;
            cmd_sweep(store, &config).await
        }
        Command::Work { action } => {
            let store = open_store(&config).await?;
            match action {
                WorkAction::Submit { resource, sequence } => {
                    cmd_work_submit(store, resource, sequence).await
                }
                WorkAction::List {
                    step,
                    resource,
                    removed,
                    limit,
                } => cmd_work_list(store, step, resource, removed, limit).await,
                WorkAction::Show { id, json } => cmd_work_show(store, id, json).await,
                WorkAction::Take { owner } => cmd_work_take(store, &config, owner).await,
                WorkAction::Advance {
                    step,
                    id,
                    resource,
                    sequence,
                } => cmd_work_advance(store, step, id, resource, sequence).await,
                WorkAction::Remove { id } => cmd_work_remove(store, id).await,
            }
        }
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn WorkStore>> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

fn build_reaper(store: Arc<dyn WorkStore>, config: &Config) -> Reaper {
    Reaper::new(
        store,
        Arc::new(SystemClock),
        ReaperConfig {
            retention: config.retention,
            staleness: config.staleness,
            interval: config.sweep_interval,
        },
    )
}

async fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workclaim".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store = open_store(config).await?;
    let reaper = build_reaper(store, config);

    let handle = reaper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    reaper.run().await?;
    Ok(())
}

async fn cmd_sweep(store: Arc<dyn WorkStore>, config: &Config) -> anyhow::Result<()> {
    let report = build_reaper(store, config).sweep().await?;
    println!(
        "Expunged {} finished item(s), recovered {} abandoned item(s)",
        report.expunged, report.recovered
    );
    Ok(())
}

async fn cmd_work_submit(
    store: Arc<dyn WorkStore>,
    resource: i64,
    sequence: i64,
) -> anyhow::Result<()> {
    let item = store
        .create(NewWorkItem::new(ResourceId(resource), sequence))
        .await?;
    println!("Created: {} (step: {})", item.id.0, item.step);
    Ok(())
}

fn parse_step(s: &str) -> anyhow::Result<Step> {
    s.parse().map_err(|_| anyhow::anyhow!("invalid step: {s}"))
}

async fn cmd_work_list(
    store: Arc<dyn WorkStore>,
    step: Option<String>,
    resource: Option<i64>,
    removed: bool,
    limit: i64,
) -> anyhow::Result<()> {
    let mut filter = WorkFilter::new();
    if let Some(s) = step {
        filter = filter.step(parse_step(&s)?);
    }
    if let Some(r) = resource {
        filter = filter.resource(ResourceId(r));
    }
    if removed {
        filter = filter.including_removed();
    }

    let items = store.list(&filter, Some(limit)).await?;
    if items.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<8}  {:<10}  {:<16}  {:<16}  REMOVED",
        "ID", "RESOURCE", "SEQ", "STEP", "OWNER", "TAKEN"
    );
    println!("{}", "-".repeat(90));

    for item in &items {
        let taken = item
            .taken_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<10}  {:<8}  {:<10}  {:<16}  {:<16}  {}",
            item.id,
            item.resource_id,
            item.sequence_number,
            item.step,
            item.owner_id.as_ref().map(|o| o.as_str()).unwrap_or("-"),
            taken,
            if item.is_removed() { "yes" } else { "-" }
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

/// Resolve a full UUID or a unique prefix of one.
async fn resolve_id(store: &dyn WorkStore, id_str: &str) -> anyhow::Result<WorkId> {
    if id_str.len() >= 36 {
        return Ok(WorkId(uuid::Uuid::parse_str(id_str)?));
    }

    let items = store
        .list(&WorkFilter::new().including_removed(), Some(1000))
        .await?;
    let matches: Vec<_> = items
        .iter()
        .filter(|item| item.id.0.to_string().starts_with(id_str))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no work item matching prefix '{id_str}'"),
        1 => Ok(matches[0].id),
        n => anyhow::bail!("{n} work items match prefix '{id_str}', be more specific"),
    }
}

fn print_item(item: &WorkItem) {
    println!("ID:         {}", item.id.0);
    println!("Resource:   {}", item.resource_id);
    println!("Sequence:   {}", item.sequence_number);
    println!("Step:       {}", item.step);
    println!(
        "Owner:      {}",
        item.owner_id.as_ref().map(|o| o.as_str()).unwrap_or("-")
    );
    if let Some(taken) = item.taken_at {
        println!("Taken:      {taken}");
    }
    println!("Created:    {}", item.created_at);
    if let Some(removed) = item.removed {
        println!("Removed:    {removed}");
    }
}

async fn cmd_work_show(store: Arc<dyn WorkStore>, id_str: String, json: bool) -> anyhow::Result<()> {
    let id = resolve_id(store.as_ref(), &id_str).await?;
    let item = store
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("work item {} not found", id.0))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        print_item(&item);
    }
    Ok(())
}

async fn cmd_work_take(
    store: Arc<dyn WorkStore>,
    config: &Config,
    owner: String,
) -> anyhow::Result<()> {
    let claimer =
        Claimer::new(store, Arc::new(SystemClock)).with_batch_size(config.claim_batch_size);
    match claimer.take(&OwnerId::new(owner)).await? {
        Some(item) => print_item(&item),
        None => println!("No work available."),
    }
    Ok(())
}

async fn cmd_work_advance(
    store: Arc<dyn WorkStore>,
    step: String,
    id: Option<String>,
    resource: Option<i64>,
    sequence: Option<i64>,
) -> anyhow::Result<()> {
    let step = parse_step(&step)?;
    let tracker = StepTracker::new(Arc::clone(&store));

    let advanced = match (id, resource, sequence) {
        (Some(id_str), _, _) => {
            let id = resolve_id(store.as_ref(), &id_str).await?;
            tracker.advance_by_id(id, step).await?
        }
        (None, Some(resource), Some(sequence)) => {
            tracker
                .advance_by_sequence(ResourceId(resource), sequence, step)
                .await?
        }
        _ => anyhow::bail!("pass --id, or --resource together with --sequence"),
    };

    match advanced {
        Some(item) => println!("Advanced: {} -> {}", item.id.0, item.step),
        None => println!("Nothing to advance (missing, removed, or already finished)."),
    }
    Ok(())
}

async fn cmd_work_remove(store: Arc<dyn WorkStore>, id_str: String) -> anyhow::Result<()> {
    let id = resolve_id(store.as_ref(), &id_str).await?;
    if store.remove(id).await? {
        println!("Removed: {}", id.0);
    } else {
        println!("Nothing to remove (missing or already removed).");
    }
    Ok(())
}
