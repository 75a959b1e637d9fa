use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use gamefinder_sync::database_ops::catalog::catalog_counts;
use gamefinder_sync::util::db::Db;
use gamefinder_sync::database_ops::models::ImportMode;
use gamefinder_sync::jobs::import::{ImportParams, DEFAULT_BATCH_SIZE, DEFAULT_IMPORT_TOTAL};
use gamefinder_sync::jobs::{JobReport, JobStatus};
use gamefinder_sync::logging::{init_tracing, DEFAULT_FILTER};
use gamefinder_sync::orchestrator::{JobRequest, Orchestrator};
use gamefinder_sync::util::env;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gamefinder", version, about = "GameFinder catalog sync CLI")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Apply the embedded schema and exit
    Migrate,
    /// Bulk import from the metadata catalog
    Import {
        /// Number of records to pull in total
        #[arg(long, default_value_t = DEFAULT_IMPORT_TOTAL)]
        total: usize,
        /// Records requested per page
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// top-rated | upcoming
        #[arg(long, default_value = "top-rated")]
        mode: ImportMode,
    },
    /// Link storefront genres to every store-linked entry
    SyncTags,
    /// Refresh online counts and prices
    Pulse,
    /// Promote entries whose release moment has passed
    Sweep,
    /// Print catalog row counts
    Status,
}

async fn connect(db_url: Option<String>) -> Result<Db> {
    let url = db_url.unwrap_or_else(env::db_url);
    let max_connections: u32 = env::env_parse("DB_MAX_CONNS", 5u32);
    Db::connect(&url, max_connections).await
}

fn print_report(report: &JobReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Run a job in the foreground. Ctrl-C asks it to stop at its next checkpoint.
async fn run_foreground(orch: &Orchestrator, req: JobRequest) -> Result<()> {
    let kind = req.kind();
    let Some(mut handle) = orch.launch(req) else {
        bail!("{kind} is already running");
    };
    let report = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job = %kind, "interrupt received, stopping at the next checkpoint");
            orch.stop(kind);
            handle.await?
        }
    };
    print_report(&report)?;
    if report.status == JobStatus::Failed {
        bail!(
            "{kind} failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            let db = connect(cli.db_url).await?;
            db.migrate().await?;
            info!("schema is up to date");
        }
        Commands::Import {
            total,
            batch_size,
            mode,
        } => {
            if total == 0 || batch_size == 0 {
                bail!("--total and --batch-size must be greater than zero");
            }
            env::preflight_check(
                "import",
                &["TWITCH_CLIENT_ID", "TWITCH_CLIENT_SECRET"],
                &["DATABASE_URL", "TWITCH_CLIENT_ID", "STEAM_THROTTLE_MS"],
            )?;
            let orch = Orchestrator::from_env(connect(cli.db_url).await?)?;
            let params = ImportParams {
                total,
                batch_size,
                mode,
            };
            run_foreground(&orch, JobRequest::Import(params)).await?;
        }
        Commands::SyncTags => {
            let orch = Orchestrator::from_env(connect(cli.db_url).await?)?;
            run_foreground(&orch, JobRequest::TagSync).await?;
        }
        Commands::Pulse => {
            let orch = Orchestrator::from_env(connect(cli.db_url).await?)?;
            run_foreground(&orch, JobRequest::Pulse).await?;
        }
        Commands::Sweep => {
            let orch = Orchestrator::from_env(connect(cli.db_url).await?)?;
            let promoted = orch.sweep().await?;
            println!("promoted {promoted} entries");
        }
        Commands::Status => {
            let db = connect(cli.db_url).await?;
            let counts = catalog_counts(&db).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}
