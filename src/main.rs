use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use astrolabe::config::{self, Config};
use astrolabe::db::{self, Pool};
use astrolabe::github::GhClient;
use astrolabe::report::{self, ReportError, ReportOptions};
use astrolabe::sync;

const DEFAULT_CONFIG: &str = "astrolabe.yaml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Track new releases of your starred GitHub repositories")]
struct Args {
    /// Path to YAML config file (defaults to ./astrolabe.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fetch stars and latest releases before reporting
    #[arg(long)]
    sync: bool,

    /// Report window in days
    #[arg(long)]
    days: Option<u32>,

    /// Include release notes in the report
    #[arg(long)]
    full: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tracked repositories
    List {
        /// Only show repos with this primary language (case-insensitive)
        #[arg(long)]
        language: Option<String>,
    },
    /// Delete all tracked data
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = load_config(args.config.as_deref())?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Some(Command::List { language }) => list(&pool, language.as_deref()).await,
        Some(Command::Reset { force }) => reset(&pool, force).await,
        None => {
            if args.sync {
                run_sync(&pool, &cfg).await?;
            }
            let opts = ReportOptions {
                days: args.days.unwrap_or(cfg.report.days),
                full: args.full,
                stale_after_days: cfg.report.stale_after_days,
                color: console::colors_enabled(),
            };
            match report::generate(&pool, opts, Utc::now()).await {
                Ok(text) => {
                    println!("{}", text);
                    Ok(())
                }
                Err(ReportError::NoSyncData) => {
                    eprintln!("{}", ReportError::NoSyncData);
                    std::process::exit(1);
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load(Some(path))
            .with_context(|| format!("failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            config::load(None).with_context(|| format!("failed to load {}", DEFAULT_CONFIG))
        }
        None => Ok(Config::default()),
    }
}

async fn run_sync(pool: &Pool, cfg: &Config) -> Result<()> {
    info!(workers = cfg.sync.workers, batch_size = cfg.sync.batch_size, "starting sync");
    let client = Arc::new(GhClient::from_config(cfg));
    match sync::sync(pool, client, &cfg.sync).await {
        Ok(summary) => {
            let color = console::colors_enabled();
            println!("{}", report::render_sync_summary(&summary, color));
            println!();
            Ok(())
        }
        Err(err) => {
            error!(%err, "sync failed");
            eprintln!("Sync failed: {}", err);
            std::process::exit(1);
        }
    }
}

async fn list(pool: &Pool, language: Option<&str>) -> Result<()> {
    let repos = db::all_repos(pool, language).await?;
    if repos.is_empty() {
        eprintln!("No tracked repos. Run 'astrolabe --sync' first.");
        std::process::exit(1);
    }
    println!("{}", report::render_repo_list(&repos));
    Ok(())
}

async fn reset(pool: &Pool, force: bool) -> Result<()> {
    let count = db::repo_count(pool).await?;
    if count == 0 {
        println!("Database is already empty.");
        return Ok(());
    }

    if !force {
        print!(
            "This will delete all data ({} tracked repos). Continue? [y/N] ",
            count
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    db::reset(pool).await?;
    println!("Database cleared.");
    Ok(())
}
