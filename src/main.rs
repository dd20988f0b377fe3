use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use leaving_x::archive::Archive;
use leaving_x::bluesky::BlueskyClient;
use leaving_x::checkpoint::{FileCheckpoint, RunLock};
use leaving_x::cli::{Cli, Commands, DeleteArgs, RunArgs};
use leaving_x::config::Config;
use leaving_x::delete::{self, DeleteFilter};
use leaving_x::engine::Engine;
use leaving_x::ledger::Ledger;
use leaving_x::retry::RetryPolicy;

/// Conventional exit status for a run stopped by SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // .env.local first: dotenvy never overrides a variable that is already set.
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    init_tracing(cli.verbose)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupt received, finishing the current step");
        trigger.cancel();
    });

    match cli.command() {
        Commands::Run(args) => migrate(&cli, &args, cancel).await,
        Commands::Stats => stats(&cli).await,
        Commands::Delete(args) => delete_posts(&args, &cancel).await,
    }
}

fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn archive_root(cli: &Cli, config_root: Option<PathBuf>) -> Result<PathBuf> {
    cli.archive
        .clone()
        .or(config_root)
        .or_else(|| std::env::var_os("TWITTER_DATA_ROOT_FOLDER").map(PathBuf::from))
        .context("No archive folder: pass --archive or set TWITTER_DATA_ROOT_FOLDER")
}

async fn migrate(cli: &Cli, args: &RunArgs, cancel: CancellationToken) -> Result<ExitCode> {
    let options = args.options()?;
    let config = load_config()?;
    let root = archive_root(cli, config.archive_root.clone())?;

    info!(
        handle = %config.handle,
        pds = %config.pds_url,
        archive = %root.display(),
        "Configuration loaded"
    );

    let archive = Archive::open(&root)
        .await
        .context("Failed to load archive")?;

    // Held until the run ends; a dry run writes nothing and needs no lock.
    let _lock = if options.dry_run {
        None
    } else {
        Some(RunLock::acquire(&config.checkpoint_path)?)
    };

    let checkpoint = FileCheckpoint::new(&config.checkpoint_path);
    let mut ledger = Ledger::load(&config.ledger_path);
    let client = BlueskyClient::new(&config)?;

    let mut engine = Engine::new(&archive, &client, &checkpoint, &mut ledger, &config, cancel);
    let summary = engine.run(options).await?;

    println!("{summary}");
    Ok(if summary.interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    })
}

async fn stats(cli: &Cli) -> Result<ExitCode> {
    let root = archive_root(cli, None)?;
    let archive = Archive::open(&root)
        .await
        .context("Failed to load archive")?;
    println!("Archive: {}", archive.root().display());
    println!("{}", archive.stats());
    Ok(ExitCode::SUCCESS)
}

async fn delete_posts(args: &DeleteArgs, cancel: &CancellationToken) -> Result<ExitCode> {
    let filter = DeleteFilter::parse(&args.start_time, &args.end_time, args.match_string.clone())?;
    let config = load_config()?;
    let client = BlueskyClient::new(&config)?;

    let records = delete::find_matching(&client, &filter).await?;
    delete::print_records(&records);

    if records.is_empty() {
        println!("No posts matched.");
        return Ok(ExitCode::SUCCESS);
    }
    if args.dry_run {
        println!("Dry run: {} posts would be deleted.", records.len());
        return Ok(ExitCode::SUCCESS);
    }
    if !args.yes && !delete::confirm(&format!("Delete {} posts?", records.len()))? {
        println!("Cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let retry = RetryPolicy::from_config(&config);
    let deleted = delete::delete_records(&client, &records, &retry, cancel).await?;
    println!("Deleted {deleted} of {} posts.", records.len());

    Ok(if cancel.is_cancelled() {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    })
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "debug,leaving_x=trace"
    } else {
        "info,leaving_x=debug"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
