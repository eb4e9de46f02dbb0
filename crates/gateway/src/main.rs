//! Drivegate Gateway
//!
//! Access-controlled streaming gateway for a remote object store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gateway::activity::{ActivityLog, TracingRecorder};
use gateway::auth::{AccessResolver, KvAccessRecords, ResolverSettings, TokenService};
use gateway::config::Config;
use gateway::http::{router, AppState};
use gateway::limit::RateLimiter;
use gateway::store::{DriveClient, MemoryKv};
use gateway::upload::UploadOrchestrator;

/// Drivegate - access-controlled streaming gateway.
#[derive(Parser, Debug)]
#[command(name = "drivegate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Start the gateway
    Start,

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Issue a share token from the command line
    IssueShare {
        /// Resource id to share
        file_id: String,

        /// Lifetime in seconds (defaults to the configured share TTL)
        #[arg(long)]
        ttl: Option<u64>,

        /// Require an active signed-in session on redemption
        #[arg(long)]
        login_required: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    // Keep the appender guard alive for the process lifetime.
    let _log_guard = init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Start => {
            tracing::info!(bind = %config.server.bind_addr, "Drivegate starting");
            run(config).await
        }
        Commands::CheckConfig => {
            println!("Configuration OK");
            Ok(())
        }
        Commands::IssueShare {
            file_id,
            ttl,
            login_required,
        } => {
            let resource = capability::ResourceId::parse(&file_id)?;
            let kv = Arc::new(MemoryKv::new());
            let tokens = TokenService::new(
                &config.tokens.signing_secret,
                Duration::from_secs(config.tokens.default_share_ttl_secs),
                kv,
            );
            let (token, claims) =
                tokens.issue_share(resource, ttl.map(Duration::from_secs), login_required)?;
            println!("{token}");
            tracing::info!(resource = %claims.resource_id, expires_at = claims.expires_at, "Token issued");
            Ok(())
        }
    }
}

fn init_tracing(config: &Config, verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if verbose {
        "debug"
    } else {
        &config.server.log_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.server.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "drivegate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(DriveClient::new(&config.drive)?);

    let tokens = Arc::new(TokenService::new(
        &config.tokens.signing_secret,
        Duration::from_secs(config.tokens.default_share_ttl_secs),
        kv.clone(),
    ));

    let resolver = Arc::new(AccessResolver::new(
        store.clone(),
        KvAccessRecords::new(kv.clone()),
        ResolverSettings::from_config(&config.access, &config.drive.root_id),
    ));

    let limiter = Arc::new(RateLimiter::new(config.limits, kv.clone()));

    let (activity, _activity_task) = ActivityLog::spawn(Arc::new(TracingRecorder));
    let uploads = Arc::new(UploadOrchestrator::new(
        config.upload,
        store.clone(),
        kv.clone(),
        activity.clone(),
    ));

    let state = AppState {
        store,
        tokens,
        resolver,
        limiter,
        uploads,
        activity,
        root_id: Arc::from(config.drive.root_id.as_str()),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Shutdown signal listener failed");
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    tracing::info!("Drivegate stopped");
    Ok(())
}
