//! `workboard` entry point: a thin host surface over the core library.
//!
//! Routing is reduced to exit codes: commands that need a session fail
//! fast when the profile is signed out, standing in for the login view a
//! browser host would route to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use workboard_core::auth::{AuthSessionManager, HttpAuthClient, SessionState, TokenStore};
use workboard_core::config::{self, DashboardConfig};
use workboard_core::dashboard::DashboardFeed;
use workboard_core::metrics::{FilterSpec, HttpQueryClient, QueryError};
use workboard_core::poll::PollingScheduler;
use workboard_core::search::SearchHistory;
use workboard_core::DerivedMetrics;

#[derive(Parser)]
#[command(name = "workboard", version, about = "Dashboard client: session and metrics")]
struct Cli {
    /// Profile directory (defaults to ~/.workboard).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate and persist the session tokens.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Clear the persisted session.
    Logout,
    /// Report the current session state.
    Status,
    /// Fetch the dataset once and print the derived metrics.
    Metrics(FilterArgs),
    /// Poll the dataset on a fixed interval, printing metrics per cycle.
    Watch {
        /// Override the configured poll interval.
        #[arg(long)]
        interval_ms: Option<u64>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Record a search term and print the recent-search list.
    Search { term: Option<String> },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    project_id: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    created_by: Option<String>,
    #[arg(long)]
    created_on_gt: Option<String>,
    #[arg(long)]
    created_on_lt: Option<String>,
    #[arg(long)]
    created_on_eq: Option<String>,
}

impl From<FilterArgs> for FilterSpec {
    fn from(args: FilterArgs) -> Self {
        FilterSpec {
            project_id: args.project_id,
            status: args.status,
            owner: args.owner,
            created_by: args.created_by,
            created_on_gt: args.created_on_gt,
            created_on_lt: args.created_on_lt,
            created_on_eq: args.created_on_eq,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Cli { home, command } = Cli::parse();
    let home = home.unwrap_or_else(config::default_home);
    let config = DashboardConfig::load(&home).context("loading configuration")?;

    let http = reqwest::Client::new();
    let auth_api = Arc::new(HttpAuthClient::new(config.auth_base_url.clone(), http.clone()));
    let manager = Arc::new(AuthSessionManager::new(auth_api, TokenStore::new(&home))?);

    match command {
        Command::Login { email, password } => {
            manager.login(&email, &password).await?;
            println!("logged in as {email}");
        }
        Command::Logout => {
            manager.logout().await?;
            println!("logged out");
        }
        Command::Status => {
            let state = manager.state();
            println!("{state:?}");
            if state != SessionState::Authenticated {
                std::process::exit(1);
            }
        }
        Command::Metrics(filter) => {
            require_session(&manager)?;
            let feed = new_feed(&config, &http);
            feed.set_filter(filter.into()).await;
            let metrics = fetch_cycle(&manager, &feed).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Command::Watch { interval_ms, filter } => {
            require_session(&manager)?;
            let feed = Arc::new(new_feed(&config, &http));
            feed.set_filter(filter.into()).await;

            let interval =
                Duration::from_millis(interval_ms.unwrap_or(config.poll_interval_ms));
            let scheduler = PollingScheduler::new();
            let poll_manager = Arc::clone(&manager);
            let poll_feed = Arc::clone(&feed);
            scheduler.start(interval, move || {
                let manager = Arc::clone(&poll_manager);
                let feed = Arc::clone(&poll_feed);
                async move {
                    match fetch_cycle(&manager, &feed).await {
                        Ok(metrics) => match serde_json::to_string(&metrics) {
                            Ok(line) => println!("{line}"),
                            Err(err) => tracing::warn!("cannot encode metrics: {err}"),
                        },
                        Err(err) => tracing::warn!("poll cycle failed: {err}"),
                    }
                }
            });

            let mut states = manager.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *states.borrow() == SessionState::ForcedLogout {
                            eprintln!(
                                "session expired after repeated refresh failures; signing out"
                            );
                            feed.invalidate().await;
                            break;
                        }
                    }
                }
            }
            scheduler.stop();
        }
        Command::Search { term } => {
            let mut history = SearchHistory::load(&home)?;
            if let Some(term) = term {
                history.record(&term, chrono::Utc::now());
                history.save(&home)?;
            }
            for entry in history.entries() {
                println!("{}\t{}\t{}", entry.term, entry.frequency, entry.last_used);
            }
        }
    }
    Ok(())
}

/// One fetch+compute cycle; a rejected access token triggers one
/// (coalesced) refresh and a single retry.
async fn fetch_cycle(
    manager: &AuthSessionManager,
    feed: &DashboardFeed,
) -> anyhow::Result<DerivedMetrics> {
    let token = manager.access_token().await.context("not authenticated")?;
    match feed.refresh(&token).await {
        Ok(metrics) => Ok(metrics),
        Err(QueryError::Status(401)) => {
            manager.refresh().await?;
            let token = manager
                .access_token()
                .await
                .context("session lost after refresh")?;
            Ok(feed.refresh(&token).await?)
        }
        Err(err) => Err(err.into()),
    }
}

fn new_feed(config: &DashboardConfig, http: &reqwest::Client) -> DashboardFeed {
    let api = Arc::new(HttpQueryClient::new(
        config.data_base_url.clone(),
        http.clone(),
    ));
    DashboardFeed::new(api)
}

fn require_session(manager: &AuthSessionManager) -> anyhow::Result<()> {
    match manager.state() {
        SessionState::Authenticated | SessionState::Degraded(_) => Ok(()),
        state => anyhow::bail!("not authenticated ({state:?}); run `workboard login` first"),
    }
}
