//! VERISCAN command-line entry point.

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use veriscan_client::api_client::{load_upload, ApiClient};
use veriscan_client::auth::AuthGuard;
use veriscan_client::cache::{MemoryRequestCache, RequestCache};
use veriscan_client::config::{ClientConfig, LoggingConfig};
use veriscan_client::error::ClientError;
use veriscan_client::events::AuthEvent;
use veriscan_client::notifications::{ChannelNotifier, Notification};
use veriscan_client::persistence::{CredentialStore, FileCredentialStore};
use veriscan_core::ProgressSnapshot;

#[derive(Debug, Parser)]
#[command(name = "veriscan", version, about = "Content authenticity analysis client")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "VERISCAN_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a bearer token for later requests.
    Login {
        #[arg(long, env = "VERISCAN_TOKEN", hide_env_values = true)]
        token: String,
        /// User record as a JSON object.
        #[arg(long)]
        user: Option<String>,
    },
    /// Forget stored credentials.
    Logout,
    /// Upload files for analysis and follow their progress.
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show past analyses.
    History {
        /// Bypass the response cache.
        #[arg(long)]
        fresh: bool,
        /// Query parameter as `key=value`; may repeat.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Show aggregate statistics.
    Stats {
        #[arg(long)]
        fresh: bool,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging)?;

    let store: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(&config.credentials_path));
    let auth = Arc::new(AuthGuard::new(store, config.sign_in_path.clone()));
    let mut auth_events = auth.subscribe();
    let cache: Arc<dyn RequestCache> = Arc::new(MemoryRequestCache::new());
    let client = ApiClient::from_config(&config, cache, Arc::clone(&auth))?;

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let notifier = ChannelNotifier::new(notify_tx, config.notifications);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let outcome = run_command(cli.command, &client, &notifier, &cancel).await;

    loop {
        match auth_events.try_recv() {
            Ok(event) => report_auth_event(&notifier, &event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Auth events lagged");
            }
            Err(_) => break,
        }
    }
    drop(notifier);
    while let Ok(notification) = notify_rx.try_recv() {
        print_notification(&notification);
    }

    let stats = client.cache().stats()?;
    debug!(hits = stats.hits, misses = stats.misses, entries = stats.entries, "Cache usage");

    outcome
}

async fn run_command(
    command: Command,
    client: &ApiClient,
    notifier: &ChannelNotifier,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    match command {
        Command::Login { token, user } => {
            let user = user
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .map_err(|err| ClientError::Usage(format!("--user is not valid JSON: {err}")))?;
            client.sign_in(&token, user.as_ref())?;
            println!("Signed in");
        }
        Command::Logout => {
            client.sign_out()?;
            println!("Signed out");
        }
        Command::Analyze { files } => analyze(client, files, notifier, cancel).await?,
        Command::History { fresh, params } => {
            let history = client.history(&params, fresh, cancel).await?;
            print_json(&history);
        }
        Command::Stats { fresh } => {
            let stats = client.stats(fresh, cancel).await?;
            print_json(&stats);
        }
    }
    Ok(())
}

async fn analyze(
    client: &ApiClient,
    paths: Vec<PathBuf>,
    notifier: &ChannelNotifier,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in &paths {
        uploads.push(load_upload(path).await?);
    }

    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressSnapshot>(64);
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = progress_rx.recv().await {
            println!(
                "[{}] {:>3}% {:<28} {}",
                snapshot.session_id,
                snapshot.progress,
                snapshot.stage.label(),
                snapshot.message
            );
        }
    });

    let results = join_all(uploads.into_iter().map(|file| {
        let name = file.file_name.clone();
        let progress_tx = &progress_tx;
        async move {
            let result = client.analyze(file, cancel, notifier, Some(progress_tx)).await;
            (name, result)
        }
    }))
    .await;

    drop(progress_tx);
    if let Err(err) = printer.await {
        warn!(error = %err, "Progress printer stopped");
    }

    let mut first_error = None;
    for (name, result) in results {
        match result {
            Ok(completion) => {
                println!("{name}:");
                print_json(&completion.result);
            }
            Err(err) => {
                eprintln!("{name}: {err}");
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn init_logging(config: &LoggingConfig) -> Result<(), ClientError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|err| ClientError::Logging(err.to_string()))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight work");
            cancel.cancel();
        }
    });
}

fn report_auth_event(notifier: &ChannelNotifier, event: &AuthEvent) {
    if let AuthEvent::SignInRequired { redirect_to, .. } = event {
        notifier.security(format!(
            "Your session has expired. Sign in again ({redirect_to})."
        ));
    }
}

fn print_notification(notification: &Notification) {
    println!("{}: {}", notification.title, notification.message);
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
