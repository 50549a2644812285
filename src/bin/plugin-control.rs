use clap::{command, Parser};
use plugin_control::{
    config::HostConfig,
    event::EventError,
    protocol::{decode_request, Response},
    CallerIdentity, Command, Dispatcher, HostError, HostResult, ImmediateSupervisor,
    ManifestFileResolver, Principal,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Caller for requests that do not name one: `admin` or `plugin:<name>`
    #[arg(long, default_value = "admin")]
    caller: CallerIdentity,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: &Path) -> HostResult<HostConfig> {
    if path.exists() {
        Ok(HostConfig::from_file(path)?)
    } else {
        debug!("no config at {:?}, using defaults", path);
        Ok(HostConfig::default())
    }
}

/// Plugins act with the permissions their manifest declares.
fn effective_caller(dispatcher: &Dispatcher, caller: CallerIdentity) -> CallerIdentity {
    match &caller.principal {
        Principal::Plugin(name) => dispatcher.plugin_identity(name).unwrap_or(caller),
        Principal::Administrator => caller,
    }
}

fn resolve_bundle_path(config: &HostConfig, command: Command) -> Command {
    match (command, &config.plugin_directory) {
        (Command::InstallPlugin { plugin_file }, Some(dir)) if plugin_file.is_relative() => {
            Command::install_plugin(dir.join(plugin_file))
        }
        (command, _) => command,
    }
}

async fn run(cli: Cli) -> HostResult<()> {
    let config = load_config(&cli.config)?;
    info!("config loaded.");
    debug!("config: {:?}", config);

    let dispatcher = Dispatcher::new(
        config.clone(),
        Arc::new(ManifestFileResolver),
        Arc::new(ImmediateSupervisor),
    );

    let mut events = dispatcher.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    event = %serde_json::to_string(&event).unwrap_or_default(),
                    "lifecycle event"
                ),
                Err(EventError::Lagged { count }) => warn!(count, "event log lagged"),
                Err(_) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_request(&line) {
            Ok(request) => match request.caller_or(&cli.caller) {
                Ok(caller) => {
                    let caller = effective_caller(&dispatcher, caller);
                    let command = resolve_bundle_path(&config, request.command);
                    Response::from(dispatcher.submit(&caller, command).await)
                }
                Err(e) => Response::from(e),
            },
            Err(e) => Response::from(e),
        };
        stdout.write_all(response.to_json().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("input closed, shutting down");
    let stopped = dispatcher.shutdown().await;
    debug!("stopped plugins: {:?}", stopped);
    event_log.abort();
    match event_log.await {
        Err(e) if e.is_panic() => Err(HostError::internal(format!(
            "event logger failed: {}",
            e
        ))),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
