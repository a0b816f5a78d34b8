use anyhow::Result;
use orchestrator_app::{build_registry, builtin_modules, App, HttpState};
use orchestrator_config::OrchestratorConfig;
use orchestrator_eventbus::EventEnvelope;
use orchestrator_protocol::OrchestratorError;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli_flags()?;
    let config = match cli.config_path.as_deref() {
        Some(path) => orchestrator_config::load_from_path(path)?,
        None => orchestrator_config::load_from_env()?,
    };
    init_file_logging(&config.store_root)?;

    let registry = build_registry(&builtin_modules(), &config)?;
    let app = App::build(config, &registry).map_err(|error| {
        tracing::error!(error = %error, "plugin validation failed");
        error
    })?;

    let mut events = app.context().bus.subscribe_all();
    let event_logger = tokio::spawn(async move { log_events(&mut events).await });

    app.lifecycle.start().await?;
    tracing::info!("lifecycle manager started");

    let server = spawn_http_server(&app);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    if let Some(server) = server {
        server.abort();
    }
    app.lifecycle.stop().await?;
    event_logger.abort();
    tracing::info!("lifecycle manager stopped");

    Ok(())
}

fn spawn_http_server(app: &App) -> Option<tokio::task::JoinHandle<()>> {
    let webhook = &app.config.webhook;
    if !webhook.enabled {
        return None;
    }

    let secret = webhook_secret(&app.config);
    if secret.is_empty() {
        tracing::warn!(
            secret_env = %webhook.secret_env,
            "webhook secret is not set; every webhook will be rejected"
        );
    }
    let state = HttpState::new(app.clone(), secret);
    let bind_address = webhook.bind_address.clone();
    Some(tokio::spawn(async move {
        if let Err(error) = orchestrator_app::serve(state, &bind_address).await {
            tracing::error!(error = %error, "http listener stopped");
        }
    }))
}

fn webhook_secret(config: &OrchestratorConfig) -> String {
    std::env::var(&config.webhook.secret_env)
        .map(|value| value.trim().to_owned())
        .unwrap_or_default()
}

async fn log_events(events: &mut broadcast::Receiver<EventEnvelope>) {
    loop {
        match events.recv().await {
            Ok(envelope) => tracing::debug!(
                session_id = %envelope.session_id(),
                sequence = envelope.event.sequence,
                event_type = %envelope.event.event_type,
                "lifecycle event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn init_file_logging(store_root: &str) -> Result<(), OrchestratorError> {
    let log_path = log_file_path(store_root);
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                OrchestratorError::Configuration(format!(
                    "failed to create orchestrator log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            OrchestratorError::Configuration(format!(
                "failed to open orchestrator log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

fn log_file_path(store_root: &str) -> PathBuf {
    let root = Path::new(store_root);
    if root.as_os_str().is_empty() {
        return Path::new(".").join("orchestrator.log");
    }
    root.join("orchestrator.log")
}

#[derive(Debug, Default)]
struct CliFlags {
    config_path: Option<PathBuf>,
}

fn parse_cli_flags() -> Result<CliFlags, OrchestratorError> {
    let mut flags = CliFlags::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or_else(|| {
                    OrchestratorError::Configuration(
                        "Missing value after --config. Use --config <path>.".to_owned(),
                    )
                })?;
                if value.trim().is_empty() {
                    return Err(OrchestratorError::Configuration(
                        "Flag '--config' requires a non-empty value.".to_owned(),
                    ));
                }
                flags.config_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                print_cli_help();
                std::process::exit(0);
            }
            value if value.starts_with("--") => {
                return Err(OrchestratorError::Configuration(format!(
                    "Unknown flag '{value}'. Run with --help for valid flags."
                )));
            }
            unknown => {
                return Err(OrchestratorError::Configuration(format!(
                    "Unexpected argument '{unknown}'. Run with --help for valid flags."
                )));
            }
        }
    }

    Ok(flags)
}

fn print_cli_help() {
    println!("Usage: orchestrator [--config <path>]");
    println!();
    println!("  --config <path>   Config file (defaults to $ORCHESTRATOR_CONFIG, then ~/.config/orchestrator/config.toml)");
    println!("  --help            Show this help message");
}
