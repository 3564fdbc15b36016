mod console;
mod doctor_commands;
mod profile_commands;
mod session_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    parley_config::ParleyConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: chat threads backed by a coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./parley.toml and ~/.config/parley/).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
    /// Custom data directory (overrides the default data dir).
    #[arg(long, global = true, env = "PARLEY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the console channel (default when no subcommand is provided).
    Run,
    /// Session inspection.
    Sessions {
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
    /// Agent profile inspection.
    Profiles {
        #[command(subcommand)]
        action: profile_commands::ProfileAction,
    },
    /// Check config, agent CLI, profiles and storage.
    Doctor,
}

/// Initialise tracing. Logs always go to stderr; stdout belongs to the
/// console channel.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Explicit `--config` is loaded strictly; otherwise the usual locations are
/// searched and a broken file falls back to defaults.
fn load_config(cli: &Cli) -> anyhow::Result<(ParleyConfig, Option<PathBuf>)> {
    match &cli.config {
        Some(path) => {
            let mut config = parley_config::load_config(path)?;
            parley_config::apply_env_overrides(&mut config);
            Ok((config, Some(path.clone())))
        },
        None => {
            let path = parley_config::find_or_default_config_path();
            let found = path.exists().then_some(path);
            Ok((parley_config::discover_and_load(), found))
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "parley starting");

    let (config, config_path) = load_config(&cli)?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(parley_config::data_dir);
    let database_path = config
        .storage
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join("sessions.db"));

    match cli.command {
        None | Some(Commands::Run) => console::handle_run(config, database_path).await,
        Some(Commands::Sessions { action }) => {
            session_commands::handle_sessions(action, &database_path).await
        },
        Some(Commands::Profiles { action }) => profile_commands::handle_profiles(action, &config),
        Some(Commands::Doctor) => {
            doctor_commands::handle_doctor(
                &config,
                config_path.as_deref(),
                &data_dir,
                &database_path,
            )
            .await
        },
    }
}
