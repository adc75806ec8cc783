mod daemon;
mod doctor_commands;
mod history_commands;

use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use {
    clap::{Parser, Subcommand},
    murmur_common::NoiseFilterLayer,
    murmur_config::MurmurConfig,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "murmur", about = "murmur: a personal WhatsApp assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of `murmur.toml`).
    #[arg(long, global = true, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the assistant (default when no subcommand is provided).
    Run,
    /// Validate the configuration and check external tools.
    Doctor,
    /// Conversation history management.
    History {
        #[command(subcommand)]
        action: history_commands::HistoryAction,
    },
}

/// Console (or JSON) output plus a plain-text copy in `<log_dir>/agent.log`.
/// Transport crypto chatter is dropped before either sink sees it.
fn init_telemetry(cli: &Cli, config: &MurmurConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let log_file = config.log_file();
    let file_layer = match std::fs::create_dir_all(&config.log_dir)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&log_file))
    {
        Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        Err(e) => {
            eprintln!("cannot open {}: {e}", log_file.display());
            None
        },
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(NoiseFilterLayer)
        .with(file_layer);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = murmur_config::load(cli.config.as_deref())?;
    init_telemetry(&cli, &config);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "murmur starting");
            if let Err(e) = daemon::run(config).await {
                error!(error = %format!("{e:#}"), "fatal error");
                std::process::exit(1);
            }
            Ok(())
        },
        Some(Commands::Doctor) => {
            if !doctor_commands::run(&config) {
                warn!("configuration has errors");
                std::process::exit(1);
            }
            Ok(())
        },
        Some(Commands::History { action }) => {
            history_commands::handle_history(action, &config).await
        },
    }
}
