use clap::{Parser, Subcommand};
use logrelay::config::{self, Settings};
use logrelay::relay::Exit;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "logrelay")]
#[command(about = "Relay a growing log file to Telegram and chat commands back into a screen/tmux session", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a default config file if none exists.
    Init {
        /// Config file path (default: LOGRELAY_CONFIG_PATH or ~/.logrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Resolve configuration (file + environment) and print a summary without starting the relay.
    Check {
        /// Config file path (default: LOGRELAY_CONFIG_PATH or ~/.logrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the relay until SIGINT/SIGTERM. Environment variables override the config file.
    Run {
        /// Config file path (default: LOGRELAY_CONFIG_PATH or ~/.logrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("logrelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_relay(config).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    if config::init_config_file(&path)? {
        println!("wrote default configuration to {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

fn load_settings(config_path: Option<PathBuf>) -> anyhow::Result<Settings> {
    let (config, path) = config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    Ok(config::resolve_settings(&config)?)
}

fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config_path)?;
    println!("api base:     {}", settings.api_base);
    println!("log file:     {}", settings.log_path.display());
    println!("recipients:   {:?}", settings.recipients);
    println!("admins:       {}", settings.policy.allow_list().len());
    println!("command mode: {:?}", settings.policy.mode());
    println!(
        "session:      {} (pane {}, {:?})",
        settings.session.name, settings.session.pane, settings.session.multiplexer
    );
    match &settings.restart.start_command {
        Some(start) => println!(
            "restart:      {:?}, wait {}s, {}",
            settings.restart.stop_command,
            settings.restart.delay.as_secs(),
            start
        ),
        None => println!("restart:      disabled (no start script)"),
    }
    if !settings.log_path.exists() {
        anyhow::bail!("log file does not exist: {}", settings.log_path.display());
    }
    Ok(())
}

async fn run_relay(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config_path)?;
    match logrelay::relay::run_relay(settings).await? {
        Exit::Shutdown => {}
        exit => log::warn!("relay stopped: {:?}", exit),
    }
    Ok(())
}
