use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use uplift_desk::config::Config;
use uplift_desk::desk::BleDeskFactory;
use uplift_desk::flow::{ConfigFlow, FlowError};
use uplift_desk::{DeskCoordinator, DeskEntry, Integration, IntegrationError, LogStateWriter};

/// How often `run` retries desks that were not ready
const SETUP_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "uplift-desk", version, about = "Control Uplift standing desks over Bluetooth")]
struct Cli {
    /// Config file (defaults to ~/.uplift-desk/config)
    #[arg(long, short, env = "UPLIFT_DESK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan for desks and add them to the config
    Scan {
        /// Add every new desk without asking
        #[arg(long, short)]
        yes: bool,
    },
    /// List configured desks
    List,
    /// Remove a configured desk
    Remove { address: String },
    /// Connect to every configured desk and log entity state until interrupted
    Run,
    /// Print the current height
    Height { address: Option<String> },
    /// Move to a stored preset (1-4)
    Preset { number: u8, address: Option<String> },
    /// Move to the sitting preset
    Sit { address: Option<String> },
    /// Move to the standing preset
    Stand { address: Option<String> },
    /// Stop a movement in progress
    Stop { address: Option<String> },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn save_config(config: &Config, path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => config.save_to(path),
        None => config.save(),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn scan(config_path: Option<&PathBuf>, yes: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    let factory = BleDeskFactory::new(config.connection.clone()).await?;

    let desks = factory.scan_for_desks().await?;
    if desks.is_empty() {
        anyhow::bail!("No desks found");
    }

    let mut added = 0;
    for desk in desks {
        let flow = match ConfigFlow::discovered(desk, &config) {
            Ok(flow) => flow,
            Err(FlowError::AlreadyConfigured { address }) => {
                log::info!("Desk {} is already configured", address);
                continue;
            }
        };

        if yes || confirm(&format!("Add {}?", flow.desk()))? {
            flow.confirm(&mut config)?;
            added += 1;
        }
    }

    if added > 0 {
        save_config(&config, config_path)?;
    }
    println!("Added {} desk(s)", added);
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    if config.desks.is_empty() {
        anyhow::bail!("No desk configured. Run `uplift-desk scan` first.");
    }

    let factory = Arc::new(BleDeskFactory::new(config.connection.clone()).await?);
    let mut integration = Integration::new(
        factory,
        config.connection.clone(),
        Arc::new(LogStateWriter),
    );

    let mut pending: Vec<DeskEntry> = config.desks.clone();
    let mut retry = tokio::time::interval(SETUP_RETRY_INTERVAL);

    loop {
        tokio::select! {
            _ = retry.tick(), if !pending.is_empty() => {
                let mut still_pending = Vec::new();
                for entry in pending.drain(..) {
                    match integration.setup_entry(&entry).await {
                        Ok(coordinator) => log::info!("Desk {} ready", coordinator.desk_info()),
                        Err(e @ IntegrationError::NotReady { .. }) => {
                            log::warn!("{}, retrying in {:?}", e, SETUP_RETRY_INTERVAL);
                            still_pending.push(entry);
                        }
                        Err(e) => log::error!("Failed to set up {}: {}", entry.address, e),
                    }
                }
                pending = still_pending;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                log::info!("Shutting down");
                break;
            }
        }
    }

    integration.shutdown().await;
    Ok(())
}

/// Connect to one desk for a single command
async fn with_desk(config: &Config, address: Option<&str>) -> Result<DeskCoordinator> {
    let entry = config.select(address)?;
    let factory = Arc::new(BleDeskFactory::new(config.connection.clone()).await?);
    let coordinator = DeskCoordinator::new(entry.desk(), factory, config.connection.clone());
    coordinator.ensure_connected().await?;
    Ok(coordinator)
}

enum DeskAction {
    Height,
    Preset(u8),
    Sit,
    Stand,
    Stop,
}

async fn one_shot(config: Config, address: Option<String>, action: DeskAction) -> Result<()> {
    let desk = with_desk(&config, address.as_deref()).await?;

    let result = match action {
        DeskAction::Height => desk
            .read_height()
            .await
            .map(|inches| println!("{:.1} in", inches)),
        DeskAction::Preset(number) => desk.move_to_preset(number).await,
        DeskAction::Sit => desk.move_to_sit().await,
        DeskAction::Stand => desk.move_to_stand().await,
        DeskAction::Stop => desk.stop().await,
    };

    if let Err(e) = desk.disconnect().await {
        log::warn!("Failed to disconnect cleanly: {}", e);
    }
    Ok(result?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_ref();

    match cli.command {
        Command::Scan { yes } => scan(config_path, yes).await,
        Command::List => {
            let config = load_config(config_path)?;
            if config.desks.is_empty() {
                println!("No desks configured");
            }
            for desk in &config.desks {
                println!("{}  {}", desk.address, desk.name);
            }
            Ok(())
        }
        Command::Remove { address } => {
            let mut config = load_config(config_path)?;
            let removed = config
                .remove_entry(&address)
                .with_context(|| format!("No desk configured with address {}", address))?;
            save_config(&config, config_path)?;
            println!("Removed {}", removed.name);
            Ok(())
        }
        Command::Run => run(load_config(config_path)?).await,
        Command::Height { address } => {
            one_shot(load_config(config_path)?, address, DeskAction::Height).await
        }
        Command::Preset { number, address } => {
            one_shot(load_config(config_path)?, address, DeskAction::Preset(number)).await
        }
        Command::Sit { address } => {
            one_shot(load_config(config_path)?, address, DeskAction::Sit).await
        }
        Command::Stand { address } => {
            one_shot(load_config(config_path)?, address, DeskAction::Stand).await
        }
        Command::Stop { address } => {
            one_shot(load_config(config_path)?, address, DeskAction::Stop).await
        }
    }
}
