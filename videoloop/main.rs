mod bus;
mod config;
mod discovery;
mod display;
mod error;
mod library;
mod orchestrator;
mod player;
#[cfg(test)]
mod testing;

use crate::bus::{CommandBus, GlobalCommand, Token};
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::discovery::{MountService, NotifyWatcher, UsbMounter};
use crate::display::{spawn_stdin_input, TerminalSurface};
use crate::error::App;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::player::CommandPlayer;
use clap::Parser;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::{fs, task};

#[derive(Parser)]
#[command(
    name = "videoloop",
    about = "Loops the movies found on local or USB storage.",
    version
)]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH, help = "Configuration file")]
    config: PathBuf,
    #[arg(short = 'l', long = "log-level", default_value = "info", help = "Log level specification")]
    log_level: String,
    #[arg(long = "log-dir", help = "Directory for log files, overrides the configuration")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), App> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let log_dir = cli
        .log_dir
        .unwrap_or_else(|| config.logging.directory.clone());
    fs::create_dir_all(&log_dir).await?;
    let logger = Logger::try_with_str(&cli.log_level)?
        .log_to_file(FileSpec::default().directory(&log_dir))
        .rotate(
            Criterion::Size(1_000_000),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(3),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .start()?;
    info!("Loaded configuration from {}", cli.config.display());

    if config.copymode.enabled && !config.usb.auto_mount {
        warn!("Copy mode needs usb.auto_mount to see new drives");
    }

    let (bus, bus_rx) = CommandBus::new();
    let input = if config.video_looper.keyboard_control {
        let (events, input) = mpsc::unbounded_channel();
        spawn_stdin_input(events);
        Some(input)
    } else {
        None
    };
    let (watcher, fs_events) = NotifyWatcher::new()?;
    let mount = if config.usb.auto_mount {
        Some(Box::new(UsbMounter::new(config.usb.clone())) as Box<dyn MountService>)
    } else {
        None
    };
    let collaborators = Collaborators {
        surface: Box::new(TerminalSurface),
        input,
        player: Arc::new(CommandPlayer::new(config.player.clone())?),
        watcher: Box::new(watcher),
        fs_events,
        mount,
    };

    let orchestrator = Orchestrator::start(config, bus.clone(), bus_rx, collaborators).await?;
    spawn_signal_handlers(bus)?;

    let code = match orchestrator.run().await {
        Ok(()) => {
            info!("Video looper exited");
            0
        }
        Err(e) => {
            error!("Video looper stopped with an error: {}", e);
            1
        }
    };
    logger.flush();
    process::exit(code);
}

/// SIGINT and SIGTERM ask for a clean shutdown.
fn spawn_signal_handlers(bus: CommandBus) -> Result<(), App> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    task::spawn(async move {
        loop {
            tokio::select! {
                _ = terminate.recv() => info!("Received SIGTERM"),
                _ = interrupt.recv() => info!("Received SIGINT"),
            }
            if !bus.send(Token::Global(GlobalCommand::Exit)) {
                break;
            }
        }
    });
    Ok(())
}
