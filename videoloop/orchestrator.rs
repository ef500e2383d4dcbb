use crate::bus::{
    BusReceiver, CommandBus, DisplayCommand, FileReaderCommand, GlobalCommand, PlayerCommand,
    Spawned, Token,
};
use crate::config::Config;
use crate::discovery::{
    DiscoveryHandle, DiscoverySettings, DiscoveryWorker, FsEvents, MountService, PathWatcher,
};
use crate::display::{DisplayHandle, DisplayWorker, InputEvent, Surface};
use crate::error::App;
use crate::library::{LibraryScan, PlaylistBuilder};
use crate::player::{
    HardwareMixer, PlaybackHandle, PlaybackSettings, PlaybackStatus, PlaybackWorker, Player,
    Playlist,
};
use log::{debug, error, info};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

/// Everything the looper talks to outside the process.
pub struct Collaborators {
    pub surface: Box<dyn Surface>,
    pub input: Option<mpsc::UnboundedReceiver<InputEvent>>,
    pub player: Arc<dyn Player>,
    pub watcher: Box<dyn PathWatcher>,
    pub fs_events: FsEvents,
    pub mount: Option<Box<dyn MountService>>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    search_paths: Vec<PathBuf>,
    reloads: u64,
    playback: Option<PlaybackStatus>,
    config: &'a Config,
}

pub struct Orchestrator {
    config: Config,
    builder: PlaylistBuilder,
    mixer: HardwareMixer,
    bus: CommandBus,
    bus_rx: BusReceiver,
    display: DisplayHandle,
    playback: PlaybackHandle,
    discovery: DiscoveryHandle,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    reloads: u64,
}

async fn await_ready<H>(name: &str, spawned: Spawned<H>) -> Result<(H, JoinHandle<()>), App> {
    spawned
        .ready
        .await
        .map_err(|_| App::ChannelClosed(format!("{name} worker exited before it was ready")))?;
    debug!("{name} worker ready");
    Ok((spawned.handle, spawned.task))
}

impl Orchestrator {
    /// Starts display, playback and discovery in that order, each one only
    /// after the previous reported ready.
    pub async fn start(
        config: Config,
        bus: CommandBus,
        bus_rx: BusReceiver,
        collaborators: Collaborators,
    ) -> Result<Self, App> {
        let Collaborators {
            surface,
            input,
            player,
            watcher,
            fs_events,
            mount,
        } = collaborators;

        let (display, display_task) = await_ready(
            "display",
            DisplayWorker::spawn(
                surface,
                config.video_looper.idle_message.clone(),
                bus.clone(),
                input,
            ),
        )
        .await?;
        let builder = PlaylistBuilder::from_config(&config, player.supported_extensions());
        let (playback, playback_task) = await_ready(
            "playback",
            PlaybackWorker::spawn(player, PlaybackSettings::from(&config), bus.clone()),
        )
        .await?;
        let (discovery, discovery_task) = await_ready(
            "discovery",
            DiscoveryWorker::spawn(
                DiscoverySettings::from(&config),
                bus.clone(),
                watcher,
                fs_events,
                mount,
            ),
        )
        .await?;

        Ok(Self {
            builder,
            mixer: HardwareMixer::new(config.alsa.clone()),
            config,
            bus,
            bus_rx,
            display,
            playback,
            discovery,
            tasks: vec![
                ("display", display_task),
                ("playback", playback_task),
                ("discovery", discovery_task),
            ],
            reloads: 0,
        })
    }

    pub fn bus(&self) -> CommandBus {
        self.bus.clone()
    }

    /// Serves the bus until `global/exit`, then shuts every worker down.
    pub async fn run(mut self) -> Result<(), App> {
        info!("Video looper running");
        while let Some(token) = self.bus_rx.recv().await {
            debug!("Dispatching {token}");
            if !self.dispatch(token).await {
                break;
            }
        }
        self.shutdown().await
    }

    /// Returns false once the looper should stop.
    async fn dispatch(&mut self, token: Token) -> bool {
        match token {
            Token::Global(GlobalCommand::Exit) => {
                info!("Exit requested");
                return false;
            }
            Token::Global(GlobalCommand::Reload) => self.reload().await,
            Token::Global(GlobalCommand::Debug) => self.log_snapshot().await,
            Token::Player(PlayerCommand::Skip) => self.playback.skip(),
            Token::Player(PlayerCommand::Stop) => self.playback.toggle_hold(),
            Token::Player(PlayerCommand::Pause) => self.playback.hold(),
            Token::Player(PlayerCommand::Play) => self.playback.resume(),
            Token::FileReader(FileReaderCommand::Refresh) => self.discovery.refresh(),
            Token::Display(DisplayCommand::Idle) => self.display.show_idle(),
            Token::Display(DisplayCommand::Clear) => self.display.blank(),
        }
        true
    }

    async fn reload(&mut self) {
        self.reloads += 1;
        let paths = self.discovery.get_paths();
        let builder = self.builder.clone();
        let scan = match task::spawn_blocking(move || builder.build(&paths)).await {
            Ok(scan) => scan,
            Err(e) => {
                error!("Playlist build failed: {}", e);
                LibraryScan {
                    playlist: Playlist::default(),
                    volume: None,
                    hw_volume: None,
                }
            }
        };

        if let Some(volume) = &scan.hw_volume {
            if let Err(e) = self.mixer.set_volume(volume).await {
                error!("Failed to set hardware volume: {}", e);
            }
        }

        let mut start_delay = Duration::ZERO;
        if !scan.playlist.is_empty() {
            let countdown = self.config.countdown();
            self.display.countdown(scan.playlist.len(), countdown.as_secs());
            start_delay = countdown;
        }
        self.playback
            .play_playlist(scan.playlist, start_delay, scan.volume);
    }

    async fn log_snapshot(&self) {
        let playback = match self.playback.status().await {
            Ok(status) => Some(status),
            Err(e) => {
                error!("{}", e);
                None
            }
        };
        let snapshot = Snapshot {
            search_paths: self.discovery.get_paths(),
            reloads: self.reloads,
            playback,
            config: &self.config,
        };
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => info!("Debug snapshot:\n{json}"),
            Err(e) => error!("Failed to serialize debug snapshot: {}", e),
        }
    }

    async fn shutdown(self) -> Result<(), App> {
        info!("Shutting down");
        self.display.quit();
        self.playback.quit();
        self.discovery.quit();

        let mut failure = None;
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!("{name} worker ended abnormally: {e}");
                failure.get_or_insert(App::JoinTask(e));
            }
        }
        info!("All workers stopped");
        failure.map_or(Ok(()), Err)
    }
}
