use crate::bus::{CommandBus, GlobalCommand, Spawned, Token};
use crate::config::Config;
use crate::discovery::mount::{MountEvent, MountService};
use crate::discovery::paths::resolve_search_paths;
use crate::discovery::transfer::{copy_files, TransferSettings};
use crate::discovery::watcher::{is_qualifying, FsEvents, PathWatcher};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
enum DiscoveryRequest {
    Refresh,
    Quit,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub pattern: String,
    pub debounce: Duration,
    pub transfer: Option<TransferSettings>,
}

impl From<&Config> for DiscoverySettings {
    fn from(config: &Config) -> Self {
        Self {
            pattern: config.search_pattern(),
            debounce: config.debounce(),
            transfer: TransferSettings::from_config(config),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DiscoveryHandle {
    tx: mpsc::UnboundedSender<DiscoveryRequest>,
    paths: watch::Receiver<Vec<PathBuf>>,
}

impl DiscoveryHandle {
    /// The directories currently being watched.
    pub fn get_paths(&self) -> Vec<PathBuf> {
        self.paths.borrow().clone()
    }

    pub fn refresh(&self) {
        if self.tx.send(DiscoveryRequest::Refresh).is_err() {
            warn!("Discovery worker is gone, refresh dropped");
        }
    }

    pub fn quit(&self) {
        let _ = self.tx.send(DiscoveryRequest::Quit);
    }
}

pub struct DiscoveryWorker {
    settings: DiscoverySettings,
    bus: CommandBus,
    requests: mpsc::UnboundedReceiver<DiscoveryRequest>,
    watcher: Box<dyn PathWatcher>,
    fs_events: Option<FsEvents>,
    mount: Option<Box<dyn MountService>>,
    mount_tx: mpsc::UnboundedSender<MountEvent>,
    mount_events: mpsc::UnboundedReceiver<MountEvent>,
    paths: watch::Sender<Vec<PathBuf>>,
    watched: Vec<PathBuf>,
    deadline: Option<Instant>,
}

impl DiscoveryWorker {
    pub fn spawn(
        settings: DiscoverySettings,
        bus: CommandBus,
        watcher: Box<dyn PathWatcher>,
        fs_events: FsEvents,
        mount: Option<Box<dyn MountService>>,
    ) -> Spawned<DiscoveryHandle> {
        let (tx, requests) = mpsc::unbounded_channel();
        let (ready_tx, ready) = oneshot::channel();
        let (paths, paths_rx) = watch::channel(Vec::new());
        let (mount_tx, mount_events) = mpsc::unbounded_channel();
        let worker = Self {
            settings,
            bus,
            requests,
            watcher,
            fs_events: Some(fs_events),
            mount,
            mount_tx,
            mount_events,
            paths,
            watched: Vec::new(),
            deadline: None,
        };
        let task = task::spawn(worker.run(ready_tx));
        Spawned {
            handle: DiscoveryHandle {
                tx,
                paths: paths_rx,
            },
            task,
            ready,
        }
    }

    async fn run(mut self, ready: oneshot::Sender<()>) {
        if let Some(mount) = self.mount.as_mut() {
            if let Err(e) = mount.start_monitor(self.mount_tx.clone()).await {
                error!("{}", e);
            }
        }
        self.rescan();
        info!("Discovery worker watching {} path(s)", self.watched.len());
        let _ = ready.send(());
        self.request_reload();

        loop {
            let deadline = self.deadline;
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(DiscoveryRequest::Refresh) => {
                        info!("Refreshing search paths");
                        self.rescan();
                        self.request_reload();
                    }
                    Some(DiscoveryRequest::Quit) | None => break,
                },
                event = next_fs_event(&mut self.fs_events) => match event {
                    Some(Ok(event)) => {
                        if is_qualifying(&event) {
                            debug!("Change detected: {:?} {:?}", event.kind, event.paths);
                            self.deadline = Some(Instant::now() + self.settings.debounce);
                        }
                    }
                    Some(Err(e)) => warn!("Watch error: {}", e),
                    None => {
                        warn!("File watcher stopped delivering events");
                        self.fs_events = None;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    info!("Files changed, reloading playlist");
                    self.request_reload();
                }
                Some(event) = self.mount_events.recv() => self.on_mount_event(event).await,
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.deadline = None;
        self.unwatch_all();
        if let Some(mut mount) = self.mount.take() {
            let stop = mount.stop_monitor();
            tokio::pin!(stop);
            loop {
                tokio::select! {
                    () = &mut stop => break,
                    Some(event) = self.mount_events.recv() => {
                        if let MountEvent::Detaching(ack) = event {
                            let _ = ack.send(());
                        }
                    }
                }
            }
        }
        info!("Discovery worker stopped");
    }

    async fn on_mount_event(&mut self, event: MountEvent) {
        match event {
            MountEvent::Attached(path) => {
                info!("Drive attached at {}", path.display());
                if let Some(transfer) = self.settings.transfer.clone() {
                    self.unwatch_all();
                    let sources = vec![path];
                    match task::spawn_blocking(move || copy_files(&sources, &transfer)).await {
                        Ok(Ok(report)) => info!(
                            "Copied {} file(s), removed {}",
                            report.copied.len(),
                            report.removed.len()
                        ),
                        Ok(Err(e)) => error!("{}", e),
                        Err(e) => error!("Copy task failed: {}", e),
                    }
                }
                self.rescan();
                self.request_reload();
            }
            MountEvent::Detaching(ack) => {
                info!("Drive detaching, releasing watches");
                self.deadline = None;
                self.unwatch_all();
                let _ = ack.send(());
            }
            MountEvent::Detached => {
                info!("Drive detached");
                self.rescan();
                self.request_reload();
            }
        }
    }

    fn request_reload(&self) {
        self.bus.send(Token::Global(GlobalCommand::Reload));
    }

    fn unwatch_all(&mut self) {
        for path in self.watched.drain(..) {
            if let Err(e) = self.watcher.unwatch(&path) {
                debug!("Unwatch of {} failed: {}", path.display(), e);
            }
        }
    }

    /// Re-resolves the search pattern, re-registers watches and publishes
    /// the directories that could be watched.
    fn rescan(&mut self) {
        self.unwatch_all();
        for path in resolve_search_paths(&self.settings.pattern) {
            match self.watcher.watch(&path) {
                Ok(()) => {
                    debug!("Watching {}", path.display());
                    self.watched.push(path);
                }
                Err(e) => warn!("{}", e),
            }
        }
        self.paths.send_replace(self.watched.clone());
    }
}

async fn next_fs_event(events: &mut Option<FsEvents>) -> Option<notify::Result<notify::Event>> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
