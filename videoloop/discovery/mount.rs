use crate::config::UsbSection;
use crate::error::App;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

const DEVICE_DIR: &str = "/dev/disk/by-id";

#[derive(Debug)]
pub enum MountEvent {
    /// A drive is mounted and readable at the given path.
    Attached(PathBuf),
    /// Drives are about to be unmounted. Nothing happens until `ack` fires
    /// or is dropped.
    Detaching(oneshot::Sender<()>),
    Detached,
}

/// Makes removable drives appear under the search pattern and reports
/// their arrival and departure.
pub trait MountService: Send {
    fn start_monitor(
        &mut self,
        events: mpsc::UnboundedSender<MountEvent>,
    ) -> BoxFuture<'_, Result<(), App>>;

    /// Returns once every drive it mounted has been released.
    fn stop_monitor(&mut self) -> BoxFuture<'_, ()>;
}

struct Monitor {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Polls `/dev/disk/by-id` for USB partitions and mounts each one under
/// `<mount_root><n>`.
pub struct UsbMounter {
    settings: UsbSection,
    device_dir: PathBuf,
    monitor: Option<Monitor>,
}

impl UsbMounter {
    pub fn new(settings: UsbSection) -> Self {
        Self {
            settings,
            device_dir: PathBuf::from(DEVICE_DIR),
            monitor: None,
        }
    }
}

impl MountService for UsbMounter {
    fn start_monitor(
        &mut self,
        events: mpsc::UnboundedSender<MountEvent>,
    ) -> BoxFuture<'_, Result<(), App>> {
        Box::pin(async move {
            if self.monitor.is_some() {
                return Err(App::Mount("monitor already running".to_string()));
            }
            let (stop, stopped) = oneshot::channel();
            let table = MountTable {
                settings: self.settings.clone(),
                events,
                mounts: BTreeMap::new(),
                failed: BTreeSet::new(),
            };
            let task = task::spawn(table.run(self.device_dir.clone(), stopped));
            info!(
                "Watching {} for USB drives, mounting under {}*",
                self.device_dir.display(),
                self.settings.mount_root.display()
            );
            self.monitor = Some(Monitor { stop, task });
            Ok(())
        })
    }

    fn stop_monitor(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(monitor) = self.monitor.take() else {
                return;
            };
            let _ = monitor.stop.send(());
            if let Err(e) = monitor.task.await {
                error!("USB monitor ended abnormally: {}", e);
            }
        })
    }
}

pub fn is_usb_partition(name: &str) -> bool {
    name.starts_with("usb-") && name.contains("-part")
}

/// The lowest `<root><n>` not already in use.
pub fn next_mount_point<'a>(root: &Path, used: impl Iterator<Item = &'a PathBuf>) -> PathBuf {
    let used: BTreeSet<&PathBuf> = used.collect();
    (0u32..)
        .map(|n| {
            let mut name = root.as_os_str().to_owned();
            name.push(n.to_string());
            PathBuf::from(name)
        })
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| root.to_path_buf())
}

async fn usb_partitions(dir: &Path) -> BTreeSet<PathBuf> {
    let mut found = BTreeSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return found;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_usb_partition) {
            continue;
        }
        let link = entry.path();
        let node = tokio::fs::canonicalize(&link).await.unwrap_or(link);
        found.insert(node);
    }
    found
}

struct MountTable {
    settings: UsbSection,
    events: mpsc::UnboundedSender<MountEvent>,
    /// device node -> mount point
    mounts: BTreeMap<PathBuf, PathBuf>,
    /// Devices that failed to mount stay here until they are unplugged.
    failed: BTreeSet<PathBuf>,
}

impl MountTable {
    async fn run(mut self, device_dir: PathBuf, mut stopped: oneshot::Receiver<()>) {
        let mut ticker = time::interval(Duration::from_millis(self.settings.poll_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => self.poll(&device_dir).await,
            }
        }
        self.remove_all().await;
        info!("USB monitor stopped");
    }

    async fn poll(&mut self, device_dir: &Path) {
        let present = usb_partitions(device_dir).await;
        self.failed.retain(|device| present.contains(device));

        let gone: Vec<PathBuf> = self
            .mounts
            .keys()
            .filter(|device| !present.contains(*device))
            .cloned()
            .collect();
        if !gone.is_empty() {
            self.detach(&gone).await;
        }

        for device in present {
            if self.mounts.contains_key(&device) || self.failed.contains(&device) {
                continue;
            }
            match self.mount(&device).await {
                Ok(mount_point) => {
                    self.mounts.insert(device, mount_point.clone());
                    let _ = self.events.send(MountEvent::Attached(mount_point));
                }
                Err(e) => {
                    error!("{}", e);
                    self.failed.insert(device);
                }
            }
        }
    }

    async fn mount(&self, device: &Path) -> Result<PathBuf, App> {
        let mount_point = next_mount_point(&self.settings.mount_root, self.mounts.values());
        info!("Mounting {} at {}", device.display(), mount_point.display());
        tokio::fs::create_dir_all(&mount_point).await.map_err(|e| {
            App::Mount(format!("cannot create {}: {e}", mount_point.display()))
        })?;

        let mut command = Command::new("mount");
        if self.settings.readonly {
            command.arg("-r");
        }
        let status = command
            .arg(device)
            .arg(&mount_point)
            .status()
            .await
            .map_err(|e| App::Mount(format!("cannot run mount: {e}")))?;
        if status.success() {
            Ok(mount_point)
        } else {
            let _ = tokio::fs::remove_dir(&mount_point).await;
            Err(App::Mount(format!(
                "mounting {} failed with {status}",
                device.display()
            )))
        }
    }

    async fn detach(&mut self, devices: &[PathBuf]) {
        let (ack, acked) = oneshot::channel();
        if self.events.send(MountEvent::Detaching(ack)).is_ok() {
            let _ = acked.await;
        }
        for device in devices {
            if let Some(mount_point) = self.mounts.remove(device) {
                unmount(device, &mount_point).await;
            }
        }
        let _ = self.events.send(MountEvent::Detached);
    }

    async fn remove_all(&mut self) {
        if self.mounts.is_empty() {
            return;
        }
        let devices: Vec<PathBuf> = self.mounts.keys().cloned().collect();
        self.detach(&devices).await;
    }
}

async fn unmount(device: &Path, mount_point: &Path) {
    info!("Unmounting {} from {}", device.display(), mount_point.display());
    match Command::new("umount").arg("-l").arg(mount_point).status().await {
        Ok(status) if status.success() => {
            if let Err(e) = tokio::fs::remove_dir(mount_point).await {
                warn!("Cannot remove {}: {}", mount_point.display(), e);
            }
        }
        Ok(status) => warn!("umount of {} failed with {}", mount_point.display(), status),
        Err(e) => warn!("Cannot run umount: {}", e),
    }
}
