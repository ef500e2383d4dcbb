use crate::error::App;
use notify::event::{CreateKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;

pub type FsEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Registers directories for change notification.
pub trait PathWatcher: Send {
    fn watch(&mut self, path: &Path) -> Result<(), App>;
    fn unwatch(&mut self, path: &Path) -> Result<(), App>;
}

/// Watches directories (non-recursively) through the platform backend and
/// forwards raw events from its callback thread.
pub struct NotifyWatcher {
    inner: RecommendedWatcher,
}

impl NotifyWatcher {
    pub fn new() -> Result<(Self, FsEvents), App> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;
        Ok((Self { inner }, rx))
    }
}

impl PathWatcher for NotifyWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), App> {
        self.inner
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| App::WatchSetup(format!("{}: {e}", path.display())))
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), App> {
        self.inner.unwatch(path)?;
        Ok(())
    }
}

/// Only creations, modifications and removals of files count as a change
/// to the library.
pub fn is_qualifying(event: &Event) -> bool {
    let relevant = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => false,
    };
    relevant && event.paths.iter().any(|path| !path.is_dir())
}
