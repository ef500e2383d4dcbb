//! Stand-ins for the player binary, the screen, the file watcher and the
//! drive mounter.

use crate::discovery::mount::{MountEvent, MountService};
use crate::discovery::watcher::PathWatcher;
use crate::display::surface::Surface;
use crate::error::App;
use crate::player::external::Player;
use crate::player::playlist::Movie;
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayRecord {
    pub path: PathBuf,
    pub loop_forever: bool,
    pub volume: Option<i32>,
}

/// Pretends to play each movie for `run_time`, or until stopped when
/// `run_time` is `None`.
pub struct FakePlayer {
    run_time: Option<Duration>,
    pub fail: bool,
    extensions: Vec<String>,
    plays: mpsc::UnboundedSender<PlayRecord>,
    stop_signal: watch::Sender<u64>,
}

impl FakePlayer {
    pub fn new(run_time: Option<Duration>) -> (Self, mpsc::UnboundedReceiver<PlayRecord>) {
        let (plays, rx) = mpsc::unbounded_channel();
        let (stop_signal, _) = watch::channel(0);
        let player = Self {
            run_time,
            fail: false,
            extensions: vec!["mp4".to_string()],
            plays,
            stop_signal,
        };
        (player, rx)
    }
}

impl Player for FakePlayer {
    fn supported_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn play<'a>(
        &'a self,
        movie: &'a Movie,
        loop_forever: bool,
        volume: Option<i32>,
    ) -> BoxFuture<'a, Result<(), App>> {
        let mut stopped = self.stop_signal.subscribe();
        Box::pin(async move {
            let _ = self.plays.send(PlayRecord {
                path: movie.path.clone(),
                loop_forever,
                volume,
            });
            if self.fail {
                return Err(App::ExternalProcess("fake player failure".to_string()));
            }
            match self.run_time {
                Some(run_time) => {
                    tokio::select! {
                        () = tokio::time::sleep(run_time) => {}
                        _ = stopped.changed() => {}
                    }
                }
                None => {
                    let _ = stopped.changed().await;
                }
            }
            Ok(())
        })
    }

    fn stop(&self) {
        self.stop_signal.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Blank,
    Idle(String),
    /// seconds left, movies found
    Countdown(u64, usize),
}

pub struct RecordingSurface {
    frames: mpsc::UnboundedSender<Rendered>,
}

impl RecordingSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Rendered>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (Self { frames }, rx)
    }
}

impl Surface for RecordingSurface {
    fn blank(&mut self) {
        let _ = self.frames.send(Rendered::Blank);
    }

    fn render_idle_message(&mut self, text: &str) {
        let _ = self.frames.send(Rendered::Idle(text.to_string()));
    }

    fn render_countdown(&mut self, seconds_left: u64, movies: usize) {
        let _ = self.frames.send(Rendered::Countdown(seconds_left, movies));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCall {
    Watch(PathBuf),
    Unwatch(PathBuf),
}

/// Records watch registrations. Clones share the same log.
#[derive(Clone, Default)]
pub struct FakeWatcher {
    calls: Arc<Mutex<Vec<WatchCall>>>,
    failing: Option<PathBuf>,
}

impl FakeWatcher {
    pub fn failing_on(path: PathBuf) -> Self {
        Self {
            failing: Some(path),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<WatchCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl PathWatcher for FakeWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), App> {
        if self.failing.as_deref() == Some(path) {
            return Err(App::WatchSetup(format!("{} vanished", path.display())));
        }
        self.calls
            .lock()
            .unwrap()
            .push(WatchCall::Watch(path.to_path_buf()));
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), App> {
        self.calls
            .lock()
            .unwrap()
            .push(WatchCall::Unwatch(path.to_path_buf()));
        Ok(())
    }
}

/// Hands the event sender to the test instead of polling real devices.
pub struct FakeMounter {
    events: Option<oneshot::Sender<mpsc::UnboundedSender<MountEvent>>>,
    stopped: Option<oneshot::Sender<()>>,
}

pub struct MounterControl {
    events: Option<oneshot::Receiver<mpsc::UnboundedSender<MountEvent>>>,
    stopped: Option<oneshot::Receiver<()>>,
}

impl FakeMounter {
    pub fn new() -> (Self, MounterControl) {
        let (events_tx, events_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        (
            Self {
                events: Some(events_tx),
                stopped: Some(stopped_tx),
            },
            MounterControl {
                events: Some(events_rx),
                stopped: Some(stopped_rx),
            },
        )
    }
}

impl MounterControl {
    pub async fn events(&mut self) -> mpsc::UnboundedSender<MountEvent> {
        self.events
            .take()
            .expect("events already taken")
            .await
            .expect("monitor never started")
    }

    pub async fn stopped(&mut self) -> bool {
        match self.stopped.take() {
            Some(stopped) => stopped.await.is_ok(),
            None => false,
        }
    }
}

impl MountService for FakeMounter {
    fn start_monitor(
        &mut self,
        events: mpsc::UnboundedSender<MountEvent>,
    ) -> BoxFuture<'_, Result<(), App>> {
        Box::pin(async move {
            if let Some(slot) = self.events.take() {
                let _ = slot.send(events);
            }
            Ok(())
        })
    }

    fn stop_monitor(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(stopped) = self.stopped.take() {
                let _ = stopped.send(());
            }
        })
    }
}
