use crate::config::PlayerSection;
use crate::error::App;
use crate::player::playlist::Movie;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::watch;

/// An external program that renders a movie on screen.
pub trait Player: Send + Sync {
    fn supported_extensions(&self) -> &[String];

    /// Resolves once the player process has exited, either on its own or
    /// because `stop` was called while it ran.
    fn play<'a>(
        &'a self,
        movie: &'a Movie,
        loop_forever: bool,
        volume: Option<i32>,
    ) -> BoxFuture<'a, Result<(), App>>;

    /// Interrupts the running `play`, if any. Safe to call at any time.
    fn stop(&self);
}

/// Runs omxplayer, or any player with a compatible command line.
pub struct CommandPlayer {
    settings: PlayerSection,
    stop_signal: watch::Sender<u64>,
    subtitles: Option<TempDir>,
}

impl CommandPlayer {
    pub fn new(settings: PlayerSection) -> Result<Self, App> {
        let subtitles = if settings.show_titles {
            Some(tempfile::tempdir()?)
        } else {
            None
        };
        let (stop_signal, _) = watch::channel(0);
        info!("Using {} as video player", settings.command);
        Ok(Self {
            settings,
            stop_signal,
            subtitles,
        })
    }

    fn build_command(
        &self,
        movie: &Movie,
        loop_forever: bool,
        volume: Option<i32>,
    ) -> Result<Command, App> {
        let mut command = Command::new(&self.settings.command);
        command.args(&self.settings.extra_args);

        if let Some(volume) = volume {
            if !self.settings.volume_arg.is_empty() {
                command.arg(&self.settings.volume_arg).arg(volume.to_string());
            }
        }
        if loop_forever && !self.settings.loop_arg.is_empty() {
            command.arg(&self.settings.loop_arg);
        }
        if let (Some(dir), Some(title)) = (&self.subtitles, &movie.title) {
            let srt_path = dir.path().join("videoloop.srt");
            std::fs::write(&srt_path, format!("1\n00:00:00,000 --> 99:59:59,000\n{title}\n"))?;
            command.arg("--subtitles").arg(srt_path);
        }
        command
            .arg(movie.file_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        Ok(command)
    }
}

impl Player for CommandPlayer {
    fn supported_extensions(&self) -> &[String] {
        &self.settings.extensions
    }

    fn play<'a>(
        &'a self,
        movie: &'a Movie,
        loop_forever: bool,
        volume: Option<i32>,
    ) -> BoxFuture<'a, Result<(), App>> {
        // Only stops issued after this call interrupt the run.
        let mut stop_receiver = self.stop_signal.subscribe();
        Box::pin(async move {
            let mut child = self
                .build_command(movie, loop_forever, volume)?
                .spawn()
                .map_err(|e| {
                    App::ExternalProcess(format!("failed to launch {}: {e}", self.settings.command))
                })?;

            let mut stopped = false;
            let status = tokio::select! {
                status = child.wait() => status?,
                _ = stop_receiver.changed() => {
                    stopped = true;
                    debug!("Stopping {} for {}", self.settings.command, movie);
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill {}: {}", self.settings.command, e);
                    }
                    child.wait().await?
                }
            };

            if stopped || status.success() {
                Ok(())
            } else {
                Err(App::ExternalProcess(format!(
                    "{} exited with {status} while playing {}",
                    self.settings.command,
                    movie.file_path().display()
                )))
            }
        })
    }

    fn stop(&self) {
        self.stop_signal.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}
