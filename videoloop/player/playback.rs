use crate::bus::{CommandBus, DisplayCommand, Spawned, Token};
use crate::config::{Config, SkipMode};
use crate::error::App;
use crate::player::external::Player;
use crate::player::playlist::{Movie, Playlist};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task;

/// Pause after a failed player run, so a broken player binary does not
/// spin through the playlist.
const FAILURE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum PlaybackCommand {
    Load {
        playlist: Playlist,
        start_delay: Duration,
        volume: Option<i32>,
    },
    Skip,
    Hold,
    Resume,
    ToggleHold,
    Status(oneshot::Sender<PlaybackStatus>),
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    pub random: bool,
    pub skip_mode: SkipMode,
    pub wait_time: Duration,
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        Self {
            random: config.video_looper.is_random,
            skip_mode: config.video_looper.skip_mode,
            wait_time: config.wait_time(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct PlaybackStatus {
    pub held: bool,
    pub idle: bool,
    pub random: bool,
    pub skip_mode: SkipMode,
    pub playlist_length: usize,
    pub index: Option<usize>,
    pub now_playing: Option<PathBuf>,
    pub volume: Option<i32>,
    pub completed_runs: u64,
}

/// Posts requests onto the playback worker's own queue.
#[derive(Clone, Debug)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
}

impl PlaybackHandle {
    fn send(&self, command: PlaybackCommand) {
        if self.tx.send(command).is_err() {
            warn!("Playback worker is gone, request dropped");
        }
    }

    pub fn play_playlist(&self, playlist: Playlist, start_delay: Duration, volume: Option<i32>) {
        self.send(PlaybackCommand::Load {
            playlist,
            start_delay,
            volume,
        });
    }

    pub fn skip(&self) {
        self.send(PlaybackCommand::Skip);
    }

    pub fn hold(&self) {
        self.send(PlaybackCommand::Hold);
    }

    pub fn resume(&self) {
        self.send(PlaybackCommand::Resume);
    }

    pub fn toggle_hold(&self) {
        self.send(PlaybackCommand::ToggleHold);
    }

    pub async fn status(&self) -> Result<PlaybackStatus, App> {
        let (reply, response) = oneshot::channel();
        self.tx.send(PlaybackCommand::Status(reply))?;
        response
            .await
            .map_err(|e| App::ChannelClosed(format!("playback status: {e}")))
    }

    pub fn quit(&self) {
        self.send(PlaybackCommand::Quit);
    }
}

pub struct PlaybackWorker {
    player: Arc<dyn Player>,
    settings: PlaybackSettings,
    bus: CommandBus,
    commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    playlist: Option<Playlist>,
    running: bool,
    held: bool,
    skip_requested: bool,
    starting: bool,
    generation: u64,
    start_delay: Duration,
    first_movie: bool,
    volume: Option<i32>,
    now_playing: Option<PathBuf>,
    completed_runs: u64,
}

impl PlaybackWorker {
    pub fn spawn(
        player: Arc<dyn Player>,
        settings: PlaybackSettings,
        bus: CommandBus,
    ) -> Spawned<PlaybackHandle> {
        let (tx, commands) = mpsc::unbounded_channel();
        let (ready_tx, ready) = oneshot::channel();
        let worker = Self {
            player,
            settings,
            bus,
            commands,
            playlist: None,
            running: true,
            held: false,
            skip_requested: false,
            starting: false,
            generation: 0,
            start_delay: Duration::ZERO,
            first_movie: true,
            volume: None,
            now_playing: None,
            completed_runs: 0,
        };
        let task = task::spawn(worker.run(ready_tx));
        Spawned {
            handle: PlaybackHandle { tx },
            task,
            ready,
        }
    }

    async fn run(mut self, ready: oneshot::Sender<()>) {
        info!("Playback worker started");
        let _ = ready.send(());

        while self.running {
            if self.is_idle() {
                match self.commands.recv().await {
                    Some(command) => self.handle(command),
                    None => self.running = false,
                }
                continue;
            }
            self.play_next().await;
        }

        self.player.stop();
        info!("Playback worker stopped");
    }

    fn is_idle(&self) -> bool {
        self.held || self.has_nothing_to_play()
    }

    fn has_nothing_to_play(&self) -> bool {
        self.playlist.as_ref().map_or(true, Playlist::is_empty)
    }

    fn interrupted(&self, generation: u64) -> bool {
        !self.running || self.held || self.generation != generation
    }

    fn handle(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Load {
                playlist,
                start_delay,
                volume,
            } => {
                info!("New playlist with {} movie(s)", playlist.len());
                if playlist.is_empty() {
                    self.bus.send(Token::Display(DisplayCommand::Idle));
                }
                self.playlist = Some(playlist);
                self.generation = self.generation.wrapping_add(1);
                self.start_delay = start_delay;
                self.first_movie = true;
                self.volume = volume;
                self.skip_requested = false;
                self.player.stop();
            }
            PlaybackCommand::Skip => {
                if self.now_playing.is_some() {
                    info!("Skipping current movie");
                    self.skip_requested = true;
                    self.player.stop();
                } else if self.starting {
                    info!("Skipping the movie about to start");
                    self.skip_requested = true;
                } else {
                    debug!("Skip ignored, nothing is playing");
                }
            }
            PlaybackCommand::Hold => self.set_held(true),
            PlaybackCommand::Resume => self.set_held(false),
            PlaybackCommand::ToggleHold => self.set_held(!self.held),
            PlaybackCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            PlaybackCommand::Quit => {
                info!("Playback worker quitting");
                self.running = false;
                self.player.stop();
            }
        }
    }

    fn set_held(&mut self, held: bool) {
        if self.held == held {
            return;
        }
        self.held = held;
        if held {
            info!("Playback stopped by user");
            self.skip_requested = false;
            self.player.stop();
        } else {
            info!("Playback resumed by user");
            self.first_movie = true;
        }
        // With nothing to play the screen stays on the idle message.
        if self.has_nothing_to_play() {
            self.bus.send(Token::Display(DisplayCommand::Idle));
        } else if held {
            self.bus.send(Token::Display(DisplayCommand::Clear));
        }
    }

    fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            held: self.held,
            idle: self.is_idle(),
            random: self.settings.random,
            skip_mode: self.settings.skip_mode,
            playlist_length: self.playlist.as_ref().map_or(0, Playlist::len),
            index: self.playlist.as_ref().and_then(Playlist::index),
            now_playing: self.now_playing.clone(),
            volume: self.volume,
            completed_runs: self.completed_runs,
        }
    }

    async fn play_next(&mut self) {
        let generation = self.generation;
        let random = self.settings.random;
        let Some(playlist) = self.playlist.as_mut() else {
            return;
        };
        let loop_forever = playlist.len() == 1;
        let Some(movie) = playlist.get_next(random) else {
            return;
        };
        movie.clear_playcount();
        let movie = movie.clone();

        let delay = if self.first_movie {
            std::mem::take(&mut self.start_delay)
        } else {
            self.settings.wait_time
        };
        if !delay.is_zero() {
            debug!("Waiting {delay:?} before {movie}");
        }
        self.starting = true;
        let ready = self.pause_for(delay, generation).await;
        self.starting = false;
        if !ready {
            return;
        }

        // A skip during the pause drops the movie (or its first pass) and
        // the next one starts without waiting again.
        let skipped_early = std::mem::take(&mut self.skip_requested);
        if skipped_early && self.settings.skip_mode == SkipMode::Whole {
            if let Some(playlist) = self.playlist.as_mut() {
                playlist.skip_current();
            }
            self.first_movie = true;
            return;
        }

        for iteration in 1..=movie.repeats {
            if skipped_early && iteration == 1 {
                self.mark_played();
                self.first_movie = true;
                continue;
            }
            self.first_movie = false;
            if loop_forever {
                info!("Playing movie: {movie} (endless loop)");
            } else {
                info!("Playing movie: {movie} {iteration}/{}", movie.repeats);
            }

            let failed = match self.run_player(&movie, loop_forever).await {
                Ok(()) => false,
                Err(e) => {
                    error!("Playback of {} failed: {}", movie.file_path().display(), e);
                    true
                }
            };
            if self.interrupted(generation) {
                return;
            }
            self.completed_runs += 1;
            self.mark_played();

            if self.skip_requested {
                self.skip_requested = false;
                if self.settings.skip_mode == SkipMode::Whole {
                    if let Some(playlist) = self.playlist.as_mut() {
                        playlist.skip_current();
                    }
                    return;
                }
            } else if failed && !self.pause_for(FAILURE_PAUSE, generation).await {
                return;
            }
        }
    }

    fn mark_played(&mut self) {
        if let Some(current) = self.playlist.as_mut().and_then(Playlist::current_mut) {
            current.was_played();
        }
    }

    /// Runs the external player while still serving the command queue.
    async fn run_player(&mut self, movie: &Movie, loop_forever: bool) -> Result<(), App> {
        let player = Arc::clone(&self.player);
        let mut play = player.play(movie, loop_forever, self.volume);
        self.now_playing = Some(movie.path.clone());

        let result = loop {
            tokio::select! {
                result = &mut play => break result,
                command = self.commands.recv(), if self.running => match command {
                    Some(command) => self.handle(command),
                    None => {
                        self.running = false;
                        player.stop();
                    }
                },
            }
        };

        self.now_playing = None;
        result
    }

    /// Sleeps for `delay` while serving the command queue. Returns false if
    /// the wait was cut short by a new playlist, a hold or quit.
    async fn pause_for(&mut self, delay: Duration, generation: u64) -> bool {
        if delay.is_zero() {
            return !self.interrupted(generation);
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return !self.interrupted(generation),
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => self.running = false,
                    }
                    if self.interrupted(generation) {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusReceiver;
    use crate::testing::{FakePlayer, PlayRecord};
    use std::path::Path;

    const RUN: Duration = Duration::from_secs(10);

    fn settings(skip_mode: SkipMode) -> PlaybackSettings {
        PlaybackSettings {
            random: false,
            skip_mode,
            wait_time: Duration::ZERO,
        }
    }

    fn playlist(specs: &[(&str, u32)]) -> Playlist {
        Playlist::new(
            specs
                .iter()
                .map(|(path, repeats)| Movie::new(*path, None, *repeats))
                .collect(),
        )
    }

    fn start(
        skip_mode: SkipMode,
    ) -> (
        Spawned<PlaybackHandle>,
        mpsc::UnboundedReceiver<PlayRecord>,
        BusReceiver,
    ) {
        let (player, plays) = FakePlayer::new(Some(RUN));
        let (bus, bus_rx) = CommandBus::new();
        let spawned = PlaybackWorker::spawn(Arc::new(player), settings(skip_mode), bus);
        (spawned, plays, bus_rx)
    }

    async fn next_path(plays: &mut mpsc::UnboundedReceiver<PlayRecord>) -> PathBuf {
        plays.recv().await.expect("player channel closed").path
    }

    #[tokio::test(start_paused = true)]
    async fn empty_playlist_signals_idle_before_any_play() {
        let (spawned, mut plays, mut bus_rx) = start(SkipMode::Whole);
        spawned.ready.await.unwrap();
        spawned
            .handle
            .play_playlist(Playlist::default(), Duration::ZERO, None);

        assert_eq!(bus_rx.recv().await, Some(Token::Display(DisplayCommand::Idle)));
        let status = spawned.handle.status().await.unwrap();
        assert!(status.idle);
        assert_eq!(status.playlist_length, 0);
        assert!(plays.try_recv().is_err());

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn plays_each_movie_for_its_repeats_and_wraps() {
        let (spawned, mut plays, _bus_rx) = start(SkipMode::Whole);
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 2), ("/v/b.mp4", 1)]),
            Duration::ZERO,
            Some(-200),
        );

        let mut order = Vec::new();
        for _ in 0..6 {
            let record = plays.recv().await.unwrap();
            assert!(!record.loop_forever);
            assert_eq!(record.volume, Some(-200));
            order.push(record.path);
        }
        let expected: Vec<PathBuf> = ["a", "a", "b", "a", "a", "b"]
            .iter()
            .map(|name| PathBuf::from(format!("/v/{name}.mp4")))
            .collect();
        assert_eq!(order, expected);

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn single_movie_loops_forever() {
        let (spawned, mut plays, _bus_rx) = start(SkipMode::Whole);
        spawned
            .handle
            .play_playlist(playlist(&[("/v/only.mp4", 3)]), Duration::ZERO, None);
        let record = plays.recv().await.unwrap();
        assert!(record.loop_forever);
        assert_eq!(record.path, Path::new("/v/only.mp4"));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn whole_skip_abandons_remaining_repeats() {
        let (spawned, mut plays, _bus_rx) = start(SkipMode::Whole);
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 3), ("/v/b.mp4", 1)]),
            Duration::ZERO,
            None,
        );

        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        let skipped_at = tokio::time::Instant::now();
        spawned.handle.skip();
        assert_eq!(next_path(&mut plays).await, Path::new("/v/b.mp4"));
        assert!(skipped_at.elapsed() < RUN);
        // a was abandoned, the next round gives it all three repeats again
        for _ in 0..3 {
            assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        }

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_skip_only_cuts_the_current_pass() {
        let (spawned, mut plays, _bus_rx) = start(SkipMode::Iteration);
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 3), ("/v/b.mp4", 1)]),
            Duration::ZERO,
            None,
        );

        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        let skipped_at = tokio::time::Instant::now();
        spawned.handle.skip();
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        assert!(skipped_at.elapsed() < RUN);
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        assert_eq!(next_path(&mut plays).await, Path::new("/v/b.mp4"));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn new_playlist_interrupts_current_movie() {
        let (spawned, mut plays, _bus_rx) = start(SkipMode::Whole);
        spawned
            .handle
            .play_playlist(playlist(&[("/v/a.mp4", 5)]), Duration::ZERO, None);
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));

        let started = tokio::time::Instant::now();
        spawned.handle.play_playlist(
            playlist(&[("/v/x.mp4", 1), ("/v/y.mp4", 1)]),
            Duration::ZERO,
            None,
        );
        assert_eq!(next_path(&mut plays).await, Path::new("/v/x.mp4"));
        assert!(started.elapsed() < RUN);

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn start_delay_and_wait_time_are_honored() {
        let (player, mut plays) = FakePlayer::new(Some(RUN));
        let (bus, _bus_rx) = CommandBus::new();
        let spawned = PlaybackWorker::spawn(
            Arc::new(player),
            PlaybackSettings {
                wait_time: Duration::from_secs(2),
                ..settings(SkipMode::Whole)
            },
            bus,
        );
        let started = tokio::time::Instant::now();
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 1), ("/v/b.mp4", 1)]),
            Duration::from_secs(5),
            None,
        );
        plays.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        plays.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5) + RUN + Duration::from_secs(2));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hold_stops_playback_until_resumed() {
        let (spawned, mut plays, mut bus_rx) = start(SkipMode::Whole);
        spawned
            .handle
            .play_playlist(playlist(&[("/v/a.mp4", 1), ("/v/b.mp4", 1)]), Duration::ZERO, None);
        plays.recv().await.unwrap();

        spawned.handle.toggle_hold();
        assert_eq!(bus_rx.recv().await, Some(Token::Display(DisplayCommand::Clear)));
        let status = spawned.handle.status().await.unwrap();
        assert!(status.held && status.idle);

        tokio::time::sleep(RUN * 3).await;
        assert!(plays.try_recv().is_err());

        spawned.handle.resume();
        assert!(plays.recv().await.is_some());

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hold_and_resume_without_movies_keep_the_idle_message() {
        let (spawned, _plays, mut bus_rx) = start(SkipMode::Whole);
        spawned
            .handle
            .play_playlist(Playlist::default(), Duration::ZERO, None);
        assert_eq!(bus_rx.recv().await, Some(Token::Display(DisplayCommand::Idle)));

        spawned.handle.toggle_hold();
        assert_eq!(bus_rx.recv().await, Some(Token::Display(DisplayCommand::Idle)));
        spawned.handle.toggle_hold();
        assert_eq!(bus_rx.recv().await, Some(Token::Display(DisplayCommand::Idle)));
        let status = spawned.handle.status().await.unwrap();
        assert!(!status.held && status.idle);

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    fn waiting_worker(
        skip_mode: SkipMode,
    ) -> (Spawned<PlaybackHandle>, mpsc::UnboundedReceiver<PlayRecord>) {
        let (player, plays) = FakePlayer::new(Some(RUN));
        let (bus, _bus_rx) = CommandBus::new();
        let spawned = PlaybackWorker::spawn(
            Arc::new(player),
            PlaybackSettings {
                wait_time: WAIT,
                ..settings(skip_mode)
            },
            bus,
        );
        (spawned, plays)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn whole_skip_during_the_pause_drops_the_upcoming_movie() {
        let (spawned, mut plays) = waiting_worker(SkipMode::Whole);
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 1), ("/v/b.mp4", 2), ("/v/c.mp4", 1)]),
            Duration::ZERO,
            None,
        );
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        let started = tokio::time::Instant::now();

        // a has finished, b is waiting out the pause
        tokio::time::sleep(RUN + Duration::from_secs(1)).await;
        spawned.handle.skip();
        assert_eq!(next_path(&mut plays).await, Path::new("/v/c.mp4"));
        assert!(started.elapsed() < RUN + WAIT + Duration::from_secs(1));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_skip_during_the_pause_drops_one_pass() {
        let (spawned, mut plays) = waiting_worker(SkipMode::Iteration);
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 1), ("/v/b.mp4", 2), ("/v/c.mp4", 1)]),
            Duration::ZERO,
            None,
        );
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));

        tokio::time::sleep(RUN + Duration::from_secs(1)).await;
        spawned.handle.skip();
        // one pass of b is left, then c
        assert_eq!(next_path(&mut plays).await, Path::new("/v/b.mp4"));
        let second_pass = tokio::time::Instant::now();
        assert_eq!(next_path(&mut plays).await, Path::new("/v/c.mp4"));
        assert!(second_pass.elapsed() >= RUN + WAIT);

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_count_as_finished() {
        let (mut player, mut plays) = FakePlayer::new(Some(RUN));
        player.fail = true;
        let (bus, _bus_rx) = CommandBus::new();
        let spawned = PlaybackWorker::spawn(Arc::new(player), settings(SkipMode::Whole), bus);
        spawned.handle.play_playlist(
            playlist(&[("/v/a.mp4", 1), ("/v/b.mp4", 1)]),
            Duration::ZERO,
            None,
        );
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        assert_eq!(next_path(&mut plays).await, Path::new("/v/b.mp4"));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn quit_unblocks_idle_and_playing_states() {
        let (idle, _plays, _bus_rx) = start(SkipMode::Whole);
        idle.handle.quit();
        idle.task.await.unwrap();

        let (playing, mut plays, _bus_rx) = start(SkipMode::Whole);
        playing
            .handle
            .play_playlist(playlist(&[("/v/a.mp4", 1)]), Duration::ZERO, None);
        plays.recv().await.unwrap();
        playing.handle.quit();
        playing.task.await.unwrap();

        let (waiting, _plays, _bus_rx) = start(SkipMode::Whole);
        waiting.handle.play_playlist(
            playlist(&[("/v/a.mp4", 1)]),
            Duration::from_secs(3600),
            None,
        );
        waiting.handle.quit();
        waiting.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn skip_while_idle_is_ignored() {
        let (spawned, mut plays, _bus_rx) = start(SkipMode::Whole);
        spawned.handle.skip();
        spawned
            .handle
            .play_playlist(playlist(&[("/v/a.mp4", 1), ("/v/b.mp4", 1)]), Duration::ZERO, None);
        assert_eq!(next_path(&mut plays).await, Path::new("/v/a.mp4"));
        assert_eq!(next_path(&mut plays).await, Path::new("/v/b.mp4"));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }
}
