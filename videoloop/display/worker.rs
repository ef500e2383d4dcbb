use crate::bus::{CommandBus, GlobalCommand, PlayerCommand, Spawned, Token};
use crate::display::surface::{InputEvent, Surface};
use log::{debug, info, warn};
use std::future::pending;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tokio::time::{sleep_until, Instant};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum DisplayRequest {
    Blank,
    Idle,
    Countdown { movies: usize, seconds: u64 },
    Quit,
}

#[derive(Clone, Debug)]
pub struct DisplayHandle {
    tx: mpsc::UnboundedSender<DisplayRequest>,
}

impl DisplayHandle {
    fn send(&self, request: DisplayRequest) {
        if self.tx.send(request).is_err() {
            warn!("Display worker is gone, request dropped");
        }
    }

    pub fn blank(&self) {
        self.send(DisplayRequest::Blank);
    }

    pub fn show_idle(&self) {
        self.send(DisplayRequest::Idle);
    }

    /// Announces `movies` and counts down `seconds` without blocking the
    /// caller.
    pub fn countdown(&self, movies: usize, seconds: u64) {
        self.send(DisplayRequest::Countdown { movies, seconds });
    }

    pub fn quit(&self) {
        self.send(DisplayRequest::Quit);
    }
}

struct Countdown {
    movies: usize,
    remaining: u64,
    next_tick: Instant,
}

pub struct DisplayWorker {
    surface: Box<dyn Surface>,
    idle_message: String,
    bus: CommandBus,
    requests: mpsc::UnboundedReceiver<DisplayRequest>,
    input: Option<mpsc::UnboundedReceiver<InputEvent>>,
    countdown: Option<Countdown>,
}

impl DisplayWorker {
    pub fn spawn(
        surface: Box<dyn Surface>,
        idle_message: String,
        bus: CommandBus,
        input: Option<mpsc::UnboundedReceiver<InputEvent>>,
    ) -> Spawned<DisplayHandle> {
        let (tx, requests) = mpsc::unbounded_channel();
        let (ready_tx, ready) = oneshot::channel();
        let worker = Self {
            surface,
            idle_message,
            bus,
            requests,
            input,
            countdown: None,
        };
        let task = task::spawn(worker.run(ready_tx));
        Spawned {
            handle: DisplayHandle { tx },
            task,
            ready,
        }
    }

    async fn run(mut self, ready: oneshot::Sender<()>) {
        self.surface.blank();
        info!("Display worker ready");
        let _ = ready.send(());

        loop {
            let tick = self.countdown.as_ref().map(|c| c.next_tick);
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(DisplayRequest::Quit) | None => break,
                    Some(request) => self.apply(request),
                },
                event = next_input(&mut self.input) => match event {
                    Some(event) => self.translate(event),
                    None => {
                        debug!("Input stream ended");
                        self.input = None;
                    }
                },
                () = sleep_until(tick.unwrap_or_else(Instant::now)), if tick.is_some() => {
                    self.tick();
                }
            }
        }

        self.surface.blank();
        info!("Display worker stopped");
    }

    fn apply(&mut self, request: DisplayRequest) {
        match request {
            DisplayRequest::Blank => {
                self.countdown = None;
                self.surface.blank();
            }
            DisplayRequest::Idle => {
                self.countdown = None;
                self.surface.render_idle_message(&self.idle_message);
            }
            DisplayRequest::Countdown { movies, seconds } => {
                self.surface.blank();
                if seconds == 0 {
                    self.countdown = None;
                    return;
                }
                info!("Found {movies} movie(s), starting playback in {seconds}s");
                self.surface.render_countdown(seconds, movies);
                self.countdown = Some(Countdown {
                    movies,
                    remaining: seconds,
                    next_tick: Instant::now() + TICK,
                });
            }
            DisplayRequest::Quit => {}
        }
    }

    fn tick(&mut self) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        countdown.remaining -= 1;
        if countdown.remaining == 0 {
            self.countdown = None;
            self.surface.blank();
            return;
        }
        countdown.next_tick += TICK;
        let (remaining, movies) = (countdown.remaining, countdown.movies);
        self.surface.render_countdown(remaining, movies);
    }

    fn translate(&mut self, event: InputEvent) {
        let token = match event {
            InputEvent::Escape => {
                info!("ESC was pressed, quitting");
                Token::Global(GlobalCommand::Exit)
            }
            InputEvent::QuitRequested => {
                info!("Quit requested");
                Token::Global(GlobalCommand::Exit)
            }
            InputEvent::Skip => {
                info!("Skip was pressed");
                Token::Player(PlayerCommand::Skip)
            }
            InputEvent::Stop => {
                info!("Stop was pressed");
                Token::Player(PlayerCommand::Stop)
            }
        };
        self.bus.send(token);
    }
}

async fn next_input(input: &mut Option<mpsc::UnboundedReceiver<InputEvent>>) -> Option<InputEvent> {
    match input {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSurface, Rendered};

    fn start(
        input: Option<mpsc::UnboundedReceiver<InputEvent>>,
    ) -> (
        Spawned<DisplayHandle>,
        mpsc::UnboundedReceiver<Rendered>,
        crate::bus::BusReceiver,
    ) {
        let (surface, rendered) = RecordingSurface::new();
        let (bus, bus_rx) = CommandBus::new();
        let spawned = DisplayWorker::spawn(Box::new(surface), "No movies".to_string(), bus, input);
        (spawned, rendered, bus_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn blanks_on_start_and_signals_ready() {
        let (spawned, mut rendered, _bus_rx) = start(None);
        spawned.ready.await.unwrap();
        assert_eq!(rendered.recv().await, Some(Rendered::Blank));
        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn translates_input_into_tokens() {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (spawned, _rendered, mut bus_rx) = start(Some(input_rx));
        for event in [
            InputEvent::Skip,
            InputEvent::Stop,
            InputEvent::Escape,
            InputEvent::QuitRequested,
        ] {
            input_tx.send(event).unwrap();
        }
        assert_eq!(bus_rx.recv().await, Some(Token::Player(PlayerCommand::Skip)));
        assert_eq!(bus_rx.recv().await, Some(Token::Player(PlayerCommand::Stop)));
        assert_eq!(bus_rx.recv().await, Some(Token::Global(GlobalCommand::Exit)));
        assert_eq!(bus_rx.recv().await, Some(Token::Global(GlobalCommand::Exit)));

        drop(input_tx);
        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_once_per_second_then_blanks() {
        let (spawned, mut rendered, _bus_rx) = start(None);
        assert_eq!(rendered.recv().await, Some(Rendered::Blank));

        let started = Instant::now();
        spawned.handle.countdown(4, 3);
        assert_eq!(rendered.recv().await, Some(Rendered::Blank));
        assert_eq!(rendered.recv().await, Some(Rendered::Countdown(3, 4)));
        assert_eq!(rendered.recv().await, Some(Rendered::Countdown(2, 4)));
        assert_eq!(rendered.recv().await, Some(Rendered::Countdown(1, 4)));
        assert_eq!(rendered.recv().await, Some(Rendered::Blank));
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        spawned.handle.quit();
        spawned.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_request_cancels_countdown() {
        let (spawned, mut rendered, _bus_rx) = start(None);
        rendered.recv().await;
        spawned.handle.countdown(2, 30);
        spawned.handle.show_idle();
        assert_eq!(rendered.recv().await, Some(Rendered::Blank));
        assert_eq!(rendered.recv().await, Some(Rendered::Countdown(30, 2)));
        assert_eq!(
            rendered.recv().await,
            Some(Rendered::Idle("No movies".to_string()))
        );

        spawned.handle.quit();
        spawned.task.await.unwrap();
        // only the final blank follows, no further countdown frames
        assert_eq!(rendered.recv().await, Some(Rendered::Blank));
        assert_eq!(rendered.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn quit_interrupts_input_wait() {
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let (spawned, _rendered, _bus_rx) = start(Some(input_rx));
        spawned.handle.quit();
        spawned.task.await.unwrap();
    }
}
