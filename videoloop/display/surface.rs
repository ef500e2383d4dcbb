use log::{info, warn};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Escape,
    Skip,
    Stop,
    QuitRequested,
}

/// Whatever shows the looper's own screens between movies.
pub trait Surface: Send {
    fn blank(&mut self);
    fn render_idle_message(&mut self, text: &str);
    fn render_countdown(&mut self, seconds_left: u64, movies: usize);
}

/// Writes the looper's screens to the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalSurface;

impl TerminalSurface {
    fn show(line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "\x1b[2J\x1b[H{line}").and_then(|()| stdout.flush()) {
            warn!("Failed to write to terminal: {}", e);
        }
    }
}

impl Surface for TerminalSurface {
    fn blank(&mut self) {
        Self::show("");
    }

    fn render_idle_message(&mut self, text: &str) {
        info!("Idle: {text}");
        Self::show(text);
    }

    fn render_countdown(&mut self, seconds_left: u64, movies: usize) {
        let plural = if movies == 1 { "" } else { "s" };
        Self::show(&format!(
            "Found {movies} movie{plural}. Starting playback in: {seconds_left}"
        ));
    }
}

pub fn parse_key(key: char) -> Option<InputEvent> {
    match key {
        '\u{1b}' => Some(InputEvent::Escape),
        'q' | 'Q' => Some(InputEvent::QuitRequested),
        'k' | 'K' => Some(InputEvent::Skip),
        's' | 'S' => Some(InputEvent::Stop),
        _ => None,
    }
}

/// Feeds key presses typed on stdin (one line at a time) into `events`.
pub fn spawn_stdin_input(events: mpsc::UnboundedSender<InputEvent>) -> JoinHandle<()> {
    task::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    for event in line.chars().filter_map(parse_key) {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    info!("Keyboard input closed");
                    return;
                }
                Err(e) => {
                    warn!("Failed to read keyboard input: {}", e);
                    return;
                }
            }
        }
    })
}
