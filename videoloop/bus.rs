use crate::error::App;
use log::{debug, warn};
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Stop,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReaderCommand {
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCommand {
    Exit,
    Reload,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    Idle,
    Clear,
}

/// A message on the command bus. Only valid channel/command pairs can be
/// represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Player(PlayerCommand),
    FileReader(FileReaderCommand),
    Global(GlobalCommand),
    Display(DisplayCommand),
}

impl Token {
    pub fn new(channel: &str, command: &str) -> Result<Self, App> {
        let token = match (channel, command) {
            ("player", "play") => Token::Player(PlayerCommand::Play),
            ("player", "pause") => Token::Player(PlayerCommand::Pause),
            ("player", "stop") => Token::Player(PlayerCommand::Stop),
            ("player", "skip") => Token::Player(PlayerCommand::Skip),
            ("filereader", "refresh") => Token::FileReader(FileReaderCommand::Refresh),
            ("global", "exit") => Token::Global(GlobalCommand::Exit),
            ("global", "reload") => Token::Global(GlobalCommand::Reload),
            ("global", "debug") => Token::Global(GlobalCommand::Debug),
            ("display", "idle") => Token::Display(DisplayCommand::Idle),
            ("display", "clear") => Token::Display(DisplayCommand::Clear),
            _ => {
                return Err(App::InvalidToken {
                    channel: channel.to_string(),
                    command: command.to_string(),
                })
            }
        };
        Ok(token)
    }

    pub fn channel(self) -> &'static str {
        match self {
            Token::Player(_) => "player",
            Token::FileReader(_) => "filereader",
            Token::Global(_) => "global",
            Token::Display(_) => "display",
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Token::Player(PlayerCommand::Play) => "play",
            Token::Player(PlayerCommand::Pause) => "pause",
            Token::Player(PlayerCommand::Stop) => "stop",
            Token::Player(PlayerCommand::Skip) => "skip",
            Token::FileReader(FileReaderCommand::Refresh) => "refresh",
            Token::Global(GlobalCommand::Exit) => "exit",
            Token::Global(GlobalCommand::Reload) => "reload",
            Token::Global(GlobalCommand::Debug) => "debug",
            Token::Display(DisplayCommand::Idle) => "idle",
            Token::Display(DisplayCommand::Clear) => "clear",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel(), self.command())
    }
}

/// Parses `channel/command`.
impl FromStr for Token {
    type Err = App;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, command) = s.split_once('/').ok_or_else(|| App::InvalidToken {
            channel: s.to_string(),
            command: String::new(),
        })?;
        Token::new(channel.trim(), command.trim())
    }
}

/// Producer side of the command bus. Cheap to clone, usable from any
/// thread, including the file watcher's callback thread.
#[derive(Clone, Debug)]
pub struct CommandBus {
    tx: mpsc::UnboundedSender<Token>,
}

pub type BusReceiver = mpsc::UnboundedReceiver<Token>;

impl CommandBus {
    pub fn new() -> (Self, BusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues a token. Returns false once the orchestrator is gone.
    pub fn send(&self, token: Token) -> bool {
        debug!("bus <- {token}");
        if self.tx.send(token).is_err() {
            warn!("Command bus closed, dropping {token}");
            return false;
        }
        true
    }
}

/// A freshly started worker: the handle to reach it, its task, and the
/// one-shot it fires once its own initialisation is done.
pub struct Spawned<H> {
    pub handle: H,
    pub task: JoinHandle<()>,
    pub ready: oneshot::Receiver<()>,
}
