use flexi_logger::FlexiLoggerError;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum App {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Playlist resolution error: {0}")]
    PlaylistResolution(String),

    #[error("External process failure: {0}")]
    ExternalProcess(String),

    #[error("Watch setup failure: {0}")]
    WatchSetup(String),

    #[error("Mount failure: {0}")]
    Mount(String),

    #[error("File transfer error: {0}")]
    Transfer(String),

    #[error("Invalid token: {channel}/{command}")]
    InvalidToken { channel: String, command: String },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Logger initialization error: {0}")]
    Logger(#[from] FlexiLoggerError),

    #[error("Join task error: {0}")]
    JoinTask(#[from] JoinError),
}

impl<T> From<SendError<T>> for App {
    fn from(error: SendError<T>) -> Self {
        App::ChannelClosed(error.to_string())
    }
}
