use crate::error::App;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/boot/videoloop.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipMode {
    /// A skip abandons every remaining repeat of the movie.
    Whole,
    /// A skip only cuts the current pass short.
    Iteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    Replace,
    Add,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video_looper: LooperSection,
    pub paths: PathsSection,
    pub playlist: PlaylistSection,
    pub player: PlayerSection,
    pub usb: UsbSection,
    pub copymode: CopySection,
    pub alsa: AlsaSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperSection {
    pub is_random: bool,
    pub wait_time: u64,
    pub countdown_time: u64,
    pub skip_mode: SkipMode,
    pub keyboard_control: bool,
    pub idle_message: String,
    pub debounce_ms: u64,
}

impl Default for LooperSection {
    fn default() -> Self {
        Self {
            is_random: false,
            wait_time: 0,
            countdown_time: 5,
            skip_mode: SkipMode::Whole,
            keyboard_control: true,
            idle_message: "Insert USB drive with compatible movies.".to_string(),
            debounce_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub search: String,
    pub sound_vol_file: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            search: "/mnt/usbdrive*".to_string(),
            sound_vol_file: "sound_volume".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSection {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSection {
    pub command: String,
    pub extensions: Vec<String>,
    pub extra_args: Vec<String>,
    pub loop_arg: String,
    pub volume_arg: String,
    pub show_titles: bool,
}

impl Default for PlayerSection {
    fn default() -> Self {
        Self {
            command: "omxplayer".to_string(),
            extensions: ["avi", "mov", "mkv", "mp4", "m4v"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            extra_args: vec!["--no-osd".to_string()],
            loop_arg: "--loop".to_string(),
            volume_arg: "--vol".to_string(),
            show_titles: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbSection {
    pub auto_mount: bool,
    pub mount_root: PathBuf,
    pub readonly: bool,
    pub poll_ms: u64,
}

impl Default for UsbSection {
    fn default() -> Self {
        Self {
            auto_mount: false,
            mount_root: PathBuf::from("/mnt/usbdrive"),
            readonly: true,
            poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopySection {
    pub enabled: bool,
    pub mode: CopyMode,
    pub target: PathBuf,
    /// Never written back out, so debug snapshots cannot leak it.
    #[serde(skip_serializing)]
    pub password: String,
    pub copy_loader: bool,
    pub loader_target: PathBuf,
}

impl Default for CopySection {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: CopyMode::Replace,
            target: PathBuf::from("/home/pi/video"),
            password: String::new(),
            copy_loader: false,
            loader_target: PathBuf::from("/home/pi/loader.png"),
        }
    }
}

/// Sound card volume set through `amixer` from a file on the media.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlsaSection {
    pub command: String,
    /// `hw:<card>[,<device>]` or a bare card number. Empty uses the default card.
    pub hw_device: String,
    pub hw_vol_control: String,
    /// Name of the volume file looked up in every search path. Empty disables it.
    pub hw_vol_file: String,
}

impl Default for AlsaSection {
    fn default() -> Self {
        Self {
            command: "amixer".to_string(),
            hw_device: String::new(),
            hw_vol_control: "PCM".to_string(),
            hw_vol_file: String::new(),
        }
    }
}

impl AlsaSection {
    pub fn card(&self) -> Option<&str> {
        let device = self.hw_device.trim();
        let device = device.strip_prefix("hw:").unwrap_or(device);
        let card = device.split(',').next().unwrap_or_default().trim();
        (!card.is_empty()).then_some(card)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub directory: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/var/log/videoloop"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, App> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            App::Configuration(format!(
                "Failed to read configuration file at {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, App> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Extensions are compared lowercase and without the leading dot.
    fn normalize(&mut self) {
        self.player.extensions = self
            .player
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
    }

    fn validate(&self) -> Result<(), App> {
        if self.player.extensions.is_empty() {
            return Err(App::Configuration(
                "player.extensions must list at least one extension".to_string(),
            ));
        }
        if self.player.command.trim().is_empty() {
            return Err(App::Configuration("player.command is empty".to_string()));
        }
        if self.video_looper.debounce_ms == 0 {
            return Err(App::Configuration(
                "video_looper.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.paths.search.trim().is_empty() && !self.copymode.enabled {
            return Err(App::Configuration("paths.search is empty".to_string()));
        }
        if !self.alsa.hw_vol_file.trim().is_empty() && self.alsa.hw_vol_control.trim().is_empty() {
            return Err(App::Configuration("alsa.hw_vol_control is empty".to_string()));
        }
        if self.usb.auto_mount && self.usb.poll_ms == 0 {
            return Err(App::Configuration(
                "usb.poll_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.video_looper.debounce_ms)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.video_looper.wait_time)
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.video_looper.countdown_time)
    }

    /// With copy mode on, the library directory is what gets played;
    /// removable drives are only a source for the transfer.
    pub fn search_pattern(&self) -> String {
        if self.copymode.enabled {
            self.copymode.target.to_string_lossy().into_owned()
        } else {
            self.paths.search.clone()
        }
    }

    pub fn playlist_path(&self) -> Option<&str> {
        let path = self.playlist.path.trim();
        (!path.is_empty()).then_some(path)
    }
}
