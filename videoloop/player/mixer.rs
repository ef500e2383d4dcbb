use crate::config::AlsaSection;
use crate::error::App;
use log::info;
use std::process::Stdio;
use tokio::process::Command;

/// Sets the sound card volume with `amixer`.
#[derive(Debug, Clone)]
pub struct HardwareMixer {
    settings: AlsaSection,
}

impl HardwareMixer {
    pub fn new(settings: AlsaSection) -> Self {
        Self { settings }
    }

    fn build_command(&self, volume: &str) -> Command {
        let mut command = Command::new(&self.settings.command);
        command.arg("-M");
        if let Some(card) = self.settings.card() {
            command.arg("-c").arg(card);
        }
        command
            .arg("set")
            .arg(&self.settings.hw_vol_control)
            .arg("--")
            .arg(volume)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        command
    }

    /// `volume` is passed to amixer as is, e.g. `80%` or `-10dB`.
    pub async fn set_volume(&self, volume: &str) -> Result<(), App> {
        info!(
            "Setting hardware volume (device: {}, control: {}, value: {volume})",
            self.settings.card().unwrap_or("default"),
            self.settings.hw_vol_control
        );
        let status = self.build_command(volume).status().await.map_err(|e| {
            App::ExternalProcess(format!("failed to launch {}: {e}", self.settings.command))
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(App::ExternalProcess(format!(
                "{} exited with {status} while setting the volume",
                self.settings.command
            )))
        }
    }
}
