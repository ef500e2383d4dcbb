use crate::config::{Config, CopyMode};
use crate::error::App;
use crate::library::is_media_name;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 1024 * 1024;
const LOADER_NAME: &str = "loader.png";

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub mode: CopyMode,
    pub target: PathBuf,
    pub password: String,
    pub copy_loader: bool,
    pub loader_target: PathBuf,
    pub extensions: Vec<String>,
}

impl TransferSettings {
    /// `None` unless copy mode is enabled.
    pub fn from_config(config: &Config) -> Option<Self> {
        let copy = &config.copymode;
        copy.enabled.then(|| Self {
            mode: copy.mode,
            target: copy.target.clone(),
            password: copy.password.clone(),
            copy_loader: copy.copy_loader,
            loader_target: copy.loader_target.clone(),
            extensions: config.player.extensions.clone(),
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub copied: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub rejected: Vec<PathBuf>,
    pub loader_copied: bool,
}

/// A marker is a file called `name`, with or without an extension.
fn has_marker(dir: &Path, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let with_extension = format!("{name}.");
    fs::read_dir(dir).is_ok_and(|entries| {
        entries.flatten().any(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|file| file == name || file.starts_with(&with_extension))
        })
    })
}

fn effective_mode(source: &Path, configured: CopyMode) -> CopyMode {
    match (has_marker(source, "replace"), has_marker(source, "add")) {
        (true, false) => CopyMode::Replace,
        (false, true) => CopyMode::Add,
        _ => configured,
    }
}

fn media_entries(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, App> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| is_media_name(name, extensions))
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn copy_with_progress(source: &Path, destination: &Path) -> Result<(), App> {
    let transfer_error =
        |e: std::io::Error| App::Transfer(format!("{} -> {}: {e}", source.display(), destination.display()));

    let mut reader = File::open(source).map_err(transfer_error)?;
    let total = reader.metadata().map_err(transfer_error)?.len();
    let mut writer = File::create(destination).map_err(transfer_error)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut copied: u64 = 0;
    let mut last_logged = 0;

    loop {
        let read = reader.read(&mut buffer).map_err(transfer_error)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).map_err(transfer_error)?;
        copied += read as u64;
        let percent = if total == 0 { 100 } else { copied * 100 / total };
        if percent >= last_logged + 10 {
            last_logged = percent - percent % 10;
            debug!("Copying {}: {}%", source.display(), percent);
        }
    }
    writer.flush().map_err(transfer_error)?;
    info!("Copied {} ({} bytes)", source.display(), copied);
    Ok(())
}

/// Copies the movies found on each source directory into the library
/// directory.
pub fn copy_files(sources: &[PathBuf], settings: &TransferSettings) -> Result<TransferReport, App> {
    fs::create_dir_all(&settings.target).map_err(|e| {
        App::Transfer(format!("cannot create {}: {e}", settings.target.display()))
    })?;
    let mut report = TransferReport::default();

    for source in sources {
        if !source.is_dir() {
            continue;
        }
        if !settings.password.is_empty() && !has_marker(source, &settings.password) {
            warn!("{} lacks the password file, not copying", source.display());
            report.rejected.push(source.clone());
            continue;
        }

        let mode = effective_mode(source, settings.mode);
        info!("Copying from {} in {:?} mode", source.display(), mode);
        if mode == CopyMode::Replace {
            for stale in media_entries(&settings.target, &settings.extensions)? {
                fs::remove_file(&stale)?;
                debug!("Removed {}", stale.display());
                report.removed.push(stale);
            }
        }

        for file in media_entries(source, &settings.extensions)? {
            let Some(name) = file.file_name() else {
                continue;
            };
            let destination = settings.target.join(name);
            copy_with_progress(&file, &destination)?;
            report.copied.push(destination);
        }

        let loader = source.join(LOADER_NAME);
        if settings.copy_loader && loader.is_file() {
            copy_with_progress(&loader, &settings.loader_target)?;
            report.loader_copied = true;
        }
    }
    Ok(report)
}
