use crate::config::Config;
use crate::error::App;
use crate::player::playlist::{Movie, Playlist, MAX_REPEATS};
use log::{info, warn};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static REPEAT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)_repeat_([0-9]+)x").expect("valid repeat pattern"));

/// True for visible file names whose extension is on the allow-list.
pub fn is_media_name(name: &str, extensions: &[String]) -> bool {
    if name.starts_with('.') {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

/// The `N` of a `_repeat_<N>x` marker, or 1. Capped at `MAX_REPEATS`.
pub fn repeats_from_name(name: &str) -> u32 {
    let digits = REPEAT_SUFFIX
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|digits| digits.as_str().trim_start_matches('0'));
    match digits {
        None | Some("") => 1,
        Some(digits) => digits
            .parse::<u32>()
            .map_or(MAX_REPEATS, |repeats| repeats.min(MAX_REPEATS)),
    }
}

#[derive(Debug)]
pub struct LibraryScan {
    pub playlist: Playlist,
    pub volume: Option<i32>,
    /// Sound card volume for the mixer, passed through unparsed.
    pub hw_volume: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlaylistBuilder {
    extensions: Vec<String>,
    playlist_path: Option<String>,
    sound_vol_file: String,
    hw_vol_file: String,
}

impl PlaylistBuilder {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            playlist_path: None,
            sound_vol_file: String::new(),
            hw_vol_file: String::new(),
        }
    }

    /// `extensions` are the ones the player reports it can handle.
    pub fn from_config(config: &Config, extensions: &[String]) -> Self {
        Self {
            extensions: extensions.to_vec(),
            playlist_path: config.playlist_path().map(ToString::to_string),
            sound_vol_file: config.paths.sound_vol_file.clone(),
            hw_vol_file: config.alsa.hw_vol_file.trim().to_string(),
        }
    }

    #[must_use]
    pub fn with_playlist_path(mut self, path: impl Into<String>) -> Self {
        self.playlist_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_hw_vol_file(mut self, name: impl Into<String>) -> Self {
        self.hw_vol_file = name.into();
        self
    }

    #[must_use]
    pub fn with_sound_vol_file(mut self, name: impl Into<String>) -> Self {
        self.sound_vol_file = name.into();
        self
    }

    pub fn build(&self, search_paths: &[PathBuf]) -> LibraryScan {
        let playlist = match &self.playlist_path {
            Some(reference) => match self.from_playlist_file(reference, search_paths) {
                Ok(playlist) => playlist,
                Err(e) => {
                    warn!("{e}; falling back to directory scan");
                    self.scan(search_paths)
                }
            },
            None => self.scan(search_paths),
        };
        info!("Built playlist with {} movie(s)", playlist.len());
        LibraryScan {
            playlist,
            volume: self.read_volume(search_paths),
            hw_volume: self.read_hw_volume(search_paths),
        }
    }

    fn from_playlist_file(&self, reference: &str, search_paths: &[PathBuf]) -> Result<Playlist, App> {
        let reference_path = Path::new(reference);
        let resolved = if reference_path.is_absolute() {
            if !reference_path.is_file() {
                return Err(App::PlaylistResolution(format!(
                    "playlist path {reference} does not exist"
                )));
            }
            reference_path.to_path_buf()
        } else {
            if search_paths.is_empty() {
                return Ok(Playlist::default());
            }
            search_paths
                .iter()
                .map(|base| base.join(reference_path))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| {
                    App::PlaylistResolution(format!(
                        "playlist path {reference} does not resolve to any file"
                    ))
                })?
        };
        info!("Playlist path resolved to {}", resolved.display());

        let extension = resolved
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("m3u" | "m3u8") => {
                let content = fs::read_to_string(&resolved).map_err(|e| {
                    App::PlaylistResolution(format!("cannot read {}: {e}", resolved.display()))
                })?;
                let base = resolved.parent().unwrap_or_else(|| Path::new("/"));
                Ok(Playlist::new(parse_m3u(&content, base)))
            }
            other => Err(App::PlaylistResolution(format!(
                "unrecognized playlist format {}",
                other.unwrap_or("(none)")
            ))),
        }
    }

    pub fn scan(&self, search_paths: &[PathBuf]) -> Playlist {
        let mut movies = Vec::new();
        for dir in search_paths {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping search path {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                let path = entry.path();
                if !is_media_name(name, &self.extensions) || !path.is_file() {
                    continue;
                }
                movies.push(Movie::new(path, None, repeats_from_name(name)));
            }
        }
        movies.sort();
        Playlist::new(movies)
    }

    /// The last search path carrying a volume file wins.
    fn read_volume(&self, search_paths: &[PathBuf]) -> Option<i32> {
        if self.sound_vol_file.is_empty() {
            return None;
        }
        let mut volume = None;
        for dir in search_paths {
            let Ok(content) = fs::read_to_string(dir.join(&self.sound_vol_file)) else {
                continue;
            };
            match content.lines().next().map(str::trim).map(str::parse::<f64>) {
                #[allow(clippy::cast_possible_truncation)]
                Some(Ok(value)) if value.is_finite() => volume = Some(value as i32),
                _ => warn!("Ignoring malformed volume file in {}", dir.display()),
            }
        }
        volume
    }

    fn read_hw_volume(&self, search_paths: &[PathBuf]) -> Option<String> {
        if self.hw_vol_file.is_empty() {
            return None;
        }
        let mut volume = None;
        for dir in search_paths {
            let Ok(content) = fs::read_to_string(dir.join(&self.hw_vol_file)) else {
                continue;
            };
            match content.lines().next().map(str::trim) {
                Some(value) if !value.is_empty() => volume = Some(value.to_string()),
                _ => warn!("Ignoring empty hardware volume file in {}", dir.display()),
            }
        }
        volume
    }
}

/// Entries are one per line; `#EXTINF:<secs>,<title>` names the next one.
pub fn parse_m3u(content: &str, base: &Path) -> Vec<Movie> {
    let mut movies = Vec::new();
    let mut title = None;
    for line in content.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            title = info
                .split_once(',')
                .map(|(_, name)| name.trim().to_string())
                .filter(|name| !name.is_empty());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let entry = Path::new(line);
        let path = if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            base.join(entry)
        };
        let repeats = repeats_from_name(line);
        movies.push(Movie::new(path, title.take(), repeats));
    }
    movies
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mp4() -> Vec<String> {
        vec!["mp4".to_string()]
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"movie").unwrap();
    }

    #[test]
    fn scan_filters_sorts_and_reads_repeats() {
        let dir = tempdir().unwrap();
        for name in ["b.mp4", "a_repeat_3x.mp4", ".hidden.mp4", "c.txt"] {
            touch(dir.path(), name);
        }
        let playlist = PlaylistBuilder::new(mp4()).scan(&[dir.path().to_path_buf()]);
        let movies = playlist.movies();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].path, dir.path().join("a_repeat_3x.mp4"));
        assert_eq!(movies[0].repeats, 3);
        assert_eq!(movies[0].title.as_deref(), Some("a_repeat_3x"));
        assert_eq!(movies[1].path, dir.path().join("b.mp4"));
        assert_eq!(movies[1].repeats, 1);
    }

    #[test]
    fn scan_matches_extensions_case_insensitively_and_skips_dirs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "LOUD.MP4");
        fs::create_dir(dir.path().join("folder.mp4")).unwrap();
        let playlist = PlaylistBuilder::new(mp4()).scan(&[dir.path().to_path_buf()]);
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist.movies()[0].path, dir.path().join("LOUD.MP4"));
    }

    #[test]
    fn scan_collects_across_paths_and_ignores_missing_ones() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        touch(first.path(), "z.mp4");
        touch(second.path(), "y.mp4");
        let paths = vec![
            first.path().to_path_buf(),
            PathBuf::from("/nonexistent/videoloop"),
            second.path().to_path_buf(),
        ];
        let playlist = PlaylistBuilder::new(mp4()).scan(&paths);
        let mut expected = vec![first.path().join("z.mp4"), second.path().join("y.mp4")];
        expected.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
        let found: Vec<_> = playlist.movies().iter().map(|m| m.path.clone()).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn repeat_marker_parsing() {
        assert_eq!(repeats_from_name("intro_REPEAT_4X.mp4"), 4);
        assert_eq!(repeats_from_name("intro_repeat_0x.mp4"), 1);
        assert_eq!(repeats_from_name("intro_repeat_x.mp4"), 1);
        assert_eq!(repeats_from_name("intro.mp4"), 1);
        assert_eq!(repeats_from_name("intro_repeat_4294967295x.mp4"), MAX_REPEATS);
        assert_eq!(repeats_from_name("intro_repeat_99999999999999x.mp4"), MAX_REPEATS);
        assert_eq!(repeats_from_name("intro_repeat_007x.mp4"), 7);
    }

    #[test]
    fn relative_playlist_resolves_against_first_matching_search_path() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        touch(second.path(), "a.mp4");
        fs::write(
            second.path().join("show.m3u"),
            "#EXTM3U\n#EXTINF:12,Opening\na.mp4\n\n/abs/b_repeat_2x.mp4\n",
        )
        .unwrap();
        let builder = PlaylistBuilder::new(mp4()).with_playlist_path("show.m3u");
        let scan = builder.build(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        let movies = scan.playlist.movies();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].path, second.path().join("a.mp4"));
        assert_eq!(movies[0].title.as_deref(), Some("Opening"));
        assert_eq!(movies[1].path, PathBuf::from("/abs/b_repeat_2x.mp4"));
        assert_eq!(movies[1].repeats, 2);
        assert_eq!(movies[1].title.as_deref(), Some("b_repeat_2x"));
    }

    #[test]
    fn unresolvable_or_unknown_playlists_fall_back_to_scan() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.mp4");
        fs::write(dir.path().join("list.pls"), "a.mp4").unwrap();
        let paths = [dir.path().to_path_buf()];

        let missing = PlaylistBuilder::new(mp4()).with_playlist_path("missing.m3u");
        assert_eq!(missing.build(&paths).playlist.len(), 1);

        let absolute = PlaylistBuilder::new(mp4()).with_playlist_path("/nonexistent/list.m3u");
        assert_eq!(absolute.build(&paths).playlist.len(), 1);

        let unknown = PlaylistBuilder::new(mp4()).with_playlist_path("list.pls");
        assert_eq!(unknown.build(&paths).playlist.len(), 1);
    }

    #[test]
    fn relative_playlist_without_search_paths_is_empty() {
        let builder = PlaylistBuilder::new(mp4()).with_playlist_path("show.m3u");
        assert!(builder.build(&[]).playlist.is_empty());
    }

    #[test]
    fn volume_file_sets_player_volume() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sound_volume"), "-1500.7\n").unwrap();
        let builder = PlaylistBuilder::new(mp4()).with_sound_vol_file("sound_volume");
        assert_eq!(builder.build(&[dir.path().to_path_buf()]).volume, Some(-1500));

        fs::write(dir.path().join("sound_volume"), "loud").unwrap();
        assert_eq!(builder.build(&[dir.path().to_path_buf()]).volume, None);
    }

    #[test]
    fn last_hardware_volume_file_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(first.path().join("hw_volume"), "40%\n").unwrap();
        fs::write(second.path().join("hw_volume"), " -6dB \nignored\n").unwrap();
        let paths = [first.path().to_path_buf(), second.path().to_path_buf()];

        let builder = PlaylistBuilder::new(mp4()).with_hw_vol_file("hw_volume");
        assert_eq!(builder.build(&paths).hw_volume.as_deref(), Some("-6dB"));
        assert_eq!(builder.build(&paths[..1]).hw_volume.as_deref(), Some("40%"));
        assert_eq!(PlaylistBuilder::new(mp4()).build(&paths).hw_volume, None);
    }
}
