use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// Upper bound on `repeats`, so the playcount can always pass it.
pub const MAX_REPEATS: u32 = 10_000;

#[derive(Serialize, Clone, Debug)]
pub struct Movie {
    pub path: PathBuf,
    pub title: Option<String>,
    pub repeats: u32,
    playcount: u32,
}

impl Movie {
    /// A movie with no explicit title takes its file stem.
    pub fn new(path: impl Into<PathBuf>, title: Option<String>, repeats: u32) -> Self {
        let path = path.into();
        let title = title.or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        });
        Self {
            path,
            title,
            repeats: repeats.clamp(1, MAX_REPEATS),
            playcount: 1,
        }
    }

    pub fn playcount(&self) -> u32 {
        self.playcount
    }

    pub fn is_done(&self) -> bool {
        self.playcount > self.repeats
    }

    pub fn was_played(&mut self) {
        self.playcount += 1;
    }

    pub fn clear_playcount(&mut self) {
        self.playcount = 1;
    }

    fn abandon(&mut self) {
        self.playcount = 0;
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for Movie {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Movie {}

impl PartialOrd for Movie {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Plain string order of the full path, not component-wise.
impl Ord for Movie {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.as_os_str().cmp(other.path.as_os_str())
    }
}

impl fmt::Display for Movie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) => write!(f, "{} ({title})", self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Playlist {
    movies: Vec<Movie>,
    index: Option<usize>,
    skip: bool,
}

impl Playlist {
    pub fn new(movies: Vec<Movie>) -> Self {
        Self {
            movies,
            index: None,
            skip: false,
        }
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    pub fn movies(&self) -> &[Movie] {
        &self.movies
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn get_next(&mut self, random: bool) -> Option<&mut Movie> {
        if self.movies.is_empty() {
            return None;
        }
        let len = self.movies.len();

        if random {
            self.skip = false;
            self.index = Some(rand::rng().random_range(0..len));
        } else if self.skip {
            self.skip = false;
        } else {
            let next = match self.index {
                None => 0,
                Some(current) if self.movies[current].is_done() => {
                    self.movies[current].clear_playcount();
                    (current + 1) % len
                }
                Some(current) => current,
            };
            self.index = Some(next);
        }

        let index = self.index?;
        self.movies.get_mut(index)
    }

    /// Abandons the current movie and moves on; the following `get_next`
    /// returns the new position as is.
    pub fn skip_current(&mut self) {
        if self.movies.is_empty() {
            return;
        }
        let current = self.index.unwrap_or(0);
        self.movies[current].abandon();
        self.index = Some((current + 1) % self.movies.len());
        self.skip = true;
    }

    pub fn current(&self) -> Option<&Movie> {
        self.index.and_then(|index| self.movies.get(index))
    }

    pub fn current_mut(&mut self) -> Option<&mut Movie> {
        self.index.and_then(|index| self.movies.get_mut(index))
    }
}
