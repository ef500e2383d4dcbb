use crate::error::App;
use log::warn;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

fn has_wildcard(component: &str) -> bool {
    component.contains(|c| c == '*' || c == '?')
}

/// Turns a shell-style name pattern (`*`, `?`) into an anchored regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, App> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');
    Ok(Regex::new(&expression)?)
}

/// Expands the search pattern into the existing directories it names.
/// Wildcards are only honored in the last path component.
pub fn resolve_search_paths(pattern: &str) -> Vec<PathBuf> {
    let pattern = Path::new(pattern.trim());
    let name = pattern.file_name().and_then(|name| name.to_str());
    let Some(name) = name.filter(|name| has_wildcard(name)) else {
        return if pattern.is_dir() {
            vec![pattern.to_path_buf()]
        } else {
            Vec::new()
        };
    };

    let parent = pattern
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let matcher = match wildcard_regex(name) {
        Ok(matcher) => matcher,
        Err(e) => {
            warn!("Unusable search pattern {}: {}", pattern.display(), e);
            return Vec::new();
        }
    };
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {}", parent.display(), e);
            return Vec::new();
        }
    };

    let mut found: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| matcher.is_match(name))
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    found.sort();
    found
}
