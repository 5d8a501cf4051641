use std::path::{Path, PathBuf};

use dlbridge_core::view::last_path_segment;

const FALLBACK_NAME: &str = "download.bin";

const DIR_ENV: &str = "DLBRIDGE_DOWNLOAD_DIR";

/// Where downloads land: the explicit directory, else `$DLBRIDGE_DOWNLOAD_DIR`,
/// else a `dlbridge` folder in the user's downloads directory.
/// Creation failures are logged, not returned.
pub fn download_dir(explicit: Option<PathBuf>) -> PathBuf {
    let dir = explicit
        .or_else(|| std::env::var_os(DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(default_download_dir);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        log::warn!("[cli] cannot prepare {}: {}", dir.display(), e);
    }
    dir
}

fn default_download_dir() -> PathBuf {
    let base = dirs_next::download_dir()
        .or_else(|| dirs_next::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("dlbridge")
}

/// `<dir>/movies/<file name taken from the url>`.
pub fn destination_for(dir: &Path, url: &str) -> PathBuf {
    dir.join("movies").join(file_name_from_url(url))
}

/// Last URL path segment with anything outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn file_name_from_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    // A bare host has no file name.
    let Some((_, path)) = without_scheme.split_once('/') else {
        return FALLBACK_NAME.to_string();
    };
    let name: String = last_path_segment(path)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}
