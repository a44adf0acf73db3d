//! Runtime configuration.
//!
//! Every path the pipeline touches is carried in an explicit [`Config`]
//! value threaded into each component's constructor, so tests can redirect
//! all filesystem traffic into an isolated directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming an alternate, pre-populated artifact cache
/// that is checked before downloading.
pub const CACHE_DIR_ENV: &str = "XCODE_INSTALL_CACHE_DIR";

/// Name of the serialized catalog blob inside the cache directory.
const LIST_FILE_NAME: &str = "xcodes.bin";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for downloaded artifacts, the catalog cache and curl's
    /// temporary files.
    pub cache_dir: PathBuf,

    /// Directory scanned for installed Xcode bundles.
    pub applications_dir: PathBuf,

    /// Well-known activation symlink path.
    pub symlink_path: PathBuf,
}

impl Config {
    /// Build the per-user default configuration and ensure the cache
    /// directory exists.
    pub fn load() -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("XcodeInstall"))
            .ok_or_else(|| Error::informative("Could not determine a cache directory"))?;

        let config = Self::with_cache_dir(cache_dir)?;
        Ok(config)
    }

    /// Build a configuration rooted at a specific cache directory.
    pub fn with_cache_dir(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            cache_dir,
            applications_dir: PathBuf::from("/Applications"),
            symlink_path: PathBuf::from("/Applications/Xcode.app"),
        })
    }

    /// Path of the serialized catalog cache.
    pub fn list_file(&self) -> PathBuf {
        self.cache_dir.join(LIST_FILE_NAME)
    }

    /// Alternate artifact cache named by `XCODE_INSTALL_CACHE_DIR`, if set.
    pub fn prepopulated_cache_dir(&self) -> Option<PathBuf> {
        std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from)
    }

    /// Target installation path for a given suffix ("" or "-12.4").
    pub fn xcode_path(&self, suffix: &str) -> PathBuf {
        self.applications_dir.join(format!("Xcode{suffix}.app"))
    }
}

/// Resolve an output file name from a URL.
///
/// Redirector links carry the artifact in a `path` query parameter; for
/// those the parameter's basename is the file name, not the endpoint's.
pub fn url_basename(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .find(|(key, _)| key == "path")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| parsed.path().to_string()),
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    };

    Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.trim_start_matches('/').to_string())
}
