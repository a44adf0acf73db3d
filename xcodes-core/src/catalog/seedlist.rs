//! The catalog resolver.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::version;

use super::client::CatalogClient;
use super::prerelease;
use super::release::Xcode;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Xcode \d").unwrap());

/// Resolves identifiers against the downloads catalog.
///
/// Holds the parsed catalog in memory for the lifetime of one invocation
/// and persists it to `xcodes.bin` across invocations. Concurrent processes
/// against the same cache are not coordinated; at most one active
/// invocation is assumed.
pub struct Seedlist {
    config: Config,
    client: Box<dyn CatalogClient>,
    inventory: Inventory,
    cached: Option<Vec<Xcode>>,
}

impl Seedlist {
    pub fn new(config: Config, client: Box<dyn CatalogClient>, inventory: Inventory) -> Self {
        Self {
            config,
            client,
            inventory,
            cached: None,
        }
    }

    /// Session cookie for authenticated artifact downloads.
    pub fn cookie(&self) -> Option<String> {
        self.client.cookie()
    }

    /// Resolve an identifier to a release. Exact name match wins; failing
    /// that, the identifier is parsed as a version and matched against each
    /// release's version. No fuzzy matching.
    pub async fn find(&mut self, identifier: &str) -> Result<Option<Xcode>> {
        let parsed = version::parse_lenient(identifier);
        let list = self.list().await?;

        Ok(list
            .into_iter()
            .find(|xcode| xcode.name == identifier || parsed.as_ref() == Some(&xcode.version)))
    }

    /// Is the identifier known to the catalog?
    pub async fn exists(&mut self, identifier: &str) -> Result<bool> {
        Ok(self.find(identifier).await?.is_some())
    }

    /// The full catalog, cached blob permitting, sorted by version
    /// ascending with fresh `installed` flags.
    pub async fn list(&mut self) -> Result<Vec<Xcode>> {
        if self.cached.is_none() {
            let list_file = self.config.list_file();
            if list_file.exists() {
                debug!("loading catalog cache from {:?}", list_file);
                let bytes = std::fs::read(&list_file)?;
                self.cached = Some(bincode::deserialize(&bytes)?);
            }
        }

        if self.cached.is_none() {
            self.fetch_seedlist().await?;
        }

        Ok(self.annotated())
    }

    /// Force a remote refetch, rewriting the cache blob.
    pub async fn update(&mut self) -> Result<Vec<Xcode>> {
        self.fetch_seedlist().await?;
        Ok(self.annotated())
    }

    /// Drop the cache blob.
    pub fn rm_list_cache(&mut self) -> Result<()> {
        self.cached = None;
        let list_file = self.config.list_file();
        if list_file.exists() {
            std::fs::remove_file(list_file)?;
        }
        Ok(())
    }

    /// Re-derive `installed` against the inventory and order for display.
    /// Runs on every read: the cached catalog may predate a new
    /// installation, so installed-state is always fresh even when
    /// availability-state is not.
    fn annotated(&self) -> Vec<Xcode> {
        let installed = self.inventory.installed_bundle_versions();

        let mut all = self.cached.clone().unwrap_or_default();
        for xcode in &mut all {
            xcode.installed = installed.contains(&xcode.version);
        }
        all.sort_by(|a, b| a.version.cmp(&b.version));
        all
    }

    async fn fetch_seedlist(&mut self) -> Result<()> {
        let payload = self.client.download_seedlist().await?;
        let mut xcodes = parse_seedlist(&payload)?;

        // Merge scraped prereleases whose names the catalog does not carry.
        let page = self.client.prerelease_page().await?;
        let known: Vec<String> = xcodes.iter().map(|x| x.name.clone()).collect();
        xcodes.extend(
            prerelease::scan(&page)
                .into_iter()
                .filter(|pre| !known.contains(&pre.name)),
        );

        std::fs::write(self.config.list_file(), bincode::serialize(&xcodes)?)?;
        self.cached = Some(xcodes);
        Ok(())
    }
}

/// Parse the downloads payload into releases.
///
/// Fails with the server-provided message on a non-zero result code. The
/// surviving entries are those named `Xcode <digit>...`, at or above the
/// minimum supported version, ordered by modification time, whose URL ends
/// in a disk-image or archive extension. Deterministic: the same payload
/// always yields the same ordered list.
pub fn parse_seedlist(payload: &Value) -> Result<Vec<Xcode>> {
    if payload.get("resultCode").and_then(Value::as_i64) != Some(0) {
        let message = payload
            .get("resultString")
            .and_then(Value::as_str)
            .unwrap_or("The downloads service returned an unknown error.");
        return Err(Error::informative(message));
    }

    let downloads = payload
        .get("downloads")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut xcodes: Vec<Xcode> = downloads
        .iter()
        .filter(|entry| {
            entry
                .get("name")
                .and_then(Value::as_str)
                .map(|name| NAME_RE.is_match(name))
                .unwrap_or(false)
        })
        .filter_map(Xcode::from_download)
        .filter(|xcode| xcode.version >= version::minimum())
        .collect();

    xcodes.sort_by_key(|xcode| xcode.date_modified);
    xcodes.retain(|xcode| xcode.url.ends_with(".dmg") || xcode.url.ends_with(".xip"));

    Ok(xcodes)
}
