//! A release entry in the downloads catalog.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version;

const URL_PREFIX: &str = "https://developer.apple.com/devcenter/download.action?path=";

/// Prefix for scraped links that are bare remote paths rather than
/// `download.action` hrefs; those do not go through the redirector.
const PORTAL_PREFIX: &str = "https://developer.apple.com";

/// A version of Xcode we fetched from the developer portal and can
/// download and install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Xcode {
    /// Display name with the "Xcode " prefix stripped; may carry extra
    /// qualifiers like "beta 2" or "for Lion".
    pub name: String,

    /// Parsed version. Always present: unparsable names fall back to the
    /// minimum supported version instead of being rejected.
    pub version: Version,

    /// Remote path of the artifact inside the downloads service.
    pub path: String,

    /// Full download URL.
    pub url: String,

    /// Release notes URL, when the catalog provides one.
    pub release_notes_url: Option<String>,

    /// Modification timestamp, used as the pre-sort key while parsing.
    pub date_modified: i64,

    /// Derived at read time against the inventory; not remote data.
    #[serde(default)]
    pub installed: bool,
}

impl Xcode {
    /// Build a release from one descriptor of the downloads payload.
    ///
    /// Returns `None` when the descriptor is missing its name or file list;
    /// such entries are dropped rather than failing the whole catalog.
    pub fn from_download(entry: &Value) -> Option<Self> {
        let raw_name = entry.get("name")?.as_str()?;
        let name = raw_name
            .strip_prefix("Xcode ")
            .unwrap_or(raw_name)
            .to_string();

        let path = entry
            .get("files")?
            .get(0)?
            .get("remotePath")?
            .as_str()?
            .to_string();

        let date_modified = match entry.get("dateModified") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };

        let release_notes_url = entry
            .get("release_notes_path")
            .and_then(Value::as_str)
            .map(|notes| format!("{URL_PREFIX}{notes}"));

        Some(Self {
            url: format!("{URL_PREFIX}{path}"),
            version: Self::parse_version(&name),
            name,
            path,
            release_notes_url,
            date_modified,
            installed: false,
        })
    }

    /// Build a release from a scraped prerelease listing entry.
    ///
    /// `link` is either a `download.action?path=...` href, whose path goes
    /// back through the redirector like [`Xcode::from_download`], or a bare
    /// remote path (the download-button shape), which is served from the
    /// portal host directly.
    pub fn from_prerelease(name: &str, link: &str, release_notes_path: Option<&str>) -> Self {
        let (path, url) = match link.split_once("path=") {
            Some((_, path)) => (path.to_string(), format!("{URL_PREFIX}{path}")),
            None => (link.to_string(), format!("{PORTAL_PREFIX}{link}")),
        };

        Self {
            url,
            version: Self::parse_version(name),
            name: name.to_string(),
            path,
            release_notes_url: release_notes_path.map(|notes| format!("{URL_PREFIX}{notes}")),
            date_modified: 0,
            installed: false,
        }
    }

    fn parse_version(name: &str) -> Version {
        version::parse_lenient(name).unwrap_or_else(version::minimum)
    }
}

/// Equality covers the catalog identity only; `installed` is derived state
/// and excluded on purpose.
impl PartialEq for Xcode {
    fn eq(&self, other: &Self) -> bool {
        self.date_modified == other.date_modified
            && self.name == other.name
            && self.path == other.path
            && self.url == other.url
            && self.version == other.version
    }
}

impl Eq for Xcode {}

impl fmt::Display for Xcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xcode {} -- {}", self.version, self.url)
    }
}
