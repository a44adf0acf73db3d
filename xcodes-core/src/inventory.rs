//! Installed-release inventory.
//!
//! Enumerates Xcode bundles already on disk and derives their version
//! metadata. Discovery asks the system content index first and falls back
//! to a brute-force scan of the applications directory. Every derived field
//! on [`InstalledXcode`] is computed at most once; a corrupt installation
//! degrades to sentinel values instead of aborting discovery.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use semver::Version;
use tracing::debug;

use crate::config::Config;
use crate::simulator::Simulator;
use crate::version;

/// Bundle identifier all discovery is keyed on.
pub const XCODE_BUNDLE_ID: &str = "com.apple.dt.Xcode";

/// System content index lookup. Narrow seam so tests can fake discovery.
pub trait BundleFinder: Send + Sync {
    /// Paths of bundles matching the identifier, empty when the index has
    /// nothing (which triggers the brute-force scan).
    fn spotlight(&self, bundle_id: &str) -> Vec<PathBuf>;
}

/// Bundle introspection. All three queries tolerate failure by returning
/// `None`; the corresponding derived fields fall back to sentinels.
pub trait XcodeProfile: Send + Sync {
    /// Read one `Info.plist` entry of the bundle.
    fn plist_entry(&self, bundle: &Path, key: &str) -> Option<String>;

    /// Raw output of the bundle's own version-reporting command.
    fn xcodebuild_version(&self, bundle: &Path) -> Option<String>;

    /// JSON text of the downloadable-components index at `url`.
    fn downloadable_index(&self, url: &str) -> Option<String>;
}

/// `mdfind`-backed content index lookup.
pub struct MdfindFinder;

impl BundleFinder for MdfindFinder {
    fn spotlight(&self, bundle_id: &str) -> Vec<PathBuf> {
        let output = Command::new("mdfind")
            .arg(format!("kMDItemCFBundleIdentifier == '{bundle_id}'"))
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Shells out to `PlistBuddy`, `xcodebuild` and `curl`/`plutil`.
pub struct SystemProfile;

impl SystemProfile {
    fn run_capture(command: &mut Command) -> Option<String> {
        let output = command.stderr(Stdio::null()).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl XcodeProfile for SystemProfile {
    fn plist_entry(&self, bundle: &Path, key: &str) -> Option<String> {
        let plist = bundle.join("Contents/Info.plist");
        Self::run_capture(
            Command::new("/usr/libexec/PlistBuddy")
                .arg("-c")
                .arg(format!("Print :{key}"))
                .arg(plist),
        )
        .map(|out| out.trim().to_string())
    }

    fn xcodebuild_version(&self, bundle: &Path) -> Option<String> {
        Self::run_capture(
            Command::new(bundle.join("Contents/Developer/usr/bin/xcodebuild"))
                .env("DEVELOPER_DIR", "")
                .arg("-version"),
        )
    }

    fn downloadable_index(&self, url: &str) -> Option<String> {
        // The index is a binary plist; convert via plutil.
        let fetched = Command::new("curl")
            .args(["-Ls", url])
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !fetched.status.success() {
            return None;
        }

        let mut plutil = Command::new("plutil")
            .args(["-convert", "json", "-o", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        use std::io::Write;
        plutil
            .stdin
            .take()?
            .write_all(&fetched.stdout)
            .ok()?;

        let output = plutil.wait_with_output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Exact formatting rule for the `DTXcode` build identifier. This string is
/// the primary matching key against catalog versions, so the digit
/// splitting is a literal reproduction: fewer than three digits are each
/// separated, otherwise the last two digits become the minor and patch
/// components.
pub fn format_bundle_version(digits: &str) -> String {
    if digits.len() < 3 {
        digits
            .chars()
            .map(String::from)
            .collect::<Vec<_>>()
            .join(".")
    } else {
        let (head, tail) = digits.split_at(digits.len() - 2);
        let mut tail = tail.chars();
        // len >= 3 guarantees two tail characters
        let minor = tail.next().unwrap_or('0');
        let patch = tail.next().unwrap_or('0');
        format!("{head}.{minor}.{patch}")
    }
}

/// One discovered Xcode installation.
pub struct InstalledXcode {
    path: PathBuf,
    profile: Arc<dyn XcodeProfile>,
    version: OnceCell<String>,
    bundle_version: OnceCell<Version>,
    uuid: OnceCell<String>,
    simulators: OnceCell<Vec<Simulator>>,
}

impl InstalledXcode {
    pub fn new(path: PathBuf, profile: Arc<dyn XcodeProfile>) -> Self {
        Self {
            path,
            profile,
            version: OnceCell::new(),
            bundle_version: OnceCell::new(),
            uuid: OnceCell::new(),
            simulators: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marketing version as reported by the installed tool itself.
    /// Empty or unreadable output degrades to "0.0".
    pub fn version(&self) -> &str {
        self.version.get_or_init(|| {
            let output = self
                .profile
                .xcodebuild_version(&self.path)
                .unwrap_or_default();

            output
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .filter(|token| !token.is_empty())
                .unwrap_or("0.0")
                .to_string()
        })
    }

    /// Comparable form of [`InstalledXcode::version`].
    pub fn semver_version(&self) -> Version {
        version::parse_lenient(self.version()).unwrap_or_else(|| Version::new(0, 0, 0))
    }

    /// Build identifier derived from the `DTXcode` descriptor entry.
    pub fn bundle_version(&self) -> &Version {
        self.bundle_version.get_or_init(|| {
            let raw = self
                .profile
                .plist_entry(&self.path, "DTXcode")
                .and_then(|value| value.trim().parse::<i64>().ok())
                .unwrap_or(0);

            let formatted = format_bundle_version(&raw.to_string());
            version::parse_lenient(&formatted).unwrap_or_else(|| Version::new(0, 0, 0))
        })
    }

    /// Plug-in compatibility identifier from the bundle descriptor.
    pub fn uuid(&self) -> &str {
        self.uuid.get_or_init(|| {
            self.profile
                .plist_entry(&self.path, "DVTPlugInCompatibilityUUID")
                .unwrap_or_default()
        })
    }

    /// CDN location of the simulator downloadable index for this build.
    pub fn downloadable_index_url(&self) -> String {
        let host = if self.semver_version() >= Version::new(8, 1, 0) {
            "https://devimages-cdn.apple.com"
        } else {
            "https://devimages.apple.com.edgekey.net"
        };
        format!(
            "{host}/downloads/xcode/simulators/index-{}-{}.dvtdownloadableindex",
            self.bundle_version(),
            self.uuid()
        )
    }

    /// Auxiliary simulator downloads for this installation. Unparsable
    /// index JSON degrades to an empty list.
    pub fn available_simulators(&self) -> &[Simulator] {
        self.simulators.get_or_init(|| {
            let Some(raw) = self.profile.downloadable_index(&self.downloadable_index_url()) else {
                return Vec::new();
            };

            let Ok(index) = serde_json::from_str::<serde_json::Value>(&raw) else {
                debug!("unparsable downloadable index, treating as empty");
                return Vec::new();
            };

            index
                .get("downloadables")
                .and_then(|d| d.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(Simulator::from_downloadable)
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}

/// Enumerates installed Xcode bundles.
#[derive(Clone)]
pub struct Inventory {
    applications_dir: PathBuf,
    finder: Arc<dyn BundleFinder>,
    profile: Arc<dyn XcodeProfile>,
}

impl Inventory {
    pub fn new(config: &Config) -> Self {
        Self::with_capabilities(
            config.applications_dir.clone(),
            Arc::new(MdfindFinder),
            Arc::new(SystemProfile),
        )
    }

    pub fn with_capabilities(
        applications_dir: PathBuf,
        finder: Arc<dyn BundleFinder>,
        profile: Arc<dyn XcodeProfile>,
    ) -> Self {
        Self {
            applications_dir,
            finder,
            profile,
        }
    }

    pub fn profile(&self) -> Arc<dyn XcodeProfile> {
        Arc::clone(&self.profile)
    }

    fn discovered_paths(&self) -> Vec<PathBuf> {
        let hits = self.finder.spotlight(XCODE_BUNDLE_ID);
        if !hits.is_empty() {
            return hits;
        }

        debug!("content index empty, scanning {:?}", self.applications_dir);
        let Ok(entries) = std::fs::read_dir(&self.applications_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir() && path.extension().map(|ext| ext == "app").unwrap_or(false)
            })
            .filter(|path| {
                self.profile
                    .plist_entry(path, "CFBundleIdentifier")
                    .map(|id| id == XCODE_BUNDLE_ID)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// All discovered installations, sorted by version ascending.
    pub fn installed_versions(&self) -> Vec<InstalledXcode> {
        let mut installed: Vec<InstalledXcode> = self
            .discovered_paths()
            .into_iter()
            .map(|path| InstalledXcode::new(path, Arc::clone(&self.profile)))
            .collect();

        installed.sort_by(|a, b| a.semver_version().cmp(&b.semver_version()));
        installed
    }

    /// Build identifiers of every installation; the reconciliation key for
    /// the catalog's `installed` flag.
    pub fn installed_bundle_versions(&self) -> Vec<Version> {
        self.installed_versions()
            .iter()
            .map(|xcode| xcode.bundle_version().clone())
            .collect()
    }

    pub fn is_installed(&self, version: &str) -> bool {
        self.installed_versions()
            .iter()
            .any(|xcode| xcode.version() == version)
    }
}
