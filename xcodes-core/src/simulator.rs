//! Simulator downloadable descriptors.
//!
//! Parsed from an installation's downloadable index. Fields in the index
//! are templates carrying `$(DOWNLOADABLE_*)` variables that are expanded
//! against the entry's own version and identifier.

use std::fmt;
use std::path::Path;

use semver::Version;
use serde_json::Value;

use crate::version;

#[derive(Debug, Clone, PartialEq)]
pub struct Simulator {
    pub version: Version,
    pub name: String,
    pub identifier: String,
    pub source: String,
    pub install_prefix: String,
}

impl Simulator {
    /// Build a descriptor from one `downloadables` entry. Entries missing
    /// required fields are dropped.
    pub fn from_downloadable(entry: &Value) -> Option<Self> {
        let raw_version = entry.get("version")?.as_str()?;
        let version = version::parse_lenient(raw_version)?;

        // The identifier expands first; other fields may reference it.
        let identifier = apply_variables(entry.get("identifier")?.as_str()?, &version, None);

        let name = apply_variables(entry.get("name")?.as_str()?, &version, Some(&identifier));
        let source = apply_variables(entry.get("source")?.as_str()?, &version, Some(&identifier));
        let install_prefix = apply_variables(
            entry.get("userInfo")?.get("InstallPrefix")?.as_str()?,
            &version,
            Some(&identifier),
        );

        Some(Self {
            version,
            name,
            identifier,
            source,
            install_prefix,
        })
    }

    pub fn installed(&self) -> bool {
        Path::new(&self.install_prefix).is_dir()
    }
}

impl fmt::Display for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.installed() {
            "installed"
        } else {
            "not installed"
        };
        write!(f, "{} ({state})", self.name)
    }
}

fn apply_variables(template: &str, version: &Version, identifier: Option<&str>) -> String {
    let mut result = template.to_string();

    result = result.replace("$(DOWNLOADABLE_VERSION_MAJOR)", &version.major.to_string());
    result = result.replace("$(DOWNLOADABLE_VERSION_MINOR)", &version.minor.to_string());
    result = result.replace(
        "$(DOWNLOADABLE_VERSION)",
        &format!("{}.{}", version.major, version.minor),
    );
    if let Some(identifier) = identifier {
        result = result.replace("$(DOWNLOADABLE_IDENTIFIER)", identifier);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_template_variables() {
        let entry = json!({
            "version": "10.1",
            "name": "iOS $(DOWNLOADABLE_VERSION) Simulator",
            "identifier": "com.apple.pkg.iPhoneSimulatorSDK$(DOWNLOADABLE_VERSION_MAJOR)_$(DOWNLOADABLE_VERSION_MINOR)",
            "source": "https://devimages-cdn.apple.com/downloads/xcode/simulators/$(DOWNLOADABLE_IDENTIFIER).dmg",
            "userInfo": {
                "InstallPrefix": "/Library/Developer/CoreSimulator/Profiles/Runtimes/iOS $(DOWNLOADABLE_VERSION).simruntime"
            }
        });

        let simulator = Simulator::from_downloadable(&entry).unwrap();
        assert_eq!(simulator.version, Version::new(10, 1, 0));
        assert_eq!(simulator.name, "iOS 10.1 Simulator");
        assert_eq!(simulator.identifier, "com.apple.pkg.iPhoneSimulatorSDK10_1");
        assert!(simulator.source.ends_with("iPhoneSimulatorSDK10_1.dmg"));
        assert!(simulator.install_prefix.ends_with("iOS 10.1.simruntime"));
    }

    #[test]
    fn incomplete_entry_is_dropped() {
        assert!(Simulator::from_downloadable(&json!({"version": "10.0"})).is_none());
        assert!(Simulator::from_downloadable(&json!({})).is_none());
    }
}
