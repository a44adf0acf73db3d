//! Production capability implementations, shelling out to the OS utilities.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::capabilities::{
    ArchiveExpander, BundleLocator, IntegrityVerifier, Mounter, PackageInstaller, SystemOps,
};

const ARCHIVE_UTILITY: &str =
    "/System/Library/CoreServices/Applications/Archive Utility.app/Contents/MacOS/Archive Utility";

const SUDO_PROMPT: &str = "Please authenticate for Xcode installation.\nPassword: ";

const LICENSE_PLIST: &str = "/Library/Preferences/com.apple.dt.Xcode.plist";

static MOUNT_POINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<key>mount-point</key>\s*<string>([^<]+)</string>").unwrap());

/// Run a command to completion, mapping a non-zero exit to an informative
/// failure naming the tool.
fn run(command: &mut Command, what: &str) -> Result<()> {
    let status = command.status()?;
    if !status.success() {
        return Err(Error::informative(format!("Failed to {what}.")));
    }
    Ok(())
}

/// Run a privileged command through sudo.
fn sudo(args: &[&str], what: &str) -> Result<()> {
    run(
        Command::new("sudo").args(["-p", SUDO_PROMPT]).args(args),
        what,
    )
}

/// `hdiutil`-backed disk-image mounting.
pub struct HdiutilMounter;

impl Mounter for HdiutilMounter {
    fn mount(&self, image: &Path) -> Result<PathBuf> {
        let output = Command::new("hdiutil")
            .args(["mount", "-plist", "-nobrowse", "-noverify"])
            .arg(image)
            .stderr(Stdio::null())
            .output()?;

        if !output.status.success() {
            // A failed download behind an expired session is an HTML error
            // page wearing a .dmg name; point the user at the real problem.
            let kind = Command::new("file").arg("-b").arg(image).output()?;
            if String::from_utf8_lossy(&kind.stdout).starts_with("HTML") {
                return Err(Error::informative(format!(
                    "Failed to mount {}, logging into your account from a browser \
                     should tell you what is going wrong.",
                    image.display()
                )));
            }
            return Err(Error::informative("Failed to invoke hdiutil."));
        }

        let plist = String::from_utf8_lossy(&output.stdout);
        let captures = MOUNT_POINT_RE
            .captures(&plist)
            .ok_or_else(|| Error::informative("Failed to mount image."))?;

        Ok(PathBuf::from(&captures[1]))
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let status = Command::new("umount").arg(mount_point).status()?;
        if !status.success() {
            warn!("could not unmount {:?}", mount_point);
        }
        Ok(())
    }
}

/// Expands `.xip` archives via Archive Utility, in place.
pub struct XipExpander;

impl ArchiveExpander for XipExpander {
    fn expand(&self, archive: &Path) -> Result<()> {
        run(
            Command::new(ARCHIVE_UTILITY).arg(archive),
            "expand the archive",
        )
    }
}

/// Glob-based bundle discovery (`Xcode*.app`).
pub struct GlobBundleLocator;

impl BundleLocator for GlobBundleLocator {
    fn locate(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let pattern = dir.join("Xcode*.app");
        let mut matches = glob::glob(&pattern.to_string_lossy())?;
        Ok(matches.find_map(|entry| entry.ok()))
    }
}

/// `spctl`-backed code-signing assessment.
pub struct SpctlVerifier;

impl IntegrityVerifier for SpctlVerifier {
    fn assess(&self, bundle: &Path) -> Result<bool> {
        let output = Command::new("/usr/sbin/spctl")
            .args(["--assess", "--verbose=4", "--type", "execute"])
            .arg(bundle)
            .output()?;

        info!("{}", String::from_utf8_lossy(&output.stderr).trim());
        Ok(output.status.success())
    }
}

/// Post-install package and license plumbing through the system installer
/// and the bundle's own xcodebuild.
pub struct SystemPackageInstaller;

fn xcodebuild(bundle: &Path) -> String {
    bundle
        .join("Contents/Developer/usr/bin/xcodebuild")
        .to_string_lossy()
        .into_owned()
}

impl PackageInstaller for SystemPackageInstaller {
    fn install_package(&self, package: &Path) -> Result<()> {
        sudo(
            &[
                "installer",
                "-pkg",
                &package.to_string_lossy(),
                "-target",
                "/",
            ],
            "install a bundled package",
        )
    }

    fn run_first_launch(&self, bundle: &Path) -> Result<()> {
        sudo(
            &[&xcodebuild(bundle), "-runFirstLaunch"],
            "run the first-launch steps",
        )
    }

    fn accept_license(&self, bundle: &Path) -> Result<()> {
        sudo(&[&xcodebuild(bundle), "-license", "accept"], "accept the license")
    }

    fn write_license_preference(&self, license_id: &str, version: &str) -> Result<()> {
        sudo(&["rm", "-rf", LICENSE_PLIST], "reset the license preference")?;
        sudo(
            &[
                "/usr/libexec/PlistBuddy",
                "-c",
                &format!("add :IDELastGMLicenseAgreedTo string {license_id}"),
                LICENSE_PLIST,
            ],
            "record the agreed license",
        )?;
        sudo(
            &[
                "/usr/libexec/PlistBuddy",
                "-c",
                &format!("add :IDEXcodeVersionForAgreedToGMLicense string {version}"),
                LICENSE_PLIST,
            ],
            "record the agreed license version",
        )
    }
}

/// Privileged filesystem and toolchain operations through sudo.
pub struct SudoOps;

fn capture(command: &mut Command) -> Result<String> {
    let output = command.stderr(Stdio::null()).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl SystemOps for SudoOps {
    fn copy_bundle(&self, source: &Path, target: &Path) -> Result<()> {
        sudo(
            &[
                "ditto",
                &source.to_string_lossy(),
                &target.to_string_lossy(),
            ],
            "copy the bundle into place",
        )
    }

    fn move_bundle(&self, source: &Path, target: &Path) -> Result<()> {
        sudo(
            &["mv", &source.to_string_lossy(), &target.to_string_lossy()],
            "move the bundle into place",
        )
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        sudo(&["rm", "-rf", &path.to_string_lossy()], "remove the bundle")
    }

    fn remove_symlink(&self, link: &Path) -> Result<()> {
        sudo(&["rm", "-f", &link.to_string_lossy()], "remove the symlink")
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        sudo(
            &[
                "ln",
                "-sf",
                &target.to_string_lossy(),
                &link.to_string_lossy(),
            ],
            "create the symlink",
        )
    }

    fn select_toolchain(&self, bundle: &Path) -> Result<()> {
        sudo(
            &["xcode-select", "--switch", &bundle.to_string_lossy()],
            "switch the active toolchain",
        )
    }

    fn enable_developer_mode(&self) -> Result<()> {
        sudo(
            &["/usr/sbin/DevToolsSecurity", "-enable"],
            "enable developer mode",
        )?;
        sudo(
            &[
                "/usr/sbin/dseditgroup",
                "-o",
                "edit",
                "-t",
                "group",
                "-a",
                "staff",
                "_developer",
            ],
            "add staff to the developer group",
        )
    }

    fn touch_install_check(&self, bundle: &Path) -> Result<()> {
        let os_build = capture(Command::new("sw_vers").arg("-buildVersion"))?;
        let tools_build = capture(Command::new("/usr/libexec/PlistBuddy").args([
            "-c",
            "Print :ProductBuildVersion",
            &bundle.join("Contents/version.plist").to_string_lossy(),
        ]))?;
        let cache_dir = capture(Command::new("getconf").arg("DARWIN_USER_CACHE_DIR"))?;

        run(
            Command::new("touch").arg(format!(
                "{cache_dir}com.apple.dt.Xcode.InstallCheckCache_{os_build}_{tools_build}"
            )),
            "write the install-check cache file",
        )
    }

    fn open_url(&self, url: &str) -> Result<()> {
        // Fire and forget; a missing browser should not fail the install.
        let _ = Command::new("open").arg(url).spawn();
        Ok(())
    }
}
