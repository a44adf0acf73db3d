//! Capability seams for the installation state machine.
//!
//! Every OS utility the installer shells out to sits behind one of these
//! narrow synchronous traits, so the state machine can be exercised with
//! fakes. The production implementations live in [`super::system`].

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Disk-image mounting.
pub trait Mounter: Send + Sync {
    /// Mount the image and return the mount point.
    fn mount(&self, image: &Path) -> Result<PathBuf>;

    /// Release a mount obtained from [`Mounter::mount`].
    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// Archive (`.xip`) expansion, in place next to the archive.
pub trait ArchiveExpander: Send + Sync {
    fn expand(&self, archive: &Path) -> Result<()>;
}

/// Finds the application bundle inside a mounted or expanded artifact.
pub trait BundleLocator: Send + Sync {
    fn locate(&self, dir: &Path) -> Result<Option<PathBuf>>;
}

/// Code-signing / provenance assessment of an installed bundle.
pub trait IntegrityVerifier: Send + Sync {
    /// `Ok(true)` when the bundle passes the assessment.
    fn assess(&self, bundle: &Path) -> Result<bool>;
}

/// Post-install package and license plumbing.
pub trait PackageInstaller: Send + Sync {
    /// Run one bundled installer package against the system root.
    fn install_package(&self, package: &Path) -> Result<()>;

    /// Documented first-launch invocation of the installed tool.
    fn run_first_launch(&self, bundle: &Path) -> Result<()>;

    /// Delegate license acceptance to the bundle's own command.
    fn accept_license(&self, bundle: &Path) -> Result<()>;

    /// Write the license agreement directly into the system preference
    /// file; the pre-7.3 acceptance path.
    fn write_license_preference(&self, license_id: &str, version: &str) -> Result<()>;
}

/// Privileged filesystem and toolchain-selection operations.
pub trait SystemOps: Send + Sync {
    /// Copy a bundle preserving metadata (ditto semantics).
    fn copy_bundle(&self, source: &Path, target: &Path) -> Result<()>;

    /// Move a bundle into a protected location.
    fn move_bundle(&self, source: &Path, target: &Path) -> Result<()>;

    /// Recursively remove a path.
    fn remove_path(&self, path: &Path) -> Result<()>;

    /// Remove a symlink without touching its target.
    fn remove_symlink(&self, link: &Path) -> Result<()>;

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Repoint the system-wide active-toolchain selector.
    fn select_toolchain(&self, bundle: &Path) -> Result<()>;

    fn enable_developer_mode(&self) -> Result<()>;

    /// Write the cache-invalidation touch file keyed by OS build and tool
    /// build identifiers.
    fn touch_install_check(&self, bundle: &Path) -> Result<()>;

    fn open_url(&self, url: &str) -> Result<()>;
}
