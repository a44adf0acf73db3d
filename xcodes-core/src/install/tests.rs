//! State-machine tests against faked capabilities.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::catalog::{CatalogClient, Seedlist};
use crate::config::Config;
use crate::curl::Curl;
use crate::error::{Error, Result};
use crate::install::{
    ArchiveExpander, Capabilities, GlobBundleLocator, InstallOptions, InstallOutcome, Installer,
    IntegrityVerifier, Mounter, PackageInstaller, SystemOps,
};
use crate::inventory::{BundleFinder, Inventory, XcodeProfile};

/// Client backing a deliberately empty catalog.
struct NullClient;

#[async_trait]
impl CatalogClient for NullClient {
    async fn download_seedlist(&self) -> Result<Value> {
        Ok(json!({"resultCode": 0, "downloads": []}))
    }

    async fn prerelease_page(&self) -> Result<String> {
        Ok(String::new())
    }

    fn cookie(&self) -> Option<String> {
        None
    }
}

struct NoBundles;

impl BundleFinder for NoBundles {
    fn spotlight(&self, _bundle_id: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

struct FixedVersionProfile(&'static str);

impl XcodeProfile for FixedVersionProfile {
    fn plist_entry(&self, _bundle: &Path, _key: &str) -> Option<String> {
        None
    }

    fn xcodebuild_version(&self, _bundle: &Path) -> Option<String> {
        Some(format!("Xcode {}\nBuild version X\n", self.0))
    }

    fn downloadable_index(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Shared observation point for all fake capabilities.
#[derive(Default)]
struct Recorder {
    unmounted: AtomicBool,
    first_launch: AtomicBool,
    accepted_license: AtomicBool,
    license_preference: Mutex<Option<(String, String)>>,
    installed_packages: Mutex<Vec<PathBuf>>,
    selected_toolchain: Mutex<Option<PathBuf>>,
}

struct FakeMounter {
    mount_point: PathBuf,
    recorder: Arc<Recorder>,
}

impl Mounter for FakeMounter {
    fn mount(&self, _image: &Path) -> Result<PathBuf> {
        Ok(self.mount_point.clone())
    }

    fn unmount(&self, _mount_point: &Path) -> Result<()> {
        self.recorder.unmounted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Simulates expansion by dropping a named bundle next to the archive.
struct FakeExpander {
    bundle: Option<&'static str>,
}

impl ArchiveExpander for FakeExpander {
    fn expand(&self, archive: &Path) -> Result<()> {
        if let Some(name) = self.bundle {
            let dir = archive.parent().expect("archive has a parent");
            std::fs::create_dir_all(dir.join(name))?;
        }
        Ok(())
    }
}

struct FakeVerifier {
    ok: bool,
}

impl IntegrityVerifier for FakeVerifier {
    fn assess(&self, _bundle: &Path) -> Result<bool> {
        Ok(self.ok)
    }
}

struct FakePackages {
    recorder: Arc<Recorder>,
}

impl PackageInstaller for FakePackages {
    fn install_package(&self, package: &Path) -> Result<()> {
        self.recorder
            .installed_packages
            .lock()
            .unwrap()
            .push(package.to_path_buf());
        Ok(())
    }

    fn run_first_launch(&self, _bundle: &Path) -> Result<()> {
        self.recorder.first_launch.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn accept_license(&self, _bundle: &Path) -> Result<()> {
        self.recorder.accepted_license.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write_license_preference(&self, license_id: &str, version: &str) -> Result<()> {
        *self.recorder.license_preference.lock().unwrap() =
            Some((license_id.to_string(), version.to_string()));
        Ok(())
    }
}

/// Unprivileged stand-in for the sudo operations, acting on real paths.
struct FakeSystem {
    recorder: Arc<Recorder>,
}

fn copy_dir_all(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let to = target.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_all(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

impl SystemOps for FakeSystem {
    fn copy_bundle(&self, source: &Path, target: &Path) -> Result<()> {
        copy_dir_all(source, target).map_err(Error::from)
    }

    fn move_bundle(&self, source: &Path, target: &Path) -> Result<()> {
        std::fs::rename(source, target).map_err(Error::from)
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn remove_symlink(&self, link: &Path) -> Result<()> {
        std::fs::remove_file(link).map_err(Error::from)
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, link).map_err(Error::from)
    }

    fn select_toolchain(&self, bundle: &Path) -> Result<()> {
        *self.recorder.selected_toolchain.lock().unwrap() = Some(bundle.to_path_buf());
        Ok(())
    }

    fn enable_developer_mode(&self) -> Result<()> {
        Ok(())
    }

    fn touch_install_check(&self, _bundle: &Path) -> Result<()> {
        Ok(())
    }

    fn open_url(&self, _url: &str) -> Result<()> {
        Ok(())
    }
}

struct Fixture {
    _temp: TempDir,
    mount_dir: PathBuf,
    cache_dir: PathBuf,
    applications_dir: PathBuf,
    symlink_path: PathBuf,
    recorder: Arc<Recorder>,
    installer: Installer,
}

fn fixture(reported_version: &'static str, verify_ok: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");
    let applications_dir = temp.path().join("Applications");
    let mount_dir = temp.path().join("Volumes").join("Xcode");
    std::fs::create_dir_all(&applications_dir).unwrap();
    std::fs::create_dir_all(&mount_dir).unwrap();

    let mut config = Config::with_cache_dir(cache_dir.clone()).unwrap();
    config.applications_dir = applications_dir.clone();
    config.symlink_path = applications_dir.join("Xcode.app");
    let symlink_path = config.symlink_path.clone();

    let recorder = Arc::new(Recorder::default());
    let inventory = Inventory::with_capabilities(
        applications_dir.clone(),
        Arc::new(NoBundles),
        Arc::new(FixedVersionProfile(reported_version)),
    );
    let seedlist = Seedlist::new(config.clone(), Box::new(NullClient), inventory.clone());
    let curl = Curl::new(cache_dir.clone());

    let capabilities = Capabilities {
        mounter: Box::new(FakeMounter {
            mount_point: mount_dir.clone(),
            recorder: Arc::clone(&recorder),
        }),
        expander: Box::new(FakeExpander { bundle: None }),
        locator: Box::new(GlobBundleLocator),
        verifier: Box::new(FakeVerifier { ok: verify_ok }),
        packages: Box::new(FakePackages {
            recorder: Arc::clone(&recorder),
        }),
        system: Box::new(FakeSystem {
            recorder: Arc::clone(&recorder),
        }),
    };

    let installer = Installer::with_parts(config, curl, seedlist, inventory, capabilities);

    Fixture {
        _temp: temp,
        mount_dir,
        cache_dir,
        applications_dir,
        symlink_path,
        recorder,
        installer,
    }
}

fn dmg_artifact(fixture: &Fixture) -> PathBuf {
    let artifact = fixture.cache_dir.join("Xcode_12.4.dmg");
    std::fs::write(&artifact, b"dmg bytes").unwrap();
    artifact
}

#[test]
fn dmg_install_runs_every_stage() {
    let fixture = fixture("12.4", true);
    std::fs::create_dir_all(fixture.mount_dir.join("Xcode.app")).unwrap();
    let artifact = dmg_artifact(&fixture);

    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-12.4", true, true)
        .unwrap();

    assert_eq!(outcome, InstallOutcome::Completed);

    let target = fixture.applications_dir.join("Xcode-12.4.app");
    assert!(target.is_dir());
    assert!(fixture.recorder.unmounted.load(Ordering::SeqCst));
    assert!(fixture.recorder.first_launch.load(Ordering::SeqCst));
    assert!(fixture.recorder.accepted_license.load(Ordering::SeqCst));

    // Activated: symlink points at the new install, selector repointed.
    assert_eq!(std::fs::read_link(&fixture.symlink_path).unwrap(), target);
    assert_eq!(
        fixture.recorder.selected_toolchain.lock().unwrap().as_ref(),
        Some(&target)
    );

    // clean=true removes the artifact.
    assert!(!artifact.exists());
}

#[test]
fn missing_bundle_in_image_aborts() {
    let fixture = fixture("12.4", true);
    let artifact = dmg_artifact(&fixture);
    // Mount dir exists but holds no Xcode*.app.

    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-12.4", true, true)
        .unwrap();

    match outcome {
        InstallOutcome::Aborted(diagnostic) => {
            assert!(diagnostic.contains("corrupted download"));
        }
        other => panic!("expected an abort, got {other:?}"),
    }
    assert!(!fixture.applications_dir.join("Xcode-12.4.app").exists());
}

#[test]
fn failed_verification_removes_the_bundle() {
    let fixture = fixture("12.4", false);
    std::fs::create_dir_all(fixture.mount_dir.join("Xcode.app")).unwrap();
    let artifact = dmg_artifact(&fixture);

    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-12.4", true, true)
        .unwrap();

    match outcome {
        InstallOutcome::Aborted(diagnostic) => {
            assert!(diagnostic.contains("Integrity assessment"));
        }
        other => panic!("expected an abort, got {other:?}"),
    }

    // No unverified installation left behind.
    assert!(!fixture.applications_dir.join("Xcode-12.4.app").exists());
}

fn xip_fixture(expanded_bundle: Option<&'static str>) -> Fixture {
    let mut fixture = fixture("12.4", true);
    // Swap the expander for one producing the requested bundle.
    let recorder = Arc::clone(&fixture.recorder);
    let config = fixture.installer.config().clone();
    let inventory = fixture.installer.inventory().clone();
    let seedlist = Seedlist::new(config.clone(), Box::new(NullClient), inventory.clone());
    let curl = Curl::new(config.cache_dir.clone());

    fixture.installer = Installer::with_parts(
        config,
        curl,
        seedlist,
        inventory,
        Capabilities {
            mounter: Box::new(FakeMounter {
                mount_point: fixture.mount_dir.clone(),
                recorder: Arc::clone(&recorder),
            }),
            expander: Box::new(FakeExpander {
                bundle: expanded_bundle,
            }),
            locator: Box::new(GlobBundleLocator),
            verifier: Box::new(FakeVerifier { ok: true }),
            packages: Box::new(FakePackages {
                recorder: Arc::clone(&recorder),
            }),
            system: Box::new(FakeSystem {
                recorder: Arc::clone(&recorder),
            }),
        },
    );
    fixture
}

#[test]
fn xip_install_moves_the_expanded_bundle() {
    let fixture = xip_fixture(Some("Xcode.app"));
    let artifact = fixture.cache_dir.join("Xcode_12.4.xip");
    std::fs::write(&artifact, b"xip bytes").unwrap();

    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-12.4", false, false)
        .unwrap();

    assert_eq!(outcome, InstallOutcome::Completed);
    assert!(fixture.applications_dir.join("Xcode-12.4.app").is_dir());
    // clean=false keeps the artifact.
    assert!(artifact.exists());
}

#[test]
fn xip_install_accepts_the_beta_naming_variant() {
    let fixture = xip_fixture(Some("Xcode-beta.app"));
    let artifact = fixture.cache_dir.join("Xcode_12.5_beta.xip");
    std::fs::write(&artifact, b"xip bytes").unwrap();

    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-12.5.beta", false, true)
        .unwrap();

    assert_eq!(outcome, InstallOutcome::Completed);
    assert!(fixture.applications_dir.join("Xcode-12.5.beta.app").is_dir());
}

#[test]
fn xip_without_a_bundle_aborts() {
    let fixture = xip_fixture(None);
    let artifact = fixture.cache_dir.join("Xcode_12.4.xip");
    std::fs::write(&artifact, b"xip bytes").unwrap();

    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-12.4", false, true)
        .unwrap();

    assert!(matches!(outcome, InstallOutcome::Aborted(_)));
}

#[test]
fn activation_is_idempotent() {
    let fixture = fixture("12.4", true);
    let target = fixture.applications_dir.join("Xcode-12.4.app");
    std::fs::create_dir_all(&target).unwrap();

    fixture.installer.activate(&target).unwrap();
    assert_eq!(std::fs::read_link(&fixture.symlink_path).unwrap(), target);

    // Second activation: no error, same state.
    fixture.installer.activate(&target).unwrap();
    assert_eq!(std::fs::read_link(&fixture.symlink_path).unwrap(), target);
}

#[test]
fn activation_never_overwrites_a_non_managed_path() {
    let fixture = fixture("12.4", true);
    let target = fixture.applications_dir.join("Xcode-12.4.app");
    std::fs::create_dir_all(&target).unwrap();

    // A real directory sits where the symlink would go.
    std::fs::create_dir_all(&fixture.symlink_path).unwrap();

    fixture.installer.activate(&target).unwrap();

    // Still a plain directory, not a symlink.
    assert!(std::fs::symlink_metadata(&fixture.symlink_path)
        .unwrap()
        .file_type()
        .is_dir());
}

#[test]
fn old_versions_take_the_package_and_preference_path() {
    let fixture = fixture("6.4", true);

    // Source bundle carries a license document and one installer package.
    let source = fixture.mount_dir.join("Xcode.app");
    std::fs::create_dir_all(source.join("Contents/Resources/English.lproj")).unwrap();
    std::fs::write(
        source.join("Contents/Resources/English.lproj/License.rtf"),
        "License agreement EA0827 applies.",
    )
    .unwrap();
    std::fs::create_dir_all(source.join("Contents/Resources/Packages")).unwrap();
    std::fs::write(
        source.join("Contents/Resources/Packages/MobileDevice.pkg"),
        b"pkg",
    )
    .unwrap();

    let artifact = dmg_artifact(&fixture);
    let outcome = fixture
        .installer
        .install_artifact(&artifact, "-6.4", false, true)
        .unwrap();

    assert_eq!(outcome, InstallOutcome::Completed);
    assert_eq!(
        fixture.recorder.license_preference.lock().unwrap().as_ref(),
        Some(&("EA0827".to_string(), "6.4".to_string()))
    );
    let packages = fixture.recorder.installed_packages.lock().unwrap();
    assert_eq!(packages.len(), 1);
    assert!(packages[0].ends_with("MobileDevice.pkg"));
    assert!(!fixture.recorder.first_launch.load(Ordering::SeqCst));
}

#[tokio::test]
async fn install_version_fails_when_nothing_downloads() {
    let mut fixture = fixture("12.4", true);

    let result = fixture
        .installer
        .install_version(
            "12.4",
            InstallOptions {
                progress: false,
                ..Default::default()
            },
            None,
        )
        .await;

    match result {
        Err(Error::Informative(message)) => {
            assert_eq!(message, "Failed to download Xcode 12.4.");
        }
        other => panic!("expected the download failure message, got {other:?}"),
    }
}
