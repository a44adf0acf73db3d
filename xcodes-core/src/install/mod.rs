//! Installation state machine.
//!
//! Drives a downloaded artifact through extract, verify, install and
//! activate. The two tolerated failure shapes - a missing bundle inside the
//! artifact and a failed integrity assessment - end in
//! [`InstallOutcome::Aborted`] with a diagnostic; every other stage failure
//! propagates as a fatal error. Retries live in the transfer engine only,
//! never here.

mod capabilities;
mod system;

pub use capabilities::{
    ArchiveExpander, BundleLocator, IntegrityVerifier, Mounter, PackageInstaller, SystemOps,
};
pub use system::{
    GlobBundleLocator, HdiutilMounter, SpctlVerifier, SudoOps, SystemPackageInstaller, XipExpander,
};

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use tracing::{error, info, warn};

use crate::catalog::{CatalogClient, Seedlist, Xcode};
use crate::config::{url_basename, Config};
use crate::curl::{Curl, FetchOptions, ProgressBlock};
use crate::error::{Error, Result};
use crate::inventory::{InstalledXcode, Inventory};

static LICENSE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bEA\d{4}\b").unwrap());

/// Stages of a successful install, in order. Logged on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Downloaded,
    Extracted,
    Verified,
    Installed,
    Activated,
}

/// Terminal result of one install attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    Completed,
    /// The attempt was abandoned with a user-facing diagnostic. Reported,
    /// but not fatal to the process.
    Aborted(String),
}

/// Options for [`Installer::install_version`].
pub struct InstallOptions {
    /// Repoint the activation symlink and toolchain selector afterwards.
    pub switch: bool,
    /// Delete the downloaded artifact on success.
    pub clean: bool,
    /// Actually install, as opposed to download-only.
    pub install: bool,
    /// Echo download progress to stdout.
    pub progress: bool,
    /// Direct artifact URL or local path, bypassing catalog resolution.
    pub url: Option<String>,
    /// Open the release notes afterwards.
    pub show_release_notes: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            switch: true,
            clean: true,
            install: true,
            progress: true,
            url: None,
            show_release_notes: true,
        }
    }
}

/// Capability bundle handed to [`Installer::with_parts`].
pub struct Capabilities {
    pub mounter: Box<dyn Mounter>,
    pub expander: Box<dyn ArchiveExpander>,
    pub locator: Box<dyn BundleLocator>,
    pub verifier: Box<dyn IntegrityVerifier>,
    pub packages: Box<dyn PackageInstaller>,
    pub system: Box<dyn SystemOps>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            mounter: Box::new(HdiutilMounter),
            expander: Box::new(XipExpander),
            locator: Box::new(GlobBundleLocator),
            verifier: Box::new(SpctlVerifier),
            packages: Box::new(SystemPackageInstaller),
            system: Box::new(SudoOps),
        }
    }
}

pub struct Installer {
    config: Config,
    curl: Curl,
    seedlist: Seedlist,
    inventory: Inventory,
    capabilities: Capabilities,
}

impl Installer {
    pub fn new(config: Config, client: Box<dyn CatalogClient>) -> Self {
        let inventory = Inventory::new(&config);
        let curl = Curl::new(config.cache_dir.clone());
        let seedlist = Seedlist::new(config.clone(), client, inventory.clone());

        Self::with_parts(config, curl, seedlist, inventory, Capabilities::default())
    }

    pub fn with_parts(
        config: Config,
        curl: Curl,
        seedlist: Seedlist,
        inventory: Inventory,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            config,
            curl,
            seedlist,
            inventory,
            capabilities,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    // --- catalog facade ---------------------------------------------------

    pub async fn list(&mut self) -> Result<Vec<Xcode>> {
        self.seedlist.list().await
    }

    pub async fn update(&mut self) -> Result<Vec<Xcode>> {
        self.seedlist.update().await
    }

    pub async fn find(&mut self, identifier: &str) -> Result<Option<Xcode>> {
        self.seedlist.find(identifier).await
    }

    pub fn rm_list_cache(&mut self) -> Result<()> {
        self.seedlist.rm_list_cache()
    }

    // --- download ---------------------------------------------------------

    /// Download the artifact for an identifier (or a direct URL) into the
    /// cache directory. `Ok(None)` means no artifact was produced - either
    /// the identifier resolved to nothing or every transfer attempt failed;
    /// recoverable, never an error.
    pub async fn download(
        &mut self,
        identifier: &str,
        progress: bool,
        url: Option<&str>,
        progress_block: Option<ProgressBlock<'_>>,
    ) -> Result<Option<PathBuf>> {
        let xcode = match url {
            Some(_) => None,
            None => self.seedlist.find(identifier).await?,
        };
        if url.is_none() && xcode.is_none() {
            return Ok(None);
        }

        let (fetch_url, file_name, cookies) = match (url, xcode) {
            (Some(url), _) => (url.to_string(), url_basename(url), None),
            (None, Some(xcode)) => {
                let file_name = url_basename(&xcode.path);
                (xcode.url, file_name, self.seedlist.cookie())
            }
            (None, None) => unreachable!(),
        };

        let cache_dir = self.config.cache_dir.clone();
        let succeeded = self
            .curl
            .fetch(FetchOptions {
                url: &fetch_url,
                directory: Some(&cache_dir),
                cookies: cookies.as_deref(),
                output: Some(&file_name),
                progress,
                progress_block,
            })
            .await?;

        Ok(succeeded.then(|| self.config.cache_dir.join(file_name)))
    }

    /// Locate or produce the artifact: an explicit local path wins, then a
    /// pre-populated artifact cache, then a fresh download.
    async fn artifact_for(
        &mut self,
        identifier: &str,
        progress: bool,
        url: Option<&str>,
        progress_block: Option<ProgressBlock<'_>>,
    ) -> Result<Option<PathBuf>> {
        if let Some(url) = url {
            let local = Path::new(url);
            if local.exists() {
                return Ok(Some(local.to_path_buf()));
            }
        }

        if let Some(cache) = self.config.prepopulated_cache_dir() {
            let candidate = cache.join(format!("xcode-{identifier}.dmg"));
            if candidate.exists() {
                info!("using pre-populated artifact {:?}", candidate);
                return Ok(Some(candidate));
            }
        }

        self.download(identifier, progress, url, progress_block)
            .await
    }

    // --- the state machine ------------------------------------------------

    /// Resolve, download and install one release end to end.
    pub async fn install_version(
        &mut self,
        identifier: &str,
        options: InstallOptions,
        progress_block: Option<ProgressBlock<'_>>,
    ) -> Result<InstallOutcome> {
        let artifact = self
            .artifact_for(
                identifier,
                options.progress,
                options.url.as_deref(),
                progress_block,
            )
            .await?;

        let Some(artifact) = artifact else {
            return Err(Error::informative(format!(
                "Failed to download Xcode {identifier}."
            )));
        };

        let outcome = if options.install {
            let suffix = format!(
                "-{}",
                identifier.split_whitespace().collect::<Vec<_>>().join(".")
            );
            self.install_artifact(&artifact, &suffix, options.switch, options.clean)?
        } else {
            println!("Downloaded Xcode {identifier} to '{}'", artifact.display());
            InstallOutcome::Completed
        };

        if let InstallOutcome::Aborted(diagnostic) = &outcome {
            error!("{diagnostic}");
        }

        if options.show_release_notes && options.url.is_none() {
            self.open_release_notes(identifier).await?;
        }

        Ok(outcome)
    }

    /// Drive a downloaded artifact through the install stages.
    pub fn install_artifact(
        &self,
        artifact: &Path,
        suffix: &str,
        switch: bool,
        clean: bool,
    ) -> Result<InstallOutcome> {
        let target = self.config.xcode_path(suffix);
        info!(step = ?InstallStep::Downloaded, artifact = %artifact.display(), "installing");

        let is_archive = artifact.extension().map(|ext| ext == "xip").unwrap_or(false);
        if is_archive {
            self.capabilities.expander.expand(artifact)?;

            let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
            let expanded = dir.join("Xcode.app");
            let expanded_beta = dir.join("Xcode-beta.app");
            if expanded.exists() {
                self.capabilities.system.move_bundle(&expanded, &target)?;
            } else if expanded_beta.exists() {
                self.capabilities
                    .system
                    .move_bundle(&expanded_beta, &target)?;
            } else {
                return Ok(InstallOutcome::Aborted(format!(
                    "No `Xcode.app` (or `Xcode-beta.app`) found in the expanded archive. \
                     Please remove {} if you suspect a corrupted download, or run \
                     `xcodes update` to see if the version you tried to install has \
                     been pulled.",
                    artifact.display()
                )));
            }
        } else {
            let mount_point = self.capabilities.mounter.mount(artifact)?;

            let Some(source) = self.capabilities.locator.locate(&mount_point)? else {
                return Ok(InstallOutcome::Aborted(format!(
                    "No `Xcode.app` found in the disk image. Please remove {} if you \
                     suspect a corrupted download, or run `xcodes update` to see if the \
                     version you tried to install has been pulled.",
                    artifact.display()
                )));
            };

            self.capabilities.system.copy_bundle(&source, &target)?;
            self.capabilities.mounter.unmount(&mount_point)?;
        }
        info!(step = ?InstallStep::Extracted, target = %target.display(), "bundle in place");

        if !self.capabilities.verifier.assess(&target)? {
            // Never leave an unverified installation behind.
            self.capabilities.system.remove_path(&target)?;
            return Ok(InstallOutcome::Aborted(format!(
                "Integrity assessment of {} failed; the bundle was removed.",
                target.display()
            )));
        }
        info!(step = ?InstallStep::Verified, "integrity assessment passed");

        self.capabilities.system.enable_developer_mode()?;
        let installed = InstalledXcode::new(target.clone(), self.inventory.profile());
        self.approve_license(&installed)?;
        self.install_components(&installed)?;
        info!(step = ?InstallStep::Installed, "post-install steps finished");

        if switch {
            self.activate(&target)?;
            info!(step = ?InstallStep::Activated, "activation symlink updated");
        }

        if clean {
            let _ = std::fs::remove_file(artifact);
        }

        Ok(InstallOutcome::Completed)
    }

    /// Accept the license; below 7.3 that means editing the system
    /// preference file directly, at or above it the bundle handles it.
    fn approve_license(&self, xcode: &InstalledXcode) -> Result<()> {
        if xcode.semver_version() < Version::new(7, 3, 0) {
            let license_path = xcode
                .path()
                .join("Contents/Resources/English.lproj/License.rtf");
            let text = std::fs::read_to_string(&license_path)?;

            match LICENSE_ID_RE.find(&text) {
                Some(license_id) => self
                    .capabilities
                    .packages
                    .write_license_preference(license_id.as_str(), xcode.version())?,
                None => warn!("no license identifier found in {:?}", license_path),
            }
        } else {
            self.capabilities.packages.accept_license(xcode.path())?;
        }
        Ok(())
    }

    /// First-launch / package post-install steps, version gated, then the
    /// install-check touch file.
    fn install_components(&self, xcode: &InstalledXcode) -> Result<()> {
        if xcode.semver_version() >= Version::new(9, 0, 0) {
            self.capabilities.packages.run_first_launch(xcode.path())?;
        } else {
            let pattern = xcode.path().join("Contents/Resources/Packages/*.pkg");
            for entry in glob::glob(&pattern.to_string_lossy())? {
                match entry {
                    Ok(package) => self.capabilities.packages.install_package(&package)?,
                    Err(err) => warn!("skipping unreadable package: {err}"),
                }
            }
        }

        self.capabilities.system.touch_install_check(xcode.path())
    }

    // --- activation -------------------------------------------------------

    /// The activation symlink path, when one currently exists.
    pub fn current_symlink(&self) -> Option<PathBuf> {
        let link = &self.config.symlink_path;
        std::fs::symlink_metadata(link)
            .ok()
            .filter(|meta| meta.file_type().is_symlink())
            .map(|_| link.clone())
    }

    /// Resolved target of the activation symlink.
    pub fn symlinks_to(&self) -> Option<PathBuf> {
        let link = self.current_symlink()?;
        let target = std::fs::read_link(&link).ok()?;
        if target.is_absolute() {
            Some(target)
        } else {
            Some(link.parent()?.join(target))
        }
    }

    /// Repoint the activation symlink and the toolchain selector.
    ///
    /// Idempotent: an existing managed symlink is replaced, but a
    /// non-symlink path at the activation location is never overwritten.
    pub fn activate(&self, xcode_path: &Path) -> Result<()> {
        if self.current_symlink().is_some() {
            self.capabilities
                .system
                .remove_symlink(&self.config.symlink_path)?;
        }
        if !self.config.symlink_path.exists() {
            self.capabilities
                .system
                .create_symlink(xcode_path, &self.config.symlink_path)?;
        }
        self.capabilities.system.select_toolchain(xcode_path)
    }

    /// Point the activation symlink at an already-installed version.
    pub fn symlink(&self, version: &str) -> Result<()> {
        let installed = self
            .inventory
            .installed_versions()
            .into_iter()
            .find(|xcode| xcode.version() == version);

        if self.current_symlink().is_some() {
            self.capabilities
                .system
                .remove_symlink(&self.config.symlink_path)?;
        }

        if let Some(xcode) = installed {
            if !self.config.symlink_path.exists() {
                self.capabilities
                    .system
                    .create_symlink(xcode.path(), &self.config.symlink_path)?;
            }
        }
        Ok(())
    }

    // --- housekeeping -----------------------------------------------------

    /// Remove an installed version, dropping the activation symlink first
    /// when it points into the doomed bundle.
    pub fn uninstall(&self, version: &str) -> Result<()> {
        let Some(xcode) = self
            .inventory
            .installed_versions()
            .into_iter()
            .find(|xcode| xcode.version() == version)
        else {
            return Err(Error::informative(format!(
                "Version {version} is not installed."
            )));
        };

        if self.symlinks_to().as_deref() == Some(xcode.path()) {
            self.capabilities
                .system
                .remove_symlink(&self.config.symlink_path)?;
        }

        self.capabilities.system.remove_path(xcode.path())
    }

    /// Delete downloaded artifacts and temporary files from the cache
    /// directory. The catalog blob survives.
    pub fn cleanup(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.config.cache_dir)? {
            let path = entry?.path();
            if path.is_file() && path != self.config.list_file() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Open the release notes of a catalog entry, when it has any.
    pub async fn open_release_notes(&mut self, identifier: &str) -> Result<()> {
        let list = self.seedlist.list().await?;
        let notes = list
            .iter()
            .find(|xcode| xcode.name == identifier)
            .and_then(|xcode| xcode.release_notes_url.clone());

        if let Some(url) = notes {
            self.capabilities.system.open_url(&url)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
