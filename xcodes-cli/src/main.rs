//! xcodes - install and manage multiple versions of Xcode.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use xcodes_core::catalog::AppleDevCenterClient;
use xcodes_core::install::{InstallOptions, InstallOutcome, Installer};
use xcodes_core::inventory::InstalledXcode;
use xcodes_core::Config;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "xcodes",
    about = "Install and manage multiple versions of Xcode",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,
}

#[derive(Parser, Debug)]
enum Command {
    /// List available releases, marking installed ones
    List,

    /// Refresh the release catalog from the developer portal
    Update,

    /// Download and install a release
    Install {
        /// Version identifier, e.g. "12.4" or "12.5 beta"
        version: String,

        /// Direct artifact URL or local file path, bypassing the catalog
        #[clap(long)]
        url: Option<String>,

        /// Download only, skip installation
        #[clap(long)]
        no_install: bool,

        /// Keep the currently active version selected
        #[clap(long)]
        no_switch: bool,

        /// Keep the downloaded artifact after installation
        #[clap(long)]
        no_clean: bool,

        /// Suppress download progress output
        #[clap(long)]
        no_progress: bool,

        /// Do not open the release notes afterwards
        #[clap(long)]
        no_show_release_notes: bool,
    },

    /// List versions installed on this machine
    Installed,

    /// Make an installed version the active one
    Select {
        /// Version of an installed release, e.g. "12.4"
        version: String,
    },

    /// Show the currently selected version
    Selected,

    /// Remove an installed version
    Uninstall {
        /// Version of an installed release, e.g. "12.4"
        version: String,
    },

    /// Delete downloaded artifacts and temporary files
    Cleanup,

    /// List simulator downloads for installed versions
    Simulators,
}

/// Configure logging from the --log-level flag. Logs go to stderr so table
/// output on stdout stays clean.
fn initialize_tracing(log_level: &LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_filter_directive()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Tabled)]
struct ReleaseRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Installed")]
    installed: String,
}

#[derive(Tabled)]
struct InstalledRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Path")]
    path: String,
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("Nothing to show.");
        return;
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

fn print_releases(releases: &[xcodes_core::catalog::Xcode]) {
    let rows = releases
        .iter()
        .map(|xcode| ReleaseRow {
            version: xcode.name.clone(),
            installed: if xcode.installed {
                "yes".to_string()
            } else {
                String::new()
            },
        })
        .collect();
    print_table(rows);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let config = Config::load()?;
    debug!(cache_dir = ?config.cache_dir, "configuration loaded");
    let client = AppleDevCenterClient::from_env()?;
    let mut installer = Installer::new(config, Box::new(client));

    match cli.command {
        Command::List => {
            let releases = installer.list().await?;
            print_releases(&releases);
        }

        Command::Update => {
            let releases = installer.update().await?;
            info!("catalog refreshed, {} releases known", releases.len());
            print_releases(&releases);
        }

        Command::Install {
            version,
            url,
            no_install,
            no_switch,
            no_clean,
            no_progress,
            no_show_release_notes,
        } => {
            let options = InstallOptions {
                switch: !no_switch,
                clean: !no_clean,
                install: !no_install,
                progress: !no_progress,
                url,
                show_release_notes: !no_show_release_notes,
            };

            if let InstallOutcome::Aborted(_) = installer
                .install_version(&version, options, None)
                .await?
            {
                // The diagnostic has already been reported.
                std::process::exit(1);
            }
        }

        Command::Installed => {
            let rows = installer
                .inventory()
                .installed_versions()
                .iter()
                .map(|xcode| InstalledRow {
                    version: xcode.version().to_string(),
                    path: xcode.path().display().to_string(),
                })
                .collect();
            print_table(rows);
        }

        Command::Select { version } => {
            let installed = installer
                .inventory()
                .installed_versions()
                .into_iter()
                .find(|xcode| xcode.version() == version);

            match installed {
                Some(xcode) => installer.activate(xcode.path())?,
                None => bail!("Version {version} is not installed."),
            }
        }

        Command::Selected => match installer.symlinks_to() {
            Some(path) => {
                let xcode = InstalledXcode::new(path.clone(), installer.inventory().profile());
                println!("{} ({})", xcode.version(), path.display());
            }
            None => bail!("No version is currently selected."),
        },

        Command::Uninstall { version } => {
            installer.uninstall(&version)?;
            println!("Uninstalled Xcode {version}.");
        }

        Command::Cleanup => {
            installer.cleanup()?;
            println!("Cache cleaned up.");
        }

        Command::Simulators => {
            for xcode in installer.inventory().installed_versions() {
                println!("Xcode {} ({})", xcode.version(), xcode.path().display());
                for simulator in xcode.available_simulators() {
                    println!("  {simulator}");
                }
            }
        }
    }

    Ok(())
}
