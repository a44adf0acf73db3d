//! Transfer engine: one resumable download per call, driven through an
//! external `curl` process.
//!
//! Progress is obtained out-of-band. curl's stderr is redirected into a log
//! file under the cache directory and polled every 500ms while the process
//! is alive; the most recent `\r`-separated segment carries the current
//! percentage, which is echoed to stdout and handed to an optional callback.
//! Piping stderr straight back into the process does not work reliably
//! because curl does not flush it, so the log file is the contract.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::url_basename;
use crate::error::Result;

/// Outer attempt budget. Attempts are not conditioned on the failure class;
/// curl exiting non-zero for any reason consumes one attempt.
const ATTEMPTS: u32 = 3;

/// Poll interval for the progress log. The download is not time sensitive
/// enough to warrant tailing the file.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Leading integer of the most recent curl stats line, i.e. the "% Total"
/// column.
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)").unwrap());

/// Callback receiving the current progress as a literal percent (0-100).
pub type ProgressBlock<'a> = &'a mut dyn FnMut(u8);

/// Options for a single [`Curl::fetch`] call.
pub struct FetchOptions<'a, 'b> {
    /// The URL to download.
    pub url: &'a str,
    /// Directory to place the file in; the file lands in the current
    /// directory when absent.
    pub directory: Option<&'a Path>,
    /// Cookie header value for authenticated downloads.
    pub cookies: Option<&'a str>,
    /// Output file name; derived from the URL path when absent.
    pub output: Option<&'a str>,
    /// Echo progress to stdout?
    pub progress: bool,
    /// Callback invoked with each observed progress percentage.
    pub progress_block: Option<ProgressBlock<'b>>,
}

impl<'a, 'b> FetchOptions<'a, 'b> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            directory: None,
            cookies: None,
            output: None,
            progress: false,
            progress_block: None,
        }
    }
}

/// Removes temporary transfer files on every exit path, including early
/// returns through `?`.
struct TempFileGuard(Vec<PathBuf>);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct Curl {
    cache_dir: PathBuf,
    program: String,
}

impl Curl {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self::with_program(cache_dir, "curl")
    }

    /// Substitute the transfer executable. Tests point this at a fake.
    pub fn with_program(cache_dir: PathBuf, program: impl Into<String>) -> Self {
        Self {
            cache_dir,
            program: program.into(),
        }
    }

    /// Cookie-jar file handed to curl for authenticated transfers.
    fn cookie_jar_path(&self) -> PathBuf {
        self.cache_dir.join("curl-cookies.txt")
    }

    /// Download `url`, resuming any partial file already at the output path.
    ///
    /// Returns `Ok(true)` as soon as one attempt exits successfully and
    /// `Ok(false)` once all attempts are exhausted; exhaustion is a
    /// recoverable condition the caller must handle, not an error.
    pub async fn fetch(&self, mut options: FetchOptions<'_, '_>) -> Result<bool> {
        let output = match options.output {
            Some(name) => name.to_string(),
            None => url_basename(options.url),
        };
        let output_path = match options.directory {
            Some(dir) => dir.join(&output),
            None => PathBuf::from(&output),
        };

        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let progress_log = self.cache_dir.join(format!("progress.{timestamp}.progress"));
        let _ = std::fs::remove_file(&progress_log);

        let cookie_jar = self.cookie_jar_path();
        let _guard = TempFileGuard(vec![cookie_jar.clone(), progress_log.clone()]);

        let mut args: Vec<String> = Vec::new();
        if let Some(cookies) = options.cookies {
            args.push("--cookie".into());
            args.push(cookies.into());
            args.push("--cookie-jar".into());
            args.push(cookie_jar.to_string_lossy().into_owned());
        }
        // curl's own retry budget for transient network errors, independent
        // of the outer attempt loop below.
        args.extend(["--retry".into(), "3".into()]);
        args.extend(["--location".into(), "--continue-at".into(), "-".into()]);
        args.push("--output".into());
        args.push(output_path.to_string_lossy().into_owned());
        args.push(options.url.into());

        // Retry in a loop: curl exit status 18 is "Partial file. Only a part
        // of the file was transferred." and shows up on flaky connections.
        // The loop deliberately does not inspect the status; every failure
        // class gets the same budget.
        for attempt in 1..=ATTEMPTS {
            debug!(attempt, url = options.url, "starting transfer");

            let log = std::fs::File::create(&progress_log)?;
            let mut child = tokio::process::Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::from(log))
                .spawn()?;

            loop {
                if let Some(status) = child.try_wait()? {
                    if status.success() {
                        return Ok(true);
                    }
                    debug!(attempt, ?status, "transfer attempt failed");
                    break;
                }

                tokio::time::sleep(POLL_INTERVAL).await;
                self.report_progress(&progress_log, &mut options)?;
            }
        }

        Ok(false)
    }

    /// Read the latest stats line out of the progress log and report it.
    fn report_progress(&self, progress_log: &Path, options: &mut FetchOptions<'_, '_>) -> Result<()> {
        // The log might take a moment to appear.
        let Ok(content) = std::fs::read_to_string(progress_log) else {
            return Ok(());
        };
        let Some(current) = content.split('\r').next_back() else {
            return Ok(());
        };

        if options.progress {
            print!("\r{}%", current.trim_end());
            std::io::stdout().flush()?;
        }

        if let Some(captures) = PERCENT_RE.captures(current) {
            if let Ok(percent) = captures[1].parse::<u8>() {
                if let Some(block) = options.progress_block.as_deref_mut() {
                    block(percent.min(100));
                }
            }
        }

        Ok(())
    }
}
