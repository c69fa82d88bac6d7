//! Filesystem and host helpers for download-driven jobs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::{Instant, sleep};

use crate::error::{QuatiError, Result};
use crate::logging::messages;

const FILE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fields of `uname -a`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDetails {
    pub kernel_name: String,
    pub hostname: String,
    pub kernel_version: String,
    pub build_info: String,
    pub architecture: String,
}

/// Files in `folder` whose name starts with `prefix`, in name order.
fn prefixed(folder: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{prefix}*",
        glob::Pattern::escape(&folder.to_string_lossy())
    );
    let paths = glob::glob(&pattern).map_err(|e| QuatiError::Config(e.to_string()))?;
    Ok(paths.filter_map(|p| p.ok()).collect())
}

/// Rename the first file starting with `prefix` to `new_name`, in place.
///
/// Returns `false` when nothing matched.
pub fn rename_by_prefix(folder: impl AsRef<Path>, prefix: &str, new_name: &str) -> Result<bool> {
    let folder = folder.as_ref();
    let Some(source) = prefixed(folder, prefix)?.into_iter().next() else {
        tracing::warn!(folder = %folder.display(), prefix, "{}", messages::FILE_NOT_FOUND);
        return Ok(false);
    };
    let target = folder.join(new_name);
    fs::rename(&source, &target)?;
    tracing::info!(from = %source.display(), to = %target.display(), "File renamed");
    Ok(true)
}

/// Delete `folder/name` if it exists.
pub fn erase_file(folder: impl AsRef<Path>, name: &str) -> Result<bool> {
    let path = folder.as_ref().join(name);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)?;
    tracing::info!(path = %path.display(), "File removed");
    Ok(true)
}

fn ready_file(folder: &Path, prefix: &str, min_bytes: u64) -> bool {
    let Ok(found) = prefixed(folder, prefix) else {
        return false;
    };
    found
        .first()
        .and_then(|path| fs::metadata(path).ok())
        .is_some_and(|meta| meta.is_file() && meta.len() >= min_bytes)
}

/// Wait until a file starting with `prefix` holds at least `min_bytes`.
///
/// Checks once a second and gives up after `max_wait`.
pub async fn wait_for_file(
    folder: impl AsRef<Path>,
    prefix: &str,
    min_bytes: u64,
    max_wait: Duration,
) -> bool {
    let folder = folder.as_ref();
    let deadline = Instant::now() + max_wait;
    loop {
        if ready_file(folder, prefix, min_bytes) {
            return true;
        }
        if Instant::now() >= deadline {
            tracing::warn!(folder = %folder.display(), prefix, min_bytes, "{}", messages::FILE_NOT_FOUND);
            return false;
        }
        sleep(FILE_POLL_INTERVAL).await;
    }
}

/// Pause for `seconds`, drawing a progress bar when `visual` is set.
pub async fn countdown(seconds: u64, visual: bool) {
    if !visual {
        sleep(Duration::from_secs(seconds)).await;
        return;
    }

    let pb = ProgressBar::new(seconds);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(format!("Waiting {seconds}s"));
    for _ in 0..seconds {
        sleep(Duration::from_secs(1)).await;
        pb.inc(1);
    }
    pb.finish_and_clear();
}

/// Split `uname -a` output; `None` if it has fewer than three fields.
pub fn parse_uname(output: &str) -> Option<HostDetails> {
    let segments: Vec<&str> = output.split_whitespace().collect();
    if segments.len() < 3 {
        return None;
    }
    let n = segments.len();
    Some(HostDetails {
        kernel_name: segments[0].to_string(),
        hostname: segments[1].to_string(),
        kernel_version: segments[2].to_string(),
        build_info: segments[3..n.min(6)].join(" "),
        architecture: segments[n.min(6)..].join(" "),
    })
}

/// Describe the host via `uname -a`. Failures are logged.
pub async fn host_details() -> Option<HostDetails> {
    let output = match Command::new("uname").arg("-a").output().await {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            tracing::error!(status = %out.status, "uname exited with failure");
            return None;
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not run uname");
            return None;
        }
    };
    let details = parse_uname(&String::from_utf8_lossy(&output.stdout));
    if details.is_none() {
        tracing::error!("Unexpected uname output");
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rename_by_prefix() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("report_2024_01.csv"), b"a,b").expect("write");

        assert!(rename_by_prefix(dir.path(), "report_", "report.csv").expect("renamed"));
        assert!(dir.path().join("report.csv").exists());
        assert!(!rename_by_prefix(dir.path(), "missing_", "x.csv").expect("no match"));
    }

    #[test]
    fn test_erase_file() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("old.csv"), b"").expect("write");

        assert!(erase_file(dir.path(), "old.csv").expect("removed"));
        assert!(!erase_file(dir.path(), "old.csv").expect("already gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_file_times_out() {
        let dir = TempDir::new().expect("tempdir");
        let start = Instant::now();

        assert!(!wait_for_file(dir.path(), "export", 1, Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_file_respects_min_size() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("export.csv"), b"12").expect("write");

        assert!(wait_for_file(dir.path(), "export", 2, Duration::from_secs(3)).await);
        assert!(!wait_for_file(dir.path(), "export", 100, Duration::from_secs(3)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_file_sees_late_download() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("export_final.csv");
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            fs::write(path, b"payload").expect("write");
        });

        let start = Instant::now();
        assert!(wait_for_file(dir.path(), "export", 1, Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_sleeps_for_duration() {
        let start = Instant::now();
        countdown(4, false).await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[test]
    fn test_parse_uname() {
        let out = "Linux build-box 6.8.0-45-generic #45-Ubuntu SMP PREEMPT_DYNAMIC x86_64 x86_64 x86_64 GNU/Linux\n";
        let details = parse_uname(out).expect("parses");
        assert_eq!(details.kernel_name, "Linux");
        assert_eq!(details.hostname, "build-box");
        assert_eq!(details.kernel_version, "6.8.0-45-generic");
        assert_eq!(details.build_info, "#45-Ubuntu SMP PREEMPT_DYNAMIC");
        assert_eq!(details.architecture, "x86_64 x86_64 x86_64 GNU/Linux");

        let short = parse_uname("Darwin mac 23.1.0").expect("three fields");
        assert_eq!(short.build_info, "");
        assert_eq!(short.architecture, "");
        assert!(parse_uname("Linux").is_none());
    }
}
