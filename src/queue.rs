//! Per-channel queue directories.
//!
//! Each channel gets `<queue_dir>/<title>/`. On every run the directory is
//! pruned of stale media and then the external downloader is pointed at the
//! channel's recent uploads.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use anyhow::Context;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::TimeDelta;
use chrono::Utc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::error::Error;
use crate::subscriptions::Subscription;

/// One downloader invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Working directory; the downloader saves into it.
    pub dir: PathBuf,
    pub date_after: NaiveDate,
    pub max_downloads: u32,
    pub extra_args: Vec<String>,
}

impl DownloadRequest {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.url.clone(),
            String::from("--dateafter"),
            self.date_after.format("%Y%m%d").to_string(),
            String::from("--playlist-end"),
            self.max_downloads.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

pub trait Downloader {
    fn download(&self, request: &DownloadRequest) -> anyhow::Result<()>;
}

/// Runs the downloader program as a child process.
#[derive(Debug, Clone)]
pub struct ExternalDownloader {
    program: String,
}

impl ExternalDownloader {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Fails with [`Error::DownloaderMissing`] if the program cannot be run.
    pub fn check_installed(&self) -> anyhow::Result<()> {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(e))?;
        Ok(())
    }

    fn spawn_error(&self, e: io::Error) -> anyhow::Error {
        if e.kind() == io::ErrorKind::NotFound {
            Error::DownloaderMissing {
                program: self.program.clone(),
                source: e,
            }
            .into()
        } else {
            anyhow::Error::new(e).context(format!("running `{}`", self.program))
        }
    }
}

impl Downloader for ExternalDownloader {
    fn download(&self, request: &DownloadRequest) -> anyhow::Result<()> {
        let status = Command::new(&self.program)
            .args(request.args())
            .current_dir(&request.dir)
            .status()
            .map_err(|e| self.spawn_error(e))?;
        if !status.success() {
            return Err(Error::DownloadFailed {
                url: request.url.clone(),
                status: status.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Directory name for a channel title, safe to join onto the queue root.
pub fn channel_dir_name(title: &str) -> String {
    let name: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    }
}

/// Returns the channel directory and whether it was created just now.
pub fn ensure_channel_dir(queue_dir: &Path, title: &str) -> io::Result<(PathBuf, bool)> {
    let dir = queue_dir.join(channel_dir_name(title));
    if dir.is_dir() {
        return Ok((dir, false));
    }
    fs::create_dir_all(&dir)?;
    Ok((dir, true))
}

fn has_media_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Deletes media files in `dir` last modified before `cutoff`.
pub fn prune(
    dir: &Path,
    extensions: &[String],
    cutoff: DateTime<Utc>,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !has_media_extension(&path, extensions) {
            continue;
        }
        let modified: DateTime<Utc> = entry.metadata()?.modified()?.into();
        if modified < cutoff {
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
            info!(path = %path.display(), "Deleted old file");
            removed.push(path);
        }
    }
    Ok(removed)
}

/// `days` whole days before `now`, or an error when that leaves chrono's range.
fn days_before(now: DateTime<Utc>, days: u32) -> anyhow::Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| now.checked_sub_signed(delta))
        .with_context(|| format!("{days} days before {now} is out of range"))
}

/// Prunes and downloads a single channel.
pub fn sync_channel<D: Downloader + ?Sized>(
    channel: &Subscription,
    config: &Config,
    downloader: &D,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let host = &config.host;
    let (dir, is_new) = ensure_channel_dir(&host.queue_dir, &channel.title)
        .with_context(|| format!("creating directory for {}", channel.title))?;

    if is_new {
        debug!(dir = %dir.display(), "Created channel directory");
    } else if host.delete_old {
        let cutoff = days_before(now, host.delete_days)?;
        prune(&dir, &host.media_extensions, cutoff)?;
    }

    let request = DownloadRequest {
        url: channel.videos_url(),
        dir,
        date_after: days_before(now, host.download_days)?.date_naive(),
        max_downloads: host.max_downloads,
        extra_args: config.passthrough.to_args(),
    };
    info!(channel = channel.title, url = request.url, "Downloading");
    downloader.download(&request)
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: Vec<String>,
}

/// Syncs every channel in title order. A failing channel is logged and
/// skipped.
pub fn sync_all<D: Downloader + ?Sized>(
    subscriptions: &HashMap<String, Subscription>,
    config: &Config,
    downloader: &D,
    now: DateTime<Utc>,
) -> SyncReport {
    let mut channels: Vec<&Subscription> = subscriptions.values().collect();
    channels.sort_by(|a, b| a.title.cmp(&b.title));

    let mut report = SyncReport::default();
    for channel in channels {
        match sync_channel(channel, config, downloader, now) {
            Ok(()) => report.synced += 1,
            Err(e) => {
                warn!(channel = channel.title, error = format!("{e:#}"), "Failed to sync channel");
                report.failed.push(channel.title.clone());
            }
        }
    }
    report
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::fs::File;
    use std::time::SystemTime;

    use anyhow::bail;
    use tempfile::tempdir;

    use super::*;
    use crate::config::FileConfig;
    use crate::config::Overrides;

    /// Records requests and which files existed when each download started.
    #[derive(Default)]
    struct FakeDownloader {
        requests: RefCell<Vec<DownloadRequest>>,
        seen_files: RefCell<Vec<HashSet<String>>>,
        fail_urls: HashSet<String>,
    }

    impl Downloader for FakeDownloader {
        fn download(&self, request: &DownloadRequest) -> anyhow::Result<()> {
            let files = fs::read_dir(&request.dir)?
                .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<io::Result<HashSet<_>>>()?;
            self.seen_files.borrow_mut().push(files);
            self.requests.borrow_mut().push(request.clone());
            if self.fail_urls.contains(&request.url) {
                bail!("simulated failure");
            }
            Ok(())
        }
    }

    fn config(queue_dir: &Path, overrides: Overrides) -> Config {
        let file = FileConfig {
            queue_dir: queue_dir.to_path_buf(),
            ..Default::default()
        };
        Config::new(file, overrides, Vec::new())
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn touch(path: &Path, modified: DateTime<Utc>) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::from(modified)).unwrap();
    }

    #[test]
    fn dir_names_stay_inside_queue() {
        assert_eq!(channel_dir_name("Plain Name"), "Plain Name");
        assert_eq!(channel_dir_name("AC/DC"), "AC_DC");
        assert_eq!(channel_dir_name(".."), "_..");
        assert_eq!(channel_dir_name(""), "_");
    }

    #[test]
    fn ensure_reports_new_only_once() {
        let queue = tempdir().unwrap();
        let (dir, is_new) = ensure_channel_dir(queue.path(), "Chan").unwrap();
        assert!(is_new);
        assert!(dir.is_dir());
        let (again, is_new) = ensure_channel_dir(queue.path(), "Chan").unwrap();
        assert_eq!(dir, again);
        assert!(!is_new);
    }

    #[test]
    fn prune_removes_only_old_media() {
        let dir = tempdir().unwrap();
        let cutoff = now() - TimeDelta::days(7);
        touch(&dir.path().join("old.mp4"), now() - TimeDelta::days(10));
        touch(&dir.path().join("old.MKV"), now() - TimeDelta::days(10));
        touch(&dir.path().join("recent.mp4"), now() - TimeDelta::days(1));
        touch(&dir.path().join("notes.txt"), now() - TimeDelta::days(30));
        fs::create_dir(dir.path().join("sub.mp4")).unwrap();

        let extensions = FileConfig::default().media_extensions;
        let mut removed = prune(dir.path(), &extensions, cutoff).unwrap();
        removed.sort();

        assert_eq!(
            removed,
            vec![dir.path().join("old.MKV"), dir.path().join("old.mp4")]
        );
        assert!(dir.path().join("recent.mp4").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("sub.mp4").is_dir());
    }

    #[test]
    fn old_file_removed_before_download() {
        let queue = tempdir().unwrap();
        let chan_dir = queue.path().join("Chan");
        fs::create_dir(&chan_dir).unwrap();
        touch(&chan_dir.join("old.mp4"), now() - TimeDelta::days(8));
        touch(&chan_dir.join("keep.mp4"), now() - TimeDelta::days(2));

        let config = config(queue.path(), Overrides::default());
        let downloader = FakeDownloader::default();
        sync_channel(&Subscription::new("Chan", "UC1"), &config, &downloader, now()).unwrap();

        let seen = downloader.seen_files.borrow();
        assert_eq!(seen[0], HashSet::from([String::from("keep.mp4")]));
        assert!(!chan_dir.join("old.mp4").exists());
    }

    #[test]
    fn delete_days_is_independent_of_download_days() {
        let queue = tempdir().unwrap();
        let chan_dir = queue.path().join("Chan");
        fs::create_dir(&chan_dir).unwrap();
        touch(&chan_dir.join("mid.mp4"), now() - TimeDelta::days(5));

        let overrides = Overrides {
            download_days: Some(2),
            delete_days: Some(7),
            ..Default::default()
        };
        let config = config(queue.path(), overrides);
        sync_channel(&Subscription::new("Chan", "UC1"), &config, &FakeDownloader::default(), now())
            .unwrap();

        assert!(chan_dir.join("mid.mp4").exists());
    }

    #[test]
    fn delete_old_disabled_keeps_everything() {
        let queue = tempdir().unwrap();
        let chan_dir = queue.path().join("Chan");
        fs::create_dir(&chan_dir).unwrap();
        touch(&chan_dir.join("old.mp4"), now() - TimeDelta::days(100));

        let overrides = Overrides {
            delete_old: Some(false),
            ..Default::default()
        };
        let config = config(queue.path(), overrides);
        sync_channel(&Subscription::new("Chan", "UC1"), &config, &FakeDownloader::default(), now())
            .unwrap();

        assert!(chan_dir.join("old.mp4").exists());
    }

    #[test]
    fn new_channel_gets_directory_and_request() {
        let queue = tempdir().unwrap();
        let overrides = Overrides {
            download_days: Some(3),
            ..Default::default()
        };
        let config = config(queue.path(), overrides);
        let downloader = FakeDownloader::default();

        sync_channel(&Subscription::new("New/Chan", "UC9"), &config, &downloader, now()).unwrap();

        let requests = downloader.requests.borrow();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.dir, queue.path().join("New_Chan"));
        assert!(request.dir.is_dir());
        assert_eq!(
            request.args(),
            vec![
                "https://www.youtube.com/channel/UC9/videos",
                "--dateafter",
                "20261013",
                "--playlist-end",
                "9",
            ]
        );
    }

    #[test]
    fn failing_channel_does_not_stop_batch() {
        let queue = tempdir().unwrap();
        let config = config(queue.path(), Overrides::default());
        let subscriptions: HashMap<String, Subscription> = [("A", "UCa"), ("B", "UCb"), ("C", "UCc")]
            .into_iter()
            .map(|(title, id)| (title.to_string(), Subscription::new(title, id)))
            .collect();
        let downloader = FakeDownloader {
            fail_urls: HashSet::from([Subscription::new("B", "UCb").videos_url()]),
            ..Default::default()
        };

        let report = sync_all(&subscriptions, &config, &downloader, now());

        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, vec!["B"]);
        let urls: Vec<_> = downloader.requests.borrow().iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/channel/UCa/videos",
                "https://www.youtube.com/channel/UCb/videos",
                "https://www.youtube.com/channel/UCc/videos",
            ]
        );
    }

    #[test]
    fn out_of_range_days_fail_only_that_channel() {
        let queue = tempdir().unwrap();
        fs::create_dir(queue.path().join("Old")).unwrap();
        touch(&queue.path().join("Old").join("a.mp4"), now() - TimeDelta::days(1));
        let overrides = Overrides {
            delete_days: Some(100_000_000),
            ..Default::default()
        };
        let config = config(queue.path(), overrides);
        let subscriptions: HashMap<String, Subscription> = [("New", "UCn"), ("Old", "UCo")]
            .into_iter()
            .map(|(title, id)| (title.to_string(), Subscription::new(title, id)))
            .collect();
        let downloader = FakeDownloader::default();

        let report = sync_all(&subscriptions, &config, &downloader, now());

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, vec!["Old"]);
        assert!(queue.path().join("Old").join("a.mp4").exists());
    }

    #[test]
    fn huge_download_window_is_an_error() {
        let queue = tempdir().unwrap();
        let overrides = Overrides {
            download_days: Some(u32::MAX),
            ..Default::default()
        };
        let config = config(queue.path(), overrides);
        let downloader = FakeDownloader::default();

        let err = sync_channel(&Subscription::new("Chan", "UC1"), &config, &downloader, now())
            .unwrap_err();

        assert!(err.to_string().contains("out of range"));
        assert!(downloader.requests.borrow().is_empty());
    }

    #[test]
    fn missing_program_is_reported() {
        let downloader = ExternalDownloader::new("queuetube-no-such-downloader");
        let err = downloader.check_installed().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DownloaderMissing { .. })
        ));
    }
}
