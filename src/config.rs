//! Runtime configuration.
//!
//! A [`Config`] is assembled exactly once, from built-in defaults, an optional
//! TOML file and the command line, and then handed by reference to every
//! component. Nothing mutates it afterwards.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::Error;
use crate::mirror::FlagValue;
use crate::mirror::MirroredArg;

pub const CONFIG_ENV: &str = "QUEUETUBE_CONFIG";
pub const DEFAULT_DOWNLOADER: &str = "yt-dlp";
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Assumed upload rate used to derive the per-channel download cap.
pub const UPLOADS_PER_DAY: u32 = 3;

/// Where mirrored downloader flags come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Scrape every flag from `<downloader> --help`.
    #[default]
    Full,
    /// A small hard-coded subset.
    Curated,
    Off,
}

/// Contents of the optional TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub queue_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub media_extensions: Vec<String>,
    pub delete_old: bool,
    pub delete_days: u32,
    pub download_days: u32,
    pub max_downloads: Option<u32>,
    pub exclude: HashSet<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub downloader: String,
    pub mirror: MirrorMode,
    pub secrets_file: PathBuf,
    pub credentials_file: PathBuf,
    pub api_base_url: String,
    pub quiet_auth: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            queue_dir: PathBuf::from("queue"),
            archive_dir: PathBuf::from("kept"),
            media_extensions: ["mp4", "mkv", "webm", "m4a", "mp3", "part", "ytdl"]
                .into_iter()
                .map(String::from)
                .collect(),
            delete_old: true,
            delete_days: 7,
            download_days: 7,
            max_downloads: None,
            exclude: HashSet::new(),
            username: None,
            password: None,
            downloader: String::from(DEFAULT_DOWNLOADER),
            mirror: MirrorMode::default(),
            secrets_file: PathBuf::from("client_secrets.json"),
            credentials_file: PathBuf::from("token.db"),
            api_base_url: String::from(DEFAULT_API_BASE_URL),
            quiet_auth: false,
        }
    }
}

impl FileConfig {
    /// Location of the config file: `$QUEUETUBE_CONFIG`, or `config.toml` in the
    /// platform config directory.
    pub fn default_path() -> PathBuf {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        ProjectDirs::from("", "", "queuetube")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Reads the file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        Self::parse(&content).map_err(|e| {
            Error::Config {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Values supplied on the command line. `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub exclude: Option<Vec<String>>,
    pub delete_old: Option<bool>,
    pub delete_days: Option<u32>,
    pub download_days: Option<u32>,
    pub max_downloads: Option<u32>,
    pub save_queue: bool,
    pub queue_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub quiet_auth: bool,
}

/// Options consumed by this tool itself.
///
/// The downloader program and mirror mode are read straight from
/// [`FileConfig`], since they are needed before the command line can be built.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub queue_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub media_extensions: Vec<String>,
    pub delete_old: bool,
    /// Age in days after which queued media is pruned.
    pub delete_days: u32,
    /// Only videos uploaded within this many days are downloaded.
    pub download_days: u32,
    pub max_downloads: u32,
    pub exclude: HashSet<String>,
    pub save_queue: bool,
    pub secrets_file: PathBuf,
    pub credentials_file: PathBuf,
    pub api_base_url: String,
    /// Log OAuth progress at debug level only.
    pub quiet_auth: bool,
}

/// Options forwarded untouched to the external downloader.
#[derive(Debug, Clone, Default)]
pub struct PassthroughOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub flags: Vec<(MirroredArg, FlagValue)>,
}

impl PassthroughOptions {
    /// Renders the options as downloader arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(username) = &self.username {
            args.push(String::from("--username"));
            args.push(username.clone());
        }
        if let Some(password) = &self.password {
            args.push(String::from("--password"));
            args.push(password.clone());
        }
        for (spec, value) in &self.flags {
            args.extend(value.to_args(spec.flag_name()));
        }
        args
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: HostOptions,
    pub passthrough: PassthroughOptions,
}

impl Config {
    pub fn new(
        file: FileConfig,
        overrides: Overrides,
        flags: Vec<(MirroredArg, FlagValue)>,
    ) -> Self {
        let download_days = overrides.download_days.unwrap_or(file.download_days);
        let max_downloads = overrides
            .max_downloads
            .or(file.max_downloads)
            .unwrap_or_else(|| download_days.saturating_mul(UPLOADS_PER_DAY));

        let host = HostOptions {
            queue_dir: overrides.queue_dir.unwrap_or(file.queue_dir),
            archive_dir: overrides.archive_dir.unwrap_or(file.archive_dir),
            media_extensions: file.media_extensions,
            delete_old: overrides.delete_old.unwrap_or(file.delete_old),
            delete_days: overrides.delete_days.unwrap_or(file.delete_days),
            download_days,
            max_downloads,
            exclude: overrides
                .exclude
                .map(|names| names.into_iter().collect())
                .unwrap_or(file.exclude),
            save_queue: overrides.save_queue,
            secrets_file: file.secrets_file,
            credentials_file: file.credentials_file,
            api_base_url: file.api_base_url,
            quiet_auth: overrides.quiet_auth || file.quiet_auth,
        };

        let passthrough = PassthroughOptions {
            username: overrides.username.or(file.username),
            password: overrides.password.or(file.password),
            flags,
        };

        Self { host, passthrough }
    }
}
