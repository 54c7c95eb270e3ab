//! Command-line interface.
//!
//! Host flags are declared with clap's derive API. Downloader flags are grafted
//! onto the same [`Command`] at runtime by [`mirror::augment`], so both kinds
//! are parsed in one pass.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::ArgAction;
use clap::Command;
use clap::CommandFactory;
use clap::FromArgMatches;
use clap::Parser;

use crate::config::FileConfig;
use crate::config::Overrides;
use crate::mirror;
use crate::mirror::FlagValue;
use crate::mirror::MirroredArg;

/// Downloads recent uploads from your YouTube subscriptions into a local queue
#[derive(Parser, Debug)]
#[command(name = "queuetube", author, version, about)]
pub struct Args {
    /// Channel titles to skip (replaces the configured list)
    #[arg(long, num_args = 1.., value_name = "NAME")]
    pub exclude: Option<Vec<String>>,

    /// Delete old media from existing channel directories
    #[arg(long = "delete_old", value_name = "BOOL", action = ArgAction::Set)]
    pub delete_old: Option<bool>,

    /// Age in days after which queued media is deleted
    #[arg(long = "delete_days", value_name = "DAYS")]
    pub delete_days: Option<u32>,

    /// Only download videos uploaded within this many days
    #[arg(long = "download_days", value_name = "DAYS")]
    pub download_days: Option<u32>,

    /// Maximum videos fetched per channel [default: download_days * 3]
    #[arg(long = "max_downloads", value_name = "N")]
    pub max_downloads: Option<u32>,

    /// Move the queue into the archive directory and exit
    #[arg(long = "save_queue")]
    pub save_queue: bool,

    /// Queue directory
    #[arg(long = "queue_dir", value_name = "PATH")]
    pub queue_dir: Option<PathBuf>,

    /// Archive directory used by --save_queue
    #[arg(long = "archive_dir", value_name = "PATH")]
    pub archive_dir: Option<PathBuf>,

    /// Account name passed to the downloader
    #[arg(short, long)]
    pub username: Option<String>,

    /// Account password passed to the downloader; prompted for if omitted
    #[arg(short, long)]
    pub password: Option<String>,

    /// Log OAuth progress at debug level only
    #[arg(long = "quiet_auth")]
    pub quiet_auth: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Turns the parsed flags into config overrides.
    ///
    /// When a username is known (here or in `file`) but no password is, `prompt`
    /// is asked for one.
    pub fn into_overrides<F>(self, file: &FileConfig, prompt: F) -> anyhow::Result<Overrides>
    where
        F: FnOnce(&str) -> anyhow::Result<String>,
    {
        let username = self.username.or_else(|| file.username.clone());
        let password = match (&username, self.password.or_else(|| file.password.clone())) {
            (Some(user), None) => Some(prompt(user)?),
            (_, password) => password,
        };

        Ok(Overrides {
            exclude: self.exclude,
            delete_old: self.delete_old,
            delete_days: self.delete_days,
            download_days: self.download_days,
            max_downloads: self.max_downloads,
            save_queue: self.save_queue,
            queue_dir: self.queue_dir,
            archive_dir: self.archive_dir,
            username,
            password,
            quiet_auth: self.quiet_auth,
        })
    }
}

/// Our command with every non-clashing downloader flag added.
pub fn command(specs: &[MirroredArg]) -> (Command, Vec<MirroredArg>) {
    mirror::augment(Args::command(), specs)
}

/// A fully parsed command line.
#[derive(Debug)]
pub struct Cli {
    pub args: Args,
    pub flags: Vec<(MirroredArg, FlagValue)>,
}

impl Cli {
    pub fn try_parse_from<I, T>(specs: &[MirroredArg], argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let (command, mirrored) = command(specs);
        let matches = command.try_get_matches_from(argv)?;
        let args = Args::from_arg_matches(&matches)?;
        let flags = mirror::collect(&matches, &mirrored);
        Ok(Self { args, flags })
    }
}
