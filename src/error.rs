use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures the binary tells apart when choosing an exit code.
///
/// Library functions return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("`{program}` does not appear to be installed")]
    DownloaderMissing {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("downloader help output has no `--help` entry to anchor on")]
    HelpAnchorMissing,

    #[error("malformed flag block in downloader help: {0:?}")]
    MalformedFlagBlock(String),

    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not obtain credentials: {0}")]
    Credentials(String),

    #[error("downloader exited with {status} for {url}")]
    DownloadFailed { url: String, status: String },

    #[error("invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },
}

/// Exit codes returned by the binary.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const DOWNLOADER_MISSING: u8 = 2;
    pub const API_ERROR: u8 = 3;
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::DownloaderMissing { .. } => exit_codes::DOWNLOADER_MISSING,
            Error::Api { .. } | Error::Credentials(_) => exit_codes::API_ERROR,
            _ => exit_codes::FAILURE,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_code_per_category() {
        let missing = Error::DownloaderMissing {
            program: String::from("yt-dlp"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(missing.exit_code(), exit_codes::DOWNLOADER_MISSING);
        assert_eq!(
            Error::Credentials(String::from("busy port")).exit_code(),
            exit_codes::API_ERROR
        );
        assert_eq!(Error::HelpAnchorMissing.exit_code(), exit_codes::FAILURE);
    }
}
