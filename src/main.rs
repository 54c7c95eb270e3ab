use std::env;
use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use console::Term;
use queuetube::archive;
use queuetube::cli::Cli;
use queuetube::config::Config;
use queuetube::config::FileConfig;
use queuetube::config::MirrorMode;
use queuetube::credentials::CredentialProvider;
use queuetube::credentials::OAuthProvider;
use queuetube::credentials::StaticToken;
use queuetube::credentials::ACCESS_TOKEN_ENV;
use queuetube::error::exit_codes;
use queuetube::mirror::CuratedFlags;
use queuetube::mirror::FlagSource;
use queuetube::mirror::HelpScraper;
use queuetube::queue;
use queuetube::queue::ExternalDownloader;
use queuetube::subscriptions::fetch_subscriptions;
use queuetube::subscriptions::YouTubeApi;
use queuetube::Error;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(exit_codes::FAILURE);
            ExitCode::from(code)
        }
    }
}

// Runs before argument parsing so that failures while discovering downloader
// flags are logged too.
fn init_logging() {
    let debug = env::args_os().any(|arg| arg == "--debug");
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run() -> anyhow::Result<u8> {
    let file = FileConfig::load(&FileConfig::default_path())?;

    let downloader = ExternalDownloader::new(file.downloader.clone());
    downloader.check_installed()?;

    let specs = match file.mirror {
        MirrorMode::Full => HelpScraper::new(file.downloader.clone()).discover_flags()?,
        MirrorMode::Curated => CuratedFlags.discover_flags()?,
        MirrorMode::Off => Vec::new(),
    };
    let cli = Cli::try_parse_from(&specs, env::args_os()).unwrap_or_else(|e| e.exit());
    let overrides = cli.args.into_overrides(&file, prompt_password)?;
    let config = Config::new(file, overrides, cli.flags);
    let host = &config.host;

    if host.save_queue {
        archive::archive_queue(&host.queue_dir, &host.archive_dir)?;
        return Ok(exit_codes::SUCCESS);
    }

    fs::create_dir_all(&host.queue_dir)
        .with_context(|| format!("creating {}", host.queue_dir.display()))?;

    let mut provider: Box<dyn CredentialProvider> = match env::var(ACCESS_TOKEN_ENV) {
        Ok(token) => Box::new(StaticToken(token)),
        Err(_) => Box::new(
            OAuthProvider::builder()
                .secrets_file(&host.secrets_file)
                .credentials_file(&host.credentials_file)
                .quiet(host.quiet_auth)
                .build(),
        ),
    };
    let credential = provider.credentials()?;

    let api = YouTubeApi::builder()
        .base_url(&host.api_base_url)
        .access_token(credential.access_token)
        .build();
    let subscriptions = fetch_subscriptions(&api, &host.exclude)?;

    let report = queue::sync_all(&subscriptions, &config, &downloader, Utc::now());
    info!(
        synced = report.synced,
        failed = report.failed.len(),
        "Finished"
    );
    if !report.failed.is_empty() {
        warn!(channels = ?report.failed, "Some channels failed to sync");
        return Ok(exit_codes::FAILURE);
    }
    Ok(exit_codes::SUCCESS)
}

fn prompt_password(username: &str) -> anyhow::Result<String> {
    let term = Term::stderr();
    term.write_str(&format!("Password for {username}: "))?;
    let password = term.read_secure_line()?;
    Ok(password)
}
