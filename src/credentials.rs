//! OAuth credentials for the platform API.
//!
//! [`OAuthProvider`] keeps the last credential in a small binary store, refreshes
//! it when it has expired and falls back to the installed-app consent flow on a
//! loopback redirect when nothing usable is cached.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;

use anyhow::Context;
use attohttpc::Session;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use console::Term;
use pickledb::PickleDb;
use pickledb::PickleDbDumpPolicy;
use pickledb::SerializationMethod;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::Error;

pub const SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";
pub const REDIRECT_PORT: u16 = 8080;
pub const ACCESS_TOKEN_ENV: &str = "QUEUETUBE_ACCESS_TOKEN";

const CREDENTIAL_KEY: &str = "credential";

/// Tokens this close to their expiry count as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

const REDIRECT_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\
    Connection: close\r\n\r\nAuthentication finished. You may close this window.\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| {
            expiry
                .checked_sub_signed(TimeDelta::seconds(EXPIRY_MARGIN_SECS))
                .map_or(true, |limit| limit <= Utc::now())
        })
    }

    pub fn valid(&self) -> bool {
        !self.access_token.is_empty() && !self.expired()
    }
}

/// Supplies a usable access token.
pub trait CredentialProvider {
    fn credentials(&mut self) -> anyhow::Result<Credential>;
}

/// A bearer token obtained elsewhere, e.g. from `QUEUETUBE_ACCESS_TOKEN`.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn credentials(&mut self) -> anyhow::Result<Credential> {
        Ok(Credential {
            access_token: self.0.clone(),
            refresh_token: None,
            expiry: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    installed: InstalledApp,
}

#[derive(Debug, Clone, Deserialize)]
struct InstalledApp {
    client_id: String,
    client_secret: String,
    auth_uri: String,
    token_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResp {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResp {
    fn into_credential(self, previous_refresh: Option<String>) -> Result<Credential, Error> {
        let expiry = match self.expires_in {
            Some(secs) => Some(
                TimeDelta::try_seconds(secs)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        Error::Credentials(format!("token lifetime of {secs}s is out of range"))
                    })?,
            ),
            None => None,
        };
        Ok(Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry,
        })
    }
}

pub struct OAuthProvider {
    secrets_file: PathBuf,
    credentials_file: PathBuf,
    port: u16,
    quiet: bool,
    sess: Session,
}

impl OAuthProvider {
    pub fn builder() -> OAuthProviderBuilder {
        OAuthProviderBuilder::default()
    }

    fn say(&self, message: &str) {
        if self.quiet {
            debug!("{message}");
        } else {
            info!("{message}");
        }
    }

    fn load_cached(&self) -> Option<Credential> {
        if !self.credentials_file.exists() {
            return None;
        }
        self.say("Loading credentials from file");
        match PickleDb::load(
            &self.credentials_file,
            PickleDbDumpPolicy::NeverDump,
            SerializationMethod::Bin,
        ) {
            Ok(db) => db.get::<Credential>(CREDENTIAL_KEY),
            Err(e) => {
                warn!(
                    path = %self.credentials_file.display(),
                    error = %e,
                    "Ignoring unreadable credentials file"
                );
                None
            }
        }
    }

    fn store(&self, credential: &Credential) -> anyhow::Result<()> {
        self.say("Saving credentials for future use");
        let mut db = PickleDb::new(
            &self.credentials_file,
            PickleDbDumpPolicy::AutoDump,
            SerializationMethod::Bin,
        );
        db.set(CREDENTIAL_KEY, credential)
            .with_context(|| format!("writing {}", self.credentials_file.display()))?;
        Ok(())
    }

    fn client_secrets(&self) -> anyhow::Result<InstalledApp> {
        let file = File::open(&self.secrets_file).map_err(|e| {
            Error::Credentials(format!("cannot open {}: {e}", self.secrets_file.display()))
        })?;
        let secrets: ClientSecrets = serde_json::from_reader(file).map_err(|e| {
            Error::Credentials(format!("cannot parse {}: {e}", self.secrets_file.display()))
        })?;
        Ok(secrets.installed)
    }

    fn request_token(
        &self,
        app: &InstalledApp,
        params: &[(&str, &str)],
    ) -> anyhow::Result<TokenResp> {
        let resp = self
            .sess
            .post(&app.token_uri)
            .form(&params)?
            .send()
            .context("contacting token endpoint")?;
        if !resp.is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            let message = format!("token endpoint returned {status}: {body}");
            return Err(Error::Credentials(message).into());
        }
        Ok(resp.json_utf8()?)
    }

    fn refresh(&self, refresh_token: &str) -> anyhow::Result<Credential> {
        self.say("Refreshing access token");
        let app = self.client_secrets()?;
        let resp = self.request_token(
            &app,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", app.client_id.as_str()),
                ("client_secret", app.client_secret.as_str()),
            ],
        )?;
        Ok(resp.into_credential(Some(refresh_token.to_owned()))?)
    }

    fn consent(&self) -> anyhow::Result<Credential> {
        self.say("Fetching new tokens");
        let app = self.client_secrets()?;
        let redirect_uri = format!("http://localhost:{}/", self.port);

        let mut auth_url = Url::parse(&app.auth_uri)
            .map_err(|e| Error::Credentials(format!("invalid auth_uri: {e}")))?;
        auth_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", app.client_id.as_str())
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        let listener = TcpListener::bind(("127.0.0.1", self.port)).map_err(|e| {
            Error::Credentials(format!(
                "cannot listen for the OAuth redirect on port {}: {e}",
                self.port
            ))
        })?;
        Term::stderr()
            .write_line(&format!(
                "Open this URL in a browser to authorize access:\n\n    {auth_url}\n"
            ))
            .map_err(|e| Error::Credentials(format!("cannot show the authorization URL: {e}")))?;

        let code = accept_redirect(&listener)?;

        let resp = self.request_token(
            &app,
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("client_id", app.client_id.as_str()),
                ("client_secret", app.client_secret.as_str()),
            ],
        )?;
        Ok(resp.into_credential(None)?)
    }
}

impl CredentialProvider for OAuthProvider {
    fn credentials(&mut self) -> anyhow::Result<Credential> {
        let cached = self.load_cached();
        if let Some(credential) = &cached {
            if credential.valid() {
                return Ok(credential.clone());
            }
        }

        let refresh_token = cached.filter(Credential::expired).and_then(|c| c.refresh_token);
        let credential = match refresh_token {
            Some(refresh_token) => self.refresh(&refresh_token)?,
            None => self.consent()?,
        };
        self.store(&credential)?;
        Ok(credential)
    }
}

/// Waits for the browser redirect and answers it.
fn accept_redirect(listener: &TcpListener) -> Result<String, Error> {
    let redirect_error = |e: io::Error| Error::Credentials(format!("OAuth redirect failed: {e}"));
    let (stream, _) = listener.accept().map_err(redirect_error)?;
    let mut request_line = String::new();
    BufReader::new(&stream)
        .read_line(&mut request_line)
        .map_err(redirect_error)?;
    (&stream)
        .write_all(REDIRECT_RESPONSE.as_bytes())
        .map_err(redirect_error)?;
    parse_redirect(&request_line)
}

/// Extracts the authorization code from the redirect's HTTP request line.
fn parse_redirect(request_line: &str) -> Result<String, Error> {
    let target = request_line.split_whitespace().nth(1).ok_or_else(|| {
        Error::Credentials(format!("unexpected redirect request: {request_line:?}"))
    })?;
    let url = Url::parse("http://localhost")
        .and_then(|base| base.join(target))
        .map_err(|e| Error::Credentials(format!("invalid redirect target {target:?}: {e}")))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(error) = params.get("error") {
        return Err(Error::Credentials(format!("authorization denied: {error}")));
    }
    match params.get("code") {
        Some(code) => Ok(code.clone()),
        None => Err(Error::Credentials(String::from("redirect carried no authorization code"))),
    }
}

#[derive(Debug)]
pub struct OAuthProviderBuilder {
    secrets_file: PathBuf,
    credentials_file: PathBuf,
    port: u16,
    quiet: bool,
}

impl OAuthProviderBuilder {
    pub fn secrets_file<P: Into<PathBuf>>(mut self, secrets_file: P) -> Self {
        self.secrets_file = secrets_file.into();
        self
    }

    pub fn credentials_file<P: Into<PathBuf>>(mut self, credentials_file: P) -> Self {
        self.credentials_file = credentials_file.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn build(self) -> OAuthProvider {
        OAuthProvider {
            secrets_file: self.secrets_file,
            credentials_file: self.credentials_file,
            port: self.port,
            quiet: self.quiet,
            sess: Session::new(),
        }
    }
}

impl Default for OAuthProviderBuilder {
    fn default() -> Self {
        Self {
            secrets_file: PathBuf::from("client_secrets.json"),
            credentials_file: PathBuf::from("token.db"),
            port: REDIRECT_PORT,
            quiet: false,
        }
    }
}
