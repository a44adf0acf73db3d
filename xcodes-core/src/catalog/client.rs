//! Remote catalog access.
//!
//! Authentication against the developer account service is an external
//! collaborator; this module only defines the narrow seam the resolver
//! talks through and an HTTP implementation of it. Credentials come from
//! the environment and are required lazily - browsing a cached catalog
//! never asks for them.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// Downloads catalog endpoint. Returns `resultCode`, `resultString` and a
/// `downloads` sequence of release descriptors.
pub const SEEDLIST_ENDPOINT: &str =
    "https://developer.apple.com/services-account/QH65B2/downloadws/listDownloads.action";

/// Prerelease listing page, scraped for beta entries.
pub const PRERELEASE_ENDPOINT: &str = "https://developer.apple.com/download/";

const CREDENTIALS_HELP: &str = "Please provide your Apple developer account credentials via the \
                                XCODE_INSTALL_USER and XCODE_INSTALL_PASSWORD environment variables.";

/// Developer account credentials, read from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    /// Scopes the account to a team when the account belongs to several.
    pub team_id: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let user = std::env::var("XCODE_INSTALL_USER")
            .map_err(|_| Error::informative(CREDENTIALS_HELP))?;
        let password = std::env::var("XCODE_INSTALL_PASSWORD")
            .map_err(|_| Error::informative(CREDENTIALS_HELP))?;
        let team_id = std::env::var("XCODE_INSTALL_TEAM_ID").ok();

        Ok(Self {
            user,
            password,
            team_id,
        })
    }
}

/// What the resolver needs from the remote side.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch the raw downloads payload.
    async fn download_seedlist(&self) -> Result<Value>;

    /// Fetch the prerelease listing page body.
    async fn prerelease_page(&self) -> Result<String>;

    /// Session cookie for authenticated artifact downloads, if one exists.
    fn cookie(&self) -> Option<String>;
}

/// HTTP-backed catalog client against the developer portal.
pub struct AppleDevCenterClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
    session_cookie: Option<String>,
}

impl AppleDevCenterClient {
    /// Build a client, picking up credentials from the environment when
    /// present. Missing credentials only fail once a remote fetch happens.
    pub fn from_env() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("xcodes/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            credentials: Credentials::from_env().ok(),
            session_cookie: None,
        })
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| Error::informative(CREDENTIALS_HELP))
    }
}

#[async_trait]
impl CatalogClient for AppleDevCenterClient {
    async fn download_seedlist(&self) -> Result<Value> {
        let credentials = self.credentials()?;

        let mut request = self
            .http
            .post(SEEDLIST_ENDPOINT)
            .basic_auth(&credentials.user, Some(&credentials.password));

        if let Some(team_id) = &credentials.team_id {
            request = request.form(&[("teamId", team_id.as_str())]);
        }

        let payload = request
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(payload)
    }

    async fn prerelease_page(&self) -> Result<String> {
        let mut request = self.http.get(PRERELEASE_ENDPOINT);
        if let Some(cookie) = &self.session_cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let body = request.send().await?.error_for_status()?.text().await?;
        Ok(body)
    }

    fn cookie(&self) -> Option<String> {
        self.session_cookie.clone()
    }
}
