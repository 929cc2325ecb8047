use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::BookmarkIdCache;
use crate::local_bookmarks::LocalBookmark;
use crate::normalize::normalize_url;
use crate::settings::{Session, Settings};

/// Bounded deadline for the bulk import submission. Progress fetches carry
/// no per-call deadline; the monitoring safety timeout covers them.
const IMPORT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated. Please log in to Fuze.")]
    Unauthenticated,

    #[error("API URL not configured. Please set it with `fuze-sync config --api-url`.")]
    Unconfigured,

    #[error("Fuze rejected the request: HTTP {status}: {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Bookmark not found in Fuze")]
    NotFound,

    #[error("Could not connect to Fuze. Please check your API URL and server status.")]
    NetworkUnreachable(#[source] reqwest::Error),

    #[error("An import is already in progress")]
    ImportAlreadyInProgress(ImportSnapshot),

    #[error("Import monitoring timed out")]
    MonitoringTimedOut,
}

/// Build a session from stored settings, or say exactly what is missing.
/// The base URL is checked first, matching the order failures are shown
/// to the user during setup.
pub fn require_session(settings: &Settings) -> Result<Session, ApiError> {
    let api_url = settings.api_url.clone().ok_or(ApiError::Unconfigured)?;
    let token = settings.auth_token.clone().ok_or(ApiError::Unauthenticated)?;
    Ok(Session { token, api_url })
}

#[derive(Debug, Clone, Serialize)]
pub struct NewBookmark {
    pub url: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub id: String,
    pub was_duplicate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBookmark {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Server-side import job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    NotStarted,
    Waiting,
    Processing,
    Completed,
    Error,
}

/// One progress report from the import job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSnapshot {
    pub status: ImportStatus,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub added: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub errors: u64,
}

impl ImportSnapshot {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ImportStatus::Completed | ImportStatus::Error)
    }

    /// A job that is waiting or processing occupies the account
    pub fn is_active(&self) -> bool {
        matches!(self.status, ImportStatus::Waiting | ImportStatus::Processing)
    }

    /// Floor-rounded integer percentage
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.processed * 100 / self.total
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    bookmark: CreatedBookmark,
    #[serde(default, rename = "wasDuplicate")]
    was_duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedBookmark {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    bookmarks: Vec<RemoteBookmark>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Result of the lightweight session probe. An unreachable server is not
/// the same as a rejected token: offline must never log the user out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid,
    Unreachable,
}

/// HTTP client for the Fuze bookmark API.
///
/// The client itself is stateless; the identity cache is owned by the
/// caller and passed into the operations that maintain it.
#[derive(Debug, Clone)]
pub struct FuzeClient {
    http: reqwest::Client,
}

impl Default for FuzeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Raw HTTP handle for the progress stream subscription
    pub fn handle(&self) -> reqwest::Client {
        self.http.clone()
    }

    pub async fn create(
        &self,
        bookmark: &NewBookmark,
        session: &Session,
        cache: &mut BookmarkIdCache,
    ) -> Result<CreateOutcome, ApiError> {
        let url = format!("{}/api/bookmarks", session.api_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&session.token)
            .json(bookmark)
            .send()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        let response = check_status(response).await?;
        let parsed: CreateResponse = response
            .json()
            .await
            .map_err(ApiError::NetworkUnreachable)?;

        cache.insert(normalize_url(&bookmark.url), parsed.bookmark.id.clone());
        Ok(CreateOutcome {
            id: parsed.bookmark.id,
            was_duplicate: parsed.was_duplicate,
        })
    }

    pub async fn list(&self, session: &Session) -> Result<Vec<RemoteBookmark>, ApiError> {
        let url = format!("{}/api/bookmarks", session.api_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        let response = check_status(response).await?;
        let parsed: ListResponse = response
            .json()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        Ok(parsed.bookmarks)
    }

    /// Delete the bookmark matching `raw_url`.
    ///
    /// The id is resolved through the cache, falling back to a full-list
    /// fetch. The delete itself goes by id first; if that specific call
    /// fails, one retry goes through the delete-by-url endpoint. The cache
    /// entry is invalidated only after a confirmed delete on either path.
    pub async fn delete_by_url(
        &self,
        raw_url: &str,
        session: &Session,
        cache: &mut BookmarkIdCache,
    ) -> Result<(), ApiError> {
        let normalized = normalize_url(raw_url);
        let id = self
            .resolve_id(&normalized, session, cache)
            .await?
            .ok_or(ApiError::NotFound)?;

        let by_id = format!("{}/api/bookmarks/{}", session.api_url, id);
        let id_delete_ok = match self
            .http
            .delete(&by_id)
            .bearer_auth(&session.token)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("ID-based delete returned HTTP {}", response.status());
                false
            }
            Err(e) => {
                debug!("ID-based delete failed to send: {}", e);
                false
            }
        };

        if !id_delete_ok {
            warn!("⚠️  ID-based delete failed, retrying by URL");
            let by_url = format!(
                "{}/api/bookmarks/url/{}",
                session.api_url,
                urlencoding::encode(&normalized)
            );
            let response = self
                .http
                .delete(&by_url)
                .bearer_auth(&session.token)
                .send()
                .await
                .map_err(ApiError::NetworkUnreachable)?;
            check_status(response).await?;
        }

        cache.remove(&normalized);
        Ok(())
    }

    async fn resolve_id(
        &self,
        normalized: &str,
        session: &Session,
        cache: &mut BookmarkIdCache,
    ) -> Result<Option<String>, ApiError> {
        if let Some(id) = cache.get(normalized) {
            return Ok(Some(id.to_string()));
        }

        for remote in self.list(session).await? {
            if normalize_url(&remote.url) == normalized {
                cache.insert(normalized.to_string(), remote.id.clone());
                return Ok(Some(remote.id));
            }
        }
        Ok(None)
    }

    pub async fn verify(&self, session: &Session) -> VerifyOutcome {
        let url = format!("{}/api/auth/verify", session.api_url);
        match self
            .http
            .get(&url)
            .bearer_auth(&session.token)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => VerifyOutcome::Valid,
            Ok(response) => {
                debug!("Session verify rejected: HTTP {}", response.status());
                VerifyOutcome::Invalid
            }
            Err(e) => {
                debug!("Session verify unreachable: {}", e);
                VerifyOutcome::Unreachable
            }
        }
    }

    pub async fn login(
        &self,
        api_url: &str,
        email: &str,
        password: &str,
    ) -> Result<String, ApiError> {
        let url = format!("{}/api/auth/login", api_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        let response = check_status(response).await?;
        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        Ok(parsed.access_token)
    }

    pub async fn health(&self, api_url: &str) -> bool {
        let url = format!("{}/api/health", api_url);
        matches!(self.http.get(&url).send().await, Ok(r) if r.status().is_success())
    }

    /// Fire the bulk import. The job outcome is observed only through the
    /// progress channel, never through this response.
    pub async fn start_import(
        &self,
        entries: &[LocalBookmark],
        session: &Session,
    ) -> Result<(), ApiError> {
        let url = format!("{}/api/bookmarks/import", session.api_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&session.token)
            .timeout(IMPORT_SUBMIT_TIMEOUT)
            .json(entries)
            .send()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn fetch_progress(&self, session: &Session) -> Result<ImportSnapshot, ApiError> {
        let url = format!("{}/api/bookmarks/import/progress", session.api_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(ApiError::NetworkUnreachable)?;
        let response = check_status(response).await?;
        response.json().await.map_err(ApiError::NetworkUnreachable)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| format!("HTTP {}", status));
    Err(ApiError::RemoteRejected {
        status: status.as_u16(),
        message,
    })
}
