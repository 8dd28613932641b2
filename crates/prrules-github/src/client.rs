use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::OnceCell;

use prrules_pipeline::{ChangeSource, ReportSink};
use prrules_types::{ChangeMetadata, FileDiff, PrRulesError, Result};

use crate::refs::Repository;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("pr-rules-check/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

/// One pull request of one repository, over the REST v3 API.
pub struct GitHubClient {
    token: String,
    client: reqwest::Client,
    base_url: String,
    repository: Repository,
    pull_number: u64,
    timeout: Duration,
    metadata: OnceCell<ChangeMetadata>,
}

impl GitHubClient {
    pub fn new(token: String, repository: Repository, pull_number: u64) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
            base_url: "https://api.github.com".to_string(),
            repository,
            pull_number,
            timeout: DEFAULT_TIMEOUT,
            metadata: OnceCell::new(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn pull_number(&self) -> u64 {
        self.pull_number
    }

    /// `{base}/repos/{owner}/{name}/{segments..}`, each segment percent-encoded.
    fn repo_url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| collaborator(format!("invalid base URL '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| collaborator(format!("base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend([
                "repos",
                self.repository.owner.as_str(),
                self.repository.name.as_str(),
            ])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .timeout(self.timeout)
    }

    async fn get_json(&self, url: reqwest::Url) -> Result<serde_json::Value> {
        tracing::debug!(url = %url, "GitHub GET");
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }
        resp.json().await.map_err(transport_error)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_pull(body: &serde_json::Value) -> Result<ChangeMetadata> {
    let field = |value: &serde_json::Value, name: &str| -> Result<String> {
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| collaborator(format!("pull response is missing `{name}`")))
    };
    Ok(ChangeMetadata {
        title: field(&body["title"], "title")?,
        // A pull request without a description has a null body.
        body: body["body"].as_str().unwrap_or("").to_string(),
        base_ref: field(&body["base"]["ref"], "base.ref")?,
        head_ref: field(&body["head"]["ref"], "head.ref")?,
    })
}

/// Files without a `patch` (binary or too large) are left out.
fn parse_compare(body: &serde_json::Value) -> Vec<FileDiff> {
    body["files"]
        .as_array()
        .map(|files| {
            files
                .iter()
                .filter_map(|file| {
                    let filename = file["filename"].as_str()?;
                    let patch = file["patch"].as_str()?;
                    Some(FileDiff::new(filename, patch))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn collaborator(message: String) -> PrRulesError {
    PrRulesError::CollaboratorFailure {
        collaborator: "github".into(),
        message,
    }
}

fn transport_error(e: reqwest::Error) -> PrRulesError {
    collaborator(e.to_string())
}

fn map_status(status: reqwest::StatusCode, body: &str) -> PrRulesError {
    collaborator(format!(
        "HTTP {}: {}",
        status.as_u16(),
        extract_error_message(body)
    ))
}

/// A failed contents read: a missing file is [`PrRulesError::NotFound`].
fn contents_error(status: reqwest::StatusCode, body: &str, path: &str, reference: &str) -> PrRulesError {
    if status == reqwest::StatusCode::NOT_FOUND {
        return PrRulesError::NotFound {
            path: path.to_string(),
            reference: reference.to_string(),
        };
    }
    map_status(status, body)
}

fn publish_error(status: reqwest::StatusCode, body: &str) -> PrRulesError {
    PrRulesError::PublishError(format!(
        "HTTP {}: {}",
        status.as_u16(),
        extract_error_message(body)
    ))
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ChangeSource / ReportSink
// ---------------------------------------------------------------------------

#[async_trait]
impl ChangeSource for GitHubClient {
    async fn fetch_metadata(&self) -> Result<ChangeMetadata> {
        self.metadata
            .get_or_try_init(|| async {
                let number = self.pull_number.to_string();
                let body = self.get_json(self.repo_url(&["pulls", &number])?).await?;
                let metadata = parse_pull(&body)?;
                tracing::info!(
                    pull = self.pull_number,
                    base = %metadata.base_ref,
                    head = %metadata.head_ref,
                    "Fetched pull request"
                );
                Ok::<_, PrRulesError>(metadata)
            })
            .await
            .cloned()
    }

    async fn fetch_diff(&self, base_ref: &str, head_ref: &str) -> Result<Vec<FileDiff>> {
        let range = format!("{base_ref}...{head_ref}");
        let body = self.get_json(self.repo_url(&["compare", &range])?).await?;
        let diffs = parse_compare(&body);
        tracing::info!(files = diffs.len(), "Fetched diff");
        Ok(diffs)
    }

    async fn fetch_file(&self, path: &str, reference: &str) -> Result<String> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.repo_url(&segments)?;
        tracing::debug!(url = %url, reference, "GitHub GET raw contents");
        let resp = self
            .request(reqwest::Method::GET, url)
            .header("Accept", "application/vnd.github.raw")
            .query(&[("ref", reference)])
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(contents_error(status, &body, path, reference));
        }
        resp.text().await.map_err(transport_error)
    }
}

#[async_trait]
impl ReportSink for GitHubClient {
    async fn publish(&self, report: &str) -> Result<()> {
        let number = self.pull_number.to_string();
        let url = self
            .repo_url(&["issues", &number, "comments"])
            .map_err(|e| PrRulesError::PublishError(e.to_string()))?;
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&json!({ "body": report }))
            .send()
            .await
            .map_err(|e| PrRulesError::PublishError(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(publish_error(status, &body));
        }
        tracing::info!(pull = self.pull_number, "Comment posted on the pull request");
        Ok(())
    }
}
