use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode, header::ACCEPT};
use serde::Deserialize;
use serde_json::json;

use super::{Result, TransportError};
use crate::config::CodeHostConfig;
use crate::credentials::HostToken;

const API_MEDIA_TYPE: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("codemart/", env!("CARGO_PKG_VERSION"));

/// REST operations against the code host that a migration needs.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Downloads a zip snapshot of `owner/repo` at `branch`.
    async fn download_snapshot(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &HostToken,
    ) -> Result<Bytes>;

    /// Creates an empty private repository for the token's user and returns
    /// its clone URL. If the user already has a repository named `name`,
    /// that repository's clone URL is returned instead.
    async fn create_repository(&self, name: &str, token: &HostToken) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CreatedRepository {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct AuthenticatedUser {
    login: String,
}

#[derive(Debug, Default, Deserialize)]
struct ValidationFailure {
    #[serde(default)]
    errors: Vec<FieldError>,
}

#[derive(Debug, Deserialize)]
struct FieldError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Whether a 422 from repository creation reports a name clash rather than
/// some other validation failure.
fn name_already_exists(body: &str) -> bool {
    let failure: ValidationFailure = serde_json::from_str(body).unwrap_or_default();
    failure.errors.iter().any(|e| {
        e.code.as_deref() == Some("already_exists")
            || e.message
                .as_deref()
                .is_some_and(|m| m.contains("already exists"))
    })
}

/// `CodeHost` over a GitHub-compatible REST API.
pub struct HostClient {
    http: Client,
    api_url: String,
}

impl HostClient {
    pub fn new(config: &CodeHostConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, path: &str, token: &HostToken) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_url))
            .bearer_auth(token.expose())
            .header(ACCEPT, API_MEDIA_TYPE)
    }

    async fn existing_repository(&self, name: &str, token: &HostToken) -> Result<String> {
        let resp = self.get("/user", token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::RepositoryCreationFailed {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let user: AuthenticatedUser = resp.json().await?;

        let path = format!(
            "/repos/{}/{}",
            urlencoding::encode(&user.login),
            urlencoding::encode(name)
        );
        let resp = self.get(&path, token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::RepositoryCreationFailed {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let repo: CreatedRepository = resp.json().await?;

        tracing::info!(name, "reusing existing destination repository");
        Ok(repo.clone_url)
    }
}

#[async_trait]
impl CodeHost for HostClient {
    async fn download_snapshot(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &HostToken,
    ) -> Result<Bytes> {
        let path = format!(
            "/repos/{}/{}/zipball/{}",
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            urlencoding::encode(branch)
        );
        let resp = self.get(&path, token).send().await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(TransportError::SnapshotDownloadFailed {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let archive = resp.bytes().await?;
        tracing::info!(owner, repo, branch, size = archive.len(), "downloaded snapshot");
        Ok(archive)
    }

    async fn create_repository(&self, name: &str, token: &HostToken) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/user/repos", self.api_url))
            .bearer_auth(token.expose())
            .header(ACCEPT, API_MEDIA_TYPE)
            .json(&json!({
                "name": name,
                "private": true,
                "auto_init": false,
            }))
            .send()
            .await?;

        match resp.status() {
            StatusCode::CREATED => {
                let repo: CreatedRepository = resp.json().await?;
                tracing::info!(name, "created destination repository");
                Ok(repo.clone_url)
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = resp.text().await.unwrap_or_default();
                let rejected = || TransportError::RepositoryCreationFailed {
                    status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                    body: body.clone(),
                };
                if !name_already_exists(&body) {
                    return Err(rejected());
                }
                self.existing_repository(name, token).await.map_err(|e| {
                    tracing::warn!(name, error = %e, "existing destination repository not readable");
                    rejected()
                })
            }
            status => Err(TransportError::RepositoryCreationFailed {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}
