//! Snapshot transport: moves a repository between two code host accounts by
//! downloading an archive with the seller's token and pushing its contents
//! into a new private repository with the buyer's token.

mod archive;
mod codehost;
mod vcs;

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::credentials::HostToken;

pub use archive::{ExtractedSnapshot, extract_snapshot};
pub use codehost::{CodeHost, HostClient};
pub use vcs::{Git2Vcs, VcsError, VersionControl};

#[cfg(test)]
pub(crate) use archive::build_zip;

const REMOTE_NAME: &str = "origin";

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid repository url: {0}")]
    InvalidRepositoryUrl(String),

    #[error("snapshot download failed with status {status}: {body}")]
    SnapshotDownloadFailed { status: u16, body: String },

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("repository creation failed with status {status}: {body}")]
    RepositoryCreationFailed { status: u16, body: String },

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("code host request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scratch storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Owner and name parsed from a repository's web URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPath {
    pub owner: String,
    pub repo: String,
}

/// Parses `https://host/owner/repo`, tolerating a `.git` suffix and a
/// trailing slash.
pub fn parse_repository_url(url: &str) -> Result<RepositoryPath> {
    let invalid = || TransportError::InvalidRepositoryUrl(url.to_string());

    let parsed = Url::parse(url.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "https" | "http") || parsed.host_str().is_none() {
        return Err(invalid());
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|s| !s.is_empty())
        .collect();

    match segments.as_slice() {
        [owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            if repo.is_empty() {
                return Err(invalid());
            }
            Ok(RepositoryPath {
                owner: (*owner).to_string(),
                repo: repo.to_string(),
            })
        }
        _ => Err(invalid()),
    }
}

/// A destination name unlikely to collide with anything the buyer already
/// owns: twelve random hex characters, a dash, then the source name.
#[must_use]
pub fn destination_name(source_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{source_name}", &id[..12])
}

#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub source_owner: String,
    pub source_repo: String,
    pub branch: String,
    pub source_token: HostToken,
    pub destination_token: HostToken,
    pub destination_name: String,
}

pub struct SnapshotTransport {
    host: Arc<dyn CodeHost>,
    vcs: Arc<dyn VersionControl>,
    config: TransferConfig,
}

impl SnapshotTransport {
    pub fn new(
        host: Arc<dyn CodeHost>,
        vcs: Arc<dyn VersionControl>,
        config: TransferConfig,
    ) -> Self {
        Self { host, vcs, config }
    }

    /// Copies the source repository into a new private repository owned by
    /// the destination token's user and returns its clone URL.
    ///
    /// Re-running with the same `destination_name` pushes into the
    /// repository created by the earlier attempt.
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<String> {
        let archive = self
            .host
            .download_snapshot(
                &request.source_owner,
                &request.source_repo,
                &request.branch,
                &request.source_token,
            )
            .await?;

        let scratch_dir = self.config.scratch_dir.clone();
        let snapshot =
            tokio::task::spawn_blocking(move || extract_snapshot(&archive, &scratch_dir))
                .await??;

        let clone_url = self
            .host
            .create_repository(&request.destination_name, &request.destination_token)
            .await?;

        let root = snapshot.root().to_path_buf();
        self.prepare(root.clone(), clone_url.clone()).await?;
        self.push_with_retry(root, request.destination_token.clone())
            .await?;

        snapshot.close();
        tracing::info!(
            source = %format!("{}/{}", request.source_owner, request.source_repo),
            destination = %request.destination_name,
            "migrated snapshot"
        );

        Ok(clone_url)
    }

    async fn prepare(&self, root: PathBuf, clone_url: String) -> Result<()> {
        let vcs = self.vcs.clone();
        let branch = self.config.default_branch.clone();
        let message = self.config.commit_message.clone();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), VcsError> {
            vcs.init(&root, &branch)?;
            vcs.add_remote(&root, REMOTE_NAME, &clone_url)?;
            vcs.commit_all(&root, &branch, &message)?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    /// Pushes with up to `push_attempts` tries, pausing `push_backoff`
    /// between them. Only transient network failures are retried.
    async fn push_with_retry(&self, root: PathBuf, token: HostToken) -> Result<()> {
        let retries = self.config.push_attempts.max(1) as usize - 1;
        let strategy = FixedInterval::new(self.config.push_backoff).take(retries);

        let push = || {
            let vcs = self.vcs.clone();
            let root = root.clone();
            let token = token.clone();
            let branch = self.config.default_branch.clone();
            async move {
                tokio::task::spawn_blocking(move || vcs.push(&root, REMOTE_NAME, &branch, &token))
                    .await?
                    .map_err(TransportError::from)
            }
        };

        RetryIf::spawn(strategy, push, |e: &TransportError| {
            let transient = matches!(e, TransportError::Vcs(vcs) if vcs.is_transient());
            if transient {
                tracing::warn!(error = %e, "push failed with a transient error");
            }
            transient
        })
        .await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeHost, FakeVcs};
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(branch: &str) -> MigrationRequest {
        MigrationRequest {
            source_owner: "alice".to_string(),
            source_repo: "widget".to_string(),
            branch: branch.to_string(),
            source_token: HostToken::new("gho_alice"),
            destination_token: HostToken::new("gho_bob"),
            destination_name: "0a1b2c3d4e5f-widget".to_string(),
        }
    }

    fn config(scratch: &TempDir) -> TransferConfig {
        let mut config = TransferConfig::new(scratch.path().to_path_buf());
        config.push_backoff = Duration::from_millis(1);
        config
    }

    fn scratch_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[test]
    fn test_parse_repository_url() {
        let expected = RepositoryPath {
            owner: "alice".to_string(),
            repo: "widget".to_string(),
        };
        for url in [
            "https://github.com/alice/widget",
            "https://github.com/alice/widget.git",
            "https://github.com/alice/widget/",
            "https://github.com/alice/widget.git/",
        ] {
            assert_eq!(parse_repository_url(url).unwrap(), expected, "{url}");
        }
    }

    #[test]
    fn test_parse_repository_url_rejects() {
        for url in [
            "",
            "not a url",
            "https://github.com/alice",
            "https://github.com/alice/widget/tree/main",
            "ftp://github.com/alice/widget",
            "https://github.com/alice/.git",
        ] {
            assert!(
                matches!(
                    parse_repository_url(url),
                    Err(TransportError::InvalidRepositoryUrl(_))
                ),
                "{url}"
            );
        }
    }

    #[test]
    fn test_destination_name() {
        let name = destination_name("widget");
        let (prefix, rest) = name.split_at(12);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "-widget");
        assert_ne!(destination_name("widget"), name);
    }

    #[tokio::test]
    async fn test_migrate_pushes_to_default_branch_and_cleans_up() {
        let scratch = TempDir::new().unwrap();
        let archive = build_zip(&[("alice-widget-abc/README.md", b"# widget")]);
        let host = Arc::new(FakeHost::with_archive("alice", "widget", "dev", archive));
        let vcs = Arc::new(FakeVcs::default());
        let transport = SnapshotTransport::new(host.clone(), vcs.clone(), config(&scratch));

        let url = transport.migrate(&request("dev")).await.unwrap();

        assert_eq!(url, "https://host.example/buyer/0a1b2c3d4e5f-widget.git");
        assert_eq!(
            *vcs.calls.lock().unwrap(),
            vec![
                "init main".to_string(),
                format!("remote origin {url}"),
                "commit main Imported from a marketplace purchase".to_string(),
                "push origin main".to_string(),
            ]
        );
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn test_download_failure_creates_nothing() {
        let scratch = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::default());
        let vcs = Arc::new(FakeVcs::default());
        let transport = SnapshotTransport::new(host.clone(), vcs.clone(), config(&scratch));

        let result = transport.migrate(&request("main")).await;

        assert!(matches!(
            result,
            Err(TransportError::SnapshotDownloadFailed { status: 404, .. })
        ));
        assert!(host.created.lock().unwrap().is_empty());
        assert!(vcs.calls.lock().unwrap().is_empty());
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_cleans_up() {
        let scratch = TempDir::new().unwrap();
        let archive = build_zip(&[("a/one.txt", b"1"), ("b/two.txt", b"2")]);
        let host = Arc::new(FakeHost::with_archive("alice", "widget", "main", archive));
        let transport =
            SnapshotTransport::new(host.clone(), Arc::new(FakeVcs::default()), config(&scratch));

        let result = transport.migrate(&request("main")).await;

        assert!(matches!(result, Err(TransportError::MalformedSnapshot(_))));
        assert!(host.created.lock().unwrap().is_empty());
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn test_transient_push_failure_is_retried() {
        let scratch = TempDir::new().unwrap();
        let archive = build_zip(&[("root/file.txt", b"x")]);
        let host = Arc::new(FakeHost::with_archive("alice", "widget", "main", archive));
        let vcs = Arc::new(FakeVcs {
            transient_push_failures: 2,
            ..FakeVcs::default()
        });
        let transport = SnapshotTransport::new(host, vcs.clone(), config(&scratch));

        transport.migrate(&request("main")).await.unwrap();

        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 3);
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn test_transient_push_failures_exhaust_attempts() {
        let scratch = TempDir::new().unwrap();
        let archive = build_zip(&[("root/file.txt", b"x")]);
        let host = Arc::new(FakeHost::with_archive("alice", "widget", "main", archive));
        let vcs = Arc::new(FakeVcs {
            transient_push_failures: 10,
            ..FakeVcs::default()
        });
        let transport = SnapshotTransport::new(host, vcs.clone(), config(&scratch));

        let result = transport.migrate(&request("main")).await;

        assert!(matches!(result, Err(TransportError::Vcs(_))));
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 3);
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn test_single_push_attempt_is_not_retried() {
        let scratch = TempDir::new().unwrap();
        let archive = build_zip(&[("root/file.txt", b"x")]);
        let host = Arc::new(FakeHost::with_archive("alice", "widget", "main", archive));
        let vcs = Arc::new(FakeVcs {
            transient_push_failures: 1,
            ..FakeVcs::default()
        });
        let mut config = config(&scratch);
        config.push_attempts = 1;
        let transport = SnapshotTransport::new(host, vcs.clone(), config);

        let result = transport.migrate(&request("main")).await;

        assert!(matches!(result, Err(TransportError::Vcs(_))));
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 1);
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn test_permanent_push_failure_is_not_retried() {
        let scratch = TempDir::new().unwrap();
        let archive = build_zip(&[("root/file.txt", b"x")]);
        let host = Arc::new(FakeHost::with_archive("alice", "widget", "main", archive));
        let vcs = Arc::new(FakeVcs {
            reject_push: true,
            ..FakeVcs::default()
        });
        let transport = SnapshotTransport::new(host, vcs.clone(), config(&scratch));

        let result = transport.migrate(&request("main")).await;

        assert!(matches!(result, Err(TransportError::Vcs(_))));
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_migrate_against_real_git() {
        let scratch = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let bare = remote_dir.path().join("dest.git");
        git2::Repository::init_bare(&bare).unwrap();

        struct LocalHost {
            inner: FakeHost,
            bare: String,
        }

        #[async_trait::async_trait]
        impl CodeHost for LocalHost {
            async fn download_snapshot(
                &self,
                owner: &str,
                repo: &str,
                branch: &str,
                token: &HostToken,
            ) -> Result<bytes::Bytes> {
                self.inner
                    .download_snapshot(owner, repo, branch, token)
                    .await
            }

            async fn create_repository(&self, _name: &str, _token: &HostToken) -> Result<String> {
                Ok(self.bare.clone())
            }
        }

        let archive = build_zip(&[
            ("alice-widget-abc/README.md", b"# widget"),
            ("alice-widget-abc/src/lib.rs", b"pub fn widget() {}"),
        ]);
        let host = Arc::new(LocalHost {
            inner: FakeHost::with_archive("alice", "widget", "dev", archive),
            bare: bare.to_str().unwrap().to_string(),
        });
        let transport = SnapshotTransport::new(host, Arc::new(Git2Vcs), config(&scratch));

        transport.migrate(&request("dev")).await.unwrap();

        let dest = git2::Repository::open_bare(&bare).unwrap();
        let head = dest.find_reference("refs/heads/main").unwrap();
        let tree = dest.find_commit(head.target().unwrap()).unwrap().tree().unwrap();
        assert!(tree.get_name("README.md").is_some());
        assert!(tree.get_path(std::path::Path::new("src/lib.rs")).is_ok());
        assert!(scratch_is_empty(&scratch));
    }
}
