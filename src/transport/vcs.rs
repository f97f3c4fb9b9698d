use std::path::Path;

use git2::{
    Cred, ErrorClass, IndexAddOption, PushOptions, RemoteCallbacks, Repository,
    RepositoryInitOptions, Signature,
};
use thiserror::Error;

use crate::credentials::HostToken;

const COMMITTER_NAME: &str = "codemart";
const COMMITTER_EMAIL: &str = "transfers@codemart.local";
const TOKEN_USERNAME: &str = "x-access-token";

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git {operation} failed: {source}")]
    Git {
        operation: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("push rejected for {reference}: {message}")]
    PushRejected { reference: String, message: String },
}

impl VcsError {
    fn git(operation: &'static str) -> impl FnOnce(git2::Error) -> Self {
        move |source| Self::Git { operation, source }
    }

    /// Network-level failures worth another attempt. Rejections and local
    /// errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Git { source, .. } => matches!(
                source.class(),
                ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl
            ),
            Self::PushRejected { .. } => false,
        }
    }
}

/// The handful of version-control operations a migration needs.
///
/// Calls are blocking; callers run them on the blocking pool.
pub trait VersionControl: Send + Sync {
    fn init(&self, dir: &Path, branch: &str) -> Result<(), VcsError>;

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), VcsError>;

    /// Stages every file, ignored ones included, and commits on `branch`.
    /// Returns the commit id.
    fn commit_all(&self, dir: &Path, branch: &str, message: &str) -> Result<String, VcsError>;

    fn push(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        token: &HostToken,
    ) -> Result<(), VcsError>;
}

/// `VersionControl` over libgit2.
#[derive(Debug, Clone, Default)]
pub struct Git2Vcs;

impl VersionControl for Git2Vcs {
    fn init(&self, dir: &Path, branch: &str) -> Result<(), VcsError> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch);
        Repository::init_opts(dir, &opts).map_err(VcsError::git("init"))?;
        Ok(())
    }

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), VcsError> {
        let repo = Repository::open(dir).map_err(VcsError::git("open"))?;
        repo.remote(name, url).map_err(VcsError::git("remote add"))?;
        Ok(())
    }

    fn commit_all(&self, dir: &Path, branch: &str, message: &str) -> Result<String, VcsError> {
        let repo = Repository::open(dir).map_err(VcsError::git("open"))?;

        let mut index = repo.index().map_err(VcsError::git("index"))?;
        index
            .add_all(["*"], IndexAddOption::FORCE, None)
            .map_err(VcsError::git("add"))?;
        index.write().map_err(VcsError::git("add"))?;
        let tree_id = index.write_tree().map_err(VcsError::git("write-tree"))?;
        let tree = repo.find_tree(tree_id).map_err(VcsError::git("write-tree"))?;

        let sig =
            Signature::now(COMMITTER_NAME, COMMITTER_EMAIL).map_err(VcsError::git("commit"))?;
        let refname = format!("refs/heads/{branch}");
        let oid = repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &[])
            .map_err(VcsError::git("commit"))?;
        repo.set_head(&refname).map_err(VcsError::git("checkout"))?;

        Ok(oid.to_string())
    }

    fn push(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        token: &HostToken,
    ) -> Result<(), VcsError> {
        let repo = Repository::open(dir).map_err(VcsError::git("open"))?;
        let mut remote = repo.find_remote(remote).map_err(VcsError::git("remote"))?;
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");

        let mut rejection: Option<(String, String)> = None;
        {
            let mut credential_attempts = 0;
            let mut callbacks = RemoteCallbacks::new();
            callbacks.credentials(|_url, _username, _allowed| {
                credential_attempts += 1;
                if credential_attempts > 1 {
                    return Err(git2::Error::from_str("code host rejected the credentials"));
                }
                Cred::userpass_plaintext(TOKEN_USERNAME, token.expose())
            });
            callbacks.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    rejection = Some((reference.to_string(), message.to_string()));
                }
                Ok(())
            });

            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut opts))
                .map_err(VcsError::git("push"))?;
        }

        if let Some((reference, message)) = rejection {
            return Err(VcsError::PushRejected { reference, message });
        }
        Ok(())
    }
}
