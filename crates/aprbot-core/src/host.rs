//! Port to the repository host's REST surface.
//!
//! The materializer only talks to the host through [`RepositoryHost`]; the
//! GitHub adapter lives in `aprbot-github` and an in-memory implementation in
//! [`crate::fakes`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::AccessToken;
use crate::error::PullRequestError;
use crate::event::RepositoryRef;

/// Transport-level failure of a host call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("host returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("host request timed out")]
    Timeout,

    #[error("host unreachable: {0}")]
    Transport(String),

    #[error("unexpected host response: {0}")]
    Decode(String),
}

impl HostError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// A file read from a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Decoded UTF-8 content.
    pub content: String,
    /// Blob sha, required by the host to update the file.
    pub sha: String,
}

/// Write request for a single file on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate<'a> {
    pub path: &'a str,
    pub branch: &'a str,
    pub message: &'a str,
    pub content: &'a str,
    /// `None` creates the file.
    pub sha: Option<&'a str>,
}

/// Request for a new pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub head: &'a str,
    pub base: &'a str,
}

/// Terminal artifact of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub url: String,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub branch: String,
}

#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Commit sha at the tip of `branch`.
    async fn branch_tip(&self, repo: &RepositoryRef, branch: &str) -> Result<String, HostError>;

    /// Create `refs/heads/<branch>` pointing at `sha`.
    async fn create_branch(
        &self,
        repo: &RepositoryRef,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError>;

    /// Read `path` on `branch`; `Ok(None)` when it does not exist.
    async fn get_file(
        &self,
        repo: &RepositoryRef,
        path: &str,
        branch: &str,
    ) -> Result<Option<RemoteFile>, HostError>;

    /// Create or update a file, producing one commit.
    async fn put_file(&self, repo: &RepositoryRef, update: FileUpdate<'_>) -> Result<(), HostError>;

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        draft: PullRequestDraft<'_>,
    ) -> Result<PullRequestRecord, HostError>;
}

/// Builds a host client authenticated with an installation token.
pub trait HostConnector: Send + Sync {
    fn connect(&self, token: &AccessToken) -> Result<Arc<dyn RepositoryHost>, PullRequestError>;
}
