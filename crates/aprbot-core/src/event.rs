//! The repair event: one failed workflow run, one repair attempt.

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Owner/name pair identifying a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A validated CI failure handed over by the webhook layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairEvent {
    pub installation_id: i64,
    pub repository: RepositoryRef,
    pub workflow_name: String,
    pub head_sha: String,
    pub head_branch: String,
}

impl RepairEvent {
    pub fn new(
        installation_id: i64,
        repository: RepositoryRef,
        workflow_name: impl Into<String>,
        head_sha: impl Into<String>,
        head_branch: impl Into<String>,
    ) -> Self {
        Self {
            installation_id,
            repository,
            workflow_name: workflow_name.into(),
            head_sha: head_sha.into(),
            head_branch: head_branch.into(),
        }
    }

    /// Check the boundary contract before any stage runs.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.installation_id <= 0 {
            return Err(EventError::InvalidInstallation(self.installation_id));
        }
        if self.repository.owner.trim().is_empty() {
            return Err(EventError::EmptyField("repository.owner"));
        }
        if self.repository.name.trim().is_empty() {
            return Err(EventError::EmptyField("repository.name"));
        }
        if self.head_branch.trim().is_empty() {
            return Err(EventError::EmptyField("headBranch"));
        }
        if self.head_sha.len() != 40 || !self.head_sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EventError::InvalidSha(self.head_sha.clone()));
        }
        Ok(())
    }

    /// First 8 characters of the head commit.
    pub fn short_sha(&self) -> &str {
        self.head_sha.get(..8).unwrap_or(&self.head_sha)
    }

    /// Public (credential-free) URL of the repository.
    pub fn public_url(&self) -> String {
        format!(
            "https://github.com/{}/{}",
            self.repository.owner, self.repository.name
        )
    }
}
