//! Patch materialization: branch, one commit per patch, pull request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::PullRequestError;
use crate::event::RepairEvent;
use crate::host::{FileUpdate, HostError, PullRequestDraft, PullRequestRecord, RepositoryHost};
use crate::interpret::PatchCandidate;
use crate::patch::{
    apply_patch_to_content, commit_message, fallback_branch_name, pr_body, pr_title,
    primary_branch_name,
};

/// The branch a run's commits land on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairBranch {
    pub name: String,
    pub base_sha: String,
}

/// A patch that was logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPatch {
    /// 1-based position in the outcome.
    pub sequence: usize,
    pub file_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Materialized {
    pub pull_request: PullRequestRecord,
    pub branch: RepairBranch,
    pub applied: usize,
    pub skipped: Vec<SkippedPatch>,
}

pub struct PatchMaterializer {
    host: Arc<dyn RepositoryHost>,
    call_timeout: Duration,
}

impl PatchMaterializer {
    pub fn new(host: Arc<dyn RepositoryHost>, call_timeout: Duration) -> Self {
        Self { host, call_timeout }
    }

    /// Branch, commit every patch that applies, open the pull request.
    ///
    /// Partial branches and commits are left in place on failure.
    pub async fn materialize(
        &self,
        event: &RepairEvent,
        patches: &[PatchCandidate],
    ) -> Result<Materialized, PullRequestError> {
        let branch = self.create_branch(event).await?;
        info!(branch = %branch.name, base = %branch.base_sha, "created repair branch");

        let (applied, skipped) = self.apply_patches(event, &branch, patches).await;
        if applied.is_empty() {
            return Err(PullRequestError::NoPatchesApplied {
                attempted: patches.len(),
            });
        }

        let title = pr_title(&applied);
        let body = pr_body(&applied, event);
        let draft = PullRequestDraft {
            title: &title,
            body: &body,
            head: &branch.name,
            base: &event.head_branch,
        };
        let pull_request = self
            .call(self.host.create_pull_request(&event.repository, draft))
            .await
            .map_err(|err| {
                let err = PullRequestError::from(err);
                warn!(error = %err, remediation = err.remediation(), "pull request creation failed");
                err
            })?;
        info!(number = pull_request.number, url = %pull_request.url, "opened pull request");

        Ok(Materialized {
            pull_request,
            branch,
            applied: applied.len(),
            skipped,
        })
    }

    /// Create the deterministic branch, or a suffixed one when it exists.
    pub async fn create_branch(&self, event: &RepairEvent) -> Result<RepairBranch, PullRequestError> {
        let repo = &event.repository;
        let name = primary_branch_name(event);
        let base_sha = self
            .call(self.host.branch_tip(repo, &event.head_branch))
            .await?;

        match self.call(self.host.create_branch(repo, &name, &base_sha)).await {
            Ok(()) => Ok(RepairBranch { name, base_sha }),
            Err(err) if err.status() == Some(422) => {
                let fallback = fallback_branch_name(event);
                warn!(branch = %name, fallback = %fallback, "branch exists; retrying with fallback name");
                let creation_error = |err: HostError| PullRequestError::BranchCreation {
                    branch: fallback.clone(),
                    reason: err.to_string(),
                };
                let base_sha = self
                    .call(self.host.branch_tip(repo, &event.head_branch))
                    .await
                    .map_err(creation_error)?;
                self.call(self.host.create_branch(repo, &fallback, &base_sha))
                    .await
                    .map_err(creation_error)?;
                Ok(RepairBranch {
                    name: fallback,
                    base_sha,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn apply_patches(
        &self,
        event: &RepairEvent,
        branch: &RepairBranch,
        patches: &[PatchCandidate],
    ) -> (Vec<PatchCandidate>, Vec<SkippedPatch>) {
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for (index, patch) in patches.iter().enumerate() {
            let sequence = index + 1;
            match self.apply_one(event, branch, patch, sequence).await {
                Ok(()) => {
                    info!(patch = sequence, file = %patch.file_path, line = patch.line, "applied patch");
                    applied.push(patch.clone());
                }
                Err(reason) => {
                    warn!(patch = sequence, file = %patch.file_path, line = patch.line, reason = %reason, "skipping patch");
                    skipped.push(SkippedPatch {
                        sequence,
                        file_path: patch.file_path.clone(),
                        reason,
                    });
                }
            }
        }
        (applied, skipped)
    }

    async fn apply_one(
        &self,
        event: &RepairEvent,
        branch: &RepairBranch,
        patch: &PatchCandidate,
        sequence: usize,
    ) -> Result<(), String> {
        let repo = &event.repository;
        let existing = match self
            .call(self.host.get_file(repo, &patch.file_path, &branch.name))
            .await
        {
            Ok(file) => file,
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(format!("could not read file: {err}")),
        };
        if existing.is_none() {
            info!(file = %patch.file_path, "file not found on branch; creating it");
        }

        let current = existing.as_ref().map(|f| f.content.as_str()).unwrap_or("");
        let edit = apply_patch_to_content(current, patch).map_err(|err| err.to_string())?;
        if edit.mismatch {
            warn!(file = %patch.file_path, line = patch.line, "original content mismatch; annotated replacement");
        }

        let message = commit_message(patch, sequence);
        let update = FileUpdate {
            path: &patch.file_path,
            branch: &branch.name,
            message: &message,
            content: &edit.content,
            sha: existing.as_ref().map(|f| f.sha.as_str()),
        };
        self.call(self.host.put_file(repo, update))
            .await
            .map_err(|err| format!("could not commit file: {err}"))
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, HostError>
    where
        F: Future<Output = Result<T, HostError>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .unwrap_or(Err(HostError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RepositoryRef;
    use crate::fakes::MemoryHost;
    use crate::patch::MISMATCH_MARKER;

    fn event() -> RepairEvent {
        RepairEvent::new(
            9,
            RepositoryRef::new("octo", "widgets"),
            "CI",
            "cafebabe0123456789abcdef0123456789abcdef",
            "main",
        )
    }

    fn materializer(host: &Arc<MemoryHost>) -> PatchMaterializer {
        PatchMaterializer::new(host.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn happy_path_opens_a_pull_request() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.add_file("main", "src/a.c", "int main() {\n  return 1;\n}");

        let patches = vec![PatchCandidate::new("src/a.c", 2, "return 1;", "  return 0;", 0.9)];
        let done = materializer(&host).materialize(&event(), &patches).await.unwrap();

        assert_eq!(done.branch.name, "apr/fix-ci-cafebabe");
        assert_eq!(done.applied, 1);
        assert_eq!(
            host.file("apr/fix-ci-cafebabe", "src/a.c").unwrap(),
            "int main() {\n  return 0;\n}"
        );
        assert_eq!(done.pull_request.branch, "apr/fix-ci-cafebabe");
        assert!(done.pull_request.title.contains("1 patch"));
        assert_eq!(host.file("main", "src/a.c").unwrap(), "int main() {\n  return 1;\n}");
    }

    #[tokio::test]
    async fn existing_branch_is_never_reused() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.add_branch("apr/fix-ci-cafebabe", "old-sha");

        let branch = materializer(&host).create_branch(&event()).await.unwrap();
        assert!(branch.name.starts_with("apr/fix-ci-cafebabe-"));
        assert_eq!(host.branch_sha("apr/fix-ci-cafebabe").as_deref(), Some("old-sha"));
    }

    #[tokio::test]
    async fn second_conflict_aborts() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.fail_branch_creation(2);

        let err = materializer(&host).create_branch(&event()).await.unwrap_err();
        assert!(matches!(err, PullRequestError::BranchCreation { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_created_and_mismatch_annotated() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.add_file("main", "b.c", "a();\nb();");

        let patches = vec![
            PatchCandidate::new("new.c", 1, "", "int x;", 0.8),
            PatchCandidate::new("b.c", 2, "c();", "d();", 0.7),
        ];
        let done = materializer(&host).materialize(&event(), &patches).await.unwrap();
        assert_eq!(done.applied, 2);
        assert_eq!(host.file(&done.branch.name, "new.c").unwrap(), "int x;");
        assert_eq!(
            host.file(&done.branch.name, "b.c").unwrap(),
            format!("a();\nd(); {MISMATCH_MARKER}")
        );
    }

    #[tokio::test]
    async fn failing_writes_are_skipped_and_all_failing_is_an_error() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.fail_writes_to("locked.c");

        let patches = vec![
            PatchCandidate::new("locked.c", 1, "", "x", 0.9),
            PatchCandidate::new("ok.c", 1, "", "y", 0.9),
        ];
        let done = materializer(&host).materialize(&event(), &patches).await.unwrap();
        assert_eq!(done.applied, 1);
        assert_eq!(done.skipped.len(), 1);
        assert_eq!(done.skipped[0].sequence, 1);

        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.fail_writes_to("locked.c");
        let only_locked = vec![PatchCandidate::new("locked.c", 1, "", "x", 0.9)];
        let err = materializer(&host)
            .materialize(&event(), &only_locked)
            .await
            .unwrap_err();
        assert_eq!(err, PullRequestError::NoPatchesApplied { attempted: 1 });
        assert!(host.pull_requests().is_empty());
    }

    #[tokio::test]
    async fn patch_far_past_the_end_is_skipped() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.add_file("main", "a.c", "a();");

        let patches = vec![
            PatchCandidate::new("a.c", 20_000_000, "", "x();", 0.9),
            PatchCandidate::new("a.c", 1, "a();", "b();", 0.9),
        ];
        let done = materializer(&host).materialize(&event(), &patches).await.unwrap();
        assert_eq!(done.applied, 1);
        assert_eq!(done.skipped.len(), 1);
        assert_eq!(done.skipped[0].sequence, 1);
        assert!(done.skipped[0].reason.contains("past the end"));
        assert_eq!(host.file(&done.branch.name, "a.c").unwrap(), "b();");
    }

    #[tokio::test]
    async fn pull_request_status_is_classified() {
        let host = Arc::new(MemoryHost::new());
        host.add_branch("main", "base-sha");
        host.fail_pull_requests_with(403);

        let patches = vec![PatchCandidate::new("a.c", 1, "", "x", 0.9)];
        let err = materializer(&host).materialize(&event(), &patches).await.unwrap_err();
        assert!(matches!(err, PullRequestError::Forbidden { .. }));
    }
}
