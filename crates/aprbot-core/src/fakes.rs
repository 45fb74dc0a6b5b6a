//! In-memory implementations of the ports, for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::credential::{validate_installation_id, AccessToken, TokenSource};
use crate::error::{AuthenticationError, PullRequestError};
use crate::event::RepositoryRef;
use crate::host::{
    FileUpdate, HostConnector, HostError, PullRequestDraft, PullRequestRecord, RemoteFile,
    RepositoryHost,
};

#[derive(Default)]
struct HostState {
    /// branch -> tip sha
    branches: HashMap<String, String>,
    /// (branch, path) -> file
    files: HashMap<(String, String), RemoteFile>,
    pull_requests: Vec<PullRequestRecord>,
    calls: Vec<String>,
    branch_failures: usize,
    write_failures: HashSet<String>,
    pull_request_failure: Option<u16>,
}

fn status(status: u16, message: &str) -> HostError {
    HostError::Status {
        status,
        message: message.to_string(),
    }
}

fn new_sha() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A single repository host held in memory. Repository names are ignored.
#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_branch(&self, branch: &str, sha: &str) {
        self.state()
            .branches
            .insert(branch.to_string(), sha.to_string());
    }

    pub fn add_file(&self, branch: &str, path: &str, content: &str) {
        self.state().files.insert(
            (branch.to_string(), path.to_string()),
            RemoteFile {
                content: content.to_string(),
                sha: new_sha(),
            },
        );
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.state()
            .files
            .get(&(branch.to_string(), path.to_string()))
            .map(|f| f.content.clone())
    }

    pub fn branch_sha(&self, branch: &str) -> Option<String> {
        self.state().branches.get(branch).cloned()
    }

    pub fn branches(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().branches.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn pull_requests(&self) -> Vec<PullRequestRecord> {
        self.state().pull_requests.clone()
    }

    /// Every call made, as `"<method> <argument>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// The next `count` branch creations fail with 422.
    pub fn fail_branch_creation(&self, count: usize) {
        self.state().branch_failures = count;
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.state().write_failures.insert(path.to_string());
    }

    pub fn fail_pull_requests_with(&self, code: u16) {
        self.state().pull_request_failure = Some(code);
    }
}

#[async_trait]
impl RepositoryHost for MemoryHost {
    async fn branch_tip(&self, _repo: &RepositoryRef, branch: &str) -> Result<String, HostError> {
        let mut state = self.state();
        state.calls.push(format!("branch_tip {branch}"));
        state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| status(404, "Not Found"))
    }

    async fn create_branch(
        &self,
        _repo: &RepositoryRef,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        let mut state = self.state();
        state.calls.push(format!("create_branch {branch}"));
        if state.branch_failures > 0 {
            state.branch_failures -= 1;
            return Err(status(422, "Reference already exists"));
        }
        if state.branches.contains_key(branch) {
            return Err(status(422, "Reference already exists"));
        }

        let source = state
            .branches
            .iter()
            .find(|(_, tip)| tip.as_str() == sha)
            .map(|(name, _)| name.clone());
        if let Some(source) = source {
            let copied: Vec<_> = state
                .files
                .iter()
                .filter(|((b, _), _)| *b == source)
                .map(|((_, path), file)| ((branch.to_string(), path.clone()), file.clone()))
                .collect();
            state.files.extend(copied);
        }
        state.branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn get_file(
        &self,
        _repo: &RepositoryRef,
        path: &str,
        branch: &str,
    ) -> Result<Option<RemoteFile>, HostError> {
        let mut state = self.state();
        state.calls.push(format!("get_file {path}"));
        if !state.branches.contains_key(branch) {
            return Err(status(404, "No commit found for the ref"));
        }
        Ok(state
            .files
            .get(&(branch.to_string(), path.to_string()))
            .cloned())
    }

    async fn put_file(&self, _repo: &RepositoryRef, update: FileUpdate<'_>) -> Result<(), HostError> {
        let mut state = self.state();
        state.calls.push(format!("put_file {}", update.path));
        if state.write_failures.contains(update.path) {
            return Err(status(409, "is at a different sha"));
        }
        if !state.branches.contains_key(update.branch) {
            return Err(status(404, "Branch not found"));
        }

        let key = (update.branch.to_string(), update.path.to_string());
        match (state.files.get(&key), update.sha) {
            (Some(existing), Some(sha)) if existing.sha != sha => {
                return Err(status(409, "is at a different sha"))
            }
            (Some(_), None) => return Err(status(422, "\"sha\" wasn't supplied")),
            _ => {}
        }
        state.files.insert(
            key,
            RemoteFile {
                content: update.content.to_string(),
                sha: new_sha(),
            },
        );
        state
            .branches
            .insert(update.branch.to_string(), new_sha());
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        draft: PullRequestDraft<'_>,
    ) -> Result<PullRequestRecord, HostError> {
        let mut state = self.state();
        state.calls.push(format!("create_pull_request {}", draft.head));
        if let Some(code) = state.pull_request_failure {
            return Err(status(code, "pull request rejected"));
        }
        if !state.branches.contains_key(draft.head) || !state.branches.contains_key(draft.base) {
            return Err(status(422, "Validation Failed"));
        }
        let number = state.pull_requests.len() as u64 + 1;
        let record = PullRequestRecord {
            url: format!(
                "https://github.example/{}/{}/pull/{number}",
                repo.owner, repo.name
            ),
            number,
            title: draft.title.to_string(),
            body: draft.body.to_string(),
            branch: draft.head.to_string(),
        };
        state.pull_requests.push(record.clone());
        Ok(record)
    }
}

/// Hands out the same [`MemoryHost`] for any token.
pub struct MemoryHostConnector {
    host: Arc<MemoryHost>,
}

impl MemoryHostConnector {
    pub fn new(host: Arc<MemoryHost>) -> Self {
        Self { host }
    }
}

impl HostConnector for MemoryHostConnector {
    fn connect(&self, _token: &AccessToken) -> Result<Arc<dyn RepositoryHost>, PullRequestError> {
        Ok(self.host.clone())
    }
}

/// Token source returning a fixed token, or a fixed error.
pub struct StaticTokenSource {
    result: Result<String, AuthenticationError>,
    calls: AtomicUsize,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            result: Ok(token.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: AuthenticationError) -> Self {
        Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn installation_token(
        &self,
        installation_id: i64,
    ) -> Result<AccessToken, AuthenticationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        validate_installation_id(installation_id)?;
        self.result
            .as_ref()
            .map(|token| AccessToken::new(token.clone(), None))
            .map_err(Clone::clone)
    }
}
