//! Error taxonomy for the repair pipeline.
//!
//! Every stage raises a tagged error at the point of failure. Credential,
//! workspace and materialization failures are fatal to a run and travel up as
//! [`RepairError`]. Analysis-stage failures ([`AnalysisExecutionError`],
//! [`ResultParsingError`]) never abort a run: they are carried on the
//! [`crate::AnalysisOutcome`] so the pipeline can report instead of crash.

use serde::Serialize;

use crate::host::HostError;

/// Configuration could not be loaded or validated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid {var}: '{value}' is not a valid number")]
    InvalidNumber { var: String, value: String },

    #[error("invalid {var}: '{value}' is not a valid boolean")]
    InvalidBool { var: String, value: String },

    #[error("PRIVATE_KEY appears to be malformed: it must include BEGIN and END markers")]
    MalformedPrivateKey,
}

/// A repair event failed validation before any stage ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("invalid installation id {0}: must be a positive number")]
    InvalidInstallation(i64),

    #[error("event field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("head sha `{0}` is not a 40-character hex commit hash")]
    InvalidSha(String),
}

/// Installation token exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("invalid installation id {id}: must be a positive number")]
    InvalidInstallation { id: i64 },

    #[error("private key appears to be malformed: it must include BEGIN and END markers")]
    MalformedKey,

    #[error("failed to sign app token: {0}")]
    Signing(String),

    #[error("installation token exchange timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("identity service rejected the app credentials (401)")]
    InvalidCredentials,

    #[error("installation {id} not found (404)")]
    InstallationNotFound { id: i64 },

    #[error("identity service denied the token request (403)")]
    Forbidden,

    #[error("identity service returned {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("identity service unreachable: {0}")]
    Transport(String),

    #[error("identity service accepted the request but returned no token")]
    MissingToken,
}

impl AuthenticationError {
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::InvalidInstallation { .. } => {
                "check the installation id carried by the webhook payload"
            }
            Self::MalformedKey | Self::Signing(_) => {
                "verify PRIVATE_KEY holds the app's PEM key including BEGIN/END lines"
            }
            Self::Timeout { .. } | Self::Transport(_) => {
                "check network connectivity and GitHub API status"
            }
            Self::InvalidCredentials => "verify APP_ID and PRIVATE_KEY belong to the same GitHub App",
            Self::InstallationNotFound { .. } => {
                "the installation id may be stale or the app is no longer installed on the repository"
            }
            Self::Forbidden => "the app lacks permissions or the API rate limit was exceeded",
            Self::UnexpectedStatus { .. } | Self::MissingToken => {
                "retry later; inspect GitHub API status if this persists"
            }
        }
    }
}

/// The repository snapshot could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory {path}: {message}")]
    CreateDir { path: String, message: String },

    #[error("git is not available: {0}")]
    GitUnavailable(String),

    #[error("repository clone timed out after {secs}s")]
    CloneTimeout { secs: u64 },

    #[error("git authentication failed while cloning")]
    AuthenticationFailed,

    #[error("repository {repository} not found or not accessible")]
    RepositoryNotFound { repository: String },

    #[error("failed to clone repository: {0}")]
    CloneFailed(String),

    #[error("failed to check out {sha}: {detail}")]
    CheckoutFailed { sha: String, detail: String },

    #[error("checkout timed out after {secs}s")]
    CheckoutTimeout { secs: u64 },
}

impl WorkspaceError {
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::CreateDir { .. } => "verify APR_WORK_DIR exists, is writable and has free space",
            Self::GitUnavailable(_) => "install git on the host and make sure it is on PATH",
            Self::CloneTimeout { .. } => {
                "the repository may be too large or the network too slow for a 120s clone"
            }
            Self::AuthenticationFailed => "check APP_ID and PRIVATE_KEY and the app's contents permission",
            Self::RepositoryNotFound { .. } => {
                "make sure the app is installed on the repository and it still exists"
            }
            Self::CloneFailed(_) => "inspect the git error above; the remote may be unavailable",
            Self::CheckoutFailed { .. } => {
                "the commit may have been removed by a force-push after the workflow ran"
            }
            Self::CheckoutTimeout { .. } => "the working tree is unusually large; retry the run",
        }
    }
}

/// The analysis engine is only published for Linux hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("unsupported platform: {platform}; the analysis engine is only available for linux")]
pub struct UnsupportedPlatformError {
    pub platform: String,
}

/// The analysis engine could not be located, fetched or run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisExecutionError {
    #[error("analysis timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("analysis engine not found: {detail}")]
    EngineNotFound { detail: String },

    #[error("permission denied executing {path}")]
    PermissionDenied { path: String },

    #[error("analysis engine exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("analysis engine exceeded the {limit_bytes} byte output limit")]
    OutputLimitExceeded { limit_bytes: usize },

    #[error("failed to download analysis engine: {message}")]
    Download { message: String },

    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatformError),

    #[error("failed to prepare analysis: {message}")]
    Io { message: String },
}

impl AnalysisExecutionError {
    pub fn remediation(&self) -> String {
        match self {
            Self::Timeout { secs } => format!(
                "apr analysis timed out after {secs}s; the repository may be too large or complex for automated analysis"
            ),
            Self::EngineNotFound { .. } => {
                "ensure the apr binary is deployed at one of the search paths or that the release download is reachable".to_string()
            }
            Self::PermissionDenied { .. } => {
                "check file permissions and execution rights on the apr binary".to_string()
            }
            Self::NonZeroExit { code } => format!(
                "apr binary failed with exit code {code}; check repository structure and build requirements"
            ),
            Self::OutputLimitExceeded { .. } => {
                "the engine produced too much output; run it with less verbosity or raise APR_MAX_OUTPUT_BYTES".to_string()
            }
            Self::Download { .. } => {
                "check network connectivity or pre-install the binary under APR_INSTALL_DIR".to_string()
            }
            Self::UnsupportedPlatform(_) => {
                "run the bot on a linux host or deploy the binary manually".to_string()
            }
            Self::Io { .. } => "verify disk space and permissions of the workspace".to_string(),
        }
    }
}

/// The engine's result document could not be read or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultParsingError {
    #[error("apr results file not found: {path}")]
    MissingFile { path: String },

    #[error("invalid JSON in apr results file: {message}")]
    MalformedJson { message: String },

    #[error("permission denied reading apr results file {path}")]
    PermissionDenied { path: String },

    #[error("apr results parsing error: {message}")]
    Other { message: String },
}

impl ResultParsingError {
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::MissingFile { .. } => {
                "the engine may have failed silently or crashed before writing its results"
            }
            Self::MalformedJson { .. } => {
                "the engine produced malformed output; check its execution logs for details"
            }
            Self::PermissionDenied { .. } => "check file permissions on the engine output directory",
            Self::Other { .. } => "inspect the results file manually",
        }
    }
}

/// Branch, commit or pull request creation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PullRequestError {
    #[error("validation failed (422): {message}")]
    Validation { message: String },

    #[error("forbidden (403): {message}")]
    Forbidden { message: String },

    #[error("not found (404): {message}")]
    NotFound { message: String },

    #[error("unauthorized (401): {message}")]
    Unauthorized { message: String },

    #[error("conflict (409): {message}")]
    Conflict { message: String },

    #[error("GitHub API request timed out")]
    Timeout,

    #[error("GitHub API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("GitHub API unreachable: {message}")]
    Transport { message: String },

    #[error("failed to create branch even with fallback name {branch}: {reason}")]
    BranchCreation { branch: String, reason: String },

    #[error("none of the {attempted} patches could be applied")]
    NoPatchesApplied { attempted: usize },
}

impl PullRequestError {
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::Validation { .. } => {
                "branch may already exist, validation failed, or repository settings prevent pull requests"
            }
            Self::Forbidden { .. } => {
                "insufficient permissions, rate limit exceeded, or the repository is archived"
            }
            Self::NotFound { .. } => {
                "repository not found, not accessible, or the app is not installed"
            }
            Self::Unauthorized { .. } => "authentication failed; the installation token may have expired",
            Self::Conflict { .. } => "conflict with an existing branch or pull request",
            Self::Timeout | Self::Transport { .. } => "check network connectivity and GitHub API status",
            Self::Api { .. } => "inspect the GitHub API response above",
            Self::BranchCreation { .. } => {
                "delete stale apr/fix-ci-* branches or check the app's contents permission"
            }
            Self::NoPatchesApplied { .. } => {
                "the target files could not be read or written; inspect the per-patch warnings"
            }
        }
    }
}

impl From<HostError> for PullRequestError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Status { status, message } => match status {
                422 => Self::Validation { message },
                403 => Self::Forbidden { message },
                404 => Self::NotFound { message },
                401 => Self::Unauthorized { message },
                409 => Self::Conflict { message },
                _ => Self::Api { status, message },
            },
            HostError::Timeout => Self::Timeout,
            HostError::Transport(message) | HostError::Decode(message) => {
                Self::Transport { message }
            }
        }
    }
}

/// Fatal failure of a repair run.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("invalid repair event: {0}")]
    Event(#[from] EventError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("workspace acquisition failed: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("failed to create pull request: {0}")]
    PullRequest(#[from] PullRequestError),
}

impl RepairError {
    /// Actionable hint for the operator.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::Event(_) => "check the webhook payload that triggered the run",
            Self::Config(_) => "verify environment variables and configuration",
            Self::Authentication(e) => e.remediation(),
            Self::Workspace(e) => e.remediation(),
            Self::PullRequest(e) => e.remediation(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RepairError>;
