//! APRBOT core: turns a failed CI run into a reviewable pull request.
//!
//! A run flows Credential → Workspace → Analysis → Interpretation →
//! Materialization. [`RepairPipeline::run`] drives it, and a
//! [`ResourceCoordinator`] releases everything the run acquired regardless of
//! where it stopped.
//!
//! The GitHub-facing adapters live in `aprbot-github`; this crate talks to
//! them through [`TokenSource`], [`RepositoryHost`] and [`HostConnector`].

pub mod analysis;
pub mod cleanup;
pub mod config;
pub mod credential;
pub mod error;
pub mod event;
pub mod fakes;
pub mod host;
pub mod interpret;
pub mod materialize;
pub mod patch;
pub mod pipeline;
pub mod process;
pub mod telemetry;
pub mod workspace;

pub use analysis::{AnalysisInvoker, EngineLocator};
pub use cleanup::{ReleaseFailure, ReleaseSummary, ResourceCoordinator};
pub use config::{AppConfig, EngineConfig, GitHubAppConfig, RuntimeConfig};
pub use credential::{AccessToken, TokenSource};
pub use error::{
    AnalysisExecutionError, AuthenticationError, ConfigError, EventError, PullRequestError,
    RepairError, Result, ResultParsingError, UnsupportedPlatformError, WorkspaceError,
};
pub use event::{RepairEvent, RepositoryRef};
pub use host::{HostConnector, HostError, PullRequestRecord, RemoteFile, RepositoryHost};
pub use interpret::{AnalysisFailure, AnalysisOutcome, PatchCandidate, PipelineResults};
pub use materialize::{PatchMaterializer, RepairBranch};
pub use pipeline::{RepairPipeline, RunReport};
pub use telemetry::init_tracing;
pub use workspace::{Workspace, WorkspaceAcquirer};
