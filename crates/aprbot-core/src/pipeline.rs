//! The repair run: credential, workspace, analysis, interpretation,
//! materialization, with resource release around the whole sequence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use crate::analysis::AnalysisInvoker;
use crate::cleanup::{ReleaseSummary, ResourceCoordinator};
use crate::config::AppConfig;
use crate::credential::TokenSource;
use crate::error::{RepairError, Result};
use crate::event::RepairEvent;
use crate::host::{HostConnector, PullRequestRecord};
use crate::interpret::AnalysisOutcome;
use crate::materialize::{PatchMaterializer, RepairBranch, SkippedPatch};
use crate::workspace::WorkspaceAcquirer;

/// What a completed run hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: AnalysisOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<RepairBranch>,
    pub applied_patches: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_patches: Vec<SkippedPatch>,
    pub release: ReleaseSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct StageResults {
    outcome: Option<AnalysisOutcome>,
    pull_request: Option<PullRequestRecord>,
    branch: Option<RepairBranch>,
    applied: usize,
    skipped: Vec<SkippedPatch>,
}

pub struct RepairPipeline {
    config: Arc<AppConfig>,
    tokens: Arc<dyn TokenSource>,
    hosts: Arc<dyn HostConnector>,
    acquirer: WorkspaceAcquirer,
    invoker: AnalysisInvoker,
}

impl RepairPipeline {
    pub fn new(
        config: Arc<AppConfig>,
        tokens: Arc<dyn TokenSource>,
        hosts: Arc<dyn HostConnector>,
    ) -> Self {
        let acquirer = WorkspaceAcquirer::new(
            config.runtime.work_root.clone(),
            config.github.clone_base_url.clone(),
        );
        let invoker = AnalysisInvoker::new(&config.engine);
        Self {
            config,
            tokens,
            hosts,
            acquirer,
            invoker,
        }
    }

    pub fn with_invoker(mut self, invoker: AnalysisInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    /// Execute one repair attempt.
    ///
    /// Resources acquired along the way are released before this returns,
    /// whether the run succeeded or failed.
    pub async fn run(&self, event: &RepairEvent) -> Result<RunReport> {
        event.validate()?;

        let span = info_span!(
            "aprbot.run",
            owner = %event.repository.owner,
            repo = %event.repository.name,
            sha = %event.short_sha(),
            installation = event.installation_id,
        );
        self.run_validated(event).instrument(span).await
    }

    async fn run_validated(&self, event: &RepairEvent) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(workflow = %event.workflow_name, branch = %event.head_branch, "repair run started");

        let coordinator =
            ResourceCoordinator::new(format!("{}@{}", event.repository, event.short_sha()));
        coordinator.install_termination_handlers(self.config.runtime.install_signal_handlers);

        let result = self.run_stages(event, &coordinator).await;
        let release = coordinator.execute_all();
        info!(
            released = release.released.len(),
            failed = release.failed.len(),
            "run resources released"
        );

        let stages = result.map_err(|err| {
            error!(error = %err, remediation = err.remediation(), "repair run failed");
            err
        })?;

        let outcome = stages.outcome.unwrap_or_else(|| AnalysisOutcome {
            success: false,
            patches: Vec::new(),
            error_message: None,
            failure: None,
            tally: Default::default(),
        });
        let report = RunReport {
            outcome,
            pull_request: stages.pull_request,
            branch: stages.branch,
            applied_patches: stages.applied,
            skipped_patches: stages.skipped,
            release,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            success = report.outcome.success,
            pull_request = report.pull_request.as_ref().map(|pr| pr.url.as_str()),
            "repair run finished"
        );
        Ok(report)
    }

    async fn run_stages(
        &self,
        event: &RepairEvent,
        coordinator: &ResourceCoordinator,
    ) -> std::result::Result<StageResults, RepairError> {
        let mut results = StageResults::default();

        info!(stage = "credential", "requesting installation token");
        let token = self
            .tokens
            .installation_token(event.installation_id)
            .await?;
        info!(stage = "credential", token = %token.fingerprint(), "installation token acquired");

        info!(stage = "workspace", "acquiring workspace");
        let workspace = self.acquirer.acquire(event, &token, coordinator).await?;

        info!(stage = "analysis", "running analysis");
        let mut outcome = self.invoker.analyze(event, &workspace, coordinator).await;
        let dropped = outcome.cap_patches(self.config.engine.max_patches);
        if dropped > 0 {
            info!(
                stage = "analysis",
                dropped,
                kept = outcome.patches.len(),
                "patch cap applied"
            );
        }

        if !outcome.is_actionable() {
            info!(
                stage = "analysis",
                reason = outcome.error_message.as_deref().unwrap_or("no patches"),
                "analysis unsuccessful; no pull request will be created"
            );
            results.outcome = Some(outcome);
            return Ok(results);
        }

        info!(stage = "materialize", patches = outcome.patches.len(), "materializing patches");
        let host = self.hosts.connect(&token)?;
        let materializer = PatchMaterializer::new(host, self.config.github.api_timeout);
        let done = materializer.materialize(event, &outcome.patches).await?;

        results.outcome = Some(outcome);
        results.pull_request = Some(done.pull_request);
        results.branch = Some(done.branch);
        results.applied = done.applied;
        results.skipped = done.skipped;
        Ok(results)
    }
}
