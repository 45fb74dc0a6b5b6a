//! Analysis engine discovery, installation and invocation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cleanup::ResourceCoordinator;
use crate::config::EngineConfig;
use crate::error::{AnalysisExecutionError, UnsupportedPlatformError};
use crate::event::RepairEvent;
use crate::interpret::{parse_results_file, AnalysisOutcome, RESULTS_FILE_NAME};
use crate::process::{run_command, CommandSpec, ProcessError};
use crate::workspace::Workspace;

pub const ENGINE_BINARY_NAME: &str = "apr_system";
pub const LINUX_ARCHIVE_NAME: &str = "apr-system-linux-x64.tar.gz";
pub const OUTPUT_DIR_NAME: &str = "apr-output";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

/// Finds a usable engine binary, downloading the release archive once if
/// none of the search paths has one.
#[derive(Debug, Clone)]
pub struct EngineLocator {
    search_paths: Vec<PathBuf>,
    download_url: String,
    install_dir: PathBuf,
    platform: String,
}

impl EngineLocator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            search_paths: config.search_paths.clone(),
            download_url: config.download_url.clone(),
            install_dir: config.install_dir.clone(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Override the detected host platform.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Release archive URL for this platform.
    pub fn archive_url(&self) -> Result<String, UnsupportedPlatformError> {
        if self.platform != "linux" {
            return Err(UnsupportedPlatformError {
                platform: self.platform.clone(),
            });
        }
        Ok(format!(
            "{}/{LINUX_ARCHIVE_NAME}",
            self.download_url.trim_end_matches('/')
        ))
    }

    /// Where a downloaded engine is unpacked.
    pub fn installed_path(&self) -> PathBuf {
        self.install_dir.join(ENGINE_BINARY_NAME)
    }

    /// First search path holding an executable (or chmod-able) file, then a
    /// previously downloaded binary in the install directory.
    pub async fn find_local(&self) -> Option<PathBuf> {
        let installed = self.installed_path();
        let extra = (!self.search_paths.contains(&installed)).then_some(&installed);
        for candidate in self.search_paths.iter().chain(extra) {
            debug!(path = %candidate.display(), "checking for engine binary");
            if ensure_executable(candidate).await {
                return Some(candidate.clone());
            }
        }
        None
    }

    pub async fn locate(
        &self,
        coordinator: &ResourceCoordinator,
    ) -> Result<PathBuf, AnalysisExecutionError> {
        if let Some(path) = self.find_local().await {
            info!(path = %path.display(), "found engine binary");
            return Ok(path);
        }
        info!("no local engine binary; downloading release archive");
        self.download(coordinator).await.map_err(|err| match err {
            AnalysisExecutionError::Download { message } => AnalysisExecutionError::Download {
                message: format!(
                    "checked paths: {}; {message}",
                    self.search_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
            other => other,
        })
    }

    async fn download(
        &self,
        coordinator: &ResourceCoordinator,
    ) -> Result<PathBuf, AnalysisExecutionError> {
        let url = self.archive_url()?;
        let download_error = |message: String| AnalysisExecutionError::Download { message };

        tokio::fs::create_dir_all(&self.install_dir)
            .await
            .map_err(|e| AnalysisExecutionError::Io {
                message: format!("creating {}: {e}", self.install_dir.display()),
            })?;

        let archive = self.install_dir.join(LINUX_ARCHIVE_NAME);
        coordinator.register_file(&archive);

        info!(url = %url, path = %archive.display(), "downloading engine archive");
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| download_error(e.to_string()))?;
        let bytes = client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| download_error(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        tokio::fs::write(&archive, &bytes)
            .await
            .map_err(|e| download_error(format!("writing {}: {e}", archive.display())))?;

        let extract = CommandSpec::new("tar", EXTRACT_TIMEOUT).args([
            "-xzf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            self.install_dir.display().to_string(),
        ]);
        let output = run_command(&extract)
            .await
            .map_err(|e| download_error(format!("extracting archive: {e}")))?;

        if let Err(err) = tokio::fs::remove_file(&archive).await {
            warn!(path = %archive.display(), error = %err, "could not remove engine archive");
        }
        if !output.success() {
            return Err(download_error(format!(
                "tar exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let binary = self.installed_path();
        if !ensure_executable(&binary).await {
            return Err(AnalysisExecutionError::EngineNotFound {
                detail: format!("archive did not contain {}", binary.display()),
            });
        }
        info!(path = %binary.display(), "installed engine binary");
        Ok(binary)
    }
}

#[cfg(unix)]
async fn ensure_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    if metadata.permissions().mode() & 0o111 != 0 {
        return true;
    }
    match tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await {
        Ok(()) => {
            info!(path = %path.display(), "made engine binary executable");
            true
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "engine binary is not executable");
            false
        }
    }
}

#[cfg(not(unix))]
async fn ensure_executable(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Runs the engine against a workspace and interprets what it wrote.
#[derive(Debug, Clone)]
pub struct AnalysisInvoker {
    locator: EngineLocator,
    timeout: Duration,
    max_output_bytes: usize,
}

impl AnalysisInvoker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            locator: EngineLocator::new(config),
            timeout: config.timeout,
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn with_locator(mut self, locator: EngineLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn locator(&self) -> &EngineLocator {
        &self.locator
    }

    /// Never fails: every problem becomes an unsuccessful outcome.
    pub async fn analyze(
        &self,
        event: &RepairEvent,
        workspace: &Workspace,
        coordinator: &ResourceCoordinator,
    ) -> AnalysisOutcome {
        match self.execute(event, workspace, coordinator).await {
            Ok(results_path) => parse_results_file(&results_path).await,
            Err(err) => {
                warn!(error = %err, remediation = %err.remediation(), "analysis failed");
                AnalysisOutcome::from_execution_error(err)
            }
        }
    }

    async fn execute(
        &self,
        event: &RepairEvent,
        workspace: &Workspace,
        coordinator: &ResourceCoordinator,
    ) -> Result<PathBuf, AnalysisExecutionError> {
        let engine = self.locator.locate(coordinator).await?;

        let output_dir = workspace.root_path.join(OUTPUT_DIR_NAME);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| AnalysisExecutionError::Io {
                message: format!("creating {}: {e}", output_dir.display()),
            })?;

        let spec = CommandSpec::new(&engine, self.timeout)
            .arg("--repo-url")
            .arg(event.public_url())
            .arg("--output-dir")
            .arg(output_dir.display().to_string())
            .arg("--verbose")
            .cwd(&workspace.repo_path)
            .max_output_bytes(self.max_output_bytes);

        info!(engine = %engine.display(), cwd = %workspace.repo_path.display(), "running analysis engine");
        let output = run_command(&spec).await.map_err(|err| match err {
            ProcessError::Timeout { timeout, .. } => AnalysisExecutionError::Timeout {
                secs: timeout.as_secs_f64().ceil() as u64,
            },
            ProcessError::NotFound { program } => AnalysisExecutionError::EngineNotFound {
                detail: program,
            },
            ProcessError::PermissionDenied { program } => {
                AnalysisExecutionError::PermissionDenied { path: program }
            }
            ProcessError::OutputLimit { limit, .. } => {
                AnalysisExecutionError::OutputLimitExceeded { limit_bytes: limit }
            }
            ProcessError::Io { source, .. } => AnalysisExecutionError::Io {
                message: source.to_string(),
            },
        })?;

        debug!(stdout = %output.stdout, stderr = %output.stderr, "engine output");
        if !output.success() {
            return Err(AnalysisExecutionError::NonZeroExit {
                code: output.exit_code,
            });
        }
        info!(duration_ms = output.duration_ms, "analysis engine finished");
        Ok(output_dir.join(RESULTS_FILE_NAME))
    }
}
