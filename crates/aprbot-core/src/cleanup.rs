//! Resource release for a repair run.
//!
//! A [`ResourceCoordinator`] collects release callbacks (workspace
//! directories, downloaded archives) as they are acquired and runs each of
//! them exactly once: from [`ResourceCoordinator::execute_all`] in the
//! pipeline's finalizer, from `Drop` if the run was abandoned, or from the
//! process-wide termination handler when a signal arrives mid-run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde::Serialize;
use tracing::{debug, info, warn};

type ReleaseFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

struct Registration {
    label: String,
    release: ReleaseFn,
}

struct Inner {
    run_label: String,
    pending: Mutex<Vec<Registration>>,
}

impl Inner {
    fn take_pending(&self) -> Vec<Registration> {
        match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn release_pending(&self) -> ReleaseSummary {
        let pending = self.take_pending();
        let mut summary = ReleaseSummary::default();
        for Registration { label, release } in pending {
            match catch_unwind(AssertUnwindSafe(release)) {
                Ok(Ok(())) => {
                    debug!(run = %self.run_label, resource = %label, "released");
                    summary.released.push(label);
                }
                Ok(Err(err)) => {
                    warn!(run = %self.run_label, resource = %label, error = %err, "release failed");
                    summary.failed.push(ReleaseFailure {
                        label,
                        message: format!("{err:#}"),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(run = %self.run_label, resource = %label, panic = %message, "release panicked");
                    summary.failed.push(ReleaseFailure { label, message });
                }
            }
        }
        summary
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let summary = self.release_pending();
        if !summary.is_empty() {
            info!(
                run = %self.run_label,
                released = summary.released.len(),
                failed = summary.failed.len(),
                "released resources of an abandoned run"
            );
        }
    }
}

/// One release callback that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseFailure {
    pub label: String,
    pub message: String,
}

/// What a call to [`ResourceCoordinator::execute_all`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub released: Vec<String>,
    pub failed: Vec<ReleaseFailure>,
}

impl ReleaseSummary {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.failed.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-run registry of release callbacks. Clones share the same registry.
#[derive(Clone)]
pub struct ResourceCoordinator {
    inner: Arc<Inner>,
}

impl ResourceCoordinator {
    pub fn new(run_label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                run_label: run_label.into(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn run_label(&self) -> &str {
        &self.inner.run_label
    }

    /// Queue a release callback. Callbacks run in registration order.
    pub fn register<F>(&self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let registration = Registration {
            label: label.into(),
            release: Box::new(release),
        };
        match self.inner.pending.lock() {
            Ok(mut guard) => guard.push(registration),
            Err(poisoned) => poisoned.into_inner().push(registration),
        }
    }

    /// Remove `path` recursively on release; a missing directory is not an error.
    pub fn register_directory(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let label = format!("directory {}", path.display());
        self.register(label, move || remove_path(&path, true));
    }

    /// Remove a single file on release; a missing file is not an error.
    pub fn register_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let label = format!("file {}", path.display());
        self.register(label, move || remove_path(&path, false));
    }

    pub fn pending_count(&self) -> usize {
        match self.inner.pending.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Run every pending callback once. Failures and panics are logged and
    /// collected; later callbacks still run. A second call finds nothing to do.
    pub fn execute_all(&self) -> ReleaseSummary {
        self.inner.release_pending()
    }

    /// Make this run's resources reachable from the process-wide termination
    /// handler, installing the handler on first use.
    ///
    /// Returns `false` when handlers are disabled, when compiled for unit
    /// tests, or when no tokio runtime is running.
    pub fn install_termination_handlers(&self, enabled: bool) -> bool {
        if !enabled || cfg!(test) {
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime; termination handlers not installed");
            return false;
        };

        self.track_live_run();
        HANDLERS_INSTALLED.get_or_init(|| {
            handle.spawn(wait_for_termination());
            install_panic_hook();
            debug!("termination handlers installed");
        });
        true
    }

    /// Expose this run to [`release_all_live_runs`] until its last handle drops.
    fn track_live_run(&self) {
        let mut live = lock_registry();
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(&self.inner));
    }
}

/// Whether the process-wide signal task has been spawned.
pub fn termination_handlers_installed() -> bool {
    HANDLERS_INSTALLED.get().is_some()
}

impl std::fmt::Debug for ResourceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCoordinator")
            .field("run", &self.inner.run_label)
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn remove_path(path: &Path, recursive: bool) -> anyhow::Result<()> {
    let result = if recursive {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(anyhow::Error::new(err).context(format!("removing {}", path.display()))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

static LIVE_RUNS: OnceLock<Mutex<Vec<Weak<Inner>>>> = OnceLock::new();
static HANDLERS_INSTALLED: OnceLock<()> = OnceLock::new();

fn lock_registry() -> std::sync::MutexGuard<'static, Vec<Weak<Inner>>> {
    let registry = LIVE_RUNS.get_or_init(|| Mutex::new(Vec::new()));
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Release every live run's pending resources. Returns the failure count.
fn release_all_live_runs() -> usize {
    let live: Vec<Arc<Inner>> = {
        let Some(registry) = LIVE_RUNS.get() else {
            return 0;
        };
        // try_lock: a panic may have struck while the registry was held
        let Ok(mut guard) = registry.try_lock() else {
            return 0;
        };
        guard.drain(..).filter_map(|weak| weak.upgrade()).collect()
    };
    live.iter()
        .map(|inner| inner.release_pending().failed.len())
        .sum()
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm), Ok(mut sigquit)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) else {
        warn!("failed to register termination signal handlers");
        return;
    };

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    warn!(signal = name, "termination requested; releasing in-flight resources");
    let failures = release_all_live_runs();
    std::process::exit(if failures == 0 { 0 } else { 1 });
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!(signal = "ctrl-c", "termination requested; releasing in-flight resources");
        let failures = release_all_live_runs();
        std::process::exit(if failures == 0 { 0 } else { 1 });
    }
}

/// With `panic = "abort"` no destructor runs, so release from the hook.
#[cfg(panic = "abort")]
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        release_all_live_runs();
        default_hook(info);
    }));
}

#[cfg(not(panic = "abort"))]
fn install_panic_hook() {}
