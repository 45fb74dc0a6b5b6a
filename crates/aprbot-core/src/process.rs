//! Bounded subprocess execution.
//!
//! Every external command (git, tar, the analysis engine) runs through
//! [`run_command`]: stdin closed, both streams captured up to a byte cap, a
//! hard deadline, and the child killed if the future is dropped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// What to run and under which limits.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Per-stream cap.
    pub max_output_bytes: usize,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: BTreeMap::new(),
            timeout,
            max_output_bytes: 1024 * 1024,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program} timed out after {}ms", timeout.as_millis())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} not found")]
    NotFound { program: String },

    #[error("permission denied executing {program}")]
    PermissionDenied { program: String },

    #[error("{program} exceeded the {limit} byte output limit")]
    OutputLimit { program: String, limit: usize },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a command to completion under the limits in `spec`.
pub async fn run_command(spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let start = Instant::now();
    let program = spec.program.display().to_string();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound {
            program: program.clone(),
        },
        std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied {
            program: program.clone(),
        },
        _ => ProcessError::Io {
            program: program.clone(),
            source,
        },
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let limit = spec.max_output_bytes;

    let run = async {
        let (out, err, status) = tokio::try_join!(
            read_capped(stdout, limit),
            read_capped(stderr, limit),
            child.wait(),
        )?;
        Ok::<_, std::io::Error>((out, err, status))
    };

    let result = tokio::time::timeout(spec.timeout, run).await;
    let (out, err, status) = match result {
        Ok(Ok(done)) => done,
        Ok(Err(source)) => return Err(ProcessError::Io { program, source }),
        Err(_) => {
            let _ = child.start_kill();
            return Err(ProcessError::Timeout {
                program,
                timeout: spec.timeout,
            });
        }
    };

    if out.len() > limit || err.len() > limit {
        return Err(ProcessError::OutputLimit { program, limit });
    }

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Read at most `limit + 1` bytes so overflow is detectable, then drain.
async fn read_capped<R>(stream: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let Some(mut stream) = stream else {
        return Ok(buf);
    };
    (&mut stream).take((limit as u64).saturating_add(1)).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
    }
    Ok(buf)
}
