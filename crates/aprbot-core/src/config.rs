//! Process configuration, loaded once at start and shared by `Arc`.
//!
//! Components receive the pieces they need through their constructors; nothing
//! in this crate reads the environment after [`AppConfig::from_env`] returns.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CLONE_URL: &str = "https://github.com";
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://github.com/arusinova/apr-project/releases/download/v1.0.4";

const DEFAULT_ENGINE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_PATCHES: usize = 10;

/// GitHub App identity and endpoints.
#[derive(Debug)]
pub struct GitHubAppConfig {
    pub app_id: u64,
    pub private_key: SecretString,
    pub webhook_secret: SecretString,
    pub api_base_url: String,
    pub clone_base_url: String,
    /// Deadline applied to every REST call made while materializing patches.
    pub api_timeout: Duration,
}

/// Where to find the analysis engine and how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Checked in order; the first usable entry wins.
    pub search_paths: Vec<PathBuf>,
    pub download_url: String,
    pub install_dir: PathBuf,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub max_patches: usize,
}

impl EngineConfig {
    /// Search paths used when `APR_BINARY_PATHS` is not set.
    pub fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("/app/bin/apr_system"),
            PathBuf::from("./bin/apr_system"),
        ];
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join("bin").join("apr_system"));
        }
        paths
    }
}

impl EngineConfig {
    /// Engine settings alone, without the App credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Ok(Self {
            search_paths: get("APR_BINARY_PATHS")
                .map(|raw| std::env::split_paths(&raw).collect())
                .unwrap_or(defaults.search_paths),
            download_url: get("APR_DOWNLOAD_URL").unwrap_or(defaults.download_url),
            install_dir: get("APR_INSTALL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.install_dir),
            timeout: Duration::from_millis(parse_number(
                &get,
                "APR_TIMEOUT",
                DEFAULT_ENGINE_TIMEOUT_MS,
            )?),
            max_output_bytes: parse_number(&get, "APR_MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)?,
            max_patches: parse_number(&get, "APR_MAX_PATCHES", DEFAULT_MAX_PATCHES)?,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            install_dir: std::env::current_dir()
                .map(|cwd| cwd.join("bin"))
                .unwrap_or_else(|_| PathBuf::from("bin")),
            timeout: Duration::from_millis(DEFAULT_ENGINE_TIMEOUT_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_patches: DEFAULT_MAX_PATCHES,
        }
    }
}

/// Host-process behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Parent directory for per-run workspaces.
    pub work_root: PathBuf,
    pub install_signal_handlers: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir(),
            install_signal_handlers: true,
        }
    }
}

/// Complete configuration for one bot process.
#[derive(Debug)]
pub struct AppConfig {
    pub github: GitHubAppConfig,
    pub engine: EngineConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = ["APP_ID", "PRIVATE_KEY", "WEBHOOK_SECRET"]
            .iter()
            .filter(|key| get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let app_id_raw = get("APP_ID").unwrap_or_default();
        let app_id = app_id_raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber {
                var: "APP_ID".to_string(),
                value: app_id_raw.clone(),
            })?;

        let private_key = normalize_private_key(&get("PRIVATE_KEY").unwrap_or_default());
        if !has_pem_markers(&private_key) {
            return Err(ConfigError::MalformedPrivateKey);
        }

        let github = GitHubAppConfig {
            app_id,
            private_key: SecretString::from(private_key),
            webhook_secret: SecretString::from(get("WEBHOOK_SECRET").unwrap_or_default()),
            api_base_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            clone_base_url: get("GITHUB_CLONE_URL")
                .unwrap_or_else(|| DEFAULT_CLONE_URL.to_string()),
            api_timeout: Duration::from_secs(parse_number(
                &get,
                "GITHUB_API_TIMEOUT_SECS",
                DEFAULT_API_TIMEOUT_SECS,
            )?),
        };

        let engine = EngineConfig::from_lookup(&lookup)?;

        let runtime_defaults = RuntimeConfig::default();
        let runtime = RuntimeConfig {
            work_root: get("APR_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(runtime_defaults.work_root),
            install_signal_handlers: match get("APR_SIGNAL_HANDLERS") {
                None => runtime_defaults.install_signal_handlers,
                Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidBool {
                    var: "APR_SIGNAL_HANDLERS".to_string(),
                    value: raw,
                })?,
            },
        };

        Ok(Self {
            github,
            engine,
            runtime,
        })
    }

    /// The configured private key, for the token provider.
    pub fn private_key_pem(&self) -> &str {
        self.github.private_key.expose_secret()
    }
}

/// Env files frequently carry the PEM with literal `\n` escapes.
pub fn normalize_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

/// Cheap structural check that catches most copy/paste mistakes.
pub fn has_pem_markers(key: &str) -> bool {
    key.contains("BEGIN") && key.contains("END")
}

fn parse_number<G, T>(get: &G, var: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
