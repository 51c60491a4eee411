use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level msh config, loaded from TOML.
///
/// Every policy constant the session core consumes lives here; the
/// composition root passes the relevant sections to each component
/// explicitly. There are no process-wide config globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Interpreter used to run commands.
    #[serde(default)]
    pub shell: ShellConfig,
    /// Session and validation limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// The external interpreter commands are handed to.
///
/// The command string is appended as a single trailing argument after
/// `args`, so the default Unix config runs `sh -c '<command>'` and the
/// Windows default runs `powershell -NoLogo -NoProfile -Command <command>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Interpreter executable.
    #[serde(default = "default_shell_program")]
    pub program: String,
    /// Arguments placed before the command string.
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell_program(),
            args: default_shell_args(),
        }
    }
}

#[cfg(not(windows))]
fn default_shell_program() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(not(windows))]
fn default_shell_args() -> Vec<String> {
    vec!["-c".to_string()]
}

#[cfg(windows)]
fn default_shell_program() -> String {
    "powershell".to_string()
}

#[cfg(windows)]
fn default_shell_args() -> Vec<String> {
    vec![
        "-NoLogo".to_string(),
        "-NoProfile".to_string(),
        "-Command".to_string(),
    ]
}

/// Session-lifecycle and validation ceilings.
///
/// Durations are stored as integer seconds so the TOML stays readable;
/// accessor methods convert to [`Duration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrently active sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// A session idle for longer than this is expired by the sweep.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// A session idle for longer than this (but not yet expired) is
    /// marked idle on the next sweep or list.
    #[serde(default = "default_idle_after_secs")]
    pub idle_after_secs: u64,
    /// Interval between background sweep passes.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Ceiling on the per-command execution timeout.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
    /// Default per-command execution timeout when the caller omits one.
    #[serde(default = "default_command_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Fixed short timeout used by the append-command convenience op.
    #[serde(default = "default_append_timeout_secs")]
    pub append_timeout_secs: u64,
    /// Maximum accepted command length in characters.
    #[serde(default = "default_max_command_len")]
    pub max_command_len: usize,
    /// Maximum number of retained transcript entries per session.
    #[serde(default = "default_transcript_cap")]
    pub transcript_cap: usize,
    /// Stored last-result text is truncated to this many characters.
    #[serde(default = "default_result_cap")]
    pub result_cap: usize,
}

fn default_max_sessions() -> usize {
    5
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_idle_after_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_timeout_secs() -> u64 {
    300
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_append_timeout_secs() -> u64 {
    3
}

fn default_max_command_len() -> usize {
    1000
}

fn default_transcript_cap() -> usize {
    1000
}

fn default_result_cap() -> usize {
    500
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_timeout_secs: default_session_timeout_secs(),
            idle_after_secs: default_idle_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            default_timeout_secs: default_command_timeout_secs(),
            append_timeout_secs: default_append_timeout_secs(),
            max_command_len: default_max_command_len(),
            transcript_cap: default_transcript_cap(),
            result_cap: default_result_cap(),
        }
    }
}

impl LimitsConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn append_timeout(&self) -> Duration {
        Duration::from_secs(self.append_timeout_secs)
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(std::path::PathBuf, std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    ParseFailed(std::path::PathBuf, toml::de::Error),
}
