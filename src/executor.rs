use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::ShellConfig;
use crate::security::{RiskLevel, SecurityValidator};
use crate::session::{Session, SessionRegistry};

/// Outcome of one command dispatch.
///
/// A timeout is a soft outcome, not an error: `success` stays true,
/// `timed_out` is set, and the eventual output lands in the session
/// transcript once the process finishes.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub session_id: Option<Uuid>,
}

/// Failures surfaced to the caller. Every variant is a structured result;
/// nothing propagates past the component boundary as a panic.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Security validation refused the command; no process was spawned.
    #[error("command rejected ({risk} risk): {reason}")]
    Rejected { reason: String, risk: RiskLevel },

    /// The supplied session id does not resolve.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// The interpreter could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
        elapsed: Duration,
    },

    /// Catch-all for failures while waiting on the process. Carries the
    /// elapsed time so callers can tell an instant failure from a slow one.
    #[error("command execution failed after {elapsed:?}: {source}")]
    Unhandled {
        #[source]
        source: std::io::Error,
        elapsed: Duration,
    },
}

/// Decode captured process output.
///
/// Strict UTF-8 first, then GBK for East-Asian legacy output, then
/// Windows-1252; if everything fails the bytes are decoded as UTF-8 with
/// replacement rather than erroring. Decode failures never abort a call.
pub fn decode_output(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    for encoding in [
        encoding_rs::UTF_8,
        encoding_rs::GBK,
        encoding_rs::WINDOWS_1252,
    ] {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Merge stdout and stderr into the single line stored in the transcript.
fn merge_output(stdout: &str, stderr: &str) -> String {
    let mut merged = stdout.trim().to_string();
    let err = stderr.trim();
    if !err.is_empty() {
        if !merged.is_empty() {
            merged.push('\n');
        }
        merged.push_str("error: ");
        merged.push_str(err);
    }
    merged
}

/// Dispatches validated commands to the external interpreter.
///
/// The executor is the only component that talks to a process. Each call
/// validates through the [`SecurityValidator`], resolves the session
/// through the [`SessionRegistry`], spawns the configured interpreter in
/// the effective working directory, and races completion against the
/// caller's timeout.
///
/// Timed-out processes are deliberately NOT killed: the caller gets an
/// early soft-timeout result while a harvest task waits for the process
/// and appends its eventual output to the session transcript, so a later
/// output poll reflects the late completion.
pub struct CommandExecutor {
    registry: SessionRegistry,
    validator: Arc<SecurityValidator>,
    shell: ShellConfig,
}

impl CommandExecutor {
    pub fn new(
        registry: SessionRegistry,
        validator: Arc<SecurityValidator>,
        shell: ShellConfig,
    ) -> Self {
        Self {
            registry,
            validator,
            shell,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    /// Run `command` with a bounded wait.
    ///
    /// `working_directory` always wins over the session's recorded
    /// directory; the session's stored value is never mutated. With no
    /// session and no directory the interpreter inherits the process cwd.
    pub async fn execute(
        &self,
        session_id: Option<Uuid>,
        command: &str,
        timeout: Duration,
        working_directory: Option<&Path>,
    ) -> Result<ExecutionResult, ExecError> {
        // Fail fast before any process is touched: no partial side effects.
        let verdict = self.validator.validate_command(command);
        if !verdict.allowed {
            return Err(ExecError::Rejected {
                reason: verdict.reason,
                risk: verdict.risk,
            });
        }
        if verdict.risk == RiskLevel::Medium {
            tracing::warn!(command, reason = %verdict.reason, "command allowed with warning");
        }

        let time_verdict = self.validator.check_time_limit(timeout);
        if !time_verdict.allowed {
            return Err(ExecError::Rejected {
                reason: time_verdict.reason,
                risk: time_verdict.risk,
            });
        }

        let session = match session_id {
            Some(id) => Some(
                self.registry
                    .get_session(id)
                    .ok_or(ExecError::SessionNotFound(id))?,
            ),
            None => None,
        };

        // The most recently supplied directory wins, independent of the
        // session's stored value.
        let cwd: Option<PathBuf> = working_directory
            .map(Path::to_path_buf)
            .or_else(|| session.as_ref().map(|s| s.working_directory.clone()));
        if let Some(ref dir) = cwd {
            let path_verdict = self.validator.validate_path_safety(&dir.to_string_lossy());
            if !path_verdict.allowed {
                return Err(ExecError::Rejected {
                    reason: format!("working directory {}: {}", dir.display(), path_verdict.reason),
                    risk: path_verdict.risk,
                });
            }
        }

        let start = Instant::now();
        let mut cmd = Command::new(&self.shell.program);
        cmd.args(&self.shell.args)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = cwd {
            cmd.current_dir(dir);
        }
        // kill_on_drop stays off: a timed-out child keeps running so its
        // output can still be harvested into the transcript.

        let child = cmd.spawn().map_err(|e| ExecError::Spawn {
            program: self.shell.program.clone(),
            source: e,
            elapsed: start.elapsed(),
        })?;

        tracing::debug!(
            session = ?session_id,
            command,
            timeout_secs = timeout.as_secs_f64(),
            "dispatching command"
        );

        let mut wait = Box::pin(child.wait_with_output());
        tokio::select! {
            result = &mut wait => {
                let output = result.map_err(|e| ExecError::Unhandled {
                    source: e,
                    elapsed: start.elapsed(),
                })?;
                let elapsed = start.elapsed();
                let stdout = decode_output(&output.stdout).trim().to_string();
                let stderr = decode_output(&output.stderr).trim().to_string();
                let merged = merge_output(&stdout, &stderr);

                if let Some(ref session) = session {
                    session.transcript().append(format!("$ {command}\n{merged}"));
                    self.registry
                        .update_activity(session.id, command, elapsed, Some(&merged));
                }

                Ok(ExecutionResult {
                    success: output.status.success(),
                    timed_out: false,
                    exit_code: output.status.code(),
                    stdout,
                    stderr,
                    duration: elapsed,
                    session_id,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                let placeholder = format!(
                    "command still running after {:.0}s timeout",
                    timeout.as_secs_f64()
                );
                if let Some(ref session) = session {
                    session.transcript().append(format!("$ {command}\n[{placeholder}]"));
                }
                // Session statistics are not updated for a timed-out call;
                // the harvest below folds the eventual output into the
                // transcript for later polling.
                self.harvest_late_output(wait, session.as_ref(), command);
                tracing::info!(session = ?session_id, command, "command timed out (left running)");

                Ok(ExecutionResult {
                    success: true,
                    timed_out: true,
                    exit_code: None,
                    stdout: placeholder,
                    stderr: String::new(),
                    duration: start.elapsed(),
                    session_id,
                })
            }
        }
    }

    /// Convenience over [`execute`](Self::execute) with the configured
    /// fixed short timeout and no directory override.
    pub async fn append_command(
        &self,
        session_id: Uuid,
        command: &str,
    ) -> Result<ExecutionResult, ExecError> {
        let timeout = self.registry.limits().append_timeout();
        self.execute(Some(session_id), command, timeout, None).await
    }

    /// Keep waiting on a timed-out child in the background and append its
    /// eventual output to the transcript. Also reaps the child so a
    /// session-less timeout doesn't leave a zombie.
    fn harvest_late_output<F>(&self, wait: std::pin::Pin<Box<F>>, session: Option<&Session>, command: &str)
    where
        F: std::future::Future<Output = std::io::Result<std::process::Output>> + Send + 'static,
    {
        let transcript = session.map(|s| s.transcript().clone());
        let command = command.to_string();
        tokio::spawn(async move {
            match wait.await {
                Ok(output) => {
                    if let Some(transcript) = transcript {
                        let stdout = decode_output(&output.stdout).trim().to_string();
                        let stderr = decode_output(&output.stderr).trim().to_string();
                        let merged = merge_output(&stdout, &stderr);
                        let code = output
                            .status
                            .code()
                            .map_or_else(|| "signal".to_string(), |c| c.to_string());
                        transcript.append(format!(
                            "$ {command}\n[completed after timeout, exit {code}]\n{merged}"
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!(command, "failed to collect late output: {e}");
                }
            }
        });
    }
}
