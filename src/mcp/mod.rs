pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use uuid::Uuid;

use crate::executor::{CommandExecutor, ExecError, ExecutionResult};
use crate::session::{Session, SessionRegistry};

use tools::{
    AppendCommandParams, CreateSessionParams, DestroySessionParams, ExecuteCommandParams,
    GetSessionOutputParams, ListSessionsParams, RunParams,
};

/// Shared state handed to the MCP handler by the composition root.
#[derive(Clone)]
pub struct ServerState {
    pub registry: SessionRegistry,
    pub executor: Arc<CommandExecutor>,
}

/// Wrap a JSON value as successful MCP text content.
fn json_content(value: serde_json::Value) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string(&value).unwrap_or_default(),
    )]))
}

/// Parse a session id parameter. A string that is not a UUID at all is a
/// malformed request rather than a missing session.
fn parse_session_id(raw: &str) -> Result<Uuid, ErrorData> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ErrorData::invalid_params(format!("invalid session id: {raw}"), None))
}

/// Fold an execution outcome into the JSON shape callers consume.
///
/// Domain failures (rejection, unknown session, spawn errors) come back as
/// `success: false` payloads rather than protocol errors, so a remote
/// caller always receives a structured result.
fn exec_json(outcome: Result<ExecutionResult, ExecError>, command: &str) -> serde_json::Value {
    match outcome {
        Ok(result) => serde_json::json!({
            "success": result.success,
            "timeout": result.timed_out,
            "exit_code": result.exit_code,
            "stdout": result.stdout,
            "stderr": result.stderr,
            "execution_time": result.duration.as_secs_f64(),
            "command": command,
            "session_id": result.session_id.map(|id| id.to_string()),
        }),
        Err(ExecError::Rejected { reason, risk }) => serde_json::json!({
            "success": false,
            "error": format!("security validation failed: {reason}"),
            "risk_level": risk.to_string(),
            "command": command,
        }),
        Err(ExecError::SessionNotFound(id)) => serde_json::json!({
            "success": false,
            "error": format!("session not found: {id}"),
            "command": command,
        }),
        Err(err) => {
            let elapsed = match &err {
                ExecError::Spawn { elapsed, .. } | ExecError::Unhandled { elapsed, .. } => *elapsed,
                _ => Duration::ZERO,
            };
            serde_json::json!({
                "success": false,
                "error": err.to_string(),
                "execution_time": elapsed.as_secs_f64(),
                "command": command,
            })
        }
    }
}

// ── MCP server ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MshServer {
    state: ServerState,
    tool_router: ToolRouter<MshServer>,
}

impl MshServer {
    pub fn new(state: ServerState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    fn get_session(&self, raw_id: &str) -> Result<(Uuid, Option<Session>), ErrorData> {
        let id = parse_session_id(raw_id)?;
        Ok((id, self.state.registry.get_session(id)))
    }

    fn timeout_from(&self, secs: Option<u64>) -> Duration {
        secs.map(Duration::from_secs)
            .unwrap_or_else(|| self.state.registry.limits().default_timeout())
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for MshServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "msh".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Security-gated shell command sessions: create sessions bound to a \
                     working directory, run commands with bounded waits, and poll \
                     transcripts for output that outlives the wait."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use msh_run for one-shot commands (it creates a session for you). For a \
                 longer exchange, msh_create_session once, then msh_execute_command or \
                 msh_append_command against the returned session id. If a command times \
                 out it keeps running in the background; poll msh_get_session_output to \
                 see its eventual result. msh_list_sessions shows what is alive; \
                 msh_destroy_session cleans up."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl MshServer {
    /// Create a new session bound to an absolute working directory.
    #[tool(description = "Create a new command session bound to an absolute working directory. Returns the session id used by every other tool. Fails when the active-session ceiling is reached; destroy an old session first.")]
    async fn msh_create_session(
        &self,
        Parameters(params): Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let verdict = self
            .state
            .executor
            .validator()
            .validate_path_safety(&params.working_directory);
        if !verdict.allowed {
            return json_content(serde_json::json!({
                "success": false,
                "error": format!("invalid working directory: {}", verdict.reason),
                "risk_level": verdict.risk.to_string(),
            }));
        }

        match self.state.registry.create_session(&params.working_directory) {
            Ok(session) => json_content(serde_json::json!({
                "success": true,
                "session_id": session.id.to_string(),
                "created_at": session.created_at.to_rfc3339(),
                "status": session.status().to_string(),
                "working_directory": session.working_directory.display().to_string(),
            })),
            Err(e) => json_content(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            })),
        }
    }

    /// Execute a command in an existing session with a bounded wait.
    #[tool(description = "Execute a command in an existing session. The command is security-validated first; denylisted or dangerous commands are rejected with a risk level. On timeout the call returns early with timeout=true while the command keeps running; poll msh_get_session_output for its eventual output.")]
    async fn msh_execute_command(
        &self,
        Parameters(params): Parameters<ExecuteCommandParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = parse_session_id(&params.session_id)?;
        let timeout = self.timeout_from(params.timeout_secs);
        let outcome = self
            .state
            .executor
            .execute(
                Some(id),
                &params.command,
                timeout,
                params.working_directory.as_deref().map(std::path::Path::new),
            )
            .await;
        json_content(exec_json(outcome, &params.command))
    }

    /// Execute a command with the fixed short timeout.
    #[tool(description = "Execute a command in an existing session with the fixed short timeout (default 3s). Convenience over msh_execute_command for quick follow-up commands; slower commands come back with timeout=true and finish in the background.")]
    async fn msh_append_command(
        &self,
        Parameters(params): Parameters<AppendCommandParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = parse_session_id(&params.session_id)?;
        let outcome = self.state.executor.append_command(id, &params.command).await;
        json_content(exec_json(outcome, &params.command))
    }

    /// Return a session's full transcript and metadata.
    #[tool(description = "Get the full output transcript of a session plus its metadata (working directory, creation time, last command, status). Includes output from commands that finished after their execute call timed out.")]
    async fn msh_get_session_output(
        &self,
        Parameters(params): Parameters<GetSessionOutputParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let (id, session) = self.get_session(&params.session_id)?;
        match session {
            Some(session) => {
                let snap = session.snapshot();
                json_content(serde_json::json!({
                    "success": true,
                    "session_id": id.to_string(),
                    "output": session.transcript().render(),
                    "output_lines": session.transcript().len(),
                    "output_lines_dropped": session.transcript().dropped(),
                    "working_directory": snap.working_directory,
                    "created_at": snap.created_at.to_rfc3339(),
                    "last_command": snap.last_command,
                    "status": snap.status.to_string(),
                }))
            }
            None => json_content(serde_json::json!({
                "success": false,
                "error": format!("session not found: {id}"),
            })),
        }
    }

    /// Destroy a session.
    #[tool(description = "Destroy a session by id. Returns success=false if the id is unknown (or already destroyed).")]
    async fn msh_destroy_session(
        &self,
        Parameters(params): Parameters<DestroySessionParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = parse_session_id(&params.session_id)?;
        let destroyed = self.state.registry.destroy_session(id);
        json_content(serde_json::json!({
            "success": destroyed,
            "message": if destroyed {
                format!("session {id} destroyed")
            } else {
                format!("session {id} not found")
            },
        }))
    }

    /// List session summaries and aggregate statistics.
    #[tool(description = "List all sessions with per-session summaries (status, working directory, command count, last command) plus aggregate statistics. Set include_expired=true to also show expired/terminated sessions not yet swept.")]
    async fn msh_list_sessions(
        &self,
        Parameters(params): Parameters<ListSessionsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let sessions = self.state.registry.list_sessions(params.include_expired);
        let stats = self.state.registry.stats();
        let total_count = sessions.len();
        json_content(serde_json::json!({
            "success": true,
            "sessions": sessions,
            "total_count": total_count,
            "stats": stats,
        }))
    }

    /// Create a session and run one command in it.
    #[tool(description = "Run a command in a freshly created session (create + execute in one step). Returns the execution result together with the new session's id and metadata, so follow-up commands can reuse the session.")]
    async fn msh_run(
        &self,
        Parameters(params): Parameters<RunParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let verdict = self
            .state
            .executor
            .validator()
            .validate_path_safety(&params.working_directory);
        if !verdict.allowed {
            return json_content(serde_json::json!({
                "success": false,
                "error": format!("invalid working directory: {}", verdict.reason),
                "risk_level": verdict.risk.to_string(),
            }));
        }

        let session = match self.state.registry.create_session(&params.working_directory) {
            Ok(session) => session,
            Err(e) => {
                return json_content(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                }))
            }
        };

        let timeout = self.timeout_from(params.timeout_secs);
        let outcome = self
            .state
            .executor
            .execute(Some(session.id), &params.command, timeout, None)
            .await;

        let mut value = exec_json(outcome, &params.command);
        value["session_id"] = serde_json::json!(session.id.to_string());
        value["session_info"] = serde_json::json!({
            "session_id": session.id.to_string(),
            "created_at": session.created_at.to_rfc3339(),
            "status": session.status().to_string(),
            "working_directory": session.working_directory.display().to_string(),
        });
        json_content(value)
    }
}
