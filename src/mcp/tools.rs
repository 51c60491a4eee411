// MCP tool parameter types

use serde::Deserialize;

/// Parameters for the `msh_create_session` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateSessionParams {
    /// Working directory the session is bound to. Must be an absolute path.
    #[schemars(description = "Absolute working directory the session is bound to.")]
    pub working_directory: String,
}

/// Parameters for the `msh_execute_command` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteCommandParams {
    /// The id of the target session.
    #[schemars(description = "The id of the target session.")]
    pub session_id: String,

    /// The command text to execute.
    #[schemars(description = "The command to execute. Validated against the security policy before anything is spawned.")]
    pub command: String,

    /// Execution timeout in seconds. Defaults to 30; ceiling 300.
    #[schemars(description = "Execution timeout in seconds. Defaults to 30. Values above the configured ceiling (default 300) are rejected.")]
    pub timeout_secs: Option<u64>,

    /// Working directory override for this command only.
    #[schemars(description = "Absolute directory to run this command in. Overrides the session's directory for this call only; the session's recorded directory is not changed.")]
    pub working_directory: Option<String>,
}

/// Parameters for the `msh_append_command` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AppendCommandParams {
    /// The id of the target session.
    #[schemars(description = "The id of the target session.")]
    pub session_id: String,

    /// The command text to execute with the fixed short timeout.
    #[schemars(description = "The command to execute. Runs with a fixed short timeout (default 3s); poll msh_get_session_output for anything slower.")]
    pub command: String,
}

/// Parameters for the `msh_get_session_output` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetSessionOutputParams {
    /// The id of the target session.
    #[schemars(description = "The id of the target session.")]
    pub session_id: String,
}

/// Parameters for the `msh_destroy_session` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DestroySessionParams {
    /// The id of the session to destroy.
    #[schemars(description = "The id of the session to destroy.")]
    pub session_id: String,
}

/// Parameters for the `msh_list_sessions` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListSessionsParams {
    /// Include expired/terminated sessions in the listing.
    #[serde(default)]
    #[schemars(description = "Include expired and terminated sessions that have not been removed yet. Defaults to false.")]
    pub include_expired: bool,
}

/// Parameters for the `msh_run` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RunParams {
    /// The command text to execute.
    #[schemars(description = "The command to execute in a freshly created session.")]
    pub command: String,

    /// Working directory for the new session. Must be an absolute path.
    #[schemars(description = "Absolute working directory for the new session.")]
    pub working_directory: String,

    /// Execution timeout in seconds. Defaults to 30; ceiling 300.
    #[schemars(description = "Execution timeout in seconds. Defaults to 30. Values above the configured ceiling (default 300) are rejected.")]
    pub timeout_secs: Option<u64>,
}
