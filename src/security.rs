use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::config::LimitsConfig;

/// Command verbs that are never allowed to reach the interpreter.
///
/// Matched case-insensitively on word boundaries anywhere in the command,
/// so `stop-service` inside a pipeline is caught but a filename like
/// `stop-services.log` is not.
const DENIED_COMMANDS: &[&str] = &[
    // destructive filesystem / volume operations
    "format-volume",
    "diskpart",
    "takeown",
    "icacls",
    "attrib",
    // execution-policy changes
    "set-executionpolicy",
    // registry edits
    "new-itemproperty",
    "set-itemproperty",
    "remove-itemproperty",
    "new-psdrive",
    "remove-psdrive",
    // service and process management
    "start-service",
    "stop-service",
    "restart-service",
    "set-service",
    "new-service",
    "remove-service",
    "invoke-webrequest",
    "invoke-restmethod",
    "start-process",
    "stop-process",
    // user and group management
    "new-localuser",
    "remove-localuser",
    "set-localuser",
    "add-localgroupmember",
    "remove-localgroupmember",
    // machine-level operations
    "restart-computer",
    "stop-computer",
    "disable-computerrestore",
    "enable-computerrestore",
    "checkpoint-computer",
    "restore-computer",
    // arbitrary / remote code execution primitives
    "invoke-expression",
    "iex",
    "invoke-command",
    "start-job",
    "receive-job",
];

/// First tokens considered safe: read-only queries, pipeline plumbing,
/// ordinary file edits. A command starting with anything else is still
/// accepted, just flagged at medium risk.
const SAFE_COMMANDS: &[&str] = &[
    // information queries
    "get-process",
    "get-service",
    "get-eventlog",
    "get-wmiobject",
    "get-ciminstance",
    "get-computerinfo",
    "get-systeminfo",
    "get-location",
    "get-childitem",
    "get-item",
    "get-content",
    "get-member",
    "get-variable",
    "get-alias",
    "get-command",
    "get-help",
    "get-history",
    "get-psdrive",
    "get-module",
    // pipeline basics
    "write-output",
    "write-host",
    "write-information",
    "select-object",
    "where-object",
    "foreach-object",
    "sort-object",
    "group-object",
    "measure-object",
    "compare-object",
    "tee-object",
    // file operations
    "new-item",
    "copy-item",
    "move-item",
    "rename-item",
    "set-content",
    "add-content",
    "clear-content",
    "remove-item",
    "set-location",
    "set-variable",
    // string and data processing
    "select-string",
    "convertto-json",
    "convertfrom-json",
    "convertto-csv",
    "convertfrom-csv",
    "convertto-xml",
    "out-string",
    "out-gridview",
    "out-file",
    // probes
    "test-path",
    "test-connection",
    "test-netconnection",
    // basic system info
    "hostname",
    "whoami",
    "date",
    "get-date",
    "get-timezone",
    "get-culture",
    // common unix equivalents
    "echo",
    "pwd",
    "ls",
    "cat",
    "env",
    "uname",
];

/// Regexes matched against the lower-cased command text. Any hit is a
/// high-risk rejection.
const DANGER_PATTERNS: &[&str] = &[
    r"rm\s+-r",             // recursive delete
    r"del\s+/[sq]",         // windows bulk delete
    r"format\s+[a-z]:",     // format a drive
    r"reg\s+(add|delete)",  // registry edits
    r"net\s+(user|localgroup)",
    r"sc\s+(create|delete|config)",
    r"wmic\s+.*delete",
    r"powershell\s+-enc",   // encoded invocation
    r"iex\s*\(",
    r"&\s*\(",
    r"\|\s*iex",            // pipe to eval
];

/// Coarse severity attached to every validation outcome. Callers use it to
/// decide whether to prompt a human before proceeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Outcome of a single validation check.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
    pub risk: RiskLevel,
}

impl Verdict {
    fn allow(reason: impl Into<String>, risk: RiskLevel) -> Self {
        Self { allowed: true, reason: reason.into(), risk }
    }

    fn reject(reason: impl Into<String>, risk: RiskLevel) -> Self {
        Self { allowed: false, reason: reason.into(), risk }
    }
}

/// Rule-table sizes and policy ceilings, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySummary {
    pub denied_commands: usize,
    pub safe_commands: usize,
    pub danger_patterns: usize,
    pub max_command_len: usize,
    pub max_timeout_secs: u64,
}

/// Gates every command string before it reaches a process boundary.
///
/// Rejection is reserved for denylist, danger-pattern, and length
/// violations; a command merely absent from the allow-list is accepted
/// and flagged at medium risk. Fully deterministic and side-effect free,
/// safe to share across tasks without synchronization.
pub struct SecurityValidator {
    denied_re: Regex,
    danger_res: Vec<Regex>,
    safe_commands: HashSet<&'static str>,
    max_command_len: usize,
    max_timeout: Duration,
}

impl SecurityValidator {
    pub fn new(limits: &LimitsConfig) -> Self {
        // One alternation with word boundaries; the capture reports which
        // verb matched. The patterns are compile-time literals, so the
        // regex builds are infallible.
        let alternation = DENIED_COMMANDS
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        let denied_re = Regex::new(&format!(r"\b({alternation})\b"))
            .expect("denylist regex is a valid literal alternation");
        let danger_res = DANGER_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("danger pattern is a valid regex"))
            .collect();

        Self {
            denied_re,
            danger_res,
            safe_commands: SAFE_COMMANDS.iter().copied().collect(),
            max_command_len: limits.max_command_len,
            max_timeout: limits.max_timeout(),
        }
    }

    /// Classify a command as allowed, allowed-with-warning, or rejected.
    ///
    /// Check order: empty input, denylist verbs, danger patterns, length
    /// ceiling, then the allow-list. Only the first three (plus length)
    /// can reject.
    pub fn validate_command(&self, command: &str) -> Verdict {
        if command.trim().is_empty() {
            return Verdict::reject("command must not be empty", RiskLevel::Medium);
        }

        let lowered = command.to_lowercase();
        let lowered = lowered.trim();

        if let Some(m) = self.denied_re.captures(lowered).and_then(|c| c.get(1)) {
            return Verdict::reject(
                format!("dangerous command detected: {}", m.as_str()),
                RiskLevel::Critical,
            );
        }

        for re in &self.danger_res {
            if re.is_match(lowered) {
                return Verdict::reject(
                    format!("dangerous pattern detected: {}", re.as_str()),
                    RiskLevel::High,
                );
            }
        }

        if command.chars().count() > self.max_command_len {
            return Verdict::reject(
                format!("command exceeds length limit ({} chars)", self.max_command_len),
                RiskLevel::Medium,
            );
        }

        let first = lowered.split_whitespace().next().unwrap_or("");
        if self.safe_commands.contains(first) {
            return Verdict::allow("command is on the safe list", RiskLevel::Low);
        }

        Verdict::allow(
            format!("command is not on the safe list: {first}"),
            RiskLevel::Medium,
        )
    }

    /// Basic path check: the path must be absolute. Existence is advisory;
    /// a non-existent path is accepted with a low-risk note.
    pub fn validate_path_safety(&self, path: &str) -> Verdict {
        if path.trim().is_empty() {
            return Verdict::reject("path must not be empty", RiskLevel::Medium);
        }
        let p = Path::new(path);
        if !p.is_absolute() {
            return Verdict::reject("path must be absolute", RiskLevel::High);
        }
        if !p.exists() {
            return Verdict::allow("path does not exist, but is well-formed", RiskLevel::Low);
        }
        Verdict::allow("path is safe", RiskLevel::Low)
    }

    /// Reject timeouts above the configured ceiling.
    pub fn check_time_limit(&self, timeout: Duration) -> Verdict {
        if timeout > self.max_timeout {
            return Verdict::reject(
                format!(
                    "timeout exceeds limit ({} seconds)",
                    self.max_timeout.as_secs()
                ),
                RiskLevel::Medium,
            );
        }
        Verdict::allow("timeout is within the allowed range", RiskLevel::Low)
    }

    pub fn summary(&self) -> SecuritySummary {
        SecuritySummary {
            denied_commands: DENIED_COMMANDS.len(),
            safe_commands: self.safe_commands.len(),
            danger_patterns: self.danger_res.len(),
            max_command_len: self.max_command_len,
            max_timeout_secs: self.max_timeout.as_secs(),
        }
    }
}
