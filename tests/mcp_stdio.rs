//! Integration tests driving the `msh` binary over stdio.
//!
//! The server speaks newline-delimited JSON-RPC on stdin/stdout: each
//! message is a single JSON object on one line, terminated by `\n`.
//! Tracing goes to stderr, so stdout stays clean for the protocol.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

/// Holds the server process and cleans up on drop.
struct StdioHarness {
    server: Child,
}

impl Drop for StdioHarness {
    fn drop(&mut self) {
        let _ = self.server.kill();
        let _ = self.server.wait();
    }
}

fn spawn_server() -> StdioHarness {
    let server = Command::new(env!("CARGO_BIN_EXE_msh"))
        .arg("--session-timeout")
        .arg("300")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn msh");
    StdioHarness { server }
}

/// Send a JSON-RPC message over stdin using newline-delimited JSON framing.
fn send_jsonrpc(stdin: &mut impl Write, msg: &serde_json::Value) {
    let payload = serde_json::to_string(msg).unwrap();
    writeln!(stdin, "{}", payload).unwrap();
    stdin.flush().unwrap();
}

/// Read a single JSON-RPC response from stdout. Skips anything that is not
/// a response (notifications, blank lines).
fn read_jsonrpc(reader: &mut BufReader<impl std::io::Read>) -> serde_json::Value {
    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .expect("failed to read line from stdout");
        if bytes_read == 0 {
            panic!("unexpected EOF while reading JSON-RPC response from stdout");
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if json.get("jsonrpc").is_some() && json.get("id").is_some() {
                return json;
            }
        }
    }
}

/// Send an initialize request and return the response.
fn initialize(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
) -> serde_json::Value {
    let init_request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "test-stdio",
                "version": "0.1"
            }
        }
    });
    send_jsonrpc(stdin, &init_request);
    read_jsonrpc(reader)
}

/// Send the notifications/initialized notification (required by MCP).
fn send_initialized_notification(stdin: &mut impl Write) {
    let notification = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized"
    });
    send_jsonrpc(stdin, &notification);
}

/// Call a tool and return the parsed JSON payload from its text content.
fn call_tool(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
    id: u64,
    name: &str,
    arguments: serde_json::Value,
) -> serde_json::Value {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": name,
            "arguments": arguments
        }
    });
    send_jsonrpc(stdin, &request);
    let response = read_jsonrpc(reader);
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], id);
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("expected text content in tool result, got: {response}"));
    serde_json::from_str(text).expect("tool result should be JSON")
}

/// Run `body` in a thread and fail the test if it doesn't finish in time.
fn with_timeout(harness: StdioHarness, body: impl FnOnce() + Send + 'static) {
    let handle = std::thread::spawn(body);
    let timeout = Duration::from_secs(30);
    let start = std::time::Instant::now();
    loop {
        if handle.is_finished() {
            break;
        }
        if start.elapsed() > timeout {
            drop(harness);
            panic!("test timed out after {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    drop(harness);
    handle.join().expect("test thread panicked");
}

// ── Test 1: Initialize over stdio ──────────────────────────────────

#[test]
fn stdio_initialize() {
    let mut harness = spawn_server();
    let mut stdin = harness.server.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.server.stdout.take().unwrap());

    with_timeout(harness, move || {
        let response = initialize(&mut stdin, &mut reader);

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 1);

        let result = &response["result"];
        assert!(
            result.is_object(),
            "expected result object in initialize response, got: {response}"
        );
        assert_eq!(result["serverInfo"]["name"], "msh");
        assert!(
            result["capabilities"]["tools"].is_object(),
            "expected tools capability"
        );
        let instructions = result["instructions"].as_str().expect("instructions string");
        assert!(
            instructions.contains("msh_run"),
            "instructions should mention msh_run"
        );

        drop(stdin);
    });
}

// ── Test 2: Full tool exercise over stdio ──────────────────────────

#[test]
fn stdio_full_tool_exercise() {
    let mut harness = spawn_server();
    let mut stdin = harness.server.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.server.stdout.take().unwrap());

    with_timeout(harness, move || {
        let response = initialize(&mut stdin, &mut reader);
        assert!(
            response["result"].is_object(),
            "initialize should succeed, got: {response}"
        );
        send_initialized_notification(&mut stdin);
        std::thread::sleep(Duration::from_millis(200));

        // Create a session.
        let created = call_tool(
            &mut stdin,
            &mut reader,
            2,
            "msh_create_session",
            serde_json::json!({"working_directory": "/tmp"}),
        );
        assert_eq!(created["success"], serde_json::json!(true), "got: {created}");
        let sid = created["session_id"].as_str().expect("session id").to_string();

        // Execute a command in it.
        let executed = call_tool(
            &mut stdin,
            &mut reader,
            3,
            "msh_execute_command",
            serde_json::json!({
                "session_id": sid,
                "command": "echo hello-stdio",
                "timeout_secs": 10
            }),
        );
        assert_eq!(executed["success"], serde_json::json!(true), "got: {executed}");
        assert_eq!(executed["exit_code"], serde_json::json!(0));
        assert!(executed["stdout"].as_str().unwrap().contains("hello-stdio"));

        // The transcript reflects it.
        let output = call_tool(
            &mut stdin,
            &mut reader,
            4,
            "msh_get_session_output",
            serde_json::json!({"session_id": sid}),
        );
        assert_eq!(output["success"], serde_json::json!(true));
        assert!(output["output"].as_str().unwrap().contains("hello-stdio"));
        assert_eq!(output["last_command"], serde_json::json!("echo hello-stdio"));

        // Listing shows exactly one session.
        let listed = call_tool(
            &mut stdin,
            &mut reader,
            5,
            "msh_list_sessions",
            serde_json::json!({}),
        );
        assert_eq!(listed["total_count"], serde_json::json!(1), "got: {listed}");

        // Destroy it; a second destroy reports false.
        let destroyed = call_tool(
            &mut stdin,
            &mut reader,
            6,
            "msh_destroy_session",
            serde_json::json!({"session_id": sid}),
        );
        assert_eq!(destroyed["success"], serde_json::json!(true));

        let destroyed_again = call_tool(
            &mut stdin,
            &mut reader,
            7,
            "msh_destroy_session",
            serde_json::json!({"session_id": sid}),
        );
        assert_eq!(destroyed_again["success"], serde_json::json!(false));

        let listed = call_tool(
            &mut stdin,
            &mut reader,
            8,
            "msh_list_sessions",
            serde_json::json!({}),
        );
        assert_eq!(listed["total_count"], serde_json::json!(0));

        drop(stdin);
    });
}

// ── Test 3: Security rejection over stdio ──────────────────────────

#[test]
fn stdio_rejects_denylisted_command() {
    let mut harness = spawn_server();
    let mut stdin = harness.server.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.server.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);
        send_initialized_notification(&mut stdin);
        std::thread::sleep(Duration::from_millis(200));

        let result = call_tool(
            &mut stdin,
            &mut reader,
            2,
            "msh_run",
            serde_json::json!({
                "command": "Stop-Service foo",
                "working_directory": "/tmp"
            }),
        );
        assert_eq!(result["success"], serde_json::json!(false), "got: {result}");
        assert_eq!(result["risk_level"], serde_json::json!("critical"));

        drop(stdin);
    });
}
