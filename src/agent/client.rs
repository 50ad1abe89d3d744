//! Connection to a spawned agent process.
//!
//! The connection owns the child process, a writer half for outgoing
//! frames, and a reader task that classifies incoming lines: responses are
//! routed to pending requests, `session/update` notifications fold into the
//! shared turn state, and permission requests are answered inline (always
//! approved; this client runs fully unattended).

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{
    classify_line, initialize_params, permission_approval, prompt_params, session_new_params,
    IncomingMessage, MessageChunk, OutgoingRequest, OutgoingResponse, RpcErrorObject,
    SessionNotification, SessionUpdate, METHOD_INITIALIZE, METHOD_PERMISSION_REQUEST,
    METHOD_SESSION_CANCEL, METHOD_SESSION_NEW, METHOD_SESSION_PROMPT, METHOD_SESSION_UPDATE,
};

/// Fixed deadline for the graceful-close race during cleanup.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for the agent protocol client.
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// Program to spawn for each execution.
    pub program: String,
    pub args: Vec<String>,
    /// Completion-wait budget for one prompt turn.
    pub turn_timeout_ms: u64,
    /// Interval between completion polls.
    pub poll_interval_ms: u64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            program: std::env::var("AGENT_CLI_PATH").unwrap_or_else(|_| "agent".to_string()),
            args: Vec::new(),
            turn_timeout_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

/// Accumulated observable state of one prompt turn.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    /// Concatenated `agent_message_chunk` text.
    pub output: String,
    pub completed: bool,
    pub stop_reason: Option<String>,
    pub tool_calls_seen: u32,
    pub error: Option<String>,
}

/// Final result of waiting for a turn.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: String,
    /// Empty on success.
    pub error: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcErrorObject>>>>>;

pub struct AgentConnection {
    config: AgentClientConfig,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    turn: Arc<Mutex<TurnState>>,
    session_id: Mutex<Option<String>>,
    _reader: JoinHandle<()>,
}

impl AgentConnection {
    /// Spawn the agent process and start the reader task.
    ///
    /// Transport-level failures here (and in the handshake methods below)
    /// surface as errors and are not retried internally; retry policy
    /// belongs to the caller.
    pub async fn connect(config: &AgentClientConfig, directory: &Path) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .current_dir(directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            "Spawning agent process: program={}, directory={}",
            config.program,
            directory.display()
        );

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn agent process: {}", e);
            anyhow!(
                "Failed to spawn agent process: {}. Is it installed at '{}'?",
                e,
                config.program
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to capture agent stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to capture agent stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Failed to capture agent stderr"))?;

        // Drain stderr so the child never blocks on a full pipe.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    debug!("agent stderr: {}", line);
                }
            }
        });

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let turn = Arc::new(Mutex::new(TurnState::default()));

        let reader = tokio::spawn(reader_loop(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&turn),
            Arc::clone(&stdin),
        ));

        Ok(Self {
            config: config.clone(),
            child: Arc::new(Mutex::new(Some(child))),
            stdin,
            pending,
            next_id: AtomicU64::new(1),
            turn,
            session_id: Mutex::new(None),
            _reader: reader,
        })
    }

    async fn write_frame(&self, frame: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .context("failed to write frame to agent stdin")?;
        stdin.flush().await.context("failed to flush agent stdin")?;
        Ok(())
    }

    /// Send a request and wait for the matching response.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let rx = self.send_request(method, params).await?;
        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(anyhow!("agent rejected {}: {} (code {})", method, e.message, e.code)),
            Err(_) => Err(anyhow!("connection closed while waiting for {}", method)),
        }
    }

    /// Send a request, returning the response channel without awaiting it.
    async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<Result<Value, RpcErrorObject>>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let frame = OutgoingRequest::new(id, method, params);
        if let Err(e) = self.write_frame(&frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Protocol handshake: version and capability negotiation.
    pub async fn initialize(&self) -> Result<Value> {
        let result = self
            .request(METHOD_INITIALIZE, initialize_params())
            .await
            .context("agent handshake failed")?;
        debug!(
            "agent initialized: protocolVersion={:?}",
            result.get("protocolVersion")
        );
        Ok(result)
    }

    /// Open a session rooted at `cwd`.
    pub async fn new_session(&self, cwd: &Path, mcp_servers: &[Value]) -> Result<String> {
        let result = self
            .request(
                METHOD_SESSION_NEW,
                session_new_params(&cwd.to_string_lossy(), mcp_servers),
            )
            .await
            .context("agent session creation failed")?;
        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("session/new response carried no sessionId"))?
            .to_string();
        info!("agent session established: {}", session_id);
        *self.session_id.lock().await = Some(session_id.clone());
        Ok(session_id)
    }

    /// Send the prompt turn. Returns immediately; completion is observed
    /// through `wait_for_completion`. The prompt response itself also marks
    /// the turn complete (whichever signal arrives first wins).
    pub async fn prompt(&self, text: &str) -> Result<()> {
        let session_id = self
            .session_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("prompt before session/new"))?;

        *self.turn.lock().await = TurnState::default();

        let rx = self
            .send_request(METHOD_SESSION_PROMPT, prompt_params(&session_id, text))
            .await?;

        let turn = Arc::clone(&self.turn);
        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(result)) => {
                    let mut state = turn.lock().await;
                    if state.stop_reason.is_none() {
                        state.stop_reason = result
                            .get("stopReason")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                    }
                    state.completed = true;
                }
                Ok(Err(e)) => {
                    let mut state = turn.lock().await;
                    state.error = Some(e.message);
                    state.completed = true;
                }
                // Connection torn down before the turn response; the update
                // stream (or the timeout) decides the outcome.
                Err(_) => {}
            }
        });
        Ok(())
    }

    /// Poll the accumulated turn state until completion or timeout.
    ///
    /// A timeout returns an error result; the process is left running and
    /// cleaned up by the separate `close` step.
    pub async fn wait_for_completion(&self, timeout_ms: u64) -> ExecutionResult {
        wait_for_turn(&self.turn, timeout_ms, self.config.poll_interval_ms).await
    }

    /// Stop reason recorded for the last turn, if any.
    pub async fn stop_reason(&self) -> Option<String> {
        self.turn.lock().await.stop_reason.clone()
    }

    /// Cleanup: race a graceful close against a fixed deadline, then
    /// unconditionally terminate the process.
    pub async fn close(&self) {
        let session_id = self.session_id.lock().await.clone();
        let graceful = self.request(
            METHOD_SESSION_CANCEL,
            json!({ "sessionId": session_id }),
        );
        match tokio::time::timeout(CLOSE_TIMEOUT, graceful).await {
            Ok(Ok(_)) => debug!("agent acknowledged close"),
            Ok(Err(e)) => debug!("graceful close failed: {}", e),
            Err(_) => debug!("graceful close timed out"),
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill agent process: {}", e);
            } else {
                info!("agent process terminated");
            }
        }
    }
}

// The polling wait observes shared turn state at fixed small intervals
// until completion is flagged or the budget elapses.
async fn wait_for_turn(
    turn: &Arc<Mutex<TurnState>>,
    timeout_ms: u64,
    poll_interval_ms: u64,
) -> ExecutionResult {
    let started = tokio::time::Instant::now();
    let poll = Duration::from_millis(poll_interval_ms.max(1));

    loop {
        {
            let state = turn.lock().await;
            if state.completed {
                debug!(
                    "agent turn complete: stop_reason={:?}, {} tool call(s)",
                    state.stop_reason, state.tool_calls_seen
                );
                return ExecutionResult {
                    output: state.output.clone(),
                    error: state.error.clone().unwrap_or_default(),
                };
            }
        }
        if started.elapsed() >= Duration::from_millis(timeout_ms) {
            warn!("agent turn timed out after {}ms", timeout_ms);
            let state = turn.lock().await;
            return ExecutionResult {
                output: state.output.clone(),
                error: format!("agent execution timed out after {}ms", timeout_ms),
            };
        }
        tokio::time::sleep(poll).await;
    }
}

async fn reader_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    turn: Arc<Mutex<TurnState>>,
    stdin: Arc<Mutex<ChildStdin>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        handle_line(&line, &pending, &turn, &stdin).await;
    }
    debug!("agent stdout closed");
}

async fn handle_line(
    line: &str,
    pending: &PendingMap,
    turn: &Arc<Mutex<TurnState>>,
    stdin: &Arc<Mutex<ChildStdin>>,
) {
    let message = match classify_line(line) {
        Ok(message) => message,
        Err(e) => {
            // Log but don't fail - some lines might be non-JSON noise.
            warn!(
                "Failed to parse agent frame: {} - line: {}",
                e,
                if line.len() > 200 {
                    format!("{}...", line.chars().take(200).collect::<String>())
                } else {
                    line.to_string()
                }
            );
            return;
        }
    };

    match message {
        IncomingMessage::Response { id, result } => {
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(result);
            } else {
                debug!("response for unknown request id {}", id);
            }
        }
        IncomingMessage::Notification { method, params } => {
            if method == METHOD_SESSION_UPDATE {
                match serde_json::from_value::<SessionNotification>(params) {
                    Ok(notification) => {
                        apply_update(&mut *turn.lock().await, notification.update);
                    }
                    Err(e) => warn!("malformed session/update: {}", e),
                }
            } else {
                debug!("ignoring notification: {}", method);
            }
        }
        IncomingMessage::Request { id, method, .. } => {
            if method == METHOD_PERMISSION_REQUEST {
                info!("auto-approving agent permission request");
                let response = OutgoingResponse::new(id, permission_approval());
                if let Ok(mut frame) = serde_json::to_string(&response) {
                    frame.push('\n');
                    let mut stdin = stdin.lock().await;
                    if stdin.write_all(frame.as_bytes()).await.is_err()
                        || stdin.flush().await.is_err()
                    {
                        warn!("failed to answer permission request");
                    }
                }
            } else {
                debug!("ignoring agent request: {}", method);
            }
        }
    }
}

/// Fold one session update into the turn state.
pub(crate) fn apply_update(state: &mut TurnState, update: SessionUpdate) {
    if let Some(stop_reason) = update.terminal_stop_reason() {
        state.stop_reason = Some(stop_reason);
        state.completed = true;
        return;
    }
    match update {
        SessionUpdate::ToolCall {
            tool_call_id,
            title,
            ..
        } => {
            state.tool_calls_seen += 1;
            debug!("agent tool call {} ({:?})", tool_call_id, title);
        }
        SessionUpdate::ToolCallUpdate {
            tool_call_id,
            status,
            ..
        } => {
            debug!("agent tool call {} -> {:?}", tool_call_id, status);
        }
        SessionUpdate::AgentMessageChunk { content } => {
            if let MessageChunk::Text { text } = content {
                state.output.push_str(&text);
            }
        }
        // Terminal variants were handled above.
        SessionUpdate::TurnComplete { .. }
        | SessionUpdate::EndTurn { .. }
        | SessionUpdate::SessionComplete { .. } => {}
    }
}
