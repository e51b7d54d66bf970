// (C) 2025 - Enzo Lombardi

//! The kernel session: owns one kernel's lifecycle and multiplexes
//! requests/replies on a background reactor thread (§4.4, §5).
//!
//! Concurrency model: [`KernelSession`]'s methods run on the UI thread and
//! either mutate local state directly or enqueue a [`Command`] for the
//! reactor thread, which owns the [`KernelTransport`] and the
//! [`Router`]. `interrupt()` is the one exception — it is synchronous and
//! bypasses the queue entirely, per §4.4/§5.

use super::callbacks::{CallbackBundle, ExecutionState};
use super::message::KernelMessage;
use super::router::{CommEvent, InputRequest, Router};
use super::transport::{KernelLauncher, KernelTransport, LaunchError};
use crate::core::error::{EuporieError, Result};
use crate::core::settings::Settings;
use crate::notebook::KernelSpec;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The kernel session's lifecycle state (§4.4).
#[derive(Clone, PartialEq, Eq)]
pub enum KernelState {
    Stopped,
    Starting,
    Idle,
    Busy,
    Error(String),
    Missing,
}

impl KernelState {
    /// `run`/`complete`/`inspect`/`history`/`input`/`info` are only
    /// allowed while the kernel is idle or busy (§4.4).
    pub fn accepts_requests(&self) -> bool {
        matches!(self, KernelState::Idle | KernelState::Busy)
    }
}

pub struct Completion {
    pub text: String,
    pub start_position: i64,
    pub display_meta: Option<String>,
}

pub struct HistoryEntry {
    pub session: i64,
    pub line: i64,
    pub text: String,
}

/// Handler for a [`CommEvent`] forwarded off the iopub channel — wired to
/// the Comm Manager by the caller that constructs the session.
pub type CommHandler = Box<dyn FnMut(CommEvent) + Send>;

enum Command {
    Run(KernelMessage, CallbackBundle),
    AnswerableRequest(KernelMessage, CallbackBundle),
    Shutdown,
}

/// Client-side owner of one running Jupyter kernel (§4.4).
pub struct KernelSession {
    state: Arc<Mutex<KernelState>>,
    launcher: Arc<Mutex<Box<dyn KernelLauncher>>>,
    cmd_tx: Option<async_channel::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
    settings: Settings,
    session_id: String,
    kernel_name: String,
}

impl KernelSession {
    pub fn new(launcher: Box<dyn KernelLauncher>, settings: Settings) -> Self {
        Self {
            state: Arc::new(Mutex::new(KernelState::Stopped)),
            launcher: Arc::new(Mutex::new(launcher)),
            cmd_tx: None,
            thread: None,
            settings,
            session_id: uuid::Uuid::new_v4().to_string(),
            kernel_name: String::new(),
        }
    }

    pub fn state(&self) -> KernelState {
        self.state.lock().clone()
    }

    /// Installed kernelspecs (§4.4 `specs`).
    pub fn specs(&self) -> HashMap<String, KernelSpec> {
        self.launcher.lock().specs()
    }

    /// Starts `name`. Transitions `stopped -> starting -> {idle, missing,
    /// error}` (§4.4). `comm_handler` receives every `comm_open`/
    /// `comm_msg`/`comm_close` observed on iopub.
    pub fn start(&mut self, name: impl Into<String>, mut comm_handler: CommHandler) {
        let name = name.into();
        self.kernel_name = name.clone();
        *self.state.lock() = KernelState::Starting;

        let (cmd_tx, cmd_rx) = async_channel::unbounded::<Command>();
        self.cmd_tx = Some(cmd_tx);

        let state = self.state.clone();
        let launcher = self.launcher.clone();
        let wait_for_ready = self.settings.kernel_wait_for_ready();

        self.thread = Some(std::thread::spawn(move || {
            let (transport, hmac_key) = match launcher.lock().launch(&name) {
                Ok(t) => t,
                Err(LaunchError::Missing) => {
                    log::error!("kernel '{name}' has no installed kernelspec");
                    *state.lock() = KernelState::Missing;
                    return;
                }
                Err(LaunchError::StartFailure(msg)) => {
                    log::error!("kernel '{name}' failed to start: {msg}");
                    *state.lock() = KernelState::Error(msg);
                    return;
                }
            };
            log::info!("kernel '{name}' starting, waiting up to {wait_for_ready:?} for ready");
            *state.lock() = KernelState::Idle;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("reactor runtime");
            runtime.block_on(reactor_loop(transport, cmd_rx, state, &hmac_key, &mut comm_handler));
        }));
    }

    fn send_command(&self, cmd: Command) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.try_send(cmd);
        } else {
            log::warn!("kernel session has no reactor thread running; command dropped");
        }
    }

    /// Executes `source` in a fresh request, delivering results through
    /// `bundle` (§4.4 `run`).
    ///
    /// # Errors
    ///
    /// Returns [`EuporieError::kernel_missing`] if the session has never
    /// been started or the kernel state does not accept requests.
    pub fn run(&self, source: &str, bundle: CallbackBundle) -> Result<()> {
        self.require_running()?;
        let content = serde_json::json!({
            "code": source,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": true,
            "stop_on_error": true,
        });
        let msg = KernelMessage::request("execute_request", &self.session_id, content);
        self.send_command(Command::Run(msg, bundle));
        Ok(())
    }

    /// Requests completions at `cursor_pos` (§4.4 `complete`).
    pub fn complete(
        &self,
        code: &str,
        cursor_pos: i64,
        on_reply: impl FnOnce(Vec<Completion>) + Send + 'static,
    ) -> Result<()> {
        self.require_running()?;
        let content = serde_json::json!({"code": code, "cursor_pos": cursor_pos});
        let msg = KernelMessage::request("complete_request", &self.session_id, content);
        let bundle = CallbackBundle::new().on_done(move |reply| {
            on_reply(parse_completions(&reply, cursor_pos));
        });
        self.send_command(Command::AnswerableRequest(msg, bundle));
        Ok(())
    }

    /// Requests object introspection at `cursor_pos` (§4.4 `inspect`).
    pub fn inspect(
        &self,
        code: &str,
        cursor_pos: i64,
        detail_level: u8,
        on_reply: impl FnOnce(serde_json::Value) + Send + 'static,
    ) -> Result<()> {
        self.require_running()?;
        let content = serde_json::json!({
            "code": code, "cursor_pos": cursor_pos, "detail_level": detail_level,
        });
        let msg = KernelMessage::request("inspect_request", &self.session_id, content);
        let bundle = CallbackBundle::new().on_done(move |reply| on_reply(reply));
        self.send_command(Command::AnswerableRequest(msg, bundle));
        Ok(())
    }

    /// Searches session history (§4.4 `history`).
    pub fn history(
        &self,
        pattern: &str,
        n: i64,
        on_reply: impl FnOnce(Vec<HistoryEntry>) + Send + 'static,
    ) -> Result<()> {
        self.require_running()?;
        let content = serde_json::json!({
            "hist_access_type": "search", "pattern": pattern, "n": n, "output": false, "raw": true,
        });
        let msg = KernelMessage::request("history_request", &self.session_id, content);
        let bundle = CallbackBundle::new().on_done(move |reply| on_reply(parse_history(&reply)));
        self.send_command(Command::AnswerableRequest(msg, bundle));
        Ok(())
    }

    /// Requests kernel info (§4.4 `info`).
    pub fn info(&self, on_reply: impl FnOnce(serde_json::Value) + Send + 'static) -> Result<()> {
        self.require_running()?;
        let msg = KernelMessage::request("kernel_info_request", &self.session_id, serde_json::json!({}));
        let bundle = CallbackBundle::new().on_done(move |reply| on_reply(reply));
        self.send_command(Command::AnswerableRequest(msg, bundle));
        Ok(())
    }

    fn require_running(&self) -> Result<()> {
        if self.cmd_tx.is_none() || !self.state().accepts_requests() {
            return Err(EuporieError::kernel_missing());
        }
        Ok(())
    }

    /// Sends the kernel an interrupt signal immediately. Does not wait for
    /// in-flight reactor work (§4.4, §5).
    pub fn interrupt(&self) {
        self.launcher.lock().interrupt();
    }

    /// Changes to a different named kernel, updating `metadata`'s
    /// kernelspec and restarting if a kernel is currently running (§4.4
    /// `change`, E2E scenario 6).
    pub fn change(&mut self, name: &str, metadata: &mut crate::notebook::NotebookMetadata) {
        if let Some(spec) = self.specs().get(name) {
            metadata.kernelspec = Some(spec.clone());
        }
        let was_running = self.cmd_tx.is_some();
        self.kernel_name = name.to_string();
        if was_running {
            self.restart_as(name.to_string());
        }
    }

    /// `shutdown` followed by `start` with the same kernel name (§4.4
    /// `restart`).
    pub fn restart(&mut self) {
        let name = self.kernel_name.clone();
        self.restart_as(name);
    }

    fn restart_as(&mut self, name: String) {
        self.shutdown();
        self.start(name, Box::new(|_| {}));
    }

    /// Terminates the reactor and joins its thread (§4.4 `shutdown`).
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.try_send(Command::Shutdown);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        *self.state.lock() = KernelState::Stopped;
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn reactor_loop(
    mut transport: Box<dyn KernelTransport>,
    cmd_rx: async_channel::Receiver<Command>,
    state: Arc<Mutex<KernelState>>,
    hmac_key: &[u8],
    comm_handler: &mut CommHandler,
) {
    let mut router = Router::new();
    let mut tick = tokio::time::interval(Duration::from_millis(15));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Ok(Command::Run(msg, bundle)) | Ok(Command::AnswerableRequest(msg, bundle)) => {
                        router.register(msg.msg_id().to_string(), bundle);
                        if let Err(e) = transport.send_shell(&msg) {
                            log::error!("failed to send {}: {e}", msg.msg_type());
                        }
                    }
                    Ok(Command::Shutdown) | Err(_) => break,
                }
            }
            _ = tick.tick() => {
                poll_channels(&mut *transport, &mut router, &state, hmac_key, comm_handler);
            }
        }
    }
    log::info!("kernel reactor shutting down, {} request(s) left pending", router.pending_count());
}

/// Drops a message that failed HMAC verification, logging at warn per
/// §7 ("a malformed multipart message or an HMAC mismatch is logged at
/// warn and the message is dropped").
fn verified(msg: KernelMessage, channel: &str, hmac_key: &[u8]) -> Option<KernelMessage> {
    if msg.verify(hmac_key) {
        Some(msg)
    } else {
        let err = EuporieError::wire_protocol(format!(
            "dropping {channel} message {}: HMAC signature mismatch",
            msg.msg_type()
        ));
        log::warn!("{err}");
        None
    }
}

fn poll_channels(
    transport: &mut dyn KernelTransport,
    router: &mut Router,
    state: &Arc<Mutex<KernelState>>,
    hmac_key: &[u8],
    comm_handler: &mut CommHandler,
) {
    while let Some(msg) = transport.try_recv_iopub() {
        let Some(msg) = verified(msg, "iopub", hmac_key) else { continue };
        if msg.msg_type() == "status" {
            let new_state = match msg.content.get("execution_state").and_then(|v| v.as_str()) {
                Some("busy") => KernelState::Busy,
                Some("starting") => KernelState::Starting,
                _ => KernelState::Idle,
            };
            log::info!("kernel status -> {new_state:?}");
            *state.lock() = new_state;
        }
        log::debug!("routing iopub message {} (parent {:?})", msg.msg_type(), msg.parent_msg_id());
        if let Some(event) = router.dispatch_iopub(&msg) {
            comm_handler(event);
        }
    }
    while let Some(msg) = transport.try_recv_shell() {
        let Some(msg) = verified(msg, "shell", hmac_key) else { continue };
        log::debug!("routing shell reply for {:?}", msg.parent_msg_id());
        router.dispatch_shell_reply(&msg);
    }
    while let Some(msg) = transport.try_recv_stdin() {
        let Some(msg) = verified(msg, "stdin", hmac_key) else { continue };
        if let Some(req) = router.dispatch_stdin(&msg) {
            if let Some(answer) = router.answer_input_request(&req) {
                let reply = KernelMessage::request(
                    "input_reply",
                    "euporie",
                    serde_json::json!({"value": answer, "status": "ok"}),
                );
                let _ = transport.send_stdin(&reply);
            }
        }
    }
}

impl std::fmt::Debug for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KernelState::Stopped => "stopped",
            KernelState::Starting => "starting",
            KernelState::Idle => "idle",
            KernelState::Busy => "busy",
            KernelState::Error(_) => "error",
            KernelState::Missing => "missing",
        };
        write!(f, "{name}")
    }
}

/// Prefers Jupyter-experimental typed completions when present, else
/// falls back to bare matches (§4.4 `complete`).
fn parse_completions(reply: &serde_json::Value, cursor_pos: i64) -> Vec<Completion> {
    if let Some(typed) =
        reply.get("metadata").and_then(|m| m.get("_jupyter_types_experimental")).and_then(|v| v.as_array())
    {
        return typed
            .iter()
            .map(|m| {
                let start = m.get("start").and_then(|v| v.as_i64()).unwrap_or(cursor_pos);
                let kind = m.get("type").and_then(|v| v.as_str()).filter(|s| *s != "<unknown>");
                Completion {
                    text: m.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    start_position: start - cursor_pos,
                    display_meta: kind.map(String::from),
                }
            })
            .collect();
    }
    let cursor_start = reply.get("cursor_start").and_then(|v| v.as_i64()).unwrap_or(cursor_pos);
    reply
        .get("matches")
        .and_then(|v| v.as_array())
        .map(|matches| {
            matches
                .iter()
                .filter_map(|m| m.as_str())
                .map(|text| Completion {
                    text: text.to_string(),
                    start_position: cursor_start - cursor_pos,
                    display_meta: None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_history(reply: &serde_json::Value) -> Vec<HistoryEntry> {
    reply
        .get("history")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    Some(HistoryEntry {
                        session: row.first()?.as_i64()?,
                        line: row.get(1)?.as_i64()?,
                        text: row.get(2)?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_and_busy_accept_requests_stopped_does_not() {
        assert!(KernelState::Idle.accepts_requests());
        assert!(KernelState::Busy.accepts_requests());
        assert!(!KernelState::Stopped.accepts_requests());
        assert!(!KernelState::Missing.accepts_requests());
    }

    #[test]
    fn parses_jupyter_typed_completions_preferentially() {
        let reply = serde_json::json!({
            "metadata": {"_jupyter_types_experimental": [{"text": "foo", "start": 3, "type": "function"}]},
            "matches": ["foo"],
            "cursor_start": 0,
        });
        let completions = parse_completions(&reply, 5);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].text, "foo");
        assert_eq!(completions[0].start_position, -2);
        assert_eq!(completions[0].display_meta.as_deref(), Some("function"));
    }

    #[test]
    fn falls_back_to_bare_matches_without_typed_completions() {
        let reply = serde_json::json!({"matches": ["abs", "all"], "cursor_start": 1});
        let completions = parse_completions(&reply, 4);
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].start_position, -3);
        assert!(completions[0].display_meta.is_none());
    }

    #[test]
    fn poll_channels_drops_iopub_message_with_bad_signature() {
        use super::super::transport::ChannelTransport;

        let key = b"session-key";
        let mut transport = ChannelTransport::new();
        let msg = KernelMessage::request("status", "sess", serde_json::json!({"execution_state": "busy"}))
            .with_signature("not-a-real-signature");
        transport.push_iopub(msg);

        let mut router = Router::new();
        let state = Arc::new(Mutex::new(KernelState::Idle));
        let mut comm_handler: CommHandler = Box::new(|_| {});
        poll_channels(&mut transport, &mut router, &state, key, &mut comm_handler);

        // The forged status message must not have been allowed to flip
        // the state to busy.
        assert_eq!(*state.lock(), KernelState::Idle);
    }

    #[test]
    fn poll_channels_accepts_correctly_signed_iopub_message() {
        use super::super::transport::ChannelTransport;

        let key = b"session-key";
        let mut transport = ChannelTransport::new();
        let msg = KernelMessage::request("status", "sess", serde_json::json!({"execution_state": "busy"}));
        let sig = msg.sign(key).unwrap();
        transport.push_iopub(msg.with_signature(sig));

        let mut router = Router::new();
        let state = Arc::new(Mutex::new(KernelState::Idle));
        let mut comm_handler: CommHandler = Box::new(|_| {});
        poll_channels(&mut transport, &mut router, &state, key, &mut comm_handler);

        assert_eq!(*state.lock(), KernelState::Busy);
    }

    #[test]
    fn parses_history_rows() {
        let reply = serde_json::json!({"history": [[1, 2, "x = 1"], [1, 3, "y = 2"]]});
        let history = parse_history(&reply);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "x = 1");
        assert_eq!(history[1].line, 3);
    }
}
