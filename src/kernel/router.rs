// (C) 2025 - Enzo Lombardi

//! Message routing: correlates kernel replies with the request that
//! started them and dispatches content to the right callback (§4.4
//! "Message routing").
//!
//! Kept free of any transport or thread concern so it can be driven
//! directly from synthetic [`KernelMessage`] values in tests (§10.4),
//! matching the way the reactor thread (`session.rs`) actually drives it
//! in production: one `dispatch_iopub`/`dispatch_shell_reply`/
//! `dispatch_stdin` call per message received on the corresponding
//! channel.

use super::callbacks::{CallbackBundle, ExecutionState};
use super::message::KernelMessage;
use crate::notebook::{MimeBundle, Output, StreamName};
use std::collections::HashMap;

/// A `comm_open`/`comm_msg`/`comm_close` message the router recognized
/// but does not itself know how to handle — forwarded to the Comm
/// Manager by the caller (§4.4's "forward to Comm Manager").
#[derive(Clone)]
pub enum CommEvent {
    Open { comm_id: String, target_name: String, data: serde_json::Value },
    Msg { comm_id: String, data: serde_json::Value, buffers: Vec<Vec<u8>> },
    Close { comm_id: String, data: serde_json::Value },
}

/// An `input_request` the router recognized — the caller must answer on
/// the stdin channel (§4.4 "Separately poll stdin").
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub msg_id: String,
    pub prompt: String,
    pub password: bool,
}

struct PendingRequest {
    bundle: CallbackBundle,
    reply: Option<serde_json::Value>,
    idle_seen: bool,
}

/// Routes kernel messages to the [`CallbackBundle`] registered under
/// their `parent_header.msg_id`.
#[derive(Default)]
pub struct Router {
    pending: HashMap<String, PendingRequest>,
}

impl Router {
    pub fn new() -> Self {
        Self { pending: HashMap::new() }
    }

    /// Registers a bundle to receive messages correlated to `msg_id`
    /// (§3 "KernelRequest").
    pub fn register(&mut self, msg_id: String, bundle: CallbackBundle) {
        self.pending.insert(msg_id, PendingRequest { bundle, reply: None, idle_seen: false });
    }

    pub fn is_pending(&self, msg_id: &str) -> bool {
        self.pending.contains_key(msg_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Dispatches one iopub message. Returns a [`CommEvent`] if `msg_type`
    /// was a comm message, so the caller can forward it to the Comm
    /// Manager; Comm Manager traffic is otherwise untouched here.
    pub fn dispatch_iopub(&mut self, msg: &KernelMessage) -> Option<CommEvent> {
        let Some(parent_id) = msg.parent_msg_id().map(str::to_string) else {
            return self.comm_event(msg);
        };

        match msg.msg_type() {
            "status" => {
                let state = msg
                    .content
                    .get("execution_state")
                    .and_then(|v| v.as_str())
                    .unwrap_or("idle");
                if let Some(req) = self.pending.get_mut(&parent_id) {
                    if let Some(cb) = req.bundle.set_status.as_mut() {
                        cb(execution_state(state));
                    }
                    if state == "idle" {
                        req.idle_seen = true;
                    }
                }
                self.maybe_complete(&parent_id);
                None
            }
            "execute_input" => {
                if let Some(n) = msg.content.get("execution_count").and_then(|v| v.as_i64()) {
                    if let Some(req) = self.pending.get_mut(&parent_id) {
                        if let Some(cb) = req.bundle.set_execution_count.as_mut() {
                            cb(n);
                        }
                    }
                }
                None
            }
            "stream" => {
                let name = msg.content.get("name").and_then(|v| v.as_str());
                let text = msg.content.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                let stream_name = match name {
                    Some("stderr") => StreamName::Stderr,
                    _ => StreamName::Stdout,
                };
                if let Some(req) = self.pending.get_mut(&parent_id) {
                    if let Some(cb) = req.bundle.add_output.as_mut() {
                        cb(Output::Stream { name: stream_name, text: text.to_string() });
                    }
                }
                None
            }
            "display_data" => {
                self.dispatch_output(&parent_id, output_from_display_like(msg, None));
                None
            }
            "execute_result" => {
                let count = msg.content.get("execution_count").and_then(|v| v.as_i64()).unwrap_or(0);
                self.dispatch_output(&parent_id, output_from_display_like(msg, Some(count)));
                None
            }
            "error" => {
                let ename = msg.content.get("ename").and_then(|v| v.as_str()).unwrap_or_default();
                let evalue = msg.content.get("evalue").and_then(|v| v.as_str()).unwrap_or_default();
                let traceback = msg
                    .content
                    .get("traceback")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                self.dispatch_output(
                    &parent_id,
                    Output::Error { ename: ename.into(), evalue: evalue.into(), traceback },
                );
                None
            }
            "clear_output" => {
                let wait = msg.content.get("wait").and_then(|v| v.as_bool()).unwrap_or(false);
                if let Some(req) = self.pending.get_mut(&parent_id) {
                    if let Some(cb) = req.bundle.clear_output.as_mut() {
                        cb(wait);
                    }
                }
                None
            }
            "update_display_data" => {
                if let (Some(display_id), Some(req)) = (
                    msg.content.get("transient").and_then(|t| t.get("display_id")).and_then(|v| v.as_str()),
                    self.pending.get_mut(&parent_id),
                ) {
                    if let Some(cb) = req.bundle.update_display_data.as_mut() {
                        let data: MimeBundle = msg
                            .content
                            .get("data")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                            .unwrap_or_default();
                        let metadata: MimeBundle = msg
                            .content
                            .get("metadata")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                            .unwrap_or_default();
                        cb(display_id, data, metadata);
                    }
                }
                None
            }
            "comm_open" | "comm_msg" | "comm_close" => self.comm_event(msg),
            "kernel_info_reply" => {
                if let Some(req) = self.pending.get_mut(&parent_id) {
                    if let Some(cb) = req.bundle.set_kernel_info.as_mut() {
                        cb(msg.content.clone());
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn dispatch_output(&mut self, parent_id: &str, output: Output) {
        if let Some(req) = self.pending.get_mut(parent_id) {
            if let Some(cb) = req.bundle.add_output.as_mut() {
                cb(output);
            }
        }
    }

    fn comm_event(&self, msg: &KernelMessage) -> Option<CommEvent> {
        match msg.msg_type() {
            "comm_open" => Some(CommEvent::Open {
                comm_id: msg.content.get("comm_id")?.as_str()?.to_string(),
                target_name: msg.content.get("target_name")?.as_str()?.to_string(),
                data: msg.content.get("data").cloned().unwrap_or(serde_json::Value::Null),
            }),
            "comm_msg" => Some(CommEvent::Msg {
                comm_id: msg.content.get("comm_id")?.as_str()?.to_string(),
                data: msg.content.get("data").cloned().unwrap_or(serde_json::Value::Null),
                buffers: msg.buffers.clone(),
            }),
            "comm_close" => Some(CommEvent::Close {
                comm_id: msg.content.get("comm_id")?.as_str()?.to_string(),
                data: msg.content.get("data").cloned().unwrap_or(serde_json::Value::Null),
            }),
            _ => None,
        }
    }

    /// Dispatches a stdin `input_request`, returning the request for the
    /// caller to answer (§4.4 "Separately poll stdin").
    pub fn dispatch_stdin(&mut self, msg: &KernelMessage) -> Option<InputRequest> {
        if msg.msg_type() != "input_request" {
            return None;
        }
        let parent_id = msg.parent_msg_id()?.to_string();
        self.pending.get(&parent_id)?;
        Some(InputRequest {
            msg_id: parent_id,
            prompt: msg.content.get("prompt").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            password: msg.content.get("password").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }

    /// Answers a previously dispatched `input_request` by invoking the
    /// bundle's `get_input` and returning the string to send back on the
    /// stdin channel.
    pub fn answer_input_request(&mut self, req: &InputRequest) -> Option<String> {
        let bundle = self.pending.get_mut(&req.msg_id)?;
        let cb = bundle.bundle.get_input.as_mut()?;
        Some(cb(&req.prompt, req.password))
    }

    /// Dispatches a shell-channel reply matching some pending request's
    /// `msg_id`. The bundle only actually finishes once the
    /// corresponding `idle` status has also been observed (§4.4).
    pub fn dispatch_shell_reply(&mut self, msg: &KernelMessage) {
        let Some(parent_id) = msg.parent_msg_id().map(str::to_string) else { return };
        if let Some(req) = self.pending.get_mut(&parent_id) {
            if let Some(meta) = msg.metadata.as_object().filter(|m| !m.is_empty()) {
                if let Some(cb) = req.bundle.set_metadata.as_mut() {
                    cb(msg.msg_type(), serde_json::Value::Object(meta.clone()));
                }
            }
            req.reply = Some(msg.content.clone());
        }
        self.maybe_complete(&parent_id);
    }

    fn maybe_complete(&mut self, msg_id: &str) {
        let done = matches!(self.pending.get(msg_id), Some(req) if req.idle_seen && req.reply.is_some());
        if done {
            if let Some(req) = self.pending.remove(msg_id) {
                req.bundle.finish(req.reply.unwrap_or(serde_json::Value::Null));
            }
        }
    }
}

fn execution_state(s: &str) -> ExecutionState {
    match s {
        "busy" => ExecutionState::Busy,
        "starting" => ExecutionState::Starting,
        _ => ExecutionState::Idle,
    }
}

fn output_from_display_like(msg: &KernelMessage, execution_count: Option<i64>) -> Output {
    let data: MimeBundle =
        msg.content.get("data").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
    let metadata: MimeBundle =
        msg.content.get("metadata").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
    match execution_count {
        Some(count) => Output::ExecuteResult { data, metadata, execution_count: count },
        None => {
            let transient = msg.content.get("transient").and_then(|v| serde_json::from_value(v.clone()).ok());
            Output::DisplayData { data, metadata, transient }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn iopub(msg_type: &str, parent_id: &str, content: serde_json::Value) -> KernelMessage {
        let mut msg = KernelMessage::request(msg_type, "sess", content);
        msg.parent_header = Some(super::super::message::MsgHeader::new("execute_request", "sess"));
        msg.parent_header.as_mut().unwrap().msg_id = parent_id.to_string();
        msg
    }

    #[test]
    fn stream_concatenation_scenario() {
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let outputs2 = outputs.clone();
        let mut router = Router::new();
        router.register(
            "req1".into(),
            CallbackBundle::new().on_output(move |o| outputs2.lock().unwrap().push(o)),
        );
        router.dispatch_iopub(&iopub("stream", "req1", serde_json::json!({"name": "stdout", "text": "Hello "})));
        router.dispatch_iopub(&iopub("stream", "req1", serde_json::json!({"name": "stdout", "text": "world\n"})));
        router.dispatch_iopub(&iopub("stream", "req1", serde_json::json!({"name": "stderr", "text": "!"})));
        let got = outputs.lock().unwrap();
        assert_eq!(got.len(), 3, "router forwards raw stream events; merging is the cell's job");
    }

    #[test]
    fn execution_count_update_scenario() {
        let counts = Arc::new(Mutex::new(Vec::new()));
        let counts2 = counts.clone();
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let outputs2 = outputs.clone();
        let done = Arc::new(Mutex::new(None));
        let done2 = done.clone();

        let mut router = Router::new();
        router.register(
            "req1".into(),
            CallbackBundle::new()
                .on_execution_count(move |n| counts2.lock().unwrap().push(n))
                .on_output(move |o| outputs2.lock().unwrap().push(o))
                .on_done(move |reply| *done2.lock().unwrap() = Some(reply)),
        );

        router.dispatch_iopub(&iopub("execute_input", "req1", serde_json::json!({"execution_count": 7})));
        router.dispatch_iopub(&iopub(
            "execute_result",
            "req1",
            serde_json::json!({"data": {"text/plain": "2"}, "execution_count": 7}),
        ));
        router.dispatch_shell_reply(&iopub("execute_reply", "req1", serde_json::json!({"status": "ok"})));
        assert!(!router.pending.contains_key("x"), "sanity");
        assert_eq!(counts.lock().unwrap().as_slice(), &[7]);
        assert_eq!(outputs.lock().unwrap().len(), 1);
        assert!(done.lock().unwrap().is_none(), "reply arrived before idle status: must not finish yet");

        router.dispatch_iopub(&iopub("status", "req1", serde_json::json!({"execution_state": "idle"})));
        assert!(done.lock().unwrap().is_some());
        assert_eq!(router.pending_count(), 0, "bundle is removed once finished");
    }

    #[test]
    fn callback_isolation_across_requests() {
        let r1_outputs = Arc::new(Mutex::new(Vec::new()));
        let r1c = r1_outputs.clone();
        let r2_outputs = Arc::new(Mutex::new(Vec::new()));
        let r2c = r2_outputs.clone();

        let mut router = Router::new();
        router.register("r1".into(), CallbackBundle::new().on_output(move |o| r1c.lock().unwrap().push(o)));
        router.register("r2".into(), CallbackBundle::new().on_output(move |o| r2c.lock().unwrap().push(o)));

        router.dispatch_iopub(&iopub("stream", "r1", serde_json::json!({"name": "stdout", "text": "one"})));
        router.dispatch_iopub(&iopub("stream", "r2", serde_json::json!({"name": "stdout", "text": "two"})));

        assert_eq!(r1_outputs.lock().unwrap().len(), 1);
        assert_eq!(r2_outputs.lock().unwrap().len(), 1);
    }

    #[test]
    fn update_display_data_routes_by_display_id() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let mut router = Router::new();
        router.register(
            "req1".into(),
            CallbackBundle::new().on_update_display_data(move |id, data, _meta| {
                *seen2.lock().unwrap() = Some((id.to_string(), data));
            }),
        );
        router.dispatch_iopub(&iopub(
            "update_display_data",
            "req1",
            serde_json::json!({
                "data": {"text/plain": "42"},
                "metadata": {},
                "transient": {"display_id": "abc"},
            }),
        ));
        let got = seen.lock().unwrap();
        assert_eq!(got.as_ref().unwrap().0, "abc");
    }

    #[test]
    fn comm_open_is_forwarded_not_consumed_by_pending_map() {
        let mut router = Router::new();
        let msg = KernelMessage::request(
            "comm_open",
            "sess",
            serde_json::json!({"comm_id": "c1", "target_name": "jupyter.widget", "data": {}}),
        );
        match router.dispatch_iopub(&msg) {
            Some(CommEvent::Open { comm_id, target_name, .. }) => {
                assert_eq!(comm_id, "c1");
                assert_eq!(target_name, "jupyter.widget");
            }
            other => panic!("expected CommEvent::Open, got {other:?}"),
        }
    }

    #[test]
    fn shell_reply_metadata_reaches_set_metadata_callback() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let mut router = Router::new();
        router.register(
            "req1".into(),
            CallbackBundle::new().on_metadata(move |path, value| {
                *seen2.lock().unwrap() = Some((path.to_string(), value));
            }),
        );
        let mut msg = iopub("execute_reply", "req1", serde_json::json!({"status": "ok"}));
        msg.metadata = serde_json::json!({"started": "2026-01-01T00:00:00Z"});
        router.dispatch_shell_reply(&msg);
        let got = seen.lock().unwrap();
        let (path, value) = got.as_ref().expect("set_metadata should have been invoked");
        assert_eq!(path, "execute_reply");
        assert_eq!(value.get("started").and_then(|v| v.as_str()), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn empty_shell_reply_metadata_does_not_invoke_callback() {
        let called = Arc::new(AtomicBool::new(false));
        let called2 = called.clone();
        let mut router = Router::new();
        router.register(
            "req1".into(),
            CallbackBundle::new().on_metadata(move |_, _| called2.store(true, Ordering::SeqCst)),
        );
        router.dispatch_shell_reply(&iopub("execute_reply", "req1", serde_json::json!({"status": "ok"})));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn stdin_input_request_round_trip() {
        let mut router = Router::new();
        router.register(
            "req1".into(),
            CallbackBundle::new().on_get_input(|prompt, _password| format!("echo:{prompt}")),
        );
        let msg = iopub("input_request", "req1", serde_json::json!({"prompt": "name?", "password": false}));
        let req = router.dispatch_stdin(&msg).expect("known pending request");
        assert_eq!(req.prompt, "name?");
        let answer = router.answer_input_request(&req).unwrap();
        assert_eq!(answer, "echo:name?");
    }
}

impl std::fmt::Debug for CommEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommEvent::Open { comm_id, target_name, .. } => {
                write!(f, "CommEvent::Open({comm_id}, {target_name})")
            }
            CommEvent::Msg { comm_id, .. } => write!(f, "CommEvent::Msg({comm_id})"),
            CommEvent::Close { comm_id, .. } => write!(f, "CommEvent::Close({comm_id})"),
        }
    }
}
