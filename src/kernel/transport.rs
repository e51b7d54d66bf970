// (C) 2025 - Enzo Lombardi

//! The wire-transport seam the reactor polls (§4.4, §6).
//!
//! Binding the five Jupyter channels to real ZeroMQ sockets against a
//! connection file is an infrastructure concern the application shell
//! owns, the same way `convert()` and config loading are named as
//! external collaborators in §1 — this crate defines the shape the
//! reactor drives and dispatches against ([`KernelTransport`],
//! [`KernelLauncher`]) and tests it with an in-memory double
//! ([`ChannelTransport`]); a production build supplies a launcher that
//! spawns the kernel process and wires its ZMQ sockets into the same
//! trait.

use super::message::KernelMessage;
use crate::notebook::KernelSpec;
use std::collections::HashMap;
use std::io;

/// The non-blocking, poll-once view of the three channels the reactor
/// reads from. `shell`/`control`/`stdin` sends are fire-and-forget; the
/// corresponding reply is a later `try_recv_shell`/`try_recv_stdin` call.
pub trait KernelTransport: Send {
    fn send_shell(&mut self, msg: &KernelMessage) -> io::Result<()>;
    fn send_control(&mut self, msg: &KernelMessage) -> io::Result<()>;
    fn send_stdin(&mut self, msg: &KernelMessage) -> io::Result<()>;

    /// Returns the next buffered iopub message, if any, without blocking.
    fn try_recv_iopub(&mut self) -> Option<KernelMessage>;
    /// Returns the next buffered shell reply, if any, without blocking.
    fn try_recv_shell(&mut self) -> Option<KernelMessage>;
    /// Returns the next buffered stdin request, if any, without blocking.
    fn try_recv_stdin(&mut self) -> Option<KernelMessage>;
}

/// Finds, launches, and tears down the kernel process behind a
/// [`KernelTransport`] (§4.4's `start`/`interrupt`/`shutdown`).
pub trait KernelLauncher: Send {
    /// Installed kernelspecs, keyed by name (§4.4 `specs`).
    fn specs(&self) -> HashMap<String, KernelSpec>;

    /// Starts the named kernel and returns a connected transport along
    /// with the HMAC-SHA256 key from its connection file (§4.4, §7 —
    /// incoming messages are verified against this key), or an error if
    /// the kernelspec is missing or the process failed to become ready
    /// (§4.4 state machine, §7).
    fn launch(&mut self, name: &str) -> Result<(Box<dyn KernelTransport>, Vec<u8>), LaunchError>;

    /// Sends the kernel process an interrupt signal. Synchronous,
    /// per §4.4/§5: this must not wait for in-flight reactor work.
    fn interrupt(&mut self);

    /// Shuts the kernel process down.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// No such kernelspec is installed.
    Missing,
    /// The kernel process did not become ready before the deadline.
    StartFailure(String),
}

/// An in-memory [`KernelTransport`] double driven by queued messages —
/// used to test the reactor and [`super::router::Router`] without a real
/// kernel process or ZMQ socket (§10.4).
#[derive(Default)]
pub struct ChannelTransport {
    pub sent_shell: Vec<KernelMessage>,
    pub sent_control: Vec<KernelMessage>,
    pub sent_stdin: Vec<KernelMessage>,
    pub iopub_inbox: std::collections::VecDeque<KernelMessage>,
    pub shell_inbox: std::collections::VecDeque<KernelMessage>,
    pub stdin_inbox: std::collections::VecDeque<KernelMessage>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_iopub(&mut self, msg: KernelMessage) {
        self.iopub_inbox.push_back(msg);
    }

    pub fn push_shell_reply(&mut self, msg: KernelMessage) {
        self.shell_inbox.push_back(msg);
    }
}

impl KernelTransport for ChannelTransport {
    fn send_shell(&mut self, msg: &KernelMessage) -> io::Result<()> {
        self.sent_shell.push(msg.clone());
        Ok(())
    }

    fn send_control(&mut self, msg: &KernelMessage) -> io::Result<()> {
        self.sent_control.push(msg.clone());
        Ok(())
    }

    fn send_stdin(&mut self, msg: &KernelMessage) -> io::Result<()> {
        self.sent_stdin.push(msg.clone());
        Ok(())
    }

    fn try_recv_iopub(&mut self) -> Option<KernelMessage> {
        self.iopub_inbox.pop_front()
    }

    fn try_recv_shell(&mut self) -> Option<KernelMessage> {
        self.shell_inbox.pop_front()
    }

    fn try_recv_stdin(&mut self) -> Option<KernelMessage> {
        self.stdin_inbox.pop_front()
    }
}
