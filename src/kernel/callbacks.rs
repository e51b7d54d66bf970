// (C) 2025 - Enzo Lombardi

//! Per-request callback bundles (§3 "KernelRequest", §9's "callback
//! bundles carried through a kernel message loop" redesign note).
//!
//! A bundle is a record of boxed closures rather than a trait object with
//! one method per message type — callers (the viewport, a cell) build one
//! per request with exactly the handlers they need, leaving the rest as
//! no-ops. `done` is `FnOnce`: calling it ends the bundle's life, and
//! dropping a bundle without calling it silently cancels any outstanding
//! completion (§9).

use crate::notebook::{MimeBundle, Output};

/// The kernel state a `set_status` callback reports (§4.4's state
/// machine, restricted to the values that appear on `status` messages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
}

/// Functions a [`crate::kernel::KernelSession`] invokes as it routes
/// messages belonging to one request (§3 "KernelRequest").
///
/// All closures must be `Send`: they run on the kernel reactor thread
/// (§5) and are expected to either perform a tolerant mutation the UI
/// thread reads next frame, or request a redraw via a thread-safe
/// invalidate primitive — never touch the terminal directly.
pub struct CallbackBundle {
    pub get_input: Option<Box<dyn FnMut(&str, bool) -> String + Send>>,
    pub set_execution_count: Option<Box<dyn FnMut(i64) + Send>>,
    pub add_output: Option<Box<dyn FnMut(Output) + Send>>,
    pub clear_output: Option<Box<dyn FnMut(bool) + Send>>,
    pub set_metadata: Option<Box<dyn FnMut(&str, serde_json::Value) + Send>>,
    pub set_status: Option<Box<dyn FnMut(ExecutionState) + Send>>,
    pub set_kernel_info: Option<Box<dyn FnMut(serde_json::Value) + Send>>,
    pub update_display_data: Option<Box<dyn FnMut(&str, MimeBundle, MimeBundle) + Send>>,
    done: Option<Box<dyn FnOnce(serde_json::Value) + Send>>,
}

impl CallbackBundle {
    pub fn new() -> Self {
        Self {
            get_input: None,
            set_execution_count: None,
            add_output: None,
            clear_output: None,
            set_metadata: None,
            set_status: None,
            set_kernel_info: None,
            update_display_data: None,
            done: None,
        }
    }

    pub fn on_get_input(mut self, f: impl FnMut(&str, bool) -> String + Send + 'static) -> Self {
        self.get_input = Some(Box::new(f));
        self
    }

    pub fn on_execution_count(mut self, f: impl FnMut(i64) + Send + 'static) -> Self {
        self.set_execution_count = Some(Box::new(f));
        self
    }

    pub fn on_output(mut self, f: impl FnMut(Output) + Send + 'static) -> Self {
        self.add_output = Some(Box::new(f));
        self
    }

    pub fn on_clear_output(mut self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.clear_output = Some(Box::new(f));
        self
    }

    pub fn on_status(mut self, f: impl FnMut(ExecutionState) + Send + 'static) -> Self {
        self.set_status = Some(Box::new(f));
        self
    }

    pub fn on_metadata(mut self, f: impl FnMut(&str, serde_json::Value) + Send + 'static) -> Self {
        self.set_metadata = Some(Box::new(f));
        self
    }

    pub fn on_kernel_info(mut self, f: impl FnMut(serde_json::Value) + Send + 'static) -> Self {
        self.set_kernel_info = Some(Box::new(f));
        self
    }

    pub fn on_update_display_data(
        mut self,
        f: impl FnMut(&str, MimeBundle, MimeBundle) + Send + 'static,
    ) -> Self {
        self.update_display_data = Some(Box::new(f));
        self
    }

    pub fn on_done(mut self, f: impl FnOnce(serde_json::Value) + Send + 'static) -> Self {
        self.done = Some(Box::new(f));
        self
    }

    /// Invokes and consumes the `done` callback, per §3's "called once
    /// reply + idle status have been observed". A bundle with no `done`
    /// registered silently drops the reply.
    pub fn finish(mut self, reply: serde_json::Value) {
        if let Some(done) = self.done.take() {
            done(reply);
        }
    }
}

impl Default for CallbackBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBundle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn finish_invokes_done_exactly_once() {
        let called = Arc::new(AtomicBool::new(false));
        let called2 = called.clone();
        let bundle = CallbackBundle::new().on_done(move |_| called2.store(true, Ordering::SeqCst));
        bundle.finish(serde_json::json!({"status": "ok"}));
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn finish_without_done_registered_is_a_no_op() {
        let bundle = CallbackBundle::new();
        bundle.finish(serde_json::json!(null));
    }

    #[test]
    fn add_output_callback_receives_pushed_outputs() {
        use crate::notebook::StreamName;
        let collected = Arc::new(std::sync::Mutex::new(Vec::new()));
        let collected2 = collected.clone();
        let mut bundle = CallbackBundle::new().on_output(move |out| collected2.lock().unwrap().push(out));
        (bundle.add_output.as_mut().unwrap())(Output::Stream { name: StreamName::Stdout, text: "hi".into() });
        assert_eq!(collected.lock().unwrap().len(), 1);
    }
}
