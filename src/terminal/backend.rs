// (C) 2025 - Enzo Lombardi

//! Backend trait for terminal I/O abstraction.
//!
//! This module defines the [`Backend`] trait that abstracts low-level terminal
//! operations, keeping the rest of euporie-core independent of how bytes
//! actually reach the terminal.
//!
//! Terminal input parsing and the rest of an interactive TUI's rendering
//! apparatus (double buffering, clipping, cursor/mouse handling) are an
//! application-shell concern, out of scope here (§1). What this crate
//! needs from a backend is just enough to discover terminal capabilities
//! (§4.1) and write graphics escape sequences out of band (§4.2): raw
//! mode lifecycle, and raw read/write.

use std::io;
use std::time::Duration;

/// The core abstraction for terminal I/O operations.
///
/// This trait defines the interface backends must implement: entering
/// and leaving raw/alternate-screen mode, and raw byte I/O. The
/// [`Terminal`](super::Terminal) struct built on top of it handles the
/// terminal capability query layer (§4.1) and the graphics out-of-band
/// write path (§4.2).
pub trait Backend: Send {
    /// Initialize the backend.
    ///
    /// This should set up the terminal for TUI operation:
    /// - Enter raw mode (no line buffering, no echo)
    /// - Enter alternate screen buffer
    /// - Hide cursor
    /// - Disable line wrapping
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn init(&mut self) -> io::Result<()>;

    /// Clean up and restore the backend to its original state.
    ///
    /// This should reverse all changes made by [`init`](Self::init):
    /// - Show cursor
    /// - Leave alternate screen
    /// - Disable raw mode
    /// - Re-enable line wrapping
    ///
    /// # Errors
    ///
    /// Returns an error if cleanup fails. Note that cleanup failures
    /// are often non-fatal and the terminal may still be usable.
    fn cleanup(&mut self) -> io::Result<()>;

    /// Write raw data to the terminal.
    ///
    /// This writes bytes directly to the terminal output without any
    /// processing. Used for ANSI escape sequences.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_raw(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush any buffered output to the terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&mut self) -> io::Result<()>;

    /// Read whatever raw input bytes arrive within `timeout`.
    ///
    /// This exists for the terminal capability query layer, which needs to
    /// read OSC/CSI query replies that are not keyboard or mouse events.
    /// Backends that cannot distinguish query replies from ordinary input
    /// (or that have no raw input stream at all) may keep the default,
    /// which always reports no reply; callers fall back to the query's
    /// default value.
    ///
    /// # Errors
    ///
    /// Returns an error if the read itself fails (not on timeout).
    fn read_raw(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let _ = timeout;
        Ok(Vec::new())
    }
}
