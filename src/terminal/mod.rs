// (C) 2025 - Enzo Lombardi

//! Terminal abstraction layer.
//!
//! This module provides the [`Terminal`] type, the thin layer the core
//! actually needs on top of a [`Backend`]: raw-mode lifecycle, the
//! terminal capability query layer (§4.1), and an out-of-band raw write
//! path for terminal graphics (§4.2). Double-buffered cell rendering,
//! input parsing, and the rest of an interactive TUI shell's apparatus
//! are out of scope (§1) — this crate only ever pokes graphics escape
//! sequences directly at the terminal, never draws text itself.
//!
//! # Backend Architecture
//!
//! The terminal uses a [`Backend`] trait to abstract low-level I/O operations.
//! [`CrosstermBackend`] is the only implementation today, but nothing above
//! the trait boundary assumes a local terminal.
//!
//! # Examples
//!
//! ```rust,no_run
//! use euporie_core::terminal::Terminal;
//! use euporie_core::core::error::Result;
//!
//! fn main() -> Result<()> {
//!     let mut terminal = Terminal::init()?;
//!
//!     // Use terminal for graphics writes and capability queries...
//!
//!     terminal.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! Using a custom backend:
//!
//! ```rust,no_run
//! use euporie_core::terminal::{Terminal, CrosstermBackend};
//! use euporie_core::core::error::Result;
//!
//! fn main() -> Result<()> {
//!     let backend = CrosstermBackend::new()?;
//!     let mut terminal = Terminal::with_backend(Box::new(backend))?;
//!     // ...
//!     terminal.shutdown()?;
//!     Ok(())
//! }
//! ```

mod backend;
mod crossterm_backend;
pub mod query;

pub use backend::Backend;
pub use crossterm_backend::CrosstermBackend;
pub use query::TerminalCapabilities;

use crate::core::error::Result;
use std::io;
use std::time::Duration;

/// Terminal abstraction for the capability query layer and out-of-band
/// graphics writes. Low-level I/O is delegated to a [`Backend`]
/// implementation.
pub struct Terminal {
    backend: Box<dyn Backend>,
}

impl Terminal {
    /// Initializes a new terminal instance using the default crossterm backend.
    ///
    /// This function sets up the terminal for full-screen TUI operation by:
    /// - Enabling raw mode (no line buffering, no echo)
    /// - Entering alternate screen buffer
    /// - Hiding the cursor
    ///
    /// The terminal is automatically restored to normal mode when dropped,
    /// but it's recommended to call [`shutdown()`](Self::shutdown) explicitly
    /// for better error handling.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to initialize (e.g. raw mode
    /// or the alternate screen cannot be entered).
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use euporie_core::terminal::Terminal;
    /// use euporie_core::core::error::Result;
    ///
    /// fn main() -> Result<()> {
    ///     let mut terminal = Terminal::init()?;
    ///     // Terminal is now in raw mode with alternate screen
    ///     terminal.shutdown()?;
    ///     Ok(())
    /// }
    /// ```
    pub fn init() -> Result<Self> {
        let backend = CrosstermBackend::new()?;
        Self::with_backend(Box::new(backend))
    }

    /// Initializes a new terminal instance with a custom backend.
    ///
    /// This allows swapping in an alternative [`Backend`] implementation
    /// instead of the default [`CrosstermBackend`].
    ///
    /// # Arguments
    ///
    /// * `backend` - The backend implementation to use for I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use euporie_core::terminal::{Terminal, CrosstermBackend};
    /// use euporie_core::core::error::Result;
    ///
    /// fn main() -> Result<()> {
    ///     let backend = CrosstermBackend::new()?;
    ///     let mut terminal = Terminal::with_backend(Box::new(backend))?;
    ///     terminal.shutdown()?;
    ///     Ok(())
    /// }
    /// ```
    pub fn with_backend(mut backend: Box<dyn Backend>) -> Result<Self> {
        backend.init()?;
        Ok(Self { backend })
    }

    /// Shuts down the terminal and restores normal mode.
    ///
    /// This function restores the terminal to its original state by:
    /// - Showing the cursor
    /// - Leaving alternate screen buffer
    /// - Disabling raw mode
    ///
    /// # Errors
    ///
    /// Returns an error if terminal restoration fails. In most cases, the
    /// terminal will still be usable even if an error occurs.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use euporie_core::terminal::Terminal;
    /// # use euporie_core::core::error::Result;
    /// # fn main() -> Result<()> {
    /// let mut terminal = Terminal::init()?;
    /// // Use terminal...
    /// terminal.shutdown()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn shutdown(&mut self) -> Result<()> {
        self.backend.cleanup()?;
        Ok(())
    }

    /// Write bytes straight to the terminal, bypassing any text compositor.
    ///
    /// The graphics manager uses this to emit Sixel/Kitty/iTerm image
    /// escape sequences: those commands paint pixels a cell-grid
    /// compositor knows nothing about, so a diffed line-based writer
    /// would never emit them. This is a direct [`Backend::write_raw`] +
    /// `flush`, so output ordering relative to other writes is preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    pub fn write_raw_passthrough(&mut self, data: &[u8]) -> io::Result<()> {
        self.backend.write_raw(data)?;
        self.backend.flush()
    }

    /// Run the terminal capability query layer: discover true-color
    /// support, pixel dimensions, and which graphics protocols the
    /// terminal answers to, within `deadline`.
    ///
    /// Unanswered queries resolve to their documented defaults; this
    /// never blocks past `deadline`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the query burst fails.
    pub fn query_capabilities(&mut self, deadline: Duration) -> io::Result<TerminalCapabilities> {
        query::query(self.backend.as_mut(), deadline)
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
