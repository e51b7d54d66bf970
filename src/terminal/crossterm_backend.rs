// (C) 2025 - Enzo Lombardi

//! Crossterm-based backend implementation.
//!
//! This module provides the [`CrosstermBackend`] which implements the [`Backend`]
//! trait using crossterm for local terminal I/O. This is the default backend
//! used when running euporie-core locally.

use std::io::{self, Read, Write, stdout};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crossterm::{cursor, execute, terminal};

use super::backend::Backend;

/// Crossterm-based terminal backend for local terminal I/O.
///
/// Enters raw mode and the alternate screen on [`init`](Backend::init),
/// and provides the raw write/read primitives the terminal capability
/// query layer (§4.1) and the graphics out-of-band write path (§4.2)
/// are built on.
///
/// # Example
///
/// ```rust,no_run
/// use euporie_core::terminal::CrosstermBackend;
/// use euporie_core::terminal::Backend;
///
/// let mut backend = CrosstermBackend::new().unwrap();
/// backend.init().unwrap();
/// // ... use backend ...
/// backend.cleanup().unwrap();
/// ```
pub struct CrosstermBackend;

impl CrosstermBackend {
    /// Create a new crossterm backend.
    ///
    /// This does not initialize the terminal - call [`init`](Self::init) to
    /// enter raw mode and set up the terminal for TUI operation.
    ///
    /// # Errors
    ///
    /// This never actually fails; the `Result` is kept so a future backend
    /// that does need fallible setup doesn't change this constructor's
    /// signature.
    pub fn new() -> io::Result<Self> {
        Ok(Self)
    }
}

impl Backend for CrosstermBackend {
    fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide)?;

        // Disable autowrap (DECAWM) to prevent scrolling when writing to bottom-right corner
        write!(stdout, "\x1b[?7l")?;
        stdout.flush()?;

        Ok(())
    }

    fn cleanup(&mut self) -> io::Result<()> {
        let mut stdout = stdout();

        // Re-enable autowrap (DECAWM) before leaving
        write!(stdout, "\x1b[?7h")?;

        execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen)?;
        terminal::disable_raw_mode()?;
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        stdout().write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        stdout().flush()
    }

    fn read_raw(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            if let Ok(n) = io::stdin().lock().read(&mut buf) {
                if n > 0 {
                    let _ = tx.send(buf[..n].to_vec());
                }
            }
        });

        Ok(rx.recv_timeout(timeout).unwrap_or_default())
    }
}

impl Default for CrosstermBackend {
    fn default() -> Self {
        Self::new().expect("Failed to create CrosstermBackend")
    }
}
