// (C) 2025 - Enzo Lombardi

//! Library-level tunables.
//!
//! Loading a configuration file (paths, user preferences) is an
//! application-shell concern and stays out of this crate. What this crate
//! owns is a small, explicit set of tunables that callers construct and
//! pass in — no globals, no thread-locals.

use super::error::{EuporieError, Result};
use std::time::Duration;

/// Tunables for the kernel session, output renderer, graphics manager, and
/// terminal query layer.
///
/// Constructed with [`Default`] and overridden field-by-field; setters that
/// accept a range validate it, returning an error rather than silently
/// clamping.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    kernel_wait_for_ready: Duration,
    render_cache_capacity: usize,
    kitty_chunk_size: usize,
    terminal_query_deadline: Duration,
}

impl Settings {
    pub fn kernel_wait_for_ready(&self) -> Duration {
        self.kernel_wait_for_ready
    }

    /// Sets how long the kernel session waits for the kernel's initial
    /// `status: starting` → `idle` transition before giving up.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout` is outside 1s..=120s.
    pub fn set_kernel_wait_for_ready(&mut self, timeout: Duration) -> Result<()> {
        if timeout < Duration::from_secs(1) || timeout > Duration::from_secs(120) {
            return Err(EuporieError::invalid_input(format!(
                "kernel wait_for_ready must be between 1s and 120s, got {:?}",
                timeout
            )));
        }
        self.kernel_wait_for_ready = timeout;
        Ok(())
    }

    pub fn render_cache_capacity(&self) -> usize {
        self.render_cache_capacity
    }

    /// Sets the output renderer's bounded render-cache capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn set_render_cache_capacity(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(EuporieError::invalid_input(
                "render cache capacity must be at least 1",
            ));
        }
        self.render_cache_capacity = capacity;
        Ok(())
    }

    pub fn kitty_chunk_size(&self) -> usize {
        self.kitty_chunk_size
    }

    /// Sets the base64 chunk size used when transmitting Kitty graphics.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or not a multiple of 4 (base64
    /// chunk boundaries must align to encoded quartets).
    pub fn set_kitty_chunk_size(&mut self, size: usize) -> Result<()> {
        if size == 0 || size % 4 != 0 {
            return Err(EuporieError::invalid_input(format!(
                "kitty chunk size must be a positive multiple of 4, got {}",
                size
            )));
        }
        self.kitty_chunk_size = size;
        Ok(())
    }

    pub fn terminal_query_deadline(&self) -> Duration {
        self.terminal_query_deadline
    }

    /// Sets how long the terminal query layer waits for a capability
    /// query's reply before falling back to its default.
    ///
    /// # Errors
    ///
    /// Returns an error if `deadline` is zero or exceeds 1s (a single
    /// render tick should never stall meaningfully longer than that).
    pub fn set_terminal_query_deadline(&mut self, deadline: Duration) -> Result<()> {
        if deadline.is_zero() || deadline > Duration::from_secs(1) {
            return Err(EuporieError::invalid_input(format!(
                "terminal query deadline must be between 1ms and 1s, got {:?}",
                deadline
            )));
        }
        self.terminal_query_deadline = deadline;
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kernel_wait_for_ready: Duration::from_secs(30),
            render_cache_capacity: 50,
            kitty_chunk_size: 4096,
            terminal_query_deadline: Duration::from_millis(150),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.render_cache_capacity(), 50);
        assert_eq!(settings.kitty_chunk_size(), 4096);
    }

    #[test]
    fn rejects_out_of_range_kernel_timeout() {
        let mut settings = Settings::default();
        assert!(settings.set_kernel_wait_for_ready(Duration::from_millis(1)).is_err());
        assert!(settings.set_kernel_wait_for_ready(Duration::from_secs(31)).is_ok());
    }

    #[test]
    fn rejects_misaligned_kitty_chunk_size() {
        let mut settings = Settings::default();
        assert!(settings.set_kitty_chunk_size(4095).is_err());
        assert!(settings.set_kitty_chunk_size(0).is_err());
        assert!(settings.set_kitty_chunk_size(8192).is_ok());
    }

    #[test]
    fn rejects_zero_render_cache_capacity() {
        let mut settings = Settings::default();
        assert!(settings.set_render_cache_capacity(0).is_err());
    }
}
