// (C) 2025 - Enzo Lombardi

//! Terminal capability query layer.
//!
//! Learns what the connected terminal actually supports — true color,
//! pixel dimensions, Sixel/Kitty graphics — by writing a batch of query
//! escape sequences and classifying whatever comes back before the next
//! render tick. Callers never block past the deadline; an unanswered
//! query just keeps its documented default.

use super::backend::Backend;
use std::time::Duration;

/// Terminal properties discovered by [`query`], or their documented
/// defaults when a query went unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalCapabilities {
    pub fg: Option<(u8, u8, u8)>,
    pub bg: Option<(u8, u8, u8)>,
    pub pixel_size: Option<(u16, u16)>,
    pub sixel: bool,
    pub kitty_graphics: bool,
}

const QUERY_FG: &[u8] = b"\x1b]10;?\x1b\\";
const QUERY_BG: &[u8] = b"\x1b]11;?\x1b\\";
const QUERY_PIXEL_SIZE: &[u8] = b"\x1b[14t";
const QUERY_PRIMARY_DA: &[u8] = b"\x1b[c";
// Transmit a 1x1 placeholder image under a reserved id, then ask for its
// status. A terminal with Kitty graphics support answers with `OK`; one
// without never answers at all, and the query just times out.
const QUERY_KITTY: &[u8] =
    b"\x1b_Gi=4294967295,s=1,v=1,a=q,t=d,f=24;AAAA\x1b\\";

/// Write every query in one burst and classify whatever arrives before
/// `deadline`. Missing a reply leaves the corresponding field at its
/// default (see [`TerminalCapabilities::default`]).
///
/// # Errors
///
/// Returns an error only if writing the query burst itself fails; a
/// timed-out read is not an error.
pub fn query(backend: &mut dyn Backend, deadline: Duration) -> std::io::Result<TerminalCapabilities> {
    let mut burst = Vec::new();
    burst.extend_from_slice(QUERY_FG);
    burst.extend_from_slice(QUERY_BG);
    burst.extend_from_slice(QUERY_PIXEL_SIZE);
    burst.extend_from_slice(QUERY_PRIMARY_DA);
    burst.extend_from_slice(QUERY_KITTY);
    backend.write_raw(&burst)?;
    backend.flush()?;

    let reply = backend.read_raw(deadline)?;
    Ok(classify(&reply))
}

/// Wrap a raw escape sequence for passthrough through a terminal
/// multiplexer so the *outer* terminal answers the query instead of the
/// multiplexer swallowing it: `ESC Ptmux; <ESC doubled> ESC \`.
pub fn wrap_tmux_passthrough(sequence: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sequence.len() + 8);
    out.extend_from_slice(b"\x1bPtmux;");
    for &byte in sequence {
        if byte == 0x1b {
            out.push(0x1b);
        }
        out.push(byte);
    }
    out.extend_from_slice(b"\x1b\\");
    out
}

fn classify(reply: &[u8]) -> TerminalCapabilities {
    let mut caps = TerminalCapabilities::default();
    caps.fg = find_osc_color(reply, b"10;");
    caps.bg = find_osc_color(reply, b"11;");
    caps.pixel_size = find_pixel_size(reply);
    caps.sixel = find_sixel_support(reply);
    caps.kitty_graphics = find_kitty_ok(reply);
    caps
}

/// Find `ESC ] <prefix> rgb : RRRR / GGGG / BBBB (ESC \ | BEL)` and return
/// the high byte of each 16-bit channel.
fn find_osc_color(reply: &[u8], prefix: &[u8]) -> Option<(u8, u8, u8)> {
    let marker = [b"\x1b]".as_slice(), prefix].concat();
    let start = find_subslice(reply, &marker)? + marker.len();
    let rest = &reply[start..];
    let body_end = rest
        .iter()
        .position(|&b| b == 0x07 || b == 0x1b)
        .unwrap_or(rest.len());
    let body = std::str::from_utf8(&rest[..body_end]).ok()?;
    let body = body.strip_prefix("rgb:")?;
    let mut parts = body.split('/');
    let r = u16::from_str_radix(parts.next()?, 16).ok()?;
    let g = u16::from_str_radix(parts.next()?, 16).ok()?;
    let b = u16::from_str_radix(parts.next()?, 16).ok()?;
    Some(((r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8))
}

/// Find `ESC [ 4 ; H ; W t` (CSI 14 t reply) and return `(width, height)`.
fn find_pixel_size(reply: &[u8]) -> Option<(u16, u16)> {
    let marker = b"\x1b[4;";
    let start = find_subslice(reply, marker)? + marker.len();
    let rest = &reply[start..];
    let end = rest.iter().position(|&b| b == b't')?;
    let body = std::str::from_utf8(&rest[..end]).ok()?;
    let mut parts = body.split(';');
    let height: u16 = parts.next()?.parse().ok()?;
    let width: u16 = parts.next()?.parse().ok()?;
    Some((width, height))
}

/// Find the primary device-attributes reply and check for Sixel support
/// (attribute `4` in the `ESC [ ? ... c` parameter list).
fn find_sixel_support(reply: &[u8]) -> bool {
    let Some(start) = find_subslice(reply, b"\x1b[?") else {
        return false;
    };
    let rest = &reply[start + 3..];
    let Some(end) = rest.iter().position(|&b| b == b'c') else {
        return false;
    };
    let Ok(body) = std::str::from_utf8(&rest[..end]) else {
        return false;
    };
    body.split(';').any(|attr| attr == "4")
}

/// Find the Kitty graphics status reply for our reserved probe id.
fn find_kitty_ok(reply: &[u8]) -> bool {
    find_subslice(reply, b"i=4294967295;OK").is_some()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
