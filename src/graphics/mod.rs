// (C) 2025 - Enzo Lombardi

//! The Graphics Manager (§4.2): owns out-of-band terminal graphic objects
//! and emits the minimal draw/hide/delete commands needed to keep the
//! screen in sync with the UI compositor.
//!
//! [`GraphicsManager`] follows the classic `add`/`remove`/`before_render`/
//! `after_render` shape used by terminal image-protocol renderers, and
//! [`Protocol::Kitty`]'s chunked-transmit/place/hide/delete framing
//! matches the Kitty graphics protocol's escape sequence subset exactly.
//! Visibility is an externally-set flag rather than an embedded filter
//! closure — the caller (the viewport, weighing cell obscurement) decides
//! and calls [`GraphicsManager::set_visible`] once per frame, which keeps
//! this module synchronously testable without capturing `dyn Fn`s across
//! the UI/kernel thread boundary (§5).

use base64::Engine;
use std::collections::HashMap;

/// Dense integer handle for a registered graphic (§3 "Graphic").
pub type GraphicId = u32;

/// Which out-of-band terminal graphics protocol is in use for this
/// session (chosen once, from [`crate::terminal::query::TerminalCapabilities`]).
pub enum Protocol {
    /// Re-encodes on every draw; hide/delete are no-ops (§4.2).
    Sixel { encode: Box<dyn Fn(&[u8], u16, u16) -> Vec<u8> + Send> },
    Kitty,
    ITerm,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Sixel { .. } => "Sixel",
            Protocol::Kitty => "Kitty",
            Protocol::ITerm => "ITerm",
        };
        write!(f, "Protocol::{name}")
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct KittyState {
    loaded: bool,
    image_id: Option<GraphicId>,
    shown: bool,
}

/// A registered terminal graphic (§3 "Graphic").
#[derive(Debug)]
pub struct Graphic {
    id: GraphicId,
    data: Vec<u8>,
    encoded: Option<String>,
    visible: bool,
    last_visible: bool,
    pub bg_color: Option<(u8, u8, u8)>,
    pub xpos: u16,
    pub ypos: u16,
    pub width_cells: u16,
    pub height_cells: u16,
    redraw: bool,
    kitty: KittyState,
}

impl Graphic {
    pub fn id(&self) -> GraphicId {
        self.id
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    fn encoded(&mut self) -> &str {
        self.encoded.get_or_insert_with(|| base64::engine::general_purpose::STANDARD.encode(&self.data))
    }

    /// Sets the graphic's display position, flagging a redraw if it moved
    /// (§4.2, mirroring `TerminalGraphic.set_position`).
    pub fn set_position(&mut self, xpos: u16, ypos: u16) {
        if self.xpos != xpos || self.ypos != ypos {
            self.xpos = xpos;
            self.ypos = ypos;
            self.redraw = true;
        }
    }

    /// Sets the graphic's cell dimensions, flagging a redraw if changed.
    pub fn set_size(&mut self, width_cells: u16, height_cells: u16) {
        if self.width_cells != width_cells || self.height_cells != height_cells {
            self.width_cells = width_cells;
            self.height_cells = height_cells;
            self.redraw = true;
        }
    }
}

/// Owns the live set of terminal graphics and produces the byte sequences
/// to send to the terminal each frame.
pub struct GraphicsManager {
    protocol: Protocol,
    graphics: HashMap<GraphicId, Graphic>,
    next_id: GraphicId,
}

impl GraphicsManager {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol, graphics: HashMap::new(), next_id: 0 }
    }

    /// Registers a graphic carrying `data` (PNG or JPEG bytes, per §6).
    /// Starts hidden, per §4.2's `add` contract.
    pub fn add(&mut self, data: Vec<u8>, bg_color: Option<(u8, u8, u8)>) -> GraphicId {
        let id = self.next_id;
        self.next_id += 1;
        self.graphics.insert(
            id,
            Graphic {
                id,
                data,
                encoded: None,
                visible: false,
                last_visible: false,
                bg_color,
                xpos: 0,
                ypos: 0,
                width_cells: 0,
                height_cells: 0,
                redraw: false,
                kitty: KittyState::default(),
            },
        );
        id
    }

    pub fn get(&self, id: GraphicId) -> Option<&Graphic> {
        self.graphics.get(&id)
    }

    pub fn get_mut(&mut self, id: GraphicId) -> Option<&mut Graphic> {
        self.graphics.get_mut(&id)
    }

    /// Issues the protocol's delete command and forgets the graphic.
    pub fn remove(&mut self, id: GraphicId) -> Option<Vec<u8>> {
        let mut graphic = self.graphics.remove(&id)?;
        Some(self.protocol.delete(&mut graphic))
    }

    /// Sets a graphic's visibility for the next frame; the viewport calls
    /// this once per cell output carrying a graphic handle (§4.2, §4.6
    /// "Graphic placement").
    pub fn set_visible(&mut self, id: GraphicId, visible: bool) {
        if let Some(g) = self.graphics.get_mut(&id) {
            g.visible = visible;
        }
    }

    /// Hides any graphic whose visibility is now false (§4.2 `before_render`,
    /// §8 "Graphics hidden invariant"). Returns the hide commands to emit.
    pub fn before_render(&mut self) -> Vec<Vec<u8>> {
        let Self { protocol, graphics, .. } = self;
        let mut commands = Vec::new();
        for g in graphics.values_mut() {
            sync_visibility(g);
            if !g.visible {
                let cmd = protocol.hide(g);
                if !cmd.is_empty() {
                    commands.push(cmd);
                }
            }
        }
        commands
    }

    /// Draws every visible graphic flagged for redraw, hides the rest
    /// (§4.2 `after_render`). `cursor_visible` restores the compositor's
    /// last-rendered cursor visibility after each draw.
    pub fn after_render(&mut self, cursor_visible: bool) -> Vec<Vec<u8>> {
        let Self { protocol, graphics, .. } = self;
        let mut commands = Vec::new();
        for g in graphics.values_mut() {
            sync_visibility(g);
            if g.visible && g.redraw {
                let mut cmd = Vec::with_capacity(32);
                cmd.extend_from_slice(b"\x1b[s");
                cmd.extend_from_slice(format!("\x1b[{};{}H", g.ypos + 1, g.xpos + 1).as_bytes());
                cmd.extend(protocol.draw(g));
                cmd.extend_from_slice(b"\x1b[u");
                cmd.extend_from_slice(if cursor_visible { b"\x1b[?25h" } else { b"\x1b[?25l" });
                g.redraw = false;
                commands.push(cmd);
            } else if !g.visible {
                let cmd = protocol.hide(g);
                if !cmd.is_empty() {
                    commands.push(cmd);
                }
            }
        }
        commands
    }
}

/// Flags a redraw the first time a graphic's visibility differs from what
/// was last observed (§4.2, mirroring `TerminalGraphic.visible()`'s side
/// effect).
fn sync_visibility(g: &mut Graphic) {
    if g.last_visible != g.visible {
        g.redraw = true;
    }
    g.last_visible = g.visible;
}

impl Protocol {
    fn draw(&mut self, g: &mut Graphic) -> Vec<u8> {
        match self {
            Protocol::Sixel { encode } => encode(&g.data, g.width_cells, g.height_cells),
            Protocol::Kitty => {
                let mut out = Vec::new();
                if !g.kitty.loaded {
                    out.extend(kitty_transmit(g.id, g.encoded()));
                    g.kitty.loaded = true;
                    g.kitty.image_id = Some(g.id);
                }
                g.kitty.shown = true;
                let image_id = g.kitty.image_id.unwrap_or(g.id);
                out.extend(kitty_cmd(
                    &[],
                    &[
                        ("a", "p".into()),
                        ("i", image_id.to_string()),
                        ("p", "1".into()),
                        ("m", "0".into()),
                        ("q", "2".into()),
                        ("c", g.width_cells.to_string()),
                        ("r", g.height_cells.to_string()),
                        ("C", "1".into()),
                        ("z", (-(2i64.pow(30)) - 1).to_string()),
                    ],
                ));
                out
            }
            Protocol::ITerm => {
                format!(
                    "\x1b]1337;File=inline=1;width={};height={}:{}\x07",
                    g.width_cells,
                    g.height_cells,
                    g.encoded()
                )
                .into_bytes()
            }
        }
    }

    fn hide(&mut self, g: &mut Graphic) -> Vec<u8> {
        match self {
            Protocol::Sixel { .. } | Protocol::ITerm => Vec::new(),
            Protocol::Kitty => {
                if g.kitty.shown {
                    g.kitty.shown = false;
                    kitty_cmd(
                        &[],
                        &[("a", "d".into()), ("d", "i".into()), ("i", g.kitty.image_id.unwrap_or(g.id).to_string()), ("q", "1".into())],
                    )
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn delete(&mut self, g: &mut Graphic) -> Vec<u8> {
        match self {
            Protocol::Sixel { .. } | Protocol::ITerm => Vec::new(),
            Protocol::Kitty => {
                if g.kitty.loaded {
                    g.kitty.shown = false;
                    kitty_cmd(
                        &[],
                        &[("a", "D".into()), ("d", "I".into()), ("i", g.kitty.image_id.unwrap_or(g.id).to_string()), ("q", "2".into())],
                    )
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// One Kitty APC escape: `ESC _G<params>[;<chunk>]ESC \` (§6).
fn kitty_cmd(chunk: &[u8], params: &[(&str, String)]) -> Vec<u8> {
    let param_str = params.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    let mut cmd = format!("\x1b_G{param_str}").into_bytes();
    if !chunk.is_empty() {
        cmd.push(b';');
        cmd.extend_from_slice(chunk);
    }
    cmd.extend_from_slice(b"\x1b\\");
    cmd
}

/// Transmits `encoded` (a base64 PNG/JPEG) in 4096-byte chunks with
/// `a=t, t=d` (§4.2 "on first use, transmit the image").
fn kitty_transmit(id: GraphicId, encoded: &str) -> Vec<u8> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::new();
    let mut offset = 0;
    if bytes.is_empty() {
        return kitty_cmd(&[], &[("a", "t".into()), ("t", "d".into()), ("i", id.to_string()), ("p", "1".into()), ("q", "0".into()), ("f", "100".into()), ("m", "0".into())]);
    }
    while offset < bytes.len() {
        let end = (offset + 4096).min(bytes.len());
        let chunk = &bytes[offset..end];
        let more = end < bytes.len();
        out.extend(kitty_cmd(
            chunk,
            &[
                ("a", "t".into()),
                ("t", "d".into()),
                ("i", id.to_string()),
                ("p", "1".into()),
                ("q", "0".into()),
                ("f", "100".into()),
                ("m", if more { "1" } else { "0" }.into()),
            ],
        ));
        offset = end;
    }
    out
}
