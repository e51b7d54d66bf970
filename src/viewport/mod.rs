// (C) 2025 - Enzo Lombardi

//! The Scrolling Cell Viewport (§4.6): arranges a long list of cells into
//! a scrollable, selectable region that only renders the cells touching
//! the visible window.
//!
//! Follows the same anchor-based focus/selection/navigation shape as a
//! fixed-row-height list box, generalized to cells of varying measured
//! height: the anchor-based up/down accumulation in [`Viewport::arrange`]
//! replaces a fixed row stride with a per-cell height lookup.

use crate::notebook::CellId;
use std::collections::HashMap;

/// A half-open (or, for `step == -1`, half-open descending) selection
/// range over cell positions, mirroring a Python slice (§4.6 inputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSlice {
    pub start: usize,
    /// Exclusive bound. `-1` is a valid sentinel meaning "through index 0"
    /// when `step == -1`.
    pub stop: isize,
    pub step: i8,
}

impl SelectionSlice {
    fn single(i: usize) -> Self {
        Self { start: i, stop: i as isize + 1, step: 1 }
    }

    /// Every index the slice covers, in traversal order.
    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.start as isize;
        loop {
            if self.step > 0 {
                if cur >= self.stop {
                    break;
                }
            } else if cur <= self.stop {
                break;
            }
            out.push(cur as usize);
            cur += self.step as isize;
        }
        out
    }

    pub fn contains(&self, i: usize) -> bool {
        self.indices().contains(&i)
    }
}

/// One cell's placement within the current frame's drawing set (§4.6
/// "arrangement algorithm").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawingSlot {
    pub cell_id: CellId,
    /// Row offset from the top of the viewport. May be negative or exceed
    /// the viewport height — the caller crops to `[0, viewport_height)`.
    pub top: isize,
    pub height: usize,
}

/// Placement for a cell focused outside the current drawing set (§4.6
/// "a focus change to a cell not currently in the drawing set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPlacement {
    Top,
    Bottom,
}

/// Scrollable, selectable presentation state for a list of cells.
///
/// Owns no cell data itself — callers supply the ordered id list, a width,
/// and a height function each frame, per §4.6's `children()` input.
pub struct Viewport {
    selected_child_position: isize,
    slice: SelectionSlice,
    measurement_cache: HashMap<CellId, (u16, usize)>,
    render_cache: HashMap<CellId, (u16, Vec<String>)>,
    scroll_to_cursor: bool,
    edit_mode: bool,
    /// The drawing set produced by the previous [`Viewport::arrange`] call,
    /// kept so the next call can tell whether the (possibly new) anchor
    /// was already on screen. Empty before the first frame.
    last_drawn: Vec<DrawingSlot>,
}

impl Viewport {
    pub fn new() -> Self {
        Self {
            selected_child_position: 0,
            slice: SelectionSlice::single(0),
            measurement_cache: HashMap::new(),
            render_cache: HashMap::new(),
            scroll_to_cursor: false,
            edit_mode: false,
            last_drawn: Vec::new(),
        }
    }

    pub fn selection(&self) -> SelectionSlice {
        self.slice
    }

    pub fn anchor(&self) -> usize {
        self.slice.start
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn set_edit_mode(&mut self, edit_mode: bool) {
        self.edit_mode = edit_mode;
    }

    pub fn request_scroll_to_cursor(&mut self) {
        self.scroll_to_cursor = true;
    }

    /// Selects position `i`. `extend` grows the existing slice to include
    /// `i` (reversing `step` if `i` lies before the anchor); otherwise the
    /// slice collapses to `[i, i+1, +1]` (§4.6 "Selection semantics").
    pub fn select(&mut self, i: usize) {
        self.slice = SelectionSlice::single(i);
    }

    pub fn select_extend(&mut self, i: usize) {
        let anchor = self.slice.start;
        self.slice = if i >= anchor {
            SelectionSlice { start: anchor, stop: i as isize + 1, step: 1 }
        } else {
            SelectionSlice { start: anchor, stop: i as isize - 1, step: -1 }
        };
    }

    /// Moves the current selection by `delta` positions. A no-op if doing
    /// so would move any selected cell outside `[0, total)` (§8 boundary
    /// behavior).
    pub fn shift(&mut self, delta: isize, total: usize) {
        if total == 0 {
            return;
        }
        let indices = self.slice.indices();
        for i in &indices {
            let shifted = *i as isize + delta;
            if shifted < 0 || shifted >= total as isize {
                return;
            }
        }
        self.slice = SelectionSlice {
            start: (self.slice.start as isize + delta) as usize,
            stop: self.slice.stop + delta,
            step: self.slice.step,
        };
    }

    /// `home`/`end` navigation (§4.6).
    pub fn select_first(&mut self) {
        self.select(0);
    }

    pub fn select_last(&mut self, total: usize) {
        if total > 0 {
            self.select(total - 1);
        }
    }

    /// Moves the focused cell to position `i`, placing it flush at the top
    /// or bottom of the viewport if it falls outside `drawn` (§4.6, §8 "a
    /// focus change to a cell not currently in the drawing set").
    ///
    /// `cells` is the same ordered id list `arrange` was called with; a
    /// cell's id is an arena id decoupled from its Vec position (see
    /// `notebook::Notebook`'s ever-incrementing `next_id`), so membership in
    /// `drawn` must be checked against `cells[i]`, never a synthesized id.
    pub fn focus(&mut self, i: usize, cells: &[CellId], drawn: &[DrawingSlot], cell_height: usize, viewport_height: usize) {
        self.select(i);
        let target_id = cells[i];
        if drawn.iter().any(|s| s.cell_id == target_id) {
            return;
        }
        let Some(first) = drawn.first() else {
            self.selected_child_position = 0;
            return;
        };
        let first_idx = cells.iter().position(|&id| id == first.cell_id);
        let placement = if first_idx.is_some_and(|idx| idx > i) { FocusPlacement::Top } else { FocusPlacement::Bottom };
        self.selected_child_position = match placement {
            FocusPlacement::Top => 0,
            FocusPlacement::Bottom => viewport_height as isize - cell_height as isize,
        };
    }

    fn cached_height(&mut self, id: CellId, width: u16, height_of: &mut impl FnMut(CellId, u16) -> usize) -> usize {
        if let Some((cached_width, h)) = self.measurement_cache.get(&id) {
            if *cached_width == width {
                return *h;
            }
        }
        let h = height_of(id, width);
        self.measurement_cache.insert(id, (width, h));
        h
    }

    /// Returns a cached render for `id` at `width`, computing and caching
    /// it via `render` on a miss.
    pub fn cached_render(
        &mut self,
        id: CellId,
        width: u16,
        mut render: impl FnMut(CellId, u16) -> Vec<String>,
    ) -> Vec<String> {
        if let Some((cached_width, lines)) = self.render_cache.get(&id) {
            if *cached_width == width {
                return lines.clone();
            }
        }
        let lines = render(id, width);
        self.render_cache.insert(id, (width, lines.clone()));
        lines
    }

    /// Drops any cached measurement/render entry for `id` (called on cell
    /// mutation, kernel-driven output changes, or deletion).
    pub fn invalidate(&mut self, id: CellId) {
        self.measurement_cache.remove(&id);
        self.render_cache.remove(&id);
    }

    /// Computes the drawing set for this frame (§4.6 "Arrangement
    /// algorithm", steps 1-3 and 5). Step 4 (scroll-to-cursor) is applied
    /// by the caller via [`Viewport::scroll_cursor_into_view`] before
    /// calling this, since it needs the editor's cursor row which this
    /// module does not model.
    pub fn arrange(
        &mut self,
        cells: &[CellId],
        width: u16,
        viewport_height: usize,
        mut height_of: impl FnMut(CellId, u16) -> usize,
    ) -> Vec<DrawingSlot> {
        if cells.is_empty() {
            return Vec::new();
        }
        let anchor_idx = self.slice.start.min(cells.len() - 1);
        let heights: Vec<usize> = cells.iter().map(|&id| self.cached_height(id, width, &mut height_of)).collect();

        // If the anchor moved to a cell that wasn't on screen last frame
        // (e.g. a direct `select()` jump rather than a `shift()` by one),
        // snap it flush to the edge the jump came from before walking, the
        // same placement `focus()` applies (§4.6 "a focus change to a cell
        // not currently in the drawing set").
        let anchor_id = cells[anchor_idx];
        if !self.last_drawn.iter().any(|s| s.cell_id == anchor_id) {
            if let Some(first_drawn) = self.last_drawn.first() {
                let goes_above = cells
                    .iter()
                    .position(|&id| id == first_drawn.cell_id)
                    .is_some_and(|first_drawn_idx| anchor_idx < first_drawn_idx);
                self.selected_child_position =
                    if goes_above { 0 } else { viewport_height as isize - heights[anchor_idx] as isize };
            }
        }

        let mut first_idx = anchor_idx;
        let mut last_idx = anchor_idx;
        let mut top_of_first = self.selected_child_position;
        let mut bottom_of_last = self.selected_child_position + heights[anchor_idx] as isize;

        while bottom_of_last < viewport_height as isize && last_idx + 1 < cells.len() {
            last_idx += 1;
            bottom_of_last += heights[last_idx] as isize;
        }
        while top_of_first > 0 && first_idx > 0 {
            first_idx -= 1;
            top_of_first -= heights[first_idx] as isize;
        }

        // Step 5: close any gap the arrangement left above cell 0 or below
        // the last cell.
        let shift = if first_idx == 0 {
            -top_of_first
        } else if last_idx == cells.len() - 1 && bottom_of_last < viewport_height as isize {
            viewport_height as isize - bottom_of_last
        } else {
            0
        };
        self.selected_child_position += shift;

        let mut top = top_of_first + shift;
        let mut slots = Vec::with_capacity(last_idx - first_idx + 1);
        for idx in first_idx..=last_idx {
            slots.push(DrawingSlot { cell_id: cells[idx], top, height: heights[idx] });
            top += heights[idx] as isize;
        }
        self.last_drawn = slots.clone();
        slots
    }

    /// Applies a pending scroll-to-cursor request: if set, shifts
    /// `selected_child_position` so `cursor_row` (the cursor's row offset
    /// within the anchor cell) lies inside `[0, viewport_height)`, then
    /// clears the flag (§4.6 step 4).
    pub fn scroll_cursor_into_view(&mut self, cursor_row: usize, viewport_height: usize) {
        if !self.scroll_to_cursor {
            return;
        }
        self.scroll_to_cursor = false;
        let cursor_abs = self.selected_child_position + cursor_row as isize;
        if cursor_abs < 0 {
            self.selected_child_position -= cursor_abs;
        } else if cursor_abs >= viewport_height as isize {
            self.selected_child_position -= cursor_abs - viewport_height as isize + 1;
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}
