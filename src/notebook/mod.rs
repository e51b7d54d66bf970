// (C) 2025 - Enzo Lombardi

//! The notebook data model (§3): an ordered sequence of cells plus
//! notebook-level metadata, mutated only through the operations below and
//! owned by the viewport. Persistence (reading/writing the nbformat v4
//! JSON file) is an external collaborator's job per §1/§6; this module
//! only defines the shape that collaborator reads and writes.

pub mod cell;
pub mod output;

pub use cell::{Cell, CellId, CellKind};
pub use output::{MimeBundle, Output, StreamName, Transient};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `kernelspec` metadata, also used by [`crate::kernel::KernelSession::change`]
/// to rewrite it after a kernel change (§4.4, E2E scenario 6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KernelSpec {
    pub name: String,
    pub display_name: String,
    pub language: String,
}

/// Notebook-level metadata: language info, kernelspec, and persisted
/// widget state (§6's `metadata.widgets` key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_info: Option<serde_json::Value>,
    /// `metadata.widgets`, keyed by the fixed mimetype the nbformat spec
    /// uses for ipywidgets state (§6).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets: Option<serde_json::Value>,
}

/// An ordered sequence of cells plus notebook-level metadata.
///
/// Invariant: `cells` is never empty — [`Notebook::new`] and
/// [`Notebook::delete`] both enforce this (§3, §8 "Deleting the last
/// cell...").
#[derive(Debug, Clone)]
pub struct Notebook {
    cells: Vec<Cell>,
    metadata: NotebookMetadata,
    next_id: u64,
    /// `display_id -> (cell_id, output_index)`, populated whenever a
    /// `display_data` output carries `transient.display_id`. Used to route
    /// `update_display_data` (§9.1–9.3).
    display_ids: HashMap<String, (CellId, usize)>,
}

impl Notebook {
    /// A fresh notebook: a single empty code cell, per §3's invariant.
    pub fn new() -> Self {
        let mut nb = Self {
            cells: Vec::new(),
            metadata: NotebookMetadata::default(),
            next_id: 0,
            display_ids: HashMap::new(),
        };
        nb.cells.push(nb.fresh_cell(CellKind::Code, String::new()));
        nb
    }

    fn fresh_cell(&mut self, kind: CellKind, source: String) -> Cell {
        let id = CellId(self.next_id);
        self.next_id += 1;
        Cell::new(id, kind, source)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == id)
    }

    pub fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id == id)
    }

    pub fn metadata(&self) -> &NotebookMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut NotebookMetadata {
        &mut self.metadata
    }

    fn index_of(&self, id: CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id == id)
    }

    /// Inserts a fresh cell of `kind` after `after` (or at the start, if
    /// `after` is `None`). Returns the new cell's id.
    pub fn insert(&mut self, after: Option<CellId>, kind: CellKind) -> CellId {
        let at = match after {
            Some(id) => self.index_of(id).map_or(self.cells.len(), |i| i + 1),
            None => 0,
        };
        let cell = self.fresh_cell(kind, String::new());
        let id = cell.id;
        self.cells.insert(at.min(self.cells.len()), cell);
        id
    }

    /// Deletes a cell. If it was the last cell in the notebook, a fresh
    /// empty code cell takes its place (§3 invariant, §8 boundary
    /// behavior).
    pub fn delete(&mut self, id: CellId) {
        if let Some(idx) = self.index_of(id) {
            self.cells.remove(idx);
            self.display_ids.retain(|_, (cell_id, _)| *cell_id != id);
        }
        if self.cells.is_empty() {
            let cell = self.fresh_cell(CellKind::Code, String::new());
            self.cells.push(cell);
        }
    }

    /// Moves the cell at `from` to sit just before the cell currently at
    /// `to` (both are positions, not ids). A no-op if out of range.
    pub fn move_cell(&mut self, from: usize, to: usize) {
        if from >= self.cells.len() || to > self.cells.len() || from == to {
            return;
        }
        let cell = self.cells.remove(from);
        let to = if to > from { to - 1 } else { to };
        self.cells.insert(to, cell);
    }

    /// Merges `second` into `first` (`first`'s source, then a newline,
    /// then `second`'s source); `second` is removed and its outputs
    /// discarded.
    pub fn merge(&mut self, first: CellId, second: CellId) {
        let Some(second_idx) = self.index_of(second) else { return };
        if self.index_of(first).is_none() {
            return;
        }
        let removed = self.cells.remove(second_idx);
        if let Some(first_cell) = self.cell_mut(first) {
            if !first_cell.source.is_empty() && !removed.source.is_empty() {
                first_cell.source.push('\n');
            }
            first_cell.source.push_str(&removed.source);
        }
    }

    /// Splits the cell `id` at character offset `at` into two cells of the
    /// same kind: the original keeps the source up to `at`, a fresh cell
    /// inserted immediately after gets the rest. Outputs stay on the
    /// original cell. Returns the new cell's id, or `None` if `id` is
    /// unknown or `at` is out of bounds.
    ///
    /// Concatenating the two resulting sources reproduces the original
    /// exactly (§8 boundary behavior).
    pub fn split(&mut self, id: CellId, at: usize) -> Option<CellId> {
        let idx = self.index_of(id)?;
        let kind = self.cells[idx].kind;
        if at > self.cells[idx].source.chars().count() {
            return None;
        }
        let byte_at = char_offset_to_byte(&self.cells[idx].source, at);
        let tail = self.cells[idx].source.split_off(byte_at);
        let new_cell = self.fresh_cell(kind, tail);
        let new_id = new_cell.id;
        self.cells.insert(idx + 1, new_cell);
        Some(new_id)
    }

    /// Inserts a copy of `source_cells` (with fresh ids) after `after`.
    pub fn paste(&mut self, after: Option<CellId>, source_cells: &[Cell]) -> Vec<CellId> {
        let mut at = match after {
            Some(id) => self.index_of(id).map_or(self.cells.len(), |i| i + 1),
            None => self.cells.len(),
        };
        let mut ids = Vec::with_capacity(source_cells.len());
        for src in source_cells {
            let mut cell = self.fresh_cell(src.kind, src.source.clone());
            cell.outputs = src.outputs.clone();
            cell.metadata = src.metadata.clone();
            ids.push(cell.id);
            self.cells.insert(at, cell);
            at += 1;
        }
        ids
    }

    /// Records that `cell_id`'s output at `output_index` carries
    /// `display_id`, so a later `update_display_data` can find it.
    pub fn track_display_id(&mut self, display_id: String, cell_id: CellId, output_index: usize) {
        self.display_ids.insert(display_id, (cell_id, output_index));
    }

    /// Routes an `update_display_data` to the tracked output, replacing its
    /// data/metadata in place. Returns `true` if a matching `display_id`
    /// was known; an unmatched update is dropped (§9.1–9.3).
    pub fn update_display_data(
        &mut self,
        display_id: &str,
        data: MimeBundle,
        metadata: MimeBundle,
    ) -> bool {
        let Some(&(cell_id, _)) = self.display_ids.get(display_id) else {
            return false;
        };
        self.cell_mut(cell_id)
            .map(|cell| cell.update_display_data(display_id, data, metadata))
            .unwrap_or(false)
    }
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new()
    }
}

fn char_offset_to_byte(s: &str, char_offset: usize) -> usize {
    s.char_indices()
        .nth(char_offset)
        .map_or(s.len(), |(byte, _)| byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_notebook_has_one_code_cell() {
        let nb = Notebook::new();
        assert_eq!(nb.cells().len(), 1);
        assert_eq!(nb.cells()[0].kind, CellKind::Code);
    }

    #[test]
    fn insert_assigns_fresh_unique_id() {
        let mut nb = Notebook::new();
        let first_id = nb.cells()[0].id;
        let new_id = nb.insert(Some(first_id), CellKind::Markdown);
        assert_ne!(new_id, first_id);
        assert_eq!(nb.cells().len(), 2);
        assert_eq!(nb.cells()[1].id, new_id);
    }

    #[test]
    fn deleting_last_cell_leaves_one_empty_code_cell() {
        let mut nb = Notebook::new();
        let id = nb.cells()[0].id;
        nb.delete(id);
        assert_eq!(nb.cells().len(), 1);
        assert_eq!(nb.cells()[0].kind, CellKind::Code);
        assert!(nb.cells()[0].source.is_empty());
    }

    #[test]
    fn split_concatenation_reproduces_original() {
        let mut nb = Notebook::new();
        let id = nb.cells()[0].id;
        nb.cell_mut(id).unwrap().source = "hello world".into();
        let new_id = nb.split(id, 5).unwrap();
        let first = nb.cell(id).unwrap().source.clone();
        let second = nb.cell(new_id).unwrap().source.clone();
        assert_eq!(format!("{first}{second}"), "hello world");
        assert_eq!(first, "hello");
        assert_eq!(second, " world");
    }

    #[test]
    fn merge_concatenates_with_newline() {
        let mut nb = Notebook::new();
        let first = nb.cells()[0].id;
        let second = nb.insert(Some(first), CellKind::Code);
        nb.cell_mut(first).unwrap().source = "a = 1".into();
        nb.cell_mut(second).unwrap().source = "b = 2".into();
        nb.merge(first, second);
        assert_eq!(nb.cells().len(), 1);
        assert_eq!(nb.cell(first).unwrap().source, "a = 1\nb = 2");
    }

    #[test]
    fn move_cell_reorders_by_position() {
        let mut nb = Notebook::new();
        let a = nb.cells()[0].id;
        let b = nb.insert(Some(a), CellKind::Code);
        let c = nb.insert(Some(b), CellKind::Code);
        nb.move_cell(0, 3);
        assert_eq!(nb.cells().iter().map(|c| c.id).collect::<Vec<_>>(), vec![b, c, a]);
    }

    #[test]
    fn update_display_data_routes_through_tracked_map() {
        let mut nb = Notebook::new();
        let id = nb.cells()[0].id;
        nb.cell_mut(id).unwrap().add_output(Output::DisplayData {
            data: MimeBundle::new(),
            metadata: MimeBundle::new(),
            transient: Some(Transient { display_id: Some("d1".into()) }),
        });
        nb.track_display_id("d1".into(), id, 0);
        let mut new_data = MimeBundle::new();
        new_data.insert("text/plain".into(), serde_json::json!("new"));
        assert!(nb.update_display_data("d1", new_data, MimeBundle::new()));
        assert!(!nb.update_display_data("unknown", MimeBundle::new(), MimeBundle::new()));
    }
}
