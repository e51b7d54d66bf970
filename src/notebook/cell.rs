// (C) 2025 - Enzo Lombardi

//! A single notebook cell (§3 "Cell").

use super::output::{try_merge_stream, MimeBundle, Output, StreamName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable identity for a cell, unique within its owning [`Notebook`](super::Notebook)
/// for the notebook's lifetime. Never reused, even after the cell it named
/// is deleted — arena-style, per §9's "arena + stable integer ids" redesign
/// note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u64);

/// What a cell is. Only `Code` cells carry outputs or an execution count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Markdown,
    Raw,
}

/// A notebook cell.
///
/// `execution_count` is `None` for non-code kinds and for code cells that
/// have never been run; `outputs` is always empty for non-code kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub source: String,
    pub execution_count: Option<i64>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Set by a `clear_output(wait=true)`; the next `add_output` clears
    /// the list before appending rather than clearing immediately. Not
    /// persisted — it is mid-execution transient state.
    #[serde(skip)]
    clear_pending: bool,
}

impl Cell {
    pub fn new(id: CellId, kind: CellKind, source: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            source: source.into(),
            execution_count: None,
            outputs: if kind == CellKind::Code { Vec::new() } else { Vec::new() },
            metadata: Map::new(),
            clear_pending: false,
        }
    }

    /// Appends an output, merging it into the previous output if both are
    /// `Stream`s with the same name (§3 invariant, §8 "Stream merging").
    /// The merge is cross-call: it spans every `add_output` since the
    /// cell's outputs were last cleared, not just one kernel message
    /// batch (§9.1–9.3 "Stream merge scope").
    pub fn add_output(&mut self, output: Output) {
        if self.clear_pending {
            self.outputs.clear();
            self.clear_pending = false;
        }
        if let Output::Stream { name, text } = &output {
            if let Some(last) = self.outputs.last_mut() {
                if try_merge_stream(last, *name, text) {
                    return;
                }
            }
        }
        self.outputs.push(output);
    }

    /// Clears outputs now, or defers the clear until the next
    /// `add_output` when `wait` is set (used so a kernel's "clear then
    /// redraw" sequence doesn't produce a visible blank flash).
    pub fn clear_output(&mut self, wait: bool) {
        if wait {
            self.clear_pending = true;
        } else {
            self.outputs.clear();
            self.clear_pending = false;
        }
    }

    /// Replaces the data/metadata of the output whose `transient.display_id`
    /// matches `display_id`, in place, preserving its position. Returns
    /// `true` if a match was found (§9.1–9.3 "`update_display_data`
    /// semantics").
    pub fn update_display_data(
        &mut self,
        display_id: &str,
        data: MimeBundle,
        metadata: MimeBundle,
    ) -> bool {
        for output in &mut self.outputs {
            if output.display_id() == Some(display_id) {
                if let Output::DisplayData { data: d, metadata: m, .. } = output {
                    *d = data;
                    *m = metadata;
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> Cell {
        Cell::new(CellId(0), CellKind::Code, "1+1")
    }

    #[test]
    fn cross_call_stream_merge() {
        let mut c = cell();
        c.add_output(Output::Stream { name: StreamName::Stdout, text: "Hello ".into() });
        c.add_output(Output::Stream { name: StreamName::Stdout, text: "world\n".into() });
        c.add_output(Output::Stream { name: StreamName::Stderr, text: "!".into() });
        assert_eq!(c.outputs.len(), 2);
        assert_eq!(
            c.outputs[0],
            Output::Stream { name: StreamName::Stdout, text: "Hello world\n".into() }
        );
        assert_eq!(c.outputs[1], Output::Stream { name: StreamName::Stderr, text: "!".into() });
    }

    #[test]
    fn clear_output_wait_defers_to_next_add() {
        let mut c = cell();
        c.add_output(Output::Stream { name: StreamName::Stdout, text: "old".into() });
        c.clear_output(true);
        assert_eq!(c.outputs.len(), 1, "wait=true must not clear immediately");
        c.add_output(Output::Stream { name: StreamName::Stdout, text: "new".into() });
        assert_eq!(c.outputs.len(), 1);
        assert_eq!(c.outputs[0], Output::Stream { name: StreamName::Stdout, text: "new".into() });
    }

    #[test]
    fn clear_output_immediate() {
        let mut c = cell();
        c.add_output(Output::Stream { name: StreamName::Stdout, text: "old".into() });
        c.clear_output(false);
        assert!(c.outputs.is_empty());
    }

    #[test]
    fn update_display_data_replaces_in_place() {
        let mut c = cell();
        c.add_output(Output::Stream { name: StreamName::Stdout, text: "before\n".into() });
        c.add_output(Output::DisplayData {
            data: MimeBundle::new(),
            metadata: MimeBundle::new(),
            transient: Some(super::super::output::Transient { display_id: Some("d1".into()) }),
        });
        let mut new_data = MimeBundle::new();
        new_data.insert("text/plain".into(), serde_json::json!("updated"));
        assert!(c.update_display_data("d1", new_data.clone(), MimeBundle::new()));
        assert_eq!(c.outputs.len(), 2, "position preserved, no new output appended");
        match &c.outputs[1] {
            Output::DisplayData { data, .. } => assert_eq!(data, &new_data),
            other => panic!("expected DisplayData, got {other:?}"),
        }
    }

    #[test]
    fn update_display_data_unmatched_id_is_dropped() {
        let mut c = cell();
        assert!(!c.update_display_data("missing", MimeBundle::new(), MimeBundle::new()));
        assert!(c.outputs.is_empty());
    }
}
