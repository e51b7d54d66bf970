// (C) 2025 - Enzo Lombardi

//! Kernel output values (§3 "Output").
//!
//! An output is a tagged union mirroring nbformat v4's `output_type` field.
//! MIME bundles are kept as raw [`serde_json::Value`] (text, list-of-lines,
//! or base64 string, exactly as nbformat stores them) rather than decoded
//! up front — decoding is the Output Renderer's job (§4.3), not the data
//! model's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A MIME bundle as found in `display_data`/`execute_result` outputs:
/// MIME type -> raw JSON value (string, array of strings, or nested object
/// for e.g. `application/json`).
pub type MimeBundle = BTreeMap<String, serde_json::Value>;

/// A single kernel output, tagged by `output_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Text written to stdout/stderr.
    Stream { name: StreamName, text: String },
    /// A rich display with no associated execution count.
    DisplayData {
        data: MimeBundle,
        #[serde(default)]
        metadata: MimeBundle,
        /// `transient.display_id`, used to route `update_display_data`.
        #[serde(skip_serializing_if = "Option::is_none")]
        transient: Option<Transient>,
    },
    /// The value of the last expression in a code cell.
    ExecuteResult {
        data: MimeBundle,
        #[serde(default)]
        metadata: MimeBundle,
        execution_count: i64,
    },
    /// An uncaught exception.
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
}

/// The stream an output's text came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl Output {
    /// `display_id` carried by a `display_data`, if any — used to index
    /// outputs for later `update_display_data` replacement.
    pub fn display_id(&self) -> Option<&str> {
        match self {
            Output::DisplayData {
                transient: Some(Transient { display_id: Some(id) }),
                ..
            } => Some(id.as_str()),
            _ => None,
        }
    }

    /// Stream name if this is a `Stream` output.
    fn stream_name(&self) -> Option<StreamName> {
        match self {
            Output::Stream { name, .. } => Some(*name),
            _ => None,
        }
    }
}

/// Appends `text` to `output` if both are `Stream` outputs of the same
/// name; returns `false` (no merge happened) otherwise.
pub fn try_merge_stream(output: &mut Output, name: StreamName, text: &str) -> bool {
    if output.stream_name() == Some(name) {
        if let Output::Stream { text: existing, .. } = output {
            existing.push_str(text);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_into_matching_stream_name() {
        let mut out = Output::Stream {
            name: StreamName::Stdout,
            text: "Hello ".into(),
        };
        assert!(try_merge_stream(&mut out, StreamName::Stdout, "world\n"));
        assert_eq!(
            out,
            Output::Stream {
                name: StreamName::Stdout,
                text: "Hello world\n".into(),
            }
        );
    }

    #[test]
    fn does_not_merge_across_stream_names() {
        let mut out = Output::Stream {
            name: StreamName::Stdout,
            text: "Hello ".into(),
        };
        assert!(!try_merge_stream(&mut out, StreamName::Stderr, "!"));
    }

    #[test]
    fn does_not_merge_into_non_stream_output() {
        let mut out = Output::Error {
            ename: "ValueError".into(),
            evalue: "bad".into(),
            traceback: vec![],
        };
        assert!(!try_merge_stream(&mut out, StreamName::Stdout, "text"));
    }

    #[test]
    fn display_id_extracted_from_transient() {
        let out = Output::DisplayData {
            data: MimeBundle::new(),
            metadata: MimeBundle::new(),
            transient: Some(Transient {
                display_id: Some("abc123".into()),
            }),
        };
        assert_eq!(out.display_id(), Some("abc123"));
    }
}
