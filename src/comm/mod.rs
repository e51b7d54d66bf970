// (C) 2025 - Enzo Lombardi

//! The Comm Manager (§4.5): the client-side model of Jupyter `Comm`
//! objects, principally ipywidgets. A `Comm` owns a JSON state tree and a
//! set of weakly-held views; state changes are pushed to views and,
//! unless the comm is `unlinked`, echoed to the kernel.
//!
//! Building the full ipywidgets widget tree (sliders, tabs, accordions
//! as interactive terminal controls) is out of this crate's scope — that
//! is rich-text/widget-toolkit territory this core does not attempt.
//! What this module owns is the *model*: state sync, buffer re-injection,
//! and view invalidation. [`View`] is deliberately a thin textual
//! rendering seam so a host UI can supply the actual interactive widget.

use crate::notebook::CellId;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub type CommId = String;

/// Coarse widget-model families (§4.5 "Widget models implement at
/// minimum one of..."). Finer dispatch happens via `_model_name` inside
/// `jupyter.widget`, the same way `WIDGET_MODELS` does in the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetCategory {
    Container,
    SimpleValue,
    BoundedNumeric,
    Selection,
    Output,
    Unimplemented,
}

/// A rendering/update seam for a comm's view inside a cell. A real UI
/// supplies its own implementation; [`TextView`] is the built-in
/// fallback used when no richer view is registered.
pub trait View: Send {
    fn render(&self, width: u16) -> Vec<String>;
    fn apply(&mut self, key: &str, value: &Value);
}

/// Renders a comm's state as plain `key: value` lines. Used for
/// unimplemented targets and as the default fallback view.
pub struct TextView {
    lines: Vec<String>,
}

impl TextView {
    fn from_state(state: &Map<String, Value>, category: WidgetCategory) -> Self {
        let lines = if category == WidgetCategory::Unimplemented {
            vec!["[Widget not implemented]".to_string()]
        } else {
            state
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| format!("{k}: {v}"))
                .collect()
        };
        Self { lines }
    }
}

impl View for TextView {
    fn render(&self, width: u16) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| {
                let w = width.max(1) as usize;
                if line.len() > w {
                    line.chars().take(w).collect()
                } else {
                    line.clone()
                }
            })
            .collect()
    }

    fn apply(&mut self, key: &str, value: &Value) {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.starts_with(&format!("{key}: "))) {
            *existing = format!("{key}: {value}");
        } else {
            self.lines.push(format!("{key}: {value}"));
        }
    }
}

pub type ViewHandle = Arc<Mutex<dyn View>>;

/// A message this comm wants echoed to the kernel via `comm_msg` (§4.4's
/// `KernelSession` owns actually sending it).
#[derive(Debug, Clone)]
pub struct CommUpdate {
    pub comm_id: CommId,
    pub data: Value,
}

/// Reinjects a binary buffer into `state` at the path given by a
/// `buffer_paths` entry (a list of object keys), mirroring
/// `JupyterWidget.process_data`'s buffer re-injection.
fn inject_buffer(state: &mut Map<String, Value>, path: &[Value], buffer: &[u8]) {
    let Some((last, parents)) = path.split_last() else { return };
    let mut cursor = state;
    for key in parents {
        let Some(k) = key.as_str() else { return };
        cursor = match cursor.entry(k.to_string()).or_insert_with(|| Value::Object(Map::new())).as_object_mut() {
            Some(m) => m,
            None => return,
        };
    }
    if let Some(k) = last.as_str() {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, buffer);
        cursor.insert(k.to_string(), Value::String(encoded));
    }
}

/// The client-side model of one Jupyter `Comm` (§3 "Comm").
pub struct Comm {
    pub comm_id: CommId,
    pub target_name: String,
    category: WidgetCategory,
    state: Map<String, Value>,
    buffers: Vec<Vec<u8>>,
    sync: bool,
    unlinked: bool,
    views: Vec<(CellId, Weak<Mutex<dyn View>>)>,
}

impl Comm {
    pub fn new(comm_id: CommId, target_name: String, category: WidgetCategory, data: &Value, buffers: Vec<Vec<u8>>) -> Self {
        let state = data.get("state").and_then(Value::as_object).cloned().unwrap_or_default();
        Self { comm_id, target_name, category, state, buffers, sync: true, unlinked: false, views: Vec::new() }
    }

    /// Restores a comm from saved notebook metadata (§4.5 Persistence):
    /// flagged unlinked so locally edited state is never echoed to a
    /// kernel that does not know about it.
    pub fn restored(comm_id: CommId, target_name: String, category: WidgetCategory, state: Map<String, Value>) -> Self {
        Self { comm_id, target_name, category, state, buffers: Vec::new(), sync: true, unlinked: true, views: Vec::new() }
    }

    pub fn category(&self) -> WidgetCategory {
        self.category
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn is_unlinked(&self) -> bool {
        self.unlinked
    }

    /// Handles an incoming `comm_msg` (§4.5 `process_data`): re-injects
    /// buffers by `buffer_paths`, then either replaces the whole state
    /// (no `method`) or merges it (`method == "update"`) and notifies
    /// views.
    pub fn process_data(&mut self, data: &Value, buffers: Vec<Vec<u8>>) -> Vec<CellId> {
        self.buffers = buffers;
        if let Some(paths) = data.get("buffer_paths").and_then(Value::as_array) {
            for (path, buffer) in paths.iter().zip(&self.buffers) {
                if let Some(path) = path.as_array() {
                    inject_buffer(&mut self.state, path, buffer);
                }
            }
        }

        match data.get("method").and_then(Value::as_str) {
            None => {
                if let Some(state) = data.get("state").and_then(Value::as_object) {
                    self.state = state.clone();
                }
                Vec::new()
            }
            Some("update") => {
                if let Some(changes) = data.get("state").and_then(Value::as_object) {
                    for (k, v) in changes {
                        self.state.insert(k.clone(), v.clone());
                    }
                    self.update_views(changes)
                } else {
                    Vec::new()
                }
            }
            Some(_) => Vec::new(),
        }
    }

    /// Sets one state key locally (§4.5 `set_state`). When sync is
    /// enabled, calls `send` with the `comm_msg` update payload the
    /// kernel session should relay; always updates local views.
    pub fn set_state(&mut self, key: &str, value: Value, send: impl FnOnce(CommUpdate)) -> Vec<CellId> {
        self.state.insert(key.to_string(), value.clone());
        if self.sync && !self.unlinked {
            send(CommUpdate {
                comm_id: self.comm_id.clone(),
                data: serde_json::json!({"method": "update", "state": {key: value.clone()}}),
            });
        }
        let mut changes = Map::new();
        changes.insert(key.to_string(), value);
        self.update_views(&changes)
    }

    /// Instantiates a view for rendering inside `cell` (§4.5
    /// `create_view`), tracked weakly so the comm doesn't keep dead cells
    /// alive.
    pub fn create_view(&mut self, cell: CellId) -> ViewHandle {
        let view: Arc<Mutex<dyn View>> = Arc::new(Mutex::new(TextView::from_state(&self.state, self.category)));
        self.views.push((cell, Arc::downgrade(&view) as Weak<Mutex<dyn View>>));
        view
    }

    /// Pushes `changes` into every live view, pruning dead ones, and
    /// returns the distinct cells whose view changed so the caller can
    /// mark them for refresh (§4.5 `update_views`).
    fn update_views(&mut self, changes: &Map<String, Value>) -> Vec<CellId> {
        let mut touched = Vec::new();
        self.views.retain(|(cell, weak)| match weak.upgrade() {
            Some(view) => {
                let mut v = view.lock();
                for (k, val) in changes {
                    v.apply(k, val);
                }
                touched.push(*cell);
                true
            }
            None => false,
        });
        touched
    }
}

/// Maps a `_model_name` (within the `jupyter.widget` target) to its
/// coarse category. Unknown names fall back to `Unimplemented`, mirroring
/// `WIDGET_MODELS.get(model_name, UnimplementedWidget)`.
fn ipywidget_category(model_name: &str) -> WidgetCategory {
    match model_name {
        "BoxModel" | "HBoxModel" | "VBoxModel" | "TabModel" | "AccordionModel" => WidgetCategory::Container,
        "TextModel" | "TextareaModel" | "CheckboxModel" | "ToggleButtonModel" | "LabelModel" | "HTMLModel" | "ImageModel" | "DatePickerModel"
        | "ColorPickerModel" | "ButtonModel" => WidgetCategory::SimpleValue,
        "IntTextModel" | "BoundedIntTextModel" | "FloatTextModel" | "BoundedFloatTextModel" | "IntSliderModel" | "FloatSliderModel"
        | "FloatLogSliderModel" | "IntRangeSliderModel" | "FloatRangeSliderModel" | "IntProgressModel" | "FloatProgressModel" => {
            WidgetCategory::BoundedNumeric
        }
        "DropdownModel" | "SelectModel" | "RadioButtonsModel" | "ToggleButtonsModel" | "SelectMultipleModel" => WidgetCategory::Selection,
        "OutputModel" => WidgetCategory::Output,
        _ => WidgetCategory::Unimplemented,
    }
}

/// Registry: `target_name → factory` (§4.5). Unknown targets get an
/// inert `Unimplemented` comm.
pub struct CommRegistry;

impl CommRegistry {
    /// Builds a new comm from an incoming `comm_open` (or a reconstruction
    /// from saved state; see [`Comm::restored`]).
    pub fn open(comm_id: CommId, target_name: &str, data: &Value, buffers: Vec<Vec<u8>>) -> Comm {
        let category = match target_name {
            "jupyter.widget" => data.get("state").and_then(|s| s.get("_model_name")).and_then(Value::as_str).map(ipywidget_category).unwrap_or(WidgetCategory::Unimplemented),
            _ => WidgetCategory::Unimplemented,
        };
        Comm::new(comm_id, target_name.to_string(), category, data, buffers)
    }
}

/// Owns every live comm for a notebook tab (§4.5).
#[derive(Default)]
pub struct CommManager {
    comms: HashMap<CommId, Comm>,
}

impl CommManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, comm_id: CommId, target_name: &str, data: &Value, buffers: Vec<Vec<u8>>) {
        let comm = CommRegistry::open(comm_id.clone(), target_name, data, buffers);
        self.comms.insert(comm_id, comm);
    }

    pub fn close(&mut self, comm_id: &str) -> Option<Comm> {
        self.comms.remove(comm_id)
    }

    pub fn get(&self, comm_id: &str) -> Option<&Comm> {
        self.comms.get(comm_id)
    }

    pub fn get_mut(&mut self, comm_id: &str) -> Option<&mut Comm> {
        self.comms.get_mut(comm_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CommId, &Comm)> {
        self.comms.iter()
    }

    /// Serializes every *linked* comm's state into the
    /// `application/vnd.jupyter.widget-state+json` notebook metadata shape
    /// (§4.5 Persistence, §6): `{version_major:2, version_minor:0, state:
    /// {comm_id: {state, buffers, model_name, model_module,
    /// model_module_version}}}`. Unlinked comms (restored from a notebook
    /// with no kernel behind them) are never re-persisted. Buffers are
    /// already re-injected as base64 strings inside `state` by
    /// [`Comm::process_data`], so the `buffers` array is always empty here
    /// — there is nothing left outside `state` to list paths for.
    pub fn to_widget_state(&self) -> Value {
        let states: Map<String, Value> = self
            .comms
            .iter()
            .filter(|(_, comm)| !comm.is_unlinked())
            .map(|(id, comm)| {
                (
                    id.clone(),
                    serde_json::json!({
                        "model_name": comm.target_name,
                        "model_module": "@jupyter-widgets/controls",
                        "model_module_version": "2.0.0",
                        "state": comm.state,
                        "buffers": Vec::<Value>::new(),
                    }),
                )
            })
            .collect();
        serde_json::json!({ "version_major": 2, "version_minor": 0, "state": states })
    }

    /// Reconstructs comms from saved notebook metadata, each flagged
    /// unlinked (§4.5 Persistence).
    pub fn load_widget_state(&mut self, widget_state: &Value) {
        let Some(states) = widget_state.get("state").and_then(Value::as_object) else { return };
        for (comm_id, entry) in states {
            let target_name = entry.get("model_name").and_then(Value::as_str).unwrap_or("jupyter.widget").to_string();
            let state = entry.get("state").and_then(Value::as_object).cloned().unwrap_or_default();
            let category = state.get("_model_name").and_then(Value::as_str).map(ipywidget_category).unwrap_or(WidgetCategory::Unimplemented);
            self.comms.insert(comm_id.clone(), Comm::restored(comm_id.clone(), target_name, category, state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_request(model_name: &str) -> Value {
        serde_json::json!({"state": {"_model_name": model_name, "value": 1}})
    }

    #[test]
    fn unknown_target_renders_not_implemented() {
        let comm = CommRegistry::open("c1".into(), "mystery.thing", &serde_json::json!({"state": {}}), vec![]);
        assert_eq!(comm.category(), WidgetCategory::Unimplemented);
    }

    #[test]
    fn known_model_name_resolves_its_category() {
        let comm = CommRegistry::open("c1".into(), "jupyter.widget", &open_request("IntSliderModel"), vec![]);
        assert_eq!(comm.category(), WidgetCategory::BoundedNumeric);
    }

    #[test]
    fn update_method_merges_state_and_touches_views() {
        let mut comm = CommRegistry::open("c1".into(), "jupyter.widget", &open_request("TextModel"), vec![]);
        let view = comm.create_view(CellId(7));
        let touched = comm.process_data(&serde_json::json!({"method": "update", "state": {"value": 42}}), vec![]);
        assert_eq!(touched, vec![CellId(7)]);
        assert_eq!(comm.state().get("value"), Some(&serde_json::json!(42)));
        assert!(view.lock().render(80).iter().any(|l| l.contains("42")));
    }

    #[test]
    fn no_method_replaces_the_whole_state() {
        let mut comm = CommRegistry::open("c1".into(), "jupyter.widget", &open_request("TextModel"), vec![]);
        comm.process_data(&serde_json::json!({"state": {"fresh": true}}), vec![]);
        assert_eq!(comm.state().get("fresh"), Some(&serde_json::json!(true)));
        assert!(comm.state().get("_model_name").is_none());
    }

    #[test]
    fn dropped_views_are_pruned_on_next_update() {
        let mut comm = CommRegistry::open("c1".into(), "jupyter.widget", &open_request("TextModel"), vec![]);
        {
            let _view = comm.create_view(CellId(1));
        }
        let touched = comm.update_views(&Map::new());
        assert!(touched.is_empty());
        assert!(comm.views.is_empty());
    }

    #[test]
    fn set_state_echoes_to_kernel_unless_unlinked() {
        let mut comm = CommRegistry::open("c1".into(), "jupyter.widget", &open_request("TextModel"), vec![]);
        let mut sent = None;
        comm.set_state("value", serde_json::json!(5), |update| sent = Some(update));
        assert!(sent.is_some());

        let mut restored = Comm::restored("c2".into(), "jupyter.widget".into(), WidgetCategory::SimpleValue, Map::new());
        let mut sent2 = None;
        restored.set_state("value", serde_json::json!(5), |update| sent2 = Some(update));
        assert!(sent2.is_none());
    }

    #[test]
    fn unimplemented_target_view_says_so() {
        let mut comm = CommRegistry::open("c1".into(), "some.other.target", &serde_json::json!({"state": {}}), vec![]);
        let view = comm.create_view(CellId(0));
        assert_eq!(view.lock().render(80), vec!["[Widget not implemented]".to_string()]);
    }

    #[test]
    fn widget_state_round_trips_through_persistence() {
        let mut manager = CommManager::new();
        manager.open("c1".into(), "jupyter.widget", &open_request("CheckboxModel"), vec![]);
        let saved = manager.to_widget_state();

        let mut reloaded = CommManager::new();
        reloaded.load_widget_state(&saved);
        let comm = reloaded.get("c1").expect("comm restored");
        assert!(comm.is_unlinked());
        assert_eq!(comm.category(), WidgetCategory::SimpleValue);
    }

    #[test]
    fn unlinked_comms_are_not_persisted() {
        let mut manager = CommManager::new();
        manager.open("c1".into(), "jupyter.widget", &open_request("CheckboxModel"), vec![]);
        let saved = manager.to_widget_state();
        let mut reloaded = CommManager::new();
        reloaded.load_widget_state(&saved); // reload marks it unlinked
        let resaved = reloaded.to_widget_state();
        assert!(resaved["state"].as_object().unwrap().is_empty(), "unlinked comms must not round-trip again");
    }

    #[test]
    fn int_slider_widget_round_trip() {
        // §8 E2E scenario 4: create an IntSlider, mutate value, save,
        // reload without a kernel: value preserved, comm marked unlinked.
        let mut manager = CommManager::new();
        let open = serde_json::json!({
            "state": {"_model_name": "IntSliderModel", "min": 0, "max": 10, "step": 1, "value": 3}
        });
        manager.open("slider1".into(), "jupyter.widget", &open, vec![]);
        let comm = manager.get_mut("slider1").unwrap();
        comm.process_data(&serde_json::json!({"method": "update", "state": {"value": 7}}), vec![]);
        assert_eq!(comm.state().get("value"), Some(&serde_json::json!(7)));

        let saved = manager.to_widget_state();
        assert_eq!(saved["version_major"], serde_json::json!(2));

        let mut reloaded = CommManager::new();
        reloaded.load_widget_state(&saved);
        let restored = reloaded.get("slider1").expect("slider restored");
        assert_eq!(restored.state().get("value"), Some(&serde_json::json!(7)));
        assert!(restored.is_unlinked());
    }

    #[test]
    fn close_removes_the_comm() {
        let mut manager = CommManager::new();
        manager.open("c1".into(), "jupyter.widget", &open_request("TextModel"), vec![]);
        assert!(manager.close("c1").is_some());
        assert!(manager.get("c1").is_none());
    }
}
