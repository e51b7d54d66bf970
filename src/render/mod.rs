// (C) 2025 - Enzo Lombardi

//! The Output Renderer (§4.3): picks the richest mime representation of a
//! kernel output that this core can actually produce, renders it to ANSI
//! text or a [`Graphic`](crate::graphics::Graphic) handle at a requested
//! width, and caches the result.
//!
//! The external format-conversion registry (§6 `convert`/`find_route`) is
//! consumed through the [`ConversionRegistry`] trait rather than
//! implemented here — this crate has no chafa/pandoc/LaTeX renderer of
//! its own, and instead delegates to a pluggable registry of per-mime-pair
//! converter functions. [`image`] is used directly for dimension probing
//! (aspect ratio preservation), since that conversion (decode PNG/JPEG
//! header) is cheap enough to belong to the core rather than the registry.

use crate::graphics::{GraphicId, GraphicsManager};
use crate::notebook::output::{Output, StreamName};
use crate::notebook::MimeBundle;
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

/// An injectable seam for the external format-conversion registry (§6).
pub trait ConversionRegistry {
    /// Converts `data` from `from_mime` to `to_mime`, sized to `cols` x
    /// `rows` using the given foreground/background, or `None` if no
    /// route exists or the conversion failed.
    fn convert(
        &self,
        data: &[u8],
        from_mime: &str,
        to_mime: &str,
        cols: u16,
        rows: u16,
        fg: Option<(u8, u8, u8)>,
        bg: Option<(u8, u8, u8)>,
    ) -> Option<Vec<u8>>;

    /// The chain of intermediate mimes a conversion from `from` to `to`
    /// would pass through, or `None` if unreachable.
    fn find_route(&self, from: &str, to: &str) -> Option<Vec<String>>;
}

/// A registry with no routes — every output that isn't already plain
/// text falls back to a placeholder. Used when no real registry is wired
/// up (tests, or a build without a conversion backend present).
pub struct NullConversionRegistry;

impl ConversionRegistry for NullConversionRegistry {
    fn convert(&self, _: &[u8], _: &str, _: &str, _: u16, _: u16, _: Option<(u8, u8, u8)>, _: Option<(u8, u8, u8)>) -> Option<Vec<u8>> {
        None
    }

    fn find_route(&self, from: &str, to: &str) -> Option<Vec<String>> {
        (from == to).then(|| vec![from.to_string()])
    }
}

/// Static richness score for a mime type (§4.3 step 1): lower sorts
/// first. `image/*` is the most preferred, `*` (anything unrecognized)
/// the least.
fn richness_score(mime: &str) -> u8 {
    if mime.starts_with("image/") {
        0
    } else if mime == "text/html" {
        1
    } else if mime == "text/markdown" {
        2
    } else if mime == "text/latex" {
        3
    } else if mime == "text/x-python-traceback" {
        4
    } else if mime == "stream/stderr" {
        5
    } else if mime.starts_with("text/") {
        6
    } else {
        7
    }
}

/// Builds the mime-keyed view of any output, including ones that aren't
/// natively a mime bundle (`Stream`, `Error`), so mime selection (§4.3
/// step 1) applies uniformly across output kinds.
fn synthetic_mime_bundle(output: &Output) -> MimeBundle {
    match output {
        Output::Stream { name, text } => {
            let mime = match name {
                StreamName::Stdout => "stream/stdout",
                StreamName::Stderr => "stream/stderr",
            };
            MimeBundle::from([(mime.to_string(), serde_json::json!(text))])
        }
        Output::Error { traceback, ename, evalue } => {
            let text = if traceback.is_empty() {
                format!("{ename}: {evalue}")
            } else {
                traceback.join("\n")
            };
            MimeBundle::from([("text/x-python-traceback".to_string(), serde_json::json!(text))])
        }
        Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => data.clone(),
    }
}

/// Joins a nbformat mime value (string, or list of lines) into one
/// string.
fn mime_value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(lines) => lines.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(""),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    content_hash: u64,
    cols: u16,
    fg: Option<(u8, u8, u8)>,
    bg: Option<(u8, u8, u8)>,
}

/// The result of rendering one output: either plain text lines, or text
/// lines reserving space for a [`Graphic`](crate::graphics::Graphic)
/// registered with the [`GraphicsManager`] (§3 "Graphic").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOutput {
    pub lines: Vec<String>,
    pub graphic: Option<GraphicId>,
}

impl RenderedOutput {
    pub fn height(&self) -> usize {
        self.lines.len()
    }
}

/// Renders kernel outputs to ANSI text or graphic handles, with a small
/// LRU cache keyed by content/width/colors (§4.3 step 4).
pub struct OutputRenderer {
    cache: LruCache<CacheKey, RenderedOutput>,
}

impl OutputRenderer {
    pub fn new(capacity: usize) -> Self {
        Self { cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"))) }
    }

    /// `render(c, w).lines.len() == preferred_height(c, w)` is guaranteed
    /// by both going through the same cache entry (§8 "Height/render
    /// agreement").
    pub fn preferred_height(
        &mut self,
        output: &Output,
        cols: u16,
        registry: &dyn ConversionRegistry,
        fg: Option<(u8, u8, u8)>,
        bg: Option<(u8, u8, u8)>,
    ) -> usize {
        self.render(output, cols, registry, fg, bg, None).height()
    }

    /// Renders `output` at `cols` width. When a graphics protocol is
    /// available (`graphics` is `Some`) and the selected representation
    /// is an image, registers a [`Graphic`](crate::graphics::Graphic) and
    /// returns blank placeholder lines reserving its cell footprint.
    /// Otherwise an image falls back to an ANSI art conversion via
    /// `registry` and, failing that, a placeholder box (§4.3 steps 2-3).
    pub fn render(
        &mut self,
        output: &Output,
        cols: u16,
        registry: &dyn ConversionRegistry,
        fg: Option<(u8, u8, u8)>,
        bg: Option<(u8, u8, u8)>,
        mut graphics: Option<&mut GraphicsManager>,
    ) -> RenderedOutput {
        let bundle = synthetic_mime_bundle(output);
        let content_hash = hash_bundle(&bundle);
        let key = CacheKey { content_hash, cols, fg, bg };
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let mut candidates: Vec<&String> = bundle.keys().collect();
        candidates.sort_by_key(|mime| (richness_score(mime), mime.as_str()));

        let rendered = candidates
            .into_iter()
            .find_map(|mime| {
                let value = bundle.get(mime)?;
                if mime.starts_with("image/") {
                    render_image(mime, value, cols, registry, fg, bg, graphics.as_deref_mut())
                } else {
                    render_text(mime, value, cols, registry, fg, bg)
                }
            })
            .unwrap_or_else(|| placeholder(&bundle));

        self.cache.put(key, rendered.clone());
        rendered
    }
}

fn hash_bundle(bundle: &MimeBundle) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (mime, value) in bundle {
        mime.hash(&mut hasher);
        mime_value_to_text(value).hash(&mut hasher);
    }
    hasher.finish()
}

fn render_text(
    mime: &str,
    value: &serde_json::Value,
    cols: u16,
    registry: &dyn ConversionRegistry,
    fg: Option<(u8, u8, u8)>,
    bg: Option<(u8, u8, u8)>,
) -> Option<RenderedOutput> {
    let text = if mime == "text/plain" || mime.starts_with("stream/") || mime == "text/x-python-traceback" {
        mime_value_to_text(value)
    } else {
        let raw = mime_value_to_text(value);
        let converted = registry.convert(raw.as_bytes(), mime, "text/plain", cols, 0, fg, bg)?;
        String::from_utf8(converted).ok()?
    };
    Some(RenderedOutput { lines: text.lines().map(String::from).collect(), graphic: None })
}

/// Preserves aspect ratio when sizing an image to the cell grid (§4.3
/// step 3). Terminal cells are roughly twice as tall as wide, hence the
/// `/ 2` correction.
fn image_height_cells(width_cells: u16, img_width: u32, img_height: u32) -> u16 {
    if img_width == 0 {
        return 1;
    }
    let ratio = img_height as f64 / img_width as f64;
    ((width_cells as f64 * ratio / 2.0).round() as u16).max(1)
}

fn render_image(
    mime: &str,
    value: &serde_json::Value,
    cols: u16,
    registry: &dyn ConversionRegistry,
    fg: Option<(u8, u8, u8)>,
    bg: Option<(u8, u8, u8)>,
    graphics: Option<&mut GraphicsManager>,
) -> Option<RenderedOutput> {
    let encoded = value.as_str()?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;

    if let Some(graphics) = graphics {
        let dims = image::load_from_memory(&bytes).ok().map(|img| {
            use image::GenericImageView;
            img.dimensions()
        });
        let (width_cells, height_cells) = match dims {
            Some((w, h)) => (cols, image_height_cells(cols, w, h)),
            None => return None,
        };
        log::debug!("registering {mime} graphic at {width_cells}x{height_cells} cells");
        let id = graphics.add(bytes, bg);
        if let Some(g) = graphics.get_mut(id) {
            g.set_size(width_cells, height_cells);
        }
        return Some(RenderedOutput { lines: vec![String::new(); height_cells as usize], graphic: Some(id) });
    }

    // No graphics protocol is available (or the bounding window is
    // obscured): try an ANSI art conversion (chafa/unicode blocks) before
    // giving up on a placeholder box (§4.3 step 3).
    if let Some(ansi) = registry.convert(&bytes, mime, "text/ansi", cols, 0, fg, bg) {
        if let Ok(text) = String::from_utf8(ansi) {
            return Some(RenderedOutput { lines: text.lines().map(String::from).collect(), graphic: None });
        }
    }
    Some(placeholder_image(cols))
}

fn placeholder_image(cols: u16) -> RenderedOutput {
    let width = cols.max(7) as usize;
    let label = "Image";
    let pad = width.saturating_sub(label.len()) / 2;
    let line = format!("{}{}{}", " ".repeat(pad), label, " ".repeat(width.saturating_sub(pad + label.len())));
    RenderedOutput { lines: vec!["-".repeat(width), line, "-".repeat(width)], graphic: None }
}

/// Rendering failure fallback (§7 "Rendering failure"): a placeholder box
/// for images, the raw mime text otherwise.
fn placeholder(bundle: &MimeBundle) -> RenderedOutput {
    if bundle.keys().any(|m| m.starts_with("image/")) {
        return placeholder_image(40);
    }
    let text = bundle
        .values()
        .next()
        .map(mime_value_to_text)
        .unwrap_or_default();
    RenderedOutput { lines: text.lines().map(String::from).collect(), graphic: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::Protocol;
    use base64::Engine;

    fn renderer() -> OutputRenderer {
        OutputRenderer::new(50)
    }

    fn plain(text: &str) -> Output {
        Output::ExecuteResult {
            data: MimeBundle::from([("text/plain".to_string(), serde_json::json!(text))]),
            metadata: MimeBundle::new(),
            execution_count: 1,
        }
    }

    #[test]
    fn richness_prefers_images_over_everything() {
        assert!(richness_score("image/png") < richness_score("text/html"));
        assert!(richness_score("text/html") < richness_score("text/markdown"));
        assert!(richness_score("text/markdown") < richness_score("text/latex"));
        assert!(richness_score("text/latex") < richness_score("text/x-python-traceback"));
        assert!(richness_score("text/x-python-traceback") < richness_score("stream/stderr"));
        assert!(richness_score("stream/stderr") < richness_score("text/plain"));
        assert!(richness_score("text/plain") < richness_score("application/json"));
    }

    #[test]
    fn renders_plain_text_to_lines() {
        let mut r = renderer();
        let out = r.render(&plain("line one\nline two"), 80, &NullConversionRegistry, None, None, None);
        assert_eq!(out.lines, vec!["line one", "line two"]);
        assert!(out.graphic.is_none());
    }

    #[test]
    fn height_and_render_agree() {
        let mut r = renderer();
        let output = plain("a\nb\nc");
        let height = r.preferred_height(&output, 80, &NullConversionRegistry, None, None);
        let rendered = r.render(&output, 80, &NullConversionRegistry, None, None, None);
        assert_eq!(height, rendered.height());
    }

    #[test]
    fn html_without_a_conversion_route_falls_back_to_raw_text() {
        let mut r = renderer();
        let out = Output::DisplayData {
            data: MimeBundle::from([("text/html".to_string(), serde_json::json!("<b>hi</b>"))]),
            metadata: MimeBundle::new(),
            transient: None,
        };
        let rendered = r.render(&out, 80, &NullConversionRegistry, None, None, None);
        assert_eq!(rendered.lines, vec!["<b>hi</b>"]);
    }

    #[test]
    fn picks_html_over_plain_text_when_both_are_present() {
        let mut r = renderer();
        let out = Output::ExecuteResult {
            data: MimeBundle::from([
                ("text/plain".to_string(), serde_json::json!("plain")),
                ("text/html".to_string(), serde_json::json!("rich")),
            ]),
            metadata: MimeBundle::new(),
            execution_count: 1,
        };
        let rendered = r.render(&out, 80, &NullConversionRegistry, None, None, None);
        assert_eq!(rendered.lines, vec!["rich"]);
    }

    /// A registry that can only convert images to ANSI art, used to
    /// exercise the middle tier of §4.3 step 3's three-tier fallback
    /// (graphics handle, then ANSI art, then placeholder box).
    struct AnsiArtRegistry;

    impl ConversionRegistry for AnsiArtRegistry {
        fn convert(
            &self,
            _data: &[u8],
            from_mime: &str,
            to_mime: &str,
            _cols: u16,
            _rows: u16,
            _fg: Option<(u8, u8, u8)>,
            _bg: Option<(u8, u8, u8)>,
        ) -> Option<Vec<u8>> {
            (from_mime.starts_with("image/") && to_mime == "text/ansi").then(|| b"[ansi art]".to_vec())
        }

        fn find_route(&self, from: &str, to: &str) -> Option<Vec<String>> {
            (from.starts_with("image/") && to == "text/ansi").then(|| vec![from.to_string(), to.to_string()])
        }
    }

    #[test]
    fn image_without_a_graphics_manager_prefers_ansi_art_conversion_over_placeholder() {
        let mut r = renderer();
        let png = base64::engine::general_purpose::STANDARD
            .decode("iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=")
            .unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let out = Output::DisplayData {
            data: MimeBundle::from([("image/png".to_string(), serde_json::json!(encoded))]),
            metadata: MimeBundle::new(),
            transient: None,
        };
        let rendered = r.render(&out, 40, &AnsiArtRegistry, None, None, None);
        assert_eq!(rendered.lines, vec!["[ansi art]"]);
        assert!(rendered.graphic.is_none());
    }

    #[test]
    fn image_without_a_graphics_manager_falls_back_to_a_placeholder() {
        let mut r = renderer();
        let out = Output::DisplayData {
            data: MimeBundle::from([("image/png".to_string(), serde_json::json!("not-real-base64!!"))]),
            metadata: MimeBundle::new(),
            transient: None,
        };
        let rendered = r.render(&out, 40, &NullConversionRegistry, None, None, None);
        assert!(rendered.lines.iter().any(|l| l.contains("Image")));
        assert!(rendered.graphic.is_none());
    }

    #[test]
    fn stream_output_renders_its_text_directly() {
        let mut r = renderer();
        let out = Output::Stream { name: StreamName::Stdout, text: "hello\nworld".into() };
        let rendered = r.render(&out, 80, &NullConversionRegistry, None, None, None);
        assert_eq!(rendered.lines, vec!["hello", "world"]);
    }

    #[test]
    fn error_output_renders_its_traceback() {
        let mut r = renderer();
        let out = Output::Error {
            ename: "ValueError".into(),
            evalue: "bad".into(),
            traceback: vec!["line1".into(), "line2".into()],
        };
        let rendered = r.render(&out, 80, &NullConversionRegistry, None, None, None);
        assert_eq!(rendered.lines, vec!["line1", "line2"]);
    }

    #[test]
    fn cache_returns_the_same_result_for_identical_inputs() {
        let mut r = renderer();
        let output = plain("cached");
        let first = r.render(&output, 80, &NullConversionRegistry, None, None, None);
        let second = r.render(&output, 80, &NullConversionRegistry, None, None, None);
        assert_eq!(first, second);
    }

    #[test]
    fn image_height_preserves_aspect_ratio() {
        assert_eq!(image_height_cells(20, 200, 100), 5); // 20 * 0.5 / 2
        assert_eq!(image_height_cells(20, 100, 200), 20); // 20 * 2.0 / 2
    }

    #[test]
    fn graphics_manager_present_registers_a_graphic_for_images() {
        let mut r = renderer();
        let mut mgr = GraphicsManager::new(Protocol::Kitty);
        // A minimal 1x1 PNG, base64-encoded.
        let png = base64::engine::general_purpose::STANDARD
            .decode("iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=")
            .unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let out = Output::DisplayData {
            data: MimeBundle::from([("image/png".to_string(), serde_json::json!(encoded))]),
            metadata: MimeBundle::new(),
            transient: None,
        };
        let rendered = r.render(&out, 20, &NullConversionRegistry, None, None, Some(&mut mgr));
        assert!(rendered.graphic.is_some());
        assert!(mgr.get(rendered.graphic.unwrap()).is_some());
    }
}
