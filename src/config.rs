//! Layered configuration resolution.
//!
//! Four sources feed one [`EffectiveConfig`], lowest precedence first:
//! built-in defaults, a persisted JSON file, invocation options, and inline
//! per-document directives embedded in the HTML itself. Each layer is a
//! [`ConfigOverlay`] applied field-by-field, so a layer only overrides the
//! keys it actually sets.

use crate::error::ConvertError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Output image encodings understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// File extension used for output paths.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Webp => write!(f, "webp"),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(ConvertError::InvalidConfig(vec![format!(
                "invalid format: {other} (use png, jpeg or webp)"
            )])),
        }
    }
}

/// Fully resolved settings for one document conversion.
///
/// Immutable once resolved for a given document; validation is a separate
/// step so every violation can be reported at once.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EffectiveConfig {
    pub viewport: ViewportConfig,
    pub output: OutputConfig,
    pub timeouts: TimeoutConfig,
    pub processing: ProcessingConfig,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            viewport: ViewportConfig::default(),
            output: OutputConfig::default(),
            timeouts: TimeoutConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// Renderer viewport for one document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewportConfig {
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels.
    pub height: u32,
    /// Device pixel ratio; values > 1.0 render high-density output.
    pub device_scale_factor: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            device_scale_factor: 2.0,
        }
    }
}

/// Output encoding and framing settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    pub format: ImageFormat,
    /// JPEG quality, 1-100. Ignored for PNG and WebP capture.
    pub quality: u32,
    /// Capture the full document height instead of just the viewport.
    pub full_page: bool,
    /// CSS background color, or `"transparent"`.
    pub background: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 90,
            full_page: true,
            background: "transparent".to_string(),
        }
    }
}

/// Load and readiness timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Ceiling for handing content to the renderer.
    pub page_load: u64,
    /// Grace period after load before capture, for async assets.
    pub asset_load: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            page_load: 30_000,
            asset_load: 2_000,
        }
    }
}

/// Batch scheduling settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessingConfig {
    /// When false the batch runs one document at a time.
    pub parallel: bool,
    /// Upper bound on concurrently open renderer sessions.
    pub max_concurrent: usize,
    /// Extra directories consulted when a relative asset reference does not
    /// resolve against the document's own directory.
    pub asset_roots: Vec<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrent: 3,
            asset_roots: Vec::new(),
        }
    }
}

/// One partial configuration layer. Every field is optional; unset fields
/// fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub viewport: ViewportOverlay,
    pub output: OutputOverlay,
    pub timeouts: TimeoutOverlay,
    pub processing: ProcessingOverlay,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewportOverlay {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub device_scale_factor: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputOverlay {
    pub format: Option<ImageFormat>,
    pub quality: Option<u32>,
    pub full_page: Option<bool>,
    pub background: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutOverlay {
    pub page_load: Option<u64>,
    pub asset_load: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessingOverlay {
    pub parallel: Option<bool>,
    pub max_concurrent: Option<usize>,
    pub asset_roots: Option<Vec<PathBuf>>,
}

impl EffectiveConfig {
    /// Merge the layers lowest-precedence first: defaults, persisted file,
    /// invocation options, inline document directives.
    pub fn resolve(
        file: Option<&ConfigOverlay>,
        invocation: &ConfigOverlay,
        inline: Option<&ConfigOverlay>,
    ) -> Self {
        let mut config = Self::default();
        if let Some(layer) = file {
            config.apply(layer);
        }
        config.apply(invocation);
        if let Some(layer) = inline {
            config.apply(layer);
        }
        config
    }

    /// Apply one overlay in place. Nested groups merge key-by-key.
    pub fn apply(&mut self, overlay: &ConfigOverlay) {
        if let Some(width) = overlay.viewport.width {
            self.viewport.width = width;
        }
        if let Some(height) = overlay.viewport.height {
            self.viewport.height = height;
        }
        if let Some(scale) = overlay.viewport.device_scale_factor {
            self.viewport.device_scale_factor = scale;
        }
        if let Some(format) = overlay.output.format {
            self.output.format = format;
        }
        if let Some(quality) = overlay.output.quality {
            self.output.quality = quality;
        }
        if let Some(full_page) = overlay.output.full_page {
            self.output.full_page = full_page;
        }
        if let Some(background) = &overlay.output.background {
            self.output.background = background.clone();
        }
        if let Some(page_load) = overlay.timeouts.page_load {
            self.timeouts.page_load = page_load;
        }
        if let Some(asset_load) = overlay.timeouts.asset_load {
            self.timeouts.asset_load = asset_load;
        }
        if let Some(parallel) = overlay.processing.parallel {
            self.processing.parallel = parallel;
        }
        if let Some(max_concurrent) = overlay.processing.max_concurrent {
            self.processing.max_concurrent = max_concurrent;
        }
        if let Some(asset_roots) = &overlay.processing.asset_roots {
            self.processing.asset_roots = asset_roots.clone();
        }
    }

    /// Check every documented bound, collecting all violations rather than
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), ConvertError> {
        let mut violations = Vec::new();

        if !(1..=8000).contains(&self.viewport.width) {
            violations.push("viewport width must be between 1 and 8000 pixels".to_string());
        }
        if !(1..=8000).contains(&self.viewport.height) {
            violations.push("viewport height must be between 1 and 8000 pixels".to_string());
        }
        if !(0.1..=5.0).contains(&self.viewport.device_scale_factor) {
            violations.push("device scale factor must be between 0.1 and 5".to_string());
        }
        if !(1..=100).contains(&self.output.quality) {
            violations.push("quality must be between 1 and 100".to_string());
        }
        if !(1_000..=120_000).contains(&self.timeouts.page_load) {
            violations.push("page load timeout must be between 1000 and 120000 ms".to_string());
        }
        if self.timeouts.asset_load > 30_000 {
            violations.push("asset load timeout must be between 0 and 30000 ms".to_string());
        }
        if !(1..=10).contains(&self.processing.max_concurrent) {
            violations.push("max concurrency must be between 1 and 10".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConvertError::InvalidConfig(violations))
        }
    }
}

/// Load the persisted configuration file layer.
///
/// An absent file is skipped silently; a malformed one is skipped with a
/// warning. Neither case is fatal.
pub fn load_file_overlay(path: Option<&Path>) -> Option<ConfigOverlay> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("config/config.json"));

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no configuration file at {}", path.display());
            return None;
        }
        Err(e) => {
            warn!("failed to read {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str::<ConfigOverlay>(&text) {
        Ok(overlay) => Some(overlay),
        Err(e) => {
            warn!("ignoring malformed configuration file {}: {e}", path.display());
            None
        }
    }
}

/// Per-document directives extracted from the markup itself. Highest merge
/// precedence; `suffix` and `out_dir` steer the output path rather than the
/// render settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InlineConfig {
    pub format: Option<ImageFormat>,
    pub quality: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub device_scale_factor: Option<f64>,
    pub full_page: Option<bool>,
    pub background: Option<String>,
    pub suffix: Option<String>,
    pub out_dir: Option<PathBuf>,
}

impl InlineConfig {
    /// View of the directives as a mergeable layer.
    pub fn overlay(&self) -> ConfigOverlay {
        ConfigOverlay {
            viewport: ViewportOverlay {
                width: self.width,
                height: self.height,
                device_scale_factor: self.device_scale_factor,
            },
            output: OutputOverlay {
                format: self.format,
                quality: self.quality,
                full_page: self.full_page,
                background: self.background.clone(),
            },
            timeouts: TimeoutOverlay::default(),
            processing: ProcessingOverlay::default(),
        }
    }
}

fn config_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)<script[^>]*id=["']h2i-config["'][^>]*type=["']application/json["'][^>]*>(.*?)</script>"#,
        )
        .expect("config block pattern")
    })
}

fn meta_directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]+name=["']h2i:([^"']+)["'][^>]+content=["']([^"']+)["'][^>]*>"#)
            .expect("meta directive pattern")
    })
}

/// Extract the inline configuration from a document.
///
/// Two equivalent notations are recognized: one tagged JSON block
/// (`<script id="h2i-config" type="application/json">`), and individual
/// `<meta name="h2i:key" content="value">` directives whose values are
/// coerced to bool/integer/float when the text matches. Malformed JSON is
/// skipped with a warning; directives win over the block for keys set in both.
pub fn extract_inline_config(markup: &str) -> InlineConfig {
    let mut config = InlineConfig::default();

    if let Some(captures) = config_block_regex().captures(markup) {
        match serde_json::from_str::<InlineConfig>(captures[1].trim()) {
            Ok(block) => config = block,
            Err(e) => warn!("ignoring malformed inline configuration block: {e}"),
        }
    }

    for captures in meta_directive_regex().captures_iter(markup) {
        apply_directive(&mut config, &captures[1], &captures[2]);
    }

    config
}

#[derive(Debug)]
enum DirectiveValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn coerce_directive(raw: &str) -> DirectiveValue {
    static INT: OnceLock<Regex> = OnceLock::new();
    static FLOAT: OnceLock<Regex> = OnceLock::new();
    let int = INT.get_or_init(|| Regex::new(r"^\d+$").expect("int pattern"));
    let float = FLOAT.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("float pattern"));

    if raw == "true" {
        DirectiveValue::Bool(true)
    } else if raw == "false" {
        DirectiveValue::Bool(false)
    } else if int.is_match(raw) {
        match raw.parse() {
            Ok(value) => DirectiveValue::Int(value),
            Err(_) => DirectiveValue::Text(raw.to_string()),
        }
    } else if float.is_match(raw) {
        match raw.parse() {
            Ok(value) => DirectiveValue::Float(value),
            Err(_) => DirectiveValue::Text(raw.to_string()),
        }
    } else {
        DirectiveValue::Text(raw.to_string())
    }
}

fn apply_directive(config: &mut InlineConfig, key: &str, raw: &str) {
    let value = coerce_directive(raw);
    match (key, value) {
        ("format", DirectiveValue::Text(text)) => match text.parse() {
            Ok(format) => config.format = Some(format),
            Err(_) => warn!("ignoring inline directive format={text}"),
        },
        ("quality", DirectiveValue::Int(n)) if n >= 0 => config.quality = Some(n as u32),
        ("width", DirectiveValue::Int(n)) if n >= 0 => config.width = Some(n as u32),
        ("height", DirectiveValue::Int(n)) if n >= 0 => config.height = Some(n as u32),
        ("deviceScaleFactor" | "scale", DirectiveValue::Float(f)) => {
            config.device_scale_factor = Some(f);
        }
        ("deviceScaleFactor" | "scale", DirectiveValue::Int(n)) => {
            config.device_scale_factor = Some(n as f64);
        }
        ("fullPage", DirectiveValue::Bool(b)) => config.full_page = Some(b),
        ("background", DirectiveValue::Text(text)) => config.background = Some(text),
        ("suffix", DirectiveValue::Text(text)) => config.suffix = Some(text),
        ("outDir", DirectiveValue::Text(text)) => config.out_dir = Some(PathBuf::from(text)),
        (key, value) => warn!("ignoring inline directive {key}={value:?}"),
    }
}

/// Named viewport/output presets expanded into the invocation layer before
/// explicit flags are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Instagram,
    Stories,
    Ppt,
    Generic,
}

impl Preset {
    pub fn overlay(&self) -> ConfigOverlay {
        let (width, height, background) = match self {
            Preset::Instagram => (1080, 1080, "transparent"),
            Preset::Stories => (1920, 1080, "transparent"),
            Preset::Ppt => (1920, 1080, "#ffffff"),
            Preset::Generic => (1200, 800, "#ffffff"),
        };
        ConfigOverlay {
            viewport: ViewportOverlay {
                width: Some(width),
                height: Some(height),
                device_scale_factor: None,
            },
            output: OutputOverlay {
                format: Some(ImageFormat::Png),
                quality: None,
                full_page: None,
                background: Some(background.to_string()),
            },
            timeouts: TimeoutOverlay::default(),
            processing: ProcessingOverlay::default(),
        }
    }
}

impl FromStr for Preset {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instagram" => Ok(Preset::Instagram),
            "stories" => Ok(Preset::Stories),
            "ppt" => Ok(Preset::Ppt),
            "generic" => Ok(Preset::Generic),
            other => Err(ConvertError::InvalidConfig(vec![format!(
                "invalid preset: {other} (use instagram, stories, ppt or generic)"
            )])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EffectiveConfig::default();
        assert_eq!(config.viewport.width, 1200);
        assert_eq!(config.viewport.height, 800);
        assert_eq!(config.viewport.device_scale_factor, 2.0);
        assert_eq!(config.output.format, ImageFormat::Png);
        assert_eq!(config.output.quality, 90);
        assert!(config.output.full_page);
        assert_eq!(config.output.background, "transparent");
        assert_eq!(config.timeouts.page_load, 30_000);
        assert_eq!(config.timeouts.asset_load, 2_000);
        assert_eq!(config.processing.max_concurrent, 3);
    }

    #[test]
    fn higher_layers_override_only_set_keys() {
        let file: ConfigOverlay = serde_json::from_str(
            r#"{"output": {"format": "jpeg"}, "viewport": {"width": 700}}"#,
        )
        .unwrap();
        let invocation: ConfigOverlay =
            serde_json::from_str(r#"{"output": {"quality": 42}}"#).unwrap();

        let config = EffectiveConfig::resolve(Some(&file), &invocation, None);

        // the invocation layer set only output.quality; the file layer's
        // format and width survive, everything else stays default
        assert_eq!(config.output.format, ImageFormat::Jpeg);
        assert_eq!(config.output.quality, 42);
        assert_eq!(config.viewport.width, 700);
        assert_eq!(config.viewport.height, 800);
    }

    #[test]
    fn resolution_is_idempotent() {
        let file: ConfigOverlay = serde_json::from_str(
            r##"{"viewport": {"width": 640, "deviceScaleFactor": 1.5}, "output": {"background": "#222222"}}"##,
        )
        .unwrap();
        let invocation: ConfigOverlay =
            serde_json::from_str(r#"{"timeouts": {"assetLoad": 500}}"#).unwrap();

        let a = EffectiveConfig::resolve(Some(&file), &invocation, None);
        let b = EffectiveConfig::resolve(Some(&file), &invocation, None);
        assert_eq!(a, b);
    }

    #[test]
    fn quality_bounds() {
        let mut config = EffectiveConfig::default();

        config.output.quality = 0;
        assert!(config.validate().is_err());
        config.output.quality = 101;
        assert!(config.validate().is_err());
        config.output.quality = 1;
        assert!(config.validate().is_ok());
        config.output.quality = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_collects_every_violation() {
        let mut config = EffectiveConfig::default();
        config.viewport.width = 0;
        config.viewport.device_scale_factor = 9.0;
        config.output.quality = 0;
        config.processing.max_concurrent = 50;

        match config.validate() {
            Err(ConvertError::InvalidConfig(violations)) => assert_eq!(violations.len(), 4),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn inline_json_block_is_extracted() {
        let markup = r#"<html><head>
            <script id="h2i-config" type="application/json">
            {"format": "webp", "width": 640, "height": 480, "suffix": "-card", "outDir": "out"}
            </script>
            </head><body></body></html>"#;

        let inline = extract_inline_config(markup);
        assert_eq!(inline.format, Some(ImageFormat::Webp));
        assert_eq!(inline.width, Some(640));
        assert_eq!(inline.height, Some(480));
        assert_eq!(inline.suffix.as_deref(), Some("-card"));
        assert_eq!(inline.out_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn meta_directives_are_coerced() {
        let markup = r##"<html><head>
            <meta name="h2i:width" content="800">
            <meta name="h2i:deviceScaleFactor" content="1.5">
            <meta name="h2i:fullPage" content="false">
            <meta name="h2i:background" content="#000000">
            </head><body></body></html>"##;

        let inline = extract_inline_config(markup);
        assert_eq!(inline.width, Some(800));
        assert_eq!(inline.device_scale_factor, Some(1.5));
        assert_eq!(inline.full_page, Some(false));
        assert_eq!(inline.background.as_deref(), Some("#000000"));
    }

    #[test]
    fn malformed_inline_block_is_skipped() {
        let markup = r#"<script id="h2i-config" type="application/json">{not json}</script>"#;
        assert_eq!(extract_inline_config(markup), InlineConfig::default());
    }

    #[test]
    fn inline_overlay_only_carries_set_keys() {
        let inline = InlineConfig {
            quality: Some(75),
            ..Default::default()
        };
        let mut config = EffectiveConfig::default();
        config.apply(&inline.overlay());
        assert_eq!(config.output.quality, 75);
        assert_eq!(config.output.format, ImageFormat::Png);
    }

    #[test]
    fn preset_expansion() {
        let mut config = EffectiveConfig::default();
        config.apply(&Preset::Ppt.overlay());
        assert_eq!(config.viewport.width, 1920);
        assert_eq!(config.viewport.height, 1080);
        assert_eq!(config.output.background, "#ffffff");
        assert!("nope".parse::<Preset>().is_err());
    }

    #[test]
    fn jpg_normalizes_to_jpeg() {
        assert_eq!("jpg".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
    }
}
