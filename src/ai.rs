//! AI-assisted document generation.
//!
//! The pipeline's only obligations toward the text-generation collaborator:
//! build a prompt, parse the delimiter-separated response into individual
//! documents, and repair each one (structure, inline configuration block)
//! before it enters the conversion pipeline.

use crate::error::ConvertError;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Line separating individual documents in a generation response.
const DOCUMENT_DELIMITER: &str = "---HTML---";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Fallback configuration block injected into generated documents that came
/// back without one.
const DEFAULT_CONFIG_BLOCK: &str = r#"<script id="h2i-config" type="application/json">
{
  "format": "png",
  "width": 1080,
  "height": 1440,
  "quality": 95,
  "background": "transparent",
  "suffix": "-ai"
}
</script>"#;

#[derive(Debug, Clone)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            max_output_tokens: 65_536,
        }
    }
}

/// The text-generation collaborator boundary.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, ConvertError>;
}

/// Gemini REST client. Reads `GEMINI_API_KEY` from the environment.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn from_env(model: Option<String>) -> Result<Self, ConvertError> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            ConvertError::TextGeneration("GEMINI_API_KEY is not set".to_string())
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, ConvertError> {
        let url = format!(
            "{GEMINI_ENDPOINT}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_output_tokens,
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConvertError::TextGeneration(format!("request failed: {e}")))?;
        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ConvertError::TextGeneration(format!("unreadable response: {e}")))?;

        if !status.is_success() {
            let message = payload["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(ConvertError::TextGeneration(classify_api_error(message)));
        }

        let text = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ConvertError::TextGeneration("empty model response".to_string()));
        }
        Ok(text)
    }
}

fn classify_api_error(message: &str) -> String {
    if message.contains("API_KEY_INVALID") {
        "invalid Gemini API key; check GEMINI_API_KEY".to_string()
    } else if message.contains("QUOTA") || message.contains("RESOURCE_EXHAUSTED") {
        "Gemini API quota exceeded; try again later".to_string()
    } else {
        format!("Gemini API error: {message}")
    }
}

/// One generated document ready to be written to the work folder.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub filename: String,
    pub markup: String,
}

/// Prompt-side preset table. Dimensions differ from the conversion presets
/// on purpose: generated pages target portrait feed formats.
#[derive(Debug, Clone, Copy)]
pub struct PagePreset {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub suffix: &'static str,
}

pub fn page_preset(name: &str) -> PagePreset {
    match name {
        "stories" => PagePreset {
            name: "Stories",
            width: 1920,
            height: 1080,
            suffix: "-story",
        },
        "ppt" => PagePreset {
            name: "PowerPoint",
            width: 1920,
            height: 1080,
            suffix: "-ppt",
        },
        "generic" => PagePreset {
            name: "Generic",
            width: 1200,
            height: 800,
            suffix: "",
        },
        _ => PagePreset {
            name: "Instagram",
            width: 1080,
            height: 1440,
            suffix: "-instagram",
        },
    }
}

/// Generates a batch of self-contained documents through a [`TextGenerator`].
pub struct DocumentGenerator<G: TextGenerator> {
    generator: G,
}

impl<G: TextGenerator> DocumentGenerator<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        count: usize,
        preset: PagePreset,
    ) -> Result<Vec<GeneratedDocument>, ConvertError> {
        if prompt.trim().is_empty() {
            return Err(ConvertError::TextGeneration("prompt is required".to_string()));
        }

        info!("generating {count} document(s)");
        let full_prompt = build_prompt(prompt, count, preset);
        let response = self
            .generator
            .generate(&full_prompt, &SamplingOptions::default())
            .await?;

        let documents = split_response(&response, count)?;
        info!("{} document(s) generated", documents.len());
        Ok(documents)
    }
}

fn build_prompt(prompt: &str, count: usize, preset: PagePreset) -> String {
    format!(
        r#"Generate {count} self-contained HTML pages for {name} ({width}x{height}px).

Hard requirements:
- every page carries the full structure: <!DOCTYPE html>, <html>, <head>, <body>
- no external dependencies (CSS, JS, or images)
- inline styles or an internal <style> block only
- inline SVG for icons and graphics
- fonts: safe fallbacks only (system-ui, -apple-system, sans-serif)

Inline configuration (mandatory in every page):
<script id="h2i-config" type="application/json">
{{
  "format": "png",
  "width": {width},
  "height": {height},
  "quality": 95,
  "background": "transparent",
  "suffix": "{suffix}"
}}
</script>

Suggested structure:
- a main container fixed at {width}px x {height}px
- clean, professional content, no watermarks

Topic:
{prompt}

Output format:
return each HTML page separated by a line containing exactly:
{delimiter}

Do not include any text outside the HTML blocks."#,
        name = preset.name,
        width = preset.width,
        height = preset.height,
        suffix = preset.suffix,
        delimiter = DOCUMENT_DELIMITER,
    )
}

fn delimiter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^---HTML---\s*$").expect("delimiter pattern"))
}

fn split_response(response: &str, count: usize) -> Result<Vec<GeneratedDocument>, ConvertError> {
    let parts: Vec<&str> = delimiter_regex()
        .split(response)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        return Err(ConvertError::TextGeneration(format!(
            "no HTML blocks found in the response; expected a {DOCUMENT_DELIMITER} delimiter"
        )));
    }

    Ok(parts
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(index, markup)| GeneratedDocument {
            filename: format!("ai-slide-{:02}.html", index + 1),
            markup: repair_document(markup),
        })
        .collect())
}

/// Guarantee a generated document has the minimal structure and an inline
/// configuration block before it enters the pipeline.
fn repair_document(markup: &str) -> String {
    let mut markup = markup.to_string();

    if !markup.to_ascii_lowercase().contains("<!doctype html>") {
        markup = format!("<!DOCTYPE html>\n{markup}");
    }

    if !markup.contains("id=\"h2i-config\"") && !markup.contains("id='h2i-config'") {
        warn!("generated document has no inline configuration; injecting default");
        if let Some(position) = markup.to_ascii_lowercase().find("</head>") {
            markup.insert_str(position, &format!("  {DEFAULT_CONFIG_BLOCK}\n"));
        }
    }

    markup
}

/// Write generated documents into a timestamped work folder under
/// `html-files/work/ai/` so the normal pipeline can pick them up.
pub async fn write_work_folder(
    documents: &[GeneratedDocument],
    base_dir: Option<&Path>,
) -> Result<PathBuf, ConvertError> {
    let base = match base_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?
            .join("html-files")
            .join("work")
            .join("ai"),
    };
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let folder = base.join(stamp);
    tokio::fs::create_dir_all(&folder).await?;

    for document in documents {
        let path = folder.join(&document.filename);
        tokio::fs::write(&path, &document.markup).await?;
        info!("wrote {}", path.display());
    }

    Ok(folder)
}
