//! Render-and-capture protocol for one document.
//!
//! A job moves through content loading, readiness waits, and capture; any
//! failure lands in the job's own [`JobResult`] and never escapes to the
//! batch. The renderer session opened for a job is closed on every path out.

use crate::config::{extract_inline_config, EffectiveConfig, ImageFormat, InlineConfig, OutputConfig};
use crate::error::ConvertError;
use crate::pipeline::PipelineContext;
use crate::renderer::{Background, CaptureOptions, ReadyKind, RenderSession};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Ceiling for waiting on any single image before capture proceeds anyway.
const IMAGE_WAIT: Duration = Duration::from_secs(5);

/// One document's end-to-end conversion unit. Owned exclusively by the
/// worker executing it.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub input: PathBuf,
    /// Explicit output directory; overrides inline and derived locations.
    pub output_dir: Option<PathBuf>,
    /// Explicit file-name suffix; overrides the inline directive.
    pub suffix: Option<String>,
}

impl ConversionJob {
    pub fn new(input: PathBuf, output_dir: Option<PathBuf>, suffix: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            output_dir,
            suffix,
        }
    }
}

/// Outcome of one job. The input path is always attached so results stay
/// identifiable regardless of completion order.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub success: bool,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
    pub config: Option<EffectiveConfig>,
}

impl JobResult {
    fn completed(input: PathBuf, output: PathBuf, config: EffectiveConfig) -> Self {
        Self {
            success: true,
            input,
            output: Some(output),
            error: None,
            config: Some(config),
        }
    }

    fn failed(input: PathBuf, error: String) -> Self {
        Self {
            success: false,
            input,
            output: None,
            error: Some(error),
            config: None,
        }
    }
}

/// Convert one document. Never returns an error: failures are recorded in
/// the result so the batch carries on.
pub async fn render(
    ctx: &PipelineContext,
    base: &EffectiveConfig,
    job: &ConversionJob,
) -> JobResult {
    match render_inner(ctx, base, job).await {
        Ok(result) => result,
        Err(e) => {
            error!("failed to convert {}: {e}", job.input.display());
            JobResult::failed(job.input.clone(), e.to_string())
        }
    }
}

async fn render_inner(
    ctx: &PipelineContext,
    base: &EffectiveConfig,
    job: &ConversionJob,
) -> Result<JobResult, ConvertError> {
    debug!(job = %job.id, "converting {}", job.input.display());

    let markup = tokio::fs::read_to_string(&job.input).await?;

    let inline = extract_inline_config(&markup);
    let mut config = base.clone();
    config.apply(&inline.overlay());
    config.validate()?;

    // local pre-check; a document without these tags never reaches the renderer
    if !has_structural_tags(&markup) {
        return Err(ConvertError::InvalidDocument(
            "must contain <html> and <body> tags".to_string(),
        ));
    }

    let markup = if crate::assets::has_asset_references(&markup) {
        let resolver = ctx.asset_resolver(&config.processing.asset_roots).await?;
        resolver.rewrite(&markup, &job.input)
    } else {
        markup
    };

    let output_path = output_path_for(job, &inline, &config)?;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut session = ctx.renderer().open_session(&config.viewport).await?;
    let captured = drive_session(session.as_mut(), &markup, &config).await;
    session.close().await;
    let image = captured?;

    tokio::fs::write(&output_path, &image).await?;
    info!("saved {}", output_path.display());

    Ok(JobResult::completed(job.input.clone(), output_path, config))
}

async fn drive_session(
    session: &mut dyn RenderSession,
    markup: &str,
    config: &EffectiveConfig,
) -> Result<Vec<u8>, ConvertError> {
    session
        .load(markup, Duration::from_millis(config.timeouts.page_load))
        .await?;

    // readiness waits degrade to best effort; none of them fail the job
    if config.timeouts.asset_load > 0 {
        tokio::time::sleep(Duration::from_millis(config.timeouts.asset_load)).await;
    }
    if let Err(e) = session.wait_ready(ReadyKind::Fonts).await {
        warn!("font readiness wait failed: {e}");
    }
    let images = ReadyKind::Images {
        per_image_timeout: IMAGE_WAIT,
    };
    if let Err(e) = session.wait_ready(images).await {
        warn!("image readiness wait failed: {e}");
    }

    session.capture(&capture_options(&config.output)).await
}

fn capture_options(output: &OutputConfig) -> CaptureOptions {
    let transparent = output.background == "transparent";
    let background = if transparent {
        match output.format {
            ImageFormat::Png | ImageFormat::Webp => Background::Omit,
            ImageFormat::Jpeg => Background::Default,
        }
    } else {
        Background::Paint(output.background.clone())
    };

    CaptureOptions {
        format: output.format,
        quality: (output.format == ImageFormat::Jpeg).then_some(output.quality),
        full_page: output.full_page,
        background,
    }
}

fn has_structural_tags(markup: &str) -> bool {
    static HTML: OnceLock<Regex> = OnceLock::new();
    static BODY: OnceLock<Regex> = OnceLock::new();
    let html = HTML.get_or_init(|| Regex::new(r"(?i)<html[^>]*>").expect("html tag pattern"));
    let body = BODY.get_or_init(|| Regex::new(r"(?i)<body[^>]*>").expect("body tag pattern"));
    html.is_match(markup) && body.is_match(markup)
}

fn output_path_for(
    job: &ConversionJob,
    inline: &InlineConfig,
    config: &EffectiveConfig,
) -> Result<PathBuf, ConvertError> {
    let stem = job
        .input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| ConvertError::InvalidDocument("unusable file name".to_string()))?;

    let dir = job
        .output_dir
        .clone()
        .or_else(|| inline.out_dir.clone())
        .unwrap_or_else(|| {
            job.input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .to_path_buf()
        });
    let dir = redirect_work_dir(dir);

    let suffix = job
        .suffix
        .clone()
        .or_else(|| inline.suffix.clone())
        .unwrap_or_default();

    Ok(dir.join(format!("{stem}{suffix}.{}", config.output.format.extension())))
}

/// Generated images never land inside a transient `work` tree; they are
/// redirected to that tree's sibling `output` directory.
fn redirect_work_dir(dir: PathBuf) -> PathBuf {
    let work = dir
        .ancestors()
        .find(|ancestor| ancestor.file_name().is_some_and(|name| name == "work"))
        .map(Path::to_path_buf);

    match work {
        Some(work) => match work.parent() {
            Some(parent) => parent.join("output"),
            None => PathBuf::from("output"),
        },
        None => dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(input: &str, output_dir: Option<&str>, suffix: Option<&str>) -> ConversionJob {
        ConversionJob::new(
            PathBuf::from(input),
            output_dir.map(PathBuf::from),
            suffix.map(String::from),
        )
    }

    #[test]
    fn structural_tag_check() {
        assert!(has_structural_tags(
            "<html lang=\"en\"><body class=\"x\">hi</body></html>"
        ));
        assert!(!has_structural_tags("<div>fragment</div>"));
        assert!(!has_structural_tags("<html><p>no body</p></html>"));
    }

    #[test]
    fn output_path_prefers_explicit_directory() {
        let config = EffectiveConfig::default();
        let inline = InlineConfig {
            out_dir: Some(PathBuf::from("inline-out")),
            ..Default::default()
        };

        let path = output_path_for(&job("docs/a.html", Some("explicit"), None), &inline, &config)
            .unwrap();
        assert_eq!(path, PathBuf::from("explicit/a.png"));

        let path = output_path_for(&job("docs/a.html", None, None), &inline, &config).unwrap();
        assert_eq!(path, PathBuf::from("inline-out/a.png"));

        let path =
            output_path_for(&job("docs/a.html", None, None), &InlineConfig::default(), &config)
                .unwrap();
        assert_eq!(path, PathBuf::from("docs/a.png"));
    }

    #[test]
    fn suffix_and_format_shape_the_file_name() {
        let mut config = EffectiveConfig::default();
        config.output.format = ImageFormat::Jpeg;

        let path = output_path_for(
            &job("a.html", None, Some("-card")),
            &InlineConfig::default(),
            &config,
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("./a-card.jpg"));
    }

    #[test]
    fn work_directory_redirects_to_sibling_output() {
        assert_eq!(
            redirect_work_dir(PathBuf::from("batch/work")),
            PathBuf::from("batch/output")
        );
        assert_eq!(
            redirect_work_dir(PathBuf::from("batch/work/nested/deep")),
            PathBuf::from("batch/output")
        );
        assert_eq!(
            redirect_work_dir(PathBuf::from("batch/regular")),
            PathBuf::from("batch/regular")
        );
    }

    #[test]
    fn transparent_png_omits_background() {
        let output = OutputConfig::default();
        let options = capture_options(&output);
        assert_eq!(options.background, Background::Omit);
        assert_eq!(options.quality, None);
    }

    #[test]
    fn jpeg_carries_quality_and_paints_nothing_special() {
        let output = OutputConfig {
            format: ImageFormat::Jpeg,
            quality: 85,
            full_page: false,
            background: "transparent".to_string(),
        };
        let options = capture_options(&output);
        assert_eq!(options.background, Background::Default);
        assert_eq!(options.quality, Some(85));
        assert!(!options.full_page);
    }

    #[test]
    fn explicit_background_is_painted() {
        let output = OutputConfig {
            background: "#336699".to_string(),
            ..Default::default()
        };
        let options = capture_options(&output);
        assert_eq!(options.background, Background::Paint("#336699".to_string()));
    }
}
