use crate::ai::{page_preset, DocumentGenerator, GeminiClient};
use crate::archive::ArchiveIngestor;
use crate::batch::{self, BatchSummary};
use crate::capture::ConversionJob;
use crate::config::{
    load_file_overlay, ConfigOverlay, EffectiveConfig, ImageFormat, Preset,
};
use crate::error::ConvertError;
use crate::input;
use crate::pipeline::PipelineContext;
use crate::scaffold;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "html2img")]
#[command(about = "Convert HTML documents to PNG, JPEG or WebP images")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Chrome/Chromium executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert an HTML document, an archive, or a directory of documents
    Convert {
        #[arg(help = "HTML file, .zip/.rar archive, or directory")]
        path: PathBuf,

        #[command(flatten)]
        render: RenderArgs,

        #[arg(long, help = "Output directory for generated images")]
        out_dir: Option<PathBuf>,

        #[arg(long, help = "Suffix appended to output file names")]
        suffix: Option<String>,
    },

    /// Generate documents with the Gemini API, then convert them
    Generate {
        #[arg(long, help = "What the generated pages should be about")]
        prompt: String,

        #[arg(long, default_value_t = 6, help = "Number of pages to generate")]
        count: usize,

        #[arg(long, help = "Gemini model name")]
        model: Option<String>,

        #[command(flatten)]
        render: RenderArgs,

        #[arg(long, help = "Output directory for generated images")]
        out_dir: Option<PathBuf>,
    },

    /// Create empty starter documents carrying an inline configuration block
    Scaffold {
        #[arg(help = "Directory to create the documents in")]
        path: PathBuf,

        #[arg(long, default_value_t = 1, help = "Number of documents to create")]
        count: usize,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Validate a configuration file and print the effective settings
    Validate {
        #[arg(help = "Configuration file to validate")]
        config: PathBuf,
    },
}

/// Render options shared by the converting subcommands. Each flag set here
/// lands in the invocation configuration layer.
#[derive(Args, Debug, Clone, Default)]
pub struct RenderArgs {
    #[arg(long, help = "Preset (instagram, stories, ppt, generic)")]
    pub preset: Option<String>,

    #[arg(short, long, help = "Output format (png, jpeg, webp)")]
    pub format: Option<String>,

    #[arg(short, long, help = "JPEG quality (1-100)")]
    pub quality: Option<u32>,

    #[arg(short, long, help = "Viewport width in pixels")]
    pub width: Option<u32>,

    #[arg(long, help = "Viewport height in pixels")]
    pub height: Option<u32>,

    #[arg(short, long, help = "Device scale factor")]
    pub scale: Option<f64>,

    #[arg(long, help = "Capture the full page (default)", overrides_with = "no_fullpage")]
    pub fullpage: bool,

    #[arg(long, help = "Capture only the viewport")]
    pub no_fullpage: bool,

    #[arg(long, help = "Background color (transparent, #ffffff, ...)")]
    pub background: Option<String>,

    #[arg(long, help = "Extra wait after load, in milliseconds")]
    pub wait_ms: Option<u64>,

    #[arg(long, help = "Concurrent conversions (1-10)")]
    pub concurrency: Option<usize>,
}

impl RenderArgs {
    /// Expand into the invocation overlay: preset first, explicit flags on
    /// top so they win over the preset's values.
    pub fn overlay(&self) -> Result<ConfigOverlay, ConvertError> {
        let mut overlay = match &self.preset {
            Some(name) => name.parse::<Preset>()?.overlay(),
            None => ConfigOverlay::default(),
        };

        if let Some(format) = &self.format {
            overlay.output.format = Some(format.parse::<ImageFormat>()?);
        }
        if let Some(quality) = self.quality {
            overlay.output.quality = Some(quality);
        }
        if let Some(width) = self.width {
            overlay.viewport.width = Some(width);
        }
        if let Some(height) = self.height {
            overlay.viewport.height = Some(height);
        }
        if let Some(scale) = self.scale {
            overlay.viewport.device_scale_factor = Some(scale);
        }
        if self.fullpage {
            overlay.output.full_page = Some(true);
        } else if self.no_fullpage {
            overlay.output.full_page = Some(false);
        }
        if let Some(background) = &self.background {
            overlay.output.background = Some(background.clone());
        }
        if let Some(wait_ms) = self.wait_ms {
            overlay.timeouts.asset_load = Some(wait_ms);
        }
        if let Some(concurrency) = self.concurrency {
            overlay.processing.max_concurrent = Some(concurrency);
        }

        Ok(overlay)
    }
}

/// Run one CLI invocation end to end. Shared pipeline resources are
/// released on every path out, fatal or not.
pub async fn run(cli: Cli) -> Result<(), ConvertError> {
    match cli.command {
        Commands::Convert {
            ref path,
            ref render,
            ref out_dir,
            ref suffix,
        } => {
            let base = resolve_base(&cli, render)?;
            log_config(&base);

            let ctx = PipelineContext::with_chrome(cli.chrome_path.clone());
            let outcome =
                convert_path(&ctx, &base, path, out_dir.clone(), suffix.clone()).await;
            ctx.release().await;
            outcome.map(|_| ())
        }

        Commands::Generate {
            ref prompt,
            count,
            ref model,
            ref render,
            ref out_dir,
        } => {
            let base = resolve_base(&cli, render)?;
            log_config(&base);

            let client = GeminiClient::from_env(model.clone())?;
            info!("generating documents via {}", client.model());
            let preset = page_preset(render.preset.as_deref().unwrap_or("instagram"));
            let generator = DocumentGenerator::new(client);
            let documents = generator.generate(prompt, count, preset).await?;
            let folder = crate::ai::write_work_folder(&documents, None).await?;
            info!("documents written to {}", folder.display());

            let ctx = PipelineContext::with_chrome(cli.chrome_path.clone());
            let outcome = convert_path(&ctx, &base, &folder, out_dir.clone(), None).await;
            ctx.release().await;
            outcome.map(|_| ())
        }

        Commands::Scaffold {
            ref path,
            count,
            ref render,
        } => {
            let base = resolve_base(&cli, render)?;
            let created = scaffold::create_documents(path, count, &base).await?;
            println!("{} document(s) created in {}", created.len(), path.display());
            Ok(())
        }

        Commands::Validate { ref config } => validate_config_file(config),
    }
}

/// Resolve and validate the invocation-level configuration: defaults, the
/// persisted file layer, then the CLI flags. Violations here are fatal
/// before any rendering begins.
fn resolve_base(cli: &Cli, render: &RenderArgs) -> Result<EffectiveConfig, ConvertError> {
    let file = load_file_overlay(cli.config.as_deref());
    let invocation = render.overlay()?;
    let base = EffectiveConfig::resolve(file.as_ref(), &invocation, None);
    base.validate()?;
    Ok(base)
}

async fn convert_path(
    ctx: &PipelineContext,
    base: &EffectiveConfig,
    path: &Path,
    out_dir: Option<PathBuf>,
    suffix: Option<String>,
) -> Result<BatchSummary, ConvertError> {
    let ingestor = ArchiveIngestor::new();
    let discovered = input::collect(path, &ingestor).await?;

    if discovered.documents.is_empty() {
        warn!("no HTML documents found in {}", path.display());
        return Ok(BatchSummary {
            successful: 0,
            failed: 0,
        });
    }
    info!("found {} document(s)", discovered.documents.len());

    let out_dir = out_dir.or(discovered.default_output_dir.clone());
    let jobs: Vec<ConversionJob> = discovered
        .documents
        .iter()
        .map(|document| ConversionJob::new(document.clone(), out_dir.clone(), suffix.clone()))
        .collect();

    let concurrency = if base.processing.parallel {
        base.processing.max_concurrent
    } else {
        1
    };
    let results = batch::run(ctx, base, jobs, concurrency).await;

    println!("{}", batch::render_report(&results));
    let summary = batch::summarize(&results);

    if let Some(extraction) = discovered.extraction {
        if let Err(e) = extraction.cleanup() {
            warn!("failed to remove extraction directory: {e}");
        }
    }

    Ok(summary)
}

fn validate_config_file(path: &Path) -> Result<(), ConvertError> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| ConvertError::PathNotFound(path.to_path_buf()))?;
    let overlay: ConfigOverlay = serde_json::from_str(&text)?;

    let mut config = EffectiveConfig::default();
    config.apply(&overlay);
    config.validate()?;

    println!("configuration is valid:");
    println!(
        "  viewport: {}x{} @{}x",
        config.viewport.width, config.viewport.height, config.viewport.device_scale_factor
    );
    println!("  format: {}", config.output.format);
    println!("  quality: {}", config.output.quality);
    println!(
        "  page: {}",
        if config.output.full_page { "full" } else { "viewport" }
    );
    println!("  background: {}", config.output.background);
    println!("  concurrency: {}", config.processing.max_concurrent);
    println!(
        "  timeouts: page load {} ms, asset load {} ms",
        config.timeouts.page_load, config.timeouts.asset_load
    );
    Ok(())
}

fn log_config(config: &EffectiveConfig) {
    info!(
        "viewport {}x{} @{}x, {} {}",
        config.viewport.width,
        config.viewport.height,
        config.viewport.device_scale_factor,
        config.output.format,
        if config.output.full_page { "full page" } else { "viewport only" },
    );
    if config.output.format == ImageFormat::Jpeg {
        info!("jpeg quality {}", config.output.quality);
    }
    info!(
        "background {}, concurrency {}",
        config.output.background, config.processing.max_concurrent
    );
}

/// Initialize tracing. INFO by default, DEBUG with `--verbose`.
pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_override_preset() {
        let args = RenderArgs {
            preset: Some("ppt".to_string()),
            width: Some(800),
            background: Some("transparent".to_string()),
            ..Default::default()
        };
        let overlay = args.overlay().unwrap();
        // preset says 1920/#ffffff; the explicit flags win
        assert_eq!(overlay.viewport.width, Some(800));
        assert_eq!(overlay.viewport.height, Some(1080));
        assert_eq!(overlay.output.background.as_deref(), Some("transparent"));
    }

    #[test]
    fn fullpage_flags() {
        let mut args = RenderArgs::default();
        assert_eq!(args.overlay().unwrap().output.full_page, None);

        args.no_fullpage = true;
        assert_eq!(args.overlay().unwrap().output.full_page, Some(false));
    }

    #[test]
    fn bad_format_flag_is_fatal() {
        let args = RenderArgs {
            format: Some("bmp".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            args.overlay(),
            Err(ConvertError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cli_parses_convert_command() {
        let cli = Cli::try_parse_from([
            "html2img", "convert", "docs", "--format", "jpeg", "--quality", "85",
            "--concurrency", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Convert { path, render, .. } => {
                assert_eq!(path, PathBuf::from("docs"));
                assert_eq!(render.format.as_deref(), Some("jpeg"));
                assert_eq!(render.quality, Some(85));
                assert_eq!(render.concurrency, Some(2));
            }
            _ => panic!("expected convert command"),
        }
    }
}
