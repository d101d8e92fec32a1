//! # html2img
//!
//! Batch HTML to image converter. Hands self-contained HTML documents to a
//! headless Chromium renderer and captures them as PNG, JPEG, or WebP,
//! driving a bounded number of renders concurrently and aggregating
//! per-document results without ever letting one failure abort the batch.
//!
//! The pipeline around the opaque render step:
//!
//! - layered configuration (defaults → file → invocation → inline document
//!   directives), validated with every violation reported at once
//! - relative asset references rewritten to a process-local static file
//!   server so the renderer can fetch them
//! - zip/rar archive ingestion feeding HTML discovery
//! - group-based scheduling that caps concurrent renderer sessions
//!
//! ## Library usage
//!
//! ```rust,no_run
//! use html2img::{batch, ConversionJob, EffectiveConfig, PipelineContext};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EffectiveConfig::default();
//!     let ctx = PipelineContext::with_chrome(None);
//!
//!     let jobs = vec![ConversionJob::new("page.html".into(), None, None)];
//!     let results = batch::run(&ctx, &config, jobs, 3).await;
//!     println!("{}", batch::render_report(&results));
//!
//!     ctx.release().await;
//! }
//! ```
//!
//! ## CLI usage
//!
//! ```bash
//! # one document, a directory, or an archive
//! html2img convert page.html
//! html2img convert ./slides --format jpeg --quality 85 --concurrency 2
//! html2img convert bundle.zip --out-dir images/
//!
//! # generate pages with Gemini, then convert them
//! html2img generate --prompt "five rust tips" --count 5 --preset instagram
//! ```

/// Layered configuration resolution and validation
pub mod config;

/// Error types shared across the pipeline
pub mod error;

/// Asset reference rewriting and the local static file server
pub mod assets;

/// Archive detection, extraction, and HTML discovery
pub mod archive;

/// The external renderer boundary and its Chromium implementation
pub mod renderer;

/// Shared per-batch resources (renderer, asset server)
pub mod pipeline;

/// Per-document render-and-capture protocol
pub mod capture;

/// Concurrency-bounded scheduling and result aggregation
pub mod batch;

/// Input classification and document discovery
pub mod input;

/// AI-assisted document generation
pub mod ai;

/// Starter-document scaffolding
pub mod scaffold;

/// Command-line interface implementation
pub mod cli;


pub use archive::{ArchiveExtraction, ArchiveIngestor};
pub use assets::{AssetResolver, AssetServer};
pub use batch::{BatchResult, BatchSummary};
pub use capture::{ConversionJob, JobResult};
pub use cli::{setup_logging, Cli};
pub use config::{ConfigOverlay, EffectiveConfig, ImageFormat, InlineConfig, Preset};
pub use error::ConvertError;
pub use pipeline::PipelineContext;
pub use renderer::{Background, CaptureOptions, ChromeRenderer, ReadyKind, Renderer, RenderSession};
