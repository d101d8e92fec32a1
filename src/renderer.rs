//! The external page-rendering collaborator.
//!
//! The pipeline only ever talks to [`Renderer`] and [`RenderSession`]:
//! open a session, load markup, wait for readiness, capture, close.
//! [`ChromeRenderer`] implements the contract against headless Chromium via
//! the Chrome DevTools Protocol. One browser process serves the whole batch;
//! every job gets its own session so no state leaks between documents.

use crate::config::{ImageFormat, ViewportConfig};
use crate::error::ConvertError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Readiness conditions a session can wait on before capture. All waits are
/// best-effort; a timeout degrades to "proceed anyway".
#[derive(Debug, Clone, Copy)]
pub enum ReadyKind {
    /// Font loading completion, signaled by the document's font registry.
    Fonts,
    /// Image loading completion, bounded per image so one broken reference
    /// cannot stall the job.
    Images { per_image_timeout: Duration },
}

/// How the captured image's backdrop is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Background {
    /// Whatever the document paints.
    Default,
    /// Skip the default white backdrop entirely (transparent PNG/WebP).
    Omit,
    /// Paint this CSS color behind the document before capture.
    Paint(String),
}

/// Format-specific capture options handed to the renderer.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub format: ImageFormat,
    /// Encoder quality; only meaningful for JPEG.
    pub quality: Option<u32>,
    pub full_page: bool,
    pub background: Background,
}

/// One renderer session, exclusive to a single conversion job.
#[async_trait]
pub trait RenderSession: Send {
    /// Hand markup to the renderer, bounded by `timeout`.
    async fn load(&mut self, markup: &str, timeout: Duration) -> Result<(), ConvertError>;

    /// Wait for one readiness condition.
    async fn wait_ready(&mut self, kind: ReadyKind) -> Result<(), ConvertError>;

    /// Capture the rendered document as encoded image bytes.
    async fn capture(&mut self, options: &CaptureOptions) -> Result<Vec<u8>, ConvertError>;

    /// Tear the session down. Must be called on every exit path.
    async fn close(&mut self);
}

/// The shared rendering engine. `open_session` must be safe to call
/// concurrently up to the batch's configured concurrency bound.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_session(
        &self,
        viewport: &ViewportConfig,
    ) -> Result<Box<dyn RenderSession>, ConvertError>;

    /// Shut the engine down. Idempotent; called on every exit path.
    async fn shutdown(&self);
}

/// Headless-Chromium renderer. The browser process is launched lazily on the
/// first session and torn down explicitly by [`Renderer::shutdown`].
pub struct ChromeRenderer {
    chrome_path: Option<String>,
    instance: OnceCell<ChromeInstance>,
}

struct ChromeInstance {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromeRenderer {
    pub fn new(chrome_path: Option<String>) -> Self {
        Self {
            chrome_path,
            instance: OnceCell::new(),
        }
    }

    async fn launch(&self) -> Result<ChromeInstance, ConvertError> {
        info!("launching headless browser");

        let mut builder = BrowserConfig::builder().args(chrome_args());
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ConvertError::Renderer)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ConvertError::Renderer(format!("browser launch failed: {e}")))?;

        // The handler stream drives all CDP traffic and must be polled for
        // the lifetime of the browser.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("renderer event stream error: {e}");
                }
            }
            debug!("renderer event stream ended");
        });

        Ok(ChromeInstance {
            browser: Mutex::new(browser),
            handler: handler_task,
        })
    }
}

fn chrome_args() -> Vec<String> {
    [
        "--headless",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
        "--disable-extensions",
        "--disable-default-apps",
        "--disable-sync",
        "--no-first-run",
        "--allow-running-insecure-content",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn open_session(
        &self,
        viewport: &ViewportConfig,
    ) -> Result<Box<dyn RenderSession>, ConvertError> {
        let instance = self
            .instance
            .get_or_try_init(|| self.launch())
            .await?;

        let page = {
            let browser = instance.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| ConvertError::Renderer(format!("failed to open session: {e}")))?
        };

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(viewport.width))
            .height(i64::from(viewport.height))
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(false)
            .build()
            .map_err(ConvertError::Renderer)?;
        page.execute(metrics)
            .await
            .map_err(|e| ConvertError::Renderer(format!("failed to set viewport: {e}")))?;

        Ok(Box::new(ChromeSession { page }))
    }

    async fn shutdown(&self) {
        if let Some(instance) = self.instance.get() {
            info!("shutting down renderer");
            let mut browser = instance.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("browser close failed: {e}");
            }
            instance.handler.abort();
        }
    }
}

struct ChromeSession {
    page: Page,
}

#[async_trait]
impl RenderSession for ChromeSession {
    async fn load(&mut self, markup: &str, timeout: Duration) -> Result<(), ConvertError> {
        let load = async {
            self.page.set_content(markup).await?;
            // resolves once the frame settles; harmless if it already has
            let _ = self.page.wait_for_navigation().await;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };

        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConvertError::LoadFailed(e.to_string())),
            Err(_) => Err(ConvertError::LoadTimeout(timeout.as_millis() as u64)),
        }
    }

    async fn wait_ready(&mut self, kind: ReadyKind) -> Result<(), ConvertError> {
        let expression = match kind {
            ReadyKind::Fonts => {
                "document.fonts ? document.fonts.ready.then(() => true) : true".to_string()
            }
            ReadyKind::Images { per_image_timeout } => image_wait_expression(per_image_timeout),
        };

        self.page
            .evaluate(expression)
            .await
            .map(|_| ())
            .map_err(|e| ConvertError::Renderer(format!("readiness wait failed: {e}")))
    }

    async fn capture(&mut self, options: &CaptureOptions) -> Result<Vec<u8>, ConvertError> {
        if let Background::Paint(color) = &options.background {
            let color = color.replace('\'', "\\'");
            let paint = format!(
                "(() => {{ document.documentElement.style.background = '{color}'; \
                 document.body.style.background = '{color}'; return true; }})()"
            );
            self.page
                .evaluate(paint)
                .await
                .map_err(|e| ConvertError::Renderer(format!("failed to paint background: {e}")))?;
        }

        let mut params = ScreenshotParams::builder()
            .format(cdp_format(options.format))
            .full_page(options.full_page);
        if options.format == ImageFormat::Jpeg {
            if let Some(quality) = options.quality {
                params = params.quality(i64::from(quality));
            }
        }
        if options.background == Background::Omit {
            params = params.omit_background(true);
        }

        self.page
            .screenshot(params.build())
            .await
            .map_err(|e| ConvertError::CaptureFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("session close failed: {e}");
        }
    }
}

fn cdp_format(format: ImageFormat) -> CaptureScreenshotFormat {
    match format {
        ImageFormat::Png => CaptureScreenshotFormat::Png,
        ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        ImageFormat::Webp => CaptureScreenshotFormat::Webp,
    }
}

fn image_wait_expression(per_image_timeout: Duration) -> String {
    format!(
        r#"(async () => {{
  const images = Array.from(document.images);
  await Promise.all(images.map((img) => {{
    if (img.complete) return Promise.resolve();
    return new Promise((resolve) => {{
      const timer = setTimeout(resolve, {timeout});
      const done = () => {{ clearTimeout(timer); resolve(); }};
      img.addEventListener('load', done, {{ once: true }});
      img.addEventListener('error', done, {{ once: true }});
    }});
  }}));
  return true;
}})()"#,
        timeout = per_image_timeout.as_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_wait_carries_the_bound() {
        let expression = image_wait_expression(Duration::from_millis(1234));
        assert!(expression.contains("setTimeout(resolve, 1234)"));
    }

    #[test]
    fn cdp_format_mapping() {
        assert!(matches!(cdp_format(ImageFormat::Png), CaptureScreenshotFormat::Png));
        assert!(matches!(cdp_format(ImageFormat::Jpeg), CaptureScreenshotFormat::Jpeg));
        assert!(matches!(cdp_format(ImageFormat::Webp), CaptureScreenshotFormat::Webp));
    }
}
