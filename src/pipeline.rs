//! Shared resources for one batch invocation.
//!
//! The renderer process and the asset server are both process-wide for the
//! lifetime of a batch: acquired lazily on first use, released explicitly on
//! every exit path. [`PipelineContext`] owns both so nothing in the pipeline
//! reaches for ambient globals.

use crate::assets::{AssetResolver, AssetServer};
use crate::error::ConvertError;
use crate::renderer::{ChromeRenderer, Renderer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct PipelineContext {
    renderer: Arc<dyn Renderer>,
    assets: OnceCell<AssetServer>,
}

impl PipelineContext {
    /// Context over an arbitrary renderer implementation.
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            assets: OnceCell::new(),
        }
    }

    /// Context backed by headless Chromium.
    pub fn with_chrome(chrome_path: Option<String>) -> Self {
        Self::new(Arc::new(ChromeRenderer::new(chrome_path)))
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// The batch's static file server, started on first call and rooted at
    /// the process working directory.
    pub async fn asset_server(&self) -> Result<&AssetServer, ConvertError> {
        self.assets
            .get_or_try_init(|| async {
                let root = std::env::current_dir()?;
                AssetServer::start(root)
            })
            .await
    }

    /// A resolver bound to the running asset server plus the configured
    /// extra search roots.
    pub async fn asset_resolver(
        &self,
        search_roots: &[PathBuf],
    ) -> Result<AssetResolver, ConvertError> {
        let server = self.asset_server().await?;
        Ok(AssetResolver::new(
            server.base_url().clone(),
            server.root().to_path_buf(),
            search_roots.to_vec(),
        ))
    }

    /// Tear down the renderer and the asset server. Must run on every exit
    /// path, fatal or not; both shutdowns are idempotent.
    pub async fn release(&self) {
        self.renderer.shutdown().await;
        if let Some(server) = self.assets.get() {
            server.shutdown();
        }
    }
}
