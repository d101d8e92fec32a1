//! Starter-document generation.
//!
//! Creates empty HTML pages that already carry an inline configuration
//! block, so they convert correctly once content is pasted in.

use crate::config::EffectiveConfig;
use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Create `count` starter documents in `dir`. Existing files are skipped,
/// never overwritten. Returns the paths actually created.
pub async fn create_documents(
    dir: &Path,
    count: usize,
    config: &EffectiveConfig,
) -> Result<Vec<PathBuf>, ConvertError> {
    tokio::fs::create_dir_all(dir).await?;

    let mut created = Vec::new();
    for index in 1..=count {
        let name = format!("slide-{index:02}.html");
        let path = dir.join(&name);
        if path.exists() {
            warn!("{name} already exists, skipping");
            continue;
        }

        tokio::fs::write(&path, starter_markup(index, config)).await?;
        info!("created {}", path.display());
        created.push(path);
    }

    Ok(created)
}

fn starter_markup(index: usize, config: &EffectiveConfig) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Slide {index}</title>

    <script id="h2i-config" type="application/json">
    {{
      "format": "{format}",
      "quality": {quality},
      "width": {width},
      "height": {height},
      "background": "{background}",
      "deviceScaleFactor": {scale},
      "fullPage": {full_page}
    }}
    </script>

    <style>
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}

        body {{
            font-family: system-ui, -apple-system, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
        }}

        .container {{
            width: {width}px;
            height: {height}px;
            display: flex;
            flex-direction: column;
            justify-content: center;
            align-items: center;
            text-align: center;
        }}
    </style>
</head>
<body>
    <div class="container">
        <!-- paste your content here -->
        <h1>Slide {index}</h1>
    </div>
</body>
</html>
"#,
        format = config.output.format,
        quality = config.output.quality,
        width = config.viewport.width,
        height = config.viewport.height,
        background = config.output.background,
        scale = config.viewport.device_scale_factor,
        full_page = config.output.full_page,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::extract_inline_config;

    #[tokio::test]
    async fn creates_documents_and_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let config = EffectiveConfig::default();

        let created = create_documents(dir.path(), 2, &config).await.unwrap();
        assert_eq!(created.len(), 2);
        assert!(dir.path().join("slide-01.html").exists());

        // a second run finds both files present and creates nothing
        let created = create_documents(dir.path(), 2, &config).await.unwrap();
        assert!(created.is_empty());
    }

    #[test]
    fn starter_markup_round_trips_through_inline_extraction() {
        let mut config = EffectiveConfig::default();
        config.viewport.width = 640;
        config.output.quality = 77;

        let markup = starter_markup(1, &config);
        let inline = extract_inline_config(&markup);
        assert_eq!(inline.width, Some(640));
        assert_eq!(inline.quality, Some(77));
        assert_eq!(inline.full_page, Some(true));
    }
}
