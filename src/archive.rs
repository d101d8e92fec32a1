//! Archive ingestion feeding HTML discovery.
//!
//! Zip archives are extracted in-process; rar archives shell out to the
//! host's `unrar`. Either way a failed extraction leaves no partial state
//! behind: the destination directory is removed before the error propagates.

use crate::error::ConvertError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["zip", "rar"];

/// Detects and extracts supported archives and discovers the HTML documents
/// inside extracted trees.
#[derive(Debug, Default)]
pub struct ArchiveIngestor;

impl ArchiveIngestor {
    pub fn new() -> Self {
        Self
    }

    /// True when the path carries a supported archive extension.
    pub fn is_archive(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| ext.eq_ignore_ascii_case(supported))
            })
            .unwrap_or(false)
    }

    /// Extract `archive` into `dest`, creating the directory first.
    ///
    /// On any failure the destination is deleted before the error is
    /// returned, so no orphaned partial extraction remains.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ConvertError> {
        tokio::fs::create_dir_all(dest).await?;

        let result = match extension_of(archive).as_deref() {
            Some("zip") => extract_zip(archive, dest).await,
            Some("rar") => extract_rar(archive, dest).await,
            other => Err(ConvertError::UnsupportedArchive(
                other.map(String::from).unwrap_or_else(|| archive.display().to_string()),
            )),
        };

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_dir_all(dest).await {
                warn!("failed to clean up {}: {e}", dest.display());
            }
        }
        result
    }

    /// Extract into a fresh temporary directory next to the archive. The
    /// returned guard owns the directory; dropping it removes the tree.
    pub async fn extract_to_temp(&self, archive: &Path) -> Result<ArchiveExtraction, ConvertError> {
        let parent = archive.parent().unwrap_or(Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix("h2i-extract-")
            .tempdir_in(parent)?;
        self.extract(archive, temp.path()).await?;
        Ok(ArchiveExtraction { dir: temp })
    }

    /// Every `.html` file below `root`, in a stable sorted order so batches
    /// are reproducible.
    pub fn find_html(&self, root: &Path) -> Vec<PathBuf> {
        let mut documents: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("skipping unreadable entry under {}: {e}", root.display());
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
            })
            .collect();
        documents.sort();
        documents
    }
}

/// Working directory created for one archive. Removed automatically when
/// dropped; [`ArchiveExtraction::cleanup`] reports removal errors instead.
pub struct ArchiveExtraction {
    dir: TempDir,
}

impl ArchiveExtraction {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn cleanup(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

async fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ConvertError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    info!("extracting zip archive {}", archive.display());

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| ConvertError::ExtractionFailed(e.to_string()))?;
        debug!("{} entries in {}", zip.len(), archive.display());
        zip.extract(&dest)
            .map_err(|e| ConvertError::ExtractionFailed(e.to_string()))
    })
    .await
    .map_err(|e| ConvertError::ExtractionFailed(e.to_string()))?
}

async fn extract_rar(archive: &Path, dest: &Path) -> Result<(), ConvertError> {
    // probe first so a missing tool reports cleanly instead of as a spawn error
    match Command::new("unrar").arg("-?").output().await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::ExtractorMissing);
        }
        _ => {}
    }

    info!("extracting rar archive {}", archive.display());
    let output = Command::new("unrar")
        .arg("x")
        .arg("-o+")
        .arg(archive)
        .arg(dest)
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ConvertError::ExtractionFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn archive_detection_by_extension() {
        let ingestor = ArchiveIngestor::new();
        assert!(ingestor.is_archive(Path::new("bundle.zip")));
        assert!(ingestor.is_archive(Path::new("bundle.RAR")));
        assert!(!ingestor.is_archive(Path::new("page.html")));
        assert!(!ingestor.is_archive(Path::new("noext")));
    }

    #[tokio::test]
    async fn zip_extraction_and_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(
            &archive,
            &[
                ("b.html", "<html><body>b</body></html>"),
                ("nested/a.html", "<html><body>a</body></html>"),
                ("notes.txt", "ignored"),
            ],
        );

        let ingestor = ArchiveIngestor::new();
        let extraction = ingestor.extract_to_temp(&archive).await.unwrap();
        let documents = ingestor.find_html(extraction.root());

        assert_eq!(documents.len(), 2);
        // sorted: b.html sits above nested/a.html lexicographically
        assert!(documents[0].ends_with("b.html"));
        assert!(documents[1].ends_with("nested/a.html"));

        let root = extraction.root().to_path_buf();
        extraction.cleanup().unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn failed_extraction_removes_destination() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("broken.zip");
        std::fs::write(&bogus, b"this is not a zip archive").unwrap();

        let dest = dir.path().join("extracted");
        let ingestor = ArchiveIngestor::new();
        let result = ingestor.extract(&bogus, &dest).await;

        assert!(matches!(result, Err(ConvertError::ExtractionFailed(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn html_discovery_is_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("z.html"), "z").unwrap();
        std::fs::write(dir.path().join("a.HTML"), "a").unwrap();
        std::fs::write(dir.path().join("sub/m.html"), "m").unwrap();
        std::fs::write(dir.path().join("skip.css"), "").unwrap();

        let documents = ArchiveIngestor::new().find_html(dir.path());
        assert_eq!(documents.len(), 3);
        assert!(documents[0].ends_with("a.HTML"));
        assert!(documents.windows(2).all(|w| w[0] <= w[1]));
    }
}
