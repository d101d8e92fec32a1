//! Input surface: a path that is a single document, a single archive, or a
//! directory of documents (falling back to archives found inside it).

use crate::archive::{ArchiveExtraction, ArchiveIngestor};
use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Document(PathBuf),
    Archive(PathBuf),
    Directory(PathBuf),
}

/// Decide what kind of input a path is. Missing paths and unsupported file
/// extensions are fatal.
pub fn classify(path: &Path, ingestor: &ArchiveIngestor) -> Result<InputKind, ConvertError> {
    let metadata =
        std::fs::metadata(path).map_err(|_| ConvertError::PathNotFound(path.to_path_buf()))?;

    if metadata.is_dir() {
        return Ok(InputKind::Directory(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") => Ok(InputKind::Document(path.to_path_buf())),
        _ if ingestor.is_archive(path) => Ok(InputKind::Archive(path.to_path_buf())),
        Some(other) => Err(ConvertError::UnsupportedInput(format!(".{other}"))),
        None => Err(ConvertError::UnsupportedInput(path.display().to_string())),
    }
}

/// Documents collected for one invocation, plus any extraction whose
/// lifetime must outlive the batch.
pub struct DiscoveredDocuments {
    pub documents: Vec<PathBuf>,
    /// Present for single-archive inputs; dropping it removes the
    /// extraction tree, so keep it alive until the batch finishes.
    pub extraction: Option<ArchiveExtraction>,
    /// Output directory to use when the caller gave none.
    pub default_output_dir: Option<PathBuf>,
}

/// Collect the batch's documents for a path, sorted for reproducible order.
pub async fn collect(
    path: &Path,
    ingestor: &ArchiveIngestor,
) -> Result<DiscoveredDocuments, ConvertError> {
    match classify(path, ingestor)? {
        InputKind::Document(document) => Ok(DiscoveredDocuments {
            documents: vec![document],
            extraction: None,
            default_output_dir: None,
        }),
        InputKind::Archive(archive) => {
            let extraction = ingestor.extract_to_temp(&archive).await?;
            let documents = ingestor.find_html(extraction.root());
            // extracted trees are transient; keep generated images out of them
            let default_output_dir = Some(std::env::current_dir()?.join("output"));
            Ok(DiscoveredDocuments {
                documents,
                extraction: Some(extraction),
                default_output_dir,
            })
        }
        InputKind::Directory(dir) => {
            let mut documents = html_documents_in(&dir)?;

            if documents.is_empty() {
                let archives = archives_in(&dir, ingestor)?;
                if !archives.is_empty() {
                    info!("no HTML found; extracting {} archive(s)", archives.len());
                    let work = dir.join("work");
                    for archive in &archives {
                        let stem = archive
                            .file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_else(|| "archive".to_string());
                        if let Err(e) = ingestor.extract(archive, &work.join(stem)).await {
                            // one bad archive must not stop the scan
                            error!("failed to extract {}: {e}", archive.display());
                        }
                    }
                    documents = ingestor.find_html(&work);
                }
            }

            Ok(DiscoveredDocuments {
                documents,
                extraction: None,
                default_output_dir: None,
            })
        }
    }
}

/// HTML files directly inside `dir` (not recursive), sorted.
fn html_documents_in(dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
        {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

fn archives_in(dir: &Path, ingestor: &ArchiveIngestor) -> Result<Vec<PathBuf>, ConvertError> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && ingestor.is_archive(&path) {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("a.html");
        let zip = dir.path().join("a.zip");
        let text = dir.path().join("a.txt");
        for path in [&html, &zip, &text] {
            std::fs::write(path, b"x").unwrap();
        }

        let ingestor = ArchiveIngestor::new();
        assert_eq!(
            classify(dir.path(), &ingestor).unwrap(),
            InputKind::Directory(dir.path().to_path_buf())
        );
        assert_eq!(classify(&html, &ingestor).unwrap(), InputKind::Document(html.clone()));
        assert_eq!(classify(&zip, &ingestor).unwrap(), InputKind::Archive(zip.clone()));
        assert!(matches!(
            classify(&text, &ingestor),
            Err(ConvertError::UnsupportedInput(_))
        ));
        assert!(matches!(
            classify(&dir.path().join("missing.html"), &ingestor),
            Err(ConvertError::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn directory_scan_is_shallow_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.html"), b"x").unwrap();
        std::fs::write(dir.path().join("a.html"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.html"), b"x").unwrap();

        let discovered = collect(dir.path(), &ArchiveIngestor::new()).await.unwrap();
        assert_eq!(discovered.documents.len(), 2);
        assert!(discovered.documents[0].ends_with("a.html"));
        assert!(discovered.documents[1].ends_with("b.html"));
    }
}
