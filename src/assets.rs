//! Relative asset resolution for self-contained-ish documents.
//!
//! The renderer receives markup as a string, so relative `href`/`src`/`url()`
//! references would dangle. [`AssetResolver::rewrite`] points them at a
//! process-local static file server ([`AssetServer`]) rooted at the working
//! directory. Unresolvable references are left as-is with a warning; a broken
//! image must never sink the conversion.

use crate::error::ConvertError;
use regex::{Captures, Regex};
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, warn};
use url::Url;

fn asset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)(href|src|url\()\s*["']?([^"'\s)]+\.(?:css|js|png|jpe?g|gif|svg|webp|woff2?|ttf|otf))["']?"#,
        )
        .expect("asset reference pattern")
    })
}

/// True when the markup contains at least one attribute value that looks
/// like an asset reference. Lets callers skip server startup entirely for
/// fully self-contained documents.
pub fn has_asset_references(markup: &str) -> bool {
    asset_regex().is_match(markup)
}

/// Rewrites relative asset references into addresses served by the batch's
/// [`AssetServer`].
pub struct AssetResolver {
    base_url: Url,
    root: PathBuf,
    search_roots: Vec<PathBuf>,
}

impl AssetResolver {
    pub fn new(base_url: Url, root: PathBuf, search_roots: Vec<PathBuf>) -> Self {
        let root = root.canonicalize().unwrap_or(root);
        Self {
            base_url,
            root,
            search_roots,
        }
    }

    /// Rewrite every resolvable relative reference in `markup`.
    ///
    /// Absolute network URLs, data URIs, and file URLs pass through
    /// untouched. References that resolve to nothing on disk are kept
    /// verbatim and logged.
    pub fn rewrite(&self, markup: &str, document_path: &Path) -> String {
        let document_dir = document_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();

        asset_regex()
            .replace_all(markup, |caps: &Captures| {
                let matched = &caps[0];
                let reference = &caps[2];

                if reference.starts_with("http")
                    || reference.starts_with("//")
                    || reference.starts_with("data:")
                    || reference.starts_with("file:")
                {
                    return matched.to_string();
                }

                match self.resolve(reference, &document_dir) {
                    Some(resolved) => match self.serve_url(&resolved) {
                        Some(served) => matched.replace(reference, served.as_str()),
                        None => {
                            warn!(
                                "asset {} resolves outside the served root, keeping reference",
                                resolved.display()
                            );
                            matched.to_string()
                        }
                    },
                    None => {
                        warn!("asset not found: {reference}");
                        matched.to_string()
                    }
                }
            })
            .into_owned()
    }

    fn resolve(&self, reference: &str, document_dir: &Path) -> Option<PathBuf> {
        let candidate = document_dir.join(reference);
        if candidate.is_file() {
            return Some(candidate);
        }

        for root in &self.search_roots {
            let candidate = root.join(reference);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        // Documents extracted into a transient `work` tree often reference
        // an `assets/` directory that lives next to `work` rather than
        // inside it.
        let trimmed = reference.strip_prefix("./").unwrap_or(reference);
        if trimmed.starts_with("assets/") {
            if let Some(work) = nearest_work_ancestor(document_dir) {
                let candidate = work.parent()?.join(trimmed);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        None
    }

    fn serve_url(&self, resolved: &Path) -> Option<Url> {
        let canonical = resolved.canonicalize().ok()?;
        let relative = canonical.strip_prefix(&self.root).ok()?;
        let mut segments = String::new();
        for component in relative.components() {
            if !segments.is_empty() {
                segments.push('/');
            }
            segments.push_str(component.as_os_str().to_str()?);
        }
        self.base_url.join(&segments).ok()
    }
}

fn nearest_work_ancestor(dir: &Path) -> Option<&Path> {
    dir.ancestors()
        .find(|ancestor| ancestor.file_name().is_some_and(|name| name == "work"))
}

/// Read-only static file server shared by every document in a batch.
///
/// Binds an ephemeral localhost port at startup and serves files below the
/// given root. Concurrent reads need no locking; the server never mutates
/// anything.
pub struct AssetServer {
    server: Arc<Server>,
    base_url: Url,
    root: PathBuf,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AssetServer {
    /// Bind a free port and start the serving thread.
    pub fn start(root: PathBuf) -> Result<Self, ConvertError> {
        let root = root.canonicalize().unwrap_or(root);
        let server = Server::http("127.0.0.1:0")
            .map_err(|e| ConvertError::Io(io::Error::new(io::ErrorKind::AddrNotAvailable, e)))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| ConvertError::Renderer("asset server has no IP address".to_string()))?;
        let base_url = Url::parse(&format!("http://127.0.0.1:{}/", addr.port()))?;

        let server = Arc::new(server);
        let serving = Arc::clone(&server);
        let serve_root = root.clone();
        let worker = thread::Builder::new()
            .name("asset-server".to_string())
            .spawn(move || {
                for request in serving.incoming_requests() {
                    respond(&serve_root, request);
                }
            })?;

        debug!("asset server listening on {base_url}");
        Ok(Self {
            server,
            base_url,
            root,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop accepting requests and join the serving thread. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        self.server.unblock();
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn respond(root: &Path, request: tiny_http::Request) {
    if *request.method() != Method::Get {
        let _ = request.respond(Response::empty(StatusCode(405)));
        return;
    }

    let path = request.url().split('?').next().unwrap_or("");
    let relative = path.trim_start_matches('/');
    let candidate = root.join(relative);

    // the server is rooted; never follow parent components upward
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        let _ = request.respond(Response::empty(StatusCode(403)));
        return;
    }

    match File::open(&candidate) {
        Ok(file) => {
            let mut response = Response::from_file(file);
            if let Some(header) = content_type_header(&candidate) {
                response = response.with_header(header);
            }
            let _ = request.respond(response);
        }
        Err(_) => {
            debug!("asset server: 404 {relative}");
            let _ = request.respond(Response::empty(StatusCode(404)));
        }
    }
}

fn content_type_header(path: &Path) -> Option<Header> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "css" => "text/css",
        "js" => "application/javascript",
        "html" => "text/html; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    };
    Header::from_bytes(&b"Content-Type"[..], mime.as_bytes()).ok()
}
