//! # pdfium-auto
//!
//! Find a usable [PDFium](https://pdfium.googlesource.com/pdfium/) shared
//! library for `pdfium-render`, downloading it once when nothing is installed.
//!
//! ## Resolution order
//!
//! 1. `PDFIUM_LIB_PATH`: an explicit library path. Used as-is when the file
//!    exists; a dangling value is logged and ignored.
//! 2. The per-version cache directory (see [`cache_dir`]).
//! 3. A download of the platform archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries),
//!    unpacked into the cache directory.
//!
//! The resolved path is memoised for the life of the process, so only the
//! first caller ever pays for a download.
//!
//! Nothing in this crate writes to stdout or stderr directly: diagnostics go
//! through `tracing`, which lets a stdio-based server keep its stdout clean.
//!
//! ```rust,no_run
//! let pdfium = pdfium_auto::bind().expect("PDFium unavailable");
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

/// Environment variable naming an existing library file.
pub const LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "PDFIUM_AUTO_CACHE_DIR";

const RELEASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// Errors returned while locating or binding PDFium.
#[derive(Error, Debug)]
pub enum PdfiumAutoError {
    /// No prebuilt archive exists for this OS/architecture.
    #[error("no prebuilt PDFium for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The cache directory could not be created or written.
    #[error("cannot prepare PDFium cache directory '{path}': {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network download failed.
    #[error("PDFium download failed: {0}")]
    Download(String),

    /// The archive was unreadable or did not contain the library.
    #[error("PDFium archive extraction failed: {0}")]
    Extract(String),

    /// The library file exists but could not be loaded.
    #[error("failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

/// Where a resolved library came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// `PDFIUM_LIB_PATH` pointed at an existing file.
    Override(PathBuf),
    /// Found in the cache directory from an earlier run.
    Cached(PathBuf),
    /// Downloaded during this process.
    Downloaded(PathBuf),
}

impl LibrarySource {
    pub fn path(&self) -> &Path {
        match self {
            LibrarySource::Override(p) | LibrarySource::Cached(p) | LibrarySource::Downloaded(p) => p,
        }
    }
}

/// Release asset layout for one OS/architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Asset name in the GitHub release, e.g. `pdfium-linux-x64.tgz`.
    pub archive: &'static str,
    /// Library path inside the archive.
    pub member: &'static str,
    /// File name written to the cache directory.
    pub file_name: &'static str,
}

impl Platform {
    /// Layout for the running target.
    pub fn current() -> Result<Self, PdfiumAutoError> {
        Self::for_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Layout for an explicit `(os, arch)` pair as reported by `std::env::consts`.
    pub fn for_target(os: &str, arch: &str) -> Result<Self, PdfiumAutoError> {
        const SO: (&str, &str) = ("lib/libpdfium.so", "libpdfium.so");
        const DYLIB: (&str, &str) = ("lib/libpdfium.dylib", "libpdfium.dylib");
        const DLL: (&str, &str) = ("bin/pdfium.dll", "pdfium.dll");

        let (archive, (member, file_name)) = match (os, arch) {
            ("linux", "x86_64") => ("pdfium-linux-x64.tgz", SO),
            ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", SO),
            ("macos", "x86_64") => ("pdfium-mac-x64.tgz", DYLIB),
            ("macos", "aarch64") => ("pdfium-mac-arm64.tgz", DYLIB),
            ("windows", "x86_64") => ("pdfium-win-x64.tgz", DLL),
            ("windows", "aarch64") => ("pdfium-win-arm64.tgz", DLL),
            ("windows", "x86") => ("pdfium-win-x86.tgz", DLL),
            _ => {
                return Err(PdfiumAutoError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };

        Ok(Self {
            archive,
            member,
            file_name,
        })
    }

    fn download_url(&self) -> String {
        format!("{RELEASE_URL}/chromium%2F{PDFIUM_VERSION}/{}", self.archive)
    }
}

/// Per-version cache directory for the library.
///
/// `$PDFIUM_AUTO_CACHE_DIR/pdfium-{VERSION}` when the override is set,
/// otherwise `<platform cache dir>/good-filings/pdfium-{VERSION}`.
pub fn cache_dir() -> PathBuf {
    let versioned = format!("pdfium-{PDFIUM_VERSION}");
    if let Some(root) = std::env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(root).join(versioned);
    }

    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("good-filings")
        .join(versioned)
}

/// Find an already-present library without touching the network.
pub fn locate() -> Option<LibrarySource> {
    if let Some(p) = std::env::var_os(LIB_PATH_ENV).map(PathBuf::from) {
        if p.is_file() {
            return Some(LibrarySource::Override(p));
        }
        warn!("{LIB_PATH_ENV}={} does not exist; ignoring", p.display());
    }

    let platform = Platform::current().ok()?;
    let cached = cache_dir().join(platform.file_name);
    cached.is_file().then_some(LibrarySource::Cached(cached))
}

static RESOLVED: OnceLock<LibrarySource> = OnceLock::new();

/// Make sure a library is available, downloading it if necessary.
///
/// Safe to call concurrently; the result is memoised per process. Two racing
/// first callers may both download, but each writes through a temporary file
/// and an atomic rename, so the cache never holds a torn library.
pub fn ensure_library() -> Result<LibrarySource, PdfiumAutoError> {
    if let Some(found) = RESOLVED.get() {
        return Ok(found.clone());
    }

    let source = match locate() {
        Some(found) => found,
        None => download_into_cache()?,
    };
    debug!("PDFium library: {:?}", source);

    Ok(RESOLVED.get_or_init(|| source).clone())
}

/// Bind to PDFium, downloading it first if needed.
pub fn bind() -> Result<Pdfium, PdfiumAutoError> {
    let source = ensure_library()?;
    bind_from_path(source.path())
}

/// Bind to the library at `path` without consulting the cache.
pub fn bind_from_path(path: &Path) -> Result<Pdfium, PdfiumAutoError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumAutoError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn download_into_cache() -> Result<LibrarySource, PdfiumAutoError> {
    let platform = Platform::current()?;
    let dir = cache_dir();
    std::fs::create_dir_all(&dir).map_err(|source| PdfiumAutoError::Cache {
        path: dir.clone(),
        source,
    })?;

    let url = platform.download_url();
    info!("Downloading PDFium {PDFIUM_VERSION} from {url}");
    let archive = fetch(&url)?;

    let dest = dir.join(platform.file_name);
    unpack_member(&archive, platform.member, &dest)?;
    info!("PDFium cached at {}", dest.display());

    Ok(LibrarySource::Downloaded(dest))
}

fn fetch(url: &str) -> Result<Vec<u8>, PdfiumAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PdfiumAutoError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| PdfiumAutoError::Download(format!("GET {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PdfiumAutoError::Download(format!("HTTP {status} for {url}")));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| PdfiumAutoError::Download(format!("reading body of {url}: {e}")))
}

/// Extract `member` from a gzipped tarball into `dest` via a sibling temp file.
fn unpack_member(archive: &[u8], member: &str, dest: &Path) -> Result<(), PdfiumAutoError> {
    use flate2::read::GzDecoder;

    let mut tarball = tar::Archive::new(GzDecoder::new(archive));
    let entries = tarball
        .entries()
        .map_err(|e| PdfiumAutoError::Extract(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| PdfiumAutoError::Extract(e.to_string()))?;
        let matches = entry
            .path()
            .map(|p| p.to_string_lossy() == member)
            .map_err(|e| PdfiumAutoError::Extract(e.to_string()))?;
        if !matches {
            continue;
        }

        let partial = dest.with_extension("partial");
        entry
            .unpack(&partial)
            .map_err(|e| PdfiumAutoError::Extract(format!("unpack {member}: {e}")))?;
        std::fs::rename(&partial, dest).map_err(|source| PdfiumAutoError::Cache {
            path: dest.to_path_buf(),
            source,
        })?;
        return Ok(());
    }

    Err(PdfiumAutoError::Extract(format!(
        "'{member}' not present in archive"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_targets_resolve() {
        let linux = Platform::for_target("linux", "x86_64").unwrap();
        assert_eq!(linux.archive, "pdfium-linux-x64.tgz");
        assert_eq!(linux.file_name, "libpdfium.so");

        let mac = Platform::for_target("macos", "aarch64").unwrap();
        assert_eq!(mac.member, "lib/libpdfium.dylib");

        let win = Platform::for_target("windows", "x86").unwrap();
        assert_eq!(win.member, "bin/pdfium.dll");
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = Platform::for_target("haiku", "riscv64").unwrap_err();
        assert!(err.to_string().contains("haiku/riscv64"));
    }

    #[test]
    fn download_url_embeds_version_and_asset() {
        let url = Platform::for_target("linux", "aarch64").unwrap().download_url();
        assert!(url.ends_with("chromium%2F7690/pdfium-linux-arm64.tgz"), "{url}");
    }

    #[test]
    fn cache_dir_is_versioned() {
        let d = cache_dir();
        assert_eq!(d, cache_dir());
        assert!(d.to_string_lossy().contains(PDFIUM_VERSION));
    }

    #[test]
    fn unpack_reports_missing_member() {
        use flate2::{write::GzEncoder, Compression};

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        let body = b"not a library";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "lib/other.so", &body[..])
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let dir = std::env::temp_dir().join("pdfium-auto-unpack-test");
        std::fs::create_dir_all(&dir).unwrap();
        let err = unpack_member(&archive, "lib/libpdfium.so", &dir.join("libpdfium.so"))
            .unwrap_err();
        assert!(matches!(err, PdfiumAutoError::Extract(_)));

        unpack_member(&archive, "lib/other.so", &dir.join("other.so")).unwrap();
        assert_eq!(std::fs::read(dir.join("other.so")).unwrap(), body);
        std::fs::remove_dir_all(&dir).ok();
    }
}
