//! Unpacking of zipped content packages.
//!
//! Packages are read fully into memory. Every file a package refers to by a
//! relative path is published to a [`BlobRegistry`] and the reference is
//! rewritten to the blob URL, so the frame never resolves package paths
//! itself.

pub mod blob;
pub mod bloom;
pub mod graph;
pub mod h5p;

pub use blob::{Blob, BlobRegistry, BLOB_PREFIX};
pub use bloom::BloomPackage;
pub use graph::{DependencyGraph, NodeId};
pub use h5p::{H5pPackage, LibraryManifest, LibraryRef, PackageManifest};

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;
use tracing::trace;

/// Files of an unpacked package, keyed by normalized path.
pub type PackageFiles = BTreeMap<String, Vec<u8>>;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Missing file in package: {0}")]
    MissingFile(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Invalid manifest {file}: {reason}")]
    InvalidManifest { file: String, reason: String },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Extract every regular file of a zip archive.
pub fn extract_zip(data: &[u8]) -> Result<PackageFiles, PackageError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut files = PackageFiles::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if !file.is_file() {
            continue;
        }
        let name = file.name().trim_start_matches('/').to_string();
        if name.is_empty() {
            continue;
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        files.insert(name, contents);
    }

    trace!(count = files.len(), "Extracted package");
    Ok(files)
}

/// MIME type from file extension.
pub fn guess_content_type(path: &str) -> &'static str {
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("webp") => "image/webp",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("vtt") => "text/vtt",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Whether `reference` points inside the package rather than at a URL.
pub fn is_package_reference(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') || reference.starts_with("//") {
        return false;
    }
    // Anything with a scheme (`http:`, `data:`, `blob:`, ...) is external.
    match reference.find(':') {
        Some(colon) => reference[..colon].contains(['/', '?', '#']),
        None => true,
    }
}

/// Directory part of a package path, without the trailing slash.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or_default()
}

/// Resolve `reference` against `base_dir`. Query strings and fragments are
/// dropped; `None` if the path climbs out of the package.
pub fn resolve_relative(base_dir: &str, reference: &str) -> Option<String> {
    let path = reference
        .trim()
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let mut segments: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Publish the package file `reference` names, seen from `base_dir`.
/// `None` when the reference is external or the file is absent.
pub fn publish_reference(
    base_dir: &str,
    reference: &str,
    files: &PackageFiles,
    blobs: &BlobRegistry,
) -> Option<String> {
    if !is_package_reference(reference) {
        return None;
    }
    let path = resolve_relative(base_dir, reference)?;
    let bytes = files.get(&path)?;
    Some(blobs.register(bytes.clone(), guess_content_type(&path)))
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("css url pattern compiles")
    })
}

/// Rewrite `url(...)` references in a stylesheet located at `css_path`.
pub fn rewrite_css_urls(
    css: &str,
    css_path: &str,
    files: &PackageFiles,
    blobs: &BlobRegistry,
) -> String {
    let base_dir = parent_dir(css_path);
    css_url_regex()
        .replace_all(css, |caps: &Captures| {
            match publish_reference(base_dir, &caps[1], files, blobs) {
                Some(url) => format!("url(\"{url}\")"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Build a zip archive in memory.
    pub fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
