//! Bloom book packages (`.bloompub`, `.bloomd`).
//!
//! A book is one `.htm` page at the package root plus the images, audio and
//! stylesheets it references. Stylesheets are published first so the page
//! can point at their rewritten copies.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::info;

use super::{
    extract_zip, guess_content_type, is_package_reference, parent_dir, publish_reference,
    resolve_relative, rewrite_css_urls, BlobRegistry, PackageError, PackageFiles,
};

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(src|href)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute pattern compiles")
    })
}

fn is_stylesheet(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".css")
}

#[derive(Debug, Clone)]
pub struct BloomPackage {
    entry: String,
    html: String,
    entry_url: String,
}

impl BloomPackage {
    pub fn from_zip(data: &[u8], blobs: &BlobRegistry) -> Result<Self, PackageError> {
        let files = extract_zip(data)?;
        Self::from_files(&files, blobs)
    }

    pub fn from_files(files: &PackageFiles, blobs: &BlobRegistry) -> Result<Self, PackageError> {
        let (entry, page) =
            Self::find_entry(files).ok_or_else(|| PackageError::MissingFile("*.htm".to_string()))?;

        let stylesheets: HashMap<&str, String> = files
            .iter()
            .filter(|(path, _)| is_stylesheet(path))
            .map(|(path, bytes)| {
                let css = rewrite_css_urls(&String::from_utf8_lossy(bytes), path, files, blobs);
                let url = blobs.register(css.into_bytes(), guess_content_type(path));
                (path.as_str(), url)
            })
            .collect();

        let base_dir = parent_dir(entry);
        let source = String::from_utf8_lossy(page);
        let html = attribute_regex()
            .replace_all(&source, |caps: &Captures| {
                let reference = caps
                    .get(3)
                    .or_else(|| caps.get(4))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let url = if is_package_reference(reference) {
                    resolve_relative(base_dir, reference)
                        .and_then(|path| stylesheets.get(path.as_str()).cloned())
                        .or_else(|| publish_reference(base_dir, reference, files, blobs))
                } else {
                    None
                };
                match url {
                    Some(url) => format!("{}{}\"{url}\"", &caps[1], &caps[2]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        let entry_url = blobs.register(html.clone().into_bytes(), guess_content_type(entry));
        info!(entry = %entry, "Loaded Bloom book");

        Ok(Self {
            entry: entry.clone(),
            html,
            entry_url,
        })
    }

    /// The book page: a root-level `.htm`, first by name.
    fn find_entry(files: &PackageFiles) -> Option<(&String, &Vec<u8>)> {
        files
            .iter()
            .find(|(path, _)| !path.contains('/') && path.to_ascii_lowercase().ends_with(".htm"))
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The page with package references rewritten.
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn entry_url(&self) -> &str {
        &self.entry_url
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::zip_of;
    use super::*;

    #[test]
    fn test_references_rewritten() {
        let page = r#"<html><head><link rel="stylesheet" href="book.css"></head>
<body><img src='frog.png'><a href="https://bloomlibrary.org">x</a><img src="gone.png"></body></html>"#;
        let data = zip_of(&[
            ("The Frog.htm", page),
            ("book.css", ".page{background:url(bg.png)}"),
            ("bg.png", "bg"),
            ("frog.png", "frog"),
        ]);
        let blobs = BlobRegistry::new();
        let book = BloomPackage::from_zip(&data, &blobs).unwrap();

        assert_eq!(book.entry(), "The Frog.htm");
        let html = book.html();
        assert!(html.contains(r#"href="blob:hashi/sha256-"#));
        assert!(html.contains(r#"src="blob:hashi/sha256-"#));
        assert!(html.contains(r#"href="https://bloomlibrary.org""#));
        assert!(html.contains(r#"src="gone.png""#));

        // The page links the rewritten stylesheet, not the original bytes.
        let css_url = html
            .split("href=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        let css = blobs.get(css_url).unwrap();
        assert!(String::from_utf8_lossy(&css.bytes).contains("url(\"blob:hashi/"));

        let entry = blobs.get(book.entry_url()).unwrap();
        assert_eq!(entry.content_type, "text/html; charset=utf-8");
    }

    #[test]
    fn test_missing_entry() {
        let data = zip_of(&[("images/cover.png", "png"), ("nested/page.htm", "<p>")]);
        let err = BloomPackage::from_zip(&data, &BlobRegistry::new()).unwrap_err();
        assert!(matches!(err, PackageError::MissingFile(_)));
    }
}
