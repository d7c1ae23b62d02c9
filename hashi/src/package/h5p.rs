//! H5P packages (`.h5p`).
//!
//! Layout: `h5p.json` at the root, content in `content/content.json` with
//! its media under `content/`, and one directory per library named
//! `{machineName}-{major}.{minor}` holding a `library.json`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::graph::DependencyGraph;
use super::{
    extract_zip, parent_dir, publish_reference, rewrite_css_urls, BlobRegistry, PackageError,
    PackageFiles,
};

const MANIFEST: &str = "h5p.json";
const CONTENT: &str = "content/content.json";
const CONTENT_DIR: &str = "content";
const LIBRARY_MANIFEST: &str = "library.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRef {
    pub machine_name: String,
    pub major_version: u32,
    pub minor_version: u32,
}

impl LibraryRef {
    /// Directory holding the library inside the package.
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}.{}",
            self.machine_name, self.major_version, self.minor_version
        )
    }

    /// `"H5P.MultiChoice 1.16"`, the form H5P uses in `library` fields.
    pub fn uber_name(&self) -> String {
        format!(
            "{} {}.{}",
            self.machine_name, self.major_version, self.minor_version
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PathRef {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub title: String,
    pub main_library: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub preloaded_dependencies: Vec<LibraryRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryManifest {
    pub machine_name: String,
    pub major_version: u32,
    pub minor_version: u32,
    #[serde(default)]
    pub patch_version: u32,
    #[serde(default)]
    preloaded_js: Vec<PathRef>,
    #[serde(default)]
    preloaded_css: Vec<PathRef>,
    #[serde(default)]
    pub preloaded_dependencies: Vec<LibraryRef>,
}

impl LibraryManifest {
    pub fn library_ref(&self) -> LibraryRef {
        LibraryRef {
            machine_name: self.machine_name.clone(),
            major_version: self.major_version,
            minor_version: self.minor_version,
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    files: &PackageFiles,
    path: &str,
) -> Result<T, PackageError> {
    let bytes = files
        .get(path)
        .ok_or_else(|| PackageError::MissingFile(path.to_string()))?;
    serde_json::from_slice(bytes).map_err(|e| PackageError::InvalidManifest {
        file: path.to_string(),
        reason: e.to_string(),
    })
}

/// Point every `path` entry of the content tree at its published blob.
fn rewrite_content_paths(value: &mut Value, files: &PackageFiles, blobs: &BlobRegistry) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "path" {
                    if let Value::String(path) = child {
                        if let Some(url) = publish_reference(CONTENT_DIR, path, files, blobs) {
                            *path = url;
                        }
                        continue;
                    }
                }
                rewrite_content_paths(child, files, blobs);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_content_paths(item, files, blobs);
            }
        }
        _ => {}
    }
}

/// An unpacked H5P package, ready to hand to the H5P runtime.
#[derive(Debug, Clone)]
pub struct H5pPackage {
    manifest: PackageManifest,
    libraries: Vec<LibraryManifest>,
    content: Value,
    script_url: String,
    style_url: String,
}

impl H5pPackage {
    pub fn from_zip(data: &[u8], blobs: &BlobRegistry) -> Result<Self, PackageError> {
        let files = extract_zip(data)?;
        Self::from_files(&files, blobs)
    }

    pub fn from_files(files: &PackageFiles, blobs: &BlobRegistry) -> Result<Self, PackageError> {
        let manifest: PackageManifest = parse_json(files, MANIFEST)?;
        let libraries = Self::resolve_libraries(&manifest, files)?;
        if !libraries
            .iter()
            .any(|lib| lib.machine_name == manifest.main_library)
        {
            return Err(PackageError::MissingDependency(manifest.main_library));
        }

        let mut script = String::new();
        let mut style = String::new();
        for library in &libraries {
            let dir = library.library_ref().dir_name();
            for js in &library.preloaded_js {
                let path = format!("{dir}/{}", js.path);
                let bytes = files
                    .get(&path)
                    .ok_or_else(|| PackageError::MissingFile(path.clone()))?;
                script.push_str(&String::from_utf8_lossy(bytes));
                script.push_str("\n;\n");
            }
            for css in &library.preloaded_css {
                let path = format!("{dir}/{}", css.path);
                let bytes = files
                    .get(&path)
                    .ok_or_else(|| PackageError::MissingFile(path.clone()))?;
                style.push_str(&rewrite_css_urls(
                    &String::from_utf8_lossy(bytes),
                    &path,
                    files,
                    blobs,
                ));
                style.push('\n');
            }
        }

        let mut content: Value = parse_json(files, CONTENT)?;
        rewrite_content_paths(&mut content, files, blobs);

        let script_url = blobs.register(script.into_bytes(), "application/javascript; charset=utf-8");
        let style_url = blobs.register(style.into_bytes(), "text/css; charset=utf-8");

        info!(
            title = %manifest.title,
            main_library = %manifest.main_library,
            libraries = libraries.len(),
            "Loaded H5P package"
        );

        Ok(Self {
            manifest,
            libraries,
            content,
            script_url,
            style_url,
        })
    }

    /// Read every library reachable from the package manifest and order
    /// them so each follows its dependencies.
    fn resolve_libraries(
        manifest: &PackageManifest,
        files: &PackageFiles,
    ) -> Result<Vec<LibraryManifest>, PackageError> {
        let mut graph: DependencyGraph<LibraryRef> = DependencyGraph::new();
        let mut manifests: Vec<Option<LibraryManifest>> = Vec::new();
        let mut queue: Vec<LibraryRef> = manifest.preloaded_dependencies.clone();
        let roots: Vec<_> = manifest
            .preloaded_dependencies
            .iter()
            .map(|lib| graph.add_node(lib.clone()))
            .collect();

        while let Some(lib) = queue.pop() {
            let id = graph.add_node(lib.clone());
            if manifests.len() <= id {
                manifests.resize(id + 1, None);
            }
            if manifests[id].is_some() {
                continue;
            }

            let path = format!("{}/{LIBRARY_MANIFEST}", lib.dir_name());
            if !files.contains_key(&path) {
                return Err(PackageError::MissingDependency(lib.uber_name()));
            }
            let library: LibraryManifest = parse_json(files, &path)?;
            for dep in &library.preloaded_dependencies {
                let dep_id = graph.add_node(dep.clone());
                graph.add_edge(id, dep_id);
                if manifests.get(dep_id).map_or(true, Option::is_none) {
                    queue.push(dep.clone());
                }
            }
            debug!(library = %lib.uber_name(), "Resolved library");
            manifests[id] = Some(library);
        }

        Ok(graph
            .load_order(&roots)
            .into_iter()
            .filter_map(|id| manifests.get_mut(id).and_then(Option::take))
            .collect())
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Libraries in load order.
    pub fn libraries(&self) -> &[LibraryManifest] {
        &self.libraries
    }

    /// `uber_name`s in load order.
    pub fn load_order(&self) -> Vec<String> {
        self.libraries
            .iter()
            .map(|lib| lib.library_ref().uber_name())
            .collect()
    }

    /// `content.json` with media paths rewritten to blob URLs.
    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn script_url(&self) -> &str {
        &self.script_url
    }

    pub fn style_url(&self) -> &str {
        &self.style_url
    }

    /// The `H5PIntegration` object for this package shown as `content_id`.
    pub fn integration(&self, content_id: &str) -> Value {
        let main = self
            .libraries
            .iter()
            .find(|lib| lib.machine_name == self.manifest.main_library)
            .map(|lib| lib.library_ref().uber_name())
            .unwrap_or_else(|| self.manifest.main_library.clone());

        let cid = format!("cid-{content_id}");
        json!({
            "contents": {
                cid: {
                    "library": main,
                    "jsonContent": self.content.to_string(),
                    "fullScreen": false,
                    "displayOptions": {
                        "frame": false,
                        "export": false,
                        "embed": false,
                        "copyright": false,
                        "icon": false
                    },
                    "metadata": {
                        "title": self.manifest.title,
                        "defaultLanguage": self.manifest.language,
                    },
                    "scripts": [self.script_url],
                    "styles": [self.style_url],
                }
            },
            "core": {"scripts": [], "styles": []},
            "l10n": {"H5P": {}},
            "postUserStatistics": false,
            "saveFreq": false,
            "url": parent_dir(&self.script_url),
        })
    }
}
