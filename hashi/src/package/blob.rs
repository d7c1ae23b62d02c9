//! Content-addressed blob URLs for package files.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

pub const BLOB_PREFIX: &str = "blob:hashi/";

#[derive(Debug, Clone)]
pub struct Blob {
    pub content_type: &'static str,
    pub bytes: Arc<Vec<u8>>,
}

/// Published package files. Identical bytes share one URL.
#[derive(Debug, Default)]
pub struct BlobRegistry {
    blobs: DashMap<String, Blob>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `bytes` and return the URL they are served under.
    pub fn register(&self, bytes: Vec<u8>, content_type: &'static str) -> String {
        let url = format!("{BLOB_PREFIX}sha256-{}", hex::encode(Sha256::digest(&bytes)));
        self.blobs.entry(url.clone()).or_insert_with(|| Blob {
            content_type,
            bytes: Arc::new(bytes),
        });
        url
    }

    pub fn get(&self, url: &str) -> Option<Blob> {
        self.blobs.get(url).map(|blob| blob.clone())
    }

    pub fn revoke(&self, url: &str) -> bool {
        self.blobs.remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
