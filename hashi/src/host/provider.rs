//! Content provider abstraction.
//!
//! The host answers the frame's Kolibri requests by delegating to a
//! [`ContentProvider`]. Applications back it with their content database;
//! [`StaticContentProvider`] serves a fixed set of nodes for tests and
//! offline previews.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::{HashiError, Result};

fn unsupported(operation: &str) -> HashiError {
    HashiError::Provider(format!("{operation} is not supported"))
}

/// Source of content nodes and session context for host RPCs.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn get_content_by_filter(&self, options: &Value) -> Result<Value>;

    async fn get_content_by_id(&self, id: &str) -> Result<Value>;

    async fn search_content(&self, _options: &Value) -> Result<Value> {
        Err(unsupported("searchContent"))
    }

    async fn navigate_to(&self, node_id: &str) -> Result<Value>;

    async fn update_context(&self, _context: &Value) -> Result<Value> {
        Err(unsupported("updateContext"))
    }

    async fn get_context(&self) -> Result<Value> {
        Err(unsupported("getContext"))
    }

    async fn get_version(&self) -> Result<Value> {
        Err(unsupported("getVersion"))
    }

    async fn theme_renderer(&self, _options: &Value) -> Result<Value> {
        Err(unsupported("themeRenderer"))
    }
}

/// Provider over an in-memory set of content nodes.
///
/// Nodes are JSON objects with at least an `id`; `parent` and `title` are
/// used by filtering and search.
pub struct StaticContentProvider {
    nodes: BTreeMap<String, Value>,
    context: RwLock<Map<String, Value>>,
    version: String,
    theme: Value,
    call_count: AtomicU32,
}

impl StaticContentProvider {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            context: RwLock::new(Map::new()),
            version: "0.16.0".to_string(),
            theme: json!({}),
            call_count: AtomicU32::new(0),
        }
    }

    /// Add a node. Nodes without a string `id` are ignored.
    pub fn with_node(mut self, node: Value) -> Self {
        if let Some(id) = node.get("id").and_then(Value::as_str) {
            self.nodes.insert(id.to_string(), node);
        }
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_theme(mut self, theme: Value) -> Self {
        self.theme = theme;
        self
    }

    /// Number of provider calls answered so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
    }

    fn page(results: Vec<Value>) -> Value {
        json!({ "results": results, "more": null })
    }
}

impl Default for StaticContentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    /// Supports `parent` and `ids` filters.
    async fn get_content_by_filter(&self, options: &Value) -> Result<Value> {
        self.count();
        let parent = options.get("parent").and_then(Value::as_str);
        let ids: Option<Vec<&str>> = options
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect());

        let results = self
            .nodes
            .values()
            .filter(|node| match parent {
                Some(parent) => node.get("parent").and_then(Value::as_str) == Some(parent),
                None => true,
            })
            .filter(|node| match &ids {
                Some(ids) => node
                    .get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| ids.contains(&id)),
                None => true,
            })
            .cloned()
            .collect();
        Ok(Self::page(results))
    }

    async fn get_content_by_id(&self, id: &str) -> Result<Value> {
        self.count();
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| HashiError::Provider(format!("No content node {id}")))
    }

    /// Case-insensitive match on `title`.
    async fn search_content(&self, options: &Value) -> Result<Value> {
        self.count();
        let keyword = options
            .get("keyword")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let results = self
            .nodes
            .values()
            .filter(|node| {
                node.get("title")
                    .and_then(Value::as_str)
                    .is_some_and(|title| title.to_lowercase().contains(&keyword))
            })
            .cloned()
            .collect();
        Ok(Self::page(results))
    }

    async fn navigate_to(&self, node_id: &str) -> Result<Value> {
        self.count();
        if !self.nodes.contains_key(node_id) {
            return Err(HashiError::Provider(format!("No content node {node_id}")));
        }
        let mut context = self.context.write().unwrap_or_else(|e| e.into_inner());
        context.insert("node_id".to_string(), Value::String(node_id.to_string()));
        Ok(Value::Null)
    }

    async fn update_context(&self, update: &Value) -> Result<Value> {
        self.count();
        let mut context = self.context.write().unwrap_or_else(|e| e.into_inner());
        if let Some(update) = update.as_object() {
            for (key, value) in update {
                context.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(context.clone()))
    }

    async fn get_context(&self) -> Result<Value> {
        self.count();
        let context = self.context.read().unwrap_or_else(|e| e.into_inner());
        Ok(Value::Object(context.clone()))
    }

    async fn get_version(&self) -> Result<Value> {
        self.count();
        Ok(Value::String(self.version.clone()))
    }

    async fn theme_renderer(&self, _options: &Value) -> Result<Value> {
        self.count();
        Ok(self.theme.clone())
    }
}
