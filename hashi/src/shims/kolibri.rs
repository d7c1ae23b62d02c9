//! `window.kolibri`: content queries and navigation answered by the host.
//!
//! Every call is a request/reply exchange on the `kolibri` namespace. The
//! request carries a `dataType` naming what is wanted; the host answers
//! with a `DataReturned` message correlated by `message_id`.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::protocol::{DataType, EventKind, Namespace};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[
    EventKind::DataRequested,
    EventKind::DataReturned,
    EventKind::NavigateTo,
    EventKind::Context,
];

pub struct KolibriShim {
    core: ShimCore,
}

impl KolibriShim {
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self {
            core: ShimCore::new(Namespace::Kolibri, EVENTS, mediator),
        }
    }

    async fn request(&self, data_type: DataType, mut payload: Value) -> Result<Value> {
        if let Some(object) = payload.as_object_mut() {
            object.insert("dataType".to_string(), serde_json::to_value(data_type)?);
        }
        self.core
            .mediator()
            .send_message_await_reply(Namespace::Kolibri, EventKind::DataRequested, payload)
            .await
    }

    /// Content nodes matching `options` (parent, ids, kind, page...).
    pub async fn get_content_by_filter(&self, options: Value) -> Result<Value> {
        self.request(DataType::Collection, json!({ "options": options }))
            .await
    }

    pub async fn get_content_by_id(&self, id: &str) -> Result<Value> {
        self.request(DataType::Model, json!({ "id": id })).await
    }

    pub async fn search_content(&self, options: Value) -> Result<Value> {
        self.request(DataType::SearchResult, json!({ "options": options }))
            .await
    }

    /// Ask the host to open another content node.
    pub async fn navigate_to(&self, node_id: &str) -> Result<Value> {
        self.request(DataType::NavigateTo, json!({ "nodeId": node_id }))
            .await
    }

    /// Merge `context` into the host's record of where the content is.
    pub async fn update_context(&self, context: Value) -> Result<Value> {
        self.request(DataType::UpdateContext, json!({ "context": context }))
            .await
    }

    pub async fn get_context(&self) -> Result<Value> {
        self.request(DataType::Context, json!({})).await
    }

    pub async fn get_version(&self) -> Result<Value> {
        self.request(DataType::KolibriVersion, json!({})).await
    }

    /// Theme values the content should render with.
    pub async fn theme_renderer(&self, options: Value) -> Result<Value> {
        self.request(DataType::ThemeChanges, json!({ "options": options }))
            .await
    }
}

impl Shim for KolibriShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    /// Holds no state of its own.
    fn data(&self) -> Value {
        json!({})
    }

    fn apply_data(&self, _data: Value) {}

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        window.install(globals::KOLIBRI, self);
    }
}
