//! Wire identifiers shared by both sides of the sandbox boundary.
//!
//! Every message crossing the boundary is `{namespace, event, data}`. The
//! enums below are the complete vocabulary; a message using anything else
//! fails to parse and is treated as foreign traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which subsystem a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    /// Lifecycle traffic between the host and the sandbox client
    #[serde(rename = "hashi")]
    Hashi,
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "sessionStorage")]
    SessionStorage,
    #[serde(rename = "cookie")]
    Cookie,
    #[serde(rename = "SCORM")]
    Scorm,
    #[serde(rename = "xAPI")]
    XApi,
    #[serde(rename = "kolibri")]
    Kolibri,
    #[serde(rename = "H5P")]
    H5p,
    #[serde(rename = "Bloom")]
    Bloom,
}

impl Namespace {
    /// Every namespace, in a stable order.
    pub const ALL: [Namespace; 9] = [
        Namespace::Hashi,
        Namespace::LocalStorage,
        Namespace::SessionStorage,
        Namespace::Cookie,
        Namespace::Scorm,
        Namespace::XApi,
        Namespace::Kolibri,
        Namespace::H5p,
        Namespace::Bloom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Hashi => "hashi",
            Namespace::LocalStorage => "localStorage",
            Namespace::SessionStorage => "sessionStorage",
            Namespace::Cookie => "cookie",
            Namespace::Scorm => "SCORM",
            Namespace::XApi => "xAPI",
            Namespace::Kolibri => "kolibri",
            Namespace::H5p => "H5P",
            Namespace::Bloom => "Bloom",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message kinds. Each shim accepts a declared subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Full shim state, in either direction
    StateUpdate,
    /// Identity of the current user, host to sandbox
    UserDataUpdate,
    /// RPC request, sandbox to host
    DataRequested,
    /// RPC reply, host to sandbox
    DataReturned,
    /// Host asks whether the sandbox client is listening
    ReadyCheck,
    /// Sandbox client answers a ready check
    Ready,
    MainReady,
    IframeReady,
    NavigateTo,
    Context,
    /// Host clock, for the virtual clock
    Now,
}

/// Outcome carried by an RPC reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Success,
    Failure,
}

/// Marks the `data` of a `DataReturned` message as a reply.
pub const RESPONSE_TYPE: &str = "response";

/// Key under which the correlation id travels inside `data`.
pub const MESSAGE_ID: &str = "message_id";

/// What a `DataRequested` message asks the host for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Collection,
    Model,
    SearchResult,
    NavigateTo,
    Context,
    UpdateContext,
    KolibriVersion,
    ThemeChanges,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub namespace: Namespace,
    pub event: EventKind,
    #[serde(default)]
    pub data: Value,
}

impl Message {
    pub fn new(namespace: Namespace, event: EventKind, data: Value) -> Self {
        Self {
            namespace,
            event,
            data,
        }
    }

    /// Parse a raw channel message, or `None` for anything that is not ours.
    pub fn parse(raw: &Value) -> Option<Self> {
        serde_json::from_value(raw.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "namespace": self.namespace,
            "event": self.event,
            "data": self.data,
        })
    }
}
