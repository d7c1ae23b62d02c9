//! Message transport between the host and the sandboxed frame.
//!
//! A [`Mediator`] sits on each side of the boundary. It posts messages to
//! the other side through a [`Transport`], dispatches inbound messages to
//! callbacks registered per `(namespace, event)`, and correlates
//! request/reply exchanges through a table of pending requests keyed by a
//! generated message id.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::protocol::{
    EventKind, Message, MessageStatus, Namespace, MESSAGE_ID, RESPONSE_TYPE,
};
use crate::config::MediatorConfig;
use crate::error::{HashiError, Result};

/// A registered message handler. Receives the message's `data`.
pub type Callback = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Delivers serialized messages to the other context.
pub trait Transport: Send + Sync {
    fn post(&self, message: Value) -> Result<()>;
}

/// Transport over an unbounded tokio channel; the receiving end is drained
/// by [`spawn_listener`].
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn post(&self, message: Value) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| HashiError::Transport("remote context closed".into()))
    }
}

/// Transport that records every posted message instead of delivering it.
#[derive(Default)]
pub struct RecordingTransport {
    posted: Mutex<Vec<Value>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message posted so far.
    pub fn messages(&self) -> Vec<Value> {
        self.posted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// The most recently posted message.
    pub fn last(&self) -> Option<Value> {
        self.posted.lock().ok().and_then(|p| p.last().cloned())
    }

    /// Messages posted so far for one namespace and event.
    pub fn matching(&self, namespace: Namespace, event: EventKind) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|raw| {
                Message::parse(raw)
                    .map(|m| m.namespace == namespace && m.event == event)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut posted) = self.posted.lock() {
            posted.clear();
        }
    }
}

impl Transport for RecordingTransport {
    fn post(&self, message: Value) -> Result<()> {
        self.posted
            .lock()
            .map_err(|_| HashiError::Transport("recording lock poisoned".into()))?
            .push(message);
        Ok(())
    }
}

struct PendingReply {
    namespace: Namespace,
    tx: oneshot::Sender<Result<Value>>,
}

/// One side of the sandbox boundary.
pub struct Mediator {
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<(Namespace, EventKind), Vec<Callback>>>,
    pending: DashMap<String, PendingReply>,
    reply_timeout: Duration,
}

impl Mediator {
    pub fn new(transport: Arc<dyn Transport>, reply_timeout: Duration) -> Self {
        Self {
            transport,
            handlers: RwLock::new(HashMap::new()),
            pending: DashMap::new(),
            reply_timeout,
        }
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: &MediatorConfig) -> Self {
        Self::new(transport, config.reply_timeout())
    }

    /// Add a callback for `(namespace, event)`. Callbacks for the same key
    /// run in registration order.
    pub fn register_message_handler(
        &self,
        namespace: Namespace,
        event: EventKind,
        callback: Callback,
    ) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry((namespace, event)).or_default().push(callback);
    }

    /// Remove one callback, or every callback for the key when `callback`
    /// is `None`.
    pub fn remove_message_handler(
        &self,
        namespace: Namespace,
        event: EventKind,
        callback: Option<&Callback>,
    ) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        match callback {
            None => {
                handlers.remove(&(namespace, event));
            }
            Some(target) => {
                if let Some(list) = handlers.get_mut(&(namespace, event)) {
                    list.retain(|cb| !same_callback(cb, target));
                    if list.is_empty() {
                        handlers.remove(&(namespace, event));
                    }
                }
            }
        }
    }

    /// Number of callbacks registered for a key.
    pub fn handler_count(&self, namespace: Namespace, event: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&(namespace, event)).map(Vec::len).unwrap_or(0)
    }

    /// Post a message to the other context.
    pub fn send_message(&self, namespace: Namespace, event: EventKind, data: Value) -> Result<()> {
        debug!(namespace = %namespace, event = ?event, "Sending message");
        self.transport
            .post(Message::new(namespace, event, data).to_value())
    }

    /// Deliver a message to this side's own handlers.
    pub fn send_local_message(&self, namespace: Namespace, event: EventKind, data: Value) {
        self.dispatch(&Message::new(namespace, event, data));
    }

    /// Send a request and wait for its correlated `DataReturned` reply,
    /// up to the configured reply timeout.
    pub async fn send_message_await_reply(
        &self,
        namespace: Namespace,
        event: EventKind,
        data: Value,
    ) -> Result<Value> {
        self.send_message_await_reply_within(namespace, event, data, self.reply_timeout)
            .await
    }

    /// Send a request and wait at most `limit` for its reply.
    ///
    /// The generated correlation id is stamped onto `data.message_id`; a
    /// non-object `data` is wrapped as `{"data": ...}` first. Resolves with
    /// the reply's `data` on `success` and fails with
    /// [`HashiError::Rejected`] carrying the reply's `err` on `failure`.
    pub async fn send_message_await_reply_within(
        &self,
        namespace: Namespace,
        event: EventKind,
        data: Value,
        limit: Duration,
    ) -> Result<Value> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut payload = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        payload.insert(MESSAGE_ID.to_string(), Value::String(message_id.clone()));

        let (tx, rx) = oneshot::channel();
        self.pending
            .insert(message_id.clone(), PendingReply { namespace, tx });

        if let Err(e) = self.send_message(namespace, event, Value::Object(payload)) {
            self.pending.remove(&message_id);
            return Err(e);
        }

        match timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HashiError::Cancelled),
            Err(_) => {
                self.pending.remove(&message_id);
                warn!(namespace = %namespace, message_id = %message_id, "Reply timed out");
                Err(HashiError::ReplyTimeout {
                    namespace,
                    message_id,
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Answer a request received from the other context.
    pub fn reply(
        &self,
        namespace: Namespace,
        message_id: &str,
        outcome: std::result::Result<Value, Value>,
    ) -> Result<()> {
        let data = match outcome {
            Ok(data) => json!({
                MESSAGE_ID: message_id,
                "type": RESPONSE_TYPE,
                "status": MessageStatus::Success,
                "data": data,
            }),
            Err(err) => json!({
                MESSAGE_ID: message_id,
                "type": RESPONSE_TYPE,
                "status": MessageStatus::Failure,
                "err": err,
            }),
        };
        self.send_message(namespace, EventKind::DataReturned, data)
    }

    /// Handle a raw message from the channel. Anything that is not a
    /// protocol message is dropped.
    pub fn receive(&self, raw: &Value) {
        match Message::parse(raw) {
            Some(message) => self.dispatch(&message),
            None => trace!("Ignoring foreign message"),
        }
    }

    fn dispatch(&self, message: &Message) {
        if message.event == EventKind::DataReturned {
            self.settle(message);
        }

        let callbacks: Vec<Callback> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers
                .get(&(message.namespace, message.event))
                .cloned()
                .unwrap_or_default()
        };

        for cb in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| cb(&message.data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    namespace = %message.namespace,
                    event = ?message.event,
                    error = %e,
                    "Message handler failed"
                ),
                Err(_) => error!(
                    namespace = %message.namespace,
                    event = ?message.event,
                    "Message handler panicked"
                ),
            }
        }
    }

    /// Resolve the pending request a reply belongs to, if any.
    fn settle(&self, message: &Message) {
        let data = &message.data;
        if data.get("type").and_then(Value::as_str) != Some(RESPONSE_TYPE) {
            return;
        }
        let Some(message_id) = data.get(MESSAGE_ID).and_then(Value::as_str) else {
            return;
        };
        let status = data
            .get("status")
            .cloned()
            .and_then(|s| serde_json::from_value::<MessageStatus>(s).ok());
        let Some(status) = status else {
            debug!(message_id, "Reply without a status");
            return;
        };
        let Some((_, pending)) = self
            .pending
            .remove_if(message_id, |_, p| p.namespace == message.namespace)
        else {
            trace!(message_id, "Reply for unknown or settled request");
            return;
        };

        let outcome = match status {
            MessageStatus::Success => Ok(data.get("data").cloned().unwrap_or(Value::Null)),
            MessageStatus::Failure => Err(HashiError::Rejected(
                data.get("err").cloned().unwrap_or(Value::Null),
            )),
        };
        // The requester may have stopped waiting.
        let _ = pending.tx.send(outcome);
    }

    /// Requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending request; their callers fail with
    /// [`HashiError::Cancelled`].
    pub fn shutdown(&self) {
        let count = self.pending.len();
        self.pending.clear();
        info!(cancelled = count, "Mediator shut down");
    }
}

/// Feed messages arriving on `rx` into `mediator` until either end goes
/// away.
pub fn spawn_listener(
    mediator: &Arc<Mediator>,
    mut rx: mpsc::UnboundedReceiver<Value>,
) -> JoinHandle<()> {
    let weak: Weak<Mediator> = Arc::downgrade(mediator);
    tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            match weak.upgrade() {
                Some(mediator) => mediator.receive(&raw),
                None => break,
            }
        }
        debug!("Mediator listener stopped");
    })
}

/// Two mediators wired to each other over in-process channels:
/// `(host, frame)`.
pub fn connect_pair(config: &MediatorConfig) -> (Arc<Mediator>, Arc<Mediator>) {
    let (to_host, host_rx) = mpsc::unbounded_channel();
    let (to_frame, frame_rx) = mpsc::unbounded_channel();

    let host = Arc::new(Mediator::with_config(
        Arc::new(ChannelTransport::new(to_frame)),
        config,
    ));
    let frame = Arc::new(Mediator::with_config(
        Arc::new(ChannelTransport::new(to_host)),
        config,
    ));

    spawn_listener(&host, host_rx);
    spawn_listener(&frame, frame_rx);
    (host, frame)
}
