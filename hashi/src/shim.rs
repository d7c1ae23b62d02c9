//! The contract every capability shim implements.
//!
//! A shim owns the state behind one emulated API and one namespace on the
//! mediator. The same type runs on both sides of the boundary: inside the
//! frame it serves the emulated API and pushes its state to the host after
//! every mutation; on the host it holds the persisted copy and pushes it
//! back into the frame on (re)initialization.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::trace;

use crate::config::protocol::{EventKind, Namespace};
use crate::error::{HashiError, Result};
use crate::mediator::{callback, Callback, Mediator};
use crate::window::ContentWindow;

/// Namespace, accepted events and mediator of one shim instance.
#[derive(Clone)]
pub struct ShimCore {
    namespace: Namespace,
    events: &'static [EventKind],
    mediator: Arc<Mediator>,
}

impl ShimCore {
    pub fn new(namespace: Namespace, events: &'static [EventKind], mediator: Arc<Mediator>) -> Self {
        Self {
            namespace,
            events,
            mediator,
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn events(&self) -> &'static [EventKind] {
        self.events
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    /// Fail unless `event` is one this shim declares.
    pub fn check_event(&self, event: EventKind) -> Result<()> {
        if self.events.contains(&event) {
            Ok(())
        } else {
            Err(HashiError::UnknownEvent {
                namespace: self.namespace,
                event,
            })
        }
    }

    /// Send `data` on this shim's namespace.
    pub fn send(&self, event: EventKind, data: Value) -> Result<()> {
        self.check_event(event)?;
        self.mediator.send_message(self.namespace, event, data)
    }
}

pub trait Shim: Send + Sync {
    fn core(&self) -> &ShimCore;

    /// Current state, in the form the host persists.
    fn data(&self) -> Value;

    /// Replace state wholesale without notifying anyone.
    fn apply_data(&self, data: Value);

    /// Install this shim's globals into the frame.
    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow);

    /// Replace state and push it to the other side.
    fn set_data(&self, data: Value) -> Result<()> {
        self.apply_data(data);
        self.state_updated()
    }

    /// Push current state to the other side.
    fn state_updated(&self) -> Result<()> {
        self.core().send(EventKind::StateUpdate, self.data())
    }

    /// Subscribe to one of this shim's events.
    fn on(&self, event: EventKind, cb: Callback) -> Result<()> {
        let core = self.core();
        core.check_event(event)?;
        core.mediator()
            .register_message_handler(core.namespace(), event, cb);
        Ok(())
    }

    /// Unsubscribe one callback, or all of them when `cb` is `None`.
    fn off(&self, event: EventKind, cb: Option<&Callback>) -> Result<()> {
        let core = self.core();
        core.check_event(event)?;
        core.mediator()
            .remove_message_handler(core.namespace(), event, cb);
        Ok(())
    }
}

/// Rehydrate `shim` from every `StateUpdate` the other side sends.
pub fn bind_state_updates<S: Shim + 'static>(shim: &Arc<S>) -> Result<Callback> {
    let weak: Weak<S> = Arc::downgrade(shim);
    let namespace = shim.core().namespace();
    let cb = callback(move |data| {
        if let Some(shim) = weak.upgrade() {
            trace!(namespace = %namespace, "Applying state update");
            shim.apply_data(data.clone());
        }
        Ok(())
    });
    shim.on(EventKind::StateUpdate, cb.clone())?;
    Ok(cb)
}

/// Register a handler on `shim` that only runs while the shim is alive.
pub fn bind_event<S, F>(shim: &Arc<S>, event: EventKind, handler: F) -> Result<Callback>
where
    S: Shim + 'static,
    F: Fn(&S, &Value) -> Result<()> + Send + Sync + 'static,
{
    let weak: Weak<S> = Arc::downgrade(shim);
    let cb = callback(move |data| match weak.upgrade() {
        Some(shim) => handler(&shim, data),
        None => Ok(()),
    });
    shim.on(event, cb.clone())?;
    Ok(cb)
}
