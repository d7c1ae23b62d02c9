//! Host side of the sandbox boundary.
//!
//! [`MainClient`] keeps a host-side instance of every stateful shim,
//! persists the state the frame reports into a [`SessionStore`], replays it
//! when the frame becomes ready, and answers the frame's Kolibri requests
//! from a [`ContentProvider`].

pub mod provider;
pub mod session;

pub use provider::{ContentProvider, StaticContentProvider};
pub use session::SessionStore;

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{now_message, VirtualClock};
use crate::config::protocol::{DataType, EventKind, Namespace, MESSAGE_ID};
use crate::config::HashiConfig;
use crate::error::{HashiError, Result};
use crate::mediator::{callback, Mediator};
use crate::shim::Shim;
use crate::shims::{
    BloomShim, CookieShim, H5pShim, H5pXApiAdapter, ScormShim, StorageKind, StorageShim, XApiShim,
};

pub struct MainClient {
    mediator: Arc<Mediator>,
    config: HashiConfig,
    clock: Arc<VirtualClock>,
    sessions: Arc<SessionStore>,
    provider: Arc<dyn ContentProvider>,
    scorm: Arc<ScormShim>,
    xapi: Arc<XApiShim>,
    bloom: Arc<BloomShim>,
    /// Every shim whose state the host persists.
    stateful: Vec<Arc<dyn Shim>>,
    ready: watch::Sender<bool>,
}

impl MainClient {
    pub fn new(
        mediator: Arc<Mediator>,
        config: HashiConfig,
        provider: Arc<dyn ContentProvider>,
    ) -> Result<Arc<Self>> {
        Self::with_sessions(mediator, config, provider, SessionStore::new())
    }

    /// Start from state persisted by an earlier session.
    pub fn with_sessions(
        mediator: Arc<Mediator>,
        config: HashiConfig,
        provider: Arc<dyn ContentProvider>,
        sessions: SessionStore,
    ) -> Result<Arc<Self>> {
        let clock = Arc::new(VirtualClock::new());
        let local = Arc::new(StorageShim::new(StorageKind::Local, mediator.clone()));
        let cookie = Arc::new(CookieShim::new(
            mediator.clone(),
            clock.clone(),
            config.session.frame_path.clone(),
        ));
        let scorm = Arc::new(ScormShim::new(mediator.clone()));
        let xapi = Arc::new(XApiShim::new(
            mediator.clone(),
            clock.clone(),
            &config.xapi,
            &config.session,
        ));
        let h5p = Arc::new(H5pShim::new(
            mediator.clone(),
            H5pXApiAdapter::new(xapi.clone()),
        ));
        let bloom = Arc::new(BloomShim::new(mediator.clone()));

        let stateful: Vec<Arc<dyn Shim>> = vec![
            local,
            cookie,
            scorm.clone(),
            xapi.clone(),
            h5p,
            bloom.clone(),
        ];
        for shim in &stateful {
            if let Some(saved) = sessions.get(shim.core().namespace()) {
                shim.apply_data(saved);
            }
        }

        let (ready, _) = watch::channel(false);
        let client = Arc::new(Self {
            mediator,
            config,
            clock,
            sessions: Arc::new(sessions),
            provider,
            scorm,
            xapi,
            bloom,
            stateful,
            ready,
        });
        client.bind()?;
        Ok(client)
    }

    fn bind(self: &Arc<Self>) -> Result<()> {
        for shim in &self.stateful {
            let namespace = shim.core().namespace();
            let weak: Weak<dyn Shim> = Arc::downgrade(shim);
            let sessions = self.sessions.clone();
            shim.on(
                EventKind::StateUpdate,
                callback(move |data| {
                    sessions.set(namespace, data.clone());
                    if let Some(shim) = weak.upgrade() {
                        shim.apply_data(data.clone());
                    }
                    Ok(())
                }),
            )?;
        }

        let weak = Arc::downgrade(self);
        self.mediator.register_message_handler(
            Namespace::Hashi,
            EventKind::Ready,
            callback(move |_| match weak.upgrade() {
                Some(client) => client.on_ready(),
                None => Ok(()),
            }),
        );

        let weak = Arc::downgrade(self);
        self.mediator.register_message_handler(
            Namespace::Kolibri,
            EventKind::DataRequested,
            callback(move |data| match weak.upgrade() {
                Some(client) => client.on_data_requested(data),
                None => Ok(()),
            }),
        );
        Ok(())
    }

    /// Ask the frame whether it is ready. The session starts when it
    /// answers.
    pub fn ready_check(&self) -> Result<()> {
        self.mediator
            .send_message(Namespace::Hashi, EventKind::ReadyCheck, Value::Null)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait up to `limit` for the frame to report ready.
    pub async fn wait_until_ready(&self, limit: Duration) -> Result<()> {
        let mut rx = self.ready.subscribe();
        let waited = tokio::time::timeout(limit, rx.wait_for(|ready| *ready))
            .await
            .map(|result| result.map(|_| ()));
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(HashiError::Cancelled),
            Err(_) => Err(HashiError::ReplyTimeout {
                namespace: Namespace::Hashi,
                message_id: "ready".to_string(),
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Replay persisted state, identify the learner and sync the clock.
    fn on_ready(&self) -> Result<()> {
        info!("Frame ready, starting session");
        for shim in &self.stateful {
            if self.sessions.get(shim.core().namespace()).is_some() {
                shim.state_updated()?;
            }
        }

        let user = json!({
            "userId": self.config.session.user_id,
            "userName": self.config.session.user_name,
        });
        for namespace in [Namespace::Scorm, Namespace::XApi] {
            self.mediator
                .send_message(namespace, EventKind::UserDataUpdate, user.clone())?;
        }
        self.send_now()?;
        self.ready.send_replace(true);
        Ok(())
    }

    pub fn send_now(&self) -> Result<()> {
        self.mediator.send_message(
            Namespace::Cookie,
            EventKind::Now,
            now_message(self.clock.now()),
        )
    }

    /// Re-send the host clock every `clock.resync_interval_secs` until the
    /// client is dropped.
    pub fn spawn_clock_resync(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.clock.resync_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; the session start already synced.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = client.send_now() {
                    warn!(error = %e, "Clock resync failed");
                }
            }
            debug!("Clock resync stopped");
        })
    }

    fn on_data_requested(self: Arc<Self>, data: &Value) -> Result<()> {
        let Some(message_id) = data.get(MESSAGE_ID).and_then(Value::as_str) else {
            warn!("Kolibri request without a message id");
            return Ok(());
        };
        let message_id = message_id.to_string();
        let request = data.clone();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HashiError::Transport(e.to_string()))?;

        runtime.spawn(async move {
            let outcome = self.answer(&request).await;
            if let Err(e) = self.mediator.reply(Namespace::Kolibri, &message_id, outcome) {
                error!(message_id = %message_id, error = %e, "Failed to reply to Kolibri request");
            }
        });
        Ok(())
    }

    async fn answer(&self, request: &Value) -> std::result::Result<Value, Value> {
        let data_type = request
            .get("dataType")
            .cloned()
            .and_then(|t| serde_json::from_value::<DataType>(t).ok());
        let Some(data_type) = data_type else {
            return Err(Value::String("Unknown dataType".to_string()));
        };
        let text = |key: &str| {
            request
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let object = |key: &str| request.get(key).cloned().unwrap_or_else(|| json!({}));

        debug!(data_type = ?data_type, "Answering Kolibri request");
        let provider = &self.provider;
        let result = match data_type {
            DataType::Collection => provider.get_content_by_filter(&object("options")).await,
            DataType::Model => provider.get_content_by_id(&text("id")).await,
            DataType::SearchResult => provider.search_content(&object("options")).await,
            DataType::NavigateTo => provider.navigate_to(&text("nodeId")).await,
            DataType::UpdateContext => provider.update_context(&object("context")).await,
            DataType::Context => provider.get_context().await,
            DataType::KolibriVersion => provider.get_version().await,
            DataType::ThemeChanges => provider.theme_renderer(&object("options")).await,
        };
        result.map_err(|e| Value::String(e.to_string()))
    }

    /// Completion in [0, 1] from the first content API that reports one:
    /// xAPI, then SCORM, then Bloom.
    pub fn progress(&self) -> Option<f64> {
        self.xapi
            .progress()
            .or_else(|| self.scorm.progress())
            .or_else(|| self.bloom.progress())
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn scorm(&self) -> &Arc<ScormShim> {
        &self.scorm
    }

    pub fn xapi(&self) -> &Arc<XApiShim> {
        &self.xapi
    }
}
