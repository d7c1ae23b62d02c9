//! Frame side of the sandbox boundary.
//!
//! [`SandboxClient`] owns the shims the hosted content talks to, keeps
//! them in step with the host and installs them into the frame's window.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::VirtualClock;
use crate::config::protocol::{EventKind, Namespace};
use crate::config::HashiConfig;
use crate::error::Result;
use crate::mediator::{callback, Mediator};
use crate::package::{BlobRegistry, BloomPackage, H5pPackage};
use crate::shim::{bind_event, bind_state_updates, Shim};
use crate::shims::{
    BloomShim, CookieShim, H5pShim, H5pXApiAdapter, KolibriShim, ScormShim, StorageKind,
    StorageShim, XApiShim,
};
use crate::window::ContentWindow;

pub struct SandboxClient {
    mediator: Arc<Mediator>,
    config: HashiConfig,
    clock: Arc<VirtualClock>,
    blobs: Arc<BlobRegistry>,
    local_storage: Arc<StorageShim>,
    session_storage: Arc<StorageShim>,
    cookie: Arc<CookieShim>,
    scorm: Arc<ScormShim>,
    xapi: Arc<XApiShim>,
    kolibri: Arc<KolibriShim>,
    h5p: Arc<H5pShim>,
    bloom: Arc<BloomShim>,
}

impl SandboxClient {
    pub fn new(mediator: Arc<Mediator>, config: HashiConfig) -> Result<Arc<Self>> {
        let clock = Arc::new(VirtualClock::new());
        let xapi = Arc::new(XApiShim::new(
            mediator.clone(),
            clock.clone(),
            &config.xapi,
            &config.session,
        ));
        let client = Arc::new(Self {
            local_storage: Arc::new(StorageShim::new(StorageKind::Local, mediator.clone())),
            session_storage: Arc::new(StorageShim::new(StorageKind::Session, mediator.clone())),
            cookie: Arc::new(CookieShim::new(
                mediator.clone(),
                clock.clone(),
                config.session.frame_path.clone(),
            )),
            scorm: Arc::new(ScormShim::new(mediator.clone())),
            kolibri: Arc::new(KolibriShim::new(mediator.clone())),
            h5p: Arc::new(H5pShim::new(
                mediator.clone(),
                H5pXApiAdapter::new(xapi.clone()),
            )),
            bloom: Arc::new(BloomShim::new(mediator.clone())),
            xapi,
            blobs: Arc::new(BlobRegistry::new()),
            clock,
            mediator,
            config,
        });
        client.bind()?;
        Ok(client)
    }

    fn bind(&self) -> Result<()> {
        bind_state_updates(&self.local_storage)?;
        bind_state_updates(&self.session_storage)?;
        bind_state_updates(&self.cookie)?;
        bind_state_updates(&self.scorm)?;
        bind_state_updates(&self.xapi)?;
        bind_state_updates(&self.h5p)?;
        bind_state_updates(&self.bloom)?;

        bind_event(&self.cookie, EventKind::Now, CookieShim::handle_now)?;
        bind_event(&self.scorm, EventKind::UserDataUpdate, ScormShim::handle_user_data)?;
        bind_event(&self.xapi, EventKind::UserDataUpdate, XApiShim::handle_user_data)?;

        let weak: Weak<Mediator> = Arc::downgrade(&self.mediator);
        self.mediator.register_message_handler(
            Namespace::Hashi,
            EventKind::ReadyCheck,
            callback(move |_| match weak.upgrade() {
                Some(mediator) => {
                    debug!("Answering ready check");
                    mediator.send_message(Namespace::Hashi, EventKind::Ready, Value::Null)
                }
                None => Ok(()),
            }),
        );
        Ok(())
    }

    /// Install every emulated API into `window`. Safe to repeat.
    pub fn iframe_initialize(&self, window: &ContentWindow) {
        self.local_storage.clone().iframe_initialize(window);
        self.session_storage.clone().iframe_initialize(window);
        self.cookie.clone().iframe_initialize(window);
        self.scorm.clone().iframe_initialize(window);
        self.xapi.clone().iframe_initialize(window);
        self.kolibri.clone().iframe_initialize(window);
        self.h5p.clone().iframe_initialize(window);
        self.bloom.clone().iframe_initialize(window);
    }

    /// Unpack an H5P package and hand its integration object to the H5P
    /// shim. Takes effect at the next [`iframe_initialize`](Self::iframe_initialize).
    pub fn load_h5p(&self, data: &[u8]) -> Result<H5pPackage> {
        let package = H5pPackage::from_zip(data, &self.blobs)?;
        let content_id = self
            .config
            .session
            .content_id
            .clone()
            .unwrap_or_else(|| "hashi".to_string());
        self.h5p.set_integration(package.integration(&content_id));
        Ok(package)
    }

    pub fn load_bloom(&self, data: &[u8]) -> Result<BloomPackage> {
        Ok(BloomPackage::from_zip(data, &self.blobs)?)
    }

    /// Periodically store xAPI statements whose debounce window has closed.
    pub fn spawn_debounce_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.xapi.debounce();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = client.xapi.flush_debounced() {
                    warn!(error = %e, "Flushing debounced statements failed");
                }
            }
        })
    }

    /// Store held-back statements and cancel requests still awaiting a
    /// reply.
    pub fn shutdown(&self) -> Result<()> {
        let drained = self.xapi.drain_debounced()?;
        self.mediator.shutdown();
        info!(drained, "Sandbox client shut down");
        Ok(())
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn blobs(&self) -> &Arc<BlobRegistry> {
        &self.blobs
    }

    pub fn local_storage(&self) -> &Arc<StorageShim> {
        &self.local_storage
    }

    pub fn session_storage(&self) -> &Arc<StorageShim> {
        &self.session_storage
    }

    pub fn cookie(&self) -> &Arc<CookieShim> {
        &self.cookie
    }

    pub fn scorm(&self) -> &Arc<ScormShim> {
        &self.scorm
    }

    pub fn xapi(&self) -> &Arc<XApiShim> {
        &self.xapi
    }

    pub fn kolibri(&self) -> &Arc<KolibriShim> {
        &self.kolibri
    }

    pub fn h5p(&self) -> &Arc<H5pShim> {
        &self.h5p
    }

    pub fn bloom(&self) -> &Arc<BloomShim> {
        &self.bloom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::RecordingTransport;
    use crate::window::globals;
    use serde_json::json;
    use std::time::Duration;

    fn client() -> (Arc<RecordingTransport>, Arc<SandboxClient>) {
        let transport = Arc::new(RecordingTransport::new());
        let mediator = Arc::new(Mediator::new(transport.clone(), Duration::from_secs(1)));
        let client = SandboxClient::new(mediator, HashiConfig::default()).unwrap();
        (transport, client)
    }

    #[test]
    fn test_ready_check_answered() {
        let (transport, client) = client();
        client
            .mediator()
            .receive(&json!({"namespace": "hashi", "event": "readycheck", "data": null}));
        assert_eq!(
            transport.matching(Namespace::Hashi, EventKind::Ready).len(),
            1
        );
    }

    #[test]
    fn test_host_state_rehydrates_shims() {
        let (_, client) = client();
        client.mediator().receive(&json!({
            "namespace": "localStorage",
            "event": "stateupdate",
            "data": {"lang": "fr"}
        }));
        client.mediator().receive(&json!({
            "namespace": "SCORM",
            "event": "userdataupdate",
            "data": {"userId": "u9", "userName": "Grace"}
        }));
        assert_eq!(client.local_storage().get_item("lang").as_deref(), Some("fr"));
        assert_eq!(client.scorm().get_value("cmi.core.student_id"), "u9");
    }

    #[test]
    fn test_initialize_installs_every_global() {
        let (_, client) = client();
        let window = ContentWindow::new();
        client.iframe_initialize(&window);
        client.iframe_initialize(&window);
        for name in [
            globals::LOCAL_STORAGE,
            globals::SESSION_STORAGE,
            globals::COOKIE,
            globals::SCORM_API,
            globals::XAPI,
            globals::KOLIBRI,
            globals::H5P,
            globals::BLOOM,
        ] {
            assert!(window.contains(name), "{name} missing");
        }
        assert!(!window.contains(globals::H5P_INTEGRATION));
    }
}
