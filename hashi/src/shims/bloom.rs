//! `window.bloom`: reporting surface for the Bloom reader.
//!
//! Bloom books announce their properties once and then report pages as the
//! learner reads them. Progress is pages read over total numbered pages,
//! or complete once the book says it is finished.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::protocol::{EventKind, Namespace};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[EventKind::StateUpdate];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BookProgress {
    pub book_properties: Value,
    pub total_numbered_pages: u32,
    pub pages_read: BTreeSet<u32>,
    pub finished: bool,
}

impl BookProgress {
    pub fn fraction(&self) -> Option<f64> {
        if self.finished {
            return Some(1.0);
        }
        if self.total_numbered_pages == 0 {
            return None;
        }
        let read = self.pages_read.len() as f64;
        Some((read / f64::from(self.total_numbered_pages)).min(1.0))
    }
}

pub struct BloomShim {
    core: ShimCore,
    progress: RwLock<BookProgress>,
}

impl BloomShim {
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self {
            core: ShimCore::new(Namespace::Bloom, EVENTS, mediator),
            progress: RwLock::new(BookProgress::default()),
        }
    }

    /// Record the properties a book announces when it opens. A
    /// `totalNumberedPages` property sets the progress denominator.
    pub fn report_book_properties(&self, properties: Value) -> Result<()> {
        {
            let mut progress = self.progress.write().unwrap_or_else(|e| e.into_inner());
            if let Some(total) = properties.get("totalNumberedPages").and_then(Value::as_u64) {
                progress.total_numbered_pages = u32::try_from(total).unwrap_or(u32::MAX);
            }
            progress.book_properties = properties;
        }
        self.state_updated()
    }

    pub fn report_page_read(&self, page: u32) -> Result<()> {
        let added = self
            .progress
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pages_read
            .insert(page);
        if !added {
            return Ok(());
        }
        debug!(page, "Bloom page read");
        self.state_updated()
    }

    pub fn report_book_finished(&self) -> Result<()> {
        self.progress
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .finished = true;
        self.state_updated()
    }

    pub fn book_progress(&self) -> BookProgress {
        self.progress
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .fraction()
    }
}

impl Shim for BloomShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    fn data(&self) -> Value {
        let progress = self.progress.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_value(&*progress).unwrap_or_default()
    }

    fn apply_data(&self, data: Value) {
        let progress = if data.is_null() {
            BookProgress::default()
        } else {
            serde_json::from_value(data).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable Bloom progress");
                BookProgress::default()
            })
        };
        *self.progress.write().unwrap_or_else(|e| e.into_inner()) = progress;
    }

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        window.install(globals::BLOOM, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::RecordingTransport;
    use serde_json::json;
    use std::time::Duration;

    fn bloom() -> (Arc<RecordingTransport>, BloomShim) {
        let transport = Arc::new(RecordingTransport::new());
        let mediator = Arc::new(Mediator::new(transport.clone(), Duration::from_secs(1)));
        (transport, BloomShim::new(mediator))
    }

    #[test]
    fn test_progress_counts_distinct_pages() {
        let (transport, bloom) = bloom();
        assert_eq!(bloom.progress(), None);

        bloom
            .report_book_properties(json!({"totalNumberedPages": 4, "title": "Frogs"}))
            .unwrap();
        bloom.report_page_read(1).unwrap();
        bloom.report_page_read(2).unwrap();
        bloom.report_page_read(2).unwrap();
        assert_eq!(bloom.progress(), Some(0.5));
        // Properties plus two distinct pages.
        assert_eq!(transport.messages().len(), 3);

        bloom.report_book_finished().unwrap();
        assert_eq!(bloom.progress(), Some(1.0));
    }

    #[test]
    fn test_state_round_trips_through_host() {
        let (_, bloom) = bloom();
        bloom
            .report_book_properties(json!({"totalNumberedPages": 10}))
            .unwrap();
        bloom.report_page_read(3).unwrap();
        let saved = bloom.data();
        assert_eq!(saved["pagesRead"], json!([3]));

        let (_, restored) = super::tests::bloom();
        restored.apply_data(saved);
        assert_eq!(restored.progress(), Some(0.1));
    }
}
