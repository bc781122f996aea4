use tokio::sync::broadcast;
use tracing::trace;

use crate::core::types::{EnvironmentRecord, HealthState, Namespace, StatusReport};
use crate::resources::ResourceView;

/// Everything the presentation layer is told. The core never renders.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    HealthChanged(HealthState),
    ResourceSnapshotUpdated(ResourceView),
    EnvironmentListUpdated(Vec<EnvironmentRecord>),
    StatusUpdated {
        namespace: Namespace,
        report: StatusReport,
        /// First successful fetch of a watch or lookup; reveals the cards.
        reveal: bool,
    },
    OperationFailed { message: String },
    Notice(String),
}

/// Fan-out channel between the core and any number of renderers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PanelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PanelEvent) {
        // No subscriber is not an error; headless use is allowed.
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
