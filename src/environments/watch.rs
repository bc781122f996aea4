use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::error::ApiError;
use crate::core::events::{EventBus, PanelEvent};
use crate::core::types::Namespace;
use crate::core::ProvisioningApi;
use crate::environments::EnvironmentListSynchronizer;
use crate::resources::ResourceSnapshotRefresher;
use crate::scheduler::{PollingScheduler, TaskHandle, TaskKey};

#[derive(Debug)]
struct WatchSession {
    id: u64,
    namespace: Namespace,
    handle: Option<TaskHandle>,
    revealed: bool,
}

/// The single recurring status poll targeting one namespace.
///
/// Every tick fetches the status, then refreshes the environment list, then
/// the live resource snapshot, one after the other.
pub struct NamespaceWatchSession {
    api: Arc<dyn ProvisioningApi>,
    events: EventBus,
    scheduler: Arc<PollingScheduler>,
    environments: Arc<EnvironmentListSynchronizer>,
    resources: Arc<ResourceSnapshotRefresher>,
    cadence: Duration,
    current: Mutex<Option<WatchSession>>,
    next_id: AtomicU64,
}

impl NamespaceWatchSession {
    pub fn new(
        api: Arc<dyn ProvisioningApi>,
        events: EventBus,
        scheduler: Arc<PollingScheduler>,
        environments: Arc<EnvironmentListSynchronizer>,
        resources: Arc<ResourceSnapshotRefresher>,
        cadence: Duration,
    ) -> Self {
        Self {
            api,
            events,
            scheduler,
            environments,
            resources,
            cadence,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Supersedes any running watch, fetches once, then polls.
    ///
    /// An application error on the first fetch (unknown or terminated
    /// namespace) is surfaced and nothing is scheduled. A transport error is
    /// surfaced too, but polling starts anyway so the watch recovers along
    /// with the API.
    pub async fn start(self: &Arc<Self>, namespace: Namespace) -> Result<(), ApiError> {
        self.stop();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.session() = Some(WatchSession {
            id,
            namespace: namespace.clone(),
            handle: None,
            revealed: false,
        });

        let outcome = self.api.status(&namespace).await;

        let mut current = self.session();
        if current.as_ref().map(|s| s.id) != Some(id) {
            debug!(namespace = %namespace, "watch superseded before first status arrived");
            return Ok(());
        }

        let failure = match outcome {
            Ok(report) => {
                if let Some(session) = current.as_mut() {
                    session.revealed = true;
                }
                self.events.publish(PanelEvent::StatusUpdated {
                    namespace: namespace.clone(),
                    report,
                    reveal: true,
                });
                None
            }
            Err(err) => {
                self.events.publish(PanelEvent::OperationFailed {
                    message: err.message().to_string(),
                });
                if !err.is_transport() {
                    *current = None;
                    return Err(err);
                }
                Some(err)
            }
        };

        let watch = Arc::clone(self);
        let handle = self.scheduler.schedule(TaskKey::NamespaceWatch, self.cadence, move |handle: TaskHandle| {
            let watch = watch.clone();
            async move {
                watch.tick(&handle).await;
            }
        });
        if let Some(session) = current.as_mut() {
            session.handle = Some(handle);
        }
        drop(current);

        info!(namespace = %namespace, cadence_ms = self.cadence.as_millis() as u64, "watching namespace");
        failure.map_or(Ok(()), Err)
    }

    /// Cancels the active watch. A no-op when nothing is watched.
    pub fn stop(&self) -> bool {
        let previous = self.session().take();
        let Some(session) = previous else {
            return false;
        };

        match &session.handle {
            Some(handle) => self.scheduler.cancel(handle),
            None => {
                self.scheduler.cancel_key(&TaskKey::NamespaceWatch);
            }
        }
        info!(namespace = %session.namespace, "watch stopped");
        true
    }

    pub fn current_namespace(&self) -> Option<Namespace> {
        self.session().as_ref().map(|s| s.namespace.clone())
    }

    pub fn is_watching(&self) -> bool {
        self.session().is_some()
    }

    async fn tick(&self, handle: &TaskHandle) {
        let Some(namespace) = self.namespace_for(handle) else {
            return;
        };

        let outcome = self.api.status(&namespace).await;
        if !handle.is_active() {
            debug!(namespace = %namespace, "discarding status from a cancelled watch");
            return;
        }

        match outcome {
            Ok(report) => {
                let reveal = self.mark_revealed(handle);
                self.events.publish(PanelEvent::StatusUpdated {
                    namespace: namespace.clone(),
                    report,
                    reveal,
                });
            }
            Err(err) if err.is_transport() => {
                warn!(namespace = %namespace, error = %err, "status poll failed");
            }
            Err(err) => {
                self.events.publish(PanelEvent::OperationFailed {
                    message: err.message().to_string(),
                });
            }
        }

        self.environments
            .refresh_in_background(|| handle.is_active())
            .await;
        if !handle.is_active() {
            return;
        }
        self.resources
            .refresh_live_while(|| handle.is_active())
            .await;
    }

    fn namespace_for(&self, handle: &TaskHandle) -> Option<Namespace> {
        self.session()
            .as_ref()
            .filter(|s| owns(s, handle))
            .map(|s| s.namespace.clone())
    }

    /// True exactly once per session: the first successful status.
    fn mark_revealed(&self, handle: &TaskHandle) -> bool {
        match self.session().as_mut() {
            Some(session) if owns(session, handle) && !session.revealed => {
                session.revealed = true;
                true
            }
            _ => false,
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<WatchSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owns(session: &WatchSession, handle: &TaskHandle) -> bool {
    session
        .handle
        .as_ref()
        .is_some_and(|h| h.generation() == handle.generation())
}
