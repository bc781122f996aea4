use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::error::ApiError;
use crate::core::events::{EventBus, PanelEvent};
use crate::core::types::EnvironmentRecord;
use crate::core::ProvisioningApi;
use crate::scheduler::{PollingScheduler, TaskHandle, TaskKey};

pub mod watch;
pub use watch::NamespaceWatchSession;

/// Keeps the published environment list in step with the server.
///
/// The list is replaced wholesale on every refresh and keeps the server's
/// ordering. Auto-refresh is a recurring task of its own, independent of
/// any namespace watch.
pub struct EnvironmentListSynchronizer {
    api: Arc<dyn ProvisioningApi>,
    events: EventBus,
    scheduler: Arc<PollingScheduler>,
    cadence: Duration,
    records: RwLock<Vec<EnvironmentRecord>>,
}

impl EnvironmentListSynchronizer {
    pub fn new(
        api: Arc<dyn ProvisioningApi>,
        events: EventBus,
        scheduler: Arc<PollingScheduler>,
        cadence: Duration,
    ) -> Self {
        Self {
            api,
            events,
            scheduler,
            cadence,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<EnvironmentRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetches and republishes the full list. Errors go to the caller.
    ///
    /// Shares the auto-refresh busy flag: returns `Ok(None)` without a
    /// request when an auto-refresh tick is already in flight, since that
    /// tick will publish the list itself.
    pub async fn refresh(&self) -> Result<Option<Vec<EnvironmentRecord>>, ApiError> {
        let Some(outcome) = self
            .scheduler
            .run_once(&TaskKey::EnvironmentList, self.api.environments())
            .await
        else {
            debug!("manual refresh skipped, auto-refresh in flight");
            return Ok(None);
        };

        let records = outcome?;
        self.publish(records.clone());
        Ok(Some(records))
    }

    /// Refresh for background callers: shares the auto-refresh busy flag
    /// and absorbs failures. The result is dropped unless `still_current`
    /// holds once the request returns.
    pub async fn refresh_in_background(
        &self,
        still_current: impl Fn() -> bool,
    ) -> Option<Vec<EnvironmentRecord>> {
        let outcome = self
            .scheduler
            .run_once(&TaskKey::EnvironmentList, self.api.environments())
            .await?;
        if !still_current() {
            debug!("discarding environment list from a cancelled caller");
            return None;
        }

        match outcome {
            Ok(records) => {
                self.publish(records.clone());
                Some(records)
            }
            Err(err) => {
                warn!(error = %err, "environment list refresh failed");
                None
            }
        }
    }

    pub fn set_auto_refresh(self: &Arc<Self>, enabled: bool) {
        if !enabled {
            if self.scheduler.cancel_key(&TaskKey::EnvironmentList) {
                info!("environment auto-refresh stopped");
            }
            return;
        }
        if self.is_auto_refreshing() {
            return;
        }

        let synchronizer = Arc::clone(self);
        self.scheduler.schedule(TaskKey::EnvironmentList, self.cadence, move |handle: TaskHandle| {
            let synchronizer = synchronizer.clone();
            async move {
                synchronizer.tick(&handle).await;
            }
        });
        info!(cadence_ms = self.cadence.as_millis() as u64, "environment auto-refresh started");
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.scheduler.is_scheduled(&TaskKey::EnvironmentList)
    }

    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn tick(&self, handle: &TaskHandle) {
        let outcome = self.api.environments().await;
        if !handle.is_active() {
            debug!("discarding environment list from a cancelled tick");
            return;
        }
        match outcome {
            Ok(records) => self.publish(records),
            Err(err) => warn!(error = %err, "environment auto-refresh failed"),
        }
    }

    fn publish(&self, records: Vec<EnvironmentRecord>) {
        *self.records.write().unwrap_or_else(PoisonError::into_inner) = records.clone();
        self.events.publish(PanelEvent::EnvironmentListUpdated(records));
    }
}
