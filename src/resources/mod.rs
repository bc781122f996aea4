//! Resource availability: a one-time bind of the selector bounds at startup
//! and a recurring live refresh of memory.
//!
//! CPU capacity is fixed for the session once bound. Memory is reclaimed by
//! the remote scheduler as jobs finish, so its bound is refreshed on every
//! tick. Selections are only ever pulled down to a new bound, never pushed up.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::error::ApiError;
use crate::core::events::{EventBus, PanelEvent};
use crate::core::types::ResourceSnapshot;
use crate::core::ProvisioningApi;
use crate::scheduler::{PollingScheduler, TaskHandle, TaskKey};

pub const DEFAULT_CPU_SELECTION: f64 = 1.0;
pub const DEFAULT_MEMORY_SELECTION_MB: u64 = 128;

/// A user-adjustable value with an upper bound owned by the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedSelection<T> {
    pub bound: T,
    pub selected: T,
}

impl<T: PartialOrd + Copy> BoundedSelection<T> {
    pub fn new(bound: T, selected: T) -> Self {
        let mut selection = Self { bound, selected };
        selection.clamp();
        selection
    }

    /// Moves the bound; pulls the selection down if it now exceeds it.
    /// Returns true when the selection changed.
    pub fn rebind(&mut self, bound: T) -> bool {
        self.bound = bound;
        self.clamp()
    }

    /// User input; anything above the bound lands on the bound.
    pub fn select(&mut self, value: T) -> T {
        self.selected = value;
        self.clamp();
        self.selected
    }

    fn clamp(&mut self) -> bool {
        if self.selected > self.bound {
            self.selected = self.bound;
            true
        } else {
            false
        }
    }
}

/// What the presentation layer shows for resources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceView {
    /// Last reported free cores, `None` until the server has said.
    pub cpu_available: Option<f64>,
    /// Last reported free memory in MB.
    pub memory_available_mb: Option<u64>,
    pub cpu: BoundedSelection<f64>,
    pub memory: BoundedSelection<u64>,
    /// Set by the first successful bind; the CPU bound is frozen after it.
    pub bound: bool,
}

impl ResourceView {
    pub fn with_limits(cpu_max: f64, memory_max_mb: u64) -> Self {
        Self {
            cpu_available: None,
            memory_available_mb: None,
            cpu: BoundedSelection::new(cpu_max, DEFAULT_CPU_SELECTION),
            memory: BoundedSelection::new(memory_max_mb, DEFAULT_MEMORY_SELECTION_MB),
            bound: false,
        }
    }
}

pub struct ResourceSnapshotRefresher {
    api: Arc<dyn ProvisioningApi>,
    events: EventBus,
    view: RwLock<ResourceView>,
}

impl ResourceSnapshotRefresher {
    pub fn new(api: Arc<dyn ProvisioningApi>, events: EventBus, limits: ResourceView) -> Self {
        Self {
            api,
            events,
            view: RwLock::new(limits),
        }
    }

    pub fn view(&self) -> ResourceView {
        *self.view.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Startup bind: sets both bounds from the server, falling back to the
    /// configured maxima for any value the server leaves out.
    ///
    /// Only the first successful call binds. Later calls behave like a live
    /// refresh and leave the CPU bound where it is.
    pub async fn bind_initial(&self) -> Result<ResourceView, ApiError> {
        let snapshot = self.api.resources().await?;

        let mut rebound = false;
        let view = self.update(|view| {
            if view.bound {
                apply_live(view, &snapshot);
                return;
            }
            let cpu_bound = snapshot.cpu_available.unwrap_or(view.cpu.bound);
            let memory_bound = snapshot.memory_available.unwrap_or(view.memory.bound);
            if view.cpu.rebind(cpu_bound) {
                debug!(cpu = cpu_bound, "cpu selection clamped to bound");
            }
            if view.memory.rebind(memory_bound) {
                debug!(memory_mb = memory_bound, "memory selection clamped to bound");
            }
            view.cpu_available = snapshot.cpu_available;
            view.memory_available_mb = snapshot.memory_available;
            view.bound = true;
            rebound = true;
        });

        if rebound {
            debug!(cpu = view.cpu.bound, memory_mb = view.memory.bound, "resource bounds bound");
        } else {
            debug!("resource bounds already bound, refreshed memory only");
        }
        self.events.publish(PanelEvent::ResourceSnapshotUpdated(view));
        Ok(view)
    }

    pub fn is_bound(&self) -> bool {
        self.view().bound
    }

    /// Live refresh of memory. Failures are absorbed; the health monitor
    /// has already seen them.
    pub async fn refresh_live(&self) -> Option<ResourceView> {
        self.refresh_live_while(|| true).await
    }

    /// Live refresh applied only if `still_current` holds once the request
    /// returns.
    pub async fn refresh_live_while(&self, still_current: impl Fn() -> bool) -> Option<ResourceView> {
        let snapshot = match self.api.resources().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "resource refresh failed");
                return None;
            }
        };
        if !still_current() {
            debug!("discarding resource snapshot from a cancelled refresh");
            return None;
        }

        let view = self.update(|view| apply_live(view, &snapshot));
        self.events.publish(PanelEvent::ResourceSnapshotUpdated(view));
        Some(view)
    }

    pub fn select_cpu(&self, cores: f64) -> ResourceView {
        self.update(|view| {
            view.cpu.select(cores);
        })
    }

    pub fn select_memory(&self, memory_mb: u64) -> ResourceView {
        self.update(|view| {
            view.memory.select(memory_mb);
        })
    }

    /// Starts the recurring live refresh.
    pub fn start(self: &Arc<Self>, scheduler: &PollingScheduler, cadence: Duration) -> TaskHandle {
        let refresher = Arc::clone(self);
        scheduler.schedule(TaskKey::ResourceRefresh, cadence, move |handle: TaskHandle| {
            let refresher = refresher.clone();
            async move {
                refresher.refresh_live_while(|| handle.is_active()).await;
            }
        })
    }

    fn update(&self, apply: impl FnOnce(&mut ResourceView)) -> ResourceView {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut view);
        *view
    }
}

/// Memory only; the CPU bound stays where the startup bind put it.
fn apply_live(view: &mut ResourceView, snapshot: &ResourceSnapshot) {
    if let Some(memory) = snapshot.memory_available {
        view.memory_available_mb = Some(memory);
        if view.memory.rebind(memory) {
            debug!(memory_mb = memory, "memory selection clamped to live bound");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::MockApi;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn refresher(api: Arc<MockApi>) -> (Arc<ResourceSnapshotRefresher>, EventBus) {
        let events = EventBus::new(64);
        let refresher = ResourceSnapshotRefresher::new(api, events.clone(), ResourceView::with_limits(8.0, 16384));
        (Arc::new(refresher), events)
    }

    fn snapshot(cpu: Option<f64>, memory: Option<u64>) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_available: cpu,
            memory_available: memory,
        }
    }

    // selected, old bound, new bound, expected selection
    #[test_case(1024, 2048, 1536, 1024 ; "below new bound untouched")]
    #[test_case(2000, 2048, 1536, 1536 ; "above new bound pulled down")]
    #[test_case(1024, 2048, 4096, 1024 ; "larger bound never pushes up")]
    #[test_case(1536, 2048, 1536, 1536 ; "equal to bound untouched")]
    fn test_rebind_only_clamps_down(selected: u64, bound: u64, new_bound: u64, expected: u64) {
        let mut selection = BoundedSelection::new(bound, selected);
        selection.rebind(new_bound);
        assert_eq!(selection.selected, expected);
        assert_eq!(selection.bound, new_bound);
    }

    #[tokio::test]
    async fn test_bind_initial_clamps_cpu_selection() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(snapshot(Some(4.0), Some(2048))));
        let (refresher, _events) = refresher(api);
        refresher.select_cpu(6.0);

        let view = refresher.bind_initial().await.unwrap();

        assert_eq!(view.cpu_available, Some(4.0));
        assert_eq!(view.memory_available_mb, Some(2048));
        assert_eq!(view.cpu.selected, 4.0);
    }

    #[tokio::test]
    async fn test_second_bind_keeps_cpu_bound() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(snapshot(Some(4.0), Some(2048))))
            .push_resources(Ok(snapshot(Some(16.0), Some(1536))));
        let (refresher, _events) = refresher(api.clone());

        refresher.bind_initial().await.unwrap();
        refresher.select_cpu(3.0);
        let view = refresher.bind_initial().await.unwrap();

        assert!(view.bound);
        assert_eq!(view.cpu.bound, 4.0);
        assert_eq!(view.cpu_available, Some(4.0));
        assert_eq!(view.cpu.selected, 3.0);
        assert_eq!(view.memory_available_mb, Some(1536));
        assert_eq!(api.count("resources"), 2);
    }

    #[tokio::test]
    async fn test_failed_bind_can_be_retried() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Err(ApiError::transport("down")))
            .push_resources(Ok(snapshot(Some(4.0), Some(2048))));
        let (refresher, _events) = refresher(api);

        assert!(refresher.bind_initial().await.is_err());
        assert!(!refresher.is_bound());

        let view = refresher.bind_initial().await.unwrap();
        assert_eq!(view.cpu.bound, 4.0);
    }

    #[tokio::test]
    async fn test_bind_initial_falls_back_to_configured_maxima() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(snapshot(None, None)));
        let (refresher, _events) = refresher(api);

        let view = refresher.bind_initial().await.unwrap();

        assert_eq!(view.cpu.bound, 8.0);
        assert_eq!(view.memory.bound, 16384);
        assert_eq!(view.cpu_available, None);
    }

    #[tokio::test]
    async fn test_live_refresh_leaves_cpu_bound_alone() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(snapshot(Some(4.0), Some(2048))))
            .push_resources(Ok(snapshot(Some(16.0), Some(1536))));
        let (refresher, _events) = refresher(api);

        refresher.bind_initial().await.unwrap();
        refresher.select_memory(1024);
        let view = refresher.refresh_live().await.unwrap();

        assert_eq!(view.cpu.bound, 4.0);
        assert_eq!(view.cpu_available, Some(4.0));
        assert_eq!(view.memory_available_mb, Some(1536));
        assert_eq!(view.memory.selected, 1024);
    }

    #[tokio::test]
    async fn test_live_refresh_failure_is_absorbed() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Err(ApiError::transport("connection refused")));
        let (refresher, _events) = refresher(api);

        let before = refresher.view();
        assert_eq!(refresher.refresh_live().await, None);
        assert_eq!(refresher.view(), before);
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(snapshot(Some(2.0), Some(512))));
        let (refresher, events) = refresher(api);
        let mut rx = events.subscribe();

        refresher.refresh_live().await.unwrap();

        match rx.recv().await.unwrap() {
            PanelEvent::ResourceSnapshotUpdated(view) => assert_eq!(view.memory_available_mb, Some(512)),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_user_selection_capped_by_bound() {
        let mut selection = BoundedSelection::new(4.0, 1.0);
        assert_eq!(selection.select(6.0), 4.0);
        assert_eq!(selection.select(2.5), 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_refresh_survives_failures() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Err(ApiError::transport("down")))
            .push_resources(Ok(snapshot(None, Some(900))));
        let (refresher, _events) = refresher(api.clone());
        let scheduler = PollingScheduler::new();

        refresher.start(&scheduler, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(api.count("resources"), 3);
        assert_eq!(refresher.view().memory_available_mb, Some(900));
    }
}
