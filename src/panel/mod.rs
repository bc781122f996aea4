use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::ApiGateway;
use crate::core::error::{ApiError, PanelError, PanelResult, Visibility};
use crate::core::events::{EventBus, PanelEvent};
use crate::core::types::{
    CreateRequest, EnvironmentRecord, ExecuteRequest, HealthState, Namespace, StatusReport,
};
use crate::core::{PanelConfig, ProvisioningApi};
use crate::environments::{EnvironmentListSynchronizer, NamespaceWatchSession};
use crate::monitoring::{HealthMonitor, HealthTracked};
use crate::resources::{ResourceSnapshotRefresher, ResourceView};
use crate::scheduler::PollingScheduler;

const UNIT_PLACEHOLDER: &str = "n/a";
const EMPTY_OUTPUT: &str = "(no output)";

const DEMO_COMMAND: &str = "python3 - <<'PY'
import time,sys
for i in range(1,11):
    print(f'Step {i}/10')
    sys.stdout.flush()
    time.sleep(0.5)
print('Done!')
PY";

/// Form input for a new environment. Missing sizes use the current selections.
#[derive(Debug, Clone, Default)]
pub struct CreateForm {
    pub namespace: String,
    pub cpu: Option<f64>,
    pub memory: Option<u64>,
    pub io: Option<u32>,
    pub command: String,
}

/// Wires the polling core together and exposes the operator's actions.
pub struct Panel {
    config: PanelConfig,
    events: EventBus,
    health: Arc<HealthMonitor>,
    scheduler: Arc<PollingScheduler>,
    api: Arc<dyn ProvisioningApi>,
    resources: Arc<ResourceSnapshotRefresher>,
    environments: Arc<EnvironmentListSynchronizer>,
    watch: Arc<NamespaceWatchSession>,
}

impl Panel {
    pub fn connect(config: PanelConfig) -> PanelResult<Self> {
        config.validate()?;
        let gateway = ApiGateway::new(&config.api_base)?;
        Ok(Self::new(config, Arc::new(gateway)))
    }

    pub fn new(config: PanelConfig, transport: Arc<dyn ProvisioningApi>) -> Self {
        let events = EventBus::default();
        let health = Arc::new(HealthMonitor::new());
        {
            let events = events.clone();
            health.on_change(move |state| events.publish(PanelEvent::HealthChanged(state.clone())));
        }

        let api: Arc<dyn ProvisioningApi> = Arc::new(HealthTracked::new(transport, health.clone()));
        let scheduler = Arc::new(PollingScheduler::new());
        let resources = Arc::new(ResourceSnapshotRefresher::new(
            api.clone(),
            events.clone(),
            ResourceView::with_limits(config.default_cpu_max, config.default_memory_max_mb),
        ));
        let environments = Arc::new(EnvironmentListSynchronizer::new(
            api.clone(),
            events.clone(),
            scheduler.clone(),
            config.environment_refresh_interval(),
        ));
        let watch = Arc::new(NamespaceWatchSession::new(
            api.clone(),
            events.clone(),
            scheduler.clone(),
            environments.clone(),
            resources.clone(),
            config.watch_interval(),
        ));

        Self {
            config,
            events,
            health,
            scheduler,
            api,
            resources,
            environments,
            watch,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub fn health(&self) -> HealthState {
        self.health.current_state()
    }

    pub fn resources(&self) -> ResourceView {
        self.resources.view()
    }

    pub fn environments(&self) -> Vec<EnvironmentRecord> {
        self.environments.records()
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn watched_namespace(&self) -> Option<Namespace> {
        self.watch.current_namespace()
    }

    /// Binds the resource bounds without starting any recurring task. Only
    /// the first successful bind sets the CPU bound.
    pub async fn bind(&self) -> Result<ResourceView, ApiError> {
        self.resources
            .bind_initial()
            .await
            .map_err(|err| self.reported(err, Visibility::Surfaced))
    }

    /// Startup: binds the resource bounds, then keeps memory live. Calling
    /// it again after `clear_page` resumes the live refresh and keeps the
    /// CPU bound from the first bind.
    pub async fn start(&self) -> Result<ResourceView, ApiError> {
        let bound = self.bind().await;
        self.resources
            .start(&self.scheduler, self.config.resource_refresh_interval());
        bound
    }

    /// Starts watching `namespace`. An unknown or terminated namespace is
    /// reported and never polled; only a transport failure on the first
    /// fetch leaves the watch polling until the API comes back.
    pub async fn watch(&self, namespace: &str) -> PanelResult<()> {
        let namespace = self.parse(namespace)?;
        self.watch.start(namespace).await?;
        Ok(())
    }

    pub fn stop_watch(&self) -> bool {
        let stopped = self.watch.stop();
        if stopped {
            self.notice("watch paused");
        }
        stopped
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.environments.set_auto_refresh(enabled);
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.environments.is_auto_refreshing()
    }

    /// Manual list refresh. `Ok(None)` means an auto-refresh was already in
    /// flight and will publish the list.
    pub async fn refresh_environments(
        &self,
        visibility: Visibility,
    ) -> Result<Option<Vec<EnvironmentRecord>>, ApiError> {
        self.environments
            .refresh()
            .await
            .map_err(|err| self.reported(err, visibility))
    }

    /// One-shot status lookup; always reveals the status cards.
    pub async fn status(&self, namespace: &str) -> PanelResult<StatusReport> {
        let namespace = self.parse(namespace)?;
        let report = self
            .api
            .status(&namespace)
            .await
            .map_err(|err| self.reported(err, Visibility::Surfaced))?;
        self.events.publish(PanelEvent::StatusUpdated {
            namespace,
            report: report.clone(),
            reveal: true,
        });
        Ok(report)
    }

    pub async fn create(&self, form: CreateForm) -> PanelResult<serde_json::Value> {
        let namespace = self.parse(&form.namespace)?;
        let cpu = match form.cpu {
            Some(cores) => self.resources.select_cpu(cores).cpu.selected,
            None => self.resources.view().cpu.selected,
        };
        let memory = match form.memory {
            Some(mb) => self.resources.select_memory(mb).memory.selected,
            None => self.resources.view().memory.selected,
        };
        let request = CreateRequest {
            namespace,
            cpu,
            memory,
            io: form.io.unwrap_or(1),
            command: form.command,
        };

        let ack = self
            .api
            .create(&request)
            .await
            .map_err(|err| self.reported(err, Visibility::Surfaced))?;
        info!(namespace = %request.namespace, cpu, memory, "environment created");
        self.notice("environment created");
        self.resources.refresh_live().await;
        Ok(ack)
    }

    /// Launches a command; returns the execution unit name.
    pub async fn execute(&self, namespace: &str, command: &str) -> PanelResult<String> {
        let request = ExecuteRequest {
            namespace: self.parse(namespace)?,
            command: command.to_string(),
        };
        let ack = self
            .api
            .execute(&request)
            .await
            .map_err(|err| self.reported(err, Visibility::Surfaced))?;

        let unit = ack.unit.unwrap_or_else(|| UNIT_PLACEHOLDER.to_string());
        self.notice(&format!("execution started ({})", unit));
        self.resources.refresh_live().await;
        Ok(unit)
    }

    pub async fn output(&self, namespace: &str) -> PanelResult<String> {
        let namespace = self.parse(namespace)?;
        let text = self
            .api
            .output(&namespace)
            .await
            .map_err(|err| self.reported(err, Visibility::Surfaced))?;
        if text.is_empty() {
            return Ok(EMPTY_OUTPUT.to_string());
        }
        Ok(text)
    }

    pub async fn terminate(&self, namespace: &str) -> PanelResult<()> {
        let namespace = self.parse(namespace)?;
        self.api
            .terminate(&namespace)
            .await
            .map_err(|err| self.reported(err, Visibility::Surfaced))?;

        if self.watch.current_namespace().as_ref() == Some(&namespace) {
            self.watch.stop();
        }
        self.notice(&format!("environment {} terminated", namespace));
        self.resources.refresh_live().await;
        // Best effort; failures already show up in health.
        let _ = self.refresh_environments(Visibility::Silent).await;
        Ok(())
    }

    pub fn select_cpu(&self, cores: f64) -> ResourceView {
        let view = self.resources.select_cpu(cores);
        self.events.publish(PanelEvent::ResourceSnapshotUpdated(view));
        view
    }

    pub fn select_memory(&self, memory_mb: u64) -> ResourceView {
        let view = self.resources.select_memory(memory_mb);
        self.events.publish(PanelEvent::ResourceSnapshotUpdated(view));
        view
    }

    /// Cancels every recurring task and forgets everything fetched since
    /// startup. Resource bounds stay as bound.
    pub fn clear_page(&self) {
        let cancelled = self.scheduler.reset_all();
        self.watch.stop();
        self.environments.clear();
        self.health.reset();
        info!(cancelled, "page cleared");
        self.events.publish(PanelEvent::EnvironmentListUpdated(Vec::new()));
        self.notice("page cleared");
    }

    pub fn demo_command() -> &'static str {
        DEMO_COMMAND
    }

    fn parse(&self, raw: &str) -> PanelResult<Namespace> {
        Namespace::parse(raw).map_err(|err| {
            self.events.publish(PanelEvent::OperationFailed {
                message: err.to_string(),
            });
            err
        })
    }

    fn report(&self, err: &ApiError, visibility: Visibility) {
        match visibility {
            Visibility::Surfaced => self.events.publish(PanelEvent::OperationFailed {
                message: err.message().to_string(),
            }),
            Visibility::Silent => warn!(error = %err, kind = ?err.kind(), "background operation failed"),
        }
    }

    fn reported(&self, err: ApiError, visibility: Visibility) -> ApiError {
        self.report(&err, visibility);
        err
    }

    fn notice(&self, message: &str) {
        self.events.publish(PanelEvent::Notice(message.to_string()));
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        self.scheduler.reset_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::{running, status, MockApi};
    use crate::core::types::{HealthStatus, ResourceSnapshot};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::sleep;

    fn config() -> PanelConfig {
        PanelConfig {
            watch_interval_ms: 100,
            environment_refresh_interval_ms: 100,
            resource_refresh_interval_ms: 100,
            ..PanelConfig::default()
        }
    }

    fn mock() -> Arc<MockApi> {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(ResourceSnapshot {
            cpu_available: Some(4.0),
            memory_available: Some(2048),
        }));
        api.push_environments(Ok(vec![running("a")]));
        api
    }

    fn events(rx: &mut broadcast::Receiver<PanelEvent>) -> Vec<PanelEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_binds_and_reports_health() {
        let panel = Panel::new(config(), mock());
        let mut rx = panel.subscribe();

        let view = panel.start().await.unwrap();

        assert_eq!(view.cpu.bound, 4.0);
        assert_eq!(panel.health().status, HealthStatus::Healthy);
        assert!(events(&mut rx).contains(&PanelEvent::HealthChanged(HealthState::healthy())));
        assert!(panel.scheduler().is_scheduled(&crate::scheduler::TaskKey::ResourceRefresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_surfaced() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Err(ApiError::transport("connection refused")));
        let panel = Panel::new(config(), api);
        let mut rx = panel.subscribe();

        assert!(panel.start().await.is_err());

        let seen = events(&mut rx);
        assert!(seen.contains(&PanelEvent::OperationFailed {
            message: "connection refused".to_string()
        }));
        assert_eq!(panel.health().status, HealthStatus::Unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_page_silences_everything() {
        let api = mock();
        api.push_status("a", Ok(status("running")));
        let panel = Panel::new(config(), api.clone());

        panel.start().await.unwrap();
        panel.set_auto_refresh(true);
        panel.watch("a").await.unwrap();
        sleep(Duration::from_millis(250)).await;

        panel.clear_page();
        let frozen = api.calls().len();
        sleep(Duration::from_millis(1000)).await;

        assert_eq!(api.calls().len(), frozen);
        assert_eq!(panel.scheduler().active_count(), 0);
        assert_eq!(panel.watched_namespace(), None);
        assert!(panel.environments().is_empty());
        assert_eq!(panel.health().status, HealthStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_page_drops_in_flight_list() {
        let api = Arc::new(MockApi::new());
        api.push_environments(Ok(vec![running("stale")]));
        api.set_environments_delay(Duration::from_millis(200));
        api.push_status("a", Ok(status("running")));
        let panel = Panel::new(config(), api);

        panel.watch("a").await.unwrap();
        // Watch tick at 100ms starts a list fetch that resolves at 300ms.
        sleep(Duration::from_millis(150)).await;
        let mut rx = panel.subscribe();
        panel.clear_page();
        sleep(Duration::from_millis(300)).await;

        assert!(panel.environments().is_empty());
        let refilled = events(&mut rx).into_iter().any(|event| {
            matches!(event, PanelEvent::EnvironmentListUpdated(records) if !records.is_empty())
        });
        assert!(!refilled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_clear_keeps_cpu_bound() {
        let api = Arc::new(MockApi::new());
        api.push_resources(Ok(ResourceSnapshot {
            cpu_available: Some(4.0),
            memory_available: Some(2048),
        }))
        .push_resources(Ok(ResourceSnapshot {
            cpu_available: Some(16.0),
            memory_available: Some(1024),
        }));
        let panel = Panel::new(config(), api);

        panel.start().await.unwrap();
        panel.clear_page();
        let view = panel.start().await.unwrap();

        assert_eq!(view.cpu.bound, 4.0);
        assert_eq!(view.cpu_available, Some(4.0));
        assert_eq!(view.memory_available_mb, Some(1024));
        assert!(panel.scheduler().is_scheduled(&crate::scheduler::TaskKey::ResourceRefresh));
    }

    #[tokio::test]
    async fn test_bind_schedules_nothing() {
        let panel = Panel::new(config(), mock());

        let view = panel.bind().await.unwrap();

        assert_eq!(view.cpu.bound, 4.0);
        assert_eq!(panel.scheduler().active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_uses_clamped_selection() {
        let panel = Panel::new(config(), mock());
        panel.start().await.unwrap();

        panel
            .create(CreateForm {
                namespace: "job".to_string(),
                cpu: Some(6.0),
                ..CreateForm::default()
            })
            .await
            .unwrap();

        assert_eq!(panel.resources().cpu.selected, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_stops_matching_watch() {
        let api = mock();
        api.push_status("a", Ok(status("running")));
        let panel = Panel::new(config(), api.clone());

        panel.watch("a").await.unwrap();
        panel.terminate("a").await.unwrap();

        assert_eq!(panel.watched_namespace(), None);
        assert!(api.calls().contains(&"terminate:a".to_string()));
    }

    #[tokio::test]
    async fn test_blank_namespace_is_rejected_visibly() {
        let panel = Panel::new(config(), mock());
        let mut rx = panel.subscribe();

        assert!(matches!(panel.watch("   ").await, Err(PanelError::InvalidNamespace(_))));
        assert!(matches!(events(&mut rx).as_slice(), [PanelEvent::OperationFailed { .. }]));
    }

    #[tokio::test]
    async fn test_empty_output_placeholder() {
        let panel = Panel::new(config(), mock());
        assert_eq!(panel.output("a").await.unwrap(), EMPTY_OUTPUT);
    }

    #[test]
    fn test_demo_command_is_a_script() {
        assert!(Panel::demo_command().contains("range(1,11)"));
    }
}
