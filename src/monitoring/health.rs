use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::core::error::ApiError;
use crate::core::types::{
    CreateRequest, EnvironmentRecord, ExecuteAck, ExecuteRequest, HealthState, HealthStatus,
    Namespace, ResourceSnapshot, StatusReport,
};
use crate::core::ProvisioningApi;

type Listener = Box<dyn Fn(&HealthState) + Send + Sync>;

/// Reachability of the provisioning API, derived from the latest outcome.
///
/// `unknown -> healthy` on the first answer, `* -> unreachable` on any
/// transport failure, and straight back to `healthy` on the next answer.
/// Application-level errors still prove the server is up.
pub struct HealthMonitor {
    state: watch::Sender<HealthState>,
    listeners: Mutex<Vec<Listener>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(HealthState::unknown());
        Self {
            state,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn current_state(&self) -> HealthState {
        self.state.borrow().clone()
    }

    /// Registers a callback fired on every status transition.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&HealthState) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state.subscribe()
    }

    pub fn record<T>(&self, outcome: &Result<T, ApiError>) {
        match outcome {
            Ok(_) => self.transition(HealthState::healthy()),
            Err(err) if err.is_transport() => {
                self.transition(HealthState::unreachable(err.message()))
            }
            Err(_) => self.transition(HealthState::healthy()),
        }
    }

    /// Back to the startup belief; used when the page is cleared.
    pub fn reset(&self) {
        self.transition(HealthState::unknown());
    }

    fn transition(&self, next: HealthState) {
        let mut changed = false;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            changed = current.status != next.status;
            *current = next.clone();
            true
        });

        if !changed {
            return;
        }
        match next.status {
            HealthStatus::Unreachable => warn!(reason = %next.reason, "API unreachable"),
            _ => info!(reason = %next.reason, "API health changed"),
        }
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(&next);
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps any [`ProvisioningApi`] so that every outcome feeds the monitor.
pub struct HealthTracked {
    inner: Arc<dyn ProvisioningApi>,
    monitor: Arc<HealthMonitor>,
}

impl HealthTracked {
    pub fn new(inner: Arc<dyn ProvisioningApi>, monitor: Arc<HealthMonitor>) -> Self {
        Self { inner, monitor }
    }

    fn observe<T>(&self, outcome: Result<T, ApiError>) -> Result<T, ApiError> {
        self.monitor.record(&outcome);
        outcome
    }
}

#[async_trait]
impl ProvisioningApi for HealthTracked {
    async fn resources(&self) -> Result<ResourceSnapshot, ApiError> {
        self.observe(self.inner.resources().await)
    }

    async fn environments(&self) -> Result<Vec<EnvironmentRecord>, ApiError> {
        self.observe(self.inner.environments().await)
    }

    async fn status(&self, namespace: &Namespace) -> Result<StatusReport, ApiError> {
        self.observe(self.inner.status(namespace).await)
    }

    async fn create(&self, request: &CreateRequest) -> Result<serde_json::Value, ApiError> {
        self.observe(self.inner.create(request).await)
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteAck, ApiError> {
        self.observe(self.inner.execute(request).await)
    }

    async fn output(&self, namespace: &Namespace) -> Result<String, ApiError> {
        self.observe(self.inner.output(namespace).await)
    }

    async fn terminate(&self, namespace: &Namespace) -> Result<serde_json::Value, ApiError> {
        self.observe(self.inner.terminate(namespace).await)
    }
}
