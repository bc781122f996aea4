use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::error::ApiError;
use crate::core::types::{
    CreateRequest, EnvironmentRecord, ExecuteAck, ExecuteRequest, LifecycleStatus, Namespace,
    ResourceSnapshot, StatusReport,
};
use crate::core::ProvisioningApi;

/// Scripted in-memory provisioning API.
///
/// Each queue pops from the front; its last entry sticks and is repeated.
#[derive(Default)]
pub struct MockApi {
    resources: Mutex<VecDeque<Result<ResourceSnapshot, ApiError>>>,
    environments: Mutex<VecDeque<Result<Vec<EnvironmentRecord>, ApiError>>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<StatusReport, ApiError>>>>,
    status_delay: Mutex<Duration>,
    environments_delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
}

fn next<T: Clone>(queue: &mut VecDeque<Result<T, ApiError>>) -> Result<T, ApiError> {
    if queue.len() > 1 {
        return queue.pop_front().unwrap_or_else(|| Err(ApiError::transport("empty script")));
    }
    queue
        .front()
        .cloned()
        .unwrap_or_else(|| Err(ApiError::transport("connection refused")))
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_resources(&self, outcome: Result<ResourceSnapshot, ApiError>) -> &Self {
        self.resources.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_environments(&self, outcome: Result<Vec<EnvironmentRecord>, ApiError>) -> &Self {
        self.environments.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_status(&self, namespace: &str, outcome: Result<StatusReport, ApiError>) -> &Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    pub fn set_environments_delay(&self, delay: Duration) {
        *self.environments_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn running(namespace: &str) -> EnvironmentRecord {
    EnvironmentRecord {
        namespace: namespace.to_string(),
        last_status: LifecycleStatus::Running,
        last_pid: Some(100),
        cpu: Some(1.0),
        memory: Some(128),
        unit_name: Some(format!("run-{}.service", namespace)),
        created_at: None,
    }
}

pub fn status(state: &str) -> StatusReport {
    StatusReport {
        status: Some(state.to_string()),
        cpu_requested: Some(1.0),
        memory_requested: Some(128),
        unit: None,
        pid: Some(42),
        raw: json!({ "status": state }),
    }
}

#[async_trait]
impl ProvisioningApi for MockApi {
    async fn resources(&self) -> Result<ResourceSnapshot, ApiError> {
        self.log("resources".to_string());
        let outcome = next(&mut self.resources.lock().unwrap());
        outcome
    }

    async fn environments(&self) -> Result<Vec<EnvironmentRecord>, ApiError> {
        self.log("environments".to_string());
        let delay = *self.environments_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = next(&mut self.environments.lock().unwrap());
        outcome
    }

    async fn status(&self, namespace: &Namespace) -> Result<StatusReport, ApiError> {
        self.log(format!("status:{}", namespace));
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = match self.statuses.lock().unwrap().get_mut(namespace.as_str()) {
            Some(queue) => next(queue),
            None => Err(ApiError::api(404, "not found")),
        };
        outcome
    }

    async fn create(&self, request: &CreateRequest) -> Result<Value, ApiError> {
        self.log(format!("create:{}", request.namespace));
        Ok(json!({ "namespace": request.namespace.as_str() }))
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteAck, ApiError> {
        self.log(format!("execute:{}", request.namespace));
        Ok(ExecuteAck {
            unit: Some(format!("run-{}.service", request.namespace)),
        })
    }

    async fn output(&self, namespace: &Namespace) -> Result<String, ApiError> {
        self.log(format!("output:{}", namespace));
        Ok(String::new())
    }

    async fn terminate(&self, namespace: &Namespace) -> Result<Value, ApiError> {
        self.log(format!("terminate:{}", namespace));
        self.statuses.lock().unwrap().remove(namespace.as_str());
        Ok(json!({ "message": format!("{} terminated", namespace) }))
    }
}
