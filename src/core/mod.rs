pub mod config;
pub mod error;
pub mod events;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use config::PanelConfig;
pub use error::{ApiError, ErrorKind, PanelError, PanelResult, Visibility};
pub use events::{EventBus, PanelEvent};

use async_trait::async_trait;

use types::{
    CreateRequest, EnvironmentRecord, ExecuteAck, ExecuteRequest, Namespace, ResourceSnapshot,
    StatusReport,
};

/// Typed operations of the remote provisioning service.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn resources(&self) -> Result<ResourceSnapshot, ApiError>;
    async fn environments(&self) -> Result<Vec<EnvironmentRecord>, ApiError>;
    async fn status(&self, namespace: &Namespace) -> Result<StatusReport, ApiError>;
    async fn create(&self, request: &CreateRequest) -> Result<serde_json::Value, ApiError>;
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteAck, ApiError>;
    async fn output(&self, namespace: &Namespace) -> Result<String, ApiError>;
    async fn terminate(&self, namespace: &Namespace) -> Result<serde_json::Value, ApiError>;
}
