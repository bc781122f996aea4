//! Polling and state-reconciliation client for a remote environment
//! provisioning API.

pub mod api;
pub mod cli;
pub mod core;
pub mod environments;
pub mod monitoring;
pub mod panel;
pub mod resources;
pub mod scheduler;

pub use crate::api::ApiGateway;
pub use crate::core::{ApiError, PanelConfig, PanelError, PanelEvent, PanelResult, ProvisioningApi};
pub use crate::panel::{CreateForm, Panel};
pub use crate::scheduler::{PollingScheduler, TaskHandle, TaskKey};
