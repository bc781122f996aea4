use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::core::error::{ApiError, PanelError};
use crate::core::types::{
    CreateRequest, EnvironmentRecord, ExecuteAck, ExecuteRequest, Namespace, ResourceSnapshot,
    StatusReport,
};
use crate::core::ProvisioningApi;

const FALLBACK_MESSAGE: &str = "unknown error";
const OUTPUT_NOT_FOUND: &str = "output not found";

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
    DELETE,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::DELETE => reqwest::Method::DELETE,
        }
    }
}

/// Single chokepoint for every call to the provisioning service.
///
/// Outcomes are normalised into `Result<Value, ApiError>` so that failure
/// classification is identical no matter which component asked.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    base: Url,
    http_client: Client,
}

impl ApiGateway {
    pub fn new(base_url: &str) -> Result<Self, PanelError> {
        let base = Url::parse(base_url)
            .map_err(|e| PanelError::ConfigError(format!("invalid API base {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(PanelError::ConfigError(format!(
                "API base {} cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            base,
            http_client: Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Builds the URL for `segments`, percent-encoding each one.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Issues a request and decodes the body as JSON.
    pub async fn request(
        &self,
        method: HttpMethod,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let (status, text) = self.send(method, segments, body).await?;

        let (payload, decoded) = match text.trim() {
            "" => (json!({}), true),
            trimmed => match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => (value, true),
                Err(_) => (json!({ "error": trimmed }), false),
            },
        };

        if !status.is_success() {
            return Err(ApiError::api(status.as_u16(), failure_message(&payload, status)));
        }
        if !decoded {
            return Err(ApiError::decode(text));
        }
        // The service also reports some failures as `{"error": ..}` with a 2xx status.
        if let Some(message) = error_field(&payload) {
            return Err(ApiError::api(status.as_u16(), message));
        }

        Ok(payload)
    }

    /// Issues a request whose success body is plain text.
    pub async fn request_text(
        &self,
        method: HttpMethod,
        segments: &[&str],
    ) -> Result<String, ApiError> {
        let (status, text) = self.send(method, segments, None).await?;
        if status.is_success() {
            return Ok(text);
        }

        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .as_ref()
            .and_then(error_field)
            .unwrap_or_else(|| OUTPUT_NOT_FOUND.to_string());
        Err(ApiError::api(status.as_u16(), message))
    }

    async fn send(
        &self,
        method: HttpMethod,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), ApiError> {
        let url = self.endpoint(segments);
        debug!(method = ?method, url = %url, "API request");

        let mut builder = self.http_client.request(method.into(), url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::transport(e.to_string()))?;

        debug!(status = %status, bytes = text.len(), "API response");
        Ok((status, text))
    }

    async fn get_typed<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let payload = self.request(HttpMethod::GET, segments, None).await?;
        decode(payload)
    }
}

fn error_field(payload: &Value) -> Option<String> {
    payload
        .get("error")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn failure_message(payload: &Value, status: StatusCode) -> String {
    error_field(payload)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(payload).map_err(|e| ApiError::decode(e.to_string()))
}

fn to_body<T: serde::Serialize>(request: &T) -> Result<Value, ApiError> {
    serde_json::to_value(request).map_err(|e| ApiError::decode(e.to_string()))
}

#[async_trait]
impl ProvisioningApi for ApiGateway {
    async fn resources(&self) -> Result<ResourceSnapshot, ApiError> {
        self.get_typed(&["resources"]).await
    }

    async fn environments(&self) -> Result<Vec<EnvironmentRecord>, ApiError> {
        self.get_typed(&["environments"]).await
    }

    async fn status(&self, namespace: &Namespace) -> Result<StatusReport, ApiError> {
        let payload = self
            .request(HttpMethod::GET, &["status", namespace.as_str()], None)
            .await?;
        let mut report: StatusReport = decode(payload.clone())?;
        report.raw = payload;
        Ok(report)
    }

    async fn create(&self, request: &CreateRequest) -> Result<Value, ApiError> {
        let body = to_body(request)?;
        self.request(HttpMethod::POST, &["create"], Some(&body)).await
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteAck, ApiError> {
        let body = to_body(request)?;
        let payload = self.request(HttpMethod::POST, &["execute"], Some(&body)).await?;
        decode(payload)
    }

    async fn output(&self, namespace: &Namespace) -> Result<String, ApiError> {
        self.request_text(HttpMethod::GET, &["output", namespace.as_str()])
            .await
    }

    async fn terminate(&self, namespace: &Namespace) -> Result<Value, ApiError> {
        self.request(HttpMethod::DELETE, &["terminate", namespace.as_str()], None)
            .await
    }
}
