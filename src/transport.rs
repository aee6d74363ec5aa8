use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// The transport's rejection value: no usable response came back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportError {
    pub status_text: Option<String>,
    pub data: Option<Value>,
}

impl TransportError {
    pub fn new(status_text: impl Into<String>) -> Self {
        Self {
            status_text: Some(status_text.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status_text, &self.data) {
            (Some(status), Some(data)) => write!(f, "{}: {}", status, data),
            (Some(status), None) => write!(f, "{}", status),
            (None, Some(data)) => write!(f, "{}", data),
            (None, None) => write!(f, "no response"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Exact bytes that were hashed when the request was signed.
    pub body: String,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Sends a request and returns the parsed JSON body, or rejects.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<Value, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> std::result::Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::new(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<Value, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::new(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .query(&request.query)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status();
        debug!("{} -> {}", request.url, status);
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let status_text = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            let data = body.unwrap_or(Value::String(text));
            return Err(TransportError::new(status_text).with_data(data));
        }

        body.ok_or_else(|| TransportError::new("Response body is not valid JSON").with_data(Value::String(text)))
    }
}
