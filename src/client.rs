use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    config::Credentials,
    endpoint::{EndpointResolver, ServiceEndpoint},
    metrics,
    sign::{SignatureContext, SignatureScheme},
    transport::{HttpRequest, Transport},
    ConnectorError, Result,
};

/// Signs and sends API calls for one set of credentials.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    endpoints: EndpointResolver,
    proxy_url: Option<String>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            endpoints: EndpointResolver::new(),
            proxy_url: None,
        }
    }

    pub fn with_proxy(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url;
        self
    }

    fn url_for(&self, scheme: SignatureScheme, endpoint: &ServiceEndpoint) -> String {
        match (&self.proxy_url, scheme) {
            (Some(proxy), _) => format!("{}{}", proxy, endpoint.path),
            (None, SignatureScheme::V3) => format!("https://{}/", endpoint.host),
            (None, SignatureScheme::V2) => format!("https://{}{}", endpoint.host, endpoint.path),
        }
    }

    /// Builds the signed request. Timestamp and nonce are fixed here.
    pub fn build_request(
        &self,
        scheme: SignatureScheme,
        service: &str,
        action: &str,
        region: &str,
        payload: Value,
    ) -> Result<HttpRequest> {
        let endpoint = self.endpoints.resolve(region, service)?;
        let nonce = rand::thread_rng().gen_range(1..u32::MAX);
        let ctx = SignatureContext::new(
            &self.credentials,
            &endpoint,
            action,
            region,
            payload,
            Utc::now().timestamp(),
            nonce,
        );
        let signed = scheme.sign(&ctx)?;

        Ok(HttpRequest {
            method: "POST",
            url: self.url_for(scheme, &endpoint),
            headers: signed.headers,
            query: signed.query,
            body: signed.body,
        })
    }

    /// Returns the response envelope: `Response` for v3, the whole body for v2.
    /// Errors reported inside the envelope are returned as data.
    pub async fn call(
        &self,
        scheme: SignatureScheme,
        service: &str,
        action: &str,
        region: &str,
        payload: Value,
    ) -> Result<Value> {
        let request = self.build_request(scheme, service, action, region, payload)?;
        debug!("Calling {} {} in '{}'", service, action, region);

        let timer = metrics::record_request(service, action);
        let response = self.transport.send(request).await;
        timer.observe_duration();

        let body = response.map_err(|e| {
            metrics::record_request_failure(service, action);
            warn!("{} {} failed in transport: {}", service, action, e);
            ConnectorError::Transport(e)
        })?;

        Ok(match scheme {
            SignatureScheme::V3 => body.get("Response").cloned().unwrap_or_else(|| json!({})),
            SignatureScheme::V2 => body,
        })
    }

    /// Like `call`, but an error envelope becomes an `Err`.
    pub async fn call_checked(
        &self,
        scheme: SignatureScheme,
        service: &str,
        action: &str,
        region: &str,
        payload: Value,
    ) -> Result<Value> {
        let envelope = self.call(scheme, service, action, region, payload).await?;
        match envelope_error(scheme, &envelope) {
            Some(err) => {
                metrics::record_request_failure(service, action);
                warn!("{} {} returned an error: {}", service, action, err);
                Err(err)
            }
            None => Ok(envelope),
        }
    }
}

/// Error carried inside a response envelope, if any.
///
/// v3 envelopes carry `Error.Code`/`Error.Message` and signal bad credentials
/// with an `AuthFailure*` code. v2 envelopes carry a numeric `code` (0 on
/// success) with `codeDesc`/`message`, and auth failures are the 4xxx codes.
pub fn envelope_error(scheme: SignatureScheme, envelope: &Value) -> Option<ConnectorError> {
    match scheme {
        SignatureScheme::V3 => {
            let error = envelope.get("Error")?;
            let code = error.get("Code").and_then(Value::as_str).unwrap_or_default();
            if code.is_empty() {
                return None;
            }
            let message = error
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if code.contains("AuthFailure") {
                Some(ConnectorError::Authentication { code: code.to_string(), message })
            } else {
                Some(ConnectorError::Api { code: code.to_string(), message })
            }
        }
        SignatureScheme::V2 => {
            let code = match envelope.get("code")? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            if code.is_empty() || code == "0" {
                return None;
            }
            let message = envelope
                .get("codeDesc")
                .or_else(|| envelope.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if code.starts_with('4') {
                Some(ConnectorError::Authentication { code, message })
            } else {
                Some(ConnectorError::Api { code, message })
            }
        }
    }
}
