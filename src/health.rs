use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    client::{envelope_error, ApiClient},
    models::{HealthState, HealthStatus},
    product::Product,
    sign::SignatureScheme,
    transport::TransportError,
    ConnectorError,
};

pub const PROBE_REGION: &str = "ap-guangzhou";

/// Checks credentials and connectivity against every service the product uses.
pub struct HealthProbe<'a> {
    client: &'a ApiClient,
    product: &'a Product,
}

impl<'a> HealthProbe<'a> {
    pub fn new(client: &'a ApiClient, product: &'a Product) -> Self {
        Self { client, product }
    }

    pub async fn run(&self) -> HealthStatus {
        let product = self.product;
        let mut listing_payload = serde_json::Map::new();
        listing_payload.insert(product.offset_param.to_string(), json!(0));
        listing_payload.insert(product.limit_param.to_string(), json!(1));

        let (regions, metrics, listing) = futures::join!(
            self.client
                .call(SignatureScheme::V3, "cvm", "DescribeRegions", "", json!({})),
            self.client.call(
                SignatureScheme::V3,
                "monitor",
                "DescribeBaseMetrics",
                PROBE_REGION,
                json!({ "Namespace": product.namespace }),
            ),
            self.client.call(
                product.listing_scheme,
                product.listing_service,
                product.listing_action,
                PROBE_REGION,
                Value::Object(listing_payload),
            ),
        );

        match (regions, metrics, listing) {
            (Ok(regions), Ok(metrics), Ok(listing)) => aggregate(
                product,
                &[
                    (SignatureScheme::V3, regions),
                    (SignatureScheme::V3, metrics),
                    (product.listing_scheme, listing),
                ],
            ),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!("Health probe for {} failed: {}", product.name, e);
                failure_status(product, &e)
            }
        }
    }
}

/// Reports every distinct auth failure among the probe responses, or success.
pub fn aggregate(product: &Product, responses: &[(SignatureScheme, Value)]) -> HealthStatus {
    let mut messages: Vec<String> = Vec::new();
    for (scheme, envelope) in responses {
        if let Some(ConnectorError::Authentication { code, message }) = envelope_error(*scheme, envelope) {
            let line = format!("{}: {}", code, message);
            if !messages.contains(&line) {
                messages.push(line);
            }
        }
    }

    if messages.is_empty() {
        info!("Health probe for {} succeeded", product.name);
        HealthStatus {
            service: product.name.to_string(),
            status: HealthState::Success,
            message: format!("Successfully queried the {} service.", product.display_name()),
            title: Some("Success".to_string()),
            namespace: Some(product.namespace.to_string()),
        }
    } else {
        HealthStatus {
            service: product.name.to_string(),
            status: HealthState::Error,
            message: messages.join("; "),
            title: None,
            namespace: None,
        }
    }
}

fn failure_status(product: &Product, err: &ConnectorError) -> HealthStatus {
    let message = match err {
        ConnectorError::Transport(e) => connectivity_message(product, e),
        other => format!("{} service:{}", product.display_name(), other),
    };
    HealthStatus {
        service: product.name.to_string(),
        status: HealthState::Error,
        message,
        title: None,
        namespace: None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `"<PRODUCT> service:"` followed by the status text and whatever error
/// detail the rejected response carried.
pub fn connectivity_message(product: &Product, err: &TransportError) -> String {
    let mut message = format!("{} service:", product.display_name());
    if let Some(status) = err.status_text.as_deref().filter(|s| !s.is_empty()) {
        message.push_str(status);
        message.push_str("; ");
    }

    let data = err.data.as_ref().filter(|d| !d.is_null());
    let error = data.and_then(|d| d.get("error")).filter(|e| !e.is_null());
    let code = error
        .and_then(|e| e.get("code"))
        .map(value_text)
        .filter(|c| !c.is_empty());

    match (code, error, data) {
        (Some(code), Some(error), _) => {
            let detail = error.get("message").map(value_text).unwrap_or_default();
            message.push_str(&format!("{}. {}", code, detail));
        }
        (None, Some(error), _) => message.push_str(&value_text(error)),
        (_, None, Some(data)) => message.push_str(&value_text(data)),
        _ => message.push_str(&format!("Cannot connect to {} service.", product.display_name())),
    }
    message
}
