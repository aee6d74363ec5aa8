use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::product::Product;

/// API key pair handed to every signing call. Empty values are allowed;
/// the server rejects them with an `AuthFailure` code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub secret_key: String,
}

impl Credentials {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub credentials: Credentials,
    pub product: Product,
    /// When set, requests go to `<proxy_url><endpoint path>` instead of the API host.
    pub proxy_url: Option<String>,
    pub port: u16,
    pub request_timeout: Duration,
}

impl ConnectorConfig {
    pub fn from_env() -> Self {
        let credentials = Credentials::new(
            env::var("TC_SECRET_ID").unwrap_or_default(),
            env::var("TC_SECRET_KEY").unwrap_or_default(),
        );

        let product = env::var("TC_PRODUCT")
            .ok()
            .and_then(|name| Product::by_name(&name))
            .unwrap_or_else(Product::cdb);

        let proxy_url = env::var("TC_PROXY_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let port = env::var("PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(8080);

        let request_timeout = env::var("TC_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            credentials,
            product,
            proxy_url,
            port,
            request_timeout,
        }
    }
}
