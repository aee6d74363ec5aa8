use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failure: {code}: {message}")]
    Authentication { code: String, message: String },

    #[error("API error: {code}: {message}")]
    Api { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Partial listing: fetched {fetched} of {total} items")]
    PartialListing { fetched: usize, total: usize },

    #[error("Malformed instance: {0}")]
    MalformedInstance(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ConnectorError::Authentication { .. })
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}

impl IntoResponse for ConnectorError {
    fn into_response(self) -> Response {
        let status = match self {
            ConnectorError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ConnectorError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ConnectorError::Api { .. } => StatusCode::BAD_GATEWAY,
            ConnectorError::Transport(_) => StatusCode::BAD_GATEWAY,
            ConnectorError::PartialListing { .. } => StatusCode::PARTIAL_CONTENT,
            ConnectorError::MalformedInstance(_) => StatusCode::BAD_REQUEST,
            ConnectorError::Serialization(_) => StatusCode::BAD_REQUEST,
            ConnectorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
