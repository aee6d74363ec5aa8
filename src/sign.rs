//! Request signing for both API generations.
//!
//! `V2` signs the sorted query string with HMAC-SHA256 and carries the
//! signature, nonce and timestamp as query parameters. `V3` (TC3-HMAC-SHA256)
//! signs a canonical request with a date/service scoped key and carries the
//! result in headers. Signing is a pure function of the context: the
//! timestamp and nonce are fixed when the request is built.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::Credentials;
use crate::endpoint::ServiceEndpoint;
use crate::{ConnectorError, Result};

type HmacSha256 = Hmac<Sha256>;

const TC3_ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json";
const SIGNED_HEADERS: &str = "content-type;host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    V2,
    V3,
}

/// Everything a signature is computed from. Consumed once per request.
#[derive(Debug, Clone)]
pub struct SignatureContext {
    pub secret_id: String,
    pub secret_key: String,
    pub service_id: String,
    pub host: String,
    pub path: String,
    pub api_version: String,
    pub action: String,
    pub region: String,
    /// Unix seconds, taken at request-build time.
    pub timestamp: i64,
    /// Only used by `V2`.
    pub nonce: u32,
    pub payload: Value,
}

impl SignatureContext {
    pub fn new(
        credentials: &Credentials,
        endpoint: &ServiceEndpoint,
        action: &str,
        region: &str,
        payload: Value,
        timestamp: i64,
        nonce: u32,
    ) -> Self {
        Self {
            secret_id: credentials.secret_id.clone(),
            secret_key: credentials.secret_key.clone(),
            service_id: endpoint.service_id.clone(),
            host: endpoint.host.clone(),
            path: endpoint.path.clone(),
            api_version: endpoint.api_version.clone(),
            action: action.to_string(),
            region: region.to_string(),
            timestamp,
            nonce,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: String,
}

impl SignatureScheme {
    pub fn sign(&self, ctx: &SignatureContext) -> Result<SignedRequest> {
        match self {
            SignatureScheme::V2 => sign_v2(ctx),
            SignatureScheme::V3 => sign_v3(ctx),
        }
    }
}

fn payload_body(payload: &Value) -> Result<String> {
    match payload {
        Value::Null => Ok("{}".to_string()),
        other => Ok(serde_json::to_string(other)?),
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ConnectorError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn utc_date(timestamp: i64) -> Result<String> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .ok_or_else(|| ConnectorError::Internal(format!("Invalid signing timestamp {}", timestamp)))
}

/// Flattens a JSON payload into legacy API parameters: nested objects use
/// `a.b` keys and arrays use `a.0`, `a.1`.
fn flatten_params(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_params(&name, inner, out);
            }
        }
        Value::Array(items) => {
            for (i, inner) in items.iter().enumerate() {
                flatten_params(&format!("{}.{}", prefix, i), inner, out);
            }
        }
        Value::Null => {}
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn sign_v2(ctx: &SignatureContext) -> Result<SignedRequest> {
    let mut params = BTreeMap::new();
    flatten_params("", &ctx.payload, &mut params);
    params.insert("Action".to_string(), ctx.action.clone());
    params.insert("Nonce".to_string(), ctx.nonce.to_string());
    params.insert("SecretId".to_string(), ctx.secret_id.clone());
    params.insert("SignatureMethod".to_string(), "HmacSHA256".to_string());
    params.insert("Timestamp".to_string(), ctx.timestamp.to_string());
    if !ctx.region.is_empty() {
        params.insert("Region".to_string(), ctx.region.clone());
    }

    let query_string = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let string_to_sign = format!("POST{}{}?{}", ctx.host, ctx.path, query_string);
    let signature = BASE64.encode(hmac_sha256(ctx.secret_key.as_bytes(), string_to_sign.as_bytes())?);

    let mut query: Vec<(String, String)> = params.into_iter().collect();
    query.push(("Signature".to_string(), signature));

    Ok(SignedRequest {
        headers: vec![("Content-Type".to_string(), CONTENT_TYPE.to_string())],
        query,
        body: payload_body(&ctx.payload)?,
    })
}

pub(crate) fn canonical_request(host: &str, body: &str) -> String {
    format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        SIGNED_HEADERS,
        sha256_hex(body.as_bytes())
    )
}

fn sign_v3(ctx: &SignatureContext) -> Result<SignedRequest> {
    let body = payload_body(&ctx.payload)?;
    let date = utc_date(ctx.timestamp)?;

    let canonical = canonical_request(&ctx.host, &body);
    let credential_scope = format!("{}/{}/tc3_request", date, ctx.service_id);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        TC3_ALGORITHM,
        ctx.timestamp,
        credential_scope,
        sha256_hex(canonical.as_bytes())
    );

    let secret_date = hmac_sha256(format!("TC3{}", ctx.secret_key).as_bytes(), date.as_bytes())?;
    let secret_service = hmac_sha256(&secret_date, ctx.service_id.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        TC3_ALGORITHM, ctx.secret_id, credential_scope, SIGNED_HEADERS, signature
    );

    let mut headers = vec![
        ("Authorization".to_string(), authorization),
        ("Content-Type".to_string(), CONTENT_TYPE.to_string()),
        ("Host".to_string(), ctx.host.clone()),
        ("X-TC-Action".to_string(), ctx.action.clone()),
        ("X-TC-Timestamp".to_string(), ctx.timestamp.to_string()),
        ("X-TC-Version".to_string(), ctx.api_version.clone()),
    ];
    if !ctx.region.is_empty() {
        headers.push(("X-TC-Region".to_string(), ctx.region.clone()));
    }

    Ok(SignedRequest {
        headers,
        query: Vec::new(),
        body,
    })
}
