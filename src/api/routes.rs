use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    health::PROBE_REGION,
    metrics,
    models::{HealthStatus, QueryRequest, TimeSeries, VariableOption, VariableQuery},
    transport::ReqwestTransport,
    ApiClient, ConnectorConfig, ConnectorError, Datasource, Result,
};

#[derive(Clone)]
pub struct AppState {
    pub datasource: Arc<Datasource>,
}

#[derive(Debug, Deserialize)]
pub struct RegionParam {
    pub region: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/search", post(search))
        .route("/health", get(health))
        .route("/regions", get(regions))
        .route("/zones/:region", get(zones))
        .route("/metrics/base", get(base_metrics))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<Vec<TimeSeries>> {
    info!("Query with {} targets", request.targets.len());
    Json(state.datasource.query(&request).await)
}

async fn search(
    State(state): State<AppState>,
    Json(request): Json<VariableQuery>,
) -> Result<Json<Vec<VariableOption>>> {
    info!("Variable query: {}", request.action);
    Ok(Json(state.datasource.metric_find_query(&request).await?))
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.datasource.test_datasource().await)
}

async fn regions(State(state): State<AppState>) -> Result<Json<Vec<VariableOption>>> {
    Ok(Json(state.datasource.regions().await?))
}

async fn zones(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Result<Json<Vec<VariableOption>>> {
    Ok(Json(state.datasource.zones(&region).await?))
}

async fn base_metrics(
    State(state): State<AppState>,
    Query(params): Query<RegionParam>,
) -> Result<Json<Vec<Value>>> {
    let region = params.region.unwrap_or_else(|| PROBE_REGION.to_string());
    Ok(Json(state.datasource.base_metrics(&region).await?))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}

pub async fn start_server(config: ConnectorConfig) -> Result<()> {
    let transport = ReqwestTransport::new(config.request_timeout)?;
    let client = ApiClient::new(Arc::new(transport), config.credentials.clone())
        .with_proxy(config.proxy_url.clone());
    let datasource = Datasource::new(client, config.product.clone());

    let state = AppState {
        datasource: Arc::new(datasource),
    };
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting {} connector on {}", config.product.name, addr);

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        ConnectorError::Internal(format!("Failed to bind to address: {}", e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ConnectorError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::transport::testing::FakeTransport;
    use crate::{Credentials, Product};

    fn app(transport: Arc<FakeTransport>) -> Router {
        let client = ApiClient::new(transport, Credentials::new("AKID", "key"));
        router(AppState {
            datasource: Arc::new(Datasource::new(client, Product::cdb())),
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_auth_failure() {
        let transport = Arc::new(FakeTransport::new(|_| {
            Ok(json!({"Response": {"Error": {"Code": "AuthFailure.SecretIdNotFound", "Message": "unknown id"}}}))
        }));
        let response = app(transport)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "service": "cdb",
                "status": "error",
                "message": "AuthFailure.SecretIdNotFound: unknown id"
            })
        );
    }

    #[tokio::test]
    async fn query_with_no_runnable_targets_is_empty() {
        let transport = Arc::new(FakeTransport::new(|_| Ok(json!({}))));
        let request = json!({
            "range": {"from": "2024-03-01T00:00:00Z", "to": "2024-03-01T01:00:00Z"},
            "targets": [{"namespace": "QCE/CDB", "metricName": "CpuUseRate", "region": "", "instance": "x"}]
        });
        let response = app(transport.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn search_errors_map_to_status_codes() {
        let transport = Arc::new(FakeTransport::new(|_| {
            Err(crate::transport::TransportError::new("Bad Gateway"))
        }));
        let response = app(transport)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/search")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"action":"DescribeRegions"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
