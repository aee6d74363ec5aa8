use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    client::{envelope_error, ApiClient},
    correlate::to_time_series,
    health::HealthProbe,
    metrics,
    models::{
        HealthStatus, MetricSeries, QueryRequest, ResolvedInstance, TimeSeries, VariableOption,
        VariableQuery, ALIAS_VALUE_FIELD,
    },
    pagination::PaginatedLister,
    planner::{PlannedQuery, QueryPlanner},
    product::Product,
    sign::SignatureScheme,
    variables::{TemplateSource, TemplateValue, TemplateVariables, VariableResolver},
    Result,
};

/// Dashboard-facing operations for one product.
pub struct Datasource {
    client: ApiClient,
    product: Product,
    variables: Arc<dyn TemplateSource>,
}

impl Datasource {
    pub fn new(client: ApiClient, product: Product) -> Self {
        Self {
            client,
            product,
            variables: Arc::new(TemplateVariables::new()),
        }
    }

    pub fn with_variables(mut self, variables: Arc<dyn TemplateSource>) -> Self {
        self.variables = variables;
        self
    }

    /// Never fails. An auth or transport failure on any target yields an
    /// empty result.
    pub async fn query(&self, request: &QueryRequest) -> Vec<TimeSeries> {
        let resolver = VariableResolver::new(self.variables.as_ref(), &request.scoped_vars);
        let planned = QueryPlanner::new(&resolver, request.range).plan(&request.targets);
        if planned.is_empty() {
            debug!("No runnable targets in query");
            return Vec::new();
        }

        info!("Submitting {} monitoring requests", planned.len());
        let responses = join_all(planned.into_iter().map(|query| self.monitor_data(query))).await;

        let mut series = Vec::new();
        for response in responses {
            match response {
                Ok(batch) => series.extend(batch),
                Err(e) => {
                    warn!("Query failed, returning no data: {}", e);
                    return Vec::new();
                }
            }
        }
        series
    }

    /// Auth and transport failures are errors. Any other error envelope only
    /// costs this target its datapoints.
    async fn monitor_data(&self, query: PlannedQuery) -> Result<Vec<TimeSeries>> {
        let response = self
            .client
            .call(
                SignatureScheme::V3,
                "monitor",
                "GetMonitorData",
                &query.region,
                query.payload.clone(),
            )
            .await?;

        let series = match envelope_error(SignatureScheme::V3, &response) {
            Some(err) if err.is_auth_failure() => return Err(err),
            Some(err) => {
                metrics::record_request_failure("monitor", "GetMonitorData");
                warn!("No data for {} in '{}': {}", query.metric_name, query.region, err);
                Vec::new()
            }
            None => MetricSeries::list_from_response(&response)?,
        };
        Ok(to_time_series(query, series))
    }

    fn resolve_scalar(&self, expression: &str) -> String {
        let scoped = BTreeMap::new();
        match VariableResolver::new(self.variables.as_ref(), &scoped).resolve(expression, false) {
            TemplateValue::Scalar(value) => value,
            TemplateValue::Multi(values) => values.join(","),
        }
    }

    /// Options for a dashboard variable picker.
    pub async fn metric_find_query(&self, query: &VariableQuery) -> Result<Vec<VariableOption>> {
        if query.action.eq_ignore_ascii_case("DescribeRegions") {
            return self.regions().await;
        }

        if self.product.is_listing_action(&query.action) {
            let region = self.resolve_scalar(query.region.as_deref().unwrap_or_default());
            if region.is_empty() {
                return Ok(Vec::new());
            }
            let items = PaginatedLister::new(&self.client, &self.product)
                .list_all(&region, self.product.first_page_size)
                .await?;
            let alias = self.product.alias_field(query.instance_alias.as_deref());
            return instance_options(items, alias);
        }

        Ok(Vec::new())
    }

    pub async fn regions(&self) -> Result<Vec<VariableOption>> {
        let response = self
            .client
            .call_checked(SignatureScheme::V3, "cvm", "DescribeRegions", "", json!({}))
            .await?;
        Ok(available_options(&response, "RegionSet", "RegionState", "RegionName", "Region"))
    }

    pub async fn zones(&self, region: &str) -> Result<Vec<VariableOption>> {
        let response = self
            .client
            .call_checked(SignatureScheme::V3, "cvm", "DescribeZones", region, json!({}))
            .await?;
        Ok(available_options(&response, "ZoneSet", "ZoneState", "ZoneName", "ZoneId"))
    }

    /// Metric catalog entries for this product's namespace.
    pub async fn base_metrics(&self, region: &str) -> Result<Vec<Value>> {
        let response = self
            .client
            .call_checked(
                SignatureScheme::V3,
                "monitor",
                "DescribeBaseMetrics",
                region,
                json!({ "Namespace": self.product.namespace }),
            )
            .await?;

        Ok(response
            .get("MetricSet")
            .and_then(Value::as_array)
            .map(|set| {
                set.iter()
                    .filter(|item| {
                        item.get("Namespace").and_then(Value::as_str) == Some(self.product.namespace)
                            && item
                                .get("MetricName")
                                .and_then(Value::as_str)
                                .map_or(false, |name| !name.is_empty())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn test_datasource(&self) -> HealthStatus {
        HealthProbe::new(&self.client, &self.product).run().await
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn available_options(
    response: &Value,
    set_field: &str,
    state_field: &str,
    text_field: &str,
    value_field: &str,
) -> Vec<VariableOption> {
    response
        .get(set_field)
        .and_then(Value::as_array)
        .map(|set| {
            set.iter()
                .filter(|item| item.get(state_field).and_then(Value::as_str) == Some("AVAILABLE"))
                .filter_map(|item| {
                    Some(VariableOption {
                        text: item.get(text_field).and_then(text_of)?,
                        value: item.get(value_field).and_then(text_of)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// One option per alias value. An array-valued alias yields one option per
/// element; each option carries the whole instance with the chosen alias.
pub fn instance_options(items: Vec<ResolvedInstance>, alias: &str) -> Result<Vec<VariableOption>> {
    let mut options = Vec::new();
    for mut item in items {
        let values: Vec<String> = match item.get(alias) {
            Some(Value::Array(values)) => values.iter().filter_map(text_of).collect(),
            Some(value) => text_of(value).into_iter().collect(),
            None => Vec::new(),
        };
        for value in values {
            item.set(ALIAS_VALUE_FIELD, Value::String(value.clone()));
            options.push(VariableOption {
                text: value,
                value: item.to_literal()?,
            });
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::Credentials;
    use crate::models::{QueryRange, Target};
    use crate::transport::testing::{action_of, FakeTransport};
    use crate::transport::{HttpRequest, TransportError};

    fn datasource(transport: Arc<FakeTransport>, product: Product) -> Datasource {
        let variables = TemplateVariables::new()
            .with("region", TemplateValue::Scalar("ap-guangzhou".to_string()))
            .with(
                "instance",
                TemplateValue::Multi(vec![
                    r#"{"InstanceId":"cdb-1","_InstanceAliasValue":"orders"}"#.to_string(),
                    r#"{"InstanceId":"cdb-2"}"#.to_string(),
                ]),
            );
        Datasource::new(ApiClient::new(transport, Credentials::new("AKID", "key")), product)
            .with_variables(Arc::new(variables))
    }

    fn request(targets: Vec<Target>) -> QueryRequest {
        QueryRequest {
            range: QueryRange {
                from: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                to: Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap(),
            },
            targets,
            scoped_vars: BTreeMap::new(),
        }
    }

    fn target(metric: &str) -> Target {
        let mut dimension_object = serde_json::Map::new();
        dimension_object.insert("InstanceId".to_string(), Value::Null);
        Target {
            namespace: "QCE/CDB".to_string(),
            metric_name: metric.to_string(),
            region_expr: "$region".to_string(),
            instance_expr: "$instance".to_string(),
            dimension_object,
            period: 300,
            ..Target::default()
        }
    }

    fn monitor_reply(request: &HttpRequest) -> std::result::Result<Value, TransportError> {
        let body: Value = serde_json::from_str(&request.body).unwrap();
        if body["MetricName"] == "Broken" {
            return Ok(json!({"Response": {"Error": {"Code": "AuthFailure", "Message": "no"}}}));
        }
        if body["MetricName"] == "NoSuchMetric" {
            return Ok(json!({"Response": {"Error": {"Code": "InvalidParameter", "Message": "unknown metric"}}}));
        }
        // only one series back for two instances
        Ok(json!({"Response": {"DataPoints": [
            {"Timestamps": [1709251200, 1709251500], "Values": [1.5, 2.5]}
        ]}}))
    }

    #[tokio::test]
    async fn query_correlates_series_to_instances() {
        let transport = Arc::new(FakeTransport::new(monitor_reply));
        let ds = datasource(transport.clone(), Product::cdb());

        let series = ds.query(&request(vec![target("CpuUseRate")])).await;
        assert_eq!(
            series,
            vec![
                TimeSeries {
                    target: "orders - CpuUseRate".to_string(),
                    datapoints: vec![(1.5, 1_709_251_200_000), (2.5, 1_709_251_500_000)],
                },
                TimeSeries {
                    target: "cdb-2 - CpuUseRate".to_string(),
                    datapoints: vec![],
                },
            ]
        );
        assert_eq!(transport.actions(), vec!["GetMonitorData"]);
    }

    #[tokio::test]
    async fn hidden_targets_make_no_calls() {
        let transport = Arc::new(FakeTransport::new(monitor_reply));
        let ds = datasource(transport.clone(), Product::cdb());
        let hidden = Target { hidden: true, ..target("CpuUseRate") };

        assert!(ds.query(&request(vec![hidden])).await.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn auth_failure_on_any_target_empties_the_result() {
        let transport = Arc::new(FakeTransport::new(monitor_reply));
        let ds = datasource(transport.clone(), Product::cdb());

        let series = ds
            .query(&request(vec![target("CpuUseRate"), target("Broken")]))
            .await;
        assert!(series.is_empty());
        assert_eq!(transport.request_count(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn api_error_only_blanks_its_own_target() {
        let transport = Arc::new(FakeTransport::new(monitor_reply));
        let ds = datasource(transport.clone(), Product::cdb());

        let series = ds
            .query(&request(vec![target("CpuUseRate"), target("NoSuchMetric")]))
            .await;
        assert_eq!(transport.request_count(), 2);
        assert_eq!(series.len(), 4);
        assert_eq!(series[0].target, "orders - CpuUseRate");
        assert_eq!(series[0].datapoints, vec![(1.5, 1_709_251_200_000), (2.5, 1_709_251_500_000)]);
        assert_eq!(series[2].target, "orders - NoSuchMetric");
        assert!(series[2].datapoints.is_empty());
        assert!(series[3].datapoints.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_empties_the_result() {
        let transport = Arc::new(FakeTransport::new(|request| {
            let body: Value = serde_json::from_str(&request.body).unwrap();
            if body["MetricName"] == "CpuUseRate" {
                return Err(TransportError::new("Gateway Timeout"));
            }
            monitor_reply(request)
        }));
        let ds = datasource(transport, Product::cdb());

        let series = ds
            .query(&request(vec![target("CpuUseRate"), target("MemoryUse")]))
            .await;
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn regions_keep_only_available() {
        let transport = Arc::new(FakeTransport::new(|_| {
            Ok(json!({"Response": {"RegionSet": [
                {"Region": "ap-guangzhou", "RegionName": "Guangzhou", "RegionState": "AVAILABLE"},
                {"Region": "ap-old", "RegionName": "Old", "RegionState": "UNAVAILABLE"}
            ]}}))
        }));
        let ds = datasource(transport, Product::cdb());

        let options = ds
            .metric_find_query(&VariableQuery {
                action: "describeregions".to_string(),
                ..VariableQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(
            options,
            vec![VariableOption {
                text: "Guangzhou".to_string(),
                value: "ap-guangzhou".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn instance_variable_lists_and_expands_aliases() {
        let transport = Arc::new(FakeTransport::new(|request| {
            assert_eq!(action_of(request), "DescribeDBInstances");
            assert_eq!(request.header("X-TC-Region"), Some("ap-guangzhou"));
            Ok(json!({"Response": {"TotalCount": 2, "Items": [
                {"InstanceId": "cdb-1", "InstanceName": "orders"},
                {"InstanceId": "cdb-2", "InstanceName": ""}
            ]}}))
        }));
        let ds = datasource(transport, Product::cdb());

        let options = ds
            .metric_find_query(&VariableQuery {
                action: "DescribeDBInstances".to_string(),
                region: Some("$region".to_string()),
                instance_alias: Some("InstanceName".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].text, "orders");
        let chosen = ResolvedInstance::parse(&options[0].value).unwrap();
        assert_eq!(chosen.alias_value().as_deref(), Some("orders"));
        assert_eq!(chosen.field_string("InstanceId").as_deref(), Some("cdb-1"));
    }

    #[tokio::test]
    async fn unknown_variable_action_is_empty() {
        let transport = Arc::new(FakeTransport::new(|_| Ok(json!({}))));
        let ds = datasource(transport.clone(), Product::cdb());
        let options = ds
            .metric_find_query(&VariableQuery {
                action: "DescribeSomethingElse".to_string(),
                ..VariableQuery::default()
            })
            .await
            .unwrap();
        assert!(options.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn array_alias_yields_one_option_per_element() {
        let item = ResolvedInstance::parse(r#"{"InstanceId":"cdb-1","Vips":["10.0.0.1","10.0.0.2"]}"#).unwrap();
        let options = instance_options(vec![item], "Vips").unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].text, "10.0.0.2");
        let second = ResolvedInstance::parse(&options[1].value).unwrap();
        assert_eq!(second.alias_value().as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn base_metrics_are_filtered_to_namespace() {
        let transport = Arc::new(FakeTransport::new(|_| {
            Ok(json!({"Response": {"MetricSet": [
                {"Namespace": "QCE/CDB", "MetricName": "CpuUseRate"},
                {"Namespace": "QCE/CVM", "MetricName": "CpuUsage"},
                {"Namespace": "QCE/CDB", "MetricName": ""}
            ]}}))
        }));
        let ds = datasource(transport, Product::cdb());
        let metrics = ds.base_metrics("ap-guangzhou").await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0]["MetricName"], "CpuUseRate");
    }
}
