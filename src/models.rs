use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ConnectorError, Result};

/// Field set on an instance when its alias value came from an array.
pub const ALIAS_VALUE_FIELD: &str = "_InstanceAliasValue";

const DEFAULT_PERIOD: u32 = 300;

fn default_period() -> u32 {
    DEFAULT_PERIOD
}

/// One dashboard query definition. Read-only to the connector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default, rename = "region")]
    pub region_expr: String,
    #[serde(default, rename = "instance")]
    pub instance_expr: String,
    /// Dimension name -> placeholder, in dashboard order; only the keys are used.
    #[serde(default)]
    pub dimension_object: Map<String, Value>,
    #[serde(default = "default_period")]
    pub period: u32,
    #[serde(default, rename = "hide")]
    pub hidden: bool,
}

impl Target {
    /// Sampling period in seconds; zero means the default.
    pub fn effective_period(&self) -> u32 {
        if self.period == 0 {
            DEFAULT_PERIOD
        } else {
            self.period
        }
    }
}

/// A resource descriptor chosen in a variable picker, carried as JSON text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedInstance(Map<String, Value>);

impl ResolvedInstance {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn parse(literal: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(literal) {
            Ok(Value::Object(fields)) => Ok(Self(fields)),
            Ok(other) => Err(ConnectorError::MalformedInstance(format!(
                "expected a JSON object, got {}",
                other
            ))),
            Err(e) => Err(ConnectorError::MalformedInstance(e.to_string())),
        }
    }

    pub fn to_literal(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    /// Field rendered as a plain string; non-string scalars use their JSON text.
    pub fn field_string(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn alias_value(&self) -> Option<String> {
        self.field_string(ALIAS_VALUE_FIELD)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// Datapoints returned for one requested instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDataPoint {
    #[serde(default)]
    timestamps: Vec<f64>,
    #[serde(default)]
    values: Vec<Option<f64>>,
}

impl MetricSeries {
    /// Reads the `DataPoints` array of a monitoring response. Null values are
    /// dropped along with their timestamp.
    pub fn list_from_response(response: &Value) -> Result<Vec<MetricSeries>> {
        let raw = match response.get("DataPoints") {
            Some(points) => Vec::<RawDataPoint>::deserialize(points)?,
            None => Vec::new(),
        };

        Ok(raw
            .into_iter()
            .map(|point| {
                let mut series = MetricSeries::default();
                for (ts, value) in point.timestamps.into_iter().zip(point.values) {
                    if let Some(value) = value {
                        series.timestamps.push(ts as i64);
                        series.values.push(value);
                    }
                }
                series
            })
            .collect())
    }

    /// `[value, timestampMillis]` pairs.
    pub fn datapoints(&self) -> Vec<(f64, i64)> {
        self.values
            .iter()
            .zip(&self.timestamps)
            .map(|(value, ts)| (*value, ts * 1000))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub items: Vec<ResolvedInstance>,
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueryRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub range: QueryRange,
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Variable name -> current value(s).
    #[serde(default)]
    pub scoped_vars: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub target: String,
    pub datapoints: Vec<(f64, i64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableQuery {
    pub action: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, alias = "instancealias")]
    pub instance_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableOption {
    pub text: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service: String,
    pub status: HealthState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
