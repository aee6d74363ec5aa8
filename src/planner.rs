use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    metrics,
    models::{Dimension, QueryRange, ResolvedInstance, Target},
    variables::{TemplateValue, VariableResolver},
};

/// One monitoring request, with the instances it asks for in payload order.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub metric_name: String,
    pub region: String,
    pub instances: Vec<ResolvedInstance>,
    pub dimensions: Vec<Vec<Dimension>>,
    pub payload: Value,
}

/// Dimension per template key, in template order. Missing fields become empty values.
pub fn build_dimensions(template: &Map<String, Value>, instance: &ResolvedInstance) -> Vec<Dimension> {
    template
        .keys()
        .map(|name| Dimension {
            name: name.clone(),
            value: instance.field_string(name).unwrap_or_default(),
        })
        .collect()
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parses each literal; a literal that fails to parse is left out of the batch.
pub fn parse_instances(literals: Vec<String>) -> Vec<ResolvedInstance> {
    literals
        .into_iter()
        .filter_map(|literal| match ResolvedInstance::parse(&literal) {
            Ok(instance) => Some(instance),
            Err(e) => {
                metrics::record_skipped_instance();
                warn!("Skipping instance {:?}: {}", literal, e);
                None
            }
        })
        .collect()
}

pub struct QueryPlanner<'a> {
    resolver: &'a VariableResolver<'a>,
    range: QueryRange,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(resolver: &'a VariableResolver<'a>, range: QueryRange) -> Self {
        Self { resolver, range }
    }

    /// One request per usable target. Hidden or incomplete targets, and those
    /// whose region or instance resolves to nothing, are skipped silently.
    pub fn plan(&self, targets: &[Target]) -> Vec<PlannedQuery> {
        targets.iter().filter_map(|target| self.plan_target(target)).collect()
    }

    fn plan_target(&self, target: &Target) -> Option<PlannedQuery> {
        if target.hidden || target.namespace.is_empty() || target.metric_name.is_empty() {
            return None;
        }

        let region = match self.resolver.resolve(&target.region_expr, false) {
            TemplateValue::Scalar(region) if !region.is_empty() => region,
            _ => return None,
        };

        let literals = self.resolver.resolve(&target.instance_expr, true);
        if literals.is_empty() {
            return None;
        }

        let instances = parse_instances(literals.into_vec());
        if instances.is_empty() {
            debug!("No usable instances for {}", target.metric_name);
            return None;
        }

        let dimensions: Vec<Vec<Dimension>> = instances
            .iter()
            .map(|instance| build_dimensions(&target.dimension_object, instance))
            .collect();

        let payload = json!({
            "StartTime": format_time(&self.range.from),
            "EndTime": format_time(&self.range.to),
            "Period": target.effective_period(),
            "Namespace": target.namespace,
            "MetricName": target.metric_name,
            "Instances": dimensions
                .iter()
                .map(|dims| json!({ "Dimensions": dims }))
                .collect::<Vec<_>>(),
        });

        Some(PlannedQuery {
            metric_name: target.metric_name.clone(),
            region,
            instances,
            dimensions,
            payload,
        })
    }
}
