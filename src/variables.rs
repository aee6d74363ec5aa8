use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

lazy_static! {
    // ${name}, ${name:format}, [[name]], [[name:format]], $name
    static ref TOKEN: Regex =
        Regex::new(r"\$\{(\w+)(?::\w+)?\}|\[\[(\w+)(?::\w+)?\]\]|\$(\w+)").unwrap();
}

/// A resolved expression: one literal, or every value of a multi-valued variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Scalar(String),
    Multi(Vec<String>),
}

impl TemplateValue {
    pub fn is_empty(&self) -> bool {
        match self {
            TemplateValue::Scalar(s) => s.is_empty(),
            TemplateValue::Multi(values) => values.is_empty(),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            TemplateValue::Scalar(s) => vec![s],
            TemplateValue::Multi(values) => values,
        }
    }

    fn joined(&self) -> String {
        match self {
            TemplateValue::Scalar(s) => s.clone(),
            TemplateValue::Multi(values) => values.join(","),
        }
    }

    /// Accepts a bare string, an array of strings, or a `{text, value}` object.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(TemplateValue::Scalar(s.clone())),
            Value::Array(items) => Some(TemplateValue::Multi(
                items.iter().filter_map(json_literal).collect(),
            )),
            Value::Object(map) => map.get("value").and_then(TemplateValue::from_json),
            Value::Null => None,
            other => Some(TemplateValue::Scalar(other.to_string())),
        }
    }
}

fn json_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// The dashboard's variable store.
pub trait TemplateSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<TemplateValue>;
}

/// In-memory variable store.
#[derive(Debug, Clone, Default)]
pub struct TemplateVariables {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: TemplateValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }
}

impl TemplateSource for TemplateVariables {
    fn lookup(&self, name: &str) -> Option<TemplateValue> {
        self.values.get(name).cloned()
    }
}

/// Resolves template tokens, preferring request-scoped values over the store.
pub struct VariableResolver<'a> {
    store: &'a dyn TemplateSource,
    scoped: &'a BTreeMap<String, Value>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(store: &'a dyn TemplateSource, scoped: &'a BTreeMap<String, Value>) -> Self {
        Self { store, scoped }
    }

    fn lookup(&self, name: &str) -> Option<TemplateValue> {
        self.scoped
            .get(name)
            .and_then(TemplateValue::from_json)
            .or_else(|| self.store.lookup(name))
    }

    /// With `multiple`, an expression that is exactly one multi-valued token
    /// yields every value. Everything else is substituted into one literal.
    pub fn resolve(&self, expression: &str, multiple: bool) -> TemplateValue {
        let expression = expression.trim();

        if multiple {
            if let Some(caps) = TOKEN.captures(expression) {
                let whole = caps.get(0).map(|m| m.as_str()) == Some(expression);
                if whole {
                    if let Some(value @ TemplateValue::Multi(_)) = self.lookup(token_name(&caps)) {
                        return value;
                    }
                }
            }
        }

        let replaced = TOKEN.replace_all(expression, |caps: &Captures| {
            match self.lookup(token_name(caps)) {
                Some(value) => value.joined(),
                None => caps[0].to_string(),
            }
        });
        TemplateValue::Scalar(replaced.into_owned())
    }
}

fn token_name<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or_default()
}
