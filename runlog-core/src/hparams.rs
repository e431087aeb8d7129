//! Hyperparameter flattening.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, RunlogError};

/// A single flattened hyperparameter value as the event writer stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum HParamValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl From<&Value> for HParamValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => HParamValue::Bool(*b),
            Value::Number(n) => n
                .as_f64()
                .map(HParamValue::Number)
                .unwrap_or_else(|| HParamValue::Text(n.to_string())),
            Value::String(s) => HParamValue::Text(s.clone()),
            // Lists and nulls have no hparam type of their own.
            other => HParamValue::Text(other.to_string()),
        }
    }
}

/// Everything the writer needs to emit the hyperparameter records of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct HParamsRecord {
    pub hparams: Vec<(String, HParamValue)>,
    /// Metric names pre-declared with no value yet.
    pub metrics: Vec<String>,
    pub run_name: String,
}

/// Serialize `hparams` and require a mapping at the top level.
pub fn to_mapping<T: Serialize + ?Sized>(hparams: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(hparams)? {
        Value::Object(map) => Ok(map),
        other => Err(RunlogError::invalid_argument(format!(
            "hyperparameters must be a mapping, got {}",
            value_kind(&other)
        ))),
    }
}

/// Flatten nested mappings into `.`-joined key paths, keeping key order.
///
/// `{"a": {"b": 1, "c": {"d": 2}}}` becomes `{"a.b": 1, "a.c.d": 2}`. An empty
/// nested mapping has no leaves and contributes nothing. Two leaves landing on
/// the same path (`{"a.b": 1, "a": {"b": 2}}`) are rejected.
pub fn flatten(map: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    flatten_into(&mut out, None, map)?;
    Ok(out)
}

fn flatten_into(
    out: &mut Map<String, Value>,
    parent: Option<&str>,
    map: &Map<String, Value>,
) -> Result<()> {
    for (key, value) in map {
        let path = match parent {
            Some(parent) => format!("{parent}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&path), inner)?,
            leaf => {
                if out.contains_key(&path) {
                    return Err(RunlogError::invalid_argument(format!(
                        "hyperparameter key '{path}' appears both as a dotted key and a nested path"
                    )));
                }
                out.insert(path, leaf.clone());
            }
        }
    }
    Ok(())
}

/// Build the hyperparameter record from already flattened hparams plus the
/// synthetic `datetime` field, and de-duplicated expected metric names.
pub fn build_record(
    flat_hparams: &Map<String, Value>,
    datetime: &str,
    expected_metrics: &[&str],
    run_name: &str,
) -> HParamsRecord {
    let mut flat = flat_hparams.clone();
    flat.insert("datetime".to_string(), Value::String(datetime.to_string()));

    let mut metrics: Vec<String> = Vec::with_capacity(expected_metrics.len());
    for name in expected_metrics {
        if !metrics.iter().any(|m| m == name) {
            metrics.push(name.to_string());
        }
    }

    HParamsRecord {
        hparams: flat
            .iter()
            .map(|(k, v)| (k.clone(), HParamValue::from(v)))
            .collect(),
        metrics,
        run_name: run_name.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
