//! Flattening nested hyperparameters into dotted keys

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};

/// Flatten a nested parameter mapping into `section.key` → string
///
/// Mappings recurse; sequences and scalars are leaves. The children of any
/// mapping whose dotted path contains one of `skip_sections` are dropped.
///
/// ```
/// use serde_json::json;
/// use mlexptools::config::flatten_params;
///
/// let params = json!({
///     "optimizer": {"name": "sgd", "lr": 0.1},
///     "augmentation": {"flip": true},
///     "epochs": 10,
/// });
/// let flat = flatten_params(&params, &["augmentation".to_string()]).unwrap();
///
/// assert_eq!(flat["optimizer.lr"], "0.1");
/// assert_eq!(flat["epochs"], "10");
/// assert!(!flat.contains_key("augmentation.flip"));
/// ```
pub fn flatten_params(
    params: &Value,
    skip_sections: &[String],
) -> Result<BTreeMap<String, String>> {
    let Value::Object(sections) = params else {
        return Err(Error::InvalidInput(format!(
            "params must be a mapping, got {}",
            kind_of(params)
        )));
    };

    let mut flat = BTreeMap::new();
    for (name, element) in sections {
        explore(name, element, skip_sections, &mut flat);
    }
    Ok(flat)
}

fn explore(path: &str, element: &Value, skip_sections: &[String], out: &mut BTreeMap<String, String>) {
    match element {
        Value::Object(children) => {
            if skip_sections.iter().any(|section| path.contains(section.as_str())) {
                return;
            }
            for (key, child) in children {
                explore(&format!("{path}.{key}"), child, skip_sections, out);
            }
        }
        leaf => {
            out.insert(path.to_string(), render(leaf));
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
