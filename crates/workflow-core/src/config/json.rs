use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{ConfigLoader, ConfigResult, WorkspaceConfig};
use crate::models::{CoreError, CoreErrorKind, Params};

const PARAM_KEY: &str = "$param";
const CONDITION_KEY: &str = "$if";

/// Loads entry files written as a JSON object keyed by task name.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonConfigLoader;

impl ConfigLoader for JsonConfigLoader {
    fn load(&self, path: &Path) -> ConfigResult<Option<Arc<dyn WorkspaceConfig>>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(path).map_err(|error| {
            config_error(format!("failed to read '{}': {error}", path.display()))
        })?;
        let parsed: Value = serde_json::from_str(&raw).map_err(|error| {
            config_error(format!("failed to parse '{}': {error}", path.display()))
        })?;

        match parsed {
            Value::Object(tasks) => Ok(Some(Arc::new(JsonWorkspaceConfig { tasks }))),
            other => Err(config_error(format!(
                "'{}' must contain a JSON object keyed by task name, found {}",
                path.display(),
                kind_name(&other)
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonWorkspaceConfig {
    tasks: Map<String, Value>,
}

impl JsonWorkspaceConfig {
    pub fn new(tasks: Map<String, Value>) -> Self {
        Self { tasks }
    }
}

impl WorkspaceConfig for JsonWorkspaceConfig {
    fn resolve(&self, task: &str, params: &Params) -> Option<ConfigResult<Value>> {
        self.tasks
            .get(task)
            .map(|value| resolve_value(value, params))
    }
}

/// Evaluates the parameter directives inside a task's configuration value.
///
/// * `{"$param": "name"}` becomes `params.name` (`null` when absent).
/// * `{"$if": "name", "then": a, "else": b}` picks a branch on the truthiness
///   of `params.name`; a missing branch is `null`.
/// * `${name}` inside a string is replaced by the parameter's text form.
pub fn resolve_value(value: &Value, params: &Params) -> ConfigResult<Value> {
    match value {
        Value::Object(object) if object.contains_key(PARAM_KEY) => {
            let name = directive_name(object, PARAM_KEY, &[])?;
            Ok(params.get(name).cloned().unwrap_or(Value::Null))
        }
        Value::Object(object) if object.contains_key(CONDITION_KEY) => {
            let name = directive_name(object, CONDITION_KEY, &["then", "else"])?;
            let branch = if is_truthy(params.get(name)) {
                object.get("then")
            } else {
                object.get("else")
            };
            match branch {
                Some(branch) => resolve_value(branch, params),
                None => Ok(Value::Null),
            }
        }
        Value::Object(object) => object
            .iter()
            .map(|(key, value)| Ok((key.clone(), resolve_value(value, params)?)))
            .collect::<ConfigResult<Map<String, Value>>>()
            .map(Value::Object),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, params))
            .collect::<ConfigResult<Vec<Value>>>()
            .map(Value::Array),
        Value::String(text) => interpolate(text, params).map(Value::String),
        other => Ok(other.clone()),
    }
}

fn directive_name<'a>(
    object: &'a Map<String, Value>,
    directive: &str,
    allowed: &[&str],
) -> ConfigResult<&'a str> {
    if let Some(extra) = object
        .keys()
        .find(|key| key.as_str() != directive && !allowed.contains(&key.as_str()))
    {
        return Err(config_error(format!(
            "unexpected key '{extra}' next to '{directive}'"
        )));
    }

    object
        .get(directive)
        .and_then(Value::as_str)
        .ok_or_else(|| config_error(format!("'{directive}' must name a parameter")))
}

fn interpolate(text: &str, params: &Params) -> ConfigResult<String> {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            config_error(format!("unterminated parameter reference in '{text}'"))
        })?;
        let name = after[..end].trim();
        let value = params
            .get(name)
            .ok_or_else(|| config_error(format!("unknown parameter '{name}' in '{text}'")))?;
        output.push_str(&text_form(value));
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn text_form(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn config_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::ConfigLoad, message)
}
