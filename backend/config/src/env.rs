//! `${VAR}` substitution in config values.
//!
//! Only uppercase `[A-Z_][A-Z0-9_]*` names are recognised. `$${VAR}` is an
//! escape and yields the literal text `${VAR}`. A referenced variable that is
//! unset or empty is an error naming the config path it appeared at.

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

/// Group 1 is the escape marker, group 2 the variable name.
static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env pattern"));

#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute references using the process environment.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    Ok(substitute(value, env, "")?)
}

fn substitute(
    value: &Value,
    env: &HashMap<String, String>,
    path: &str,
) -> std::result::Result<Value, MissingEnvVarError> {
    Ok(match value {
        Value::String(s) => Value::String(substitute_str(s, env, path)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| substitute(v, env, &format!("{path}[{i}]")))
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                out.insert(key.clone(), substitute(v, env, &child)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

fn substitute_str(
    s: &str,
    env: &HashMap<String, String>,
    path: &str,
) -> std::result::Result<String, MissingEnvVarError> {
    if !s.contains("${") {
        return Ok(s.to_string());
    }
    let mut missing: Option<MissingEnvVarError> = None;
    let replaced = ENV_REFERENCE.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(v) if !v.is_empty() => v.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });
    match missing {
        Some(err) => Err(err),
        None => Ok(replaced.into_owned()),
    }
}

/// Every variable name referenced in `value`, sorted and deduplicated.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    let mut vars = Vec::new();
    collect(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

fn collect(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            ENV_REFERENCE
                .captures_iter(s)
                .filter(|caps| caps[1].is_empty())
                .map(|caps| caps[2].to_string()),
        ),
        Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect(v, out)),
        _ => {}
    }
}
