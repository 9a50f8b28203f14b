// src/expressions.rs

//! `<+...>` expression resolution over step parameters.
//!
//! Supported paths:
//!
//! - `<+setup.KEY>`: a setup abstraction
//! - `<+plan.executionId>`
//! - `<+node.identifier>` / `<+node.id>` (the node execution id)
//! - `<+steps.IDENTIFIER.outcome.KEY[.FIELD...]>`: an outcome of an earlier
//!   node of the same plan
//!
//! A string that is exactly one expression is replaced by the referenced
//! JSON value as is; expressions embedded in longer strings are substituted
//! with their string form. Anything that does not resolve is left verbatim.

use std::collections::{BTreeMap, HashMap};

use regex::{Captures, Regex};
use serde_json::Value;

use crate::errors::{EngineError, Result};

/// Values expressions may refer to.
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    pub plan_execution_id: String,
    pub setup_abstractions: BTreeMap<String, String>,
    pub node_identifier: String,
    pub node_execution_id: String,
    /// Outcomes of addressable nodes, keyed by identifier.
    pub steps: HashMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct ExpressionResolver {
    pattern: Regex,
}

impl ExpressionResolver {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"<\+([A-Za-z0-9_.\-]+)>")
            .map_err(|e| EngineError::Other(anyhow::Error::new(e)))?;
        Ok(Self { pattern })
    }

    /// Resolve every string inside `value`, recursively.
    pub fn resolve(&self, value: &Value, ctx: &ExpressionContext) -> Value {
        match value {
            Value::String(s) => self.resolve_str(s, ctx),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve(v, ctx)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v, ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_str(&self, s: &str, ctx: &ExpressionContext) -> Value {
        if let Some(caps) = self.pattern.captures(s) {
            let whole = caps.get(0).map(|m| m.as_str().len()).unwrap_or_default();
            if whole == s.len() {
                return lookup(&caps[1], ctx).unwrap_or_else(|| Value::String(s.to_string()));
            }
        }

        let replaced = self.pattern.replace_all(s, |caps: &Captures<'_>| {
            match lookup(&caps[1], ctx) {
                Some(Value::String(v)) => v,
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        });
        Value::String(replaced.into_owned())
    }
}

fn lookup(path: &str, ctx: &ExpressionContext) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    match parts.as_slice() {
        ["setup", key] => ctx
            .setup_abstractions
            .get(*key)
            .map(|v| Value::String(v.clone())),
        ["plan", "executionId"] => Some(Value::String(ctx.plan_execution_id.clone())),
        ["node", "identifier"] => Some(Value::String(ctx.node_identifier.clone())),
        ["node", "id"] => Some(Value::String(ctx.node_execution_id.clone())),
        ["steps", identifier, "outcome", key, rest @ ..] => {
            let mut current = ctx.steps.get(*identifier)?.get(*key)?;
            for field in rest {
                current = current.get(*field)?;
            }
            Some(current.clone())
        }
        _ => None,
    }
}
