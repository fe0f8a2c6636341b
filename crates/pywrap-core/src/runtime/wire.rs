//! Conversion of form values into wire arguments for the child shim.
//!
//! Values that need native types the wire cannot carry (paths, enums,
//! dates, decimals) travel as strings and are coerced by the shim from the
//! callable's annotations.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Number, Value};
use tracing::debug;

use crate::analyzer::hints::{categorize, is_optional, HintContext, TypeCategory};
use crate::analyzer::literal::parse_int;
use crate::analyzer::types::option_text;
use crate::models::{ActionSpec, ParamKind, ParamSpec, TypeExpr, WidgetKind};

const TRUE_WORDS: &[&str] = &["true", "1", "yes", "on"];
const FALSE_WORDS: &[&str] = &["false", "0", "no", "off"];

/// A value that could not be converted for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ConversionError {
    pub field: String,
    pub message: String,
}

impl ConversionError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Arguments for one invocation, already converted to wire values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionInput {
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
    /// Shell-style argument string for raw-args plans.
    pub raw_args: Option<String>,
    pub env: BTreeMap<String, String>,
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn list_inner(expr: &TypeExpr) -> Option<&TypeExpr> {
    match expr {
        TypeExpr::Optional { inner } => list_inner(inner),
        TypeExpr::Generic { args, .. } => args.first(),
        _ => None,
    }
}

fn convert_int(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let invalid = || format!("Invalid integer: {trimmed:?}");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(invalid());
    }
    let value = match parse_int(digits) {
        Some(magnitude) if negative => magnitude.checked_neg(),
        Some(magnitude) => Some(magnitude),
        // i64::MIN has no positive magnitude; only plain decimals reach it.
        None if negative => parse_int(trimmed),
        None => None,
    };
    value.map(Value::from).ok_or_else(invalid)
}

fn convert_float(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("Invalid number: {trimmed:?}"))
}

fn convert_bool(text: &str) -> Result<Value, String> {
    let lower = text.trim().to_lowercase();
    if TRUE_WORDS.contains(&lower.as_str()) {
        Ok(Value::Bool(true))
    } else if FALSE_WORDS.contains(&lower.as_str()) {
        Ok(Value::Bool(false))
    } else {
        Err(format!(
            "Invalid boolean: {:?}. Use true/false, 1/0, yes/no",
            text.trim()
        ))
    }
}

fn convert_json(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {e}"))
}

fn convert_literal(text: &str, expr: &TypeExpr) -> Result<Value, String> {
    let values = match expr {
        TypeExpr::Optional { inner } => return convert_literal(text, inner),
        TypeExpr::Literal { values } => values,
        _ => return Ok(Value::String(text.to_string())),
    };
    values
        .iter()
        .find(|v| option_text(v) == text)
        .cloned()
        .ok_or_else(|| {
            let options: Vec<String> = values.iter().map(option_text).collect();
            format!("Must be one of: {}", options.join(", "))
        })
}

fn convert_lines(text: &str, inner: Option<&TypeExpr>, ctx: &HintContext) -> Result<Value, String> {
    let mut items = Vec::new();
    for line in text.trim().split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        items.push(match inner {
            Some(expr) => convert_text(line, expr, ctx)?,
            None => Value::String(line.to_string()),
        });
    }
    Ok(Value::Array(items))
}

/// Converts the textual form of a value by the category of `expr`.
pub fn convert_text(text: &str, expr: &TypeExpr, ctx: &HintContext) -> Result<Value, String> {
    match categorize(expr, ctx) {
        TypeCategory::Integer => convert_int(text),
        TypeCategory::Float => convert_float(text),
        TypeCategory::Boolean => convert_bool(text),
        TypeCategory::Literal(_) => convert_literal(text, expr),
        TypeCategory::String
        | TypeCategory::Path
        | TypeCategory::Enum(_)
        | TypeCategory::Date
        | TypeCategory::DateTime
        | TypeCategory::Time
        | TypeCategory::Bytes => Ok(Value::String(text.to_string())),
        TypeCategory::List => convert_lines(text, list_inner(expr), ctx),
        TypeCategory::Dict => convert_json(text),
        TypeCategory::Decimal => {
            let trimmed = text.trim();
            match trimmed.parse::<f64>() {
                Ok(_) => Ok(Value::String(trimmed.to_string())),
                Err(_) => Err(format!("Invalid decimal: {trimmed:?}")),
            }
        }
        TypeCategory::Any | TypeCategory::Unknown => {
            Ok(convert_json(text).unwrap_or_else(|_| Value::String(text.to_string())))
        }
    }
}

fn convert_typed(value: &Value, expr: &TypeExpr, ctx: &HintContext) -> Result<Value, String> {
    let category = categorize(expr, ctx);
    match (&category, value) {
        (TypeCategory::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (TypeCategory::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (TypeCategory::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("Invalid number: {n}")),
        (TypeCategory::List, Value::Array(items)) => {
            let inner = list_inner(expr);
            items
                .iter()
                .map(|item| match (inner, item) {
                    (Some(inner), Value::String(s)) => convert_text(s, inner, ctx),
                    _ => Ok(item.clone()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        (TypeCategory::Dict | TypeCategory::Any, Value::Object(_) | Value::Array(_)) => {
            Ok(value.clone())
        }
        _ => convert_text(&text_of(value), expr, ctx),
    }
}

fn check_pattern(param: &ParamSpec, value: &Value) -> Result<(), String> {
    let (Some(pattern), Value::String(text)) = (&param.ui.regex, value) else {
        return Ok(());
    };
    match Regex::new(pattern) {
        Ok(regex) if !regex.is_match(text) => Err(format!("Does not match pattern {pattern}")),
        Ok(_) => Ok(()),
        Err(e) => {
            debug!("Ignoring invalid pattern on {}: {e}", param.name);
            Ok(())
        }
    }
}

/// Converts one form value for `param`.
///
/// `Ok(None)` means the argument is omitted so the callable's own default
/// applies. An empty value for an `Optional` parameter without a default
/// becomes an explicit `None`.
pub fn convert_form_value(param: &ParamSpec, value: &Value) -> Result<Option<Value>, ConversionError> {
    let expr = param.annotation.best();
    if is_empty_value(value) {
        if param.default.present || param.kind.is_variadic() {
            return Ok(None);
        }
        if is_optional(expr) {
            return Ok(Some(Value::Null));
        }
        return Err(ConversionError::new(&param.name, "Value is required"));
    }

    let ctx = HintContext::default();
    let converted = match param.kind {
        ParamKind::VarPositional => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| convert_typed(item, expr, &ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => convert_lines(&text_of(other), Some(expr), &ctx),
        },
        ParamKind::VarKeyword => match value {
            Value::Object(_) => Ok(value.clone()),
            other => convert_json(&text_of(other)).and_then(|v| match v {
                Value::Object(_) => Ok(v),
                _ => Err("Expected a JSON object".to_string()),
            }),
        },
        _ if param.ui.widget == WidgetKind::ComboBox
            && matches!(categorize(expr, &ctx), TypeCategory::Unknown) =>
        {
            Ok(Value::String(text_of(value)))
        }
        _ => convert_typed(value, expr, &ctx),
    }
    .map_err(|message| ConversionError::new(&param.name, message))?;

    check_pattern(param, &converted).map_err(|message| ConversionError::new(&param.name, message))?;
    Ok(Some(converted))
}

/// Converts a whole form into positional and keyword wire arguments.
///
/// Every failing field is reported, not just the first.
pub fn collect_inputs(
    action: &ActionSpec,
    form: &IndexMap<String, Value>,
) -> Result<ActionInput, Vec<ConversionError>> {
    let mut errors = Vec::new();
    let mut converted = Vec::with_capacity(action.parameters.len());
    for param in &action.parameters {
        let value = form.get(&param.name).unwrap_or(&Value::Null);
        match convert_form_value(param, value) {
            Ok(v) => converted.push((param, v)),
            Err(e) => errors.push(e),
        }
    }
    for name in form.keys() {
        if action.parameter(name).is_none() {
            errors.push(ConversionError::new(name, "Unknown parameter"));
        }
    }

    // With extra positional values, everything declared before `*args`
    // has to be passed positionally as well.
    let spreads_varargs = converted.iter().any(|(p, v)| {
        p.kind == ParamKind::VarPositional && matches!(v, Some(Value::Array(items)) if !items.is_empty())
    });

    let mut input = ActionInput::default();
    let mut gap: Option<&str> = None;
    for (param, value) in converted {
        let positional = param.kind == ParamKind::PositionalOnly
            || (spreads_varargs && param.kind == ParamKind::PositionalOrKeyword);
        match (param.kind, value) {
            (_, None) if positional => gap = gap.or(Some(param.name.as_str())),
            (_, None) => {}
            (ParamKind::VarPositional, Some(Value::Array(items))) => {
                if let (Some(missing), false) = (gap, items.is_empty()) {
                    errors.push(ConversionError::new(
                        &param.name,
                        format!("Cannot pass extra values while '{missing}' is empty"),
                    ));
                }
                input.args.extend(items);
            }
            (ParamKind::VarKeyword, Some(Value::Object(map))) => {
                for (key, v) in map {
                    if input.kwargs.contains_key(&key) {
                        errors.push(ConversionError::new(
                            &param.name,
                            format!("Duplicate keyword argument '{key}'"),
                        ));
                    }
                    input.kwargs.insert(key, v);
                }
            }
            (_, Some(v)) if positional => {
                if let Some(missing) = gap {
                    errors.push(ConversionError::new(
                        &param.name,
                        format!("Cannot be set while '{missing}' is empty"),
                    ));
                }
                input.args.push(v);
            }
            (_, Some(v)) => {
                input.kwargs.insert(param.name.clone(), v);
            }
        }
    }

    if errors.is_empty() {
        Ok(input)
    } else {
        Err(errors)
    }
}
