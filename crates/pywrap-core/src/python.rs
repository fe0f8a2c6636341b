//! Python bindings. Structured values cross the boundary as JSON strings.

use std::path::Path;
use std::sync::OnceLock;

use indexmap::IndexMap;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::wrap_pyfunction;
use serde_json::{json, Value};

use crate::analyzer::types::parse_annotation_text;
use crate::config::{AnalysisMode, AnalyzerConfig, ExecutionConfig};
use crate::errors::PywrapError;
use crate::models::{AnalysisResult, ParamSpec};
use crate::planner::prepare_launch;
use crate::runtime::protocol::{REQUEST_PATH_ENV, RESULT_PATH_ENV};
use crate::runtime::runner::{ActionRunner, RunReport};
use crate::runtime::wire::{collect_inputs, convert_form_value};

static RUNNER: OnceLock<ActionRunner> = OnceLock::new();

fn runner() -> &'static ActionRunner {
    RUNNER.get_or_init(|| ActionRunner::new(ExecutionConfig::from_env()))
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> PyResult<T> {
    serde_json::from_str(text).map_err(|e| PyValueError::new_err(format!("Invalid {what}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PywrapError::from(e).into())
}

/// Analyzes a project directory or single file and returns the
/// specification as JSON.
#[pyfunction]
#[pyo3(signature = (path, mode=None))]
pub fn analyze_path(py: Python<'_>, path: &str, mode: Option<&str>) -> PyResult<String> {
    let mut config = AnalyzerConfig::from_env();
    if let Some(mode) = mode {
        config.mode = AnalysisMode::parse(mode)
            .ok_or_else(|| PyValueError::new_err(format!("Unknown analysis mode: {mode}")))?;
    }
    let result = py.allow_threads(|| crate::analyzer::analyze_path(Path::new(path), &config))?;
    Ok(result.to_json_pretty().map_err(PywrapError::from)?)
}

/// Returns `(merged_spec_json, warnings_json)`.
#[pyfunction]
pub fn merge_overrides(spec_json: &str, document: &str) -> PyResult<(String, String)> {
    let result: AnalysisResult = parse_json(spec_json, "specification")?;
    let (merged, warnings) = crate::overrides::merge_overrides(&result, document)?;
    Ok((to_json(&merged)?, to_json(&warnings)?))
}

#[pyfunction]
pub fn parse_annotation(text: &str) -> PyResult<String> {
    let resolved = parse_annotation_text(text);
    to_json(&json!({
        "expr": resolved.expr,
        "rendered": resolved.expr.render(),
        "inline": resolved.inline,
    }))
}

/// Converts one form value for a parameter. Returns `None` when the
/// argument should be omitted so the callable's default applies.
#[pyfunction]
pub fn convert_value(param_json: &str, value_json: &str) -> PyResult<Option<String>> {
    let param: ParamSpec = parse_json(param_json, "parameter")?;
    let value: Value = parse_json(value_json, "value")?;
    match convert_form_value(&param, &value) {
        Ok(Some(converted)) => Ok(Some(to_json(&converted)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(PyValueError::new_err(e.to_string())),
    }
}

fn report_json(report: &RunReport) -> PyResult<String> {
    to_json(&json!({
        "envelope": report.envelope,
        "state": report.state(),
        "stdout": report.stdout,
        "stderr": report.stderr,
    }))
}

/// Runs an action to completion and returns the report as JSON.
///
/// Conversion problems raise `ValueError` listing every field at once.
#[pyfunction]
#[pyo3(signature = (spec_json, action_id, form_json="{}", raw_args=None))]
pub fn run_action(
    py: Python<'_>,
    spec_json: &str,
    action_id: &str,
    form_json: &str,
    raw_args: Option<String>,
) -> PyResult<String> {
    let result: AnalysisResult = parse_json(spec_json, "specification")?;
    let form: IndexMap<String, Value> = parse_json(form_json, "form")?;
    let (_, action) = result
        .find_action(action_id)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown action: {action_id}")))?;
    let mut input = collect_inputs(action, &form).map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
        PyValueError::new_err(lines.join("\n"))
    })?;
    input.raw_args = raw_args;

    let runner = runner();
    let launch = prepare_launch(&result, action_id, &input, runner.config())?;
    let report = py.allow_threads(|| runner.run(launch))?;
    report_json(&report)
}

#[pymodule]
fn _pywrap_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("SCHEMA_VERSION", crate::models::SCHEMA_VERSION)?;
    m.add("RESULT_PATH_ENV", RESULT_PATH_ENV)?;
    m.add("REQUEST_PATH_ENV", REQUEST_PATH_ENV)?;

    m.add_function(wrap_pyfunction!(analyze_path, m)?)?;
    m.add_function(wrap_pyfunction!(merge_overrides, m)?)?;
    m.add_function(wrap_pyfunction!(parse_annotation, m)?)?;
    m.add_function(wrap_pyfunction!(convert_value, m)?)?;
    m.add_function(wrap_pyfunction!(run_action, m)?)?;
    Ok(())
}
