//! Merges a user-supplied override document into an analysis result.
//!
//! The document only ever touches the external hint layer and the
//! display fields. Every parameter's effective `ui` is recomputed from its
//! layers afterwards, so applying the same document twice changes nothing.

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::analyzer::types::option_text;
use crate::errors::{PywrapError, PywrapResult};
use crate::models::{
    ActionSpec, AnalysisResult, HintOverride, ModuleSpec, ParamSpec, Warning, WidgetKind,
    SCHEMA_VERSION, WARN_OVERRIDE_INVALID_VALUE, WARN_OVERRIDE_UNKNOWN_KEY,
    WARN_OVERRIDE_UNKNOWN_TARGET, WARN_OVERRIDE_VERSION_MISMATCH,
};

const DOCUMENT_KEYS: &[&str] = &["override_schema_version", "modules"];
const MODULE_KEYS: &[&str] = &["schema_version", "display_name", "hidden", "actions"];
const ACTION_KEYS: &[&str] = &["display_name", "hidden", "parameters"];
const PARAM_KEYS: &[&str] = &["widget", "options", "min", "max", "regex"];

type Mapping = serde_json::Map<String, Value>;

/// Collects warnings with the location of the entry that caused them.
struct Report {
    warnings: Vec<Warning>,
}

impl Report {
    fn push(&mut self, code: &str, path: &str, message: impl Into<String>) {
        let message = format!("{path}: {}", message.into());
        debug!("Override warning {code}: {message}");
        self.warnings.push(Warning::new(code, message));
    }

    fn unknown_keys(&mut self, map: &Mapping, allowed: &[&str], path: &str) {
        for key in map.keys().filter(|k| !allowed.contains(&k.as_str())) {
            self.push(WARN_OVERRIDE_UNKNOWN_KEY, path, format!("unknown key '{key}'"));
        }
    }

    fn mapping<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Mapping> {
        match value {
            Value::Object(map) => Some(map),
            Value::Null => None,
            _ => {
                self.push(WARN_OVERRIDE_INVALID_VALUE, path, "expected a mapping");
                None
            }
        }
    }
}

fn major_version(version: &str) -> &str {
    version.trim().split('.').next().unwrap_or_default()
}

fn version_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses an override document. YAML and JSON are both accepted; empty
/// input is an empty document.
fn parse_document(text: &str) -> PywrapResult<Mapping> {
    if text.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(text)?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        other => Err(PywrapError::Override(format!(
            "document must be a mapping, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn apply_display_name(target: &mut String, value: Option<&Value>, path: &str, report: &mut Report) {
    match value {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if !s.trim().is_empty() => *target = s.trim().to_string(),
        Some(_) => report.push(
            WARN_OVERRIDE_INVALID_VALUE,
            path,
            "display_name must be a non-empty string",
        ),
    }
}

fn apply_hidden(target: &mut bool, value: Option<&Value>, path: &str, report: &mut Report) {
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Bool(b)) => *target = *b,
        Some(_) => report.push(WARN_OVERRIDE_INVALID_VALUE, path, "hidden must be a boolean"),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Reads one parameter entry into a partial hint. Invalid fields are
/// reported and skipped.
fn read_param_entry(map: &Mapping, path: &str, report: &mut Report) -> HintOverride {
    report.unknown_keys(map, PARAM_KEYS, path);
    let mut hint = HintOverride::default();

    if let Some(value) = map.get("widget").filter(|v| !v.is_null()) {
        match value.as_str().and_then(WidgetKind::parse) {
            Some(widget) => hint.widget = Some(widget),
            None => report.push(
                WARN_OVERRIDE_INVALID_VALUE,
                path,
                format!("unknown widget {value}"),
            ),
        }
    }
    if let Some(value) = map.get("options").filter(|v| !v.is_null()) {
        match value {
            Value::Array(items) if items.iter().all(|i| !i.is_array() && !i.is_object()) => {
                hint.options = Some(items.iter().map(option_text).collect());
            }
            _ => report.push(WARN_OVERRIDE_INVALID_VALUE, path, "options must be a list of scalars"),
        }
    }
    for (key, slot) in [("min", &mut hint.min), ("max", &mut hint.max)] {
        if let Some(value) = map.get(key).filter(|v| !v.is_null()) {
            match number(value) {
                Some(n) => *slot = Some(n),
                None => report.push(WARN_OVERRIDE_INVALID_VALUE, path, format!("{key} must be a number")),
            }
        }
    }
    if let (Some(min), Some(max)) = (hint.min, hint.max) {
        if min > max {
            report.push(WARN_OVERRIDE_INVALID_VALUE, path, "min is greater than max");
            hint.min = None;
            hint.max = None;
        }
    }
    if let Some(value) = map.get("regex").filter(|v| !v.is_null()) {
        match value.as_str() {
            Some(pattern) => match Regex::new(pattern) {
                Ok(_) => hint.regex = Some(pattern.to_string()),
                Err(e) => report.push(WARN_OVERRIDE_INVALID_VALUE, path, format!("invalid regex: {e}")),
            },
            None => report.push(WARN_OVERRIDE_INVALID_VALUE, path, "regex must be a string"),
        }
    }
    hint
}

fn merge_layer(layer: &mut HintOverride, incoming: HintOverride) {
    if incoming.widget.is_some() {
        layer.widget = incoming.widget;
    }
    if incoming.options.is_some() {
        layer.options = incoming.options;
    }
    if incoming.min.is_some() {
        layer.min = incoming.min;
    }
    if incoming.max.is_some() {
        layer.max = incoming.max;
    }
    if incoming.regex.is_some() {
        layer.regex = incoming.regex;
    }
}

fn apply_parameters(params: &mut [ParamSpec], map: &Mapping, path: &str, report: &mut Report) {
    for (name, entry) in map {
        let entry_path = format!("{path}.{name}");
        let Some(param) = params.iter_mut().find(|p| &p.name == name) else {
            report.push(WARN_OVERRIDE_UNKNOWN_TARGET, &entry_path, "no such parameter");
            continue;
        };
        if let Some(entry) = report.mapping(entry, &entry_path) {
            let hint = read_param_entry(entry, &entry_path, report);
            merge_layer(&mut param.hint_layers.external, hint);
        }
    }
}

fn find_action<'a>(actions: &'a mut [ActionSpec], key: &str) -> Option<&'a mut ActionSpec> {
    actions
        .iter_mut()
        .find(|a| a.action_id == key || a.qualified_name == key || a.name == key)
}

fn apply_action(action: &mut ActionSpec, map: &Mapping, path: &str, report: &mut Report) {
    report.unknown_keys(map, ACTION_KEYS, path);
    apply_display_name(&mut action.display_name, map.get("display_name"), path, report);
    apply_hidden(&mut action.hidden, map.get("hidden"), path, report);
    if let Some(params) = map.get("parameters") {
        let params_path = format!("{path}.parameters");
        if let Some(params) = report.mapping(params, &params_path) {
            apply_parameters(&mut action.parameters, params, &params_path, report);
        }
    }
}

fn apply_module(
    module: &mut ModuleSpec,
    map: &Mapping,
    document_version: Option<&str>,
    path: &str,
    report: &mut Report,
) {
    report.unknown_keys(map, MODULE_KEYS, path);
    let entry_version = map.get("schema_version").and_then(version_text);
    let version = entry_version.as_deref().or(document_version);
    if let Some(version) = version {
        if major_version(version) != major_version(SCHEMA_VERSION) {
            report.push(
                WARN_OVERRIDE_VERSION_MISMATCH,
                path,
                format!("schema version {version} is not compatible with {SCHEMA_VERSION}; entry skipped"),
            );
            return;
        }
    }

    apply_display_name(&mut module.display_name, map.get("display_name"), path, report);
    apply_hidden(&mut module.hidden, map.get("hidden"), path, report);
    let Some(actions) = map.get("actions") else {
        return;
    };
    let actions_path = format!("{path}.actions");
    let Some(actions) = report.mapping(actions, &actions_path) else {
        return;
    };
    for (key, entry) in actions {
        let entry_path = format!("{actions_path}.{key}");
        let Some(action) = find_action(&mut module.actions, key) else {
            report.push(WARN_OVERRIDE_UNKNOWN_TARGET, &entry_path, "no such action");
            continue;
        };
        if let Some(entry) = report.mapping(entry, &entry_path) {
            apply_action(action, entry, &entry_path, report);
        }
    }
}

fn refresh_effective_hints(result: &mut AnalysisResult) {
    for param in result
        .modules
        .iter_mut()
        .flat_map(|m| m.actions.iter_mut())
        .flat_map(|a| a.parameters.iter_mut())
    {
        param.ui = param.hint_layers.effective();
    }
}

/// Applies `document` to a copy of `result`.
///
/// Problems inside the document come back as warnings and never abort the
/// merge; only a document that cannot be parsed at all is an error.
pub fn merge_overrides(
    result: &AnalysisResult,
    document: &str,
) -> PywrapResult<(AnalysisResult, Vec<Warning>)> {
    let doc = parse_document(document)?;
    let mut merged = result.clone();
    let mut report = Report { warnings: Vec::new() };
    report.unknown_keys(&doc, DOCUMENT_KEYS, "$");

    let document_version = doc.get("override_schema_version").and_then(version_text);
    if let Some(modules) = doc.get("modules") {
        if let Some(modules) = report.mapping(modules, "modules") {
            for (module_id, entry) in modules {
                let path = format!("modules.{module_id}");
                let Some(module) = merged.modules.iter_mut().find(|m| &m.module_id == module_id) else {
                    report.push(WARN_OVERRIDE_UNKNOWN_TARGET, &path, "no such module");
                    continue;
                };
                if let Some(entry) = report.mapping(entry, &path) {
                    apply_module(module, entry, document_version.as_deref(), &path, &mut report);
                }
            }
        }
    }

    refresh_effective_hints(&mut merged);
    if !report.warnings.is_empty() {
        warn!("Override document produced {} warning(s)", report.warnings.len());
    }
    Ok((merged, report.warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_path;
    use crate::config::AnalyzerConfig;

    const SOURCE: &str = r#"from typing import Annotated


def resize(width: int, height: int = 10, label: Annotated[str, {"widget": "plain_text_edit"}] = "x"):
    return width * height


def greet(name: str):
    return "hi " + name
"#;

    fn analyzed() -> AnalysisResult {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shapes.py"), SOURCE).unwrap();
        analyze_path(dir.path(), &AnalyzerConfig::default()).unwrap()
    }

    fn param<'a>(result: &'a AnalysisResult, action: &str, name: &str) -> &'a ParamSpec {
        result.modules[0]
            .actions
            .iter()
            .find(|a| a.name == action)
            .and_then(|a| a.parameter(name))
            .unwrap()
    }

    #[test]
    fn test_empty_document_is_identity() {
        let result = analyzed();
        for doc in ["", "{}", "modules: {}\n"] {
            let (merged, warnings) = merge_overrides(&result, doc).unwrap();
            assert_eq!(merged, result);
            assert!(warnings.is_empty());
        }
    }

    #[test]
    fn test_external_layer_wins_and_is_idempotent() {
        let result = analyzed();
        let doc = r#"
override_schema_version: "1.0"
modules:
  shapes:
    display_name: Shapes
    actions:
      resize:
        display_name: Resize image
        parameters:
          width:
            widget: double_spin_box
            min: 1
            max: 4096
          label:
            regex: "^[a-z]+$"
"#;
        let (once, warnings) = merge_overrides(&result, doc).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        let width = param(&once, "resize", "width");
        assert_eq!(width.ui.widget, WidgetKind::DoubleSpinBox);
        assert_eq!(width.ui.min, Some(1.0));
        assert_eq!(width.ui.max, Some(4096.0));
        let label = param(&once, "resize", "label");
        assert_eq!(label.ui.widget, WidgetKind::PlainTextEdit);
        assert_eq!(label.ui.regex.as_deref(), Some("^[a-z]+$"));
        assert_eq!(once.modules[0].display_name, "Shapes");

        let (twice, _) = merge_overrides(&once, doc).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn test_action_matched_by_id_and_qualified_name() {
        let result = analyzed();
        let greet_id = result.modules[0]
            .actions
            .iter()
            .find(|a| a.name == "greet")
            .unwrap()
            .action_id
            .clone();
        let doc = format!(
            "{{\"modules\": {{\"shapes\": {{\"actions\": {{\"{greet_id}\": {{\"hidden\": true}}, \"resize\": {{\"hidden\": true}}}}}}}}}}"
        );
        let (merged, warnings) = merge_overrides(&result, &doc).unwrap();
        assert!(warnings.is_empty());
        assert!(merged.modules[0].actions.iter().all(|a| a.hidden));
    }

    #[test]
    fn test_bad_entries_warn_without_aborting() {
        let result = analyzed();
        let doc = r#"
colour: blue
modules:
  ghost: {}
  shapes:
    actions:
      nope: {}
      resize:
        parameters:
          width:
            widget: slider
            min: 1
          depth:
            widget: spin_box
          height:
            regex: "("
            tooltip: tall
"#;
        let (merged, warnings) = merge_overrides(&result, doc).unwrap();
        let codes: Vec<&str> = warnings.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes.iter().filter(|c| **c == WARN_OVERRIDE_UNKNOWN_KEY).count(), 2);
        assert_eq!(codes.iter().filter(|c| **c == WARN_OVERRIDE_UNKNOWN_TARGET).count(), 3);
        assert_eq!(codes.iter().filter(|c| **c == WARN_OVERRIDE_INVALID_VALUE).count(), 2);

        let width = param(&merged, "resize", "width");
        assert_eq!(width.ui.widget, WidgetKind::SpinBox);
        assert_eq!(width.ui.min, Some(1.0));
        assert!(param(&merged, "resize", "height").ui.regex.is_none());
    }

    #[test]
    fn test_version_mismatch_skips_entry() {
        let result = analyzed();
        let doc = r#"
modules:
  shapes:
    schema_version: "2.0"
    display_name: Future
"#;
        let (merged, warnings) = merge_overrides(&result, doc).unwrap();
        assert_eq!(merged, result);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WARN_OVERRIDE_VERSION_MISMATCH);

        let doc = "override_schema_version: '2.1'\nmodules:\n  shapes:\n    schema_version: '1.3'\n    hidden: true\n";
        let (merged, warnings) = merge_overrides(&result, doc).unwrap();
        assert!(warnings.is_empty());
        assert!(merged.modules[0].hidden);
    }

    #[test]
    fn test_unparseable_document_is_an_error() {
        let result = analyzed();
        assert!(merge_overrides(&result, "modules: [unclosed").is_err());
        assert!(matches!(
            merge_overrides(&result, "- just\n- a list\n"),
            Err(PywrapError::Override(_))
        ));
    }
}
