//! Optional runtime enrichment through an isolated interpreter.
//!
//! Each module is imported in its own short-lived subprocess bounded by a
//! hard timeout. The subprocess only reports annotation text, JSON-able
//! defaults and CLI parameter shapes; static analysis stays authoritative
//! and any failure leaves the static output untouched.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::analyzer::hints::{categorize, infer_hint, result_kind, HintContext, TypeCategory};
use crate::analyzer::types::parse_annotation_text;
use crate::models::{
    ActionKind, ActionSpec, CliBinding, CliBindingMode, CliFramework, IntrospectionStatus, TypeExpr,
};
use crate::runtime::runner::{force_kill, own_process_group};

const INTROSPECT_SCRIPT: &str = r#"
import importlib
import inspect
import json
import sys


def format_annotation(annotation):
    if annotation is inspect.Parameter.empty:
        return None
    if isinstance(annotation, str):
        return annotation
    try:
        return inspect.formatannotation(annotation)
    except Exception:
        return repr(annotation)


def json_default(value):
    if value is inspect.Parameter.empty:
        return False, None
    try:
        return True, json.loads(json.dumps(value))
    except (TypeError, ValueError):
        return False, None


def click_params(command):
    params = []
    for param in getattr(command, "params", []):
        params.append({
            "name": param.name,
            "opts": list(getattr(param, "opts", [])),
            "is_flag": bool(getattr(param, "is_flag", False)),
            "is_argument": getattr(param, "param_type_name", "") == "argument",
        })
    return params


def describe(obj, cli):
    info = {"success": True}
    target = obj
    if cli == "click":
        callback = getattr(obj, "callback", None)
        if callback is None:
            raise TypeError("object is not a click command")
        info["cli_params"] = click_params(obj)
        target = callback
    sig = inspect.signature(target)
    params = []
    for name, param in sig.parameters.items():
        entry = {"name": name, "annotation": format_annotation(param.annotation)}
        has_default, default = json_default(param.default)
        if has_default:
            entry["default"] = default
        params.append(entry)
    info["parameters"] = params
    info["return_annotation"] = format_annotation(sig.return_annotation)
    return info


def main():
    payload = json.load(sys.stdin)
    real_stdout = sys.stdout
    sys.stdout = sys.stderr
    for entry in reversed(payload.get("sys_path", [])):
        if entry not in sys.path:
            sys.path.insert(0, entry)
    results = {}
    try:
        module = importlib.import_module(payload["module_id"])
    except BaseException as exc:
        error = "%s: %s" % (type(exc).__name__, exc)
        for action in payload.get("actions", []):
            results[action["action_id"]] = {"success": False, "error": error}
        real_stdout.write(json.dumps(results))
        return
    for action in payload.get("actions", []):
        try:
            obj = module
            for part in action.get("attr_path", "").split("."):
                if part:
                    obj = getattr(obj, part)
            results[action["action_id"]] = describe(obj, action.get("cli"))
        except BaseException as exc:
            results[action["action_id"]] = {
                "success": False,
                "error": "%s: %s" % (type(exc).__name__, exc),
            }
    real_stdout.write(json.dumps(results))


main()
"#;

/// One callable to describe inside a module.
#[derive(Debug, Clone)]
pub struct IntrospectionRequest {
    pub action_id: String,
    pub attr_path: String,
    pub cli: Option<CliFramework>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParamReport {
    pub name: String,
    #[serde(default)]
    pub annotation: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CliParamReport {
    pub name: Option<String>,
    #[serde(default)]
    pub opts: Vec<String>,
    #[serde(default)]
    pub is_flag: bool,
    #[serde(default)]
    pub is_argument: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ActionReport {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParamReport>,
    #[serde(default)]
    pub return_annotation: Option<String>,
    #[serde(default)]
    pub cli_params: Option<Vec<CliParamReport>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionFailure {
    pub timed_out: bool,
    pub message: String,
}

impl IntrospectionFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            timed_out: false,
            message: message.into(),
        }
    }
}

/// Drains a pipe on its own thread. The receiver gets the bytes once the
/// pipe closes, which a surviving grandchild can delay indefinitely.
fn read_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn timed_out(timeout: Duration) -> IntrospectionFailure {
    IntrospectionFailure {
        timed_out: true,
        message: format!("Introspection timed out after {}ms", timeout.as_millis()),
    }
}

/// Imports `module_id` in a fresh interpreter and describes `requests`.
pub fn introspect_module(
    python: &str,
    sys_path: &[PathBuf],
    module_id: &str,
    requests: &[IntrospectionRequest],
    timeout: Duration,
) -> Result<BTreeMap<String, ActionReport>, IntrospectionFailure> {
    let payload = json!({
        "module_id": module_id,
        "sys_path": sys_path.iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>(),
        "actions": requests.iter().map(|r| json!({
            "action_id": r.action_id,
            "attr_path": r.attr_path,
            "cli": match r.cli {
                Some(CliFramework::Click) => Some("click"),
                Some(CliFramework::Typer) => Some("typer"),
                _ => None,
            },
        })).collect::<Vec<_>>(),
    });

    let mut command = Command::new(python);
    command
        .arg("-c")
        .arg(INTROSPECT_SCRIPT)
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .env("PYTHONUNBUFFERED", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(first) = sys_path.first() {
        command.current_dir(first);
    }
    own_process_group(&mut command);
    let deadline = Instant::now() + timeout;
    let mut child = command
        .spawn()
        .map_err(|e| IntrospectionFailure::new(format!("Failed to start {python}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A child that dies early closes the pipe; its exit status tells why.
        let _ = stdin.write_all(payload.to_string().as_bytes());
    }
    let stdout = read_pipe(child.stdout.take());
    let stderr = read_pipe(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            debug!("Introspection of {module_id} timed out; killing its process group");
            force_kill(&mut child);
            let _ = child.wait();
            return Err(timed_out(timeout));
        }
        Err(e) => {
            force_kill(&mut child);
            let _ = child.wait();
            return Err(IntrospectionFailure::new(format!("Failed to wait: {e}")));
        }
    };

    // Leftover processes from the import may still hold the pipes open.
    let mut collect = |rx: &Receiver<Vec<u8>>| {
        let remaining = deadline.saturating_duration_since(Instant::now());
        rx.recv_timeout(remaining).ok()
    };
    let (Some(out), Some(err)) = (collect(&stdout), collect(&stderr)) else {
        warn!("Introspection of {module_id} left processes holding its output open");
        force_kill(&mut child);
        return Err(timed_out(timeout));
    };
    if !status.success() {
        let stderr_text = String::from_utf8_lossy(&err).trim().to_string();
        return Err(IntrospectionFailure::new(if stderr_text.is_empty() {
            format!("Introspection subprocess failed ({status})")
        } else {
            stderr_text
        }));
    }
    serde_json::from_slice(&out)
        .map_err(|e| IntrospectionFailure::new(format!("Invalid introspection output: {e}")))
}

/// Records a module-wide failure on every action of that module.
pub fn mark_failed(action: &mut ActionSpec, failure: &IntrospectionFailure) {
    action.introspection = IntrospectionStatus {
        attempted: true,
        success: false,
        timed_out: failure.timed_out,
        error: Some(failure.message.clone()),
        annotations_resolved: 0,
        cli_params_resolved: 0,
    };
}

fn typer_binding(name: &str, resolved: Option<&TypeExpr>, has_default: bool, ctx: &HintContext) -> CliBinding {
    match resolved {
        Some(expr) if !expr.is_unknown() => CliBinding {
            mode: CliBindingMode::Structured,
            opts: vec![format!("--{}", name.replace('_', "-"))],
            is_flag: categorize(expr, ctx) == TypeCategory::Boolean,
            is_argument: !has_default,
        },
        _ => raw_binding(),
    }
}

fn raw_binding() -> CliBinding {
    CliBinding {
        mode: CliBindingMode::Raw,
        opts: Vec::new(),
        is_flag: false,
        is_argument: false,
    }
}

/// Folds one action's report into its spec as the weakest layer.
pub fn apply_report(action: &mut ActionSpec, report: Option<&ActionReport>, ctx: &HintContext) {
    let mut status = IntrospectionStatus {
        attempted: true,
        ..IntrospectionStatus::default()
    };
    let Some(report) = report else {
        status.error = Some("Introspection returned no data".to_string());
        action.introspection = status;
        return;
    };
    if !report.success {
        status.error = report.error.clone();
        action.introspection = status;
        return;
    }
    status.success = true;

    let by_name: BTreeMap<&str, &ParamReport> = report
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p))
        .collect();
    let cli_by_name: BTreeMap<&str, &CliParamReport> = report
        .cli_params
        .iter()
        .flatten()
        .filter_map(|p| p.name.as_deref().map(|n| (n, p)))
        .collect();

    for param in action.parameters.iter_mut() {
        let runtime = by_name.get(param.name.as_str());
        if let Some(text) = runtime.and_then(|r| r.annotation.as_deref()) {
            let resolved = parse_annotation_text(text).expr;
            param.annotation.resolved = Some(resolved.clone());
            status.annotations_resolved += 1;
            if !resolved.is_unknown() {
                param.hint_layers.runtime = infer_hint(&resolved, &param.name, param.kind, ctx);
            }
        }
        if let Some(default) = runtime.and_then(|r| r.default.clone()) {
            if param.default.present {
                param.default.runtime = Some(default);
            }
        }

        match action.cli_framework {
            Some(CliFramework::Click) => {
                param.cli = Some(match cli_by_name.get(param.name.as_str()) {
                    Some(cli) => CliBinding {
                        mode: CliBindingMode::Structured,
                        opts: cli.opts.clone(),
                        is_flag: cli.is_flag,
                        is_argument: cli.is_argument,
                    },
                    None => raw_binding(),
                });
            }
            Some(CliFramework::Typer) => {
                param.cli = Some(typer_binding(
                    &param.name,
                    param.annotation.resolved.as_ref(),
                    param.default.present,
                    ctx,
                ));
            }
            _ => {}
        }
        if param
            .cli
            .as_ref()
            .is_some_and(|c| c.mode == CliBindingMode::Structured)
        {
            status.cli_params_resolved += 1;
        }
        param.ui = param.hint_layers.effective();
    }

    if let Some(text) = report.return_annotation.as_deref() {
        let resolved = parse_annotation_text(text).expr;
        if action.returns.annotation.expr.is_unknown() && !resolved.is_unknown() {
            action.returns.result_kind = result_kind(&resolved);
        }
        action.returns.annotation.resolved = Some(resolved);
        status.annotations_resolved += 1;
    }

    debug!(
        "Introspected {}: {} annotations, {} cli params",
        action.qualified_name, status.annotations_resolved, status.cli_params_resolved
    );
    action.introspection = status;
}

/// Enriches the callable actions of one module, degrading to static data
/// on failure. Script actions have no callable and are left alone.
pub fn enrich_module(
    python: &str,
    sys_path: &[PathBuf],
    module_id: &str,
    actions: &mut [ActionSpec],
    timeout: Duration,
    ctx: &HintContext,
) -> Option<IntrospectionFailure> {
    let requests: Vec<IntrospectionRequest> = actions
        .iter()
        .filter(|action| action.kind != ActionKind::Script)
        .map(|action| IntrospectionRequest {
            action_id: action.action_id.clone(),
            attr_path: action.qualified_name.clone(),
            cli: action.cli_framework,
        })
        .collect();
    if requests.is_empty() {
        return None;
    }

    let callables = actions
        .iter_mut()
        .filter(|action| action.kind != ActionKind::Script);
    match introspect_module(python, sys_path, module_id, &requests, timeout) {
        Ok(reports) => {
            for action in callables {
                let report = reports.get(&action.action_id);
                apply_report(action, report, ctx);
            }
            None
        }
        Err(failure) => {
            warn!("Introspection of {module_id} failed: {}", failure.message);
            for action in callables {
                mark_failed(action, &failure);
            }
            Some(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::python_for_tests;

    fn request(action_id: &str, attr_path: &str) -> IntrospectionRequest {
        IntrospectionRequest {
            action_id: action_id.to_string(),
            attr_path: attr_path.to_string(),
            cli: None,
        }
    }

    #[test]
    fn test_reports_annotations_and_defaults() {
        let Some(python) = python_for_tests() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("demo.py"),
            "LIMIT = 5\n\ndef add(a: int, b: 'float' = LIMIT) -> int:\n    return a\n\nclass Box:\n    @staticmethod\n    def make(size: str) -> None:\n        pass\n",
        )
        .unwrap();

        let reports = introspect_module(
            &python,
            &[dir.path().to_path_buf()],
            "demo",
            &[request("add:x", "add"), request("Box.make:y", "Box.make"), request("nope:z", "nope")],
            Duration::from_secs(20),
        )
        .unwrap();

        let add = &reports["add:x"];
        assert!(add.success);
        assert_eq!(add.parameters[0].annotation.as_deref(), Some("int"));
        assert_eq!(add.parameters[1].annotation.as_deref(), Some("float"));
        assert_eq!(add.parameters[1].default, Some(json!(5)));
        assert_eq!(add.return_annotation.as_deref(), Some("int"));
        assert!(reports["Box.make:y"].success);
        assert!(!reports["nope:z"].success);
    }

    #[test]
    fn test_import_failure_is_reported_per_action() {
        let Some(python) = python_for_tests() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("broken.py"),
            "print('noise')\nraise RuntimeError('boom')\n\ndef f():\n    pass\n",
        )
        .unwrap();

        let reports = introspect_module(
            &python,
            &[dir.path().to_path_buf()],
            "broken",
            &[request("f:1", "f")],
            Duration::from_secs(20),
        )
        .unwrap();
        let report = &reports["f:1"];
        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_hanging_import_times_out() {
        let Some(python) = python_for_tests() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("slow.py"),
            "import time\ntime.sleep(30)\n\ndef f():\n    pass\n",
        )
        .unwrap();

        let failure = introspect_module(
            &python,
            &[dir.path().to_path_buf()],
            "slow",
            &[request("f:1", "f")],
            Duration::from_millis(300),
        )
        .unwrap_err();
        assert!(failure.timed_out);
    }

    #[test]
    fn test_timeout_reaps_processes_spawned_at_import() {
        let Some(python) = python_for_tests() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("spawner.py"),
            "import subprocess\nimport sys\nimport time\nsubprocess.Popen([sys.executable, '-c', 'import time; time.sleep(8)'])\ntime.sleep(8)\n\ndef f():\n    pass\n",
        )
        .unwrap();

        let started = std::time::Instant::now();
        let failure = introspect_module(
            &python,
            &[dir.path().to_path_buf()],
            "spawner",
            &[request("f:1", "f")],
            Duration::from_millis(500),
        )
        .unwrap_err();
        assert!(failure.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
    }

    #[test]
    fn test_detached_grandchild_cannot_stall_collection() {
        let Some(python) = python_for_tests() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        // The module imports fine, but leaves a process in a new session
        // that keeps stdout open past the parent's exit.
        std::fs::write(
            dir.path().join("leaker.py"),
            "import subprocess\nimport sys\nsubprocess.Popen([sys.executable, '-c', 'import time; time.sleep(8)'], start_new_session=True)\n\ndef f():\n    pass\n",
        )
        .unwrap();

        let started = std::time::Instant::now();
        let result = introspect_module(
            &python,
            &[dir.path().to_path_buf()],
            "leaker",
            &[request("f:1", "f")],
            Duration::from_millis(1_500),
        );
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
        if let Err(failure) = result {
            assert!(failure.timed_out);
        }
    }

    #[test]
    fn test_missing_interpreter_fails_cleanly() {
        let failure = introspect_module(
            "/nonexistent/python-for-pywrap",
            &[],
            "demo",
            &[request("f:1", "f")],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(!failure.timed_out);
        assert!(failure.message.contains("Failed to start"));
    }
}
