//! Wire types shared by the parent runner and the child shim.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ResultKind;

/// Side-channel path the child writes its envelope to.
pub const RESULT_PATH_ENV: &str = "WRAP_RESULT_PATH";
/// Path of the JSON request the child reads on startup.
pub const REQUEST_PATH_ENV: &str = "WRAP_REQUEST_PATH";
pub const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED";

/// How the shim turns a resolved target into a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// `target(*args, **kwargs)` with annotation-driven coercion.
    Call,
    /// `target.main(args=argv, standalone_mode=False)` on a click command.
    ClickMain,
    /// Wraps a plain function in a one-command typer app and runs `argv`.
    TyperMain,
    /// `sys.argv` replacement followed by a bare call.
    Argv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildInvocationRequest {
    pub action_id: String,
    pub module_import_path: String,
    /// Attribute path of the callable inside its module.
    pub qualname: String,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
    pub working_dir: String,
    pub env_overrides: BTreeMap<String, String>,
    pub sys_path: Vec<String>,
    pub call_mode: CallMode,
    #[serde(default)]
    pub argv: Vec<String>,
    #[serde(default)]
    pub prog_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            traceback: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLimits {
    pub timeout_ms: u64,
    pub max_result_bytes: u64,
    pub max_console_bytes: u64,
}

/// The single structured answer for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub ok: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default = "default_result_kind")]
    pub result_kind: ResultKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    #[serde(default)]
    pub limits: Option<ResultLimits>,
}

fn default_result_kind() -> ResultKind {
    ResultKind::None
}

impl ResultEnvelope {
    fn base(ok: bool) -> Self {
        Self {
            ok,
            cancelled: false,
            timed_out: false,
            exit_code: None,
            duration_ms: 0,
            result_kind: ResultKind::None,
            payload: Value::Null,
            error: None,
            stdout_truncated: false,
            stderr_truncated: false,
            limits: None,
        }
    }

    /// Outcome of a plan with no side-channel: success is a zero exit.
    pub fn from_exit(exit_code: Option<i32>, stderr_tail: &str) -> Self {
        let mut envelope = Self::base(exit_code == Some(0));
        envelope.exit_code = exit_code;
        if !envelope.ok {
            envelope.error = Some(ErrorInfo {
                kind: "ProcessExit".to_string(),
                message: exit_message(exit_code),
                traceback: non_empty(stderr_tail),
            });
        }
        envelope
    }

    pub fn failed(kind: &str, message: impl Into<String>, exit_code: Option<i32>) -> Self {
        let mut envelope = Self::base(false);
        envelope.exit_code = exit_code;
        envelope.error = Some(ErrorInfo::new(kind, message));
        envelope
    }

    pub fn cancelled(exit_code: Option<i32>) -> Self {
        let mut envelope = Self::base(false);
        envelope.cancelled = true;
        envelope.exit_code = exit_code;
        envelope.error = Some(ErrorInfo::new("Cancelled", "Cancelled by request"));
        envelope
    }

    pub fn timed_out(timeout_ms: u64, exit_code: Option<i32>) -> Self {
        let mut envelope = Self::base(false);
        envelope.timed_out = true;
        envelope.exit_code = exit_code;
        envelope.error = Some(ErrorInfo::new(
            "Timeout",
            format!("Timed out after {timeout_ms}ms"),
        ));
        envelope
    }
}

fn exit_message(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("Process exited with status {code}"),
        None => "Process terminated by signal".to_string(),
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parent-observed lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }

    pub fn from_envelope(envelope: &ResultEnvelope) -> Self {
        if envelope.cancelled {
            RunState::Cancelled
        } else if envelope.timed_out {
            RunState::TimedOut
        } else if envelope.ok {
            RunState::Completed
        } else {
            RunState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_parses_child_output() {
        let text = r#"{"ok": true, "cancelled": false, "timed_out": false, "exit_code": 0,
            "duration_ms": 12, "result_kind": "json", "payload": 9, "error": null}"#;
        let envelope: ResultEnvelope = serde_json::from_str(text).unwrap();
        assert!(envelope.ok);
        assert_eq!(envelope.result_kind, ResultKind::Json);
        assert_eq!(envelope.payload, json!(9));
        assert_eq!(RunState::from_envelope(&envelope), RunState::Completed);
    }

    #[test]
    fn test_from_exit() {
        assert!(ResultEnvelope::from_exit(Some(0), "").ok);
        let failed = ResultEnvelope::from_exit(Some(2), "usage: tool [-h]\n");
        assert!(!failed.ok);
        let error = failed.error.unwrap();
        assert_eq!(error.traceback.as_deref(), Some("usage: tool [-h]"));
        assert!(error.message.contains('2'));
    }

    #[test]
    fn test_terminal_states_are_exclusive() {
        let cancelled = ResultEnvelope::cancelled(None);
        assert_eq!(RunState::from_envelope(&cancelled), RunState::Cancelled);
        assert!(!cancelled.ok);
        let timed_out = ResultEnvelope::timed_out(50, None);
        assert_eq!(RunState::from_envelope(&timed_out), RunState::TimedOut);
        assert!(RunState::TimedOut.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = ChildInvocationRequest {
            action_id: "add:abc".to_string(),
            module_import_path: "calc".to_string(),
            qualname: "add".to_string(),
            args: vec![json!(2)],
            kwargs: IndexMap::from([("b".to_string(), json!(7))]),
            working_dir: "/tmp".to_string(),
            env_overrides: BTreeMap::new(),
            sys_path: vec!["/tmp".to_string()],
            call_mode: CallMode::Call,
            argv: Vec::new(),
            prog_name: "add".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["call_mode"], json!("call"));
        assert_eq!(value["kwargs"], json!({"b": 7}));
    }
}
