//! Invocation planning: one strategy per action, and the concrete process
//! launch for an action plus its input values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::analyzer::pipeline::{import_base, import_root};
use crate::config::ExecutionConfig;
use crate::errors::{PywrapError, PywrapResult};
use crate::models::{
    ActionKind, ActionSpec, AnalysisResult, CliBindingMode, CliFramework, EntrypointKind,
    InvocationPlan, ModuleSpec, ParamSpec, PlanStrategy,
};
use crate::runtime::protocol::{CallMode, ChildInvocationRequest};
use crate::runtime::shim::shim_args;
use crate::runtime::wire::ActionInput;

/// Picks exactly one plan for `action`; the first matching rule wins.
pub fn plan_action(module_id: &str, action: &ActionSpec) -> InvocationPlan {
    if action.kind == ActionKind::Script {
        let strategy = if module_id.contains('.') {
            PlanStrategy::ModuleAsScript
        } else {
            PlanStrategy::ScriptPath
        };
        return InvocationPlan::new(strategy, true);
    }

    if let Some(script) = action.console_scripts.first() {
        let mut plan = InvocationPlan::new(PlanStrategy::ConsoleScriptEntrypoint, true);
        plan.console_script = Some(script.clone());
        return plan;
    }

    match action.cli_framework {
        Some(framework @ (CliFramework::Click | CliFramework::Typer)) => {
            let status = &action.introspection;
            if status.success && status.cli_params_resolved > 0 {
                let strategy = if framework == CliFramework::Click {
                    PlanStrategy::ClickCommand
                } else {
                    PlanStrategy::TyperCommand
                };
                let partial = action.parameters.iter().any(|p| !is_structured(p));
                return InvocationPlan::new(strategy, partial);
            }
            return InvocationPlan::new(PlanStrategy::GenericCli, true);
        }
        Some(CliFramework::Unknown) => return InvocationPlan::new(PlanStrategy::GenericCli, true),
        None => {}
    }

    if action.entrypoint == Some(EntrypointKind::ArgumentParser) || action.tags.contains("argparse")
    {
        return InvocationPlan::new(PlanStrategy::GenericCli, true);
    }
    InvocationPlan::new(PlanStrategy::DirectCall, false)
}

fn is_structured(param: &ParamSpec) -> bool {
    param
        .cli
        .as_ref()
        .is_some_and(|binding| binding.mode == CliBindingMode::Structured)
}

/// Everything needed to start one child process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub action_id: String,
    pub strategy: PlanStrategy,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Present when the child is the shim and reports through the
    /// side-channel.
    pub request: Option<ChildInvocationRequest>,
}

fn split_raw(raw: Option<&str>) -> PywrapResult<Vec<String>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(text) => shlex::split(text)
            .ok_or_else(|| PywrapError::Planning(format!("Unbalanced quoting in arguments: {text}"))),
    }
}

fn token_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Command-line tokens for the structured parameters of a CLI command.
///
/// Positional values (`input.args`) lead in their given order, then options,
/// then keyword-bound arguments.
pub fn structured_argv(
    action: &ActionSpec,
    input: &ActionInput,
    framework: CliFramework,
) -> Vec<String> {
    let mut argv: Vec<String> = input
        .args
        .iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().map(token_of).collect::<Vec<_>>(),
            single => vec![token_of(single)],
        })
        .collect();
    let mut arguments = Vec::new();
    for param in &action.parameters {
        let Some(value) = input.kwargs.get(&param.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let Some(binding) = param.cli.as_ref().filter(|b| b.mode == CliBindingMode::Structured)
        else {
            debug!("Parameter {} has no structured binding; use raw arguments", param.name);
            continue;
        };
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        if binding.is_argument {
            arguments.extend(values.into_iter().map(token_of));
            continue;
        }
        let Some(opt) = binding.opts.first() else {
            continue;
        };
        if binding.is_flag {
            match value {
                Value::Bool(true) => argv.push(opt.clone()),
                Value::Bool(false) if framework == CliFramework::Typer => {
                    argv.push(format!("--no-{}", opt.trim_start_matches('-')));
                }
                _ => {}
            }
            continue;
        }
        for v in values {
            argv.push(opt.clone());
            argv.push(token_of(v));
        }
    }
    argv.extend(arguments);
    argv
}

fn find_module<'a>(
    result: &'a AnalysisResult,
    action_id: &str,
) -> PywrapResult<(&'a ModuleSpec, &'a ActionSpec)> {
    result
        .find_action(action_id)
        .ok_or_else(|| PywrapError::Planning(format!("Unknown action: {action_id}")))
}

/// Absolute path of a module's source file.
pub fn module_file(result: &AnalysisResult, module: &ModuleSpec) -> PathBuf {
    let root = Path::new(&result.project_root);
    if root.is_file() {
        root.to_path_buf()
    } else {
        root.join(&module.source_path)
    }
}

/// Turns an action and its converted input into a process launch.
pub fn prepare_launch(
    result: &AnalysisResult,
    action_id: &str,
    input: &ActionInput,
    config: &ExecutionConfig,
) -> PywrapResult<LaunchSpec> {
    let (module, action) = find_module(result, action_id)?;
    let plan = &action.invocation;
    let base = import_base(Path::new(&result.project_root));
    let working_dir = import_root(&base, &module.source_root);
    let raw = split_raw(input.raw_args.as_deref())?;
    if !raw.is_empty() && !plan.raw_args {
        return Err(PywrapError::Planning(format!(
            "Action {action_id} does not accept raw arguments"
        )));
    }

    let direct = |program: String, args: Vec<String>| LaunchSpec {
        action_id: action_id.to_string(),
        strategy: plan.strategy,
        program,
        args,
        working_dir: working_dir.clone(),
        env: input.env.clone(),
        request: None,
    };

    let (call_mode, argv) = match plan.strategy {
        PlanStrategy::ScriptPath => {
            let mut args = vec![module_file(result, module).to_string_lossy().to_string()];
            args.extend(raw);
            return Ok(direct(config.python.clone(), args));
        }
        PlanStrategy::ModuleAsScript => {
            let mut args = vec!["-m".to_string(), module.module_id.clone()];
            args.extend(raw);
            return Ok(direct(config.python.clone(), args));
        }
        PlanStrategy::ConsoleScriptEntrypoint => {
            let program = plan.console_script.clone().ok_or_else(|| {
                PywrapError::Planning(format!("Action {action_id} has no console script"))
            })?;
            return Ok(direct(program, raw));
        }
        PlanStrategy::DirectCall => (CallMode::Call, Vec::new()),
        PlanStrategy::ClickCommand => {
            let mut argv = structured_argv(action, input, CliFramework::Click);
            argv.extend(raw);
            (CallMode::ClickMain, argv)
        }
        PlanStrategy::TyperCommand => {
            let mut argv = structured_argv(action, input, CliFramework::Typer);
            argv.extend(raw);
            (CallMode::TyperMain, argv)
        }
        PlanStrategy::GenericCli => (CallMode::Argv, raw),
    };

    let request = ChildInvocationRequest {
        action_id: action_id.to_string(),
        module_import_path: module.module_id.clone(),
        qualname: action.qualified_name.clone(),
        args: if call_mode == CallMode::Call {
            input.args.clone()
        } else {
            Vec::new()
        },
        kwargs: if call_mode == CallMode::Call {
            input.kwargs.clone()
        } else {
            Default::default()
        },
        working_dir: working_dir.to_string_lossy().to_string(),
        env_overrides: input.env.clone(),
        sys_path: vec![working_dir.to_string_lossy().to_string()],
        call_mode,
        argv,
        prog_name: action.name.clone(),
    };
    let mut spec = direct(config.python.clone(), shim_args());
    spec.request = Some(request);
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_path;
    use crate::config::AnalyzerConfig;
    use crate::models::{CliBinding, IntrospectionStatus};
    use indexmap::IndexMap;
    use serde_json::json;

    fn analyzed(files: &[(&str, &str)]) -> (tempfile::TempDir, AnalysisResult) {
        let dir = tempfile::tempdir().unwrap();
        for (relative, text) in files {
            let path = dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }
        let result = analyze_path(dir.path(), &AnalyzerConfig::default()).unwrap();
        (dir, result)
    }

    fn id_of(result: &AnalysisResult, qualname: &str) -> String {
        result
            .modules
            .iter()
            .flat_map(|m| m.actions.iter())
            .find(|a| a.qualified_name == qualname)
            .map(|a| a.action_id.clone())
            .unwrap()
    }

    fn binding(opts: &[&str], is_flag: bool, is_argument: bool) -> Option<CliBinding> {
        Some(CliBinding {
            mode: CliBindingMode::Structured,
            opts: opts.iter().map(|s| s.to_string()).collect(),
            is_flag,
            is_argument,
        })
    }

    #[test]
    fn test_direct_call_launch() {
        let (_dir, result) = analyzed(&[("src/calc.py", "def add(a: int, b: int) -> int:\n    return a + b\n")]);
        let id = id_of(&result, "add");
        let input = ActionInput {
            args: vec![json!(2)],
            kwargs: IndexMap::from([("b".to_string(), json!(7))]),
            ..ActionInput::default()
        };
        let launch = prepare_launch(&result, &id, &input, &ExecutionConfig::default()).unwrap();
        assert_eq!(launch.strategy, PlanStrategy::DirectCall);
        assert_eq!(launch.args[0], "-c");
        assert!(launch.working_dir.ends_with("src"));
        let request = launch.request.unwrap();
        assert_eq!(request.module_import_path, "calc");
        assert_eq!(request.call_mode, CallMode::Call);
        assert_eq!(request.args, vec![json!(2)]);
        assert_eq!(request.sys_path, vec![launch.working_dir.to_string_lossy().to_string()]);
    }

    #[test]
    fn test_direct_call_rejects_raw_args() {
        let (_dir, result) = analyzed(&[("m.py", "def f():\n    pass\n")]);
        let input = ActionInput {
            raw_args: Some("--x 1".to_string()),
            ..ActionInput::default()
        };
        let err = prepare_launch(&result, &id_of(&result, "f"), &input, &ExecutionConfig::default())
            .unwrap_err();
        assert!(matches!(err, PywrapError::Planning(_)));
    }

    #[test]
    fn test_script_launches_run_the_file() {
        let (_dir, result) = analyzed(&[
            ("tool.py", "if __name__ == '__main__':\n    pass\n"),
            ("pkg/__init__.py", ""),
            ("pkg/job.py", "if __name__ == '__main__':\n    pass\n"),
        ]);
        let config = ExecutionConfig::default();
        let input = ActionInput {
            raw_args: Some("--name 'two words'".to_string()),
            ..ActionInput::default()
        };
        let scripts: Vec<&ActionSpec> = result
            .modules
            .iter()
            .flat_map(|m| m.actions.iter())
            .filter(|a| a.kind == ActionKind::Script)
            .collect();
        assert_eq!(scripts.len(), 2);

        let module_launch = prepare_launch(&result, &scripts[0].action_id, &input, &config).unwrap();
        assert_eq!(module_launch.args, vec!["-m", "pkg.job", "--name", "two words"]);
        assert!(module_launch.request.is_none());

        let file_launch = prepare_launch(&result, &scripts[1].action_id, &input, &config).unwrap();
        assert!(file_launch.args[0].ends_with("tool.py"));
        assert_eq!(file_launch.args[1..], ["--name", "two words"]);
    }

    #[test]
    fn test_unbalanced_quotes_are_a_planning_error() {
        let (_dir, result) = analyzed(&[("tool.py", "if __name__ == '__main__':\n    pass\n")]);
        let input = ActionInput {
            raw_args: Some("--name 'oops".to_string()),
            ..ActionInput::default()
        };
        let id = id_of(&result, "__main__");
        assert!(prepare_launch(&result, &id, &input, &ExecutionConfig::default()).is_err());
    }

    #[test]
    fn test_plan_rules() {
        let (_dir, mut result) = analyzed(&[(
            "cli.py",
            "import click\n\n@click.command()\n@click.option('--count')\n@click.argument('name')\ndef hello(count, name):\n    pass\n",
        )]);
        let action = &mut result.modules[0].actions[0];
        assert_eq!(plan_action("cli", action).strategy, PlanStrategy::GenericCli);

        action.introspection = IntrospectionStatus {
            attempted: true,
            success: true,
            cli_params_resolved: 2,
            ..IntrospectionStatus::default()
        };
        action.parameters[0].cli = binding(&["--count"], false, false);
        action.parameters[1].cli = binding(&[], false, true);
        let plan = plan_action("cli", action);
        assert_eq!(plan.strategy, PlanStrategy::ClickCommand);
        assert!(!plan.raw_args);

        action.parameters[1].cli = None;
        assert!(plan_action("cli", action).raw_args);

        action.console_scripts.push("hello".to_string());
        let plan = plan_action("cli", action);
        assert_eq!(plan.strategy, PlanStrategy::ConsoleScriptEntrypoint);
        assert_eq!(plan.console_script.as_deref(), Some("hello"));
    }

    #[test]
    fn test_structured_argv() {
        let (_dir, mut result) = analyzed(&[(
            "cli.py",
            "import typer\napp = typer.Typer()\n\n@app.command()\ndef go(name: str, tags: list[str] = [], loud: bool = False, quiet: bool = True):\n    pass\n",
        )]);
        let action = &mut result.modules[0].actions[0];
        action.parameters[0].cli = binding(&[], false, true);
        action.parameters[1].cli = binding(&["--tags"], false, false);
        action.parameters[2].cli = binding(&["--loud"], true, false);
        action.parameters[3].cli = binding(&["--quiet"], true, false);
        let input = ActionInput {
            kwargs: IndexMap::from([
                ("name".to_string(), json!("bob")),
                ("tags".to_string(), json!(["a", "b"])),
                ("loud".to_string(), json!(true)),
                ("quiet".to_string(), json!(false)),
            ]),
            ..ActionInput::default()
        };
        let argv = structured_argv(action, &input, CliFramework::Typer);
        assert_eq!(
            argv,
            vec!["--tags", "a", "--tags", "b", "--loud", "--no-quiet", "bob"]
        );
        let click_argv = structured_argv(action, &input, CliFramework::Click);
        assert!(!click_argv.contains(&"--no-quiet".to_string()));
    }

    #[test]
    fn test_structured_argv_keeps_positional_values() {
        let (_dir, mut result) = analyzed(&[(
            "cli.py",
            "import click\n\n@click.command()\ndef copy(src, dst, /, force: bool = False):\n    pass\n",
        )]);
        let action = &mut result.modules[0].actions[0];
        action.parameters[0].cli = binding(&[], false, true);
        action.parameters[1].cli = binding(&[], false, true);
        action.parameters[2].cli = binding(&["--force"], true, false);
        let input = ActionInput {
            args: vec![json!("a.txt"), json!(["b.txt", 3])],
            kwargs: IndexMap::from([("force".to_string(), json!(true))]),
            ..ActionInput::default()
        };
        let argv = structured_argv(action, &input, CliFramework::Click);
        assert_eq!(argv, vec!["a.txt", "b.txt", "3", "--force"]);
    }
}
