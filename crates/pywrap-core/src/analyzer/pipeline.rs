//! Analysis pipeline: scan, parse, detect, extract, enrich and plan.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::analyzer::detector::{
    classify_entrypoint, cli_framework, collect_module_facts, constructs_argument_parser,
    is_exported, method_kind, FunctionDef,
};
use crate::analyzer::filesystem::{iter_python_files, SourceFile};
use crate::analyzer::hints::{infer_hint, opaque_default_hint, result_kind, HintContext};
use crate::analyzer::identity::{action_id, compute_content_hash, input_hash};
use crate::analyzer::introspect::enrich_module;
use crate::analyzer::literal::docstring;
use crate::analyzer::parser::parse_python;
use crate::analyzer::pyproject::{load_console_scripts, ConsoleScript};
use crate::analyzer::signature::{extract_parameters, extract_return, is_required, RawParam};
use crate::config::{AnalysisMode, AnalyzerConfig};
use crate::errors::{PywrapError, PywrapResult};
use crate::models::{
    ActionKind, ActionSpec, AnalysisResult, AnnotationSpec, CliFramework, EntrypointKind,
    HintLayers, IntrospectionStatus, InvocationPlan, ModuleSpec, ParamKind, ParamSpec,
    PlanStrategy, ResultKind, ReturnSpec, Warning, GENERATOR_VERSION, SCHEMA_VERSION,
    WARN_INPUT_USAGE, WARN_INTROSPECTION_FAILED, WARN_PYPROJECT_UNRESOLVED, WARN_READ_ERROR,
    WARN_SYNTAX_ERROR,
};
use crate::planner::plan_action;

/// Qualified name of the synthetic action that runs a module as a script.
pub const SCRIPT_QUALNAME: &str = "__main__";

struct AnalyzedModule {
    spec: ModuleSpec,
    ctx: HintContext,
}

/// Analyzes every Python unit under `project_root` without executing any
/// of them, then optionally enriches the result through introspection.
pub fn analyze_path(project_root: &Path, config: &AnalyzerConfig) -> PywrapResult<AnalysisResult> {
    let started = Instant::now();
    let root = project_root.canonicalize().map_err(|e| {
        PywrapError::Analysis(format!("Cannot resolve {}: {e}", project_root.display()))
    })?;
    let base = import_base(&root);

    let mut warnings = Vec::new();
    let console_scripts = load_console_scripts(&root, &mut warnings);
    let files = iter_python_files(&root, &config.include_patterns, &config.exclude_patterns)?;
    debug!("Scanned {} python files under {}", files.len(), root.display());

    let mut units: Vec<(String, String)> = Vec::with_capacity(files.len());
    let mut modules: Vec<AnalyzedModule> = Vec::new();
    for file in &files {
        let Some(source) = read_unit(file, &mut warnings) else {
            continue;
        };
        let content_hash = compute_content_hash(&source);
        units.push((file.module_id.clone(), content_hash.clone()));
        if let Some(module) = analyze_unit(file, &source, content_hash, &mut warnings)? {
            modules.push(module);
        }
    }

    attach_console_scripts(&mut modules, &console_scripts, &mut warnings);

    if config.mode == AnalysisMode::Enriched {
        for module in modules.iter_mut() {
            let sys_path = vec![import_root(&base, &module.spec.source_root)];
            let failure = enrich_module(
                &config.python,
                &sys_path,
                &module.spec.module_id,
                &mut module.spec.actions,
                config.introspect_timeout(),
                &module.ctx,
            );
            if let Some(failure) = failure {
                warnings.push(
                    Warning::new(WARN_INTROSPECTION_FAILED, failure.message)
                        .at(&module.spec.source_path, None),
                );
            }
        }
    }

    let mut specs: Vec<ModuleSpec> = modules.into_iter().map(|m| m.spec).collect();
    for module in specs.iter_mut() {
        for action in module.actions.iter_mut() {
            action.invocation = plan_action(&module.module_id, action);
        }
    }

    let fingerprint = config.fingerprint();
    let result = AnalysisResult {
        schema_version: SCHEMA_VERSION.to_string(),
        generator_version: GENERATOR_VERSION.to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        project_root: root.to_string_lossy().to_string(),
        analysis_mode: config.mode,
        input_hash: input_hash(
            units.iter().map(|(m, h)| (m.as_str(), h.as_str())),
            &fingerprint,
        ),
        modules: specs,
        warnings,
    };
    info!(
        "Analyzed {} modules ({} actions, {} warnings) in {}ms",
        result.modules.len(),
        result.action_count(),
        result.warnings.len(),
        started.elapsed().as_millis()
    );
    Ok(result)
}

/// Directory against which relative source roots resolve.
pub fn import_base(root: &Path) -> PathBuf {
    if root.is_file() {
        root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf())
    } else {
        root.to_path_buf()
    }
}

/// Absolute directory from which a module with `source_root` imports.
pub fn import_root(base: &Path, source_root: &str) -> PathBuf {
    if source_root.is_empty() {
        base.to_path_buf()
    } else {
        base.join(source_root)
    }
}

fn read_unit(file: &SourceFile, warnings: &mut Vec<Warning>) -> Option<String> {
    match std::fs::read(&file.absolute) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                warn!("Skipping {}: not valid UTF-8", file.relative);
                warnings.push(
                    Warning::new(WARN_READ_ERROR, "File is not valid UTF-8").at(&file.relative, None),
                );
                None
            }
        },
        Err(e) => {
            warn!("Skipping {}: {e}", file.relative);
            warnings.push(
                Warning::new(WARN_READ_ERROR, format!("Could not read file: {e}"))
                    .at(&file.relative, None),
            );
            None
        }
    }
}

fn analyze_unit(
    file: &SourceFile,
    source: &str,
    content_hash: String,
    warnings: &mut Vec<Warning>,
) -> PywrapResult<Option<AnalyzedModule>> {
    let unit = parse_python(source)?;
    if let Some((line, column)) = unit.first_syntax_error() {
        warn!("Skipping {}: syntax error at {line}:{column}", file.relative);
        warnings.push(
            Warning::new(WARN_SYNTAX_ERROR, format!("Invalid syntax at column {column}"))
                .at(&file.relative, Some(line)),
        );
        return Ok(None);
    }

    let facts = collect_module_facts(unit.root(), &unit.source);
    let ctx = HintContext {
        enums: facts.enums.clone(),
        dataclasses: facts.dataclasses.clone(),
    };
    for line in &facts.input_call_lines {
        warnings.push(
            Warning::new(
                WARN_INPUT_USAGE,
                "input() reads stdin, which is closed when actions run",
            )
            .at(&file.relative, Some(*line)),
        );
    }

    let mut actions = Vec::new();
    for function in &facts.functions {
        if !is_exported(&function.name, &facts) {
            continue;
        }
        let framework = cli_framework(&function.decorators, &facts);
        let kind = if framework.is_some() {
            ActionKind::CliCommand
        } else {
            ActionKind::Function
        };
        let entrypoint = classify_entrypoint(function, &facts, &unit.source);
        let mut action = build_action(
            &file.module_id,
            function,
            function.name.clone(),
            kind,
            false,
            &unit.source,
            &ctx,
        );
        action.entrypoint = entrypoint;
        action.cli_framework = framework;
        tag_action(&mut action, function, &unit.source);
        actions.push(action);
    }

    for class in &facts.classes {
        if !is_exported(&class.name, &facts) {
            continue;
        }
        for method in &class.methods {
            if method.name.starts_with('_') {
                continue;
            }
            let Some(kind) = method_kind(&method.decorators) else {
                continue;
            };
            let qualname = format!("{}.{}", class.name, method.name);
            let drop_first = kind == ActionKind::ClassMethod;
            let mut action = build_action(
                &file.module_id,
                method,
                qualname,
                kind,
                drop_first,
                &unit.source,
                &ctx,
            );
            tag_action(&mut action, method, &unit.source);
            actions.push(action);
        }
    }

    if facts.has_main_guard {
        actions.push(script_action(&file.module_id));
    }
    if actions.is_empty() {
        debug!("No actions in {}", file.relative);
        return Ok(None);
    }

    let spec = ModuleSpec {
        module_id: file.module_id.clone(),
        display_name: short_name(&file.module_id).to_string(),
        source_path: file.relative.clone(),
        source_root: file.source_root.clone(),
        content_hash,
        has_main_guard: facts.has_main_guard,
        exports: facts.exports.clone(),
        side_effect_risk: facts.side_effect_risk,
        hidden: false,
        actions,
    };
    Ok(Some(AnalyzedModule { spec, ctx }))
}

fn build_action(
    module_id: &str,
    function: &FunctionDef<'_>,
    qualified_name: String,
    kind: ActionKind,
    drop_first: bool,
    source: &str,
    ctx: &HintContext,
) -> ActionSpec {
    let mut raw = function
        .node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();
    if drop_first && raw.first().is_some_and(|p| !p.kind.is_variadic()) {
        raw.remove(0);
    }
    let kinds: Vec<ParamKind> = raw.iter().map(|p| p.kind).collect();
    let parameters: Vec<ParamSpec> = raw.into_iter().map(|p| build_param(p, ctx)).collect();

    let annotation = extract_return(function.node, source);
    let returns = ReturnSpec {
        result_kind: result_kind(&annotation.expr),
        annotation,
    };
    let doc = function
        .node
        .child_by_field_name("body")
        .and_then(|body| docstring(body, source));

    ActionSpec {
        action_id: action_id(module_id, &qualified_name, &kinds),
        display_name: title_case(&function.name),
        qualified_name,
        name: function.name.clone(),
        kind,
        entrypoint: None,
        cli_framework: None,
        doc,
        line: function.line,
        is_async: function.is_async,
        parameters,
        returns,
        invocation: InvocationPlan::new(PlanStrategy::DirectCall, false),
        introspection: IntrospectionStatus::default(),
        tags: BTreeSet::new(),
        console_scripts: Vec::new(),
        hidden: false,
    }
}

fn build_param(raw: RawParam, ctx: &HintContext) -> ParamSpec {
    let required = is_required(&raw);
    let inferred = if raw.default.is_opaque() {
        opaque_default_hint()
    } else {
        infer_hint(&raw.annotation.expr, &raw.name, raw.kind, ctx)
    };
    let hint_layers = HintLayers {
        inferred,
        inline: raw.inline,
        ..HintLayers::default()
    };
    ParamSpec {
        advanced: raw.kind == ParamKind::KeywordOnly,
        name: raw.name,
        kind: raw.kind,
        required,
        default: raw.default,
        annotation: raw.annotation,
        ui: hint_layers.effective(),
        hint_layers,
        cli: None,
    }
}

fn script_action(module_id: &str) -> ActionSpec {
    let name = short_name(module_id).to_string();
    let tags = BTreeSet::from(["script".to_string()]);
    ActionSpec {
        action_id: action_id(module_id, SCRIPT_QUALNAME, &[]),
        qualified_name: SCRIPT_QUALNAME.to_string(),
        display_name: title_case(&name),
        name,
        kind: ActionKind::Script,
        entrypoint: Some(EntrypointKind::MainGuard),
        cli_framework: None,
        doc: None,
        line: 0,
        is_async: false,
        parameters: Vec::new(),
        returns: ReturnSpec {
            annotation: AnnotationSpec::missing(),
            result_kind: ResultKind::None,
        },
        invocation: InvocationPlan::new(PlanStrategy::ScriptPath, true),
        introspection: IntrospectionStatus::default(),
        tags,
        console_scripts: Vec::new(),
        hidden: false,
    }
}

fn tag_action(action: &mut ActionSpec, function: &FunctionDef<'_>, source: &str) {
    if let Some(entrypoint) = action.entrypoint {
        action.tags.insert(entrypoint_tag(entrypoint).to_string());
    }
    if let Some(framework) = action.cli_framework {
        let name = match framework {
            CliFramework::Click => "click",
            CliFramework::Typer => "typer",
            CliFramework::Unknown => "unknown",
        };
        action.tags.insert(format!("cli:{name}"));
    }
    if function.is_async {
        action.tags.insert("async".to_string());
    }
    if constructs_argument_parser(function.node, source) {
        action.tags.insert("argparse".to_string());
    }
}

fn entrypoint_tag(kind: EntrypointKind) -> &'static str {
    match kind {
        EntrypointKind::MainGuard => "main_guard",
        EntrypointKind::CliDecorator => "cli_decorator",
        EntrypointKind::ArgumentParser => "argument_parser",
        EntrypointKind::CanonicalName => "canonical_name",
    }
}

fn attach_console_scripts(
    modules: &mut [AnalyzedModule],
    scripts: &[ConsoleScript],
    warnings: &mut Vec<Warning>,
) {
    for script in scripts {
        let action = modules
            .iter_mut()
            .filter(|m| m.spec.module_id == script.module)
            .flat_map(|m| m.spec.actions.iter_mut())
            .find(|a| a.kind != ActionKind::Script && a.qualified_name == script.attr_path);
        match action {
            Some(action) => {
                action.console_scripts.push(script.name.clone());
                action.tags.insert(format!("console_script:{}", script.name));
            }
            None => {
                debug!("Console script {} has no matching action", script.name);
                warnings.push(
                    Warning::new(
                        WARN_PYPROJECT_UNRESOLVED,
                        format!(
                            "Console script '{}' targets {} which is not an analyzed action",
                            script.name,
                            script.target()
                        ),
                    )
                    .at("pyproject.toml", None),
                );
            }
        }
    }
}

fn short_name(module_id: &str) -> &str {
    module_id.rsplit('.').next().unwrap_or(module_id)
}

/// `add_numbers` -> `Add Numbers`.
pub fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TypeExpr, WidgetKind};
    use crate::test_support::python_for_tests;

    fn write(root: &Path, relative: &str, text: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    fn analyze(root: &Path) -> AnalysisResult {
        analyze_path(root, &AnalyzerConfig::default()).unwrap()
    }

    fn action<'a>(result: &'a AnalysisResult, module_id: &str, qualname: &str) -> &'a ActionSpec {
        result
            .module(module_id)
            .unwrap()
            .actions
            .iter()
            .find(|a| a.qualified_name == qualname)
            .unwrap()
    }

    #[test]
    fn test_add_has_two_required_int_params() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "calc.py", "def add(a: int, b: int) -> int:\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n");
        let result = analyze(dir.path());

        let add = action(&result, "calc", "add");
        assert_eq!(add.kind, ActionKind::Function);
        assert_eq!(add.doc.as_deref(), Some("Add two numbers."));
        assert_eq!(add.parameters.len(), 2);
        for param in &add.parameters {
            assert!(param.required);
            assert_eq!(param.annotation.expr, TypeExpr::name("int"));
            assert_eq!(param.ui.widget, WidgetKind::SpinBox);
        }
        assert_eq!(add.returns.result_kind, ResultKind::Json);
        assert_eq!(add.invocation.strategy, PlanStrategy::DirectCall);
        assert!(!add.invocation.raw_args);
        assert_eq!(add.display_name, "Add");
    }

    #[test]
    fn test_path_param_gets_file_picker() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "files.py",
            "from pathlib import Path\n\ndef load(path: Path, limit: int = 3) -> str:\n    return ''\n",
        );
        let result = analyze(dir.path());
        let load = action(&result, "files", "load");
        assert_eq!(load.parameters[0].ui.widget, WidgetKind::FilePicker);
        assert!(!load.parameters[1].required);
        assert_eq!(load.parameters[1].default.literal, Some(serde_json::json!(3)));
    }

    #[test]
    fn test_run_is_canonical_entrypoint() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "job.py", "def run():\n    pass\n\ndef helper():\n    pass\n");
        let result = analyze(dir.path());
        let run = action(&result, "job", "run");
        assert_eq!(run.entrypoint, Some(EntrypointKind::CanonicalName));
        assert!(run.tags.contains("canonical_name"));
        assert_eq!(action(&result, "job", "helper").entrypoint, None);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.py", "def beta(x: float = 1.5):\n    pass\n");
        write(dir.path(), "a.py", "def alpha(*items: str, **extra):\n    pass\n");
        write(dir.path(), "pkg/__init__.py", "");
        write(dir.path(), "pkg/tool.py", "def go(flag: bool = False):\n    pass\n\nif __name__ == '__main__':\n    go()\n");

        let mut first = analyze(dir.path());
        let mut second = analyze(dir.path());
        first.created_at.clear();
        second.created_at.clear();
        assert_eq!(first.to_json_pretty().unwrap(), second.to_json_pretty().unwrap());

        let ids: Vec<&str> = first.modules.iter().map(|m| m.module_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "pkg.tool"]);
    }

    #[test]
    fn test_action_id_survives_reformatting() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "m.py", "def f(a: int, b=2):\n    return a\n");
        let before = analyze(dir.path());

        write(
            dir.path(),
            "m.py",
            "# a comment\n\n\ndef f(\n    a: str,  # renamed type\n    b = 3,\n):\n    '''Docs.'''\n    return a\n",
        );
        let after = analyze(dir.path());

        assert_eq!(action(&before, "m", "f").action_id, action(&after, "m", "f").action_id);
        assert_ne!(before.input_hash, after.input_hash);
        assert_ne!(
            before.module("m").unwrap().content_hash,
            after.module("m").unwrap().content_hash
        );
    }

    #[test]
    fn test_analysis_never_imports_modules() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "explosive.py",
            "import time\ntime.sleep(60)\nraise SystemExit('imported!')\n\ndef work(n: int) -> int:\n    return n\n",
        );
        let started = Instant::now();
        let result = analyze(dir.path());
        assert!(started.elapsed().as_secs() < 30);

        let module = result.module("explosive").unwrap();
        assert!(module.side_effect_risk);
        assert_eq!(module.actions[0].name, "work");
        assert!(!module.actions[0].introspection.attempted);
    }

    #[test]
    fn test_syntax_errors_are_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.py", "def broken(:\n    pass\n");
        write(dir.path(), "good.py", "def fine():\n    pass\n");
        let result = analyze(dir.path());
        assert!(result.module("bad").is_none());
        assert!(result.module("good").is_some());
        let warning = result
            .warnings
            .iter()
            .find(|w| w.code == WARN_SYNTAX_ERROR)
            .unwrap();
        assert_eq!(warning.file_path.as_deref(), Some("bad.py"));
        assert_eq!(warning.line, Some(1));
    }

    #[test]
    fn test_class_methods_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "shapes.py",
            r#"__all__ = ["Shape", "area"]

class Shape:
    @staticmethod
    def unit() -> int:
        return 1

    @classmethod
    def named(cls, name: str):
        return cls()

    def area(self):
        return 0

    @staticmethod
    def _secret():
        pass


def area(w: float, h: float) -> float:
    return w * h


def perimeter(w: float, h: float) -> float:
    return 2 * (w + h)
"#,
        );
        let result = analyze(dir.path());
        let names: Vec<&str> = result.modules[0]
            .actions
            .iter()
            .map(|a| a.qualified_name.as_str())
            .collect();
        assert_eq!(names, vec!["area", "Shape.unit", "Shape.named"]);

        let named = action(&result, "shapes", "Shape.named");
        assert_eq!(named.kind, ActionKind::ClassMethod);
        assert_eq!(named.parameters.len(), 1);
        assert_eq!(named.parameters[0].name, "name");
    }

    #[test]
    fn test_script_action_for_package_module() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/__init__.py", "");
        write(dir.path(), "pkg/cli.py", "import sys\n\nif __name__ == \"__main__\":\n    print(sys.argv)\n");
        write(dir.path(), "standalone.py", "if __name__ == '__main__':\n    print('hi')\n");
        let result = analyze(dir.path());

        let script = action(&result, "pkg.cli", SCRIPT_QUALNAME);
        assert_eq!(script.kind, ActionKind::Script);
        assert_eq!(script.name, "cli");
        assert_eq!(script.invocation.strategy, PlanStrategy::ModuleAsScript);
        assert!(script.invocation.raw_args);
        assert!(script.tags.contains("script"));
        let standalone = action(&result, "standalone", SCRIPT_QUALNAME);
        assert_eq!(standalone.invocation.strategy, PlanStrategy::ScriptPath);
    }

    #[test]
    fn test_cli_commands_without_enrichment_use_generic_cli() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "tool.py",
            "import click\n\n@click.command()\n@click.option('--count', default=1)\ndef hello(count):\n    pass\n\nimport argparse\n\ndef parse():\n    p = argparse.ArgumentParser()\n    return p.parse_args()\n",
        );
        let result = analyze(dir.path());
        let hello = action(&result, "tool", "hello");
        assert_eq!(hello.kind, ActionKind::CliCommand);
        assert_eq!(hello.cli_framework, Some(CliFramework::Click));
        assert_eq!(hello.invocation.strategy, PlanStrategy::GenericCli);
        assert!(hello.invocation.raw_args);
        assert!(hello.tags.contains("cli:click"));

        let parse = action(&result, "tool", "parse");
        assert_eq!(parse.entrypoint, Some(EntrypointKind::ArgumentParser));
        assert_eq!(parse.invocation.strategy, PlanStrategy::GenericCli);
    }

    #[test]
    fn test_console_scripts_are_attached() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pyproject.toml",
            "[project]\nname = \"demo\"\n\n[project.scripts]\ndemo = \"demo.cli:main\"\nghost = \"demo.cli:missing\"\n",
        );
        write(dir.path(), "src/demo/__init__.py", "");
        write(dir.path(), "src/demo/cli.py", "def main():\n    pass\n");
        let result = analyze(dir.path());

        let module = result.module("demo.cli").unwrap();
        assert_eq!(module.source_root, "src");
        let main = action(&result, "demo.cli", "main");
        assert_eq!(main.console_scripts, vec!["demo".to_string()]);
        assert!(main.tags.contains("console_script:demo"));
        assert_eq!(main.invocation.strategy, PlanStrategy::ConsoleScriptEntrypoint);
        assert_eq!(main.invocation.console_script.as_deref(), Some("demo"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == WARN_PYPROJECT_UNRESOLVED && w.message.contains("ghost")));
    }

    #[test]
    fn test_input_usage_and_opaque_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "ask.py",
            "import os\n\ndef ask(count: int = os.cpu_count(), *, verbose: bool = False):\n    return input('name? ')\n",
        );
        let result = analyze(dir.path());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == WARN_INPUT_USAGE && w.line == Some(4)));

        let ask = action(&result, "ask", "ask");
        let count = &ask.parameters[0];
        assert!(count.default.is_opaque());
        assert_eq!(count.default.source.as_deref(), Some("os.cpu_count()"));
        assert_eq!(count.ui.widget, WidgetKind::LineEdit);
        assert!(ask.parameters[1].advanced);
        assert_eq!(ask.parameters[1].ui.widget, WidgetKind::CheckBox);
    }

    #[test]
    fn test_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "test_tool.py", "def main():\n    pass\n");
        let result = analyze(&dir.path().join("test_tool.py"));
        assert_eq!(result.modules.len(), 1);
        assert_eq!(result.modules[0].module_id, "test_tool");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze_path(&dir.path().join("nope"), &AnalyzerConfig::default()).unwrap_err();
        assert!(matches!(err, PywrapError::Analysis(_)));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("add_numbers"), "Add Numbers");
        assert_eq!(title_case("_private__name"), "Private Name");
    }

    #[test]
    fn test_enriched_mode_resolves_annotations() {
        let Some(python) = python_for_tests() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "alias.py",
            "from typing import List\nNumbers = List[int]\n\ndef total(values: Numbers, scale=2) -> int:\n    return sum(values) * scale\n",
        );
        let config = AnalyzerConfig {
            python,
            introspect_timeout_ms: 20_000,
            ..AnalyzerConfig::default()
        }
        .with_mode(AnalysisMode::Enriched);
        let result = analyze_path(dir.path(), &config).unwrap();

        let total = action(&result, "alias", "total");
        assert!(total.introspection.attempted);
        assert!(total.introspection.success);
        let values = &total.parameters[0];
        assert!(values.annotation.resolved.is_some());
        assert_eq!(values.ui.widget, WidgetKind::PlainTextEdit);
        assert_eq!(total.parameters[1].default.literal, Some(serde_json::json!(2)));
        assert_eq!(result.analysis_mode, AnalysisMode::Enriched);
    }
}
