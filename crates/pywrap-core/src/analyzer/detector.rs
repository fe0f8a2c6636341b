//! Entrypoint and public-surface detection over a parsed module.
//!
//! Detection is structural: decorators, guards and constructor calls are
//! recognised by shape, never by importing anything.

use std::collections::{BTreeMap, BTreeSet};

use tree_sitter::Node;

use crate::analyzer::literal::{eval_literal, string_value};
use crate::analyzer::parser::{dotted_name, line_of, named_children, node_text, walk_named};
use crate::analyzer::types::option_text;
use crate::models::{ActionKind, CliFramework, EntrypointKind};

/// Conventional entrypoint names, consulted last.
pub const CANONICAL_NAMES: &[&str] = &["main", "run", "cli", "start", "execute"];

const CLICK_DECORATORS: &[&str] = &["click.command", "click.group"];
const TYPER_DECORATORS: &[&str] = &["typer.command", "app.command"];
const BARE_CLI_DECORATORS: &[&str] = &["command", "group"];

/// A top-level or class-level function definition.
#[derive(Debug, Clone)]
pub struct FunctionDef<'t> {
    pub name: String,
    pub node: Node<'t>,
    pub decorators: Vec<String>,
    pub line: usize,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct ClassDef<'t> {
    pub name: String,
    pub line: usize,
    pub methods: Vec<FunctionDef<'t>>,
}

/// Everything the builder needs to know about one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleFacts<'t> {
    pub functions: Vec<FunctionDef<'t>>,
    pub classes: Vec<ClassDef<'t>>,
    pub exports: Option<Vec<String>>,
    pub has_main_guard: bool,
    /// Names called directly inside the main guard.
    pub main_guard_calls: BTreeSet<String>,
    pub imports_click: bool,
    pub imports_typer: bool,
    pub enums: BTreeMap<String, Vec<String>>,
    pub dataclasses: BTreeSet<String>,
    pub side_effect_risk: bool,
    pub input_call_lines: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decorator_name(decorator: Node<'_>, source: &str) -> Option<String> {
    let expr = named_children(decorator).into_iter().next()?;
    let target = if expr.kind() == "call" {
        expr.child_by_field_name("function")?
    } else {
        expr
    };
    dotted_name(target, source)
}

fn function_def<'t>(node: Node<'t>, decorators: Vec<String>, source: &str) -> Option<FunctionDef<'t>> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let is_async = {
        let mut cursor = node.walk();
        let first = node.children(&mut cursor).next();
        first.is_some_and(|first| first.kind() == "async")
    };
    Some(FunctionDef {
        name,
        node,
        decorators,
        line: line_of(node),
        is_async,
    })
}

/// Unwraps `decorated_definition` into (definition, decorator names).
fn unwrap_decorated<'t>(node: Node<'t>, source: &str) -> Option<(Node<'t>, Vec<String>)> {
    match node.kind() {
        "decorated_definition" => {
            let definition = node.child_by_field_name("definition")?;
            let decorators = named_children(node)
                .into_iter()
                .filter(|c| c.kind() == "decorator")
                .filter_map(|d| decorator_name(d, source))
                .collect();
            Some((definition, decorators))
        }
        "function_definition" | "class_definition" => Some((node, Vec::new())),
        _ => None,
    }
}

fn is_main_check(condition: Node<'_>, source: &str) -> bool {
    if condition.kind() != "comparison_operator" {
        return false;
    }
    let operands = named_children(condition);
    if operands.len() != 2 {
        return false;
    }
    let is_equality = {
        let mut cursor = condition.walk();
        let ops: Vec<&str> = condition
            .children_by_field_name("operators", &mut cursor)
            .map(|op| node_text(op, source))
            .collect();
        ops == ["=="]
    };
    if !is_equality {
        return false;
    }
    let is_name = |n: Node<'_>| n.kind() == "identifier" && node_text(n, source) == "__name__";
    let is_main = |n: Node<'_>| {
        n.kind() == "string" && string_value(node_text(n, source)).as_deref() == Some("__main__")
    };
    (is_name(operands[0]) && is_main(operands[1])) || (is_main(operands[0]) && is_name(operands[1]))
}

fn collect_called_names(node: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    walk_named(node, &mut |n| {
        if n.kind() == "call" {
            if let Some(function) = n.child_by_field_name("function") {
                if let Some(name) = dotted_name(function, source) {
                    names.insert(name);
                }
            }
        }
    });
}

fn is_enum_class(class: Node<'_>, source: &str) -> bool {
    let Some(bases) = class.child_by_field_name("superclasses") else {
        return false;
    };
    named_children(bases).into_iter().any(|base| {
        dotted_name(base, source)
            .and_then(|name| name.rsplit('.').next().map(str::to_string))
            .is_some_and(|name| name.ends_with("Enum"))
    })
}

fn enum_members(class: Node<'_>, source: &str) -> Vec<String> {
    let Some(body) = class.child_by_field_name("body") else {
        return Vec::new();
    };
    let mut members = Vec::new();
    for stmt in named_children(body) {
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let Some(assignment) = named_children(stmt).into_iter().next() else {
            continue;
        };
        if assignment.kind() != "assignment" {
            continue;
        }
        let Some(left) = assignment.child_by_field_name("left") else {
            continue;
        };
        if left.kind() != "identifier" {
            continue;
        }
        let name = node_text(left, source);
        if name.starts_with('_') {
            continue;
        }
        let value = assignment
            .child_by_field_name("right")
            .and_then(|right| eval_literal(right, source));
        match value {
            Some(serde_json::Value::Null) | None => members.push(name.to_string()),
            Some(value) => members.push(option_text(&value)),
        }
    }
    members
}

fn is_dataclass(decorators: &[String]) -> bool {
    decorators
        .iter()
        .any(|d| d == "dataclass" || d == "dataclasses.dataclass")
}

fn exports_of(assignment: Node<'_>, source: &str) -> Option<Vec<String>> {
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "identifier" || node_text(left, source) != "__all__" {
        return None;
    }
    let right = assignment.child_by_field_name("right")?;
    if !matches!(right.kind(), "list" | "tuple") {
        return None;
    }
    Some(
        named_children(right)
            .into_iter()
            .filter(|el| el.kind() == "string")
            .filter_map(|el| string_value(node_text(el, source)))
            .collect(),
    )
}

fn is_safe_statement(stmt: Node<'_>, source: &str) -> bool {
    match stmt.kind() {
        "import_statement"
        | "import_from_statement"
        | "future_import_statement"
        | "function_definition"
        | "class_definition"
        | "decorated_definition"
        | "pass_statement" => true,
        "if_statement" => stmt
            .child_by_field_name("condition")
            .is_some_and(|c| is_main_check(c, source)),
        "expression_statement" => {
            let Some(expr) = named_children(stmt).into_iter().next() else {
                return true;
            };
            match expr.kind() {
                "string" | "concatenated_string" => true,
                "assignment" => {
                    let left_is_name = expr
                        .child_by_field_name("left")
                        .is_some_and(|l| l.kind() == "identifier");
                    if !left_is_name {
                        return false;
                    }
                    if exports_of(expr, source).is_some() {
                        return true;
                    }
                    match expr.child_by_field_name("right") {
                        None => true,
                        Some(right) => eval_literal(right, source).is_some(),
                    }
                }
                _ => false,
            }
        }
        _ => false,
    }
}

fn note_imports(stmt: Node<'_>, source: &str, facts: &mut ModuleFacts<'_>) {
    let modules: Vec<String> = match stmt.kind() {
        "import_statement" => named_children(stmt)
            .into_iter()
            .map(|n| {
                let target = if n.kind() == "aliased_import" {
                    n.child_by_field_name("name").unwrap_or(n)
                } else {
                    n
                };
                node_text(target, source).to_string()
            })
            .collect(),
        "import_from_statement" => stmt
            .child_by_field_name("module_name")
            .map(|m| vec![node_text(m, source).to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    for module in modules {
        let root = module.split('.').next().unwrap_or_default().trim();
        match root {
            "click" => facts.imports_click = true,
            "typer" => facts.imports_typer = true,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Module facts
// ---------------------------------------------------------------------------

pub fn collect_module_facts<'t>(root: Node<'t>, source: &str) -> ModuleFacts<'t> {
    let mut facts = ModuleFacts::default();

    for stmt in named_children(root) {
        if !is_safe_statement(stmt, source) {
            facts.side_effect_risk = true;
        }
        match stmt.kind() {
            "import_statement" | "import_from_statement" => note_imports(stmt, source, &mut facts),
            "if_statement" => {
                let is_guard = stmt
                    .child_by_field_name("condition")
                    .is_some_and(|c| is_main_check(c, source));
                if is_guard {
                    facts.has_main_guard = true;
                    if let Some(body) = stmt.child_by_field_name("consequence") {
                        collect_called_names(body, source, &mut facts.main_guard_calls);
                    }
                }
            }
            "expression_statement" => {
                if let Some(expr) = named_children(stmt).into_iter().next() {
                    if expr.kind() == "assignment" && facts.exports.is_none() {
                        facts.exports = exports_of(expr, source);
                    }
                }
            }
            "function_definition" | "class_definition" | "decorated_definition" => {
                let Some((definition, decorators)) = unwrap_decorated(stmt, source) else {
                    continue;
                };
                if definition.kind() == "function_definition" {
                    if let Some(def) = function_def(definition, decorators, source) {
                        facts.functions.push(def);
                    }
                } else if definition.kind() == "class_definition" {
                    collect_class(definition, decorators, source, &mut facts);
                }
            }
            _ => {}
        }
    }

    walk_named(root, &mut |n| {
        if n.kind() == "call" {
            let is_input = n
                .child_by_field_name("function")
                .is_some_and(|f| f.kind() == "identifier" && node_text(f, source) == "input");
            if is_input {
                facts.input_call_lines.push(line_of(n));
            }
        }
    });

    facts
}

fn collect_class<'t>(
    class: Node<'t>,
    decorators: Vec<String>,
    source: &str,
    facts: &mut ModuleFacts<'t>,
) {
    let Some(name_node) = class.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();

    if is_enum_class(class, source) {
        let members = enum_members(class, source);
        if !members.is_empty() {
            facts.enums.insert(name.clone(), members);
        }
    }
    if is_dataclass(&decorators) {
        facts.dataclasses.insert(name.clone());
    }

    let mut methods = Vec::new();
    if let Some(body) = class.child_by_field_name("body") {
        for member in named_children(body) {
            let Some((definition, member_decorators)) = unwrap_decorated(member, source) else {
                continue;
            };
            if definition.kind() != "function_definition" {
                continue;
            }
            if let Some(def) = function_def(definition, member_decorators, source) {
                methods.push(def);
            }
        }
    }
    facts.classes.push(ClassDef {
        name,
        line: line_of(class),
        methods,
    });
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// CLI framework implied by a decorator list, if any decorator is a
/// command decorator.
pub fn cli_framework(decorators: &[String], facts: &ModuleFacts<'_>) -> Option<CliFramework> {
    for decorator in decorators {
        let d = decorator.as_str();
        if CLICK_DECORATORS.contains(&d) {
            return Some(CliFramework::Click);
        }
        if TYPER_DECORATORS.contains(&d) {
            return Some(CliFramework::Typer);
        }
        if BARE_CLI_DECORATORS.contains(&d) {
            return Some(CliFramework::Unknown);
        }
        // `<group>.command` / `<group>.group` on a receiver we cannot see
        // through: fall back to what the module imports.
        if let Some((_, last)) = d.rsplit_once('.') {
            if last == "command" || last == "group" {
                return Some(match (facts.imports_click, facts.imports_typer) {
                    (true, false) => CliFramework::Click,
                    (false, true) => CliFramework::Typer,
                    _ => CliFramework::Unknown,
                });
            }
        }
    }
    None
}

/// Whether a function body builds an `ArgumentParser`.
pub fn constructs_argument_parser(function: Node<'_>, source: &str) -> bool {
    let Some(body) = function.child_by_field_name("body") else {
        return false;
    };
    let mut found = false;
    walk_named(body, &mut |n| {
        if found || n.kind() != "call" {
            return;
        }
        let target = n
            .child_by_field_name("function")
            .and_then(|f| dotted_name(f, source));
        if let Some(target) = target {
            if target == "ArgumentParser" || target.ends_with(".ArgumentParser") {
                found = true;
            }
        }
    });
    found
}

/// Primary entrypoint classification; the first matching rule wins.
pub fn classify_entrypoint(
    function: &FunctionDef<'_>,
    facts: &ModuleFacts<'_>,
    source: &str,
) -> Option<EntrypointKind> {
    if facts.main_guard_calls.contains(&function.name) {
        return Some(EntrypointKind::MainGuard);
    }
    if cli_framework(&function.decorators, facts).is_some() {
        return Some(EntrypointKind::CliDecorator);
    }
    if constructs_argument_parser(function.node, source) {
        return Some(EntrypointKind::ArgumentParser);
    }
    if CANONICAL_NAMES.contains(&function.name.as_str()) {
        return Some(EntrypointKind::CanonicalName);
    }
    None
}

/// Whether a top-level name belongs to the public surface.
pub fn is_exported(name: &str, facts: &ModuleFacts<'_>) -> bool {
    match &facts.exports {
        Some(exports) => exports.iter().any(|e| e == name),
        None => !name.starts_with('_'),
    }
}

/// Static/class method kind of a class member; `None` for instance methods.
pub fn method_kind(decorators: &[String]) -> Option<ActionKind> {
    if decorators.iter().any(|d| d == "staticmethod") {
        Some(ActionKind::StaticMethod)
    } else if decorators.iter().any(|d| d == "classmethod") {
        Some(ActionKind::ClassMethod)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::parser::parse_python;

    const SAMPLE: &str = r#""""Sample module."""
import argparse
import click
from enum import Enum
from dataclasses import dataclass

__all__ = ["greet", "Tools", "Color"]


class Color(Enum):
    RED = "red"
    GREEN = "green"
    _hidden = "x"


@dataclass
class Options:
    depth: int = 1


class Tools:
    @staticmethod
    def ping(host: str) -> str:
        return host

    @classmethod
    def build(cls, name: str):
        return cls()

    def instance(self):
        pass


@click.command()
@click.option("--name")
def greet(name):
    click.echo(name)


def parse():
    parser = argparse.ArgumentParser()
    return parser.parse_args()


def run():
    value = input("? ")
    return value


if __name__ == "__main__":
    parse()
"#;

    #[test]
    fn test_collects_module_facts() {
        let unit = parse_python(SAMPLE).unwrap();
        let facts = collect_module_facts(unit.root(), &unit.source);

        assert!(facts.has_main_guard);
        assert!(facts.main_guard_calls.contains("parse"));
        assert!(facts.imports_click);
        assert!(!facts.imports_typer);
        assert!(!facts.side_effect_risk);
        assert_eq!(
            facts.exports,
            Some(vec!["greet".to_string(), "Tools".to_string(), "Color".to_string()])
        );
        assert_eq!(
            facts.enums.get("Color"),
            Some(&vec!["red".to_string(), "green".to_string()])
        );
        assert!(facts.dataclasses.contains("Options"));
        assert_eq!(facts.input_call_lines, vec![46]);

        let names: Vec<&str> = facts.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["greet", "parse", "run"]);
        let tools = facts.classes.iter().find(|c| c.name == "Tools").unwrap();
        assert_eq!(tools.methods.len(), 3);
    }

    #[test]
    fn test_entrypoint_priority() {
        let unit = parse_python(SAMPLE).unwrap();
        let facts = collect_module_facts(unit.root(), &unit.source);
        let classify = |name: &str| {
            let f = facts.functions.iter().find(|f| f.name == name).unwrap();
            classify_entrypoint(f, &facts, &unit.source)
        };
        assert_eq!(classify("greet"), Some(EntrypointKind::CliDecorator));
        assert_eq!(classify("parse"), Some(EntrypointKind::MainGuard));
        assert_eq!(classify("run"), Some(EntrypointKind::CanonicalName));
    }

    #[test]
    fn test_argument_parser_detection() {
        let code = "import argparse\n\ndef tool():\n    p = argparse.ArgumentParser()\n    p.parse_args()\n";
        let unit = parse_python(code).unwrap();
        let facts = collect_module_facts(unit.root(), &unit.source);
        let f = &facts.functions[0];
        assert_eq!(
            classify_entrypoint(f, &facts, &unit.source),
            Some(EntrypointKind::ArgumentParser)
        );
    }

    #[test]
    fn test_cli_framework_shapes() {
        let facts = ModuleFacts::default();
        let fw = |d: &str| cli_framework(&[d.to_string()], &facts);
        assert_eq!(fw("click.group"), Some(CliFramework::Click));
        assert_eq!(fw("app.command"), Some(CliFramework::Typer));
        assert_eq!(fw("command"), Some(CliFramework::Unknown));
        assert_eq!(fw("cli.command"), Some(CliFramework::Unknown));
        assert_eq!(fw("functools.cache"), None);
        assert_eq!(fw("typer.Typer"), None);
        assert_eq!(fw("Typer"), None);

        let click_facts = ModuleFacts {
            imports_click: true,
            ..ModuleFacts::default()
        };
        assert_eq!(
            cli_framework(&["cli.command".to_string()], &click_facts),
            Some(CliFramework::Click)
        );
    }

    #[test]
    fn test_side_effects_detected() {
        let code = "import os\nCONFIG = load()\n\ndef f():\n    pass\n";
        let unit = parse_python(code).unwrap();
        let facts = collect_module_facts(unit.root(), &unit.source);
        assert!(facts.side_effect_risk);
    }

    #[test]
    fn test_exports_default_to_public_names() {
        let facts = ModuleFacts::default();
        assert!(is_exported("public", &facts));
        assert!(!is_exported("_private", &facts));
        assert_eq!(method_kind(&["staticmethod".to_string()]), Some(ActionKind::StaticMethod));
        assert_eq!(method_kind(&[]), None);
    }
}
