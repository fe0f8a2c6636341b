//! Type-expression resolution over annotation syntax.
//!
//! Resolution is total: every node maps to a [`TypeExpr`], with anything
//! outside the closed grammar becoming `Unknown`. String annotations are
//! parsed as forward references, never evaluated.

use serde_json::Value;
use tree_sitter::Node;

use crate::analyzer::literal::{eval_literal, string_value};
use crate::analyzer::parser::{
    children_by_field, dotted_name, named_children, node_text, parse_python,
};
use crate::models::{HintOverride, TypeExpr, WidgetKind};

const MAX_TYPE_DEPTH: usize = 16;

/// Keywords tree-sitter may recover as identifiers in a type position.
const PYTHON_KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Resolver output: the type plus any inline hints from `Annotated[...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAnnotation {
    pub expr: TypeExpr,
    pub inline: HintOverride,
}

pub fn resolve_annotation(node: Node<'_>, source: &str) -> ResolvedAnnotation {
    let mut inline = HintOverride::default();
    let expr = resolve(node, source, 0, &mut inline);
    ResolvedAnnotation { expr, inline }
}

/// Parses annotation text (a forward reference or a runtime-formatted
/// annotation) with the same grammar as source annotations.
pub fn parse_annotation_text(text: &str) -> ResolvedAnnotation {
    let mut inline = HintOverride::default();
    let expr = resolve_text(text, 0, &mut inline);
    ResolvedAnnotation { expr, inline }
}

fn resolve_text(text: &str, depth: usize, inline: &mut HintOverride) -> TypeExpr {
    let text = text.trim();
    if text.is_empty() || text.contains('\n') || depth >= MAX_TYPE_DEPTH {
        return TypeExpr::Unknown;
    }
    let snippet = format!("_: {text}\n");
    let unit = match parse_python(&snippet) {
        Ok(unit) => unit,
        Err(_) => return TypeExpr::Unknown,
    };
    if unit.first_syntax_error().is_some() {
        return TypeExpr::Unknown;
    }
    let annotation = named_children(unit.root())
        .into_iter()
        .next()
        .and_then(|stmt| named_children(stmt).into_iter().next())
        .filter(|assignment| assignment.kind() == "assignment")
        .and_then(|assignment| assignment.child_by_field_name("type"));
    match annotation {
        Some(node) => resolve(node, &unit.source, depth + 1, inline),
        None => TypeExpr::Unknown,
    }
}

fn resolve(node: Node<'_>, source: &str, depth: usize, inline: &mut HintOverride) -> TypeExpr {
    if depth >= MAX_TYPE_DEPTH {
        return TypeExpr::Unknown;
    }
    match node.kind() {
        "type" | "parenthesized_expression" => {
            let inner = named_children(node);
            if inner.len() == 1 {
                resolve(inner[0], source, depth + 1, inline)
            } else {
                TypeExpr::Unknown
            }
        }
        "identifier" => {
            let name = node_text(node, source);
            if PYTHON_KEYWORDS.contains(&name) {
                TypeExpr::Unknown
            } else {
                TypeExpr::name(name)
            }
        }
        "none" => TypeExpr::name("None"),
        "attribute" => match dotted_name(node, source) {
            Some(path) => TypeExpr::Attribute { path },
            None => TypeExpr::Unknown,
        },
        "member_type" => {
            let parts = named_children(node);
            match parts.as_slice() {
                [base, attr] if attr.kind() == "identifier" => {
                    match resolve(*base, source, depth + 1, inline) {
                        TypeExpr::Name { name } | TypeExpr::Attribute { path: name } => {
                            TypeExpr::Attribute {
                                path: format!("{name}.{}", node_text(*attr, source)),
                            }
                        }
                        _ => TypeExpr::Unknown,
                    }
                }
                _ => TypeExpr::Unknown,
            }
        }
        "string" => match string_value(node_text(node, source)) {
            Some(text) => resolve_text(&text, depth + 1, inline),
            None => TypeExpr::Unknown,
        },
        "binary_operator" => {
            let is_pipe = node
                .child_by_field_name("operator")
                .map(|op| node_text(op, source) == "|")
                .unwrap_or(false);
            if !is_pipe {
                return TypeExpr::Unknown;
            }
            let members: Vec<TypeExpr> = ["left", "right"]
                .iter()
                .filter_map(|field| node.child_by_field_name(field))
                .map(|side| resolve(side, source, depth + 1, inline))
                .collect();
            make_union(members)
        }
        "union_type" => {
            let members = named_children(node)
                .into_iter()
                .map(|side| resolve(side, source, depth + 1, inline))
                .collect();
            make_union(members)
        }
        "subscript" => {
            let Some(value) = node.child_by_field_name("value") else {
                return TypeExpr::Unknown;
            };
            let args = children_by_field(node, "subscript");
            resolve_subscript(value, &args, source, depth, inline)
        }
        "generic_type" => {
            let parts = named_children(node);
            let base = parts.iter().find(|p| p.kind() != "type_parameter");
            let params = parts.iter().find(|p| p.kind() == "type_parameter");
            match (base, params) {
                (Some(base), Some(params)) => {
                    let args = named_children(*params);
                    resolve_subscript(*base, &args, source, depth, inline)
                }
                _ => TypeExpr::Unknown,
            }
        }
        _ => TypeExpr::Unknown,
    }
}

fn resolve_subscript(
    value: Node<'_>,
    args: &[Node<'_>],
    source: &str,
    depth: usize,
    inline: &mut HintOverride,
) -> TypeExpr {
    let base = resolve(value, source, depth + 1, inline);
    let Some(base_name) = base.terminal_name().map(str::to_string) else {
        return TypeExpr::Unknown;
    };
    if args.is_empty() {
        return TypeExpr::Unknown;
    }

    match base_name.as_str() {
        "Optional" if args.len() == 1 => {
            let inner = resolve(args[0], source, depth + 1, inline);
            make_union(vec![inner, TypeExpr::name("None")])
        }
        "Union" => {
            let members = args
                .iter()
                .map(|arg| resolve(*arg, source, depth + 1, inline))
                .collect();
            make_union(members)
        }
        "Literal" => {
            let values: Option<Vec<Value>> = args
                .iter()
                .map(|arg| literal_arg(*arg, source))
                .collect();
            match values {
                Some(values) => TypeExpr::Literal { values },
                None => TypeExpr::Unknown,
            }
        }
        "Annotated" => {
            let inner = resolve(args[0], source, depth + 1, inline);
            for meta in &args[1..] {
                apply_metadata(*meta, source, inline);
            }
            inner
        }
        _ => TypeExpr::Generic {
            base: Box::new(base),
            args: args
                .iter()
                .map(|arg| resolve(*arg, source, depth + 1, inline))
                .collect(),
        },
    }
}

fn literal_arg(node: Node<'_>, source: &str) -> Option<Value> {
    // `type` wrappers show up when the grammar picks the generic_type form.
    if node.kind() == "type" {
        let inner = named_children(node);
        return match inner.as_slice() {
            [only] => literal_arg(*only, source),
            _ => None,
        };
    }
    eval_literal(node, source)
}

/// Flattens nested unions and folds `None` members into `Optional`.
pub fn make_union(members: Vec<TypeExpr>) -> TypeExpr {
    fn push(expr: TypeExpr, flat: &mut Vec<TypeExpr>) {
        if !flat.contains(&expr) {
            flat.push(expr);
        }
    }

    let mut flat: Vec<TypeExpr> = Vec::new();
    let mut has_none = false;
    for member in members {
        match member {
            TypeExpr::Union { members } => {
                for inner in members {
                    push(inner, &mut flat);
                }
            }
            TypeExpr::Optional { inner } => {
                has_none = true;
                match *inner {
                    TypeExpr::Union { members } => {
                        for m in members {
                            push(m, &mut flat);
                        }
                    }
                    other => push(other, &mut flat),
                }
            }
            other if other.is_none_type() => has_none = true,
            other => push(other, &mut flat),
        }
    }

    let core = match flat.len() {
        0 => {
            return if has_none {
                TypeExpr::name("None")
            } else {
                TypeExpr::Unknown
            };
        }
        1 => flat.remove(0),
        _ => TypeExpr::Union { members: flat },
    };
    if has_none {
        TypeExpr::Optional {
            inner: Box::new(core),
        }
    } else {
        core
    }
}

// ---------------------------------------------------------------------------
// Annotated metadata
// ---------------------------------------------------------------------------

fn apply_metadata(node: Node<'_>, source: &str, inline: &mut HintOverride) {
    let node = match node.kind() {
        "type" => match named_children(node).as_slice() {
            [only] => *only,
            _ => return,
        },
        _ => node,
    };
    match node.kind() {
        "call" => {
            let Some(arguments) = node.child_by_field_name("arguments") else {
                return;
            };
            for arg in named_children(arguments) {
                if arg.kind() != "keyword_argument" {
                    continue;
                }
                let (Some(name), Some(value)) = (
                    arg.child_by_field_name("name"),
                    arg.child_by_field_name("value"),
                ) else {
                    continue;
                };
                if let Some(value) = eval_literal(value, source) {
                    apply_hint_key(node_text(name, source), &value, inline);
                }
            }
        }
        _ => match eval_literal(node, source) {
            Some(Value::Object(map)) => {
                for (key, value) in &map {
                    apply_hint_key(key, value, inline);
                }
            }
            Some(Value::Array(items)) => {
                let options: Vec<String> = items.iter().map(option_text).collect();
                if !options.is_empty() {
                    inline.options = Some(options);
                }
            }
            Some(Value::String(text)) => match text.split_once('=') {
                Some((key, value)) => {
                    apply_hint_key(key.trim(), &Value::String(value.trim().to_string()), inline);
                }
                None => {
                    if let Some(widget) = WidgetKind::parse(&text) {
                        inline.widget = Some(widget);
                    }
                }
            },
            _ => {}
        },
    }
}

pub fn option_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Applies one `key=value` hint. Unrecognized keys are ignored.
pub fn apply_hint_key(key: &str, value: &Value, hint: &mut HintOverride) -> bool {
    match key.trim().to_lowercase().as_str() {
        "widget" | "widget_type" | "ui" => match value.as_str().and_then(WidgetKind::parse) {
            Some(widget) => {
                hint.widget = Some(widget);
                true
            }
            None => false,
        },
        "options" | "choices" => match value {
            Value::Array(items) => {
                hint.options = Some(items.iter().map(option_text).collect());
                true
            }
            Value::String(s) => {
                hint.options = Some(
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect(),
                );
                true
            }
            _ => false,
        },
        "min" | "minimum" | "ge" => number_of(value)
            .map(|n| hint.min = Some(n))
            .is_some(),
        "max" | "maximum" | "le" => number_of(value)
            .map(|n| hint.max = Some(n))
            .is_some(),
        "regex" | "pattern" => match value.as_str() {
            Some(pattern) => {
                hint.regex = Some(pattern.to_string());
                true
            }
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> TypeExpr {
        parse_annotation_text(text).expr
    }

    fn name(n: &str) -> TypeExpr {
        TypeExpr::name(n)
    }

    #[test]
    fn test_plain_name_and_attribute() {
        assert_eq!(parse("int"), name("int"));
        assert_eq!(
            parse("pathlib.Path"),
            TypeExpr::Attribute {
                path: "pathlib.Path".to_string()
            }
        );
    }

    #[test]
    fn test_optional_forms_normalize() {
        let expected = TypeExpr::Optional {
            inner: Box::new(name("int")),
        };
        assert_eq!(parse("Optional[int]"), expected);
        assert_eq!(parse("typing.Optional[int]"), expected);
        assert_eq!(parse("Union[int, None]"), expected);
        assert_eq!(parse("int | None"), expected);
        assert_eq!(parse("None | int"), expected);
    }

    #[test]
    fn test_union_flattens() {
        assert_eq!(
            parse("Union[int, Union[str, float]]"),
            TypeExpr::Union {
                members: vec![name("int"), name("str"), name("float")]
            }
        );
        assert_eq!(
            parse("int | str | None"),
            TypeExpr::Optional {
                inner: Box::new(TypeExpr::Union {
                    members: vec![name("int"), name("str")]
                })
            }
        );
    }

    #[test]
    fn test_literal_values() {
        assert_eq!(
            parse("Literal['fast', 'slow', 3]"),
            TypeExpr::Literal {
                values: vec![json!("fast"), json!("slow"), json!(3)]
            }
        );
        assert_eq!(parse("Literal[SOME_CONST]"), TypeExpr::Unknown);
    }

    #[test]
    fn test_generic_types() {
        assert_eq!(
            parse("dict[str, list[int]]"),
            TypeExpr::Generic {
                base: Box::new(name("dict")),
                args: vec![
                    name("str"),
                    TypeExpr::Generic {
                        base: Box::new(name("list")),
                        args: vec![name("int")]
                    }
                ]
            }
        );
    }

    #[test]
    fn test_forward_reference_string() {
        assert_eq!(parse("'Config'"), name("Config"));
        assert_eq!(
            parse("\"Optional[Path]\""),
            TypeExpr::Optional {
                inner: Box::new(name("Path"))
            }
        );
    }

    #[test]
    fn test_unsupported_forms_are_unknown() {
        assert_eq!(parse("make_type()"), TypeExpr::Unknown);
        assert_eq!(parse("1 + 2"), TypeExpr::Unknown);
        assert_eq!(parse("lambda: int"), TypeExpr::Unknown);
        assert_eq!(parse(""), TypeExpr::Unknown);
        assert_eq!(parse("def"), TypeExpr::Unknown);
        assert_eq!(parse("return"), TypeExpr::Unknown);
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let nested = format!("{}int{}", "List[".repeat(24), "]".repeat(24));
        let expr = parse(&nested);
        assert!(matches!(expr, TypeExpr::Generic { .. }));
        assert!(expr.render().contains('?'));
    }

    #[test]
    fn test_annotated_metadata_becomes_inline_hints() {
        let resolved =
            parse_annotation_text("Annotated[int, {'widget': 'spin_box', 'min': 0, 'max': 10}]");
        assert_eq!(resolved.expr, name("int"));
        assert_eq!(resolved.inline.widget, Some(WidgetKind::SpinBox));
        assert_eq!(resolved.inline.min, Some(0.0));
        assert_eq!(resolved.inline.max, Some(10.0));

        let from_call = parse_annotation_text("Annotated[str, Field(pattern=r'^\\w+$')]");
        assert_eq!(from_call.expr, name("str"));
        assert_eq!(from_call.inline.regex.as_deref(), Some("^\\w+$"));

        let from_string = parse_annotation_text("Annotated[Path, 'file_picker']");
        assert_eq!(from_string.inline.widget, Some(WidgetKind::FilePicker));

        let key_value = parse_annotation_text("Annotated[str, 'choices = red, blue']");
        assert_eq!(
            key_value.inline.options,
            Some(vec!["red".to_string(), "blue".to_string()])
        );
    }

    #[test]
    fn test_make_union_single_member() {
        assert_eq!(make_union(vec![name("int")]), name("int"));
        assert_eq!(make_union(vec![name("None")]), name("None"));
    }
}
