//! Parameter and return extraction from function definitions.

use tree_sitter::Node;

use crate::analyzer::literal::eval_literal;
use crate::analyzer::parser::{named_children, node_text};
use crate::analyzer::types::{resolve_annotation, ResolvedAnnotation};
use crate::models::{AnnotationSpec, DefaultSpec, HintOverride, ParamKind, TypeExpr};

/// A parameter as written in source, before hint inference.
#[derive(Debug, Clone, PartialEq)]
pub struct RawParam {
    pub name: String,
    pub kind: ParamKind,
    pub annotation: AnnotationSpec,
    pub inline: HintOverride,
    pub default: DefaultSpec,
}

fn annotation_of(node: Option<Node<'_>>, source: &str) -> (AnnotationSpec, HintOverride) {
    match node {
        Some(node) => {
            let ResolvedAnnotation { expr, inline } = resolve_annotation(node, source);
            let spec = AnnotationSpec {
                raw: Some(node_text(node, source).to_string()),
                expr,
                resolved: None,
            };
            (spec, inline)
        }
        None => (AnnotationSpec::missing(), HintOverride::default()),
    }
}

fn default_of(node: Option<Node<'_>>, source: &str) -> DefaultSpec {
    match node {
        Some(value) => DefaultSpec {
            present: true,
            literal: eval_literal(value, source),
            source: Some(node_text(value, source).to_string()),
            runtime: None,
        },
        None => DefaultSpec::absent(),
    }
}

/// Splits a parameter-ish node into (name, splat kind) when it names one.
fn name_and_splat(node: Node<'_>, source: &str) -> Option<(String, Option<ParamKind>)> {
    match node.kind() {
        "identifier" => Some((node_text(node, source).to_string(), None)),
        "list_splat_pattern" | "dictionary_splat_pattern" => {
            let ident = named_children(node)
                .into_iter()
                .find(|c| c.kind() == "identifier")?;
            let kind = if node.kind() == "list_splat_pattern" {
                ParamKind::VarPositional
            } else {
                ParamKind::VarKeyword
            };
            Some((node_text(ident, source).to_string(), Some(kind)))
        }
        _ => None,
    }
}

/// Extracts parameters in declared order from a `parameters` node.
pub fn extract_parameters(parameters: Node<'_>, source: &str) -> Vec<RawParam> {
    let mut params: Vec<RawParam> = Vec::new();
    let mut keyword_only = false;

    for child in named_children(parameters) {
        let (name_node, type_node, value_node) = match child.kind() {
            "positional_separator" => {
                for param in params.iter_mut() {
                    if param.kind == ParamKind::PositionalOrKeyword {
                        param.kind = ParamKind::PositionalOnly;
                    }
                }
                continue;
            }
            "keyword_separator" => {
                keyword_only = true;
                continue;
            }
            "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                (Some(child), None, None)
            }
            "typed_parameter" => {
                let name = named_children(child).into_iter().find(|c| {
                    matches!(
                        c.kind(),
                        "identifier" | "list_splat_pattern" | "dictionary_splat_pattern"
                    )
                });
                (name, child.child_by_field_name("type"), None)
            }
            "default_parameter" => (
                child.child_by_field_name("name"),
                None,
                child.child_by_field_name("value"),
            ),
            "typed_default_parameter" => (
                child.child_by_field_name("name"),
                child.child_by_field_name("type"),
                child.child_by_field_name("value"),
            ),
            _ => continue,
        };

        let Some((name, splat)) = name_node.and_then(|n| name_and_splat(n, source)) else {
            continue;
        };
        let kind = match splat {
            Some(kind) => kind,
            None if keyword_only => ParamKind::KeywordOnly,
            None => ParamKind::PositionalOrKeyword,
        };
        if kind == ParamKind::VarPositional {
            keyword_only = true;
        }
        let (annotation, inline) = annotation_of(type_node, source);
        params.push(RawParam {
            name,
            kind,
            annotation,
            inline,
            default: default_of(value_node, source),
        });
    }
    params
}

/// The return annotation of a function definition.
pub fn extract_return(function: Node<'_>, source: &str) -> AnnotationSpec {
    annotation_of(function.child_by_field_name("return_type"), source).0
}

pub fn is_required(param: &RawParam) -> bool {
    !param.default.present
        && !param.kind.is_variadic()
        && !matches!(param.annotation.expr, TypeExpr::Optional { .. })
}
