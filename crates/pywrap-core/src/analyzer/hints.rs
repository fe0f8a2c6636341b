//! Mapping from resolved types to presentation hints and result kinds.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{HintOverride, ParamKind, ResultKind, TypeExpr, WidgetKind};

pub const INT_MIN: f64 = -999_999.0;
pub const INT_MAX: f64 = 999_999.0;

/// Parameter names suggesting a filesystem path when the type is unknown.
const PATH_NAME_HINTS: &[&str] = &[
    "path", "file", "dir", "folder", "directory", "filename", "filepath", "dirname",
];

/// Coarse value category shared by hint inference and wire conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    String,
    Path,
    Enum(Vec<String>),
    Literal(Vec<String>),
    List,
    Dict,
    Date,
    DateTime,
    Time,
    Decimal,
    Bytes,
    Any,
    Unknown,
}

/// Module-level facts that refine type classification.
#[derive(Debug, Clone, Default)]
pub struct HintContext {
    pub enums: BTreeMap<String, Vec<String>>,
    pub dataclasses: BTreeSet<String>,
}

fn category_for_name(name: &str, ctx: &HintContext) -> TypeCategory {
    match name {
        "int" => TypeCategory::Integer,
        "float" => TypeCategory::Float,
        "bool" => TypeCategory::Boolean,
        "str" => TypeCategory::String,
        "Path" | "PurePath" | "PosixPath" | "WindowsPath" | "PathLike" => TypeCategory::Path,
        "list" | "List" | "tuple" | "Tuple" | "set" | "Set" | "frozenset" | "FrozenSet"
        | "Sequence" | "Iterable" => TypeCategory::List,
        "dict" | "Dict" | "Mapping" | "MutableMapping" => TypeCategory::Dict,
        "date" => TypeCategory::Date,
        "datetime" => TypeCategory::DateTime,
        "time" => TypeCategory::Time,
        "Decimal" => TypeCategory::Decimal,
        "bytes" | "bytearray" => TypeCategory::Bytes,
        "Any" | "object" => TypeCategory::Any,
        other => {
            if let Some(options) = ctx.enums.get(other) {
                TypeCategory::Enum(options.clone())
            } else if ctx.dataclasses.contains(other) {
                TypeCategory::Dict
            } else {
                TypeCategory::Unknown
            }
        }
    }
}

/// Classifies a type, looking through `Optional`.
pub fn categorize(expr: &TypeExpr, ctx: &HintContext) -> TypeCategory {
    match expr {
        TypeExpr::Optional { inner } => categorize(inner, ctx),
        TypeExpr::Name { .. } | TypeExpr::Attribute { .. } => match expr.terminal_name() {
            Some(name) => category_for_name(name, ctx),
            None => TypeCategory::Unknown,
        },
        TypeExpr::Literal { values } => TypeCategory::Literal(
            values
                .iter()
                .map(crate::analyzer::types::option_text)
                .collect(),
        ),
        TypeExpr::Generic { base, .. } => match categorize(base, ctx) {
            category @ (TypeCategory::List | TypeCategory::Dict) => category,
            _ => TypeCategory::Unknown,
        },
        TypeExpr::Union { .. } | TypeExpr::Unknown => TypeCategory::Unknown,
    }
}

pub fn is_optional(expr: &TypeExpr) -> bool {
    matches!(expr, TypeExpr::Optional { .. })
}

/// Matches whole `_`-separated segments, so `out_dir` qualifies and
/// `direction` does not.
fn looks_like_path(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower
        .split('_')
        .any(|segment| PATH_NAME_HINTS.contains(&segment))
}

/// The inferred static hint layer for one parameter.
///
/// Unknown types leave the layer empty, except for the path-name
/// heuristic, so weaker runtime hints can still show through.
pub fn infer_hint(expr: &TypeExpr, name: &str, kind: ParamKind, ctx: &HintContext) -> HintOverride {
    match kind {
        ParamKind::VarPositional => return HintOverride::widget(WidgetKind::PlainTextEdit),
        ParamKind::VarKeyword => return HintOverride::widget(WidgetKind::JsonEditor),
        _ => {}
    }
    match categorize(expr, ctx) {
        TypeCategory::Integer => HintOverride {
            widget: Some(WidgetKind::SpinBox),
            min: Some(INT_MIN),
            max: Some(INT_MAX),
            ..HintOverride::default()
        },
        TypeCategory::Float => HintOverride {
            widget: Some(WidgetKind::DoubleSpinBox),
            min: Some(INT_MIN),
            max: Some(INT_MAX),
            ..HintOverride::default()
        },
        TypeCategory::Boolean => HintOverride::widget(WidgetKind::CheckBox),
        TypeCategory::String | TypeCategory::Decimal | TypeCategory::Bytes => {
            HintOverride::widget(WidgetKind::LineEdit)
        }
        TypeCategory::Path => HintOverride::widget(WidgetKind::FilePicker),
        TypeCategory::Enum(options) | TypeCategory::Literal(options) => HintOverride {
            widget: Some(WidgetKind::ComboBox),
            options: Some(options),
            ..HintOverride::default()
        },
        TypeCategory::List => HintOverride::widget(WidgetKind::PlainTextEdit),
        TypeCategory::Dict | TypeCategory::Any => HintOverride::widget(WidgetKind::JsonEditor),
        TypeCategory::Date => HintOverride::widget(WidgetKind::DateEdit),
        TypeCategory::DateTime => HintOverride::widget(WidgetKind::DatetimeEdit),
        TypeCategory::Time => HintOverride::widget(WidgetKind::TimeEdit),
        TypeCategory::Unknown => {
            if looks_like_path(name) {
                HintOverride::widget(WidgetKind::FilePicker)
            } else {
                HintOverride::default()
            }
        }
    }
}

/// Generic text input used when a default cannot be shown faithfully.
pub fn opaque_default_hint() -> HintOverride {
    HintOverride {
        widget: Some(WidgetKind::LineEdit),
        options: Some(Vec::new()),
        ..HintOverride::default()
    }
}

fn is_tabular_row(expr: &TypeExpr) -> bool {
    match expr {
        TypeExpr::Generic { base, .. } => matches!(
            base.terminal_name(),
            Some("dict" | "Dict" | "Mapping" | "list" | "List" | "tuple" | "Tuple")
        ),
        _ => matches!(expr.terminal_name(), Some("dict" | "Dict")),
    }
}

/// Presentation category for a return annotation.
pub fn result_kind(expr: &TypeExpr) -> ResultKind {
    match expr {
        TypeExpr::Unknown => ResultKind::Repr,
        TypeExpr::Optional { inner } => result_kind(inner),
        TypeExpr::Literal { .. } => ResultKind::Json,
        TypeExpr::Union { .. } => ResultKind::Repr,
        TypeExpr::Generic { base, args } => match base.terminal_name() {
            Some("list" | "List" | "Sequence") if args.first().is_some_and(is_tabular_row) => {
                ResultKind::Table
            }
            Some(
                "list" | "List" | "tuple" | "Tuple" | "set" | "Set" | "dict" | "Dict"
                | "Mapping" | "Sequence",
            ) => ResultKind::Json,
            _ => ResultKind::Repr,
        },
        TypeExpr::Name { .. } | TypeExpr::Attribute { .. } => match expr.terminal_name() {
            Some("None" | "NoReturn") => ResultKind::None,
            Some("str") => ResultKind::Text,
            Some(
                "int" | "float" | "bool" | "dict" | "Dict" | "list" | "List" | "tuple" | "Tuple"
                | "set" | "Set" | "Any",
            ) => ResultKind::Json,
            Some("bytes" | "bytearray" | "Path" | "PurePath") => ResultKind::File,
            _ => ResultKind::Repr,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::types::parse_annotation_text;

    fn hint(text: &str, name: &str) -> HintOverride {
        let expr = parse_annotation_text(text).expr;
        infer_hint(&expr, name, ParamKind::PositionalOrKeyword, &HintContext::default())
    }

    #[test]
    fn test_scalar_widgets() {
        let int_hint = hint("int", "count");
        assert_eq!(int_hint.widget, Some(WidgetKind::SpinBox));
        assert_eq!(int_hint.min, Some(INT_MIN));
        assert_eq!(hint("float", "x").widget, Some(WidgetKind::DoubleSpinBox));
        assert_eq!(hint("bool", "x").widget, Some(WidgetKind::CheckBox));
        assert_eq!(hint("str", "x").widget, Some(WidgetKind::LineEdit));
        assert_eq!(hint("Optional[int]", "x").widget, Some(WidgetKind::SpinBox));
    }

    #[test]
    fn test_path_widgets() {
        assert_eq!(hint("Path", "x").widget, Some(WidgetKind::FilePicker));
        assert_eq!(hint("pathlib.Path", "x").widget, Some(WidgetKind::FilePicker));
        assert_eq!(hint("?", "output_dir").widget, Some(WidgetKind::FilePicker));
        assert_eq!(hint("?", "config_file").widget, Some(WidgetKind::FilePicker));
        assert!(hint("?", "direction").is_empty());
        assert!(hint("?", "profile").is_empty());
        assert!(hint("Widget", "name").is_empty());
    }

    #[test]
    fn test_choice_widgets() {
        let literal = hint("Literal['a', 'b']", "mode");
        assert_eq!(literal.widget, Some(WidgetKind::ComboBox));
        assert_eq!(literal.options, Some(vec!["a".to_string(), "b".to_string()]));

        let mut ctx = HintContext::default();
        ctx.enums
            .insert("Color".to_string(), vec!["red".to_string(), "green".to_string()]);
        let expr = parse_annotation_text("Color").expr;
        let enum_hint = infer_hint(&expr, "color", ParamKind::KeywordOnly, &ctx);
        assert_eq!(enum_hint.widget, Some(WidgetKind::ComboBox));
        assert_eq!(enum_hint.options.unwrap().len(), 2);
    }

    #[test]
    fn test_container_and_variadic_widgets() {
        assert_eq!(hint("list[str]", "x").widget, Some(WidgetKind::PlainTextEdit));
        assert_eq!(hint("Dict[str, int]", "x").widget, Some(WidgetKind::JsonEditor));
        let expr = TypeExpr::Unknown;
        let ctx = HintContext::default();
        assert_eq!(
            infer_hint(&expr, "args", ParamKind::VarPositional, &ctx).widget,
            Some(WidgetKind::PlainTextEdit)
        );
        assert_eq!(
            infer_hint(&expr, "kwargs", ParamKind::VarKeyword, &ctx).widget,
            Some(WidgetKind::JsonEditor)
        );
    }

    #[test]
    fn test_result_kinds() {
        let kind = |text: &str| result_kind(&parse_annotation_text(text).expr);
        assert_eq!(kind("None"), ResultKind::None);
        assert_eq!(kind("str"), ResultKind::Text);
        assert_eq!(kind("int"), ResultKind::Json);
        assert_eq!(kind("list[dict[str, Any]]"), ResultKind::Table);
        assert_eq!(kind("list[int]"), ResultKind::Json);
        assert_eq!(kind("bytes"), ResultKind::File);
        assert_eq!(kind("Optional[str]"), ResultKind::Text);
        assert_eq!(kind("MyModel"), ResultKind::Repr);
        assert_eq!(result_kind(&TypeExpr::Unknown), ResultKind::Repr);
    }
}
