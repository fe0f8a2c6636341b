//! Data models for the analysis specification and its hint layers.
//!
//! Every collection here is ordered so that serializing the same value twice
//! yields the same bytes. Field order is declaration order.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::AnalysisMode;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const SCHEMA_VERSION: &str = "1.0";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const WARN_SYNTAX_ERROR: &str = "SYNTAX_ERROR";
pub const WARN_READ_ERROR: &str = "READ_ERROR";
pub const WARN_INPUT_USAGE: &str = "INPUT_USAGE";
pub const WARN_PYPROJECT_INVALID: &str = "PYPROJECT_INVALID";
pub const WARN_PYPROJECT_UNRESOLVED: &str = "PYPROJECT_UNRESOLVED_SCRIPT";
pub const WARN_INTROSPECTION_FAILED: &str = "INTROSPECTION_FAILED";
pub const WARN_OVERRIDE_VERSION_MISMATCH: &str = "OVERRIDE_VERSION_MISMATCH";
pub const WARN_OVERRIDE_UNKNOWN_KEY: &str = "OVERRIDE_UNKNOWN_KEY";
pub const WARN_OVERRIDE_UNKNOWN_TARGET: &str = "OVERRIDE_UNKNOWN_TARGET";
pub const WARN_OVERRIDE_INVALID_VALUE: &str = "OVERRIDE_INVALID_VALUE";

/// Deserializes a present field as `Some`, so an explicit JSON `null`
/// survives a round trip instead of collapsing into "absent".
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ---------------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------------

/// Closed grammar for annotations. Anything outside it is `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeExpr {
    Unknown,
    Name { name: String },
    Attribute { path: String },
    Optional { inner: Box<TypeExpr> },
    Literal { values: Vec<Value> },
    Generic { base: Box<TypeExpr>, args: Vec<TypeExpr> },
    Union { members: Vec<TypeExpr> },
}

impl TypeExpr {
    pub fn name(name: &str) -> Self {
        TypeExpr::Name {
            name: name.to_string(),
        }
    }

    /// Last dotted segment of a name or attribute path.
    pub fn terminal_name(&self) -> Option<&str> {
        match self {
            TypeExpr::Name { name } => Some(name.as_str()),
            TypeExpr::Attribute { path } => path.rsplit('.').next(),
            _ => None,
        }
    }

    pub fn is_none_type(&self) -> bool {
        matches!(self, TypeExpr::Name { name } if name == "None")
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TypeExpr::Unknown)
    }

    /// Python-like rendering used in diagnostics and display labels.
    pub fn render(&self) -> String {
        match self {
            TypeExpr::Unknown => "?".to_string(),
            TypeExpr::Name { name } => name.clone(),
            TypeExpr::Attribute { path } => path.clone(),
            TypeExpr::Optional { inner } => format!("Optional[{}]", inner.render()),
            TypeExpr::Literal { values } => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                format!("Literal[{}]", rendered.join(", "))
            }
            TypeExpr::Generic { base, args } => {
                let rendered: Vec<String> = args.iter().map(TypeExpr::render).collect();
                format!("{}[{}]", base.render(), rendered.join(", "))
            }
            TypeExpr::Union { members } => {
                let rendered: Vec<String> = members.iter().map(TypeExpr::render).collect();
                rendered.join(" | ")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UI hints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    SpinBox,
    DoubleSpinBox,
    CheckBox,
    LineEdit,
    FilePicker,
    ComboBox,
    PlainTextEdit,
    JsonEditor,
    DateEdit,
    DatetimeEdit,
    TimeEdit,
}

impl WidgetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetKind::SpinBox => "spin_box",
            WidgetKind::DoubleSpinBox => "double_spin_box",
            WidgetKind::CheckBox => "check_box",
            WidgetKind::LineEdit => "line_edit",
            WidgetKind::FilePicker => "file_picker",
            WidgetKind::ComboBox => "combo_box",
            WidgetKind::PlainTextEdit => "plain_text_edit",
            WidgetKind::JsonEditor => "json_editor",
            WidgetKind::DateEdit => "date_edit",
            WidgetKind::DatetimeEdit => "datetime_edit",
            WidgetKind::TimeEdit => "time_edit",
        }
    }

    /// Accepts snake_case names, Qt class names and a few short aliases.
    pub fn parse(value: &str) -> Option<Self> {
        let key: String = value
            .trim()
            .trim_start_matches('Q')
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_lowercase();
        let widget = match key.as_str() {
            "spinbox" | "int" | "integer" => WidgetKind::SpinBox,
            "doublespinbox" | "float" => WidgetKind::DoubleSpinBox,
            "checkbox" | "bool" | "boolean" => WidgetKind::CheckBox,
            "lineedit" | "text" | "str" | "string" => WidgetKind::LineEdit,
            "filepicker" | "file" | "path" => WidgetKind::FilePicker,
            "combobox" | "choice" | "select" | "enum" => WidgetKind::ComboBox,
            "plaintextedit" | "textarea" | "list" => WidgetKind::PlainTextEdit,
            "jsoneditor" | "json" | "dict" => WidgetKind::JsonEditor,
            "dateedit" | "date" => WidgetKind::DateEdit,
            "datetimeedit" | "datetime" => WidgetKind::DatetimeEdit,
            "timeedit" | "time" => WidgetKind::TimeEdit,
            _ => return None,
        };
        Some(widget)
    }
}

/// Effective presentation hint for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiHint {
    pub widget: WidgetKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl Default for UiHint {
    fn default() -> Self {
        Self {
            widget: WidgetKind::LineEdit,
            options: Vec::new(),
            min: None,
            max: None,
            regex: None,
        }
    }
}

/// Partial hint contributed by a single source; unset fields defer to
/// weaker layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl HintOverride {
    pub fn is_empty(&self) -> bool {
        self.widget.is_none()
            && self.options.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.regex.is_none()
    }

    pub fn widget(widget: WidgetKind) -> Self {
        Self {
            widget: Some(widget),
            ..Self::default()
        }
    }

    /// Applies the fields this layer sets on top of `hint`.
    pub fn apply_to(&self, hint: &mut UiHint) {
        if let Some(widget) = self.widget {
            hint.widget = widget;
        }
        if let Some(options) = &self.options {
            hint.options = options.clone();
        }
        if let Some(min) = self.min {
            hint.min = Some(min);
        }
        if let Some(max) = self.max {
            hint.max = Some(max);
        }
        if let Some(regex) = &self.regex {
            hint.regex = Some(regex.clone());
        }
    }
}

/// The per-source hint layers, weakest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintLayers {
    #[serde(default, skip_serializing_if = "HintOverride::is_empty")]
    pub runtime: HintOverride,
    #[serde(default, skip_serializing_if = "HintOverride::is_empty")]
    pub inferred: HintOverride,
    #[serde(default, skip_serializing_if = "HintOverride::is_empty")]
    pub inline: HintOverride,
    #[serde(default, skip_serializing_if = "HintOverride::is_empty")]
    pub external: HintOverride,
}

impl HintLayers {
    /// Folds every layer from weakest to strongest into an effective hint.
    pub fn effective(&self) -> UiHint {
        let mut hint = UiHint::default();
        for layer in [&self.runtime, &self.inferred, &self.inline, &self.external] {
            layer.apply_to(&mut hint);
        }
        hint
    }
}

// ---------------------------------------------------------------------------
// Parameters and returns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::PositionalOnly => "positional_only",
            ParamKind::PositionalOrKeyword => "positional_or_keyword",
            ParamKind::KeywordOnly => "keyword_only",
            ParamKind::VarPositional => "var_positional",
            ParamKind::VarKeyword => "var_keyword",
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self, ParamKind::VarPositional | ParamKind::VarKeyword)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultSpec {
    pub present: bool,
    /// Statically evaluated value. `Some(Null)` is a literal `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub literal: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Value reported by runtime introspection; weaker than `literal`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub runtime: Option<Value>,
}

impl DefaultSpec {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_opaque(&self) -> bool {
        self.present && self.literal.is_none()
    }

    /// Static literal first, then the runtime-reported value.
    pub fn effective(&self) -> Option<&Value> {
        self.literal.as_ref().or(self.runtime.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub expr: TypeExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<TypeExpr>,
}

impl AnnotationSpec {
    pub fn missing() -> Self {
        Self {
            raw: None,
            expr: TypeExpr::Unknown,
            resolved: None,
        }
    }

    /// The statically derived expression, or the runtime one when static
    /// analysis could not classify the annotation.
    pub fn best(&self) -> &TypeExpr {
        match (&self.expr, &self.resolved) {
            (TypeExpr::Unknown, Some(resolved)) => resolved,
            _ => &self.expr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliBindingMode {
    Structured,
    Raw,
}

/// How a CLI command parameter maps onto command-line tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliBinding {
    pub mode: CliBindingMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opts: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_flag: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_argument: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub advanced: bool,
    pub default: DefaultSpec,
    pub annotation: AnnotationSpec,
    pub ui: UiHint,
    #[serde(default)]
    pub hint_layers: HintLayers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    None,
    Text,
    Json,
    Table,
    File,
    Repr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSpec {
    pub annotation: AnnotationSpec,
    pub result_kind: ResultKind,
}

// ---------------------------------------------------------------------------
// Actions and modules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Function,
    StaticMethod,
    ClassMethod,
    CliCommand,
    Script,
}

/// Primary entrypoint classification, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrypointKind {
    MainGuard,
    CliDecorator,
    ArgumentParser,
    CanonicalName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliFramework {
    Click,
    Typer,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    DirectCall,
    ModuleAsScript,
    ScriptPath,
    ClickCommand,
    TyperCommand,
    GenericCli,
    ConsoleScriptEntrypoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationPlan {
    pub strategy: PlanStrategy,
    pub raw_args: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_script: Option<String>,
}

impl InvocationPlan {
    pub fn new(strategy: PlanStrategy, raw_args: bool) -> Self {
        Self {
            strategy,
            raw_args,
            console_script: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionStatus {
    pub attempted: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub annotations_resolved: usize,
    pub cli_params_resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_id: String,
    pub qualified_name: String,
    pub name: String,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<EntrypointKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_framework: Option<CliFramework>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub line: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_async: bool,
    pub parameters: Vec<ParamSpec>,
    pub returns: ReturnSpec,
    pub invocation: InvocationPlan,
    pub introspection: IntrospectionStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_scripts: Vec<String>,
    pub display_name: String,
    #[serde(default)]
    pub hidden: bool,
}

impl ActionSpec {
    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub module_id: String,
    pub display_name: String,
    pub source_path: String,
    /// Directory, relative to the project root, from which `module_id`
    /// is importable.
    pub source_root: String,
    pub content_hash: String,
    pub has_main_guard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<String>>,
    pub side_effect_risk: bool,
    #[serde(default)]
    pub hidden: bool,
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Warning {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            file_path: None,
            line: None,
        }
    }

    pub fn at(mut self, file_path: &str, line: Option<usize>) -> Self {
        self.file_path = Some(file_path.to_string());
        self.line = line;
        self
    }
}

// ---------------------------------------------------------------------------
// Root document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub schema_version: String,
    pub generator_version: String,
    pub created_at: String,
    pub project_root: String,
    pub analysis_mode: AnalysisMode,
    pub input_hash: String,
    pub modules: Vec<ModuleSpec>,
    pub warnings: Vec<Warning>,
}

impl AnalysisResult {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    pub fn find_action(&self, action_id: &str) -> Option<(&ModuleSpec, &ActionSpec)> {
        self.modules.iter().find_map(|module| {
            module
                .actions
                .iter()
                .find(|a| a.action_id == action_id)
                .map(|action| (module, action))
        })
    }

    pub fn action_count(&self) -> usize {
        self.modules.iter().map(|m| m.actions.len()).sum()
    }
}
