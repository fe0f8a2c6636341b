//! Syntax-only evaluation of Python literals and docstrings.

use serde_json::{Map, Number, Value};
use tree_sitter::Node;

use crate::analyzer::parser::{named_children, node_text};

/// Evaluates a literal expression into JSON without running any code.
///
/// Accepts numbers, strings, booleans, `None`, signed numbers, and lists,
/// tuples and string-keyed dicts built from those. Anything else, including
/// sets, bytes and f-strings, yields `None`.
pub fn eval_literal(node: Node<'_>, source: &str) -> Option<Value> {
    match node.kind() {
        "integer" => parse_int(node_text(node, source)).map(Value::from),
        "float" => parse_float(node_text(node, source)),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "none" => Some(Value::Null),
        "string" => string_value(node_text(node, source)).map(Value::String),
        "concatenated_string" => {
            let mut out = String::new();
            for part in named_children(node) {
                out.push_str(&string_value(node_text(part, source))?);
            }
            Some(Value::String(out))
        }
        "unary_operator" => {
            let operator = node.child_by_field_name("operator")?;
            let argument = node.child_by_field_name("argument")?;
            let value = eval_literal(argument, source)?;
            match (node_text(operator, source), value) {
                ("+", v @ Value::Number(_)) => Some(v),
                ("-", Value::Number(n)) => negate(&n),
                _ => None,
            }
        }
        "parenthesized_expression" => {
            let inner = named_children(node);
            if inner.len() == 1 {
                eval_literal(inner[0], source)
            } else {
                None
            }
        }
        "list" | "tuple" => named_children(node)
            .into_iter()
            .map(|child| eval_literal(child, source))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        "dictionary" => {
            let mut map = Map::new();
            for pair in named_children(node) {
                if pair.kind() != "pair" {
                    return None;
                }
                let key = eval_literal(pair.child_by_field_name("key")?, source)?;
                let value = eval_literal(pair.child_by_field_name("value")?, source)?;
                let key = match key {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                map.insert(key, value);
            }
            Some(Value::Object(map))
        }
        _ => None,
    }
}

fn negate(n: &Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return i.checked_neg().map(Value::from);
    }
    n.as_f64().and_then(|f| Number::from_f64(-f)).map(Value::Number)
}

pub fn parse_int(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_lowercase();
    if lower.ends_with('j') || lower.ends_with('l') {
        return None;
    }
    if let Some(hex) = lower.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(oct) = lower.strip_prefix("0o") {
        return i64::from_str_radix(oct, 8).ok();
    }
    if let Some(bin) = lower.strip_prefix("0b") {
        return i64::from_str_radix(bin, 2).ok();
    }
    lower.parse::<i64>().ok()
}

fn parse_float(text: &str) -> Option<Value> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if cleaned.to_lowercase().ends_with('j') {
        return None;
    }
    let value = cleaned.parse::<f64>().ok()?;
    Number::from_f64(value).map(Value::Number)
}

/// Decodes the text of a single Python string literal token.
///
/// Returns `None` for bytes and formatted strings.
pub fn string_value(token: &str) -> Option<String> {
    let quote_at = token.find(['"', '\''])?;
    let prefix = token[..quote_at].to_lowercase();
    if prefix.contains('b') || prefix.contains('f') {
        return None;
    }
    let raw = prefix.contains('r');
    let body = &token[quote_at..];
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            body.strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
                .filter(|_| body.len() >= 2 * q.len())
        })?;
    if raw {
        Some(inner.to_string())
    } else {
        Some(unescape(inner))
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if digits.len() == width => out.push(decoded),
                    _ => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&digits);
                    }
                }
            }
            '0'..='7' => {
                let mut digits = next.to_string();
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                let code = u32::from_str_radix(&digits, 8).unwrap_or(0);
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

/// Docstring of a definition body, cleaned the way `inspect.cleandoc` does.
pub fn docstring(body: Node<'_>, source: &str) -> Option<String> {
    let first = named_children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = named_children(first).into_iter().next()?;
    match eval_literal(expr, source) {
        Some(Value::String(text)) if matches!(expr.kind(), "string" | "concatenated_string") => {
            Some(cleandoc(&text))
        }
        _ => None,
    }
}

fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let pad = 8 - column % 8;
            out.push_str(&" ".repeat(pad));
            column += pad;
        } else {
            out.push(c);
            column += 1;
        }
    }
    out
}

pub fn cleandoc(doc: &str) -> String {
    let lines: Vec<String> = doc.lines().map(expand_tabs).collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            cleaned.push(line.trim_start().to_string());
        } else if line.len() >= margin {
            cleaned.push(line[margin..].trim_end().to_string());
        } else {
            cleaned.push(line.trim().to_string());
        }
    }
    while cleaned.first().is_some_and(|l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::parser::parse_python;
    use serde_json::json;

    fn eval(expr: &str) -> Option<Value> {
        let unit = parse_python(&format!("x = {expr}\n")).unwrap();
        let stmt = named_children(unit.root())[0];
        let assignment = named_children(stmt)[0];
        let right = assignment.child_by_field_name("right").unwrap();
        eval_literal(right, &unit.source)
    }

    #[test]
    fn test_eval_scalars() {
        assert_eq!(eval("42"), Some(json!(42)));
        assert_eq!(eval("0x1F"), Some(json!(31)));
        assert_eq!(eval("1_000"), Some(json!(1000)));
        assert_eq!(eval("-3"), Some(json!(-3)));
        assert_eq!(eval("2.5"), Some(json!(2.5)));
        assert_eq!(eval("True"), Some(json!(true)));
        assert_eq!(eval("None"), Some(Value::Null));
        assert_eq!(eval("'it\\'s'"), Some(json!("it's")));
        assert_eq!(eval("r'\\d+'"), Some(json!("\\d+")));
    }

    #[test]
    fn test_eval_containers() {
        assert_eq!(eval("[1, 'a', None]"), Some(json!([1, "a", null])));
        assert_eq!(eval("(1, 2)"), Some(json!([1, 2])));
        assert_eq!(eval("{'k': [True]}"), Some(json!({"k": [true]})));
    }

    #[test]
    fn test_eval_rejects_non_literals() {
        assert_eq!(eval("DEFAULT"), None);
        assert_eq!(eval("compute()"), None);
        assert_eq!(eval("{1, 2}"), None);
        assert_eq!(eval("b'raw'"), None);
        assert_eq!(eval("f'{x}'"), None);
        assert_eq!(eval("1 + 2"), None);
        assert_eq!(eval("[1, name]"), None);
    }

    #[test]
    fn test_string_value_triple_quoted() {
        assert_eq!(string_value("\"\"\"a\nb\"\"\"").as_deref(), Some("a\nb"));
        assert_eq!(string_value("u'\\x41\\u00e9'").as_deref(), Some("Aé"));
        assert_eq!(string_value("''").as_deref(), Some(""));
    }

    #[test]
    fn test_cleandoc() {
        let raw = "\n    Add two numbers.\n\n        Indented detail.\n    ";
        assert_eq!(cleandoc(raw), "Add two numbers.\n\n    Indented detail.");
        assert_eq!(cleandoc("Summary line.\n    More."), "Summary line.\nMore.");
    }

    #[test]
    fn test_docstring_of_function() {
        let unit = parse_python("def f():\n    \"\"\"Say hi.\"\"\"\n    return 1\n").unwrap();
        let func = named_children(unit.root())[0];
        let body = func.child_by_field_name("body").unwrap();
        assert_eq!(docstring(body, &unit.source).as_deref(), Some("Say hi."));
    }
}
