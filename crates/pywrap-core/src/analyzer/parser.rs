//! Python parsing wrapper used by extraction passes.
//!
//! Parsing is purely syntactic: tree-sitter builds a concrete syntax tree
//! and nothing in the source is ever evaluated.

use tree_sitter::{Node, Parser, Tree};

use crate::errors::{PywrapError, PywrapResult};

/// Parsed source unit holding the text and its syntax tree.
pub struct ParsedUnit {
    pub source: String,
    pub tree: Tree,
}

impl ParsedUnit {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Position (1-based line, 1-based column) of the first syntax error.
    pub fn first_syntax_error(&self) -> Option<(usize, usize)> {
        let root = self.tree.root_node();
        if !root.has_error() {
            return None;
        }
        find_error(root).map(|node| {
            let pos = node.start_position();
            (pos.row + 1, pos.column + 1)
        })
    }
}

fn find_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(find_error)
}

pub fn parse_python(source: &str) -> PywrapResult<ParsedUnit> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| PywrapError::Parse(format!("Failed to set language: {e}")))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| PywrapError::Parse("Parser returned no tree".to_string()))?;

    Ok(ParsedUnit {
        source: source.to_string(),
        tree,
    })
}

pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Named children with comments filtered out.
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

pub fn children_by_field<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// Pre-order traversal over every named descendant, including `node`.
pub fn walk_named<'t>(node: Node<'t>, visit: &mut dyn FnMut(Node<'t>)) {
    visit(node);
    for child in named_children(node) {
        walk_named(child, visit);
    }
}

/// Dotted name for identifier/attribute chains, `None` for anything else.
pub fn dotted_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source).to_string()),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attribute = node.child_by_field_name("attribute")?;
            let prefix = dotted_name(object, source)?;
            Some(format!("{prefix}.{}", node_text(attribute, source)))
        }
        _ => None,
    }
}

pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let unit = parse_python("def add(a, b):\n    return a + b\n").unwrap();
        assert_eq!(unit.root().kind(), "module");
        assert!(unit.first_syntax_error().is_none());
        let defs = named_children(unit.root());
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].kind(), "function_definition");
    }

    #[test]
    fn test_reports_syntax_error_line() {
        let unit = parse_python("x = 1\ndef broken(:\n    pass\n").unwrap();
        let (line, _) = unit.first_syntax_error().unwrap();
        assert_eq!(line, 2);
    }

    #[test]
    fn test_dotted_name() {
        let unit = parse_python("click.core.Command\n").unwrap();
        let mut found = None;
        walk_named(unit.root(), &mut |node| {
            if found.is_none() && node.kind() == "attribute" {
                found = dotted_name(node, &unit.source);
            }
        });
        assert_eq!(found.as_deref(), Some("click.core.Command"));
    }
}
