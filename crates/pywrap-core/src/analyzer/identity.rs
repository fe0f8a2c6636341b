//! Stable identifiers and content hashes.

use sha2::{Digest, Sha256};

use crate::models::ParamKind;

const ACTION_HASH_LEN: usize = 12;
const CONTENT_HASH_LEN: usize = 16;

/// Normalizes source bytes so hashes ignore BOMs and line-ending style.
pub fn normalize_source(source: &str) -> String {
    let without_bom = source.strip_prefix('\u{feff}').unwrap_or(source);
    without_bom.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn compute_content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_source(source).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..CONTENT_HASH_LEN].to_string()
}

/// Action id over module id, qualified name and ordered parameter kinds.
///
/// Line numbers, formatting, parameter names and annotations do not
/// participate, so cosmetic edits keep the id.
pub fn action_id(module_id: &str, qualified_name: &str, kinds: &[ParamKind]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(module_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(qualified_name.as_bytes());
    hasher.update([0u8]);
    for kind in kinds {
        hasher.update(kind.as_str().as_bytes());
        hasher.update([b',']);
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{qualified_name}:{}", &digest[..ACTION_HASH_LEN])
}

/// Hash over every analyzed unit in scan order plus the configuration.
pub fn input_hash<'a>(
    units: impl IntoIterator<Item = (&'a str, &'a str)>,
    config_fingerprint: &str,
) -> String {
    let mut hasher = Sha256::new();
    for (module_id, content_hash) in units {
        hasher.update(module_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(content_hash.as_bytes());
        hasher.update([b'\n']);
    }
    hasher.update(config_fingerprint.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_ignores_line_endings_and_bom() {
        let unix = compute_content_hash("def f():\n    pass\n");
        let windows = compute_content_hash("\u{feff}def f():\r\n    pass\r\n");
        assert_eq!(unix, windows);
        assert_eq!(unix.len(), 16);
        assert_ne!(unix, compute_content_hash("def g():\n    pass\n"));
    }

    #[test]
    fn test_action_id_shape_and_inputs() {
        let kinds = [ParamKind::PositionalOrKeyword, ParamKind::KeywordOnly];
        let id = action_id("pkg.mod", "run", &kinds);
        assert!(id.starts_with("run:"));
        assert_eq!(id.len(), "run:".len() + 12);
        assert_eq!(id, action_id("pkg.mod", "run", &kinds));
        assert_ne!(id, action_id("pkg.other", "run", &kinds));
        assert_ne!(
            id,
            action_id("pkg.mod", "run", &[ParamKind::PositionalOrKeyword])
        );
    }

    #[test]
    fn test_input_hash_is_order_sensitive() {
        let a = input_hash([("a", "1"), ("b", "2")], "cfg");
        let b = input_hash([("b", "2"), ("a", "1")], "cfg");
        assert_ne!(a, b);
        assert_eq!(a, input_hash([("a", "1"), ("b", "2")], "cfg"));
        assert_ne!(a, input_hash([("a", "1"), ("b", "2")], "other"));
    }
}
