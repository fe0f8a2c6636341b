//! Filesystem scanning helpers for analysis passes.
//!
//! The scanner only decides *which* files are analyzed and under which
//! module id; it never reads file contents.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::errors::{PywrapError, PywrapResult};

const IGNORED_DIR_PATTERNS: &[&str] = &[
    "tests",
    "test",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "build",
    "dist",
    ".git",
    ".tox",
    ".nox",
    ".mypy_cache",
    ".pytest_cache",
    "node_modules",
    ".eggs",
    "*.egg-info",
];

const IGNORED_FILE_PATTERNS: &[&str] = &["setup.py", "conftest.py", "test_*.py", "*_test.py"];

/// Top-level directories treated as a source root when they are not
/// themselves a package.
const SOURCE_ROOT_DIRS: &[&str] = &["src"];

/// One analyzable unit discovered by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub absolute: PathBuf,
    /// Path relative to the project root with `/` separators.
    pub relative: String,
    pub module_id: String,
    /// Directory (relative, `/`-separated) from which `module_id` imports.
    pub source_root: String,
}

fn glob_match(text: &str, pattern: &str) -> bool {
    // Simple glob match supporting * and ?
    let t_chars: Vec<char> = text.chars().collect();
    let p_chars: Vec<char> = pattern.chars().collect();
    let (tl, pl) = (t_chars.len(), p_chars.len());
    let mut dp = vec![vec![false; pl + 1]; tl + 1];
    dp[0][0] = true;
    for j in 1..=pl {
        if p_chars[j - 1] == '*' {
            dp[0][j] = dp[0][j - 1];
        }
    }
    for i in 1..=tl {
        for j in 1..=pl {
            if p_chars[j - 1] == '*' {
                dp[i][j] = dp[i][j - 1] || dp[i - 1][j];
            } else if p_chars[j - 1] == '?' || t_chars[i - 1] == p_chars[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            }
        }
    }
    dp[tl][pl]
}

fn matches_any(name: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| glob_match(name, p))
}

fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('.') || matches_any(name, IGNORED_DIR_PATTERNS)
}

fn is_ignored_file(name: &str) -> bool {
    name.starts_with('.') || matches_any(name, IGNORED_FILE_PATTERNS)
}

fn build_matcher(root: &Path, patterns: &[String]) -> PywrapResult<Option<Gitignore>> {
    let cleaned: Vec<&str> = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new(root);
    for pattern in cleaned {
        let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
        builder
            .add_line(None, pattern)
            .map_err(|e| PywrapError::Analysis(format!("Invalid pattern {pattern:?}: {e}")))?;
    }
    let matcher = builder
        .build()
        .map_err(|e| PywrapError::Analysis(format!("Invalid pattern set: {e}")))?;
    Ok(Some(matcher))
}

fn relative_string(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Derives the dotted module id and its import root for a relative path.
pub fn to_module_id(project_root: &Path, relative: &str) -> (String, String) {
    let mut parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
    let mut source_root = String::new();

    if parts.len() > 1 && SOURCE_ROOT_DIRS.contains(&parts[0]) {
        let top = project_root.join(parts[0]);
        if top.is_dir() && !top.join("__init__.py").exists() {
            source_root = parts[0].to_string();
            parts.remove(0);
        }
    }

    let joined = parts.join(".");
    let mut module_id = joined.strip_suffix(".py").unwrap_or(&joined).to_string();
    if let Some(stripped) = module_id.strip_suffix(".__init__") {
        module_id = stripped.to_string();
    }
    (module_id, source_root)
}

fn keep_entry(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        !is_ignored_dir(&name)
    } else {
        !is_ignored_file(&name)
    }
}

/// Lists the Python units under `project_root` in lexicographic order of
/// their relative paths.
///
/// A file root yields exactly that file and bypasses every ignore rule.
pub fn iter_python_files(
    project_root: &Path,
    include_patterns: &[String],
    exclude_patterns: &[String],
) -> PywrapResult<Vec<SourceFile>> {
    if project_root.is_file() {
        let name = project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                PywrapError::Analysis(format!("Invalid file root: {}", project_root.display()))
            })?;
        let module_id = name.strip_suffix(".py").unwrap_or(&name).to_string();
        return Ok(vec![SourceFile {
            absolute: project_root.to_path_buf(),
            relative: name,
            module_id,
            source_root: String::new(),
        }]);
    }
    if !project_root.is_dir() {
        return Err(PywrapError::Analysis(format!(
            "Project root does not exist: {}",
            project_root.display()
        )));
    }

    let includes = build_matcher(project_root, include_patterns)?;
    let excludes = build_matcher(project_root, exclude_patterns)?;

    let mut result = Vec::new();
    let walker = WalkDir::new(project_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !keep_entry(entry) {
                return false;
            }
            match &excludes {
                Some(matcher) if entry.depth() > 0 => !matcher
                    .matched_path_or_any_parents(entry.path(), entry.file_type().is_dir())
                    .is_ignore(),
                _ => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().map(|e| e != "py").unwrap_or(true) {
            continue;
        }
        if let Some(matcher) = &includes {
            if !matcher.matched_path_or_any_parents(path, false).is_ignore() {
                continue;
            }
        }
        let relative = relative_string(path, project_root);
        let (module_id, source_root) = to_module_id(project_root, &relative);
        result.push(SourceFile {
            absolute: path.to_path_buf(),
            relative,
            module_id,
            source_root,
        });
    }

    result.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(result)
}
