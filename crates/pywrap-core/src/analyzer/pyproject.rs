//! Console-script metadata from `pyproject.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{Warning, WARN_PYPROJECT_INVALID};

/// A `name = "module:attr"` console-script declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleScript {
    pub name: String,
    pub module: String,
    pub attr_path: String,
}

impl ConsoleScript {
    /// Fully qualified `module.attr` target.
    pub fn target(&self) -> String {
        format!("{}.{}", self.module, self.attr_path)
    }
}

pub fn find_pyproject(project_root: &Path) -> Option<PathBuf> {
    let base = if project_root.is_file() {
        project_root.parent()?
    } else {
        project_root
    };
    let candidate = base.join("pyproject.toml");
    candidate.is_file().then_some(candidate)
}

/// Parses `module:attr [extras]` into its parts.
pub fn parse_entrypoint_target(target: &str) -> Option<(String, String)> {
    let (module, attr) = target.split_once(':')?;
    let module = module.trim();
    let attr = attr.split_whitespace().next()?.trim();
    if module.is_empty() || attr.is_empty() {
        return None;
    }
    Some((module.to_string(), attr.to_string()))
}

fn table_entries(
    value: Option<&toml::Value>,
    label: &str,
    file_path: &str,
    warnings: &mut Vec<Warning>,
) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let Some(value) = value else {
        return entries;
    };
    let Some(table) = value.as_table() else {
        warnings.push(
            Warning::new(WARN_PYPROJECT_INVALID, format!("{label} must be a table"))
                .at(file_path, None),
        );
        return entries;
    };
    for (name, target) in table {
        if let Some(target) = target.as_str() {
            entries.insert(name.clone(), target.to_string());
        }
    }
    entries
}

/// Reads console scripts from pyproject text, sorted by script name.
///
/// `[project.entry-points.console_scripts]` wins over `[project.scripts]`
/// on a name clash.
pub fn parse_console_scripts(
    text: &str,
    file_path: &str,
    warnings: &mut Vec<Warning>,
) -> Vec<ConsoleScript> {
    let document: toml::Value = match toml::from_str(text) {
        Ok(doc) => doc,
        Err(e) => {
            warnings.push(
                Warning::new(
                    WARN_PYPROJECT_INVALID,
                    format!("Failed to parse pyproject.toml: {e}"),
                )
                .at(file_path, None),
            );
            return Vec::new();
        }
    };
    let Some(project) = document.get("project").and_then(|p| p.as_table()) else {
        return Vec::new();
    };

    let mut merged = table_entries(project.get("scripts"), "project.scripts", file_path, warnings);
    let entry_points = project
        .get("entry-points")
        .or_else(|| project.get("entry_points"))
        .and_then(|e| e.as_table());
    if let Some(entry_points) = entry_points {
        merged.extend(table_entries(
            entry_points.get("console_scripts"),
            "project.entry-points.console_scripts",
            file_path,
            warnings,
        ));
    }

    merged
        .into_iter()
        .filter_map(|(name, target)| {
            let parsed = parse_entrypoint_target(&target);
            if parsed.is_none() {
                debug!("Ignoring console script {name} with target {target:?}");
            }
            parsed.map(|(module, attr_path)| ConsoleScript {
                name,
                module,
                attr_path,
            })
        })
        .collect()
}

pub fn load_console_scripts(project_root: &Path, warnings: &mut Vec<Warning>) -> Vec<ConsoleScript> {
    let Some(path) = find_pyproject(project_root) else {
        return Vec::new();
    };
    let display = path.to_string_lossy().to_string();
    match std::fs::read_to_string(&path) {
        Ok(text) => parse_console_scripts(&text, &display, warnings),
        Err(e) => {
            warnings.push(
                Warning::new(WARN_PYPROJECT_INVALID, format!("Could not read file: {e}"))
                    .at(&display, None),
            );
            Vec::new()
        }
    }
}
