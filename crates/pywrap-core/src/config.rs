//! Analyzer and execution configuration with environment overrides.
//!
//! Configuration is immutable once built and is passed explicitly into
//! analysis and execution entry points.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Limits and defaults
pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_INTROSPECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 2_000;
pub const DEFAULT_MAX_RESULT_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_CONSOLE_BYTES: u64 = 1024 * 1024;
pub const MIN_TIMEOUT_MS: u64 = 10;

/// Whether analysis stays purely syntactic or may consult a subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Static,
    Enriched,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Static => "static",
            AnalysisMode::Enriched => "enriched",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "static" => Some(AnalysisMode::Static),
            "enriched" | "introspect" | "runtime" => Some(AnalysisMode::Enriched),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub mode: AnalysisMode,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub python: String,
    pub introspect_timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::Static,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            python: DEFAULT_PYTHON.to_string(),
            introspect_timeout_ms: DEFAULT_INTROSPECT_TIMEOUT_MS,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(python) = lookup("PYWRAP_PYTHON").filter(|v| !v.trim().is_empty()) {
            config.python = python.trim().to_string();
        }
        if let Some(mode) = lookup("PYWRAP_ANALYSIS_MODE").and_then(|v| AnalysisMode::parse(&v)) {
            config.mode = mode;
        }
        if flag_enabled(lookup("PYWRAP_ENRICH").as_deref(), false) {
            config.mode = AnalysisMode::Enriched;
        }
        if let Some(ms) = lookup("PYWRAP_INTROSPECT_TIMEOUT_MS").and_then(|v| parse_u64(&v)) {
            config.introspect_timeout_ms = ms.max(MIN_TIMEOUT_MS);
        }
        config
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn introspect_timeout(&self) -> Duration {
        Duration::from_millis(self.introspect_timeout_ms)
    }

    /// Stable digest of every setting that can change analysis output.
    ///
    /// The interpreter path is excluded: it selects where enrichment runs,
    /// not what the static analysis produces.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mode.as_str().as_bytes());
        hasher.update([0u8]);
        for pattern in &self.include_patterns {
            hasher.update(b"+");
            hasher.update(pattern.as_bytes());
            hasher.update([0u8]);
        }
        for pattern in &self.exclude_patterns {
            hasher.update(b"-");
            hasher.update(pattern.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub python: String,
    pub timeout_ms: u64,
    pub cancel_grace_ms: u64,
    pub max_result_bytes: u64,
    pub max_console_bytes: u64,
    /// Directory for side-channel files; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            python: DEFAULT_PYTHON.to_string(),
            timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            max_console_bytes: DEFAULT_MAX_CONSOLE_BYTES,
            temp_dir: None,
        }
    }
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(python) = lookup("PYWRAP_PYTHON").filter(|v| !v.trim().is_empty()) {
            config.python = python.trim().to_string();
        }
        if let Some(ms) = lookup("PYWRAP_EXEC_TIMEOUT_MS").and_then(|v| parse_u64(&v)) {
            config.timeout_ms = ms.max(MIN_TIMEOUT_MS);
        }
        if let Some(ms) = lookup("PYWRAP_CANCEL_GRACE_MS").and_then(|v| parse_u64(&v)) {
            config.cancel_grace_ms = ms;
        }
        if let Some(bytes) = lookup("PYWRAP_MAX_RESULT_BYTES").and_then(|v| parse_u64(&v)) {
            config.max_result_bytes = bytes.max(1);
        }
        if let Some(bytes) = lookup("PYWRAP_MAX_CONSOLE_BYTES").and_then(|v| parse_u64(&v)) {
            config.max_console_bytes = bytes;
        }
        if let Some(dir) = lookup("PYWRAP_TEMP_DIR").filter(|v| !v.trim().is_empty()) {
            config.temp_dir = Some(PathBuf::from(dir.trim()));
        }
        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().replace('_', "").parse::<u64>().ok()
}

/// Reads a boolean flag using the `0/false/no/off` convention.
pub fn flag_enabled(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(val) => {
            let v = val.trim().to_lowercase();
            if default {
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        None => default,
    }
}
