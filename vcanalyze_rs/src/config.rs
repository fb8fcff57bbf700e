//! Configuration file support for vcanalyze.
//!
//! Loads optional `vcanalyze.toml` from the project root. Values act as
//! defaults; explicit command-line flags win.

use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct VcanalyzeConfig {
    /// Ruleset name or path, same resolution rules as `--ruleset`
    pub ruleset: Option<String>,
    /// Treat system headers as external and silence their warnings
    pub ignore_system_headers: bool,
    /// Run the toolchain environment script to pick up implicit paths
    pub extract_environment: bool,
    /// Paths excluded from both target enumeration and include analysis
    #[serde(default)]
    pub ignored_paths: Vec<String>,
    /// Paths whose targets are skipped entirely
    #[serde(default)]
    pub ignored_target_paths: Vec<String>,
    /// Include directories treated as external
    #[serde(default)]
    pub ignored_include_paths: Vec<String>,
    /// Extra arguments appended to every analyze command
    pub compiler_args: Option<String>,
}

impl VcanalyzeConfig {
    /// Load config from `vcanalyze.toml` in the given root directory.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load(root: &Path) -> Self {
        Self::load_from_path(&root.join("vcanalyze.toml"))
    }

    /// Load config from a specific path.
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("[vcanalyze][warn] Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[vcanalyze][warn] Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
