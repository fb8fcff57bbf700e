//! MSVC toolchain discovery from the file API toolchains document.
//!
//! The interesting part is deriving toolset version and architectures from
//! nothing but the compiler's installation path. MSVC lays compilers out as
//! `.../VC/Tools/MSVC/<toolset>/bin/Host<host>/<target>/cl.exe`, so the
//! derivation is a pure function over path components with an enumerated
//! failure mode instead of exception-driven control flow.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{DriverError, Result};
use crate::invocation::IncludePath;

/// Source language of a compile group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Language {
    C,
    Cxx,
}

impl Language {
    /// Parse the language strings the file API uses.
    pub fn from_api(raw: &str) -> Option<Self> {
        match raw {
            "C" => Some(Language::C),
            "CXX" => Some(Language::Cxx),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::C => write!(f, "C"),
            Language::Cxx => write!(f, "C++"),
        }
    }
}

/// Host architecture of a compiler binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostArch {
    X86,
    X64,
}

impl HostArch {
    /// Directory name used for the architecture inside `bin/Host*/`
    pub fn as_str(&self) -> &'static str {
        match self {
            HostArch::X86 => "x86",
            HostArch::X64 => "x64",
        }
    }
}

/// Why a compiler path did not match the expected installation layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Fewer path components than the layout requires
    TooShallow,
    /// The host directory component was not `Hostx86` or `Hostx64`
    UnknownHostDirectory(String),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::TooShallow => {
                write!(f, "path has too few components for an MSVC install layout")
            }
            LayoutError::UnknownHostDirectory(dir) => {
                write!(f, "unrecognized host architecture directory '{}'", dir)
            }
        }
    }
}

/// Architecture and toolset facts read off a compiler path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerLayout {
    pub toolset_version: String,
    pub host_arch: HostArch,
    pub target_arch: String,
}

/// One analyzable compiler installation for one language
#[derive(Debug, Clone)]
pub struct ToolchainDescriptor {
    pub language: Language,
    pub compiler_path: PathBuf,
    pub compiler_version: String,
    pub implicit_includes: Vec<IncludePath>,
    pub toolset_version: String,
    pub host_arch: HostArch,
    pub target_arch: String,
}

/// Derive toolset version and architectures from the compiler path alone.
///
/// Expects `.../<toolset>/bin/Host<host>/<target>/cl.exe`; the components
/// are read at fixed offsets from the executable.
pub fn parse_compiler_layout(compiler_path: &Path) -> std::result::Result<CompilerLayout, LayoutError> {
    let dir = compiler_path.parent().ok_or(LayoutError::TooShallow)?;
    let names = dir
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>();
    let n = names.len();
    if n < 4 {
        return Err(LayoutError::TooShallow);
    }
    // <toolset>/bin/Host<host>/<target>, read from the end
    let target_arch = names[n - 1];
    let host_dir = names[n - 2];
    let toolset_version = names[n - 4];

    let host_arch = match host_dir {
        "Hostx86" => HostArch::X86,
        "Hostx64" => HostArch::X64,
        other => return Err(LayoutError::UnknownHostDirectory(other.to_string())),
    };

    Ok(CompilerLayout {
        toolset_version: toolset_version.to_string(),
        host_arch,
        target_arch: target_arch.to_string(),
    })
}

#[derive(Deserialize)]
struct ToolchainsDoc {
    #[serde(default)]
    toolchains: Vec<ToolchainEntry>,
}

#[derive(Deserialize)]
struct ToolchainEntry {
    language: String,
    compiler: CompilerEntry,
}

#[derive(Deserialize)]
struct CompilerEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default, rename = "implicitIncludeDirectories")]
    implicit_include_directories: Vec<String>,
}

/// Read the toolchains document and keep the MSVC entries, one per language.
pub fn resolve_toolchains(toolchains_path: &Path) -> Result<BTreeMap<Language, ToolchainDescriptor>> {
    let raw = fs::read_to_string(toolchains_path).map_err(|e| {
        DriverError::Metadata(format!(
            "cannot read toolchains document {}: {}",
            toolchains_path.display(),
            e
        ))
    })?;
    let doc: ToolchainsDoc = serde_json::from_str(&raw).map_err(|e| {
        DriverError::Metadata(format!(
            "malformed toolchains document {}: {}",
            toolchains_path.display(),
            e
        ))
    })?;

    let mut resolved = BTreeMap::new();
    for entry in doc.toolchains {
        let Some(language) = Language::from_api(&entry.language) else {
            continue;
        };
        if entry.compiler.id.as_deref() != Some("MSVC") {
            continue;
        }
        if resolved.contains_key(&language) {
            continue;
        }
        let Some(path) = entry.compiler.path else {
            continue;
        };
        let compiler_path = PathBuf::from(&path);
        let layout = parse_compiler_layout(&compiler_path).map_err(|e| {
            DriverError::Synthesis(format!("compiler {} does not match the MSVC install layout: {}", path, e))
        })?;

        let implicit_includes = entry
            .compiler
            .implicit_include_directories
            .iter()
            .map(|dir| IncludePath {
                path: PathBuf::from(dir),
                is_system: true,
            })
            .collect();

        resolved.insert(
            language,
            ToolchainDescriptor {
                language,
                compiler_path,
                compiler_version: entry.compiler.version.unwrap_or_default(),
                implicit_includes,
                toolset_version: layout.toolset_version,
                host_arch: layout.host_arch,
                target_arch: layout.target_arch,
            },
        );
    }

    if resolved.is_empty() {
        return Err(DriverError::Metadata(
            "no MSVC toolchain found in the configured build".to_string(),
        ));
    }
    Ok(resolved)
}
