//! Analyze-command synthesis.
//!
//! Walks the code model of the selected configuration into [`CompileUnit`]s,
//! then combines each unit with its language's toolchain into one
//! [`AnalysisInvocation`]: the full argument list, the shared environment,
//! and a dedicated diagnostic log path. The per-toolchain argument suffix
//! and environment are built exactly once per distinct compiler path into a
//! [`ToolchainContext`] table that is read-only for the rest of the run.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::driver::RunOptions;
use crate::error::{DriverError, Result};
use crate::fs_utils::{absolutize, is_contained_in};
use crate::toolchain::{Language, ToolchainDescriptor};
use crate::vcenv;

/// Ruleset tried when the caller does not name one
pub const DEFAULT_RULESET: &str = "NativeRecommendedRules.ruleset";

/// One include directory plus its system/project classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludePath {
    pub path: PathBuf,
    pub is_system: bool,
}

/// One source file of a compiled target, with the flags its compile group
/// carries
#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub source_path: PathBuf,
    pub language: Language,
    pub language_standard: Option<String>,
    pub raw_fragments: String,
    pub includes: Vec<IncludePath>,
    pub defines: Vec<String>,
}

/// One compiler run in analysis mode against one source file
#[derive(Debug, Clone)]
pub struct AnalysisInvocation {
    pub source_path: PathBuf,
    pub compiler_path: PathBuf,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub log_path: PathBuf,
}

/// Argument suffix and environment shared by every invocation of one
/// compiler
#[derive(Debug, Clone)]
pub struct ToolchainContext {
    pub analyze_args: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Owner of every diagnostic log allocated for a run.
///
/// Paths are `tempfile` temp paths, so each one is removed when this value
/// drops, whichever way the run ends. A mid-run allocation failure leaves
/// earlier logs owned here and therefore cleaned up with the rest.
#[derive(Default)]
pub struct DiagnosticLogs {
    logs: Vec<tempfile::TempPath>,
}

impl DiagnosticLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh unique `.sarif` log path.
    pub fn allocate(&mut self) -> std::io::Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("vcanalyze-")
            .suffix(".sarif")
            .tempfile()?;
        let path = file.into_temp_path();
        let result = path.to_path_buf();
        self.logs.push(path);
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Code model walk
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CodemodelDoc {
    #[serde(default)]
    configurations: Vec<ConfigurationEntry>,
    paths: CodemodelPaths,
}

#[derive(Deserialize)]
struct CodemodelPaths {
    source: String,
}

#[derive(Deserialize)]
struct ConfigurationEntry {
    name: String,
    #[serde(default)]
    targets: Vec<TargetRef>,
}

#[derive(Deserialize)]
struct TargetRef {
    #[serde(rename = "jsonFile")]
    json_file: String,
}

#[derive(Deserialize)]
struct TargetDoc {
    #[serde(default)]
    name: String,
    paths: TargetPaths,
    #[serde(default)]
    sources: Vec<SourceEntry>,
    #[serde(default, rename = "compileGroups")]
    compile_groups: Vec<CompileGroupEntry>,
}

#[derive(Deserialize)]
struct TargetPaths {
    source: String,
}

#[derive(Deserialize)]
struct SourceEntry {
    path: String,
}

#[derive(Deserialize)]
struct CompileGroupEntry {
    language: String,
    #[serde(default, rename = "languageStandard")]
    language_standard: Option<LanguageStandardEntry>,
    #[serde(default, rename = "compileCommandFragments")]
    compile_command_fragments: Vec<FragmentEntry>,
    #[serde(default)]
    includes: Vec<IncludeEntry>,
    #[serde(default)]
    defines: Vec<DefineEntry>,
    #[serde(default, rename = "sourceIndexes")]
    source_indexes: Vec<usize>,
}

#[derive(Deserialize)]
struct LanguageStandardEntry {
    standard: String,
}

#[derive(Deserialize)]
struct FragmentEntry {
    fragment: String,
}

#[derive(Deserialize)]
struct IncludeEntry {
    path: String,
    #[serde(default, rename = "isSystem")]
    is_system: bool,
}

#[derive(Deserialize)]
struct DefineEntry {
    define: String,
}

/// Walk the selected configuration's targets into compile units.
///
/// Targets whose source directory sits under an excluded path contribute
/// nothing; compile groups in languages we cannot analyze are skipped.
pub fn collect_compile_units(
    codemodel_path: &Path,
    configuration: Option<&str>,
    excluded_targets: &[PathBuf],
) -> Result<Vec<CompileUnit>> {
    let reply_dir = codemodel_path.parent().ok_or_else(|| {
        DriverError::Metadata(format!(
            "codemodel path {} has no parent directory",
            codemodel_path.display()
        ))
    })?;
    let doc: CodemodelDoc = read_reply_doc(codemodel_path)?;
    let source_root = PathBuf::from(&doc.paths.source);
    let selected = select_configuration(&doc.configurations, configuration)?;

    let mut units = Vec::new();
    for target_ref in &selected.targets {
        let target_path = reply_dir.join(&target_ref.json_file);
        let target: TargetDoc = read_reply_doc(&target_path)?;

        let target_dir = absolutize(Path::new(&target.paths.source), &source_root);
        if excluded_targets
            .iter()
            .any(|excluded| is_contained_in(&target_dir, excluded))
        {
            continue;
        }

        for group in &target.compile_groups {
            let Some(language) = Language::from_api(&group.language) else {
                continue;
            };
            let raw_fragments = group
                .compile_command_fragments
                .iter()
                .map(|f| f.fragment.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let includes: Vec<IncludePath> = group
                .includes
                .iter()
                .map(|inc| IncludePath {
                    path: absolutize(Path::new(&inc.path), &source_root),
                    is_system: inc.is_system,
                })
                .collect();
            let defines: Vec<String> = group.defines.iter().map(|d| d.define.clone()).collect();

            for &index in &group.source_indexes {
                let source = target.sources.get(index).ok_or_else(|| {
                    DriverError::Metadata(format!(
                        "source index {} out of range in target '{}'",
                        index, target.name
                    ))
                })?;
                units.push(CompileUnit {
                    source_path: absolutize(Path::new(&source.path), &source_root),
                    language,
                    language_standard: group
                        .language_standard
                        .as_ref()
                        .map(|l| l.standard.clone()),
                    raw_fragments: raw_fragments.clone(),
                    includes: includes.clone(),
                    defines: defines.clone(),
                });
            }
        }
    }
    Ok(units)
}

fn read_reply_doc<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| {
        DriverError::Metadata(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| DriverError::Metadata(format!("malformed {}: {}", path.display(), e)))
}

fn select_configuration<'a>(
    configurations: &'a [ConfigurationEntry],
    requested: Option<&str>,
) -> Result<&'a ConfigurationEntry> {
    if configurations.is_empty() {
        return Err(DriverError::Metadata(
            "code model contains no configurations".to_string(),
        ));
    }
    if configurations.len() == 1 {
        let only = &configurations[0];
        if let Some(name) = requested {
            if name != only.name {
                return Err(DriverError::Metadata(format!(
                    "configuration '{}' not found; the build provides '{}'",
                    name, only.name
                )));
            }
        }
        return Ok(only);
    }

    let names: Vec<&str> = configurations.iter().map(|c| c.name.as_str()).collect();
    let Some(name) = requested else {
        return Err(DriverError::Metadata(format!(
            "the build provides {} configurations ({}); --configuration is required",
            configurations.len(),
            names.join(", ")
        )));
    };
    configurations
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| {
            DriverError::Metadata(format!(
                "configuration '{}' not found; available: {}",
                name,
                names.join(", ")
            ))
        })
}

// ---------------------------------------------------------------------------
// Argument assembly
// ---------------------------------------------------------------------------

/// Re-split joined compile command fragments into argv tokens.
///
/// Whitespace separates tokens; double quotes group and are stripped, which
/// matches how the fragments were quoted for the native command line.
pub fn tokenize_command_fragments(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in raw.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Build the shared argument/environment table, one entry per distinct
/// compiler path.
pub fn build_toolchain_contexts(
    toolchains: &BTreeMap<Language, ToolchainDescriptor>,
    options: &RunOptions,
) -> Result<HashMap<PathBuf, ToolchainContext>> {
    let mut contexts = HashMap::new();
    for descriptor in toolchains.values() {
        if contexts.contains_key(&descriptor.compiler_path) {
            continue;
        }
        let analyze_args = shared_analyze_args(descriptor, options)?;
        let environment = shared_environment(descriptor, options)?;
        contexts.insert(
            descriptor.compiler_path.clone(),
            ToolchainContext {
                analyze_args,
                environment,
            },
        );
    }
    Ok(contexts)
}

/// Combine compile units with toolchain contexts into dispatchable
/// invocations. Units whose language has no toolchain are dropped.
pub fn build_invocations(
    units: &[CompileUnit],
    toolchains: &BTreeMap<Language, ToolchainDescriptor>,
    contexts: &HashMap<PathBuf, ToolchainContext>,
    logs: &mut DiagnosticLogs,
    options: &RunOptions,
) -> Result<Vec<AnalysisInvocation>> {
    let mut invocations = Vec::new();
    for unit in units {
        let Some(descriptor) = toolchains.get(&unit.language) else {
            if options.verbose {
                eprintln!(
                    "[vcanalyze][warn] skipping {} (no {} toolchain in this build)",
                    unit.source_path.display(),
                    unit.language
                );
            }
            continue;
        };
        let context = contexts.get(&descriptor.compiler_path).ok_or_else(|| {
            DriverError::Synthesis(format!(
                "no toolchain context for {}",
                descriptor.compiler_path.display()
            ))
        })?;

        let mut args = tokenize_command_fragments(&unit.raw_fragments);
        for include in unit.includes.iter().chain(descriptor.implicit_includes.iter()) {
            let external = (options.ignore_system_headers && include.is_system)
                || options
                    .excluded_include_paths
                    .iter()
                    .any(|excluded| is_contained_in(&include.path, excluded));
            args.push(if external { "/external:I" } else { "/I" }.to_string());
            args.push(include.path.display().to_string());
        }
        for define in &unit.defines {
            args.push(format!("/D{}", define));
        }
        args.push(unit.source_path.display().to_string());

        let log_path = logs.allocate().map_err(|e| {
            DriverError::Synthesis(format!("failed to allocate a diagnostic log: {}", e))
        })?;
        args.push(format!("/analyze:log{}", log_path.display()));
        args.extend(context.analyze_args.iter().cloned());

        invocations.push(AnalysisInvocation {
            source_path: unit.source_path.clone(),
            compiler_path: descriptor.compiler_path.clone(),
            args,
            environment: context.environment.clone(),
            log_path,
        });
    }
    Ok(invocations)
}

fn shared_analyze_args(
    descriptor: &ToolchainDescriptor,
    options: &RunOptions,
) -> Result<Vec<String>> {
    let mut args = vec![
        "/analyze:only".to_string(),
        "/analyze:quiet".to_string(),
        "/analyze:log:format:sarif".to_string(),
        "/nologo".to_string(),
    ];

    let espx = find_espx_engine(descriptor)?;
    args.push(format!("/analyze:plugin{}", espx.display()));

    if let Some(resolved) = resolve_ruleset(
        options.ruleset.as_deref(),
        &options.project_dir,
        &descriptor.compiler_path,
    )? {
        args.push(format!("/analyze:ruleset{}", resolved.path.display()));
        if let Some(dir) = resolved.official_dir {
            args.push(format!("/analyze:rulesetdirectory{}", dir.display()));
        }
    }

    if options.ignore_system_headers {
        args.push("/external:W0".to_string());
        args.push("/analyze:external-".to_string());
    }

    args.extend(options.extra_args.iter().cloned());
    Ok(args)
}

/// The analysis engine sits beside the compiler, in the host-architecture
/// directory of the same `Host*` tree.
fn find_espx_engine(descriptor: &ToolchainDescriptor) -> Result<PathBuf> {
    let compiler_dir = descriptor.compiler_path.parent().ok_or_else(|| {
        DriverError::Synthesis(format!(
            "compiler path {} has no parent directory",
            descriptor.compiler_path.display()
        ))
    })?;
    let host_tree = compiler_dir.parent().unwrap_or(compiler_dir);
    let espx = host_tree
        .join(descriptor.host_arch.as_str())
        .join("EspXEngine.dll");
    if espx.is_file() {
        Ok(espx)
    } else {
        Err(DriverError::Synthesis(format!(
            "EspXEngine.dll not found at {}; this compiler install has no analysis engine",
            espx.display()
        )))
    }
}

struct ResolvedRuleset {
    path: PathBuf,
    /// Set when the ruleset came from the official directory, which then
    /// needs passing along so sibling ruleset references resolve
    official_dir: Option<PathBuf>,
}

fn resolve_ruleset(
    requested: Option<&str>,
    project_dir: &Path,
    compiler_path: &Path,
) -> Result<Option<ResolvedRuleset>> {
    let name = requested.unwrap_or(DEFAULT_RULESET);

    let project_candidate = absolutize(Path::new(name), project_dir);
    if project_candidate.is_file() {
        return Ok(Some(ResolvedRuleset {
            path: project_candidate,
            official_dir: None,
        }));
    }

    if let Some(official) = official_ruleset_dir(compiler_path) {
        let candidate = official.join(name);
        if candidate.is_file() {
            return Ok(Some(ResolvedRuleset {
                path: candidate,
                official_dir: Some(official),
            }));
        }
    }

    if requested.is_some() {
        Err(DriverError::Synthesis(format!(
            "could not resolve ruleset '{}'",
            name
        )))
    } else {
        eprintln!(
            "[vcanalyze][warn] ruleset {} not found; running with all checks enabled",
            name
        );
        Ok(None)
    }
}

/// Officially shipped rulesets live under the install root, seven levels up
/// from the compiler directory.
fn official_ruleset_dir(compiler_path: &Path) -> Option<PathBuf> {
    let compiler_dir = compiler_path.parent()?;
    let install_root = compiler_dir.ancestors().nth(7)?;
    Some(
        install_root
            .join("Team Tools")
            .join("Static Analysis Tools")
            .join("Rule Sets"),
    )
}

fn shared_environment(
    descriptor: &ToolchainDescriptor,
    options: &RunOptions,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    env.insert("CAEmitSarifLog".to_string(), "1".to_string());
    for name in ["INCLUDE", "LIB", "CAExcludePath"] {
        if let Ok(value) = std::env::var(name) {
            env.insert(name.to_string(), value);
        }
    }

    if options.extract_environment {
        let vcvarsall = vcenv::find_vcvarsall(&descriptor.compiler_path)?;
        let arch = vcenv::arch_spec(descriptor.host_arch, &descriptor.target_arch);
        let extracted =
            vcenv::extract_environment(&vcvarsall, &arch, &descriptor.toolset_version)?;

        let include = extracted.get("INCLUDE").cloned().unwrap_or_default();
        let lib = extracted.get("LIB").cloned().unwrap_or_default();
        let merged_include = append_paths(env.get("INCLUDE").map(String::as_str), &include);
        env.insert("INCLUDE".to_string(), merged_include);
        let merged_lib = append_paths(env.get("LIB").map(String::as_str), &lib);
        env.insert("LIB".to_string(), merged_lib);
        // Implicit standard-library headers stay visible to the compiler but
        // are kept out of the analysis results.
        let merged_exclude = append_paths(env.get("CAExcludePath").map(String::as_str), &include);
        env.insert("CAExcludePath".to_string(), merged_exclude);
    }

    Ok(env)
}

fn append_paths(existing: Option<&str>, extra: &str) -> String {
    match existing {
        Some(existing) if !existing.is_empty() => {
            if extra.is_empty() {
                existing.to_string()
            } else {
                format!("{};{}", existing, extra)
            }
        }
        _ => extra.to_string(),
    }
}
