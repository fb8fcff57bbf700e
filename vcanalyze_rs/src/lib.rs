//! # vcanalyze
//!
//! **MSVC code analysis, driven by the build system.** vcanalyze derives the
//! exact `cl.exe /analyze` invocation for every source file of a configured
//! CMake build - no hand-maintained compile database - runs them, and merges
//! the per-file SARIF logs into one deduplicated report.
//!
//! ## How a run works
//!
//! 1. Plant a file API query in the build tree and re-run CMake so the
//!    reply reflects the current cache ([`fileapi`])
//! 2. Resolve the MSVC toolchains the build uses, reading toolset version
//!    and architectures straight off the install layout ([`toolchain`])
//! 3. Walk the code model into per-file analyze commands with dedicated
//!    diagnostic logs ([`invocation`])
//! 4. Run them sequentially ([`runner`]) and fold the logs into one SARIF
//!    report ([`sarif`])
//!
//! ## Library usage
//!
//! ```rust,no_run
//! use vcanalyze::{args::ParsedArgs, config::VcanalyzeConfig, driver};
//! use std::path::PathBuf;
//!
//! let mut parsed = ParsedArgs::default();
//! parsed.build_dir = Some(PathBuf::from("build"));
//!
//! let options = driver::RunOptions::resolve(&parsed, &VcanalyzeConfig::default()).unwrap();
//! let summary = driver::run(&options).unwrap();
//! println!("{} findings", summary.findings);
//! ```

/// Command-line argument parsing.
pub mod args;

/// Optional `vcanalyze.toml` defaults.
pub mod config;

/// Run orchestration and resolved options.
pub mod driver;

/// Error taxonomy for the whole pipeline.
pub mod error;

/// CMake file API query/reply handling.
///
/// # Key entry points
///
/// - [`fileapi::load_build_metadata`] - query, regenerate, and parse in one go
/// - [`fileapi::find_reply_index`] - newest-index selection (lexicographic)
pub mod fileapi;

/// Path normalization and containment helpers.
pub mod fs_utils;

/// Compile-unit collection and analyze-command synthesis.
///
/// The per-toolchain argument suffix and environment live in
/// [`invocation::ToolchainContext`], built once per distinct compiler path.
pub mod invocation;

/// Progress UI (spinners, per-file bar, status lines).
pub mod progress;

/// Sequential compiler dispatch with failure collection.
pub mod runner;

/// SARIF merging and report writing.
pub mod sarif;

/// MSVC toolchain discovery and install-layout parsing.
pub mod toolchain;

/// Implicit environment extraction via the VS environment scripts.
pub mod vcenv;

pub use driver::{RunOptions, RunSummary};
pub use error::DriverError;
pub use invocation::{AnalysisInvocation, CompileUnit, DiagnosticLogs, IncludePath};
pub use sarif::MergedReport;
pub use toolchain::{Language, ToolchainDescriptor};
