//! Run orchestration: metadata, toolchains, synthesis, dispatch, merge.

use std::path::{Path, PathBuf};

use crate::args::ParsedArgs;
use crate::config::VcanalyzeConfig;
use crate::error::{DriverError, Result};
use crate::fileapi;
use crate::fs_utils::absolutize;
use crate::invocation::{self, DiagnosticLogs, tokenize_command_fragments};
use crate::progress;
use crate::runner;
use crate::sarif;
use crate::toolchain;

/// Fully resolved options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub build_dir: PathBuf,
    pub project_dir: PathBuf,
    pub output_path: PathBuf,
    pub configuration: Option<String>,
    pub ignore_system_headers: bool,
    pub extract_environment: bool,
    /// Union of globally ignored and target-ignored paths, absolutized
    pub excluded_target_paths: Vec<PathBuf>,
    /// Union of globally ignored and include-ignored paths, absolutized
    pub excluded_include_paths: Vec<PathBuf>,
    /// Ruleset the caller explicitly asked for, if any
    pub ruleset: Option<String>,
    /// Extra compiler arguments, already tokenized
    pub extra_args: Vec<String>,
    pub verbose: bool,
}

impl RunOptions {
    /// Merge command-line flags over config-file defaults into one options
    /// struct. Explicit flags win; list options fall back to the config
    /// only when the flag was not given.
    pub fn resolve(parsed: &ParsedArgs, config: &VcanalyzeConfig) -> Result<RunOptions> {
        let build_dir = parsed.build_dir.clone().ok_or_else(|| {
            DriverError::Configuration(
                "a build directory is required (pass it as the first argument)".to_string(),
            )
        })?;
        let project_dir = match &parsed.project_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        let pick_list = |from_args: &Vec<String>, from_config: &Vec<String>| -> Vec<String> {
            if from_args.is_empty() {
                from_config.clone()
            } else {
                from_args.clone()
            }
        };
        let global = pick_list(&parsed.ignored_paths, &config.ignored_paths);
        let target = pick_list(&parsed.ignored_target_paths, &config.ignored_target_paths);
        let include = pick_list(&parsed.ignored_include_paths, &config.ignored_include_paths);

        let to_paths = |lists: [&[String]; 2]| -> Vec<PathBuf> {
            lists
                .iter()
                .flat_map(|list| list.iter())
                .map(|entry| absolutize(Path::new(entry), &project_dir))
                .collect()
        };
        let excluded_target_paths = to_paths([&global, &target]);
        let excluded_include_paths = to_paths([&global, &include]);

        let compiler_args = parsed
            .compiler_args
            .clone()
            .or_else(|| config.compiler_args.clone());
        let extra_args = compiler_args
            .map(|raw| tokenize_command_fragments(&raw))
            .unwrap_or_default();

        Ok(RunOptions {
            build_dir,
            project_dir,
            output_path: parsed
                .output_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("analysis.sarif")),
            configuration: parsed.configuration.clone(),
            ignore_system_headers: parsed.ignore_system_headers || config.ignore_system_headers,
            extract_environment: parsed.extract_environment || config.extract_environment,
            excluded_target_paths,
            excluded_include_paths,
            ruleset: parsed.ruleset.clone().or_else(|| config.ruleset.clone()),
            extra_args,
            verbose: parsed.verbose,
        })
    }
}

/// What a completed run produced
#[derive(Debug)]
pub struct RunSummary {
    pub analyzed: usize,
    pub findings: usize,
    pub output_path: PathBuf,
}

/// Execute one full analysis run.
pub fn run(options: &RunOptions) -> Result<RunSummary> {
    let spinner = progress::Spinner::new("Refreshing build metadata...");
    let index = match fileapi::load_build_metadata(&options.build_dir) {
        Ok(index) => index,
        Err(e) => {
            spinner.finish_clear();
            return Err(e);
        }
    };
    spinner.finish_clear();
    if options.verbose {
        println!("cmake {} reply loaded", index.version);
    }

    let toolchains = toolchain::resolve_toolchains(&index.toolchains_path)?;
    let units = invocation::collect_compile_units(
        &index.codemodel_path,
        options.configuration.as_deref(),
        &options.excluded_target_paths,
    )?;
    let contexts = invocation::build_toolchain_contexts(&toolchains, options)?;

    // The log guard lives for the whole run: every allocated diagnostic log
    // is removed when it drops, on success and on every error path.
    let mut logs = DiagnosticLogs::new();
    let invocations =
        invocation::build_invocations(&units, &toolchains, &contexts, &mut logs, options)?;
    if invocations.is_empty() {
        progress::warning("no analyzable sources found in this build");
    }

    let dispatch = runner::run_invocations(&invocations, options.verbose);

    // Log files are pre-created at allocation; only the ones the compiler
    // actually wrote into count as produced. Failed files usually leave
    // theirs empty, so the merge still covers everything that was analyzed
    // before the per-file failures surface below.
    let produced: Vec<PathBuf> = invocations
        .iter()
        .filter(|invocation| {
            std::fs::metadata(&invocation.log_path)
                .map(|m| m.len() > 0)
                .unwrap_or(false)
        })
        .map(|invocation| invocation.log_path.clone())
        .collect();
    let report = sarif::merge_reports(&produced)?;
    sarif::write_report(&report, &options.output_path)?;
    dispatch?;

    Ok(RunSummary {
        analyzed: invocations.len(),
        findings: report.results.len(),
        output_path: options.output_path.clone(),
    })
}
