//! Sequential dispatch of analysis invocations.
//!
//! One compiler process per source file, run strictly in order. A failing
//! file does not stop the run; every failure is collected and reported
//! together once all files have been attempted.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{DriverError, Result};
use crate::invocation::AnalysisInvocation;
use crate::progress;

pub fn run_invocations(invocations: &[AnalysisInvocation], verbose: bool) -> Result<()> {
    if invocations.is_empty() {
        return Ok(());
    }

    let bar = progress::analysis_bar(invocations.len() as u64);
    let mut failed: Vec<PathBuf> = Vec::new();

    for invocation in invocations {
        let file_name = invocation
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        bar.set_message(file_name);

        let output = Command::new(&invocation.compiler_path)
            .args(&invocation.args)
            .envs(&invocation.environment)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                if verbose {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    bar.suspend(|| {
                        eprintln!(
                            "[vcanalyze][warn] {} exited with {}: {}",
                            invocation.source_path.display(),
                            out.status,
                            stderr.trim()
                        );
                    });
                }
                failed.push(invocation.source_path.clone());
            }
            Err(e) => {
                if verbose {
                    bar.suspend(|| {
                        eprintln!(
                            "[vcanalyze][warn] could not launch {} for {}: {}",
                            invocation.compiler_path.display(),
                            invocation.source_path.display(),
                            e
                        );
                    });
                }
                failed.push(invocation.source_path.clone());
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(DriverError::Analysis { failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fake_invocation(source: &str, program: &str, args: &[&str]) -> AnalysisInvocation {
        AnalysisInvocation {
            source_path: PathBuf::from(source),
            compiler_path: PathBuf::from(program),
            args: args.iter().map(|s| s.to_string()).collect(),
            environment: BTreeMap::new(),
            log_path: PathBuf::from("/tmp/unused.sarif"),
        }
    }

    #[test]
    fn empty_run_succeeds() {
        assert!(run_invocations(&[], false).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let marker = temp.path().join("ran-third");
        let invocations = vec![
            fake_invocation("/src/a.cpp", "sh", &["-c", "exit 0"]),
            fake_invocation("/src/b.cpp", "sh", &["-c", "exit 1"]),
            fake_invocation(
                "/src/c.cpp",
                "sh",
                &["-c", &format!("touch {}", marker.display())],
            ),
        ];

        let err = run_invocations(&invocations, false).unwrap_err();
        match err {
            DriverError::Analysis { failed } => {
                assert_eq!(failed, vec![PathBuf::from("/src/b.cpp")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // the file after the failure still ran
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn missing_compiler_counts_as_a_failure() {
        let invocations = vec![fake_invocation(
            "/src/a.cpp",
            "/nonexistent/compiler",
            &[],
        )];
        let err = run_invocations(&invocations, false).unwrap_err();
        assert!(err.to_string().contains("/src/a.cpp"));
    }

    #[cfg(unix)]
    #[test]
    fn all_successes_return_ok() {
        let invocations = vec![
            fake_invocation("/src/a.cpp", "sh", &["-c", "exit 0"]),
            fake_invocation("/src/b.cpp", "sh", &["-c", "exit 0"]),
        ];
        assert!(run_invocations(&invocations, false).is_ok());
    }
}
