use anyhow::Context;

use vcanalyze::args::{self, ColorMode};
use vcanalyze::config::VcanalyzeConfig;
use vcanalyze::driver::{self, RunOptions};
use vcanalyze::progress;

fn main() {
    let parsed = match args::parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            progress::error(&message);
            eprintln!("\n{USAGE}");
            std::process::exit(2);
        }
    };

    match parsed.color {
        ColorMode::Always => console::set_colors_enabled(true),
        ColorMode::Never => console::set_colors_enabled(false),
        ColorMode::Auto => {}
    }

    if parsed.show_help {
        println!("{USAGE}");
        return;
    }
    if parsed.show_version {
        println!("vcanalyze {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(e) = real_main(&parsed) {
        progress::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn real_main(parsed: &args::ParsedArgs) -> anyhow::Result<()> {
    let project_dir = match &parsed.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine the working directory")?,
    };
    let config = VcanalyzeConfig::load(&project_dir);

    let options = RunOptions::resolve(parsed, &config)?;
    let summary = driver::run(&options)?;

    progress::success(&format!(
        "analyzed {}, {} in {}",
        progress::format_count(summary.analyzed, "file", "files"),
        progress::format_count(summary.findings, "finding", "findings"),
        summary.output_path.display()
    ));
    Ok(())
}

const USAGE: &str = "vcanalyze - MSVC code analysis driven by CMake build metadata\n\n\
Derives a /analyze command for every source file in a configured build,\n\
runs them, and merges the SARIF logs into one deduplicated report.\n\n\
Usage:\n  \
  vcanalyze <build-dir> [options]\n\n\
Options:\n  \
  -b, --build-dir <dir>            CMake build tree (also the first positional)\n  \
  -o, --output <file>              Merged SARIF report path (default: analysis.sarif)\n  \
      --configuration <name>       Build configuration for multi-config generators\n  \
      --ruleset <name-or-path>     Ruleset file, project-relative or officially shipped\n  \
      --ignore-system-headers      Treat system headers as external, silence their warnings\n  \
      --extract-environment        Prime INCLUDE/LIB from the VS environment scripts\n  \
      --ignored-paths <a;b>        Paths excluded from targets and include analysis\n  \
      --ignored-target-paths <a;b> Paths whose targets are skipped\n  \
      --ignored-include-paths <a;b> Include dirs treated as external\n  \
      --compiler-args <string>     Extra arguments appended to every analyze command\n  \
      --project-dir <dir>          Project root for relative paths (default: cwd)\n  \
      --color <auto|always|never>  Terminal colors\n  \
  -v, --verbose                    Detailed progress\n  \
  -h, --help                       This help\n  \
  -V, --version                    Version\n\n\
Examples:\n  \
  vcanalyze build                                # single-config build\n  \
  vcanalyze build --configuration Release       # multi-config generator\n  \
  vcanalyze build --ruleset Security.ruleset -o ca.sarif\n\n\
Defaults can live in vcanalyze.toml in the project root.\n";
