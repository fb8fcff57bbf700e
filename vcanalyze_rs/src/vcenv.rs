//! Implicit toolchain environment extraction.
//!
//! MSVC compilers expect `INCLUDE`/`LIB` to be primed by the Visual Studio
//! environment scripts. When the caller opts in, we run `vcvarsall.bat`
//! for the toolchain's architecture pair and toolset version, dump the
//! resulting environment, and hand the interesting variables back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{DriverError, Result};
use crate::toolchain::HostArch;

/// `vcvarsall.bat` location relative to the compiler:
/// `<target dir>/../../../../../Auxiliary/Build` under the `VC` directory.
pub fn find_vcvarsall(compiler_path: &Path) -> Result<PathBuf> {
    let compiler_dir = compiler_path.parent().unwrap_or(compiler_path);
    let vc_dir = compiler_dir.ancestors().nth(6).ok_or_else(|| {
        DriverError::Synthesis(format!(
            "compiler {} is too shallow to locate vcvarsall.bat",
            compiler_path.display()
        ))
    })?;
    let script = vc_dir.join("Auxiliary").join("Build").join("vcvarsall.bat");
    if !script.is_file() {
        return Err(DriverError::Synthesis(format!(
            "vcvarsall.bat not found at {}",
            script.display()
        )));
    }
    Ok(script)
}

/// Architecture spec in the form vcvarsall understands: `x64`, `x86_x64`, ...
pub fn arch_spec(host: HostArch, target: &str) -> String {
    if host.as_str() == target {
        target.to_string()
    } else {
        format!("{}_{}", host.as_str(), target)
    }
}

/// Run the environment script and capture the variables it sets.
///
/// `INCLUDE` and `LIB` must be present in the output; the script exiting
/// zero without them means it silently failed to initialize.
pub fn extract_environment(
    vcvarsall: &Path,
    arch: &str,
    toolset_version: &str,
) -> Result<BTreeMap<String, String>> {
    let vcvars_ver = format!("-vcvars_ver={}", toolset_version);
    let output = Command::new("cmd.exe")
        .arg("/c")
        .arg("call")
        .arg(vcvarsall)
        .arg(arch)
        .arg(&vcvars_ver)
        .arg("&&")
        .arg("set")
        .stdin(Stdio::null())
        .output();
    let output = match output {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DriverError::Synthesis(
                "cmd.exe not found; environment extraction needs a Windows host".to_string(),
            ));
        }
        Err(e) => return Err(DriverError::Io(e)),
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DriverError::Synthesis(format!(
            "environment script {} failed for {}: {}",
            vcvarsall.display(),
            arch,
            stderr.trim()
        )));
    }

    let env = parse_env_output(&String::from_utf8_lossy(&output.stdout));
    for required in ["INCLUDE", "LIB"] {
        if !env.contains_key(required) {
            return Err(DriverError::Synthesis(format!(
                "environment script {} did not report {}",
                vcvarsall.display(),
                required
            )));
        }
    }
    Ok(env)
}

/// Parse `NAME=value` lines into a map; lines without `=` are ignored.
pub fn parse_env_output(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                Some((name.to_string(), value.trim_end_matches('\r').to_string()))
            }
        })
        .collect()
}
