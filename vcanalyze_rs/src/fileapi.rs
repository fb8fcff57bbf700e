//! CMake file API reader.
//!
//! The file API is a query/reply protocol on disk: clients drop a query
//! file under `.cmake/api/v1/query/` and CMake answers into
//! `.cmake/api/v1/reply/` the next time it runs on the build tree. This
//! module owns that exchange end to end: it plants our client query,
//! re-runs CMake to refresh the reply, and digests the reply index into a
//! [`ReplyIndex`] pointing at the codemodel and toolchains documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::Value;

use crate::error::{DriverError, Result};

/// Client directory name under `.cmake/api/v1/query/`
pub const CLIENT_NAME: &str = "client-vcanalyze";

const API_SUBDIR: &str = ".cmake/api/v1";
const QUERY_FILE: &str = "query.json";

/// Oldest CMake whose file API serves both codemodel v2 and toolchains v1
const MIN_CMAKE_VERSION: (u64, u64, u64) = (3, 20, 5);

/// Where to find the codemodel and toolchains documents for one reply
#[derive(Debug, Clone)]
pub struct ReplyIndex {
    pub codemodel_path: PathBuf,
    pub toolchains_path: PathBuf,
    pub version: String,
}

/// Ensure the client query exists, refresh the reply, and parse its index.
pub fn load_build_metadata(build_root: &Path) -> Result<ReplyIndex> {
    if !build_root.is_dir() {
        return Err(DriverError::Configuration(format!(
            "build directory {} does not exist",
            build_root.display()
        )));
    }
    let mut entries = fs::read_dir(build_root)?;
    if entries.next().is_none() {
        return Err(DriverError::Configuration(format!(
            "build directory {} is empty; configure the build first",
            build_root.display()
        )));
    }

    ensure_query(build_root)?;
    run_cmake(build_root)?;

    let reply_dir = build_root.join(API_SUBDIR).join("reply");
    let index_path = find_reply_index(&reply_dir)?;
    parse_reply_index(&index_path, &reply_dir)
}

/// Write the query descriptor naming the document kinds we need.
/// Idempotent: an existing query file is left untouched.
pub fn ensure_query(build_root: &Path) -> Result<()> {
    let query_dir = build_root.join(API_SUBDIR).join("query").join(CLIENT_NAME);
    let query_path = query_dir.join(QUERY_FILE);
    if query_path.exists() {
        return Ok(());
    }
    fs::create_dir_all(&query_dir)?;
    let query = serde_json::json!({
        "requests": [
            { "kind": "codemodel", "version": 2 },
            { "kind": "toolchains", "version": 1 },
        ]
    });
    fs::write(&query_path, serde_json::to_string_pretty(&query).expect("static query"))?;
    Ok(())
}

/// Re-run CMake on the build tree so the reply reflects the current cache.
fn run_cmake(build_root: &Path) -> Result<()> {
    let cmake = std::env::var_os("CMAKE").unwrap_or_else(|| "cmake".into());
    let output = Command::new(&cmake)
        .arg(build_root)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();
    let output = match output {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DriverError::Metadata(format!(
                "could not locate {} on PATH",
                cmake.to_string_lossy()
            )));
        }
        Err(e) => return Err(DriverError::Io(e)),
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DriverError::Metadata(format!(
            "regenerating build metadata failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

/// Pick the most recent index document from the reply directory.
///
/// CMake names index files so that lexicographic order matches generation
/// order; keeping that tie-break (rather than mtimes) stays deterministic
/// across filesystems.
pub fn find_reply_index(reply_dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(reply_dir).map_err(|_| {
        DriverError::Metadata(format!(
            "no file API reply found under {}",
            reply_dir.display()
        ))
    })?;

    let mut newest: Option<String> = None;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("index-")
            && name.ends_with(".json")
            && newest.as_deref() < Some(name.as_str())
        {
            newest = Some(name);
        }
    }

    match newest {
        Some(name) => Ok(reply_dir.join(name)),
        None => Err(DriverError::Metadata(format!(
            "no index document found in {}",
            reply_dir.display()
        ))),
    }
}

/// Extract our client's codemodel/toolchains responses from the index.
pub fn parse_reply_index(index_path: &Path, reply_dir: &Path) -> Result<ReplyIndex> {
    let raw = fs::read_to_string(index_path).map_err(|e| {
        DriverError::Metadata(format!("cannot read {}: {}", index_path.display(), e))
    })?;
    let doc: Value = serde_json::from_str(&raw).map_err(|e| {
        DriverError::Metadata(format!("malformed index {}: {}", index_path.display(), e))
    })?;

    let version = doc
        .pointer("/cmake/version/string")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DriverError::Metadata("index document carries no cmake version".to_string())
        })?
        .to_string();
    if !version_at_least(&version, MIN_CMAKE_VERSION) {
        return Err(DriverError::Metadata(format!(
            "cmake {} is too old; {}.{}.{} or newer is required for the file API documents we use",
            version, MIN_CMAKE_VERSION.0, MIN_CMAKE_VERSION.1, MIN_CMAKE_VERSION.2
        )));
    }

    let responses = doc
        .pointer(&format!("/reply/{}/{}/responses", CLIENT_NAME, QUERY_FILE))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DriverError::Metadata(format!(
                "index document has no responses for {}",
                CLIENT_NAME
            ))
        })?;

    let mut codemodel = None;
    let mut toolchains = None;
    for response in responses {
        let kind = response.get("kind").and_then(Value::as_str);
        let json_file = response.get("jsonFile").and_then(Value::as_str);
        match (kind, json_file) {
            (Some("codemodel"), Some(file)) => codemodel = Some(reply_dir.join(file)),
            (Some("toolchains"), Some(file)) => toolchains = Some(reply_dir.join(file)),
            _ => {}
        }
    }

    let codemodel_path = codemodel.ok_or_else(|| {
        DriverError::Metadata("reply index has no codemodel response".to_string())
    })?;
    let toolchains_path = toolchains.ok_or_else(|| {
        DriverError::Metadata("reply index has no toolchains response".to_string())
    })?;
    for path in [&codemodel_path, &toolchains_path] {
        if !path.is_file() {
            return Err(DriverError::Metadata(format!(
                "referenced response file {} is missing",
                path.display()
            )));
        }
    }

    Ok(ReplyIndex {
        codemodel_path,
        toolchains_path,
        version,
    })
}

/// Lenient numeric comparison of a `major.minor.patch[-suffix]` string.
fn version_at_least(raw: &str, min: (u64, u64, u64)) -> bool {
    let mut parts = raw.split('.').map(|part| {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u64>().unwrap_or(0)
    });
    let version = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    version >= min
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_index(reply_dir: &Path, name: &str, version: &str) -> PathBuf {
        let index = serde_json::json!({
            "cmake": { "version": { "string": version } },
            "reply": {
                (CLIENT_NAME): {
                    (QUERY_FILE): {
                        "responses": [
                            { "kind": "codemodel", "jsonFile": "codemodel-v2-abc.json" },
                            { "kind": "toolchains", "jsonFile": "toolchains-v1-abc.json" },
                        ]
                    }
                }
            }
        });
        let path = reply_dir.join(name);
        fs::write(&path, index.to_string()).expect("write index");
        path
    }

    fn touch(reply_dir: &Path, name: &str) {
        fs::write(reply_dir.join(name), "{}").expect("touch");
    }

    #[test]
    fn query_file_is_written_once() {
        let temp = TempDir::new().expect("temp dir");
        ensure_query(temp.path()).expect("first write");
        let query_path = temp
            .path()
            .join(API_SUBDIR)
            .join("query")
            .join(CLIENT_NAME)
            .join(QUERY_FILE);
        let first = fs::read_to_string(&query_path).expect("query exists");
        assert!(first.contains("codemodel"));
        assert!(first.contains("toolchains"));

        fs::write(&query_path, "customized").expect("overwrite");
        ensure_query(temp.path()).expect("second write");
        assert_eq!(fs::read_to_string(&query_path).unwrap(), "customized");
    }

    #[test]
    fn newest_index_wins_lexicographically() {
        let temp = TempDir::new().expect("temp dir");
        touch(temp.path(), "index-2024-01-01T00-00-00-0000.json");
        touch(temp.path(), "index-2024-06-01T00-00-00-0000.json");
        touch(temp.path(), "index-2024-03-01T00-00-00-0000.json");
        touch(temp.path(), "codemodel-v2-abc.json");

        let newest = find_reply_index(temp.path()).expect("index found");
        assert!(
            newest
                .file_name()
                .unwrap()
                .to_string_lossy()
                .contains("2024-06-01")
        );
    }

    #[test]
    fn missing_index_is_an_error() {
        let temp = TempDir::new().expect("temp dir");
        touch(temp.path(), "codemodel-v2-abc.json");
        assert!(find_reply_index(temp.path()).is_err());
    }

    #[test]
    fn index_parses_into_reply_paths() {
        let temp = TempDir::new().expect("temp dir");
        let index = write_index(temp.path(), "index-1.json", "3.28.1");
        touch(temp.path(), "codemodel-v2-abc.json");
        touch(temp.path(), "toolchains-v1-abc.json");

        let reply = parse_reply_index(&index, temp.path()).expect("parse");
        assert_eq!(reply.version, "3.28.1");
        assert!(reply.codemodel_path.ends_with("codemodel-v2-abc.json"));
        assert!(reply.toolchains_path.ends_with("toolchains-v1-abc.json"));
    }

    #[test]
    fn old_cmake_is_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let index = write_index(temp.path(), "index-1.json", "3.19.4");
        touch(temp.path(), "codemodel-v2-abc.json");
        touch(temp.path(), "toolchains-v1-abc.json");

        let err = parse_reply_index(&index, temp.path()).unwrap_err();
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn missing_response_file_is_an_error() {
        let temp = TempDir::new().expect("temp dir");
        let index = write_index(temp.path(), "index-1.json", "3.28.1");
        touch(temp.path(), "codemodel-v2-abc.json");
        // toolchains file deliberately absent

        let err = parse_reply_index(&index, temp.path()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn empty_build_dir_is_a_configuration_error() {
        let temp = TempDir::new().expect("temp dir");
        let err = load_build_metadata(temp.path()).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn version_comparison() {
        assert!(version_at_least("3.20.5", MIN_CMAKE_VERSION));
        assert!(version_at_least("3.21.0", MIN_CMAKE_VERSION));
        assert!(version_at_least("4.0.0-rc2", MIN_CMAKE_VERSION));
        assert!(!version_at_least("3.20.4", MIN_CMAKE_VERSION));
        assert!(!version_at_least("3.19.8", MIN_CMAKE_VERSION));
    }
}
