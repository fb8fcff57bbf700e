//! SARIF report merging.
//!
//! Every analysis invocation leaves one SARIF log behind; this module folds
//! them into a single report. Identical findings are collapsed (first
//! occurrence wins, whole-run scope), while malformed findings abort the
//! merge: silently dropping a diagnostic would defeat the point of running
//! analysis at all.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::error::{DriverError, Result};

pub const SARIF_VERSION: &str = "2.1.0";
const SARIF_SCHEMA: &str = "https://json.schemastore.org/sarif-2.1.0.json";

/// Identity of one finding: (uri, ruleId, line, column, message)
type FindingKey = (String, String, u64, u64, String);

/// One merged, deduplicated report
#[derive(Debug, Clone)]
pub struct MergedReport {
    /// Tool metadata from the first input run that supplied one
    pub tool: Option<Value>,
    /// Deduplicated findings in encounter order
    pub results: Vec<Value>,
}

/// Merge SARIF logs into one report, deduplicating identical findings.
pub fn merge_reports(paths: &[PathBuf]) -> Result<MergedReport> {
    let mut tool: Option<Value> = None;
    let mut seen: HashSet<FindingKey> = HashSet::new();
    let mut results: Vec<Value> = Vec::new();

    for path in paths {
        let raw = fs::read_to_string(path).map_err(|e| {
            DriverError::Aggregation(format!(
                "cannot read diagnostic log {}: {}",
                path.display(),
                e
            ))
        })?;
        let doc: Value = serde_json::from_str(&raw).map_err(|e| {
            DriverError::Aggregation(format!(
                "malformed diagnostic log {}: {}",
                path.display(),
                e
            ))
        })?;
        let runs = doc.get("runs").and_then(Value::as_array).ok_or_else(|| {
            DriverError::Aggregation(format!(
                "diagnostic log {} has no runs",
                path.display()
            ))
        })?;

        for run in runs {
            if tool.is_none() {
                if let Some(t) = run.get("tool") {
                    if !t.is_null() {
                        tool = Some(t.clone());
                    }
                }
            }
            let Some(run_results) = run.get("results").and_then(Value::as_array) else {
                continue;
            };
            for result in run_results {
                let key = finding_key(result)?;
                if seen.insert(key) {
                    results.push(result.clone());
                }
            }
        }
    }

    Ok(MergedReport { tool, results })
}

/// Serialize the merged report as a single-run SARIF document.
pub fn write_report(report: &MergedReport, output_path: &Path) -> Result<()> {
    let tool = report.tool.clone().unwrap_or_else(default_tool);
    let doc = json!({
        "$schema": SARIF_SCHEMA,
        "version": SARIF_VERSION,
        "runs": [{
            "tool": tool,
            "results": report.results,
        }]
    });
    let serialized = serde_json::to_string_pretty(&doc)
        .map_err(|e| DriverError::Aggregation(format!("cannot serialize report: {}", e)))?;
    fs::write(output_path, serialized).map_err(|e| {
        DriverError::Aggregation(format!(
            "cannot write report {}: {}",
            output_path.display(),
            e
        ))
    })
}

/// Validate one finding and extract its identity tuple.
///
/// A finding must carry a ruleId, message text, and a fully resolved
/// location; anything less is a fatal input error naming the offender.
fn finding_key(result: &Value) -> Result<FindingKey> {
    let rule_id = result
        .get("ruleId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DriverError::Aggregation(format!("finding without a ruleId: {}", preview(result)))
        })?;
    let message = result
        .pointer("/message/text")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DriverError::Aggregation(format!("finding '{}' has no message text", rule_id))
        })?;
    let location = result
        .pointer("/locations/0/physicalLocation")
        .ok_or_else(|| {
            DriverError::Aggregation(format!(
                "finding '{}' ('{}') has no physical location",
                rule_id, message
            ))
        })?;
    let uri = location
        .pointer("/artifactLocation/uri")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DriverError::Aggregation(format!(
                "finding '{}' ('{}') has no artifact uri",
                rule_id, message
            ))
        })?;
    let line = location
        .pointer("/region/startLine")
        .and_then(Value::as_u64)
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            DriverError::Aggregation(format!(
                "finding '{}' ('{}') has no start line",
                rule_id, message
            ))
        })?;
    let column = location
        .pointer("/region/startColumn")
        .and_then(Value::as_u64)
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            DriverError::Aggregation(format!(
                "finding '{}' ('{}') has no start column",
                rule_id, message
            ))
        })?;

    Ok((
        uri.to_string(),
        rule_id.to_string(),
        line,
        column,
        message.to_string(),
    ))
}

fn preview(result: &Value) -> String {
    let text = result.to_string();
    if text.chars().count() > 120 {
        let mut short: String = text.chars().take(117).collect();
        short.push_str("...");
        short
    } else {
        text
    }
}

fn default_tool() -> Value {
    json!({
        "driver": {
            "name": "vcanalyze",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn finding(rule: &str, message: &str, uri: &str, line: u64, column: u64) -> Value {
        json!({
            "ruleId": rule,
            "level": "warning",
            "message": { "text": message },
            "locations": [{
                "physicalLocation": {
                    "artifactLocation": { "uri": uri },
                    "region": { "startLine": line, "startColumn": column }
                }
            }]
        })
    }

    fn write_log(dir: &Path, name: &str, tool: Option<Value>, results: Vec<Value>) -> PathBuf {
        let run = match tool {
            Some(tool) => json!({ "tool": tool, "results": results }),
            None => json!({ "results": results }),
        };
        let doc = json!({ "version": SARIF_VERSION, "runs": [run] });
        let path = dir.join(name);
        fs::write(&path, doc.to_string()).expect("write log");
        path
    }

    fn msvc_tool() -> Value {
        json!({ "driver": { "name": "PREfast", "version": "19.38" } })
    }

    #[test]
    fn identical_findings_collapse_across_reports() {
        let temp = TempDir::new().expect("temp dir");
        let shared = finding("C6011", "Dereferencing NULL pointer 'p'", "src/a.cpp", 10, 5);
        let a = write_log(
            temp.path(),
            "a.sarif",
            Some(msvc_tool()),
            vec![shared.clone(), finding("C6387", "Invalid parameter", "src/a.cpp", 20, 1)],
        );
        let b = write_log(
            temp.path(),
            "b.sarif",
            Some(msvc_tool()),
            vec![shared.clone(), finding("C26451", "Arithmetic overflow", "src/b.cpp", 3, 9)],
        );

        let merged = merge_reports(&[a, b]).expect("merge");
        assert_eq!(merged.results.len(), 3);
        assert_eq!(merged.results[0], shared);
    }

    #[test]
    fn near_duplicates_are_kept() {
        let temp = TempDir::new().expect("temp dir");
        let log = write_log(
            temp.path(),
            "a.sarif",
            None,
            vec![
                finding("C6011", "msg", "src/a.cpp", 10, 5),
                finding("C6011", "msg", "src/a.cpp", 10, 6),
                finding("C6011", "msg", "src/b.cpp", 10, 5),
                finding("C6011", "other msg", "src/a.cpp", 10, 5),
            ],
        );
        let merged = merge_reports(&[log]).expect("merge");
        assert_eq!(merged.results.len(), 4);
    }

    #[test]
    fn first_tool_block_wins() {
        let temp = TempDir::new().expect("temp dir");
        let a = write_log(temp.path(), "a.sarif", None, vec![]);
        let b = write_log(temp.path(), "b.sarif", Some(msvc_tool()), vec![]);
        let c = write_log(
            temp.path(),
            "c.sarif",
            Some(json!({ "driver": { "name": "other" } })),
            vec![],
        );

        let merged = merge_reports(&[a, b, c]).expect("merge");
        assert_eq!(merged.tool, Some(msvc_tool()));
    }

    #[test]
    fn missing_rule_id_aborts_the_merge() {
        let temp = TempDir::new().expect("temp dir");
        let mut bad = finding("C6011", "msg", "src/a.cpp", 1, 1);
        bad.as_object_mut().unwrap().remove("ruleId");
        let log = write_log(temp.path(), "a.sarif", None, vec![bad]);
        let err = merge_reports(&[log]).unwrap_err();
        assert!(err.to_string().contains("ruleId"));
    }

    #[test]
    fn missing_message_names_the_rule() {
        let temp = TempDir::new().expect("temp dir");
        let mut bad = finding("C6011", "msg", "src/a.cpp", 1, 1);
        bad.as_object_mut().unwrap().remove("message");
        let log = write_log(temp.path(), "a.sarif", None, vec![bad]);
        let err = merge_reports(&[log]).unwrap_err();
        assert!(err.to_string().contains("C6011"));
    }

    #[test]
    fn missing_location_fields_abort_the_merge() {
        let temp = TempDir::new().expect("temp dir");
        for pointer in ["/locations", "/locations/0/physicalLocation/region/startColumn"] {
            let mut bad = finding("C6011", "msg", "src/a.cpp", 1, 1);
            if pointer == "/locations" {
                bad.as_object_mut().unwrap().remove("locations");
            } else {
                bad.pointer_mut("/locations/0/physicalLocation/region")
                    .unwrap()
                    .as_object_mut()
                    .unwrap()
                    .remove("startColumn");
            }
            let log = write_log(temp.path(), "bad.sarif", None, vec![bad]);
            let err = merge_reports(&[log]).unwrap_err();
            assert!(matches!(err, DriverError::Aggregation(_)));
        }
    }

    #[test]
    fn malformed_log_aborts_before_any_output() {
        let temp = TempDir::new().expect("temp dir");
        let good = write_log(
            temp.path(),
            "good.sarif",
            None,
            vec![finding("C6011", "msg", "src/a.cpp", 1, 1)],
        );
        let bad = temp.path().join("bad.sarif");
        fs::write(&bad, "not json").expect("write");

        assert!(merge_reports(&[good, bad]).is_err());
    }

    #[test]
    fn unreadable_log_is_an_error() {
        let missing = PathBuf::from("/nonexistent/log.sarif");
        assert!(merge_reports(&[missing]).is_err());
    }

    #[test]
    fn written_report_round_trips() {
        let temp = TempDir::new().expect("temp dir");
        let log = write_log(
            temp.path(),
            "a.sarif",
            Some(msvc_tool()),
            vec![
                finding("C6011", "first", "src/a.cpp", 1, 1),
                finding("C6387", "second", "src/b.cpp", 2, 2),
            ],
        );
        let merged = merge_reports(&[log]).expect("merge");

        let out = temp.path().join("analysis.sarif");
        write_report(&merged, &out).expect("write");

        let reparsed = merge_reports(&[out]).expect("reparse");
        assert_eq!(reparsed.tool, merged.tool);
        assert_eq!(reparsed.results, merged.results);
    }

    #[test]
    fn empty_merge_writes_a_valid_report() {
        let temp = TempDir::new().expect("temp dir");
        let merged = merge_reports(&[]).expect("merge");
        assert!(merged.results.is_empty());

        let out = temp.path().join("analysis.sarif");
        write_report(&merged, &out).expect("write");
        let doc: Value =
            serde_json::from_str(&fs::read_to_string(&out).expect("read")).expect("json");
        assert_eq!(doc["version"], SARIF_VERSION);
        assert_eq!(doc["runs"][0]["tool"]["driver"]["name"], "vcanalyze");
    }

    #[test]
    fn write_failure_is_fatal() {
        let merged = MergedReport {
            tool: None,
            results: vec![],
        };
        let err = write_report(&merged, Path::new("/nonexistent/dir/out.sarif")).unwrap_err();
        assert!(matches!(err, DriverError::Aggregation(_)));
    }
}
