//! Regression guard for identifier typing inside archives.
//!
//! Inspects archive JSON before decoding, so a bare 24-hex string where a
//! `{"$oid": ...}` belongs is visible as such. Only `_id` and `...Id` fields
//! are inspected; other fields may legitimately hold hex strings.

use crate::archive::codec::{is_hex_oid, is_identifier_field, is_tagged_oid};
use crate::archive::{read_raw_archive, RawArchive};
use crate::utils::errors::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldStatus {
    /// `{"$oid": "<24 hex>"}`
    Tagged,
    /// Bare 24-hex string: identifier type was lost
    PlainString,
    /// Missing or null
    Absent,
    /// Some other value, e.g. an external payment reference
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFinding {
    pub collection: String,
    /// Dotted path inside the first document, e.g. `reviews.0.reviewerId`
    pub field: String,
    pub status: FieldStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub archive: String,
    pub collections_checked: usize,
    pub properly_typed_count: usize,
    pub regression_count: usize,
    pub absent_count: usize,
    pub findings: Vec<FieldFinding>,
    pub verdict: Verdict,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Verify the archive at `path`. An empty `sample` checks every non-empty
/// collection.
pub async fn verify_archive(path: &Path, sample: &[String]) -> Result<VerificationReport> {
    let raw = read_raw_archive(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let report = verify_raw(&name, &raw, sample);
    if report.passed() {
        info!(
            archive = %report.archive,
            checked = report.collections_checked,
            typed = report.properly_typed_count,
            "Archive verification passed"
        );
    } else {
        warn!(
            archive = %report.archive,
            checked = report.collections_checked,
            typed = report.properly_typed_count,
            regressions = report.regression_count,
            "Archive verification failed"
        );
    }
    Ok(report)
}

pub fn verify_raw(archive: &str, raw: &RawArchive, sample: &[String]) -> VerificationReport {
    let collections: Vec<String> = if sample.is_empty() {
        raw.data
            .iter()
            .filter(|(_, docs)| docs.as_array().is_some_and(|d| !d.is_empty()))
            .map(|(name, _)| name.clone())
            .collect()
    } else {
        sample.to_vec()
    };

    let mut findings = Vec::new();
    let mut collections_checked = 0;
    for collection in &collections {
        let first = raw
            .data
            .get(collection)
            .and_then(Value::as_array)
            .and_then(|docs| docs.first())
            .and_then(Value::as_object);

        let Some(first) = first else {
            findings.push(FieldFinding {
                collection: collection.clone(),
                field: "_id".into(),
                status: FieldStatus::Absent,
            });
            continue;
        };

        collections_checked += 1;
        if !first.contains_key("_id") {
            findings.push(FieldFinding {
                collection: collection.clone(),
                field: "_id".into(),
                status: FieldStatus::Absent,
            });
        }
        inspect_object(collection, "", first, &mut findings);
    }

    let count = |status| findings.iter().filter(|f| f.status == status).count();
    let properly_typed_count = count(FieldStatus::Tagged);
    let regression_count = count(FieldStatus::PlainString);
    let absent_count = count(FieldStatus::Absent);

    let verdict = if regression_count == 0 && properly_typed_count > 0 {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    VerificationReport {
        archive: archive.to_string(),
        collections_checked,
        properly_typed_count,
        regression_count,
        absent_count,
        findings,
        verdict,
    }
}

fn inspect_object(
    collection: &str,
    prefix: &str,
    object: &Map<String, Value>,
    findings: &mut Vec<FieldFinding>,
) {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if is_identifier_field(key) {
            match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        findings.push(FieldFinding {
                            collection: collection.to_string(),
                            field: format!("{path}.{i}"),
                            status: classify(item),
                        });
                    }
                }
                other => findings.push(FieldFinding {
                    collection: collection.to_string(),
                    field: path.clone(),
                    status: classify(other),
                }),
            }
            continue;
        }

        inspect_nested(collection, &path, value, findings);
    }
}

fn inspect_nested(collection: &str, path: &str, value: &Value, findings: &mut Vec<FieldFinding>) {
    match value {
        Value::Object(map) if !is_wrapper(map) => inspect_object(collection, path, map, findings),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                inspect_nested(collection, &format!("{path}.{i}"), item, findings);
            }
        }
        _ => {}
    }
}

fn is_wrapper(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn classify(value: &Value) -> FieldStatus {
    match value {
        Value::Null => FieldStatus::Absent,
        v if is_tagged_oid(v) => FieldStatus::Tagged,
        Value::String(s) if is_hex_oid(s) => FieldStatus::PlainString,
        _ => FieldStatus::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveMetadata;
    use chrono::Utc;
    use serde_json::json;

    fn raw(data: Value) -> RawArchive {
        let Value::Object(data) = data else { panic!("data must be an object") };
        RawArchive {
            metadata: ArchiveMetadata::new("marketplace", Utc::now(), data.len()),
            data,
        }
    }

    #[test]
    fn test_tagged_archive_passes() {
        let archive = raw(json!({
            "users": [{ "_id": { "$oid": "65f1c0ffee0000000000a001" }, "name": "Alice" }],
            "ads": [{
                "_id": { "$oid": "65f1c0ffee0000000000b001" },
                "userId": { "$oid": "65f1c0ffee0000000000a001" },
                "paymentId": "pi_3Nx2",
                "reviews": [{ "reviewerId": { "$oid": "65f1c0ffee0000000000a002" } }],
            }],
            "tours": [],
        }));

        let report = verify_raw("a.json.gz", &archive, &[]);

        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.collections_checked, 2);
        assert_eq!(report.properly_typed_count, 4);
        assert_eq!(report.regression_count, 0);
        assert!(report
            .findings
            .iter()
            .any(|f| f.field == "reviews.0.reviewerId" && f.status == FieldStatus::Tagged));
        assert!(report
            .findings
            .iter()
            .any(|f| f.field == "paymentId" && f.status == FieldStatus::Other));
    }

    #[test]
    fn test_bare_string_id_fails() {
        let archive = raw(json!({
            "users": [{ "_id": "65f1c0ffee0000000000a001", "name": "Alice" }],
        }));

        let report = verify_raw("a.json.gz", &archive, &[]);

        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.regression_count > 0);
        assert_eq!(report.findings[0].status, FieldStatus::PlainString);
    }

    #[test]
    fn test_bare_string_foreign_reference_fails() {
        let archive = raw(json!({
            "orders": [{
                "_id": { "$oid": "65f1c0ffee0000000000c001" },
                "userId": "65f1c0ffee0000000000a001",
            }],
        }));

        let report = verify_raw("a.json.gz", &archive, &[]);

        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.properly_typed_count, 1);
        assert_eq!(report.regression_count, 1);
    }

    #[test]
    fn test_explicit_sample_reports_missing_collection() {
        let archive = raw(json!({
            "users": [{ "_id": { "$oid": "65f1c0ffee0000000000a001" } }],
        }));
        let sample = vec!["users".to_string(), "orders".to_string()];

        let report = verify_raw("a.json.gz", &archive, &sample);

        assert_eq!(report.collections_checked, 1);
        assert_eq!(report.absent_count, 1);
        assert_eq!(report.verdict, Verdict::Pass);
    }

    #[test]
    fn test_archive_without_identifiers_fails() {
        let archive = raw(json!({ "settings": [{ "theme": "dark" }] }));

        let report = verify_raw("a.json.gz", &archive, &[]);

        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.absent_count, 1);
    }
}
