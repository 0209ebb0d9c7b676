use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use sleuth_core::mutation::ApprovalAuditRecord;

use crate::ApprovalError;

/// Append one decision record to `approvals.jsonl`, creating parents as
/// needed. One JSON object per line, flushed before returning.
pub fn append_audit_record(path: &Path, record: &ApprovalAuditRecord) -> Result<(), ApprovalError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, record).map_err(|err| ApprovalError::Serde(err.to_string()))?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

/// Read every decision record, skipping malformed lines with a warning.
pub fn read_audit_records(path: &Path) -> Result<Vec<ApprovalAuditRecord>, ApprovalError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ApprovalAuditRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping malformed audit line");
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sleuth_core::mutation::{DecisionChannel, RiskLevel};

    fn record(mutation_id: &str, approved: bool) -> ApprovalAuditRecord {
        ApprovalAuditRecord {
            timestamp: Utc::now(),
            mutation_id: mutation_id.into(),
            operation: "restart-service".into(),
            resource: "payments-api".into(),
            risk_level: RiskLevel::High,
            approved,
            approved_by: approved.then(|| "operator".to_string()),
            decided_via: DecisionChannel::Interactive,
        }
    }

    #[test]
    fn appends_one_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/approvals.jsonl");

        append_audit_record(&path, &record("m1", true)).unwrap();
        append_audit_record(&path, &record("m2", false)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);

        let records = read_audit_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].approved);
        assert!(!records[1].approved);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.jsonl");

        append_audit_record(&path, &record("m1", true)).unwrap();
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        append_audit_record(&path, &record("m2", true)).unwrap();

        let records = read_audit_records(&path).unwrap();
        assert_eq!(records.len(), 2);
    }
}
