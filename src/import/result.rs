//! Job-level aggregate of row outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-batch counts and messages, merged into the job result in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BatchTally {
    pub fn rows(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }
}

/// Final outcome of one import job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub job_id: String,
    pub entity_type: String,
    pub file_name: String,
    pub imported_at: DateTime<Utc>,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub processed: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info_messages: Vec<String>,
    pub elapsed_millis: u64,
    pub success_rate: f64,
}

impl ImportResult {
    pub fn new(job_id: &str, entity_type: &str, file_name: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            entity_type: entity_type.to_string(),
            file_name: file_name.to_string(),
            imported_at: Utc::now(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            processed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            info_messages: Vec::new(),
            elapsed_millis: 0,
            success_rate: 0.0,
        }
    }

    /// Appends a batch. Counts add up, messages keep their order.
    pub fn merge(&mut self, tally: BatchTally) {
        self.succeeded += tally.succeeded;
        self.failed += tally.failed;
        self.skipped += tally.skipped;
        self.errors.extend(tally.errors);
        self.warnings.extend(tally.warnings);
    }

    /// Computes the derived fields once the job is over.
    pub fn finalize(&mut self, elapsed_millis: u64) {
        self.elapsed_millis = elapsed_millis;
        self.processed = self.succeeded + self.failed + self.skipped;
        self.success_rate = if self.processed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.processed as f64 * 100.0
        };
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0 || !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// One-line human summary, e.g. `"8 imported, 1 failed, 1 skipped (80.0% success) in 12 ms"`.
    pub fn summary(&self) -> String {
        format!(
            "{} imported, {} failed, {} skipped ({:.1}% success) in {} ms",
            self.succeeded, self.failed, self.skipped, self.success_rate, self.elapsed_millis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(succeeded: u64, failed: u64, skipped: u64, error: Option<&str>) -> BatchTally {
        BatchTally {
            succeeded,
            failed,
            skipped,
            errors: error.map(|e| vec![e.to_string()]).unwrap_or_default(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_merge_and_finalize() {
        let mut result = ImportResult::new("job-1", "producto", "p.csv");
        result.merge(tally(8, 1, 0, Some("Row 3: bad")));
        result.merge(tally(0, 0, 1, None));
        result.finalize(12);

        assert_eq!(result.processed, 10);
        assert_eq!(result.success_rate, 80.0);
        assert_eq!(result.errors, vec!["Row 3: bad"]);
        assert!(result.has_errors());
        assert!(!result.has_warnings());
        assert_eq!(
            result.summary(),
            "8 imported, 1 failed, 1 skipped (80.0% success) in 12 ms"
        );
    }

    #[test]
    fn test_empty_result_has_zero_rate() {
        let mut result = ImportResult::new("job-1", "cliente", "c.csv");
        result.finalize(0);
        assert_eq!(result.success_rate, 0.0);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut result = ImportResult::new("job-1", "cliente", "c.csv");
        result.finalize(5);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["entityType"], "cliente");
        assert_eq!(json["elapsedMillis"], 5);
        assert!(json["infoMessages"].as_array().unwrap().is_empty());
    }
}
