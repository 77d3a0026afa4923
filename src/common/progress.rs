//! Transfer outcomes, progress events, and aggregate summaries.

use std::time::Duration;

/// Progress of a multi-batch operation. `completed` only ever grows; the
/// worker pool increments an atomic counter before invoking the callback.
#[derive(Clone, Copy, Debug)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub batch_id: usize,
    pub success: bool,
}

/// Byte-level progress of a streamed transfer. `total` is absent when the
/// server omits Content-Length (indeterminate progress).
#[derive(Clone, Copy, Debug)]
pub struct ByteProgress {
    pub received: u64,
    pub total: Option<u64>,
}

/// Result of one batch transfer attempt. Immutable once produced.
#[derive(Clone, Debug)]
pub struct TransferOutcome {
    pub batch_id: usize,
    pub success: bool,
    pub duration: Duration,
    pub file_count: usize,
    pub archive_bytes: u64,
    pub error: Option<String>,
}

/// Aggregate result of a transfer operation, merged from outcomes in
/// completion order. The merge is order-independent.
#[derive(Clone, Debug, Default)]
pub struct OperationSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
    pub total_files: usize,
    pub total_bytes: u64,
    pub errors: Vec<String>,
}

impl OperationSummary {
    pub fn record(&mut self, outcome: &TransferOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            let detail = outcome.error.as_deref().unwrap_or("unknown error");
            self.errors.push(format!("batch {}: {detail}", outcome.batch_id));
        }
        self.total_files += outcome.file_count;
        self.total_bytes += outcome.archive_bytes;
    }

    /// An operation failed overall only when the failed count is nonzero.
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    pub fn throughput_mb_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.total_bytes as f64 / (1024.0 * 1024.0)) / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(batch_id: usize, success: bool) -> TransferOutcome {
        TransferOutcome {
            batch_id,
            success,
            duration: Duration::from_secs(1),
            file_count: 10,
            archive_bytes: 1024,
            error: if success {
                None
            } else {
                Some("HTTP 500".to_string())
            },
        }
    }

    #[test]
    fn summary_merge_is_order_independent() {
        let outcomes = [outcome(1, true), outcome(2, false), outcome(3, true)];

        let mut forward = OperationSummary {
            total: 3,
            ..Default::default()
        };
        for o in &outcomes {
            forward.record(o);
        }

        let mut reverse = OperationSummary {
            total: 3,
            ..Default::default()
        };
        for o in outcomes.iter().rev() {
            reverse.record(o);
        }

        assert_eq!(forward.succeeded, reverse.succeeded);
        assert_eq!(forward.failed, reverse.failed);
        assert_eq!(forward.total_files, reverse.total_files);
        assert!(!forward.success());
    }

    #[test]
    fn partial_failure_is_itemized() {
        let mut summary = OperationSummary {
            total: 2,
            ..Default::default()
        };
        summary.record(&outcome(1, true));
        summary.record(&outcome(2, false));

        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("batch 2"));
    }
}
