//! Row-by-row execution with a configurable failure policy.

use std::fmt;

use tracing::{error, info, warn};
use vblend_merge::{run_blend, BlendObserver, CheckpointStore};

use crate::{request_from_row, CliInvocation, Result, Table, TableRow};

/// What happened to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    /// The row's job finished.
    Succeeded {
        /// Short description of the result.
        detail: String,
    },
    /// The row's job failed.
    Failed {
        /// Error message.
        error: String,
    },
}

/// Result of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    /// Line number of the row in its table.
    pub line: usize,
    /// Outcome.
    pub status: RowStatus,
}

impl RowOutcome {
    /// Whether the row succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status, RowStatus::Succeeded { .. })
    }
}

/// Outcomes of a batch run, in row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// One entry per row that was attempted.
    pub outcomes: Vec<RowOutcome>,
    /// Rows left unattempted after a fail-fast stop.
    pub skipped: usize,
}

impl BatchReport {
    /// Number of rows that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of rows that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Whether every row was attempted and succeeded.
    pub fn is_success(&self) -> bool {
        self.skipped == 0 && self.failed() == 0
    }

    /// Failed rows only.
    pub fn failures(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded(),
            self.failed()
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// Runs a job per table row.
///
/// By default every row is attempted and failures are collected. With
/// `fail_fast` the run stops at the first failing row.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchRunner {
    fail_fast: bool,
}

impl BatchRunner {
    /// Create a runner that attempts every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop at the first failing row.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Run `job` on every row of `table`.
    pub fn run<F>(&self, table: &Table, mut job: F) -> BatchReport
    where
        F: FnMut(&TableRow) -> Result<String>,
    {
        let mut report = BatchReport::default();
        let total = table.len();

        for (idx, row) in table.rows.iter().enumerate() {
            info!("Row {}/{} (line {})", idx + 1, total, row.line);
            let status = match job(row) {
                Ok(detail) => RowStatus::Succeeded { detail },
                Err(e) => {
                    error!("Line {} failed: {}", row.line, e);
                    RowStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            let failed = matches!(status, RowStatus::Failed { .. });
            report.outcomes.push(RowOutcome {
                line: row.line,
                status,
            });

            if failed && self.fail_fast {
                report.skipped = total - idx - 1;
                if report.skipped > 0 {
                    warn!("Stopping early; {} rows not attempted", report.skipped);
                }
                break;
            }
        }

        info!("Batch finished: {}", report);
        report
    }

    /// Run an external command per row, passing the row's cells as flags.
    pub fn run_cli(&self, invocation: &CliInvocation, table: &Table) -> BatchReport {
        self.run(table, |row| invocation.run(&row.values))
    }

    /// Run one blend per row.
    pub fn run_blends(
        &self,
        table: &Table,
        store: &dyn CheckpointStore,
        observer: &dyn BlendObserver,
    ) -> BatchReport {
        self.run(table, |row| {
            let request = request_from_row(row)?;
            info!(
                "Blending {:?} and {:?} into {:?}",
                request.primary.path, request.secondary.path, request.output_path
            );
            let report = run_blend(&request, store, observer)?;
            Ok(report.provenance)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchError;

    fn table(rows: usize) -> Table {
        Table::from_cells(
            vec!["n".to_string()],
            (0..rows).map(|i| vec![Some(i.to_string())]),
            2,
        )
    }

    fn job(row: &TableRow) -> Result<String> {
        match row.get("n") {
            Some("1") => Err(BatchError::InvalidRow("one is odd".to_string())),
            Some(n) => Ok(format!("did {n}")),
            None => unreachable!(),
        }
    }

    #[test]
    fn test_collects_all_outcomes_by_default() {
        let report = BatchRunner::new().run(&table(4), job);

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped, 0);
        assert!(!report.is_success());

        let failure: Vec<_> = report.failures().collect();
        assert_eq!(failure[0].line, 3);
        assert_eq!(report.to_string(), "3 succeeded, 1 failed");
    }

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let mut attempted = Vec::new();
        let report = BatchRunner::new().fail_fast(true).run(&table(4), |row| {
            attempted.push(row.line);
            job(row)
        });

        assert_eq!(attempted, vec![2, 3]);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.to_string(), "1 succeeded, 1 failed, 2 skipped");
    }

    #[test]
    fn test_all_succeed() {
        let report = BatchRunner::new()
            .fail_fast(true)
            .run(&table(1), job);
        assert!(report.is_success());
        assert_eq!(
            report.outcomes[0].status,
            RowStatus::Succeeded {
                detail: "did 0".to_string()
            }
        );
    }
}
