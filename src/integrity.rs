//! Post-run referential integrity check
//!
//! Entity tables reference each other by natural key without foreign-key constraints, so a
//! partial import can leave dangling references behind. After a successful run the
//! [`IntegrityChecker`] runs three independent, read-only scans in parallel and reports
//! what it found. A failed check never rolls anything back and never fails the run.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one scan
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceScan {
    /// Rows inspected
    pub total_checked: u64,
    /// One message per dangling reference
    pub problems: Vec<String>,
}

/// Read-only queries backing the integrity checks
#[async_trait]
pub trait IntegrityQueries: Send + Sync {
    /// Game statistics whose player or game does not exist
    async fn participation_reference_scan(&self) -> Result<ReferenceScan>;

    /// Tournament history rows whose player or tournament does not exist
    async fn tournament_history_reference_scan(&self) -> Result<ReferenceScan>;

    /// Games, judges and links whose parent row does not exist
    async fn orphan_scan(&self) -> Result<ReferenceScan>;
}

/// Overall verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityStatus {
    /// Every check passed
    Pass,
    /// At least one check failed
    Fail,
}

/// Result of one named check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether nothing was found
    pub passed: bool,
    /// Rows inspected
    pub total_checked: u64,
    /// Problems found, or the query error if the scan could not run
    pub errors: Vec<String>,
}

/// Aggregate integrity report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// PASS only if every check passed
    pub status: IntegrityStatus,
    /// Same as `status == Pass`
    pub passed: bool,
    /// Per-check results
    pub checks: Vec<CheckResult>,
    /// Names of the checks that failed
    pub failed_checks: Vec<String>,
    /// One-line description
    pub summary: String,
    /// Every problem found, prefixed with its check name
    pub issues: Vec<String>,
}

const PARTICIPATION_CHECK: &str = "game_statistic_references";
const TOURNAMENT_HISTORY_CHECK: &str = "tournament_history_references";
const ORPHAN_CHECK: &str = "orphaned_records";

/// Runs the integrity scans
pub struct IntegrityChecker {
    queries: Arc<dyn IntegrityQueries>,
}

impl IntegrityChecker {
    /// Create a checker over a store
    pub fn new(queries: Arc<dyn IntegrityQueries>) -> Self {
        Self { queries }
    }

    /// Run every check in parallel
    ///
    /// Never fails: a scan whose query errors is reported as a failed check.
    pub async fn check_all(&self) -> IntegrityReport {
        let (participation, history, orphans) = tokio::join!(
            self.queries.participation_reference_scan(),
            self.queries.tournament_history_reference_scan(),
            self.queries.orphan_scan(),
        );

        let checks = vec![
            to_check(PARTICIPATION_CHECK, participation),
            to_check(TOURNAMENT_HISTORY_CHECK, history),
            to_check(ORPHAN_CHECK, orphans),
        ];
        let report = build_report(checks);

        if report.passed {
            tracing::info!(summary = %report.summary, "Integrity check passed");
        } else {
            tracing::warn!(
                failed_checks = ?report.failed_checks,
                issues = report.issues.len(),
                "Integrity check failed"
            );
        }
        report
    }
}

fn to_check(name: &str, scan: Result<ReferenceScan>) -> CheckResult {
    match scan {
        Ok(scan) => CheckResult {
            name: name.to_string(),
            passed: scan.problems.is_empty(),
            total_checked: scan.total_checked,
            errors: scan.problems,
        },
        Err(e) => {
            tracing::error!(check = name, error = %e, "Integrity query failed");
            CheckResult {
                name: name.to_string(),
                passed: false,
                total_checked: 0,
                errors: vec![format!("query failed: {e}")],
            }
        }
    }
}

fn build_report(checks: Vec<CheckResult>) -> IntegrityReport {
    let failed_checks: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name.clone())
        .collect();
    let issues: Vec<String> = checks
        .iter()
        .flat_map(|c| c.errors.iter().map(move |e| format!("{}: {e}", c.name)))
        .collect();
    let passed = failed_checks.is_empty();
    let total_checked: u64 = checks.iter().map(|c| c.total_checked).sum();
    let summary = if passed {
        format!("{} checks passed ({total_checked} rows checked)", checks.len())
    } else {
        format!(
            "{} of {} checks failed with {} issues",
            failed_checks.len(),
            checks.len(),
            issues.len()
        )
    };

    IntegrityReport {
        status: if passed {
            IntegrityStatus::Pass
        } else {
            IntegrityStatus::Fail
        },
        passed,
        checks,
        failed_checks,
        summary,
        issues,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct FixedScans {
        orphans: Vec<String>,
        fail_history: bool,
    }

    #[async_trait]
    impl IntegrityQueries for FixedScans {
        async fn participation_reference_scan(&self) -> Result<ReferenceScan> {
            Ok(ReferenceScan {
                total_checked: 10,
                problems: vec![],
            })
        }

        async fn tournament_history_reference_scan(&self) -> Result<ReferenceScan> {
            if self.fail_history {
                return Err(Error::Other("database is locked".into()));
            }
            Ok(ReferenceScan {
                total_checked: 4,
                problems: vec![],
            })
        }

        async fn orphan_scan(&self) -> Result<ReferenceScan> {
            Ok(ReferenceScan {
                total_checked: 6,
                problems: self.orphans.clone(),
            })
        }
    }

    #[tokio::test]
    async fn clean_store_passes() {
        let checker = IntegrityChecker::new(Arc::new(FixedScans {
            orphans: vec![],
            fail_history: false,
        }));

        let report = checker.check_all().await;
        assert_eq!(report.status, IntegrityStatus::Pass);
        assert!(report.passed);
        assert_eq!(report.checks.len(), 3);
        assert!(report.failed_checks.is_empty());
        assert_eq!(report.summary, "3 checks passed (20 rows checked)");
    }

    #[tokio::test]
    async fn any_problem_fails_the_report() {
        let checker = IntegrityChecker::new(Arc::new(FixedScans {
            orphans: vec!["game g-7 references missing tournament t-9".into()],
            fail_history: false,
        }));

        let report = checker.check_all().await;
        assert_eq!(report.status, IntegrityStatus::Fail);
        assert_eq!(report.failed_checks, vec![ORPHAN_CHECK.to_string()]);
        assert_eq!(
            report.issues,
            vec!["orphaned_records: game g-7 references missing tournament t-9".to_string()]
        );
    }

    #[tokio::test]
    async fn query_error_becomes_failed_check() {
        let checker = IntegrityChecker::new(Arc::new(FixedScans {
            orphans: vec![],
            fail_history: true,
        }));

        let report = checker.check_all().await;
        assert!(!report.passed);
        let history = report
            .checks
            .iter()
            .find(|c| c.name == TOURNAMENT_HISTORY_CHECK)
            .unwrap();
        assert!(!history.passed);
        assert!(history.errors[0].contains("database is locked"));
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&IntegrityStatus::Fail).unwrap(),
            "\"FAIL\""
        );
    }
}
