//! Bounded worker pool for stage units
//!
//! Every unit runs as its own task behind a semaphore permit. A unit that
//! errors or panics is converted into an outcome at the unit boundary; it never
//! takes down the pool or its siblings, and `run` returns only after every
//! dispatched unit has reported.

use crate::crawler::coordinator::Stage;
use crate::{FailureKind, HarvestError};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

/// A unit of work dispatched to the pool
pub trait WorkUnit: Send + 'static {
    /// Identity used in logs, reports and unit file names
    fn label(&self) -> String;
}

/// How a unit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Finished; `records` were gathered (0 is a valid success)
    Completed { records: usize },

    /// The unit's first page could not be fetched
    Failed { reason: String },

    /// Any other error or a panic inside the handler
    Skipped { reason: String },
}

impl UnitOutcome {
    fn from_error(err: &HarvestError) -> Self {
        match err.kind() {
            FailureKind::Fetch => Self::Failed {
                reason: err.to_string(),
            },
            _ => Self::Skipped {
                reason: err.to_string(),
            },
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { records } => write!(f, "completed ({} records)", records),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Outcome of one unit
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: String,
    pub outcome: UnitOutcome,
}

/// Outcomes of every unit of a stage, in completion order
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub reports: Vec<UnitReport>,
}

impl StageReport {
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            reports: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped { .. }))
    }

    /// Records gathered across completed units
    pub fn records(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match r.outcome {
                UnitOutcome::Completed { records } => records,
                _ => 0,
            })
            .sum()
    }

    /// Labels of every dispatched unit
    pub fn unit_labels(&self) -> Vec<String> {
        self.reports.iter().map(|r| r.unit.clone()).collect()
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Executes the units of one stage with bounded concurrency
pub struct WorkerPool {
    stage: Stage,
    size: usize,
}

impl WorkerPool {
    pub fn new(stage: Stage, size: usize) -> Self {
        Self {
            stage,
            size: size.max(1),
        }
    }

    /// Runs `handler` over every unit and collects one report per unit
    ///
    /// The handler returns the number of records it gathered.
    pub async fn run<U, H, Fut>(&self, units: Vec<U>, handler: H) -> StageReport
    where
        U: WorkUnit,
        H: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<usize, HarvestError>> + Send + 'static,
    {
        let stage = self.stage;
        info!(%stage, units = units.len(), workers = self.size, "Dispatching stage");

        let semaphore = Arc::new(Semaphore::new(self.size));
        let handler = Arc::new(handler);
        let mut tasks = JoinSet::new();

        for unit in units {
            let label = unit.label();
            let span = info_span!("unit", %stage, unit = %label);
            let semaphore = Arc::clone(&semaphore);
            let handler = Arc::clone(&handler);

            tasks.spawn(
                async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return UnitReport {
                                unit: label,
                                outcome: UnitOutcome::Skipped {
                                    reason: "worker pool closed".to_string(),
                                },
                            }
                        }
                    };

                    let result = AssertUnwindSafe(async move { handler(unit).await })
                        .catch_unwind()
                        .await;

                    let outcome = match result {
                        Ok(Ok(records)) => {
                            info!(records, "Unit completed");
                            UnitOutcome::Completed { records }
                        }
                        Ok(Err(err)) => {
                            warn!(error = %err, "Unit did not complete");
                            UnitOutcome::from_error(&err)
                        }
                        Err(panic) => {
                            let reason = panic_message(panic.as_ref());
                            error!(reason = %reason, "Unit panicked");
                            UnitOutcome::Skipped {
                                reason: format!("panic: {}", reason),
                            }
                        }
                    };

                    UnitReport {
                        unit: label,
                        outcome,
                    }
                }
                .instrument(span),
            );
        }

        let mut report = StageReport::empty(stage);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(unit_report) => report.reports.push(unit_report),
                Err(err) => {
                    // Unreachable in practice: panics are caught inside the task
                    error!(%stage, error = %err, "Worker task aborted");
                    report.reports.push(UnitReport {
                        unit: "<unknown>".to_string(),
                        outcome: UnitOutcome::Skipped {
                            reason: err.to_string(),
                        },
                    });
                }
            }
        }

        info!(
            %stage,
            completed = report.completed(),
            failed = report.failed(),
            skipped = report.skipped(),
            records = report.records(),
            "Stage drained"
        );
        report
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
