use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::models::{CanonicalRecord, RemoteTask};
use crate::sync::index::DestinationIndex;
use crate::sync::normalize::parse_timestamp;
use crate::sync::{SyncReport, TaskStore};

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Create(CanonicalRecord),
    /// Full overwrite of title, due and notes on the matched task.
    Update {
        task_id: String,
        record: CanonicalRecord,
    },
    Skip(CanonicalRecord),
}

impl Decision {
    pub fn record(&self) -> &CanonicalRecord {
        match self {
            Decision::Create(record) | Decision::Skip(record) => record,
            Decision::Update { record, .. } => record,
        }
    }
}

/// Decisions in the order the scoped records were produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncPlan {
    pub decisions: Vec<Decision>,
}

impl SyncPlan {
    pub fn counts(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for decision in &self.decisions {
            match decision {
                Decision::Create(_) => report.created += 1,
                Decision::Update { .. } => report.updated += 1,
                Decision::Skip(_) => report.skipped += 1,
            }
        }
        report
    }
}

pub fn plan(records: Vec<CanonicalRecord>, index: &DestinationIndex) -> SyncPlan {
    let decisions = records
        .into_iter()
        .map(|record| match index.get(&record.content_id) {
            None => Decision::Create(record),
            Some(existing) if needs_update(existing, &record) => Decision::Update {
                task_id: existing.id.clone(),
                record,
            },
            Some(_) => Decision::Skip(record),
        })
        .collect();
    SyncPlan { decisions }
}

pub fn needs_update(existing: &RemoteTask, record: &CanonicalRecord) -> bool {
    existing.title.as_deref().unwrap_or("") != record.title
        || due_differs(existing.due.as_deref(), record.due)
        || existing.notes.as_deref().unwrap_or("") != record.notes
}

/// Compares by instant, so `2025-03-01T00:00:00Z` and
/// `2025-03-01T00:00:00.000Z` are the same due date. A remote value that
/// does not parse always counts as different.
fn due_differs(remote: Option<&str>, wanted: Option<DateTime<Utc>>) -> bool {
    let remote = remote.filter(|s| !s.is_empty());
    match (remote, wanted) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(raw), Some(wanted)) => parse_timestamp(raw) != Some(wanted),
    }
}

/// Applies the plan one call at a time. The first failure stops the loop;
/// the error carries the counts reached before it.
pub fn apply_plan<S: TaskStore + ?Sized>(
    store: &mut S,
    list_id: &str,
    plan: &SyncPlan,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for decision in &plan.decisions {
        match decision {
            Decision::Create(record) => {
                debug!(content_id = %record.content_id, "creating task");
                store
                    .create_task(list_id, &record.payload())
                    .map_err(|err| mutation_error("create", record, report, err))?;
                report.created += 1;
            }
            Decision::Update { task_id, record } => {
                debug!(content_id = %record.content_id, task_id = %task_id, "updating task");
                store
                    .update_task(list_id, task_id, &record.payload())
                    .map_err(|err| mutation_error("update", record, report, err))?;
                report.updated += 1;
            }
            Decision::Skip(record) => {
                debug!(content_id = %record.content_id, "task up to date");
                report.skipped += 1;
            }
        }
    }
    Ok(report)
}

fn mutation_error(
    action: &'static str,
    record: &CanonicalRecord,
    completed: SyncReport,
    err: SyncError,
) -> SyncError {
    SyncError::Mutation {
        action,
        content_id: record.content_id.clone(),
        completed,
        reason: err.to_string(),
    }
}
