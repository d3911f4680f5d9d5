pub mod index;
pub mod normalize;
pub mod reconcile;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;

use tracing::{info, warn};

use crate::errors::Result;
use crate::models::{CanvasTodo, RemoteTask, TaskPayload};
use index::DestinationIndex;
use reconcile::{apply_plan, plan};

/// Where to-do items come from.
pub trait TodoSource {
    fn fetch_todos(&mut self) -> Result<Vec<CanvasTodo>>;
}

/// The task list being written to. Implementations must finish each call
/// before returning; the apply loop never overlaps mutations.
pub trait TaskStore {
    /// Returns the id of the list titled `name`, creating it when missing.
    fn ensure_list(&mut self, name: &str) -> Result<String>;
    /// Every non-completed, non-hidden, non-deleted task, across all pages.
    fn list_active(&mut self, list_id: &str) -> Result<Vec<RemoteTask>>;
    fn create_task(&mut self, list_id: &str, payload: &TaskPayload) -> Result<RemoteTask>;
    fn update_task(
        &mut self,
        list_id: &str,
        task_id: &str,
        payload: &TaskPayload,
    ) -> Result<RemoteTask>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} skipped={}",
            self.created, self.updated, self.skipped
        )
    }
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub list_name: String,
    pub window_days: u32,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub report: SyncReport,
    pub fetched: usize,
    pub scoped: usize,
    pub existing: usize,
    pub collisions: Vec<String>,
}

/// One full pass: fetch, normalize, window, index, plan, apply.
pub fn run<Src, Store>(source: &mut Src, store: &mut Store, options: &SyncOptions) -> Result<SyncOutcome>
where
    Src: TodoSource + ?Sized,
    Store: TaskStore + ?Sized,
{
    let list_id = store.ensure_list(&options.list_name)?;

    let todos = source.fetch_todos()?;
    info!(count = todos.len(), "fetched Canvas to-dos");

    let records = normalize::normalize_todos(&todos);
    let scoped = window::filter_by_window(records, options.window_days);

    let existing = store.list_active(&list_id)?;
    let index = DestinationIndex::build(&existing);
    if !index.collisions.is_empty() {
        warn!(
            count = index.collisions.len(),
            ids = ?index.collisions,
            "several tasks share a content id; only the last one is kept in sync"
        );
    }
    info!(
        scoped = scoped.len(),
        existing = existing.len(),
        managed = index.len(),
        "reconciling"
    );

    let scoped_count = scoped.len();
    let plan = plan(scoped, &index);
    let report = if options.dry_run {
        plan.counts()
    } else {
        apply_plan(store, &list_id, &plan)?
    };

    Ok(SyncOutcome {
        report,
        fetched: todos.len(),
        scoped: scoped_count,
        existing: existing.len(),
        collisions: index.collisions,
    })
}
