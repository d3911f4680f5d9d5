use std::collections::HashMap;

use crate::errors::{Result, SyncError};
use crate::models::{CanvasTodo, RemoteTask, TaskPayload};
use crate::sync::{TaskStore, TodoSource};

pub(crate) struct StaticSource {
    items: Vec<CanvasTodo>,
    fail_status: Option<u16>,
}

impl StaticSource {
    pub(crate) fn new(items: Vec<CanvasTodo>) -> Self {
        Self {
            items,
            fail_status: None,
        }
    }

    pub(crate) fn failing(status: u16) -> Self {
        Self {
            items: Vec::new(),
            fail_status: Some(status),
        }
    }
}

impl TodoSource for StaticSource {
    fn fetch_todos(&mut self) -> Result<Vec<CanvasTodo>> {
        match self.fail_status {
            Some(status) => Err(SyncError::RemoteFetch { status }),
            None => Ok(self.items.clone()),
        }
    }
}

/// In-memory task lists. `calls` records every mutation in order.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) lists: Vec<(String, String)>,
    tasks: HashMap<String, Vec<RemoteTask>>,
    pub(crate) calls: Vec<String>,
    /// 1-based mutation number that should fail.
    pub(crate) fail_on_call: Option<usize>,
    mutations: usize,
    next_id: usize,
}

impl MemoryStore {
    pub(crate) fn seed(&mut self, list_id: &str, task: RemoteTask) {
        self.tasks.entry(list_id.to_string()).or_default().push(task);
    }

    pub(crate) fn tasks(&self, list_id: &str) -> Vec<RemoteTask> {
        self.tasks.get(list_id).cloned().unwrap_or_default()
    }

    fn check_failure(&mut self) -> Result<()> {
        self.mutations += 1;
        if self.fail_on_call == Some(self.mutations) {
            return Err(SyncError::Request("Task create failed: HTTP 503".to_string()));
        }
        Ok(())
    }
}

impl TaskStore for MemoryStore {
    fn ensure_list(&mut self, name: &str) -> Result<String> {
        if let Some((id, _)) = self.lists.iter().find(|(_, title)| title == name) {
            return Ok(id.clone());
        }
        let id = format!("list-{}", self.lists.len() + 1);
        self.lists.push((id.clone(), name.to_string()));
        Ok(id)
    }

    fn list_active(&mut self, list_id: &str) -> Result<Vec<RemoteTask>> {
        Ok(self
            .tasks(list_id)
            .into_iter()
            .filter(|task| task.status.as_deref() != Some("completed"))
            .collect())
    }

    fn create_task(&mut self, list_id: &str, payload: &TaskPayload) -> Result<RemoteTask> {
        self.check_failure()?;
        self.calls.push("create".to_string());
        self.next_id += 1;
        let task = RemoteTask {
            id: format!("task-new-{}", self.next_id),
            title: Some(payload.title.clone()),
            due: payload.due.clone(),
            notes: Some(payload.notes.clone()),
            status: Some("needsAction".to_string()),
            updated: None,
        };
        self.seed(list_id, task.clone());
        Ok(task)
    }

    fn update_task(
        &mut self,
        list_id: &str,
        task_id: &str,
        payload: &TaskPayload,
    ) -> Result<RemoteTask> {
        self.check_failure()?;
        self.calls.push(format!("update {task_id}"));
        let task = self
            .tasks
            .get_mut(list_id)
            .and_then(|tasks| tasks.iter_mut().find(|task| task.id == task_id))
            .ok_or_else(|| SyncError::Request(format!("Task update failed: HTTP 404 ({task_id})")))?;
        task.title = Some(payload.title.clone());
        task.due = payload.due.clone();
        task.notes = Some(payload.notes.clone());
        Ok(task.clone())
    }
}
