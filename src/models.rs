use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::normalize::format_due;

/// Assignment block nested inside a Canvas to-do.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CanvasAssignment {
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub due_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// One entry of `GET /api/v1/users/self/todo`.
///
/// Assignment-backed and generic items share this shape; which fields are
/// present decides how the item is identified.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CanvasTodo {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub assignment: Option<CanvasAssignment>,
    #[serde(default)]
    pub context_name: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub due_at: Option<String>,
    #[serde(default)]
    pub course_id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalRecord {
    pub content_id: String,
    pub title: String,
    pub due: Option<DateTime<Utc>>,
    pub notes: String,
}

impl CanonicalRecord {
    pub fn due_wire(&self) -> Option<String> {
        self.due.map(format_due)
    }

    pub fn payload(&self) -> TaskPayload {
        TaskPayload {
            title: self.title.clone(),
            due: self.due_wire(),
            notes: self.notes.clone(),
        }
    }
}

/// A task as returned by the Google Tasks API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RemoteTask {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

/// Body for task insert and patch. `due` is always serialized so a patch
/// clears a stale due date instead of leaving it in place.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskPayload {
    pub title: String,
    pub due: Option<String>,
    pub notes: String,
}
