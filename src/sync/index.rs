use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

use crate::models::RemoteTask;

static CID_LINE: OnceLock<Regex> = OnceLock::new();
static SOURCE_CANVAS_LINE: OnceLock<Regex> = OnceLock::new();

/// Existing tasks keyed by the content id recovered from their notes.
#[derive(Debug, Default)]
pub struct DestinationIndex {
    by_content_id: HashMap<String, RemoteTask>,
    /// Content ids claimed by more than one task. The last task seen wins.
    pub collisions: Vec<String>,
    /// Tasks whose notes carry no content id; they are never touched.
    pub unmanaged: usize,
}

impl DestinationIndex {
    pub fn build(tasks: &[RemoteTask]) -> Self {
        let mut index = DestinationIndex::default();
        for task in tasks {
            let notes = task.notes.as_deref().unwrap_or("");
            let Some(cid) = extract_content_id(notes) else {
                if is_canvas_source(notes) {
                    warn!(task_id = %task.id, "Canvas task has no CID line; leaving it alone");
                }
                index.unmanaged += 1;
                continue;
            };
            if let Some(previous) = index.by_content_id.insert(cid.clone(), task.clone()) {
                warn!(
                    content_id = %cid,
                    kept = %task.id,
                    dropped = %previous.id,
                    "duplicate content id in task list"
                );
                if !index.collisions.contains(&cid) {
                    index.collisions.push(cid);
                }
            }
        }
        index
    }

    pub fn get(&self, content_id: &str) -> Option<&RemoteTask> {
        self.by_content_id.get(content_id)
    }

    pub fn len(&self) -> usize {
        self.by_content_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_content_id.is_empty()
    }
}

/// Returns the value of the first `CID:` line in `notes`.
pub fn extract_content_id(notes: &str) -> Option<String> {
    let re = CID_LINE.get_or_init(|| {
        Regex::new(r"^\s*CID:\s*(\S.*?)\s*$").expect("Valid regex pattern")
    });
    notes
        .lines()
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_canvas_source(notes: &str) -> bool {
    let re = SOURCE_CANVAS_LINE.get_or_init(|| {
        Regex::new(r"(?i)^\s*Source:\s*Canvas\s*$").expect("Valid regex pattern")
    });
    notes.lines().any(|line| re.is_match(line))
}
