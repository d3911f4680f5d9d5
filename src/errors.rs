use std::io;

use thiserror::Error;

use crate::sync::SyncReport;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Missing required env vars: {}", .0.join(", "))]
    Config(Vec<String>),
    #[error("Canvas todo fetch failed: HTTP {status}")]
    RemoteFetch { status: u16 },
    #[error("{0}")]
    Request(String),
    #[error("Google auth failed: {0}")]
    Auth(String),
    #[error("Task {action} failed for {content_id} after {completed}: {reason}")]
    Mutation {
        action: &'static str,
        content_id: String,
        completed: SyncReport,
        reason: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Counts reached before a mutation failure aborted the run.
    pub fn completed(&self) -> Option<&SyncReport> {
        match self {
            SyncError::Mutation { completed, .. } => Some(completed),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_lists_every_missing_variable() {
        let err = SyncError::Config(vec!["CANVAS_BASE".to_string(), "CANVAS_TOKEN".to_string()]);
        assert_eq!(
            err.to_string(),
            "Missing required env vars: CANVAS_BASE, CANVAS_TOKEN"
        );
    }

    #[test]
    fn mutation_error_carries_counts_so_far() {
        let completed = SyncReport {
            created: 2,
            updated: 1,
            skipped: 0,
        };
        let err = SyncError::Mutation {
            action: "create",
            content_id: "A:7".to_string(),
            completed,
            reason: "HTTP 500".to_string(),
        };
        assert_eq!(err.completed().map(|r| r.created), Some(2));
        assert_eq!(
            err.to_string(),
            "Task create failed for A:7 after created=2 updated=1 skipped=0: HTTP 500"
        );
    }
}
