use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{CanonicalRecord, CanvasTodo};

pub const DEFAULT_TITLE: &str = "Canvas To-Do";
const FALLBACK_TITLE: &str = "untitled";
pub const SOURCE_LINE: &str = "Source: Canvas";

static BARE_DATE: OnceLock<Regex> = OnceLock::new();

pub fn normalize_todos(items: &[CanvasTodo]) -> Vec<CanonicalRecord> {
    items.iter().map(normalize_todo).collect()
}

pub fn normalize_todo(todo: &CanvasTodo) -> CanonicalRecord {
    let content_id = build_content_id(todo);
    let title = assignment_name(todo)
        .or_else(|| non_empty(&todo.title))
        .unwrap_or(DEFAULT_TITLE)
        .to_string();
    let due = raw_due(todo).and_then(normalize_due);
    let notes = build_notes(&content_id, todo);
    CanonicalRecord {
        content_id,
        title,
        due,
        notes,
    }
}

/// Stable identity used to match a to-do against tasks written by earlier
/// runs. Assignment id wins over URL, URL wins over the title/due fallback.
pub fn build_content_id(todo: &CanvasTodo) -> String {
    if let Some(id) = todo.assignment.as_ref().and_then(|a| a.id) {
        return format!("A:{id}");
    }
    if let Some(url) = first_id_part([non_empty(&todo.html_url), assignment_url(todo)]) {
        return format!("U:{url}");
    }
    let title = first_id_part([assignment_name(todo), non_empty(&todo.title)])
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());
    let due = raw_due(todo).map(id_part).unwrap_or_default();
    format!("FALLBACK:{title}:{due}")
}

/// The id lives on a single notes line that is read back trimmed, so its
/// parts carry no edge whitespace and no line breaks.
fn id_part(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_id_part<const N: usize>(candidates: [Option<&str>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(id_part)
        .find(|part| !part.is_empty())
}

pub fn build_notes(content_id: &str, todo: &CanvasTodo) -> String {
    let mut lines = vec![format!("CID: {content_id}"), SOURCE_LINE.to_string()];
    if let Some(course) = non_empty(&todo.context_name) {
        lines.push(format!("Course: {course}"));
    }
    if let Some(url) = assignment_url(todo).or_else(|| non_empty(&todo.html_url)) {
        lines.push(format!("URL: {url}"));
    }
    lines.join("\n")
}

/// Parses a Canvas due string. Never fails: anything that cannot be read as
/// a date or timestamp becomes `None`.
pub fn normalize_due(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let bare = BARE_DATE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Valid regex pattern")
    });
    if bare.is_match(raw) {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    parse_timestamp(raw).map(|dt| dt.trunc_subsecs(3))
}

pub fn format_due(due: DateTime<Utc>) -> String {
    due.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn raw_due(todo: &CanvasTodo) -> Option<&str> {
    todo.assignment
        .as_ref()
        .and_then(|a| non_empty(&a.due_at))
        .or_else(|| non_empty(&todo.due_at))
}

fn assignment_name(todo: &CanvasTodo) -> Option<&str> {
    todo.assignment.as_ref().and_then(|a| non_empty(&a.name))
}

fn assignment_url(todo: &CanvasTodo) -> Option<&str> {
    todo.assignment.as_ref().and_then(|a| non_empty(&a.html_url))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
