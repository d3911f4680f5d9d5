use chrono::{DateTime, Duration, Utc};

use crate::models::CanonicalRecord;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Keeps records due between now and `window_days` from now, both ends
/// inclusive. Undated records never pass.
pub fn filter_by_window(records: Vec<CanonicalRecord>, window_days: u32) -> Vec<CanonicalRecord> {
    filter_by_window_at(records, window_days, Utc::now())
}

pub fn filter_by_window_at(
    records: Vec<CanonicalRecord>,
    window_days: u32,
    now: DateTime<Utc>,
) -> Vec<CanonicalRecord> {
    // Horizons past chrono's range keep everything due from now on.
    let end = now
        .checked_add_signed(Duration::days(i64::from(window_days)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    records
        .into_iter()
        .filter(|record| match record.due {
            Some(due) => due >= now && due <= end,
            None => false,
        })
        .collect()
}
