// dbarchive/src/backup/retention.rs
//! Cleanup policy: keep the newest `keep_last` archives of a target, and of
//! the older ones keep only those taken on the first day of a month.

use chrono::{Datelike, NaiveDateTime};

use super::filename::ArchiveMatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    /// Inside the window of most recent archives.
    Recent,
    /// Older than the window but dated the 1st of a month.
    MonthlyCheckpoint,
    Delete,
}

/// Classifies every archive of the target found in `names`, oldest first.
///
/// Names the matcher does not recognize are not part of the result at all.
/// Equal timestamps keep their listing order.
pub fn decide<'a, S: AsRef<str>>(
    names: &'a [S],
    matcher: &ArchiveMatcher,
    keep_last: usize,
) -> Vec<(&'a str, NaiveDateTime, RetentionDecision)> {
    let mut dated: Vec<(&str, NaiveDateTime)> = names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            matcher.decode(name).map(|timestamp| (name, timestamp))
        })
        .collect();
    dated.sort_by_key(|(_, timestamp)| *timestamp);

    let older = dated.len().saturating_sub(keep_last);
    dated
        .into_iter()
        .enumerate()
        .map(|(index, (name, timestamp))| {
            let decision = if index >= older {
                RetentionDecision::Recent
            } else if timestamp.day() == 1 {
                RetentionDecision::MonthlyCheckpoint
            } else {
                RetentionDecision::Delete
            };
            (name, timestamp, decision)
        })
        .collect()
}

/// Names to delete, oldest first, so a caller stopping half way still keeps
/// the newest archives.
pub fn compute_deletions<S: AsRef<str>>(
    names: &[S],
    matcher: &ArchiveMatcher,
    keep_last: usize,
) -> Vec<String> {
    decide(names, matcher, keep_last)
        .into_iter()
        .filter(|(_, _, decision)| *decision == RetentionDecision::Delete)
        .map(|(name, _, _)| name.to_string())
        .collect()
}
