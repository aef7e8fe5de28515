use futures::StreamExt;
use metrics::histogram;
use std::sync::Arc;
use streamgate_core::{
    subject, Engine, LogEntry, LogInfo, RangeQuery, ReadStart, MAX_RANGE_LIMIT,
};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::gateway_metrics::RANGE_READ_ENTRIES;

/// RangeQueryEngine answers historical reads in two phases: resolve where the read
/// starts, then scan forward until `limit` entries are collected or the log runs out.
///
/// The scan never materializes more of the log than it walks over, so the work is
/// bounded by `limit` plus the distance between the start and the tail.
#[derive(Clone)]
pub(crate) struct RangeQueryEngine {
    engine: Arc<dyn Engine>,
}

impl RangeQueryEngine {
    pub(crate) fn new(engine: Arc<dyn Engine>) -> Self {
        RangeQueryEngine { engine }
    }

    /// Entries of `query.log_name` oldest first, at most `query.limit` of them.
    pub(crate) async fn read_range(&self, query: &RangeQuery) -> Result<Vec<LogEntry>> {
        validate(query)?;

        let info = self.engine.log_info(&query.log_name).await?;
        let Some(start) = resolve_start(query, &info) else {
            debug!(log = %query.log_name, "range read resolved to an empty window");
            return Ok(Vec::new());
        };

        let limit = query.limit as usize;
        let mut stream = self.engine.read(&query.log_name, start).await?;
        let mut entries = Vec::with_capacity(limit);

        while entries.len() < limit {
            let Some(entry) = stream.next().await else {
                break;
            };
            let entry = entry?;

            if query.end_time.is_some_and(|end| entry.published_at > end) {
                break;
            }
            if let Some(pattern) = &query.subject_filter {
                if !subject::matches(pattern, &entry.subject) {
                    continue;
                }
            }
            entries.push(entry);
        }

        histogram!(RANGE_READ_ENTRIES.name, "log" => query.log_name.clone())
            .record(entries.len() as f64);
        debug!(
            log = %query.log_name,
            start = ?start,
            returned = entries.len(),
            "range read completed"
        );
        Ok(entries)
    }
}

/// Argument checks that never need the engine.
fn validate(query: &RangeQuery) -> Result<()> {
    if !(1..=MAX_RANGE_LIMIT).contains(&query.limit) {
        return Err(GatewayError::Validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_RANGE_LIMIT, query.limit
        )));
    }
    if query.log_name.is_empty() {
        return Err(GatewayError::Validation("log name must not be empty".into()));
    }
    if let Some(pattern) = &query.subject_filter {
        if !subject::is_valid_filter(pattern) {
            return Err(GatewayError::Validation(format!(
                "invalid subject filter: {}",
                pattern
            )));
        }
    }
    if let (Some(start), Some(end)) = (query.start_time, query.end_time) {
        if end < start {
            return Err(GatewayError::Validation(
                "endTime must not be before startTime".into(),
            ));
        }
    }
    Ok(())
}

/// Where the forward scan begins, or `None` when the window is known to be empty.
///
/// An explicit sequence wins over a start time. With neither, the read covers the last
/// `limit` entries of the log.
fn resolve_start(query: &RangeQuery, info: &LogInfo) -> Option<ReadStart> {
    if info.is_empty() {
        return None;
    }

    if let Some(sequence) = query.start_sequence {
        if sequence > info.last_sequence {
            return None;
        }
        return Some(ReadStart::Sequence(sequence.max(info.first_sequence)));
    }

    if let Some(at) = query.start_time {
        return Some(ReadStart::Time(at));
    }

    let back = (query.limit as u64).saturating_sub(1);
    let first = info.last_sequence.saturating_sub(back).max(info.first_sequence);
    Some(ReadStart::Sequence(first))
}

#[cfg(test)]
#[path = "range_query_test.rs"]
mod range_query_test;
