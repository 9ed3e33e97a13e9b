//! Consumer group id resolution
//!
//! All logical streams bound to one task share a single consumer group.
//! Streams may override the default via the `group.id` metadata key; two
//! streams naming different groups is a fatal misconfiguration because the
//! task cannot safely start a consumer for either.

use crate::error::{MirrorError, Result};
use crate::types::MirrorStream;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Resolve the consumer group id shared by all streams of a task.
///
/// - No explicit `group.id` anywhere: the first stream's name is used.
/// - Exactly one distinct explicit id: that id wins, streams without an
///   override follow it.
/// - Two or more distinct explicit ids: `MirrorError::Configuration`.
pub fn resolve_group_id(streams: &[MirrorStream]) -> Result<String> {
    let first = streams
        .first()
        .ok_or_else(|| MirrorError::configuration("task has no streams bound"))?;

    let explicit: BTreeSet<&str> = streams.iter().filter_map(MirrorStream::group_id).collect();

    match explicit.len() {
        0 => {
            info!(
                group_id = %first.name,
                "no explicit group id configured, defaulting to first stream name"
            );
            Ok(first.name.clone())
        }
        1 => {
            let group_id = explicit
                .into_iter()
                .next()
                .unwrap_or(&first.name)
                .to_string();
            info!(group_id = %group_id, "using explicit consumer group id");
            Ok(group_id)
        }
        _ => {
            warn!(group_ids = ?explicit, "streams specify conflicting consumer group ids");
            Err(MirrorError::configuration(format!(
                "conflicting consumer group ids across streams: {:?}",
                explicit
            )))
        }
    }
}
