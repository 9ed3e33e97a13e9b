//! Manual pause configuration parsing and resolution
//!
//! The pause specification is best-effort operational input: malformed
//! tokens are logged and skipped rather than failing the update.

use crate::types::AssignmentSet;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;

/// Token meaning "all partitions of this topic currently assigned"
pub const WILDCARD_TOKEN: &str = "*";

/// Externally supplied pause specification: topic name to partition tokens.
/// A token is a literal partition id or [`WILDCARD_TOKEN`].
pub type ManualPauseSpec = HashMap<String, HashSet<String>>;

/// Pause specification with wildcards materialized into concrete ids,
/// sorted for deterministic comparison and display.
pub type EffectiveManualPauseSet = BTreeMap<String, BTreeSet<i32>>;

/// Parse the raw metadata value of the pause key.
///
/// An empty or blank value means "no manual pauses". A payload that is not
/// valid JSON is treated the same way, with a warning: pause configuration
/// must never take the task down.
pub fn parse_spec(raw: &str) -> ManualPauseSpec {
    if raw.trim().is_empty() {
        return ManualPauseSpec::new();
    }
    match serde_json::from_str::<ManualPauseSpec>(raw) {
        Ok(spec) => spec,
        Err(e) => {
            warn!(error = %e, "unparsable pause configuration payload, ignoring");
            ManualPauseSpec::new()
        }
    }
}

/// Resolve a pause specification against the assignment captured for the
/// current reconciliation pass.
///
/// The wildcard expands to the topic's partitions present in `assignment`
/// at this moment only; a later reassignment re-expands it. Literal ids are
/// kept as given. A topic whose token set is explicitly empty, or resolves
/// to nothing, is removed from the effective mapping.
pub fn resolve(spec: &ManualPauseSpec, assignment: &AssignmentSet) -> EffectiveManualPauseSet {
    let mut effective = EffectiveManualPauseSet::new();

    for (topic, tokens) in spec {
        if tokens.is_empty() {
            // explicit empty set = resume the whole topic
            continue;
        }

        let mut ids = BTreeSet::new();
        if tokens.contains(WILDCARD_TOKEN) {
            ids.extend(
                assignment
                    .iter()
                    .filter(|key| key.topic == *topic)
                    .map(|key| key.partition),
            );
        } else {
            for token in tokens {
                match token.parse::<i32>() {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(_) => {
                        warn!(topic = %topic, token = %token, "skipping malformed partition token");
                    }
                }
            }
        }

        if !ids.is_empty() {
            effective.insert(topic.clone(), ids);
        }
    }

    effective
}
