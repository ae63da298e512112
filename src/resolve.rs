//! Path→SID Resolver (C5, §4.5).
//!
//! Earlier SID lookups in this codebase were always a single exact
//! hash-map hit against one file's own paths. Fuzzy resolution across a
//! merged, cross-module tree is new.

use crate::error::{CoreconfError, Result};
use crate::path::Segment;
use crate::sid_tree::SidTree;

/// Resolve the path formed by `segments[..=segments.len()-1]` (i.e. every
/// segment given) to an absolute SID, per the C5 cascade: direct prefixed
/// lookup, direct stripped lookup, then fuzzy `leafToPaths` lookup scored
/// against the stripped context. Deterministic: identical inputs always
/// yield the same SID.
pub fn resolve_path(segments: &[Segment], tree: &SidTree) -> Result<i64> {
    let prefixed_full = segments
        .iter()
        .map(crate::path::segment_prefixed_name)
        .collect::<Vec<_>>()
        .join("/");
    if let Some(&sid) = tree.prefixed_path_to_sid.get(&prefixed_full) {
        return Ok(sid);
    }

    let stripped_full = segments.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join("/");
    if let Some(&sid) = tree.path_to_sid.get(&stripped_full) {
        return Ok(sid);
    }

    if let Some(last) = segments.last() {
        if let Some(candidates) = tree.leaf_to_paths.get(&last.name) {
            if let Some(sid) = resolve_fuzzy(candidates, &stripped_full, tree) {
                return Ok(sid);
            }
        }
    }

    Err(CoreconfError::PathUnresolved { path: stripped_full })
}

/// Score every `leafToPaths` candidate by the count of matching leading
/// segments against `stripped_context`, breaking ties by candidate order
/// (the first-registered candidate wins on an exact tie, and is the answer
/// whenever there is no usable context at all).
fn resolve_fuzzy(candidates: &[String], stripped_context: &str, tree: &SidTree) -> Option<i64> {
    if candidates.len() == 1 {
        return tree.path_to_sid.get(&candidates[0]).copied();
    }
    if candidates.is_empty() {
        return None;
    }

    let context_segs: Vec<&str> = stripped_context.split('/').collect();
    let mut best_idx = 0usize;
    let mut best_score = -1i64;
    for (i, candidate) in candidates.iter().enumerate() {
        let cand_segs: Vec<&str> = candidate.split('/').collect();
        let score = context_segs
            .iter()
            .zip(cand_segs.iter())
            .take_while(|(a, b)| a == b)
            .count() as i64;
        if score > best_score {
            best_score = score;
            best_idx = i;
        }
    }
    tree.path_to_sid.get(&candidates[best_idx]).copied()
}
