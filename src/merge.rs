//! Stage merger: unions per-task artifacts into one deduplicated dataset.
//!
//! A pure function of its input artifacts. Inputs are read in lexicographic
//! filename order and the output is sorted by external id, so re-running on
//! identical inputs yields record-identical output.

use crate::artifacts::{self, Stage};
use crate::error::Result;
use crate::pipeline::StageSummary;
use crate::types::VenueRecord;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Duplicate tie-break: the more complete record wins; on equal
/// completeness the record from the earlier artifact (lexicographic
/// filename order) is kept. The same place legitimately shows up in
/// several (region, category) searches.
fn keep_better(existing: &mut VenueRecord, candidate: VenueRecord) {
    if candidate.completeness() > existing.completeness() {
        *existing = candidate;
    }
}

/// Merges every artifact of `from` into the single combined artifact of
/// `to`. Returns a summary with `processed` = merged record count and
/// `skipped` = duplicates collapsed.
pub fn run_merge(data_root: &Path, from: Stage, to: Stage) -> Result<StageSummary> {
    let mut summary = StageSummary::new(to.dir_name());
    let mut by_id: BTreeMap<String, VenueRecord> = BTreeMap::new();

    for path in artifacts::list_artifacts(data_root, from)? {
        let records: Vec<VenueRecord> = artifacts::read_json(&path)?;
        debug!("merging {} records from {}", records.len(), path.display());
        for record in records {
            match by_id.entry(record.external_id.clone()) {
                std::collections::btree_map::Entry::Occupied(mut entry) => {
                    keep_better(entry.get_mut(), record);
                    summary.skipped += 1;
                }
                std::collections::btree_map::Entry::Vacant(entry) => {
                    entry.insert(record);
                }
            }
        }
    }

    let merged: Vec<VenueRecord> = by_id.into_values().collect();
    summary.processed = merged.len();
    let out = artifacts::artifact_path(data_root, to, Stage::COMBINED_KEY);
    artifacts::write_json(&out, &merged)?;
    info!(
        "merged {} artifacts into {} unique venues ({} duplicates collapsed)",
        from.dir_name(),
        summary.processed,
        summary.skipped
    );
    Ok(summary)
}
