//! Stage-artifact store.
//!
//! Each pipeline stage writes its output as JSON files under a numbered
//! directory; filenames embed the task or venue key so a re-run can detect
//! completed units and skip them. Writes go through a temp file plus rename,
//! so a crash mid-write never leaves a partial artifact for a downstream
//! merge to trip over.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Per-task raw discovery output.
    Discovery,
    /// All discovered venues, deduplicated.
    Combined,
    /// Per-task output of the hours/category filter pass.
    HoursFiltered,
    /// Hours-filtered venues, deduplicated.
    FilteredCombined,
    /// Output of the review-count filter pass.
    ReviewFiltered,
    /// Per-venue review artifacts from enrichment.
    Reviews,
}

impl Stage {
    pub fn number(self) -> u8 {
        match self {
            Stage::Discovery => 1,
            Stage::Combined => 2,
            Stage::HoursFiltered => 3,
            Stage::FilteredCombined => 4,
            Stage::ReviewFiltered => 5,
            Stage::Reviews => 6,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Discovery => "1_discovery",
            Stage::Combined => "2_combined",
            Stage::HoursFiltered => "3_hours_filtered",
            Stage::FilteredCombined => "4_filtered_combined",
            Stage::ReviewFiltered => "5_review_filtered",
            Stage::Reviews => "6_reviews",
        }
    }

    pub fn dir(self, data_root: &Path) -> PathBuf {
        data_root.join(self.dir_name())
    }

    /// Filename used by the single-artifact stages (2, 4, 5).
    pub const COMBINED_KEY: &'static str = "all_venues";

    pub const ALL: [Stage; 6] = [
        Stage::Discovery,
        Stage::Combined,
        Stage::HoursFiltered,
        Stage::FilteredCombined,
        Stage::ReviewFiltered,
        Stage::Reviews,
    ];

    /// Reverse lookup by directory name, used by the artifact-browsing
    /// endpoint.
    pub fn from_dir_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| stage.dir_name() == name)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Keys come from scraped names and config values; keep them filesystem-safe.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

pub fn artifact_path(data_root: &Path, stage: Stage, key: &str) -> PathBuf {
    stage
        .dir(data_root)
        .join(format!("{}.json", sanitize_key(key)))
}

pub fn artifact_exists(data_root: &Path, stage: Stage, key: &str) -> bool {
    artifact_path(data_root, stage, key).is_file()
}

/// Atomically writes `value` as pretty JSON: temp file in the target
/// directory, then rename over the final path.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// All `.json` artifacts of a stage in lexicographic filename order. The
/// fixed order is what makes the merger deterministic. A missing stage
/// directory is an empty stage, not an error.
pub fn list_artifacts(data_root: &Path, stage: Stage) -> Result<Vec<PathBuf>> {
    let dir = stage.dir(data_root);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Artifact filenames of a stage, for the browsing endpoint.
pub fn artifact_file_names(data_root: &Path, stage: Stage) -> Result<Vec<String>> {
    Ok(list_artifacts(data_root, stage)?
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = artifact_path(dir.path(), Stage::Discovery, "강남역_클럽");
        write_json(&path, &vec!["a".to_string(), "b".to_string()]).unwrap();
        let back: Vec<String> = read_json(&path).unwrap();
        assert_eq!(back, vec!["a", "b"]);
        // No temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn listing_is_sorted_and_ignores_non_json() {
        let dir = tempdir().unwrap();
        let stage_dir = Stage::Discovery.dir(dir.path());
        fs::create_dir_all(&stage_dir).unwrap();
        fs::write(stage_dir.join("b.json"), "[]").unwrap();
        fs::write(stage_dir.join("a.json"), "[]").unwrap();
        fs::write(stage_dir.join("note.txt"), "x").unwrap();
        let paths = list_artifacts(dir.path(), Stage::Discovery).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn missing_stage_dir_is_empty_not_error() {
        let dir = tempdir().unwrap();
        assert!(list_artifacts(dir.path(), Stage::Reviews).unwrap().is_empty());
    }

    #[test]
    fn keys_are_sanitized() {
        assert_eq!(sanitize_key("강남역 술집/bar"), "강남역_술집_bar");
    }

    #[test]
    fn stages_resolve_from_dir_names() {
        assert_eq!(Stage::from_dir_name("1_discovery"), Some(Stage::Discovery));
        assert_eq!(Stage::from_dir_name("6_reviews"), Some(Stage::Reviews));
        assert_eq!(Stage::from_dir_name("7_bogus"), None);
    }

    #[test]
    fn file_names_list_a_stage_directory() {
        let dir = tempdir().unwrap();
        let path = artifact_path(dir.path(), Stage::Discovery, "강남역_클럽");
        write_json(&path, &Vec::<String>::new()).unwrap();
        assert_eq!(
            artifact_file_names(dir.path(), Stage::Discovery).unwrap(),
            vec!["강남역_클럽.json"]
        );
    }
}
