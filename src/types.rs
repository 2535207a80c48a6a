use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of discovery work: a (region, category) search on the map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrawlTask {
    pub region: String,
    pub category: String,
}

impl CrawlTask {
    pub fn new(region: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            category: category.into(),
        }
    }

    /// Stable key used in artifact filenames so re-runs can detect
    /// completed tasks.
    pub fn key(&self) -> String {
        format!("{}_{}", self.region, self.category)
    }

    pub fn query(&self) -> String {
        format!("{} {}", self.region, self.category)
    }
}

impl std::fmt::Display for CrawlTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.region, self.category)
    }
}

/// A venue scraped from a map search result entry.
///
/// `external_id` is the numeric place id taken from the detail-page URL and
/// is the dedup key everywhere downstream. Filters never edit fields, only
/// membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRecord {
    pub external_id: String,
    pub name: String,
    /// Region keyword of the task that discovered this record.
    pub region: String,
    pub category: Option<String>,
    pub address: Option<String>,
    /// Raw business-hours text as shown on the result entry. Parsed lazily
    /// by the hours filter; kept verbatim here.
    pub hours_text: Option<String>,
    /// Review-count snapshot at discovery time.
    pub review_count: i64,
    pub rating: Option<f64>,
    pub phone: Option<String>,
    pub url: Option<String>,
    /// Task key of the (region, category) search that produced this record.
    pub source_task: String,
    pub discovered_at: DateTime<Utc>,
}

impl VenueRecord {
    /// Number of populated optional fields; the merger prefers the more
    /// complete record when two tasks discovered the same place.
    pub fn completeness(&self) -> usize {
        [
            self.category.is_some(),
            self.address.is_some(),
            self.hours_text.is_some(),
            self.rating.is_some(),
            self.phone.is_some(),
            self.url.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// One review scraped from a venue's detail page. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Unique per (venue, review); composed from author and date because the
    /// source exposes no review id.
    pub external_id: String,
    pub venue_external_id: String,
    pub author: String,
    pub rating: Option<f64>,
    pub text: Option<String>,
    /// Raw date text as shown on the page, e.g. "2024.11.02.".
    pub written_at: String,
}

impl ReviewRecord {
    pub fn compose_id(venue_external_id: &str, author: &str, written_at: &str) -> String {
        format!("{venue_external_id}:{author}:{written_at}")
    }
}

/// Row counts reported by the persistence sink.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    pub fn merge(&mut self, other: UpsertCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}
