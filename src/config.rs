use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Crawl and filter configuration, loaded from a TOML file.
///
/// Every option has a default documented on its field; a file only needs to
/// name the options it overrides. Validation failures are fatal at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Region keywords searched during discovery, e.g. "강남역".
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,

    /// Category keywords searched during discovery, e.g. "술집".
    /// Discovery runs one task per (region, category) pair.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Substrings matched against a venue's scraped sub-category during the
    /// hours/category filter pass. A venue must match at least one.
    #[serde(default = "default_category_filters")]
    pub category_filters: Vec<String>,

    /// A venue counts as late-operating when it opens at or after this hour
    /// (24h clock) on any day, or when its span wraps past midnight.
    #[serde(default = "default_late_hour")]
    pub late_hour: u32,

    /// A venue also counts as late-operating when it closes at or before
    /// this morning hour (e.g. 9 keeps a 22:00~06:00 span).
    #[serde(default = "default_early_close_hour")]
    pub early_close_hour: u32,

    /// Minimum review-count snapshot a venue needs to survive the
    /// review-count filter pass.
    #[serde(default = "default_min_review_count")]
    pub min_review_count: i64,

    /// Maximum result pages walked per discovery task.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Maximum reviews collected per venue during enrichment.
    #[serde(default = "default_max_reviews_per_venue")]
    pub max_reviews_per_venue: usize,

    /// Maximum concurrently live browser sessions. Task parallelism is
    /// bounded by pool acquisition, so this is also the worker bound.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Retry policy shared by the discovery and enrichment crawlers.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Root directory for stage artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite database file the persistence sink writes to.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Launch browsers headless. Disable only for local debugging.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Settle time after navigations and load-more clicks, in milliseconds.
    #[serde(default = "default_page_wait_ms")]
    pub page_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per task before it is marked failed-and-skipped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles on every subsequent attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_regions() -> Vec<String> {
    ["강남역", "홍대입구역", "성수역", "이태원역", "압구정역"]
        .map(String::from)
        .to_vec()
}

fn default_categories() -> Vec<String> {
    ["식당", "카페", "술집", "노래방", "PC방", "클럽", "볼링장", "당구장"]
        .map(String::from)
        .to_vec()
}

fn default_category_filters() -> Vec<String> {
    vec!["나이트,클럽".to_string()]
}

fn default_late_hour() -> u32 {
    21
}

fn default_early_close_hour() -> u32 {
    9
}

fn default_min_review_count() -> i64 {
    1
}

fn default_max_pages() -> u32 {
    10
}

fn default_max_reviews_per_venue() -> usize {
    50
}

fn default_pool_size() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/venues.db")
}

fn default_headless() -> bool {
    true
}

fn default_page_wait_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        // The empty document deserializes to all field defaults.
        toml::from_str("").unwrap_or_else(|_| unreachable!("defaults always parse"))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(ScraperError::Config("regions must not be empty".into()));
        }
        if self.categories.is_empty() {
            return Err(ScraperError::Config("categories must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(ScraperError::Config("pool_size must be at least 1".into()));
        }
        if self.max_pages == 0 {
            return Err(ScraperError::Config("max_pages must be at least 1".into()));
        }
        if self.late_hour > 23 || self.early_close_hour > 23 {
            return Err(ScraperError::Config(
                "late_hour and early_close_hour must be 0..=23".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ScraperError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.late_hour, 21);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            regions = ["건대입구역"]
            pool_size = 2

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.regions, vec!["건대입구역"]);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.retry.max_attempts, 5);
        // Untouched fields keep defaults
        assert_eq!(config.max_pages, 10);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config: Config = toml::from_str("pool_size = 0").unwrap();
        assert!(matches!(config.validate(), Err(ScraperError::Config(_))));
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let config: Config = toml::from_str("late_hour = 25").unwrap();
        assert!(config.validate().is_err());
    }
}
