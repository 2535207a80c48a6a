//! Persistence sink: upserts curated venues and reviews into SQLite.
//!
//! The pipeline treats this as an at-least-once delivery target: batches
//! may be resubmitted after a failure, so every write is an upsert keyed by
//! external id. Each batch runs in its own transaction; a failed batch
//! rolls back alone and leaves prior batches committed.

use crate::error::Result;
use crate::types::{ReviewRecord, UpsertCounts, VenueRecord};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Rows per transaction.
const BATCH_SIZE: usize = 200;

#[async_trait]
pub trait VenueSink: Send + Sync {
    async fn upsert_venues(&self, venues: &[VenueRecord]) -> Result<UpsertCounts>;
    async fn upsert_reviews(&self, reviews: &[ReviewRecord]) -> Result<UpsertCounts>;
}

pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            CREATE TABLE IF NOT EXISTS venues (
                external_id    TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                region         TEXT NOT NULL,
                category       TEXT,
                address        TEXT,
                hours_text     TEXT,
                review_count   INTEGER NOT NULL DEFAULT 0,
                rating         REAL,
                phone          TEXT,
                url            TEXT,
                discovered_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reviews (
                external_id        TEXT NOT NULL,
                venue_external_id  TEXT NOT NULL REFERENCES venues(external_id),
                author             TEXT NOT NULL,
                rating             REAL,
                text               TEXT,
                written_at         TEXT NOT NULL,
                PRIMARY KEY (external_id, venue_external_id)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl VenueSink for SqliteSink {
    async fn upsert_venues(&self, venues: &[VenueRecord]) -> Result<UpsertCounts> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut counts = UpsertCounts::default();

        for batch in venues.chunks(BATCH_SIZE) {
            // A failure drops `tx` here, rolling back this batch only.
            let tx = conn.transaction()?;
            for venue in batch {
                let existing: bool = tx
                    .prepare_cached("SELECT 1 FROM venues WHERE external_id = ?1")?
                    .exists(params![venue.external_id])?;
                tx.prepare_cached(
                    "INSERT INTO venues (external_id, name, region, category, address,
                                         hours_text, review_count, rating, phone, url,
                                         discovered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(external_id) DO UPDATE SET
                         name = excluded.name,
                         region = excluded.region,
                         category = excluded.category,
                         address = excluded.address,
                         hours_text = excluded.hours_text,
                         review_count = excluded.review_count,
                         rating = excluded.rating,
                         phone = excluded.phone,
                         url = excluded.url,
                         discovered_at = excluded.discovered_at",
                )?
                .execute(params![
                    venue.external_id,
                    venue.name,
                    venue.region,
                    venue.category,
                    venue.address,
                    venue.hours_text,
                    venue.review_count,
                    venue.rating,
                    venue.phone,
                    venue.url,
                    venue.discovered_at.to_rfc3339(),
                ])?;
                if existing {
                    counts.updated += 1;
                } else {
                    counts.inserted += 1;
                }
            }
            tx.commit()?;
            debug!("committed venue batch of {}", batch.len());
        }

        info!(
            "upserted venues: {} inserted, {} updated",
            counts.inserted, counts.updated
        );
        Ok(counts)
    }

    async fn upsert_reviews(&self, reviews: &[ReviewRecord]) -> Result<UpsertCounts> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut counts = UpsertCounts::default();

        for batch in reviews.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            for review in batch {
                let existing: bool = tx
                    .prepare_cached(
                        "SELECT 1 FROM reviews WHERE external_id = ?1 AND venue_external_id = ?2",
                    )?
                    .exists(params![review.external_id, review.venue_external_id])?;
                tx.prepare_cached(
                    "INSERT INTO reviews (external_id, venue_external_id, author, rating,
                                          text, written_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(external_id, venue_external_id) DO UPDATE SET
                         author = excluded.author,
                         rating = excluded.rating,
                         text = excluded.text,
                         written_at = excluded.written_at",
                )?
                .execute(params![
                    review.external_id,
                    review.venue_external_id,
                    review.author,
                    review.rating,
                    review.text,
                    review.written_at,
                ])?;
                if existing {
                    counts.updated += 1;
                } else {
                    counts.inserted += 1;
                }
            }
            tx.commit()?;
            debug!("committed review batch of {}", batch.len());
        }

        info!(
            "upserted reviews: {} inserted, {} updated",
            counts.inserted, counts.updated
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn venue(id: &str) -> VenueRecord {
        VenueRecord {
            external_id: id.to_string(),
            name: format!("venue {id}"),
            region: "강남역".into(),
            category: Some("나이트,클럽".into()),
            address: Some("서울 어딘가".into()),
            hours_text: Some("매일 22:00 ~ 06:00".into()),
            review_count: 12,
            rating: Some(4.5),
            phone: None,
            url: None,
            source_task: "강남역_클럽".into(),
            discovered_at: Utc::now(),
        }
    }

    fn review(venue_id: &str, author: &str) -> ReviewRecord {
        ReviewRecord {
            external_id: ReviewRecord::compose_id(venue_id, author, "2024.11.02."),
            venue_external_id: venue_id.to_string(),
            author: author.to_string(),
            rating: Some(5.0),
            text: Some("최고".into()),
            written_at: "2024.11.02.".into(),
        }
    }

    #[tokio::test]
    async fn resubmitting_a_batch_does_not_duplicate_rows() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let batch = vec![venue("100"), venue("200")];

        let first = sink.upsert_venues(&batch).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.updated, 0);

        let second = sink.upsert_venues(&batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);

        let conn = sink.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM venues", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn review_upsert_is_keyed_per_venue() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.upsert_venues(&[venue("100"), venue("200")])
            .await
            .unwrap();

        let reviews = vec![
            review("100", "밤손님"),
            review("200", "밤손님"),
            review("100", "단골"),
        ];
        let counts = sink.upsert_reviews(&reviews).await.unwrap();
        assert_eq!(counts.inserted, 3);

        let counts = sink.upsert_reviews(&reviews).await.unwrap();
        assert_eq!(counts.updated, 3);
        assert_eq!(counts.inserted, 0);
    }
}
