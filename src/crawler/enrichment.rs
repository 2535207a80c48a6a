//! Stage 6: per-venue review enrichment from detail pages.

use crate::artifacts::{self, Stage};
use crate::config::Config;
use crate::crawler::{self, kakao, TaskOutcome};
use crate::error::Result;
use crate::pipeline::{CancelFlag, StageSummary};
use crate::session::{BrowserFactory, BrowserSession, SessionPool};
use crate::types::{ReviewRecord, VenueRecord};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Consecutive scroll rounds without new reviews before the list counts as
/// exhausted.
const STALE_SCROLL_LIMIT: u32 = 3;

/// Stage-5 survivors without a stage-6 artifact. A venue that produced an
/// empty artifact was processed and found reviewless; it is not pending.
pub fn pending_venues(config: &Config) -> Result<Vec<VenueRecord>> {
    let path = artifacts::artifact_path(
        &config.data_dir,
        Stage::ReviewFiltered,
        Stage::COMBINED_KEY,
    );
    let venues: Vec<VenueRecord> = artifacts::read_json(&path)?;
    Ok(venues
        .into_iter()
        .filter(|venue| {
            !artifacts::artifact_exists(&config.data_dir, Stage::Reviews, &venue.external_id)
        })
        .collect())
}

/// Runs review collection for every pending venue on the shared pool, with
/// the same retry and failure-isolation policy as discovery.
pub async fn run_stage(
    config: Arc<Config>,
    pool: Arc<SessionPool<BrowserFactory>>,
    cancel: CancelFlag,
) -> Result<StageSummary> {
    let pending = pending_venues(&config)?;
    let mut summary = StageSummary::new(Stage::Reviews.dir_name());

    let mut join_set = JoinSet::new();
    for venue in pending {
        let config = Arc::clone(&config);
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        join_set.spawn(async move { run_venue(config, pool, venue, cancel).await });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(TaskOutcome::Completed(count)) => {
                summary.processed += 1;
                counter!("nightspot_reviews_collected_total").increment(count as u64);
            }
            Ok(TaskOutcome::Failed) => summary.failed += 1,
            Ok(TaskOutcome::Cancelled) => summary.skipped += 1,
            Err(e) => {
                error!("enrichment task panicked: {}", e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn run_venue(
    config: Arc<Config>,
    pool: Arc<SessionPool<BrowserFactory>>,
    venue: VenueRecord,
    cancel: CancelFlag,
) -> TaskOutcome {
    let max_attempts = config.retry.max_attempts;
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            info!("cancellation observed, skipping venue {}", venue.name);
            return TaskOutcome::Cancelled;
        }

        let mut guard = match pool.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                error!("could not acquire session for {}: {}", venue.name, e);
                return TaskOutcome::Failed;
            }
        };

        match crawl_venue(&guard, &config, &venue).await {
            Ok(reviews) => {
                // An empty artifact still gets written: "processed, no
                // reviews" must be distinguishable from "not yet processed".
                let path = artifacts::artifact_path(
                    &config.data_dir,
                    Stage::Reviews,
                    &venue.external_id,
                );
                if let Err(e) = artifacts::write_json(&path, &reviews) {
                    error!("failed to write review artifact for {}: {}", venue.name, e);
                    return TaskOutcome::Failed;
                }
                info!("{}: collected {} reviews", venue.name, reviews.len());
                return TaskOutcome::Completed(reviews.len());
            }
            Err(e) => {
                if e.is_session_fatal() {
                    warn!(
                        "{}: session error on attempt {}/{}, replacing session: {}",
                        venue.name, attempt, max_attempts, e
                    );
                    guard.poison();
                } else {
                    warn!(
                        "{}: attempt {}/{} failed: {}",
                        venue.name, attempt, max_attempts, e
                    );
                }
                drop(guard);
                if attempt < max_attempts {
                    tokio::time::sleep(crawler::backoff_delay(
                        config.retry.base_delay_ms,
                        attempt,
                    ))
                    .await;
                }
            }
        }
    }

    error!("{}: giving up after {} attempts", venue.name, max_attempts);
    counter!("nightspot_enrichment_failures_total").increment(1);
    TaskOutcome::Failed
}

/// One attempt for a venue: open its review tab, keep scrolling and
/// unfolding until the list stops growing or a cap is hit, then parse the
/// accumulated DOM once.
async fn crawl_venue(
    session: &BrowserSession,
    config: &Config,
    venue: &VenueRecord,
) -> Result<Vec<ReviewRecord>> {
    let url = format!("{}#comment", kakao::place_url(&venue.external_id));
    let page = crawler::open_page(session, &url, config.page_wait_ms).await?;

    let mut seen = 0usize;
    let mut stale_rounds = 0u32;
    loop {
        let html = crawler::page_html(&page).await?;
        let count = kakao::parse_reviews(&html, &venue.external_id).len();
        if count >= config.max_reviews_per_venue {
            break;
        }
        if count == seen {
            stale_rounds += 1;
            if stale_rounds >= STALE_SCROLL_LIMIT {
                break;
            }
        } else {
            stale_rounds = 0;
            seen = count;
        }

        // Unfold truncated texts, then ask for more: the review tab loads
        // further entries via a "more" link while it exists, and via
        // scrolling once it is gone.
        crawler::click_all(&page, "span.btn_more").await?;
        if !crawler::click_selector(&page, "a.link_more").await? {
            crawler::scroll_to_bottom(&page).await?;
        }
        tokio::time::sleep(Duration::from_millis(config.page_wait_ms)).await;
    }

    let html = crawler::page_html(&page).await?;
    let mut reviews = kakao::parse_reviews(&html, &venue.external_id);
    reviews.truncate(config.max_reviews_per_venue);

    if let Err(e) = page.close().await {
        warn!("failed to close detail tab for {}: {}", venue.name, e);
    }
    Ok(reviews)
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
            address: None,
            hours_text: None,
            review_count: 10,
            rating: None,
            phone: None,
            url: None,
            source_task: "강남역_클럽".into(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn venues_with_artifacts_are_not_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();

        let survivors = vec![venue("100"), venue("200")];
        artifacts::write_json(
            &artifacts::artifact_path(
                &config.data_dir,
                Stage::ReviewFiltered,
                Stage::COMBINED_KEY,
            ),
            &survivors,
        )
        .unwrap();

        // Venue 100 was already enriched, with zero reviews
        artifacts::write_json(
            &artifacts::artifact_path(&config.data_dir, Stage::Reviews, "100"),
            &Vec::<ReviewRecord>::new(),
        )
        .unwrap();

        let pending = pending_venues(&config).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].external_id, "200");
    }
}
