//! Stage 1: per-task discovery of venues from the map search view.

use crate::artifacts::{self, Stage};
use crate::config::Config;
use crate::crawler::{self, kakao, TaskOutcome};
use crate::error::Result;
use crate::pipeline::{CancelFlag, StageSummary};
use crate::session::{BrowserFactory, BrowserSession, SessionPool};
use crate::types::{CrawlTask, VenueRecord};
use metrics::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// The configured cross-product of regions and categories.
pub fn all_tasks(config: &Config) -> Vec<CrawlTask> {
    let mut tasks = Vec::with_capacity(config.regions.len() * config.categories.len());
    for region in &config.regions {
        for category in &config.categories {
            tasks.push(CrawlTask::new(region, category));
        }
    }
    tasks
}

/// Tasks without a stage-1 artifact yet. This is what makes an interrupted
/// run resumable: completed tasks are detected from disk and skipped.
pub fn pending_tasks(config: &Config) -> Vec<CrawlTask> {
    all_tasks(config)
        .into_iter()
        .filter(|task| !artifacts::artifact_exists(&config.data_dir, Stage::Discovery, &task.key()))
        .collect()
}

/// Runs every pending discovery task on the shared session pool. Individual
/// task failures are counted, never propagated; the stage completes once
/// every task has an artifact or an exhausted retry budget.
pub async fn run_stage(
    config: Arc<Config>,
    pool: Arc<SessionPool<BrowserFactory>>,
    cancel: CancelFlag,
) -> StageSummary {
    let total = all_tasks(&config).len();
    let pending = pending_tasks(&config);
    let mut summary = StageSummary::new(Stage::Discovery.dir_name());
    summary.skipped = total - pending.len();
    if summary.skipped > 0 {
        info!(
            "skipping {} discovery tasks with existing artifacts",
            summary.skipped
        );
    }

    let mut join_set = JoinSet::new();
    for task in pending {
        let config = Arc::clone(&config);
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        join_set.spawn(async move { run_task(config, pool, task, cancel).await });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(TaskOutcome::Completed(count)) => {
                summary.processed += 1;
                counter!("nightspot_venues_discovered_total").increment(count as u64);
            }
            Ok(TaskOutcome::Failed) => summary.failed += 1,
            Ok(TaskOutcome::Cancelled) => summary.skipped += 1,
            Err(e) => {
                error!("discovery task panicked: {}", e);
                summary.failed += 1;
            }
        }
    }
    summary
}

/// One task with retry: a transient failure backs off and retries on the
/// same session flow; a session-fatal failure poisons the checked-out
/// session so the next attempt gets a fresh one.
async fn run_task(
    config: Arc<Config>,
    pool: Arc<SessionPool<BrowserFactory>>,
    task: CrawlTask,
    cancel: CancelFlag,
) -> TaskOutcome {
    let max_attempts = config.retry.max_attempts;
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            info!("cancellation observed, skipping task {}", task);
            return TaskOutcome::Cancelled;
        }

        let mut guard = match pool.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                error!("could not acquire session for {}: {}", task, e);
                return TaskOutcome::Failed;
            }
        };

        match crawl_task(&guard, &config, &task).await {
            Ok(venues) => {
                let path =
                    artifacts::artifact_path(&config.data_dir, Stage::Discovery, &task.key());
                if let Err(e) = artifacts::write_json(&path, &venues) {
                    error!("failed to write artifact for {}: {}", task, e);
                    return TaskOutcome::Failed;
                }
                info!("{}: collected {} venues", task, venues.len());
                return TaskOutcome::Completed(venues.len());
            }
            Err(e) => {
                if e.is_session_fatal() {
                    warn!(
                        "{}: session error on attempt {}/{}, replacing session: {}",
                        task, attempt, max_attempts, e
                    );
                    guard.poison();
                } else {
                    warn!("{}: attempt {}/{} failed: {}", task, attempt, max_attempts, e);
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

    error!("{}: giving up after {} attempts", task, max_attempts);
    counter!("nightspot_discovery_failures_total").increment(1);
    TaskOutcome::Failed
}

/// One full crawl attempt for a task: open the search view, walk result
/// pages until they stop yielding new venues or the page cap is reached,
/// dedup within the task by place id.
async fn crawl_task(
    session: &BrowserSession,
    config: &Config,
    task: &CrawlTask,
) -> Result<Vec<VenueRecord>> {
    let page = crawler::open_page(session, &kakao::search_url(task), config.page_wait_ms).await?;

    let mut by_id: BTreeMap<String, VenueRecord> = BTreeMap::new();
    for page_no in 1..=config.max_pages {
        let html = crawler::page_html(&page).await?;
        let before = by_id.len();
        for venue in kakao::parse_place_list(&html, task) {
            by_id.entry(venue.external_id.clone()).or_insert(venue);
        }
        let grew = by_id.len() > before;
        if page_no > 1 && !grew {
            break;
        }
        if page_no == config.max_pages {
            break;
        }
        if !advance_to_page(&page, page_no + 1).await? {
            break;
        }
        tokio::time::sleep(Duration::from_millis(config.page_wait_ms)).await;
    }

    if let Err(e) = page.close().await {
        warn!("failed to close search tab for {}: {}", task, e);
    }
    Ok(by_id.into_values().collect())
}

/// Drives the search view's pagination. Page 2 first needs the "more
/// places" control; after that the view shows page links in blocks of
/// five with a next-block arrow. Returns false when the control for the
/// requested page does not exist, i.e. the result list is exhausted.
async fn advance_to_page(page: &chromiumoxide::Page, target: u32) -> Result<bool> {
    if target == 2 {
        if !crawler::click_by_id(page, kakao::MORE_PLACES_ID).await? {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        // The expanded list starts on page 1; move to page 2 explicitly.
        return crawler::click_by_id(page, &kakao::page_link_id(2)).await;
    }
    let slot = ((target - 1) % 5) + 1;
    if slot == 1 {
        crawler::click_by_id(page, kakao::NEXT_PAGE_BLOCK_ID).await
    } else {
        crawler::click_by_id(page, &kakao::page_link_id(slot)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.regions = vec!["강남역".into(), "홍대입구역".into()];
        config.categories = vec!["클럽".into(), "술집".into()];
        config.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn tasks_are_the_cross_product() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let tasks = all_tasks(&config);
        assert_eq!(tasks.len(), 4);
        assert!(tasks.contains(&CrawlTask::new("홍대입구역", "술집")));
    }

    #[test]
    fn completed_tasks_are_not_pending() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        // Mark one task as already done
        let done = CrawlTask::new("강남역", "클럽");
        let path = artifacts::artifact_path(&config.data_dir, Stage::Discovery, &done.key());
        artifacts::write_json(&path, &Vec::<VenueRecord>::new()).unwrap();

        let pending = pending_tasks(&config);
        assert_eq!(pending.len(), 3);
        assert!(!pending.contains(&done));
    }
}
