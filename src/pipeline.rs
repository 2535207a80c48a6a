//! Top-level orchestrator.
//!
//! One controlling flow owns stage sequencing and the session pool's
//! lifetime end-to-end: the pool is fully constructed before any task
//! acquires and is shut down as the final step of every crawler stage,
//! cancelled runs included. A stage fully completes (every unit has an
//! artifact or an exhausted retry budget) before the next stage reads
//! anything.

use crate::artifacts::{self, Stage};
use crate::config::Config;
use crate::crawler::{discovery, enrichment};
use crate::error::Result;
use crate::filters;
use crate::merge;
use crate::session::{BrowserFactory, SessionPool};
use crate::sink::{SqliteSink, VenueSink};
use crate::types::{ReviewRecord, VenueRecord};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-stage counts returned by every trigger entry point.
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            processed: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageSummary>,
    pub cancelled: bool,
}

/// Run-level cancellation signal. Crawl tasks check it between retry
/// attempts and before starting, never mid-page-load, so a cancelled run
/// cannot leave a partial artifact behind.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancelFlag::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for wiring an external signal (Ctrl-C, HTTP) to this run.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Stage 1: discovery crawl over the configured (region, category)
    /// cross-product.
    pub async fn run_discovery(&self) -> Result<StageSummary> {
        counter!("nightspot_discovery_runs_total").increment(1);
        let started = std::time::Instant::now();

        let pool = Arc::new(SessionPool::new(
            BrowserFactory::from_config(&self.config),
            self.config.pool_size,
        ));
        let summary =
            discovery::run_stage(Arc::clone(&self.config), Arc::clone(&pool), self.cancel.clone())
                .await;
        // Shutdown is unconditional; guards still in flight dispose on drop.
        pool.shutdown().await;

        histogram!("nightspot_discovery_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(summary)
    }

    /// Stages 2 through 5: merge, hours/category pass, merge, review-count
    /// pass. Pure file I/O, no sessions involved.
    pub fn run_filters(&self) -> Result<Vec<StageSummary>> {
        let mut stages = Vec::with_capacity(4);
        stages.push(merge::run_merge(
            &self.config.data_dir,
            Stage::Discovery,
            Stage::Combined,
        )?);
        stages.push(filters::run_hours_filter(&self.config)?);
        stages.push(merge::run_merge(
            &self.config.data_dir,
            Stage::HoursFiltered,
            Stage::FilteredCombined,
        )?);
        stages.push(filters::run_review_filter(&self.config)?);
        Ok(stages)
    }

    /// Stage 6: review enrichment for every stage-5 survivor.
    pub async fn run_enrichment(&self) -> Result<StageSummary> {
        counter!("nightspot_enrichment_runs_total").increment(1);
        let started = std::time::Instant::now();

        let pool = Arc::new(SessionPool::new(
            BrowserFactory::from_config(&self.config),
            self.config.pool_size,
        ));
        let result =
            enrichment::run_stage(Arc::clone(&self.config), Arc::clone(&pool), self.cancel.clone())
                .await;
        pool.shutdown().await;

        histogram!("nightspot_enrichment_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Final step: upsert stage-5 venues and stage-6 reviews into SQLite.
    pub async fn run_persistence(&self) -> Result<StageSummary> {
        let sink = SqliteSink::open(&self.config.db_path)?;
        self.persist_with(&sink).await
    }

    /// Sink-agnostic persistence, used directly by tests.
    pub async fn persist_with(&self, sink: &dyn VenueSink) -> Result<StageSummary> {
        let mut summary = StageSummary::new("persistence");

        let venues_path = artifacts::artifact_path(
            &self.config.data_dir,
            Stage::ReviewFiltered,
            Stage::COMBINED_KEY,
        );
        let venues: Vec<VenueRecord> = artifacts::read_json(&venues_path)?;
        let venue_counts = sink.upsert_venues(&venues).await?;
        summary.processed += venue_counts.total();

        let mut reviews: Vec<ReviewRecord> = Vec::new();
        for path in artifacts::list_artifacts(&self.config.data_dir, Stage::Reviews)? {
            let mut records: Vec<ReviewRecord> = artifacts::read_json(&path)?;
            reviews.append(&mut records);
        }
        let review_counts = sink.upsert_reviews(&reviews).await?;
        summary.processed += review_counts.total();

        info!(
            "persisted {} venues and {} reviews",
            venue_counts.total(),
            review_counts.total()
        );
        Ok(summary)
    }

    /// The full run: discovery, merges and filters, enrichment,
    /// persistence. Cancellation between stages skips the remainder but
    /// still reports what ran.
    pub async fn run_full(&self) -> Result<PipelineReport> {
        counter!("nightspot_pipeline_runs_total").increment(1);
        let started = std::time::Instant::now();
        let mut report = PipelineReport::default();

        report.stages.push(self.run_discovery().await?);

        if self.cancel.is_cancelled() {
            warn!("run cancelled after discovery");
            report.cancelled = true;
            return Ok(report);
        }
        report.stages.extend(self.run_filters()?);

        if self.cancel.is_cancelled() {
            warn!("run cancelled before enrichment");
            report.cancelled = true;
            return Ok(report);
        }
        report.stages.push(self.run_enrichment().await?);

        if self.cancel.is_cancelled() {
            warn!("run cancelled before persistence");
            report.cancelled = true;
            return Ok(report);
        }
        report.stages.push(self.run_persistence().await?);

        histogram!("nightspot_pipeline_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }
}
