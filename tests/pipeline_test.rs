use anyhow::Result;
use chrono::Utc;
use nightspot_scraper::artifacts::{self, Stage};
use nightspot_scraper::config::Config;
use nightspot_scraper::crawler::discovery;
use nightspot_scraper::pipeline::Pipeline;
use nightspot_scraper::sink::SqliteSink;
use nightspot_scraper::types::{CrawlTask, ReviewRecord, VenueRecord};
use std::collections::HashSet;
use std::path::Path;
use tempfile::tempdir;

fn venue(id: &str, task: &CrawlTask, category: &str, hours: &str, reviews: i64) -> VenueRecord {
    VenueRecord {
        external_id: id.to_string(),
        name: format!("venue {id}"),
        region: task.region.clone(),
        category: Some(category.to_string()),
        address: Some("서울 어딘가 1-2".to_string()),
        hours_text: Some(hours.to_string()),
        review_count: reviews,
        rating: Some(4.0),
        phone: None,
        url: Some(format!("https://place.map.kakao.com/{id}")),
        source_task: task.key(),
        discovered_at: Utc::now(),
    }
}

fn write_discovery_artifact(root: &Path, task: &CrawlTask, venues: &[VenueRecord]) {
    let path = artifacts::artifact_path(root, Stage::Discovery, &task.key());
    artifacts::write_json(&path, &venues.to_vec()).unwrap();
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.regions = vec!["강남역".into(), "홍대입구역".into()];
    config.categories = vec!["클럽".into(), "술집".into()];
    config.category_filters = vec!["클럽".into(), "술집".into()];
    config.min_review_count = 5;
    config.data_dir = root.to_path_buf();
    config.db_path = root.join("venues.db");
    config
}

fn read_combined(root: &Path, stage: Stage) -> Vec<VenueRecord> {
    artifacts::read_json(&artifacts::artifact_path(root, stage, Stage::COMBINED_KEY)).unwrap()
}

#[tokio::test]
async fn filter_stages_shrink_monotonically() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(dir.path());

    let club_task = CrawlTask::new("강남역", "클럽");
    let bar_task = CrawlTask::new("강남역", "술집");

    write_discovery_artifact(
        dir.path(),
        &club_task,
        &[
            // Late club with plenty of reviews: survives everything
            venue("1", &club_task, "나이트,클럽", "매일 22:00 ~ 06:00", 40),
            // Late club with too few reviews: dies at stage 5
            venue("2", &club_task, "나이트,클럽", "24시간", 2),
            // Daytime club: dies at stage 3
            venue("3", &club_task, "나이트,클럽", "매일 09:00 ~ 18:00", 99),
        ],
    );
    write_discovery_artifact(
        dir.path(),
        &bar_task,
        &[
            // Wrong category entirely: dies at stage 3
            venue("4", &bar_task, "베이커리", "매일 20:00 ~ 04:00", 50),
            // Late bar: survives
            venue("5", &bar_task, "호프,술집", "월~토 19:00 ~ 03:00", 10),
            // Unparseable hours: excluded by policy, not a crash
            venue("6", &bar_task, "호프,술집", "상세 정보 확인 요망", 50),
        ],
    );

    let pipeline = Pipeline::new(config);
    let summaries = pipeline.run_filters()?;
    assert_eq!(summaries.len(), 4);

    let combined = read_combined(dir.path(), Stage::Combined);
    assert_eq!(combined.len(), 6);

    let stage4 = read_combined(dir.path(), Stage::FilteredCombined);
    let stage5 = read_combined(dir.path(), Stage::ReviewFiltered);

    let stage4_ids: HashSet<&str> = stage4.iter().map(|v| v.external_id.as_str()).collect();
    let stage5_ids: HashSet<&str> = stage5.iter().map(|v| v.external_id.as_str()).collect();

    assert_eq!(stage4_ids, HashSet::from(["1", "2", "5"]));
    assert_eq!(stage5_ids, HashSet::from(["1", "5"]));
    // Monotonicity: every stage-5 survivor survived stage 3/4
    assert!(stage5_ids.is_subset(&stage4_ids));
    Ok(())
}

#[tokio::test]
async fn interrupted_discovery_resumes_to_the_same_merged_set() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(dir.path());

    let tasks = discovery::all_tasks(&config);
    assert_eq!(tasks.len(), 4);

    // "Interrupted" run: only the first two tasks produced artifacts.
    for task in &tasks[..2] {
        write_discovery_artifact(
            dir.path(),
            task,
            &[venue("10", task, "나이트,클럽", "24시간", 9)],
        );
    }
    let pending = discovery::pending_tasks(&config);
    assert_eq!(pending.len(), 2);
    assert_eq!(pending, tasks[2..].to_vec());

    // "Resumed" run completes exactly the pending tasks.
    for task in &pending {
        write_discovery_artifact(
            dir.path(),
            task,
            &[venue("20", task, "나이트,클럽", "24시간", 9)],
        );
    }
    assert!(discovery::pending_tasks(&config).is_empty());

    let pipeline = Pipeline::new(config);
    pipeline.run_filters()?;
    let merged = read_combined(dir.path(), Stage::Combined);
    let ids: HashSet<&str> = merged.iter().map(|v| v.external_id.as_str()).collect();
    // Same set an uninterrupted run over all four tasks would produce
    assert_eq!(ids, HashSet::from(["10", "20"]));
    Ok(())
}

#[tokio::test]
async fn persistence_is_idempotent_across_reruns() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(dir.path());

    let task = CrawlTask::new("강남역", "클럽");
    let survivors = vec![
        venue("1", &task, "나이트,클럽", "매일 22:00 ~ 06:00", 40),
        venue("2", &task, "나이트,클럽", "24시간", 30),
    ];
    artifacts::write_json(
        &artifacts::artifact_path(dir.path(), Stage::ReviewFiltered, Stage::COMBINED_KEY),
        &survivors,
    )?;

    let reviews = vec![ReviewRecord {
        external_id: ReviewRecord::compose_id("1", "밤손님", "2024.11.02."),
        venue_external_id: "1".into(),
        author: "밤손님".into(),
        rating: Some(5.0),
        text: Some("새벽까지 최고".into()),
        written_at: "2024.11.02.".into(),
    }];
    artifacts::write_json(
        &artifacts::artifact_path(dir.path(), Stage::Reviews, "1"),
        &reviews,
    )?;
    // Venue 2 was processed and had no reviews: empty artifact
    artifacts::write_json(
        &artifacts::artifact_path(dir.path(), Stage::Reviews, "2"),
        &Vec::<ReviewRecord>::new(),
    )?;

    let pipeline = Pipeline::new(config);
    let sink = SqliteSink::open_in_memory()?;

    let first = pipeline.persist_with(&sink).await?;
    assert_eq!(first.processed, 3); // 2 venues + 1 review

    // Re-running the sink step must not create duplicates
    let second = pipeline.persist_with(&sink).await?;
    assert_eq!(second.processed, 3);
    assert_eq!(second.failed, 0);
    Ok(())
}
