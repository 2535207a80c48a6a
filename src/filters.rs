//! Business-rule filter passes.
//!
//! Two pure passes over merged venue data: the hours/category pass (stage
//! 1 artifacts to stage 3, applied per task artifact) and the review-count
//! pass (stage 4 to stage 5). Filters never edit record fields, only
//! membership, so every stage-5 survivor is by construction a stage-3
//! survivor.

use crate::artifacts::{self, Stage};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::StageSummary;
use crate::types::VenueRecord;
use chrono::Weekday;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

/// Outcome of parsing raw business-hours text. Irregular text is an
/// explicit variant, not an error: the caller applies a default policy
/// (exclude from the late-operating set) instead of unwinding.
#[derive(Debug, Clone, PartialEq)]
pub enum HoursParse {
    Parsed(WeeklyHours),
    Unparseable,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeeklyHours {
    pub entries: Vec<DayEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayEntry {
    pub days: Vec<Weekday>,
    pub span: DaySpan,
}

/// One day's operating span, in minutes since midnight. `end` at or before
/// `start` means the span wraps past midnight (22:00 ~ 02:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySpan {
    Open { start: u32, end: u32 },
    AllDay,
    Closed,
}

static TIME_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})\s*~\s*(\d{1,2}):(\d{2})").unwrap());
static DAY_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"매일|[월화수목금토일](?:\s*[,~]\s*[월화수목금토일])*").unwrap()
});

const WEEK: [(char, Weekday); 7] = [
    ('월', Weekday::Mon),
    ('화', Weekday::Tue),
    ('수', Weekday::Wed),
    ('목', Weekday::Thu),
    ('금', Weekday::Fri),
    ('토', Weekday::Sat),
    ('일', Weekday::Sun),
];

fn day_for(token: char) -> Option<Weekday> {
    WEEK.iter().find(|(c, _)| *c == token).map(|(_, d)| *d)
}

fn day_index(day: Weekday) -> usize {
    day.num_days_from_monday() as usize
}

fn all_days() -> Vec<Weekday> {
    WEEK.map(|(_, d)| d).to_vec()
}

/// Expands a day expression like "매일", "월~금" or "금,토" into concrete
/// weekdays. Ranges are cyclic, so "금~월" covers the weekend.
fn parse_days(expr: &str) -> Vec<Weekday> {
    if expr.contains("매일") {
        return all_days();
    }
    let mut days = Vec::new();
    for part in expr.split(',') {
        let part = part.trim();
        let tokens: Vec<char> = part
            .chars()
            .filter(|c| day_for(*c).is_some() || *c == '~')
            .collect();
        match tokens.as_slice() {
            [single] => {
                if let Some(day) = day_for(*single) {
                    days.push(day);
                }
            }
            [from, '~', to] => {
                if let (Some(from), Some(to)) = (day_for(*from), day_for(*to)) {
                    let mut index = day_index(from);
                    loop {
                        days.push(WEEK[index].1);
                        if index == day_index(to) {
                            break;
                        }
                        index = (index + 1) % 7;
                    }
                }
            }
            _ => {}
        }
    }
    days.dedup();
    days
}

/// Parses raw hours text like "영업시간 매일 22:00 ~ 06:00", "24시간" or
/// "월~금 18:00 ~ 01:00 · 일 휴무". Segments are separated by a middle
/// dot; a segment without a day expression applies to every day. Text
/// yielding no recognizable segment at all is `Unparseable`.
pub fn parse_hours(text: &str) -> HoursParse {
    let mut entries = Vec::new();

    for segment in text.split('·') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let days = DAY_TOKENS
            .find(segment)
            .map(|m| parse_days(m.as_str()))
            .filter(|days| !days.is_empty())
            .unwrap_or_else(all_days);

        let span = if segment.contains("24시간") {
            DaySpan::AllDay
        } else if segment.contains("휴무") {
            DaySpan::Closed
        } else if let Some(caps) = TIME_SPAN.captures(segment) {
            match span_from_captures(&caps) {
                Some(span) => span,
                None => continue,
            }
        } else {
            continue;
        };

        entries.push(DayEntry { days, span });
    }

    if entries.is_empty() {
        HoursParse::Unparseable
    } else {
        HoursParse::Parsed(WeeklyHours { entries })
    }
}

fn span_from_captures(caps: &regex::Captures<'_>) -> Option<DaySpan> {
    let number = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    let (sh, sm, eh, em) = (number(1)?, number(2)?, number(3)?, number(4)?);
    if sh > 24 || eh > 24 || sm > 59 || em > 59 {
        return None;
    }
    Some(DaySpan::Open {
        start: sh * 60 + sm,
        end: eh * 60 + em,
    })
}

/// Whether a schedule qualifies as late-operating: open around the clock,
/// open at or after `late_hour`, closing at or before `early_close_hour`
/// in the morning, or a span that wraps past midnight, on any day.
pub fn is_late_operating(hours: &WeeklyHours, late_hour: u32, early_close_hour: u32) -> bool {
    hours.entries.iter().any(|entry| match entry.span {
        DaySpan::AllDay => true,
        DaySpan::Closed => false,
        DaySpan::Open { start, end } => {
            // Midnight close is a wrap end, not an empty span
            let end = if end == 0 { 24 * 60 } else { end };
            if start < end {
                start >= late_hour * 60 || end <= early_close_hour * 60
            } else {
                true
            }
        }
    })
}

/// The stage-3 membership predicate: category match AND late operation.
/// Unparseable hours exclude the venue rather than failing the stage.
pub fn venue_passes_hours(venue: &VenueRecord, config: &Config) -> bool {
    let category_ok = venue.category.as_deref().map_or(false, |category| {
        config
            .category_filters
            .iter()
            .any(|wanted| category.contains(wanted.as_str()))
    });
    if !category_ok {
        return false;
    }

    match venue.hours_text.as_deref() {
        Some(text) => match parse_hours(text) {
            HoursParse::Parsed(hours) => {
                is_late_operating(&hours, config.late_hour, config.early_close_hour)
            }
            HoursParse::Unparseable => {
                debug!(
                    "excluding '{}': unparseable hours text '{}'",
                    venue.name, text
                );
                false
            }
        },
        None => false,
    }
}

/// Hours/category pass, stage 1 to stage 3. Applied per task artifact so
/// the stage-3 output stays per-task and the merger can run after it.
pub fn run_hours_filter(config: &Config) -> Result<StageSummary> {
    let mut summary = StageSummary::new(Stage::HoursFiltered.dir_name());

    for path in artifacts::list_artifacts(&config.data_dir, Stage::Discovery)? {
        let venues: Vec<VenueRecord> = artifacts::read_json(&path)?;
        let total = venues.len();
        let kept: Vec<VenueRecord> = venues
            .into_iter()
            .filter(|venue| venue_passes_hours(venue, config))
            .collect();
        summary.processed += kept.len();
        summary.skipped += total - kept.len();

        let out = Stage::HoursFiltered.dir(&config.data_dir).join(
            path.file_name()
                .ok_or_else(|| crate::error::ScraperError::Parse(format!(
                    "artifact path without file name: {}",
                    path.display()
                )))?,
        );
        artifacts::write_json(&out, &kept)?;
    }

    info!(
        "hours/category pass kept {} venues, dropped {}",
        summary.processed, summary.skipped
    );
    Ok(summary)
}

/// Review-count pass, stage 4 to stage 5.
pub fn run_review_filter(config: &Config) -> Result<StageSummary> {
    let mut summary = StageSummary::new(Stage::ReviewFiltered.dir_name());

    let input = artifacts::artifact_path(
        &config.data_dir,
        Stage::FilteredCombined,
        Stage::COMBINED_KEY,
    );
    let venues: Vec<VenueRecord> = artifacts::read_json(&input)?;
    let total = venues.len();
    let kept: Vec<VenueRecord> = venues
        .into_iter()
        .filter(|venue| venue.review_count >= config.min_review_count)
        .collect();
    summary.processed = kept.len();
    summary.skipped = total - kept.len();

    let out = artifacts::artifact_path(
        &config.data_dir,
        Stage::ReviewFiltered,
        Stage::COMBINED_KEY,
    );
    artifacts::write_json(&out, &kept)?;

    info!(
        "review-count pass kept {} venues, dropped {}",
        summary.processed, summary.skipped
    );
    Ok(summary)
}
