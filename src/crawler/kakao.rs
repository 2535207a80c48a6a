//! HTML extraction for Kakao Map pages.
//!
//! Pure functions from rendered HTML to records, kept free of browser state
//! so they are testable against fixture snippets. Selectors follow the
//! map.kakao.com search view and the place.map.kakao.com review tab.

use crate::types::{CrawlTask, ReviewRecord, VenueRecord};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

pub const SEARCH_URL: &str = "https://map.kakao.com/";
pub const PLACE_URL: &str = "https://place.map.kakao.com/";

/// Result-list ids used by the search view's pagination controls. Kakao
/// puts dots in element ids, so these go through getElementById.
pub const MORE_PLACES_ID: &str = "info.search.place.more";
pub const NEXT_PAGE_BLOCK_ID: &str = "info.search.page.next";

pub fn page_link_id(slot: u32) -> String {
    format!("info.search.page.no{slot}")
}

pub fn search_url(task: &CrawlTask) -> String {
    // Chrome accepts raw UTF-8 in the query; only spaces need escaping.
    format!("{}?q={}", SEARCH_URL, task.query().replace(' ', "%20"))
}

pub fn place_url(external_id: &str) -> String {
    format!("{PLACE_URL}{external_id}")
}

/// The numeric place id is the final path segment of the detail-page link,
/// e.g. "https://place.map.kakao.com/26338954".
pub fn place_id_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
        Some(segment.to_string())
    } else {
        None
    }
}

static PLACE_ITEM: Lazy<Selector> =
    Lazy::new(|| Selector::parse("ul.placelist li.PlaceItem").unwrap());
static LINK_NAME: Lazy<Selector> = Lazy::new(|| Selector::parse("a.link_name").unwrap());
static SUB_CATEGORY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.subcategory").unwrap());
static ADDRESS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p[data-id='address']").unwrap());
static PERIOD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[data-id='periodTxt']").unwrap());
static PHONE: Lazy<Selector> = Lazy::new(|| Selector::parse("span.phone").unwrap());
static SCORE_NUM: Lazy<Selector> =
    Lazy::new(|| Selector::parse("em[data-id='scoreNum']").unwrap());
// The star-rating block has its own count anchor (data-id='numberofscore');
// the review count lives inside the review anchor.
static REVIEW_COUNT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[data-id='review'] em[data-id='numberofreview']").unwrap());
static MOREVIEW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[data-id='moreview']").unwrap());

static INNER_REVIEW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.inner_review").unwrap());
static REVIEWER_NAME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.link_user span.name_user").unwrap());
static REVIEW_TEXT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.link_review p.desc_review").unwrap());
static REVIEW_DATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.info_grade span.txt_date").unwrap());
static REVIEW_STARS_ON: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.wrap_grade span.figure_star.on").unwrap());

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

fn element_text(parent: ElementRef<'_>, selector: &Selector) -> Option<String> {
    parent.select(selector).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}

/// Parses one rendered search-result page into venue records. Entries
/// without a resolvable place id are dropped: the id is the dedup key and
/// a record without one can never be merged or enriched.
pub fn parse_place_list(html: &str, task: &CrawlTask) -> Vec<VenueRecord> {
    let document = Html::parse_document(html);
    let mut venues = Vec::new();

    for item in document.select(&PLACE_ITEM) {
        let name = item.select(&LINK_NAME).next().and_then(|el| {
            let title = el.value().attr("title").map(str::to_string);
            non_empty(title).or_else(|| {
                non_empty(Some(el.text().collect::<String>().trim().to_string()))
            })
        });
        let Some(name) = name else {
            continue;
        };

        let url = item
            .select(&MOREVIEW)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(str::to_string);
        let Some(external_id) = url.as_deref().and_then(place_id_from_url) else {
            continue;
        };

        // The period text mixes opening hours with break-time info after a
        // middle dot; only the first part is the schedule.
        let hours_text = non_empty(element_text(item, &PERIOD)).map(|text| {
            text.split('·').next().unwrap_or(&text).trim().to_string()
        });

        let review_count = element_text(item, &REVIEW_COUNT)
            .as_deref()
            .and_then(first_number)
            .unwrap_or(0);
        let rating = element_text(item, &SCORE_NUM)
            .and_then(|text| text.trim().parse::<f64>().ok());

        venues.push(VenueRecord {
            external_id,
            name,
            region: task.region.clone(),
            category: non_empty(element_text(item, &SUB_CATEGORY)),
            address: non_empty(element_text(item, &ADDRESS)),
            hours_text,
            review_count,
            rating,
            phone: non_empty(element_text(item, &PHONE)),
            url,
            source_task: task.key(),
            discovered_at: Utc::now(),
        });
    }

    venues
}

fn first_number(text: &str) -> Option<i64> {
    DIGITS
        .find(&text.replace(',', ""))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parses the rendered review tab of a detail page. Reviews without an
/// author or date are dropped; those two compose the review's external id
/// and the relational key downstream.
pub fn parse_reviews(html: &str, venue_external_id: &str) -> Vec<ReviewRecord> {
    let document = Html::parse_document(html);
    let mut reviews = Vec::new();

    for container in document.select(&INNER_REVIEW) {
        let Some(author) = non_empty(element_text(container, &REVIEWER_NAME)) else {
            continue;
        };
        let Some(written_at) = non_empty(element_text(container, &REVIEW_DATE)) else {
            continue;
        };

        // Star rating is rendered as filled star elements, not a number.
        let stars = container.select(&REVIEW_STARS_ON).count();
        let rating = if stars > 0 { Some(stars as f64) } else { None };

        let text = non_empty(element_text(container, &REVIEW_TEXT)).map(|t| {
            t.replace("더보기", "").replace("접기", "").trim().to_string()
        });

        reviews.push(ReviewRecord {
            external_id: ReviewRecord::compose_id(venue_external_id, &author, &written_at),
            venue_external_id: venue_external_id.to_string(),
            author,
            rating,
            text: text.filter(|t| !t.is_empty()),
            written_at,
        });
    }

    reviews
}
