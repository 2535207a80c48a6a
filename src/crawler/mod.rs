//! Browser-side crawling: shared page helpers plus the discovery and
//! enrichment stage crawlers.

pub mod discovery;
pub mod enrichment;
pub mod kakao;

use crate::error::{Result, ScraperError};
use crate::session::BrowserSession;
use chromiumoxide::Page;
use std::time::Duration;

/// Hard ceiling on a single navigation; anything slower counts as a
/// transient failure and goes through the retry path.
const NAVIGATION_TIMEOUT_SECS: u64 = 30;

/// Opens `url` in a fresh tab and gives the page `wait_ms` to settle.
/// Kakao Map renders results with JavaScript after load, so the settle wait
/// is part of navigation, not politeness.
pub async fn open_page(session: &BrowserSession, url: &str, wait_ms: u64) -> Result<Page> {
    let page = tokio::time::timeout(
        Duration::from_secs(NAVIGATION_TIMEOUT_SECS),
        session.browser().new_page(url),
    )
    .await
    .map_err(|_| ScraperError::Timeout(format!("navigation to {url}")))??;
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    Ok(page)
}

pub async fn page_html(page: &Page) -> Result<String> {
    Ok(page.content().await?)
}

/// Clicks the element found by `js_element_expr` (a JS expression returning
/// an element or null). Returns whether anything was clicked.
async fn click_expr(page: &Page, js_element_expr: &str) -> Result<bool> {
    let script = format!(
        "(() => {{ const el = {js_element_expr}; if (el) {{ el.click(); return true; }} return false; }})()"
    );
    let result = page.evaluate(script).await?;
    Ok(result.into_value::<bool>().unwrap_or(false))
}

/// Kakao Map uses ids with dots in them ("info.search.place.more"), which
/// CSS selectors cannot express; go through getElementById.
pub async fn click_by_id(page: &Page, id: &str) -> Result<bool> {
    click_expr(page, &format!("document.getElementById('{id}')")).await
}

pub async fn click_selector(page: &Page, selector: &str) -> Result<bool> {
    click_expr(page, &format!("document.querySelector(\"{selector}\")")).await
}

/// Clicks every currently visible element matching `selector`; used to
/// unfold truncated review texts. Returns the click count.
pub async fn click_all(page: &Page, selector: &str) -> Result<u64> {
    let script = format!(
        "(() => {{ const els = document.querySelectorAll(\"{selector}\"); els.forEach(el => el.click()); return els.length; }})()"
    );
    let result = page.evaluate(script).await?;
    Ok(result.into_value::<u64>().unwrap_or(0))
}

pub async fn scroll_to_bottom(page: &Page) -> Result<()> {
    page.evaluate("window.scrollTo(0, document.body.scrollHeight)")
        .await?;
    Ok(())
}

/// Exponential backoff for attempt numbers starting at 1; capped so a
/// misconfigured attempt count cannot produce hour-long sleeps.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    Duration::from_millis(base_ms.saturating_mul(1 << exponent))
}

/// Outcome of one crawl unit (a discovery task or an enrichment venue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Artifact written; carries the record count.
    Completed(usize),
    /// Retries exhausted; logged and skipped, never fatal to the run.
    Failed,
    /// Run-level cancellation observed before the unit finished.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 3), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_delay(1000, 40), Duration::from_millis(64_000));
    }
}
