//! "Bills signed into law" statistic on the legislation landing page.

use std::str::FromStr;

use billtrack_core::CountObservation;
use scraper::{ElementRef, Html};
use tracing::{info, warn};

use crate::{element_text, selector, PageError, PageSource};

pub const SIGNED_LABEL: &str = "signed into law";

const STAT_SELECTOR: &str = ".c-stat";
const STAT_ITEM_CLASS: &str = "c-carousel--item";
const STAT_LABEL_SELECTOR: &str = ".c-stat--descript";
const NUMBERS_HEADING_SELECTOR: &str = ".c-by-the-numbers h4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    /// Pick the statistic whose label mentions bills signed into law.
    #[default]
    Labelled,
    /// Take the first statistic on the page, whatever its label.
    FirstStatistic,
}

impl FromStr for CountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "labelled" | "labeled" => Ok(Self::Labelled),
            "first-statistic" | "first_statistic" | "first" => Ok(Self::FirstStatistic),
            other => Err(format!("unknown count mode {other:?}")),
        }
    }
}

/// First run of ASCII digits in `text`.
pub fn first_number(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn stat_label(stat: ElementRef<'_>) -> Option<String> {
    let label_sel = selector(STAT_LABEL_SELECTOR).ok()?;
    stat.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().classes().any(|c| c == STAT_ITEM_CLASS))
        .and_then(|item| item.select(&label_sel).next())
        .map(element_text)
}

fn labelled_stat_text(document: &Html) -> Result<Option<String>, PageError> {
    let stat_sel = selector(STAT_SELECTOR)?;
    for stat in document.select(&stat_sel) {
        let Some(label) = stat_label(stat) else {
            continue;
        };
        if label.to_lowercase().contains(SIGNED_LABEL) {
            return Ok(Some(element_text(stat)));
        }
    }

    // Older layout renders the label inline: "89 Bills Signed into Law".
    let heading_sel = selector(NUMBERS_HEADING_SELECTOR)?;
    Ok(document
        .select(&stat_sel)
        .chain(document.select(&heading_sel))
        .map(element_text)
        .find(|text| text.to_lowercase().contains(SIGNED_LABEL)))
}

fn first_stat_text(document: &Html) -> Result<Option<String>, PageError> {
    for css in ["h4.c-stat", STAT_SELECTOR, NUMBERS_HEADING_SELECTOR] {
        let sel = selector(css)?;
        if let Some(el) = document.select(&sel).next() {
            return Ok(Some(element_text(el)));
        }
    }
    Ok(None)
}

/// Extracts the signed-bills count from the legislation landing page.
pub fn parse_signed_count(url: &str, html: &str, mode: CountMode) -> Result<u64, PageError> {
    let document = Html::parse_document(html);
    let text = match mode {
        CountMode::Labelled => labelled_stat_text(&document)?,
        CountMode::FirstStatistic => first_stat_text(&document)?,
    };
    let text = text.ok_or_else(|| PageError::MissingElement {
        selector: STAT_SELECTOR.to_string(),
        url: url.to_string(),
    })?;
    first_number(&text).ok_or(PageError::Unparseable {
        what: "signed bill count",
        text,
    })
}

/// Probes the live site. Failures are reported as [`CountObservation::Unavailable`].
pub async fn probe_source_count(
    source: &dyn PageSource,
    url: &str,
    mode: CountMode,
) -> CountObservation {
    let result = match source.fetch_page(url).await {
        Ok(page) => parse_signed_count(&page.url, &page.body, mode),
        Err(err) => Err(err),
    };
    match result {
        Ok(count) => {
            info!(url, count, "current number of bills signed into law");
            CountObservation::Observed(count)
        }
        Err(err) => {
            warn!(url, error = %err, "error checking bill count");
            CountObservation::unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_fixture;
    use crate::FetchedPage;
    use async_trait::async_trait;

    const URL: &str = "https://www.nysenate.gov/legislation";

    struct StaticPage(Result<String, String>);

    #[async_trait]
    impl PageSource for StaticPage {
        async fn fetch_page(&self, url: &str) -> Result<FetchedPage, PageError> {
            match &self.0 {
                Ok(body) => Ok(FetchedPage {
                    url: url.to_string(),
                    body: body.clone(),
                }),
                Err(reason) => Err(PageError::Unavailable {
                    url: url.to_string(),
                    reason: reason.clone(),
                }),
            }
        }
    }

    #[test]
    fn count_mode_parses_from_config_strings() {
        assert_eq!("labelled".parse::<CountMode>().unwrap(), CountMode::Labelled);
        assert_eq!(
            " First-Statistic ".parse::<CountMode>().unwrap(),
            CountMode::FirstStatistic
        );
        assert!("positional".parse::<CountMode>().is_err());
    }

    #[test]
    fn first_number_takes_leading_digit_run() {
        assert_eq!(first_number("89 Bills Signed into Law"), Some(89));
        assert_eq!(first_number("  total: 1,482"), Some(1));
        assert_eq!(first_number("none"), None);
    }

    #[test]
    fn labelled_mode_selects_by_label_not_position() {
        let html = read_fixture("legislation.html");
        assert_eq!(parse_signed_count(URL, &html, CountMode::Labelled).unwrap(), 89);
        assert_eq!(
            parse_signed_count(URL, &html, CountMode::FirstStatistic).unwrap(),
            1
        );
    }

    #[test]
    fn inline_label_heading_is_accepted() {
        let html = r#"<div class="c-by-the-numbers"><h4>Bills Passed 900</h4><h4>73 Bills Signed into Law</h4></div>"#;
        assert_eq!(parse_signed_count(URL, html, CountMode::Labelled).unwrap(), 73);
    }

    #[test]
    fn page_without_matching_label_is_an_error() {
        let html = r#"<div class="c-carousel--item"><h4 class="c-stat">12</h4><p class="c-stat--descript">Resolutions</p></div>"#;
        let err = parse_signed_count(URL, html, CountMode::Labelled).unwrap_err();
        assert!(matches!(err, PageError::MissingElement { .. }));
    }

    #[tokio::test]
    async fn probe_maps_failures_to_unavailable() {
        let down = StaticPage(Err("connection refused".into()));
        let observed = probe_source_count(&down, URL, CountMode::Labelled).await;
        assert!(!observed.is_available());

        let garbled = StaticPage(Ok(
            r#"<div class="c-carousel--item"><h4 class="c-stat">many</h4><p class="c-stat--descript">Signed into law</p></div>"#.into(),
        ));
        let observed = probe_source_count(&garbled, URL, CountMode::Labelled).await;
        assert!(matches!(observed, CountObservation::Unavailable { .. }));

        let live = StaticPage(Ok(read_fixture("legislation.html")));
        let observed = probe_source_count(&live, URL, CountMode::Labelled).await;
        assert_eq!(observed, CountObservation::Observed(89));
    }
}
