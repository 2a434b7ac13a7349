//! Page source contract and NY Senate page parsers (statistics, listing, bill detail).

mod count;
mod detail;
mod listing;

use async_trait::async_trait;
use billtrack_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

pub use count::{first_number, parse_signed_count, probe_source_count, CountMode, SIGNED_LABEL};
pub use detail::{parse_detail, DETAIL_HEADER_SELECTOR};
pub use listing::{parse_listing, ListingPage, LISTING_ENTRY_SELECTOR};

pub const CRATE_NAME: &str = "billtrack-adapters";

pub const DEFAULT_SOURCE_URL: &str = "https://www.nysenate.gov/legislation";
pub const DEFAULT_LISTING_URL: &str = "https://www.nysenate.gov/search/legislation?type=bill&session_year=2025&status=SIGNED_BY_GOV&is_active_version=1";

/// A fetched HTML document and the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("page {url} unavailable: {reason}")]
    Unavailable { url: String, reason: String },
    #[error("timed out waiting for {url}")]
    Timeout { url: String },
    #[error("no element matching `{selector}` on {url}")]
    MissingElement { selector: String, url: String },
    #[error("could not parse {what} from {text:?}")]
    Unparseable { what: &'static str, text: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
}

/// Capability that yields the HTML body of a URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, PageError>;
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, PageError> {
        let response = self
            .fetch_text(url)
            .await
            .map_err(|source| PageError::Fetch {
                url: url.to_string(),
                source,
            })?;
        Ok(FetchedPage {
            url: response.final_url,
            body: response.body,
        })
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, PageError> {
    Selector::parse(css).map_err(|e| PageError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// Element text with whitespace runs collapsed to single spaces.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn select_first_text(
    scope: ElementRef<'_>,
    css: &str,
) -> Result<Option<String>, PageError> {
    let sel = selector(css)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(element_text(n))))
}

pub(crate) fn require_element(document: &Html, css: &str, url: &str) -> Result<(), PageError> {
    let sel = selector(css)?;
    if document.select(&sel).next().is_none() {
        return Err(PageError::MissingElement {
            selector: css.to_string(),
            url: url.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn parse_base(url: &str) -> Result<Url, PageError> {
    Url::parse(url).map_err(|e| PageError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    pub fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/nysenate")
            .join(name)
    }

    pub fn read_fixture(name: &str) -> String {
        std::fs::read_to_string(fixture_path(name)).expect("read fixture")
    }
}
