#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use billtrack_adapters::{FetchedPage, PageError, PageSource};
use billtrack_core::{BillRecord, VectorMetadata, VectorRecord};
use billtrack_storage::RecordSink;
use billtrack_sync::SyncConfig;

pub const SOURCE_URL: &str = "https://site.test/legislation";

/// In-memory site that records every URL requested.
#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    /// Landing page plus `pages` listing pages holding `titles`, `per_page` at a time, and one
    /// detail page per title.
    pub fn with_bills(mut self, signed: u64, titles: &[String], per_page: usize) -> Self {
        self.pages.insert(SOURCE_URL.to_string(), landing_html(signed));
        let chunks: Vec<_> = titles.chunks(per_page.max(1)).collect();
        for (n, chunk) in chunks.iter().enumerate() {
            let next = (n + 1 < chunks.len()).then(|| listing_url(n + 1));
            self.pages
                .insert(listing_url(n), listing_html(chunk, next.as_deref()));
        }
        for title in titles {
            self.pages.insert(detail_url(title), detail_html(title));
        }
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, pred: impl Fn(&str) -> bool) -> usize {
        self.fetched().iter().filter(|u| pred(u)).count()
    }
}

#[async_trait]
impl PageSource for FakeSite {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, PageError> {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                url: url.to_string(),
                body: body.clone(),
            }),
            None => Err(PageError::Unavailable {
                url: url.to_string(),
                reason: "404".to_string(),
            }),
        }
    }
}

pub fn titles(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("S{i}")).collect()
}

pub fn listing_url(page: usize) -> String {
    if page == 0 {
        "https://site.test/search/legislation?type=bill".to_string()
    } else {
        format!("https://site.test/search/legislation?type=bill&page={page}")
    }
}

pub fn detail_url(title: &str) -> String {
    format!("https://site.test/legislation/bills/2025/{title}")
}

pub fn landing_html(signed: u64) -> String {
    format!(
        r#"<html><body><section class="c-by-the-numbers"><div class="c-carousel">
<div class="c-carousel--item"><h4 class="c-stat">1,482</h4><p class="c-stat--descript">Bills Passed by the Senate</p></div>
<div class="c-carousel--item"><h4 class="c-stat">{signed}</h4><p class="c-stat--descript">Bills Signed into Law</p></div>
</div></section></body></html>"#
    )
}

pub fn listing_html(titles: &[String], next: Option<&str>) -> String {
    let mut html = String::from("<html><body><div class=\"c-search-results\">");
    for title in titles {
        html.push_str(&format!(
            r#"<article class="c-block"><h3 class="c-bill-num"><a href="/legislation/bills/2025/{title}">{title}</a></h3>
<p class="c-bill-descript">Relates to {title}</p>
<p class="c-press-release--date"><span class="date-display-single">January 09, 2025</span></p></article>"#
        ));
    }
    html.push_str("</div>");
    if let Some(next) = next {
        html.push_str(&format!(
            r#"<ul class="pager"><li class="pager__item--next"><a href="{}">next</a></li></ul>"#,
            next.replace('&', "&amp;")
        ));
    }
    html.push_str("</body></html>");
    html
}

pub fn detail_html(title: &str) -> String {
    format!(
        r#"<html><body><div class="c-detail--header__bill">{title}</div>
<span class="c-bill--flag">Signed By Governor</span>
<a class="c-detail--download" href="/legislation/bills/2025/{title}/download">PDF</a>
<table class="c-bill--actions-table"><tr><td class="c-bill--actions-table-col1">Mar 03, 2025</td><td class="c-bill--actions-table-col2">SIGNED CHAP.12</td></tr></table>
</body></html>"#
    )
}

pub fn record(title: &str) -> BillRecord {
    BillRecord {
        title: title.to_string(),
        description: format!("Relates to {title}"),
        status: "Signed By Governor".to_string(),
        pdf_url: None,
        signed_date: "Mar 03, 2025".to_string(),
        issued_date: "January 09, 2025".to_string(),
        source_url: detail_url(title),
    }
}

pub async fn seed_sink(root: &Path, titles: &[String]) -> RecordSink {
    let sink = RecordSink::open(root).await.unwrap();
    for title in titles {
        sink.insert_if_absent(&record(title)).await.unwrap();
    }
    sink
}

pub fn vectors(titles: &[String], dimension: usize) -> Vec<VectorRecord> {
    titles
        .iter()
        .map(|t| VectorRecord {
            id: t.to_lowercase(),
            values: vec![1.0 / (dimension as f32).sqrt(); dimension],
            metadata: VectorMetadata {
                title: t.clone(),
                ..VectorMetadata::default()
            },
        })
        .collect()
}

pub fn test_config(root: &Path, dimension: u32) -> SyncConfig {
    test_config_with(root, dimension, &[])
}

/// Like [`test_config`], with extra environment entries layered on top.
pub fn test_config_with(root: &Path, dimension: u32, extra: &[(&str, &str)]) -> SyncConfig {
    let storage = root.join("storage").display().to_string();
    let reports = root.join("reports").display().to_string();
    let dimension = dimension.to_string();
    SyncConfig::from_lookup(|key| {
        if let Some((_, value)) = extra.iter().find(|(k, _)| *k == key) {
            return Some(value.to_string());
        }
        match key {
            "BILLTRACK_STORAGE_DIR" => Some(storage.clone()),
            "BILLTRACK_REPORTS_DIR" => Some(reports.clone()),
            "BILLTRACK_SOURCE_URL" => Some(SOURCE_URL.to_string()),
            "BILLTRACK_INDEX_DIMENSION" => Some(dimension.clone()),
            "BILLTRACK_INDEX_SETTLE_SECS" => Some("0".to_string()),
            _ => None,
        }
    })
}
