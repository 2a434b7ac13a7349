use billtrack_core::BillStub;
use scraper::Html;

use crate::{
    element_text, parse_base, require_element, resolve_href, select_first_text, selector,
    PageError,
};

pub const LISTING_ENTRY_SELECTOR: &str = "article.c-block";
const TITLE_ANCHOR_SELECTOR: &str = "h3.c-bill-num a";
const DESCRIPTION_SELECTOR: &str = "p.c-bill-descript";
const ISSUED_DATE_SELECTOR: &str = "p.c-press-release--date span.date-display-single";
const NEXT_PAGE_SELECTOR: &str = "li.pager__item--next a[href]";

/// Stubs and pagination extracted from one search-results page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingPage {
    pub stubs: Vec<BillStub>,
    pub next_page: Option<String>,
    /// Entries dropped because their title anchor had no usable link.
    pub skipped_entries: usize,
}

pub fn parse_listing(page_url: &str, html: &str) -> Result<ListingPage, PageError> {
    let base = parse_base(page_url)?;
    let document = Html::parse_document(html);
    require_element(&document, LISTING_ENTRY_SELECTOR, page_url)?;

    let entry_sel = selector(LISTING_ENTRY_SELECTOR)?;
    let anchor_sel = selector(TITLE_ANCHOR_SELECTOR)?;

    let mut page = ListingPage::default();
    for entry in document.select(&entry_sel) {
        let link = entry.select(&anchor_sel).next().and_then(|anchor| {
            let href = anchor.value().attr("href")?;
            let url = resolve_href(&base, href)?;
            Some((element_text(anchor), url))
        });
        let Some((title, source_url)) = link else {
            page.skipped_entries += 1;
            continue;
        };

        page.stubs.push(BillStub {
            title,
            source_url,
            description: select_first_text(entry, DESCRIPTION_SELECTOR)?.unwrap_or_default(),
            issued_date: select_first_text(entry, ISSUED_DATE_SELECTOR)?.unwrap_or_default(),
        });
    }

    let next_sel = selector(NEXT_PAGE_SELECTOR)?;
    page.next_page = document
        .select(&next_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_href(&base, href));

    Ok(page)
}
