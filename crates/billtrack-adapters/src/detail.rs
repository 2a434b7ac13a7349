use billtrack_core::BillDetail;
use scraper::Html;

use crate::{element_text, parse_base, require_element, resolve_href, selector, PageError};

pub const DETAIL_HEADER_SELECTOR: &str = ".c-detail--header__bill";
const PDF_LINK_SELECTOR: &str = "a.c-detail--download";
const STATUS_SELECTOR: &str = "span.c-bill--flag";
const ACTION_ROW_SELECTOR: &str = ".c-bill--actions-table tr";
const ACTION_DATE_SELECTOR: &str = ".c-bill--actions-table-col1";
const ACTION_TEXT_SELECTOR: &str = ".c-bill--actions-table-col2";

/// Extracts status, PDF link and signing date from a bill page.
///
/// The signed date comes from the first action row mentioning "signed"; later matches (chapter
/// amendments and the like) are ignored.
pub fn parse_detail(page_url: &str, html: &str) -> Result<BillDetail, PageError> {
    let base = parse_base(page_url)?;
    let document = Html::parse_document(html);
    require_element(&document, DETAIL_HEADER_SELECTOR, page_url)?;

    let pdf_sel = selector(PDF_LINK_SELECTOR)?;
    let pdf_url = document
        .select(&pdf_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_href(&base, href));

    let status_sel = selector(STATUS_SELECTOR)?;
    let status = document
        .select(&status_sel)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let row_sel = selector(ACTION_ROW_SELECTOR)?;
    let date_sel = selector(ACTION_DATE_SELECTOR)?;
    let action_sel = selector(ACTION_TEXT_SELECTOR)?;
    let signed_date = document
        .select(&row_sel)
        .find_map(|row| {
            let date = row.select(&date_sel).next()?;
            let action = row.select(&action_sel).next()?;
            element_text(action)
                .to_lowercase()
                .contains("signed")
                .then(|| element_text(date))
        })
        .unwrap_or_default();

    Ok(BillDetail {
        status,
        pdf_url,
        signed_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_fixture;

    const URL: &str = "https://www.nysenate.gov/legislation/bills/2025/S1234";

    #[test]
    fn extracts_status_pdf_and_first_signed_action() {
        let detail = parse_detail(URL, &read_fixture("detail_S1234.html")).unwrap();
        assert_eq!(detail.status, "Signed By Governor");
        assert_eq!(
            detail.pdf_url.as_deref(),
            Some("https://www.nysenate.gov/legislation/bills/2025/S1234/amendment/original/download")
        );
        assert_eq!(detail.signed_date, "Mar 03, 2025");
    }

    #[test]
    fn missing_optional_fields_stay_empty() {
        let detail = parse_detail(URL, &read_fixture("detail_unsigned.html")).unwrap();
        assert_eq!(detail, BillDetail::default());
    }

    #[test]
    fn page_without_header_is_rejected() {
        let err = parse_detail(URL, "<html><body>Access denied</body></html>").unwrap_err();
        match err {
            PageError::MissingElement { selector, url } => {
                assert_eq!(selector, DETAIL_HEADER_SELECTOR);
                assert_eq!(url, URL);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
