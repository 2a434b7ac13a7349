mod common;

use std::sync::Arc;

use billtrack_storage::RecordSink;
use billtrack_sync::{CrawlConfig, Crawler};
use common::*;

fn crawler(site: Arc<FakeSite>, sink: Arc<RecordSink>, max_requests: usize) -> Crawler {
    Crawler::new(
        site,
        sink,
        CrawlConfig {
            max_requests,
            ..CrawlConfig::default()
        },
    )
}

#[tokio::test]
async fn follows_every_listing_page_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(1..=25);
    let site = Arc::new(FakeSite::new().with_bills(25, &all, 5));
    let sink = Arc::new(RecordSink::open(dir.path()).await.unwrap());

    let report = crawler(site.clone(), sink.clone(), 1_000)
        .run(&[listing_url(0)])
        .await
        .unwrap();

    assert_eq!(report.listing_pages, 5);
    assert_eq!(site.fetch_count(|u| u.contains("/search/")), 5);
    assert_eq!(report.new_titles.len(), 25);
    assert_eq!(report.dropped_requests, 0);
    assert_eq!(sink.len().await, 25);
}

#[tokio::test]
async fn second_run_fetches_no_detail_pages() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(1..=8);
    let site = Arc::new(FakeSite::new().with_bills(8, &all, 4));

    let sink = Arc::new(RecordSink::open(dir.path()).await.unwrap());
    let first = crawler(site.clone(), sink, 100)
        .run(&[listing_url(0)])
        .await
        .unwrap();
    assert_eq!(first.new_titles.len(), 8);
    let before = std::fs::read_dir(dir.path()).unwrap().count();

    let sink = Arc::new(RecordSink::open(dir.path()).await.unwrap());
    let details_before = site.fetch_count(|u| u.contains("/bills/"));
    let second = crawler(site.clone(), sink.clone(), 100)
        .run(&[listing_url(0)])
        .await
        .unwrap();

    assert!(second.new_titles.is_empty());
    assert_eq!(second.skipped_existing, 8);
    assert_eq!(site.fetch_count(|u| u.contains("/bills/")), details_before);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), before);
    assert_eq!(sink.len().await, 8);
}

#[tokio::test]
async fn repeated_titles_and_start_urls_are_fetched_once() {
    let dir = tempfile::tempdir().unwrap();
    let dupes = vec!["S1".to_string(), "S2".to_string(), "S1".to_string()];
    let site = Arc::new(
        FakeSite::new()
            .page(listing_url(0), listing_html(&dupes, None))
            .page(detail_url("S1"), detail_html("S1"))
            .page(detail_url("S2"), detail_html("S2")),
    );
    let sink = Arc::new(RecordSink::open(dir.path()).await.unwrap());

    let report = crawler(site.clone(), sink.clone(), 100)
        .run(&[listing_url(0), listing_url(0)])
        .await
        .unwrap();

    assert_eq!(report.duplicate_requests, 2);
    assert_eq!(site.fetch_count(|u| u == detail_url("S1")), 1);
    assert_eq!(site.fetched().len(), 3);
    assert_eq!(sink.len().await, 2);
}

#[tokio::test]
async fn budget_caps_page_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(1..=30);
    let site = Arc::new(FakeSite::new().with_bills(30, &all, 10));
    let sink = Arc::new(RecordSink::open(dir.path()).await.unwrap());

    let report = crawler(site.clone(), sink, 6)
        .run(&[listing_url(0)])
        .await
        .unwrap();

    assert_eq!(report.pages_fetched, 6);
    assert_eq!(site.fetched().len(), 6);
    assert!(report.dropped_requests > 0);
}

#[tokio::test]
async fn broken_pages_fail_alone() {
    let dir = tempfile::tempdir().unwrap();
    let listed = vec!["S1".to_string(), "S404".to_string(), "S3".to_string()];
    let site = Arc::new(
        FakeSite::new()
            .page(listing_url(0), listing_html(&listed, Some(&listing_url(1))))
            .page(listing_url(1), "<html><body>maintenance</body></html>")
            .page(detail_url("S1"), detail_html("S1"))
            .page(detail_url("S3"), "<html><body>no header here</body></html>"),
    );
    let sink = Arc::new(RecordSink::open(dir.path()).await.unwrap());

    let report = crawler(site, sink.clone(), 100)
        .run(&[listing_url(0)])
        .await
        .unwrap();

    assert_eq!(report.new_titles, vec!["S1".to_string()]);
    assert_eq!(report.failed_pages, 3);
    assert_eq!(sink.len().await, 1);
}
