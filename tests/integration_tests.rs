//! Integration tests for arxiv-harvest
//!
//! These tests run the client end to end against a local mock of the arXiv
//! query API and PDF host.

use arxiv_harvest::arxiv::DownloadTracker;
use arxiv_harvest::models::{
    DownloadOutcome, DownloadReport, PaperRecord, SortBy, SortOrder, TaskState,
};
use arxiv_harvest::{ArxivClient, ArxivError, ClientConfig, SearchCriteria};
use futures_util::StreamExt;
use mockito::{Matcher, Mock, ServerGuard};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const QUERY_PATH: &str = "/api/query";

fn test_config(server: &ServerGuard, download_dir: Option<&Path>) -> ClientConfig {
    config_for(&server.url(), download_dir)
}

fn config_for(host: &str, download_dir: Option<&Path>) -> ClientConfig {
    ClientConfig {
        base_url: format!("{}{}", host, QUERY_PATH),
        timeout_secs: 5.0,
        max_retries: 3,
        min_wait_secs: 0.01,
        max_wait_secs: 0.05,
        backoff_multiplier: 2.0,
        rate_limit_calls: 0,
        rate_limit_period_secs: 0.0,
        max_concurrent_requests: 3,
        page_size: 10,
        enable_downloader: download_dir.is_some(),
        download_dir: download_dir.map(Path::to_path_buf),
        ..Default::default()
    }
}

fn paper_id(n: usize) -> String {
    format!("2301.{:05}v1", n)
}

fn entry(n: usize, pdf_base: &str) -> String {
    let id = paper_id(n);
    format!(
        r#"
  <entry>
    <id>http://arxiv.org/abs/{id}</id>
    <updated>2023-01-{day:02}T10:00:00Z</updated>
    <published>2023-01-{day:02}T09:00:00Z</published>
    <title>Paper number {n}</title>
    <summary>Abstract of paper {n}.</summary>
    <author><name>Author {n}</name></author>
    <link href="http://arxiv.org/abs/{id}" rel="alternate" type="text/html"/>
    <link title="pdf" href="{pdf_base}/pdf/{id}" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="quant-ph" scheme="http://arxiv.org/schemas/atom"/>
    <category term="quant-ph" scheme="http://arxiv.org/schemas/atom"/>
  </entry>"#,
        id = id,
        n = n,
        day = n % 28 + 1,
        pdf_base = pdf_base
    )
}

fn feed(total: u64, start: u64, ids: Range<usize>, pdf_base: &str) -> String {
    let entries: String = ids.map(|n| entry(n, pdf_base)).collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/test</id>
  <updated>2024-01-01T00:00:00-05:00</updated>
  <opensearch:totalResults>{total}</opensearch:totalResults>
  <opensearch:startIndex>{start}</opensearch:startIndex>
  <opensearch:itemsPerPage>10</opensearch:itemsPerPage>{entries}
</feed>"#,
        total = total,
        start = start,
        entries = entries
    )
}

/// Mock one page request identified by its start offset and page size
async fn mock_page(
    server: &mut ServerGuard,
    start: u64,
    page_size: u64,
    body: String,
) -> Mock {
    server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("start".into(), start.to_string()),
            Matcher::UrlEncoded("max_results".into(), page_size.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/atom+xml")
        .with_body(body)
        .expect(1)
        .create_async()
        .await
}

async fn mock_pdf(server: &mut ServerGuard, n: usize, status: usize, hits: usize) -> Mock {
    server
        .mock("GET", format!("/pdf/{}", paper_id(n)).as_str())
        .with_status(status)
        .with_header("content-type", "application/pdf")
        .with_body(format!("%PDF-1.4 paper {}", n))
        .expect(hits)
        .create_async()
        .await
}

fn papers_for(server: &ServerGuard, ids: Range<usize>) -> Vec<PaperRecord> {
    papers_at(&server.url(), ids)
}

fn papers_at(host: &str, ids: Range<usize>) -> Vec<PaperRecord> {
    ids.map(|n| {
        let mut paper = PaperRecord::new(paper_id(n), format!("Paper number {}", n));
        paper.pdf_url = Some(format!("{}/pdf/{}", host, paper_id(n)));
        paper
    })
    .collect()
}

/// Host that reads each request, writes `head` and then holds the
/// connection open without finishing the response
async fn stalled_host(head: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(head.as_bytes()).await;
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

#[derive(Debug, Default)]
struct HostStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    failing_hits: AtomicUsize,
}

/// PDF host that answers every request after a delay, with 503 for any
/// path containing `failing`, and records peak request concurrency
async fn slow_pdf_host(failing: String, stats: Arc<HostStats>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let stats = Arc::clone(&stats);
            let failing = failing.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();

                let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;

                let response = if request.contains(&failing) {
                    stats.failing_hits.fetch_add(1, Ordering::SeqCst);
                    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string()
                } else {
                    let body = "%PDF-1.4 slow";
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                };
                stats.in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

// ========== SEARCH ==========

#[tokio::test]
async fn test_paginated_search_collects_all_pages() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let first = server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("search_query".into(), "quantum computing".into()),
            Matcher::UrlEncoded("start".into(), "0".into()),
            Matcher::UrlEncoded("max_results".into(), "10".into()),
            Matcher::UrlEncoded("sortBy".into(), "submittedDate".into()),
            Matcher::UrlEncoded("sortOrder".into(), "descending".into()),
        ]))
        .with_status(200)
        .with_body(feed(25, 0, 0..10, &base))
        .expect(1)
        .create_async()
        .await;
    let second = mock_page(&mut server, 10, 10, feed(25, 10, 10..20, &base)).await;
    let third = mock_page(&mut server, 20, 5, feed(25, 20, 20..25, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let criteria = SearchCriteria::query("quantum computing")
        .max_results(25)
        .sort_by(SortBy::Submitted)
        .sort_order(SortOrder::Descending);
    let result = client.search(criteria.clone()).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    third.assert_async().await;

    assert_eq!(result.papers.len(), 25);
    assert_eq!(result.total_results, 25);
    assert!(!result.has_next);
    assert_eq!(result.next_offset, 25);
    assert_eq!(result.metadata.pages_fetched, 3);
    assert_eq!(result.metadata.retries, 0);
    assert_eq!(result.metadata.source, "arxiv");
    assert_eq!(result.criteria, criteria);

    let ids: Vec<String> = result.papers.iter().map(|p| p.id.clone()).collect();
    let expected: Vec<String> = (0..25).map(paper_id).collect();
    assert_eq!(ids, expected);
    assert_eq!(result.papers[0].title, "Paper number 0");
    assert_eq!(result.papers[0].authors, vec!["Author 0"]);
}

#[tokio::test]
async fn test_partial_fetch_reports_has_next() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let first = mock_page(&mut server, 0, 10, feed(50, 0, 0..10, &base)).await;
    let second = mock_page(&mut server, 10, 5, feed(50, 10, 10..15, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client
        .search(SearchCriteria::query("electron").max_results(15))
        .await
        .unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(result.papers.len(), 15);
    assert_eq!(result.total_results, 50);
    assert!(result.has_next);
    assert_eq!(result.next_offset, 15);
}

#[tokio::test]
async fn test_duplicates_across_pages_are_dropped() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let first = mock_page(&mut server, 0, 10, feed(20, 0, 0..10, &base)).await;
    // upstream shifted: the second page overlaps the first by five entries
    let second = mock_page(&mut server, 10, 10, feed(20, 10, 5..15, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client.search(SearchCriteria::query("electron")).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(result.papers.len(), 15);
    assert_eq!(result.metadata.duplicates_dropped, 5);

    let ids: Vec<String> = result.papers.iter().map(|p| p.id.clone()).collect();
    let expected: Vec<String> = (0..15).map(paper_id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_offset_advances_by_entries_returned() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    // the first page under-delivers: 8 of the 10 requested
    let first = mock_page(&mut server, 0, 10, feed(12, 0, 0..8, &base)).await;
    let second = mock_page(&mut server, 8, 10, feed(12, 8, 8..12, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client.search(SearchCriteria::query("electron")).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(result.papers.len(), 12);
    assert!(!result.has_next);
    assert_eq!(result.metadata.pages_fetched, 2);
}

#[tokio::test]
async fn test_empty_page_stops_pagination() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let first = mock_page(&mut server, 0, 10, feed(30, 0, 0..10, &base)).await;
    let second = mock_page(&mut server, 10, 10, feed(30, 10, 0..0, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client.search(SearchCriteria::query("electron")).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(result.papers.len(), 10);
    assert_eq!(result.metadata.pages_fetched, 2);
    assert!(result.has_next);
}

#[tokio::test]
async fn test_zero_results_is_valid() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let only = mock_page(&mut server, 0, 10, feed(0, 0, 0..0, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client
        .search(SearchCriteria::query("nothing matches this"))
        .await
        .unwrap();

    only.assert_async().await;
    assert!(result.is_empty());
    assert_eq!(result.total_results, 0);
    assert!(!result.has_next);
}

#[tokio::test]
async fn test_total_drift_trusts_latest_page() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let first = mock_page(&mut server, 0, 10, feed(40, 0, 0..10, &base)).await;
    // the result set shrank between requests
    let second = mock_page(&mut server, 10, 10, feed(15, 10, 10..15, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client.search(SearchCriteria::query("electron")).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(result.papers.len(), 15);
    assert_eq!(result.total_results, 15);
    assert!(!result.has_next);
}

#[tokio::test]
async fn test_id_list_search() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let lookup = server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("id_list".into(), format!("{},{}", paper_id(1), paper_id(2))),
            Matcher::UrlEncoded("start".into(), "0".into()),
            Matcher::UrlEncoded("max_results".into(), "2".into()),
        ]))
        .with_status(200)
        .with_body(feed(2, 0, 1..3, &base))
        .expect(1)
        .create_async()
        .await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client
        .search(SearchCriteria::ids([paper_id(1), paper_id(2)]).max_results(2))
        .await
        .unwrap();

    lookup.assert_async().await;
    assert_eq!(result.papers.len(), 2);
    assert_eq!(result.papers[1].id, paper_id(2));
}

#[tokio::test]
async fn test_invalid_criteria_send_no_request() {
    let mut server = mockito::Server::new_async().await;
    let never = server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let both = SearchCriteria {
        query: Some("electron".to_string()),
        id_list: Some(vec![paper_id(1)]),
        ..Default::default()
    };
    assert!(matches!(client.search(both).await, Err(ArxivError::QueryBuild(_))));
    assert!(matches!(
        client.search(SearchCriteria::ids(Vec::<String>::new())).await,
        Err(ArxivError::QueryBuild(_))
    ));

    never.assert_async().await;
}

#[tokio::test]
async fn test_server_error_retries_then_fails() {
    let mut server = mockito::Server::new_async().await;
    let unavailable = server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(4)
        .create_async()
        .await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let err = client
        .search(SearchCriteria::query("electron"))
        .await
        .unwrap_err();

    unavailable.assert_async().await;
    match err {
        ArxivError::Http {
            status, attempts, ..
        } => {
            assert_eq!(status, Some(503));
            assert_eq!(attempts, 4);
        }
        other => panic!("expected HTTP error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limited_status_is_retried() {
    let mut server = mockito::Server::new_async().await;
    let limited = server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::Any)
        .with_status(429)
        .expect(4)
        .create_async()
        .await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let err = client
        .search(SearchCriteria::query("electron"))
        .await
        .unwrap_err();

    limited.assert_async().await;
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.attempts(), Some(4));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let missing = server
        .mock("GET", QUERY_PATH)
        .match_query(Matcher::Any)
        .with_status(400)
        .expect(1)
        .create_async()
        .await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let err = client
        .search(SearchCriteria::query("electron"))
        .await
        .unwrap_err();

    missing.assert_async().await;
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.attempts(), Some(1));
}

#[tokio::test]
async fn test_attempt_timeout_is_retried() {
    let host = stalled_host("").await;
    let config = ClientConfig {
        timeout_secs: 0.2,
        max_retries: 2,
        ..config_for(&host, None)
    };
    let client = ArxivClient::new(config).unwrap();

    let started = Instant::now();
    let err = client
        .search(SearchCriteria::query("electron"))
        .await
        .unwrap_err();

    match err {
        ArxivError::Http {
            status,
            attempts,
            message,
        } => {
            assert_eq!(status, None);
            assert_eq!(attempts, 3);
            assert!(message.contains("timed out"), "unexpected message: {}", message);
        }
        other => panic!("expected timeout exhaustion, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(client.session().available_permits(), 3);
}

#[tokio::test]
async fn test_malformed_page_fails_whole_search() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let first = mock_page(&mut server, 0, 10, feed(20, 0, 0..10, &base)).await;
    let broken = mock_page(&mut server, 10, 10, "<feed><entry>".to_string()).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let result = client.search(SearchCriteria::query("electron")).await;

    first.assert_async().await;
    broken.assert_async().await;
    assert!(matches!(result, Err(ArxivError::Parse(_))));
}

#[tokio::test]
async fn test_search_pages_stream() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let _first = mock_page(&mut server, 0, 10, feed(25, 0, 0..10, &base)).await;
    let _second = mock_page(&mut server, 10, 10, feed(25, 10, 10..20, &base)).await;
    let _third = mock_page(&mut server, 20, 5, feed(25, 20, 20..25, &base)).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let pages: Vec<_> = client
        .search_pages(SearchCriteria::query("quantum computing").max_results(25))
        .collect()
        .await;

    assert_eq!(pages.len(), 3);
    let sizes: Vec<usize> = pages
        .iter()
        .map(|p| p.as_ref().unwrap().papers.len())
        .collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    let offsets: Vec<u64> = pages.iter().map(|p| p.as_ref().unwrap().offset).collect();
    assert_eq!(offsets, vec![0, 10, 20]);
}

#[tokio::test]
async fn test_search_pages_stream_yields_error_once() {
    let server = mockito::Server::new_async().await;
    let client = ArxivClient::new(test_config(&server, None)).unwrap();

    let pages: Vec<_> = client
        .search_pages(SearchCriteria::default())
        .collect()
        .await;
    assert_eq!(pages.len(), 1);
    assert!(matches!(pages[0], Err(ArxivError::QueryBuild(_))));
}

#[tokio::test]
async fn test_rate_limit_spaces_requests() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let mut pages = Vec::new();
    for page in 0..5u64 {
        let start = page * 10;
        let ids = (start as usize)..(start as usize + 10);
        pages.push(mock_page(&mut server, start, 10, feed(50, start, ids, &base)).await);
    }

    let config = ClientConfig {
        rate_limit_calls: 2,
        rate_limit_period_secs: 0.3,
        ..test_config(&server, None)
    };
    let client = ArxivClient::new(config).unwrap();

    let started = Instant::now();
    let result = client.search(SearchCriteria::query("electron")).await.unwrap();
    assert_eq!(result.papers.len(), 50);
    // five grants at two per 0.3s need at least two full windows
    assert!(started.elapsed() >= Duration::from_millis(580));
    for page in &pages {
        page.assert_async().await;
    }
}

// ========== DOWNLOADS ==========

#[tokio::test]
async fn test_download_one_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new_async().await;
    let pdf = mock_pdf(&mut server, 1, 200, 1).await;

    let client = ArxivClient::new(test_config(&server, Some(dir.path()))).unwrap();
    let paper = papers_for(&server, 1..2).remove(0);
    let dest = dir.path().join(format!("{}.pdf", paper_id(1)));

    let first = client.download_one(&paper, None).await;
    assert_eq!(
        first,
        DownloadOutcome::Downloaded {
            path: dest.clone(),
            bytes: "%PDF-1.4 paper 1".len() as u64,
        }
    );

    let second = client.download_one(&paper, None).await;
    assert_eq!(second, DownloadOutcome::Skipped { path: dest.clone() });

    pdf.assert_async().await;
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "%PDF-1.4 paper 1");
    assert!(!dir.path().join(format!("{}.pdf.part", paper_id(1))).exists());
}

#[tokio::test]
async fn test_download_with_filename_override() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new_async().await;
    let pdf = mock_pdf(&mut server, 2, 200, 1).await;

    let client = ArxivClient::new(test_config(&server, Some(dir.path()))).unwrap();
    let paper = papers_for(&server, 2..3).remove(0);

    let outcome = client.download_one(&paper, Some("../reading/list.pdf")).await;
    pdf.assert_async().await;
    assert_eq!(outcome.path(), Some(&dir.path().join("list.pdf")));
    assert!(dir.path().join("list.pdf").exists());
}

#[tokio::test]
async fn test_failed_download_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new_async().await;
    let pdf = mock_pdf(&mut server, 3, 500, 4).await;

    let client = ArxivClient::new(test_config(&server, Some(dir.path()))).unwrap();
    let paper = papers_for(&server, 3..4).remove(0);

    let outcome = client.download_one(&paper, None).await;
    pdf.assert_async().await;
    assert!(matches!(outcome, DownloadOutcome::Failed { .. }));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_all_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new_async().await;
    let mut mocks = Vec::new();
    for n in 0..5 {
        if n == 3 {
            mocks.push(mock_pdf(&mut server, n, 404, 1).await);
        } else {
            mocks.push(mock_pdf(&mut server, n, 200, 1).await);
        }
    }

    let config = ClientConfig {
        max_concurrent_requests: 2,
        ..test_config(&server, Some(dir.path()))
    };
    let client = ArxivClient::new(config).unwrap();
    let papers = papers_for(&server, 0..5);

    let report = client.download_papers(&papers).await;
    for mock in &mocks {
        mock.assert_async().await;
    }

    let tracker = report.tracker().expect("downloads are enabled");
    assert_eq!(tracker.total, 5);
    assert_eq!(tracker.completed, 4);
    assert_eq!(tracker.failed, 1);
    assert!(tracker.is_finished());
    assert_eq!(tracker.progress(), 100.0);

    let failures = tracker.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, paper_id(3));
}

#[tokio::test]
async fn test_download_all_caps_concurrency_and_isolates_exhausted_retries() {
    let dir = tempfile::tempdir().unwrap();
    let stats = Arc::new(HostStats::default());
    let host = slow_pdf_host(paper_id(3), Arc::clone(&stats)).await;

    let config = ClientConfig {
        max_concurrent_requests: 2,
        ..config_for(&host, Some(dir.path()))
    };
    let client = ArxivClient::new(config).unwrap();
    let papers = papers_at(&host, 0..6);

    let report = client.download_papers(&papers).await;
    let tracker = report.tracker().expect("downloads are enabled");

    assert_eq!(stats.peak.load(Ordering::SeqCst), 2);
    // one initial attempt plus three retries
    assert_eq!(stats.failing_hits.load(Ordering::SeqCst), 4);

    assert_eq!((tracker.total, tracker.completed, tracker.failed), (6, 5, 1));
    let failures = tracker.failures();
    assert_eq!(failures[0].0, paper_id(3));
    assert!(failures[0].1.contains("503"), "unexpected reason: {}", failures[0].1);

    assert!(!dir.path().join(format!("{}.pdf", paper_id(3))).exists());
    assert!(!dir.path().join(format!("{}.pdf.part", paper_id(3))).exists());
    for n in [0, 1, 2, 4, 5] {
        assert!(dir.path().join(format!("{}.pdf", paper_id(n))).exists());
    }
}

#[tokio::test]
async fn test_download_tracked_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let stats = Arc::new(HostStats::default());
    let host = slow_pdf_host("no-such-paper".to_string(), Arc::clone(&stats)).await;

    let client = ArxivClient::new(config_for(&host, Some(dir.path()))).unwrap();
    let papers = papers_at(&host, 0..5);
    let tracker = DownloadTracker::new(papers.iter().map(|p| p.id.as_str()));

    let watch = async {
        let mut finished_counts = Vec::new();
        let mut max_in_flight = 0;
        loop {
            let snap = tracker.snapshot();
            assert!(snap.completed + snap.failed <= snap.total);
            let in_flight = snap
                .tasks
                .values()
                .filter(|t| **t == TaskState::InFlight)
                .count();
            max_in_flight = max_in_flight.max(in_flight);
            finished_counts.push(snap.completed + snap.failed);
            if snap.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        (finished_counts, max_in_flight)
    };

    let (report, (finished_counts, max_in_flight)) =
        tokio::join!(client.download_tracked(&papers, &tracker), watch);

    match report {
        DownloadReport::Finished(snap) => {
            assert_eq!((snap.total, snap.completed, snap.failed), (5, 5, 0));
        }
        DownloadReport::Disabled => panic!("downloads should be enabled"),
    }
    assert!(finished_counts.len() > 1);
    assert!(finished_counts.windows(2).all(|w| w[0] <= w[1]));
    assert!(max_in_flight >= 1 && max_in_flight <= 3);
    assert!(stats.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_close_mid_download_leaves_no_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let host = stalled_host(
        "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: 1000000\r\n\r\n%PDF-1.4 partial",
    )
    .await;

    let client = ArxivClient::new(config_for(&host, Some(dir.path()))).unwrap();
    let paper = papers_at(&host, 7..8).remove(0);
    let part = dir.path().join(format!("{}.pdf.part", paper_id(7)));

    let started = Instant::now();
    let (outcome, part_seen) = tokio::join!(client.download_one(&paper, None), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let seen = part.exists();
        client.session().shutdown();
        seen
    });

    assert!(part_seen, "body should be streaming when the session closes");
    match outcome {
        DownloadOutcome::Failed { reason } => {
            assert!(reason.contains("cancelled"), "unexpected reason: {}", reason)
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    // well inside the 5s attempt timeout
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_search_then_download_all() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let page = mock_page(&mut server, 0, 3, feed(3, 0, 0..3, &base)).await;
    let mut pdfs = Vec::new();
    for n in 0..3 {
        pdfs.push(mock_pdf(&mut server, n, 200, 1).await);
    }

    let client = ArxivClient::new(test_config(&server, Some(dir.path()))).unwrap();
    let result = client
        .search(SearchCriteria::query("electron").max_results(3))
        .await
        .unwrap();
    let report = client.download_all(&result).await;

    page.assert_async().await;
    for pdf in &pdfs {
        pdf.assert_async().await;
    }
    match report {
        DownloadReport::Finished(tracker) => {
            assert_eq!((tracker.total, tracker.completed, tracker.failed), (3, 3, 0));
        }
        DownloadReport::Disabled => panic!("downloads should be enabled"),
    }
    for n in 0..3 {
        assert!(dir.path().join(format!("{}.pdf", paper_id(n))).exists());
    }
}

#[tokio::test]
async fn test_disabled_downloader_performs_no_io() {
    let mut server = mockito::Server::new_async().await;
    let pdf = mock_pdf(&mut server, 1, 200, 0).await;

    let client = ArxivClient::new(test_config(&server, None)).unwrap();
    let papers = papers_for(&server, 1..2);

    assert_eq!(
        client.download_one(&papers[0], None).await,
        DownloadOutcome::Disabled
    );
    assert!(matches!(
        client.download_papers(&papers).await,
        DownloadReport::Disabled
    ));
    pdf.assert_async().await;
}
