mod common;

use common::{detail_url, stub_config, StubHttpClient, StubRoute};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use track_resolver::{FetchEvent, HttpFetchClient, ResolverError, ResponseCache};

fn fetcher(stub: &StubHttpClient) -> HttpFetchClient {
    HttpFetchClient::from_config(
        Box::new(stub.clone()),
        Arc::new(ResponseCache::new()),
        &stub_config(),
    )
}

#[test_log::test(tokio::test)]
async fn test_second_fetch_is_served_from_cache() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/opus/1");
    stub.route(&url, StubRoute::ok("<h1>Opus</h1>"));
    let fetcher = fetcher(&stub);

    let first = fetcher.fetch(&url, Duration::from_secs(2), 3).await.unwrap();
    let second = fetcher.fetch(&url, Duration::from_secs(2), 3).await.unwrap();

    assert!(!first.cache_hit);
    assert_eq!(first.attempts, 1);
    assert!(second.cache_hit);
    assert_eq!(second.network_time, Duration::ZERO);
    assert_eq!(first.body, second.body);
    assert_eq!(stub.request_count(&url), 1);
    assert_eq!(fetcher.cache().hits(), 1);
}

#[test_log::test(tokio::test)]
async fn test_failures_stop_after_max_attempts() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/broken/1");
    stub.route(&url, StubRoute::status(503));
    let fetcher = fetcher(&stub);

    let err = fetcher
        .fetch(&url, Duration::from_secs(2), 3)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::HttpStatus { code: 503, .. }));
    assert_eq!(stub.request_count(&url), 3);
    assert!(fetcher.cache().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_single_attempt_means_no_retry() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/missing/1");
    let fetcher = fetcher(&stub);

    let err = fetcher
        .fetch(&url, Duration::from_secs(2), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::HttpStatus { code: 404, .. }));
    assert_eq!(stub.total_requests(), 1);
}

#[test_log::test(tokio::test)]
async fn test_transport_errors_are_retried_until_success() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/flaky/1");
    stub.route(&url, StubRoute::ok("finally").failing_first(2));
    let fetcher = fetcher(&stub);

    let outcome = fetcher.fetch(&url, Duration::from_secs(2), 3).await.unwrap();

    assert_eq!(outcome.body, "finally");
    assert_eq!(outcome.attempts, 3);
    assert!(!outcome.cache_hit);
    assert_eq!(stub.request_count(&url), 3);
}

#[test_log::test(tokio::test)]
async fn test_slow_response_times_out() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/slow/1");
    stub.route(
        &url,
        StubRoute::ok("too late").delayed(Duration::from_millis(300)),
    );
    let fetcher = fetcher(&stub);

    let err = fetcher
        .fetch(&url, Duration::from_millis(20), 2)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::Timeout { timeout_ms: 20, .. }));
    assert_eq!(stub.request_count(&url), 2);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_fetches_share_one_request() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/popular/1");
    stub.route(
        &url,
        StubRoute::ok("shared body").delayed(Duration::from_millis(50)),
    );
    let fetcher = fetcher(&stub);

    let (a, b) = tokio::join!(
        fetcher.fetch(&url, Duration::from_secs(2), 3),
        fetcher.fetch(&url, Duration::from_secs(2), 3)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(stub.request_count(&url), 1);
    assert_eq!(a.body, "shared body");
    assert_eq!(b.body, "shared body");
    assert_ne!(a.cache_hit, b.cache_hit);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_fetches_from_spawned_tasks_share_one_request() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/popular/2");
    stub.route(
        &url,
        StubRoute::ok("shared body").delayed(Duration::from_millis(50)),
    );
    let fetcher = fetcher(&stub);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fetcher = fetcher.clone();
            let url = url.clone();
            tokio::spawn(async move { fetcher.get(&url).await })
        })
        .collect();

    let mut network_fetches = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.body, "shared body");
        if !outcome.cache_hit {
            network_fetches += 1;
        }
    }

    assert_eq!(network_fetches, 1);
    assert_eq!(stub.request_count(&url), 1);
}

#[test_log::test(tokio::test)]
async fn test_redirects_are_followed() {
    let stub = StubHttpClient::new();
    let old = detail_url("/track/old-slug/9");
    let new = detail_url("/track/new-slug/9");
    stub.route(&old, StubRoute::redirect("/track/new-slug/9"));
    stub.route(&new, StubRoute::ok("moved here"));
    let fetcher = fetcher(&stub);

    let outcome = fetcher.get(&old).await.unwrap();

    assert_eq!(outcome.body, "moved here");
    assert_eq!(stub.request_count(&new), 1);
    // Cached under the requested URL.
    assert!(fetcher.get(&old).await.unwrap().cache_hit);
}

#[test_log::test(tokio::test)]
async fn test_retry_events_are_broadcast() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/down/1");
    stub.route(&url, StubRoute::status(500));
    let mut fetcher = fetcher(&stub);
    let mut events = fetcher.subscribe();

    let _ = fetcher.fetch(&url, Duration::from_secs(2), 2).await;

    let first = timeout(Duration::from_millis(100), events.recv())
        .await
        .unwrap()
        .unwrap();
    match first {
        FetchEvent::RetryScheduled {
            attempt,
            max_attempts,
            ..
        } => {
            assert_eq!(attempt, 1);
            assert_eq!(max_attempts, 2);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let second = timeout(Duration::from_millis(100), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        second,
        FetchEvent::RetriesExhausted { attempts: 2, .. }
    ));
}

#[test_log::test(tokio::test)]
async fn test_cache_shared_between_clients() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/opus/1");
    stub.route(&url, StubRoute::ok("<h1>Opus</h1>"));
    let cache = Arc::new(ResponseCache::new());

    let a = HttpFetchClient::from_config(Box::new(stub.clone()), cache.clone(), &stub_config());
    let b = HttpFetchClient::from_config(Box::new(stub.clone()), cache.clone(), &stub_config());

    assert!(!a.get(&url).await.unwrap().cache_hit);
    assert!(b.get(&url).await.unwrap().cache_hit);
    assert_eq!(stub.total_requests(), 1);
    assert_eq!(cache.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_zero_attempts_makes_no_request() {
    let stub = StubHttpClient::new();
    let url = detail_url("/track/opus/1");
    stub.route(&url, StubRoute::ok("<h1>Opus</h1>"));
    let fetcher = fetcher(&stub);

    let err = fetcher
        .fetch(&url, Duration::from_secs(2), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::Config(_)));
    assert_eq!(stub.total_requests(), 0);
}
