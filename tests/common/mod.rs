#![allow(dead_code)]
use async_trait::async_trait;
use http_client::HttpClient;
use http_types::{Request, Response, StatusCode, Url};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use track_resolver::ResolverConfig;

pub const BASE_URL: &str = "https://catalog.test";

/// A canned response served by [`StubHttpClient`].
#[derive(Debug, Clone)]
pub struct StubRoute {
    status: u16,
    body: String,
    location: Option<String>,
    delay: Duration,
    /// Requests answered with a transport error before the route succeeds
    failures: usize,
}

impl StubRoute {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            location: None,
            delay: Duration::ZERO,
            failures: 0,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok("")
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::status(302)
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }
}

#[derive(Debug, Default)]
struct StubState {
    routes: Mutex<HashMap<String, StubRoute>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-process stand-in for the catalog's web server.
///
/// Routes are keyed by full URL; anything unrouted answers 404. Clones share
/// routes and the request log, so a test can keep one clone for assertions
/// after boxing another into the fetch client.
#[derive(Debug, Clone, Default)]
pub struct StubHttpClient {
    state: Arc<StubState>,
}

impl StubHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, route: StubRoute) -> &Self {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(normalize(url), route);
        self
    }

    /// Every requested URL, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        let url = normalize(url);
        self.requests().iter().filter(|u| **u == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Highest number of requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for StubHttpClient {
    async fn send(&self, req: Request) -> Result<Response, http_types::Error> {
        let url = req.url().to_string();
        let route = {
            let mut requests = self.state.requests.lock().unwrap();
            requests.push(url.clone());
            let mut routes = self.state.routes.lock().unwrap();
            routes.get_mut(&url).map(|route| {
                let snapshot = route.clone();
                route.failures = route.failures.saturating_sub(1);
                snapshot
            })
        };

        let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = route.as_ref().map(|r| r.delay).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let Some(route) = route else {
            return Ok(Response::new(StatusCode::NotFound));
        };
        if route.failures > 0 {
            return Err(http_types::Error::from_str(
                StatusCode::BadGateway,
                "connection reset by peer",
            ));
        }

        let mut response = Response::new(route.status);
        if let Some(location) = route.location {
            let _ = response.insert_header("location", location.as_str());
        }
        response.set_body(route.body);
        Ok(response)
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Config pointing at the stub catalog, with millisecond backoff.
pub fn stub_config() -> ResolverConfig {
    ResolverConfig {
        base_url: BASE_URL.to_string(),
        request_timeout: 2.0,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..ResolverConfig::default()
    }
}

pub fn search_url(query: &str) -> String {
    stub_config().search_url(query)
}

pub fn detail_url(path: &str) -> String {
    format!("{BASE_URL}{path}")
}

/// Search results page linking to the given detail paths.
pub fn search_page(paths: &[&str]) -> String {
    let links: String = paths
        .iter()
        .map(|path| format!("<li><a href=\"{path}\">result</a></li>\n"))
        .collect();
    format!(
        "<html><body><nav><a href=\"/genres\">Genres</a></nav><ul class=\"results\">\n{links}</ul></body></html>"
    )
}

/// Detail page with the fields the catalog publishes.
pub fn detail_page(path: &str, title: &str, artists: &[&str], key: Option<&str>) -> String {
    let artists: String = artists
        .iter()
        .map(|artist| format!("<a data-field=\"artist\" href=\"/artist/x\">{artist}</a>"))
        .collect();
    let key = key
        .map(|key| format!("<span data-field=\"key\">{key}</span>"))
        .unwrap_or_default();
    format!(
        "<html><head><link rel=\"canonical\" href=\"{path}\"></head><body>\
         <h1 data-field=\"title\">{title}</h1>{artists}{key}\
         <span data-field=\"label\">Test Records</span></body></html>"
    )
}
