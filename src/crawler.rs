//! BFS crawl orchestration.
//!
//! `SiteCrawler` owns the queue, the visited set, the site map, and the
//! progress state for exactly one crawl. `crawl_with` runs against any
//! `PageSession`; `crawl` launches a WebDriver engine around it;
//! `crawl_website` is the synchronous façade that isolates the crawl on a
//! dedicated thread with a hard outer deadline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use log::{error, info, warn};
use tokio::time::{Instant, sleep};
use url::Url;

use crate::extract::{self, SiteScope};
use crate::guard::{HostResolver, system_resolver};
use crate::login;
use crate::session::PageSession;
use crate::types::{
    CrawlError, CrawlProgress, CrawlRequest, CrawlResult, CrawlStatus, MAX_DEPTH, MAX_PAGES,
    PageRecord, ProgressCallback, SessionError, truncate_for_log,
};
use crate::webdriver::{WebDriverConfig, WebDriverEngine};

/// Bound on each individual page load.
pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Extra margin the synchronous façade allows past `crawl_timeout` before it
/// abandons the worker thread.
pub const WRAPPER_GRACE: Duration = Duration::from_secs(30);

/// BFS website crawler bound to one browser session.
///
/// Stays within the start URL's site, respects the (hard-clamped) page and
/// depth limits, SSRF-validates every discovered URL, and always produces a
/// `CrawlResult` -- per-page failures and login failures are reported in it,
/// never thrown.
pub struct SiteCrawler {
    request: CrawlRequest,
    scope: SiteScope,
    resolver: HostResolver,
    visited: HashSet<String>,
    site_map: HashMap<String, Vec<String>>,
    progress: CrawlProgress,
    progress_cb: Option<ProgressCallback>,
}

impl SiteCrawler {
    /// Accept a request, clamping `max_pages`/`max_depth` to the hard
    /// ceilings. The start URL must parse with a host; anything else is the
    /// caller's contract violation.
    pub fn new(mut request: CrawlRequest) -> Result<Self, CrawlError> {
        let parsed = Url::parse(&request.start_url)
            .map_err(|err| CrawlError::InvalidRequest(format!("start URL: {err}")))?;
        let scope = SiteScope::from_start_url(&parsed)
            .ok_or_else(|| CrawlError::InvalidRequest("start URL has no host".to_string()))?;

        request.max_pages = request.max_pages.min(MAX_PAGES);
        request.max_depth = request.max_depth.min(MAX_DEPTH);

        Ok(Self {
            request,
            scope,
            resolver: system_resolver(),
            visited: HashSet::new(),
            site_map: HashMap::new(),
            progress: CrawlProgress::default(),
            progress_cb: None,
        })
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_cb = Some(callback);
        self
    }

    /// Replace the hostname resolver used for SSRF checks.
    pub fn with_resolver(mut self, resolver: HostResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Launch a WebDriver engine, run the crawl, and release the session,
    /// browser, and driver on every exit path. Setup failure becomes an
    /// error-status result, not a panic or error return.
    pub async fn crawl(&mut self, webdriver: &WebDriverConfig) -> CrawlResult {
        let mut engine = match WebDriverEngine::launch(webdriver).await {
            Ok(engine) => engine,
            Err(err) => return self.setup_failure(err),
        };
        let mut session = match engine.new_session().await {
            Ok(session) => session,
            Err(err) => {
                engine.shutdown();
                return self.setup_failure(err);
            }
        };
        info!("Launched WebDriver session at {}", engine.endpoint());

        let result = self.crawl_with(&mut session).await;

        if let Err(err) = session.quit().await {
            warn!("session teardown failed: {err}");
        }
        engine.shutdown();
        result
    }

    /// Execute the crawl against an already-open session: optional login,
    /// then strict-FIFO breadth-first expansion from the start URL.
    pub async fn crawl_with<S: PageSession>(&mut self, session: &mut S) -> CrawlResult {
        let mut result = CrawlResult::default();
        let settle = self.request.settle_delay;

        self.progress.status = CrawlStatus::Starting;
        self.push_progress();

        if let (Some(login_url), Some(username), Some(password)) = (
            self.request.login_url.clone(),
            self.request.login_username.clone(),
            self.request.login_password.clone(),
        ) {
            self.progress.status = CrawlStatus::LoggingIn;
            self.progress.current_url = login_url.clone();
            self.push_progress();

            let outcome = login::perform_login(
                session,
                &login_url,
                &username,
                &password,
                PAGE_LOAD_TIMEOUT,
                settle,
            )
            .await;
            result.login_success = outcome.success;
            self.progress.errors.extend(outcome.diagnostics);
            if !outcome.success {
                warn!("Login failed -- will crawl as unauthenticated user");
            }

            // Head to the start URL either way; if this fails the BFS loop
            // below still retries it from the queue.
            if session
                .navigate(&self.request.start_url, PAGE_LOAD_TIMEOUT)
                .await
                .is_ok()
            {
                sleep(settle.saturating_mul(2)).await;
            }
        }

        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((self.request.start_url.clone(), 0));
        let crawl_start = Instant::now();

        while !queue.is_empty() && self.visited.len() < self.request.max_pages {
            let elapsed = crawl_start.elapsed();
            if elapsed > self.request.crawl_timeout {
                result.errors.push(format!(
                    "Crawl timeout ({}s) reached after {} pages",
                    self.request.crawl_timeout.as_secs(),
                    self.visited.len()
                ));
                warn!(
                    "Crawl timeout after {:.0}s, {} pages",
                    elapsed.as_secs_f64(),
                    self.visited.len()
                );
                break;
            }

            let Some((url, depth)) = queue.pop_front() else {
                break;
            };
            if self.visited.contains(&url) {
                continue;
            }
            if depth > self.request.max_depth {
                continue;
            }
            self.visited.insert(url.clone());

            self.progress.status = CrawlStatus::Crawling;
            self.progress.current_url = url.clone();
            self.progress.pages_scraped = result.pages.len();
            self.progress.pages_discovered = self.visited.len() + queue.len();
            self.push_progress();

            if let Err(err) = self
                .visit_page(session, &url, depth, &mut queue, &mut result)
                .await
            {
                let message = format!(
                    "Failed to load {}: {}",
                    url,
                    truncate_for_log(&err.to_string(), 150)
                );
                warn!("{message}");
                result.errors.push(message);
                self.progress.pages_failed += 1;
                // Best-effort recovery; the URL stays visited and is not
                // retried either way.
                if let Err(reset_err) = session.reset().await {
                    warn!("session recovery failed after {url}: {reset_err}");
                }
            }
        }

        result.site_map = self.site_map.clone();

        self.progress.status = CrawlStatus::Done;
        self.progress.pages_scraped = result.pages.len();
        self.push_progress();

        self.merge_progress_errors(&mut result);
        info!(
            "Crawl complete: {} pages scraped, {} failed, {} errors",
            result.pages.len(),
            self.progress.pages_failed,
            result.errors.len()
        );
        result
    }

    async fn visit_page<S: PageSession>(
        &mut self,
        session: &mut S,
        url: &str,
        depth: usize,
        queue: &mut VecDeque<(String, usize)>,
        result: &mut CrawlResult,
    ) -> Result<(), SessionError> {
        let meta = session.navigate(url, PAGE_LOAD_TIMEOUT).await?;
        sleep(self.request.settle_delay).await;

        if let Some(content_type) = meta.and_then(|m| m.content_type) {
            if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
                info!(
                    "Skipping non-HTML: {url} ({})",
                    truncate_for_log(&content_type, 50)
                );
                return Ok(());
            }
        }

        let html = session.content().await?;
        result.pages.push(PageRecord {
            url: url.to_string(),
            html,
            depth,
        });

        // max_depth bounds link expansion, not page inclusion: a page at the
        // boundary is recorded but its children are not extracted.
        if depth < self.request.max_depth {
            let links = extract::extract_links(
                session,
                url,
                &self.scope,
                &self.visited,
                &self.resolver,
            )
            .await;
            for link in &links {
                if !self.visited.contains(link) {
                    queue.push_back((link.clone(), depth + 1));
                }
            }
            self.site_map.insert(url.to_string(), links);
        }

        Ok(())
    }

    fn setup_failure(&mut self, err: SessionError) -> CrawlResult {
        error!("Crawl failed to start: {err}");
        let mut result = CrawlResult::default();
        result.errors.push(format!(
            "Crawl failed: {}",
            truncate_for_log(&err.to_string(), 200)
        ));
        self.progress.status = CrawlStatus::Error;
        self.push_progress();
        self.merge_progress_errors(&mut result);
        result
    }

    /// Fold progress-level diagnostics (e.g. login details) into the result
    /// without duplicating entries already present.
    fn merge_progress_errors(&self, result: &mut CrawlResult) {
        let mut existing: HashSet<String> = result.errors.iter().cloned().collect();
        for err in &self.progress.errors {
            if existing.insert(err.clone()) {
                result.errors.push(err.clone());
            }
        }
    }

    fn push_progress(&self) {
        if let Some(callback) = &self.progress_cb {
            let snapshot = self.progress.clone();
            // Observer bugs must never abort the crawl.
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot)));
        }
    }
}

/// Synchronous entry point: runs the whole crawl on a dedicated thread with
/// its own runtime and blocks until it finishes or the wrapper deadline
/// (`crawl_timeout` + grace) passes. Only a malformed request or an
/// unresponsive worker surface as errors; everything else is in the result.
pub fn crawl_website(
    request: CrawlRequest,
    webdriver: WebDriverConfig,
    progress_callback: Option<ProgressCallback>,
) -> Result<CrawlResult, CrawlError> {
    crawl_website_with_grace(request, webdriver, progress_callback, WRAPPER_GRACE)
}

pub(crate) fn crawl_website_with_grace(
    request: CrawlRequest,
    webdriver: WebDriverConfig,
    progress_callback: Option<ProgressCallback>,
    grace: Duration,
) -> Result<CrawlResult, CrawlError> {
    let timeout_secs = request.crawl_timeout.as_secs();
    let wrapper_deadline = request.crawl_timeout + grace;

    let mut crawler = SiteCrawler::new(request)?;
    if let Some(callback) = progress_callback {
        crawler = crawler.with_progress_callback(callback);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("sitewalker-crawl".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            let result = match runtime {
                Ok(rt) => rt.block_on(crawler.crawl(&webdriver)),
                Err(err) => {
                    let mut result = CrawlResult::default();
                    result.errors.push(format!("Crawl failed: {err}"));
                    result
                }
            };
            let _ = tx.send(result);
        })
        .map_err(|err| CrawlError::Worker(err.to_string()))?;

    // The worker thread is abandoned on timeout; a stuck browser session
    // must not hang the caller.
    rx.recv_timeout(wrapper_deadline)
        .map_err(|_| CrawlError::DeadlineExceeded {
            seconds: timeout_secs,
        })
}
