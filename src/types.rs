use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling on distinct pages fetched, regardless of what the caller asks for.
pub const MAX_PAGES: usize = 50;
/// Hard ceiling on link-expansion depth.
pub const MAX_DEPTH: usize = 3;

pub const DEFAULT_MAX_PAGES: usize = 20;
pub const DEFAULT_MAX_DEPTH: usize = 2;
pub const DEFAULT_CRAWL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Starting,
    LoggingIn,
    Crawling,
    Done,
    Error,
}

impl CrawlStatus {
    pub fn label(self) -> &'static str {
        match self {
            CrawlStatus::Starting => "starting",
            CrawlStatus::LoggingIn => "logging_in",
            CrawlStatus::Crawling => "crawling",
            CrawlStatus::Done => "done",
            CrawlStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Live crawl state pushed to the progress callback. Owned and mutated only by
/// the orchestrator; observers receive read-only snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlProgress {
    pub pages_discovered: usize,
    pub pages_scraped: usize,
    pub pages_failed: usize,
    pub current_url: String,
    pub status: CrawlStatus,
    pub errors: Vec<String>,
}

impl Default for CrawlProgress {
    fn default() -> Self {
        Self {
            pages_discovered: 0,
            pages_scraped: 0,
            pages_failed: 0,
            current_url: String::new(),
            status: CrawlStatus::Starting,
            errors: Vec::new(),
        }
    }
}

/// One fetched page: the URL, its fully rendered HTML, and the BFS depth at
/// which it was discovered (start URL is depth 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub html: String,
    pub depth: usize,
}

/// Result of a complete site crawl.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResult {
    pub pages: Vec<PageRecord>,
    pub site_map: HashMap<String, Vec<String>>,
    pub login_success: bool,
    pub errors: Vec<String>,
}

/// Immutable description of one crawl. Limits above the hard ceilings are
/// clamped when the crawler accepts the request.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub start_url: String,
    pub max_pages: usize,
    pub max_depth: usize,
    pub login_url: Option<String>,
    pub login_username: Option<String>,
    pub login_password: Option<String>,
    pub crawl_timeout: Duration,
    pub settle_delay: Duration,
}

impl CrawlRequest {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_pages: DEFAULT_MAX_PAGES,
            max_depth: DEFAULT_MAX_DEPTH,
            login_url: None,
            login_username: None,
            login_password: None,
            crawl_timeout: DEFAULT_CRAWL_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn login(
        mut self,
        login_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.login_url = Some(login_url.into());
        self.login_username = Some(username.into());
        self.login_password = Some(password.into());
        self
    }

    pub fn crawl_timeout(mut self, timeout: Duration) -> Self {
        self.crawl_timeout = timeout;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Callback invoked with a progress snapshot after every state change.
/// Panics raised by the callback are swallowed by the orchestrator.
pub type ProgressCallback = Box<dyn Fn(&CrawlProgress) + Send>;

/// Failure of a single Page Session operation. Everything here is recoverable
/// at the orchestrator level.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("webdriver request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webdriver error {name}: {message}")]
    Protocol { name: String, message: String },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("session setup failed: {0}")]
    Setup(String),
}

/// The only conditions the public entry point surfaces as errors; everything
/// else resolves into a `CrawlResult`.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid crawl request: {0}")]
    InvalidRequest(String),
    #[error("crawl exceeded {seconds}s deadline")]
    DeadlineExceeded { seconds: u64 },
    #[error("crawl worker failed: {0}")]
    Worker(String),
}

pub(crate) fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_stable() {
        assert_eq!(CrawlStatus::LoggingIn.label(), "logging_in");
        assert_eq!(CrawlStatus::Done.to_string(), "done");
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate_for_log("abc", 5), "abc");
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
    }

    #[test]
    fn request_builder_fills_credentials_together() {
        let req = CrawlRequest::new("https://example.com").login("https://example.com/login", "u", "p");
        assert!(req.login_url.is_some() && req.login_username.is_some() && req.login_password.is_some());
        assert_eq!(req.max_pages, DEFAULT_MAX_PAGES);
    }
}
