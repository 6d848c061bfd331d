//! Same-site link discovery.
//!
//! Pulls anchor targets out of a rendered page, resolves them against the
//! current URL, and filters by scheme, domain scope, file extension, and the
//! SSRF guard. Extraction never fails the crawl; any internal error degrades
//! to an empty list.

use std::collections::HashSet;

use log::{info, warn};
use scraper::{Html, Selector};
use url::Url;

use crate::guard::{self, HostResolver};
use crate::session::PageSession;
use crate::types::truncate_for_log;

const ANCHOR_SCRIPT: &str =
    "return Array.from(document.querySelectorAll('a[href]')).map(e => e.href);";

/// Path suffixes that are never navigable HTML pages.
const SKIP_EXTENSIONS: &[&str] = &[
    ".pdf", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".bmp", ".css", ".js", ".ico",
    ".woff", ".woff2", ".ttf", ".eot", ".mp4", ".mp3", ".avi", ".mov", ".webm", ".ogg", ".zip",
    ".tar", ".gz", ".rar", ".7z", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
];

/// The crawl's domain boundary, derived once from the start URL: the exact
/// start hostname plus sibling subdomains of its base registrable domain
/// (last two dot-separated labels).
#[derive(Debug, Clone)]
pub struct SiteScope {
    allowed_host: String,
    base_domain: String,
}

impl SiteScope {
    pub fn from_start_url(start: &Url) -> Option<Self> {
        let host = start.host_str()?.to_ascii_lowercase();
        let labels = host.split('.').collect::<Vec<_>>();
        let base_domain = if labels.len() >= 2 {
            labels[labels.len() - 2..].join(".")
        } else {
            host.clone()
        };
        Some(Self {
            allowed_host: host,
            base_domain,
        })
    }

    pub fn is_same_site(&self, hostname: &str) -> bool {
        let hostname = hostname.to_ascii_lowercase();
        if hostname.is_empty() {
            return false;
        }
        hostname == self.allowed_host
            || hostname == self.base_domain
            || hostname.ends_with(&format!(".{}", self.base_domain))
    }
}

/// Extract all in-scope links from the current page, in DOM discovery order.
///
/// `visited` suppresses links the crawl has already processed so they do not
/// re-enter the queue. Every surviving candidate is vetted by the URL guard.
pub async fn extract_links<S: PageSession>(
    session: &mut S,
    current_url: &str,
    scope: &SiteScope,
    visited: &HashSet<String>,
    resolver: &HostResolver,
) -> Vec<String> {
    let raw_hrefs = match collect_hrefs(session).await {
        Some(hrefs) => hrefs,
        None => return Vec::new(),
    };

    let Ok(base) = Url::parse(current_url) else {
        warn!("link extraction skipped: unparseable current URL {current_url}");
        return Vec::new();
    };

    let mut valid_links = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped_scheme = 0usize;
    let mut skipped_domain = 0usize;
    let mut skipped_dedup = 0usize;
    let mut skipped_ext = 0usize;
    let mut skipped_ssrf = 0usize;
    let total = raw_hrefs.len();

    for href in raw_hrefs {
        let Ok(mut absolute) = base.join(&href) else {
            skipped_scheme += 1;
            continue;
        };
        absolute.set_fragment(None);

        if !matches!(absolute.scheme(), "http" | "https") {
            skipped_scheme += 1;
            continue;
        }

        let Some(host) = absolute.host_str() else {
            skipped_domain += 1;
            continue;
        };
        if !scope.is_same_site(host) {
            skipped_domain += 1;
            continue;
        }

        let absolute = absolute.to_string();
        if seen.contains(&absolute) || visited.contains(&absolute) {
            skipped_dedup += 1;
            continue;
        }
        seen.insert(absolute.clone());

        let path_lower = match Url::parse(&absolute) {
            Ok(u) => u.path().to_ascii_lowercase(),
            Err(_) => continue,
        };
        if SKIP_EXTENSIONS.iter().any(|ext| path_lower.ends_with(ext)) {
            skipped_ext += 1;
            continue;
        }

        match guard::validate_and_normalize_with(&absolute, resolver) {
            Some(normalized) => valid_links.push(normalized),
            None => skipped_ssrf += 1,
        }
    }

    info!(
        "Links from {}: {} valid, {} total | filtered: {} domain, {} ssrf, {} dedup, {} ext, {} scheme",
        truncate_for_log(current_url, 80),
        valid_links.len(),
        total,
        skipped_domain,
        skipped_ssrf,
        skipped_dedup,
        skipped_ext,
        skipped_scheme,
    );

    valid_links
}

/// Anchor hrefs via script evaluation, falling back to parsing the rendered
/// HTML when the page refuses script execution.
async fn collect_hrefs<S: PageSession>(session: &mut S) -> Option<Vec<String>> {
    match session.evaluate(ANCHOR_SCRIPT).await {
        Ok(value) => {
            let hrefs = value
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>();
            Some(hrefs)
        }
        Err(err) => {
            warn!("anchor script evaluation failed, parsing rendered HTML instead: {err}");
            let html = session.content().await.ok()?;
            Some(parse_anchor_hrefs(&html))
        }
    }
}

fn parse_anchor_hrefs(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href").map(|href| href.to_string()))
        .collect()
}
