//! Authenticated same-site website crawler driving a real headless browser.
//!
//! sitewalker fetches fully rendered HTML for every reachable page of a site,
//! breadth-first from a start URL, optionally logging in first with form
//! credentials. Discovered URLs are kept on the start URL's site and vetted
//! against private, loopback, and otherwise internal addresses before they
//! are fetched.
//!
//! The async core is [`SiteCrawler`]; [`crawl_website`] wraps it for
//! synchronous callers and adds a hard outer deadline. The browser is reached
//! through the [`PageSession`] trait, implemented for real use by
//! [`WebDriverSession`].

pub mod crawler;
pub mod extract;
pub mod guard;
pub mod login;
pub mod session;
pub mod types;
pub mod webdriver;

#[cfg(test)]
pub(crate) mod testutil;

pub use crawler::{PAGE_LOAD_TIMEOUT, SiteCrawler, crawl_website};
pub use extract::SiteScope;
pub use guard::{HostResolver, system_resolver, validate_and_normalize};
pub use login::LoginOutcome;
pub use session::{ElementHandle, PageSession, ResponseMeta};
pub use types::{
    CrawlError, CrawlProgress, CrawlRequest, CrawlResult, CrawlStatus, MAX_DEPTH, MAX_PAGES,
    PageRecord, ProgressCallback, SessionError,
};
pub use webdriver::{Browser, WebDriverConfig, WebDriverEngine, WebDriverSession};
