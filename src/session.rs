//! Capability interface over a single browser tab.
//!
//! The orchestrator, login automator, and link extractor depend only on this
//! trait; the crate ships one implementation against a WebDriver endpoint
//! ([`crate::webdriver::WebDriverSession`]) and the tests run an in-memory
//! fake against the same surface.

use std::time::Duration;

use serde_json::Value;

use crate::types::SessionError;

/// Opaque reference to a DOM element inside the session's current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

/// Metadata about the response behind the last navigation. WebDriver exposes
/// no response headers, so the content type is best-effort and may be absent.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub content_type: Option<String>,
}

/// A single browser tab: navigate, read rendered content, evaluate scripts,
/// and interact with elements. Frame-scoped operations (`query`, `evaluate`,
/// element interactions) run in the currently selected frame; navigation
/// resets the selection to the main document.
#[allow(async_fn_in_trait)]
pub trait PageSession {
    /// Navigate to `url`, bounded by `timeout`.
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<ResponseMeta>, SessionError>;

    /// URL of the top-level document.
    async fn current_url(&mut self) -> Result<String, SessionError>;

    /// Fully rendered HTML of the top-level document.
    async fn content(&mut self) -> Result<String, SessionError>;

    /// Title of the top-level document.
    async fn title(&mut self) -> Result<String, SessionError>;

    /// Run a script in the current frame and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError>;

    /// First element matching a CSS selector in the current frame, if any.
    async fn query(&mut self, selector: &str) -> Result<Option<ElementHandle>, SessionError>;

    /// All elements matching a CSS selector in the current frame.
    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError>;

    /// Clear an input element and type `text` into it.
    async fn fill(&mut self, element: &ElementHandle, text: &str) -> Result<(), SessionError>;

    async fn click(&mut self, element: &ElementHandle) -> Result<(), SessionError>;

    /// Send a named key (e.g. "Enter") to an element.
    async fn press(&mut self, element: &ElementHandle, key: &str) -> Result<(), SessionError>;

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError>;

    async fn text_content(&mut self, element: &ElementHandle) -> Result<String, SessionError>;

    /// Number of direct sub-frames of the top-level document.
    async fn frame_count(&mut self) -> Result<usize, SessionError>;

    /// Select the frame subsequent frame-scoped operations run in.
    /// `None` selects the main document; `Some(i)` the i-th sub-frame.
    async fn switch_to_frame(&mut self, index: Option<usize>) -> Result<(), SessionError>;

    /// Recover the tab to a clean state after a failed page, e.g. by loading
    /// a blank page or replacing the tab.
    async fn reset(&mut self) -> Result<(), SessionError>;
}
