//! In-memory `PageSession` fake for unit tests: a scripted site made of
//! `FakePage`s with link lists, login-form props, sub-frames, and failure
//! injection.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::guard::HostResolver;
use crate::session::{ElementHandle, PageSession, ResponseMeta};
use crate::types::SessionError;

/// Resolver that maps every hostname to a public address, so guard checks
/// pass without DNS.
pub fn public_resolver() -> HostResolver {
    Arc::new(|_host: &str| Ok(vec![IpAddr::from([93, 184, 216, 34])]))
}

#[derive(Debug, Clone)]
pub struct FakeInput {
    pub id: String,
    pub input_type: String,
}

impl FakeInput {
    pub fn new(id: &str, input_type: &str) -> Self {
        Self {
            id: id.to_string(),
            input_type: input_type.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakePage {
    pub html: String,
    pub hrefs: Vec<String>,
    pub content_type: Option<String>,
    pub title: String,
    pub fail_navigation: bool,
    pub fail_evaluate: bool,
    pub fail_content: bool,
    // login-form props
    pub password_field: bool,
    pub username_probe: Value,
    pub username_selector: Option<String>,
    pub submit_button: bool,
    pub submit_redirects_to: Option<String>,
    pub clears_password_on_submit: bool,
    pub error_banner: Option<String>,
    pub inputs: Vec<FakeInput>,
    pub frames: Vec<FakePage>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self {
            html: "<html><body></body></html>".to_string(),
            hrefs: Vec::new(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            title: String::new(),
            fail_navigation: false,
            fail_evaluate: false,
            fail_content: false,
            password_field: false,
            username_probe: Value::Null,
            username_selector: None,
            submit_button: false,
            submit_redirects_to: None,
            clears_password_on_submit: false,
            error_banner: None,
            inputs: Vec::new(),
            frames: Vec::new(),
        }
    }
}

impl FakePage {
    /// A plain HTML page whose anchor list is `hrefs`.
    pub fn with_hrefs(hrefs: &[&str]) -> Self {
        let body = hrefs
            .iter()
            .map(|href| format!(r#"<a href="{href}">link</a>"#))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            html: format!("<html><body>{body}</body></html>"),
            hrefs: hrefs.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

pub struct FakeSession {
    pages: HashMap<String, FakePage>,
    current: String,
    frame: Option<usize>,
    password_cleared: bool,
    pub filled: Vec<(String, String)>,
    pub pressed: Vec<(String, String)>,
    pub resets: usize,
    pub fail_reset: bool,
    pub navigations: Vec<String>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            current: String::new(),
            frame: None,
            password_cleared: false,
            filled: Vec::new(),
            pressed: Vec::new(),
            resets: 0,
            fail_reset: false,
            navigations: Vec::new(),
        }
    }

    pub fn add_page(&mut self, url: &str, page: FakePage) {
        self.pages.insert(url.to_string(), page);
    }

    /// Navigate and unwrap, for test setup.
    pub async fn goto(&mut self, url: &str) {
        self.navigate(url, Duration::from_secs(15))
            .await
            .expect("fake navigation to a known page");
    }

    fn active_page(&self) -> Option<&FakePage> {
        let page = self.pages.get(&self.current)?;
        match self.frame {
            Some(index) => page.frames.get(index),
            None => Some(page),
        }
    }

    fn apply_submit(&mut self) {
        let Some(page) = self.active_page() else {
            return;
        };
        let redirect = page.submit_redirects_to.clone();
        let clears = page.clears_password_on_submit;
        if clears {
            self.password_cleared = true;
        }
        if let Some(target) = redirect {
            self.current = target;
            self.frame = None;
        }
    }
}

impl PageSession for FakeSession {
    async fn navigate(
        &mut self,
        url: &str,
        _timeout: Duration,
    ) -> Result<Option<ResponseMeta>, SessionError> {
        self.navigations.push(url.to_string());
        if url == "about:blank" {
            self.current = url.to_string();
            self.frame = None;
            return Ok(None);
        }
        let Some(page) = self.pages.get(url) else {
            return Err(SessionError::Navigation(format!(
                "net::ERR_NAME_NOT_RESOLVED at {url}"
            )));
        };
        if page.fail_navigation {
            return Err(SessionError::Navigation(format!("net::ERR_FAILED at {url}")));
        }
        let content_type = page.content_type.clone();
        self.current = url.to_string();
        self.frame = None;
        self.password_cleared = false;
        Ok(Some(ResponseMeta { content_type }))
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        Ok(self.current.clone())
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        let Some(page) = self.pages.get(&self.current) else {
            return Err(SessionError::Navigation("no page loaded".to_string()));
        };
        if page.fail_content {
            return Err(SessionError::Evaluation("content unavailable".to_string()));
        }
        Ok(page.html.clone())
    }

    async fn title(&mut self) -> Result<String, SessionError> {
        Ok(self
            .pages
            .get(&self.current)
            .map(|page| page.title.clone())
            .unwrap_or_default())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        let Some(page) = self.active_page() else {
            return Ok(Value::Null);
        };
        if page.fail_evaluate {
            return Err(SessionError::Evaluation("script blocked".to_string()));
        }
        if script.contains("a[href]") {
            return Ok(json!(page.hrefs));
        }
        if script.contains("offsetParent") {
            return Ok(page.username_probe.clone());
        }
        Ok(Value::Null)
    }

    async fn query(&mut self, selector: &str) -> Result<Option<ElementHandle>, SessionError> {
        let password_cleared = self.password_cleared;
        let Some(page) = self.active_page() else {
            return Ok(None);
        };
        if selector.contains("password") {
            if page.password_field && !password_cleared {
                return Ok(Some(ElementHandle("password-field".to_string())));
            }
            return Ok(None);
        }
        if selector.contains("submit") {
            if page.submit_button {
                return Ok(Some(ElementHandle("submit-btn".to_string())));
            }
            return Ok(None);
        }
        if selector.contains("error") || selector.contains("alert") {
            if page.error_banner.is_some() {
                return Ok(Some(ElementHandle("error-banner".to_string())));
            }
            return Ok(None);
        }
        if page.username_selector.as_deref() == Some(selector) {
            return Ok(Some(ElementHandle("username-field".to_string())));
        }
        Ok(None)
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        let Some(page) = self.active_page() else {
            return Ok(Vec::new());
        };
        let mut handles = page
            .inputs
            .iter()
            .map(|input| ElementHandle(input.id.clone()))
            .collect::<Vec<_>>();
        if selector == "input" && page.password_field {
            handles.push(ElementHandle("password-field".to_string()));
        }
        Ok(handles)
    }

    async fn fill(&mut self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        self.filled.push((element.0.clone(), text.to_string()));
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), SessionError> {
        if element.0 == "submit-btn" {
            self.apply_submit();
        }
        Ok(())
    }

    async fn press(&mut self, element: &ElementHandle, key: &str) -> Result<(), SessionError> {
        self.pressed.push((element.0.clone(), key.to_string()));
        if element.0 == "password-field" && key == "Enter" {
            self.apply_submit();
        }
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        if name != "type" {
            return Ok(None);
        }
        if element.0 == "password-field" {
            return Ok(Some("password".to_string()));
        }
        let Some(page) = self.active_page() else {
            return Ok(None);
        };
        Ok(page
            .inputs
            .iter()
            .find(|input| input.id == element.0)
            .map(|input| input.input_type.clone()))
    }

    async fn text_content(&mut self, element: &ElementHandle) -> Result<String, SessionError> {
        if element.0 == "error-banner" {
            return Ok(self
                .active_page()
                .and_then(|page| page.error_banner.clone())
                .unwrap_or_default());
        }
        Ok(String::new())
    }

    async fn frame_count(&mut self) -> Result<usize, SessionError> {
        Ok(self
            .pages
            .get(&self.current)
            .map(|page| page.frames.len())
            .unwrap_or(0))
    }

    async fn switch_to_frame(&mut self, index: Option<usize>) -> Result<(), SessionError> {
        match index {
            None => {
                self.frame = None;
                Ok(())
            }
            Some(i) => {
                let frames = self
                    .pages
                    .get(&self.current)
                    .map(|page| page.frames.len())
                    .unwrap_or(0);
                if i < frames {
                    self.frame = Some(i);
                    Ok(())
                } else {
                    Err(SessionError::Protocol {
                        name: "no such frame".to_string(),
                        message: format!("frame index {i} out of range"),
                    })
                }
            }
        }
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.resets += 1;
        if self.fail_reset {
            return Err(SessionError::Navigation("reset failed".to_string()));
        }
        self.current = "about:blank".to_string();
        self.frame = None;
        Ok(())
    }
}
