//! WebDriver plumbing: driver process management, session bootstrap, and a
//! `PageSession` implementation speaking the W3C WebDriver REST protocol.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use clap::ValueEnum;
use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::time::sleep;

use crate::session::{ElementHandle, PageSession, ResponseMeta};
use crate::types::{SessionError, truncate_for_log};

/// W3C element identifier key in element JSON objects.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const ENTER_KEY: &str = "\u{E007}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
}

impl Browser {
    pub fn label(self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
        }
    }

    fn driver_binary(self) -> &'static str {
        match self {
            Browser::Chrome => "chromedriver",
            Browser::Firefox => "geckodriver",
        }
    }
}

/// How to reach (or start) a WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Existing server, e.g. `http://localhost:9515`. When unset, a local
    /// driver process is started on a free port.
    pub endpoint: Option<String>,
    pub browser: Browser,
    pub headless: bool,
    /// Override the driver binary looked up on PATH.
    pub driver_binary: Option<String>,
    /// How long to wait for a freshly started driver to accept connections.
    pub start_timeout: Duration,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            browser: Browser::Chrome,
            headless: true,
            driver_binary: None,
            start_timeout: Duration::from_secs(12),
        }
    }
}

/// A reachable WebDriver server plus the driver child process, if we spawned
/// one. Shut down (or dropped) after the crawl so no driver is left behind.
#[derive(Debug)]
pub struct WebDriverEngine {
    endpoint: String,
    browser: Browser,
    headless: bool,
    driver: Option<Child>,
    client: reqwest::Client,
}

impl WebDriverEngine {
    /// Connect to the configured endpoint, or start a local driver process
    /// and wait for it to accept connections.
    pub async fn launch(config: &WebDriverConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::new();

        if let Some(endpoint) = &config.endpoint {
            let endpoint = endpoint.trim_end_matches('/').to_string();
            if !webdriver_reachable(&endpoint) {
                return Err(SessionError::Setup(format!(
                    "no WebDriver server reachable at {endpoint}"
                )));
            }
            return Ok(Self {
                endpoint,
                browser: config.browser,
                headless: config.headless,
                driver: None,
                client,
            });
        }

        let port = find_free_local_port()?;
        let binary = config
            .driver_binary
            .clone()
            .unwrap_or_else(|| config.browser.driver_binary().to_string());

        let mut command = Command::new(&binary);
        match config.browser {
            Browser::Chrome => {
                command
                    .arg(format!("--port={port}"))
                    .arg("--allowed-origins=*")
                    .arg("--log-level=SEVERE");
            }
            Browser::Firefox => {
                command.arg("--port").arg(port.to_string());
            }
        }
        let mut child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| SessionError::Setup(format!("failed to start {binary}: {err}")))?;

        let endpoint = format!("http://127.0.0.1:{port}");
        let deadline = std::time::Instant::now() + config.start_timeout;
        loop {
            if webdriver_reachable(&endpoint) {
                break;
            }
            if let Ok(Some(status)) = child.try_wait() {
                return Err(SessionError::Setup(format!(
                    "{binary} exited during startup with {status}"
                )));
            }
            if std::time::Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::Setup(format!(
                    "{binary} did not come up on port {port} within {:?}",
                    config.start_timeout
                )));
            }
            sleep(Duration::from_millis(200)).await;
        }
        info!("started {binary} on port {port}");

        Ok(Self {
            endpoint,
            browser: config.browser,
            headless: config.headless,
            driver: Some(child),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create a browser session with the capabilities for the configured
    /// browser.
    pub async fn new_session(&self) -> Result<WebDriverSession, SessionError> {
        let payload = json!({
            "capabilities": {
                "alwaysMatch": self.capabilities(),
            }
        });
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&payload)
            .send()
            .await?;
        let body: Value = response.json().await?;
        check_webdriver_error(&body)?;

        let session_id = body
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SessionError::Setup(format!(
                    "session response without sessionId: {}",
                    truncate_for_log(&body.to_string(), 200)
                ))
            })?;

        Ok(WebDriverSession {
            base: format!("{}/session/{session_id}", self.endpoint),
            client: self.client.clone(),
        })
    }

    fn capabilities(&self) -> Value {
        match self.browser {
            Browser::Chrome => {
                let mut args = vec![
                    "--disable-gpu".to_string(),
                    "--window-size=1280,900".to_string(),
                    format!(
                        "--user-data-dir={}",
                        std::env::temp_dir()
                            .join(format!("sitewalker-{}", std::process::id()))
                            .display()
                    ),
                ];
                if self.headless {
                    args.push("--headless=new".to_string());
                }
                if !cfg!(target_os = "macos") {
                    args.push("--no-sandbox".to_string());
                }
                json!({
                    "browserName": "chrome",
                    "acceptInsecureCerts": true,
                    "goog:chromeOptions": { "args": args },
                })
            }
            Browser::Firefox => {
                let mut args: Vec<String> = Vec::new();
                if self.headless {
                    args.push("-headless".to_string());
                }
                json!({
                    "browserName": "firefox",
                    "acceptInsecureCerts": true,
                    "moz:firefoxOptions": { "args": args },
                })
            }
        }
    }

    /// Kill the driver process if we started it.
    pub fn shutdown(&mut self) {
        if let Some(mut child) = self.driver.take() {
            let _ = child.kill();
            let _ = child.wait();
            debug!("driver process stopped");
        }
    }
}

impl Drop for WebDriverEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn webdriver_reachable(endpoint: &str) -> bool {
    let Some(rest) = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
    else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    let Ok(addrs) = std::net::ToSocketAddrs::to_socket_addrs(&authority) else {
        return false;
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok() {
            return true;
        }
    }
    false
}

fn find_free_local_port() -> Result<u16, SessionError> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .map_err(|err| SessionError::Setup(format!("no free local port: {err}")))?;
    let port = listener
        .local_addr()
        .map_err(|err| SessionError::Setup(format!("no free local port: {err}")))?
        .port();
    Ok(port)
}

/// Map a WebDriver error body onto `SessionError::Protocol`.
fn check_webdriver_error(body: &Value) -> Result<(), SessionError> {
    let Some(name) = body.pointer("/value/error").and_then(Value::as_str) else {
        return Ok(());
    };
    let message = body
        .pointer("/value/message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    Err(SessionError::Protocol {
        name: name.to_string(),
        message: truncate_for_log(&message, 200),
    })
}

/// One live browser session addressed over the WebDriver REST API.
pub struct WebDriverSession {
    base: String,
    client: reqwest::Client,
}

impl WebDriverSession {
    async fn post(&self, path: &str, payload: Value) -> Result<Value, SessionError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&payload)
            .send()
            .await?;
        Self::into_value(response).await
    }

    async fn get(&self, path: &str) -> Result<Value, SessionError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await?;
        Self::into_value(response).await
    }

    async fn delete(&self, path: &str) -> Result<Value, SessionError> {
        let response = self
            .client
            .delete(format!("{}{path}", self.base))
            .send()
            .await?;
        Self::into_value(response).await
    }

    async fn into_value(response: reqwest::Response) -> Result<Value, SessionError> {
        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) if status.is_success() => return Err(SessionError::Transport(err)),
            Err(_) => {
                return Err(SessionError::Protocol {
                    name: format!("http {status}"),
                    message: "unparseable response body".to_string(),
                });
            }
        };
        check_webdriver_error(&body)?;
        if !status.is_success() {
            return Err(SessionError::Protocol {
                name: format!("http {status}"),
                message: truncate_for_log(&body.to_string(), 200),
            });
        }
        Ok(body)
    }

    /// Run a script synchronously in the page and return its value.
    async fn execute(&self, script: &str) -> Result<Value, SessionError> {
        let body = self
            .post("/execute/sync", json!({ "script": script, "args": [] }))
            .await
            .map_err(|err| match err {
                SessionError::Protocol { name, message } => SessionError::Evaluation(format!(
                    "{name}: {message}"
                )),
                other => other,
            })?;
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    }

    fn element_path(element: &ElementHandle, tail: &str) -> String {
        format!("/element/{}{tail}", element.0)
    }

    fn parse_element(value: &Value) -> Option<ElementHandle> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementHandle(id.to_string()))
    }

    /// End the browser session.
    pub async fn quit(self) -> Result<(), SessionError> {
        self.delete("").await?;
        Ok(())
    }
}

impl PageSession for WebDriverSession {
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<ResponseMeta>, SessionError> {
        let request = self.post("/url", json!({ "url": url }));
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err(SessionError::Timeout(timeout)),
        }

        // WebDriver exposes no response headers; the document knows its own
        // content type.
        let content_type = match self.execute("return document.contentType || '';").await {
            Ok(Value::String(ct)) if !ct.is_empty() => Some(ct),
            Ok(_) => None,
            Err(err) => {
                debug!("contentType probe failed for {url}: {err}");
                None
            }
        };
        Ok(Some(ResponseMeta { content_type }))
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        let body = self.get("/url").await?;
        Ok(body
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        match self
            .execute("return document.documentElement.outerHTML;")
            .await?
        {
            Value::String(html) => Ok(html),
            other => Err(SessionError::Evaluation(format!(
                "outerHTML returned non-string: {}",
                truncate_for_log(&other.to_string(), 100)
            ))),
        }
    }

    async fn title(&mut self) -> Result<String, SessionError> {
        let body = self.get("/title").await?;
        Ok(body
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        self.execute(script).await
    }

    async fn query(&mut self, selector: &str) -> Result<Option<ElementHandle>, SessionError> {
        let result = self
            .post(
                "/element",
                json!({ "using": "css selector", "value": selector }),
            )
            .await;
        match result {
            Ok(body) => Ok(body.get("value").and_then(Self::parse_element)),
            Err(SessionError::Protocol { name, .. }) if name == "no such element" => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        let body = self
            .post(
                "/elements",
                json!({ "using": "css selector", "value": selector }),
            )
            .await?;
        let elements = body
            .get("value")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Self::parse_element).collect())
            .unwrap_or_default();
        Ok(elements)
    }

    async fn fill(&mut self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        self.post(&Self::element_path(element, "/clear"), json!({}))
            .await?;
        self.post(
            &Self::element_path(element, "/value"),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), SessionError> {
        self.post(&Self::element_path(element, "/click"), json!({}))
            .await?;
        Ok(())
    }

    async fn press(&mut self, element: &ElementHandle, key: &str) -> Result<(), SessionError> {
        let text = match key {
            "Enter" => ENTER_KEY,
            other => other,
        };
        self.post(
            &Self::element_path(element, "/value"),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let body = self
            .get(&Self::element_path(element, &format!("/attribute/{name}")))
            .await?;
        Ok(body
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn text_content(&mut self, element: &ElementHandle) -> Result<String, SessionError> {
        let body = self.get(&Self::element_path(element, "/text")).await?;
        Ok(body
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn frame_count(&mut self) -> Result<usize, SessionError> {
        match self.execute("return window.frames.length;").await? {
            Value::Number(n) => Ok(n.as_u64().unwrap_or(0) as usize),
            _ => Ok(0),
        }
    }

    async fn switch_to_frame(&mut self, index: Option<usize>) -> Result<(), SessionError> {
        let id = match index {
            Some(i) => json!(i),
            None => Value::Null,
        };
        self.post("/frame", json!({ "id": id })).await?;
        Ok(())
    }

    /// Put the session back on a blank page so the next navigation starts
    /// clean. Falls back to cycling the window when even `about:blank` is
    /// stuck.
    async fn reset(&mut self) -> Result<(), SessionError> {
        let blank = self.post("/url", json!({ "url": "about:blank" }));
        match tokio::time::timeout(Duration::from_secs(5), blank).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(err)) => warn!("about:blank reset failed: {err}"),
            Err(_) => warn!("about:blank reset timed out"),
        }

        let body = self
            .post("/window/new", json!({ "type": "tab" }))
            .await?;
        let handle = body
            .pointer("/value/handle")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Setup("window/new returned no handle".to_string()))?
            .to_string();
        self.delete("/window").await?;
        self.post("/window", json!({ "handle": handle })).await?;
        Ok(())
    }
}
