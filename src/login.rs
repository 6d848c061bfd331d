//! Heuristic login automation.
//!
//! Given a login page and credentials, finds the password and username fields
//! (searching sub-frames when the form is rendered inside an iframe), submits
//! them, and verifies success heuristically. Failure is never fatal: the
//! caller gets a boolean plus diagnostics and continues unauthenticated.

use std::time::Duration;

use log::{info, warn};
use tokio::time::{Instant, sleep};

use crate::session::{ElementHandle, PageSession};
use crate::types::{SessionError, truncate_for_log};

/// Bound on the whole post-submit wait for the page to navigate away.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

const PASSWORD_SELECTOR: &str = r#"input[type="password"]"#;
const SUBMIT_SELECTOR: &str = r#"button[type="submit"], input[type="submit"]"#;
const TEXTLIKE_INPUTS: &str = r#"input[type="text"], input[type="email"], input:not([type])"#;
const ERROR_BANNER_SELECTOR: &str = r#"[class*="error"], [class*="alert-danger"], [role="alert"]"#;

/// Username-field heuristics, tried in order; first visible match wins.
/// Appending a new heuristic here is all it takes to extend detection.
const USERNAME_SELECTORS: &[&str] = &[
    r#"input[type="email"]"#,
    r#"input[name*="email" i]"#,
    r#"input[name*="user" i]"#,
    r#"input[name*="login" i]"#,
    r#"input[autocomplete="username"]"#,
    r#"input[autocomplete="email"]"#,
];

pub struct LoginOutcome {
    pub success: bool,
    pub diagnostics: Vec<String>,
}

/// Run the login flow against `login_url`. Leaves the session navigated past
/// the login page on success; on failure the session is still usable and the
/// reasons are in `diagnostics`.
pub async fn perform_login<S: PageSession>(
    session: &mut S,
    login_url: &str,
    username: &str,
    password: &str,
    page_load_timeout: Duration,
    settle: Duration,
) -> LoginOutcome {
    let mut diagnostics = Vec::new();
    let success = match login_flow(
        session,
        login_url,
        username,
        password,
        page_load_timeout,
        settle,
        &mut diagnostics,
    )
    .await
    {
        Ok(ok) => ok,
        Err(err) => {
            warn!("Login failed with exception: {err}");
            diagnostics.push(format!(
                "Login error: {}",
                truncate_for_log(&err.to_string(), 200)
            ));
            false
        }
    };

    // Leave no frame selection behind for the crawl that follows.
    let _ = session.switch_to_frame(None).await;

    LoginOutcome {
        success,
        diagnostics,
    }
}

async fn login_flow<S: PageSession>(
    session: &mut S,
    login_url: &str,
    username: &str,
    password: &str,
    page_load_timeout: Duration,
    settle: Duration,
    diagnostics: &mut Vec<String>,
) -> Result<bool, SessionError> {
    session.navigate(login_url, page_load_timeout).await?;
    sleep(settle.saturating_mul(2)).await;

    // Password field: main document first, then each sub-frame in order.
    let mut password_field = session.query(PASSWORD_SELECTOR).await.unwrap_or(None);
    let mut in_frame = false;
    if password_field.is_none() {
        sleep(settle).await;
        let frames = session.frame_count().await.unwrap_or(0);
        for index in 0..frames {
            if session.switch_to_frame(Some(index)).await.is_err() {
                continue;
            }
            match session.query(PASSWORD_SELECTOR).await {
                Ok(Some(field)) => {
                    info!("Found password field inside iframe {index}");
                    password_field = Some(field);
                    in_frame = true;
                    break;
                }
                _ => {
                    let _ = session.switch_to_frame(None).await;
                }
            }
        }
    }

    let Some(password_field) = password_field else {
        let title = session.title().await.unwrap_or_default();
        let input_count = session
            .query_all("input")
            .await
            .map(|els| els.len())
            .unwrap_or(0);
        diagnostics.push(format!(
            "No password field found on login page (title='{}', inputs={})",
            truncate_for_log(&title, 60),
            input_count
        ));
        warn!("No password field. title='{title}', inputs={input_count}, url={login_url}");
        return Ok(false);
    };

    let username_field = find_username_field(session, &password_field).await;
    let Some(username_field) = username_field else {
        diagnostics.push("No username/email field found on login page".to_string());
        warn!("Login page has no visible username field: {login_url}");
        return Ok(false);
    };

    session.fill(&username_field, username).await?;
    session.fill(&password_field, password).await?;

    let pre_login_url = session.current_url().await.unwrap_or_default();

    // Submit: prefer a submit-typed control, otherwise Enter in the password
    // field.
    match session.query(SUBMIT_SELECTOR).await {
        Ok(Some(submit)) => {
            if session.click(&submit).await.is_err() {
                let _ = session.press(&password_field, "Enter").await;
            }
        }
        _ => {
            let _ = session.press(&password_field, "Enter").await;
        }
    }

    // Poll until the page URL changes from its pre-submit value.
    let deadline = Instant::now() + LOGIN_TIMEOUT;
    while Instant::now() < deadline {
        sleep(POLL_INTERVAL).await;
        match session.current_url().await {
            Ok(current) if current != pre_login_url => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    // Let SPA redirects settle before checking.
    sleep(settle.saturating_mul(2)).await;

    if in_frame {
        let _ = session.switch_to_frame(None).await;
    }

    let post_login_url = session.current_url().await.unwrap_or_default();
    let password_still_visible = session
        .query(PASSWORD_SELECTOR)
        .await
        .map(|field| field.is_some())
        .unwrap_or(false);

    if post_login_url != pre_login_url || !password_still_visible {
        info!("Login successful. Redirected to: {post_login_url}");
        return Ok(true);
    }

    match session.query(ERROR_BANNER_SELECTOR).await {
        Ok(Some(banner)) => {
            let text = session.text_content(&banner).await.unwrap_or_default();
            diagnostics.push(format!("Login failed: {}", truncate_for_log(&text, 200)));
        }
        _ => {
            diagnostics.push("Login may have failed: still on login page".to_string());
        }
    }

    Ok(false)
}

/// Priority-ordered username detection in the same frame as the password
/// field, with a fallback to the first visible text-like input that is not
/// the password field itself.
async fn find_username_field<S: PageSession>(
    session: &mut S,
    password_field: &ElementHandle,
) -> Option<ElementHandle> {
    let probe = username_probe_script();
    let found = match session.evaluate(&probe).await {
        Ok(value) => value,
        Err(err) => {
            warn!("Username field detection failed: {err}");
            return None;
        }
    };

    match found.as_str() {
        Some("__fallback__") => {
            let candidates = session.query_all(TEXTLIKE_INPUTS).await.ok()?;
            for candidate in candidates {
                if candidate == *password_field {
                    continue;
                }
                let input_type = session
                    .attribute(&candidate, "type")
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                if input_type != "password" {
                    return Some(candidate);
                }
            }
            None
        }
        Some(selector) => session.query(selector).await.ok().flatten(),
        None => None,
    }
}

fn username_probe_script() -> String {
    let selectors = USERNAME_SELECTORS
        .iter()
        .map(|sel| format!("{sel:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
        (() => {{
            const selectors = [{selectors}];
            for (const sel of selectors) {{
                const el = document.querySelector(sel);
                if (el && el.offsetParent !== null) return sel;
            }}
            const inputs = document.querySelectorAll(
                'input[type="text"], input[type="email"], input:not([type])'
            );
            for (const inp of inputs) {{
                if (inp.type !== 'password' && inp.offsetParent !== null) {{
                    return '__fallback__';
                }}
            }}
            return null;
        }})()
        "#
    )
}
