//! [`BrowserSession`] over the Chrome DevTools protocol (chromiumoxide).
//!
//! Logging in is not this crate's job. Either connect to a Chrome that is
//! already logged in (`--remote-debugging-port`) with
//! [`ChromeSession::connect`], or launch one on a persistent profile
//! directory whose cookies survive between runs with
//! [`ChromeSession::launch`].
//!
//! Element queries run as small JavaScript snippets so a [`Locator`] with a
//! text filter needs no extra round-trips.

use crate::error::{HarvestError, SessionError};
use crate::session::{BrowserSession, Cookie, Locator, PageSnapshot};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Pause between scroll steps so lazy content can attach.
const SCROLL_STEP_DELAY: Duration = Duration::from_millis(120);
/// Upper bound on scroll steps per pass.
const MAX_SCROLL_STEPS: usize = 60;
/// Attribute that tags the element an element screenshot is taken of.
const CAPTURE_MARK: &str = "data-qbank2pdf-capture";

pub struct ChromeSession {
    // Kept alive for the lifetime of the session; dropping a launched
    // browser kills the process.
    _browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    /// Attach to a running Chrome via its DevTools websocket URL and reuse
    /// its first open tab.
    pub async fn connect(ws_url: &str) -> Result<Self, HarvestError> {
        let (browser, handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| HarvestError::Session(format!("connect {ws_url}: {e}")))?;
        let handler = spawn_handler(handler);
        let existing = browser
            .pages()
            .await
            .map_err(|e| HarvestError::Session(e.to_string()))?;
        let page = match existing.into_iter().next() {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|e| HarvestError::Session(e.to_string()))?,
        };
        info!("Connected to Chrome at {ws_url}");
        Ok(Self {
            _browser: Mutex::new(browser),
            page,
            handler,
        })
    }

    /// Launch Chrome, optionally on a persistent profile directory.
    pub async fn launch(user_data_dir: Option<&Path>, headless: bool) -> Result<Self, HarvestError> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        if let Some(dir) = user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        let config = builder.build().map_err(HarvestError::Session)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::Session(format!("launch: {e}")))?;
        let handler = spawn_handler(handler);
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::Session(e.to_string()))?;
        info!("Launched Chrome (headless: {headless})");
        Ok(Self {
            _browser: Mutex::new(browser),
            page,
            handler,
        })
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, js: String) -> Result<T, SessionError> {
        self.page
            .evaluate(js)
            .await
            .map_err(protocol)?
            .into_value::<T>()
            .map_err(|e| SessionError::Protocol(format!("unexpected script result: {e}")))
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("DevTools handler stopped: {e}");
                break;
            }
        }
    })
}

fn protocol(e: chromiumoxide::error::CdpError) -> SessionError {
    SessionError::Protocol(e.to_string())
}

fn js_string(value: Option<&str>) -> String {
    match value {
        Some(v) => serde_json::Value::from(v).to_string(),
        None => "null".to_string(),
    }
}

/// JavaScript expression selecting the elements a locator denotes.
///
/// The source filter compares against `e.src`, which the browser already
/// resolved against the document base, and falls back to a resolved
/// `data-src` for images whose lazy loader has not run yet.
fn query_js(locator: &Locator) -> String {
    let css = js_string(Some(locator.css.as_str()));
    let text = js_string(locator.text.as_deref());
    let src = js_string(locator.src.as_deref());
    format!(
        "Array.from(document.querySelectorAll({css})).filter(e => ({text} === null || \
         (e.innerText || e.textContent || '').trim() === {text}) && ({src} === null || \
         e.src === {src} || (() => {{ const lazy = e.getAttribute('data-src'); \
         try {{ return !!lazy && new URL(lazy, document.baseURI).href === {src}; }} \
         catch (_) {{ return false; }} }})()))"
    )
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.page.goto(url).await.map_err(protocol)?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot, SessionError> {
        let html = self.page.content().await.map_err(protocol)?;
        let url = self.page.url().await.map_err(protocol)?.unwrap_or_default();
        Ok(PageSnapshot { url, html })
    }

    async fn click(&self, locator: &Locator) -> Result<(), SessionError> {
        let js = format!(
            "(() => {{ const el = {}[0]; if (!el) return false; \
             el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            query_js(locator)
        );
        if self.eval::<bool>(js).await? {
            Ok(())
        } else {
            Err(SessionError::ElementNotFound {
                locator: locator.to_string(),
            })
        }
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool, SessionError> {
        let js = format!(
            "{}.some(e => {{ const r = e.getBoundingClientRect(); \
             const s = getComputedStyle(e); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})",
            query_js(locator)
        );
        self.eval::<bool>(js).await
    }

    async fn scroll_to_bottom(&self) -> Result<(), SessionError> {
        for _ in 0..MAX_SCROLL_STEPS {
            let at_bottom: bool = self
                .eval(
                    "(() => { window.scrollBy(0, window.innerHeight); \
                     return window.innerHeight + window.scrollY >= document.body.scrollHeight - 2; })()"
                        .to_string(),
                )
                .await?;
            tokio::time::sleep(SCROLL_STEP_DELAY).await;
            if at_bottom {
                break;
            }
        }
        self.eval::<bool>("(() => { window.scrollTo(0, 0); return true; })()".to_string())
            .await?;
        Ok(())
    }

    async fn screenshot(&self, locator: &Locator) -> Result<Vec<u8>, SessionError> {
        // Tag the match in-page so CDP can address it with a plain selector.
        let js = format!(
            "(() => {{ document.querySelectorAll('[{CAPTURE_MARK}]')\
             .forEach(e => e.removeAttribute('{CAPTURE_MARK}')); \
             const el = {}[0]; if (!el) return false; \
             el.setAttribute('{CAPTURE_MARK}', ''); return true; }})()",
            query_js(locator)
        );
        if !self.eval::<bool>(js).await? {
            return Err(SessionError::ElementNotFound {
                locator: locator.to_string(),
            });
        }
        let element = self
            .page
            .find_element(format!("[{CAPTURE_MARK}]"))
            .await
            .map_err(|_| SessionError::ElementNotFound {
                locator: locator.to_string(),
            })?;
        element.scroll_into_view().await.map_err(protocol)?;
        let shot = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(protocol);
        let cleanup = format!(
            "(() => {{ document.querySelectorAll('[{CAPTURE_MARK}]')\
             .forEach(e => e.removeAttribute('{CAPTURE_MARK}')); return true; }})()"
        );
        if let Err(e) = self.eval::<bool>(cleanup).await {
            debug!("Could not clear capture mark: {e}");
        }
        shot
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, SessionError> {
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
            })
            .collect())
    }
}
