//! Narrow interfaces to the external collaborators: the authenticated
//! browser session and the HTTP client.
//!
//! The pipeline never talks to chromiumoxide or reqwest directly; it goes
//! through [`BrowserSession`] and [`HttpFetch`]. Tests substitute scripted
//! in-memory implementations, and [`crate::chrome::ChromeSession`] (feature
//! `browser`) is the production driver.

use crate::error::{ImageError, SessionError};
use crate::pipeline::poll::{poll_until, PollSchedule};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Interval used by the default [`BrowserSession::wait_visible`].
const WAIT_VISIBLE_INTERVAL: Duration = Duration::from_millis(250);

/// Identifies an element: a CSS selector, optionally narrowed to elements
/// whose trimmed visible text equals `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub css: String,
    pub text: Option<String>,
    /// Keep only elements whose resolved (absolute) image source equals
    /// this URL, i.e. what `img.src` reports rather than the raw attribute.
    pub src: Option<String>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
            src: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Locator for the `<img>` element whose resolved source is `url`.
    pub fn image_with_src(url: &str) -> Self {
        Self {
            src: Some(url.to_string()),
            ..Self::css("img")
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.css)?;
        if let Some(t) = &self.text {
            write!(f, " [text={t:?}]")?;
        }
        if let Some(src) = &self.src {
            write!(f, " [src={src:?}]")?;
        }
        Ok(())
    }
}

/// Serialized DOM of the current page at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
}

/// A session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Render cookies as a single `Cookie:` header value.
pub fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// The authenticated, stateful browser page the harvest runs in.
///
/// One session drives the whole traversal; implementations need not
/// support concurrent calls.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to `url` and wait for the load to finish.
    async fn goto(&self, url: &str) -> Result<(), SessionError>;

    /// Capture the current DOM.
    async fn snapshot(&self) -> Result<PageSnapshot, SessionError>;

    /// Click the first element matching `locator`.
    async fn click(&self, locator: &Locator) -> Result<(), SessionError>;

    /// `true` when an element matching `locator` is rendered and visible.
    async fn is_visible(&self, locator: &Locator) -> Result<bool, SessionError>;

    /// Scroll through the whole page so lazily rendered content materialises.
    async fn scroll_to_bottom(&self) -> Result<(), SessionError>;

    /// PNG screenshot of the first element matching `locator`.
    async fn screenshot(&self, locator: &Locator) -> Result<Vec<u8>, SessionError>;

    /// Cookies of the current browsing context.
    async fn cookies(&self) -> Result<Vec<Cookie>, SessionError>;

    /// Wait up to `timeout` for `locator` to become visible.
    ///
    /// Probe errors count as "not visible yet".
    async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> bool {
        let schedule = PollSchedule::with_deadline(WAIT_VISIBLE_INTERVAL.min(timeout), timeout);
        let this = self;
        poll_until(schedule, move || async move {
            this.is_visible(locator).await.ok().filter(|v| *v)
        })
        .await
        .is_ready()
    }
}

/// Response of an [`HttpFetch::get`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain HTTP GET with caller-supplied headers.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, ImageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn cookie_header_joins_pairs() {
        let cookies = vec![
            Cookie {
                name: "sid".into(),
                value: "abc".into(),
            },
            Cookie {
                name: "csrf".into(),
                value: "x1".into(),
            },
        ];
        assert_eq!(cookie_header(&cookies).as_deref(), Some("sid=abc; csrf=x1"));
        assert_eq!(cookie_header(&[]), None);
    }

    #[test]
    fn image_locator_matches_resolved_src() {
        let l = Locator::image_with_src("https://qbank.example/media/q/ct1.png");
        assert_eq!(l.css, "img");
        assert_eq!(l.src.as_deref(), Some("https://qbank.example/media/q/ct1.png"));
        assert_eq!(
            l.to_string(),
            "img [src=\"https://qbank.example/media/q/ct1.png\"]"
        );
    }

    #[test]
    fn locator_display_includes_text() {
        let l = Locator::css("button.answer").with_text("解答を確認する");
        assert_eq!(l.to_string(), "button.answer [text=\"解答を確認する\"]");
    }

    struct AppearsAfter {
        calls: AtomicU32,
        after: u32,
    }

    #[async_trait]
    impl BrowserSession for AppearsAfter {
        async fn goto(&self, _url: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn snapshot(&self) -> Result<PageSnapshot, SessionError> {
            Ok(PageSnapshot {
                url: String::new(),
                html: String::new(),
            })
        }
        async fn click(&self, _l: &Locator) -> Result<(), SessionError> {
            Ok(())
        }
        async fn is_visible(&self, _l: &Locator) -> Result<bool, SessionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                return Err(SessionError::Protocol("transient".into()));
            }
            Ok(n >= self.after)
        }
        async fn scroll_to_bottom(&self) -> Result<(), SessionError> {
            Ok(())
        }
        async fn screenshot(&self, _l: &Locator) -> Result<Vec<u8>, SessionError> {
            Ok(Vec::new())
        }
        async fn cookies(&self) -> Result<Vec<Cookie>, SessionError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn wait_visible_tolerates_transient_errors() {
        let s = AppearsAfter {
            calls: AtomicU32::new(0),
            after: 3,
        };
        assert!(s.wait_visible(&Locator::css("x"), Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn wait_visible_times_out() {
        let s = AppearsAfter {
            calls: AtomicU32::new(0),
            after: u32::MAX,
        };
        assert!(!s.wait_visible(&Locator::css("x"), Duration::from_millis(10)).await);
    }
}
