//! Image resolution: [`ImageRef`] → [`ResolvedImage`].
//!
//! Two kinds of reference reach the resolver:
//!
//! * **Inline** `data:` payloads are already embeddable. They are decoded
//!   only far enough to read the pixel dimensions from the header; a payload
//!   that will not decode is passed through unchanged with unknown size.
//! * **Remote** URLs are turned into bytes by the configured
//!   [`ImageStrategy`]: an authenticated HTTP GET carrying the session
//!   cookies, or a screenshot of the live `<img>` element for sources that
//!   authorise at render time. The bytes are measured and re-encoded as a
//!   base64 `data:` URI.
//!
//! Every failure is soft. It is logged and the image becomes a placeholder
//! (or keeps its URL, see [`UnresolvedFallback`]); nothing here can abort a
//! harvest.
//!
//! ## Cache
//!
//! Results are cached per resolver, and a resolver lives for exactly one
//! run. Each distinct reference value gets one `OnceCell`; concurrent
//! requests for the same reference wait on the first one, so a reference is
//! fetched at most once and every caller sees the identical value.

use crate::config::{HarvestConfig, ImageStrategy, UnresolvedFallback};
use crate::error::ImageError;
use crate::labels::BROWSER_HEADERS;
use crate::model::{ImageRef, Item, ResolvedImage};
use crate::session::{cookie_header, BrowserSession, Cookie, HttpFetch, HttpResponse, Locator};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Headers attached to every authenticated fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    headers: Vec<(String, String)>,
}

impl AuthContext {
    /// Browser-identifying headers only.
    pub fn anonymous() -> Self {
        Self {
            headers: BROWSER_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Browser headers plus a `Cookie` header carrying the session cookies.
    pub fn from_cookies(cookies: &[Cookie]) -> Self {
        let mut ctx = Self::anonymous();
        if let Some(value) = cookie_header(cookies) {
            ctx.headers.push(("Cookie".to_string(), value));
        }
        ctx
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Resolves image references for one run.
pub struct ImageResolver {
    strategy: ImageStrategy,
    fallback: UnresolvedFallback,
    concurrency: usize,
    timeout: Duration,
    fetcher: Arc<dyn HttpFetch>,
    cache: Mutex<HashMap<String, Arc<OnceCell<ResolvedImage>>>>,
}

impl ImageResolver {
    pub fn new(config: &HarvestConfig, fetcher: Arc<dyn HttpFetch>) -> Self {
        Self {
            strategy: config.image_strategy,
            fallback: config.unresolved_fallback,
            concurrency: config.effective_image_concurrency(),
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            fetcher,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct references seen so far.
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Resolve one reference, consulting the per-run cache first.
    ///
    /// `session` is only used by the screenshot strategy; without one the
    /// resolver falls back to fetching.
    pub async fn resolve(
        &self,
        reference: &ImageRef,
        auth: &AuthContext,
        session: Option<&dyn BrowserSession>,
    ) -> ResolvedImage {
        let cell = {
            // A poisoned lock only means another task panicked mid-insert;
            // the map itself is still usable.
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            cache
                .entry(reference.as_str().to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_init(|| self.resolve_uncached(reference, auth, session))
            .await
            .clone()
    }

    /// Resolve every pending image slot of `item` in place.
    ///
    /// Slots are resolved concurrently up to the configured limit (always 1
    /// for screenshots, which share the session) and written back in order.
    pub async fn resolve_item(&self, item: &mut Item, session: &dyn BrowserSession) {
        let references: Vec<ImageRef> = item
            .image_slots()
            .map(|slot| slot.reference().clone())
            .collect();
        if references.is_empty() {
            return;
        }

        let auth = match session.cookies().await {
            Ok(cookies) => AuthContext::from_cookies(&cookies),
            Err(e) => {
                warn!("Item {}: could not read session cookies: {e}", item.ordinal);
                AuthContext::anonymous()
            }
        };

        let resolved: Vec<ResolvedImage> = stream::iter(references.iter())
            .map(|r| self.resolve(r, &auth, Some(session)))
            .buffered(self.concurrency)
            .collect()
            .await;

        for (slot, image) in item.image_slots_mut().into_iter().zip(resolved) {
            slot.resolve_with(image);
        }
        debug!(
            "Item {}: resolved {} image(s), {} distinct in cache",
            item.ordinal,
            references.len(),
            self.cached()
        );
    }

    async fn resolve_uncached(
        &self,
        reference: &ImageRef,
        auth: &AuthContext,
        session: Option<&dyn BrowserSession>,
    ) -> ResolvedImage {
        if reference.is_inline() {
            return measure_inline(reference.as_str());
        }

        let url = reference.as_str();
        let secs = self.timeout.as_secs();
        let bytes = match (self.strategy, session) {
            (ImageStrategy::Screenshot, Some(session)) => {
                match tokio::time::timeout(self.timeout, capture(session, url)).await {
                    Ok(r) => r,
                    Err(_) => Err(ImageError::Timeout {
                        url: url.to_string(),
                        secs,
                    }),
                }
            }
            _ => match tokio::time::timeout(self.timeout, self.fetch(url, auth)).await {
                Ok(r) => r,
                Err(_) => Err(ImageError::Timeout {
                    url: url.to_string(),
                    secs,
                }),
            },
        };

        match bytes.and_then(|b| embed_bytes(&b)) {
            Ok(image) => image,
            Err(e) => {
                warn!("Image unresolved, using fallback: {e}");
                match self.fallback {
                    UnresolvedFallback::Placeholder => ResolvedImage::unresolved(),
                    UnresolvedFallback::KeepUrl => ResolvedImage {
                        embeddable: Some(url.to_string()),
                        width: None,
                        height: None,
                    },
                }
            }
        }
    }

    async fn fetch(&self, url: &str, auth: &AuthContext) -> Result<Vec<u8>, ImageError> {
        let response = self.fetcher.get(url, auth.headers()).await?;
        if !response.is_success() {
            return Err(ImageError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response.bytes)
    }
}

async fn capture(session: &dyn BrowserSession, url: &str) -> Result<Vec<u8>, ImageError> {
    session
        .screenshot(&Locator::image_with_src(url))
        .await
        .map_err(|e| ImageError::Capture {
            url: url.to_string(),
            detail: e.to_string(),
        })
}

// ── Encoding ─────────────────────────────────────────────────────────────

/// Measure raw image bytes and wrap them in a base64 `data:` URI.
pub fn embed_bytes(bytes: &[u8]) -> Result<ResolvedImage, ImageError> {
    let (width, height) = dimensions(bytes)?;
    let mime = image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png");
    let b64 = STANDARD.encode(bytes);
    debug!("Embedded {width}×{height} {mime} → {} bytes base64", b64.len());
    Ok(ResolvedImage {
        embeddable: Some(format!("data:{mime};base64,{b64}")),
        width: Some(width),
        height: Some(height),
    })
}

/// Read pixel dimensions from the image header without decoding pixels.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode {
            detail: e.to_string(),
        })?
        .into_dimensions()
        .map_err(|e| ImageError::Decode {
            detail: e.to_string(),
        })
}

/// Decode the bytes of a `data:` URI. Both base64 and percent-free plain
/// payloads are accepted.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ImageError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::InvalidInline {
            detail: "missing data: scheme".into(),
        })?;
    let (meta, payload) = rest.split_once(',').ok_or_else(|| ImageError::InvalidInline {
        detail: "missing ',' separator".into(),
    })?;
    if meta.ends_with(";base64") {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ImageError::InvalidInline {
                detail: e.to_string(),
            })
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Inline payloads keep their original text; only the size is added.
fn measure_inline(uri: &str) -> ResolvedImage {
    match decode_data_uri(uri).and_then(|bytes| dimensions(&bytes)) {
        Ok((w, h)) => ResolvedImage {
            embeddable: Some(uri.to_string()),
            width: Some(w),
            height: Some(h),
        },
        Err(e) => {
            debug!("Inline image not measurable, passing through: {e}");
            ResolvedImage {
                embeddable: Some(uri.to_string()),
                width: None,
                height: None,
            }
        }
    }
}

// ── reqwest fetcher ──────────────────────────────────────────────────────

/// [`HttpFetch`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImageError::Fetch {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, ImageError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| ImageError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| ImageError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(HttpResponse {
            status,
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}
