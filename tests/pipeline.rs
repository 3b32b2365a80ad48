//! Integration tests for the harvest → resolve → assemble → layout → merge
//! flow.
//!
//! A scripted in-memory [`BrowserSession`] plays a small question bank:
//! each item is an HTML page whose reveal and next buttons change what the
//! session serves next. Visibility is decided by running the locator's CSS
//! against the current page with `scraper`, so the real selector set is
//! exercised end to end.
//!
//! Set `RUST_LOG=qbank2pdf=debug` to see the navigator's state changes.
//!
//! The pdfium-backed encoder test is gated behind `PDFIUM_E2E`:
//!   PDFIUM_E2E=1 cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use proptest::prelude::*;
use qbank2pdf::labels::{DEFAULT_REVEAL_LABEL, IMAGE_ERROR_PLACEHOLDER, NO_QUESTION_TEXT};
use qbank2pdf::pipeline::assemble::{assemble, Block, ImageCell};
use qbank2pdf::pipeline::layout::{paginate, LaidOutDocument};
use qbank2pdf::pipeline::merge::{plan_merge, MergeStep};
use qbank2pdf::pipeline::resolve::AuthContext;
use qbank2pdf::{
    harvest_items, render_items, run_with, BrowserSession, Cookie, DocumentEncoder,
    EncodedDocument, HarvestConfig, HarvestConfigBuilder, HarvestError, HarvestProgressCallback,
    HttpFetch, HttpResponse, ImageError, ImageRef, ImageResolver, ImageStrategy, ItemError,
    Locator, PageSnapshot, PdfiumEncoder, PipelineVariant, SectionKind, SessionError, StopReason,
    UnresolvedFallback,
};
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Location every scripted page reports; relative image sources resolve
/// against it.
const PAGE_URL: &str = "https://qbank.example/exam/118/A/q";

/// Route `tracing` output through the test harness so it only shows for
/// failing tests. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qbank2pdf=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn png_data_uri(width: u32, height: u32) -> String {
    use base64::Engine as _;
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png(width, height))
    )
}

/// One scripted item page.
#[derive(Debug, Clone)]
struct ScriptedItem {
    id: String,
    reveal_label: String,
    /// `false` drops the content-readiness marker from the page.
    ready_marker: bool,
    /// `false` renders the question without its text element.
    question_text: bool,
    /// Renders a fallback-style next link ahead of the real next button.
    decoy_next: bool,
    /// `false` simulates an explanation that never appears.
    answer_appears: bool,
    /// `false` renders the revealed page without any explanation sections.
    has_explanation: bool,
    has_next: bool,
    sub_steps: usize,
    diagnosis_images: Vec<String>,
    reference: Option<String>,
}

impl ScriptedItem {
    fn new(n: usize) -> Self {
        Self {
            id: format!("118A-{n}"),
            reveal_label: DEFAULT_REVEAL_LABEL.to_string(),
            ready_marker: true,
            question_text: true,
            decoy_next: false,
            answer_appears: true,
            has_explanation: true,
            has_next: true,
            sub_steps: 0,
            diagnosis_images: Vec::new(),
            reference: None,
        }
    }

    fn end_of_content() -> Self {
        Self {
            has_explanation: false,
            ..Self::new(0)
        }
    }

    fn render(&self, revealed: bool, steps_done: usize) -> String {
        let mut html = String::from("<html><body>");
        if self.decoy_next {
            html.push_str("<a class=\"next-question back-to-index\">目次へ</a>");
        }
        let wrapper = if self.ready_marker {
            "question-content"
        } else {
            "question-body"
        };
        html.push_str(&format!(
            "<div class=\"{wrapper}\"><span class=\"question-number\">{}</span>",
            self.id
        ));
        if self.question_text {
            html.push_str(&format!("<div class=\"question-text\">問題 {}</div>", self.id));
        }
        html.push_str(
            "<ul class=\"choice-list\">\
               <li><span class=\"choice-text\">a 選択肢</span></li>\
               <li><span class=\"choice-text\">b 選択肢</span></li>\
             </ul>",
        );
        if !revealed {
            if steps_done < self.sub_steps {
                html.push_str("<button class=\"next-step\">次へ</button>");
            } else {
                html.push_str(&format!(
                    "<button class=\"answer-check\">{}</button>",
                    self.reveal_label
                ));
            }
        }
        html.push_str("</div>");

        if revealed && self.answer_appears {
            html.push_str("<div class=\"answer-result\">正解</div>");
            if self.has_explanation {
                html.push_str(&format!(
                    "<div class=\"explanation-section\">\
                       <div class=\"section-title\">KEYWORD</div>\
                       <div class=\"section-detail\">keyword {}</div>\
                     </div>\
                     <div class=\"explanation-section\">\
                       <div class=\"section-title\">解法の要点</div>\
                       <div class=\"section-detail\">要点 {}</div>\
                     </div>",
                    self.id, self.id
                ));
                if !self.diagnosis_images.is_empty() {
                    html.push_str(
                        "<div class=\"explanation-section\">\
                           <div class=\"section-title\">画像診断</div>\
                           <div class=\"section-detail\">[1-1] 胸部X線写真</div>",
                    );
                    for src in &self.diagnosis_images {
                        html.push_str(&format!("<img src=\"{src}\">"));
                    }
                    html.push_str("</div>");
                }
                if let Some(title) = &self.reference {
                    html.push_str(&format!(
                        "<div class=\"reference-material\">\
                           <h4>{title}</h4><p>本文 {title}</p>\
                         </div>"
                    ));
                }
            }
        }

        if self.has_next {
            html.push_str("<button class=\"next-question\">次の問題</button>");
        }
        html.push_str("</body></html>");
        html
    }
}

#[derive(Debug, Default)]
struct SessionState {
    index: usize,
    revealed: bool,
    steps_done: usize,
}

/// In-memory question bank driven through the [`BrowserSession`] trait.
struct ScriptedSession {
    items: Vec<ScriptedItem>,
    state: Mutex<SessionState>,
    clicks: Mutex<Vec<String>>,
    screenshots: AtomicUsize,
}

impl ScriptedSession {
    fn new(items: Vec<ScriptedItem>) -> Self {
        Self {
            items,
            state: Mutex::new(SessionState::default()),
            clicks: Mutex::new(Vec::new()),
            screenshots: AtomicUsize::new(0),
        }
    }

    fn current_html(&self) -> String {
        let state = self.state.lock().unwrap();
        match self.items.get(state.index) {
            Some(item) => item.render(state.revealed, state.steps_done),
            None => "<html><body></body></html>".to_string(),
        }
    }

    fn clicks_on(&self, class: &str) -> usize {
        self.clicks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == class)
            .count()
    }

    /// Class attribute of the first element matching `locator`. Image
    /// sources are compared after resolving them against [`PAGE_URL`], the
    /// way a browser reports `img.src`.
    fn find(&self, locator: &Locator) -> Option<String> {
        let html = self.current_html();
        let doc = Html::parse_document(&html);
        let selector = Selector::parse(&locator.css).ok()?;
        let base = Url::parse(PAGE_URL).ok()?;
        doc.select(&selector)
            .filter(|el| match &locator.text {
                Some(text) => el.text().collect::<String>().trim() == text,
                None => true,
            })
            .find(|el| match &locator.src {
                Some(src) => el
                    .value()
                    .attr("src")
                    .and_then(|raw| base.join(raw).ok())
                    .is_some_and(|resolved| resolved.as_str() == src.as_str()),
                None => true,
            })
            .map(|el| el.value().attr("class").unwrap_or("").to_string())
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(&self, _url: &str) -> Result<(), SessionError> {
        *self.state.lock().unwrap() = SessionState::default();
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot, SessionError> {
        Ok(PageSnapshot {
            url: PAGE_URL.into(),
            html: self.current_html(),
        })
    }

    async fn click(&self, locator: &Locator) -> Result<(), SessionError> {
        let class = self.find(locator).ok_or_else(|| SessionError::ElementNotFound {
            locator: locator.to_string(),
        })?;
        self.clicks.lock().unwrap().push(class.clone());
        let mut state = self.state.lock().unwrap();
        match class.as_str() {
            "answer-check" => state.revealed = true,
            "next-step" => state.steps_done += 1,
            "next-question" => {
                state.index += 1;
                state.revealed = false;
                state.steps_done = 0;
            }
            _ => {}
        }
        Ok(())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool, SessionError> {
        Ok(self.find(locator).is_some())
    }

    async fn scroll_to_bottom(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn screenshot(&self, locator: &Locator) -> Result<Vec<u8>, SessionError> {
        self.find(locator).ok_or_else(|| SessionError::ElementNotFound {
            locator: locator.to_string(),
        })?;
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(png(8, 6))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, SessionError> {
        Ok(vec![Cookie {
            name: "session_id".into(),
            value: "abc123".into(),
        }])
    }
}

/// Serves PNGs for every URL except those containing `missing`.
#[derive(Default)]
struct FakeFetch {
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakeFetch {
    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpFetch for FakeFetch {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, ImageError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec()));
        if url.contains("missing") {
            return Ok(HttpResponse {
                status: 404,
                content_type: None,
                bytes: Vec::new(),
            });
        }
        Ok(HttpResponse {
            status: 200,
            content_type: Some("image/png".into()),
            bytes: png(600, 300),
        })
    }
}

/// Encoder that records what it was asked to do instead of producing a PDF.
#[derive(Default)]
struct RecordingEncoder {
    reference_pages: usize,
    merged_plans: Mutex<Vec<Vec<MergeStep>>>,
}

#[async_trait]
impl DocumentEncoder for RecordingEncoder {
    async fn encode(&self, doc: LaidOutDocument) -> Result<EncodedDocument, HarvestError> {
        Ok(EncodedDocument {
            bytes: b"%PDF-assembled".to_vec(),
            item_pages: doc.item_pages,
        })
    }

    async fn page_count(&self, _pdf: &[u8]) -> Result<usize, HarvestError> {
        Ok(self.reference_pages)
    }

    async fn merge(
        &self,
        plan: &[MergeStep],
        _assembled: &[u8],
        _reference: &[u8],
    ) -> Result<Vec<u8>, HarvestError> {
        self.merged_plans.lock().unwrap().push(plan.to_vec());
        Ok(b"%PDF-merged".to_vec())
    }
}

#[derive(Default)]
struct EventLog {
    started: AtomicUsize,
    completed: Mutex<Vec<usize>>,
    skipped: Mutex<Vec<usize>>,
    finished: Mutex<Option<(usize, usize)>>,
}

impl HarvestProgressCallback for EventLog {
    fn on_harvest_start(&self, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_item_complete(&self, ordinal: usize, _total: usize, _images: usize) {
        self.completed.lock().unwrap().push(ordinal);
    }

    fn on_item_skipped(&self, ordinal: usize, _total: usize, _reason: &str) {
        self.skipped.lock().unwrap().push(ordinal);
    }

    fn on_harvest_complete(&self, total: usize, harvested: usize) {
        *self.finished.lock().unwrap() = Some((total, harvested));
    }
}

/// Fast timings: every wait gives up after a single check.
fn fast_config(count: usize) -> HarvestConfigBuilder {
    init_tracing();
    HarvestConfig::builder()
        .start_location("https://qbank.example/exam/118/A/1")
        .item_count(count)
        .poll_interval_ms(1)
        .readiness_timeout_secs(0)
        .explanation_timeout_secs(0)
        .sub_step_timeout_secs(0)
        .question_text_attempts(1)
        .fetch_timeout_secs(5)
}

fn ordinals(items: &[qbank2pdf::Item]) -> Vec<usize> {
    items.iter().map(|i| i.ordinal).collect()
}

// ── Harvest loop ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn harvests_in_order_without_advancing_past_last() {
    let session = ScriptedSession::new((1..=4).map(ScriptedItem::new).collect());
    let config = fast_config(3).build().unwrap();
    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(ordinals(&harvest.items), vec![1, 2, 3]);
    assert_eq!(harvest.stop_reason, StopReason::Completed);
    assert!(harvest.item_errors.is_empty(), "{:?}", harvest.item_errors);
    assert_eq!(session.clicks_on("next-question"), 2);
    assert_eq!(
        harvest.items[1].explanation.text(SectionKind::Keyword),
        "keyword 118A-2"
    );
}

#[tokio::test]
async fn empty_explanation_ends_harvest_normally() {
    let mut items: Vec<ScriptedItem> = (1..=2).map(ScriptedItem::new).collect();
    items.push(ScriptedItem::end_of_content());
    let session = ScriptedSession::new(items);
    let config = fast_config(10).build().unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(ordinals(&harvest.items), vec![1, 2]);
    assert_eq!(harvest.stop_reason, StopReason::EndOfContent);
    assert_eq!(harvest.skipped, 0);
    assert!(harvest.item_errors.is_empty());
}

#[tokio::test]
async fn advance_failure_returns_partial_results() {
    let mut items: Vec<ScriptedItem> = (1..=4).map(ScriptedItem::new).collect();
    items[1].has_next = false;
    let session = ScriptedSession::new(items);
    let config = fast_config(4).build().unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(ordinals(&harvest.items), vec![1, 2]);
    assert_eq!(harvest.stop_reason, StopReason::AdvanceFailed);
    assert!(matches!(
        harvest.item_errors.as_slice(),
        [ItemError::AdvanceFailed { ordinal: 2, .. }]
    ));
}

#[tokio::test]
async fn explanation_timeout_skips_slot_and_continues() {
    let mut items: Vec<ScriptedItem> = (1..=3).map(ScriptedItem::new).collect();
    items[1].answer_appears = false;
    let session = ScriptedSession::new(items);
    let log = Arc::new(EventLog::default());
    let config = fast_config(3)
        .progress_callback(log.clone())
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(ordinals(&harvest.items), vec![1, 3]);
    assert_eq!(harvest.skipped, 1);
    assert_eq!(harvest.stop_reason, StopReason::Completed);
    assert!(harvest
        .item_errors
        .iter()
        .any(|e| matches!(e, ItemError::ExplanationTimeout { ordinal: 2, .. })));

    assert_eq!(log.started.load(Ordering::SeqCst), 1);
    assert_eq!(*log.completed.lock().unwrap(), vec![1, 3]);
    assert_eq!(*log.skipped.lock().unwrap(), vec![2]);
    assert_eq!(*log.finished.lock().unwrap(), Some((3, 2)));
}

#[tokio::test]
async fn unexpected_reveal_label_is_never_clicked() {
    let mut items: Vec<ScriptedItem> = (1..=2).map(ScriptedItem::new).collect();
    items[0].reveal_label = "解答を隠す".into();
    let session = ScriptedSession::new(items);
    let config = fast_config(2).build().unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(session.clicks_on("answer-check"), 1);
    assert_eq!(ordinals(&harvest.items), vec![2]);
    assert!(harvest.item_errors.iter().any(|e| matches!(
        e,
        ItemError::RevealLabelMismatch { ordinal: 1, found: Some(found), .. } if found == "解答を隠す"
    )));
}

#[tokio::test]
async fn multi_part_variant_steps_through_sub_views() {
    let mut items: Vec<ScriptedItem> = (1..=2).map(ScriptedItem::new).collect();
    for item in &mut items {
        item.sub_steps = 3;
    }
    let session = ScriptedSession::new(items);
    let config = fast_config(2)
        .variant(PipelineVariant::multi_part())
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(session.clicks_on("next-step"), 6);
    assert_eq!(ordinals(&harvest.items), vec![1, 2]);
    let problem = harvest.items[0].problem.as_ref().unwrap();
    assert_eq!(problem.item_id, "118A-1");
    assert_eq!(problem.question, "問題 118A-1");
    assert_eq!(problem.choices, vec!["a 選択肢", "b 選択肢"]);
}

#[tokio::test]
async fn reference_material_is_carried_forward() {
    let mut items: Vec<ScriptedItem> = (1..=3).map(ScriptedItem::new).collect();
    items[0].reference = Some("表1 分類".into());
    items[2].reference = Some("表2 治療".into());
    let session = ScriptedSession::new(items);
    let config = fast_config(3)
        .variant(PipelineVariant::with_reference_material())
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    let titles: Vec<&str> = harvest
        .items
        .iter()
        .map(|i| i.reference.as_ref().map(|r| r.title.as_str()).unwrap_or(""))
        .collect();
    assert_eq!(titles, vec!["表1 分類", "表1 分類", "表2 治療"]);
}

#[tokio::test]
async fn missing_question_text_falls_back_to_placeholder() {
    let mut items = vec![ScriptedItem::new(1)];
    items[0].question_text = false;
    let session = ScriptedSession::new(items);
    let config = fast_config(1)
        .variant(PipelineVariant::with_problem())
        .question_text_attempts(3)
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(ordinals(&harvest.items), vec![1]);
    let problem = harvest.items[0].problem.as_ref().unwrap();
    assert_eq!(problem.question, NO_QUESTION_TEXT);
    assert_eq!(problem.item_id, "118A-1");
    assert_eq!(problem.choices.len(), 2);
    assert!(harvest.item_errors.is_empty(), "{:?}", harvest.item_errors);
}

#[tokio::test]
async fn readiness_timeout_is_recorded_and_item_still_extracted() {
    let mut items: Vec<ScriptedItem> = (1..=2).map(ScriptedItem::new).collect();
    items[0].ready_marker = false;
    let session = ScriptedSession::new(items);
    let config = fast_config(2)
        .variant(PipelineVariant::with_problem())
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(ordinals(&harvest.items), vec![1, 2]);
    assert_eq!(harvest.stop_reason, StopReason::Completed);
    assert!(matches!(
        harvest.item_errors.as_slice(),
        [ItemError::ContentNotReady { ordinal: 1, .. }]
    ));
    let first = &harvest.items[0];
    assert_eq!(first.problem.as_ref().unwrap().question, "問題 118A-1");
    assert_eq!(first.explanation.text(SectionKind::Keyword), "keyword 118A-1");
}

#[tokio::test]
async fn failed_sub_step_is_recorded_and_reveal_still_happens() {
    // Multi-part variant expects three sub-views, but the page goes straight
    // to the reveal control.
    let session = ScriptedSession::new(vec![ScriptedItem::new(1)]);
    let config = fast_config(1)
        .variant(PipelineVariant::multi_part())
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    let failed_steps: Vec<usize> = harvest
        .item_errors
        .iter()
        .filter_map(|e| match e {
            ItemError::SubStepFailed { ordinal: 1, step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(failed_steps, vec![1, 2, 3]);
    assert_eq!(harvest.item_errors.len(), 3);
    assert_eq!(session.clicks_on("next-step"), 0);
    assert_eq!(session.clicks_on("answer-check"), 1);
    assert_eq!(ordinals(&harvest.items), vec![1]);
    assert_eq!(
        harvest.items[0].explanation.text(SectionKind::KeyPoints),
        "要点 118A-1"
    );
}

#[tokio::test]
async fn primary_next_control_wins_over_earlier_fallback() {
    let mut items: Vec<ScriptedItem> = (1..=2).map(ScriptedItem::new).collect();
    for item in &mut items {
        item.decoy_next = true;
    }
    let session = ScriptedSession::new(items);
    let config = fast_config(2).build().unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    assert_eq!(session.clicks_on("next-question back-to-index"), 0);
    assert_eq!(session.clicks_on("next-question"), 1);
    assert_eq!(
        harvest.items[1].explanation.text(SectionKind::Keyword),
        "keyword 118A-2"
    );
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unresolved_image_becomes_placeholder_in_document() {
    let mut items = vec![ScriptedItem::new(1)];
    items[0].diagnosis_images = vec![
        "https://cdn.example/xray.png".into(),
        "https://cdn.example/missing.png".into(),
        png_data_uri(40, 20),
    ];
    let session = ScriptedSession::new(items);
    let fetch = Arc::new(FakeFetch::default());
    let config = fast_config(1).build().unwrap();

    let harvest = harvest_items(&session, fetch.clone(), &config).await.unwrap();
    let slots = &harvest.items[0]
        .explanation
        .section(SectionKind::ImageDiagnosis)
        .unwrap()
        .images;
    let resolved: Vec<_> = slots.iter().map(|s| s.resolved().unwrap()).collect();
    assert_eq!(resolved[0].dimensions(), Some((600, 300)));
    assert!(resolved[0].is_inline());
    assert_eq!(resolved[1].embeddable, None);
    assert_eq!(resolved[2].dimensions(), Some((40, 20)));
    // The inline image never reaches the network.
    assert_eq!(fetch.request_count(), 2);

    let model = assemble(&harvest.items, config.layout.max_image_width());
    let grid = model.items[0]
        .blocks
        .iter()
        .find_map(|b| match b {
            Block::ImageGrid { rows } => Some(rows.clone()),
            _ => None,
        })
        .expect("three images form a grid");
    assert_eq!(grid.len(), 2);
    let cells: Vec<&ImageCell> = grid.iter().flatten().collect();
    assert!(matches!(cells[0], ImageCell::Image { width, .. } if *width <= config.layout.max_image_width()));
    assert_eq!(
        cells[1],
        &ImageCell::Error {
            message: IMAGE_ERROR_PLACEHOLDER.to_string()
        }
    );
    assert!(model.items[0]
        .blocks
        .contains(&Block::Text("胸部X線写真".to_string())));
}

#[tokio::test]
async fn keep_url_fallback_preserves_reference() {
    let mut items = vec![ScriptedItem::new(1)];
    items[0].diagnosis_images = vec!["https://cdn.example/missing.png".into()];
    let session = ScriptedSession::new(items);
    let config = fast_config(1)
        .unresolved_fallback(UnresolvedFallback::KeepUrl)
        .build()
        .unwrap();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();
    let slot = &harvest.items[0]
        .explanation
        .section(SectionKind::ImageDiagnosis)
        .unwrap()
        .images[0];
    assert_eq!(
        slot.resolved().unwrap().embeddable.as_deref(),
        Some("https://cdn.example/missing.png")
    );
}

#[tokio::test]
async fn fetch_carries_session_cookies() {
    let mut items = vec![ScriptedItem::new(1)];
    items[0].diagnosis_images = vec!["https://cdn.example/xray.png".into()];
    let session = ScriptedSession::new(items);
    let fetch = Arc::new(FakeFetch::default());
    let config = fast_config(1).build().unwrap();

    harvest_items(&session, fetch.clone(), &config).await.unwrap();

    let requests = fetch.requests.lock().unwrap();
    let (_, headers) = &requests[0];
    assert!(headers
        .iter()
        .any(|(k, v)| k == "Cookie" && v == "session_id=abc123"));
    assert!(headers.iter().any(|(k, _)| k == "User-Agent"));
}

#[tokio::test]
async fn relative_image_sources_are_fetched_absolute() {
    let mut items = vec![ScriptedItem::new(1)];
    items[0].diagnosis_images = vec!["/media/q/ct1.png".into(), "ct2.png".into()];
    let session = ScriptedSession::new(items);
    let fetch = Arc::new(FakeFetch::default());
    let config = fast_config(1).build().unwrap();

    let harvest = harvest_items(&session, fetch.clone(), &config).await.unwrap();

    let mut urls: Vec<String> = fetch
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|(url, _)| url.clone())
        .collect();
    urls.sort();
    assert_eq!(
        urls,
        vec![
            "https://qbank.example/exam/118/A/ct2.png",
            "https://qbank.example/media/q/ct1.png",
        ]
    );
    let slots = &harvest.items[0]
        .explanation
        .section(SectionKind::ImageDiagnosis)
        .unwrap()
        .images;
    assert!(slots
        .iter()
        .all(|s| s.resolved().unwrap().dimensions() == Some((600, 300))));
}

#[tokio::test]
async fn screenshot_strategy_captures_live_element() {
    let mut items = vec![ScriptedItem::new(1)];
    // Relative on the page; the capture must still find it by resolved src.
    items[0].diagnosis_images = vec!["/media/q/xray.png".into()];
    let session = ScriptedSession::new(items);
    let fetch = Arc::new(FakeFetch::default());
    let config = fast_config(1)
        .image_strategy(ImageStrategy::Screenshot)
        .build()
        .unwrap();

    let harvest = harvest_items(&session, fetch.clone(), &config).await.unwrap();

    assert_eq!(session.screenshots.load(Ordering::SeqCst), 1);
    assert_eq!(fetch.request_count(), 0);
    let slot = &harvest.items[0]
        .explanation
        .section(SectionKind::ImageDiagnosis)
        .unwrap()
        .images[0];
    assert_eq!(slot.resolved().unwrap().dimensions(), Some((8, 6)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Resolving the same references twice yields identical values and
    /// each distinct remote reference is fetched at most once.
    #[test]
    fn resolution_is_idempotent(
        picks in prop::collection::vec(0usize..6, 1..12),
    ) {
        let pool: Vec<String> = vec![
            "https://cdn.example/a.png".into(),
            "https://cdn.example/b.png".into(),
            "https://cdn.example/missing.png".into(),
            png_data_uri(3, 2),
            "data:image/png;base64,bm90IGFuIGltYWdl".into(),
            "https://cdn.example/a.png?v=2".into(),
        ];
        let refs: Vec<ImageRef> = picks.iter().map(|&i| ImageRef::new(pool[i].clone())).collect();

        let fetch = Arc::new(FakeFetch::default());
        let config = fast_config(1).build().unwrap();
        let resolver = ImageResolver::new(&config, fetch.clone());
        let auth = AuthContext::anonymous();

        let (first, second) = tokio_test::block_on(async {
            let mut first = Vec::new();
            for r in &refs {
                first.push(resolver.resolve(r, &auth, None).await);
            }
            let mut second = Vec::new();
            for r in &refs {
                second.push(resolver.resolve(r, &auth, None).await);
            }
            (first, second)
        });

        prop_assert_eq!(&first, &second);
        let mut distinct_remote: Vec<&ImageRef> = refs.iter().filter(|r| !r.is_inline()).collect();
        distinct_remote.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        distinct_remote.dedup();
        prop_assert_eq!(fetch.request_count(), distinct_remote.len());
        for (r, image) in refs.iter().zip(&first) {
            if r.is_inline() {
                prop_assert_eq!(image.embeddable.as_deref(), Some(r.as_str()));
            }
        }
    }
}

// ── Document ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_interleaves_reference_groups() {
    let dir = tempfile::tempdir().unwrap();
    let reference = dir.path().join("reference.pdf");
    std::fs::write(&reference, b"%PDF-1.7 reference").unwrap();

    let session = ScriptedSession::new((1..=2).map(ScriptedItem::new).collect());
    let encoder = RecordingEncoder {
        reference_pages: 10,
        ..Default::default()
    };
    let config = fast_config(2)
        .merge_with_reference(reference.to_string_lossy().to_string())
        .merge_group_size(4)
        .build()
        .unwrap();

    let output = run_with(&session, Arc::new(FakeFetch::default()), &encoder, &config)
        .await
        .unwrap();

    assert_eq!(output.pdf, b"%PDF-merged");
    assert_eq!(output.stats.harvested_items, 2);
    assert_eq!(output.stats.reference_pages_copied, 8);
    assert_eq!(
        output.stats.output_pages,
        output.stats.assembled_pages + 8
    );

    let plans = encoder.merged_plans.lock().unwrap();
    let references: Vec<MergeStep> = plans[0]
        .iter()
        .filter(|s| matches!(s, MergeStep::Reference(_)))
        .cloned()
        .collect();
    assert_eq!(
        references,
        vec![MergeStep::Reference(0..4), MergeStep::Reference(4..8)]
    );
}

#[tokio::test]
async fn missing_reference_fails_before_harvesting() {
    let session = ScriptedSession::new((1..=2).map(ScriptedItem::new).collect());
    let config = fast_config(2)
        .merge_with_reference("/no/such/reference.pdf")
        .build()
        .unwrap();

    let err = run_with(
        &session,
        Arc::new(FakeFetch::default()),
        &RecordingEncoder::default(),
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HarvestError::ReferenceNotFound { .. }));
    assert!(session.clicks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn saved_records_render_without_a_browser() {
    let session = ScriptedSession::new((1..=3).map(ScriptedItem::new).collect());
    let config = fast_config(3).build().unwrap();
    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");
    qbank2pdf::save_records(&path, &harvest.items).await.unwrap();
    let loaded = qbank2pdf::load_records(&path).await.unwrap();
    assert_eq!(loaded, harvest.items);

    let (rendered, stats) = render_items(&loaded, &RecordingEncoder::default(), &config)
        .await
        .unwrap();
    assert_eq!(rendered.pdf, b"%PDF-assembled");
    assert_eq!(stats.stop_reason, StopReason::FromRecords);
    assert_eq!(stats.harvested_items, 3);
    assert!(stats.assembled_pages >= 3);
}

#[tokio::test]
async fn every_item_starts_on_its_own_page() {
    let session = ScriptedSession::new((1..=3).map(ScriptedItem::new).collect());
    let config = fast_config(3)
        .variant(PipelineVariant::with_problem())
        .build()
        .unwrap();
    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();

    let model = assemble(&harvest.items, config.layout.max_image_width());
    assert_eq!(model.ordinals(), vec![1, 2, 3]);
    let laid_out = paginate(&model, &config.layout);
    assert_eq!(laid_out.item_pages.len(), 3);
    // The problem page break puts each explanation on a second page.
    assert!(laid_out.item_pages.iter().all(|&p| p >= 2));
    let owners: Vec<usize> = laid_out.pages.iter().map(|p| p.item_ordinal).collect();
    let mut sorted = owners.clone();
    sorted.sort();
    assert_eq!(owners, sorted);

    let plan = plan_merge(&laid_out.item_pages, 0, 4);
    assert!(plan.iter().all(|s| matches!(s, MergeStep::Assembled(_))));
}

// ── pdfium (gated) ───────────────────────────────────────────────────────────

/// Skip unless PDFIUM_E2E is set; pdfium must be loadable from
/// `PDFIUM_LIB_PATH`, the working directory, or the system.
macro_rules! pdfium_skip_unless_enabled {
    () => {{
        if std::env::var("PDFIUM_E2E").is_err() {
            println!("SKIP: set PDFIUM_E2E=1 to run pdfium-backed tests");
            return;
        }
    }};
}

fn encoder_from_env() -> PdfiumEncoder {
    PdfiumEncoder::new(
        std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        std::env::var_os("QBANK2PDF_FONT").map(PathBuf::from),
    )
}

#[tokio::test]
async fn pdfium_encodes_and_merges() {
    pdfium_skip_unless_enabled!();

    let mut items: Vec<ScriptedItem> = (1..=2).map(ScriptedItem::new).collect();
    items[0].diagnosis_images = vec!["https://cdn.example/xray.png".into()];
    let session = ScriptedSession::new(items);
    let config = fast_config(2).build().unwrap();
    let encoder = encoder_from_env();

    let harvest = harvest_items(&session, Arc::new(FakeFetch::default()), &config)
        .await
        .unwrap();
    let (rendered, stats) = render_items(&harvest.items, &encoder, &config)
        .await
        .unwrap();
    assert!(rendered.pdf.starts_with(b"%PDF"));
    assert_eq!(
        encoder.page_count(&rendered.pdf).await.unwrap(),
        stats.assembled_pages
    );

    // Merge the assembled document with itself as the reference.
    let dir = tempfile::tempdir().unwrap();
    let reference = dir.path().join("reference.pdf");
    std::fs::write(&reference, &rendered.pdf).unwrap();
    let merge_config = fast_config(2)
        .merge_with_reference(reference.to_string_lossy().to_string())
        .merge_group_size(1)
        .build()
        .unwrap();
    let (merged, merged_stats) = render_items(&harvest.items, &encoder, &merge_config)
        .await
        .unwrap();
    assert_eq!(merged_stats.reference_pages_copied, 2);
    assert_eq!(
        encoder.page_count(&merged.pdf).await.unwrap(),
        merged_stats.output_pages
    );

    let map: HashMap<&str, usize> = HashMap::from([
        ("assembled", stats.assembled_pages),
        ("merged", merged_stats.output_pages),
    ]);
    println!("pdfium page counts: {map:?}");
}
