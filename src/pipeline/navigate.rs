//! Navigator: drives one item slot through its on-page lifecycle.
//!
//! ```text
//! AwaitingContent → ChoicesVisible → AnswerRevealed → ExplanationReady → Advancing
//!        ↑                                                                  │
//!        └──────────────────────────── next item ───────────────────────────┘
//!                                   (or End)
//! ```
//!
//! Every wait is a bounded [`poll_until`] and every click is preceded by a
//! visibility check. Controls are resolved primary-first, the same way the
//! extractor reads fields: the first alternative of a [`SelectorChain`]
//! that has a visible match is the one clicked. Faults are classified where they happen:
//!
//! | fault                          | scope           | effect                              |
//! |--------------------------------|-----------------|-------------------------------------|
//! | readiness timeout              | recoverable     | logged, extraction still attempted  |
//! | sub-step failure               | recoverable     | logged, next sub-step               |
//! | reveal label mismatch/missing  | recoverable     | logged, click skipped               |
//! | explanation timeout            | item-fatal      | no record, best-effort advance      |
//! | advance failure                | loop-fatal      | harvest stops, items so far kept    |
//! | empty explanation              | termination     | harvest ends normally               |

use crate::config::{HarvestConfig, SelectorChain};
use crate::error::ItemError;
use crate::labels::NO_QUESTION_TEXT;
use crate::model::{Item, ProblemRecord};
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::poll::{poll_until, PollSchedule};
use crate::pipeline::resolve::ImageResolver;
use crate::session::{BrowserSession, Locator, PageSnapshot};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle states of one item slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    AwaitingContent,
    ChoicesVisible,
    AnswerRevealed,
    ExplanationReady,
    Advancing,
    End,
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a visit left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The next item is loaded.
    Advanced,
    /// This was the last requested slot; no advance was attempted.
    Last,
    /// The slot had no explanation content; nothing more to harvest.
    End,
    /// The next control was missing or did not respond.
    AdvanceFailed,
}

/// Result of visiting one slot.
#[derive(Debug)]
pub struct ItemVisit {
    /// `None` when the slot was skipped or ended the harvest.
    pub item: Option<Item>,
    pub errors: Vec<ItemError>,
    pub next: Transition,
}

/// Drives a single session through item slots.
pub struct Navigator<'a> {
    session: &'a dyn BrowserSession,
    extractor: &'a FieldExtractor,
    resolver: &'a ImageResolver,
    config: &'a HarvestConfig,
}

impl<'a> Navigator<'a> {
    pub fn new(
        session: &'a dyn BrowserSession,
        extractor: &'a FieldExtractor,
        resolver: &'a ImageResolver,
        config: &'a HarvestConfig,
    ) -> Self {
        Self {
            session,
            extractor,
            resolver,
            config,
        }
    }

    /// Visit slot `ordinal` (1-indexed). `is_last` suppresses the advance.
    pub async fn visit(&self, ordinal: usize, is_last: bool) -> ItemVisit {
        let mut errors = Vec::new();
        let mut state = NavState::AwaitingContent;
        let variant = self.config.variant;

        if let Err(e) = self.await_content(ordinal).await {
            warn!("{e}; attempting extraction anyway");
            errors.push(e);
        }

        let problem = if variant.include_problem {
            Some(self.extract_problem(ordinal).await)
        } else {
            None
        };
        self.step(&mut state, NavState::ChoicesVisible, ordinal);

        for step in 1..=variant.pre_reveal_steps {
            if let Err(e) = self.sub_step(ordinal, step).await {
                warn!("{e}; continuing");
                errors.push(e);
            }
        }

        if let Err(e) = self.reveal(ordinal).await {
            warn!("{e}; skipping reveal click");
            errors.push(e);
        }
        self.step(&mut state, NavState::AnswerRevealed, ordinal);

        let marker = Locator::css(self.config.selectors.revealed_marker.joined());
        if !self
            .session
            .wait_visible(&marker, self.config.explanation_timeout())
            .await
        {
            let e = ItemError::ExplanationTimeout {
                ordinal,
                secs: self.config.explanation_timeout_secs,
            };
            warn!("{e}; skipping slot");
            errors.push(e);
            let next = self.leave(&mut state, ordinal, is_last, &mut errors).await;
            return ItemVisit {
                item: None,
                errors,
                next,
            };
        }
        self.step(&mut state, NavState::ExplanationReady, ordinal);

        let page = self.snapshot(ordinal).await;
        let explanation = self.extractor.explanation(&page);
        if explanation.is_empty() {
            debug!("Item {ordinal}: no explanation content, end of harvest");
            self.step(&mut state, NavState::End, ordinal);
            return ItemVisit {
                item: None,
                errors,
                next: Transition::End,
            };
        }
        let reference = if variant.include_reference_material {
            self.extractor.reference(&page)
        } else {
            None
        };

        let mut item = Item {
            ordinal,
            problem,
            explanation,
            reference,
        };
        // Screenshot resolution needs the item still on screen.
        self.resolver.resolve_item(&mut item, self.session).await;

        let next = self.leave(&mut state, ordinal, is_last, &mut errors).await;
        ItemVisit {
            item: Some(item),
            errors,
            next,
        }
    }

    fn step(&self, state: &mut NavState, to: NavState, ordinal: usize) {
        debug!("Item {ordinal}: {state} → {to}");
        *state = to;
    }

    async fn leave(
        &self,
        state: &mut NavState,
        ordinal: usize,
        is_last: bool,
        errors: &mut Vec<ItemError>,
    ) -> Transition {
        if is_last {
            self.step(state, NavState::End, ordinal);
            return Transition::Last;
        }
        self.step(state, NavState::Advancing, ordinal);
        match self.advance(ordinal).await {
            Ok(()) => {
                self.step(state, NavState::AwaitingContent, ordinal + 1);
                Transition::Advanced
            }
            Err(e) => {
                warn!("{e}; stopping harvest");
                errors.push(e);
                self.step(state, NavState::End, ordinal);
                Transition::AdvanceFailed
            }
        }
    }

    /// Scroll, then check the readiness marker; repeat until the readiness
    /// ceiling.
    async fn await_content(&self, ordinal: usize) -> Result<(), ItemError> {
        let marker = Locator::css(self.config.selectors.content_ready.joined());
        let schedule =
            PollSchedule::with_deadline(self.config.poll_interval(), self.config.readiness_timeout());
        let session = self.session;
        let marker = &marker;
        let outcome = poll_until(schedule, move || async move {
            if let Err(e) = session.scroll_to_bottom().await {
                debug!("Item {ordinal}: scroll failed: {e}");
            }
            session.is_visible(marker).await.ok().filter(|v| *v)
        })
        .await;
        if outcome.is_ready() {
            Ok(())
        } else {
            Err(ItemError::ContentNotReady {
                ordinal,
                waited_ms: self.config.readiness_timeout().as_millis() as u64,
            })
        }
    }

    /// Poll the question text; its absence usually means "not rendered yet".
    async fn extract_problem(&self, ordinal: usize) -> ProblemRecord {
        let schedule =
            PollSchedule::with_attempts(self.config.poll_interval(), self.config.question_text_attempts);
        let session = self.session;
        let extractor = self.extractor;
        let question = poll_until(schedule, move || async move {
            let snapshot = session.snapshot().await.ok()?;
            extractor.question_text(&snapshot.html)
        })
        .await
        .ready()
        .unwrap_or_else(|| {
            warn!("Item {ordinal}: question text never appeared");
            NO_QUESTION_TEXT.to_string()
        });

        let page = self.snapshot(ordinal).await;
        self.extractor.problem(&page, ordinal, question)
    }

    /// Wait for the sub-step control, click it, and wait for it to settle.
    async fn sub_step(&self, ordinal: usize, step: usize) -> Result<(), ItemError> {
        let chain = &self.config.selectors.sub_step_button;
        let timeout = self.config.sub_step_timeout();
        let failed = |detail: String| ItemError::SubStepFailed {
            ordinal,
            step,
            detail,
        };

        let Some(control) = self.locate(chain, timeout).await else {
            return Err(failed(format!("{} not visible", chain.joined())));
        };
        self.session
            .click(&control)
            .await
            .map_err(|e| failed(e.to_string()))?;
        // The next control (sub-step or reveal) replaces this one.
        let next = Locator::css(format!(
            "{}, {}",
            self.config.selectors.sub_step_button.joined(),
            self.config.selectors.reveal_button.joined()
        ));
        if !self.session.wait_visible(&next, timeout).await {
            return Err(failed("view did not settle after click".into()));
        }
        debug!("Item {ordinal}: sub-step {step} done");
        Ok(())
    }

    /// Click the reveal control only when its label is the expected one.
    async fn reveal(&self, ordinal: usize) -> Result<(), ItemError> {
        let expected = self.config.reveal_label.as_str();
        let mismatch = |found: Option<String>| ItemError::RevealLabelMismatch {
            ordinal,
            expected: expected.to_string(),
            found,
        };

        let Some(control) = self
            .locate(&self.config.selectors.reveal_button, self.config.sub_step_timeout())
            .await
        else {
            return Err(mismatch(None));
        };
        let page = self.snapshot(ordinal).await;
        let found = self.extractor.reveal_label(&page.html);
        if found.as_deref() != Some(expected) {
            return Err(mismatch(found));
        }
        self.session
            .click(&control.with_text(expected))
            .await
            .map_err(|_| mismatch(Some(expected.to_string())))
    }

    /// Click the next control and wait for the next item's readiness marker.
    async fn advance(&self, ordinal: usize) -> Result<(), ItemError> {
        let chain = &self.config.selectors.next_button;
        let failed = |detail: String| ItemError::AdvanceFailed { ordinal, detail };

        let Some(control) = self.locate(chain, self.config.sub_step_timeout()).await else {
            return Err(failed(format!("{} not visible", chain.joined())));
        };
        self.session
            .click(&control)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let ready = Locator::css(self.config.selectors.content_ready.joined());
        if !self
            .session
            .wait_visible(&ready, self.config.readiness_timeout())
            .await
        {
            return Err(failed("next item never became ready".into()));
        }
        Ok(())
    }

    /// Wait up to `timeout` for a control and return the locator of the
    /// first alternative in `chain` with a visible match.
    async fn locate(&self, chain: &SelectorChain, timeout: Duration) -> Option<Locator> {
        let alternatives: Vec<Locator> = chain
            .0
            .iter()
            .map(|css| Locator::css(css.as_str()))
            .collect();
        let schedule = PollSchedule::with_deadline(self.config.poll_interval(), timeout);
        let session = self.session;
        let alternatives = &alternatives;
        poll_until(schedule, move || async move {
            for alternative in alternatives {
                if session.is_visible(alternative).await.unwrap_or(false) {
                    return Some(alternative.clone());
                }
            }
            None
        })
        .await
        .ready()
    }

    /// Current page, or an empty document when the snapshot fails.
    async fn snapshot(&self, ordinal: usize) -> PageSnapshot {
        match self.session.snapshot().await {
            Ok(page) => page,
            Err(e) => {
                warn!("Item {ordinal}: snapshot failed: {e}");
                PageSnapshot {
                    url: String::new(),
                    html: String::new(),
                }
            }
        }
    }
}
