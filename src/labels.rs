//! Section labels, marker strings and default selectors.
//!
//! Every literal the extractor or navigator matches against lives here, so
//! adapting to a changed site means editing exactly one place (or
//! overriding [`crate::config::SelectorSet`] from a JSON file). Unit tests
//! import these constants directly.

/// Title of the keyword block.
pub const LABEL_KEYWORD: &str = "KEYWORD";
/// Title of the key-solving-points block.
pub const LABEL_KEY_POINTS: &str = "解法の要点";
/// Title of the diagnosis block.
pub const LABEL_DIAGNOSIS: &str = "診断";
/// Title of the per-choice analysis block.
pub const LABEL_CHOICE_ANALYSIS: &str = "選択肢解説";
/// Title of the guideline block.
pub const LABEL_GUIDELINE: &str = "ガイドライン";
/// Title of the diagnostic-image block.
pub const LABEL_IMAGE_DIAGNOSIS: &str = "画像診断";

/// Substituted for the question text when polling never finds it.
pub const NO_QUESTION_TEXT: &str = "（問題文を取得できませんでした）";

/// Label the answer-reveal control must carry before it is clicked.
pub const DEFAULT_REVEAL_LABEL: &str = "解答を確認する";

/// Rendered in an image cell whose reference could not be resolved.
pub const IMAGE_ERROR_PLACEHOLDER: &str = "[画像を取得できませんでした]";

/// Header printed above the explanation material of each item.
pub const EXPLANATION_HEADER: &str = "解説";

/// Header printed above the carried-forward reference material.
pub const REFERENCE_HEADER: &str = "参考資料";

/// Browser-identifying header set sent with every authenticated image fetch.
pub const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    ),
    (
        "Accept",
        "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
    ),
    ("Accept-Language", "ja,en-US;q=0.9,en;q=0.8"),
    ("Sec-Fetch-Dest", "image"),
    ("Sec-Fetch-Mode", "no-cors"),
    ("Sec-Fetch-Site", "same-site"),
];

/// Default selectors. Each list is tried in order; the first match wins.
pub mod selectors {
    pub const CONTENT_READY: &[&str] = &[".question-content", "#question"];
    pub const QUESTION_TEXT: &[&str] = &[".question-content .question-text", ".question-text"];
    pub const QUESTION_IMAGES: &[&str] = &[".question-content .question-images", ".question-images"];
    pub const ITEM_ID: &[&str] = &[".question-number", ".question-id"];
    pub const CHOICES: &[&str] = &[".choice-list li .choice-text", ".choices li"];
    pub const SUB_STEP_BUTTON: &[&str] = &["button.next-step", ".step-next"];
    pub const REVEAL_BUTTON: &[&str] = &["button.answer-check", ".answer-button"];
    pub const REVEALED_MARKER: &[&str] = &[".answer-result", ".correct-answer"];
    pub const NEXT_BUTTON: &[&str] = &["button.next-question", "a.next-question"];
    pub const SECTION_BLOCK: &[&str] = &[".explanation-section", ".kaisetsu-block"];
    pub const SECTION_TITLE: &[&str] = &[".section-title", "h3"];
    pub const SECTION_DETAIL: &[&str] = &[".section-detail", "p"];
    pub const REFERENCE_BLOCK: &[&str] = &[".reference-material", ".reference"];
    pub const REFERENCE_TITLE: &[&str] = &[".reference-title", "h4"];
    pub const REFERENCE_BODY: &[&str] = &[".reference-body", "p"];
    pub const IMAGE: &[&str] = &["img"];
    /// Attributes consulted when `src` is empty (lazy loading).
    pub const LAZY_SRC_ATTRIBUTES: &[&str] = &["data-src", "data-original", "data-lazy-src"];
}
