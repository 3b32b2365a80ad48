//! Pipeline stages for harvesting items and assembling the document.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and the browser-facing stages can run against a
//! scripted session.
//!
//! ## Data Flow
//!
//! ```text
//! navigate ──▶ extract ──▶ resolve ──▶ assemble ──▶ layout ──▶ render ──▶ merge
//! (session)    (scraper)   (images)    (blocks)     (pages)    (pdfium)   (optional)
//! ```
//!
//! 1. [`harvest`]  : the loop over item slots and the per-run state
//! 2. [`navigate`] : one slot's state machine; every wait goes through [`poll`]
//! 3. [`extract`]  : page snapshot → typed records; text passes through [`normalize`]
//! 4. [`resolve`]  : image references → embeddable bytes with dimensions
//! 5. [`assemble`] : items → blocks, image width rule and two-row grids
//! 6. [`layout`]   : blocks → positioned draw operations per page
//! 7. [`render`]   : pdfium encoding and page-range copy; runs in `spawn_blocking`
//! 8. [`merge`]    : interleave plan for a reference document loaded by [`input`]

pub mod assemble;
pub mod extract;
pub mod harvest;
pub mod input;
pub mod layout;
pub mod merge;
pub mod navigate;
pub mod normalize;
pub mod poll;
pub mod render;
pub mod resolve;
