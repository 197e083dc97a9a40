//! Text recognition of numeric game fields.
//!
//! This module provides:
//! - Tesseract discovery (`setup`)
//! - Image preprocessing for small UI fonts (`preprocess`)
//! - The Tesseract invocation (`engine`)
//! - Level and zen parsing from screenshots (`extract`)

pub mod engine;
pub mod extract;
pub mod preprocess;
pub mod setup;

pub use engine::OcrError;
pub use extract::{read_from_screenshot, OcrField, OcrKind, OcrOutputs};
