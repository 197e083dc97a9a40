//! Game automation for the trainer.
//!
//! This module provides:
//! - Configuration loaded from config.json
//! - Input simulation through an explicit input session
//! - Screen reading (detectors and OCR) for the loop
//! - The cycle state machine and its runner

pub mod config;
pub mod detection;
pub mod input;
pub mod runner;
pub mod state;

pub use config::load_config;
pub use runner::run;
