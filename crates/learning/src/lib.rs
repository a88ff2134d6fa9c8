//! Learning crate.
//!
//! Verifies yesterday's predictions against recorded outcomes and nudges
//! each category's weights from the rolling accuracy.

pub mod tuner;
pub mod verifier;

pub use tuner::{AdjustmentEvent, Tuner, TriggerClass, TuningOutcome, TuningStatus};
pub use verifier::{Verifier, WindowSummary};
