//! Adaptive weight tuning.
//!
//! Rule-based, bounded adjustments driven by window accuracy. Trigger
//! classes are evaluated in priority order: critical or moderate (mutually
//! exclusive), then segment triggers. Deltas are summed, applied to the
//! current vector, clipped to `[0, w_max]` and renormalized.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::config::TuningConfig;
use common::{
    Category, Error, Factor, PriceBand, Result, VerificationReport, WeightVector, WEIGHT_EPSILON,
};
use serde::{Deserialize, Serialize};
use store::WeightStore;
use tracing::{info, warn};

use crate::verifier::WindowSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum TriggerClass {
    Critical,
    Moderate,
    PriceBand { band: PriceBand },
    Venue { venue: String },
}

/// One fired trigger and the deltas it contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEvent {
    pub trigger: TriggerClass,
    pub condition: String,
    pub observed_accuracy: f64,
    pub threshold: f64,
    pub samples: usize,
    pub deltas: BTreeMap<Factor, f64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningStatus {
    /// A new version was committed for the date.
    Committed,
    /// No trigger fired, or the proposal was rejected; weights kept.
    Unchanged,
    /// The date already had a committed version.
    AlreadyCommitted,
}

/// Result of [`Tuner::tune_and_commit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningOutcome {
    pub category: Category,
    pub date: NaiveDate,
    pub status: TuningStatus,
    pub previous_version: u64,
    pub weights: WeightVector,
    pub window_accuracy: Option<f64>,
    pub window_matched: usize,
    pub trace: Vec<AdjustmentEvent>,
}

pub struct Tuner {
    config: TuningConfig,
    min_segment_samples: usize,
}

impl Tuner {
    pub fn new(config: TuningConfig, min_segment_samples: usize) -> Self {
        Self {
            config,
            min_segment_samples,
        }
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    fn adjustment(
        &self,
        trigger: TriggerClass,
        condition: String,
        observed_accuracy: f64,
        threshold: f64,
        samples: usize,
        deltas: &[(Factor, f64)],
    ) -> AdjustmentEvent {
        AdjustmentEvent {
            trigger,
            condition,
            observed_accuracy,
            threshold,
            samples,
            deltas: deltas.iter().copied().collect(),
            at: Utc::now(),
        }
    }

    /// Decide which triggers fire for `summary`.
    pub fn triggers(&self, summary: &WindowSummary) -> Vec<AdjustmentEvent> {
        let cfg = &self.config;
        let mut events = Vec::new();

        let Some(accuracy) = summary.accuracy() else {
            return events;
        };

        if accuracy < cfg.t_min {
            events.push(self.adjustment(
                TriggerClass::Critical,
                format!("window accuracy {:.3} < t_min {:.3}", accuracy, cfg.t_min),
                accuracy,
                cfg.t_min,
                summary.matched,
                &[
                    (Factor::Price, cfg.learning_rate),
                    (Factor::Form, -cfg.learning_rate),
                ],
            ));
        } else if accuracy < cfg.t_target {
            events.push(self.adjustment(
                TriggerClass::Moderate,
                format!("window accuracy {:.3} < t_target {:.3}", accuracy, cfg.t_target),
                accuracy,
                cfg.t_target,
                summary.matched,
                &[
                    (Factor::Price, cfg.moderate_rate),
                    (Factor::Form, -cfg.moderate_rate),
                    (Factor::Environment, -cfg.moderate_rate / 2.0),
                ],
            ));
        }

        for (band, threshold, factor) in [
            (PriceBand::Favorite, cfg.favorite_band_threshold, Factor::Price),
            (PriceBand::MidRange, cfg.mid_range_band_threshold, Factor::Form),
            (PriceBand::Longshot, cfg.longshot_band_threshold, Factor::Form),
        ] {
            let stats = summary.band_stats(band, self.min_segment_samples);
            if let Some(band_accuracy) = stats.meaningful_accuracy() {
                if band_accuracy < threshold {
                    events.push(self.adjustment(
                        TriggerClass::PriceBand { band },
                        format!(
                            "{:?} band accuracy {:.3} < {:.3} over {} events",
                            band, band_accuracy, threshold, stats.total
                        ),
                        band_accuracy,
                        threshold,
                        stats.total,
                        &[(factor, cfg.segment_rate)],
                    ));
                }
            }
        }

        // Only the worst qualifying venue fires.
        let worst_venue = summary
            .venue_stats(self.min_segment_samples)
            .into_iter()
            .filter_map(|(venue, stats)| {
                stats
                    .meaningful_accuracy()
                    .filter(|a| *a < cfg.venue_threshold)
                    .map(|a| (venue, a, stats.total))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if let Some((venue, venue_accuracy, total)) = worst_venue {
            events.push(self.adjustment(
                TriggerClass::Venue {
                    venue: venue.clone(),
                },
                format!(
                    "venue {} accuracy {:.3} < {:.3} over {} events",
                    venue, venue_accuracy, cfg.venue_threshold, total
                ),
                venue_accuracy,
                cfg.venue_threshold,
                total,
                &[(Factor::Environment, cfg.segment_rate / 2.0)],
            ));
        }

        events
    }

    /// Propose a new vector from the window of reports.
    ///
    /// The returned vector keeps `current`'s version and date; only a commit
    /// assigns new ones. When the summed deltas cannot be normalized the
    /// current weights are returned unchanged along with the trace.
    pub fn tune(
        &self,
        history: &[VerificationReport],
        current: &WeightVector,
    ) -> (WeightVector, Vec<AdjustmentEvent>) {
        let summary = WindowSummary::aggregate(history);
        let trace = self.triggers(&summary);
        if trace.is_empty() {
            return (current.clone(), trace);
        }

        let mut summed: BTreeMap<Factor, f64> = BTreeMap::new();
        for event in &trace {
            for (factor, delta) in &event.deltas {
                *summed.entry(*factor).or_insert(0.0) += delta;
            }
        }
        let deltas: Vec<(Factor, f64)> = summed.into_iter().collect();

        match current.with_deltas(&deltas, self.config.w_max) {
            Ok(weights) => (
                WeightVector {
                    weights,
                    ..current.clone()
                },
                trace,
            ),
            Err(e) => {
                warn!("{} weights kept: {}", current.category, e);
                (current.clone(), trace)
            }
        }
    }

    /// Tune and commit at most one version for `(category, date)`.
    ///
    /// Re-running for a date that already has a committed version returns
    /// that version. A concurrent writer is detected by the store's version
    /// check and the tuning is retried once against the fresh vector.
    pub fn tune_and_commit(
        &self,
        store: &WeightStore,
        category: Category,
        date: NaiveDate,
        history: &[VerificationReport],
        defaults: &WeightVector,
    ) -> Result<TuningOutcome> {
        let summary = WindowSummary::aggregate(history);
        let outcome = |status, previous_version, weights, trace| TuningOutcome {
            category,
            date,
            status,
            previous_version,
            weights,
            window_accuracy: summary.accuracy(),
            window_matched: summary.matched,
            trace,
        };

        let mut retried = false;
        loop {
            if let Some(existing) = store.committed_for(category, date)? {
                info!(
                    "{} weights already committed for {} (v{})",
                    category, date, existing.version
                );
                let version = existing.version;
                return Ok(outcome(
                    TuningStatus::AlreadyCommitted,
                    version,
                    existing,
                    Vec::new(),
                ));
            }

            let current = store
                .current(category)?
                .unwrap_or_else(|| defaults.clone());
            let (proposed, trace) = self.tune(history, &current);

            if same_weights(&proposed, &current) {
                info!(
                    "{} weights unchanged (v{}, {} trigger(s))",
                    category,
                    current.version,
                    trace.len()
                );
                let version = current.version;
                return Ok(outcome(TuningStatus::Unchanged, version, current, trace));
            }

            match store.commit(category, proposed.weights, date, current.version) {
                Ok(committed) => {
                    return Ok(outcome(
                        TuningStatus::Committed,
                        current.version,
                        committed,
                        trace,
                    ))
                }
                Err(Error::VersionConflict { expected, found }) if !retried => {
                    warn!(
                        "{} weight commit raced (expected v{}, found v{}); retrying",
                        category, expected, found
                    );
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn same_weights(a: &WeightVector, b: &WeightVector) -> bool {
    a.weights.len() == b.weights.len()
        && a
            .weights
            .iter()
            .all(|(f, w)| (b.get(*f) - w).abs() <= WEIGHT_EPSILON)
}
