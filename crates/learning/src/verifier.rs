//! Outcome verification.
//!
//! Matches a date's predictions to recorded outcomes by event identity and
//! reports segmented accuracy. Events without an outcome are gaps, not
//! misses.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, Utc};
use common::config::VerificationConfig;
use common::{
    ActualOutcome, Category, EntryVerdict, EventKey, LearningFactor, PredictionRecord, PriceBand,
    ReportStatus, SegmentStats, VerificationRecord, VerificationReport,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Winner odds at or above this count as an upset.
const UPSET_MIN_ODDS: f64 = 10.0;

pub struct Verifier {
    config: VerificationConfig,
}

impl Verifier {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Verify `category`'s predictions for `date` against `outcomes`.
    pub fn verify(
        &self,
        category: Category,
        date: NaiveDate,
        predictions: &[PredictionRecord],
        outcomes: &[ActualOutcome],
    ) -> VerificationReport {
        let mut by_event: BTreeMap<&EventKey, Vec<&PredictionRecord>> = BTreeMap::new();
        for record in predictions {
            if record.event.category != category || record.event.date != date {
                warn!(
                    "Ignoring prediction for {} while verifying {} {}",
                    record.event, category, date
                );
                continue;
            }
            by_event.entry(&record.event).or_default().push(record);
        }

        let outcome_by_event: HashMap<&EventKey, &ActualOutcome> = outcomes
            .iter()
            .filter(|o| !o.finish_order.is_empty())
            .map(|o| (&o.event, o))
            .collect();

        let mut records = Vec::new();
        let mut gaps = Vec::new();

        for (key, event_predictions) in &by_event {
            let Some(outcome) = outcome_by_event.get(key) else {
                debug!("No outcome yet for {}", key);
                gaps.push((*key).clone());
                continue;
            };
            if let Some(record) = self.verify_event(key, event_predictions, outcome) {
                records.push(record);
            }
        }

        self.build_report(category, date, by_event.len(), records, gaps)
    }

    fn verify_event(
        &self,
        key: &EventKey,
        predictions: &[&PredictionRecord],
        outcome: &ActualOutcome,
    ) -> Option<VerificationRecord> {
        let top = predictions.iter().min_by_key(|p| (p.rank, p.entry_number))?;
        let winner = outcome.winner()?;
        let correct = top.entry_number == winner;

        let winner_odds = outcome.winner_odds.or_else(|| {
            predictions
                .iter()
                .find(|p| p.entry_number == winner)
                .map(|p| p.odds)
        });
        let price_band = winner_odds.map(|odds| {
            PriceBand::classify(
                odds,
                self.config.favorite_max_odds,
                self.config.mid_range_max_odds,
            )
        });

        let mut verdicts: Vec<EntryVerdict> = predictions
            .iter()
            .map(|p| {
                let actual_position = outcome.position_of(p.entry_number);
                EntryVerdict {
                    entry_number: p.entry_number,
                    predicted_rank: p.rank,
                    actual_position,
                    correct: actual_position == Some(p.rank),
                }
            })
            .collect();
        verdicts.sort_by_key(|v| v.predicted_rank);

        let mut factors = Vec::new();
        if correct {
            if top.odds <= self.config.favorite_max_odds {
                factors.push(LearningFactor::FavoriteHit);
            } else if top.odds > self.config.mid_range_max_odds {
                factors.push(LearningFactor::LongshotHit);
            }
        } else {
            factors.push(LearningFactor::Miss);
        }
        if winner_odds.is_some_and(|o| o >= UPSET_MIN_ODDS) {
            factors.push(LearningFactor::LongshotUpset);
        }
        if outcome.surface.is_some_and(|s| s.is_heavy()) {
            factors.push(LearningFactor::HeavySurface);
        }

        Some(VerificationRecord {
            event: key.clone(),
            date: key.date,
            finish_order: outcome.finish_order.iter().take(3).copied().collect(),
            predicted_winner: top.entry_number,
            correct,
            winner_odds,
            price_band,
            verdicts,
            learning_factors: factors,
            verified_at: Utc::now(),
        })
    }

    fn build_report(
        &self,
        category: Category,
        date: NaiveDate,
        predicted_events: usize,
        records: Vec<VerificationRecord>,
        gaps: Vec<EventKey>,
    ) -> VerificationReport {
        let min = self.config.min_segment_samples;
        let matched = records.len();
        let correct = records.iter().filter(|r| r.correct).count();

        let mut band_counts: BTreeMap<PriceBand, (usize, usize)> = BTreeMap::new();
        let mut venue_counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        let mut learning_factors: BTreeMap<LearningFactor, usize> = BTreeMap::new();
        for r in &records {
            if let Some(band) = r.price_band {
                bump(band_counts.entry(band).or_default(), r.correct);
            }
            bump(venue_counts.entry(r.event.venue.clone()).or_default(), r.correct);
            for f in &r.learning_factors {
                *learning_factors.entry(*f).or_insert(0) += 1;
            }
        }

        let (accuracy, status) = if matched == 0 {
            (None, ReportStatus::NoVerifiableData)
        } else {
            (
                Some(correct as f64 / matched as f64),
                ReportStatus::Verified,
            )
        };

        if !gaps.is_empty() {
            warn!(
                "{} {}: {} predicted event(s) without outcome",
                category,
                date,
                gaps.len()
            );
        }
        info!(
            "Verified {} {}: matched={} correct={} accuracy={}",
            category,
            date,
            matched,
            correct,
            accuracy.map_or("n/a".to_string(), |a| format!("{:.1}%", a * 100.0))
        );

        VerificationReport {
            date,
            category,
            predicted_events,
            matched,
            correct,
            accuracy,
            status,
            by_price_band: band_counts
                .into_iter()
                .map(|(b, (t, c))| (b, SegmentStats::from_counts(t, c, min)))
                .collect(),
            by_venue: venue_counts
                .into_iter()
                .map(|(v, (t, c))| (v, SegmentStats::from_counts(t, c, min)))
                .collect(),
            gaps,
            records,
            learning_factors,
            generated_at: Utc::now(),
        }
    }
}

fn bump(counts: &mut (usize, usize), correct: bool) {
    counts.0 += 1;
    if correct {
        counts.1 += 1;
    }
}

// ── Window aggregation ────────────────────────────────────────────────

/// Verification counts summed over a window of reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub reports: usize,
    pub matched: usize,
    pub correct: usize,
    pub gaps: usize,
    /// (total, correct) per price band.
    pub bands: BTreeMap<PriceBand, (usize, usize)>,
    /// (total, correct) per venue.
    pub venues: BTreeMap<String, (usize, usize)>,
}

impl WindowSummary {
    pub fn aggregate(reports: &[VerificationReport]) -> Self {
        let mut summary = WindowSummary {
            reports: reports.len(),
            ..Default::default()
        };
        for report in reports {
            summary.matched += report.matched;
            summary.correct += report.correct;
            summary.gaps += report.gaps.len();
            for (band, stats) in &report.by_price_band {
                let entry = summary.bands.entry(*band).or_default();
                entry.0 += stats.total;
                entry.1 += stats.correct;
            }
            for (venue, stats) in &report.by_venue {
                let entry = summary.venues.entry(venue.clone()).or_default();
                entry.0 += stats.total;
                entry.1 += stats.correct;
            }
        }
        summary
    }

    /// `None` when nothing in the window was verified.
    pub fn accuracy(&self) -> Option<f64> {
        (self.matched > 0).then(|| self.correct as f64 / self.matched as f64)
    }

    pub fn band_stats(&self, band: PriceBand, min_samples: usize) -> SegmentStats {
        let (total, correct) = self.bands.get(&band).copied().unwrap_or_default();
        SegmentStats::from_counts(total, correct, min_samples)
    }

    pub fn venue_stats(&self, min_samples: usize) -> BTreeMap<String, SegmentStats> {
        self.venues
            .iter()
            .map(|(v, (t, c))| (v.clone(), SegmentStats::from_counts(*t, *c, min_samples)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SegmentAccuracy, SurfaceCondition};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 8).unwrap()
    }

    fn make_key(venue: &str, sequence: u32) -> EventKey {
        EventKey {
            category: Category::HorseRacing,
            venue: venue.into(),
            sequence,
            date: date(),
        }
    }

    fn make_prediction(key: &EventKey, entry_number: u32, rank: u32, odds: f64) -> PredictionRecord {
        PredictionRecord {
            event: key.clone(),
            entry_number,
            candidate_name: String::new(),
            odds,
            score: 50.0,
            rank,
            predicted_winner: rank == 1,
            confidence: 0.3,
            rationale: vec![],
            weights_version: 0,
            date: date(),
            created_at: Utc::now(),
        }
    }

    fn make_outcome(key: &EventKey, finish: &[u32], winner_odds: f64) -> ActualOutcome {
        ActualOutcome {
            event: key.clone(),
            finish_order: finish.to_vec(),
            winner_odds: Some(winner_odds),
            surface: None,
        }
    }

    fn verifier() -> Verifier {
        Verifier::new(VerificationConfig::default())
    }

    #[test]
    fn test_correct_and_incorrect_events() {
        let r1 = make_key("Tokyo", 1);
        let r2 = make_key("Tokyo", 2);
        let predictions = vec![
            make_prediction(&r1, 3, 1, 2.1),
            make_prediction(&r1, 5, 2, 6.0),
            make_prediction(&r2, 1, 1, 4.0),
            make_prediction(&r2, 2, 2, 12.0),
        ];
        let outcomes = vec![
            make_outcome(&r1, &[3, 5, 1], 2.1),
            make_outcome(&r2, &[2, 1, 4], 12.0),
        ];

        let report = verifier().verify(Category::HorseRacing, date(), &predictions, &outcomes);
        assert_eq!(report.status, ReportStatus::Verified);
        assert_eq!(report.matched, 2);
        assert_eq!(report.correct, 1);
        assert_eq!(report.accuracy, Some(0.5));
        assert!(report.gaps.is_empty());

        let first = &report.records[0];
        assert!(first.correct);
        assert_eq!(first.price_band, Some(PriceBand::Favorite));
        assert!(first.verdicts.iter().all(|v| v.correct));
        assert!(first.learning_factors.contains(&LearningFactor::FavoriteHit));

        let second = &report.records[1];
        assert!(!second.correct);
        assert_eq!(second.price_band, Some(PriceBand::Longshot));
        assert!(second.learning_factors.contains(&LearningFactor::Miss));
        assert!(second.learning_factors.contains(&LearningFactor::LongshotUpset));
        assert_eq!(report.learning_factors.get(&LearningFactor::Miss), Some(&1));
    }

    #[test]
    fn test_missing_outcome_is_gap_not_miss() {
        let r1 = make_key("Kyoto", 1);
        let r2 = make_key("Kyoto", 2);
        let predictions = vec![make_prediction(&r1, 1, 1, 3.0), make_prediction(&r2, 4, 1, 3.0)];
        let outcomes = vec![make_outcome(&r1, &[1, 2, 3], 3.0)];

        let report = verifier().verify(Category::HorseRacing, date(), &predictions, &outcomes);
        assert_eq!(report.predicted_events, 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.accuracy, Some(1.0));
        assert_eq!(report.gaps, vec![r2]);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_zero_matches_reports_no_verifiable_data() {
        let r1 = make_key("Kyoto", 1);
        let predictions = vec![make_prediction(&r1, 1, 1, 3.0)];
        let report = verifier().verify(Category::HorseRacing, date(), &predictions, &[]);
        assert_eq!(report.status, ReportStatus::NoVerifiableData);
        assert_eq!(report.accuracy, None);
        assert_eq!(report.matched, 0);
    }

    #[test]
    fn test_venue_segment_needs_min_samples() {
        let mut predictions = Vec::new();
        let mut outcomes = Vec::new();
        for seq in 1..=3 {
            let key = make_key("Hanshin", seq);
            predictions.push(make_prediction(&key, 1, 1, 2.0));
            outcomes.push(make_outcome(&key, &[1, 2, 3], 2.0));
        }
        let lone = make_key("Ogura", 1);
        predictions.push(make_prediction(&lone, 1, 1, 2.0));
        let mut heavy = make_outcome(&lone, &[2, 1, 3], 5.0);
        heavy.surface = Some(SurfaceCondition::Bad);
        outcomes.push(heavy);

        let report = verifier().verify(Category::HorseRacing, date(), &predictions, &outcomes);
        assert_eq!(
            report.by_venue["Hanshin"].accuracy,
            SegmentAccuracy::Meaningful(1.0)
        );
        assert_eq!(report.by_venue["Ogura"].accuracy, SegmentAccuracy::InsufficientData);
        assert_eq!(report.learning_factors.get(&LearningFactor::HeavySurface), Some(&1));
    }

    #[test]
    fn test_window_summary_sums_segments() {
        let key = make_key("Tokyo", 1);
        let predictions = vec![make_prediction(&key, 1, 1, 2.0)];
        let hit = verifier().verify(
            Category::HorseRacing,
            date(),
            &predictions,
            &[make_outcome(&key, &[1, 2, 3], 2.0)],
        );
        let miss = verifier().verify(
            Category::HorseRacing,
            date(),
            &predictions,
            &[make_outcome(&key, &[2, 1, 3], 2.5)],
        );

        let summary = WindowSummary::aggregate(&[hit, miss.clone(), miss]);
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.bands[&PriceBand::Favorite], (3, 1));
        let stats = summary.band_stats(PriceBand::Favorite, 3);
        assert!((stats.meaningful_accuracy().unwrap() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            summary.band_stats(PriceBand::Longshot, 3).accuracy,
            SegmentAccuracy::InsufficientData
        );
    }
}
