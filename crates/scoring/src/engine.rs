//! Scoring engine.
//!
//! Converts candidates and a weight vector into ranked prediction records.
//! Pure: no I/O, and identical inputs always give an identical ranking.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use common::{
    Candidate, Category, EnvironmentalContext, Error, Event, Factor, PredictionRecord,
    RationaleTag, Result, SurfaceCondition, WeightVector, NEUTRAL_SUB_SCORE,
};
use tracing::{debug, warn};

use crate::models::{effective_surface, CategoryModel, ScoringModel, SubScores};

/// Contexts keyed by venue and date.
pub type ContextMap = HashMap<(String, NaiveDate), EnvironmentalContext>;

/// Scores one category's events with that category's model.
pub struct ScoringEngine {
    model: CategoryModel,
}

struct Scored<'a> {
    candidate: &'a Candidate,
    score: f64,
    rationale: Vec<RationaleTag>,
}

impl ScoringEngine {
    pub fn new(category: Category) -> Self {
        Self {
            model: CategoryModel::for_category(category),
        }
    }

    pub fn category(&self) -> Category {
        self.model.category()
    }

    /// Built-in starting weights for this category (version 0).
    pub fn default_weights(&self, effective_date: NaiveDate) -> Result<WeightVector> {
        WeightVector::new(
            self.category(),
            self.model.default_weights(),
            effective_date,
        )
    }

    /// Score without environmental context; environment falls back to the
    /// declared surface or neutral.
    pub fn score(&self, events: &[Event], weights: &WeightVector) -> Result<Vec<PredictionRecord>> {
        self.score_with_context(events, weights, &ContextMap::new())
    }

    /// Score every event and return one ranked record per candidate.
    ///
    /// Events of another category are skipped. Ranks are 1-based and ties
    /// go to the lower entry number.
    pub fn score_with_context(
        &self,
        events: &[Event],
        weights: &WeightVector,
        contexts: &ContextMap,
    ) -> Result<Vec<PredictionRecord>> {
        if weights.category != self.category() {
            return Err(Error::DataIntegrity(format!(
                "weights for {} passed to {} engine",
                weights.category,
                self.category()
            )));
        }
        if !weights.is_normalized() {
            return Err(Error::WeightNormalization(format!(
                "{} weights v{} sum to {:.6}",
                weights.category,
                weights.version,
                weights.sum()
            )));
        }

        let created_at = Utc::now();
        let mut records = Vec::new();

        for event in events {
            if event.key.category != self.category() {
                warn!("Skipping {}: not a {} event", event.key, self.category());
                continue;
            }
            let context = contexts.get(&(event.key.venue.clone(), event.key.date));

            let mut scored: Vec<Scored<'_>> = event
                .candidates
                .iter()
                .map(|candidate| {
                    let subs = self.model.sub_scores(event, candidate, context);
                    let mut score = weighted_total(&subs, weights);
                    if !score.is_finite() {
                        warn!(
                            "{} #{}: non-finite score {}, ranking last",
                            event.key, candidate.entry_number, score
                        );
                        score = 0.0;
                    }
                    debug!(
                        "{} #{}: score={:.2} subs={:?}",
                        event.key, candidate.entry_number, score, subs
                    );
                    Scored {
                        candidate,
                        score,
                        rationale: rationale_tags(self.category(), event, candidate, context, &subs),
                    }
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.candidate.entry_number.cmp(&b.candidate.entry_number))
            });

            let total: f64 = scored.iter().map(|s| s.score).sum();
            let field = scored.len().max(1) as f64;

            for (idx, s) in scored.into_iter().enumerate() {
                let confidence = if total > 0.0 {
                    s.score / total
                } else {
                    1.0 / field
                };
                records.push(PredictionRecord {
                    event: event.key.clone(),
                    entry_number: s.candidate.entry_number,
                    candidate_name: s.candidate.name.clone(),
                    odds: s.candidate.odds,
                    score: s.score,
                    rank: idx as u32 + 1,
                    predicted_winner: idx == 0,
                    confidence,
                    rationale: s.rationale,
                    weights_version: weights.version,
                    date: event.key.date,
                    created_at,
                });
            }
        }

        Ok(records)
    }
}

/// Σ(sub-score × weight) × 100, clipped to [0, 100]. Weighted factors the
/// model does not produce count as neutral.
fn weighted_total(subs: &SubScores, weights: &WeightVector) -> f64 {
    let raw: f64 = weights
        .weights
        .iter()
        .map(|(factor, w)| {
            let sub = subs
                .get(factor)
                .map(|s| s.value)
                .unwrap_or(NEUTRAL_SUB_SCORE);
            sub * w
        })
        .sum();
    (raw * 100.0).clamp(0.0, 100.0)
}

fn rationale_tags(
    category: Category,
    event: &Event,
    candidate: &Candidate,
    context: Option<&EnvironmentalContext>,
    subs: &SubScores,
) -> Vec<RationaleTag> {
    let mut tags = Vec::new();

    if candidate.odds <= 3.0 {
        tags.push(RationaleTag::Favorite);
    } else if candidate.odds >= 10.0 {
        tags.push(RationaleTag::Longshot);
    }
    if subs
        .get(&Factor::Form)
        .is_some_and(|s| !s.neutral && s.value >= 0.6)
    {
        tags.push(RationaleTag::StrongForm);
    }
    if effective_surface(event, context).is_some_and(|s| s != SurfaceCondition::Good) {
        tags.push(RationaleTag::SurfaceAdapted);
    }
    match event.distance_m {
        Some(d) if d <= 1200 => tags.push(RationaleTag::SprintDistance),
        Some(d) if d >= 2000 => tags.push(RationaleTag::StayingDistance),
        _ => {}
    }
    if category == Category::BoatRacing && (1..=3).contains(&candidate.entry_number) {
        tags.push(RationaleTag::InsideDraw);
    }
    if subs
        .get(&Factor::Rider)
        .is_some_and(|s| !s.neutral && s.value >= 0.9)
    {
        tags.push(RationaleTag::TopGrade);
    }
    if subs.values().any(|s| s.neutral) {
        tags.push(RationaleTag::NeutralDefaults);
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CandidateProfile, EventKey, Weather};
    use std::collections::BTreeMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 9).unwrap()
    }

    fn make_candidate(entry_number: u32, odds: f64) -> Candidate {
        Candidate {
            entry_number,
            name: format!("Runner {entry_number}"),
            odds,
            recent_form: String::new(),
            profile: CandidateProfile::Unknown,
        }
    }

    fn make_event(category: Category, sequence: u32, candidates: Vec<Candidate>) -> Event {
        Event {
            key: EventKey {
                category,
                venue: "Hanshin".into(),
                sequence,
                date: date(),
            },
            name: format!("Race {sequence}"),
            scheduled_at: None,
            distance_m: None,
            declared_surface: None,
            candidates,
        }
    }

    fn horse_weights() -> WeightVector {
        let w: BTreeMap<Factor, f64> = [
            (Factor::Price, 0.4),
            (Factor::Form, 0.3),
            (Factor::Environment, 0.2),
            (Factor::Rider, 0.1),
        ]
        .into_iter()
        .collect();
        WeightVector::new(Category::HorseRacing, w, date()).unwrap()
    }

    #[test]
    fn test_scenario_a_lowest_price_ranks_first() {
        let engine = ScoringEngine::new(Category::HorseRacing);
        let event = make_event(
            Category::HorseRacing,
            1,
            vec![
                make_candidate(1, 12.0),
                make_candidate(2, 2.5),
                make_candidate(3, 5.0),
            ],
        );

        let records = engine.score(&[event], &horse_weights()).unwrap();
        assert_eq!(records.len(), 3);

        let top = &records[0];
        assert_eq!(top.entry_number, 2, "odds 2.5 should rank first");
        assert_eq!(top.rank, 1);
        assert!(top.predicted_winner);
        assert!(records[0].score > records[1].score);
        assert!(records[1].score > records[2].score);
        assert_eq!(records[2].entry_number, 1);
        assert!(top.rationale.contains(&RationaleTag::Favorite));
        assert!(top.rationale.contains(&RationaleTag::NeutralDefaults));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let engine = ScoringEngine::new(Category::HorseRacing);
        let events = vec![
            make_event(
                Category::HorseRacing,
                1,
                vec![make_candidate(1, 4.0), make_candidate(2, 6.5), make_candidate(3, 4.0)],
            ),
            make_event(Category::HorseRacing, 2, vec![make_candidate(1, 9.0), make_candidate(2, 1.8)]),
        ];
        let w = horse_weights();

        let ranking = |records: Vec<PredictionRecord>| -> Vec<(u32, u32, u32)> {
            records
                .into_iter()
                .map(|r| (r.event.sequence, r.entry_number, r.rank))
                .collect()
        };
        let first = ranking(engine.score(&events, &w).unwrap());
        let second = ranking(engine.score(&events, &w).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_go_to_lower_entry_number() {
        let engine = ScoringEngine::new(Category::HorseRacing);
        let event = make_event(
            Category::HorseRacing,
            1,
            vec![make_candidate(7, 4.0), make_candidate(3, 4.0)],
        );
        let records = engine.score(&[event], &horse_weights()).unwrap();
        assert_eq!(records[0].entry_number, 3);
        assert_eq!(records[1].entry_number, 7);
        assert!((records[0].confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_nan_odds_rank_last_without_panicking() {
        let engine = ScoringEngine::new(Category::HorseRacing);
        let event = make_event(
            Category::HorseRacing,
            1,
            vec![
                make_candidate(1, f64::NAN),
                make_candidate(2, 3.0),
                make_candidate(3, 8.0),
            ],
        );
        let records = engine.score(&[event], &horse_weights()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].entry_number, 2);
        assert!(records.iter().all(|r| r.score.is_finite()));
        assert!(records.iter().all(|r| r.confidence.is_finite()));
    }

    #[test]
    fn test_empty_event_list_scores_nothing() {
        let engine = ScoringEngine::new(Category::HorseRacing);
        let records = engine.score(&[], &horse_weights()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_mismatched_weights_rejected() {
        let engine = ScoringEngine::new(Category::BoatRacing);
        assert!(engine.score(&[], &horse_weights()).is_err());
    }

    #[test]
    fn test_scores_stay_within_bounds_and_confidence_sums_to_one() {
        let engine = ScoringEngine::new(Category::BoatRacing);
        let weights = engine.default_weights(date()).unwrap();
        let mut candidates: Vec<Candidate> = (1..=6)
            .map(|n| make_candidate(n, 1.5 + n as f64 * 3.0))
            .collect();
        candidates[0].recent_form = "1112".into();
        candidates[0].profile = CandidateProfile::Boat {
            racer: Some("A".into()),
            motor_two_place_rate: Some(55.0),
        };
        let event = make_event(Category::BoatRacing, 4, candidates);
        let mut contexts = ContextMap::new();
        contexts.insert(
            ("Hanshin".into(), date()),
            EnvironmentalContext {
                venue: "Hanshin".into(),
                date: date(),
                weather: Weather::Sunny,
                temperature_c: Some(28.0),
                wind_mps: Some(2.0),
                humidity_pct: None,
            },
        );

        let records = engine
            .score_with_context(&[event], &weights, &contexts)
            .unwrap();
        assert!(records.iter().all(|r| (0.0..=100.0).contains(&r.score)));
        let conf: f64 = records.iter().map(|r| r.confidence).sum();
        assert!((conf - 1.0).abs() < 1e-9);
        assert_eq!(records[0].entry_number, 1);
        assert!(records[0].rationale.contains(&RationaleTag::InsideDraw));
        assert!(records[0].rationale.contains(&RationaleTag::StrongForm));
    }
}
