//! Per-category scoring models.
//!
//! Every category implements [`ScoringModel`]; the shared factors (price,
//! form, environment) come from provided methods parameterised by the
//! model, and each model adds its own specialist factors. [`CategoryModel`]
//! is the tagged variant used at runtime.

use std::collections::BTreeMap;

use common::{
    Candidate, CandidateProfile, Category, EnvironmentalContext, Event, Factor, FormMark,
    SurfaceCondition, NEUTRAL_SUB_SCORE,
};

/// One factor's sub-score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorScore {
    pub value: f64,
    /// True when the input was missing and the neutral value was used.
    pub neutral: bool,
}

impl FactorScore {
    pub fn measured(value: f64) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            neutral: false,
        }
    }

    pub fn neutral() -> Self {
        Self {
            value: NEUTRAL_SUB_SCORE,
            neutral: true,
        }
    }

    fn from_option(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Self::measured(v),
            _ => Self::neutral(),
        }
    }
}

pub type SubScores = BTreeMap<Factor, FactorScore>;

/// Category-specific scoring rules.
pub trait ScoringModel {
    fn category(&self) -> Category;

    /// Odds at which the price sub-score reaches zero.
    fn price_scale(&self) -> f64;

    /// Starting weights before any tuning.
    fn default_weights(&self) -> BTreeMap<Factor, f64>;

    /// `None` when the environment could not be assessed.
    fn environment_score(
        &self,
        event: &Event,
        context: Option<&EnvironmentalContext>,
    ) -> Option<f64>;

    /// Factors beyond price/form/environment. `None` values fall back to neutral.
    fn specialist_scores(&self, candidate: &Candidate) -> Vec<(Factor, Option<f64>)>;

    fn price_score(&self, odds: f64) -> f64 {
        let scale = self.price_scale();
        ((scale - odds) / scale).clamp(0.0, 1.0)
    }

    /// Fraction of wins in the recent form; `None` for an empty form.
    fn form_score(&self, marks: &[FormMark]) -> Option<f64> {
        if marks.is_empty() {
            return None;
        }
        let wins = marks.iter().filter(|m| **m == FormMark::Win).count();
        Some(wins as f64 / marks.len() as f64)
    }

    fn sub_scores(
        &self,
        event: &Event,
        candidate: &Candidate,
        context: Option<&EnvironmentalContext>,
    ) -> SubScores {
        let mut scores = SubScores::new();
        scores.insert(
            Factor::Price,
            FactorScore::measured(self.price_score(candidate.odds)),
        );
        scores.insert(
            Factor::Form,
            FactorScore::from_option(self.form_score(&candidate.form_marks())),
        );
        scores.insert(
            Factor::Environment,
            FactorScore::from_option(self.environment_score(event, context)),
        );
        for (factor, value) in self.specialist_scores(candidate) {
            scores.insert(factor, FactorScore::from_option(value));
        }
        scores
    }
}

// ── Shared lookups ────────────────────────────────────────────────────

pub fn surface_suitability(surface: SurfaceCondition) -> f64 {
    match surface {
        SurfaceCondition::Good => 0.8,
        SurfaceCondition::SlightlyHeavy => 0.6,
        SurfaceCondition::Heavy => 0.4,
        SurfaceCondition::Bad => 0.3,
    }
}

pub fn distance_suitability(distance_m: u32) -> f64 {
    if distance_m <= 1200 {
        0.7
    } else if distance_m <= 1800 {
        0.8
    } else {
        0.6
    }
}

/// Observed weather wins over the organiser's declaration.
pub fn effective_surface(
    event: &Event,
    context: Option<&EnvironmentalContext>,
) -> Option<SurfaceCondition> {
    context
        .and_then(|c| c.surface())
        .or(event.declared_surface)
}

fn weights(pairs: &[(Factor, f64)]) -> BTreeMap<Factor, f64> {
    pairs.iter().copied().collect()
}

fn normalized_code(raw: &Option<String>) -> Option<String> {
    raw.as_ref()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
}

// ── Horse racing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct HorseModel;

impl ScoringModel for HorseModel {
    fn category(&self) -> Category {
        Category::HorseRacing
    }

    fn price_scale(&self) -> f64 {
        20.0
    }

    fn default_weights(&self) -> BTreeMap<Factor, f64> {
        weights(&[
            (Factor::Price, 0.4),
            (Factor::Form, 0.3),
            (Factor::Environment, 0.2),
            (Factor::Rider, 0.1),
        ])
    }

    fn environment_score(
        &self,
        event: &Event,
        context: Option<&EnvironmentalContext>,
    ) -> Option<f64> {
        let parts: Vec<f64> = [
            effective_surface(event, context).map(surface_suitability),
            event.distance_m.map(distance_suitability),
        ]
        .into_iter()
        .flatten()
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.iter().sum::<f64>() / parts.len() as f64)
        }
    }

    fn specialist_scores(&self, candidate: &Candidate) -> Vec<(Factor, Option<f64>)> {
        let rider = match &candidate.profile {
            CandidateProfile::Horse {
                jockey_win_rate: Some(rate),
                ..
            } if rate.is_finite() && *rate >= 0.0 => Some((rate / 0.2).min(1.0)),
            _ => None,
        };
        vec![(Factor::Rider, rider)]
    }
}

// ── Boat racing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct BoatModel;

impl BoatModel {
    fn lane_score(lane: u32) -> Option<f64> {
        match lane {
            1 => Some(0.9),
            2 => Some(0.8),
            3 => Some(0.7),
            4 => Some(0.6),
            5 => Some(0.5),
            6 => Some(0.4),
            _ => None,
        }
    }
}

impl ScoringModel for BoatModel {
    fn category(&self) -> Category {
        Category::BoatRacing
    }

    fn price_scale(&self) -> f64 {
        15.0
    }

    fn default_weights(&self) -> BTreeMap<Factor, f64> {
        weights(&[
            (Factor::Price, 0.35),
            (Factor::Form, 0.2),
            (Factor::Environment, 0.1),
            (Factor::Machine, 0.2),
            (Factor::Position, 0.15),
        ])
    }

    /// Three recent wins already count as top form.
    fn form_score(&self, marks: &[FormMark]) -> Option<f64> {
        if marks.is_empty() {
            return None;
        }
        let wins = marks.iter().filter(|m| **m == FormMark::Win).count();
        Some((wins as f64 / 3.0).min(1.0))
    }

    fn environment_score(
        &self,
        _event: &Event,
        context: Option<&EnvironmentalContext>,
    ) -> Option<f64> {
        let wind = context.and_then(|c| c.wind_mps)?;
        Some(if wind < 3.0 {
            0.8
        } else if wind < 6.0 {
            0.6
        } else {
            0.4
        })
    }

    fn specialist_scores(&self, candidate: &Candidate) -> Vec<(Factor, Option<f64>)> {
        let machine = match &candidate.profile {
            CandidateProfile::Boat {
                motor_two_place_rate: Some(rate),
                ..
            } if rate.is_finite() => Some(((rate - 20.0) / 40.0).clamp(0.0, 1.0)),
            _ => None,
        };
        vec![
            (Factor::Machine, machine),
            (Factor::Position, Self::lane_score(candidate.entry_number)),
        ]
    }
}

// ── Bicycle racing ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct BicycleModel;

impl BicycleModel {
    fn rank_score(rank: &str) -> Option<f64> {
        match rank {
            "S1" | "SS" => Some(1.0),
            "S2" => Some(0.9),
            "A1" => Some(0.8),
            "A2" => Some(0.6),
            "A3" => Some(0.4),
            _ => None,
        }
    }

    fn position_score(entry_number: u32) -> f64 {
        match entry_number {
            4..=6 => 0.8,
            3 | 7 => 0.7,
            _ => 0.6,
        }
    }
}

impl ScoringModel for BicycleModel {
    fn category(&self) -> Category {
        Category::BicycleRacing
    }

    fn price_scale(&self) -> f64 {
        12.0
    }

    fn default_weights(&self) -> BTreeMap<Factor, f64> {
        weights(&[
            (Factor::Price, 0.35),
            (Factor::Form, 0.2),
            (Factor::Environment, 0.05),
            (Factor::Rider, 0.25),
            (Factor::Position, 0.15),
        ])
    }

    fn environment_score(
        &self,
        event: &Event,
        context: Option<&EnvironmentalContext>,
    ) -> Option<f64> {
        effective_surface(event, context).map(surface_suitability)
    }

    fn specialist_scores(&self, candidate: &Candidate) -> Vec<(Factor, Option<f64>)> {
        let rider = match &candidate.profile {
            CandidateProfile::Bicycle { rank } => {
                normalized_code(rank).and_then(|r| Self::rank_score(&r))
            }
            _ => None,
        };
        vec![
            (Factor::Rider, rider),
            (
                Factor::Position,
                Some(Self::position_score(candidate.entry_number)),
            ),
        ]
    }
}

// ── Auto racing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoModel;

impl AutoModel {
    fn grade_score(grade: &str) -> Option<f64> {
        match grade {
            "S1" => Some(1.0),
            "S2" => Some(0.8),
            "A1" => Some(0.6),
            "A2" => Some(0.4),
            _ => None,
        }
    }
}

impl ScoringModel for AutoModel {
    fn category(&self) -> Category {
        Category::AutoRacing
    }

    fn price_scale(&self) -> f64 {
        10.0
    }

    fn default_weights(&self) -> BTreeMap<Factor, f64> {
        weights(&[
            (Factor::Price, 0.4),
            (Factor::Form, 0.2),
            (Factor::Environment, 0.1),
            (Factor::Rider, 0.3),
        ])
    }

    fn environment_score(
        &self,
        event: &Event,
        context: Option<&EnvironmentalContext>,
    ) -> Option<f64> {
        effective_surface(event, context).map(surface_suitability)
    }

    fn specialist_scores(&self, candidate: &Candidate) -> Vec<(Factor, Option<f64>)> {
        let rider = match &candidate.profile {
            CandidateProfile::Auto { grade } => {
                normalized_code(grade).and_then(|g| Self::grade_score(&g))
            }
            _ => None,
        };
        vec![(Factor::Rider, rider)]
    }
}

// ── Tagged variant ────────────────────────────────────────────────────

/// Runtime selection of the model for a category.
#[derive(Debug, Clone, Copy)]
pub enum CategoryModel {
    Horse(HorseModel),
    Boat(BoatModel),
    Bicycle(BicycleModel),
    Auto(AutoModel),
}

impl CategoryModel {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::HorseRacing => CategoryModel::Horse(HorseModel),
            Category::BoatRacing => CategoryModel::Boat(BoatModel),
            Category::BicycleRacing => CategoryModel::Bicycle(BicycleModel),
            Category::AutoRacing => CategoryModel::Auto(AutoModel),
        }
    }

    fn inner(&self) -> &dyn ScoringModel {
        match self {
            CategoryModel::Horse(m) => m,
            CategoryModel::Boat(m) => m,
            CategoryModel::Bicycle(m) => m,
            CategoryModel::Auto(m) => m,
        }
    }
}

impl ScoringModel for CategoryModel {
    fn category(&self) -> Category {
        self.inner().category()
    }

    fn price_scale(&self) -> f64 {
        self.inner().price_scale()
    }

    fn default_weights(&self) -> BTreeMap<Factor, f64> {
        self.inner().default_weights()
    }

    fn environment_score(
        &self,
        event: &Event,
        context: Option<&EnvironmentalContext>,
    ) -> Option<f64> {
        self.inner().environment_score(event, context)
    }

    fn specialist_scores(&self, candidate: &Candidate) -> Vec<(Factor, Option<f64>)> {
        self.inner().specialist_scores(candidate)
    }

    fn form_score(&self, marks: &[FormMark]) -> Option<f64> {
        self.inner().form_score(marks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::{EventKey, Weather};

    fn make_event(category: Category, distance_m: Option<u32>) -> Event {
        Event {
            key: EventKey {
                category,
                venue: "Tokyo".into(),
                sequence: 11,
                date: NaiveDate::from_ymd_opt(2025, 8, 9).unwrap(),
            },
            name: String::new(),
            scheduled_at: None,
            distance_m,
            declared_surface: None,
            candidates: vec![],
        }
    }

    fn make_context(weather: Weather, wind_mps: Option<f64>) -> EnvironmentalContext {
        EnvironmentalContext {
            venue: "Tokyo".into(),
            date: NaiveDate::from_ymd_opt(2025, 8, 9).unwrap(),
            weather,
            temperature_c: None,
            wind_mps,
            humidity_pct: None,
        }
    }

    #[test]
    fn test_price_score_decreases_with_odds() {
        let m = HorseModel;
        assert!(m.price_score(2.5) > m.price_score(5.0));
        assert!(m.price_score(5.0) > m.price_score(12.0));
        assert_eq!(m.price_score(25.0), 0.0);
        assert!((m.price_score(2.5) - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_boat_form_caps_at_three_wins() {
        let m = BoatModel;
        let marks = common::parse_form("11112");
        assert_eq!(m.form_score(&marks), Some(1.0));
        assert_eq!(HorseModel.form_score(&marks), Some(0.8));
        assert_eq!(m.form_score(&[]), None);
    }

    #[test]
    fn test_horse_environment_mixes_surface_and_distance() {
        let event = make_event(Category::HorseRacing, Some(1600));
        let ctx = make_context(Weather::Rain, None);
        let env = HorseModel.environment_score(&event, Some(&ctx)).unwrap();
        assert!((env - 0.6).abs() < 1e-9, "mean of heavy .4 and mile .8, got {env}");

        let bare = make_event(Category::HorseRacing, None);
        assert_eq!(HorseModel.environment_score(&bare, None), None);
    }

    #[test]
    fn test_boat_environment_uses_wind() {
        let event = make_event(Category::BoatRacing, None);
        let calm = make_context(Weather::Sunny, Some(1.5));
        let gusty = make_context(Weather::Sunny, Some(7.0));
        assert_eq!(BoatModel.environment_score(&event, Some(&calm)), Some(0.8));
        assert_eq!(BoatModel.environment_score(&event, Some(&gusty)), Some(0.4));
        assert_eq!(BoatModel.environment_score(&event, None), None);
    }

    #[test]
    fn test_missing_specialist_inputs_are_neutral() {
        let event = make_event(Category::AutoRacing, None);
        let candidate = Candidate {
            entry_number: 3,
            name: "X".into(),
            odds: 4.0,
            recent_form: String::new(),
            profile: CandidateProfile::Unknown,
        };
        let scores = CategoryModel::for_category(Category::AutoRacing)
            .sub_scores(&event, &candidate, None);
        assert!(scores[&Factor::Rider].neutral);
        assert!(scores[&Factor::Form].neutral);
        assert!(scores[&Factor::Environment].neutral);
        assert!(!scores[&Factor::Price].neutral);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        for category in Category::ALL {
            let w = CategoryModel::for_category(category).default_weights();
            let sum: f64 = w.values().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{category} sums to {sum}");
        }
    }

    #[test]
    fn test_bicycle_rank_and_position() {
        let candidate = Candidate {
            entry_number: 5,
            name: "K".into(),
            odds: 3.0,
            recent_form: "○○×".into(),
            profile: CandidateProfile::Bicycle {
                rank: Some(" s1 ".into()),
            },
        };
        let scores = BicycleModel.specialist_scores(&candidate);
        assert_eq!(scores[0], (Factor::Rider, Some(1.0)));
        assert_eq!(scores[1], (Factor::Position, Some(0.8)));
    }
}
