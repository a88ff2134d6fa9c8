//! Domain types shared across the bot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Tolerance used when checking that a weight vector sums to one.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Sub-score used whenever an input is missing or unusable.
pub const NEUTRAL_SUB_SCORE: f64 = 0.5;

// ── Categories & identity ─────────────────────────────────────────────

/// A family of scheduled, repeating competitive events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HorseRacing,
    BoatRacing,
    BicycleRacing,
    AutoRacing,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::HorseRacing,
        Category::BoatRacing,
        Category::BicycleRacing,
        Category::AutoRacing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::HorseRacing => "horse_racing",
            Category::BoatRacing => "boat_racing",
            Category::BicycleRacing => "bicycle_racing",
            Category::AutoRacing => "auto_racing",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "horse_racing" | "horse" => Ok(Category::HorseRacing),
            "boat_racing" | "boat" => Ok(Category::BoatRacing),
            "bicycle_racing" | "bicycle" | "keirin" => Ok(Category::BicycleRacing),
            "auto_racing" | "auto" => Ok(Category::AutoRacing),
            other => Err(Error::Config(format!("unknown category: {other}"))),
        }
    }
}

/// Identity of one event: category + venue + sequence + date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub category: Category,
    pub venue: String,
    /// Race number within the venue's card for the day.
    pub sequence: u32,
    pub date: NaiveDate,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/R{}",
            self.category, self.venue, self.date, self.sequence
        )
    }
}

// ── Surface & weather ─────────────────────────────────────────────────

/// Going / bank / water condition of the racing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceCondition {
    Good,
    SlightlyHeavy,
    Heavy,
    Bad,
}

impl SurfaceCondition {
    pub fn is_heavy(&self) -> bool {
        matches!(self, SurfaceCondition::Heavy | SurfaceCondition::Bad)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Sunny,
    Cloudy,
    LightRain,
    Rain,
    HeavyRain,
    Snow,
    #[default]
    Unknown,
}

impl Weather {
    /// Surface condition implied by the weather, if any.
    pub fn surface(&self) -> Option<SurfaceCondition> {
        match self {
            Weather::Sunny | Weather::Cloudy => Some(SurfaceCondition::Good),
            Weather::LightRain => Some(SurfaceCondition::SlightlyHeavy),
            Weather::Rain => Some(SurfaceCondition::Heavy),
            Weather::HeavyRain | Weather::Snow => Some(SurfaceCondition::Bad),
            Weather::Unknown => None,
        }
    }
}

/// Environmental descriptors for a venue on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalContext {
    pub venue: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub weather: Weather,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub wind_mps: Option<f64>,
    #[serde(default)]
    pub humidity_pct: Option<f64>,
}

impl EnvironmentalContext {
    pub fn surface(&self) -> Option<SurfaceCondition> {
        self.weather.surface()
    }
}

// ── Candidates & events ───────────────────────────────────────────────

/// One symbol of a candidate's recent-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormMark {
    Win,
    Placed,
    Unplaced,
}

impl FormMark {
    pub fn parse(symbol: char) -> Option<Self> {
        match symbol {
            '○' | '◎' | '1' | 'W' | 'w' => Some(FormMark::Win),
            '△' | '2' | '3' | 'P' | 'p' => Some(FormMark::Placed),
            '×' | 'x' | 'X' | 'L' | 'l' | '4'..='9' => Some(FormMark::Unplaced),
            _ => None,
        }
    }
}

/// Parse a recent-form string, ignoring unrecognised symbols.
pub fn parse_form(raw: &str) -> Vec<FormMark> {
    raw.chars().filter_map(FormMark::parse).collect()
}

/// Category-specific candidate attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateProfile {
    Horse {
        #[serde(default)]
        jockey: Option<String>,
        /// Season win rate of the jockey (0.0–1.0).
        #[serde(default)]
        jockey_win_rate: Option<f64>,
    },
    Boat {
        #[serde(default)]
        racer: Option<String>,
        /// Motor two-place finish rate in percent.
        #[serde(default)]
        motor_two_place_rate: Option<f64>,
    },
    Bicycle {
        #[serde(default)]
        rank: Option<String>,
    },
    Auto {
        #[serde(default)]
        grade: Option<String>,
    },
    #[default]
    Unknown,
}

/// One competing entrant within an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Entry number, unique within the event (also the draw / lane).
    pub entry_number: u32,
    #[serde(default)]
    pub name: String,
    /// Decimal market odds (> 0).
    pub odds: f64,
    /// Most recent outcome first, e.g. "○△○×○" or "121334".
    #[serde(default)]
    pub recent_form: String,
    #[serde(default)]
    pub profile: CandidateProfile,
}

impl Candidate {
    pub fn form_marks(&self) -> Vec<FormMark> {
        parse_form(&self.recent_form)
    }
}

/// One scheduled race with its field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: EventKey,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distance_m: Option<u32>,
    /// Surface condition announced by the organiser, if any.
    #[serde(default)]
    pub declared_surface: Option<SurfaceCondition>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

// ── Weights ───────────────────────────────────────────────────────────

/// A named scoring factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Price,
    Form,
    Environment,
    Rider,
    Machine,
    Position,
}

impl Factor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Price => "price",
            Factor::Form => "form",
            Factor::Environment => "environment",
            Factor::Rider => "rider",
            Factor::Machine => "machine",
            Factor::Position => "position",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clip every component to `[0, w_max]` and rescale so the vector sums to 1.
///
/// Overflow above `w_max` after rescaling is redistributed over the
/// uncapped components until none exceeds the cap. When the cap cannot be
/// met (too few positive components), the proportional result is kept.
///
/// Fails when a component is not finite or nothing positive is left to
/// rescale; callers keep their previous vector in that case.
pub fn normalize_weights(
    raw: &BTreeMap<Factor, f64>,
    w_max: f64,
) -> Result<BTreeMap<Factor, f64>, Error> {
    const CAP_EPSILON: f64 = 1e-12;

    if raw.is_empty() {
        return Err(Error::WeightNormalization("empty weight vector".into()));
    }
    let mut clipped = BTreeMap::new();
    for (factor, value) in raw {
        if !value.is_finite() {
            return Err(Error::WeightNormalization(format!(
                "{factor} weight is not finite ({value})"
            )));
        }
        clipped.insert(*factor, value.clamp(0.0, w_max));
    }

    let total: f64 = clipped.values().sum();
    if total <= 0.0 {
        return Err(Error::WeightNormalization(
            "all weights clipped to zero".into(),
        ));
    }
    for value in clipped.values_mut() {
        *value /= total;
    }

    let mut capped: BTreeSet<Factor> = BTreeSet::new();
    loop {
        let over: Vec<Factor> = clipped
            .iter()
            .filter(|(f, v)| !capped.contains(*f) && **v > w_max + CAP_EPSILON)
            .map(|(f, _)| *f)
            .collect();
        if over.is_empty() {
            break;
        }
        let mut next_capped = capped.clone();
        next_capped.extend(over);
        let room = 1.0 - next_capped.len() as f64 * w_max;
        let free_total: f64 = clipped
            .iter()
            .filter(|(f, _)| !next_capped.contains(*f))
            .map(|(_, v)| *v)
            .sum();
        if room <= 0.0 || free_total <= 0.0 {
            break;
        }
        for (factor, value) in clipped.iter_mut() {
            if next_capped.contains(factor) {
                *value = w_max;
            } else {
                *value *= room / free_total;
            }
        }
        capped = next_capped;
    }

    // Push the rounding residue onto the largest uncapped component.
    let residue = 1.0 - clipped.values().sum::<f64>();
    if let Some(target) = clipped
        .iter_mut()
        .filter(|(f, _)| !capped.contains(*f))
        .map(|(_, v)| v)
        .max_by(|a, b| a.total_cmp(b))
    {
        *target += residue;
    } else if let Some(largest) = clipped.values_mut().max_by(|a, b| a.total_cmp(b)) {
        *largest += residue;
    }
    Ok(clipped)
}

/// Normalized factor weights for one category, versioned per commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub category: Category,
    /// 0 for built-in defaults that were never committed.
    pub version: u64,
    pub effective_date: NaiveDate,
    pub committed_at: DateTime<Utc>,
    pub weights: BTreeMap<Factor, f64>,
}

impl WeightVector {
    /// Build an uncommitted (version 0) vector, normalizing the input.
    pub fn new(
        category: Category,
        weights: BTreeMap<Factor, f64>,
        effective_date: NaiveDate,
    ) -> Result<Self, Error> {
        let weights = normalize_weights(&weights, 1.0)?;
        Ok(Self {
            category,
            version: 0,
            effective_date,
            committed_at: Utc::now(),
            weights,
        })
    }

    pub fn get(&self, factor: Factor) -> f64 {
        self.weights.get(&factor).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn is_normalized(&self) -> bool {
        !self.weights.is_empty()
            && self.weights.values().all(|w| w.is_finite() && *w >= 0.0)
            && (self.sum() - 1.0).abs() <= WEIGHT_EPSILON
    }

    /// Apply additive deltas, then clip and renormalize.
    pub fn with_deltas(
        &self,
        deltas: &[(Factor, f64)],
        w_max: f64,
    ) -> Result<BTreeMap<Factor, f64>, Error> {
        let mut proposed = self.weights.clone();
        for (factor, delta) in deltas {
            *proposed.entry(*factor).or_insert(0.0) += delta;
        }
        normalize_weights(&proposed, w_max)
    }
}

// ── Predictions ───────────────────────────────────────────────────────

/// Short machine-readable reason attached to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTag {
    Favorite,
    Longshot,
    StrongForm,
    SurfaceAdapted,
    SprintDistance,
    StayingDistance,
    InsideDraw,
    TopGrade,
    NeutralDefaults,
}

/// Computed rank and score for one candidate in one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub event: EventKey,
    pub entry_number: u32,
    #[serde(default)]
    pub candidate_name: String,
    pub odds: f64,
    /// 0–100.
    pub score: f64,
    /// 1-based, total order within the event.
    pub rank: u32,
    pub predicted_winner: bool,
    /// Share of the event's total score (0.0–1.0).
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Vec<RationaleTag>,
    pub weights_version: u64,
    /// Event date, stored explicitly on every record.
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

// ── Outcomes & verification ───────────────────────────────────────────

/// Recorded result of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualOutcome {
    pub event: EventKey,
    /// Entry numbers of the 1st, 2nd and 3rd place finishers.
    pub finish_order: Vec<u32>,
    /// Realized (paid) odds of the winner.
    #[serde(default)]
    pub winner_odds: Option<f64>,
    #[serde(default)]
    pub surface: Option<SurfaceCondition>,
}

impl ActualOutcome {
    pub fn winner(&self) -> Option<u32> {
        self.finish_order.first().copied()
    }

    /// 1-based finishing position, for the first three places only.
    pub fn position_of(&self, entry_number: u32) -> Option<u32> {
        self.finish_order
            .iter()
            .take(3)
            .position(|n| *n == entry_number)
            .map(|i| i as u32 + 1)
    }
}

/// Market-price segment of a realized winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceBand {
    Favorite,
    MidRange,
    Longshot,
}

impl PriceBand {
    pub fn classify(odds: f64, favorite_max_odds: f64, mid_range_max_odds: f64) -> Self {
        if odds <= favorite_max_odds {
            PriceBand::Favorite
        } else if odds <= mid_range_max_odds {
            PriceBand::MidRange
        } else {
            PriceBand::Longshot
        }
    }
}

/// Why a prediction hit or missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningFactor {
    FavoriteHit,
    LongshotHit,
    Miss,
    LongshotUpset,
    HeavySurface,
}

/// Correctness of one prediction record against the actual finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryVerdict {
    pub entry_number: u32,
    pub predicted_rank: u32,
    pub actual_position: Option<u32>,
    pub correct: bool,
}

/// Actual outcome of one event checked against its predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub event: EventKey,
    pub date: NaiveDate,
    pub finish_order: Vec<u32>,
    pub predicted_winner: u32,
    pub correct: bool,
    #[serde(default)]
    pub winner_odds: Option<f64>,
    #[serde(default)]
    pub price_band: Option<PriceBand>,
    #[serde(default)]
    pub verdicts: Vec<EntryVerdict>,
    #[serde(default)]
    pub learning_factors: Vec<LearningFactor>,
    pub verified_at: DateTime<Utc>,
}

/// Accuracy of a segment, gated on a minimum sample size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum SegmentAccuracy {
    Meaningful(f64),
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub total: usize,
    pub correct: usize,
    pub accuracy: SegmentAccuracy,
}

impl SegmentStats {
    pub fn from_counts(total: usize, correct: usize, min_samples: usize) -> Self {
        let accuracy = if total > 0 && total >= min_samples {
            SegmentAccuracy::Meaningful(correct as f64 / total as f64)
        } else {
            SegmentAccuracy::InsufficientData
        };
        Self {
            total,
            correct,
            accuracy,
        }
    }

    pub fn meaningful_accuracy(&self) -> Option<f64> {
        match self.accuracy {
            SegmentAccuracy::Meaningful(a) => Some(a),
            SegmentAccuracy::InsufficientData => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Verified,
    NoVerifiableData,
}

/// Segmented accuracy analysis for one date and category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub date: NaiveDate,
    pub category: Category,
    /// Distinct events that had predictions.
    pub predicted_events: usize,
    pub matched: usize,
    pub correct: usize,
    /// `None` when nothing could be verified.
    pub accuracy: Option<f64>,
    pub status: ReportStatus,
    #[serde(default)]
    pub by_price_band: BTreeMap<PriceBand, SegmentStats>,
    #[serde(default)]
    pub by_venue: BTreeMap<String, SegmentStats>,
    /// Predicted events without a recorded outcome yet.
    #[serde(default)]
    pub gaps: Vec<EventKey>,
    #[serde(default)]
    pub records: Vec<VerificationRecord>,
    /// How often each learning factor appeared across matched events.
    #[serde(default)]
    pub learning_factors: BTreeMap<LearningFactor, usize>,
    pub generated_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(Factor, f64)]) -> BTreeMap<Factor, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_normalize_rescales_to_one() {
        let w = normalize_weights(
            &weights(&[(Factor::Price, 0.5), (Factor::Form, 0.25), (Factor::Environment, 0.25)]),
            1.0,
        )
        .unwrap();
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() < 1e-12, "sum={}", sum);
        assert!((w[&Factor::Price] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_clips_negative_and_cap() {
        let w = normalize_weights(
            &weights(&[(Factor::Price, 0.9), (Factor::Form, -0.2), (Factor::Environment, 0.3)]),
            0.7,
        )
        .unwrap();
        assert_eq!(w[&Factor::Form], 0.0);
        assert!((w[&Factor::Price] - 0.7).abs() < 1e-9);
        assert!((w[&Factor::Environment] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_redistributes_overflow_above_cap() {
        // Price clips to 0.7, but rescaling the 0.95 total would push it to ~0.737.
        let w = normalize_weights(
            &weights(&[
                (Factor::Price, 0.8),
                (Factor::Form, -0.05),
                (Factor::Environment, 0.15),
                (Factor::Rider, 0.1),
            ]),
            0.7,
        )
        .unwrap();
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum={}", sum);
        assert!(w[&Factor::Price] <= 0.7 + 1e-9);
        assert!((w[&Factor::Environment] - 0.18).abs() < 1e-9);
        assert!((w[&Factor::Rider] - 0.12).abs() < 1e-9);
        assert_eq!(w[&Factor::Form], 0.0);
    }

    #[test]
    fn test_normalize_keeps_proportions_when_cap_is_unreachable() {
        let w = normalize_weights(&weights(&[(Factor::Price, 0.6), (Factor::Form, 0.0)]), 0.7).unwrap();
        assert!((w[&Factor::Price] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_rejects_all_zero_and_nan() {
        assert!(normalize_weights(&weights(&[(Factor::Price, -1.0)]), 0.7).is_err());
        assert!(normalize_weights(&weights(&[(Factor::Price, f64::NAN)]), 0.7).is_err());
        assert!(normalize_weights(&BTreeMap::new(), 0.7).is_err());
    }

    #[test]
    fn test_weight_vector_with_deltas_stays_normalized() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 8).unwrap();
        let wv = WeightVector::new(
            Category::HorseRacing,
            weights(&[
                (Factor::Price, 0.4),
                (Factor::Form, 0.3),
                (Factor::Environment, 0.2),
                (Factor::Rider, 0.1),
            ]),
            date,
        )
        .unwrap();
        assert!(wv.is_normalized());

        let next = wv
            .with_deltas(&[(Factor::Price, 0.15), (Factor::Form, -0.15)], 0.7)
            .unwrap();
        let sum: f64 = next.values().sum();
        assert!((sum - 1.0).abs() <= WEIGHT_EPSILON);
        assert!(next[&Factor::Price] > wv.get(Factor::Price));
        assert!(next[&Factor::Form] < wv.get(Factor::Form));
    }

    #[test]
    fn test_form_parsing_mixed_symbols() {
        let marks = parse_form("○△×?1");
        assert_eq!(
            marks,
            vec![FormMark::Win, FormMark::Placed, FormMark::Unplaced, FormMark::Win]
        );
    }

    #[test]
    fn test_price_band_boundaries() {
        assert_eq!(PriceBand::classify(3.0, 3.0, 8.0), PriceBand::Favorite);
        assert_eq!(PriceBand::classify(3.1, 3.0, 8.0), PriceBand::MidRange);
        assert_eq!(PriceBand::classify(8.0, 3.0, 8.0), PriceBand::MidRange);
        assert_eq!(PriceBand::classify(8.1, 3.0, 8.0), PriceBand::Longshot);
    }

    #[test]
    fn test_segment_gating() {
        let thin = SegmentStats::from_counts(2, 2, 3);
        assert_eq!(thin.accuracy, SegmentAccuracy::InsufficientData);
        let enough = SegmentStats::from_counts(4, 1, 3);
        assert_eq!(enough.meaningful_accuracy(), Some(0.25));
    }

    #[test]
    fn test_category_from_str_aliases() {
        assert_eq!("boat".parse::<Category>().unwrap(), Category::BoatRacing);
        assert_eq!("horse-racing".parse::<Category>().unwrap(), Category::HorseRacing);
        assert!("chess".parse::<Category>().is_err());
    }

    #[test]
    fn test_outcome_positions() {
        let outcome = ActualOutcome {
            event: EventKey {
                category: Category::BoatRacing,
                venue: "Kiryu".into(),
                sequence: 1,
                date: NaiveDate::from_ymd_opt(2025, 8, 8).unwrap(),
            },
            finish_order: vec![3, 1, 5, 2],
            winner_odds: Some(4.2),
            surface: None,
        };
        assert_eq!(outcome.winner(), Some(3));
        assert_eq!(outcome.position_of(5), Some(3));
        assert_eq!(outcome.position_of(2), None);
    }
}
