//! Forecast bot configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Category;

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Root directory for every persisted artifact.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Categories processed by each cycle.
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    /// Adaptive weight tuning thresholds and deltas.
    #[serde(default)]
    pub tuning: TuningConfig,

    /// Provider call policy.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Upstream feed endpoint.
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Artifacts dated strictly before `now - retention_days` are eligible for deletion.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Minimum matched events before a segment's accuracy counts.
    #[serde(default = "default_min_segment_samples")]
    pub min_segment_samples: usize,

    /// Winner odds at or below this are the favorite band.
    #[serde(default = "default_favorite_max_odds")]
    pub favorite_max_odds: f64,

    /// Winner odds at or below this (and above favorite) are mid-range.
    #[serde(default = "default_mid_range_max_odds")]
    pub mid_range_max_odds: f64,
}

/// Thresholds are hand-picked starting points, not validated constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Number of past report dates considered by the tuner.
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// Window accuracy below this fires the critical adjustment.
    #[serde(default = "default_t_min")]
    pub t_min: f64,

    /// Window accuracy below this (and >= t_min) fires the moderate adjustment.
    #[serde(default = "default_t_target")]
    pub t_target: f64,

    /// Maximum per-cycle delta, used by the critical class.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_moderate_rate")]
    pub moderate_rate: f64,

    #[serde(default = "default_segment_rate")]
    pub segment_rate: f64,

    /// Upper clip applied to every component before renormalizing.
    #[serde(default = "default_w_max")]
    pub w_max: f64,

    #[serde(default = "default_favorite_band_threshold")]
    pub favorite_band_threshold: f64,

    #[serde(default = "default_mid_range_band_threshold")]
    pub mid_range_band_threshold: f64,

    #[serde(default = "default_longshot_band_threshold")]
    pub longshot_band_threshold: f64,

    #[serde(default = "default_venue_threshold")]
    pub venue_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total attempts per provider call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles per retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,

    /// Bearer token; empty means unauthenticated.
    #[serde(default)]
    pub api_key: String,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_categories() -> Vec<Category> {
    Category::ALL.to_vec()
}
fn default_retention_days() -> i64 {
    7
}
fn default_min_segment_samples() -> usize {
    3
}
fn default_favorite_max_odds() -> f64 {
    3.0
}
fn default_mid_range_max_odds() -> f64 {
    8.0
}

fn default_window_days() -> i64 {
    7
}
fn default_t_min() -> f64 {
    0.25
}
fn default_t_target() -> f64 {
    0.45
}
fn default_learning_rate() -> f64 {
    0.15
}
fn default_moderate_rate() -> f64 {
    0.05
}
fn default_segment_rate() -> f64 {
    0.10
}
fn default_w_max() -> f64 {
    0.7
}
fn default_favorite_band_threshold() -> f64 {
    0.6
}
fn default_mid_range_band_threshold() -> f64 {
    0.3
}
fn default_longshot_band_threshold() -> f64 {
    0.1
}
fn default_venue_threshold() -> f64 {
    0.3
}

fn default_max_attempts() -> u32 {
    2
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_max_concurrent_fetches() -> usize {
    4
}
fn default_requests_per_second() -> u32 {
    5
}
fn default_feed_base_url() -> String {
    "http://localhost:8080".into()
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            categories: default_categories(),
            retention: RetentionConfig::default(),
            verification: VerificationConfig::default(),
            tuning: TuningConfig::default(),
            fetch: FetchConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            min_segment_samples: default_min_segment_samples(),
            favorite_max_odds: default_favorite_max_odds(),
            mid_range_max_odds: default_mid_range_max_odds(),
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            t_min: default_t_min(),
            t_target: default_t_target(),
            learning_rate: default_learning_rate(),
            moderate_rate: default_moderate_rate(),
            segment_rate: default_segment_rate(),
            w_max: default_w_max(),
            favorite_band_threshold: default_favorite_band_threshold(),
            mid_range_band_threshold: default_mid_range_band_threshold(),
            longshot_band_threshold: default_longshot_band_threshold(),
            venue_threshold: default_venue_threshold(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            api_key: String::new(),
        }
    }
}
