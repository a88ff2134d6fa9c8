//! Configuration loader: merges `.env`, an optional TOML file and
//! `FORECAST_*` environment variables.

use std::path::{Path, PathBuf};

use common::{Category, Error, ForecastConfig};

fn parse_positive_i64(raw: &str, env_name: &str) -> Result<i64, Error> {
    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed <= 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_unit_f64(raw: &str, env_name: &str) -> Result<f64, Error> {
    let parsed = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::Config(format!("{env_name} must be a number in [0,1]")))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(Error::Config(format!("{env_name} must be a number in [0,1]")));
    }
    Ok(parsed)
}

fn parse_categories(raw: &str) -> Result<Vec<Category>, Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

pub fn validate_config(config: &ForecastConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.categories.is_empty() {
        issues.push("categories must contain at least one category".into());
    }
    if config.data_dir.as_os_str().is_empty() {
        issues.push("data_dir must not be empty".into());
    }

    if config.retention.retention_days <= 0 {
        issues.push("retention.retention_days must be > 0".into());
    }

    if config.verification.min_segment_samples == 0 {
        issues.push("verification.min_segment_samples must be > 0".into());
    }
    if config.verification.favorite_max_odds <= 0.0 {
        issues.push("verification.favorite_max_odds must be > 0".into());
    }
    if config.verification.mid_range_max_odds <= config.verification.favorite_max_odds {
        issues.push(
            "verification.mid_range_max_odds must be > verification.favorite_max_odds".into(),
        );
    }

    let t = &config.tuning;
    if t.window_days <= 0 {
        issues.push("tuning.window_days must be > 0".into());
    }
    if !(0.0..=1.0).contains(&t.t_min) || !(0.0..=1.0).contains(&t.t_target) {
        issues.push("tuning.t_min and tuning.t_target must be in [0,1]".into());
    }
    if t.t_min > t.t_target {
        issues.push("tuning.t_min must be <= tuning.t_target".into());
    }
    for (name, rate) in [
        ("learning_rate", t.learning_rate),
        ("moderate_rate", t.moderate_rate),
        ("segment_rate", t.segment_rate),
    ] {
        if !(0.0..=0.5).contains(&rate) {
            issues.push(format!("tuning.{name} must be in [0,0.5]"));
        }
    }
    if t.moderate_rate > t.learning_rate {
        issues.push("tuning.moderate_rate must be <= tuning.learning_rate".into());
    }
    if !(t.w_max > 0.0 && t.w_max <= 1.0) {
        issues.push("tuning.w_max must be in (0,1]".into());
    }
    for (name, threshold) in [
        ("favorite_band_threshold", t.favorite_band_threshold),
        ("mid_range_band_threshold", t.mid_range_band_threshold),
        ("longshot_band_threshold", t.longshot_band_threshold),
        ("venue_threshold", t.venue_threshold),
    ] {
        if !(0.0..=1.0).contains(&threshold) {
            issues.push(format!("tuning.{name} must be in [0,1]"));
        }
    }

    if config.fetch.max_attempts == 0 {
        issues.push("fetch.max_attempts must be > 0".into());
    }
    if config.fetch.timeout_secs == 0 {
        issues.push("fetch.timeout_secs must be > 0".into());
    }
    if config.fetch.max_concurrent_fetches == 0 {
        issues.push("fetch.max_concurrent_fetches must be > 0".into());
    }
    if config.fetch.requests_per_second == 0 {
        issues.push("fetch.requests_per_second must be > 0".into());
    }
    if config.feed.base_url.trim().is_empty() {
        issues.push("feed.base_url must not be empty".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply `FORECAST_*` overrides from `lookup` (the process environment in
/// production).
pub fn apply_env_overrides(
    config: &mut ForecastConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    if let Some(dir) = lookup("FORECAST_DATA_DIR") {
        config.data_dir = PathBuf::from(dir.trim());
    }
    if let Some(raw) = lookup("FORECAST_CATEGORIES") {
        config.categories = parse_categories(&raw)?;
    }
    if let Some(raw) = lookup("FORECAST_RETENTION_DAYS") {
        config.retention.retention_days = parse_positive_i64(&raw, "FORECAST_RETENTION_DAYS")?;
    }
    if let Some(raw) = lookup("FORECAST_WINDOW_DAYS") {
        config.tuning.window_days = parse_positive_i64(&raw, "FORECAST_WINDOW_DAYS")?;
    }
    if let Some(raw) = lookup("FORECAST_T_MIN") {
        config.tuning.t_min = parse_unit_f64(&raw, "FORECAST_T_MIN")?;
    }
    if let Some(raw) = lookup("FORECAST_T_TARGET") {
        config.tuning.t_target = parse_unit_f64(&raw, "FORECAST_T_TARGET")?;
    }
    if let Some(raw) = lookup("FORECAST_LEARNING_RATE") {
        config.tuning.learning_rate = parse_unit_f64(&raw, "FORECAST_LEARNING_RATE")?;
    }
    if let Some(raw) = lookup("FORECAST_W_MAX") {
        config.tuning.w_max = parse_unit_f64(&raw, "FORECAST_W_MAX")?;
    }
    if let Some(raw) = lookup("FORECAST_MIN_SEGMENT_SAMPLES") {
        config.verification.min_segment_samples =
            parse_positive_i64(&raw, "FORECAST_MIN_SEGMENT_SAMPLES")? as usize;
    }
    if let Some(raw) = lookup("FORECAST_MAX_ATTEMPTS") {
        config.fetch.max_attempts = parse_positive_i64(&raw, "FORECAST_MAX_ATTEMPTS")? as u32;
    }
    if let Some(raw) = lookup("FORECAST_TIMEOUT_SECS") {
        config.fetch.timeout_secs = parse_positive_i64(&raw, "FORECAST_TIMEOUT_SECS")? as u64;
    }
    if let Some(url) = lookup("FORECAST_FEED_URL") {
        config.feed.base_url = url.trim().to_string();
    }
    if let Some(key) = lookup("FORECAST_FEED_API_KEY") {
        config.feed.api_key = key;
    }
    Ok(())
}

/// Load configuration. `path` overrides the default `config.toml`.
pub fn load_config(path: Option<&Path>) -> Result<ForecastConfig, Error> {
    // 1. Load .env file from the working directory or its parents.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, then the TOML file if present.
    let mut config = ForecastConfig::default();
    let explicit = path.is_some();
    let config_path = path.unwrap_or_else(|| Path::new("config.toml"));
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    } else if explicit {
        return Err(Error::Config(format!(
            "Config file {} not found",
            config_path.display()
        )));
    }

    // 3. Environment overrides (highest priority).
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        validate_config(&ForecastConfig::default()).unwrap();
    }

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("FORECAST_CATEGORIES", "horse, boat"),
            ("FORECAST_RETENTION_DAYS", "14"),
            ("FORECAST_T_MIN", "0.2"),
        ]
        .into_iter()
        .collect();
        let mut config = ForecastConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(
            config.categories,
            vec![Category::HorseRacing, Category::BoatRacing]
        );
        assert_eq!(config.retention.retention_days, 14);
        assert!((config.tuning.t_min - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = ForecastConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == "FORECAST_RETENTION_DAYS").then(|| "-3".to_string())
        })
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = ForecastConfig::default();
        config.categories.clear();
        config.tuning.t_min = 0.6;
        config.fetch.max_attempts = 0;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("categories"));
        assert!(err.contains("t_min must be <= tuning.t_target"));
        assert!(err.contains("fetch.max_attempts"));
    }

    #[test]
    fn test_toml_file_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("forecast.toml");
        std::fs::write(
            &path,
            "data_dir = \"/var/lib/forecast\"\ncategories = [\"boat_racing\"]\n\n[retention]\nretention_days = 10\n",
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.categories, vec![Category::BoatRacing]);
        assert_eq!(config.retention.retention_days, 10);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&tmp.path().join("nope.toml"))).is_err());
    }
}
