use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::generator::LadderStep;

/// Largest buffer a config may ask for.
pub const MAX_EVENTS_LIMIT: usize = 10_000;
/// Seed timestamps reach back at most 30 days.
pub const MAX_SEED_WINDOW_SECS: u64 = 30 * 24 * 3_600;

/// Tunables for the feed engine. Hosts build this from defaults, the
/// environment, or a camelCase JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedConfig {
    pub max_events: usize,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub admit_probability: f64,
    pub highlight_duration_ms: u64,
    pub reference_price: f64,
    pub price_band: f64,
    pub jitter_max: u64,
    pub seed_count: usize,
    pub seed_window_secs: u64,
    pub sweep_interval_ms: u64,
    pub sweep_step_deg: u16,
    pub pulse_duration_ms: u64,
    pub rng_seed: Option<u64>,
    pub ladder: Vec<LadderStep>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_events: 50,
            min_interval_ms: 4_000,
            max_interval_ms: 7_000,
            admit_probability: 0.7,
            highlight_duration_ms: 3_000,
            reference_price: 3.42,
            price_band: 0.1,
            jitter_max: 500,
            seed_count: 15,
            seed_window_secs: 3_600,
            sweep_interval_ms: 50,
            sweep_step_deg: 3,
            pulse_duration_ms: 1_000,
            rng_seed: None,
            ladder: LadderStep::default_ladder(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_events: env_or("MAX_EVENTS", d.max_events),
            min_interval_ms: env_or("MIN_INTERVAL_MS", d.min_interval_ms),
            max_interval_ms: env_or("MAX_INTERVAL_MS", d.max_interval_ms),
            admit_probability: env_or("ADMIT_PROB", d.admit_probability),
            highlight_duration_ms: env_or("HIGHLIGHT_MS", d.highlight_duration_ms),
            reference_price: env_or("REFERENCE_PRICE", d.reference_price),
            price_band: env_or("PRICE_BAND", d.price_band),
            jitter_max: env_or("JITTER_MAX", d.jitter_max),
            seed_count: env_or("SEED_COUNT", d.seed_count),
            seed_window_secs: env_or("SEED_WINDOW_SECS", d.seed_window_secs),
            sweep_interval_ms: env_or("SWEEP_MS", d.sweep_interval_ms),
            sweep_step_deg: env_or("SWEEP_STEP_DEG", d.sweep_step_deg),
            pulse_duration_ms: env_or("PULSE_MS", d.pulse_duration_ms),
            rng_seed: std::env::var("RNG_SEED").ok().and_then(|v| v.parse().ok()),
            ladder: d.ladder,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw).context("parse feed config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read feed config {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_events == 0 {
            bail!("maxEvents must be at least 1");
        }
        if self.max_events > MAX_EVENTS_LIMIT {
            bail!("maxEvents {} exceeds {}", self.max_events, MAX_EVENTS_LIMIT);
        }
        if self.min_interval_ms == 0 {
            bail!("minIntervalMs must be positive");
        }
        if self.max_interval_ms < self.min_interval_ms {
            bail!(
                "maxIntervalMs ({}) is below minIntervalMs ({})",
                self.max_interval_ms,
                self.min_interval_ms
            );
        }
        if !(0.0..=1.0).contains(&self.admit_probability) {
            bail!("admitProbability {} outside [0, 1]", self.admit_probability);
        }
        if !self.reference_price.is_finite() || self.reference_price <= 0.0 {
            bail!("referencePrice must be a positive number");
        }
        if !self.price_band.is_finite()
            || self.price_band < 0.0
            || self.price_band >= self.reference_price
        {
            bail!(
                "priceBand {} must be within [0, referencePrice)",
                self.price_band
            );
        }
        if self.ladder.is_empty() {
            bail!("amount ladder is empty");
        }
        if let Some(step) = self.ladder.iter().find(|s| s.value == 0 || s.weight == 0) {
            bail!(
                "ladder step {}x{} needs a positive value and weight",
                step.value,
                step.weight
            );
        }
        if self.sweep_interval_ms == 0 {
            bail!("sweepIntervalMs must be positive");
        }
        if self.seed_window_secs > MAX_SEED_WINDOW_SECS {
            bail!(
                "seedWindowSecs {} exceeds {}",
                self.seed_window_secs,
                MAX_SEED_WINDOW_SECS
            );
        }
        Ok(())
    }

    /// Width of the generation interval window; zero when the bounds are
    /// inverted.
    pub fn interval_spread_ms(&self) -> u64 {
        self.max_interval_ms.saturating_sub(self.min_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let cfg = FeedConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_events, 50);
        assert_eq!(cfg.interval_spread_ms(), 3_000);
    }

    #[test]
    fn test_json_partial_keys_default() {
        let cfg = FeedConfig::from_json(r#"{"maxEvents": 10, "admitProbability": 1.0}"#).unwrap();
        assert_eq!(cfg.max_events, 10);
        assert_eq!(cfg.admit_probability, 1.0);
        assert_eq!(cfg.highlight_duration_ms, 3_000);
        assert_eq!(cfg.ladder.len(), 12);
    }

    #[test]
    fn test_json_recognized_options() {
        let raw = r#"{
            "maxEvents": 20,
            "minIntervalMs": 1000,
            "maxIntervalMs": 2000,
            "admitProbability": 0.5,
            "highlightDurationMs": 500,
            "referencePrice": 5.0
        }"#;
        let cfg = FeedConfig::from_json(raw).unwrap();
        assert_eq!(cfg.max_events, 20);
        assert_eq!(cfg.min_interval_ms, 1000);
        assert_eq!(cfg.max_interval_ms, 2000);
        assert_eq!(cfg.highlight_duration_ms, 500);
        assert_eq!(cfg.reference_price, 5.0);
    }

    #[test]
    fn test_rejects_inverted_interval() {
        let err = FeedConfig::from_json(r#"{"minIntervalMs": 5000, "maxIntervalMs": 100}"#)
            .unwrap_err();
        assert!(err.to_string().contains("maxIntervalMs"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            FeedConfig { max_events: 0, ..Default::default() },
            FeedConfig { admit_probability: 1.5, ..Default::default() },
            FeedConfig { reference_price: 0.0, ..Default::default() },
            FeedConfig { price_band: 4.0, ..Default::default() },
            FeedConfig { ladder: Vec::new(), ..Default::default() },
            FeedConfig { sweep_interval_ms: 0, ..Default::default() },
            FeedConfig {
                ladder: vec![LadderStep { value: 1_000, weight: 0 }],
                ..Default::default()
            },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "{:?} should be rejected", cfg);
        }
    }

    #[test]
    fn test_rejects_oversized_buffer() {
        let err = FeedConfig::from_json(r#"{"maxEvents": 18446744073709551615, "seedCount": 0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("maxEvents"));
        let at_limit = FeedConfig { max_events: MAX_EVENTS_LIMIT, ..Default::default() };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_rejects_huge_seed_window() {
        let err = FeedConfig::from_json(r#"{"seedWindowSecs": 100000000000000}"#).unwrap_err();
        assert!(err.to_string().contains("seedWindowSecs"));
        let month = FeedConfig { seed_window_secs: MAX_SEED_WINDOW_SECS, ..Default::default() };
        assert!(month.validate().is_ok());
    }

    #[test]
    fn test_inverted_spread_is_zero() {
        let cfg = FeedConfig { min_interval_ms: 5_000, max_interval_ms: 100, ..Default::default() };
        assert_eq!(cfg.interval_spread_ms(), 0);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(FeedConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"maxEvents": 7, "rngSeed": 42}}"#).unwrap();
        let cfg = FeedConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.max_events, 7);
        assert_eq!(cfg.rng_seed, Some(42));
    }

    #[test]
    fn test_from_file_missing() {
        let err = FeedConfig::from_file(Path::new("/nonexistent/feed.json")).unwrap_err();
        assert!(err.to_string().contains("read feed config"));
    }
}
