//! Synthetic whale-buy generator.
//!
//! Amounts come from an explicit weighted ladder of round magnitudes, with the
//! lower-middle rungs weighted up so small and medium buys dominate and the
//! top of the ladder stays rare. A little jitter keeps rows from looking
//! identical. Native amounts are derived from a noisy simulated price.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::events::WhaleBuy;
use crate::config::FeedConfig;

pub const WALLET_PREFIX: &str = "EQ";
pub const WALLET_BODY_LEN: usize = 46;
/// Alphanumerics without the look-alikes `0`, `O`, `I` and `l`.
pub const WALLET_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz123456789";

const ID_LEN: usize = 9;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// One rung of the amount ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderStep {
    pub value: u64,
    pub weight: u32,
}

impl LadderStep {
    pub fn default_ladder() -> Vec<LadderStep> {
        [
            (2_500, 3),
            (3_000, 3),
            (5_000, 3),
            (7_500, 3),
            (10_000, 2),
            (15_000, 2),
            (25_000, 1),
            (50_000, 1),
            (75_000, 1),
            (100_000, 1),
            (150_000, 1),
            (250_000, 1),
        ]
        .into_iter()
        .map(|(value, weight)| LadderStep { value, weight })
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Generator {
    values: Vec<u64>,
    index: WeightedIndex<u32>,
    jitter_max: u64,
    reference_price: f64,
    price_band: f64,
}

impl Generator {
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let (price, band) = (cfg.reference_price, cfg.price_band);
        if !price.is_finite() || price <= 0.0 {
            bail!("reference price {} must be positive", price);
        }
        if !band.is_finite() || band < 0.0 || band >= price {
            bail!("price band {} must be within [0, {})", band, price);
        }
        let index = WeightedIndex::new(cfg.ladder.iter().map(|s| s.weight))
            .map_err(|e| anyhow!("invalid amount ladder: {}", e))?;
        Ok(Self {
            values: cfg.ladder.iter().map(|s| s.value).collect(),
            index,
            jitter_max: cfg.jitter_max,
            reference_price: cfg.reference_price,
            price_band: cfg.price_band,
        })
    }

    /// Produce a fresh, highlighted event stamped `now`.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, now: DateTime<Utc>) -> WhaleBuy {
        let amount_usd = self.draw_amount(rng);
        let price = self.draw_price(rng);
        WhaleBuy {
            id: random_token(rng, ID_ALPHABET, ID_LEN),
            amount_usd,
            amount_native: ((amount_usd as f64 / price).round() as u64).max(1),
            wallet: generate_wallet(rng),
            timestamp: now,
            is_new: true,
        }
    }

    fn draw_amount<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let base = self.values[self.index.sample(rng)];
        let jitter = if self.jitter_max > 0 {
            rng.gen_range(0..self.jitter_max)
        } else {
            0
        };
        base.saturating_add(jitter)
    }

    fn draw_price<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.price_band > 0.0 {
            rng.gen_range(
                self.reference_price - self.price_band..self.reference_price + self.price_band,
            )
        } else {
            self.reference_price
        }
    }

    /// Inclusive lower and exclusive upper bound of `amount_usd`.
    pub fn amount_bounds(&self) -> (u64, u64) {
        let min = self.values.iter().copied().min().unwrap_or(0);
        let max = self.values.iter().copied().max().unwrap_or(0);
        (min, max.saturating_add(self.jitter_max.max(1)))
    }

    pub fn price_bounds(&self) -> (f64, f64) {
        (
            self.reference_price - self.price_band,
            self.reference_price + self.price_band,
        )
    }
}

pub fn generate_wallet<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut wallet = String::with_capacity(WALLET_PREFIX.len() + WALLET_BODY_LEN);
    wallet.push_str(WALLET_PREFIX);
    wallet.push_str(&random_token(rng, WALLET_ALPHABET, WALLET_BODY_LEN));
    wallet
}

fn random_token<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}
