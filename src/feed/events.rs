use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One synthetic whale purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhaleBuy {
    pub id: String,
    pub amount_usd: u64,
    pub amount_native: u64,
    pub wallet: String,
    pub timestamp: DateTime<Utc>,
    pub is_new: bool,
}

impl WhaleBuy {
    pub fn tier(&self) -> Tier {
        Tier::of(self.amount_usd)
    }
}

/// Size bucket of a purchase, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Tier {
    pub fn of(amount_usd: u64) -> Self {
        match amount_usd {
            a if a >= 100_000 => Tier::Legendary,
            a if a >= 50_000 => Tier::Epic,
            a if a >= 25_000 => Tier::Rare,
            a if a >= 10_000 => Tier::Uncommon,
            _ => Tier::Common,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Common => "common",
            Tier::Uncommon => "uncommon",
            Tier::Rare => "rare",
            Tier::Epic => "epic",
            Tier::Legendary => "legendary",
        }
    }
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Newest first.
    pub events: Vec<WhaleBuy>,
    pub total_volume: u64,
}

impl FeedSnapshot {
    /// Hex SHA-256 over ids, amounts, highlight flags and the running total.
    pub fn state_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for e in &self.events {
            hasher.update(e.id.as_bytes());
            hasher.update(e.amount_usd.to_le_bytes());
            hasher.update(e.amount_native.to_le_bytes());
            hasher.update([e.is_new as u8]);
        }
        hasher.update(self.total_volume.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn highlighted(&self) -> usize {
        self.events.iter().filter(|e| e.is_new).count()
    }
}
