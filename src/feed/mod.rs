//! Synthetic whale-buy feed.
//!
//! ```text
//! generation timer ──► Generator ──► FeedState::admit ──► watch<FeedSnapshot>
//!        │                                  ▲
//!        └── one-shot expiry (highlight) ───┘
//! sweep timer ──► RadarSweep ──► watch<RadarFrame>
//! ```

pub mod engine;
pub mod events;
pub mod generator;
pub mod radar;
pub mod scheduler;
pub mod state;

pub use engine::FeedEngine;
pub use events::{FeedSnapshot, Tier, WhaleBuy};
