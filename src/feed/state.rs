use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::events::{FeedSnapshot, WhaleBuy};
use super::generator::Generator;

/// Upper bound on the up-front buffer allocation.
const PREALLOC_LIMIT: usize = 256;

/// Bounded, newest-first buffer of whale buys plus the all-time volume.
#[derive(Debug, Clone)]
pub struct FeedState {
    events: VecDeque<WhaleBuy>,
    total_volume: u64,
    max_events: usize,
    admitted: u64,
    evicted: u64,
}

/// Outcome of a single admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub evicted: usize,
    pub total_volume: u64,
}

impl FeedState {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(PREALLOC_LIMIT).saturating_add(1)),
            total_volume: 0,
            max_events,
            admitted: 0,
            evicted: 0,
        }
    }

    /// Build the initial buffer from `count` backdated, already-expired buys
    /// spread uniformly over the last `window_secs` before `now`. A window
    /// reaching past chrono's range stamps the buy at `now`.
    pub fn seeded<R: Rng + ?Sized>(
        max_events: usize,
        generator: &Generator,
        rng: &mut R,
        count: usize,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let window_ms = window_secs.saturating_mul(1000);
        let mut seed: Vec<WhaleBuy> = (0..count)
            .map(|_| {
                let mut buy = generator.generate(rng, now);
                let back_ms = if window_ms > 0 { rng.gen_range(0..window_ms) } else { 0 };
                buy.timestamp = i64::try_from(back_ms)
                    .ok()
                    .and_then(Duration::try_milliseconds)
                    .and_then(|back| now.checked_sub_signed(back))
                    .unwrap_or(now);
                buy.is_new = false;
                buy
            })
            .collect();
        seed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut state = Self::new(max_events);
        state.total_volume = seed.iter().map(|b| b.amount_usd).sum();
        state.admitted = seed.len() as u64;
        state.events.extend(seed);
        state.truncate();
        state
    }

    /// Push `event` to the head, count it toward the total, and drop whatever
    /// falls past capacity.
    ///
    /// A timestamp older than the current head (wall clock stepped back) is
    /// lifted to the head's timestamp so the buffer stays ordered.
    pub fn admit(&mut self, mut event: WhaleBuy) -> Admission {
        if let Some(head) = self.events.front() {
            if event.timestamp < head.timestamp {
                event.timestamp = head.timestamp;
            }
        }
        self.total_volume = self.total_volume.saturating_add(event.amount_usd);
        self.admitted += 1;
        self.events.push_front(event);
        let evicted = self.truncate();
        Admission { evicted, total_volume: self.total_volume }
    }

    /// Clear the highlight on `id`. Returns true only when a flag flipped.
    pub fn expire_highlight(&mut self, id: &str) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) if event.is_new => {
                event.is_new = false;
                true
            }
            _ => false,
        }
    }

    fn truncate(&mut self) -> usize {
        let over = self.events.len().saturating_sub(self.max_events);
        self.events.truncate(self.max_events);
        self.evicted += over as u64;
        over
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            events: self.events.iter().cloned().collect(),
            total_volume: self.total_volume,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &WhaleBuy> {
        self.events.iter()
    }

    pub fn get(&self, id: &str) -> Option<&WhaleBuy> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Sum of `amount_usd` over the events currently held.
    pub fn window_volume(&self) -> u64 {
        self.events.iter().map(|e| e.amount_usd).sum()
    }
}
