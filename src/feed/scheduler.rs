//! Timer tasks that drive the feed.
//!
//! Two independent loops run on the tokio runtime: the generation loop, which
//! sleeps a freshly drawn interval before each firing and arms a one-shot
//! highlight expiry for every admitted buy, and the sweep loop, which ticks the
//! radar at a fixed period. Both exit when the shutdown channel flips or its
//! sender goes away. Pending expiries live in a `JoinSet` owned by the
//! generation loop, so they are aborted together with it.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::config::FeedConfig;

/// Randomized firing policy of the generation timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationPolicy {
    pub min_interval: Duration,
    pub spread_ms: u64,
    pub admit_probability: f64,
}

impl GenerationPolicy {
    /// Inverted interval bounds collapse to a fixed period and the admit
    /// probability is clamped into `[0, 1]`.
    pub fn from_config(cfg: &FeedConfig) -> Self {
        let p = cfg.admit_probability;
        Self {
            min_interval: Duration::from_millis(cfg.min_interval_ms),
            spread_ms: cfg.interval_spread_ms(),
            admit_probability: if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) },
        }
    }

    /// Uniform in `[min, min + spread)`, redrawn after every firing.
    pub fn next_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let extra = if self.spread_ms > 0 {
            rng.gen_range(0..self.spread_ms)
        } else {
            0
        };
        self.min_interval + Duration::from_millis(extra)
    }

    pub fn should_admit<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.admit_probability)
    }
}

/// What the timers act on. The engine implements this over its shared state.
pub trait FeedDriver: Send + Sync + 'static {
    fn next_interval(&self) -> Duration;
    /// One generation firing. Returns the id of the admitted buy, if any.
    fn fire(&self) -> Option<String>;
    fn expire(&self, id: &str);
    fn sweep(&self);
    fn highlight_duration(&self) -> Duration;
    fn sweep_interval(&self) -> Duration;
}

pub fn spawn_generation<D: FeedDriver>(
    handle: &tokio::runtime::Handle,
    driver: Arc<D>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    handle.spawn(generation_loop(driver, shutdown))
}

pub fn spawn_sweep<D: FeedDriver>(
    handle: &tokio::runtime::Handle,
    driver: Arc<D>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    handle.spawn(sweep_loop(driver, shutdown))
}

async fn generation_loop<D: FeedDriver>(driver: Arc<D>, mut shutdown: watch::Receiver<bool>) {
    let mut expiries = JoinSet::new();
    while !*shutdown.borrow() {
        let wait = driver.next_interval();
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(wait) => {
                if let Some(id) = driver.fire() {
                    let d = driver.clone();
                    let after = driver.highlight_duration();
                    expiries.spawn(async move {
                        sleep(after).await;
                        d.expire(&id);
                    });
                }
            }
        }
        while expiries.try_join_next().is_some() {}
    }
    expiries.abort_all();
}

async fn sweep_loop<D: FeedDriver>(driver: Arc<D>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(driver.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    ticker.tick().await;
    while !*shutdown.borrow() {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => driver.sweep(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_interval_within_window() {
        let policy = GenerationPolicy::from_config(&FeedConfig::default());
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..1_000 {
            let d = policy.next_interval(&mut rng);
            assert!(d >= Duration::from_millis(4_000) && d < Duration::from_millis(7_000));
        }
    }

    #[test]
    fn test_fixed_interval_without_spread() {
        let cfg = FeedConfig { min_interval_ms: 250, max_interval_ms: 250, ..Default::default() };
        let policy = GenerationPolicy::from_config(&cfg);
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(policy.next_interval(&mut rng), Duration::from_millis(250));
    }

    #[test]
    fn test_unvalidated_config_does_not_panic() {
        let cfg = FeedConfig {
            min_interval_ms: 5_000,
            max_interval_ms: 100,
            admit_probability: 1.5,
            ..Default::default()
        };
        let policy = GenerationPolicy::from_config(&cfg);
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(policy.next_interval(&mut rng), Duration::from_millis(5_000));
        assert!(policy.should_admit(&mut rng));
    }

    #[test]
    fn test_admit_probability_extremes() {
        let mut rng = StdRng::seed_from_u64(8);
        let never = GenerationPolicy { admit_probability: 0.0, ..GenerationPolicy::from_config(&FeedConfig::default()) };
        let always = GenerationPolicy { admit_probability: 1.0, ..never };
        assert!((0..500).all(|_| !never.should_admit(&mut rng)));
        assert!((0..500).all(|_| always.should_admit(&mut rng)));
    }

    #[test]
    fn test_admit_rate_roughly_matches() {
        let policy = GenerationPolicy::from_config(&FeedConfig::default());
        let mut rng = StdRng::seed_from_u64(21);
        let hits = (0..10_000).filter(|_| policy.should_admit(&mut rng)).count();
        assert!((6_500..7_500).contains(&hits), "hits={}", hits);
    }

    /// Records timer activity against virtual time.
    #[derive(Default)]
    struct Recorder {
        fired: AtomicU64,
        sweeps: AtomicU64,
        expired: Mutex<Vec<String>>,
    }

    impl FeedDriver for Recorder {
        fn next_interval(&self) -> Duration {
            Duration::from_millis(100)
        }
        fn fire(&self) -> Option<String> {
            let n = self.fired.fetch_add(1, Ordering::SeqCst);
            Some(format!("e{}", n))
        }
        fn expire(&self, id: &str) {
            self.expired.lock().unwrap().push(id.to_string());
        }
        fn sweep(&self) {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
        }
        fn highlight_duration(&self) -> Duration {
            Duration::from_millis(250)
        }
        fn sweep_interval(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_fire_and_expire() {
        let rec = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::runtime::Handle::current();
        let gen = spawn_generation(&handle, rec.clone(), rx.clone());
        let sweep = spawn_sweep(&handle, rec.clone(), rx);

        sleep(Duration::from_millis(405)).await;
        assert_eq!(rec.fired.load(Ordering::SeqCst), 4);
        // e0 fired at 100ms, expired at 350ms
        assert_eq!(*rec.expired.lock().unwrap(), vec!["e0".to_string()]);
        assert_eq!(rec.sweeps.load(Ordering::SeqCst), 40);

        tx.send_replace(true);
        gen.await.unwrap();
        sweep.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_expiries() {
        let rec = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::runtime::Handle::current();
        let gen = spawn_generation(&handle, rec.clone(), rx);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(rec.fired.load(Ordering::SeqCst), 1);
        tx.send_replace(true);
        gen.await.unwrap();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.fired.load(Ordering::SeqCst), 1);
        assert!(rec.expired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_loops() {
        let rec = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::runtime::Handle::current();
        let sweep = spawn_sweep(&handle, rec.clone(), rx);
        drop(tx);
        sweep.await.unwrap();
    }
}
