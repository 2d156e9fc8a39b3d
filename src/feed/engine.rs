use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::events::{FeedSnapshot, WhaleBuy};
use super::generator::Generator;
use super::radar::{RadarFrame, RadarSweep};
use super::scheduler::{spawn_generation, spawn_sweep, FeedDriver, GenerationPolicy};
use super::state::{Admission, FeedState};
use crate::config::FeedConfig;
use crate::logging::{log_admit, log_audit, log_expire, log_lifecycle, log_seed, log_skip, tick_aggregator};

/// Everything the timers mutate, behind one lock.
struct Core {
    state: FeedState,
    generator: Generator,
    radar: RadarSweep,
    rng: StdRng,
}

struct Shared {
    cfg: FeedConfig,
    policy: GenerationPolicy,
    core: Mutex<Core>,
    /// Cleared (under the core lock) on stop; every mutation checks it first.
    alive: AtomicBool,
    feed_tx: watch::Sender<FeedSnapshot>,
    radar_tx: watch::Sender<RadarFrame>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        // state is consistent after every mutation, so a poisoned guard is usable
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn admit_locked(&self, core: &mut Core, event: WhaleBuy) -> (WhaleBuy, Admission, usize) {
        let logged = event.clone();
        let admission = core.state.admit(event);
        core.radar.pulse(Instant::now());
        self.feed_tx.send_replace(core.state.snapshot());
        (logged, admission, core.state.len())
    }

    fn admit(&self, event: WhaleBuy) -> Option<Admission> {
        let (buy, admission, len) = {
            let mut core = self.lock();
            if !self.is_alive() {
                return None;
            }
            self.admit_locked(&mut core, event)
        };
        log_admit(&buy, &admission, len);
        Some(admission)
    }

    fn expire_highlight(&self, id: &str) -> bool {
        let changed = {
            let mut core = self.lock();
            if !self.is_alive() {
                return false;
            }
            let changed = core.state.expire_highlight(id);
            if changed {
                self.feed_tx.send_replace(core.state.snapshot());
            }
            changed
        };
        log_expire(id, changed);
        changed
    }
}

impl FeedDriver for Shared {
    fn next_interval(&self) -> Duration {
        let mut core = self.lock();
        self.policy.next_interval(&mut core.rng)
    }

    fn fire(&self) -> Option<String> {
        let admitted = {
            let mut core = self.lock();
            if !self.is_alive() {
                return None;
            }
            let core = &mut *core;
            if self.policy.should_admit(&mut core.rng) {
                let buy = core.generator.generate(&mut core.rng, Utc::now());
                Some(self.admit_locked(core, buy))
            } else {
                None
            }
        };
        match admitted {
            Some((buy, admission, len)) => {
                log_admit(&buy, &admission, len);
                Some(buy.id)
            }
            None => {
                log_skip();
                None
            }
        }
    }

    fn expire(&self, id: &str) {
        self.expire_highlight(id);
    }

    fn sweep(&self) {
        {
            let mut core = self.lock();
            if !self.is_alive() {
                return;
            }
            core.radar.advance();
            self.radar_tx.send_replace(core.radar.frame(Instant::now()));
        }
        tick_aggregator();
    }

    fn highlight_duration(&self) -> Duration {
        Duration::from_millis(self.cfg.highlight_duration_ms)
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.sweep_interval_ms)
    }
}

/// The whale-buy feed: owns the buffer, runs the timers, publishes snapshots.
///
/// Construction seeds the buffer. `start` spawns the timers on the current
/// tokio runtime; `stop` cancels them and freezes the state for good.
pub struct FeedEngine {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl FeedEngine {
    pub fn new(cfg: FeedConfig) -> Result<Self> {
        cfg.validate()?;
        let generator = Generator::new(&cfg)?;
        let mut rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = FeedState::seeded(
            cfg.max_events,
            &generator,
            &mut rng,
            cfg.seed_count,
            cfg.seed_window_secs,
            Utc::now(),
        );
        log_seed(state.len(), cfg.seed_window_secs, state.total_volume());

        let radar = RadarSweep::new(cfg.sweep_step_deg, Duration::from_millis(cfg.pulse_duration_ms));
        let (feed_tx, _) = watch::channel(state.snapshot());
        let (radar_tx, _) = watch::channel(RadarFrame::default());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                policy: GenerationPolicy::from_config(&cfg),
                cfg,
                core: Mutex::new(Core { state, generator, radar, rng }),
                alive: AtomicBool::new(true),
                feed_tx,
                radar_tx,
            }),
            shutdown,
            tasks: Vec::new(),
            stopped: false,
        })
    }

    /// Spawn both timers. Calling it again while running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped {
            bail!("feed engine was stopped and cannot be restarted");
        }
        if !self.tasks.is_empty() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .context("feed engine must be started inside a tokio runtime")?;
        self.tasks.push(spawn_generation(&handle, self.shared.clone(), self.shutdown.subscribe()));
        self.tasks.push(spawn_sweep(&handle, self.shared.clone(), self.shutdown.subscribe()));

        let cfg = &self.shared.cfg;
        log_lifecycle(
            "start",
            &[
                ("max_events", json!(cfg.max_events)),
                ("min_interval_ms", json!(cfg.min_interval_ms)),
                ("max_interval_ms", json!(cfg.max_interval_ms)),
                ("admit_probability", json!(cfg.admit_probability)),
                ("highlight_duration_ms", json!(cfg.highlight_duration_ms)),
                ("reference_price", json!(cfg.reference_price)),
            ],
        );
        Ok(())
    }

    /// Cancel the timers and every pending highlight expiry. After this
    /// returns the feed state no longer changes.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        {
            let _core = self.shared.lock();
            self.shared.alive.store(false, Ordering::SeqCst);
        }
        self.shutdown.send_replace(true);
        for task in &self.tasks {
            task.abort();
        }
        let snapshot = self.snapshot();
        log_audit("final_snapshot", &snapshot);
        log_lifecycle("stop", &[("total_volume", json!(snapshot.total_volume))]);
    }

    /// `stop`, then wait for the timer tasks to wind down.
    pub async fn shutdown(mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped && !self.tasks.is_empty()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.shared.lock().state.snapshot()
    }

    /// Receiver that observes a new snapshot whenever the buffer or the
    /// running total changes.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.shared.feed_tx.subscribe()
    }

    /// Sweep angle and pulse flag, published on every sweep tick.
    pub fn radar(&self) -> watch::Receiver<RadarFrame> {
        self.shared.radar_tx.subscribe()
    }

    pub fn config(&self) -> &FeedConfig {
        &self.shared.cfg
    }

    /// Admit a buy from outside the timers. `None` once stopped. No expiry is
    /// armed; the caller clears the highlight with `expire_highlight`.
    pub fn admit(&self, event: WhaleBuy) -> Option<Admission> {
        self.shared.admit(event)
    }

    pub fn expire_highlight(&self, id: &str) -> bool {
        self.shared.expire_highlight(id)
    }

    /// Draw a fresh buy from the engine's generator without admitting it.
    pub fn generate(&self) -> WhaleBuy {
        let mut core = self.shared.lock();
        let core = &mut *core;
        core.generator.generate(&mut core.rng, Utc::now())
    }
}

impl Drop for FeedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> FeedConfig {
        FeedConfig { rng_seed: Some(17), ..Default::default() }
    }

    #[test]
    fn test_new_seeds_buffer() {
        let engine = FeedEngine::new(quiet_config()).unwrap();
        let snap = engine.snapshot();
        assert_eq!(snap.events.len(), 15);
        assert_eq!(snap.highlighted(), 0);
        assert_eq!(snap.total_volume, snap.events.iter().map(|e| e.amount_usd).sum::<u64>());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(FeedEngine::new(FeedConfig { max_events: 0, ..Default::default() }).is_err());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let mut engine = FeedEngine::new(quiet_config()).unwrap();
        let err = engine.start().unwrap_err();
        assert!(err.to_string().contains("tokio runtime"));
    }

    #[test]
    fn test_same_seed_same_seed_batch() {
        let a = FeedEngine::new(quiet_config()).unwrap().snapshot();
        let b = FeedEngine::new(quiet_config()).unwrap().snapshot();
        let ids = |s: &FeedSnapshot| s.events.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_manual_admit_publishes() {
        let engine = FeedEngine::new(quiet_config()).unwrap();
        let mut rx = engine.subscribe();
        let before = engine.snapshot().total_volume;
        let buy = engine.generate();
        let amount = buy.amount_usd;
        let id = buy.id.clone();

        engine.admit(buy).unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.events[0].id, id);
        assert!(seen.events[0].is_new);
        assert_eq!(seen.total_volume, before + amount);

        assert!(engine.expire_highlight(&id));
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().events[0].is_new);

        // nothing changed, nothing published
        assert!(!engine.expire_highlight(&id));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_stopped_engine_rejects_mutation() {
        let mut engine = FeedEngine::new(quiet_config()).unwrap();
        let buy = engine.generate();
        let id = buy.id.clone();
        engine.admit(buy).unwrap();
        engine.stop();

        let frozen = engine.snapshot();
        assert!(engine.admit(engine.generate()).is_none());
        assert!(!engine.expire_highlight(&id));
        assert_eq!(engine.snapshot(), frozen);
        assert!(engine.start().is_err());
    }
}
