//! Structured JSON-lines logging for the feed engine.
//!
//! Every record is one JSON object on stdout carrying a run id and a
//! monotonically increasing sequence number. When `LOG_DIR` is set the same
//! lines are also written under `<LOG_DIR>/<run_id>/`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::feed::events::{FeedSnapshot, WhaleBuy};
use crate::feed::state::Admission;

/// Feed records only ever go out at these three levels. `LOG_LEVEL` picks the
/// threshold; anything unrecognised means `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
}

impl Level {
    fn threshold() -> Self {
        match std::env::var("LOG_LEVEL").map(|v| v.to_ascii_lowercase()).as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            _ => Level::Info,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
        }
    }
}

/// Record category, filtered by `LOG_DOMAINS` (comma list, unset or `all`
/// lets everything through).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Feed,
    Schedule,
    System,
    Audit,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Feed => "feed",
            Domain::Schedule => "schedule",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    fn selected(self) -> bool {
        let Ok(list) = std::env::var("LOG_DOMAINS") else {
            return true;
        };
        list == "all" || list.split(',').any(|d| d.trim() == self.as_str())
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sinks: Option<Sinks>,
}

#[derive(Debug)]
struct Sinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", Utc::now().timestamp_millis(), process::id()));
        let sinks = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_sinks(PathBuf::from(base).join(&run_id), &run_id));
        RunContext { run_id, sinks }
    })
}

fn open_sinks(run_dir: PathBuf, run_id: &str) -> Option<Sinks> {
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
    }
    let _ = std::fs::write(
        run_dir.join("manifest.json"),
        json!({
            "run_id": run_id,
            "ts": ts_now(),
            "pid": process::id(),
            "log_dir": run_dir.to_string_lossy(),
        })
        .to_string(),
    );
    let open = |name: &str| {
        File::create(run_dir.join(name))
            .map_err(|err| eprintln!("[log] failed to create {}: {}", name, err))
            .ok()
    };
    Some(Sinks {
        events: Mutex::new(BufWriter::new(open("events.jsonl")?)),
        trace: Mutex::new(BufWriter::new(open("trace.jsonl")?)),
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::threshold() || !domain.selected() {
        return;
    }
    println!("{}", format_record(level, domain.as_str(), event, fields));
}

fn format_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) -> String {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.label()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if let Some(sinks) = &ctx.sinks {
        match level {
            Level::Info => write_line(&sinks.events, &line),
            Level::Trace | Level::Debug => write_line(&sinks.trace, &line),
        }
    }
    line
}

// =============================================================================
// Feed helpers
// =============================================================================

pub fn log_seed(count: usize, window_secs: u64, total_volume: u64) {
    log(
        Level::Info,
        Domain::Feed,
        "seeded",
        obj(&[
            ("count", json!(count)),
            ("window_secs", json!(window_secs)),
            ("total_volume", json!(total_volume)),
        ]),
    );
}

pub fn log_admit(buy: &WhaleBuy, admission: &Admission, buffer_len: usize) {
    agg_increment(Counter::Admitted);
    for _ in 0..admission.evicted {
        agg_increment(Counter::Evicted);
    }
    log(
        Level::Debug,
        Domain::Feed,
        "admit",
        obj(&[
            ("id", v_str(&buy.id)),
            ("amount_usd", json!(buy.amount_usd)),
            ("amount_native", json!(buy.amount_native)),
            ("tier", v_str(buy.tier().as_str())),
            ("evicted", json!(admission.evicted)),
            ("buffer_len", json!(buffer_len)),
            ("total_volume", json!(admission.total_volume)),
        ]),
    );
}

pub fn log_skip() {
    agg_increment(Counter::Skipped);
    log(Level::Trace, Domain::Schedule, "skip", Map::new());
}

pub fn log_expire(id: &str, changed: bool) {
    if changed {
        agg_increment(Counter::Expired);
    }
    log(
        Level::Trace,
        Domain::Feed,
        "highlight_expired",
        obj(&[("id", v_str(id)), ("changed", json!(changed))]),
    );
}

pub fn log_lifecycle(event: &str, fields: &[(&str, Value)]) {
    log(Level::Info, Domain::System, event, obj(fields));
}

/// Log a snapshot hash for replay comparison
pub fn log_audit(event: &str, snapshot: &FeedSnapshot) {
    log(
        Level::Info,
        Domain::Audit,
        event,
        obj(&[
            ("state_hash", v_str(&snapshot.state_hash())),
            ("buffer_len", json!(snapshot.events.len())),
            ("total_volume", json!(snapshot.total_volume)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Field map from borrowed key/value pairs.
pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_owned())
}

// =============================================================================
// Aggregator for periodic summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Admitted,
    Skipped,
    Expired,
    Evicted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    admitted: u64,
    skipped: u64,
    expired: u64,
    evicted: u64,
}

struct LogAggregator {
    counts: Counts,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            counts: Counts::default(),
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    fn increment(&mut self, counter: Counter) {
        match counter {
            Counter::Admitted => self.counts.admitted += 1,
            Counter::Skipped => self.counts.skipped += 1,
            Counter::Expired => self.counts.expired += 1,
            Counter::Evicted => self.counts.evicted += 1,
        }
    }

    fn maybe_flush(&mut self) -> Option<Counts> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            self.last_flush = Instant::now();
            Some(std::mem::take(&mut self.counts))
        } else {
            None
        }
    }
}

/// Call periodically to emit aggregated stats
pub fn tick_aggregator() {
    let flushed = match get_aggregator().lock() {
        Ok(mut agg) => agg.maybe_flush(),
        Err(_) => None,
    };
    if let Some(c) = flushed {
        log(
            Level::Info,
            Domain::System,
            "aggregated_stats",
            obj(&[
                ("admitted", json!(c.admitted)),
                ("skipped", json!(c.skipped)),
                ("expired", json!(c.expired)),
                ("evicted", json!(c.evicted)),
            ]),
        );
    }
}

pub fn agg_increment(counter: Counter) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(counter);
    }
}

// =============================================================================
// Tests
// =============================================================================
