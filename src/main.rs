use std::path::Path;

use anyhow::Result;
use serde_json::json;
use whalefeed::config::FeedConfig;
use whalefeed::feed::FeedEngine;
use whalefeed::logging::{log, log_lifecycle, obj, v_str, Domain, Level};

fn load_config() -> Result<FeedConfig> {
    match std::env::var("FEED_CONFIG") {
        Ok(path) => FeedConfig::from_file(Path::new(&path)),
        Err(_) => {
            let cfg = FeedConfig::from_env();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = load_config()?;
    let mut engine = FeedEngine::new(cfg)?;
    let mut updates = engine.subscribe();
    engine.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log_lifecycle("signal", &[("signal", v_str("ctrl_c"))]);
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = updates.borrow_and_update().clone();
                let head = snap.events.first();
                log(
                    Level::Info,
                    Domain::Feed,
                    "snapshot",
                    obj(&[
                        ("head_id", head.map(|b| v_str(&b.id)).unwrap_or_default()),
                        ("head_usd", json!(head.map(|b| b.amount_usd))),
                        ("head_tier", head.map(|b| v_str(b.tier().as_str())).unwrap_or_default()),
                        ("buffer_len", json!(snap.events.len())),
                        ("highlighted", json!(snap.highlighted())),
                        ("total_volume", json!(snap.total_volume)),
                    ]),
                );
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
