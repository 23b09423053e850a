//! Run command implementation

use crate::config::Config;
use crate::engine::Engine;
use clap::Args;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Seconds between status log lines; 0 disables them
    #[arg(long, default_value_t = 60)]
    pub status_interval_secs: u64,

    /// Serve prices from the HTTP fallback only
    #[arg(long)]
    pub no_push: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let engine = Engine::new(config)?;
        if self.no_push {
            engine.cache().set_push_enabled(false);
        }
        engine.start().await?;

        let period = Duration::from_secs(self.status_interval_secs.max(1));
        let mut status = interval_at(Instant::now() + period, period);
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = status.tick(), if self.status_interval_secs > 0 => {
                    let snapshot = engine.status().await;
                    tracing::info!(
                        connection = snapshot.connection,
                        messages = snapshot.feed.messages,
                        reconnects = snapshot.feed.reconnects,
                        cached = snapshot.cache.cached_instruments,
                        fallback_refreshes = snapshot.cache.fallback_refreshes,
                        strategies = snapshot.strategies.strategy_count,
                        "Engine status"
                    );
                }
            }
        }

        engine.shutdown().await;
        Ok(())
    }
}
