//! Background eviction of stale prices.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::shard::ShardedPriceCache;

/// Run [`ShardedPriceCache::cleanup`] every `interval` until `cancel` fires.
pub fn spawn_cleanup_task(
    cache: Arc<ShardedPriceCache>,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = interval.as_millis() as u64,
            max_age_secs = max_age.as_secs(),
            "Price cache cleanup started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup(max_age);
                    if removed > 0 {
                        info!(removed, remaining = cache.len(), "Price cache cleanup");
                    }
                }
            }
        }

        debug!("Price cache cleanup stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tc_core::{ManualClock, Price, Symbol};

    #[tokio::test]
    async fn test_cleanup_task_evicts_and_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(ShardedPriceCache::with_shards(4, clock.clone()));
        cache.set(Symbol::new("BTC"), Price::new(dec!(1)));
        clock.advance(Duration::from_secs(600));

        let cancel = CancellationToken::new();
        let handle = spawn_cleanup_task(
            cache.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop after cancel")
            .unwrap();
    }
}
