//! Retention sweeper
//!
//! Periodically evicts cache entries that have gone unused for longer than
//! their retention window. Shutdown is a message with an ack, so the caller
//! knows the loop has exited before tearing down the cache.

use super::query_cache::QueryCache;
use crate::clock::CacheClock;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

enum SweeperMessage {
    /// Run one sweep now and report how many entries were evicted
    SweepNow { response_tx: oneshot::Sender<usize> },
    Shutdown { response_tx: oneshot::Sender<()> },
}

pub struct CacheSweeper<V, C: CacheClock> {
    cache: QueryCache<V, C>,
    period: Duration,
    rx: mpsc::UnboundedReceiver<SweeperMessage>,
}

impl<V, C> CacheSweeper<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: CacheClock,
{
    /// Spawn the sweeper loop on the current runtime
    pub fn spawn(cache: QueryCache<V, C>, period: Duration) -> SweeperHandle {
        debug_assert!(!period.is_zero(), "Sweep period must be positive");

        let (tx, rx) = mpsc::unbounded_channel();
        let sweeper = CacheSweeper { cache, period, rx };
        let task = tokio::spawn(sweeper.run());
        SweeperHandle { tx, task }
    }

    async fn run(mut self) {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Sweeper checking for expired entries");
                    self.cache.evict_expired();
                }
                msg = self.rx.recv() => match msg {
                    Some(SweeperMessage::SweepNow { response_tx }) => {
                        let evicted = self.cache.evict_expired();
                        let _ = response_tx.send(evicted);
                    }
                    Some(SweeperMessage::Shutdown { response_tx }) => {
                        info!("Cache sweeper shutting down");
                        let _ = response_tx.send(());
                        break;
                    }
                    None => break,
                },
            }
        }
    }
}

/// Handle to a running sweeper
pub struct SweeperHandle {
    tx: mpsc::UnboundedSender<SweeperMessage>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Force a sweep. Returns None if the sweeper has stopped.
    pub async fn sweep_now(&self) -> Option<usize> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(SweeperMessage::SweepNow { response_tx }).ok()?;
        response_rx.await.ok()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(SweeperMessage::Shutdown { response_tx }).is_ok() {
            let _ = response_rx.await;
        }
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, EntryState, QueryKey};
    use crate::clock::SimulatedClock;

    #[tokio::test]
    async fn test_sweep_now_evicts_expired() {
        let clock = SimulatedClock::new(0);
        let cache: QueryCache<u64, SimulatedClock> = QueryCache::with_clock(clock.clone());
        let policy = CachePolicy::new(Duration::from_millis(10), Duration::from_millis(50));
        let key = QueryKey::new("totals");

        cache.get(key.clone(), policy, || async { Ok(1) }).await.unwrap();
        let handle = CacheSweeper::spawn(cache.clone(), Duration::from_secs(3600));

        assert_eq!(handle.sweep_now().await, Some(0));
        clock.advance_ms(50);
        assert_eq!(handle.sweep_now().await, Some(1));
        assert_eq!(cache.peek_state(&key), EntryState::Absent);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_sweep() {
        let clock = SimulatedClock::new(0);
        let cache: QueryCache<u64, SimulatedClock> = QueryCache::with_clock(clock.clone());
        let policy = CachePolicy::new(Duration::from_millis(10), Duration::from_millis(50));

        cache.get(QueryKey::new("totals"), policy, || async { Ok(1) }).await.unwrap();
        let handle = CacheSweeper::spawn(cache.clone(), Duration::from_millis(10));
        clock.advance_ms(60);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());
        assert!(cache.stats().evictions >= 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let cache: QueryCache<u64, SimulatedClock> = QueryCache::with_clock(SimulatedClock::new(0));
        let handle = CacheSweeper::spawn(cache, Duration::from_millis(10));
        assert!(handle.is_running());
        handle.shutdown().await;
    }
}
