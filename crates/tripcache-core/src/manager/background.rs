//! Periodic expiry check that refreshes the booking before it runs out.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{DataManager, Inner};

/// Spawn the refresh loop. It holds only a weak handle, so it never keeps
/// a dropped manager alive, and exits once the manager is destroyed.
pub(super) fn spawn(inner: Weak<Inner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                debug!("Data manager dropped, stopping background refresh");
                break;
            };
            if inner.is_destroyed() {
                break;
            }
            check_expiry(&DataManager { inner }).await;
        }
    })
}

/// One tick: refresh through the public entry point if the current booking
/// is within the configured threshold of its expiry.
async fn check_expiry(manager: &DataManager) {
    let worker = &manager.inner.worker;
    let Some(current) = manager.current() else {
        debug!("No booking loaded, nothing to refresh");
        return;
    };

    let remaining = current.time_until_expiry(worker.clock.now());
    if remaining > worker.config.refresh_threshold() {
        debug!(
            reference = %current.reference,
            remaining_secs = remaining.num_seconds(),
            "Booking not near expiry"
        );
        return;
    }

    info!(
        reference = %current.reference,
        remaining_secs = remaining.num_seconds(),
        "Booking near expiry, refreshing in background"
    );
    if let Err(e) = manager.refresh().await {
        warn!(error = %e, "Background refresh failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;

    use crate::cache::{CacheStrategy, FixedMemory};
    use crate::clock::{Clock, ManualClock};
    use crate::config::ManagerConfig;
    use crate::error::DataError;
    use crate::manager::DataState;
    use crate::testing::{booking, ScriptedSource};

    fn build_manager(source: Arc<ScriptedSource>, clock: &ManualClock) -> DataManager {
        DataManager::builder(source)
            .config(ManagerConfig {
                strategy: CacheStrategy::MemoryOnly,
                retry_delay_ms: 0,
                refresh_interval_secs: 300,
                refresh_threshold_secs: 3600,
                ..ManagerConfig::default()
            })
            .clock(Arc::new(clock.clone()))
            .memory_info(Arc::new(FixedMemory(None)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_tick_without_booking_does_nothing() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        let manager = build_manager(Arc::clone(&source), &clock);

        check_expiry(&manager).await;
        assert_eq!(source.calls(), 0);
        assert_eq!(manager.status(), DataState::Loading);
    }

    #[tokio::test]
    async fn test_tick_leaves_distant_expiry_alone() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        source.respond(Ok(booking("ABCDEF", clock.now() + ChronoDuration::hours(5))));
        let manager = build_manager(Arc::clone(&source), &clock);

        manager.get().await.unwrap();
        check_expiry(&manager).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_tick_refreshes_near_expiry() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        source.respond(Ok(booking("ABCDEF", clock.now() + ChronoDuration::minutes(30))));
        source.respond(Ok(booking("GHIJKL", clock.now() + ChronoDuration::hours(5))));
        let manager = build_manager(Arc::clone(&source), &clock);

        manager.get().await.unwrap();
        check_expiry(&manager).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(manager.current().unwrap().reference, "GHIJKL");
        assert_eq!(manager.status(), DataState::Loaded);
    }

    #[tokio::test]
    async fn test_expired_booking_fails_refresh_into_error() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        source.respond(Ok(booking("ABCDEF", clock.now() + ChronoDuration::minutes(30))));
        source.respond(Err(DataError::NotFound("booking withdrawn".into())));
        let manager = build_manager(Arc::clone(&source), &clock);

        manager.get().await.unwrap();
        clock.advance(ChronoDuration::hours(1));
        check_expiry(&manager).await;

        assert_eq!(source.calls(), 2);
        assert!(manager.status().is_error());
        // The last good booking stays available
        assert_eq!(manager.current().unwrap().reference, "ABCDEF");
    }

    #[tokio::test]
    async fn test_tick_replaces_expired_booking() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        source.respond(Ok(booking("ABCDEF", clock.now() + ChronoDuration::minutes(30))));
        source.respond(Ok(booking("GHIJKL", clock.now() + ChronoDuration::hours(5))));
        let manager = build_manager(Arc::clone(&source), &clock);

        manager.get().await.unwrap();
        clock.advance(ChronoDuration::hours(1));
        check_expiry(&manager).await;

        assert_eq!(source.calls(), 2);
        assert_eq!(manager.current().unwrap().reference, "GHIJKL");
        assert_eq!(manager.status(), DataState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_on_interval() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        source.respond(Ok(booking("ABCDEF", clock.now() + ChronoDuration::minutes(30))));
        let manager = build_manager(Arc::clone(&source), &clock);

        manager.get().await.unwrap();
        manager.start_background_refresh();
        assert!(manager.is_background_refresh_running());

        // Nothing happens before the first interval elapses
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), 2);

        manager.stop_background_refresh();
        assert!(!manager.is_background_refresh_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_manager_dropped() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(ScriptedSource::new(Arc::new(clock.clone())));
        let manager = build_manager(Arc::clone(&source), &clock);

        let handle = spawn(Arc::downgrade(&manager.inner), Duration::from_secs(1));
        drop(manager);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
