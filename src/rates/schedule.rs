use std::{sync::Arc, time::Duration};

use time::{OffsetDateTime, Time, UtcOffset};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use super::{RateCache, Refresh};

/// Once a day at a fixed wall-clock time in a fixed-offset timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    at: Time,
    offset: UtcOffset,
}

impl RefreshSchedule {
    pub fn new(hour: u8, minute: u8, offset_hours: i8) -> Result<Self, time::error::ComponentRange> {
        Ok(Self {
            at: Time::from_hms(hour, minute, 0)?,
            offset: UtcOffset::from_hms(offset_hours, 0, 0)?,
        })
    }

    pub fn next_after(&self, now: OffsetDateTime) -> OffsetDateTime {
        let local = now.to_offset(self.offset);
        let today = local.replace_time(self.at);
        if today > local {
            today
        } else {
            today + time::Duration::DAY
        }
    }

    pub fn delay_from(&self, now: OffsetDateTime) -> Duration {
        (self.next_after(now) - now).unsigned_abs()
    }
}

/// Refreshes `cache` on `schedule` until `shutdown` flips or its sender drops.
pub fn spawn_refresh_task(
    cache: Arc<RateCache>,
    schedule: RefreshSchedule,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = schedule.delay_from(OffsetDateTime::now_utc());
            info!(base = cache.base(), "next rate refresh in {}s", delay.as_secs());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }

            match cache.refresh().await {
                Ok(Refresh::Updated) => {}
                Ok(Refresh::Skipped) => info!("scheduled rate refresh skipped, one already running"),
                Err(e) => warn!(error = %e, "scheduled rate refresh failed"),
            }
        }
        info!("rate refresh task stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use time::macros::datetime;

    use super::*;
    use crate::rates::tests::{MemorySnapshots, ScriptedSource, rates};

    fn kst_nine() -> RefreshSchedule {
        RefreshSchedule::new(9, 0, 9).unwrap()
    }

    #[test]
    fn fires_later_the_same_day() {
        // 08:00 KST
        let now = datetime!(2025-03-01 23:00 UTC);
        assert_eq!(kst_nine().next_after(now), datetime!(2025-03-02 09:00 +9));
        assert_eq!(kst_nine().delay_from(now), Duration::from_secs(3600));
    }

    #[test]
    fn rolls_over_to_tomorrow() {
        // 09:00 KST exactly counts as already fired
        let now = datetime!(2025-03-02 00:00 UTC);
        assert_eq!(kst_nine().next_after(now), datetime!(2025-03-03 09:00 +9));
    }

    #[test]
    fn rejects_impossible_times() {
        assert!(RefreshSchedule::new(24, 0, 9).is_err());
        assert!(RefreshSchedule::new(9, 60, 9).is_err());
        assert!(RefreshSchedule::new(9, 0, 30).is_err());
    }

    fn scripted_cache(source: &Arc<ScriptedSource>) -> Arc<RateCache> {
        let snapshots = Arc::new(MemorySnapshots::default());
        Arc::new(RateCache::new("KRW", source.clone(), snapshots, Duration::from_secs(10)))
    }

    #[tokio::test(start_paused = true)]
    async fn task_refreshes_at_fire_time_then_stops() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(rates(&[("USD", 1400.0)]))]));
        let cache = scripted_cache(&source);
        let (tx, rx) = watch::channel(false);

        let until_fire = kst_nine().delay_from(OffsetDateTime::now_utc());
        let handle = spawn_refresh_task(cache.clone(), kst_nine(), rx);

        tokio::task::yield_now().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(cache.try_current_table().is_err());

        tokio::time::sleep(until_fire + Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.try_current_table().unwrap().rate("USD"), Some(1400.0));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_task() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let (tx, rx) = watch::channel(false);
        let handle = spawn_refresh_task(scripted_cache(&source), kst_nine(), rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task did not stop")
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
