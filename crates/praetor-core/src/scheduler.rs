use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub name: String,
    pub interval_ms: u64,
    pub jitter_ms: u64,
}

struct TimerEntry {
    token: CancellationToken,
    handle: JoinHandle<()>,
    interval_ms: Arc<AtomicU64>,
    jitter_ms: u64,
}

/// Named recurring timers. Each timer fires at `interval ± jitter` and can
/// be rescheduled live; callbacks run spawned so a panicking callback kills
/// neither its own timer nor its neighbours.
#[derive(Default)]
pub struct Scheduler {
    timers: HashMap<String, TimerEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_cycle(
        &mut self,
        name: &str,
        callback: TimerCallback,
        interval_ms: u64,
        jitter_ms: u64,
    ) {
        self.cancel_entry(name);
        let token = CancellationToken::new();
        let interval = Arc::new(AtomicU64::new(interval_ms.max(1)));
        let task_token = token.clone();
        let task_interval = Arc::clone(&interval);
        let timer_name = name.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let base = task_interval.load(Ordering::Relaxed);
                let delay = jittered(base, jitter_ms);
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay)) => {}
                }
                if task_token.is_cancelled() {
                    break;
                }
                let run = tokio::spawn(callback());
                if let Err(err) = run.await {
                    tracing::warn!("timer {timer_name} callback aborted: {err}");
                }
            }
        });
        self.timers.insert(
            name.to_string(),
            TimerEntry {
                token,
                handle,
                interval_ms: interval,
                jitter_ms,
            },
        );
    }

    /// Change a timer's period. Takes effect from the next tick.
    pub fn reschedule(&mut self, name: &str, new_interval_ms: u64) -> bool {
        match self.timers.get(name) {
            Some(entry) => {
                entry
                    .interval_ms
                    .store(new_interval_ms.max(1), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn interval_of(&self, name: &str) -> Option<u64> {
        self.timers
            .get(name)
            .map(|entry| entry.interval_ms.load(Ordering::Relaxed))
    }

    pub fn status(&self) -> Vec<TimerStatus> {
        let mut out: Vec<TimerStatus> = self
            .timers
            .iter()
            .map(|(name, entry)| TimerStatus {
                name: name.clone(),
                interval_ms: entry.interval_ms.load(Ordering::Relaxed),
                jitter_ms: entry.jitter_ms,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn cancel_entry(&mut self, name: &str) -> Option<JoinHandle<()>> {
        self.timers.remove(name).map(|entry| {
            entry.token.cancel();
            entry.handle
        })
    }

    /// Cancel everything and wait until no callback can still fire.
    pub async fn stop(&mut self) {
        let handles: Vec<JoinHandle<()>> = self
            .timers
            .drain()
            .map(|(_, entry)| {
                entry.token.cancel();
                entry.handle
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn jittered(interval_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return interval_ms.max(1);
    }
    let jitter = rand::thread_rng().gen_range(-(jitter_ms as i64)..=(jitter_ms as i64));
    (interval_ms as i64 + jitter).max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_callback(counter: Arc<AtomicU32>) -> TimerCallback {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_on_their_interval() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        scheduler.schedule_cycle("main_loop", counting_callback(Arc::clone(&count)), 1_000, 0);
        tokio::time::sleep(std::time::Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_changes_the_period_without_losing_the_timer() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        scheduler.schedule_cycle("main_loop", counting_callback(Arc::clone(&count)), 10_000, 0);
        assert!(scheduler.reschedule("main_loop", 500));
        assert_eq!(scheduler.interval_of("main_loop"), Some(500));
        // The first (pre-reschedule) tick still honors the old delay.
        tokio::time::sleep(std::time::Duration::from_millis(10_100)).await;
        let after_first = count.load(Ordering::SeqCst);
        assert_eq!(after_first, 1);
        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        assert!(count.load(Ordering::SeqCst) > after_first);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_any_further_firing() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        scheduler.schedule_cycle("hourly_reset", counting_callback(Arc::clone(&count)), 100, 0);
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        scheduler.stop().await;
        let frozen = count.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(1_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn a_panicking_callback_does_not_kill_its_timer() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        scheduler.schedule_cycle(
            "flaky",
            Arc::new(move || {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick explodes");
                    }
                })
            }),
            100,
            0,
        );
        tokio::time::sleep(std::time::Duration::from_millis(350)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_lists_named_timers() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        scheduler.schedule_cycle("main_loop", counting_callback(Arc::clone(&count)), 45_000, 9_000);
        scheduler.schedule_cycle("hourly_reset", counting_callback(count), 3_600_000, 0);
        let status = scheduler.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "hourly_reset");
        assert_eq!(status[1].jitter_ms, 9_000);
        scheduler.stop().await;
    }
}
