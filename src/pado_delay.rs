//! Delayed-PADO scheduler: biases client selection by holding a PADO back
//! for a configured delay instead of answering PADI immediately.
//!
//! Each pending peer gets a one-shot `tokio::spawn` timer guarded by its own
//! `CancellationToken`, so a later PADR or interface stop can cancel a
//! still-pending PADO without tearing down anything else.

use crate::session::CapturedTags;
use crate::stats::Stats;
use macaddr::MacAddr6;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-interface queue of pending delayed PADO replies.
#[derive(Default)]
pub struct PadoQueue {
    pending: Mutex<HashMap<MacAddr6, CancellationToken>>,
}

pub enum Schedule {
    /// `pado-delay == 0`: caller should emit the PADO synchronously.
    Immediate,
    /// Armed a timer; caller should return without emitting.
    Queued,
    /// Another delayed PADO is already queued for this peer; dropped.
    AlreadyQueued,
    /// `pado-delay == -1`: never reply.
    Never,
}

impl PadoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides what to do for a newly-admitted PADI and, if a delay is
    /// configured, arms a one-shot timer that invokes `fire` once it
    /// expires (unless cancelled first by interface shutdown).
    pub fn schedule<F, Fut>(
        self: &Arc<Self>,
        peer: MacAddr6,
        delay_ms: i64,
        tags: CapturedTags,
        stats: Arc<Stats>,
        fire: F,
    ) -> Schedule
    where
        F: FnOnce(MacAddr6, CapturedTags) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if delay_ms < 0 {
            return Schedule::Never;
        }
        if delay_ms == 0 {
            return Schedule::Immediate;
        }

        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&peer) {
            return Schedule::AlreadyQueued;
        }

        let token = CancellationToken::new();
        pending.insert(peer, token.clone());
        stats.delayed_pado_cnt.fetch_add(1, Ordering::Relaxed);
        drop(pending);

        let queue = self.clone();
        let stats_for_task = stats;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {
                    fire(peer, tags).await;
                }
            }
            queue.pending.lock().unwrap().remove(&peer);
            stats_for_task
                .delayed_pado_cnt
                .fetch_sub(1, Ordering::Relaxed);
        });

        Schedule::Queued
    }

    /// Cancels every pending delayed PADO, used on interface shutdown so no
    /// PADO fires after the process starts stopping.
    pub fn cancel_all(&self) {
        for (_, token) in self.pending.lock().unwrap().drain() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn mac(b: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, b)
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_pado_fires_after_configured_delay() {
        let queue = Arc::new(PadoQueue::new());
        let stats = Arc::new(Stats::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        let outcome = queue.schedule(mac(1), 100, CapturedTags::default(), stats, move |_, _| {
            let fired = fired2.clone();
            async move {
                fired.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert!(matches!(outcome, Schedule::Queued));
        assert_eq!(queue.len(), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn second_pado_for_same_peer_is_dropped_while_queued() {
        let queue = Arc::new(PadoQueue::new());
        let stats = Arc::new(Stats::default());

        let first = queue.schedule(mac(1), 1000, CapturedTags::default(), stats.clone(), |_, _| async {});
        assert!(matches!(first, Schedule::Queued));

        let second = queue.schedule(mac(1), 1000, CapturedTags::default(), stats, |_, _| async {});
        assert!(matches!(second, Schedule::AlreadyQueued));

        queue.cancel_all();
    }

    #[test]
    fn zero_delay_means_immediate() {
        let queue = Arc::new(PadoQueue::new());
        let stats = Arc::new(Stats::default());
        let outcome = queue.schedule(mac(1), 0, CapturedTags::default(), stats, |_, _| async {});
        assert!(matches!(outcome, Schedule::Immediate));
    }

    #[test]
    fn negative_delay_means_never() {
        let queue = Arc::new(PadoQueue::new());
        let stats = Arc::new(Stats::default());
        let outcome = queue.schedule(mac(1), -1, CapturedTags::default(), stats, |_, _| async {});
        assert!(matches!(outcome, Schedule::Never));
    }
}
