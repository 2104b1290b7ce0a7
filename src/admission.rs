//! Per-interface PADI admission control: sliding window, per-source dedup,
//! a global cap, and an optional external connection-limit collaborator.

use crate::error::AdmissionError;
use crate::stats::Stats;
use macaddr::MacAddr6;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const WINDOW: Duration = Duration::from_millis(1000);
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// External collaborator that may refuse admission based on a global
/// connection-count policy. Implemented outside this core.
pub trait ConnectionLimit: Send + Sync {
    fn allow(&self, mac: MacAddr6) -> bool;
}

struct PadiRecord {
    mac: MacAddr6,
    at: Instant,
}

/// Sliding 1-second PADI admission window for a single interface.
pub struct PadiWindow {
    ifname: String,
    window: VecDeque<PadiRecord>,
    limit: u32,
    conf_global_limit: u32,
    stats: Arc<Stats>,
    conn_limit: Option<Arc<dyn ConnectionLimit>>,
    last_drop_warn: Option<Instant>,
}

impl PadiWindow {
    pub fn new(ifname: String, limit: u32, conf_global_limit: u32, stats: Arc<Stats>) -> Self {
        Self {
            ifname,
            window: VecDeque::new(),
            limit,
            conf_global_limit,
            stats,
            conn_limit: None,
            last_drop_warn: None,
        }
    }

    pub fn with_connection_limit(mut self, collaborator: Arc<dyn ConnectionLimit>) -> Self {
        self.conn_limit = Some(collaborator);
        self
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(front) = self.window.front() {
            if now.duration_since(front.at) >= WINDOW {
                self.window.pop_front();
                self.stats.total_padi_cnt.fetch_sub(1, Ordering::Relaxed);
            } else {
                break;
            }
        }
    }

    /// Runs the full admission check for one PADI arrival from `mac`.
    pub fn admit(&mut self, mac: MacAddr6, now: Instant) -> Result<(), AdmissionError> {
        if self.limit != 0 {
            self.evict_stale(now);

            let global_cap_hit = self.conf_global_limit > 0
                && self.stats.total_padi_cnt.load(Ordering::Relaxed) as u32
                    >= self.conf_global_limit;

            if self.window.len() as u32 == self.limit || global_cap_hit {
                self.drop_padi(now);
                return Err(AdmissionError::RateLimited);
            }

            if self.window.iter().any(|r| r.mac == mac) {
                self.drop_padi(now);
                return Err(AdmissionError::RateLimited);
            }
        }

        self.window.push_back(PadiRecord { mac, at: now });
        self.stats.total_padi_cnt.fetch_add(1, Ordering::Relaxed);

        if let Some(collaborator) = &self.conn_limit {
            if !collaborator.allow(mac) {
                self.drop_padi(now);
                return Err(AdmissionError::RateLimited);
            }
        }

        Ok(())
    }

    /// Counts a dropped PADI and, at most once per 60s for this interface,
    /// logs a warning so a flood shows up without spamming the log for every
    /// dropped frame.
    fn drop_padi(&mut self, now: Instant) {
        self.stats.padi_drop.fetch_add(1, Ordering::Relaxed);

        let should_warn = match self.last_drop_warn {
            Some(last) => now.duration_since(last) >= DROP_WARN_INTERVAL,
            None => true,
        };
        if should_warn {
            self.last_drop_warn = Some(now);
            warn!(ifname = %self.ifname, "dropping PADI, admission limit reached");
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(b: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, b)
    }

    #[test]
    fn dedups_same_source_within_window() {
        let stats = Arc::new(Stats::default());
        let mut w = PadiWindow::new("test0".to_string(), 10, 0, stats.clone());
        let now = Instant::now();
        assert!(w.admit(mac(1), now).is_ok());
        assert!(w.admit(mac(1), now + Duration::from_millis(10)).is_err());
        assert_eq!(stats.padi_drop.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn flood_from_one_mac_drops_after_limit() {
        let stats = Arc::new(Stats::default());
        let mut w = PadiWindow::new("test0".to_string(), 3, 0, stats.clone());
        let now = Instant::now();
        // Limit=3 but dedup also kicks in on the 2nd+ arrival from same MAC;
        // exercise distinct MACs up to the cap, then overflow.
        for i in 0..3 {
            assert!(w.admit(mac(i), now).is_ok());
        }
        assert!(w.admit(mac(200), now).is_err());
        assert_eq!(stats.padi_drop.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn entries_older_than_1s_are_evicted() {
        let stats = Arc::new(Stats::default());
        let mut w = PadiWindow::new("test0".to_string(), 1, 0, stats.clone());
        let t0 = Instant::now();
        assert!(w.admit(mac(1), t0).is_ok());
        assert_eq!(w.len(), 1);
        // Past the 1s horizon and a different mac: slot should be free again.
        assert!(w.admit(mac(2), t0 + Duration::from_millis(1001)).is_ok());
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn zero_limit_disables_window_check() {
        let stats = Arc::new(Stats::default());
        let mut w = PadiWindow::new("test0".to_string(), 0, 0, stats);
        let now = Instant::now();
        for _ in 0..100 {
            assert!(w.admit(mac(1), now).is_ok());
        }
    }

    #[test]
    fn drop_warning_is_rate_limited_per_interface() {
        let stats = Arc::new(Stats::default());
        let mut w = PadiWindow::new("test0".to_string(), 1, 0, stats.clone());
        let t0 = Instant::now();

        assert!(w.admit(mac(1), t0).is_ok());
        assert!(w.last_drop_warn.is_none());

        assert!(w.admit(mac(2), t0 + Duration::from_millis(10)).is_err());
        assert_eq!(w.last_drop_warn, Some(t0 + Duration::from_millis(10)));

        // A second drop inside the 60s window must not move last_drop_warn.
        let t1 = t0 + Duration::from_millis(20);
        assert!(w.admit(mac(3), t1).is_err());
        assert_eq!(w.last_drop_warn, Some(t0 + Duration::from_millis(10)));

        // Past the 60s horizon, the next drop is logged again.
        let t2 = t0 + Duration::from_secs(61);
        assert!(w.admit(mac(4), t2).is_err());
        assert_eq!(w.last_drop_warn, Some(t2));
    }
}
