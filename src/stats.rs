//! Process-wide statistics counters, fetch-add/sub semantics only.

use std::sync::atomic::AtomicU64;

#[derive(Default)]
pub struct Stats {
    pub padi_recv: AtomicU64,
    pub padi_drop: AtomicU64,
    pub pado_sent: AtomicU64,
    pub padr_recv: AtomicU64,
    pub padr_dup_recv: AtomicU64,
    pub pads_sent: AtomicU64,
    pub active: AtomicU64,
    pub starting: AtomicU64,
    pub delayed_pado_cnt: AtomicU64,
    pub total_padi_cnt: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> StatSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        StatSnapshot {
            padi_recv: self.padi_recv.load(Relaxed),
            padi_drop: self.padi_drop.load(Relaxed),
            pado_sent: self.pado_sent.load(Relaxed),
            padr_recv: self.padr_recv.load(Relaxed),
            padr_dup_recv: self.padr_dup_recv.load(Relaxed),
            pads_sent: self.pads_sent.load(Relaxed),
            active: self.active.load(Relaxed),
            starting: self.starting.load(Relaxed),
            delayed_pado_cnt: self.delayed_pado_cnt.load(Relaxed),
            total_padi_cnt: self.total_padi_cnt.load(Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatSnapshot {
    pub padi_recv: u64,
    pub padi_drop: u64,
    pub pado_sent: u64,
    pub padr_recv: u64,
    pub padr_dup_recv: u64,
    pub pads_sent: u64,
    pub active: u64,
    pub starting: u64,
    pub delayed_pado_cnt: u64,
    pub total_padi_cnt: u64,
}

/// `pppoe_get_stat() -> (&starting, &active)` per the runtime API.
pub fn get_stat(stats: &Stats) -> (u64, u64) {
    use std::sync::atomic::Ordering::Relaxed;
    (stats.starting.load(Relaxed), stats.active.load(Relaxed))
}
