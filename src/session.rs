//! Per-interface session table: SID allocation, dual-keyed lookup, and the
//! session record itself.
//!
//! A `HashMap<NonZeroU16, _>`-backed table with a rotating id allocator and
//! a second index keyed by cookie bytes for duplicate-PADR detection.

use crate::cookie::COOKIE_LEN;
use crate::error::SessionError;
use macaddr::MacAddr6;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const MAX_SID: u16 = 65535;

/// Captured TLV tags carried on the session, owned copies.
#[derive(Debug, Default, Clone)]
pub struct CapturedTags {
    pub host_uniq: Option<Vec<u8>>,
    pub relay_sid: Option<Vec<u8>>,
    pub service_name: Option<String>,
    pub tr101: Option<Vec<u8>>,
}

/// How the interface name is folded into PPP calling/called-station-id
/// strings, per `ifname-in-sid`.
pub fn station_id(ifname: &str, mac: MacAddr6, include_ifname: bool) -> String {
    if include_ifname {
        format!("{ifname}:{mac}")
    } else {
        mac.to_string()
    }
}

#[derive(Debug)]
pub struct Session {
    pub sid: u16,
    pub peer_addr: MacAddr6,
    pub cookie: [u8; COOKIE_LEN],
    pub tags: CapturedTags,
    /// Flipped true once the external PPP engine acknowledges start, false
    /// again on teardown. The `Terminating` transition has two possible
    /// triggers (PADT, PPP-finished) that race on this flag; whichever
    /// flips it first proceeds, the other short-circuits.
    ppp_started: AtomicBool,
    /// True until the external PPP engine assigns a username; duplicate
    /// PADRs only short-circuit while this holds.
    in_discovery: AtomicBool,
    /// Guards the teardown path itself so PADT and PPP-finished (or two
    /// PADTs) can't both run `disconnect` to completion for one session,
    /// regardless of whether PPP had actually started yet.
    terminating: AtomicBool,
}

impl Session {
    fn new(sid: u16, peer_addr: MacAddr6, cookie: [u8; COOKIE_LEN], tags: CapturedTags) -> Self {
        Self {
            sid,
            peer_addr,
            cookie,
            tags,
            ppp_started: AtomicBool::new(false),
            in_discovery: AtomicBool::new(true),
            terminating: AtomicBool::new(false),
        }
    }

    /// Returns `true` only to the first caller, ever, for this session.
    /// Every teardown path (PADT, PPP-finished, admin stop) must check
    /// this before touching the session table or sending PADT.
    pub fn start_teardown_once(&self) -> bool {
        !self.terminating.swap(true, Ordering::AcqRel)
    }

    pub fn is_in_discovery(&self) -> bool {
        self.in_discovery.load(Ordering::Acquire)
    }

    pub fn mark_username_assigned(&self) {
        self.in_discovery.store(false, Ordering::Release);
    }

    pub fn is_ppp_started(&self) -> bool {
        self.ppp_started.load(Ordering::Acquire)
    }

    pub fn mark_ppp_started(&self) {
        self.ppp_started.store(true, Ordering::Release);
    }

    /// Idempotent: returns `true` only to the caller that actually
    /// transitioned the session into terminating. Models the PADT /
    /// PPP-disconnect race.
    pub fn begin_terminate(&self) -> bool {
        self.ppp_started.swap(false, Ordering::AcqRel)
    }
}

/// Per-interface SID table with a rotating allocator and a secondary index
/// by cookie bytes for PADR duplicate detection.
#[derive(Default)]
pub struct SessionTable {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_sid: HashMap<u16, Arc<Session>>,
    by_cookie: HashMap<[u8; COOKIE_LEN], u16>,
    next_sid: u16,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh SID and installs a new session for it, or fails
    /// with `NoFreeSid` if the table is full.
    pub fn insert(
        &self,
        peer_addr: MacAddr6,
        cookie: [u8; COOKIE_LEN],
        tags: CapturedTags,
    ) -> Result<Arc<Session>, SessionError> {
        let mut inner = self.inner.lock().unwrap();

        let mut candidate = inner.next_sid;
        let mut found = None;
        for _ in 0..MAX_SID {
            candidate = if candidate >= MAX_SID { 1 } else { candidate + 1 };
            if !inner.by_sid.contains_key(&candidate) {
                found = Some(candidate);
                break;
            }
        }

        let sid = found.ok_or(SessionError::NoFreeSid)?;
        inner.next_sid = sid;

        let session = Arc::new(Session::new(sid, peer_addr, cookie, tags));
        inner.by_sid.insert(sid, session.clone());
        inner.by_cookie.insert(cookie, sid);

        Ok(session)
    }

    pub fn lookup_by_sid(&self, sid: u16) -> Option<Arc<Session>> {
        self.inner.lock().unwrap().by_sid.get(&sid).cloned()
    }

    /// Finds a session still in discovery whose cookie matches, for PADR
    /// duplicate detection. Sessions that have left discovery never
    /// short-circuit a PADR.
    pub fn lookup_in_discovery_by_cookie(&self, cookie: &[u8; COOKIE_LEN]) -> Option<Arc<Session>> {
        let inner = self.inner.lock().unwrap();
        let sid = *inner.by_cookie.get(cookie)?;
        let session = inner.by_sid.get(&sid)?.clone();
        if session.is_in_discovery() {
            Some(session)
        } else {
            None
        }
    }

    pub fn remove(&self, sid: u16) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.by_sid.remove(&sid)?;
        inner.by_cookie.remove(&session.cookie);
        Some(session)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().by_sid.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_sid.len()
    }

    /// Snapshot of currently-allocated session ids, for admin-stop fanout.
    pub fn all_sids(&self) -> Vec<u16> {
        self.inner.lock().unwrap().by_sid.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn for_test_fill_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for sid in 1..=MAX_SID {
            let session = Arc::new(Session::new(
                sid,
                MacAddr6::new(2, 0, 0, 0, 0, 0),
                [0u8; COOKIE_LEN],
                CapturedTags::default(),
            ));
            inner.by_sid.insert(sid, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(b: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, b)
    }

    #[test]
    fn allocates_sids_starting_from_one() {
        let table = SessionTable::new();
        let s1 = table
            .insert(mac(1), [1u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        assert_eq!(s1.sid, 1);
        let s2 = table
            .insert(mac(2), [2u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        assert_eq!(s2.sid, 2);
    }

    #[test]
    fn lookup_by_cookie_only_matches_in_discovery_sessions() {
        let table = SessionTable::new();
        let cookie = [9u8; COOKIE_LEN];
        let s = table.insert(mac(1), cookie, CapturedTags::default()).unwrap();
        assert!(table.lookup_in_discovery_by_cookie(&cookie).is_some());
        s.mark_username_assigned();
        assert!(table.lookup_in_discovery_by_cookie(&cookie).is_none());
    }

    #[test]
    fn full_table_reports_no_free_sid() {
        let table = SessionTable::new();
        table.for_test_fill_all();
        let err = table
            .insert(mac(1), [1u8; COOKIE_LEN], CapturedTags::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::NoFreeSid));
        assert_eq!(table.len(), MAX_SID as usize);
    }

    #[test]
    fn removed_sid_is_reusable() {
        let table = SessionTable::new();
        let s = table
            .insert(mac(1), [1u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        table.remove(s.sid);
        assert!(table.lookup_by_sid(s.sid).is_none());
        let s2 = table
            .insert(mac(2), [2u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        assert_eq!(s2.sid, 2); // rotation continues past the freed slot first
    }

    #[test]
    fn begin_terminate_is_idempotent_race_winner_takes_all() {
        let table = SessionTable::new();
        let s = table
            .insert(mac(1), [1u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        s.mark_ppp_started();
        assert!(s.begin_terminate());
        assert!(!s.begin_terminate());
    }

    #[test]
    fn start_teardown_once_admits_a_single_winner_even_before_ppp_started() {
        let table = SessionTable::new();
        let s = table
            .insert(mac(1), [1u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        assert!(s.start_teardown_once());
        assert!(!s.start_teardown_once());
    }
}
