//! Per-interface discovery state machine: PADI -> PADO -> PADR -> PADS,
//! PADT on teardown. Drives admission, the cookie engine, the session
//! table, and the delayed-PADO scheduler for one interface.
//!
//! Dispatches parsed PADI/PADR/PADT frames into the full discovery
//! transition table: configured service-name matching, admission control,
//! the cookie engine, and SID allocation.

use crate::admission::PadiWindow;
use crate::config::{GlobalConfig, IfnameInSid, PadoDelay};
use crate::cookie::{CookieSecret, COOKIE_LEN};
use crate::frame::{Code, DiscoveryFrame, FrameBuilder, TagType, ETHERTYPE_PPPOE_DISC};
use crate::pado_delay::{PadoQueue, Schedule};
use crate::ppp::{FinishedNotifier, PppEngine, SessionHandle};
use crate::pppox;
use crate::session::{station_id, CapturedTags, Session, SessionTable};
use crate::socket::PacketSocket;
use crate::stats::Stats;
use libc::{sockaddr_ll, AF_PACKET};
use macaddr::MacAddr6;
use std::ffi::c_int;
use std::mem::zeroed;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tracing::{debug, warn};

pub const BROADCAST: MacAddr6 = MacAddr6::new(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);
pub const MAX_MTU: u16 = 1492;

/// Effective per-interface configuration: global options overlaid with
/// per-interface overrides from the `interface = ...` spec.
pub struct DiscoveryConfig {
    pub ac_name: String,
    pub service_names: Vec<String>,
    pub require_service_name: bool,
    pub reply_exact_service: bool,
    pub tr101: bool,
    pub ifname_in_sid: IfnameInSid,
    pub pado_delay: PadoDelay,
    pub padi_limit: u32,
    pub conf_padi_limit: u32,
}

impl DiscoveryConfig {
    pub fn from_global(global: &GlobalConfig, conf_padi_limit: u32) -> Self {
        Self {
            ac_name: global.ac_name.clone(),
            service_names: global.service_names.clone(),
            require_service_name: false,
            reply_exact_service: global.reply_exact_service,
            tr101: global.tr101,
            ifname_in_sid: global.ifname_in_sid,
            pado_delay: global.pado_delay.clone(),
            padi_limit: global.padi_limit,
            conf_padi_limit,
        }
    }

    /// PADI-side service matching: client tag may be empty (wildcard, iff
    /// `require_service_name` is false), otherwise must be one of the
    /// configured names; a server with no configured names accepts any.
    fn padi_service_offer(&self, client_sn: Option<&[u8]>) -> Option<ServiceOffer> {
        let client_sn = match client_sn {
            Some(b) => Some(std::str::from_utf8(b).ok()?),
            None => None,
        };

        if self.service_names.is_empty() {
            let specific = client_sn.filter(|s| !s.is_empty()).map(str::to_string);
            return Some(ServiceOffer { specific });
        }

        match client_sn {
            None | Some("") => {
                if self.require_service_name {
                    None
                } else {
                    Some(ServiceOffer { specific: None })
                }
            }
            Some(name) => {
                if self.service_names.iter().any(|n| n == name) {
                    Some(ServiceOffer {
                        specific: Some(name.to_string()),
                    })
                } else {
                    None
                }
            }
        }
    }

    /// PADR-side service matching: empty SERVICE_NAME is always accepted
    /// unconditionally, checked before consulting configuration at all.
    fn padr_service_ok(&self, client_sn: Option<&[u8]>) -> bool {
        let client_sn = match client_sn {
            Some(b) => match std::str::from_utf8(b) {
                Ok(s) => Some(s),
                Err(_) => return false,
            },
            None => None,
        };

        match client_sn {
            None | Some("") => true,
            Some(name) => self.service_names.is_empty() || self.service_names.iter().any(|n| n == name),
        }
    }

    fn offered_names(&self, offer: &ServiceOffer) -> Vec<String> {
        if self.reply_exact_service {
            if let Some(name) = &offer.specific {
                return vec![name.clone()];
            }
        }
        if !self.service_names.is_empty() {
            return self.service_names.clone();
        }
        vec![offer.specific.clone().unwrap_or_default()]
    }
}

/// Outcome of matching a client's SERVICE_NAME tag against configuration.
/// `specific` names the exact name to echo back; `None` means "offer the
/// wildcard" (no configured names, or the client asked for any).
struct ServiceOffer {
    specific: Option<String>,
}

pub struct DiscoveryEngine {
    pub ifname: String,
    pub hwaddr: MacAddr6,
    ifindex: c_int,
    sock: Arc<PacketSocket>,
    secret: CookieSecret,
    sessions: SessionTable,
    padi_window: Mutex<PadiWindow>,
    pado_queue: Arc<PadoQueue>,
    cfg: DiscoveryConfig,
    stats: Arc<Stats>,
    ppp: Arc<dyn PppEngine>,
    stopping: AtomicBool,
}

impl DiscoveryEngine {
    pub fn new(
        ifname: String,
        hwaddr: MacAddr6,
        ifindex: c_int,
        sock: Arc<PacketSocket>,
        cfg: DiscoveryConfig,
        stats: Arc<Stats>,
        ppp: Arc<dyn PppEngine>,
    ) -> Arc<Self> {
        let padi_window =
            PadiWindow::new(ifname.clone(), cfg.padi_limit, cfg.conf_padi_limit, stats.clone());
        Arc::new(Self {
            ifname,
            hwaddr,
            ifindex,
            sock,
            secret: CookieSecret::generate(),
            sessions: SessionTable::new(),
            padi_window: Mutex::new(padi_window),
            pado_queue: Arc::new(PadoQueue::new()),
            cfg,
            stats,
            ppp,
            stopping: AtomicBool::new(false),
        })
    }

    /// Builds the `sockaddr_ll` destination for a discovery frame sent on
    /// this interface: same ifindex every time, broadcast when `peer` is
    /// `None` (used only by tests; every real PADO/PADS/PADT targets a
    /// specific peer).
    fn dst_addr(&self, proto: u16, peer: Option<MacAddr6>) -> sockaddr_ll {
        let mut v: sockaddr_ll = unsafe { zeroed() };

        v.sll_family = AF_PACKET as _;
        v.sll_protocol = proto.to_be();
        v.sll_ifindex = self.ifindex;

        if let Some(peer) = peer {
            let addr = peer.as_bytes();
            v.sll_addr[..addr.len()].copy_from_slice(addr);
            v.sll_halen = addr.len().try_into().unwrap();
        }

        v
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn begin_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
        self.pado_queue.cancel_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Dispatches one parsed frame by PPPoE code. Unknown codes are
    /// dropped silently.
    pub fn handle_frame(self: &Arc<Self>, peer: MacAddr6, dst: MacAddr6, frame: &DiscoveryFrame<'_>) {
        if !frame.type_ok {
            warn!(ifname = %self.ifname, %peer, "PPPoE Type nibble unsupported, continuing per compatibility quirk");
        }

        match frame.code {
            Code::Padi => self.handle_padi(peer, frame),
            Code::Padr => self.handle_padr(peer, dst, frame),
            Code::Padt => self.handle_padt(peer, dst, frame),
            other => debug!(ifname = %self.ifname, %peer, code = ?other, "dropping unrecognized discovery code"),
        }
    }

    fn handle_padi(self: &Arc<Self>, peer: MacAddr6, frame: &DiscoveryFrame<'_>) {
        self.stats.padi_recv.fetch_add(1, Ordering::Relaxed);

        if self.is_stopping() {
            return;
        }

        if frame.sid != 0 {
            debug!(ifname = %self.ifname, %peer, "PADI with nonzero session id");
            return;
        }

        {
            let mut window = self.padi_window.lock().unwrap();
            if window.admit(peer, Instant::now()).is_err() {
                return;
            }
        }

        let client_sn = match extract_service_name(frame) {
            Ok(v) => v,
            Err(()) => return,
        };

        if self.cfg.padi_service_offer(client_sn).is_none() {
            return;
        }

        let tags = capture_tags(frame, self.cfg.tr101);
        let delay = self.cfg.pado_delay.resolve(self.stats.active.load(Ordering::Relaxed));

        let engine = self.clone();
        let outcome = self.pado_queue.schedule(
            peer,
            delay,
            tags.clone(),
            self.stats.clone(),
            move |peer, tags| {
                let engine = engine.clone();
                async move {
                    if engine.is_stopping() {
                        return;
                    }
                    engine.send_pado(peer, &tags);
                }
            },
        );

        if matches!(outcome, Schedule::Immediate) {
            self.send_pado(peer, &tags);
        }
    }

    fn send_pado(&self, peer: MacAddr6, tags: &CapturedTags) {
        let client_sn = tags.service_name.as_deref().map(str::as_bytes);
        let offer = match self.cfg.padi_service_offer(client_sn) {
            Some(v) => v,
            None => return,
        };

        let mut fb = FrameBuilder::setup_header(Code::Pado, 0, self.hwaddr, peer);
        fb.add_tag(TagType::AcName, self.cfg.ac_name.as_bytes());

        for name in self.cfg.offered_names(&offer) {
            fb.add_tag(TagType::ServiceName, name.as_bytes());
        }

        let cookie = self.secret.generate_cookie(self.hwaddr, peer);
        fb.add_tag(TagType::AcCookie, &cookie);

        if let Some(hu) = &tags.host_uniq {
            fb.add_tag(TagType::HostUniq, hu);
        }
        if let Some(rsid) = &tags.relay_sid {
            fb.add_tag(TagType::RelaySessionId, rsid);
        }

        let dst_addr = self.dst_addr(ETHERTYPE_PPPOE_DISC, Some(peer));
        match self.sock.send(dst_addr, fb.finish()) {
            Ok(()) => {
                self.stats.pado_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(ifname = %self.ifname, %peer, error = %e, "failed to send PADO"),
        }
    }

    fn handle_padr(self: &Arc<Self>, peer: MacAddr6, dst: MacAddr6, frame: &DiscoveryFrame<'_>) {
        self.stats.padr_recv.fetch_add(1, Ordering::Relaxed);

        if dst == BROADCAST && frame.sid != 0 {
            debug!(ifname = %self.ifname, %peer, "discarding PADR: broadcast destination with nonzero sid");
            return;
        }

        if self.is_stopping() {
            return;
        }

        let cookie_tag = match frame.tags.get(TagType::AcCookie) {
            Some(t) => t,
            None => {
                debug!(ifname = %self.ifname, %peer, "PADR missing AC-Cookie");
                return;
            }
        };

        if cookie_tag.data.len() != COOKIE_LEN {
            debug!(ifname = %self.ifname, %peer, len = cookie_tag.data.len(), "PADR AC-Cookie wrong length");
            return;
        }

        if self
            .secret
            .verify_cookie(self.hwaddr, peer, cookie_tag.data)
            .is_err()
        {
            debug!(ifname = %self.ifname, %peer, "PADR bad cookie");
            return;
        }

        let cookie: [u8; COOKIE_LEN] = cookie_tag.data.try_into().unwrap();

        if let Some(existing) = self.sessions.lookup_in_discovery_by_cookie(&cookie) {
            self.stats.padr_dup_recv.fetch_add(1, Ordering::Relaxed);
            self.send_pads(peer, existing.sid, &existing.tags);
            return;
        }

        let client_sn = match extract_service_name(frame) {
            Ok(v) => v,
            Err(()) => return,
        };

        if !self.cfg.padr_service_ok(client_sn) {
            self.send_pads_error(peer, frame, TagType::ServiceNameError);
            return;
        }

        let tags = capture_tags(frame, self.cfg.tr101);

        let session = match self.sessions.insert(peer, cookie, tags.clone()) {
            Ok(s) => s,
            Err(_) => {
                self.send_pads_error(peer, frame, TagType::AcSystemError);
                return;
            }
        };

        self.stats.starting.fetch_add(1, Ordering::Relaxed);
        self.send_pads(peer, session.sid, &tags);

        let engine = self.clone();
        tokio::spawn(async move {
            engine.connect_session(session).await;
        });
    }

    fn send_pads(&self, peer: MacAddr6, sid: u16, tags: &CapturedTags) {
        let mut fb = FrameBuilder::setup_header(Code::Pads, sid, self.hwaddr, peer);
        fb.add_tag(TagType::AcName, self.cfg.ac_name.as_bytes());
        fb.add_tag(
            TagType::ServiceName,
            tags.service_name.as_deref().unwrap_or("").as_bytes(),
        );
        if let Some(hu) = &tags.host_uniq {
            fb.add_tag(TagType::HostUniq, hu);
        }
        if let Some(rsid) = &tags.relay_sid {
            fb.add_tag(TagType::RelaySessionId, rsid);
        }

        let dst_addr = self.dst_addr(ETHERTYPE_PPPOE_DISC, Some(peer));
        match self.sock.send(dst_addr, fb.finish()) {
            Ok(()) => {
                self.stats.pads_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(ifname = %self.ifname, %peer, error = %e, "failed to send PADS"),
        }
    }

    fn send_pads_error(&self, peer: MacAddr6, frame: &DiscoveryFrame<'_>, error_tag: TagType) {
        let mut fb = FrameBuilder::setup_header(Code::Pads, 0, self.hwaddr, peer);
        fb.add_tag(TagType::AcName, self.cfg.ac_name.as_bytes());
        fb.add_tag(error_tag, b"");
        if let Some(t) = frame.tags.get(TagType::HostUniq) {
            fb.copy_tag(t);
        }
        if let Some(t) = frame.tags.get(TagType::RelaySessionId) {
            fb.copy_tag(t);
        }

        let dst_addr = self.dst_addr(ETHERTYPE_PPPOE_DISC, Some(peer));
        if let Err(e) = self.sock.send(dst_addr, fb.finish()) {
            warn!(ifname = %self.ifname, %peer, error = %e, "failed to send error PADS");
            return;
        }
        self.stats.pads_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_padt(self: &Arc<Self>, peer: MacAddr6, dst: MacAddr6, frame: &DiscoveryFrame<'_>) {
        if dst == BROADCAST {
            debug!(ifname = %self.ifname, %peer, "discarding PADT: broadcast destination");
            return;
        }

        let session = match self.sessions.lookup_by_sid(frame.sid) {
            Some(s) => s,
            None => return,
        };

        if session.peer_addr != peer {
            debug!(ifname = %self.ifname, %peer, sid = frame.sid, "PADT source does not match session peer");
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            engine.disconnect(session).await;
        });
    }

    async fn connect_session(self: Arc<Self>, session: Arc<Session>) {
        let sid = session.sid;
        let fd = match pppox::open_session_socket(&self.ifname, session.peer_addr, sid) {
            Ok(fd) => fd,
            Err(e) => {
                warn!(ifname = %self.ifname, sid, error = %e, "failed to open kernel session socket");
                self.disconnect(session).await;
                return;
            }
        };

        let handle = SessionHandle {
            session: session.clone(),
            ifname: self.ifname.clone(),
            calling_station_id: station_id(
                &self.ifname,
                session.peer_addr,
                self.cfg.ifname_in_sid.in_calling(),
            ),
            called_station_id: station_id(
                &self.ifname,
                self.hwaddr,
                self.cfg.ifname_in_sid.in_called(),
            ),
            mtu: MAX_MTU,
        };

        let notifier: Arc<dyn FinishedNotifier> = Arc::new(EngineFinishedNotifier(Arc::downgrade(&self)));

        match self.ppp.start(handle, fd, notifier).await {
            Ok(()) => {
                session.mark_username_assigned();
                self.stats.starting.fetch_sub(1, Ordering::Relaxed);
                self.stats.active.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(ifname = %self.ifname, sid, error = %e, "PPP engine failed to start session");
                self.disconnect(session).await;
            }
        }
    }

    /// Entry point for a `PppEngine` reporting that a running session ended
    /// on its own (peer hangup, idle timeout, link loss) rather than via
    /// PADT or an admin `request_stop`. A session already torn down, or one
    /// this interface no longer knows about, is silently ignored.
    pub fn finished(self: &Arc<Self>, sid: u16) {
        if let Some(session) = self.sessions.lookup_by_sid(sid) {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.disconnect(session).await;
            });
        }
    }

    /// Idempotent teardown: terminate PPP if it had started, send PADT,
    /// remove from the session table. Reachable from PADT, PPP-finished,
    /// a connect failure, and admin stop; only the first caller for a
    /// given session proceeds past the gate.
    pub async fn disconnect(self: Arc<Self>, session: Arc<Session>) {
        if !session.start_teardown_once() {
            return;
        }

        if session.begin_terminate() {
            self.ppp.request_stop(session.sid).await;
            self.stats.active.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.stats.starting.fetch_sub(1, Ordering::Relaxed);
        }

        self.send_padt_for(&session);
        self.sessions.remove(session.sid);
    }

    fn send_padt_for(&self, session: &Session) {
        let mut fb = FrameBuilder::setup_header(Code::Padt, session.sid, self.hwaddr, session.peer_addr);
        fb.add_tag(TagType::AcName, self.cfg.ac_name.as_bytes());
        if let Some(name) = &session.tags.service_name {
            fb.add_tag(TagType::ServiceName, name.as_bytes());
        }
        if let Some(hu) = &session.tags.host_uniq {
            fb.add_tag(TagType::HostUniq, hu);
        }
        if let Some(rsid) = &session.tags.relay_sid {
            fb.add_tag(TagType::RelaySessionId, rsid);
        }

        let dst_addr = self.dst_addr(ETHERTYPE_PPPOE_DISC, Some(session.peer_addr));
        if let Err(e) = self.sock.send(dst_addr, fb.finish()) {
            warn!(ifname = %self.ifname, sid = session.sid, error = %e, "failed to send PADT");
        }
    }

    /// Admin stop: tear down every session on this interface. Each
    /// teardown runs on its own task so a slow PPP engine on one session
    /// doesn't hold up the others.
    pub async fn stop_all_sessions(self: &Arc<Self>) {
        for sid in self.sessions.all_sids() {
            if let Some(session) = self.sessions.lookup_by_sid(sid) {
                let engine = self.clone();
                tokio::spawn(async move {
                    engine.disconnect(session).await;
                });
            }
        }
    }
}

/// Bridges a `PppEngine`'s `notify_finished` call back into the owning
/// engine without keeping it alive past the interface's own lifetime.
struct EngineFinishedNotifier(Weak<DiscoveryEngine>);

impl FinishedNotifier for EngineFinishedNotifier {
    fn notify_finished(&self, sid: u16) {
        if let Some(engine) = self.0.upgrade() {
            engine.finished(sid);
        }
    }
}

fn extract_service_name<'a>(frame: &DiscoveryFrame<'a>) -> Result<Option<&'a [u8]>, ()> {
    let mut seen = None;
    for tag in frame.tags.iter() {
        if tag.ty == TagType::ServiceName {
            if seen.is_some() {
                return Err(());
            }
            seen = Some(tag.data);
        }
    }
    Ok(seen)
}

fn capture_tags(frame: &DiscoveryFrame<'_>, tr101: bool) -> CapturedTags {
    let mut tags = CapturedTags::default();

    for tag in frame.tags.iter() {
        match tag.ty {
            TagType::HostUniq => tags.host_uniq = Some(tag.data.to_vec()),
            TagType::RelaySessionId => tags.relay_sid = Some(tag.data.to_vec()),
            TagType::ServiceName => {
                tags.service_name = std::str::from_utf8(tag.data).ok().map(str::to_string)
            }
            TagType::VendorSpecific if tr101 => tags.tr101 = Some(tag.data.to_vec()),
            _ => {}
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;

    fn mac(b: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, b)
    }

    #[test]
    fn padi_service_offer_accepts_wildcard_when_no_names_configured() {
        let cfg = DiscoveryConfig::from_global(&GlobalConfig::default(), 0);
        let offer = cfg.padi_service_offer(None).unwrap();
        assert!(offer.specific.is_none());
    }

    #[test]
    fn padi_service_offer_rejects_unconfigured_name() {
        let mut global = GlobalConfig::default();
        global.service_names = vec!["isp-a".to_string()];
        let cfg = DiscoveryConfig::from_global(&global, 0);
        assert!(cfg.padi_service_offer(Some(b"isp-b")).is_none());
        assert!(cfg.padi_service_offer(Some(b"isp-a")).is_some());
    }

    #[test]
    fn padi_service_offer_denies_empty_when_required() {
        let mut global = GlobalConfig::default();
        global.service_names = vec!["isp-a".to_string()];
        let mut cfg = DiscoveryConfig::from_global(&global, 0);
        cfg.require_service_name = true;
        assert!(cfg.padi_service_offer(None).is_none());
    }

    #[test]
    fn padi_service_offer_accepts_empty_when_not_required() {
        let mut global = GlobalConfig::default();
        global.service_names = vec!["isp-a".to_string()];
        let cfg = DiscoveryConfig::from_global(&global, 0);
        let offer = cfg.padi_service_offer(None).unwrap();
        assert!(offer.specific.is_none());
    }

    #[test]
    fn padr_service_ok_always_accepts_empty_service_name() {
        let mut global = GlobalConfig::default();
        global.service_names = vec!["isp-a".to_string()];
        let cfg = DiscoveryConfig::from_global(&global, 0);
        assert!(cfg.padr_service_ok(Some(b"")));
        assert!(cfg.padr_service_ok(None));
        assert!(!cfg.padr_service_ok(Some(b"isp-b")));
    }

    #[test]
    fn offered_names_prefers_exact_match_when_configured() {
        let mut global = GlobalConfig::default();
        global.service_names = vec!["isp-a".to_string(), "isp-b".to_string()];
        global.reply_exact_service = true;
        let cfg = DiscoveryConfig::from_global(&global, 0);
        let offer = cfg.padi_service_offer(Some(b"isp-b")).unwrap();
        assert_eq!(cfg.offered_names(&offer), vec!["isp-b".to_string()]);
    }

    #[test]
    fn offered_names_lists_all_configured_names_without_reply_exact() {
        let mut global = GlobalConfig::default();
        global.service_names = vec!["isp-a".to_string(), "isp-b".to_string()];
        let cfg = DiscoveryConfig::from_global(&global, 0);
        let offer = cfg.padi_service_offer(Some(b"isp-b")).unwrap();
        assert_eq!(
            cfg.offered_names(&offer),
            vec!["isp-a".to_string(), "isp-b".to_string()]
        );
    }

    #[test]
    fn extract_service_name_rejects_duplicate_tags() {
        let mut fb = FrameBuilder::setup_header(Code::Padi, 0, mac(1), BROADCAST);
        fb.add_tag(TagType::ServiceName, b"a");
        fb.add_tag(TagType::ServiceName, b"b");
        let bytes = fb.finish();
        let frame = DiscoveryFrame::parse(&bytes).unwrap();
        assert!(extract_service_name(&frame).is_err());
    }

    #[test]
    fn extract_service_name_returns_none_when_absent() {
        let fb = FrameBuilder::setup_header(Code::Padi, 0, mac(1), BROADCAST);
        let bytes = fb.finish();
        let frame = DiscoveryFrame::parse(&bytes).unwrap();
        assert!(extract_service_name(&frame).unwrap().is_none());
    }

    #[test]
    fn capture_tags_collects_host_uniq_and_service_name() {
        let mut fb = FrameBuilder::setup_header(Code::Padr, 0, mac(1), mac(2));
        fb.add_tag(TagType::ServiceName, b"isp-a");
        fb.add_tag(TagType::HostUniq, b"abc123");
        let bytes = fb.finish();
        let frame = DiscoveryFrame::parse(&bytes).unwrap();
        let tags = capture_tags(&frame, false);
        assert_eq!(tags.service_name.as_deref(), Some("isp-a"));
        assert_eq!(tags.host_uniq.as_deref(), Some(&b"abc123"[..]));
    }

    #[test]
    fn capture_tags_ignores_vendor_specific_unless_tr101_enabled() {
        let mut fb = FrameBuilder::setup_header(Code::Padr, 0, mac(1), mac(2));
        fb.add_tag(TagType::VendorSpecific, b"circuit-id-data");
        let bytes = fb.finish();
        let frame = DiscoveryFrame::parse(&bytes).unwrap();
        assert!(capture_tags(&frame, false).tr101.is_none());
        assert!(capture_tags(&frame, true).tr101.is_some());
    }

    #[derive(Default)]
    struct RecordingPppEngine {
        notifier: Mutex<Option<Arc<dyn FinishedNotifier>>>,
    }

    #[async_trait::async_trait]
    impl PppEngine for RecordingPppEngine {
        async fn start(
            &self,
            handle: SessionHandle,
            _fd: std::os::fd::RawFd,
            notifier: Arc<dyn FinishedNotifier>,
        ) -> Result<(), crate::ppp::PppStartError> {
            handle.session.mark_ppp_started();
            *self.notifier.lock().unwrap() = Some(notifier);
            Ok(())
        }

        async fn request_stop(&self, _sid: u16) {}
    }

    #[tokio::test]
    async fn finished_callback_tears_down_a_running_session() {
        let stats = Arc::new(Stats::default());
        let sock = Arc::new(PacketSocket::dummy_for_test().unwrap());
        let cfg = DiscoveryConfig::from_global(&GlobalConfig::default(), 0);
        let ppp = Arc::new(RecordingPppEngine::default());
        let engine = DiscoveryEngine::new(
            "test0".to_string(),
            mac(1),
            0,
            sock,
            cfg,
            stats.clone(),
            ppp.clone(),
        );

        let session = engine
            .sessions
            .insert(mac(2), [0u8; COOKIE_LEN], CapturedTags::default())
            .unwrap();
        stats.starting.fetch_add(1, Ordering::Relaxed);

        let handle = SessionHandle {
            session: session.clone(),
            ifname: engine.ifname.clone(),
            calling_station_id: String::new(),
            called_station_id: String::new(),
            mtu: MAX_MTU,
        };
        let notifier: Arc<dyn FinishedNotifier> =
            Arc::new(EngineFinishedNotifier(Arc::downgrade(&engine)));
        ppp.start(handle, -1, notifier).await.unwrap();
        stats.starting.fetch_sub(1, Ordering::Relaxed);
        stats.active.fetch_add(1, Ordering::Relaxed);

        assert!(session.is_ppp_started());
        assert!(engine.has_sessions());

        let notifier = ppp.notifier.lock().unwrap().clone().unwrap();
        notifier.notify_finished(session.sid);

        for _ in 0..100 {
            if !engine.has_sessions() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!engine.has_sessions());
        assert_eq!(stats.active.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn finished_notifier_on_a_dropped_engine_is_a_noop() {
        let notifier = EngineFinishedNotifier(Weak::new());
        notifier.notify_finished(42);
    }
}
