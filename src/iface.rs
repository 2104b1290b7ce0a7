//! Per-interface server: binds the raw discovery socket, resolves the
//! interface's identity, and drives the read loop into
//! [`DiscoveryEngine`] until told to stop.
//!
//! Owns interface setup (ifindex/hwaddr resolution, unicast hwaddr check),
//! a `sock.recv` loop raced against a `CancellationToken`, and a
//! drain-on-stop phase that waits for in-flight sessions before returning.

use crate::config::GlobalConfig;
use crate::discovery::{DiscoveryConfig, DiscoveryEngine, BROADCAST};
use crate::error::ServerError;
use crate::frame::DiscoveryFrame;
use crate::ppp::PppEngine;
use crate::socket::{self, PacketSocket};
use crate::stats::Stats;
use macaddr::MacAddr6;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn is_unicast(mac: MacAddr6) -> bool {
    mac.as_bytes()[0] & 0x01 == 0
}

/// External collaborator that may refuse a frame's source MAC before it
/// ever reaches discovery handling, e.g. an operator-maintained allow/deny
/// list. Implemented outside this core, mirroring
/// [`crate::admission::ConnectionLimit`].
pub trait MacFilter: Send + Sync {
    fn allow(&self, mac: MacAddr6) -> bool;
}

/// Owns the bound socket for one interface and its [`DiscoveryEngine`].
pub struct InterfaceServer {
    sock: Arc<PacketSocket>,
    engine: Arc<DiscoveryEngine>,
    mac_filter: Option<Arc<dyn MacFilter>>,
}

impl InterfaceServer {
    /// Resolves `ifname`, binds a raw discovery socket on it, and builds
    /// the engine that will own its session state.
    pub fn bind(
        ifname: String,
        global: &GlobalConfig,
        conf_padi_limit: u32,
        stats: Arc<Stats>,
        ppp: Arc<dyn PppEngine>,
    ) -> Result<Self, ServerError> {
        Self::bind_with_mac_filter(ifname, global, conf_padi_limit, stats, ppp, None)
    }

    /// Same as [`Self::bind`], additionally installing a [`MacFilter`]
    /// collaborator consulted on every inbound frame.
    pub fn bind_with_mac_filter(
        ifname: String,
        global: &GlobalConfig,
        conf_padi_limit: u32,
        stats: Arc<Stats>,
        ppp: Arc<dyn PppEngine>,
        mac_filter: Option<Arc<dyn MacFilter>>,
    ) -> Result<Self, ServerError> {
        let ifindex = socket::resolve_ifindex(&ifname).map_err(|source| ServerError::ResolveInterface {
            ifname: ifname.clone(),
            source,
        })?;

        let hwaddr = socket::query_hwaddr(&ifname).map_err(|source| ServerError::ResolveInterface {
            ifname: ifname.clone(),
            source,
        })?;

        if !is_unicast(hwaddr) {
            return Err(ServerError::NonUnicastHwaddr { ifname });
        }

        match socket::query_mtu(&ifname) {
            Ok(mtu) if mtu < 1500 => warn!(ifname, mtu, "interface MTU below 1500"),
            Ok(_) => {}
            Err(e) => warn!(ifname, error = %e, "failed to query interface MTU"),
        }

        let sock = PacketSocket::bind(ifindex).map_err(|source| ServerError::Socket {
            ifname: ifname.clone(),
            source,
        })?;
        let sock = Arc::new(sock);

        let cfg = DiscoveryConfig::from_global(global, conf_padi_limit);
        let engine = DiscoveryEngine::new(ifname.clone(), hwaddr, ifindex, sock.clone(), cfg, stats, ppp);

        info!(ifname, %hwaddr, "interface bound for PPPoE discovery");
        Ok(Self {
            sock,
            engine,
            mac_filter,
        })
    }

    pub fn engine(&self) -> Arc<DiscoveryEngine> {
        self.engine.clone()
    }

    /// Reads discovery frames until `cancel` fires, then drains any
    /// sessions still open before returning.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = [0u8; 1500];
        let engine = self.engine.clone();

        loop {
            let (len, _addr) = tokio::select! {
                _ = cancel.cancelled() => break,
                v = self.sock.recv(&mut buf) => match v {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(ifname = %engine.ifname, error = %e, "recv error, stopping interface");
                        break;
                    }
                },
            };

            let frame = match DiscoveryFrame::parse(&buf[..len]) {
                Ok(f) => f,
                Err(e) => {
                    debug!(ifname = %engine.ifname, error = %e, "dropping malformed discovery frame");
                    continue;
                }
            };

            if frame.dst != engine.hwaddr && frame.dst != BROADCAST {
                continue;
            }
            if let Some(filter) = &self.mac_filter {
                if !filter.allow(frame.src) {
                    debug!(ifname = %engine.ifname, src = %frame.src, "dropping frame rejected by MAC filter");
                    continue;
                }
            }
            if !is_unicast(frame.src) {
                debug!(ifname = %engine.ifname, src = %frame.src, "dropping frame from non-unicast source");
                continue;
            }

            engine.handle_frame(frame.src, frame.dst, &frame);
        }

        engine.begin_stopping();
        engine.stop_all_sessions().await;
        while engine.has_sessions() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!(ifname = %engine.ifname, "interface stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(b: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, b)
    }

    #[test]
    fn locally_administered_address_is_unicast() {
        assert!(is_unicast(mac(1)));
    }

    #[test]
    fn multicast_bit_set_is_rejected() {
        assert!(!is_unicast(MacAddr6::new(0x01, 0, 0, 0, 0, 0)));
    }

    struct DenyList(Vec<MacAddr6>);

    impl MacFilter for DenyList {
        fn allow(&self, mac: MacAddr6) -> bool {
            !self.0.contains(&mac)
        }
    }

    #[test]
    fn mac_filter_rejects_denied_addresses_only() {
        let filter: Arc<dyn MacFilter> = Arc::new(DenyList(vec![mac(1)]));
        assert!(!filter.allow(mac(1)));
        assert!(filter.allow(mac(2)));
    }
}
