//! External boundary: the downstream PPP link-setup layer.
//!
//! This module only models the interface the discovery engine calls into
//! (open a kernel PPPoE session socket, hand the fd off, wait for
//! `started`/`finished`). A real implementation lives outside this crate;
//! [`NullPppEngine`] is a test double only.

use crate::session::Session;
use async_trait::async_trait;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Identity of a discovered session, handed to the PPP engine once PADR is
/// accepted and the kernel session socket is connected.
pub struct SessionHandle {
    pub session: Arc<Session>,
    pub ifname: String,
    pub calling_station_id: String,
    pub called_station_id: String,
    pub mtu: u16,
}

/// Callback the PPP engine holds onto for the lifetime of a session and
/// invokes exactly once, whenever LCP/auth ends on its own (peer hangup,
/// idle timeout, link loss) rather than via PADT or [`PppEngine::request_stop`].
/// Calling it after the session has already torn down is a no-op.
pub trait FinishedNotifier: Send + Sync {
    fn notify_finished(&self, sid: u16);
}

/// Collaborator that owns PPP/LCP negotiation once discovery finishes.
#[async_trait]
pub trait PppEngine: Send + Sync {
    /// Called once a session is fully discovered and its kernel session
    /// socket is connected. Returns once the PPP engine acknowledges
    /// completion (successful LCP/auth, or a startup failure). `notifier`
    /// is the engine's only path back in once `start` has returned `Ok`;
    /// it must call `notifier.notify_finished(sid)` when the session ends
    /// for any reason it wasn't told about.
    async fn start(
        &self,
        handle: SessionHandle,
        fd: RawFd,
        notifier: Arc<dyn FinishedNotifier>,
    ) -> Result<(), PppStartError>;

    /// Requests the engine tear down an already-running session, e.g. for
    /// admin stop. The engine eventually reports completion by dropping its
    /// side of the session, which this core observes via socket closure.
    async fn request_stop(&self, sid: u16);
}

#[derive(Debug, thiserror::Error)]
#[error("PPP engine failed to start session: {0}")]
pub struct PppStartError(pub String);

/// Test double: accepts every session, never actually negotiates PPP.
/// Not a real PPP stack — exists only so the discovery engine's unit tests
/// can exercise the PADR-accept path without a kernel PPPoE socket.
pub struct NullPppEngine;

#[async_trait]
impl PppEngine for NullPppEngine {
    async fn start(
        &self,
        handle: SessionHandle,
        fd: RawFd,
        _notifier: Arc<dyn FinishedNotifier>,
    ) -> Result<(), PppStartError> {
        handle.session.mark_ppp_started();
        unsafe {
            libc::close(fd);
        }
        Ok(())
    }

    async fn request_stop(&self, _sid: u16) {}
}
