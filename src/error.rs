//! Internal error taxonomy for the discovery engine.
//!
//! These never propagate above the frame handler: each variant is either
//! silently dropped or answered with the matching PADS error tag at the
//! call site, per the discovery state machine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame shorter than minimum Ethernet + PPPoE header size")]
    TooShort,
    #[error("declared PPPoE length {declared} exceeds received payload {received}")]
    LengthMismatch { declared: usize, received: usize },
    #[error("tag at offset {offset} would exceed declared length {length}")]
    TagOverrun { offset: usize, length: usize },
    #[error("unsupported PPPoE version/type byte {0:#04x}")]
    BadVersion(u8),
}

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie failed integrity check")]
    BadCookie,
    #[error("cookie has the wrong length: {0}")]
    WrongLength(usize),
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("PADI rate limited")]
    RateLimited,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no free session id")]
    NoFreeSid,
    #[error("offered service name does not match configuration")]
    ServiceMismatch,
    #[error("socket error while establishing session: {0}")]
    Socket(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("interface {0} is already registered")]
    AlreadyExists(String),
    #[error("interface {0} is not registered")]
    NotFound(String),
    #[error("failed to resolve interface {ifname}: {source}")]
    ResolveInterface {
        ifname: String,
        #[source]
        source: std::io::Error,
    },
    #[error("interface {ifname} hardware address is not unicast Ethernet")]
    NonUnicastHwaddr { ifname: String },
    #[error("socket setup failed for {ifname}: {source}")]
    Socket {
        ifname: String,
        #[source]
        source: std::io::Error,
    },
}
