//! Opens the kernel `AF_PPPOX`/`SOCK_STREAM` session socket and connects it
//! to a discovered peer. This is the one piece of "PPP" plumbing that
//! belongs to the discovery engine: everything past the connected fd (LCP,
//! authentication) is the external PPP engine's job.
//!
//! `libc` does not expose `AF_PPPOX` or `struct sockaddr_pppox` (they are
//! Linux PPPoE-specific ABI from `<linux/if_pppox.h>`, not POSIX), so both
//! are declared locally the same way this repo already hand-rolls
//! `sockaddr_ll`-adjacent structures in `socket.rs`.

use libc::{c_int, sa_family_t, sockaddr, socket, socklen_t, SOCK_STREAM};
use macaddr::MacAddr6;
use std::io::Error;
use std::mem::{size_of, zeroed};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

const AF_PPPOX: c_int = 24;
const PX_PROTO_OE: c_int = 0;
const IFNAMSIZ: usize = 16;

/// Matches the kernel's `struct pppoe_addr` from `<linux/if_pppox.h>`
/// exactly: `sid`, then `remote`, then `dev`, no embedded `sa_family`.
#[repr(C, packed)]
struct SockaddrPppoe {
    sid: u16,
    remote: [u8; 6],
    dev: [u8; IFNAMSIZ],
}

/// Matches `struct sockaddr_pppox`, which the kernel declares
/// `__attribute__((packed))`.
#[repr(C, packed)]
struct SockaddrPppox {
    sa_family: sa_family_t,
    sa_protocol: c_int,
    pppoe: SockaddrPppoe,
}

/// Opens and connects a kernel PPPoE session socket for `(ifname, peer,
/// sid)`, returning the connected fd for hand-off to the PPP engine.
pub fn open_session_socket(ifname: &str, peer: MacAddr6, sid: u16) -> Result<RawFd, Error> {
    if ifname.len() >= IFNAMSIZ {
        return Err(Error::new(
            std::io::ErrorKind::InvalidInput,
            "interface name too long for sockaddr_pppox",
        ));
    }

    let fd = unsafe { socket(AF_PPPOX, SOCK_STREAM, PX_PROTO_OE) };
    if fd < 0 {
        return Err(Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut addr: SockaddrPppox = unsafe { zeroed() };
    addr.sa_family = AF_PPPOX as sa_family_t;
    addr.sa_protocol = PX_PROTO_OE;
    addr.pppoe.sid = sid.to_be();
    addr.pppoe.dev[..ifname.len()].copy_from_slice(ifname.as_bytes());
    addr.pppoe.remote = peer.into_array();

    let len = size_of::<SockaddrPppox>() as socklen_t;
    let addr_ptr = &addr as *const SockaddrPppox as *const sockaddr;

    use std::os::fd::AsRawFd;
    if unsafe { libc::connect(fd.as_raw_fd(), addr_ptr, len) } < 0 {
        return Err(Error::last_os_error());
    }

    use std::os::fd::IntoRawFd;
    Ok(fd.into_raw_fd())
}
