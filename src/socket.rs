//! Raw `AF_PACKET`/`SOCK_RAW` socket bound to `ETH_P_PPP_DISC` on one
//! Ethernet interface.
//!
//! Non-blocking `AsyncFd<OwnedFd>` wrapper with `try_io`-based `recv`/`send`
//! and hex-dumped packet logging, built on `SOCK_RAW` so the codec sees
//! (and writes) the Ethernet header itself, extended with ifindex/hwaddr/mtu
//! queries and fd duplication for the per-session send path.

use libc::{
    c_void, fcntl, if_nametoindex, ioctl, recvfrom, sendto, sockaddr, sockaddr_ll, socket,
    socklen_t, AF_PACKET, ETH_P_PPP_DISC, FD_CLOEXEC, F_GETFD, F_GETFL, F_SETFD, F_SETFL, IFNAMSIZ,
    O_NONBLOCK, SOCK_RAW, SOL_SOCKET, SO_BROADCAST,
};
use macaddr::MacAddr6;
use pretty_hex::{hex_write, HexConfig};
use std::ffi::c_int;
use std::io::Error;
use std::mem::{size_of_val, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::trace;

// Not exposed by `libc` on every target; matches <linux/if.h>'s ifreq layout.
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_union: IfReqUnion,
}

#[repr(C)]
union IfReqUnion {
    ifr_hwaddr: libc::sockaddr,
    ifr_mtu: c_int,
}

const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
const SIOCGIFMTU: libc::c_ulong = 0x8921;

fn ifreq_with_name(ifname: &str) -> Result<IfReq, Error> {
    if ifname.len() >= IFNAMSIZ {
        return Err(Error::new(
            std::io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }

    let mut req: IfReq = unsafe { zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(ifname.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(req)
}

pub fn resolve_ifindex(ifname: &str) -> Result<c_int, Error> {
    let cname = std::ffi::CString::new(ifname)
        .map_err(|_| Error::new(std::io::ErrorKind::InvalidInput, "nul in interface name"))?;
    let idx = unsafe { if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        Err(Error::last_os_error())
    } else {
        Ok(idx as c_int)
    }
}

pub fn query_hwaddr(ifname: &str) -> Result<MacAddr6, Error> {
    let mut req = ifreq_with_name(ifname)?;
    let probe_fd = unsafe { socket(AF_PACKET, SOCK_RAW, 0) };
    if probe_fd < 0 {
        return Err(Error::last_os_error());
    }
    let probe_fd = unsafe { OwnedFd::from_raw_fd(probe_fd) };

    let rc = unsafe { ioctl(probe_fd.as_raw_fd(), SIOCGIFHWADDR, &mut req as *mut IfReq) };
    if rc < 0 {
        return Err(Error::last_os_error());
    }

    let sa = unsafe { req.ifr_union.ifr_hwaddr };
    let bytes: [u8; 6] = unsafe { *(sa.sa_data.as_ptr() as *const [u8; 6]) };
    Ok(MacAddr6::from(bytes))
}

pub fn query_mtu(ifname: &str) -> Result<i32, Error> {
    let mut req = ifreq_with_name(ifname)?;
    let probe_fd = unsafe { socket(AF_PACKET, SOCK_RAW, 0) };
    if probe_fd < 0 {
        return Err(Error::last_os_error());
    }
    let probe_fd = unsafe { OwnedFd::from_raw_fd(probe_fd) };

    let rc = unsafe { ioctl(probe_fd.as_raw_fd(), SIOCGIFMTU, &mut req as *mut IfReq) };
    if rc < 0 {
        return Err(Error::last_os_error());
    }

    Ok(unsafe { req.ifr_union.ifr_mtu })
}

fn set_nonblocking_cloexec(fd: RawFd) -> Result<(), Error> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 || unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(Error::last_os_error());
    }

    let fdflags = unsafe { fcntl(fd, F_GETFD) };
    if fdflags < 0 || unsafe { fcntl(fd, F_SETFD, fdflags | FD_CLOEXEC) } < 0 {
        return Err(Error::last_os_error());
    }

    Ok(())
}

/// Encapsulates an `AF_PACKET`/`SOCK_RAW` socket bound to
/// `ETH_P_PPP_DISC` on one interface.
pub struct PacketSocket(AsyncFd<OwnedFd>);

impl PacketSocket {
    pub fn bind(ifindex: c_int) -> Result<Self, Error> {
        let s = unsafe { socket(AF_PACKET, SOCK_RAW, (ETH_P_PPP_DISC as u16).to_be() as i32) };
        if s < 0 {
            return Err(Error::last_os_error());
        }

        let s = unsafe { OwnedFd::from_raw_fd(s) };
        set_nonblocking_cloexec(s.as_raw_fd())?;

        let mut addr: sockaddr_ll = unsafe { zeroed() };
        addr.sll_family = AF_PACKET as _;
        addr.sll_protocol = (ETH_P_PPP_DISC as u16).to_be();
        addr.sll_ifindex = ifindex;

        let len = size_of_val(&addr).try_into().unwrap();
        let addr_ptr = &addr as *const sockaddr_ll as *const sockaddr;
        if unsafe { libc::bind(s.as_raw_fd(), addr_ptr, len) } < 0 {
            return Err(Error::last_os_error());
        }

        let one: c_int = 1;
        if unsafe {
            libc::setsockopt(
                s.as_raw_fd(),
                SOL_SOCKET,
                SO_BROADCAST,
                &one as *const c_int as *const c_void,
                size_of_val(&one) as socklen_t,
            )
        } < 0
        {
            return Err(Error::last_os_error());
        }

        Ok(Self(AsyncFd::with_interest(s, Interest::READABLE)?))
    }

    /// An unbound `AF_INET`/`SOCK_DGRAM` socket wrapped the same way `bind`
    /// wraps a real `AF_PACKET` one. Needs no elevated privilege, so tests
    /// can exercise send/recv plumbing without a real discovery interface;
    /// `send` on it simply fails at the syscall and is logged like any
    /// other transient send error.
    #[cfg(test)]
    pub fn dummy_for_test() -> Result<Self, Error> {
        let s = unsafe { socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if s < 0 {
            return Err(Error::last_os_error());
        }
        let s = unsafe { OwnedFd::from_raw_fd(s) };
        set_nonblocking_cloexec(s.as_raw_fd())?;
        Ok(Self(AsyncFd::with_interest(s, Interest::READABLE)?))
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, sockaddr_ll), Error> {
        let mut addr: sockaddr_ll = unsafe { zeroed() };
        let received = loop {
            let mut guard = self.0.readable().await?;
            let res = guard.try_io(|s| {
                let mut alen: socklen_t = size_of_val(&addr).try_into().unwrap();
                let received = unsafe {
                    recvfrom(
                        s.as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        0,
                        &mut addr as *mut sockaddr_ll as _,
                        &mut alen,
                    )
                };

                if received < 0 {
                    return Err(Error::last_os_error());
                }

                Ok(received as usize)
            });

            match res {
                Ok(v) => break v?,
                Err(_would_block) => continue,
            }
        };

        log_frame("R", &addr, &buf[..received]);
        Ok((received, addr))
    }

    pub fn send(&self, addr: sockaddr_ll, buf: impl AsRef<[u8]>) -> Result<(), Error> {
        let buf = buf.as_ref();
        let sent = unsafe {
            sendto(
                self.0.get_ref().as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                0,
                &addr as *const sockaddr_ll as _,
                size_of_val(&addr).try_into().unwrap(),
            )
        };

        if sent < 0 {
            return Err(Error::last_os_error());
        }

        log_frame("S", &addr, buf);
        Ok(())
    }
}

/// Hex-dumps a frame at TRACE level, gated behind the tracing subscriber's
/// filter rather than a branch in this function.
fn log_frame(direction: &str, addr: &sockaddr_ll, data: &[u8]) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }

    let mut peer = String::new();
    for i in 0..addr.sll_halen {
        let i: usize = i.into();
        if i != 0 {
            peer.push(':');
        }
        peer.push_str(&format!("{:02x}", addr.sll_addr[i]));
    }

    let mut dump = String::new();
    let mut conf = HexConfig::default();
    conf.title = false;
    hex_write(&mut dump, data, conf).unwrap();

    trace!(direction, peer, len = data.len(), "{dump}");
}
