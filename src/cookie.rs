//! Stateless, MAC-bound cookie engine.
//!
//! The wire cookie stays 24 bytes for compatibility with clients that assume
//! the historical MD5+DES construction's size, but the construction itself
//! is HMAC-SHA256 based: integrity binding was always the actual contract,
//! never confidentiality, and DES weak-key handling buys nothing here.
//!
//! Token layout: `nonce (8 bytes) || mac[0..16]` where
//! `mac = HMAC-SHA256(secret, server_hwaddr || peer_mac || nonce)`.

use crate::error::CookieError;
use hmac::{Hmac, Mac};
use macaddr::MacAddr6;
use rand::Rng;
use sha2::Sha256;

pub const COOKIE_LEN: usize = 24;
const NONCE_LEN: usize = 8;
const SECRET_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Per-server secret used to seal and verify cookies. Lives as long as the
/// owning interface server.
#[derive(Clone)]
pub struct CookieSecret([u8; SECRET_LEN]);

impl CookieSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn mac(&self, hwaddr: MacAddr6, peer: MacAddr6, nonce: &[u8; NONCE_LEN]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.0).expect("HMAC accepts any key length");
        mac.update(hwaddr.as_bytes());
        mac.update(peer.as_bytes());
        mac.update(nonce);
        mac.finalize().into_bytes().into()
    }

    pub fn generate_cookie(&self, hwaddr: MacAddr6, peer: MacAddr6) -> [u8; COOKIE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let digest = self.mac(hwaddr, peer, &nonce);

        let mut cookie = [0u8; COOKIE_LEN];
        cookie[..NONCE_LEN].copy_from_slice(&nonce);
        cookie[NONCE_LEN..].copy_from_slice(&digest[..COOKIE_LEN - NONCE_LEN]);
        cookie
    }

    pub fn verify_cookie(
        &self,
        hwaddr: MacAddr6,
        peer: MacAddr6,
        cookie: &[u8],
    ) -> Result<(), CookieError> {
        if cookie.len() != COOKIE_LEN {
            return Err(CookieError::WrongLength(cookie.len()));
        }

        let nonce: [u8; NONCE_LEN] = cookie[..NONCE_LEN].try_into().unwrap();
        let expect = self.mac(hwaddr, peer, &nonce);

        let ok: bool = expect[..COOKIE_LEN - NONCE_LEN]
            .iter()
            .zip(&cookie[NONCE_LEN..])
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;

        if ok {
            Ok(())
        } else {
            Err(CookieError::BadCookie)
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
    fn round_trip_succeeds_for_same_peer() {
        let secret = CookieSecret::generate();
        let hw = mac(0xaa);
        let peer = mac(1);
        let cookie = secret.generate_cookie(hw, peer);
        assert!(secret.verify_cookie(hw, peer, &cookie).is_ok());
    }

    #[test]
    fn rejects_cookie_replayed_against_different_peer() {
        let secret = CookieSecret::generate();
        let hw = mac(0xaa);
        let cookie = secret.generate_cookie(hw, mac(1));
        let err = secret.verify_cookie(hw, mac(2), &cookie).unwrap_err();
        assert!(matches!(err, CookieError::BadCookie));
    }

    #[test]
    fn rejects_cookie_from_different_server_secret() {
        let s1 = CookieSecret::generate();
        let s2 = CookieSecret::generate();
        let hw = mac(0xaa);
        let peer = mac(1);
        let cookie = s1.generate_cookie(hw, peer);
        assert!(s2.verify_cookie(hw, peer, &cookie).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        let secret = CookieSecret::generate();
        let err = secret
            .verify_cookie(mac(0xaa), mac(1), &[0u8; 10])
            .unwrap_err();
        assert!(matches!(err, CookieError::WrongLength(10)));
    }
}
