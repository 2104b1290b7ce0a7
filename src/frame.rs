//! Ethernet + PPPoE discovery-stage header + TLV tag-list codec.
//!
//! Pure functions only: parsing never touches a socket, encoding never
//! allocates more than the caller's buffer needs.

use crate::error::FrameError;
use macaddr::MacAddr6;

pub const ETHERTYPE_PPPOE_DISC: u16 = 0x8863;
pub const ETH_HDR_LEN: usize = 14;
pub const PPPOE_HDR_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Padi,
    Pado,
    Padr,
    Pads,
    Padt,
    Unknown(u8),
}

impl From<u8> for Code {
    fn from(v: u8) -> Self {
        match v {
            0x09 => Code::Padi,
            0x07 => Code::Pado,
            0x19 => Code::Padr,
            0x65 => Code::Pads,
            0xa7 => Code::Padt,
            other => Code::Unknown(other),
        }
    }
}

impl From<Code> for u8 {
    fn from(v: Code) -> u8 {
        match v {
            Code::Padi => 0x09,
            Code::Pado => 0x07,
            Code::Padr => 0x19,
            Code::Pads => 0x65,
            Code::Padt => 0xa7,
            Code::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    EndOfList,
    ServiceName,
    AcName,
    HostUniq,
    AcCookie,
    VendorSpecific,
    RelaySessionId,
    ServiceNameError,
    AcSystemError,
    GenericError,
    Unknown(u16),
}

impl From<u16> for TagType {
    fn from(v: u16) -> Self {
        match v {
            0x0000 => TagType::EndOfList,
            0x0101 => TagType::ServiceName,
            0x0102 => TagType::AcName,
            0x0103 => TagType::HostUniq,
            0x0104 => TagType::AcCookie,
            0x0105 => TagType::VendorSpecific,
            0x0110 => TagType::RelaySessionId,
            0x0201 => TagType::ServiceNameError,
            0x0202 => TagType::AcSystemError,
            0x0203 => TagType::GenericError,
            other => TagType::Unknown(other),
        }
    }
}

impl From<TagType> for u16 {
    fn from(v: TagType) -> u16 {
        match v {
            TagType::EndOfList => 0x0000,
            TagType::ServiceName => 0x0101,
            TagType::AcName => 0x0102,
            TagType::HostUniq => 0x0103,
            TagType::AcCookie => 0x0104,
            TagType::VendorSpecific => 0x0105,
            TagType::RelaySessionId => 0x0110,
            TagType::ServiceNameError => 0x0201,
            TagType::AcSystemError => 0x0202,
            TagType::GenericError => 0x0203,
            TagType::Unknown(v) => v,
        }
    }
}

/// ADSL-Forum vendor id carried in VENDOR_SPECIFIC when it encodes TR-101.
pub const ADSL_FORUM_VENDOR_ID: u32 = 0x0000_0DE9;

/// A single parsed tag, borrowing its data from the packet buffer.
#[derive(Debug, Clone, Copy)]
pub struct Tag<'a> {
    pub ty: TagType,
    pub data: &'a [u8],
}

/// Ordered list of tags parsed from a discovery payload.
#[derive(Debug, Default, Clone)]
pub struct Tags<'a> {
    entries: Vec<Tag<'a>>,
}

impl<'a> Tags<'a> {
    pub fn parse(mut payload: &'a [u8], declared_len: usize) -> Result<Self, FrameError> {
        if declared_len > payload.len() {
            return Err(FrameError::LengthMismatch {
                declared: declared_len,
                received: payload.len(),
            });
        }
        payload = &payload[..declared_len];

        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < declared_len {
            if declared_len - offset < 4 {
                return Err(FrameError::TagOverrun {
                    offset,
                    length: declared_len,
                });
            }

            let ty = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
            let len = u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]) as usize;
            let data_start = offset + 4;
            let data_end = data_start + len;

            if data_end > declared_len {
                return Err(FrameError::TagOverrun {
                    offset,
                    length: declared_len,
                });
            }

            let ty = TagType::from(ty);
            if ty == TagType::EndOfList {
                break;
            }

            entries.push(Tag {
                ty,
                data: &payload[data_start..data_end],
            });

            offset = data_end;
        }

        Ok(Self { entries })
    }

    pub fn get(&self, ty: TagType) -> Option<&Tag<'a>> {
        self.entries.iter().find(|t| t.ty == ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag<'a>> {
        self.entries.iter()
    }
}

/// A fully parsed discovery frame. Borrows tag data from the input buffer.
#[derive(Debug, Clone)]
pub struct DiscoveryFrame<'a> {
    pub dst: MacAddr6,
    pub src: MacAddr6,
    pub code: Code,
    pub sid: u16,
    /// False when the Type nibble isn't 1. Logged as a warning by the
    /// caller but does not by itself block dispatch.
    pub type_ok: bool,
    pub tags: Tags<'a>,
}

impl<'a> DiscoveryFrame<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < ETH_HDR_LEN + PPPOE_HDR_LEN {
            return Err(FrameError::TooShort);
        }

        let dst = MacAddr6::from(<[u8; 6]>::try_from(&data[0..6]).unwrap());
        let src = MacAddr6::from(<[u8; 6]>::try_from(&data[6..12]).unwrap());

        let hdr = &data[ETH_HDR_LEN..];
        let ver_type = hdr[0];
        // Ver is the low nibble, Type the high nibble. Ver is enforced
        // strictly; Type is checked but deliberately NOT a parse failure:
        // a bad Type warns and the packet still dispatches, matching
        // observed deployments that mis-set Type but otherwise speak valid
        // PPPoE.
        let ver = ver_type & 0x0f;
        let typ = ver_type >> 4;
        if ver != 1 {
            return Err(FrameError::BadVersion(ver_type));
        }

        let code = Code::from(hdr[1]);
        let sid = u16::from_be_bytes([hdr[2], hdr[3]]);
        let length = u16::from_be_bytes([hdr[4], hdr[5]]) as usize;

        let payload = &data[ETH_HDR_LEN + PPPOE_HDR_LEN..];
        let tags = Tags::parse(payload, length)?;

        Ok(Self {
            dst,
            src,
            code,
            sid,
            type_ok: typ == 1,
            tags,
        })
    }
}

/// Incrementally builds a discovery frame into a caller-owned buffer.
pub struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    pub fn setup_header(code: Code, sid: u16, src: MacAddr6, dst: MacAddr6) -> Self {
        let mut buf = Vec::with_capacity(ETH_HDR_LEN + PPPOE_HDR_LEN);
        buf.extend_from_slice(dst.as_bytes());
        buf.extend_from_slice(src.as_bytes());
        buf.extend_from_slice(&ETHERTYPE_PPPOE_DISC.to_be_bytes());
        buf.push(0x11); // ver=1, type=1 packed
        buf.push(code.into());
        buf.extend_from_slice(&sid.to_be_bytes());
        buf.extend_from_slice(&[0, 0]); // length placeholder
        Self { buf }
    }

    pub fn add_tag(&mut self, ty: TagType, data: &[u8]) {
        let len: u16 = data.len().try_into().expect("tag data too large");
        self.buf.extend_from_slice(&u16::from(ty).to_be_bytes());
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(data);
        self.fixup_length();
    }

    pub fn copy_tag(&mut self, tag: &Tag<'_>) {
        self.add_tag(tag.ty, tag.data);
    }

    fn fixup_length(&mut self) {
        let payload_len = self.buf.len() - ETH_HDR_LEN - PPPOE_HDR_LEN;
        let len: u16 = payload_len.try_into().expect("pppoe payload too large");
        self.buf[ETH_HDR_LEN + 4..ETH_HDR_LEN + 6].copy_from_slice(&len.to_be_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(b: u8) -> MacAddr6 {
        MacAddr6::new(0x02, 0, 0, 0, 0, b)
    }

    #[test]
    fn round_trips_padi_with_service_name() {
        let mut fb = FrameBuilder::setup_header(Code::Padi, 0, mac(1), mac(0xff));
        fb.add_tag(TagType::ServiceName, b"isp-a");
        fb.add_tag(TagType::HostUniq, b"deadbeef");
        let bytes = fb.finish();

        let parsed = DiscoveryFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.code, Code::Padi);
        assert_eq!(parsed.sid, 0);
        let sn = parsed.tags.get(TagType::ServiceName).unwrap();
        assert_eq!(sn.data, b"isp-a");
        let hu = parsed.tags.get(TagType::HostUniq).unwrap();
        assert_eq!(hu.data, b"deadbeef");
    }

    #[test]
    fn rejects_frame_shorter_than_headers() {
        let short = [0u8; 10];
        assert!(matches!(
            DiscoveryFrame::parse(&short),
            Err(FrameError::TooShort)
        ));
    }

    #[test]
    fn rejects_declared_length_exceeding_payload() {
        let mut fb = FrameBuilder::setup_header(Code::Padi, 0, mac(1), mac(0xff));
        fb.add_tag(TagType::ServiceName, b"x");
        let mut bytes = fb.finish();
        // Lie about the length.
        let fake_len: u16 = 9000;
        bytes[ETH_HDR_LEN + 4..ETH_HDR_LEN + 6].copy_from_slice(&fake_len.to_be_bytes());

        assert!(matches!(
            DiscoveryFrame::parse(&bytes),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn parser_stops_at_declared_length_without_end_of_list() {
        // Many real clients omit END_OF_LIST; offset reaching declared
        // length must terminate cleanly rather than erroring.
        let mut fb = FrameBuilder::setup_header(Code::Padi, 0, mac(1), mac(0xff));
        fb.add_tag(TagType::ServiceName, b"isp-a");
        let bytes = fb.finish();
        let parsed = DiscoveryFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.tags.iter().count(), 1);
    }
}
