use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use lispbuf::{BufferError, ReadBuffer, Readable, WriteBuffer, Writeable};
use thiserror::Error;

use crate::{
    auth::AuthError,
    types::{record::apply_mask_len, Address, AddressError, LcafAddr, MappingRecord},
};

/// LISP control message types, the first four bits of every control
/// packet.
///
/// ### See
///
/// RFC 6833 - Section 4.2: https://datatracker.ietf.org/doc/html/rfc6833#section-4.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    MapRequest,
    MapReply,
    MapRegister,
    MapNotify,
    EncapControl,
    Info,
}

impl MessageType {
    pub fn to_u8(self) -> u8 {
        match self {
            MessageType::MapRequest => 1,
            MessageType::MapReply => 2,
            MessageType::MapRegister => 3,
            MessageType::MapNotify => 4,
            MessageType::EncapControl => 7,
            MessageType::Info => 8,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::MapRequest),
            2 => Ok(MessageType::MapReply),
            3 => Ok(MessageType::MapRegister),
            4 => Ok(MessageType::MapNotify),
            7 => Ok(MessageType::EncapControl),
            8 => Ok(MessageType::Info),
            _ => Err(MessageError::UnknownType(value)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Truncated message")]
    Truncated,

    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("Unknown message type ({0})")]
    UnknownType(u8),

    #[error("Map-Request must carry between 1 and 32 ITR-RLOCs, got {0}")]
    BadItrRlocCount(usize),

    #[error("Unknown inner IP version ({0})")]
    BadInnerIpVersion(u8),

    #[error("Inner header family does not match the carried addresses")]
    InnerHeaderMismatch,

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl From<BufferError> for MessageError {
    fn from(_: BufferError) -> Self {
        MessageError::Truncated
    }
}

/// Map-Request: resolution query, SMR carrier and RLOC-probe, depending
/// on flags.
///
/// ### See
///
/// RFC 6830 - Section 6.1.2: https://datatracker.ietf.org/doc/html/rfc6830#section-6.1.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRequest {
    pub authoritative: bool,
    /// P bit: this request is an RLOC-probe.
    pub probe: bool,
    /// S bit: this request solicits a Map-Request back (SMR).
    pub smr: bool,
    pub pitr: bool,
    /// s bit: this request was sent in response to an SMR.
    pub smr_invoked: bool,
    pub nonce: u64,
    pub source_eid: Address,
    /// RLOCs of the sender a Map-Reply may be addressed to; 1 to 32.
    pub itr_rlocs: Vec<Address>,
    /// Queried EID prefixes.
    pub eids: Vec<Address>,
    /// M bit payload: the sender's own mapping, piggybacked.
    pub map_data: Option<MappingRecord>,
}

impl MapRequest {
    pub fn new(source_eid: Address, itr_rlocs: Vec<Address>, eid: Address, nonce: u64) -> Self {
        Self {
            authoritative: false,
            probe: false,
            smr: false,
            pitr: false,
            smr_invoked: false,
            nonce,
            source_eid,
            itr_rlocs,
            eids: vec![eid],
            map_data: None,
        }
    }
}

impl Readable for MapRequest {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let word = u32::read(buf)?;
        let irc = ((word >> 8) & 0x1f) as usize;
        let record_count = (word & 0xff) as usize;
        let nonce = u64::read(buf)?;

        let source_eid = Address::read(buf)?;

        let mut itr_rlocs = Vec::with_capacity(irc + 1);
        for _ in 0..=irc {
            itr_rlocs.push(Address::read(buf)?);
        }

        let mut eids = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            buf.skip()?; // Reserved
            let mask_len = u8::read(buf)?;
            eids.push(apply_mask_len(Address::read(buf)?, mask_len)?);
        }

        let map_data = if word & (1 << 26) != 0 {
            Some(MappingRecord::read(buf)?)
        } else {
            None
        };

        Ok(Self {
            authoritative: word & (1 << 27) != 0,
            probe: word & (1 << 25) != 0,
            smr: word & (1 << 24) != 0,
            pitr: word & (1 << 23) != 0,
            smr_invoked: word & (1 << 22) != 0,
            nonce,
            source_eid,
            itr_rlocs,
            eids,
            map_data,
        })
    }
}

impl Writeable for MapRequest {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        if self.itr_rlocs.is_empty() || self.itr_rlocs.len() > 32 {
            return Err(MessageError::BadItrRlocCount(self.itr_rlocs.len()));
        }

        let mut word = (MessageType::MapRequest.to_u8() as u32) << 28;
        if self.authoritative {
            word |= 1 << 27;
        }
        if self.map_data.is_some() {
            word |= 1 << 26;
        }
        if self.probe {
            word |= 1 << 25;
        }
        if self.smr {
            word |= 1 << 24;
        }
        if self.pitr {
            word |= 1 << 23;
        }
        if self.smr_invoked {
            word |= 1 << 22;
        }
        word |= ((self.itr_rlocs.len() as u32 - 1) & 0x1f) << 8;
        word |= self.eids.len() as u32 & 0xff;

        let mut n = word.write(buf)?;
        n += self.nonce.write(buf)?;
        n += self.source_eid.write(buf)?;

        for rloc in &self.itr_rlocs {
            n += rloc.write(buf)?;
        }
        for eid in &self.eids {
            n += 0u8.write(buf)?; // Reserved
            n += eid.plen().unwrap_or(0).write(buf)?;
            n += eid.write(buf)?;
        }
        if let Some(rec) = &self.map_data {
            n += rec.write(buf)?;
        }
        Ok(n)
    }
}

/// Map-Reply: resolution answer, probe answer when the P bit echoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapReply {
    pub probe: bool,
    pub echo_nonce_capable: bool,
    pub security: bool,
    pub nonce: u64,
    pub records: Vec<MappingRecord>,
}

impl Readable for MapReply {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let word = u32::read(buf)?;
        let record_count = (word & 0xff) as usize;
        let nonce = u64::read(buf)?;

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            records.push(MappingRecord::read(buf)?);
        }

        Ok(Self {
            probe: word & (1 << 27) != 0,
            echo_nonce_capable: word & (1 << 26) != 0,
            security: word & (1 << 25) != 0,
            nonce,
            records,
        })
    }
}

impl Writeable for MapReply {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut word = (MessageType::MapReply.to_u8() as u32) << 28;
        if self.probe {
            word |= 1 << 27;
        }
        if self.echo_nonce_capable {
            word |= 1 << 26;
        }
        if self.security {
            word |= 1 << 25;
        }
        word |= self.records.len() as u32 & 0xff;

        let mut n = word.write(buf)?;
        n += self.nonce.write(buf)?;
        for rec in &self.records {
            n += rec.write(buf)?;
        }
        Ok(n)
    }
}

/// Map-Register: an ETR's authenticated claim over its EID-prefixes.
///
/// ### See
///
/// RFC 6833 - Section 4.3: https://datatracker.ietf.org/doc/html/rfc6833#section-4.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRegister {
    /// P bit: ask the Map-Server to proxy-reply for us.
    pub proxy_reply: bool,
    /// M bit: ask for a Map-Notify acknowledgment.
    pub want_notify: bool,
    pub nonce: u64,
    pub key_id: u16,
    pub auth_data: Vec<u8>,
    pub records: Vec<MappingRecord>,
}

impl Readable for MapRegister {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let word = u32::read(buf)?;
        let record_count = (word & 0xff) as usize;
        let nonce = u64::read(buf)?;
        let key_id = u16::read(buf)?;
        let auth_len = u16::read(buf)? as usize;
        let auth_data = buf.read_vec(auth_len)?;

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            records.push(MappingRecord::read(buf)?);
        }

        Ok(Self {
            proxy_reply: word & (1 << 27) != 0,
            want_notify: word & (1 << 8) != 0,
            nonce,
            key_id,
            auth_data,
            records,
        })
    }
}

impl Writeable for MapRegister {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut word = (MessageType::MapRegister.to_u8() as u32) << 28;
        if self.proxy_reply {
            word |= 1 << 27;
        }
        if self.want_notify {
            word |= 1 << 8;
        }
        word |= self.records.len() as u32 & 0xff;

        let mut n = word.write(buf)?;
        n += self.nonce.write(buf)?;
        n += self.key_id.write(buf)?;
        n += (self.auth_data.len() as u16).write(buf)?;
        n += buf.write_slice(&self.auth_data)?;
        for rec in &self.records {
            n += rec.write(buf)?;
        }
        Ok(n)
    }
}

/// Map-Notify: the Map-Server's authenticated acknowledgment of a
/// registration. Same body as Map-Register without the request bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapNotify {
    pub nonce: u64,
    pub key_id: u16,
    pub auth_data: Vec<u8>,
    pub records: Vec<MappingRecord>,
}

impl Readable for MapNotify {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let word = u32::read(buf)?;
        let record_count = (word & 0xff) as usize;
        let nonce = u64::read(buf)?;
        let key_id = u16::read(buf)?;
        let auth_len = u16::read(buf)? as usize;
        let auth_data = buf.read_vec(auth_len)?;

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            records.push(MappingRecord::read(buf)?);
        }

        Ok(Self {
            nonce,
            key_id,
            auth_data,
            records,
        })
    }
}

impl Writeable for MapNotify {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let word =
            ((MessageType::MapNotify.to_u8() as u32) << 28) | (self.records.len() as u32 & 0xff);

        let mut n = word.write(buf)?;
        n += self.nonce.write(buf)?;
        n += self.key_id.write(buf)?;
        n += (self.auth_data.len() as u16).write(buf)?;
        n += buf.write_slice(&self.auth_data)?;
        for rec in &self.records {
            n += rec.write(buf)?;
        }
        Ok(n)
    }
}

/// Encapsulated Control Message: a control message tunneled inside
/// minimal IP/UDP headers, used to forward Map-Requests through the
/// mapping system toward an ETR.
///
/// ### See
///
/// RFC 6830 - Section 6.1.8: https://datatracker.ietf.org/doc/html/rfc6830#section-6.1.8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapControl {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl Readable for EncapControl {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let _word = u32::read(buf)?;

        let version = match buf.peek() {
            Some(b) => b >> 4,
            None => return Err(MessageError::Truncated),
        };

        let (src, dst) = match version {
            4 => {
                let ihl = (buf.peek().unwrap_or(0x45) & 0x0f) as usize * 4;
                let header = buf.read_slice(ihl.max(20))?;
                let src: [u8; 4] = header[12..16].try_into().map_err(|_| MessageError::Truncated)?;
                let dst: [u8; 4] = header[16..20].try_into().map_err(|_| MessageError::Truncated)?;
                (
                    IpAddr::V4(Ipv4Addr::from(src)),
                    IpAddr::V4(Ipv4Addr::from(dst)),
                )
            }
            6 => {
                let header = buf.read_slice(40)?;
                let src: [u8; 16] = header[8..24].try_into().map_err(|_| MessageError::Truncated)?;
                let dst: [u8; 16] = header[24..40].try_into().map_err(|_| MessageError::Truncated)?;
                (
                    IpAddr::V6(Ipv6Addr::from(src)),
                    IpAddr::V6(Ipv6Addr::from(dst)),
                )
            }
            other => return Err(MessageError::BadInnerIpVersion(other)),
        };

        let src_port = u16::read(buf)?;
        let dst_port = u16::read(buf)?;
        let udp_len = u16::read(buf)? as usize;
        buf.skipn(2)?; // UDP checksum
        let payload = buf.read_vec(udp_len.saturating_sub(8))?;

        Ok(Self {
            src,
            dst,
            src_port,
            dst_port,
            payload,
        })
    }
}

impl Writeable for EncapControl {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let word = (MessageType::EncapControl.to_u8() as u32) << 28;
        let mut n = word.write(buf)?;

        let udp_len = 8 + self.payload.len();

        n += match (self.src, self.dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => {
                let mut hdr = [0u8; 20];
                hdr[0] = 0x45;
                hdr[2..4].copy_from_slice(&((20 + udp_len) as u16).to_be_bytes());
                hdr[8] = 64; // TTL
                hdr[9] = 17; // UDP
                hdr[12..16].copy_from_slice(&src.octets());
                hdr[16..20].copy_from_slice(&dst.octets());
                let csum = ipv4_header_checksum(&hdr);
                hdr[10..12].copy_from_slice(&csum.to_be_bytes());
                buf.write_slice(&hdr)?
            }
            (IpAddr::V6(src), IpAddr::V6(dst)) => {
                let mut hdr = [0u8; 40];
                hdr[0] = 0x60;
                hdr[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
                hdr[6] = 17; // UDP
                hdr[7] = 64; // Hop limit
                hdr[8..24].copy_from_slice(&src.octets());
                hdr[24..40].copy_from_slice(&dst.octets());
                buf.write_slice(&hdr)?
            }
            _ => return Err(MessageError::InnerHeaderMismatch),
        };

        n += self.src_port.write(buf)?;
        n += self.dst_port.write(buf)?;
        n += (udp_len as u16).write(buf)?;
        n += 0u16.write(buf)?; // UDP checksum left to the stack
        n += buf.write_slice(&self.payload)?;
        Ok(n)
    }
}

fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in header.chunks(2) {
        let word = u16::from_be_bytes([chunk[0], *chunk.get(1).unwrap_or(&0)]);
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Info-Request / Info-Reply, the NAT-traversal exchange with a
/// Map-Server. A reply carries a NAT-Traversal LCAF; a request carries
/// AFI 0 in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    pub nonce: u64,
    pub key_id: u16,
    pub auth_data: Vec<u8>,
    pub ttl: u32,
    pub eid: Address,
    /// `Some` makes this an Info-Reply (R bit set).
    pub nat: Option<LcafAddr>,
}

impl InfoMessage {
    pub fn is_reply(&self) -> bool {
        self.nat.is_some()
    }
}

impl Readable for InfoMessage {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let word = u32::read(buf)?;
        let reply = word & (1 << 27) != 0;
        let nonce = u64::read(buf)?;
        let key_id = u16::read(buf)?;
        let auth_len = u16::read(buf)? as usize;
        let auth_data = buf.read_vec(auth_len)?;
        let ttl = u32::read(buf)?;
        buf.skip()?; // Reserved
        let mask_len = u8::read(buf)?;
        let eid = apply_mask_len(Address::read(buf)?, mask_len)?;

        let nat = if reply {
            match Address::read(buf)? {
                Address::Lcaf(lcaf) => Some(lcaf),
                _ => return Err(MessageError::InnerHeaderMismatch),
            }
        } else {
            // Request: an empty AFI terminates the message.
            let _ = Address::read(buf)?;
            None
        };

        Ok(Self {
            nonce,
            key_id,
            auth_data,
            ttl,
            eid,
            nat,
        })
    }
}

impl Writeable for InfoMessage {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut word = (MessageType::Info.to_u8() as u32) << 28;
        if self.nat.is_some() {
            word |= 1 << 27;
        }

        let mut n = word.write(buf)?;
        n += self.nonce.write(buf)?;
        n += self.key_id.write(buf)?;
        n += (self.auth_data.len() as u16).write(buf)?;
        n += buf.write_slice(&self.auth_data)?;
        n += self.ttl.write(buf)?;
        n += 0u8.write(buf)?; // Reserved
        n += self.eid.plen().unwrap_or(0).write(buf)?;
        n += self.eid.write(buf)?;

        n += match &self.nat {
            Some(lcaf) => Address::Lcaf(lcaf.clone()).write(buf)?,
            None => Address::NoAddr.write(buf)?,
        };
        Ok(n)
    }
}

/// Any inbound control packet, dispatched on the type nibble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    MapRequest(MapRequest),
    MapReply(MapReply),
    MapRegister(MapRegister),
    MapNotify(MapNotify),
    EncapControl(EncapControl),
    Info(InfoMessage),
}

impl ControlMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            ControlMessage::MapRequest(_) => MessageType::MapRequest,
            ControlMessage::MapReply(_) => MessageType::MapReply,
            ControlMessage::MapRegister(_) => MessageType::MapRegister,
            ControlMessage::MapNotify(_) => MessageType::MapNotify,
            ControlMessage::EncapControl(_) => MessageType::EncapControl,
            ControlMessage::Info(_) => MessageType::Info,
        }
    }

    /// The type nibble of a raw packet, before any real parsing.
    pub fn peek_type(raw: &[u8]) -> Result<MessageType, MessageError> {
        match raw.first() {
            Some(b) => MessageType::try_from(b >> 4),
            None => Err(MessageError::Truncated),
        }
    }
}

impl Readable for ControlMessage {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let msg_type = match buf.peek() {
            Some(b) => MessageType::try_from(b >> 4)?,
            None => return Err(MessageError::Truncated),
        };

        Ok(match msg_type {
            MessageType::MapRequest => ControlMessage::MapRequest(MapRequest::read(buf)?),
            MessageType::MapReply => ControlMessage::MapReply(MapReply::read(buf)?),
            MessageType::MapRegister => ControlMessage::MapRegister(MapRegister::read(buf)?),
            MessageType::MapNotify => ControlMessage::MapNotify(MapNotify::read(buf)?),
            MessageType::EncapControl => ControlMessage::EncapControl(EncapControl::read(buf)?),
            MessageType::Info => ControlMessage::Info(InfoMessage::read(buf)?),
        })
    }
}

impl Writeable for ControlMessage {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        match self {
            ControlMessage::MapRequest(m) => m.write(buf),
            ControlMessage::MapReply(m) => m.write(buf),
            ControlMessage::MapRegister(m) => m.write(buf),
            ControlMessage::MapNotify(m) => m.write(buf),
            ControlMessage::EncapControl(m) => m.write(buf),
            ControlMessage::Info(m) => m.write(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MapAction;

    fn roundtrip(msg: ControlMessage) {
        let mut out = WriteBuffer::new();
        msg.write(&mut out).unwrap();

        let mut buf = ReadBuffer::new(out.bytes());
        assert_eq!(ControlMessage::read(&mut buf).unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_map_request() {
        let mut req = MapRequest::new(
            "10.1.1.1".parse().unwrap(),
            vec!["192.0.2.1".parse().unwrap(), "2001:db8::1".parse().unwrap()],
            "203.0.113.0/24".parse().unwrap(),
            0xdeadbeefcafef00d,
        );
        req.smr_invoked = true;

        roundtrip(ControlMessage::MapRequest(req));
    }

    #[test]
    fn roundtrip_probe_reply() {
        roundtrip(ControlMessage::MapReply(MapReply {
            probe: true,
            echo_nonce_capable: false,
            security: false,
            nonce: 7,
            records: vec![MappingRecord::negative(
                "203.0.113.0/24".parse().unwrap(),
                15,
                MapAction::NativelyForward,
            )],
        }));
    }

    #[test]
    fn roundtrip_map_register() {
        roundtrip(ControlMessage::MapRegister(MapRegister {
            proxy_reply: true,
            want_notify: true,
            nonce: 99,
            key_id: 1,
            auth_data: vec![0; 12],
            records: vec![MappingRecord::negative(
                "10.0.0.0/24".parse().unwrap(),
                10,
                MapAction::NoAction,
            )],
        }));
    }

    #[test]
    fn roundtrip_encapsulated_request() {
        let inner = {
            let req = MapRequest::new(
                "10.1.1.1".parse().unwrap(),
                vec!["192.0.2.1".parse().unwrap()],
                "203.0.113.0/24".parse().unwrap(),
                1234,
            );
            let mut b = WriteBuffer::new();
            req.write(&mut b).unwrap();
            b.into_bytes()
        };

        roundtrip(ControlMessage::EncapControl(EncapControl {
            src: "10.1.1.1".parse().unwrap(),
            dst: "192.0.2.9".parse().unwrap(),
            src_port: 4342,
            dst_port: 4342,
            payload: inner,
        }));
    }

    #[test]
    fn roundtrip_info_request_and_reply() {
        let request = InfoMessage {
            nonce: 5,
            key_id: 1,
            auth_data: vec![0; 12],
            ttl: 60,
            eid: "10.0.0.0/24".parse().unwrap(),
            nat: None,
        };
        roundtrip(ControlMessage::Info(request));

        let reply = InfoMessage {
            nonce: 5,
            key_id: 1,
            auth_data: vec![0; 12],
            ttl: 60,
            eid: "10.0.0.0/24".parse().unwrap(),
            nat: Some(LcafAddr::NatTraversal {
                ms_udp_port: 4342,
                etr_udp_port: 34000,
                global_etr_rloc: Box::new("198.51.100.1".parse().unwrap()),
                ms_rloc: Box::new("192.0.2.1".parse().unwrap()),
                private_etr_rloc: Box::new("10.0.0.1".parse().unwrap()),
                rtr_rlocs: vec!["203.0.113.9".parse().unwrap()],
            }),
        };
        roundtrip(ControlMessage::Info(reply));
    }

    #[test]
    fn unknown_type_rejected() {
        let raw = [0x90u8, 0, 0, 0];
        let mut buf = ReadBuffer::new(&raw);

        assert_eq!(
            ControlMessage::read(&mut buf),
            Err(MessageError::UnknownType(9))
        );
    }
}
