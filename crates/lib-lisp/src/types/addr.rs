use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use lispbuf::{BufferError, ReadBuffer, Readable, WriteBuffer, Writeable};
use thiserror::Error;

use crate::types::lcaf::LcafAddr;

/// IANA address family identifiers the control plane understands, plus the
/// LISP Canonical Address Format container.
///
/// ### See
///
/// RFC 6830 - Section 6.1: https://datatracker.ietf.org/doc/html/rfc6830#section-6.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Afi {
    NoAddr,
    Ipv4,
    Ipv6,
    Lcaf,
}

impl Afi {
    pub fn to_u16(self) -> u16 {
        match self {
            Afi::NoAddr => 0,
            Afi::Ipv4 => 1,
            Afi::Ipv6 => 2,
            Afi::Lcaf => 16387,
        }
    }
}

impl TryFrom<u16> for Afi {
    type Error = AddressError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Afi::NoAddr),
            1 => Ok(Afi::Ipv4),
            2 => Ok(Afi::Ipv6),
            16387 => Ok(Afi::Lcaf),
            _ => Err(AddressError::UnknownAfi(value)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Truncated address")]
    Truncated,

    #[error("Unknown AFI ({0})")]
    UnknownAfi(u16),

    #[error("Unknown LCAF type ({0})")]
    UnknownLcafType(u8),

    #[error("LCAF length mismatch: header says {expected}, payload is {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Address is not a prefix")]
    NotAPrefix,

    #[error("Cannot parse address from '{0}'")]
    Parse(String),
}

impl From<BufferError> for AddressError {
    fn from(_: BufferError) -> Self {
        AddressError::Truncated
    }
}

/// A LISP address: nothing, an IP host, an IP prefix, or an LCAF
/// extension. EIDs and RLOCs are both represented by this type; a
/// mapping's EID is always the prefix or LCAF form.
///
/// On the wire a prefix is carried as a bare AFI-encoded address. The mask
/// length lives in the enclosing record, so [`Address::read`] never
/// produces the `IpPrefix` variant by itself; record codecs combine the
/// two.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Address {
    NoAddr,
    Ip(IpAddr),
    IpPrefix(IpAddr, u8),
    Lcaf(LcafAddr),
}

impl Address {
    pub fn afi(&self) -> Afi {
        match self {
            Address::NoAddr => Afi::NoAddr,
            Address::Ip(_) | Address::IpPrefix(..) => self
                .ip()
                .map(|ip| if ip.is_ipv4() { Afi::Ipv4 } else { Afi::Ipv6 })
                .unwrap_or(Afi::NoAddr),
            Address::Lcaf(_) => Afi::Lcaf,
        }
    }

    /// The IP leaf of this address, traversing LCAF wrappers. `None` when
    /// no leaf is an IP.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::NoAddr => None,
            Address::Ip(ip) | Address::IpPrefix(ip, _) => Some(*ip),
            Address::Lcaf(lcaf) => lcaf.ip(),
        }
    }

    /// The address family of the IP leaf, if there is one. LCAF locators
    /// contribute their leaf family to the balancing vectors.
    pub fn ip_afi(&self) -> Option<Afi> {
        self.ip()
            .map(|ip| if ip.is_ipv4() { Afi::Ipv4 } else { Afi::Ipv6 })
    }

    pub fn is_ip_bearing(&self) -> bool {
        self.ip().is_some()
    }

    pub fn is_prefix(&self) -> bool {
        match self {
            Address::IpPrefix(..) => true,
            Address::Lcaf(lcaf) => lcaf.address().map(Address::is_prefix).unwrap_or(false),
            _ => false,
        }
    }

    /// The prefix length. A host address reports its full width.
    pub fn plen(&self) -> Option<u8> {
        match self {
            Address::NoAddr => None,
            Address::Ip(IpAddr::V4(_)) => Some(32),
            Address::Ip(IpAddr::V6(_)) => Some(128),
            Address::IpPrefix(_, plen) => Some(*plen),
            Address::Lcaf(lcaf) => lcaf.address().and_then(Address::plen),
        }
    }

    /// The instance-ID this address is scoped to. Addresses outside any
    /// instance-ID LCAF live in instance 0.
    pub fn instance_id(&self) -> u32 {
        match self {
            Address::Lcaf(LcafAddr::InstanceId { iid, .. }) => *iid,
            _ => 0,
        }
    }

    /// Widen a host address into the prefix covering exactly that host.
    pub fn into_prefix(self) -> Address {
        match self {
            Address::Ip(ip @ IpAddr::V4(_)) => Address::IpPrefix(ip, 32),
            Address::Ip(ip @ IpAddr::V6(_)) => Address::IpPrefix(ip, 128),
            Address::Lcaf(LcafAddr::InstanceId { iid, mlen, address }) => {
                Address::Lcaf(LcafAddr::InstanceId {
                    iid,
                    mlen,
                    address: Box::new(address.into_prefix()),
                })
            }
            other => other,
        }
    }

    /// Mask the host bits of a prefix so two spellings of the same prefix
    /// compare equal. Every EID entering a database goes through this.
    pub fn normalize(&self) -> Address {
        match self {
            Address::IpPrefix(ip, plen) => Address::IpPrefix(mask_host_bits(*ip, *plen), *plen),
            Address::Lcaf(LcafAddr::InstanceId { iid, mlen, address }) => {
                Address::Lcaf(LcafAddr::InstanceId {
                    iid: *iid,
                    mlen: *mlen,
                    address: Box::new(address.normalize()),
                })
            }
            other => other.clone(),
        }
    }

    /// True when `addr` falls inside this prefix (same instance-ID scope).
    pub fn covers(&self, addr: &Address) -> bool {
        if self.instance_id() != addr.instance_id() {
            return false;
        }

        let (Some(net), Some(plen)) = (self.ip(), self.plen()) else {
            return false;
        };
        let Some(ip) = addr.ip() else {
            return false;
        };

        match (net, ip) {
            (IpAddr::V4(n), IpAddr::V4(h)) => {
                let plen = plen.min(32) as u32;
                let mask = if plen == 0 { 0 } else { u32::MAX << (32 - plen) };
                u32::from(n) & mask == u32::from(h) & mask
            }
            (IpAddr::V6(n), IpAddr::V6(h)) => {
                let plen = plen.min(128) as u32;
                let mask = if plen == 0 {
                    0
                } else {
                    u128::MAX << (128 - plen)
                };
                u128::from(n) & mask == u128::from(h) & mask
            }
            _ => false,
        }
    }

    /// Bytes this address occupies when written, AFI field included.
    pub fn size_to_write(&self) -> usize {
        match self {
            Address::NoAddr => 2,
            Address::Ip(IpAddr::V4(_)) | Address::IpPrefix(IpAddr::V4(_), _) => 2 + 4,
            Address::Ip(IpAddr::V6(_)) | Address::IpPrefix(IpAddr::V6(_), _) => 2 + 16,
            Address::Lcaf(lcaf) => 2 + 6 + lcaf.payload_len(),
        }
    }
}

impl Readable for Address {
    type Error = AddressError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let afi = Afi::try_from(u16::read(buf)?)?;

        match afi {
            Afi::NoAddr => Ok(Address::NoAddr),
            Afi::Ipv4 => {
                let octets: [u8; 4] = buf.read_array()?;
                Ok(Address::Ip(IpAddr::V4(Ipv4Addr::from(octets))))
            }
            Afi::Ipv6 => {
                let octets: [u8; 16] = buf.read_array()?;
                Ok(Address::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            Afi::Lcaf => Ok(Address::Lcaf(LcafAddr::read(buf)?)),
        }
    }
}

impl Writeable for Address {
    type Error = AddressError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut n = self.afi().to_u16().write(buf)?;

        n += match self {
            Address::NoAddr => 0,
            Address::Ip(ip) | Address::IpPrefix(ip, _) => match ip {
                IpAddr::V4(v4) => buf.write_slice(&v4.octets())?,
                IpAddr::V6(v6) => buf.write_slice(&v6.octets())?,
            },
            Address::Lcaf(lcaf) => lcaf.write(buf)?,
        };

        Ok(n)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::NoAddr => write!(f, "no-addr"),
            Address::Ip(ip) => write!(f, "{ip}"),
            Address::IpPrefix(ip, plen) => write!(f, "{ip}/{plen}"),
            Address::Lcaf(lcaf) => write!(f, "{lcaf}"),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || AddressError::Parse(s.to_string());

        // Instance-ID scope: "[iid/42]10.0.0.0/8"
        if let Some(rest) = s.strip_prefix("[iid/") {
            let (iid, addr) = rest.split_once(']').ok_or_else(parse_err)?;
            let iid: u32 = iid.parse().map_err(|_| parse_err())?;
            let inner: Address = addr.parse()?;
            let mlen = match inner {
                Address::IpPrefix(_, plen) => plen,
                _ => 0,
            };

            return Ok(Address::Lcaf(LcafAddr::InstanceId {
                iid,
                mlen,
                address: Box::new(inner),
            }));
        }

        match s.split_once('/') {
            Some((ip, plen)) => {
                let ip: IpAddr = ip.parse().map_err(|_| parse_err())?;
                let plen: u8 = plen.parse().map_err(|_| parse_err())?;
                let max = if ip.is_ipv4() { 32 } else { 128 };
                if plen > max {
                    return Err(parse_err());
                }
                Ok(Address::IpPrefix(ip, plen))
            }
            None => {
                let ip: IpAddr = s.parse().map_err(|_| parse_err())?;
                Ok(Address::Ip(ip))
            }
        }
    }
}

fn mask_host_bits(ip: IpAddr, plen: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let plen = plen.min(32) as u32;
            let mask = if plen == 0 { 0 } else { u32::MAX << (32 - plen) };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let plen = plen.min(128) as u32;
            let mask = if plen == 0 {
                0
            } else {
                u128::MAX << (128 - plen)
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_ipv4() {
        let addr: Address = "192.0.2.1".parse().unwrap();

        let mut out = WriteBuffer::new();
        let n = addr.write(&mut out).unwrap();
        assert_eq!(n, addr.size_to_write());

        let mut buf = ReadBuffer::new(out.bytes());
        assert_eq!(Address::read(&mut buf).unwrap(), addr);
    }

    #[test]
    fn roundtrip_ipv6() {
        let addr: Address = "2001:db8::1".parse().unwrap();

        let mut out = WriteBuffer::new();
        addr.write(&mut out).unwrap();

        let mut buf = ReadBuffer::new(out.bytes());
        assert_eq!(Address::read(&mut buf).unwrap(), addr);
    }

    #[test]
    fn prefix_writes_bare_address() {
        let pref: Address = "10.0.0.0/8".parse().unwrap();
        let host: Address = "10.0.0.0".parse().unwrap();

        let mut a = WriteBuffer::new();
        let mut b = WriteBuffer::new();
        pref.write(&mut a).unwrap();
        host.write(&mut b).unwrap();

        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn display_forms() {
        assert_eq!("1.2.3.0/24".parse::<Address>().unwrap().to_string(), "1.2.3.0/24");

        let scoped: Address = "[iid/42]10.0.0.0/8".parse().unwrap();
        assert_eq!(scoped.to_string(), "[iid/42]10.0.0.0/8");
        assert_eq!(scoped.instance_id(), 42);
        assert_eq!(scoped.plen(), Some(8));
    }

    #[test]
    fn normalize_masks_host_bits() {
        let sloppy: Address = "10.1.2.3/8".parse().unwrap();
        let clean: Address = "10.0.0.0/8".parse().unwrap();

        assert_eq!(sloppy.normalize(), clean);
        assert_eq!(
            "2001:db8::beef/32".parse::<Address>().unwrap().normalize(),
            "2001:db8::/32".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn covers_respects_instance_id() {
        let pref: Address = "[iid/7]10.0.0.0/8".parse().unwrap();
        let inside: Address = "[iid/7]10.9.9.9".parse().unwrap();
        let wrong_iid: Address = "10.9.9.9".parse().unwrap();

        assert!(pref.covers(&inside));
        assert!(!pref.covers(&wrong_iid));
    }

    #[test]
    fn unknown_afi_rejected() {
        let bytes = [0x00, 0x05, 1, 2, 3, 4];
        let mut buf = ReadBuffer::new(&bytes);

        assert_eq!(Address::read(&mut buf), Err(AddressError::UnknownAfi(5)));
    }

    #[test]
    fn truncated_rejected() {
        let bytes = [0x00, 0x01, 1, 2];
        let mut buf = ReadBuffer::new(&bytes);

        assert_eq!(Address::read(&mut buf), Err(AddressError::Truncated));
    }
}
