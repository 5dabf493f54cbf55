use std::{fmt::Display, net::IpAddr};

use lispbuf::{ReadBuffer, Readable, WriteBuffer, Writeable};

use crate::types::addr::{Address, AddressError};

const ELP_LOOKUP_BIT: u16 = 0x0004;
const ELP_PROBE_BIT: u16 = 0x0002;
const ELP_STRICT_BIT: u16 = 0x0001;

/// LISP Canonical Address Format payloads.
///
/// The enclosing AFI (16387) is consumed by [`Address::read`]; this type
/// covers the 6-byte LCAF header (reserved, flags, type, reserved, length)
/// and the type-specific body.
///
/// ### See
///
/// RFC 8060: https://datatracker.ietf.org/doc/html/rfc8060
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LcafAddr {
    /// Type 1. A list of addresses of mixed families for one location.
    AfiList(Vec<Address>),

    /// Type 2. Scopes the wrapped address to a virtual network instance.
    /// `mlen` is the prefix length of the wrapped address, carried in the
    /// header's second reserved octet; 0 when the inner address is a host.
    InstanceId {
        iid: u32,
        mlen: u8,
        address: Box<Address>,
    },

    /// Type 4. Per-application forwarding criteria attached to an address.
    AppData {
        ip_tos: u32,
        protocol: u8,
        local_port_low: u16,
        local_port_high: u16,
        remote_port_low: u16,
        remote_port_high: u16,
        address: Box<Address>,
    },

    /// Type 7. NAT traversal state carried in Info-Reply messages.
    NatTraversal {
        ms_udp_port: u16,
        etr_udp_port: u16,
        global_etr_rloc: Box<Address>,
        ms_rloc: Box<Address>,
        private_etr_rloc: Box<Address>,
        rtr_rlocs: Vec<Address>,
    },

    /// Type 9. Multicast channel info: (S, G) with mask lengths, scoped
    /// to an instance.
    Mcinfo {
        iid: u32,
        source_mlen: u8,
        group_mlen: u8,
        source: Box<Address>,
        group: Box<Address>,
    },

    /// Type 10. Explicit locator path: an ordered list of re-encapsulation
    /// hops.
    Elp(Vec<ElpHop>),

    /// Type 13. Replication list entries for overlay multicast.
    Rle(Vec<RleNode>),

    /// Type 15. An opaque key/value pair of addresses.
    KeyValue {
        key: Box<Address>,
        value: Box<Address>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElpHop {
    pub lookup: bool,
    pub rloc_probe: bool,
    pub strict: bool,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RleNode {
    pub level: u8,
    pub address: Address,
}

impl LcafAddr {
    pub fn lcaf_type(&self) -> u8 {
        match self {
            LcafAddr::AfiList(_) => 1,
            LcafAddr::InstanceId { .. } => 2,
            LcafAddr::AppData { .. } => 4,
            LcafAddr::NatTraversal { .. } => 7,
            LcafAddr::Mcinfo { .. } => 9,
            LcafAddr::Elp(_) => 10,
            LcafAddr::Rle(_) => 13,
            LcafAddr::KeyValue { .. } => 15,
        }
    }

    /// The wrapped address, for container-like types.
    pub fn address(&self) -> Option<&Address> {
        match self {
            LcafAddr::InstanceId { address, .. } => Some(address),
            LcafAddr::AppData { address, .. } => Some(address),
            _ => None,
        }
    }

    /// The IP leaf used when this address has to be routed toward.
    /// An ELP forwards toward its last hop, a NAT-traversal address toward
    /// the global ETR RLOC.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            LcafAddr::AfiList(list) => list.iter().find_map(Address::ip),
            LcafAddr::InstanceId { address, .. } => address.ip(),
            LcafAddr::AppData { address, .. } => address.ip(),
            LcafAddr::NatTraversal {
                global_etr_rloc, ..
            } => global_etr_rloc.ip(),
            LcafAddr::Mcinfo { group, .. } => group.ip(),
            LcafAddr::Elp(hops) => hops.last().and_then(|h| h.address.ip()),
            LcafAddr::Rle(nodes) => nodes.last().and_then(|n| n.address.ip()),
            LcafAddr::KeyValue { value, .. } => value.ip(),
        }
    }

    /// Length in bytes of the type-specific body, as carried in the LCAF
    /// header length field.
    pub fn payload_len(&self) -> usize {
        match self {
            LcafAddr::AfiList(list) => list.iter().map(Address::size_to_write).sum(),
            LcafAddr::InstanceId { address, .. } => 4 + address.size_to_write(),
            LcafAddr::AppData { address, .. } => 12 + address.size_to_write(),
            LcafAddr::NatTraversal {
                global_etr_rloc,
                ms_rloc,
                private_etr_rloc,
                rtr_rlocs,
                ..
            } => {
                4 + global_etr_rloc.size_to_write()
                    + ms_rloc.size_to_write()
                    + private_etr_rloc.size_to_write()
                    + rtr_rlocs.iter().map(Address::size_to_write).sum::<usize>()
            }
            LcafAddr::Mcinfo { source, group, .. } => {
                8 + source.size_to_write() + group.size_to_write()
            }
            LcafAddr::Elp(hops) => hops
                .iter()
                .map(|h| 2 + h.address.size_to_write())
                .sum(),
            LcafAddr::Rle(nodes) => nodes
                .iter()
                .map(|n| 4 + n.address.size_to_write())
                .sum(),
            LcafAddr::KeyValue { key, value } => key.size_to_write() + value.size_to_write(),
        }
    }
}

impl Readable for LcafAddr {
    type Error = AddressError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        buf.skip()?; // Rsvd1
        buf.skip()?; // Flags
        let lcaf_type = u8::read(buf)?;
        let rsvd2 = u8::read(buf)?;
        let length = u16::read(buf)? as usize;

        let payload = buf.read_slice(length)?;
        let mut body = ReadBuffer::new(payload);

        let addr = match lcaf_type {
            1 => {
                let mut list = Vec::new();
                while !body.is_empty() {
                    list.push(Address::read(&mut body)?);
                }
                LcafAddr::AfiList(list)
            }
            2 => {
                let iid = u32::read(&mut body)?;
                let mut address = Address::read(&mut body)?;
                if rsvd2 > 0 {
                    if let Address::Ip(ip) = address {
                        address = Address::IpPrefix(ip, rsvd2);
                    }
                }
                LcafAddr::InstanceId {
                    iid,
                    mlen: rsvd2,
                    address: Box::new(address),
                }
            }
            4 => {
                let tos_proto = u32::read(&mut body)?;
                LcafAddr::AppData {
                    ip_tos: tos_proto >> 8,
                    protocol: (tos_proto & 0xff) as u8,
                    local_port_low: u16::read(&mut body)?,
                    local_port_high: u16::read(&mut body)?,
                    remote_port_low: u16::read(&mut body)?,
                    remote_port_high: u16::read(&mut body)?,
                    address: Box::new(Address::read(&mut body)?),
                }
            }
            7 => {
                let ms_udp_port = u16::read(&mut body)?;
                let etr_udp_port = u16::read(&mut body)?;
                let global_etr_rloc = Box::new(Address::read(&mut body)?);
                let ms_rloc = Box::new(Address::read(&mut body)?);
                let private_etr_rloc = Box::new(Address::read(&mut body)?);
                let mut rtr_rlocs = Vec::new();
                while !body.is_empty() {
                    rtr_rlocs.push(Address::read(&mut body)?);
                }
                LcafAddr::NatTraversal {
                    ms_udp_port,
                    etr_udp_port,
                    global_etr_rloc,
                    ms_rloc,
                    private_etr_rloc,
                    rtr_rlocs,
                }
            }
            9 => {
                let iid = u32::read(&mut body)?;
                body.skipn(2)?; // Reserved
                let source_mlen = u8::read(&mut body)?;
                let group_mlen = u8::read(&mut body)?;
                LcafAddr::Mcinfo {
                    iid,
                    source_mlen,
                    group_mlen,
                    source: Box::new(Address::read(&mut body)?),
                    group: Box::new(Address::read(&mut body)?),
                }
            }
            10 => {
                let mut hops = Vec::new();
                while !body.is_empty() {
                    let flags = u16::read(&mut body)?;
                    hops.push(ElpHop {
                        lookup: flags & ELP_LOOKUP_BIT != 0,
                        rloc_probe: flags & ELP_PROBE_BIT != 0,
                        strict: flags & ELP_STRICT_BIT != 0,
                        address: Address::read(&mut body)?,
                    });
                }
                LcafAddr::Elp(hops)
            }
            13 => {
                let mut nodes = Vec::new();
                while !body.is_empty() {
                    body.skipn(3)?; // Rsvd3, Rsvd4
                    nodes.push(RleNode {
                        level: u8::read(&mut body)?,
                        address: Address::read(&mut body)?,
                    });
                }
                LcafAddr::Rle(nodes)
            }
            15 => LcafAddr::KeyValue {
                key: Box::new(Address::read(&mut body)?),
                value: Box::new(Address::read(&mut body)?),
            },
            other => return Err(AddressError::UnknownLcafType(other)),
        };

        if !body.is_empty() {
            return Err(AddressError::LengthMismatch {
                expected: length,
                found: length - body.len(),
            });
        }

        Ok(addr)
    }
}

impl Writeable for LcafAddr {
    type Error = AddressError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let rsvd2 = match self {
            LcafAddr::InstanceId { mlen, .. } => *mlen,
            _ => 0,
        };

        let mut n = 0u8.write(buf)?; // Rsvd1
        n += 0u8.write(buf)?; // Flags
        n += self.lcaf_type().write(buf)?;
        n += rsvd2.write(buf)?;
        n += (self.payload_len() as u16).write(buf)?;

        n += match self {
            LcafAddr::AfiList(list) => {
                let mut m = 0;
                for a in list {
                    m += a.write(buf)?;
                }
                m
            }
            LcafAddr::InstanceId { iid, address, .. } => {
                iid.write(buf)? + address.write(buf)?
            }
            LcafAddr::AppData {
                ip_tos,
                protocol,
                local_port_low,
                local_port_high,
                remote_port_low,
                remote_port_high,
                address,
            } => {
                let mut m = ((ip_tos << 8) | *protocol as u32).write(buf)?;
                m += local_port_low.write(buf)?;
                m += local_port_high.write(buf)?;
                m += remote_port_low.write(buf)?;
                m += remote_port_high.write(buf)?;
                m + address.write(buf)?
            }
            LcafAddr::NatTraversal {
                ms_udp_port,
                etr_udp_port,
                global_etr_rloc,
                ms_rloc,
                private_etr_rloc,
                rtr_rlocs,
            } => {
                let mut m = ms_udp_port.write(buf)?;
                m += etr_udp_port.write(buf)?;
                m += global_etr_rloc.write(buf)?;
                m += ms_rloc.write(buf)?;
                m += private_etr_rloc.write(buf)?;
                for r in rtr_rlocs {
                    m += r.write(buf)?;
                }
                m
            }
            LcafAddr::Mcinfo {
                iid,
                source_mlen,
                group_mlen,
                source,
                group,
            } => {
                let mut m = iid.write(buf)?;
                m += 0u16.write(buf)?; // Reserved
                m += source_mlen.write(buf)?;
                m += group_mlen.write(buf)?;
                m + source.write(buf)? + group.write(buf)?
            }
            LcafAddr::Elp(hops) => {
                let mut m = 0;
                for h in hops {
                    let mut flags = 0u16;
                    if h.lookup {
                        flags |= ELP_LOOKUP_BIT;
                    }
                    if h.rloc_probe {
                        flags |= ELP_PROBE_BIT;
                    }
                    if h.strict {
                        flags |= ELP_STRICT_BIT;
                    }
                    m += flags.write(buf)?;
                    m += h.address.write(buf)?;
                }
                m
            }
            LcafAddr::Rle(nodes) => {
                let mut m = 0;
                for node in nodes {
                    m += 0u16.write(buf)?; // Rsvd3
                    m += 0u8.write(buf)?; // Rsvd4
                    m += node.level.write(buf)?;
                    m += node.address.write(buf)?;
                }
                m
            }
            LcafAddr::KeyValue { key, value } => key.write(buf)? + value.write(buf)?,
        };

        Ok(n)
    }
}

impl Display for LcafAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LcafAddr::AfiList(list) => {
                write!(f, "afi-list(")?;
                for (i, a) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            LcafAddr::InstanceId { iid, address, .. } => write!(f, "[iid/{iid}]{address}"),
            LcafAddr::AppData {
                protocol, address, ..
            } => write!(f, "appdata(proto {protocol}, {address})"),
            LcafAddr::NatTraversal {
                global_etr_rloc, ..
            } => write!(f, "nat({global_etr_rloc})"),
            LcafAddr::Mcinfo {
                iid,
                source,
                source_mlen,
                group,
                group_mlen,
            } => write!(
                f,
                "[iid/{iid}]({source}/{source_mlen}, {group}/{group_mlen})"
            ),
            LcafAddr::Elp(hops) => {
                write!(f, "elp(")?;
                for (i, h) in hops.iter().enumerate() {
                    if i > 0 {
                        write!(f, "->")?;
                    }
                    write!(f, "{}", h.address)?;
                }
                write!(f, ")")
            }
            LcafAddr::Rle(nodes) => {
                write!(f, "rle(")?;
                for (i, n) in nodes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}[{}]", n.address, n.level)?;
                }
                write!(f, ")")
            }
            LcafAddr::KeyValue { key, value } => write!(f, "kv({key}={value})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(addr: Address) {
        let mut out = WriteBuffer::new();
        let n = addr.write(&mut out).unwrap();
        assert_eq!(n, addr.size_to_write());

        let mut buf = ReadBuffer::new(out.bytes());
        assert_eq!(Address::read(&mut buf).unwrap(), addr);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_instance_id() {
        roundtrip("[iid/42]10.0.0.0/8".parse().unwrap());
    }

    #[test]
    fn roundtrip_afi_list() {
        roundtrip(Address::Lcaf(LcafAddr::AfiList(vec![
            "192.0.2.1".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
        ])));
    }

    #[test]
    fn roundtrip_elp() {
        roundtrip(Address::Lcaf(LcafAddr::Elp(vec![
            ElpHop {
                lookup: false,
                rloc_probe: true,
                strict: false,
                address: "192.0.2.1".parse().unwrap(),
            },
            ElpHop {
                lookup: true,
                rloc_probe: false,
                strict: true,
                address: "198.51.100.7".parse().unwrap(),
            },
        ])));
    }

    #[test]
    fn roundtrip_mcinfo() {
        roundtrip(Address::Lcaf(LcafAddr::Mcinfo {
            iid: 9,
            source_mlen: 32,
            group_mlen: 32,
            source: Box::new("10.0.0.1".parse().unwrap()),
            group: Box::new("239.1.1.1".parse().unwrap()),
        }));
    }

    #[test]
    fn elp_forwards_toward_last_hop() {
        let elp = LcafAddr::Elp(vec![
            ElpHop {
                lookup: false,
                rloc_probe: false,
                strict: false,
                address: "192.0.2.1".parse().unwrap(),
            },
            ElpHop {
                lookup: false,
                rloc_probe: false,
                strict: false,
                address: "198.51.100.7".parse().unwrap(),
            },
        ]);

        assert_eq!(elp.ip(), Some("198.51.100.7".parse().unwrap()));
    }

    #[test]
    fn bad_length_rejected() {
        // Instance-ID body claims 12 bytes but carries 10 of payload.
        let bytes = [
            0x40, 0x03, // AFI = 16387
            0x00, 0x00, 0x02, 0x00, 0x00, 0x0c, // LCAF header, length 12
            0x00, 0x00, 0x00, 0x01, // IID
            0x00, 0x01, 1, 2, 3, 4, // AFI + IPv4
        ];
        let mut buf = ReadBuffer::new(&bytes);

        assert!(Address::read(&mut buf).is_err());
    }
}
