use lispbuf::{ReadBuffer, Readable, WriteBuffer, Writeable};

use crate::types::{
    Address, AddressError, Locator, LocatorState, MapAction, Mapping, MessageError,
};

const LOC_FLAG_LOCAL: u16 = 0x0004;
const LOC_FLAG_PROBED: u16 = 0x0002;
const LOC_FLAG_REACHABLE: u16 = 0x0001;

/// One EID-to-RLOCs record as carried in Map-Reply, Map-Register and
/// Map-Notify messages.
///
/// ### See
///
/// RFC 6830 - Section 6.1.4: https://datatracker.ietf.org/doc/html/rfc6830#section-6.1.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRecord {
    /// Record TTL in minutes.
    pub ttl: u32,
    pub action: MapAction,
    pub authoritative: bool,
    /// 12-bit map-version; 0 when unused.
    pub version: u16,
    /// The EID-prefix, mask length applied.
    pub eid: Address,
    pub locators: Vec<LocatorRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorRecord {
    pub priority: u8,
    pub weight: u8,
    pub mpriority: u8,
    pub mweight: u8,
    pub local: bool,
    pub probed: bool,
    pub reachable: bool,
    pub address: Address,
}

impl MappingRecord {
    /// Render a mapping the way this node would advertise it.
    pub fn from_mapping(mapping: &Mapping) -> Self {
        Self {
            ttl: mapping.ttl(),
            action: mapping.action(),
            authoritative: mapping.authoritative(),
            version: mapping.version(),
            eid: mapping.eid().clone(),
            locators: mapping
                .locators()
                .iter()
                .map(|l| LocatorRecord {
                    priority: l.priority(),
                    weight: l.weight(),
                    mpriority: l.mpriority(),
                    mweight: l.mweight(),
                    local: l.is_local(),
                    probed: false,
                    reachable: l.state().is_up(),
                    address: l.address().clone(),
                })
                .collect(),
        }
    }

    /// Materialize the mapping a received record describes. All locators
    /// come in as remote; the R bit seeds their reachability.
    pub fn to_mapping(&self) -> Mapping {
        let mut mapping = Mapping::new(self.eid.clone(), self.ttl);
        mapping.set_action(self.action);
        mapping.set_authoritative(self.authoritative);

        for loc in &self.locators {
            let state = if loc.reachable {
                LocatorState::Up
            } else {
                LocatorState::Down
            };
            // A duplicate RLOC in a record is a sender bug; keep the
            // first occurrence.
            let _ = mapping.add_locator(Locator::remote(
                loc.address.clone(),
                state,
                loc.priority,
                loc.weight,
            ));
        }
        mapping
    }

    /// A record advertising no locators, only a caching directive.
    pub fn negative(eid: Address, ttl: u32, action: MapAction) -> Self {
        Self {
            ttl,
            action,
            authoritative: true,
            version: 0,
            eid,
            locators: Vec::new(),
        }
    }

    pub fn size_to_write(&self) -> usize {
        10 + self.eid.size_to_write()
            + self
                .locators
                .iter()
                .map(|l| 6 + l.address.size_to_write())
                .sum::<usize>()
    }
}

impl Readable for MappingRecord {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let ttl = u32::read(buf)?;
        let locator_count = u8::read(buf)?;
        let mask_len = u8::read(buf)?;
        let act_a = u8::read(buf)?;
        buf.skip()?; // Reserved
        let version = u16::read(buf)? & 0x0fff;

        let eid = apply_mask_len(Address::read(buf)?, mask_len)?;

        let mut locators = Vec::with_capacity(locator_count as usize);
        for _ in 0..locator_count {
            locators.push(LocatorRecord::read(buf)?);
        }

        Ok(Self {
            ttl,
            action: MapAction::from_u8(act_a >> 5),
            authoritative: act_a & 0x10 != 0,
            version,
            eid,
            locators,
        })
    }
}

impl Writeable for MappingRecord {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut n = self.ttl.write(buf)?;
        n += (self.locators.len() as u8).write(buf)?;
        n += self.eid.plen().unwrap_or(0).write(buf)?;

        let mut act_a = self.action.to_u8() << 5;
        if self.authoritative {
            act_a |= 0x10;
        }
        n += act_a.write(buf)?;
        n += 0u8.write(buf)?; // Reserved
        n += (self.version & 0x0fff).write(buf)?;

        n += self.eid.write(buf)?;
        for loc in &self.locators {
            n += loc.write(buf)?;
        }
        Ok(n)
    }
}

impl Readable for LocatorRecord {
    type Error = MessageError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        let priority = u8::read(buf)?;
        let weight = u8::read(buf)?;
        let mpriority = u8::read(buf)?;
        let mweight = u8::read(buf)?;
        let flags = u16::read(buf)?;
        let address = Address::read(buf)?;

        Ok(Self {
            priority,
            weight,
            mpriority,
            mweight,
            local: flags & LOC_FLAG_LOCAL != 0,
            probed: flags & LOC_FLAG_PROBED != 0,
            reachable: flags & LOC_FLAG_REACHABLE != 0,
            address,
        })
    }
}

impl Writeable for LocatorRecord {
    type Error = MessageError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut n = self.priority.write(buf)?;
        n += self.weight.write(buf)?;
        n += self.mpriority.write(buf)?;
        n += self.mweight.write(buf)?;

        let mut flags = 0u16;
        if self.local {
            flags |= LOC_FLAG_LOCAL;
        }
        if self.probed {
            flags |= LOC_FLAG_PROBED;
        }
        if self.reachable {
            flags |= LOC_FLAG_REACHABLE;
        }
        n += flags.write(buf)?;
        n += self.address.write(buf)?;
        Ok(n)
    }
}

/// Combine a bare wire address with the record's mask length into the
/// prefix form used everywhere else.
pub(crate) fn apply_mask_len(addr: Address, mask_len: u8) -> Result<Address, AddressError> {
    use crate::types::LcafAddr;

    Ok(match addr {
        Address::Ip(ip) => Address::IpPrefix(ip, mask_len).normalize(),
        Address::Lcaf(LcafAddr::InstanceId { iid, address, .. }) => {
            let inner = apply_mask_len(*address, mask_len)?;
            Address::Lcaf(LcafAddr::InstanceId {
                iid,
                mlen: mask_len,
                address: Box::new(inner),
            })
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mapping;

    fn record() -> MappingRecord {
        let mut mapping = Mapping::new("203.0.113.0/24".parse().unwrap(), 10);
        mapping
            .add_locator(Locator::remote(
                "192.0.2.1".parse().unwrap(),
                LocatorState::Up,
                1,
                100,
            ))
            .unwrap();
        MappingRecord::from_mapping(&mapping)
    }

    #[test]
    fn roundtrip() {
        let rec = record();

        let mut out = WriteBuffer::new();
        let n = rec.write(&mut out).unwrap();
        assert_eq!(n, rec.size_to_write());

        let mut buf = ReadBuffer::new(out.bytes());
        assert_eq!(MappingRecord::read(&mut buf).unwrap(), rec);
        assert!(buf.is_empty());
    }

    #[test]
    fn mask_len_restores_prefix() {
        let rec = record();
        let mut out = WriteBuffer::new();
        rec.write(&mut out).unwrap();

        let mut buf = ReadBuffer::new(out.bytes());
        let parsed = MappingRecord::read(&mut buf).unwrap();
        assert_eq!(parsed.eid, "203.0.113.0/24".parse().unwrap());
    }

    #[test]
    fn reachability_bit_seeds_locator_state() {
        let mut rec = record();
        rec.locators[0].reachable = false;

        let mapping = rec.to_mapping();
        let loc = mapping
            .locators()
            .find(&"192.0.2.1".parse().unwrap())
            .unwrap();
        assert_eq!(loc.state(), LocatorState::Down);
    }

    #[test]
    fn negative_record_has_no_locators() {
        let rec = MappingRecord::negative(
            "203.0.113.0/24".parse().unwrap(),
            15,
            MapAction::NativelyForward,
        );

        let mapping = rec.to_mapping();
        assert!(mapping.locators().is_empty());
        assert_eq!(mapping.action(), MapAction::NativelyForward);
    }
}
