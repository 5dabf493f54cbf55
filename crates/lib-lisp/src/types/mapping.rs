use std::{
    fmt::Display,
    time::{Duration, Instant},
};

use crate::types::{Address, Locator, LocatorError, LocatorSet};

/// What a node should do with traffic for an EID when no locator can or
/// should be used. Carried in the ACT field of a mapping record.
///
/// ### See
///
/// RFC 6830 - Section 6.1.4: https://datatracker.ietf.org/doc/html/rfc6830#section-6.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapAction {
    #[default]
    NoAction,
    NativelyForward,
    SendMapRequest,
    Drop,
}

impl MapAction {
    pub fn to_u8(self) -> u8 {
        match self {
            MapAction::NoAction => 0,
            MapAction::NativelyForward => 1,
            MapAction::SendMapRequest => 2,
            MapAction::Drop => 3,
        }
    }

    /// Unknown ACT values degrade to no-action rather than failing the
    /// whole record.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => MapAction::NativelyForward,
            2 => MapAction::SendMapRequest,
            3 => MapAction::Drop,
            _ => MapAction::NoAction,
        }
    }
}

/// An EID-prefix bound to a locator-set. The unit of registration,
/// resolution and caching.
#[derive(Debug, Clone)]
pub struct Mapping {
    /// Always a prefix (or an LCAF wrapping one), host bits masked.
    eid: Address,
    locators: LocatorSet,
    /// Record TTL in minutes, the unit the wire uses.
    ttl: u32,
    action: MapAction,
    authoritative: bool,
    /// Map-Version; 0 means versioning is not in use.
    version: u16,
    updated_at: Instant,
}

impl Mapping {
    pub fn new(eid: Address, ttl: u32) -> Self {
        Self {
            eid: eid.into_prefix().normalize(),
            locators: LocatorSet::new(),
            ttl,
            action: MapAction::NoAction,
            authoritative: false,
            version: 0,
            updated_at: Instant::now(),
        }
    }

    /// A mapping with no usable locators whose action tells the data plane
    /// what to do instead. This is what a Negative Map-Reply installs.
    pub fn negative(eid: Address, ttl: u32, action: MapAction) -> Self {
        let mut m = Self::new(eid, ttl);
        m.action = action;
        m
    }

    pub fn eid(&self) -> &Address {
        &self.eid
    }

    pub fn iid(&self) -> u32 {
        self.eid.instance_id()
    }

    pub fn locators(&self) -> &LocatorSet {
        &self.locators
    }

    pub fn locators_mut(&mut self) -> &mut LocatorSet {
        self.updated_at = Instant::now();
        &mut self.locators
    }

    pub fn add_locator(&mut self, locator: Locator) -> Result<(), LocatorError> {
        self.updated_at = Instant::now();
        self.locators.add(locator)
    }

    /// TTL in minutes as carried in records.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl as u64 * 60)
    }

    pub fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
    }

    pub fn action(&self) -> MapAction {
        self.action
    }

    pub fn set_action(&mut self, action: MapAction) {
        self.action = action;
    }

    pub fn authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn set_authoritative(&mut self, authoritative: bool) {
        self.authoritative = authoritative;
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// The wire field is 12 bits and 0 means "versioning not in use", so
    /// the counter wraps within that range and skips the sentinel.
    pub fn bump_version(&mut self) {
        self.version = (self.version.wrapping_add(1) & 0x0fff).max(1);
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    pub fn touch(&mut self) {
        self.updated_at = Instant::now();
    }

    /// True when at least one locator could carry traffic right now.
    pub fn has_egress(&self) -> bool {
        self.locators.iter().any(Locator::is_usable)
    }
}

impl Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ttl={}m act={:?} locators=[",
            self.eid, self.ttl, self.action
        )?;
        for (i, l) in self.locators.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{l}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocatorState;

    #[test]
    fn eid_is_normalized() {
        let m = Mapping::new("10.1.2.3/8".parse().unwrap(), 10);
        assert_eq!(m.eid(), &"10.0.0.0/8".parse::<Address>().unwrap());
    }

    #[test]
    fn host_eid_becomes_full_width_prefix() {
        let m = Mapping::new("192.0.2.1".parse().unwrap(), 10);
        assert_eq!(m.eid(), &"192.0.2.1/32".parse::<Address>().unwrap());
    }

    #[test]
    fn version_stays_inside_wire_range() {
        let mut m = Mapping::new("10.0.0.0/8".parse().unwrap(), 10);

        for _ in 0..0x0fff {
            m.bump_version();
        }
        assert_eq!(m.version(), 0x0fff);

        // Wrapping past the 12-bit field skips the "unversioned" zero.
        m.bump_version();
        assert_eq!(m.version(), 1);
    }

    #[test]
    fn egress_follows_locator_state() {
        let mut m = Mapping::new("10.0.0.0/8".parse().unwrap(), 10);
        m.add_locator(Locator::remote(
            "192.0.2.1".parse().unwrap(),
            LocatorState::Up,
            1,
            100,
        ))
        .unwrap();
        assert!(m.has_egress());

        m.locators_mut()
            .find_mut(&"192.0.2.1".parse().unwrap())
            .unwrap()
            .set_state(LocatorState::Down);
        assert!(!m.has_egress());
    }
}
