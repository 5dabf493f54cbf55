use std::fmt::Display;

use thiserror::Error;

use crate::{constants::UNUSED_RLOC_PRIORITY, types::Address};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Locator set already contains {0}")]
    Duplicate(Address),

    #[error("Locator {0} is not in the set")]
    NotFound(Address),
}

/// Reachability of a locator as currently believed by this node. `Unknown`
/// is the state of a freshly learned remote locator before any probe has
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocatorState {
    Up,
    Down,
    #[default]
    Unknown,
}

impl LocatorState {
    pub fn is_up(self) -> bool {
        matches!(self, LocatorState::Up)
    }
}

/// Where a locator comes from: an interface of this node, a remote ETR, or
/// a configured proxy-ETR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Local,
    Remote,
    Petr,
}

/// One RLOC of a locator-set, with the RFC 6830 selection attributes.
/// Lower priority value wins; 255 means "configured but never use".
/// Weight shares load within a priority tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    address: Address,
    state: LocatorState,
    priority: u8,
    weight: u8,
    mpriority: u8,
    mweight: u8,
    kind: LocatorKind,
    /// Egress socket descriptor of the owning interface. Only local
    /// locators carry one.
    sock: Option<i32>,
}

impl Locator {
    /// A locator bound to one of this node's interfaces, carrying the
    /// egress socket of that interface.
    pub fn local(
        address: Address,
        state: LocatorState,
        priority: u8,
        weight: u8,
        sock: Option<i32>,
    ) -> Self {
        Self {
            address,
            state,
            priority,
            weight,
            mpriority: UNUSED_RLOC_PRIORITY,
            mweight: 0,
            kind: LocatorKind::Local,
            sock,
        }
    }

    /// A locator learned from the control plane.
    pub fn remote(address: Address, state: LocatorState, priority: u8, weight: u8) -> Self {
        Self {
            address,
            state,
            priority,
            weight,
            mpriority: UNUSED_RLOC_PRIORITY,
            mweight: 0,
            kind: LocatorKind::Remote,
            sock: None,
        }
    }

    /// A configured proxy-ETR locator.
    pub fn petr(address: Address, priority: u8, weight: u8) -> Self {
        Self {
            address,
            state: LocatorState::Up,
            priority,
            weight,
            mpriority: UNUSED_RLOC_PRIORITY,
            mweight: 0,
            kind: LocatorKind::Petr,
            sock: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> LocatorState {
        self.state
    }

    pub fn set_state(&mut self, state: LocatorState) {
        self.state = state;
    }

    /// Rebind a local locator to a new interface address, keeping its
    /// selection attributes.
    pub fn set_address(&mut self, address: Address) {
        self.address = address;
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn weight(&self) -> u8 {
        self.weight
    }

    pub fn mpriority(&self) -> u8 {
        self.mpriority
    }

    pub fn mweight(&self) -> u8 {
        self.mweight
    }

    pub fn set_mcast(&mut self, mpriority: u8, mweight: u8) {
        self.mpriority = mpriority;
        self.mweight = mweight;
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn is_local(&self) -> bool {
        self.kind == LocatorKind::Local
    }

    pub fn sock(&self) -> Option<i32> {
        self.sock
    }

    pub fn set_sock(&mut self, sock: Option<i32>) {
        if self.is_local() {
            self.sock = sock;
        }
    }

    /// Usable for forwarding: reachable and not administratively parked.
    pub fn is_usable(&self) -> bool {
        self.state.is_up() && self.priority != UNUSED_RLOC_PRIORITY
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} p{}/w{} {:?}",
            self.address, self.priority, self.weight, self.state
        )
    }
}

/// The locators of one mapping, kept in canonical order (address
/// ascending) so every node derives identical balancing vectors from the
/// same set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorSet {
    locators: Vec<Locator>,
}

impl LocatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, locator: Locator) -> Result<(), LocatorError> {
        match self
            .locators
            .binary_search_by(|l| l.address.cmp(&locator.address))
        {
            Ok(_) => Err(LocatorError::Duplicate(locator.address)),
            Err(pos) => {
                self.locators.insert(pos, locator);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, address: &Address) -> Result<Locator, LocatorError> {
        match self.locators.binary_search_by(|l| l.address.cmp(address)) {
            Ok(pos) => Ok(self.locators.remove(pos)),
            Err(_) => Err(LocatorError::NotFound(address.clone())),
        }
    }

    pub fn find(&self, address: &Address) -> Option<&Locator> {
        self.locators
            .binary_search_by(|l| l.address.cmp(address))
            .ok()
            .map(|pos| &self.locators[pos])
    }

    pub fn find_mut(&mut self, address: &Address) -> Option<&mut Locator> {
        match self.locators.binary_search_by(|l| l.address.cmp(address)) {
            Ok(pos) => Some(&mut self.locators[pos]),
            Err(_) => None,
        }
    }

    pub fn get(&self, idx: usize) -> Option<&Locator> {
        self.locators.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Locator> {
        self.locators.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Locator> {
        self.locators.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Locator> {
        self.locators.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Distinct priority values present in the set, best (lowest) first,
    /// parked locators excluded.
    pub fn priority_tiers(&self) -> Vec<u8> {
        let mut tiers: Vec<u8> = self
            .locators
            .iter()
            .map(Locator::priority)
            .filter(|p| *p != UNUSED_RLOC_PRIORITY)
            .collect();
        tiers.sort_unstable();
        tiers.dedup();
        tiers
    }

    /// Indexes of the set members in the given priority tier, canonical
    /// order preserved.
    pub fn tier_members(&self, priority: u8) -> Vec<usize> {
        self.locators
            .iter()
            .enumerate()
            .filter(|(_, l)| l.priority == priority)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rloc(s: &str, priority: u8, weight: u8) -> Locator {
        Locator::remote(s.parse().unwrap(), LocatorState::Up, priority, weight)
    }

    #[test]
    fn canonical_order() {
        let mut set = LocatorSet::new();
        set.add(rloc("198.51.100.7", 1, 50)).unwrap();
        set.add(rloc("192.0.2.1", 1, 50)).unwrap();

        let addrs: Vec<String> = set.iter().map(|l| l.address().to_string()).collect();
        assert_eq!(addrs, vec!["192.0.2.1", "198.51.100.7"]);
    }

    #[test]
    fn duplicates_rejected() {
        let mut set = LocatorSet::new();
        set.add(rloc("192.0.2.1", 1, 50)).unwrap();

        assert_eq!(
            set.add(rloc("192.0.2.1", 2, 10)),
            Err(LocatorError::Duplicate("192.0.2.1".parse().unwrap()))
        );
    }

    #[test]
    fn tiers_skip_unused() {
        let mut set = LocatorSet::new();
        set.add(rloc("192.0.2.1", 1, 50)).unwrap();
        set.add(rloc("192.0.2.2", 2, 50)).unwrap();
        set.add(rloc("192.0.2.3", UNUSED_RLOC_PRIORITY, 0)).unwrap();

        assert_eq!(set.priority_tiers(), vec![1, 2]);
        assert_eq!(set.tier_members(1), vec![0]);
    }

    #[test]
    fn only_local_locators_carry_sockets() {
        let mut remote = rloc("192.0.2.1", 1, 50);
        remote.set_sock(Some(7));
        assert_eq!(remote.sock(), None);

        let local = Locator::local(
            "10.0.0.1".parse().unwrap(),
            LocatorState::Up,
            1,
            100,
            Some(5),
        );
        assert_eq!(local.sock(), Some(5));
    }
}
