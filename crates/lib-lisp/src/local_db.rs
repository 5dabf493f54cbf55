use std::net::IpAddr;

use tracing::{debug, warn};

use crate::{
    balancing::BalancingVecs,
    iface::{IfaceEvent, IfaceLocators, IfaceStatus},
    ptree::PrefixIndex,
    types::{Address, LocatorState, Mapping},
};

/// One authoritative mapping plus its published balancing vectors.
#[derive(Debug)]
pub struct DbEntry {
    mapping: Mapping,
    vecs: BalancingVecs,
}

impl DbEntry {
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut Mapping {
        &mut self.mapping
    }

    pub fn vecs(&self) -> &BalancingVecs {
        &self.vecs
    }

    pub fn recompute(&mut self) {
        self.vecs.recompute(&self.mapping);
    }
}

/// The EID-prefixes this node is authoritative for, created at
/// configuration load and mutated only by interface events.
#[derive(Debug, Default)]
pub struct LocalDb {
    index: PrefixIndex<DbEntry>,
    iface_locators: IfaceLocators,
}

impl LocalDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Add an authoritative mapping. Its vectors are computed on the
    /// spot; its locators should already be attached.
    pub fn add_mapping(&mut self, mut mapping: Mapping) {
        mapping.set_authoritative(true);
        let eid = mapping.eid().clone();

        let mut entry = DbEntry {
            mapping,
            vecs: BalancingVecs::new(),
        };
        entry.recompute();

        if self.index.insert(&eid, entry).is_some() {
            warn!(eid = %eid, "replaced existing database mapping");
        } else {
            debug!(eid = %eid, "database mapping added");
        }
    }

    /// Remember that `rloc` under `eid` follows interface `iface`.
    pub fn bind_iface(&mut self, iface: &str, eid: Address, rloc: Address) {
        self.iface_locators.bind(iface, eid, rloc);
    }

    pub fn lookup(&self, addr: &Address) -> Option<&DbEntry> {
        self.index.longest_prefix_match(addr)
    }

    pub fn exact(&self, eid: &Address) -> Option<&DbEntry> {
        self.index.exact_lookup(eid)
    }

    pub fn exact_mut(&mut self, eid: &Address) -> Option<&mut DbEntry> {
        self.index.exact_lookup_mut(eid)
    }

    pub fn remove(&mut self, eid: &Address) -> Option<Mapping> {
        self.index.remove(eid).map(|e| e.mapping)
    }

    pub fn entries(&self) -> Vec<&DbEntry> {
        self.index.values()
    }

    /// Every authoritative mapping, the set a Map-Register advertises.
    pub fn mappings(&self) -> Vec<&Mapping> {
        self.index.values().into_iter().map(DbEntry::mapping).collect()
    }

    /// React to an interface change: rebind the affected local locators,
    /// recompute policies and report which EIDs changed so the control
    /// plane can re-register and SMR.
    pub fn apply_iface_event(&mut self, event: &IfaceEvent) -> Vec<Address> {
        let mut affected = Vec::new();

        let Some(bindings) = self.iface_locators.bindings_mut(&event.iface) else {
            return affected;
        };

        for binding in bindings.iter_mut() {
            let Some(entry) = self.index.exact_lookup_mut(&binding.eid) else {
                continue;
            };

            let mut changed = false;

            if let Some(new_ip) = event.addr {
                if family_matches(&binding.rloc, new_ip) {
                    let new_rloc = Address::Ip(new_ip);
                    if new_rloc != binding.rloc {
                        if let Some(loc) = entry.mapping.locators_mut().find_mut(&binding.rloc) {
                            loc.set_address(new_rloc.clone());
                        }
                        // Keep the set's canonical order intact after the
                        // address change.
                        resort(entry.mapping.locators_mut());
                        binding.rloc = new_rloc;
                        changed = true;
                    }
                }
            }

            let want_state = match event.status {
                IfaceStatus::Up => LocatorState::Up,
                IfaceStatus::Down => LocatorState::Down,
            };
            if let Some(loc) = entry.mapping.locators_mut().find_mut(&binding.rloc) {
                if loc.state() != want_state {
                    loc.set_state(want_state);
                    changed = true;
                }
            }

            if changed {
                entry.mapping.bump_version();
                entry.mapping.touch();
                entry.recompute();
                affected.push(binding.eid.clone());
            }
        }

        affected
    }
}

fn family_matches(rloc: &Address, ip: IpAddr) -> bool {
    match rloc.ip() {
        Some(existing) => existing.is_ipv4() == ip.is_ipv4(),
        None => false,
    }
}

/// Remove-and-readd every locator so the vector is sorted again after an
/// in-place address rewrite.
fn resort(set: &mut crate::types::LocatorSet) {
    let locators: Vec<_> = set.iter().cloned().collect();
    *set = crate::types::LocatorSet::new();
    for loc in locators {
        let _ = set.add(loc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Locator;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn db_with_iface_mapping() -> LocalDb {
        let mut db = LocalDb::new();
        let mut mapping = Mapping::new(addr("10.0.0.0/24"), 10);
        mapping
            .add_locator(Locator::local(
                addr("192.0.2.1"),
                LocatorState::Up,
                1,
                100,
                Some(3),
            ))
            .unwrap();
        db.add_mapping(mapping);
        db.bind_iface("eth0", addr("10.0.0.0/24"), addr("192.0.2.1"));
        db
    }

    #[test]
    fn iface_address_change_rebinds_locator() {
        let mut db = db_with_iface_mapping();

        let affected = db.apply_iface_event(&IfaceEvent {
            iface: "eth0".into(),
            addr: Some("198.51.100.9".parse().unwrap()),
            status: IfaceStatus::Up,
        });

        assert_eq!(affected, vec![addr("10.0.0.0/24")]);
        let entry = db.exact(&addr("10.0.0.0/24")).unwrap();
        assert!(entry.mapping().locators().find(&addr("198.51.100.9")).is_some());
        assert!(entry.mapping().locators().find(&addr("192.0.2.1")).is_none());
    }

    #[test]
    fn iface_down_marks_locator_down() {
        let mut db = db_with_iface_mapping();

        let affected = db.apply_iface_event(&IfaceEvent {
            iface: "eth0".into(),
            addr: None,
            status: IfaceStatus::Down,
        });

        assert_eq!(affected.len(), 1);
        let entry = db.exact(&addr("10.0.0.0/24")).unwrap();
        assert!(!entry.mapping().has_egress());
        assert!(entry.vecs().is_empty());
    }

    #[test]
    fn unknown_iface_changes_nothing() {
        let mut db = db_with_iface_mapping();

        let affected = db.apply_iface_event(&IfaceEvent {
            iface: "eth9".into(),
            addr: None,
            status: IfaceStatus::Down,
        });

        assert!(affected.is_empty());
    }

    #[test]
    fn mappings_lists_authoritative_set() {
        let db = db_with_iface_mapping();
        let mappings = db.mappings();

        assert_eq!(mappings.len(), 1);
        assert!(mappings[0].authoritative());
    }
}
