use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    balancing::BalancingVecs,
    ptree::PrefixIndex,
    timers::{TimerEvent, TimerId, TimerWheel},
    types::{Address, LocatorState, MapAction, Mapping},
};

/// Per-locator RLOC-probing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeState {
    #[default]
    Idle,
    /// A probe is on the wire under `nonce`.
    Probing { nonce: u64 },
}

/// A remote resolution. Entries start as inactive placeholders the moment
/// a Map-Request goes out and activate on the first positive reply;
/// negative replies activate them too, with an action instead of
/// locators.
#[derive(Debug)]
pub struct CacheEntry {
    mapping: Mapping,
    active: bool,
    expiry_deadline: Instant,
    expiry_timer: Option<TimerId>,
    /// Resolution nonces still waiting for a reply.
    pending_nonces: Vec<u64>,
    probe: HashMap<Address, ProbeState>,
    /// Next-probe timer per locator, so rescheduling never stacks
    /// duplicate probe chains.
    probe_timers: HashMap<Address, TimerId>,
    /// An SMR-invoked Map-Request for this EID is already in flight.
    smr_inflight: bool,
    vecs: BalancingVecs,
}

impl CacheEntry {
    fn placeholder(eid: Address) -> Self {
        Self {
            mapping: Mapping::negative(eid, 1, MapAction::SendMapRequest),
            active: false,
            expiry_deadline: Instant::now() + Duration::from_secs(60),
            expiry_timer: None,
            pending_nonces: Vec::new(),
            probe: HashMap::new(),
            probe_timers: HashMap::new(),
            smr_inflight: false,
            vecs: BalancingVecs::new(),
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn expiry_deadline(&self) -> Instant {
        self.expiry_deadline
    }

    pub fn pending_nonces(&self) -> &[u64] {
        &self.pending_nonces
    }

    pub fn push_nonce(&mut self, nonce: u64) {
        self.pending_nonces.push(nonce);
    }

    pub fn smr_inflight(&self) -> bool {
        self.smr_inflight
    }

    pub fn set_smr_inflight(&mut self, inflight: bool) {
        self.smr_inflight = inflight;
    }

    pub fn probe_state(&self, rloc: &Address) -> ProbeState {
        self.probe.get(rloc).copied().unwrap_or_default()
    }

    pub fn set_probe_state(&mut self, rloc: &Address, state: ProbeState) {
        self.probe.insert(rloc.clone(), state);
    }

    /// Re-arm the next-probe timer for `rloc`, stopping a previous one.
    pub fn set_probe_timer(
        &mut self,
        rloc: &Address,
        timer: TimerId,
        wheel: &mut TimerWheel<TimerEvent>,
    ) {
        if let Some(old) = self.probe_timers.insert(rloc.clone(), timer) {
            wheel.stop(old);
        }
    }

    pub fn vecs(&self) -> &BalancingVecs {
        &self.vecs
    }

    /// Flip one locator's reachability and republish the balancing
    /// vectors.
    pub fn set_locator_state(&mut self, rloc: &Address, state: LocatorState) {
        if let Some(loc) = self.mapping.locators_mut().find_mut(rloc) {
            loc.set_state(state);
        }
        self.recompute();
    }

    pub fn recompute(&mut self) {
        self.vecs.recompute(&self.mapping);
    }
}

/// The map-cache: every remote EID this node has resolved or is
/// resolving, indexed for longest-prefix lookup.
#[derive(Debug, Default)]
pub struct MapCache {
    index: PrefixIndex<CacheEntry>,
}

impl MapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, addr: &Address) -> Option<&CacheEntry> {
        self.index.longest_prefix_match(addr)
    }

    pub fn lookup_mut(&mut self, addr: &Address) -> Option<&mut CacheEntry> {
        self.index.longest_prefix_match_mut(addr)
    }

    pub fn exact(&self, eid: &Address) -> Option<&CacheEntry> {
        self.index.exact_lookup(eid)
    }

    pub fn exact_mut(&mut self, eid: &Address) -> Option<&mut CacheEntry> {
        self.index.exact_lookup_mut(eid)
    }

    pub fn entries(&self) -> Vec<&CacheEntry> {
        self.index.values()
    }

    /// Start resolving `eid`: install an inactive placeholder that
    /// remembers the outstanding nonce. Failure to index the address
    /// leaves the cache unchanged (a smaller cache is never fatal).
    pub fn add_placeholder(&mut self, eid: Address, nonce: u64) -> Option<&mut CacheEntry> {
        let eid = eid.into_prefix().normalize();
        if self.index.exact_lookup(&eid).is_none() {
            let mut entry = CacheEntry::placeholder(eid.clone());
            entry.pending_nonces.push(nonce);
            self.index.insert(&eid, entry);
            debug!(eid = %eid, "map-cache placeholder installed");
        } else if let Some(entry) = self.index.exact_lookup_mut(&eid) {
            entry.pending_nonces.push(nonce);
        }
        self.index.exact_lookup_mut(&eid)
    }

    /// Install or overwrite a fully-known mapping (administrative preload
    /// or a server-pushed record). The entry is immediately active.
    pub fn install(
        &mut self,
        mapping: Mapping,
        wheel: &mut TimerWheel<TimerEvent>,
    ) -> Option<&mut CacheEntry> {
        let eid = mapping.eid().clone();
        let ttl = mapping.ttl_duration();

        if let Some(old) = self.index.remove(&eid) {
            if let Some(t) = old.expiry_timer {
                wheel.stop(t);
            }
        }

        let mut entry = CacheEntry::placeholder(eid.clone());
        entry.mapping = mapping;
        entry.active = true;
        entry.expiry_deadline = Instant::now() + ttl;
        entry.expiry_timer = Some(wheel.start(
            ttl.as_secs(),
            TimerEvent::CacheExpiry { eid: eid.clone() },
        ));
        entry.recompute();

        self.index.insert(&eid, entry);
        info!(eid = %eid, "map-cache entry installed");
        self.index.exact_lookup_mut(&eid)
    }

    /// Apply a positive or negative Map-Reply record to the placeholder
    /// (or existing entry) for `eid`. Returns the activated entry.
    pub fn activate(
        &mut self,
        mapping: Mapping,
        wheel: &mut TimerWheel<TimerEvent>,
    ) -> Option<&mut CacheEntry> {
        let eid = mapping.eid().clone();

        match self.index.exact_lookup_mut(&eid) {
            Some(entry) => {
                let ttl = mapping.ttl_duration();
                if let Some(t) = entry.expiry_timer.take() {
                    wheel.stop(t);
                }
                entry.mapping = mapping;
                entry.active = true;
                entry.pending_nonces.clear();
                entry.expiry_deadline = Instant::now() + ttl;
                entry.expiry_timer = Some(wheel.start(
                    ttl.as_secs(),
                    TimerEvent::CacheExpiry { eid: eid.clone() },
                ));
                entry.recompute();
                debug!(eid = %eid, "map-cache entry activated");
                self.index.exact_lookup_mut(&eid)
            }
            // Replies may legitimately carry a broader prefix than the
            // one we asked for; install it fresh.
            None => self.install(mapping, wheel),
        }
    }

    /// Drop an entry, stopping its timer first (timers never outlive
    /// their owner).
    pub fn remove(&mut self, eid: &Address, wheel: &mut TimerWheel<TimerEvent>) -> Option<Mapping> {
        let eid = eid.clone().into_prefix().normalize();
        let entry = self.index.remove(&eid)?;
        if let Some(t) = entry.expiry_timer {
            wheel.stop(t);
        }
        for (_, t) in entry.probe_timers {
            wheel.stop(t);
        }
        debug!(eid = %eid, "map-cache entry removed");
        Some(entry.mapping)
    }

    /// TTL ran out. The entry is removed outright; the next packet for
    /// the prefix misses and triggers a fresh resolution.
    pub fn expire(&mut self, eid: &Address, wheel: &mut TimerWheel<TimerEvent>) {
        if let Some(mapping) = self.remove(eid, wheel) {
            info!(eid = %mapping.eid(), "map-cache entry expired");
        }
    }

    /// Flush everything, e.g. on an administrative reset.
    pub fn flush(&mut self, wheel: &mut TimerWheel<TimerEvent>) {
        let eids: Vec<Address> = self
            .index
            .values()
            .iter()
            .map(|e| e.mapping.eid().clone())
            .collect();
        for eid in eids {
            self.remove(&eid, wheel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn miss_then_placeholder_then_activate() {
        let mut cache = MapCache::new();
        let mut wheel = TimerWheel::new();

        assert!(cache.lookup(&addr("203.0.113.5")).is_none());

        cache.add_placeholder(addr("203.0.113.0/24"), 42);
        let entry = cache.lookup(&addr("203.0.113.5")).unwrap();
        assert!(!entry.is_active());
        assert_eq!(entry.pending_nonces(), &[42]);

        let mapping = Mapping::new(addr("203.0.113.0/24"), 10);
        cache.activate(mapping, &mut wheel);

        let entry = cache.lookup(&addr("203.0.113.5")).unwrap();
        assert!(entry.is_active());
        assert!(entry.pending_nonces().is_empty());
    }

    #[test]
    fn expiry_deadline_follows_ttl() {
        let mut cache = MapCache::new();
        let mut wheel = TimerWheel::new();

        let mapping = Mapping::new(addr("203.0.113.0/24"), 10);
        let before = Instant::now();
        cache.install(mapping, &mut wheel);

        let entry = cache.exact(&addr("203.0.113.0/24")).unwrap();
        let ttl = Duration::from_secs(600);
        assert!(entry.expiry_deadline() >= before + ttl);
        assert!(entry.expiry_deadline() <= Instant::now() + ttl);
        assert_eq!(wheel.running_timers(), 1);
    }

    #[test]
    fn expire_removes_entry_and_timer() {
        let mut cache = MapCache::new();
        let mut wheel = TimerWheel::new();

        cache.install(Mapping::new(addr("203.0.113.0/24"), 10), &mut wheel);
        cache.expire(&addr("203.0.113.0/24"), &mut wheel);

        assert!(cache.lookup(&addr("203.0.113.5")).is_none());
        assert_eq!(wheel.running_timers(), 0);
    }

    #[test]
    fn negative_entry_keeps_action() {
        let mut cache = MapCache::new();
        let mut wheel = TimerWheel::new();

        cache.add_placeholder(addr("203.0.113.0/24"), 7);
        let negative = Mapping::negative(addr("203.0.113.0/24"), 15, MapAction::NativelyForward);
        cache.activate(negative, &mut wheel);

        let entry = cache.lookup(&addr("203.0.113.9")).unwrap();
        assert!(entry.is_active());
        assert_eq!(entry.mapping().action(), MapAction::NativelyForward);
        assert!(entry.vecs().is_empty());
    }
}
