use crate::types::{Afi, Locator, Mapping};

/// Weighted locator-selection vectors for one mapping, the product the
/// data plane consumes. A locator appears `weight` times in its vector;
/// indexing with `hash(5-tuple) mod len` then spreads flows across the
/// highest-priority tier proportionally to weight.
///
/// Entries are indexes into the owning mapping's locator-set, in the
/// set's canonical order.
#[derive(Debug, Default, Clone)]
pub struct BalancingVecs {
    v4: Vec<usize>,
    v6: Vec<usize>,
    all: Vec<usize>,
    version: u64,
}

impl BalancingVecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild all three vectors from the mapping's current locator state.
    /// Bumps the published version even when the content is unchanged, so
    /// the data plane can re-pull unconditionally.
    pub fn recompute(&mut self, mapping: &Mapping) {
        self.v4 = build_vec(mapping, Some(Afi::Ipv4));
        self.v6 = build_vec(mapping, Some(Afi::Ipv6));
        self.all = build_vec(mapping, None);
        self.version = self.version.wrapping_add(1);
    }

    pub fn v4(&self) -> &[usize] {
        &self.v4
    }

    pub fn v6(&self) -> &[usize] {
        &self.v6
    }

    pub fn all(&self) -> &[usize] {
        &self.all
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// No vector has an entry: every locator is down or parked. The
    /// mapping has no egress until a probe or a new registration revives
    /// one.
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty() && self.all.is_empty()
    }

    /// Pick a locator index for a flow hash, preferring the
    /// family-specific vector when one exists.
    pub fn select(&self, hash: u32, afi: Option<Afi>) -> Option<usize> {
        let vec = match afi {
            Some(Afi::Ipv4) => &self.v4,
            Some(Afi::Ipv6) => &self.v6,
            _ => &self.all,
        };
        if vec.is_empty() {
            return None;
        }
        Some(vec[hash as usize % vec.len()])
    }
}

/// Build one vector: find the best (lowest) priority tier that still has
/// usable locators of the wanted family, then expand each by weight.
/// A tier whose weights are all zero distributes equally.
fn build_vec(mapping: &Mapping, afi: Option<Afi>) -> Vec<usize> {
    let set = mapping.locators();

    for tier in set.priority_tiers() {
        let members: Vec<usize> = set
            .tier_members(tier)
            .into_iter()
            .filter(|&i| match set.get(i) {
                Some(l) => {
                    l.is_usable() && afi.map_or(true, |want| l.address().ip_afi() == Some(want))
                }
                None => false,
            })
            .collect();

        if members.is_empty() {
            continue;
        }

        let weights: Vec<usize> = members
            .iter()
            .map(|&i| set.get(i).map(Locator::weight).unwrap_or(0) as usize)
            .collect();

        let mut vec = Vec::new();
        if weights.iter().all(|&w| w == 0) {
            vec.extend(members.iter().copied());
        } else {
            for (&idx, &w) in members.iter().zip(weights.iter()) {
                vec.extend(std::iter::repeat(idx).take(w));
            }
        }
        return vec;
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Locator, LocatorState, Mapping};

    fn mapping_with(locs: &[(&str, u8, u8, LocatorState)]) -> Mapping {
        let mut m = Mapping::new("10.0.0.0/8".parse().unwrap(), 10);
        for (addr, prio, weight, state) in locs {
            m.add_locator(Locator::remote(addr.parse().unwrap(), *state, *prio, *weight))
                .unwrap();
        }
        m
    }

    #[test]
    fn weighted_expansion_in_canonical_order() {
        // A=192.0.2.1 w1, B=192.0.2.2 w3 in tier 1; C parked in tier 2.
        let m = mapping_with(&[
            ("192.0.2.1", 1, 1, LocatorState::Up),
            ("192.0.2.2", 1, 3, LocatorState::Up),
            ("192.0.2.9", 2, 1, LocatorState::Up),
        ]);

        let mut vecs = BalancingVecs::new();
        vecs.recompute(&m);

        assert_eq!(vecs.all(), &[0, 1, 1, 1]);
        assert_eq!(vecs.v4(), &[0, 1, 1, 1]);
        assert!(vecs.v6().is_empty());
    }

    #[test]
    fn zero_weights_distribute_equally() {
        let m = mapping_with(&[
            ("192.0.2.1", 1, 0, LocatorState::Up),
            ("192.0.2.2", 1, 0, LocatorState::Up),
        ]);

        let mut vecs = BalancingVecs::new();
        vecs.recompute(&m);

        assert_eq!(vecs.all(), &[0, 1]);
    }

    #[test]
    fn down_tier_falls_back() {
        let m = mapping_with(&[
            ("192.0.2.1", 1, 10, LocatorState::Down),
            ("192.0.2.2", 2, 5, LocatorState::Up),
        ]);

        let mut vecs = BalancingVecs::new();
        vecs.recompute(&m);

        assert_eq!(vecs.all(), &[1, 1, 1, 1, 1]);
    }

    #[test]
    fn all_down_is_empty() {
        let m = mapping_with(&[("192.0.2.1", 1, 10, LocatorState::Down)]);

        let mut vecs = BalancingVecs::new();
        vecs.recompute(&m);

        assert!(vecs.is_empty());
        assert_eq!(vecs.select(42, None), None);
    }

    #[test]
    fn mixed_families_split_by_vector() {
        let m = mapping_with(&[
            ("192.0.2.1", 1, 1, LocatorState::Up),
            ("2001:db8::1", 1, 1, LocatorState::Up),
        ]);

        let mut vecs = BalancingVecs::new();
        vecs.recompute(&m);

        assert_eq!(vecs.v4().len(), 1);
        assert_eq!(vecs.v6().len(), 1);
        assert_eq!(vecs.all().len(), 2);
    }

    #[test]
    fn version_increments_per_recompute() {
        let m = mapping_with(&[("192.0.2.1", 1, 1, LocatorState::Up)]);

        let mut vecs = BalancingVecs::new();
        vecs.recompute(&m);
        vecs.recompute(&m);

        assert_eq!(vecs.version(), 2);
    }
}
