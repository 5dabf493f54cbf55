use std::{collections::HashMap, net::IpAddr};

use crate::types::{Address, Afi};

/// Longest-prefix-match index over EID prefixes.
///
/// Prefixes from different instance-IDs and address families never
/// overlap, so the index keeps one binary radix tree per (instance-ID,
/// AFI) pair and walks address bits inside it. Values sit at the depth of
/// their prefix length; every valued node passed on the way down is a
/// covering prefix of the query.
///
/// Single-writer: the owning database mutates it only from the event-loop
/// thread.
#[derive(Debug)]
pub struct PrefixIndex<V> {
    trees: HashMap<(u32, Afi), Node<V>>,
    len: usize,
}

#[derive(Debug)]
struct Node<V> {
    value: Option<V>,
    children: [Option<Box<Node<V>>>; 2],
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Node {
            value: None,
            children: [None, None],
        }
    }
}

impl<V> Node<V> {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.iter().all(Option::is_none)
    }
}

/// Bit-addressable form of an IP address plus the tree it belongs in.
struct BitKey {
    iid: u32,
    afi: Afi,
    bits: u128,
    width: u8,
    plen: u8,
}

impl BitKey {
    fn from_address(addr: &Address) -> Option<BitKey> {
        let ip = addr.ip()?;
        let plen = addr.plen()?;

        let (bits, width, afi) = match ip {
            IpAddr::V4(v4) => (u32::from(v4) as u128, 32, Afi::Ipv4),
            IpAddr::V6(v6) => (u128::from(v6), 128, Afi::Ipv6),
        };

        Some(BitKey {
            iid: addr.instance_id(),
            afi,
            bits,
            width,
            plen: plen.min(width),
        })
    }

    fn bit(&self, depth: u8) -> usize {
        ((self.bits >> (self.width - 1 - depth)) & 1) as usize
    }
}

impl<V> PrefixIndex<V> {
    pub fn new() -> Self {
        Self {
            trees: HashMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `value` at `prefix`, returning the value previously stored
    /// at the exact same key. Non-IP-bearing addresses are not indexable
    /// and are reported as `None` replacements on lookup paths.
    pub fn insert(&mut self, prefix: &Address, value: V) -> Option<V> {
        let key = BitKey::from_address(prefix)?;
        let mut node = self.trees.entry((key.iid, key.afi)).or_default();

        for depth in 0..key.plen {
            let branch = key.bit(depth);
            node = &mut **node.children[branch].get_or_insert_with(Box::default);
        }

        let old = node.value.replace(value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn exact_lookup(&self, prefix: &Address) -> Option<&V> {
        let key = BitKey::from_address(prefix)?;
        let mut node = self.trees.get(&(key.iid, key.afi))?;

        for depth in 0..key.plen {
            node = node.children[key.bit(depth)].as_deref()?;
        }

        node.value.as_ref()
    }

    pub fn exact_lookup_mut(&mut self, prefix: &Address) -> Option<&mut V> {
        let key = BitKey::from_address(prefix)?;
        let mut node = self.trees.get_mut(&(key.iid, key.afi))?;

        for depth in 0..key.plen {
            node = node.children[key.bit(depth)].as_deref_mut()?;
        }

        node.value.as_mut()
    }

    /// The most specific stored prefix covering `addr`.
    pub fn longest_prefix_match(&self, addr: &Address) -> Option<&V> {
        let key = BitKey::from_address(addr)?;
        let mut node = self.trees.get(&(key.iid, key.afi))?;
        let mut best = node.value.as_ref();

        for depth in 0..key.plen {
            match node.children[key.bit(depth)].as_deref() {
                Some(next) => {
                    node = next;
                    if node.value.is_some() {
                        best = node.value.as_ref();
                    }
                }
                None => break,
            }
        }

        best
    }

    pub fn longest_prefix_match_mut(&mut self, addr: &Address) -> Option<&mut V> {
        // Two passes: find the depth of the best match immutably, then
        // descend again to hand out the mutable reference.
        let depth = self.best_match_depth(addr)?;
        let key = BitKey::from_address(addr)?;
        let mut node = self.trees.get_mut(&(key.iid, key.afi))?;

        for d in 0..depth {
            node = node.children[key.bit(d)].as_deref_mut()?;
        }

        node.value.as_mut()
    }

    fn best_match_depth(&self, addr: &Address) -> Option<u8> {
        let key = BitKey::from_address(addr)?;
        let mut node = self.trees.get(&(key.iid, key.afi))?;
        let mut best = node.value.as_ref().map(|_| 0u8);

        for depth in 0..key.plen {
            match node.children[key.bit(depth)].as_deref() {
                Some(next) => {
                    node = next;
                    if node.value.is_some() {
                        best = Some(depth + 1);
                    }
                }
                None => break,
            }
        }

        best
    }

    pub fn remove(&mut self, prefix: &Address) -> Option<V> {
        let key = BitKey::from_address(prefix)?;
        let root = self.trees.get_mut(&(key.iid, key.afi))?;

        let removed = remove_at(root, &key, 0);
        if removed.is_some() {
            self.len -= 1;
            if root.is_empty() {
                self.trees.remove(&(key.iid, key.afi));
            }
        }
        removed
    }

    /// Every stored value, preorder per tree. Order across trees is
    /// unspecified.
    pub fn values(&self) -> Vec<&V> {
        let mut out = Vec::with_capacity(self.len);
        for tree in self.trees.values() {
            collect(tree, &mut out);
        }
        out
    }

    pub fn values_mut(&mut self) -> Vec<&mut V> {
        let mut out = Vec::with_capacity(self.len);
        for tree in self.trees.values_mut() {
            collect_mut(tree, &mut out);
        }
        out
    }
}

impl<V> Default for PrefixIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_at<V>(node: &mut Node<V>, key: &BitKey, depth: u8) -> Option<V> {
    if depth == key.plen {
        return node.value.take();
    }

    let branch = key.bit(depth);
    let child = node.children[branch].as_deref_mut()?;
    let removed = remove_at(child, key, depth + 1);

    if removed.is_some() && child.is_empty() {
        node.children[branch] = None;
    }
    removed
}

fn collect<'a, V>(node: &'a Node<V>, out: &mut Vec<&'a V>) {
    if let Some(v) = &node.value {
        out.push(v);
    }
    for child in node.children.iter().flatten() {
        collect(child, out);
    }
}

fn collect_mut<'a, V>(node: &'a mut Node<V>, out: &mut Vec<&'a mut V>) {
    if let Some(v) = &mut node.value {
        out.push(v);
    }
    for child in node.children.iter_mut().flatten() {
        collect_mut(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn insert_then_exact_lookup() {
        let mut idx = PrefixIndex::new();
        idx.insert(&addr("10.0.0.0/8"), "a");

        assert_eq!(idx.exact_lookup(&addr("10.0.0.0/8")), Some(&"a"));
        assert_eq!(idx.exact_lookup(&addr("10.0.0.0/9")), None);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_then_lookup_misses() {
        let mut idx = PrefixIndex::new();
        idx.insert(&addr("10.0.0.0/8"), "a");

        assert_eq!(idx.remove(&addr("10.0.0.0/8")), Some("a"));
        assert_eq!(idx.exact_lookup(&addr("10.0.0.0/8")), None);
        assert!(idx.is_empty());
    }

    #[test]
    fn longest_match_prefers_most_specific() {
        let mut idx = PrefixIndex::new();
        idx.insert(&addr("10.0.0.0/8"), "coarse");
        idx.insert(&addr("10.1.0.0/16"), "fine");

        assert_eq!(idx.longest_prefix_match(&addr("10.1.2.3")), Some(&"fine"));
        assert_eq!(idx.longest_prefix_match(&addr("10.9.9.9")), Some(&"coarse"));
        assert_eq!(idx.longest_prefix_match(&addr("11.0.0.1")), None);
    }

    #[test]
    fn instance_ids_do_not_leak() {
        let mut idx = PrefixIndex::new();
        idx.insert(&addr("[iid/1]10.0.0.0/8"), "one");
        idx.insert(&addr("10.0.0.0/8"), "zero");

        assert_eq!(
            idx.longest_prefix_match(&addr("[iid/1]10.2.3.4")),
            Some(&"one")
        );
        assert_eq!(idx.longest_prefix_match(&addr("10.2.3.4")), Some(&"zero"));
        assert_eq!(idx.longest_prefix_match(&addr("[iid/2]10.2.3.4")), None);
    }

    #[test]
    fn families_are_disjoint() {
        let mut idx = PrefixIndex::new();
        idx.insert(&addr("::/0"), "v6");
        idx.insert(&addr("0.0.0.0/0"), "v4");

        assert_eq!(idx.longest_prefix_match(&addr("2001:db8::1")), Some(&"v6"));
        assert_eq!(idx.longest_prefix_match(&addr("192.0.2.1")), Some(&"v4"));
    }

    #[test]
    fn replacement_returns_old_value() {
        let mut idx = PrefixIndex::new();
        assert_eq!(idx.insert(&addr("10.0.0.0/8"), 1), None);
        assert_eq!(idx.insert(&addr("10.0.0.0/8"), 2), Some(1));
        assert_eq!(idx.len(), 1);
    }
}
