use std::{collections::HashMap, time::Instant};

use rand::Rng;

use crate::types::Address;

/// One outstanding request awaiting its reply. `kind` is whatever the
/// owning state machine needs to resume when the reply (or the final
/// timeout) arrives.
#[derive(Debug)]
pub struct PendingRequest<K> {
    pub nonce: u64,
    /// The RLOC the request was sent to; retransmissions reuse it.
    pub target: Address,
    /// Retransmissions still allowed before the request expires.
    pub retries_left: u8,
    pub sent_at: Instant,
    pub kind: K,
}

/// Pairs outbound requests with their replies through 64-bit random
/// nonces. Invariants: an outstanding nonce is unique; a request resolves
/// or expires exactly once (both paths remove it).
#[derive(Debug, Default)]
pub struct NonceTable<K> {
    pending: HashMap<u64, PendingRequest<K>>,
}

impl<K> NonceTable<K> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register a new request and return its nonce.
    pub fn issue(&mut self, target: Address, retries: u8, kind: K) -> u64 {
        let mut rng = rand::thread_rng();

        let nonce = loop {
            let candidate: u64 = rng.gen();
            if !self.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        self.pending.insert(
            nonce,
            PendingRequest {
                nonce,
                target,
                retries_left: retries,
                sent_at: Instant::now(),
                kind,
            },
        );
        nonce
    }

    pub fn get(&self, nonce: u64) -> Option<&PendingRequest<K>> {
        self.pending.get(&nonce)
    }

    pub fn contains(&self, nonce: u64) -> bool {
        self.pending.contains_key(&nonce)
    }

    /// Take the request a reply answers. Returns `None` for unknown
    /// nonces (stale or forged replies are dropped silently, per the
    /// error policy) and never yields the same request twice.
    pub fn resolve(&mut self, nonce: u64) -> Option<PendingRequest<K>> {
        self.pending.remove(&nonce)
    }

    /// Account for one retransmission. `Some` with the request while the
    /// retry budget lasts; `None` once exhausted, after which the caller
    /// must [`NonceTable::expire`] it.
    pub fn retry(&mut self, nonce: u64) -> Option<&PendingRequest<K>> {
        let req = self.pending.get_mut(&nonce)?;
        if req.retries_left == 0 {
            return None;
        }
        req.retries_left -= 1;
        Some(&*req)
    }

    /// Take a request out for its final-timeout path.
    pub fn expire(&mut self, nonce: u64) -> Option<PendingRequest<K>> {
        self.pending.remove(&nonce)
    }

    /// Drop every outstanding request for which `pred` holds. Used when
    /// the owner of those requests (a cache entry, a peer) goes away.
    pub fn purge<F: Fn(&PendingRequest<K>) -> bool>(&mut self, pred: F) {
        self.pending.retain(|_, req| !pred(req));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Address {
        "192.0.2.1".parse().unwrap()
    }

    #[test]
    fn issued_nonces_are_unique_and_outstanding() {
        let mut table = NonceTable::new();
        let a = table.issue(target(), 3, ());
        let b = table.issue(target(), 3, ());

        assert_ne!(a, b);
        assert!(table.contains(a));
        assert!(table.contains(b));
    }

    #[test]
    fn resolve_is_exactly_once() {
        let mut table = NonceTable::new();
        let nonce = table.issue(target(), 3, "req");

        assert!(table.resolve(nonce).is_some());
        assert!(table.resolve(nonce).is_none());
    }

    #[test]
    fn unknown_nonce_resolves_to_none() {
        let mut table: NonceTable<()> = NonceTable::new();
        assert!(table.resolve(12345).is_none());
    }

    #[test]
    fn retry_budget_runs_out() {
        let mut table = NonceTable::new();
        let nonce = table.issue(target(), 2, ());

        assert!(table.retry(nonce).is_some());
        assert!(table.retry(nonce).is_some());
        assert!(table.retry(nonce).is_none());
        assert!(table.expire(nonce).is_some());
        assert!(table.is_empty());
    }
}
