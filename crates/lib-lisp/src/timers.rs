use std::collections::HashMap;

use crate::{constants::WHEEL_SIZE, types::Address};

pub type TimerId = u64;

/// Everything periodic in the control plane is one of these, delivered by
/// the wheel to the owning device on the loop thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Time to re-register every authoritative mapping with every
    /// configured Map-Server.
    PeriodicMapRegister,

    /// An outstanding request may need retransmission or expiry.
    RequestRetry { nonce: u64 },

    /// A cache entry's TTL ran out.
    CacheExpiry { eid: Address },

    /// Time to probe one locator of a cached mapping.
    RlocProbe { eid: Address, rloc: Address },

    /// The per-(EID, peer) SMR gate reopens.
    SmrGateClear { eid: Address, peer: Address },

    /// Retry datagrams that hit a would-block send.
    ResendQueued,
}

/// Hashed timing wheel: 4096 one-second spokes plus a rotation counter
/// for delays past one rotation. The reactor calls [`TimerWheel::tick`]
/// once per second and dispatches whatever events fall due; callbacks of
/// the original design become typed events handed back to the caller, so
/// firing cannot touch freed owners.
///
/// `start` is O(1) and returns a handle; `stop` is O(1), idempotent, and
/// safe on a handle whose timer has already fired.
#[derive(Debug)]
pub struct TimerWheel<E> {
    spokes: Vec<Vec<TimerId>>,
    timers: HashMap<TimerId, TimerRec<E>>,
    current: usize,
    next_id: TimerId,
    expirations: u64,
}

#[derive(Debug)]
struct TimerRec<E> {
    rotations: u64,
    event: E,
}

impl<E> TimerWheel<E> {
    pub fn new() -> Self {
        Self {
            spokes: (0..WHEEL_SIZE).map(|_| Vec::new()).collect(),
            timers: HashMap::new(),
            current: 0,
            next_id: 1,
            expirations: 0,
        }
    }

    /// Arm a timer that will deliver `event` from the `tick` call made
    /// `duration_secs` seconds from now. A zero duration rounds up to one
    /// tick rather than parking for a whole rotation.
    pub fn start(&mut self, duration_secs: u64, event: E) -> TimerId {
        let ticks = duration_secs.max(1);
        let id = self.next_id;
        self.next_id += 1;

        let pos = (self.current + (ticks as usize % WHEEL_SIZE)) % WHEEL_SIZE;
        self.timers.insert(
            id,
            TimerRec {
                rotations: ticks / WHEEL_SIZE as u64,
                event,
            },
        );
        self.spokes[pos].push(id);
        id
    }

    /// Disarm. A handle may be stopped any number of times, before or
    /// after its timer fired; only the first stop of a running timer has
    /// an effect.
    pub fn stop(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn running_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Advance one spoke and collect the events due on it, in the order
    /// their timers were started. Timers with rotations left stay parked
    /// on the spoke; stopped handles evaporate.
    pub fn tick(&mut self) -> Vec<E> {
        self.current = (self.current + 1) % WHEEL_SIZE;
        let ids = std::mem::take(&mut self.spokes[self.current]);

        let mut due = Vec::new();
        let mut kept = Vec::new();

        for id in ids {
            match self.timers.get_mut(&id) {
                None => {} // stopped since it was parked
                Some(rec) if rec.rotations > 0 => {
                    rec.rotations -= 1;
                    kept.push(id);
                }
                Some(_) => {
                    if let Some(rec) = self.timers.remove(&id) {
                        self.expirations += 1;
                        due.push(rec.event);
                    }
                }
            }
        }

        self.spokes[self.current] = kept;
        due
    }
}

impl<E> Default for TimerWheel<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_duration() {
        let mut wheel = TimerWheel::new();
        wheel.start(3, "a");

        assert!(wheel.tick().is_empty());
        assert!(wheel.tick().is_empty());
        assert_eq!(wheel.tick(), vec!["a"]);
        assert!(wheel.tick().is_empty());
        assert_eq!(wheel.expirations(), 1);
    }

    #[test]
    fn stop_prevents_fire_and_is_idempotent() {
        let mut wheel = TimerWheel::new();
        let id = wheel.start(1, "a");

        wheel.stop(id);
        wheel.stop(id);
        assert!(wheel.tick().is_empty());

        // Stopping after fire is a no-op too.
        let id = wheel.start(1, "b");
        assert_eq!(wheel.tick(), vec!["b"]);
        wheel.stop(id);
        assert_eq!(wheel.running_timers(), 0);
    }

    #[test]
    fn same_spoke_fires_in_insertion_order() {
        let mut wheel = TimerWheel::new();
        wheel.start(1, "first");
        wheel.start(1, "second");

        assert_eq!(wheel.tick(), vec!["first", "second"]);
    }

    #[test]
    fn zero_duration_rounds_up_to_one_tick() {
        let mut wheel = TimerWheel::new();
        wheel.start(0, "now-ish");

        assert_eq!(wheel.tick(), vec!["now-ish"]);
    }

    #[test]
    fn rollover_waits_full_rotations() {
        let mut wheel = TimerWheel::new();
        wheel.start(5000, "late");

        for _ in 0..4999 {
            assert!(wheel.tick().is_empty());
        }
        assert_eq!(wheel.tick(), vec!["late"]);
    }

    #[test]
    fn rearm_by_stop_and_start() {
        let mut wheel = TimerWheel::new();
        let id = wheel.start(2, "old");
        wheel.stop(id);
        wheel.start(1, "new");

        assert_eq!(wheel.tick(), vec!["new"]);
        assert!(wheel.tick().is_empty());
    }
}
