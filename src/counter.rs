//! Message counter primitives.
//!
//! Outbound traffic uses a [`LocalCounter`] that advances exactly once per
//! transmitted message. Inbound traffic is validated by a [`PeerCounter`]:
//! the highest counter seen plus a sliding bitmap of the preceding
//! [`REPLAY_WINDOW_BITS`] values, allowing bounded out-of-order delivery
//! while rejecting replays.
//!
//! The contract on receive is `verify` → decrypt → `commit`: a counter is
//! only committed once the message has authenticated and been accepted for
//! delivery, so a forged counter can never poison the window.

use rand::Rng;
use thiserror::Error;

/// Replay window size in packets.
pub const REPLAY_WINDOW_BITS: u32 = 64;

/// Errors from counter validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    #[error("duplicate message counter {0}")]
    DuplicateMessageReceived(u32),

    #[error("message counter {counter} below the replay window (max seen {max_seen})")]
    MessageCounterOutOfWindow { counter: u32, max_seen: u32 },

    #[error("message counter exhausted")]
    MessageCounterExhausted,
}

/// Monotonic outbound message counter.
///
/// Callers read [`value`](LocalCounter::value) first and then
/// [`advance`](LocalCounter::advance); wraparound is treated as session
/// death, not recovered here.
#[derive(Clone, Debug)]
pub struct LocalCounter {
    value: u32,
}

impl LocalCounter {
    /// Create a counter starting at the given value.
    pub fn new(initial: u32) -> Self {
        Self { value: initial }
    }

    /// Create a counter starting at a random value.
    ///
    /// Used for counters whose first value is observable before any key
    /// agreement, so a fresh boot does not restart at a predictable point.
    pub fn random() -> Self {
        Self {
            value: rand::rng().random(),
        }
    }

    /// Current counter value (the next value to go on the wire).
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Advance past the current value.
    pub fn advance(&mut self) -> Result<(), CounterError> {
        self.value = self
            .value
            .checked_add(1)
            .ok_or(CounterError::MessageCounterExhausted)?;
        Ok(())
    }
}

/// Inbound counter state for one peer: highest counter seen, a bitmap of
/// the preceding window, and whether a baseline has been established.
///
/// Encrypted sessions start unsynchronized and wait for the counter-sync
/// service to call [`set_counter`](PeerCounter::set_counter).
/// Unauthenticated sessions adopt the first observed value instead
/// (trust-on-first-use).
#[derive(Clone, Debug)]
pub struct PeerCounter {
    /// Highest counter value accepted so far.
    max_seen: u32,
    /// Bit `k` set means counter `max_seen - 1 - k` was accepted.
    window: u64,
    /// Whether a baseline counter has been established.
    synchronized: bool,
}

impl PeerCounter {
    /// Create an unsynchronized counter.
    pub fn new() -> Self {
        Self {
            max_seen: 0,
            window: 0,
            synchronized: false,
        }
    }

    /// Whether a baseline counter has been established.
    pub fn synchronized(&self) -> bool {
        self.synchronized
    }

    /// Highest counter value accepted so far.
    pub fn max_seen(&self) -> u32 {
        self.max_seen
    }

    /// Check a received counter against the window without updating state.
    ///
    /// An unsynchronized counter accepts anything; the subsequent
    /// [`commit`](PeerCounter::commit) adopts the value as the baseline.
    pub fn verify(&self, counter: u32) -> Result<(), CounterError> {
        if !self.synchronized {
            return Ok(());
        }

        if counter == self.max_seen {
            return Err(CounterError::DuplicateMessageReceived(counter));
        }
        if counter > self.max_seen {
            return Ok(());
        }

        let offset = self.max_seen - counter;
        if offset > REPLAY_WINDOW_BITS {
            return Err(CounterError::MessageCounterOutOfWindow {
                counter,
                max_seen: self.max_seen,
            });
        }
        if self.window >> (offset - 1) & 1 != 0 {
            return Err(CounterError::DuplicateMessageReceived(counter));
        }
        Ok(())
    }

    /// Trust-on-first-use check for unauthenticated sessions.
    ///
    /// Identical to [`verify`](PeerCounter::verify): the first observed
    /// value passes and is adopted at commit; afterwards the window
    /// applies. Kept as a separate entry point so call sites say which
    /// policy they rely on.
    pub fn verify_or_trust_first(&self, counter: u32) -> Result<(), CounterError> {
        self.verify(counter)
    }

    /// Record an accepted counter.
    ///
    /// Must only be called after the message has authenticated and been
    /// accepted for delivery.
    pub fn commit(&mut self, counter: u32) {
        if !self.synchronized {
            self.max_seen = counter;
            self.window = 0;
            self.synchronized = true;
            return;
        }

        if counter > self.max_seen {
            let shift = counter - self.max_seen;
            if shift > REPLAY_WINDOW_BITS {
                self.window = 0;
            } else if shift == REPLAY_WINDOW_BITS {
                // the old max_seen lands on the last window bit
                self.window = 1u64 << (REPLAY_WINDOW_BITS - 1);
            } else {
                // the old max_seen lands at offset `shift` in the new window
                self.window = (self.window << shift) | (1u64 << (shift - 1));
            }
            self.max_seen = counter;
        } else if counter < self.max_seen {
            let offset = self.max_seen - counter;
            if offset <= REPLAY_WINDOW_BITS {
                self.window |= 1u64 << (offset - 1);
            }
        }
    }

    /// Force the baseline to a known value, clearing the window.
    ///
    /// Used by the counter-synchronization service once the peer's counter
    /// has been learned through the sync handshake.
    pub fn set_counter(&mut self, counter: u32) {
        self.max_seen = counter;
        self.window = 0;
        self.synchronized = true;
    }
}

impl Default for PeerCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(counter: &mut PeerCounter, value: u32) {
        counter.verify(value).expect("counter should verify");
        counter.commit(value);
    }

    #[test]
    fn test_local_counter_advances() {
        let mut counter = LocalCounter::new(10);
        assert_eq!(counter.value(), 10);
        counter.advance().unwrap();
        assert_eq!(counter.value(), 11);
    }

    #[test]
    fn test_local_counter_wraparound_is_fatal() {
        let mut counter = LocalCounter::new(u32::MAX);
        assert_eq!(counter.advance(), Err(CounterError::MessageCounterExhausted));
        assert_eq!(counter.value(), u32::MAX);
    }

    #[test]
    fn test_trust_first_adopts_then_rejects_replay() {
        let mut counter = PeerCounter::new();
        assert!(!counter.synchronized());

        counter.verify_or_trust_first(0x1000).unwrap();
        counter.commit(0x1000);
        assert!(counter.synchronized());
        assert_eq!(counter.max_seen(), 0x1000);

        assert_eq!(
            counter.verify_or_trust_first(0x1000),
            Err(CounterError::DuplicateMessageReceived(0x1000))
        );
    }

    #[test]
    fn test_sequential_counters() {
        let mut counter = PeerCounter::new();
        counter.set_counter(0);
        for value in 1..=100 {
            accept(&mut counter, value);
        }
        assert_eq!(counter.max_seen(), 100);
    }

    #[test]
    fn test_replay_within_window_rejected() {
        let mut counter = PeerCounter::new();
        counter.set_counter(0);
        for value in 1..=5 {
            accept(&mut counter, value);
        }
        for value in 1..=5 {
            assert_eq!(
                counter.verify(value),
                Err(CounterError::DuplicateMessageReceived(value))
            );
        }
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut counter = PeerCounter::new();
        counter.set_counter(0);
        accept(&mut counter, 5);
        accept(&mut counter, 3);
        accept(&mut counter, 4);
        accept(&mut counter, 1);
        accept(&mut counter, 2);

        for value in 1..=5 {
            assert_eq!(
                counter.verify(value),
                Err(CounterError::DuplicateMessageReceived(value))
            );
        }
    }

    #[test]
    fn test_below_window_rejected() {
        let mut counter = PeerCounter::new();
        counter.set_counter(1000);
        assert_eq!(
            counter.verify(1000 - REPLAY_WINDOW_BITS - 1),
            Err(CounterError::MessageCounterOutOfWindow {
                counter: 1000 - REPLAY_WINDOW_BITS - 1,
                max_seen: 1000,
            })
        );
        // oldest value still inside the window is fine
        counter.verify(1000 - REPLAY_WINDOW_BITS).unwrap();
    }

    #[test]
    fn test_window_slides() {
        let mut counter = PeerCounter::new();
        counter.set_counter(0);
        accept(&mut counter, 1);
        accept(&mut counter, REPLAY_WINDOW_BITS + 1);

        // 1 is now at the very edge of the window and marked seen
        assert_eq!(
            counter.verify(1),
            Err(CounterError::DuplicateMessageReceived(1))
        );

        accept(&mut counter, REPLAY_WINDOW_BITS + 2);
        assert!(matches!(
            counter.verify(1),
            Err(CounterError::MessageCounterOutOfWindow { .. })
        ));
    }

    #[test]
    fn test_large_jump_clears_window() {
        let mut counter = PeerCounter::new();
        counter.set_counter(0);
        accept(&mut counter, 1);
        accept(&mut counter, 1_000_000);

        assert!(matches!(
            counter.verify(1),
            Err(CounterError::MessageCounterOutOfWindow { .. })
        ));
        // counters just below the new max are unseen
        counter.verify(999_999).unwrap();
    }

    #[test]
    fn test_set_counter_resets_window() {
        let mut counter = PeerCounter::new();
        counter.set_counter(50);
        accept(&mut counter, 51);

        counter.set_counter(0x500);
        assert_eq!(counter.max_seen(), 0x500);
        counter.verify(0x4FF).unwrap();
        assert_eq!(
            counter.verify(0x500),
            Err(CounterError::DuplicateMessageReceived(0x500))
        );
    }
}
