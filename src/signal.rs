//! Signal channel — per-task wake-up bitmask
//!
//! Lock-free: senders OR bits into the pending mask, the owner clears the
//! bits it consumes with a single compare-exchange. No queueing: a bit
//! signalled twice before it is consumed wakes the owner once, and the
//! extra post is counted against that bit so the owner can tell a
//! coalesced release apart.
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Signal bits carried by a channel
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        const S0 = 1 << 0;
        const S1 = 1 << 1;
        const S2 = 1 << 2;
        const S3 = 1 << 3;
        const _ = !0;
    }
}

impl Signals {
    /// Signal set from a raw CMSIS-style mask (`0x01`, `0x03`, ...)
    pub const fn mask(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }
}

/// Result of consuming pending signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumed {
    /// Bits that satisfied the wait (cleared from the channel)
    pub bits: Signals,
    /// Most posts that landed on any one of `bits` while it was pending
    pub coalesced: u32,
}

/// Number of distinct signal bits
const BITS: usize = u32::BITS as usize;

/// Per-task signal mailbox
///
/// Size: 132 bytes
pub struct SignalChannel {
    /// Pending bits
    pending: AtomicU32,
    /// Posts absorbed by an already-pending bit, per bit
    repeats: [AtomicU32; BITS],
}

impl SignalChannel {
    /// Create an empty channel
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            repeats: [const { AtomicU32::new(0) }; BITS],
        }
    }

    /// Set `bits` (sender side)
    ///
    /// Never blocks. Returns the mask that was pending before the post.
    pub fn signal(&self, bits: Signals) -> Signals {
        let previous = self.pending.fetch_or(bits.bits(), Ordering::AcqRel);
        let mut repeated = previous & bits.bits();
        while repeated != 0 {
            let bit = repeated.trailing_zeros() as usize;
            self.repeats[bit].fetch_add(1, Ordering::Relaxed);
            repeated &= repeated - 1;
        }
        Signals::from_bits_retain(previous)
    }

    /// Consume whichever of `wanted` are pending (owner side)
    ///
    /// Clears exactly the consumed bits; other pending bits stay set.
    /// Returns `None` if none of `wanted` is pending.
    pub fn consume(&self, wanted: Signals) -> Option<Consumed> {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            let hit = current & wanted.bits();
            if hit == 0 {
                return None;
            }
            match self.pending.compare_exchange_weak(
                current,
                current & !hit,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // Only repeats of the consumed bits belong to this wakeup;
                    // a multi-bit post repeats every bit at once
                    let mut coalesced = 0;
                    let mut bits = hit;
                    while bits != 0 {
                        let bit = bits.trailing_zeros() as usize;
                        coalesced = coalesced.max(self.repeats[bit].swap(0, Ordering::Relaxed));
                        bits &= bits - 1;
                    }
                    return Some(Consumed {
                        bits: Signals::from_bits_retain(hit),
                        coalesced,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Is any of `wanted` pending?
    pub fn is_pending(&self, wanted: Signals) -> bool {
        self.pending.load(Ordering::Acquire) & wanted.bits() != 0
    }

    /// Currently pending bits
    pub fn pending(&self) -> Signals {
        Signals::from_bits_retain(self.pending.load(Ordering::Acquire))
    }
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_then_consume() {
        let ch = SignalChannel::new();
        assert!(ch.consume(Signals::S0).is_none());

        ch.signal(Signals::S0);
        assert!(ch.is_pending(Signals::S0));

        let got = ch.consume(Signals::S0).unwrap();
        assert_eq!(got.bits, Signals::S0);
        assert_eq!(got.coalesced, 0);
        assert!(ch.pending().is_empty());
    }

    #[test]
    fn test_signal_persists_until_wait() {
        let ch = SignalChannel::new();
        ch.signal(Signals::mask(0x02));
        // Nothing consumes it for a while; the bit must still be there
        assert_eq!(ch.pending(), Signals::mask(0x02));
        assert!(ch.consume(Signals::mask(0x02)).is_some());
    }

    #[test]
    fn test_double_signal_single_wakeup() {
        let ch = SignalChannel::new();
        ch.signal(Signals::S0);
        ch.signal(Signals::S0);

        let got = ch.consume(Signals::S0).unwrap();
        assert_eq!(got.coalesced, 1);
        // Second consume finds nothing: one wakeup per consumed bit-set
        assert!(ch.consume(Signals::S0).is_none());
    }

    #[test]
    fn test_any_of_mask_and_partial_clear() {
        let ch = SignalChannel::new();
        ch.signal(Signals::S1 | Signals::S2);

        // Waiting on 0x03 is satisfied by bit 1 alone and leaves bit 2 pending
        let got = ch.consume(Signals::mask(0x03)).unwrap();
        assert_eq!(got.bits, Signals::S1);
        assert_eq!(ch.pending(), Signals::S2);
    }

    #[test]
    fn test_unrelated_bits_do_not_satisfy() {
        let ch = SignalChannel::new();
        ch.signal(Signals::S3);
        assert!(ch.consume(Signals::S0).is_none());
        assert_eq!(ch.pending(), Signals::S3);
    }

    #[test]
    fn test_disjoint_posts_are_not_coalesced() {
        let ch = SignalChannel::new();
        ch.signal(Signals::S0);
        ch.signal(Signals::S1);
        let got = ch.consume(Signals::all()).unwrap();
        assert_eq!(got.bits, Signals::S0 | Signals::S1);
        assert_eq!(got.coalesced, 0);
    }

    #[test]
    fn test_repeats_counted_per_bit() {
        let ch = SignalChannel::new();
        ch.signal(Signals::S1);
        ch.signal(Signals::S1);
        ch.signal(Signals::S0);

        // Repeats of S1 do not belong to a wakeup on S0
        let got = ch.consume(Signals::S0).unwrap();
        assert_eq!(got.coalesced, 0);
        assert_eq!(ch.pending(), Signals::S1);

        let got = ch.consume(Signals::S1).unwrap();
        assert_eq!(got.coalesced, 1);
    }

    #[test]
    fn test_multi_bit_repeat_counted_once() {
        let ch = SignalChannel::new();
        ch.signal(Signals::mask(0x03));
        ch.signal(Signals::mask(0x03));
        assert_eq!(ch.consume(Signals::mask(0x03)).unwrap().coalesced, 1);

        ch.signal(Signals::mask(0x03));
        ch.signal(Signals::mask(0x03));
        ch.signal(Signals::S0);
        assert_eq!(ch.consume(Signals::mask(0x03)).unwrap().coalesced, 2);
    }
}
