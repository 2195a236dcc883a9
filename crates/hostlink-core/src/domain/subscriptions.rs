//! Event intents and the aggregate subscription ref-count service.
//!
//! # What is an intent? (for beginners)
//!
//! Every event the host emits is tagged with an *intent*: a single bit that
//! names its category (inputs, scenes, outputs, ...).  A session subscribes by
//! OR-ing the bits it cares about into one `u64` mask.  An event reaches a
//! session only when `session_mask & event_intent != 0`.
//!
//! Some categories fire many times per second (audio meters, transform
//! updates).  Those live above bit 15 and are *not* part of
//! [`EventSubscription::ALL`], so a client has to ask for them explicitly.
//!
//! # Why count subscribers?
//!
//! The event source can skip expensive work (hooking per-frame signals,
//! sampling meters) when nobody is listening.  [`SubscriptionCounter`] keeps
//! one counter per bit holding the number of identified sessions whose mask
//! contains that bit.  The invariant is:
//!
//! ```text
//! counter.count(bit) == number of identified sessions with (mask & (1 << bit)) != 0
//! ```
//!
//! Every Identify adds its mask, every Reidentify removes the old mask and adds
//! the new one, and every disconnect of an identified session removes its mask.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

// ── Intent bits ───────────────────────────────────────────────────────────────

/// A subscription mask: the set of event intents a session wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventSubscription(pub u64);

impl EventSubscription {
    pub const NONE: u64 = 0;
    pub const GENERAL: u64 = 1 << 0;
    pub const CONFIG: u64 = 1 << 1;
    pub const SCENES: u64 = 1 << 2;
    pub const INPUTS: u64 = 1 << 3;
    pub const TRANSITIONS: u64 = 1 << 4;
    pub const FILTERS: u64 = 1 << 5;
    pub const OUTPUTS: u64 = 1 << 6;
    pub const SCENE_ITEMS: u64 = 1 << 7;
    pub const MEDIA_INPUTS: u64 = 1 << 8;
    pub const VENDORS: u64 = 1 << 9;
    pub const UI: u64 = 1 << 10;

    /// Every low-volume category.
    pub const ALL: u64 = Self::GENERAL
        | Self::CONFIG
        | Self::SCENES
        | Self::INPUTS
        | Self::TRANSITIONS
        | Self::FILTERS
        | Self::OUTPUTS
        | Self::SCENE_ITEMS
        | Self::MEDIA_INPUTS
        | Self::VENDORS
        | Self::UI;

    // High-volume categories, excluded from ALL.
    pub const INPUT_VOLUME_METERS: u64 = 1 << 16;
    pub const INPUT_ACTIVE_STATE_CHANGED: u64 = 1 << 17;
    pub const INPUT_SHOW_STATE_CHANGED: u64 = 1 << 18;
    pub const SCENE_ITEM_TRANSFORM_CHANGED: u64 = 1 << 19;

    /// Returns `true` if the mask shares at least one bit with `intent`.
    pub fn wants(&self, intent: u64) -> bool {
        self.0 & intent != 0
    }

    /// Returns `true` if `intent` touches only high-volume bits.
    ///
    /// Broadcasts for such intents never log their payload.
    pub fn is_high_volume(intent: u64) -> bool {
        intent & Self::ALL == 0
    }
}

impl From<u64> for EventSubscription {
    fn from(mask: u64) -> Self {
        Self(mask)
    }
}

// ── Ref-count service ─────────────────────────────────────────────────────────

/// Reported by [`SubscriptionCounter::verify_against`] when the aggregate
/// counts drift from the sessions' masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subscription count for bit {bit} is {actual}, expected {expected}")]
pub struct SubscriptionMismatch {
    pub bit: u32,
    pub expected: u64,
    pub actual: u64,
}

/// Thread-safe per-bit subscriber counts.
///
/// All operations are lock-free, so they are safe to call while a session's
/// operation lock is held.
pub struct SubscriptionCounter {
    counts: [AtomicU64; 64],
}

impl SubscriptionCounter {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Increments the count of every bit set in `mask`.
    pub fn add_refs(&self, mask: u64) {
        for bit in set_bits(mask) {
            self.counts[bit as usize].fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Decrements the count of every bit set in `mask`.
    ///
    /// Counts saturate at zero: removing a mask that was never added is logged
    /// and otherwise ignored.
    pub fn remove_refs(&self, mask: u64) {
        for bit in set_bits(mask) {
            let updated = self.counts[bit as usize].fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |current| current.checked_sub(1),
            );
            if updated.is_err() {
                tracing::warn!("subscription count for bit {bit} would go below zero");
            }
        }
    }

    /// Number of identified sessions subscribed to `bit` (0..64).
    pub fn count(&self, bit: u32) -> u64 {
        self.counts
            .get(bit as usize)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Returns `true` if any bit of `intent` has at least one subscriber.
    pub fn has_subscribers(&self, intent: u64) -> bool {
        set_bits(intent).any(|bit| self.count(bit) > 0)
    }

    /// Checks the counts against the masks of every identified session.
    ///
    /// # Errors
    ///
    /// Returns the first bit whose count differs from the number of masks
    /// containing it.
    pub fn verify_against<I>(&self, masks: I) -> Result<(), SubscriptionMismatch>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut expected = [0u64; 64];
        for mask in masks {
            for bit in set_bits(mask) {
                expected[bit as usize] += 1;
            }
        }
        for (bit, want) in expected.iter().enumerate() {
            let actual = self.counts[bit].load(Ordering::Acquire);
            if actual != *want {
                return Err(SubscriptionMismatch {
                    bit: bit as u32,
                    expected: *want,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl Default for SubscriptionCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active: Vec<(u32, u64)> = (0..64)
            .map(|bit| (bit, self.count(bit)))
            .filter(|(_, n)| *n > 0)
            .collect();
        f.debug_struct("SubscriptionCounter").field("active", &active).finish()
    }
}

/// Yields the index of each set bit, lowest first.
fn set_bits(mask: u64) -> impl Iterator<Item = u32> {
    (0..64u32).filter(move |bit| mask & (1u64 << bit) != 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
