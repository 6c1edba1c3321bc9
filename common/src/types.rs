//! Common Types for the OFDM Base Station Core
//!
//! Fundamental newtypes and frame-geometry constants shared by every layer.
//! The geometry constants fix the reference configuration from the spec:
//! a 64-point FFT, 14-symbol slots, 64-symbol subframes, up to 16 users.

use serde::{Deserialize, Serialize};

/// User equipment identity, `1..=MAX_USER`. `0` is reserved to mean
/// "unassigned" in the scheduler's assignment arrays and is never a valid
/// `UserId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u8);

impl UserId {
    /// Create a validated `UserId`. Returns `None` for `0` (the
    /// unassigned sentinel) or values `>= MAX_USER`.
    pub fn new(value: u8) -> Option<Self> {
        if value > 0 && (value as usize) < MAX_USER {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Modulation & coding scheme index, `0..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Mcs(pub u8);

impl Mcs {
    pub const MAX: u8 = 4;

    /// Create a validated MCS index.
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// The most robust scheme, used as the default for newly-associated
    /// users and as the downgrade floor.
    pub const LOWEST: Self = Self(0);
    /// The least robust (highest-throughput) scheme.
    pub const HIGHEST: Self = Self(4);

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl Default for Mcs {
    fn default() -> Self {
        Self::LOWEST
    }
}

// ---------------------------------------------------------------------
// Frame geometry constants (§3 of the spec, reference configuration).
// ---------------------------------------------------------------------

/// FFT size. The core supports no other value (§1 Non-goals).
pub const NFFT: usize = 64;
/// Cyclic prefix length in samples.
pub const CP: usize = 4;
/// Number of data-typed subcarriers (used band, excluding pilots/DC/guard).
pub const NUM_DATA_SC: usize = 32;
/// Number of pilot-typed subcarriers.
pub const NUM_PILOT: usize = 8;
/// Number of null (guard + DC) subcarriers.
pub const NUM_GUARD: usize = 24;
/// OFDM symbols per data slot.
pub const SLOT_LEN: usize = 14;
/// Number of DL/UL data slots per subframe.
pub const NUM_SLOT: usize = 4;
/// Number of UL control slots per subframe.
pub const NUM_ULCTRL_SLOT: usize = 2;
/// OFDM symbols per subframe.
pub const SUBFRAME_LEN: usize = 64;
/// OFDM symbols occupied by the DL control message.
pub const DLCTRL_LEN: usize = 2;
/// Number of symbols carrying the sync sequence.
pub const SYNC_SYMBOLS: usize = 4;
/// Subframes per frame (UL control round-robin period).
pub const FRAME_LEN: usize = 8;
/// Symbol offset between the DL and UL halves of the TDD subframe.
pub const DL_UL_SHIFT: usize = 34;
/// Maximum number of associated users. `UserId` values are `1..MAX_USER`.
pub const MAX_USER: usize = 16;
/// Sample rate of the reference configuration, in Hz.
pub const SAMPLE_RATE_HZ: f64 = 256_000.0;

/// Default subframes of inactivity (no control or data traffic) before a
/// user is aged out and de-associated (§7 "may drop the user as inactive
/// after a configurable grace period").
pub const DEFAULT_INACTIVITY_TIMEOUT_SUBFRAMES: u64 = 800;

/// Consecutive UL `decode_failed` slots before the scheduler downgrades a
/// user's UL MCS by one step (§7 "persistent decode_failed rates trigger
/// an MCS downgrade").
pub const DECODE_FAILURE_DOWNGRADE_THRESHOLD: u32 = 5;

/// Maximum SDU size the fragmenter/reassembler accept.
pub const MAX_SDU_BYTES: usize = 2048;
/// Sequence number wrap, and the reassembler's sliding-window half-period.
pub const SEQ_MODULUS: u16 = 256;
/// Reassembler acceptance window width (disambiguates sequence wrap).
pub const SEQ_WINDOW: u16 = 128;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userid_validation() {
        assert!(UserId::new(0).is_none());
        assert!(UserId::new(1).is_some());
        assert!(UserId::new(15).is_some());
        assert!(UserId::new(16).is_none());
    }

    #[test]
    fn mcs_validation() {
        assert!(Mcs::new(0).is_some());
        assert!(Mcs::new(4).is_some());
        assert!(Mcs::new(5).is_none());
    }
}
