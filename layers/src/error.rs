//! Error taxonomy for the PHY/MAC core (§7).
//!
//! A single enum covers every error kind named in the spec. Fatal kinds are
//! distinguished by [`CoreError::is_fatal`] rather than a separate type, so
//! call sites that only care about "log and continue" vs. "log and exit"
//! don't need to match every variant individually.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Post-decode CRC/Viterbi failure. Local to the slot; never fatal.
    #[error("decode failed for user {user}, slot {slot}")]
    DecodeFailed { user: u8, slot: usize },

    /// A reassembler's deadline expired before all fragments arrived.
    #[error("reassembly timed out for user {user}, seq {seq}")]
    ReassemblyTimeout { user: u8, seq: u8 },

    /// Two fragments of the same (user, seq) disagree on `frag_total`.
    #[error("reassembly fragment-total mismatch for user {user}, seq {seq}: {first} vs {second}")]
    ReassemblyMismatch {
        user: u8,
        seq: u8,
        first: u8,
        second: u8,
    },

    /// The bit pipeline was handed fewer data cells than bits to transmit.
    /// Always a caller bug; fatal.
    #[error("buffer underflow: need {needed} cells, have {available}")]
    BufferUnderflow { needed: usize, available: usize },

    /// The radio driver could not service a call. Fatal.
    #[error("radio driver unavailable: {0}")]
    DriverUnavailable(String),

    /// A symbol-pair or slot-decode deadline was missed. Warning only.
    #[error("deadline missed: {label} took {elapsed_us}us (budget {budget_us}us)")]
    DeadlineMissed {
        label: &'static str,
        elapsed_us: u64,
        budget_us: u64,
    },

    /// The scheduler produced an assignment entry for a userid that is not
    /// associated. Fatal — scheduler input validation should have prevented
    /// this at association time.
    #[error("invalid assignment: userid {0} is not associated")]
    InvalidAssignment(u8),

    /// A UL slot decoded cleanly but named a userid that is not associated.
    /// The slot is discarded; not fatal.
    #[error("unknown user {0} in decoded UL slot")]
    UnknownUser(u8),

    /// A UL control or association request named a userid outside
    /// `1..MAX_USER`. Rejected at the edge.
    #[error("userid {0} out of range")]
    InvalidUser(u8),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CoreError {
    /// True if this error must terminate the process (§7 propagation
    /// policy). Everything else is local: logged and counted in per-user
    /// statistics, never propagated out of the task that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::BufferUnderflow { .. }
                | CoreError::DriverUnavailable(_)
                | CoreError::InvalidAssignment(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_are_exactly_the_documented_three() {
        assert!(CoreError::BufferUnderflow { needed: 1, available: 0 }.is_fatal());
        assert!(CoreError::DriverUnavailable("x".into()).is_fatal());
        assert!(CoreError::InvalidAssignment(3).is_fatal());

        assert!(!CoreError::DecodeFailed { user: 1, slot: 0 }.is_fatal());
        assert!(!CoreError::ReassemblyTimeout { user: 1, seq: 0 }.is_fatal());
        assert!(!CoreError::UnknownUser(1).is_fatal());
        assert!(!CoreError::DeadlineMissed {
            label: "tx",
            elapsed_us: 1,
            budget_us: 1
        }
        .is_fatal());
    }
}
