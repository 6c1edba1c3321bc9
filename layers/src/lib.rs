//! PHY/MAC core of the OFDM base station.
//!
//! Six components, leaves first: frame geometry (C1) and the bit
//! pipeline (C2) live under [`phy`]; the subframe assembler/disassembler
//! (C3) lives there too, since it is PHY-side framing. Fragmentation and
//! reassembly (C4), per-user state (§3), and the scheduler (C5) live
//! under [`mac`]. The realtime coordinator (C6) ties the four
//! cooperating tasks together.

pub mod coordinator;
pub mod error;
pub mod mac;
pub mod phy;

pub use error::CoreError;
