//! Medium access control: wire formats, fragmentation/reassembly (C4),
//! per-user and BS-wide state, and the per-subframe scheduler (C5).

pub mod fragmentation;
pub mod packets;
pub mod scheduler;
pub mod user;

pub use scheduler::Scheduler;
pub use user::BsState;
