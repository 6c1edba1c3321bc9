//! Physical layer: frame geometry (C1), the bit pipeline (C2), OFDM
//! modulation, and the subframe assembler/disassembler (C3).

pub mod geometry;
pub mod ofdm;
pub mod pipeline;
pub mod subframe;

pub use geometry::FrameGeometry;
pub use subframe::PhyState;
