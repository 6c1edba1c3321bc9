//! Subframe assembler/disassembler (C3): fills and extracts the slots of a
//! subframe in the frequency-domain grid.
//!
//! The downlink layout of one subframe (symbol indices 0..63): symbols
//! 0..1 carry the DL-CTRL packet; symbols `DLCTRL_LEN + slot*(SLOT_LEN+1)
//! .. +SLOT_LEN` (slot = 0..NUM_SLOT) carry the four DL data slots; the
//! remainder idles or carries sync. The uplink layout is the same shape,
//! shifted by `DL_UL_SHIFT` symbols (with wraparound within the
//! subframe); its two control-region symbols (the UL counterpart of
//! DLCTRL — only the BS transmits DL-CTRL, so UL repurposes that same
//! structural budget) carry the `NUM_ULCTRL_SLOT` UL control slots.

use common::{Mcs, CP, DLCTRL_LEN, DL_UL_SHIFT, NFFT, NUM_DATA_SC, NUM_PILOT, NUM_SLOT, NUM_ULCTRL_SLOT, SLOT_LEN, SUBFRAME_LEN};
use ndarray::Array2;
use num_complex::Complex32;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use super::geometry::{FrameGeometry, SubcarrierType};
use super::pipeline;

/// Fixed seed for the deterministic pilot sequence: the same sequence
/// must be regenerated identically by both the BS and every UE.
const PILOT_SEED: u64 = 0x5A5A_1234_BEEF_CAFE;

/// MCS used for the DL-CTRL channel. Chosen so the 15-byte fixed DL-CTRL
/// header plus a margin of broadcast payload fits in two symbols' worth
/// of non-null subcarriers.
pub const BROADCAST_MCS: Mcs = Mcs(2);

/// MCS used for the UL control channel (§3: "ULCTRL slot size uses a
/// single symbol with QPSK, rate 1/2").
pub const ULCTRL_MCS: Mcs = Mcs(0);

fn wrapped_symbols(start: usize, len: usize) -> Vec<usize> {
    (0..len).map(|i| (start + i) % SUBFRAME_LEN).collect()
}

/// Absolute subframe symbols of DL data slot `slot` (0..NUM_SLOT).
pub fn dl_data_slot_symbols(slot: usize) -> Vec<usize> {
    let start = DLCTRL_LEN + slot * (SLOT_LEN + 1);
    wrapped_symbols(start, SLOT_LEN)
}

/// Absolute subframe symbols of UL data slot `slot` (0..NUM_SLOT).
pub fn ul_data_slot_symbols(slot: usize) -> Vec<usize> {
    let start = (DLCTRL_LEN + slot * (SLOT_LEN + 1) + DL_UL_SHIFT) % SUBFRAME_LEN;
    wrapped_symbols(start, SLOT_LEN)
}

/// Absolute subframe symbol of UL control slot `idx` (0..NUM_ULCTRL_SLOT).
pub fn ul_ctrl_slot_symbol(idx: usize) -> usize {
    (idx + DL_UL_SHIFT) % SUBFRAME_LEN
}

/// Non-null subcarrier indices, ascending — the flat allocation used by
/// the control channels (DL-CTRL, UL control), which unlike data slots do
/// not carve out pilot-typed subcarriers for a reference sequence.
fn non_null_subcarriers(geometry: &FrameGeometry) -> Vec<usize> {
    (0..NFFT).filter(|&sc| geometry.subcarrier_type(sc) != SubcarrierType::Null).collect()
}

/// Pilot-typed subcarrier indices, ascending.
fn pilot_subcarriers(geometry: &FrameGeometry) -> Vec<usize> {
    (0..NFFT).filter(|&sc| geometry.subcarrier_type(sc) == SubcarrierType::Pilot).collect()
}

/// Owns the frequency-domain TX/RX grids, the symbol/subframe counters,
/// and the deterministic pilot sequence. One instance per process,
/// allocated at startup and torn down at shutdown (§3 PHY state).
pub struct PhyState {
    pub geometry: FrameGeometry,
    /// Double-buffered on subframe parity: `tx_grids[tx_subframe % 2]` is
    /// writable, `tx_grids[(tx_subframe + 1) % 2]` is being streamed out.
    tx_grids: [Array2<Complex32>; 2],
    rx_grid: Array2<Complex32>,
    pilot_sequence: Vec<Complex32>,
    pub tx_subframe: u64,
    pub tx_symbol: usize,
    pub rx_subframe: u64,
    pub rx_symbol: usize,
}

impl PhyState {
    pub fn new() -> Self {
        let geometry = FrameGeometry::new();
        let num_pilot_sc = pilot_subcarriers(&geometry).len();
        let mut rng = StdRng::seed_from_u64(PILOT_SEED);
        let pilot_sequence = (0..num_pilot_sc)
            .map(|_| {
                let scale = std::f32::consts::FRAC_1_SQRT_2;
                let i: bool = rng.gen();
                let q: bool = rng.gen();
                let s = |b: bool| if b { -1.0 } else { 1.0 };
                Complex32::new(scale * s(i), scale * s(q))
            })
            .collect();

        Self {
            geometry,
            tx_grids: [
                Array2::from_elem((SUBFRAME_LEN, NFFT), Complex32::new(0.0, 0.0)),
                Array2::from_elem((SUBFRAME_LEN, NFFT), Complex32::new(0.0, 0.0)),
            ],
            rx_grid: Array2::from_elem((SUBFRAME_LEN, NFFT), Complex32::new(0.0, 0.0)),
            pilot_sequence,
            tx_subframe: 0,
            tx_symbol: 0,
            rx_subframe: 0,
            rx_symbol: 0,
        }
    }

    fn write_grid_index(&self) -> usize {
        (self.tx_subframe % 2) as usize
    }

    fn read_grid_index(&self) -> usize {
        ((self.tx_subframe + 1) % 2) as usize
    }

    /// The grid the scheduler/C3 may currently fill.
    pub fn tx_write_grid_mut(&mut self) -> &mut Array2<Complex32> {
        let idx = self.write_grid_index();
        &mut self.tx_grids[idx]
    }

    /// The grid the TX-stream task is currently airing, read-only.
    pub fn tx_read_grid(&self) -> &Array2<Complex32> {
        &self.tx_grids[self.read_grid_index()]
    }

    pub fn rx_grid_mut(&mut self) -> &mut Array2<Complex32> {
        &mut self.rx_grid
    }

    pub fn rx_grid(&self) -> &Array2<Complex32> {
        &self.rx_grid
    }

    /// Zero the currently-writable grid and fill the four pilot symbols,
    /// readying it for a fresh subframe's worth of scheduler writes.
    pub fn reset_write_grid(&mut self) {
        let pilot_sequence = self.pilot_sequence.clone();
        let pilot_subcarriers = pilot_subcarriers(&self.geometry);
        let idx = self.write_grid_index();
        let grid = &mut self.tx_grids[idx];
        grid.fill(Complex32::new(0.0, 0.0));
        for slot in 0..NUM_SLOT {
            let pilot_symbol = dl_data_slot_symbols(slot)[0];
            for (pilot_idx, &sc) in pilot_subcarriers.iter().enumerate() {
                grid[[pilot_symbol, sc]] = pilot_sequence[pilot_idx];
            }
        }
    }

    pub fn advance_tx_symbol(&mut self) {
        self.tx_symbol += 1;
        if self.tx_symbol >= SUBFRAME_LEN {
            self.tx_symbol = 0;
            self.tx_subframe += 1;
        }
    }

    pub fn advance_rx_symbol(&mut self) {
        self.rx_symbol += 1;
        if self.rx_symbol >= SUBFRAME_LEN {
            self.rx_symbol = 0;
            self.rx_subframe += 1;
        }
    }
}

impl Default for PhyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `payload` into a DL or UL data slot's data cells (symbol-in-slot
/// order 0..SLOT_LEN, ascending subcarrier within each symbol).
pub fn write_data_slot(grid: &mut Array2<Complex32>, geometry: &FrameGeometry, symbols: &[usize], mcs: Mcs, payload: &[u8]) {
    let cells: Vec<(usize, usize)> = symbols
        .iter()
        .enumerate()
        .flat_map(|(i, &sym)| (0..NFFT).filter(move |&sc| geometry.is_data_cell(i, sc)).map(move |sc| (sym, sc)))
        .collect();
    let modulated = pipeline::encode_cells(mcs, cells.len(), payload);
    for ((sym, sc), value) in cells.into_iter().zip(modulated) {
        grid[[sym, sc]] = value;
    }
}

/// Extract a DL or UL data slot's payload (the inverse of
/// [`write_data_slot`]), or `None` on a decode failure.
pub fn read_data_slot(grid: &Array2<Complex32>, geometry: &FrameGeometry, symbols: &[usize], mcs: Mcs, payload_bytes: usize) -> Option<Vec<u8>> {
    let cells: Vec<Complex32> = symbols
        .iter()
        .enumerate()
        .flat_map(|(i, &sym)| (0..NFFT).filter(move |&sc| geometry.is_data_cell(i, sc)).map(move |sc| grid[[sym, sc]]))
        .collect();
    pipeline::decode_cells(mcs, cells.len(), &cells, payload_bytes)
}

/// Write a control payload (DL-CTRL or UL control) into `symbols`, every
/// non-null subcarrier of each (no pilot carve-out), at `mcs`.
pub fn write_control(grid: &mut Array2<Complex32>, geometry: &FrameGeometry, symbols: &[usize], mcs: Mcs, payload: &[u8]) {
    let non_null = non_null_subcarriers(geometry);
    let num_cells = symbols.len() * non_null.len();
    let modulated = pipeline::encode_cells(mcs, num_cells, payload);
    let mut it = modulated.into_iter();
    for &sym in symbols {
        for &sc in &non_null {
            grid[[sym, sc]] = it.next().unwrap();
        }
    }
}

pub fn read_control(grid: &Array2<Complex32>, geometry: &FrameGeometry, symbols: &[usize], mcs: Mcs, payload_bytes: usize) -> Option<Vec<u8>> {
    let non_null = non_null_subcarriers(geometry);
    let cells: Vec<Complex32> = symbols.iter().flat_map(|&sym| non_null.iter().map(move |&sc| grid[[sym, sc]])).collect();
    pipeline::decode_cells(mcs, cells.len(), &cells, payload_bytes)
}

/// Capacity in bytes of the DL-CTRL channel (two symbols, [`BROADCAST_MCS`]).
pub fn dlctrl_payload_bytes(geometry: &FrameGeometry) -> usize {
    let cells = DLCTRL_LEN * non_null_subcarriers(geometry).len();
    let params = super::geometry::MCS_TABLE[BROADCAST_MCS.as_index()];
    (((cells * params.bps) - 16) * params.rate_num) / params.rate_den / 8
}

/// Capacity in bytes of one UL control slot (one symbol, [`ULCTRL_MCS`]).
/// Matches [`FrameGeometry::ulctrl_bits`] (§3) exactly: the formula is
/// duplicated rather than shared because this one also knows the 8-bit
/// byte conversion and the non-null-subcarrier cell count the grid
/// actually uses, whereas `ulctrl_bits` is the abstract §3 formula C1
/// exposes to the rest of the core.
pub fn ulctrl_payload_bytes(geometry: &FrameGeometry) -> usize {
    geometry.ulctrl_bits() / 8
}

/// Symbols of the DL-CTRL control region.
pub fn dlctrl_symbols() -> Vec<usize> {
    (0..DLCTRL_LEN).collect()
}

/// Number of UL control regions this geometry carries (`NUM_ULCTRL_SLOT`).
pub fn num_ulctrl_slots() -> usize {
    NUM_ULCTRL_SLOT
}

/// Samples per OFDM symbol including the cyclic prefix (shared with the
/// radio driver's buffer sizing, §6).
pub const SYMBOL_LEN: usize = NFFT + CP;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dl_and_ul_slots_each_span_slot_len_symbols_with_no_duplicates() {
        for slot in 0..NUM_SLOT {
            let dl = dl_data_slot_symbols(slot);
            let ul = ul_data_slot_symbols(slot);
            assert_eq!(dl.len(), SLOT_LEN);
            assert_eq!(ul.len(), SLOT_LEN);
            let mut sorted = ul.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), SLOT_LEN, "ul slot {slot} symbols overlap");
        }
    }

    #[test]
    fn ul_ctrl_slots_land_on_the_dlctrl_symbols_shifted() {
        for i in 0..NUM_ULCTRL_SLOT {
            assert_eq!(ul_ctrl_slot_symbol(i), (i + DL_UL_SHIFT) % SUBFRAME_LEN);
        }
    }

    #[test]
    fn data_slot_round_trip_at_zero_noise() {
        let geometry = FrameGeometry::new();
        let mut grid = Array2::from_elem((SUBFRAME_LEN, NFFT), Complex32::new(0.0, 0.0));
        let symbols = dl_data_slot_symbols(0);
        let mcs = Mcs::new(2).unwrap();
        let tbs_bits = geometry.tbs_bits(mcs);
        let payload: Vec<u8> = (0..tbs_bits / 8).map(|i| (i * 13 + 5) as u8).collect();

        write_data_slot(&mut grid, &geometry, &symbols, mcs, &payload);
        let decoded = read_data_slot(&grid, &geometry, &symbols, mcs, payload.len()).expect("clean decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn control_channel_round_trip_at_zero_noise() {
        let geometry = FrameGeometry::new();
        let mut grid = Array2::from_elem((SUBFRAME_LEN, NFFT), Complex32::new(0.0, 0.0));
        let symbols = dlctrl_symbols();
        let cap = dlctrl_payload_bytes(&geometry);
        assert!(cap >= 15, "DL-CTRL capacity {cap} too small for the fixed header");
        let payload: Vec<u8> = (0..cap).map(|i| i as u8).collect();

        write_control(&mut grid, &geometry, &symbols, BROADCAST_MCS, &payload);
        let decoded = read_control(&grid, &geometry, &symbols, BROADCAST_MCS, payload.len()).expect("clean decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn ul_control_slot_round_trip_at_zero_noise() {
        let geometry = FrameGeometry::new();
        let mut grid = Array2::from_elem((SUBFRAME_LEN, NFFT), Complex32::new(0.0, 0.0));
        let symbols = [ul_ctrl_slot_symbol(0)];
        let cap = ulctrl_payload_bytes(&geometry);
        assert_eq!(cap, geometry.ulctrl_bits() / 8);
        let payload: Vec<u8> = (0..cap).map(|i| (i * 3 + 1) as u8).collect();

        write_control(&mut grid, &geometry, &symbols, ULCTRL_MCS, &payload);
        let decoded = read_control(&grid, &geometry, &symbols, ULCTRL_MCS, payload.len()).expect("clean decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn double_buffer_write_and_read_indices_never_collide() {
        let mut phy = PhyState::new();
        for _ in 0..10 {
            assert_ne!(phy.write_grid_index(), phy.read_grid_index());
            phy.tx_subframe += 1;
        }
    }
}
