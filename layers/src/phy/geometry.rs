//! Frame geometry (C1).
//!
//! Builds the subcarrier-type and symbol-type tables once at construction
//! and provides the TBS lookups and the `is_data_cell` predicate that C2 and
//! C3 both consult as their single source of truth.

use common::{Mcs, DLCTRL_LEN, NFFT, NUM_DATA_SC, NUM_PILOT, NUM_SLOT, SLOT_LEN};

/// Subcarrier type at one of the `NFFT` frequency-domain indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcarrierType {
    Null,
    Data,
    Pilot,
}

/// Symbol type: whether symbol `s` of the subframe is a pilot symbol (the
/// first symbol of a slot) or an ordinary data-bearing symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    Pilot,
    Data,
}

/// Per-MCS modulation/coding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsParams {
    /// Constellation: bits per modulated cell.
    pub bps: usize,
    /// Convolutional code rate, expressed as (numerator, denominator).
    pub rate_num: usize,
    pub rate_den: usize,
}

/// The fixed table of `{QPSK, QPSK, QAM16, QAM64, QAM64}` paired with
/// `{1/2, 3/4, 1/2, 1/2, 3/4}` rates (§3).
pub const MCS_TABLE: [McsParams; 5] = [
    McsParams { bps: 2, rate_num: 1, rate_den: 2 },
    McsParams { bps: 2, rate_num: 3, rate_den: 4 },
    McsParams { bps: 4, rate_num: 1, rate_den: 2 },
    McsParams { bps: 6, rate_num: 1, rate_den: 2 },
    McsParams { bps: 6, rate_num: 3, rate_den: 4 },
];

/// Pilot subcarrier positions, counted in from each band edge (§3).
const PILOT_SC_OFFSETS: [usize; 4] = [2, 7, 12, 17];

/// Frame geometry: subcarrier/symbol type tables, built once and immutable
/// thereafter (§3 invariant).
#[derive(Debug, Clone)]
pub struct FrameGeometry {
    subcarrier_type: [SubcarrierType; NFFT],
    /// One entry per symbol of a *subframe* (`SUBFRAME_LEN` long, but the
    /// predicate only cares about a symbol's position within its slot, so
    /// this is indexed by symbol-within-slot = 0 for pilot, 1..SLOT_LEN-1
    /// for data. Stored as a lookup over 0..SLOT_LEN for reuse in both the
    /// DL and UL slot rectangles C3 builds.)
    symbol_type_in_slot: [SymbolType; SLOT_LEN],
}

impl FrameGeometry {
    /// Build the invariant subcarrier/symbol-type tables.
    pub fn new() -> Self {
        let mut subcarrier_type = [SubcarrierType::Null; NFFT];

        // Index 0 = DC, always null.
        subcarrier_type[0] = SubcarrierType::Null;

        // 20 lower + 20 upper used indices: 1..=20 and NFFT-20..NFFT.
        for sc in 1..=20 {
            subcarrier_type[sc] = SubcarrierType::Data;
        }
        for sc in (NFFT - 20)..NFFT {
            subcarrier_type[sc] = SubcarrierType::Data;
        }
        // Pilot positions within the used band, both edges.
        for &off in &PILOT_SC_OFFSETS {
            subcarrier_type[off] = SubcarrierType::Pilot;
            subcarrier_type[NFFT - 1 - off] = SubcarrierType::Pilot;
        }

        let data_count = subcarrier_type.iter().filter(|t| **t == SubcarrierType::Data).count();
        let pilot_count = subcarrier_type.iter().filter(|t| **t == SubcarrierType::Pilot).count();
        debug_assert_eq!(data_count, NUM_DATA_SC);
        debug_assert_eq!(pilot_count, NUM_PILOT);

        // Symbol 0 of a slot is the pilot symbol; symbols 1..SLOT_LEN-1 are
        // data-bearing.
        let mut symbol_type_in_slot = [SymbolType::Data; SLOT_LEN];
        symbol_type_in_slot[0] = SymbolType::Pilot;

        Self {
            subcarrier_type,
            symbol_type_in_slot,
        }
    }

    /// `is_data_cell(symbol_in_slot, sc) -> bool`: true iff the cell at this
    /// slot-relative symbol index and absolute subcarrier index carries
    /// caller-supplied data (as opposed to a pilot or a null guard/DC
    /// cell). On a pilot symbol, only data-typed subcarriers still carry
    /// data; pilot-typed subcarriers on a data symbol are *not* special
    /// (the table has no pilot subcarriers on non-pilot symbols — pilots
    /// are pilot-by-symbol, data-vs-pilot by subcarrier only matters
    /// within the pilot symbol).
    pub fn is_data_cell(&self, symbol_in_slot: usize, sc: usize) -> bool {
        let sc_type = self.subcarrier_type[sc];
        match self.symbol_type_in_slot[symbol_in_slot % SLOT_LEN] {
            SymbolType::Data => sc_type == SubcarrierType::Data || sc_type == SubcarrierType::Pilot,
            SymbolType::Pilot => sc_type == SubcarrierType::Data,
        }
    }

    /// True iff this subframe-relative symbol index is a pilot symbol:
    /// either the subframe's own lead-in symbol (index 0) or the first
    /// symbol of one of the `NUM_SLOT` data slots.
    pub fn is_pilot_symbol(&self, subframe_symbol: usize) -> bool {
        if subframe_symbol == 0 {
            return true;
        }
        for slot in 0..NUM_SLOT {
            let slot_start = DLCTRL_LEN + slot * (SLOT_LEN + 1);
            if subframe_symbol == slot_start {
                return true;
            }
        }
        false
    }

    pub fn subcarrier_type(&self, sc: usize) -> SubcarrierType {
        self.subcarrier_type[sc]
    }

    /// Number of data cells carried in one full slot: the pilot symbol
    /// contributes `NUM_DATA_SC` (pilot-typed subcarriers there carry the
    /// known pilot sequence, not data) and each of the remaining
    /// `SLOT_LEN-1` data-bearing symbols contributes `NUM_DATA_SC+NUM_PILOT`
    /// (every non-null subcarrier carries data off the pilot symbol). This
    /// is exactly the `S` used by the TBS formula below — consulting the
    /// `is_data_cell` predicate directly (the single source of truth) over
    /// the whole slot gives the same count.
    pub fn data_cells_per_slot(&self) -> usize {
        (SLOT_LEN - 1) * (NUM_DATA_SC + NUM_PILOT) + NUM_DATA_SC
    }

    /// Transport block size in bits for `mcs` (§3 formula):
    /// `((S * bps) - 16) * rate`, `S = (SLOT_LEN-1)*(NUM_DATA_SC+NUM_PILOT) + NUM_DATA_SC`.
    pub fn tbs_bits(&self, mcs: Mcs) -> usize {
        let params = MCS_TABLE[mcs.as_index()];
        let s = self.data_cells_per_slot();
        let coded_bits = s * params.bps;
        ((coded_bits - 16) * params.rate_num) / params.rate_den
    }

    /// TBS in bits for a single-symbol UL control slot: one ordinary
    /// data-bearing symbol (so both data- and pilot-typed subcarriers carry
    /// bits, per `is_data_cell`), QPSK, rate 1/2, minus the 16-bit
    /// terminator budget.
    pub fn ulctrl_bits(&self) -> usize {
        let bps = MCS_TABLE[0].bps;
        let s = NUM_DATA_SC + NUM_PILOT;
        ((s * bps) - 16) / 2
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcarrier_table_partitions_exactly() {
        let geom = FrameGeometry::new();
        let mut null = 0;
        let mut data = 0;
        let mut pilot = 0;
        for sc in 0..NFFT {
            match geom.subcarrier_type(sc) {
                SubcarrierType::Null => null += 1,
                SubcarrierType::Data => data += 1,
                SubcarrierType::Pilot => pilot += 1,
            }
        }
        assert_eq!(data, NUM_DATA_SC);
        assert_eq!(pilot, NUM_PILOT);
        assert_eq!(null, NFFT - NUM_DATA_SC - NUM_PILOT);
    }

    #[test]
    fn data_cells_per_slot_matches_predicate_sum() {
        let geom = FrameGeometry::new();

        // Count cells the predicate itself calls data, across one slot.
        let mut count = 0;
        for symbol in 0..SLOT_LEN {
            for sc in 0..NFFT {
                if geom.is_data_cell(symbol, sc) {
                    count += 1;
                }
            }
        }
        assert_eq!(count, geom.data_cells_per_slot());
    }

    #[test]
    fn tbs_bits_positive_and_matches_formula_for_all_mcs() {
        let geom = FrameGeometry::new();
        let s = (SLOT_LEN - 1) * (NUM_DATA_SC + NUM_PILOT) + NUM_DATA_SC;
        for m in 0..=Mcs::MAX {
            let mcs = Mcs::new(m).unwrap();
            let params = MCS_TABLE[mcs.as_index()];
            let expected = ((s * params.bps - 16) * params.rate_num) / params.rate_den;
            assert_eq!(geom.tbs_bits(mcs), expected);
            assert!(geom.tbs_bits(mcs) > 0);
        }
    }

    #[test]
    fn pilot_symbols_at_slot_boundaries() {
        let geom = FrameGeometry::new();
        assert!(geom.is_pilot_symbol(0));
        assert!(geom.is_pilot_symbol(DLCTRL_LEN));
        assert!(geom.is_pilot_symbol(DLCTRL_LEN + (SLOT_LEN + 1)));
        assert!(!geom.is_pilot_symbol(DLCTRL_LEN + 1));
    }
}
