//! Bit pipeline (C2): FEC encode → interleave → modulate on TX, and the
//! inverse on RX.
//!
//! The convolutional code is rate-1/2, constraint-length-7, generators
//! 133/171 octal (the de-facto "CONV_V27" pair); the rate-3/4 variant
//! punctures the mother code with a fixed pattern ("V27P34"), matching the
//! distilled original's naming (§4.2).

use common::{pack_bits, unpack_bits, Mcs};
use num_complex::Complex32;

use super::geometry::MCS_TABLE;

// ---------------------------------------------------------------------
// Convolutional code: rate 1/2, K=7, generators 133/171 octal.
// ---------------------------------------------------------------------

const CONSTRAINT_LEN: usize = 7;
const NUM_STATES: usize = 1 << (CONSTRAINT_LEN - 1); // 64
const GEN0: u8 = 0o133; // 91
const GEN1: u8 = 0o171; // 121
/// Terminator bits budgeted by the TBS formula (§3), at the *coded* bit
/// level (i.e. post rate-1/2 expansion, pre-puncture).
const TERMINATOR_CODED_BITS: usize = 16;

/// 3/4 puncture pattern over 3 consecutive (x, y) coded-bit pairs: keep
/// x0, y0, y1, x2; drop x1, y2. The de-facto standard rate-3/4 pattern for
/// a rate-1/2 mother code.
const PUNCTURE_3_4: [bool; 6] = [true, true, false, true, true, false];

fn parity(x: u8) -> bool {
    x.count_ones() % 2 == 1
}

/// Number of *input* (payload+terminator) zero bits needed to flush the
/// 6-bit shift register, expressed in input-bit units for this MCS's rate:
/// `16 * rate_num / rate_den` coded terminator bits translate to this many
/// input bits.
fn terminator_input_bits(mcs: Mcs) -> usize {
    let p = MCS_TABLE[mcs.as_index()];
    (TERMINATOR_CODED_BITS * p.rate_num) / p.rate_den
}

/// Convolutionally encode `input_bits` (payload followed by the
/// terminator's zero tail) into `2 * input_bits.len()` coded bits,
/// MSB/earliest-first. Always starts and (given a sufficient zero tail)
/// ends in state 0.
fn conv_encode(input_bits: &[bool]) -> Vec<bool> {
    let mut state: u8 = 0;
    let mut out = Vec::with_capacity(input_bits.len() * 2);
    for &bit in input_bits {
        let reg = ((state << 1) | (bit as u8)) & 0x7F;
        out.push(parity(reg & GEN0));
        out.push(parity(reg & GEN1));
        state = reg & 0x3F;
    }
    out
}

/// Puncture (rate 3/4 only; identity at rate 1/2).
fn puncture(coded: &[bool], mcs: Mcs) -> Vec<bool> {
    let p = MCS_TABLE[mcs.as_index()];
    if p.rate_num == 1 && p.rate_den == 2 {
        return coded.to_vec();
    }
    let mut out = Vec::with_capacity(coded.len() * 2 / 3);
    for chunk in coded.chunks(6) {
        for (i, &bit) in chunk.iter().enumerate() {
            if PUNCTURE_3_4[i] {
                out.push(bit);
            }
        }
    }
    out
}

/// Depuncture: insert LLR=0 at the positions the encoder dropped, matching
/// `puncture`'s pattern. `coded_len` is the pre-puncture (rate-1/2) length.
fn depuncture(received: &[f32], mcs: Mcs, coded_len: usize) -> Vec<f32> {
    let p = MCS_TABLE[mcs.as_index()];
    if p.rate_num == 1 && p.rate_den == 2 {
        return received.to_vec();
    }
    let mut out = Vec::with_capacity(coded_len);
    let mut it = received.iter();
    for chunk_start in (0..coded_len).step_by(6) {
        let chunk_len = (coded_len - chunk_start).min(6);
        for i in 0..chunk_len {
            if PUNCTURE_3_4[i] {
                out.push(*it.next().unwrap_or(&0.0));
            } else {
                out.push(0.0);
            }
        }
    }
    out
}

/// Branch cost: positive LLR means "bit is more likely 0". Cost is low
/// (negative) when the expected bit matches what the LLR favors.
fn branch_cost(expected_bit: bool, llr: f32) -> f32 {
    if expected_bit {
        llr
    } else {
        -llr
    }
}

/// Hard-output Viterbi decode of a terminated rate-1/2 trellis, fed soft
/// bit LLRs (`2 * num_info_bits` of them). Returns `num_info_bits` decoded
/// bits.
fn viterbi_decode(soft_bits: &[f32], num_info_bits: usize) -> Vec<bool> {
    const INF: f32 = f32::INFINITY;
    let mut path_metric = vec![INF; NUM_STATES];
    path_metric[0] = 0.0;
    let mut predecessors: Vec<[(u8, bool); NUM_STATES]> =
        vec![[(0u8, false); NUM_STATES]; num_info_bits];

    for (t, preds) in predecessors.iter_mut().enumerate() {
        let mut next_metric = vec![INF; NUM_STATES];
        let llr0 = soft_bits[2 * t];
        let llr1 = soft_bits[2 * t + 1];

        for state in 0..NUM_STATES {
            let metric = path_metric[state];
            if !metric.is_finite() {
                continue;
            }
            for &bit in &[false, true] {
                let reg = (((state as u8) << 1) | (bit as u8)) & 0x7F;
                let out0 = parity(reg & GEN0);
                let out1 = parity(reg & GEN1);
                let next_state = (reg & 0x3F) as usize;
                let cost = metric + branch_cost(out0, llr0) + branch_cost(out1, llr1);
                if cost < next_metric[next_state] {
                    next_metric[next_state] = cost;
                    preds[next_state] = (state as u8, bit);
                }
            }
        }
        path_metric = next_metric;
    }

    // The code is terminated, so the true path ends in state 0; fall back
    // to the best-surviving state if, for some reason, state 0 died (a
    // heavily-corrupted block).
    let mut end_state = 0usize;
    if !path_metric[0].is_finite() {
        end_state = path_metric
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(s, _)| s)
            .unwrap_or(0);
    }

    let mut bits = vec![false; num_info_bits];
    let mut state = end_state;
    for t in (0..num_info_bits).rev() {
        let (prev_state, bit) = predecessors[t][state];
        bits[t] = bit;
        state = prev_state as usize;
    }
    bits
}

// ---------------------------------------------------------------------
// Block interleaver, sized per-MCS to the coded byte count (§3 PHY state).
// ---------------------------------------------------------------------

/// Byte/octet-granular block interleaver: writes row-major into a
/// `depth x (n/depth)` matrix, reads column-major. `depth` is the largest
/// divisor of `n` not exceeding 16, so no padding is ever needed (`n` is
/// fixed per-MCS at construction time).
#[derive(Debug, Clone)]
pub struct BlockInterleaver {
    /// `perm[out_idx] = in_idx`
    perm: Vec<usize>,
    inv_perm: Vec<usize>,
}

impl BlockInterleaver {
    pub fn new(n: usize) -> Self {
        let depth = (1..=n.min(16)).rev().find(|d| n % d == 0).unwrap_or(1);
        let cols = n / depth;
        let mut perm = Vec::with_capacity(n);
        for c in 0..cols {
            for r in 0..depth {
                perm.push(r * cols + c);
            }
        }
        let mut inv_perm = vec![0usize; n];
        for (out_idx, &in_idx) in perm.iter().enumerate() {
            inv_perm[in_idx] = out_idx;
        }
        Self { perm, inv_perm }
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn interleave_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        self.perm.iter().map(|&i| bytes[i]).collect()
    }

    /// Deinterleave a soft-bit stream treated as octets (each group of 8
    /// LLRs is one "byte" for permutation purposes, matching the TX side's
    /// byte-granular interleave).
    pub fn deinterleave_llr_octets(&self, llrs: &[f32]) -> Vec<f32> {
        let n = self.perm.len();
        debug_assert_eq!(llrs.len(), n * 8);
        let mut out = vec![0.0f32; n * 8];
        for (out_octet, &in_octet) in self.inv_perm.iter().enumerate() {
            out[out_octet * 8..out_octet * 8 + 8]
                .copy_from_slice(&llrs[in_octet * 8..in_octet * 8 + 8]);
        }
        out
    }
}

// ---------------------------------------------------------------------
// Constellation modulator/demodulator.
// ---------------------------------------------------------------------

const QAM16_LEVELS: [f32; 2] = [1.0, 3.0];
const QAM64_LEVELS: [f32; 8] = [-7.0, -5.0, -3.0, -1.0, 1.0, 3.0, 5.0, 7.0];

/// Modulates/demodulates one cell's worth of bits for a given MCS's
/// constellation. Stateless across calls, as required by §4.2.
pub struct Modem {
    mcs: Mcs,
}

impl Modem {
    pub fn new(mcs: Mcs) -> Self {
        Self { mcs }
    }

    pub fn bits_per_symbol(&self) -> usize {
        MCS_TABLE[self.mcs.as_index()].bps
    }

    pub fn modulate(&self, bits: &[bool]) -> Complex32 {
        match self.bits_per_symbol() {
            2 => modulate_qpsk(bits),
            4 => modulate_16qam(bits),
            6 => modulate_64qam(bits),
            n => unreachable!("unsupported bits-per-symbol {n}"),
        }
    }

    /// Demodulate one cell to soft LLRs, one per bit, positive meaning
    /// "bit is more likely 0".
    pub fn demodulate(&self, cell: Complex32) -> Vec<f32> {
        match self.bits_per_symbol() {
            2 => demodulate_qpsk(cell),
            4 => demodulate_16qam(cell),
            6 => demodulate_64qam(cell),
            n => unreachable!("unsupported bits-per-symbol {n}"),
        }
    }
}

fn modulate_qpsk(bits: &[bool]) -> Complex32 {
    let scale = std::f32::consts::FRAC_1_SQRT_2;
    let s = |b: bool| if b { -1.0 } else { 1.0 };
    Complex32::new(scale * s(bits[0]), scale * s(bits[1]))
}

fn demodulate_qpsk(cell: Complex32) -> Vec<f32> {
    vec![cell.re, cell.im]
}

fn modulate_16qam(bits: &[bool]) -> Complex32 {
    let scale = 1.0 / 10.0_f32.sqrt();
    let s = |b: bool| if b { -1.0 } else { 1.0 };
    let level = |outer: bool| if outer { QAM16_LEVELS[1] } else { QAM16_LEVELS[0] };
    let i = s(bits[0]) * level(bits[2]);
    let q = s(bits[1]) * level(bits[3]);
    Complex32::new(scale * i, scale * q)
}

fn demodulate_16qam(cell: Complex32) -> Vec<f32> {
    let scale = 1.0 / 10.0_f32.sqrt();
    let re = cell.re / scale;
    let im = cell.im / scale;
    let mid = QAM16_LEVELS[0] + (QAM16_LEVELS[1] - QAM16_LEVELS[0]) / 2.0;
    vec![re, im, mid - re.abs(), mid - im.abs()]
}

fn modulate_64qam(bits: &[bool]) -> Complex32 {
    let scale = 1.0 / 42.0_f32.sqrt();
    let idx = |b0: bool, b1: bool, b2: bool| (b0 as usize) | ((b1 as usize) << 1) | ((b2 as usize) << 2);
    let i = QAM64_LEVELS[idx(bits[0], bits[2], bits[4])];
    let q = QAM64_LEVELS[idx(bits[1], bits[3], bits[5])];
    Complex32::new(scale * i, scale * q)
}

fn nearest_64qam_index(level: f32) -> usize {
    QAM64_LEVELS
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - level).abs().partial_cmp(&(b.1 - level).abs()).unwrap())
        .map(|(i, _)| i)
        .unwrap()
}

fn demodulate_64qam(cell: Complex32) -> Vec<f32> {
    let scale = 1.0 / 42.0_f32.sqrt();
    let re = cell.re / scale;
    let im = cell.im / scale;
    let i_idx = nearest_64qam_index(re);
    let q_idx = nearest_64qam_index(im);
    const CONF: f32 = 4.0;
    let soft = |idx: usize, bit: usize| {
        let hard = (idx >> bit) & 1 == 1;
        if hard {
            -CONF
        } else {
            CONF
        }
    };
    vec![
        soft(i_idx, 0),
        soft(q_idx, 0),
        soft(i_idx, 1),
        soft(q_idx, 1),
        soft(i_idx, 2),
        soft(q_idx, 2),
    ]
}

// ---------------------------------------------------------------------
// Top-level encode/decode over a rectangle of `num_cells` cells.
// ---------------------------------------------------------------------

/// Encode `payload` (must be exactly `payload_bits(mcs, num_cells)/8`
/// bytes) into `num_cells` modulated complex cells. Panics (caller bug,
/// per §4.2) if `payload` is the wrong length or `num_cells` can't hold it.
pub fn encode_cells(mcs: Mcs, num_cells: usize, payload: &[u8]) -> Vec<Complex32> {
    let modem = Modem::new(mcs);
    let bps = modem.bits_per_symbol();
    let total_coded_bits = num_cells * bps;

    let payload_bits_len = payload.len() * 8;
    let term_bits = terminator_input_bits(mcs);

    let mut input_bits = unpack_bits(payload);
    input_bits.resize(payload_bits_len + term_bits, false);

    let coded = conv_encode(&input_bits);
    let punctured = puncture(&coded, mcs);
    assert_eq!(
        punctured.len(),
        total_coded_bits,
        "buffer_underflow: encoder produced {} coded bits, slot holds {}",
        punctured.len(),
        total_coded_bits
    );

    let interleaver = BlockInterleaver::new(total_coded_bits / 8);
    let coded_bytes = pack_bits(&punctured);
    let interleaved_bytes = interleaver.interleave_bytes(&coded_bytes);
    let interleaved_bits = unpack_bits(&interleaved_bytes);

    interleaved_bits
        .chunks(bps)
        .map(|chunk| modem.modulate(chunk))
        .collect()
}

/// Decode `cells` back to the payload bytes, or `None` if the post-decode
/// terminator check fails (the `decode_failed` condition of §7 — the
/// caller is responsible for accounting it).
pub fn decode_cells(mcs: Mcs, num_cells: usize, cells: &[Complex32], payload_bytes: usize) -> Option<Vec<u8>> {
    let modem = Modem::new(mcs);
    let bps = modem.bits_per_symbol();
    let total_coded_bits = num_cells * bps;
    debug_assert_eq!(cells.len(), num_cells);

    let llrs: Vec<f32> = cells.iter().flat_map(|c| modem.demodulate(*c)).collect();

    let interleaver = BlockInterleaver::new(total_coded_bits / 8);
    let deinterleaved = interleaver.deinterleave_llr_octets(&llrs);

    let term_bits = terminator_input_bits(mcs);
    let num_info_bits = payload_bytes * 8 + term_bits;
    let coded_len = num_info_bits * 2;
    let depunctured = depuncture(&deinterleaved, mcs, coded_len);

    let decoded_bits = viterbi_decode(&depunctured, num_info_bits);
    let (payload_bits, tail) = decoded_bits.split_at(payload_bytes * 8);
    if tail.iter().any(|&b| b) {
        return None;
    }
    Some(pack_bits(payload_bits).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells_for(_mcs: Mcs) -> usize {
        // Use the normal data-slot cell count (S) from geometry for the
        // round-trip tests; independent of C1's FrameGeometry type to keep
        // this module's unit tests self-contained.
        552
    }

    fn payload_bytes_for(mcs: Mcs, num_cells: usize) -> usize {
        let p = MCS_TABLE[mcs.as_index()];
        let bps = p.bps;
        (((num_cells * bps) - 16) * p.rate_num / p.rate_den) / 8
    }

    #[test]
    fn round_trip_at_zero_noise_for_every_mcs() {
        for m in 0..=Mcs::MAX {
            let mcs = Mcs::new(m).unwrap();
            let num_cells = cells_for(mcs);
            let nbytes = payload_bytes_for(mcs, num_cells);
            let payload: Vec<u8> = (0..nbytes).map(|i| (i * 37 + 11) as u8).collect();

            let cells = encode_cells(mcs, num_cells, &payload);
            assert_eq!(cells.len(), num_cells);

            let decoded = decode_cells(mcs, num_cells, &cells, nbytes).expect("clean decode");
            assert_eq!(decoded, payload, "mismatch at mcs={m}");
        }
    }

    #[test]
    fn interleaver_is_a_bijection() {
        let il = BlockInterleaver::new(138);
        let mut seen = vec![false; 138];
        for &p in &il.perm {
            assert!(!seen[p]);
            seen[p] = true;
        }
    }

    #[test]
    fn modem_round_trips_hard_decisions_noiseless() {
        for m in 0..=Mcs::MAX {
            let mcs = Mcs::new(m).unwrap();
            let modem = Modem::new(mcs);
            let bps = modem.bits_per_symbol();
            let bits: Vec<bool> = (0..bps).map(|i| i % 2 == 0).collect();
            let cell = modem.modulate(&bits);
            let llrs = modem.demodulate(cell);
            for (i, &llr) in llrs.iter().enumerate() {
                let hard = llr < 0.0;
                assert_eq!(hard, bits[i], "mcs={m} bit={i}");
            }
        }
    }
}
