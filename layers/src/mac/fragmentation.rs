//! Fragmentation/reassembly (C4): split variable-length MAC SDUs into
//! slot-sized PDUs and reassemble them on the other end.
//!
//! The PDU payload capacity rarely divides the SDU length evenly, and the
//! header (§6) carries no explicit "valid bytes in this fragment" field —
//! only `frag_idx`/`frag_total`. To let the reassembler recover the exact
//! original SDU (not the zero-padded PDU-boundary length), the fragmenter
//! prefixes a 2-byte big-endian length ahead of the SDU bytes before
//! slicing into fragments; the reassembler strips it back off once every
//! fragment has arrived. This framing is internal to this module — every
//! other component deals in plain SDU bytes.

use common::{UserId, MAX_SDU_BYTES};

use super::packets::{PduHeader, PduType};
use crate::CoreError;

const LEN_PREFIX_BYTES: usize = 2;

/// Owns at most one SDU in flight, split into fixed-size fragments on
/// demand. The fragment payload capacity is chosen per-SDU at [`load`]
/// time (from the DL MCS in effect when the SDU starts being sent) and
/// held fixed for that SDU's lifetime, even if the MCS changes mid-stream
/// — switching capacity partway through a fragment run would make the
/// frag_idx/offset arithmetic ambiguous for no benefit.
pub struct Fragmenter {
    pdu_type: PduType,
    payload_capacity: usize,
    seq: u8,
    frag_idx: u8,
    frag_total: u8,
    framed: Option<Vec<u8>>,
}

impl Fragmenter {
    pub fn new(pdu_type: PduType) -> Self {
        Self {
            pdu_type,
            payload_capacity: 0,
            seq: 0,
            frag_idx: 0,
            frag_total: 0,
            framed: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.framed.is_none()
    }

    /// Load a new SDU, discarding any fragments not yet emitted from a
    /// previous one. Increments the sequence number.
    pub fn load(&mut self, sdu: &[u8], payload_capacity: usize) {
        debug_assert!(sdu.len() <= MAX_SDU_BYTES);
        let mut framed = Vec::with_capacity(LEN_PREFIX_BYTES + sdu.len());
        framed.extend_from_slice(&(sdu.len() as u16).to_be_bytes());
        framed.extend_from_slice(sdu);

        let frag_total = framed.len().div_ceil(payload_capacity).max(1);
        debug_assert!(frag_total <= u8::MAX as usize, "SDU too large for an 8-bit fragment count");

        self.payload_capacity = payload_capacity;
        self.seq = self.seq.wrapping_add(1);
        self.frag_idx = 0;
        self.frag_total = frag_total as u8;
        self.framed = Some(framed);
    }

    /// Emit the next fragment (header + `payload_capacity` bytes,
    /// zero-padded past the SDU end), or `None` if idle.
    pub fn next_fragment(&mut self) -> Option<Vec<u8>> {
        let framed = self.framed.as_ref()?;
        let start = self.frag_idx as usize * self.payload_capacity;
        let end = (start + self.payload_capacity).min(framed.len());
        let mut payload = framed[start..end].to_vec();
        payload.resize(self.payload_capacity, 0);

        let header = PduHeader {
            pdu_type: self.pdu_type,
            seq: self.seq,
            frag_idx: self.frag_idx,
            frag_total: self.frag_total,
        };
        let mut out = header.encode().to_vec();
        out.extend(payload);

        self.frag_idx += 1;
        if self.frag_idx >= self.frag_total {
            self.framed = None;
        }
        Some(out)
    }
}

/// True iff `candidate` is strictly newer than `current` within the
/// `SEQ_WINDOW`-wide forward acceptance window, disambiguating 8-bit
/// sequence-number wraparound.
fn is_newer(current: u8, candidate: u8) -> bool {
    if candidate == current {
        return false;
    }
    (candidate.wrapping_sub(current) as u16) < common::SEQ_WINDOW
}

/// Reassembles at most one SDU per user at a time.
pub struct Reassembler {
    user: UserId,
    payload_capacity: usize,
    current_seq: Option<u8>,
    frag_total: Option<u8>,
    received: Vec<bool>,
    buffer: Vec<u8>,
    started_at_subframe: u64,
}

impl Reassembler {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            payload_capacity: 0,
            current_seq: None,
            frag_total: None,
            received: Vec::new(),
            buffer: Vec::new(),
            started_at_subframe: 0,
        }
    }

    fn reset(&mut self) {
        self.current_seq = None;
        self.frag_total = None;
        self.received.clear();
        self.buffer.clear();
    }

    /// Feed one decoded PDU. `payload_capacity` is the slot's payload
    /// capacity at the MCS it was decoded with; only consulted when this
    /// fragment starts a new sequence. Returns the reassembled SDU once
    /// every fragment of its sequence has arrived.
    pub fn accept(&mut self, header: PduHeader, payload: &[u8], payload_capacity: usize, now_subframe: u64) -> Result<Option<Vec<u8>>, CoreError> {
        match self.current_seq {
            None => self.start(header, payload_capacity, now_subframe),
            Some(cur) if header.seq == cur => {}
            Some(cur) if is_newer(cur, header.seq) => self.start(header, payload_capacity, now_subframe),
            Some(_) => return Ok(None), // stale duplicate of an already-superseded sequence
        }

        match self.frag_total {
            Some(existing) if existing != header.frag_total => {
                return Err(CoreError::ReassemblyMismatch {
                    user: self.user.value(),
                    seq: header.seq,
                    first: existing,
                    second: header.frag_total,
                });
            }
            _ => {}
        }

        let idx = header.frag_idx as usize;
        if idx < self.received.len() && !self.received[idx] {
            self.received[idx] = true;
            let start = idx * self.payload_capacity;
            let n = payload.len().min(self.payload_capacity);
            self.buffer[start..start + n].copy_from_slice(&payload[..n]);
        }

        if !self.received.is_empty() && self.received.iter().all(|&b| b) {
            let total_len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
            let sdu = self.buffer.get(LEN_PREFIX_BYTES..LEN_PREFIX_BYTES + total_len).map(|s| s.to_vec());
            self.reset();
            return Ok(sdu);
        }
        Ok(None)
    }

    fn start(&mut self, header: PduHeader, payload_capacity: usize, now_subframe: u64) {
        self.current_seq = Some(header.seq);
        self.frag_total = Some(header.frag_total);
        self.payload_capacity = payload_capacity;
        self.received = vec![false; header.frag_total as usize];
        self.buffer = vec![0u8; header.frag_total as usize * payload_capacity];
        self.started_at_subframe = now_subframe;
    }

    /// If a reassembly is in flight and older than `deadline_subframes`,
    /// discard it and return the timeout error.
    pub fn check_deadline(&mut self, now_subframe: u64, deadline_subframes: u64) -> Option<CoreError> {
        let seq = self.current_seq?;
        if now_subframe.saturating_sub(self.started_at_subframe) > deadline_subframes {
            self.reset();
            Some(CoreError::ReassemblyTimeout { user: self.user.value(), seq })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 64;

    #[test]
    fn fragmenter_output_concatenates_to_framed_sdu_plus_padding() {
        let sdu: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let mut frag = Fragmenter::new(PduType::Data);
        frag.load(&sdu, CAP);

        let mut concatenated = Vec::new();
        while let Some(pdu) = frag.next_fragment() {
            concatenated.extend_from_slice(&pdu[4..]); // strip the 4-byte header
        }

        let mut expected = (sdu.len() as u16).to_be_bytes().to_vec();
        expected.extend_from_slice(&sdu);
        expected.resize(concatenated.len(), 0);
        assert_eq!(concatenated, expected);
    }

    #[test]
    fn reassembler_recovers_the_exact_sdu_in_order() {
        let sdu: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let mut frag = Fragmenter::new(PduType::Data);
        frag.load(&sdu, CAP);

        let user = UserId::new(1).unwrap();
        let mut reasm = Reassembler::new(user);
        let mut delivered = None;
        while let Some(pdu) = frag.next_fragment() {
            let header = PduHeader::decode(&pdu).unwrap();
            let result = reasm.accept(header, &pdu[4..], CAP, 0).unwrap();
            if let Some(sdu_out) = result {
                delivered = Some(sdu_out);
            }
        }
        assert_eq!(delivered, Some(sdu));
    }

    #[test]
    fn reassembler_recovers_the_exact_sdu_out_of_order() {
        let sdu: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let mut frag = Fragmenter::new(PduType::Data);
        frag.load(&sdu, CAP);

        let mut pdus = Vec::new();
        while let Some(pdu) = frag.next_fragment() {
            pdus.push(pdu);
        }
        // Reverse delivery order.
        pdus.reverse();

        let user = UserId::new(2).unwrap();
        let mut reasm = Reassembler::new(user);
        let mut delivered = None;
        for pdu in pdus {
            let header = PduHeader::decode(&pdu).unwrap();
            if let Some(sdu_out) = reasm.accept(header, &pdu[4..], CAP, 0).unwrap() {
                delivered = Some(sdu_out);
            }
        }
        assert_eq!(delivered, Some(sdu));
    }

    #[test]
    fn newer_sequence_discards_an_incomplete_older_one() {
        let user = UserId::new(3).unwrap();
        let mut reasm = Reassembler::new(user);

        let header0 = PduHeader { pdu_type: PduType::Data, seq: 10, frag_idx: 0, frag_total: 2 };
        assert_eq!(reasm.accept(header0, &[0u8; CAP], CAP, 0).unwrap(), None);

        // A newer sequence arrives before seq 10 completes.
        let header1 = PduHeader { pdu_type: PduType::Data, seq: 11, frag_idx: 0, frag_total: 1 };
        let mut payload = (1u16).to_be_bytes().to_vec();
        payload.push(42);
        payload.resize(CAP, 0);
        let delivered = reasm.accept(header1, &payload, CAP, 0).unwrap();
        assert_eq!(delivered, Some(vec![42]));
    }

    #[test]
    fn stale_duplicate_is_ignored() {
        let user = UserId::new(4).unwrap();
        let mut reasm = Reassembler::new(user);
        let header_new = PduHeader { pdu_type: PduType::Data, seq: 50, frag_idx: 0, frag_total: 2 };
        reasm.accept(header_new, &[0u8; CAP], CAP, 0).unwrap();

        let header_stale = PduHeader { pdu_type: PduType::Data, seq: 10, frag_idx: 0, frag_total: 1 };
        assert_eq!(reasm.accept(header_stale, &[0u8; CAP], CAP, 0).unwrap(), None);
    }

    #[test]
    fn mismatched_frag_total_is_an_error() {
        let user = UserId::new(5).unwrap();
        let mut reasm = Reassembler::new(user);
        let header0 = PduHeader { pdu_type: PduType::Data, seq: 1, frag_idx: 0, frag_total: 2 };
        reasm.accept(header0, &[0u8; CAP], CAP, 0).unwrap();

        let header1 = PduHeader { pdu_type: PduType::Data, seq: 1, frag_idx: 1, frag_total: 3 };
        let err = reasm.accept(header1, &[0u8; CAP], CAP, 0).unwrap_err();
        assert!(matches!(err, CoreError::ReassemblyMismatch { .. }));
    }

    #[test]
    fn deadline_expiry_discards_and_reports_timeout() {
        let user = UserId::new(6).unwrap();
        let mut reasm = Reassembler::new(user);
        let header0 = PduHeader { pdu_type: PduType::Data, seq: 1, frag_idx: 0, frag_total: 2 };
        reasm.accept(header0, &[0u8; CAP], CAP, 0).unwrap();

        assert!(reasm.check_deadline(5, 100).is_none());
        let err = reasm.check_deadline(200, 100).unwrap();
        assert!(matches!(err, CoreError::ReassemblyTimeout { seq: 1, .. }));
        assert!(reasm.check_deadline(300, 100).is_none()); // already reset
    }
}
