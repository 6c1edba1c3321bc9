//! Wire formats (§6): the DL-CTRL packet, the UL control packet, and the
//! MAC-PDU header every data-slot payload starts with. All multi-byte
//! fields are big-endian, matching the DL-CTRL header's convention.

use common::{NUM_SLOT, NUM_ULCTRL_SLOT};

pub const DLCTRL_MAGIC: u32 = 0xD1CC_D1CC;
/// Fixed DL-CTRL header length, before the variable broadcast payload.
pub const DLCTRL_HEADER_LEN: usize = 4 + 1 + NUM_SLOT + NUM_SLOT + NUM_ULCTRL_SLOT;

/// The three assignment vectors plus a broadcast payload, packed into the
/// DL-CTRL channel each subframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlCtrl {
    pub subframe_seq: u8,
    pub dl_data_assignments: [u8; NUM_SLOT],
    pub ul_data_assignments: [u8; NUM_SLOT],
    pub ul_ctrl_assignments: [u8; NUM_ULCTRL_SLOT],
    pub broadcast_payload: Vec<u8>,
}

impl DlCtrl {
    /// Serialize to exactly `capacity` bytes, zero-padding the broadcast
    /// payload to fill the slot.
    pub fn encode(&self, capacity: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&DLCTRL_MAGIC.to_be_bytes());
        out.push(self.subframe_seq);
        out.extend_from_slice(&self.dl_data_assignments);
        out.extend_from_slice(&self.ul_data_assignments);
        out.extend_from_slice(&self.ul_ctrl_assignments);
        out.extend_from_slice(&self.broadcast_payload);
        out.resize(capacity, 0);
        out
    }

    /// Parse a DL-CTRL packet. Returns `None` if the magic doesn't match
    /// (a corrupted or not-yet-synchronized frame) or the buffer is too
    /// short to hold the fixed header.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DLCTRL_HEADER_LEN {
            return None;
        }
        let magic = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        if magic != DLCTRL_MAGIC {
            return None;
        }
        let subframe_seq = bytes[4];
        let mut dl_data_assignments = [0u8; NUM_SLOT];
        dl_data_assignments.copy_from_slice(&bytes[5..5 + NUM_SLOT]);
        let ul_start = 5 + NUM_SLOT;
        let mut ul_data_assignments = [0u8; NUM_SLOT];
        ul_data_assignments.copy_from_slice(&bytes[ul_start..ul_start + NUM_SLOT]);
        let ulctrl_start = ul_start + NUM_SLOT;
        let mut ul_ctrl_assignments = [0u8; NUM_ULCTRL_SLOT];
        ul_ctrl_assignments.copy_from_slice(&bytes[ulctrl_start..ulctrl_start + NUM_ULCTRL_SLOT]);
        let broadcast_payload = bytes[ulctrl_start + NUM_ULCTRL_SLOT..].to_vec();

        Some(Self {
            subframe_seq,
            dl_data_assignments,
            ul_data_assignments,
            ul_ctrl_assignments,
            broadcast_payload,
        })
    }
}

/// UL control message types (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlCtrlType {
    Keepalive = 1,
    AssocReq = 2,
    ChannelReport = 3,
    BufferStatus = 4,
}

impl UlCtrlType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Keepalive),
            2 => Some(Self::AssocReq),
            3 => Some(Self::ChannelReport),
            4 => Some(Self::BufferStatus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlCtrl {
    Keepalive,
    /// Carries no payload beyond the type byte (§4.5): the requester is
    /// identified purely by the userid the BS already knows it by.
    AssocReq,
    /// Signed SNR estimate, in dB.
    ChannelReport { snr_db: i8 },
    /// Unsigned estimate of the UE's outstanding uplink buffer, in bytes.
    BufferStatus { buffered_bytes: u16 },
}

impl UlCtrl {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            UlCtrl::Keepalive => vec![UlCtrlType::Keepalive as u8],
            UlCtrl::AssocReq => vec![UlCtrlType::AssocReq as u8],
            UlCtrl::ChannelReport { snr_db } => vec![UlCtrlType::ChannelReport as u8, *snr_db as u8],
            UlCtrl::BufferStatus { buffered_bytes } => {
                let mut out = vec![UlCtrlType::BufferStatus as u8];
                out.extend_from_slice(&buffered_bytes.to_be_bytes());
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let ty = UlCtrlType::from_byte(*bytes.first()?)?;
        match ty {
            UlCtrlType::Keepalive => Some(Self::Keepalive),
            UlCtrlType::AssocReq => Some(Self::AssocReq),
            UlCtrlType::ChannelReport => Some(Self::ChannelReport { snr_db: *bytes.get(1)? as i8 }),
            UlCtrlType::BufferStatus => {
                let hi = *bytes.get(1)?;
                let lo = *bytes.get(2)?;
                Some(Self::BufferStatus { buffered_bytes: u16::from_be_bytes([hi, lo]) })
            }
        }
    }
}

/// MAC-PDU type byte (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Data = 0,
    Control = 1,
    Assoc = 2,
}

impl PduType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Data),
            1 => Some(Self::Control),
            2 => Some(Self::Assoc),
            _ => None,
        }
    }
}

pub const PDU_HEADER_LEN: usize = 4;

/// The fixed 4-byte header every data-slot PDU payload starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub pdu_type: PduType,
    pub seq: u8,
    pub frag_idx: u8,
    pub frag_total: u8,
}

impl PduHeader {
    pub fn encode(&self) -> [u8; PDU_HEADER_LEN] {
        [self.pdu_type as u8, self.seq, self.frag_idx, self.frag_total]
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PDU_HEADER_LEN {
            return None;
        }
        Some(Self {
            pdu_type: PduType::from_byte(bytes[0])?,
            seq: bytes[1],
            frag_idx: bytes[2],
            frag_total: bytes[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlctrl_round_trips_through_encode_decode() {
        let ctrl = DlCtrl {
            subframe_seq: 7,
            dl_data_assignments: [1, 2, 0, 0],
            ul_data_assignments: [3, 0, 0, 4],
            ul_ctrl_assignments: [5, 0],
            broadcast_payload: vec![9, 9, 9],
        };
        let bytes = ctrl.encode(32);
        assert_eq!(bytes.len(), 32);
        let decoded = DlCtrl::decode(&bytes).unwrap();
        assert_eq!(decoded.subframe_seq, 7);
        assert_eq!(decoded.dl_data_assignments, [1, 2, 0, 0]);
        assert_eq!(decoded.ul_data_assignments, [3, 0, 0, 4]);
        assert_eq!(decoded.ul_ctrl_assignments, [5, 0]);
        assert_eq!(&decoded.broadcast_payload[..3], &[9, 9, 9]);
    }

    #[test]
    fn dlctrl_rejects_bad_magic() {
        let bytes = vec![0u8; DLCTRL_HEADER_LEN];
        assert!(DlCtrl::decode(&bytes).is_none());
    }

    #[test]
    fn ul_ctrl_round_trips_every_variant() {
        for msg in [
            UlCtrl::Keepalive,
            UlCtrl::AssocReq,
            UlCtrl::ChannelReport { snr_db: -5 },
            UlCtrl::BufferStatus { buffered_bytes: 4096 },
        ] {
            let bytes = msg.encode();
            assert_eq!(UlCtrl::decode(&bytes), Some(msg));
        }
    }

    #[test]
    fn pdu_header_round_trips() {
        let header = PduHeader { pdu_type: PduType::Data, seq: 42, frag_idx: 1, frag_total: 3 };
        let bytes = header.encode();
        assert_eq!(PduHeader::decode(&bytes), Some(header));
    }
}
