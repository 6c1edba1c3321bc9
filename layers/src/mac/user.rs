//! Per-UE state (§3 "User state") and the BS-wide sparse user table
//! (§3 "BS state") the scheduler (C5) operates on.

use std::collections::VecDeque;

use common::{Mcs, UserId, DEFAULT_INACTIVITY_TIMEOUT_SUBFRAMES, MAX_USER, NUM_SLOT, NUM_ULCTRL_SLOT};

use super::fragmentation::{Fragmenter, Reassembler};
use super::packets::{PduType, UlCtrl};
use crate::CoreError;

/// Delivery/loss/failure counters for one user's link, in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStats {
    pub dl_pdus_sent: u64,
    pub dl_bytes_sent: u64,
    pub ul_pdus_received: u64,
    pub ul_bytes_received: u64,
    pub decode_failures: u64,
    pub reassembly_timeouts: u64,
    pub reassembly_mismatches: u64,
}

/// One associated UE: queues, fragmenter/reassembler, link adaptation
/// state, and the bookkeeping the scheduler's longest-waited and
/// round-robin policies consult.
pub struct UserSlot {
    pub userid: UserId,
    pub dl_mcs: Mcs,
    pub ul_mcs: Mcs,

    /// SDUs awaiting transmission to this user on the DL data channel.
    pub dl_data_queue: VecDeque<Vec<u8>>,
    /// Unicast control SDUs awaiting transmission to this user.
    pub dl_ctrl_queue: VecDeque<Vec<u8>>,
    /// UL control messages decoded from this user's UL control slots,
    /// awaiting the scheduler's "process inbound control" step.
    pub inbound_ctrl: VecDeque<UlCtrl>,

    pub dl_fragmenter: Fragmenter,
    pub ul_reassembler: Reassembler,

    /// SDUs the reassembler has fully recovered, awaiting collection by
    /// the upper layer (§2 data flow: "reassembler (C4) → scheduler/upper
    /// layer (C5)"). TAP egress is an external collaborator (§1); this
    /// queue is as far as the core carries a delivered SDU.
    pub ul_delivered: VecDeque<Vec<u8>>,

    pub stats: LinkStats,

    /// Consecutive UL `decode_failed` slots for this user, reset on a
    /// clean decode. Drives the MCS downgrade of §7.
    pub consecutive_ul_decode_failures: u32,

    /// UE-reported outstanding UL buffer, in bytes (from BUFFER_STATUS).
    pub ul_buffer_estimate: u16,

    /// Last subframe this user was granted each slot kind — the
    /// "longest-waited"/round-robin policies compare these.
    pub last_dl_served_subframe: u64,
    pub last_ul_data_served_subframe: u64,
    pub last_ul_ctrl_served_subframe: u64,

    /// Last subframe any traffic (control or data) was seen from this
    /// user; drives the inactivity de-association timeout.
    pub last_activity_subframe: u64,
}

impl UserSlot {
    /// A freshly associated user: default MCS 0 (most robust) on both
    /// links, zeroed statistics, fresh fragmenter/reassembler (§4.5).
    pub fn new(userid: UserId, now_subframe: u64) -> Self {
        Self {
            userid,
            dl_mcs: Mcs::LOWEST,
            ul_mcs: Mcs::LOWEST,
            dl_data_queue: VecDeque::new(),
            dl_ctrl_queue: VecDeque::new(),
            inbound_ctrl: VecDeque::new(),
            dl_fragmenter: Fragmenter::new(PduType::Data),
            ul_reassembler: Reassembler::new(userid),
            ul_delivered: VecDeque::new(),
            stats: LinkStats::default(),
            consecutive_ul_decode_failures: 0,
            ul_buffer_estimate: 0,
            last_dl_served_subframe: now_subframe,
            last_ul_data_served_subframe: now_subframe,
            last_ul_ctrl_served_subframe: now_subframe,
            last_activity_subframe: now_subframe,
        }
    }

    /// Idempotent re-association (§4.5): resets the inactivity deadline
    /// without touching queues, MCS, or statistics.
    pub fn touch(&mut self, now_subframe: u64) {
        self.last_activity_subframe = now_subframe;
    }

    pub fn has_dl_demand(&self) -> bool {
        !self.dl_data_queue.is_empty() || !self.dl_fragmenter.is_idle()
    }
}

/// The BS-wide sparse user table plus the per-subframe assignment
/// vectors the scheduler fills and C3/C6 consult (§3 "BS state").
pub struct BsState {
    users: [Option<UserSlot>; MAX_USER],
    /// Broadcast payload blobs awaiting transmission in the DL-CTRL
    /// channel's variable-length tail. One blob is aired per subframe,
    /// truncated to the channel's capacity if it doesn't fit.
    pub broadcast_ctrl_queue: VecDeque<Vec<u8>>,
    /// `ASSOC_REQ`s seen for a userid with no slot yet, awaiting the
    /// scheduler's "process inbound control" step.
    pending_assoc_requests: VecDeque<UserId>,
    pub ul_ctrl_assignments: [u8; NUM_ULCTRL_SLOT],
    pub ul_data_assignments: [u8; NUM_SLOT],
    pub dl_data_assignments: [u8; NUM_SLOT],
    pub subframe_seq: u8,
    /// Subframes of inactivity before a user is aged out (§7).
    pub inactivity_timeout_subframes: u64,
}

impl BsState {
    pub fn new() -> Self {
        Self {
            users: std::array::from_fn(|_| None),
            broadcast_ctrl_queue: VecDeque::new(),
            pending_assoc_requests: VecDeque::new(),
            ul_ctrl_assignments: [0; NUM_ULCTRL_SLOT],
            ul_data_assignments: [0; NUM_SLOT],
            dl_data_assignments: [0; NUM_SLOT],
            subframe_seq: 0,
            inactivity_timeout_subframes: DEFAULT_INACTIVITY_TIMEOUT_SUBFRAMES,
        }
    }

    /// De-associate every user that has seen no control or data traffic
    /// for longer than `inactivity_timeout_subframes` (§7, §3 lifecycles:
    /// "destroyed on de-association or inactivity timeout").
    pub fn evict_inactive(&mut self, now_subframe: u64) {
        let timeout = self.inactivity_timeout_subframes;
        let stale: Vec<UserId> = self
            .associated_users()
            .filter(|&uid| now_subframe.saturating_sub(self.get(uid).unwrap().last_activity_subframe) > timeout)
            .collect();
        for uid in stale {
            self.deassociate(uid);
        }
    }

    /// Route a decoded UL control message to its user's inbound queue,
    /// or — for an `ASSOC_REQ` from a not-yet-associated userid — the
    /// pending-association queue. A non-`ASSOC_REQ` message for an
    /// unassociated user is rejected (§7 `unknown_user`): the scheduler
    /// never sees it.
    pub fn ingest_ul_ctrl(&mut self, userid: UserId, msg: UlCtrl) -> Result<(), CoreError> {
        if self.is_associated(userid) {
            self.get_mut(userid).unwrap().inbound_ctrl.push_back(msg);
            Ok(())
        } else if matches!(msg, UlCtrl::AssocReq) {
            self.pending_assoc_requests.push_back(userid);
            Ok(())
        } else {
            Err(CoreError::UnknownUser(userid.value()))
        }
    }

    /// Drain queued association requests, creating or touching slots.
    /// The first scheduler sub-step of §4.5.
    pub fn drain_pending_associations(&mut self, now_subframe: u64) {
        while let Some(userid) = self.pending_assoc_requests.pop_front() {
            self.associate(userid, now_subframe);
        }
    }

    pub fn get(&self, userid: UserId) -> Option<&UserSlot> {
        self.users[userid.value() as usize].as_ref()
    }

    pub fn get_mut(&mut self, userid: UserId) -> Option<&mut UserSlot> {
        self.users[userid.value() as usize].as_mut()
    }

    /// Associate `userid`, creating a fresh slot if none exists yet, or
    /// touching the existing one (idempotent re-association, §4.5).
    /// Returns `true` iff a new slot was created.
    pub fn associate(&mut self, userid: UserId, now_subframe: u64) -> bool {
        let slot = &mut self.users[userid.value() as usize];
        match slot {
            Some(existing) => {
                existing.touch(now_subframe);
                false
            }
            None => {
                *slot = Some(UserSlot::new(userid, now_subframe));
                true
            }
        }
    }

    pub fn deassociate(&mut self, userid: UserId) {
        self.users[userid.value() as usize] = None;
    }

    pub fn is_associated(&self, userid: UserId) -> bool {
        self.users[userid.value() as usize].is_some()
    }

    /// Associated users, ascending by userid — the order every
    /// round-robin/longest-waited scan in C5 relies on for determinism.
    pub fn associated_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.users.iter().filter_map(|slot| slot.as_ref().map(|u| u.userid))
    }

    pub fn user_count(&self) -> usize {
        self.users.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for BsState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associate_is_idempotent_and_preserves_state() {
        let mut bs = BsState::new();
        let u = UserId::new(3).unwrap();
        assert!(bs.associate(u, 0));
        bs.get_mut(u).unwrap().ul_buffer_estimate = 512;

        assert!(!bs.associate(u, 10));
        assert_eq!(bs.get(u).unwrap().ul_buffer_estimate, 512);
        assert_eq!(bs.get(u).unwrap().last_activity_subframe, 10);
    }

    #[test]
    fn associated_users_are_ascending() {
        let mut bs = BsState::new();
        for id in [5, 1, 3] {
            bs.associate(UserId::new(id).unwrap(), 0);
        }
        let ids: Vec<u8> = bs.associated_users().map(|u| u.value()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn deassociate_frees_the_slot() {
        let mut bs = BsState::new();
        let u = UserId::new(2).unwrap();
        bs.associate(u, 0);
        assert!(bs.is_associated(u));
        bs.deassociate(u);
        assert!(!bs.is_associated(u));
    }
}
