//! Per-subframe scheduler (C5): the six-step assignment algorithm of
//! §4.5, run once per subframe by the coordinator's scheduler task.

use common::{Mcs, UserId, FRAME_LEN, NUM_SLOT, NUM_ULCTRL_SLOT};

use crate::phy::subframe::{self, PhyState};

use super::packets::{DlCtrl, DLCTRL_HEADER_LEN, PDU_HEADER_LEN};
use super::user::BsState;

/// SNR breakpoints (dB), ascending, between adjacent MCS indices. A
/// report at or above `SNR_THRESHOLDS_DB[i]` and below `[i+1]` selects
/// MCS `i+1`; below the first breakpoint selects MCS 0.
const SNR_THRESHOLDS_DB: [i8; 4] = [-2, 5, 12, 20];

fn snr_to_mcs(snr_db: i8) -> Mcs {
    let idx = SNR_THRESHOLDS_DB.iter().filter(|&&t| snr_db >= t).count();
    Mcs::new(idx.min(Mcs::MAX as usize) as u8).unwrap()
}

/// Runs the full per-subframe scheduling algorithm, filling
/// `bs`'s assignment vectors and the PHY's next writable grid.
pub struct Scheduler;

impl Scheduler {
    /// §4.5 steps 1-6, executed in order. `now_subframe` is the
    /// subframe index being *planned* (the one C3/C6 will air next).
    pub fn run_subframe(bs: &mut BsState, phy: &mut PhyState, now_subframe: u64) {
        phy.reset_write_grid();

        Self::process_inbound_control(bs, now_subframe);
        Self::plan_ul_ctrl(bs, now_subframe);
        Self::plan_ul_data(bs, now_subframe);
        Self::plan_dl_data(bs, now_subframe);
        Self::emit_dl_ctrl(bs, phy);
        Self::advance_fragmenters(bs, phy);

        bs.subframe_seq = bs.subframe_seq.wrapping_add(1);
    }

    /// Step 1: associate pending requesters, then drain every
    /// associated user's inbound control queue.
    fn process_inbound_control(bs: &mut BsState, now_subframe: u64) {
        bs.drain_pending_associations(now_subframe);
        bs.evict_inactive(now_subframe);

        let ids: Vec<UserId> = bs.associated_users().collect();
        for userid in ids {
            let user = bs.get_mut(userid).unwrap();
            while let Some(msg) = user.inbound_ctrl.pop_front() {
                user.touch(now_subframe);
                match msg {
                    super::packets::UlCtrl::Keepalive => {}
                    super::packets::UlCtrl::AssocReq => {}
                    super::packets::UlCtrl::ChannelReport { snr_db } => {
                        let mcs = snr_to_mcs(snr_db);
                        user.dl_mcs = mcs;
                        user.ul_mcs = mcs;
                    }
                    super::packets::UlCtrl::BufferStatus { buffered_bytes } => {
                        user.ul_buffer_estimate = buffered_bytes;
                    }
                }
            }
        }
    }

    /// Step 2: round-robin `NUM_ULCTRL_SLOT` UL control grants across
    /// associated users, prioritising whoever has waited longest; every
    /// associated user is owed a grant at least every `FRAME_LEN`
    /// subframes (enforced by the longest-waited ordering itself).
    fn plan_ul_ctrl(bs: &mut BsState, now_subframe: u64) {
        let mut candidates: Vec<UserId> = bs.associated_users().collect();
        candidates.sort_by_key(|&uid| {
            let waited = now_subframe.saturating_sub(bs.get(uid).unwrap().last_ul_ctrl_served_subframe);
            (std::cmp::Reverse(waited), uid)
        });

        let mut assignments = [0u8; NUM_ULCTRL_SLOT];
        for (slot, &uid) in candidates.iter().take(NUM_ULCTRL_SLOT).enumerate() {
            assignments[slot] = uid.value();
            bs.get_mut(uid).unwrap().last_ul_ctrl_served_subframe = now_subframe;
        }
        bs.ul_ctrl_assignments = assignments;

        debug_assert!(
            candidates.len() <= NUM_ULCTRL_SLOT
                || candidates[NUM_ULCTRL_SLOT..]
                    .iter()
                    .all(|&uid| now_subframe.saturating_sub(bs.get(uid).unwrap().last_ul_ctrl_served_subframe) < FRAME_LEN as u64),
            "a deferred user exceeded its FRAME_LEN UL-control grant budget"
        );
    }

    /// Step 3: each UL data slot goes to the user with the largest
    /// outstanding UL buffer estimate, ties broken by longest-waited
    /// then lowest userid. Unassigned slots (no demand) stay 0.
    fn plan_ul_data(bs: &mut BsState, now_subframe: u64) {
        let mut candidates: Vec<UserId> = bs.associated_users().filter(|&uid| bs.get(uid).unwrap().ul_buffer_estimate > 0).collect();
        candidates.sort_by_key(|&uid| {
            let user = bs.get(uid).unwrap();
            let waited = now_subframe.saturating_sub(user.last_ul_data_served_subframe);
            (std::cmp::Reverse(user.ul_buffer_estimate), std::cmp::Reverse(waited), uid)
        });

        let mut assignments = [0u8; NUM_SLOT];
        for (slot, &uid) in candidates.iter().take(NUM_SLOT).enumerate() {
            assignments[slot] = uid.value();
            bs.get_mut(uid).unwrap().last_ul_data_served_subframe = now_subframe;
        }
        bs.ul_data_assignments = assignments;
    }

    /// Step 4: each DL data slot goes to the user with non-empty DL
    /// demand who has waited longest, ties broken by lowest userid.
    fn plan_dl_data(bs: &mut BsState, now_subframe: u64) {
        let mut candidates: Vec<UserId> = bs.associated_users().filter(|&uid| bs.get(uid).unwrap().has_dl_demand()).collect();
        candidates.sort_by_key(|&uid| {
            let waited = now_subframe.saturating_sub(bs.get(uid).unwrap().last_dl_served_subframe);
            (std::cmp::Reverse(waited), uid)
        });

        let mut assignments = [0u8; NUM_SLOT];
        for (slot, &uid) in candidates.iter().take(NUM_SLOT).enumerate() {
            assignments[slot] = uid.value();
            bs.get_mut(uid).unwrap().last_dl_served_subframe = now_subframe;
        }
        bs.dl_data_assignments = assignments;
    }

    /// Step 5: pack the assignment vectors plus one broadcast blob into
    /// the DL-CTRL packet and write it into the next subframe's grid.
    fn emit_dl_ctrl(bs: &mut BsState, phy: &mut PhyState) {
        let capacity = subframe::dlctrl_payload_bytes(&phy.geometry);
        let broadcast_capacity = capacity.saturating_sub(DLCTRL_HEADER_LEN);

        let mut broadcast_payload = bs.broadcast_ctrl_queue.pop_front().unwrap_or_default();
        broadcast_payload.truncate(broadcast_capacity);

        let ctrl = DlCtrl {
            subframe_seq: bs.subframe_seq,
            dl_data_assignments: bs.dl_data_assignments,
            ul_data_assignments: bs.ul_data_assignments,
            ul_ctrl_assignments: bs.ul_ctrl_assignments,
            broadcast_payload,
        };
        let bytes = ctrl.encode(capacity);

        let geometry = phy.geometry.clone();
        let grid = phy.tx_write_grid_mut();
        subframe::write_control(grid, &geometry, &subframe::dlctrl_symbols(), subframe::BROADCAST_MCS, &bytes);
    }

    /// Step 6: for every user granted a DL data slot, ensure its
    /// fragmenter has a current SDU and commit the next fragment.
    fn advance_fragmenters(bs: &mut BsState, phy: &mut PhyState) {
        let geometry = phy.geometry.clone();
        for slot in 0..NUM_SLOT {
            let uid = bs.dl_data_assignments[slot];
            let Some(userid) = UserId::new(uid) else { continue };
            let user = bs.get_mut(userid).unwrap();

            let tbs_bytes = geometry.tbs_bits(user.dl_mcs) / 8;
            let payload_capacity = tbs_bytes.saturating_sub(PDU_HEADER_LEN);

            if user.dl_fragmenter.is_idle() {
                if let Some(sdu) = user.dl_data_queue.pop_front() {
                    user.dl_fragmenter.load(&sdu, payload_capacity);
                }
            }
            let Some(pdu) = user.dl_fragmenter.next_fragment() else { continue };
            debug_assert_eq!(pdu.len(), tbs_bytes);

            user.stats.dl_pdus_sent += 1;
            user.stats.dl_bytes_sent += pdu.len() as u64;

            let symbols = subframe::dl_data_slot_symbols(slot);
            let grid = phy.tx_write_grid_mut();
            subframe::write_data_slot(grid, &geometry, &symbols, user.dl_mcs, &pdu);
        }
    }
}

/// Decode a UL control slot's PDU and route it via
/// [`BsState::ingest_ul_ctrl`]. Exposed for the RX-slot task (C6).
pub fn ingest_ul_control_pdu(bs: &mut BsState, userid: UserId, bytes: &[u8]) -> Result<(), crate::CoreError> {
    let msg = super::packets::UlCtrl::decode(bytes).ok_or(crate::CoreError::DecodeFailed { user: userid.value(), slot: 0 })?;
    bs.ingest_ul_ctrl(userid, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn associate(bs: &mut BsState, id: u8, now: u64) -> UserId {
        let uid = UserId::new(id).unwrap();
        bs.associate(uid, now);
        uid
    }

    #[test]
    fn snr_thresholds_select_lowest_and_highest_mcs() {
        assert_eq!(snr_to_mcs(-20), Mcs::new(0).unwrap());
        assert_eq!(snr_to_mcs(-5), Mcs::new(0).unwrap());
        assert_eq!(snr_to_mcs(25), Mcs::new(4).unwrap());
    }

    #[test]
    fn channel_report_updates_mcs_within_one_scheduler_pass() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        let uid = associate(&mut bs, 3, 0);

        bs.get_mut(uid).unwrap().inbound_ctrl.push_back(super::super::packets::UlCtrl::ChannelReport { snr_db: -5 });
        Scheduler::run_subframe(&mut bs, &mut phy, 1);
        assert_eq!(bs.get(uid).unwrap().dl_mcs, Mcs::new(0).unwrap());

        bs.get_mut(uid).unwrap().inbound_ctrl.push_back(super::super::packets::UlCtrl::ChannelReport { snr_db: 25 });
        Scheduler::run_subframe(&mut bs, &mut phy, 2);
        assert_eq!(bs.get(uid).unwrap().dl_mcs, Mcs::new(4).unwrap());
    }

    #[test]
    fn dl_data_slot_goes_to_the_user_with_demand() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        let uid = associate(&mut bs, 1, 0);
        bs.get_mut(uid).unwrap().dl_data_queue.push_back(vec![1, 2, 3]);

        Scheduler::run_subframe(&mut bs, &mut phy, 1);
        assert!(bs.dl_data_assignments.contains(&1));
    }

    #[test]
    fn empty_queues_leave_all_slots_unassigned() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        associate(&mut bs, 1, 0);

        Scheduler::run_subframe(&mut bs, &mut phy, 1);
        assert_eq!(bs.dl_data_assignments, [0u8; NUM_SLOT]);
        assert_eq!(bs.ul_data_assignments, [0u8; NUM_SLOT]);
    }

    #[test]
    fn ul_ctrl_round_robins_across_more_users_than_slots() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        for id in 1..=4u8 {
            associate(&mut bs, id, 0);
        }

        let mut ever_assigned = std::collections::HashSet::new();
        for sf in 1..=(FRAME_LEN as u64 * 2) {
            Scheduler::run_subframe(&mut bs, &mut phy, sf);
            for &uid in bs.ul_ctrl_assignments.iter().filter(|&&u| u != 0) {
                ever_assigned.insert(uid);
            }
        }
        assert_eq!(ever_assigned.len(), 4, "every associated user must eventually be granted a UL control slot");
    }

    #[test]
    fn two_users_with_unbounded_demand_share_dl_slots_fairly() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        let u1 = associate(&mut bs, 1, 0);
        let u2 = associate(&mut bs, 2, 0);

        let mut served = [0u32; 2];
        for sf in 1..=8u64 {
            // Unbounded demand: always keep one SDU queued.
            if bs.get(u1).unwrap().dl_data_queue.is_empty() && bs.get(u1).unwrap().dl_fragmenter.is_idle() {
                bs.get_mut(u1).unwrap().dl_data_queue.push_back(vec![0u8; 4]);
            }
            if bs.get(u2).unwrap().dl_data_queue.is_empty() && bs.get(u2).unwrap().dl_fragmenter.is_idle() {
                bs.get_mut(u2).unwrap().dl_data_queue.push_back(vec![0u8; 4]);
            }
            Scheduler::run_subframe(&mut bs, &mut phy, sf);
            for &uid in bs.dl_data_assignments.iter() {
                if uid == 1 {
                    served[0] += 1;
                } else if uid == 2 {
                    served[1] += 1;
                }
            }
        }
        for s in served {
            assert!((3..=5).contains(&s), "fairness window violated: {served:?}");
        }
    }
}
