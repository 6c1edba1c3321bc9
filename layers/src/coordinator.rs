//! Realtime coordinator (C6): four co-operating tasks synchronised to
//! radio cadence (§4.6, §5).
//!
//! - **RX-stream**: pumps sample buffers from the [`RadioDriver`], runs
//!   the subframe disassembler per symbol, and notifies the RX-slot task
//!   with `SlotReady` whenever a UL slot completes.
//! - **RX-slot**: waits on `SlotReady`, decodes the named slot (C2) and
//!   hands the payload to C4/C5.
//! - **TX-stream**: produces sample buffers for the driver from the
//!   frequency-domain grid, and signals the scheduler task with
//!   `RunScheduler` at symbol 23 of every subframe (§4.5).
//! - **Scheduler**: waits on `RunScheduler` and runs the six-step
//!   per-subframe algorithm (C5) under `bs`'s mutex.
//!
//! The two condition variables of the distilled original become two
//! bounded SPSC channels (§9 "Cooperating tasks via condvars → typed
//! channels"); shutdown is a poison pill on each.
//!
//! Each of the four tasks runs on its own OS thread, pinned to a CPU and
//! raised to `SCHED_FIFO` (§5 "Four OS-level tasks, each pinned to a CPU,
//! running at an elevated real-time priority" — grounded directly on the
//! distilled original's `pthread_setaffinity_np`/`pthread_setschedparam`
//! call sequence), each owning a dedicated single-threaded Tokio runtime
//! so the task's blocking [`RadioDriver`] calls never starve an executor
//! shared with other work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{Latency, DECODE_FAILURE_DOWNGRADE_THRESHOLD, NUM_SLOT, NUM_ULCTRL_SLOT};
use num_complex::Complex32;
use tokio::sync::{mpsc, Mutex};

use crate::mac::packets::{PduHeader, PDU_HEADER_LEN};
use crate::mac::scheduler::{self, Scheduler};
use crate::mac::user::BsState;
use crate::phy::ofdm::OfdmEngine;
use crate::phy::subframe::{self, PhyState, SYMBOL_LEN};
use crate::CoreError;

mod affinity;
use affinity::pin_current_thread;

/// Effective runtime settings the four tasks are constructed from (§9
/// "Globals → explicit contexts"). Read-only for the lifetime of the
/// coordinator; built by the `basestation` binary's config loader.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// RX gain, dB (`-1..=73` per the original platform's documented range).
    pub rx_gain: i32,
    /// TX gain, dB (`-89..=0`).
    pub tx_gain: i32,
    /// DL carrier frequency, Hz. `None` leaves the driver's default.
    pub frequency_hz: Option<f64>,
    /// Empirical symbol offset compensating for the live SDR's FIR delay
    /// (§9 Open Question: 0 for simulation/loopback, 9 on real hardware).
    pub dl_ul_shift_compensation: u8,
    /// Subframes a reassembly may stay incomplete before it is discarded.
    pub reassembly_deadline_subframes: u64,
    /// TX symbol-pair processing deadline (§4.6: 530µs for two symbols).
    pub tx_deadline: Duration,
    /// UL slot decode deadline (§4.6: 3500µs).
    pub slot_decode_deadline: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rx_gain: 70,
            tx_gain: 0,
            frequency_hz: None,
            dl_ul_shift_compensation: 0,
            reassembly_deadline_subframes: 64,
            tx_deadline: Duration::from_micros(530),
            slot_decode_deadline: Duration::from_micros(3500),
        }
    }
}

/// The symbol at which the TX-stream task signals the scheduler task
/// (§4.5: "symbol 23 of the current subframe").
const SCHEDULER_SIGNAL_SYMBOL: usize = 23;
/// Depth of the driver's internal sample queue, drained during the
/// startup handshake (§4.6, `KERNEL_BUF_RX`/`KERNEL_BUF_TX` in the
/// distilled original).
const KERNEL_BUF_DEPTH: usize = 4;

/// A UL slot that finished arriving, identified by its kind and index.
/// The RX-slot task looks up the expected MCS/userid from the
/// double-buffered assignment vectors the scheduler last wrote.
#[derive(Debug, Clone, Copy)]
pub enum SlotReady {
    UlCtrl { idx: usize },
    UlData { slot: usize },
}

/// The scheduler-task wakeup, carrying the subframe index being planned.
#[derive(Debug, Clone, Copy)]
pub struct RunScheduler {
    pub next_subframe: u64,
}

/// Blocking radio I/O capability the core consumes (§6). One sample
/// buffer holds `2*(NFFT+CP)` complex samples — two OFDM symbols, the
/// driver's native transfer granularity.
pub trait RadioDriver: Send + Sync {
    /// Blocking read of one sample buffer.
    fn rx(&self) -> Result<Vec<Complex32>, CoreError>;
    /// Stage `samples[offset..offset+length]` for transmission.
    fn tx_prep(&self, samples: &[Complex32], offset: usize, length: usize) -> Result<(), CoreError>;
    /// Commit the staged buffer to the radio.
    fn tx_push(&self) -> Result<(), CoreError>;

    /// Unblock any in-flight or future [`rx`](Self::rx)/[`tx_push`](Self::tx_push)
    /// call so the streaming tasks can observe the shutdown flag and
    /// return (§5 "the driver is stopped first (unblocks the streaming
    /// tasks)"). Default no-op for drivers with no stoppable transport of
    /// their own (e.g. a pure loopback used in tests).
    fn stop(&self) {}
}

/// Shared state the coordinator's tasks operate on: PHY grids/counters
/// and BS/MAC state, each behind its own mutex (§5 "Shared resources").
pub struct Core<D: RadioDriver> {
    pub driver: Arc<D>,
    pub phy: Arc<Mutex<PhyState>>,
    pub bs: Arc<Mutex<BsState>>,
    pub config: CoreConfig,
    ofdm: Arc<OfdmEngine>,
}

impl<D: RadioDriver + 'static> Core<D> {
    pub fn new(driver: D, config: CoreConfig) -> Self {
        Self {
            driver: Arc::new(driver),
            phy: Arc::new(Mutex::new(PhyState::new())),
            bs: Arc::new(Mutex::new(BsState::new())),
            config,
            ofdm: Arc::new(OfdmEngine::new()),
        }
    }

    /// Spawn the four cooperating tasks, each on its own CPU-pinned,
    /// `SCHED_FIFO`-raised OS thread (§5), and run the startup rendezvous
    /// (§4.6). Returns handles the caller uses to shut the coordinator
    /// down and join every thread.
    pub fn spawn(&self) -> CoordinatorHandles {
        let (slot_tx, slot_rx) = mpsc::channel::<Option<SlotReady>>(NUM_SLOT + NUM_ULCTRL_SLOT);
        let (sched_tx, sched_rx) = mpsc::channel::<Option<RunScheduler>>(1);
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let shutdown = Arc::new(AtomicBool::new(false));

        let rx_task = {
            let driver = self.driver.clone();
            let phy = self.phy.clone();
            let bs = self.bs.clone();
            let ofdm = self.ofdm.clone();
            let config = self.config.clone();
            let barrier = barrier.clone();
            let shutdown = shutdown.clone();
            let slot_tx = slot_tx.clone();
            spawn_pinned("bs-rx-stream", affinity::RX_STREAM_CPU, affinity::RT_PRIORITY_HIGH, move || {
                rx_stream_task(driver, phy, bs, ofdm, config, slot_tx, barrier, shutdown)
            })
        };

        let tx_task = {
            let driver = self.driver.clone();
            let phy = self.phy.clone();
            let ofdm = self.ofdm.clone();
            let config = self.config.clone();
            let shutdown = shutdown.clone();
            let sched_tx = sched_tx.clone();
            spawn_pinned("bs-tx-stream", affinity::TX_STREAM_CPU, affinity::RT_PRIORITY_HIGH, move || {
                tx_stream_task(driver, phy, ofdm, config, sched_tx, barrier, shutdown)
            })
        };

        let rx_slot_task = {
            let bs = self.bs.clone();
            let phy = self.phy.clone();
            let config = self.config.clone();
            spawn_pinned("bs-rx-slot", affinity::RX_SLOT_CPU, affinity::RT_PRIORITY_NORMAL, move || {
                rx_slot_task(bs, phy, config, slot_rx)
            })
        };

        let scheduler_task = {
            let bs = self.bs.clone();
            let phy = self.phy.clone();
            spawn_pinned("bs-mac-scheduler", affinity::MAC_CPU, affinity::RT_PRIORITY_HIGH, move || {
                scheduler_task(bs, phy, sched_rx)
            })
        };

        CoordinatorHandles {
            rx_task,
            tx_task,
            rx_slot_task,
            scheduler_task,
            driver: self.driver.clone(),
            shutdown,
            slot_tx,
            sched_tx,
        }
    }
}

/// Spawn `label` as a dedicated OS thread pinned to `cpu` at `priority`,
/// owning a single-threaded Tokio runtime that drives the future returned
/// by `make_fut`. One runtime per thread keeps each task's blocking
/// [`RadioDriver`] calls from ever stalling work belonging to another task.
fn spawn_pinned<F, Fut>(label: &'static str, cpu: affinity::CpuId, priority: i32, make_fut: F) -> std::thread::JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()>,
{
    std::thread::Builder::new()
        .name(label.to_string())
        .spawn(move || {
            pin_current_thread(label, cpu, priority);
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build coordinator task runtime");
            rt.block_on(make_fut());
        })
        .expect("failed to spawn coordinator OS thread")
}

/// Handles returned by [`Core::spawn`]: one OS-thread [`JoinHandle`] per
/// task, plus what [`shutdown`](Self::shutdown) needs to unwind them in
/// the order §5 prescribes.
pub struct CoordinatorHandles {
    pub rx_task: std::thread::JoinHandle<()>,
    pub tx_task: std::thread::JoinHandle<()>,
    pub rx_slot_task: std::thread::JoinHandle<()>,
    pub scheduler_task: std::thread::JoinHandle<()>,
    driver: Arc<dyn RadioDriver>,
    shutdown: Arc<AtomicBool>,
    slot_tx: mpsc::Sender<Option<SlotReady>>,
    sched_tx: mpsc::Sender<Option<RunScheduler>>,
}

impl CoordinatorHandles {
    /// Run the shutdown sequence of §5: stop the driver (unblocking the
    /// streaming tasks), broadcast the poison pill on both channels, then
    /// join all four threads.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.driver.stop();
        let _ = self.slot_tx.try_send(None);
        let _ = self.sched_tx.try_send(None);

        for (name, handle) in [
            ("rx_stream", self.rx_task),
            ("tx_stream", self.tx_task),
            ("rx_slot", self.rx_slot_task),
            ("scheduler", self.scheduler_task),
        ] {
            if handle.join().is_err() {
                tracing::error!(task = name, "coordinator task panicked");
            }
        }
    }
}

/// RX-stream task: drains the driver, advances the symbol synchroniser,
/// and notifies the RX-slot task at slot boundaries.
async fn rx_stream_task<D: RadioDriver>(
    driver: Arc<D>,
    phy: Arc<Mutex<PhyState>>,
    bs: Arc<Mutex<BsState>>,
    ofdm: Arc<OfdmEngine>,
    config: CoreConfig,
    slot_tx: mpsc::Sender<Option<SlotReady>>,
    barrier: Arc<tokio::sync::Barrier>,
    shutdown: Arc<AtomicBool>,
) {
    let mut latency = Latency::new("bs.rx_buffer");

    // Startup handshake (§4.6): rendezvous, drain the driver's internal
    // queue by its known depth, rendezvous again.
    barrier.wait().await;
    for _ in 0..=KERNEL_BUF_DEPTH {
        if driver.rx().is_err() {
            break;
        }
    }
    barrier.wait().await;
    tracing::info!("RX thread started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("rx-stream task observed shutdown flag, stopping");
            let _ = slot_tx.send(None).await;
            return;
        }
        let Ok(samples) = driver.rx() else {
            if shutdown.load(Ordering::SeqCst) {
                tracing::info!("rx-stream task stopping after driver.stop() unblocked it");
            } else {
                tracing::error!("radio driver unavailable on RX");
            }
            let _ = slot_tx.send(None).await;
            return;
        };
        latency.start();
        for symbol_samples in samples.chunks(SYMBOL_LEN) {
            let mut phy = phy.lock().await;
            let bs = bs.lock().await;
            ingest_symbol(&mut phy, &bs, &ofdm, &config, symbol_samples, &slot_tx).await;
        }
        latency.stop();
        latency.check(config.tx_deadline);
    }
}

/// One symbol's worth of RX processing: demodulate into the RX grid,
/// advance the symbol counter, and notify the RX-slot task when the
/// just-completed symbol was the last symbol of a UL slot.
async fn ingest_symbol(
    phy: &mut PhyState,
    bs: &BsState,
    ofdm: &OfdmEngine,
    config: &CoreConfig,
    time_samples: &[Complex32],
    slot_tx: &mpsc::Sender<Option<SlotReady>>,
) {
    if time_samples.len() != SYMBOL_LEN {
        return;
    }
    let subframe_symbol = phy.rx_symbol;
    let freq = ofdm.demodulate_symbol(time_samples);
    {
        let grid = phy.rx_grid_mut();
        for (sc, value) in freq.into_iter().enumerate() {
            grid[[subframe_symbol, sc]] = value;
        }
    }

    if let Some(ready) = completed_ul_slot(subframe_symbol, config.dl_ul_shift_compensation) {
        match ready {
            SlotReady::UlCtrl { idx } => {
                if idx < bs.ul_ctrl_assignments.len() {
                    let _ = slot_tx.send(Some(ready)).await;
                }
            }
            SlotReady::UlData { slot } => {
                if slot < bs.ul_data_assignments.len() {
                    let _ = slot_tx.send(Some(ready)).await;
                }
            }
        }
    }

    phy.advance_rx_symbol();
}

/// True iff `subframe_symbol` is the last symbol of a UL slot, and
/// identifies which one. `_shift_compensation` is consulted by the
/// driver adapter that aligns raw samples to `subframe_symbol`
/// coordinates before they reach here (§9 Open Question decision); slot
/// boundaries themselves are fixed by `DL_UL_SHIFT` alone.
fn completed_ul_slot(subframe_symbol: usize, _shift_compensation: u8) -> Option<SlotReady> {
    for idx in 0..NUM_ULCTRL_SLOT {
        if subframe::ul_ctrl_slot_symbol(idx) == subframe_symbol {
            return Some(SlotReady::UlCtrl { idx });
        }
    }
    for slot in 0..NUM_SLOT {
        let symbols = subframe::ul_data_slot_symbols(slot);
        if symbols.last() == Some(&subframe_symbol) {
            return Some(SlotReady::UlData { slot });
        }
    }
    None
}

/// RX-slot task: waits on `SlotReady`, decodes the slot, routes the
/// payload to C4/C5. Per-slot errors are local (§7): logged and counted,
/// never propagated.
async fn rx_slot_task(bs: Arc<Mutex<BsState>>, phy: Arc<Mutex<PhyState>>, config: CoreConfig, mut slot_rx: mpsc::Receiver<Option<SlotReady>>) {
    let mut latency = Latency::new("bs.rx_slot");
    while let Some(msg) = slot_rx.recv().await {
        let Some(ready) = msg else {
            tracing::info!("rx-slot task received shutdown poison pill");
            return;
        };
        latency.start();
        let mut bs = bs.lock().await;
        let phy = phy.lock().await;
        let now_subframe = bs.subframe_seq as u64;
        if let Err(e) = decode_slot(&mut bs, &phy, ready, now_subframe, config.reassembly_deadline_subframes) {
            record_error(&mut bs, &e);
        }
        drop(phy);
        drop(bs);
        latency.stop();
        latency.check(config.slot_decode_deadline);
    }
}

/// Decode one notified UL slot and hand its payload to the user's
/// fragmenter chain (C4) or the scheduler's control inbox (C5), per
/// §4.3's `ul_decode_slot`.
fn decode_slot(bs: &mut BsState, phy: &PhyState, ready: SlotReady, now_subframe: u64, deadline_subframes: u64) -> Result<(), CoreError> {
    match ready {
        SlotReady::UlCtrl { idx } => decode_ul_ctrl_slot(bs, phy, idx),
        SlotReady::UlData { slot } => decode_ul_data_slot(bs, phy, slot, now_subframe, deadline_subframes),
    }
}

/// Decode a completed UL control slot and route the message via
/// [`scheduler::ingest_ul_control_pdu`] (§4.5 step 1's input).
fn decode_ul_ctrl_slot(bs: &mut BsState, phy: &PhyState, idx: usize) -> Result<(), CoreError> {
    let userid_raw = bs.ul_ctrl_assignments[idx];
    let Some(userid) = common::UserId::new(userid_raw) else {
        return Ok(()); // unassigned slot this subframe, nothing to decode
    };
    if !bs.is_associated(userid) {
        return Err(CoreError::UnknownUser(userid.value()));
    }

    let symbols = [subframe::ul_ctrl_slot_symbol(idx)];
    let payload_bytes = subframe::ulctrl_payload_bytes(&phy.geometry);
    let Some(bytes) = subframe::read_control(phy.rx_grid(), &phy.geometry, &symbols, subframe::ULCTRL_MCS, payload_bytes) else {
        return Err(CoreError::DecodeFailed { user: userid.value(), slot: idx });
    };
    scheduler::ingest_ul_control_pdu(bs, userid, &bytes)
}

/// Decode a completed UL data slot: extract the MAC-PDU, feed it to the
/// user's reassembler (C4), and apply the MCS-downgrade policy of §7 on
/// persistent `decode_failed`s.
fn decode_ul_data_slot(bs: &mut BsState, phy: &PhyState, slot: usize, now_subframe: u64, deadline_subframes: u64) -> Result<(), CoreError> {
    let userid_raw = bs.ul_data_assignments[slot];
    let Some(userid) = common::UserId::new(userid_raw) else {
        return Ok(()); // unassigned slot this subframe, nothing to decode
    };
    if !bs.is_associated(userid) {
        return Err(CoreError::UnknownUser(userid.value()));
    }

    let user = bs.get_mut(userid).unwrap();
    if let Some(err) = user.ul_reassembler.check_deadline(now_subframe, deadline_subframes) {
        user.stats.reassembly_timeouts += 1;
        return Err(err);
    }

    let mcs = user.ul_mcs;
    let symbols = subframe::ul_data_slot_symbols(slot);
    let tbs_bytes = phy.geometry.tbs_bits(mcs) / 8;
    let payload_capacity = tbs_bytes.saturating_sub(PDU_HEADER_LEN);

    let decoded = subframe::read_data_slot(phy.rx_grid(), &phy.geometry, &symbols, mcs, tbs_bytes)
        .and_then(|bytes| PduHeader::decode(&bytes).map(|header| (header, bytes)));

    let Some((header, bytes)) = decoded else {
        let user = bs.get_mut(userid).unwrap();
        user.consecutive_ul_decode_failures += 1;
        let err = CoreError::DecodeFailed { user: userid.value(), slot };
        maybe_downgrade_ul_mcs(user);
        return Err(err);
    };

    let user = bs.get_mut(userid).unwrap();
    user.consecutive_ul_decode_failures = 0;
    user.touch(now_subframe);
    user.stats.ul_pdus_received += 1;
    user.stats.ul_bytes_received += bytes.len() as u64;

    match user.ul_reassembler.accept(header, &bytes[PDU_HEADER_LEN..], payload_capacity, now_subframe) {
        Ok(Some(sdu)) => {
            user.ul_delivered.push_back(sdu);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            if matches!(e, CoreError::ReassemblyMismatch { .. }) {
                user.stats.reassembly_mismatches += 1;
            }
            Err(e)
        }
    }
}

/// Downgrade a user's UL MCS by one step once its consecutive
/// `decode_failed` run reaches [`DECODE_FAILURE_DOWNGRADE_THRESHOLD`],
/// resetting the counter so the next downgrade needs a fresh run (§7:
/// "persistent decode_failed rates trigger an MCS downgrade").
fn maybe_downgrade_ul_mcs(user: &mut crate::mac::user::UserSlot) {
    if user.consecutive_ul_decode_failures < DECODE_FAILURE_DOWNGRADE_THRESHOLD {
        return;
    }
    user.consecutive_ul_decode_failures = 0;
    if user.ul_mcs.value() > common::Mcs::LOWEST.value() {
        user.ul_mcs = common::Mcs::new(user.ul_mcs.value() - 1).unwrap();
    }
}

fn record_error(bs: &mut BsState, err: &CoreError) {
    tracing::warn!(error = %err, "slot processing error");
    if let CoreError::DecodeFailed { user, .. } = err {
        if let Some(userid) = common::UserId::new(*user) {
            if let Some(u) = bs.get_mut(userid) {
                u.stats.decode_failures += 1;
            }
        }
    }
}

/// TX-stream task: produces time-domain buffers for the driver, signals
/// the scheduler task at symbol 23 of each subframe (§4.5, §4.6).
async fn tx_stream_task<D: RadioDriver>(
    driver: Arc<D>,
    phy: Arc<Mutex<PhyState>>,
    ofdm: Arc<OfdmEngine>,
    config: CoreConfig,
    sched_tx: mpsc::Sender<Option<RunScheduler>>,
    barrier: Arc<tokio::sync::Barrier>,
    shutdown: Arc<AtomicBool>,
) {
    let mut latency = Latency::new("bs.tx_buffer");

    barrier.wait().await;
    for _ in 0..=KERNEL_BUF_DEPTH {
        if driver.tx_push().is_err() {
            break;
        }
    }
    barrier.wait().await;
    tracing::info!("TX thread started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("tx-stream task observed shutdown flag, stopping");
            let _ = sched_tx.send(None).await;
            return;
        }
        latency.start();
        let (pair, at_signal_symbol, next_subframe) = {
            let mut phy = phy.lock().await;
            // The grid being aired was fully written by the scheduler one
            // subframe ago; cloning it once per pair keeps this task's
            // lock-held time independent of grid size.
            let grid = phy.tx_read_grid().clone();
            let sym_a = phy.tx_symbol;
            let row_a = ofdm.modulate_symbol(grid.row(sym_a).as_slice().expect("grid row is contiguous"));
            phy.advance_tx_symbol();
            let sym_b = phy.tx_symbol;
            let row_b = ofdm.modulate_symbol(grid.row(sym_b).as_slice().expect("grid row is contiguous"));
            phy.advance_tx_symbol();

            let mut combined = row_a;
            combined.extend(row_b);
            let at_signal = sym_a == SCHEDULER_SIGNAL_SYMBOL;
            (combined, at_signal, phy.tx_subframe + 1)
        };

        if driver.tx_prep(&pair, 0, pair.len()).is_err() || driver.tx_push().is_err() {
            tracing::error!("radio driver unavailable on TX");
            let _ = sched_tx.send(None).await;
            return;
        }

        if at_signal_symbol {
            // Non-blocking send: if the scheduler is still busy from a
            // prior subframe, this subframe airs with stale assignments
            // (§5 ordering guarantee) rather than stalling TX-stream.
            let _ = sched_tx.try_send(Some(RunScheduler { next_subframe }));
        }

        latency.stop();
        latency.check(config.tx_deadline);
    }
}

/// Scheduler task: waits on `RunScheduler`, runs the six-step algorithm
/// (C5) under the BS/PHY mutexes, then loops (§4.6).
async fn scheduler_task(bs: Arc<Mutex<BsState>>, phy: Arc<Mutex<PhyState>>, mut sched_rx: mpsc::Receiver<Option<RunScheduler>>) {
    let mut latency = Latency::new("bs.mac_scheduler");
    while let Some(msg) = sched_rx.recv().await {
        let Some(RunScheduler { next_subframe }) = msg else {
            tracing::info!("scheduler task received shutdown poison pill");
            return;
        };
        latency.start();
        let mut bs = bs.lock().await;
        let mut phy = phy.lock().await;
        Scheduler::run_subframe(&mut bs, &mut phy, next_subframe);
        drop(phy);
        drop(bs);
        latency.stop();
        latency.check(Duration::from_micros(3500));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_ul_slot_identifies_ctrl_and_data_boundaries() {
        for idx in 0..NUM_ULCTRL_SLOT {
            let sym = subframe::ul_ctrl_slot_symbol(idx);
            assert!(matches!(completed_ul_slot(sym, 0), Some(SlotReady::UlCtrl { idx: i }) if i == idx));
        }
        for slot in 0..NUM_SLOT {
            let last = *subframe::ul_data_slot_symbols(slot).last().unwrap();
            assert!(matches!(completed_ul_slot(last, 0), Some(SlotReady::UlData { slot: s }) if s == slot));
        }
    }

    #[test]
    fn default_config_matches_spec_deadlines() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.tx_deadline, Duration::from_micros(530));
        assert_eq!(cfg.slot_decode_deadline, Duration::from_micros(3500));
        assert_eq!(cfg.dl_ul_shift_compensation, 0);
    }

    #[test]
    fn decode_ul_ctrl_slot_round_trips_a_channel_report_into_inbound_queue() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        let uid = common::UserId::new(1).unwrap();
        bs.associate(uid, 0);
        bs.ul_ctrl_assignments[0] = 1;

        let msg = crate::mac::packets::UlCtrl::ChannelReport { snr_db: 9 };
        let symbols = [subframe::ul_ctrl_slot_symbol(0)];
        let bytes = msg.encode();
        let mut padded = bytes.clone();
        padded.resize(subframe::ulctrl_payload_bytes(&phy.geometry), 0);
        subframe::write_control(phy.rx_grid_mut(), &phy.geometry.clone(), &symbols, subframe::ULCTRL_MCS, &padded);

        decode_ul_ctrl_slot(&mut bs, &phy, 0).unwrap();
        assert_eq!(bs.get(uid).unwrap().inbound_ctrl.front(), Some(&msg));
    }

    #[test]
    fn decode_ul_ctrl_slot_on_unassigned_slot_is_a_noop() {
        let mut bs = BsState::new();
        let phy = PhyState::new();
        assert!(decode_ul_ctrl_slot(&mut bs, &phy, 0).is_ok());
    }

    #[test]
    fn decode_ul_data_slot_delivers_a_single_fragment_sdu() {
        let mut bs = BsState::new();
        let mut phy = PhyState::new();
        let uid = common::UserId::new(2).unwrap();
        bs.associate(uid, 0);
        bs.ul_data_assignments[0] = 2;

        let mcs = bs.get(uid).unwrap().ul_mcs;
        let symbols = subframe::ul_data_slot_symbols(0);
        let tbs_bytes = phy.geometry.tbs_bits(mcs) / 8;
        let payload_capacity = tbs_bytes.saturating_sub(PDU_HEADER_LEN);

        let sdu: Vec<u8> = vec![7, 8, 9];
        let mut framed = (sdu.len() as u16).to_be_bytes().to_vec();
        framed.extend_from_slice(&sdu);

        let header = PduHeader { pdu_type: crate::mac::packets::PduType::Data, seq: 1, frag_idx: 0, frag_total: 1 };
        let mut pdu = header.encode().to_vec();
        let mut payload = framed.clone();
        payload.resize(payload_capacity, 0);
        pdu.extend(payload);
        pdu.resize(tbs_bytes, 0);

        subframe::write_data_slot(phy.rx_grid_mut(), &phy.geometry.clone(), &symbols, mcs, &pdu);

        decode_ul_data_slot(&mut bs, &phy, 0, 0, 64).unwrap();
        assert_eq!(bs.get(uid).unwrap().ul_delivered.front(), Some(&sdu));
        assert_eq!(bs.get(uid).unwrap().stats.ul_pdus_received, 1);
    }

    #[test]
    fn repeated_decode_failures_downgrade_ul_mcs() {
        let mut bs = BsState::new();
        let phy = PhyState::new();
        let uid = common::UserId::new(3).unwrap();
        bs.associate(uid, 0);
        bs.ul_data_assignments[0] = 3;
        bs.get_mut(uid).unwrap().ul_mcs = common::Mcs::new(2).unwrap();

        // The RX grid is all-zero here, so every decode attempt fails the
        // Viterbi terminator check.
        for _ in 0..DECODE_FAILURE_DOWNGRADE_THRESHOLD {
            assert!(decode_ul_data_slot(&mut bs, &phy, 0, 0, 64).is_err());
        }
        assert_eq!(bs.get(uid).unwrap().ul_mcs, common::Mcs::new(1).unwrap());
        assert_eq!(bs.get(uid).unwrap().consecutive_ul_decode_failures, 0);
    }

    struct LoopbackDriver;
    impl RadioDriver for LoopbackDriver {
        fn rx(&self) -> Result<Vec<Complex32>, CoreError> {
            Ok(vec![Complex32::new(0.0, 0.0); SYMBOL_LEN])
        }
        fn tx_prep(&self, _samples: &[Complex32], _offset: usize, _length: usize) -> Result<(), CoreError> {
            Ok(())
        }
        fn tx_push(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[test]
    fn coordinator_tasks_shut_down_on_poison_pill() {
        let core = Core::new(LoopbackDriver, CoreConfig::default());
        let handles = core.spawn();
        // `LoopbackDriver` never blocks, so the four OS threads are already
        // spinning through their startup rendezvous and main loops; give
        // them a moment to get there before exercising the shutdown path.
        std::thread::sleep(Duration::from_millis(5));
        handles.shutdown();
    }
}
