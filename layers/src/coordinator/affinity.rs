//! CPU affinity and `SCHED_FIFO` priority for one coordinator OS thread.
//!
//! Grounded on the distilled original's thread start-up sequence
//! (`pthread_create` + `pthread_setaffinity_np` + `pthread_setschedparam`
//! per task, each with a fixed `CPU_SET`/`sched_priority` pair). Neither
//! call is available for rebind once the thread is running, so both are
//! applied once, immediately after the thread starts.
//!
//! Raising scheduling class/priority requires `CAP_SYS_NICE` (or root);
//! under an unprivileged container the call fails. Per §7, scheduling
//! setup is not one of the fatal error kinds, so failure here is logged
//! and the thread carries on at its inherited (normal) priority.

/// CPU core a coordinator task is pinned to. Mirrors the distilled
/// original's `BS_RX_SLOT_CPUID`/`BS_RX_CPUID`/`BS_TX_CPUID`/`BS_MAC_CPUID`
/// `#define`s: RX-slot and the scheduler share core 0, RX-stream and
/// TX-stream share core 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuId(pub usize);

pub const RX_SLOT_CPU: CpuId = CpuId(0);
pub const MAC_CPU: CpuId = CpuId(0);
pub const RX_STREAM_CPU: CpuId = CpuId(1);
pub const TX_STREAM_CPU: CpuId = CpuId(1);

/// `SCHED_FIFO` priority levels, matching the original's `prio_rt_high`
/// (RX-stream/TX-stream/scheduler) and `prio_rt_normal` (RX-slot).
pub const RT_PRIORITY_HIGH: i32 = 2;
pub const RT_PRIORITY_NORMAL: i32 = 1;

/// Pin the calling thread to `cpu` and raise it to `SCHED_FIFO` at
/// `priority`. Best-effort: logs a warning and returns without panicking
/// if either call fails (missing `CAP_SYS_NICE`, or a non-Linux target).
pub fn pin_current_thread(label: &str, cpu: CpuId, priority: i32) {
    #[cfg(target_os = "linux")]
    {
        linux::pin_current_thread(label, cpu, priority);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (cpu, priority);
        tracing::debug!(task = label, "CPU/scheduling pinning is a no-op on this target");
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::CpuId;

    pub fn pin_current_thread(label: &str, cpu: CpuId, priority: i32) {
        // SAFETY: `cpu_set` is a plain-old-data struct sized by the
        // `size_of` passed alongside it; `sched_setaffinity(0, ...)`
        // targets the calling thread, per Linux's tid=0 convention.
        unsafe {
            let mut cpu_set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut cpu_set);
            libc::CPU_SET(cpu.0, &mut cpu_set);
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set) != 0 {
                tracing::warn!(task = label, cpu = cpu.0, "failed to set CPU affinity (continuing unpinned)");
            }

            let param = libc::sched_param { sched_priority: priority };
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
                tracing::warn!(
                    task = label,
                    priority,
                    "failed to raise SCHED_FIFO priority (likely missing CAP_SYS_NICE); continuing at normal priority"
                );
            }
        }
    }
}
