//! Monotonic cycle clock and per-thread id lookup for host-side backends.
//!
//! On x86_64 the clock reads the TSC with RDTSCP; elsewhere it derives
//! pseudo-cycles from `Instant` against a fixed process epoch.

use std::sync::OnceLock;
use std::time::Instant;

/// Current value of the monotonic cycle counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn cycle_time() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        // aux (ecx) carries the processor id and is discarded.
        core::arch::asm!(
            "rdtscp",
            out("eax") lo,
            out("edx") hi,
            out("ecx") _,
            options(nostack, nomem),
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn cycle_time() -> u64 {
    let nanos = epoch().elapsed().as_nanos() as u64;
    // assume 1 GHz so one pseudo-cycle is one nanosecond
    nanos.max(1)
}

#[cfg_attr(target_arch = "x86_64", allow(dead_code))]
fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

static CYCLE_FREQ_HZ: OnceLock<u64> = OnceLock::new();

/// Cycle counter frequency in Hz, resolved once per process.
///
/// The first call may fall back to a short sleep-based calibration; backends
/// that convert cycles on the report path resolve it up front.
pub fn cycle_freq_hz() -> u64 {
    *CYCLE_FREQ_HZ.get_or_init(detect_cycle_freq)
}

fn detect_cycle_freq() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        if let Some(freq) = tsc_freq_cpuid() {
            log::debug!("cycle clock frequency {freq} Hz from cpuid");
            return freq;
        }
    }

    #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
    {
        if let Some(freq) = tsc_freq_proc_cpuinfo() {
            log::debug!("cycle clock frequency {freq} Hz from /proc/cpuinfo");
            return freq;
        }
    }

    let freq = calibrate_sleep();
    log::debug!("cycle clock frequency {freq} Hz from sleep calibration");
    freq
}

// Leaf 0x15: eax=denominator, ebx=numerator, ecx=crystal Hz.
#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn tsc_freq_cpuid() -> Option<u64> {
    use core::arch::x86_64::__cpuid;

    // SAFETY: cpuid is available on every x86_64 cpu.
    let max_leaf = unsafe { __cpuid(0) }.eax;
    if max_leaf < 0x15 {
        return None;
    }
    let info = unsafe { __cpuid(0x15) };
    let (denom, numer, crystal) = (info.eax as u64, info.ebx as u64, info.ecx as u64);
    if denom == 0 || numer == 0 {
        return None;
    }
    if crystal != 0 {
        return Some(crystal * numer / denom);
    }
    if max_leaf < 0x16 {
        return None;
    }
    // crystal unreported; the tsc runs at the base frequency (MHz in eax)
    let base_mhz = unsafe { __cpuid(0x16) }.eax as u64 & 0xFFFF;
    (base_mhz > 0).then(|| base_mhz * 1_000_000)
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn tsc_freq_proc_cpuinfo() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    let line = content.lines().find(|l| l.starts_with("cpu MHz"))?;
    let mhz: f64 = line.split(':').nth(1)?.trim().parse().ok()?;
    (mhz > 0.0).then(|| (mhz * 1e6) as u64)
}

#[cfg(target_arch = "x86_64")]
fn calibrate_sleep() -> u64 {
    let start = cycle_time();
    let t0 = Instant::now();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let cycles = cycle_time().wrapping_sub(start);
    let secs = t0.elapsed().as_secs_f64();
    if secs > 0.0 && cycles > 0 {
        (cycles as f64 / secs) as u64
    } else {
        3_000_000_000
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn calibrate_sleep() -> u64 {
    1_000_000_000
}

/// Convert a cycle delta to nanoseconds.
#[inline]
pub fn cycles_to_ns(cycles: u64) -> f64 {
    (cycles as f64 * 1e9) / cycle_freq_hz() as f64
}

thread_local! {
    static THREAD_ID: u32 = os_thread_id();
}

/// OS id of the calling thread, resolved once per thread.
#[inline]
pub fn current_thread_id() -> u32 {
    THREAD_ID.with(|tid| *tid)
}

#[cfg(target_os = "linux")]
fn os_thread_id() -> u32 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as u32 }
}

#[cfg(not(target_os = "linux"))]
fn os_thread_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
