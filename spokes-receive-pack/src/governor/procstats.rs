//! Usage counters reported with the governor `finish` message.
//!
//! CPU time comes from `getrusage(2)`. On Linux the peak RSS is read from
//! `/proc/self/status` (`VmHWM`, kilobytes) and the I/O byte counters from
//! `/proc/self/io`; elsewhere the rusage `maxrss`/`inblock`/`oublock`
//! fields stand in.

/// A snapshot of this process's resource usage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcStats {
    /// User plus system CPU, in milliseconds.
    pub cpu_ms: u32,
    /// Peak resident set size, in bytes.
    pub rss_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

fn rusage_self() -> Option<libc::rusage> {
    let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut ru) } == 0 {
        Some(ru)
    } else {
        None
    }
}

fn cpu_millis(ru: &libc::rusage) -> u32 {
    let millis = (ru.ru_utime.tv_sec as i64 + ru.ru_stime.tv_sec as i64) * 1000
        + (ru.ru_utime.tv_usec as i64 + ru.ru_stime.tv_usec as i64) / 1000;
    millis.clamp(0, u32::MAX as i64) as u32
}

#[cfg(target_os = "linux")]
pub(crate) fn sample() -> ProcStats {
    let mut stats = ProcStats::default();
    let ru = rusage_self();

    if let Some(ru) = &ru {
        stats.cpu_ms = cpu_millis(ru);
    }

    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        if let Some(kb) = parse_vm_hwm(&status) {
            stats.rss_bytes = kb.saturating_mul(1024);
        }
    }
    if stats.rss_bytes == 0 {
        if let Some(ru) = &ru {
            // ru_maxrss is in kilobytes on Linux.
            stats.rss_bytes = (ru.ru_maxrss.max(0) as u64).saturating_mul(1024);
        }
    }

    if let Ok(io) = std::fs::read_to_string("/proc/self/io") {
        let (read, write) = parse_proc_io(&io);
        stats.disk_read_bytes = read;
        stats.disk_write_bytes = write;
    }

    stats
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn sample() -> ProcStats {
    let Some(ru) = rusage_self() else {
        return ProcStats::default();
    };

    // ru_maxrss is in bytes on macOS and in kilobytes on the BSDs.
    #[cfg(target_os = "macos")]
    let rss_bytes = ru.ru_maxrss.max(0) as u64;
    #[cfg(not(target_os = "macos"))]
    let rss_bytes = (ru.ru_maxrss.max(0) as u64).saturating_mul(1024);

    ProcStats {
        cpu_ms: cpu_millis(&ru),
        rss_bytes,
        disk_read_bytes: ru.ru_inblock.max(0) as u64,
        disk_write_bytes: ru.ru_oublock.max(0) as u64,
    }
}

/// Extract the `VmHWM` value, in kilobytes, from `/proc/self/status`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_hwm(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Extract `(read_bytes, write_bytes)` from `/proc/self/io`, with
/// `cancelled_write_bytes` subtracted from the writes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_io(io: &str) -> (u64, u64) {
    let mut read_bytes = 0u64;
    let mut write_bytes = 0u64;
    for line in io.lines() {
        if let Some(rest) = line.strip_prefix("read_bytes: ") {
            if let Ok(value) = rest.parse() {
                read_bytes = value;
            }
        } else if let Some(rest) = line.strip_prefix("write_bytes: ") {
            if let Ok(value) = rest.parse() {
                write_bytes = value;
            }
        } else if let Some(rest) = line.strip_prefix("cancelled_write_bytes: ") {
            if let Ok(value) = rest.parse::<u64>() {
                // This always comes after write_bytes.
                write_bytes = write_bytes.saturating_sub(value);
            }
        }
    }
    (read_bytes, write_bytes)
}
