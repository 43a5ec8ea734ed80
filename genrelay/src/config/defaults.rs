//! Default values that depend on the host.

/// Number of logical CPUs, falling back to 4 if it cannot be determined.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default number of concurrent remote calls under normal pressure.
///
/// Remote calls are I/O bound, so this is a small multiple of the CPU
/// count, capped so a large host does not flood a rate-limited service.
pub fn default_concurrency() -> usize {
    (num_cpus() * 2).clamp(2, 16)
}

/// Cooldown used when `recovery = cooldown` is set without `cooldown_ms`.
pub const DEFAULT_COOLDOWN_MS: u64 = 30_000;

/// Default interval for periodic telemetry log lines. Zero disables them.
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 0;
