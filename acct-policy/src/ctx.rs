//! The engine's threaded context, replacing the source system's process-wide
//! globals (`accounting_enforce`, `last_job_update`, …) with one value
//! passed to every entry point (§9 "Global mutable state").

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Recognised bits of the `accounting_enforce` configuration flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EnforceFlags: u32 {
        /// Enable all limit checks.
        const LIMITS = 0b0000_0001;
        /// Tighten CPU-minute checks to run-to-completion and disable
        /// time-out kills.
        const SAFE = 0b0000_0010;
        /// Require a resolvable association binding.
        const ASSOCIATIONS = 0b0000_0100;
    }
}

impl EnforceFlags {
    pub fn limits_enabled(self) -> bool {
        self.intersects(EnforceFlags::LIMITS | EnforceFlags::ASSOCIATIONS)
    }

    pub fn safe(self) -> bool {
        self.contains(EnforceFlags::SAFE)
    }

    pub fn associations_required(self) -> bool {
        self.contains(EnforceFlags::ASSOCIATIONS)
    }
}

/// Threaded context carrying the configuration flags and the
/// last-job-update timestamp the source system keeps as a global.
#[derive(Debug)]
pub struct AcctPolicyCtx {
    pub enforce: EnforceFlags,
    last_job_update: AtomicU64,
}

impl AcctPolicyCtx {
    pub fn new(enforce: EnforceFlags) -> Self {
        AcctPolicyCtx {
            enforce,
            last_job_update: AtomicU64::new(0),
        }
    }

    pub fn last_job_update(&self) -> u64 {
        self.last_job_update.load(Ordering::Relaxed)
    }

    /// Stamps `last_job_update`, mirroring the source system's behaviour of
    /// recording the wall-clock time of the most recent policy-visible
    /// change (time-out trips, pending-job refresh edits).
    pub fn touch_last_job_update(&self, now: u64) {
        self.last_job_update.store(now, Ordering::Relaxed);
    }
}

impl Default for AcctPolicyCtx {
    fn default() -> Self {
        AcctPolicyCtx::new(EnforceFlags::LIMITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_enabled_is_true_for_either_flag() {
        assert!(EnforceFlags::LIMITS.limits_enabled());
        assert!(EnforceFlags::ASSOCIATIONS.limits_enabled());
        assert!(!EnforceFlags::SAFE.limits_enabled());
    }

    #[test]
    fn touch_last_job_update_is_observable() {
        let ctx = AcctPolicyCtx::default();
        assert_eq!(ctx.last_job_update(), 0);
        ctx.touch_last_job_update(42);
        assert_eq!(ctx.last_job_update(), 42);
    }
}
