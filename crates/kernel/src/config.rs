use serde::{Deserialize, Serialize};
use types::{PAGE_SIZE, VIRT_BASE};

use crate::error::KernelError;

/// Kernel tunables. Every field has a default, so a JSON config only needs to
/// name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Size of each process's virtual range, in pages.
    pub virt_pages: usize,
    /// Number of physical frames shared by all processes.
    pub phys_frames: usize,
    /// Number of software TLB entries.
    pub tlb_entries: usize,
    /// Backing-store capacity, in pages.
    pub swap_pages: usize,
    /// Clock tick period. Zero disables the timer.
    pub timer_interval_ms: u64,
    /// Process table capacity.
    pub max_procs: usize,
    /// How long processes get to die after shutdown starts.
    pub shutdown_grace_ms: u64,
}

/// Compile-time defaults.
pub struct Config;

impl Config {
    pub const VIRT_PAGES: usize = 0x100;
    pub const PHYS_FRAMES: usize = 128;
    pub const TLB_ENTRIES: usize = 16;
    pub const SWAP_PAGES: usize = 1024;
    pub const TIMER_INTERVAL_MS: u64 = 10;
    pub const MAX_PROCS: usize = 100;
    pub const SHUTDOWN_GRACE_MS: u64 = 3000;
    /// Longest a process may sleep in the scheduler before timers are rechecked.
    pub const IDLE_WAIT_MS: u64 = 1000;
    /// Smallest TLB that can hold an instruction page plus every page one
    /// memory instruction touches.
    pub const MIN_TLB_ENTRIES: usize = 4;
    pub const MIN_PHYS_FRAMES: usize = 4;
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            virt_pages: Config::VIRT_PAGES,
            phys_frames: Config::PHYS_FRAMES,
            tlb_entries: Config::TLB_ENTRIES,
            swap_pages: Config::SWAP_PAGES,
            timer_interval_ms: Config::TIMER_INTERVAL_MS,
            max_procs: Config::MAX_PROCS,
            shutdown_grace_ms: Config::SHUTDOWN_GRACE_MS,
        }
    }
}

impl KernelConfig {
    pub fn from_json(text: &str) -> Result<Self, KernelError> {
        let config: KernelConfig =
            serde_json::from_str(text).map_err(|e| KernelError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        let bad = |msg: String| Err(KernelError::InvalidConfig(msg));
        if self.tlb_entries < Config::MIN_TLB_ENTRIES {
            return bad(format!(
                "tlb_entries must be at least {}, got {}",
                Config::MIN_TLB_ENTRIES,
                self.tlb_entries
            ));
        }
        if self.phys_frames < Config::MIN_PHYS_FRAMES {
            return bad(format!(
                "phys_frames must be at least {}, got {}",
                Config::MIN_PHYS_FRAMES,
                self.phys_frames
            ));
        }
        if self.virt_pages == 0 {
            return bad("virt_pages must be non-zero".into());
        }
        let limit = (u32::MAX - VIRT_BASE) as usize / PAGE_SIZE;
        if self.virt_pages > limit {
            return bad(format!("virt_pages must be at most {}, got {}", limit, self.virt_pages));
        }
        if self.max_procs < 2 {
            return bad("max_procs must leave room for more than the boot process".into());
        }
        Ok(())
    }
}
