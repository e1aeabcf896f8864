//! Tier selection.
//!
//! Reads probe tiers in a fixed order per mode. Writes go to fixed tiers,
//! except in `Smart` mode where the record size and host memory decide.

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Records below this size may live in memory alone.
const SMALL_RECORD_BYTES: u64 = MIB;

/// Records below this size may be written to both tiers.
const MEDIUM_RECORD_BYTES: u64 = 10 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    Disabled,
    MemoryOnly,
    DiskOnly,
    #[default]
    Hybrid,
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Memory,
    Disk,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Memory => write!(f, "memory"),
            Tier::Disk => write!(f, "disk"),
        }
    }
}

/// Which tiers a write lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WritePlan {
    pub memory: bool,
    pub disk: bool,
}

impl WritePlan {
    pub const NONE: WritePlan = WritePlan {
        memory: false,
        disk: false,
    };
    pub const MEMORY: WritePlan = WritePlan {
        memory: true,
        disk: false,
    };
    pub const DISK: WritePlan = WritePlan {
        memory: false,
        disk: true,
    };
    pub const BOTH: WritePlan = WritePlan {
        memory: true,
        disk: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.memory && !self.disk
    }
}

/// Host memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

impl MemoryInfo {
    /// Substituted when the host can't be queried.
    pub fn conservative() -> Self {
        Self {
            total: 2 * 1024 * MIB,
            available: 512 * MIB,
        }
    }

    pub fn used_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total.saturating_sub(self.available) as f64 / self.total as f64
        }
    }
}

pub trait MemoryInfoProvider: Send + Sync {
    /// `None` when the host can't be queried.
    fn memory_info(&self) -> Option<MemoryInfo>;

    /// Never fails; falls back to conservative values.
    fn memory_info_or_default(&self) -> MemoryInfo {
        self.memory_info().unwrap_or_else(MemoryInfo::conservative)
    }
}

/// Reads `/proc/meminfo` on Linux; reports nothing elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryInfoProvider for SystemMemory {
    #[cfg(target_os = "linux")]
    fn memory_info(&self) -> Option<MemoryInfo> {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&contents)
    }

    #[cfg(not(target_os = "linux"))]
    fn memory_info(&self) -> Option<MemoryInfo> {
        None
    }
}

/// Parse `MemTotal` / `MemAvailable` (kB) out of a meminfo dump.
pub fn parse_meminfo(contents: &str) -> Option<MemoryInfo> {
    let field = |name: &str| -> Option<u64> {
        contents
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    Some(MemoryInfo {
        total,
        available: available.min(total),
    })
}

/// A provider that always reports the same numbers, or nothing.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub Option<MemoryInfo>);

impl MemoryInfoProvider for FixedMemory {
    fn memory_info(&self) -> Option<MemoryInfo> {
        self.0
    }
}

/// Tiers to probe on read, in order.
pub fn read_plan(strategy: CacheStrategy) -> &'static [Tier] {
    match strategy {
        CacheStrategy::Disabled => &[],
        CacheStrategy::MemoryOnly => &[Tier::Memory],
        CacheStrategy::DiskOnly => &[Tier::Disk],
        CacheStrategy::Hybrid | CacheStrategy::Smart => &[Tier::Memory, Tier::Disk],
    }
}

/// Tiers to write for a record of `data_size` bytes.
pub fn write_plan(strategy: CacheStrategy, data_size: u64, memory: MemoryInfo) -> WritePlan {
    match strategy {
        CacheStrategy::Disabled => WritePlan::NONE,
        CacheStrategy::MemoryOnly => WritePlan::MEMORY,
        CacheStrategy::DiskOnly => WritePlan::DISK,
        CacheStrategy::Hybrid => WritePlan::BOTH,
        CacheStrategy::Smart => resolve_write_strategy(data_size, memory.available, memory.total),
    }
}

/// The smart-mode decision. Pure: same inputs, same plan.
pub fn resolve_write_strategy(data_size: u64, available: u64, _total: u64) -> WritePlan {
    if data_size > available / 2 {
        WritePlan::DISK
    } else if data_size < SMALL_RECORD_BYTES && available > data_size.saturating_mul(4) {
        WritePlan::MEMORY
    } else if data_size < MEDIUM_RECORD_BYTES && available > data_size.saturating_mul(2) {
        WritePlan::BOTH
    } else {
        WritePlan::DISK
    }
}
