use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Accumulated CPU time for one processor (or the aggregate of all of them).
///
/// Values are kernel ticks since boot, not percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuTimesStat {
    /// "cpu0", "cpu1", ... or "cpu-total" for the aggregate.
    pub cpu: String,
    pub user: f64,
    pub system: f64,
    pub idle: f64,
    pub nice: f64,
}

impl CpuTimesStat {
    /// Sum of all states.
    pub fn total(&self) -> f64 {
        self.user + self.system + self.idle + self.nice
    }
}

/// Identity of one logical CPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfoStat {
    pub cpu: i32,
    pub cpu_type: i32,
    pub cpu_subtype: i32,
    pub model_name: String,
    pub mhz: f64,
    /// Cache size in bytes as reported by the kernel.
    pub cache_size: i32,
}

/// Physical memory usage in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMemoryStat {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    /// `used / total`, a fraction in `[0, 1]`.
    pub used_percent: f64,
    pub free: u64,
    pub active: u64,
    pub inactive: u64,
    pub wired: u64,
}

/// Swap usage in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapMemoryStat {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    /// `used / total`, a fraction in `[0, 1]`.
    pub used_percent: f64,
}

/// One mounted filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPartitionStat {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    /// Comma-joined mount options, always starting with `rw` or `ro`.
    pub opts: String,
}

/// Per-mount I/O operation counters since mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIoCountersStat {
    pub name: String,
    pub read_count: u64,
    pub write_count: u64,
}

/// Host identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfoStat {
    pub hostname: String,
    /// Seconds since boot.
    pub uptime: u64,
    pub os: String,
    pub platform: String,
    pub platform_family: String,
    pub platform_version: String,
}

/// A logged-in user session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStat {
    pub user: String,
    pub terminal: String,
    pub host: String,
    /// Login time, Unix epoch seconds.
    pub started: i64,
}

/// System load averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAvgStat {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// Network interface counters since the interface came up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIoCountersStat {
    /// Interface name, or "all" for the aggregate.
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
    pub dropout: u64,
}

impl NetIoCountersStat {
    /// Add another interface's counters into this one.
    pub fn accumulate(&mut self, other: &NetIoCountersStat) {
        self.bytes_sent = self.bytes_sent.saturating_add(other.bytes_sent);
        self.bytes_recv = self.bytes_recv.saturating_add(other.bytes_recv);
        self.packets_sent = self.packets_sent.saturating_add(other.packets_sent);
        self.packets_recv = self.packets_recv.saturating_add(other.packets_recv);
        self.errin = self.errin.saturating_add(other.errin);
        self.errout = self.errout.saturating_add(other.errout);
        self.dropout = self.dropout.saturating_add(other.dropout);
    }
}

/// Stat category a collector can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    CpuTimes,
    CpuInfo,
    Memory,
    Swap,
    Disk,
    DiskIo,
    Network,
    Host,
    Users,
    Load,
}

impl Category {
    /// Get the string representation used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CpuTimes => "cpu_times",
            Category::CpuInfo => "cpu_info",
            Category::Memory => "memory",
            Category::Swap => "swap",
            Category::Disk => "disk",
            Category::DiskIo => "disk_io",
            Category::Network => "network",
            Category::Host => "host",
            Category::Users => "users",
            Category::Load => "load",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A category that failed (or degraded) while building a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryError {
    pub category: Category,
    pub message: String,
}

/// One point-in-time collection of every enabled category.
///
/// A `None` category was either disabled or failed; failures are listed in
/// `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix epoch milliseconds when collection started.
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_times: Option<Vec<CpuTimesStat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_info: Option<Vec<CpuInfoStat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<VirtualMemoryStat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<SwapMemoryStat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<DiskPartitionStat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_io: Option<BTreeMap<String, DiskIoCountersStat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<NetIoCountersStat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfoStat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserStat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadAvgStat>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<CategoryError>,
}

impl Snapshot {
    /// Create an empty snapshot stamped with the current time.
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            ..Default::default()
        }
    }

    /// Record a failed or degraded category.
    pub fn record_error(&mut self, category: Category, message: impl Into<String>) {
        self.errors.push(CategoryError {
            category,
            message: message.into(),
        });
    }

    /// Whether any category reported an error.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
