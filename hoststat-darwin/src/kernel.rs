//! The kernel seam.
//!
//! Every decoder reaches the operating system only through the [`Kernel`]
//! trait. [`crate::darwin::DarwinKernel`] forwards to the real sysctl, Mach
//! and syscall interfaces; [`crate::mock::MockKernel`] serves canned bytes so
//! the decoders can be tested on any host.
//!
//! Trait methods hand back raw bytes in the kernel's own layout. Interpreting
//! them is the decoders' job.

use std::io;

use crate::error::Result;

/// Mach `kern_return_t`.
pub type KernReturn = i32;

/// `KERN_SUCCESS`.
pub const KERN_SUCCESS: KernReturn = 0;

/// `getfsstat` flag: wait for up-to-date statistics.
pub const MNT_WAIT: i32 = 1;

/// `getfsstat` flag: return cached statistics.
pub const MNT_NOWAIT: i32 = 2;

/// Size of `integer_t`/`natural_t`, the unit Mach info counts are expressed in.
pub const INTEGER_SIZE: usize = 4;

/// Flavors of `host_processor_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorFlavor {
    /// `PROCESSOR_CPU_LOAD_INFO`: per-processor tick counters.
    CpuLoadInfo,
}

impl ProcessorFlavor {
    pub const fn code(self) -> i32 {
        match self {
            ProcessorFlavor::CpuLoadInfo => 2,
        }
    }
}

/// Selectors of the `host_info` / `host_statistics` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostSelector {
    /// `host_info(HOST_BASIC_INFO)`.
    BasicInfo,
    /// `host_statistics(HOST_VM_INFO)`.
    VmStatistics,
}

impl HostSelector {
    /// Flavor code passed to the kernel.
    pub const fn flavor(self) -> i32 {
        match self {
            HostSelector::BasicInfo => 1,
            HostSelector::VmStatistics => 2,
        }
    }

    /// Output size in `integer_t` units (`HOST_BASIC_INFO_COUNT`, `HOST_VM_INFO_COUNT`).
    pub const fn count(self) -> u32 {
        match self {
            HostSelector::BasicInfo => 12,
            HostSelector::VmStatistics => 15,
        }
    }

    /// Name of the kernel call behind this selector.
    pub const fn call(self) -> &'static str {
        match self {
            HostSelector::BasicInfo => "host_info",
            HostSelector::VmStatistics => "host_statistics",
        }
    }
}

/// A kernel-owned array returned by `host_processor_info`.
///
/// The memory belongs to the kernel until it is handed back through
/// [`Kernel::vm_deallocate`]. Decoders never hold this value directly; they
/// wrap it in [`crate::mach::KernelAllocation`] immediately.
#[derive(Debug)]
pub struct ProcessorInfo {
    /// Start of the array.
    pub address: *const u8,
    /// Array length in `integer_t` units.
    pub info_count: u32,
    /// Number of processors the array describes.
    pub processor_count: u32,
}

impl ProcessorInfo {
    /// Array length in bytes.
    pub fn byte_len(&self) -> usize {
        self.info_count as usize * INTEGER_SIZE
    }
}

/// One raw utmpx entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginRecord {
    pub user: String,
    pub line: String,
    pub host: String,
    /// `ut_type`.
    pub kind: i16,
    /// `ut_tv.tv_sec`.
    pub started: i64,
}

/// Operating-system facilities used by the decoders.
pub trait Kernel {
    /// Read a named sysctl attribute as raw bytes.
    ///
    /// A name the kernel does not know is reported as `ErrorKind::NotFound`.
    fn sysctl_by_name(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Call `host_processor_info`, returning a kernel-owned array.
    fn host_processor_info(
        &self,
        flavor: ProcessorFlavor,
    ) -> std::result::Result<ProcessorInfo, KernReturn>;

    /// Return a region obtained from [`Kernel::host_processor_info`] to the kernel.
    ///
    /// # Safety
    ///
    /// `address` and `size` must describe a region returned by this kernel
    /// that has not been released yet. After the call the region must not be
    /// read.
    unsafe fn vm_deallocate(&self, address: *const u8, size: usize) -> KernReturn;

    /// Call `host_info` or `host_statistics`, returning the filled
    /// `integer_t` array as bytes.
    fn host_info(&self, selector: HostSelector) -> std::result::Result<Vec<u8>, KernReturn>;

    /// Call `getfsstat`.
    ///
    /// With `None` the kernel only reports how many filesystems are mounted.
    /// With a buffer it fills as many whole records as fit and returns how
    /// many it wrote.
    fn getfsstat(&self, buf: Option<&mut [u8]>, flags: i32) -> io::Result<usize>;

    /// `getloadavg`. Returns how many samples were written, or -1.
    fn load_average(&self, samples: &mut [f64; 3]) -> i32;

    /// Every entry of the utmpx database.
    fn login_records(&self) -> Vec<LoginRecord>;

    /// Process-visible hostname.
    fn hostname(&self) -> io::Result<String>;

    /// Wall-clock time, Unix epoch seconds.
    fn now(&self) -> i64;

    /// Output of `netstat -ibdn`.
    fn netstat_interfaces(&self) -> Result<String>;
}
