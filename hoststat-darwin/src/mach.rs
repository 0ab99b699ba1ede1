//! Mach host and processor statistics.
//!
//! `host_processor_info` hands back an array the kernel allocated in our
//! address space. [`KernelAllocation`] owns that array from the moment the
//! call returns and gives it back with `vm_deallocate` when dropped, so the
//! region is released exactly once on every path out of the decoder.

use std::slice;

use tracing::{debug, warn};

use crate::error::{Result, StatError};
use crate::kernel::{HostSelector, INTEGER_SIZE, KERN_SUCCESS, Kernel, ProcessorFlavor};
use crate::layout::{Field, FieldKind, FieldReader, Layout};

pub const CPU_STATE_USER: usize = 0;
pub const CPU_STATE_SYSTEM: usize = 1;
pub const CPU_STATE_IDLE: usize = 2;
pub const CPU_STATE_NICE: usize = 3;
pub const CPU_STATE_MAX: usize = 4;

/// Tick counters of one processor, indexed by `CPU_STATE_*`.
pub type ProcessorTickSample = [u32; CPU_STATE_MAX];

/// `struct processor_cpu_load_info`.
pub const PROCESSOR_CPU_LOAD_INFO: Layout = Layout {
    name: "processor_cpu_load_info",
    version: 1,
    fields: &[
        Field::new("user", FieldKind::U32),
        Field::new("system", FieldKind::U32),
        Field::new("idle", FieldKind::U32),
        Field::new("nice", FieldKind::U32),
    ],
};

const _: () = assert!(PROCESSOR_CPU_LOAD_INFO.size() == CPU_STATE_MAX * INTEGER_SIZE);

/// `struct host_basic_info`.
pub const HOST_BASIC_INFO: Layout = Layout {
    name: "host_basic_info",
    version: 1,
    fields: &[
        Field::new("max_cpus", FieldKind::I32),
        Field::new("avail_cpus", FieldKind::I32),
        Field::new("memory_size", FieldKind::U32),
        Field::new("cpu_type", FieldKind::I32),
        Field::new("cpu_subtype", FieldKind::I32),
        Field::new("cpu_threadtype", FieldKind::I32),
        Field::new("physical_cpu", FieldKind::I32),
        Field::new("physical_cpu_max", FieldKind::I32),
        Field::new("logical_cpu", FieldKind::I32),
        Field::new("logical_cpu_max", FieldKind::I32),
        Field::new("max_mem", FieldKind::U64),
    ],
};

const _: () = assert!(
    HOST_BASIC_INFO.size() == HostSelector::BasicInfo.count() as usize * INTEGER_SIZE
);

/// `struct vm_statistics`.
pub const VM_STATISTICS: Layout = Layout {
    name: "vm_statistics",
    version: 1,
    fields: &[
        Field::new("free_count", FieldKind::U32),
        Field::new("active_count", FieldKind::U32),
        Field::new("inactive_count", FieldKind::U32),
        Field::new("wire_count", FieldKind::U32),
        Field::new("zero_fill_count", FieldKind::U32),
        Field::new("reactivations", FieldKind::U32),
        Field::new("pageins", FieldKind::U32),
        Field::new("pageouts", FieldKind::U32),
        Field::new("faults", FieldKind::U32),
        Field::new("cow_faults", FieldKind::U32),
        Field::new("lookups", FieldKind::U32),
        Field::new("hits", FieldKind::U32),
        Field::new("purgeable_count", FieldKind::U32),
        Field::new("purges", FieldKind::U32),
        Field::new("speculative_count", FieldKind::U32),
    ],
};

const _: () = assert!(
    VM_STATISTICS.size() == HostSelector::VmStatistics.count() as usize * INTEGER_SIZE
);

/// A kernel-allocated region, released when dropped.
pub struct KernelAllocation<'k, K: Kernel + ?Sized> {
    kernel: &'k K,
    address: *const u8,
    size: usize,
}

impl<'k, K: Kernel + ?Sized> KernelAllocation<'k, K> {
    /// Take ownership of a region.
    ///
    /// # Safety
    ///
    /// `address` must point to `size` readable bytes allocated by `kernel`,
    /// and nothing else may release the region.
    pub unsafe fn new(kernel: &'k K, address: *const u8, size: usize) -> Self {
        Self {
            kernel,
            address,
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.address.is_null() || self.size == 0 {
            return &[];
        }
        // SAFETY: `new` requires `size` readable bytes at `address`, and the
        // region stays mapped until `drop`.
        unsafe { slice::from_raw_parts(self.address, self.size) }
    }
}

impl<K: Kernel + ?Sized> Drop for KernelAllocation<'_, K> {
    fn drop(&mut self) {
        if self.address.is_null() {
            return;
        }
        // SAFETY: the region came from this kernel and this guard is its only owner.
        let code = unsafe { self.kernel.vm_deallocate(self.address, self.size) };
        if code != KERN_SUCCESS {
            warn!(code, size = self.size, "vm_deallocate failed");
        }
    }
}

/// Read the tick counters of every logical processor.
pub fn read_processor_ticks<K: Kernel + ?Sized>(kernel: &K) -> Result<Vec<ProcessorTickSample>> {
    let info = kernel
        .host_processor_info(ProcessorFlavor::CpuLoadInfo)
        .map_err(|code| StatError::KernelCallFailed {
            call: "host_processor_info",
            code,
        })?;
    let processors = info.processor_count as usize;

    // SAFETY: the region was just returned by host_processor_info.
    let region = unsafe { KernelAllocation::new(kernel, info.address, info.byte_len()) };
    let bytes = region.as_bytes().to_vec();
    drop(region);

    debug!(processors, len = bytes.len(), "host_processor_info");
    decode_ticks(&bytes, processors)
}

fn decode_ticks(bytes: &[u8], processors: usize) -> Result<Vec<ProcessorTickSample>> {
    let record = PROCESSOR_CPU_LOAD_INFO.size();
    let needed = processors * record;
    if bytes.len() < needed {
        return Err(StatError::too_short(
            PROCESSOR_CPU_LOAD_INFO.name,
            needed,
            bytes.len(),
        ));
    }

    bytes[..needed]
        .chunks_exact(record)
        .map(|chunk| {
            let mut r = FieldReader::new(&PROCESSOR_CPU_LOAD_INFO, chunk)?;
            let mut ticks = [0u32; CPU_STATE_MAX];
            ticks[CPU_STATE_USER] = r.u32("user")?;
            ticks[CPU_STATE_SYSTEM] = r.u32("system")?;
            ticks[CPU_STATE_IDLE] = r.u32("idle")?;
            ticks[CPU_STATE_NICE] = r.u32("nice")?;
            Ok(ticks)
        })
        .collect()
}

/// Decoded `host_basic_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBasicInfo {
    pub max_cpus: i32,
    pub avail_cpus: i32,
    pub memory_size: u32,
    pub cpu_type: i32,
    pub cpu_subtype: i32,
    pub cpu_threadtype: i32,
    pub physical_cpu: i32,
    pub physical_cpu_max: i32,
    pub logical_cpu: i32,
    pub logical_cpu_max: i32,
    pub max_mem: u64,
}

impl HostBasicInfo {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(&HOST_BASIC_INFO, buf)?;
        Ok(Self {
            max_cpus: r.i32("max_cpus")?,
            avail_cpus: r.i32("avail_cpus")?,
            memory_size: r.u32("memory_size")?,
            cpu_type: r.i32("cpu_type")?,
            cpu_subtype: r.i32("cpu_subtype")?,
            cpu_threadtype: r.i32("cpu_threadtype")?,
            physical_cpu: r.i32("physical_cpu")?,
            physical_cpu_max: r.i32("physical_cpu_max")?,
            logical_cpu: r.i32("logical_cpu")?,
            logical_cpu_max: r.i32("logical_cpu_max")?,
            max_mem: r.u64("max_mem")?,
        })
    }
}

/// Decoded `vm_statistics`. Counts are pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmStatistics {
    pub free_count: u32,
    pub active_count: u32,
    pub inactive_count: u32,
    pub wire_count: u32,
    pub zero_fill_count: u32,
    pub reactivations: u32,
    pub pageins: u32,
    pub pageouts: u32,
    pub faults: u32,
    pub cow_faults: u32,
    pub lookups: u32,
    pub hits: u32,
    pub purgeable_count: u32,
    pub purges: u32,
    pub speculative_count: u32,
}

impl VmStatistics {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(&VM_STATISTICS, buf)?;
        Ok(Self {
            free_count: r.u32("free_count")?,
            active_count: r.u32("active_count")?,
            inactive_count: r.u32("inactive_count")?,
            wire_count: r.u32("wire_count")?,
            zero_fill_count: r.u32("zero_fill_count")?,
            reactivations: r.u32("reactivations")?,
            pageins: r.u32("pageins")?,
            pageouts: r.u32("pageouts")?,
            faults: r.u32("faults")?,
            cow_faults: r.u32("cow_faults")?,
            lookups: r.u32("lookups")?,
            hits: r.u32("hits")?,
            purgeable_count: r.u32("purgeable_count")?,
            purges: r.u32("purges")?,
            speculative_count: r.u32("speculative_count")?,
        })
    }
}

fn host_call<K: Kernel + ?Sized>(kernel: &K, selector: HostSelector) -> Result<Vec<u8>> {
    let bytes = kernel
        .host_info(selector)
        .map_err(|code| StatError::KernelCallFailed {
            call: selector.call(),
            code,
        })?;
    debug!(call = selector.call(), len = bytes.len(), "host statistics");
    Ok(bytes)
}

/// `host_info(HOST_BASIC_INFO)`.
pub fn read_host_basic_info<K: Kernel + ?Sized>(kernel: &K) -> Result<HostBasicInfo> {
    HostBasicInfo::decode(&host_call(kernel, HostSelector::BasicInfo)?)
}

/// `host_statistics(HOST_VM_INFO)`.
pub fn read_vm_statistics<K: Kernel + ?Sized>(kernel: &K) -> Result<VmStatistics> {
    VmStatistics::decode(&host_call(kernel, HostSelector::VmStatistics)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockKernel, ProcessorFailure};

    #[test]
    fn test_ticks_per_processor() {
        let kernel = MockKernel::new().with_processors(vec![[10, 20, 30, 1], [11, 21, 31, 2]]);
        let ticks = read_processor_ticks(&kernel).unwrap();
        assert_eq!(ticks, vec![[10, 20, 30, 1], [11, 21, 31, 2]]);
        assert_eq!(kernel.allocations(), 1);
        assert_eq!(kernel.releases(), 1);
    }

    #[test]
    fn test_failed_call_allocates_nothing() {
        let kernel = MockKernel::new().with_processors(vec![[1, 2, 3, 4]]);
        kernel.set_processor_failure(Some(ProcessorFailure::Status(5)));
        let err = read_processor_ticks(&kernel).unwrap_err();
        assert!(matches!(
            err,
            StatError::KernelCallFailed {
                call: "host_processor_info",
                code: 5
            }
        ));
        assert_eq!(kernel.allocations(), 0);
        assert_eq!(kernel.releases(), 0);
    }

    #[test]
    fn test_short_region_is_still_released() {
        let kernel = MockKernel::new().with_processors(vec![[1, 2, 3, 4], [5, 6, 7, 8]]);
        kernel.set_processor_failure(Some(ProcessorFailure::ShortInfo(6)));
        let err = read_processor_ticks(&kernel).unwrap_err();
        assert!(matches!(
            err,
            StatError::BufferTooShort {
                needed: 32,
                actual: 24,
                ..
            }
        ));
        assert_eq!(kernel.allocations(), 1);
        assert_eq!(kernel.releases(), 1);
        assert_eq!(kernel.outstanding_regions(), 0);
    }

    #[test]
    fn test_release_size_is_info_count_bytes() {
        let kernel = MockKernel::new().with_processors(vec![[0; 4]; 3]);
        read_processor_ticks(&kernel).unwrap();
        assert_eq!(kernel.released_bytes(), 3 * 4 * INTEGER_SIZE);
    }

    #[test]
    fn test_host_basic_info_decode() {
        let info = HostBasicInfo {
            max_cpus: 8,
            avail_cpus: 8,
            memory_size: 0x8000_0000,
            cpu_type: 16777228,
            cpu_subtype: 2,
            cpu_threadtype: 1,
            physical_cpu: 8,
            physical_cpu_max: 8,
            logical_cpu: 8,
            logical_cpu_max: 8,
            max_mem: 17_179_869_184,
        };
        let kernel = MockKernel::new().with_host_basic_info(&info);
        assert_eq!(read_host_basic_info(&kernel).unwrap(), info);
    }

    #[test]
    fn test_host_info_failure_code() {
        let kernel = MockKernel::new().fail_host_info(HostSelector::BasicInfo, 4);
        let err = read_host_basic_info(&kernel).unwrap_err();
        assert!(matches!(
            err,
            StatError::KernelCallFailed {
                call: "host_info",
                code: 4
            }
        ));
    }

    #[test]
    fn test_vm_statistics_decode() {
        let stats = VmStatistics {
            free_count: 100,
            active_count: 200,
            inactive_count: 50,
            wire_count: 25,
            speculative_count: 7,
            ..Default::default()
        };
        let kernel = MockKernel::new().with_vm_statistics(&stats);
        assert_eq!(read_vm_statistics(&kernel).unwrap(), stats);
    }
}
