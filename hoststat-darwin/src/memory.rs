//! Physical memory and swap usage.

use hoststat_common::{SwapMemoryStat, VirtualMemoryStat};

use crate::error::{Result, StatError};
use crate::kernel::Kernel;
use crate::layout::{Field, FieldKind, FieldReader, Layout};
use crate::mach::read_vm_statistics;
use crate::sysctl::{Shape, SysctlValue, read_attribute};

/// Leading fields of `struct xsw_usage`.
pub const XSW_USAGE: Layout = Layout {
    name: "xsw_usage",
    version: 1,
    fields: &[
        Field::new("xsu_total", FieldKind::U64),
        Field::new("xsu_avail", FieldKind::U64),
        Field::new("xsu_used", FieldKind::U64),
    ],
};

const _: () = assert!(XSW_USAGE.size() == 24);

/// Decoded `vm.swapusage`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XswUsage {
    pub total: u64,
    pub avail: u64,
    pub used: u64,
}

impl SysctlValue for XswUsage {
    const SHAPE: Shape = Shape::Struct(&XSW_USAGE);

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(&XSW_USAGE, buf)?;
        Ok(Self {
            total: r.u64("xsu_total")?,
            avail: r.u64("xsu_avail")?,
            used: r.u64("xsu_used")?,
        })
    }
}

fn fraction(part: u64, total: u64) -> f64 {
    part as f64 / total as f64
}

/// Physical memory usage in bytes.
pub fn read_virtual_memory<K: Kernel + ?Sized>(kernel: &K) -> Result<VirtualMemoryStat> {
    let total: u64 = read_attribute(kernel, "hw.memsize")?;
    if total == 0 {
        return Err(StatError::InvalidMemoryTotal("hw.memsize"));
    }
    let page_size: u64 = read_attribute(kernel, "hw.pagesize")?;
    let vm = read_vm_statistics(kernel)?;

    let bytes = |pages: u32| u64::from(pages).saturating_mul(page_size);
    let free = bytes(vm.free_count);
    let inactive = bytes(vm.inactive_count);
    let used = total.saturating_sub(free);

    Ok(VirtualMemoryStat {
        total,
        available: free.saturating_add(inactive),
        used,
        used_percent: fraction(used, total),
        free,
        active: bytes(vm.active_count),
        inactive,
        wired: bytes(vm.wire_count),
    })
}

/// Swap usage in bytes.
pub fn read_swap<K: Kernel + ?Sized>(kernel: &K) -> Result<SwapMemoryStat> {
    let usage: XswUsage = read_attribute(kernel, "vm.swapusage")?;
    if usage.total == 0 {
        return Err(StatError::InvalidMemoryTotal("vm.swapusage"));
    }
    Ok(SwapMemoryStat {
        total: usage.total,
        used: usage.used,
        free: usage.avail,
        used_percent: fraction(usage.used, usage.total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::VmStatistics;
    use crate::mock::MockKernel;

    const GIB: u64 = 1 << 30;

    fn memory_kernel(total: u64) -> MockKernel {
        MockKernel::new()
            .with_sysctl_u64("hw.memsize", total)
            .with_sysctl_u64("hw.pagesize", 4096)
            .with_vm_statistics(&VmStatistics {
                free_count: 262_144,
                active_count: 524_288,
                inactive_count: 131_072,
                wire_count: 65_536,
                ..Default::default()
            })
    }

    #[test]
    fn test_virtual_memory_derivations() {
        let vm = read_virtual_memory(&memory_kernel(8 * GIB)).unwrap();
        assert_eq!(vm.total, 8 * GIB);
        assert_eq!(vm.free, GIB);
        assert_eq!(vm.inactive, GIB / 2);
        assert_eq!(vm.active, 2 * GIB);
        assert_eq!(vm.wired, GIB / 4);
        assert_eq!(vm.available, GIB + GIB / 2);
        assert_eq!(vm.used, 7 * GIB);
        assert_eq!(vm.used_percent, 0.875);
    }

    #[test]
    fn test_zero_total_is_rejected() {
        let err = read_virtual_memory(&memory_kernel(0)).unwrap_err();
        assert!(matches!(err, StatError::InvalidMemoryTotal(_)));
    }

    #[test]
    fn test_free_above_total_saturates() {
        let vm = read_virtual_memory(&memory_kernel(GIB / 2)).unwrap();
        assert_eq!(vm.used, 0);
        assert_eq!(vm.used_percent, 0.0);
    }

    #[test]
    fn test_swap_usage() {
        let kernel = MockKernel::new().with_swap(1000, 750, 250);
        let swap = read_swap(&kernel).unwrap();
        assert_eq!(
            swap,
            SwapMemoryStat {
                total: 1000,
                used: 250,
                free: 750,
                used_percent: 0.25,
            }
        );
    }

    #[test]
    fn test_no_swap_configured() {
        let kernel = MockKernel::new().with_swap(0, 0, 0);
        assert!(matches!(
            read_swap(&kernel).unwrap_err(),
            StatError::InvalidMemoryTotal("vm.swapusage")
        ));
    }

    #[test]
    fn test_truncated_swapusage() {
        let kernel = MockKernel::new().with_sysctl("vm.swapusage", vec![0; 16]);
        assert!(matches!(
            read_swap(&kernel).unwrap_err(),
            StatError::BufferTooShort {
                needed: 24,
                actual: 16,
                ..
            }
        ));
    }
}
