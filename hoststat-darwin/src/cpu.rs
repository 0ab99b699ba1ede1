//! CPU times and identity.

use hoststat_common::{CpuInfoStat, CpuTimesStat};
use tracing::warn;

use crate::error::Result;
use crate::kernel::Kernel;
use crate::mach::{
    CPU_STATE_IDLE, CPU_STATE_NICE, CPU_STATE_SYSTEM, CPU_STATE_USER, ProcessorTickSample,
    read_host_basic_info, read_processor_ticks,
};
use crate::sysctl::{SysctlValue, read_attribute, read_string};

/// Name of the aggregate record.
pub const CPU_TOTAL: &str = "cpu-total";

fn add_ticks(record: &mut CpuTimesStat, ticks: &ProcessorTickSample) {
    record.user += f64::from(ticks[CPU_STATE_USER]);
    record.system += f64::from(ticks[CPU_STATE_SYSTEM]);
    record.idle += f64::from(ticks[CPU_STATE_IDLE]);
    record.nice += f64::from(ticks[CPU_STATE_NICE]);
}

/// Accumulated ticks, one record per processor or a single `cpu-total`.
pub fn read_cpu_times<K: Kernel + ?Sized>(kernel: &K, percpu: bool) -> Result<Vec<CpuTimesStat>> {
    let samples = read_processor_ticks(kernel)?;

    if percpu {
        return Ok(samples
            .iter()
            .enumerate()
            .map(|(i, ticks)| {
                let mut record = CpuTimesStat {
                    cpu: format!("cpu{}", i),
                    ..Default::default()
                };
                add_ticks(&mut record, ticks);
                record
            })
            .collect());
    }

    let mut total = CpuTimesStat {
        cpu: CPU_TOTAL.to_string(),
        ..Default::default()
    };
    for ticks in &samples {
        add_ticks(&mut total, ticks);
    }
    Ok(vec![total])
}

/// An attribute some kernels do not publish; absent reads as zero.
fn read_optional<T, K>(kernel: &K, name: &str) -> Result<T>
where
    T: SysctlValue + Default,
    K: Kernel + ?Sized,
{
    match read_attribute(kernel, name) {
        Err(e) if e.is_not_found() => {
            warn!(attribute = name, "sysctl not published, reporting 0");
            Ok(T::default())
        }
        other => other,
    }
}

/// One identity record per CPU slot.
///
/// The kernel only reports machine-wide model, frequency and cache size, so
/// every record carries the same values. Frequency and cache size are absent
/// on arm64 and read as 0.
pub fn read_processor_identity<K: Kernel + ?Sized>(kernel: &K) -> Result<Vec<CpuInfoStat>> {
    let basic = read_host_basic_info(kernel)?;
    let model_name = read_string(kernel, "machdep.cpu.brand_string")?;
    let hz: i64 = read_optional(kernel, "hw.cpufrequency")?;
    let cache_size: i32 = read_optional(kernel, "machdep.cpu.cache.size")?;
    let mhz = hz as f64 / 1_000_000.0;

    Ok((0..basic.max_cpus.max(0))
        .map(|cpu| CpuInfoStat {
            cpu,
            cpu_type: basic.cpu_type,
            cpu_subtype: basic.cpu_subtype,
            model_name: model_name.clone(),
            mhz,
            cache_size,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatError;
    use crate::mach::HostBasicInfo;
    use crate::mock::MockKernel;

    fn identity_kernel() -> MockKernel {
        MockKernel::new()
            .with_host_basic_info(&HostBasicInfo {
                max_cpus: 4,
                avail_cpus: 4,
                cpu_type: 7,
                cpu_subtype: 8,
                ..Default::default()
            })
            .with_sysctl_str("machdep.cpu.brand_string", "Intel(R) Core(TM) i7-8559U CPU @ 2.70GHz")
            .with_sysctl_i64("hw.cpufrequency", 2_700_000_000)
            .with_sysctl_i32("machdep.cpu.cache.size", 256)
    }

    #[test]
    fn test_percpu_records() {
        let kernel = MockKernel::new().with_processors(vec![[100, 50, 800, 0], [90, 40, 850, 3]]);
        let times = read_cpu_times(&kernel, true).unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].cpu, "cpu0");
        assert_eq!(times[1].cpu, "cpu1");
        assert_eq!(times[1].idle, 850.0);
        assert_eq!(times[1].nice, 3.0);
    }

    #[test]
    fn test_aggregate_record() {
        let kernel = MockKernel::new().with_processors(vec![[100, 50, 800, 0], [90, 40, 850, 3]]);
        let times = read_cpu_times(&kernel, false).unwrap();
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].cpu, CPU_TOTAL);
        assert_eq!(times[0].user, 190.0);
        assert_eq!(times[0].system, 90.0);
        assert_eq!(times[0].idle, 1650.0);
        assert_eq!(times[0].total(), 1933.0);
    }

    #[test]
    fn test_aggregate_does_not_overflow() {
        let kernel = MockKernel::new().with_processors(vec![[u32::MAX, 0, 0, 0]; 2]);
        let times = read_cpu_times(&kernel, false).unwrap();
        assert_eq!(times[0].user, 2.0 * f64::from(u32::MAX));
    }

    #[test]
    fn test_identity_per_cpu() {
        let info = read_processor_identity(&identity_kernel()).unwrap();
        assert_eq!(info.len(), 4);
        assert_eq!(info[3].cpu, 3);
        assert_eq!(info[0].mhz, 2700.0);
        assert_eq!(info[0].cache_size, 256);
        assert_eq!(info[0].cpu_type, 7);
        assert!(info[2].model_name.starts_with("Intel"));
    }

    #[test]
    fn test_identity_without_frequency_or_cache() {
        let kernel = MockKernel::new()
            .with_host_basic_info(&HostBasicInfo {
                max_cpus: 8,
                ..Default::default()
            })
            .with_sysctl_str("machdep.cpu.brand_string", "Apple M2");
        let info = read_processor_identity(&kernel).unwrap();
        assert_eq!(info.len(), 8);
        assert_eq!(info[0].mhz, 0.0);
        assert_eq!(info[0].cache_size, 0);
        assert_eq!(info[7].model_name, "Apple M2");
    }

    #[test]
    fn test_identity_sysctl_failure_propagates() {
        let kernel = identity_kernel().with_sysctl_error("hw.cpufrequency", libc::EPERM);
        let err = read_processor_identity(&kernel).unwrap_err();
        assert!(matches!(err, StatError::Sysctl { ref name, .. } if name == "hw.cpufrequency"));
    }

    #[test]
    fn test_identity_missing_brand_string_propagates() {
        let kernel = MockKernel::new().with_host_basic_info(&HostBasicInfo {
            max_cpus: 8,
            ..Default::default()
        });
        let err = read_processor_identity(&kernel).unwrap_err();
        assert!(
            matches!(err, StatError::AttributeNotFound { ref name } if name == "machdep.cpu.brand_string")
        );
    }

    #[test]
    fn test_identity_needs_host_info() {
        let kernel = MockKernel::new().with_sysctl_str("machdep.cpu.brand_string", "Apple M2");
        assert!(matches!(
            read_processor_identity(&kernel).unwrap_err(),
            StatError::KernelCallFailed { .. }
        ));
    }
}
