//! Snapshot collection over the kernel decoders.

use hoststat_common::{Category, Snapshot};
use tracing::{debug, warn};

use crate::config::HoststatConfig;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::{cpu, disk, host, load, memory, net};

/// Collector for one point-in-time snapshot.
pub struct SnapshotCollector<'k, K: Kernel + ?Sized> {
    kernel: &'k K,
    config: HoststatConfig,
}

impl<'k, K: Kernel + ?Sized> SnapshotCollector<'k, K> {
    /// Create a new snapshot collector.
    pub fn new(kernel: &'k K, config: HoststatConfig) -> Self {
        Self { kernel, config }
    }

    pub fn config(&self) -> &HoststatConfig {
        &self.config
    }

    /// Read every enabled category once.
    ///
    /// A failed category is left out and listed in `errors`; it never stops
    /// the others.
    pub fn collect(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        let collect = &self.config.collect;
        let kernel = self.kernel;

        if collect.cpu_times {
            let result = cpu::read_cpu_times(kernel, collect.percpu);
            snapshot.cpu_times = keep(&mut snapshot, Category::CpuTimes, result);
        }

        if collect.cpu {
            let result = cpu::read_processor_identity(kernel);
            snapshot.cpu_info = keep(&mut snapshot, Category::CpuInfo, result);
        }

        if collect.memory {
            let result = memory::read_virtual_memory(kernel);
            snapshot.memory = keep(&mut snapshot, Category::Memory, result);
        }

        if collect.swap {
            let result = memory::read_swap(kernel);
            snapshot.swap = keep(&mut snapshot, Category::Swap, result);
        }

        if collect.disk {
            let result = disk::read_partitions(kernel, self.config.disk.all).map(|mut parts| {
                parts.retain(|p| self.config.disk.should_include(&p.mountpoint));
                parts
            });
            snapshot.partitions = keep(&mut snapshot, Category::Disk, result);
        }

        if collect.disk_io {
            let result = disk::read_io_counters(kernel).map(|mut io| {
                io.retain(|mount, _| self.config.disk.should_include(mount));
                io
            });
            snapshot.disk_io = keep(&mut snapshot, Category::DiskIo, result);
        }

        if collect.network {
            let result = net::read_net_io_counters(kernel, true).map(|mut counters| {
                counters.retain(|c| self.config.network.should_include(&c.name));
                if collect.pernic {
                    counters
                } else {
                    vec![net::aggregate(&counters)]
                }
            });
            snapshot.network = keep(&mut snapshot, Category::Network, result);
        }

        if collect.host {
            match host::read_host_info(kernel) {
                Ok(report) => {
                    for warning in &report.warnings {
                        snapshot.record_error(Category::Host, warning.to_string());
                    }
                    snapshot.host = Some(report.info);
                }
                Err(e) => {
                    warn!(category = %Category::Host, error = %e, "collection failed");
                    snapshot.record_error(Category::Host, e.to_string());
                }
            }
        }

        if collect.users {
            snapshot.users = Some(host::read_users(kernel));
        }

        if collect.load {
            let result = load::read_load_average(kernel);
            snapshot.load = keep(&mut snapshot, Category::Load, result);
        }

        debug!(errors = snapshot.errors.len(), "snapshot collected");
        snapshot
    }
}

/// Unwrap a category result, recording the failure on the snapshot.
fn keep<T>(snapshot: &mut Snapshot, category: Category, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(category = %category, error = %e, "collection failed");
            snapshot.record_error(category, e.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectConfig;
    use crate::mock::{MockKernel, mount};

    fn only(f: impl FnOnce(&mut CollectConfig)) -> HoststatConfig {
        let mut collect = CollectConfig {
            cpu: false,
            cpu_times: false,
            percpu: false,
            memory: false,
            swap: false,
            disk: false,
            disk_io: false,
            network: false,
            pernic: true,
            host: false,
            users: false,
            load: false,
        };
        f(&mut collect);
        HoststatConfig {
            collect,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_categories_are_absent() {
        let kernel = MockKernel::new().with_load(&[0.5, 0.4, 0.3]);
        let snapshot = SnapshotCollector::new(&kernel, only(|c| c.load = true)).collect();
        assert!(snapshot.load.is_some());
        assert!(snapshot.cpu_times.is_none());
        assert!(snapshot.memory.is_none());
        assert!(!snapshot.has_errors());
    }

    #[test]
    fn test_failure_is_recorded_not_fatal() {
        let kernel = MockKernel::new().with_load(&[0.5, 0.4, 0.3]);
        let config = only(|c| {
            c.swap = true;
            c.load = true;
        });
        let snapshot = SnapshotCollector::new(&kernel, config).collect();
        assert!(snapshot.swap.is_none());
        assert!(snapshot.load.is_some());
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].category, Category::Swap);
        assert!(snapshot.errors[0].message.contains("vm.swapusage"));
    }

    #[test]
    fn test_disk_filters_apply() {
        let kernel = MockKernel::new().with_mounts(vec![
            mount("/dev/disk1s1", "/", "apfs"),
            mount("/dev/disk1s4", "/System/Volumes/VM", "apfs"),
            mount("devfs", "/dev", "devfs"),
        ]);
        let mut config = only(|c| {
            c.disk = true;
            c.disk_io = true;
        });
        config.disk.exclude = vec!["/System/Volumes/VM".to_string()];

        let snapshot = SnapshotCollector::new(&kernel, config).collect();
        let parts = snapshot.partitions.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].mountpoint, "/");
        let io = snapshot.disk_io.unwrap();
        assert_eq!(io.keys().collect::<Vec<_>>(), vec!["/", "/dev"]);
    }

    #[test]
    fn test_network_filter_then_aggregate() {
        let netstat = "\
Name  Mtu   Network    Ipkts Ierrs Ibytes Opkts Oerrs Obytes Coll Drop
lo0   16384 <Link#1>   100   0     1000   100   0     1000   0    0
en0   1500  <Link#4>   10    0     500    20    0     800    0    1
en1   1500  <Link#5>   5     0     250    6     0     300    0    0
";
        let kernel = MockKernel::new().with_netstat(netstat);
        let config = only(|c| {
            c.network = true;
            c.pernic = false;
        });
        let snapshot = SnapshotCollector::new(&kernel, config).collect();
        let network = snapshot.network.unwrap();
        assert_eq!(network.len(), 1);
        assert_eq!(network[0].name, "all");
        assert_eq!(network[0].packets_recv, 15);
        assert_eq!(network[0].bytes_sent, 1100);
    }

    #[test]
    fn test_host_warnings_keep_partial_info() {
        let kernel = MockKernel::new()
            .with_boot_time(1_700_000_000, 0)
            .with_now(1_700_000_010)
            .with_sysctl_str("kern.osrelease", "23.4.0");
        let snapshot = SnapshotCollector::new(&kernel, only(|c| c.host = true)).collect();
        let host = snapshot.host.unwrap();
        assert_eq!(host.uptime, 10);
        assert_eq!(host.platform_version, "23.4.0");
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].category, Category::Host);
    }
}
