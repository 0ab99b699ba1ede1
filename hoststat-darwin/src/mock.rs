//! In-memory kernel for testing decoders without a Darwin host.
//!
//! `MockKernel` serves canned sysctl buffers, Mach info arrays, mount tables
//! and tool output. Regions handed out by `host_processor_info` are tracked
//! so tests can check that every acquisition is released exactly once.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::disk::{FilesystemStatRecord, STATFS, STATFS_VERSION};
use crate::error::{Result, StatError};
use crate::host::TIMEVAL;
use crate::kernel::{
    HostSelector, INTEGER_SIZE, KERN_SUCCESS, KernReturn, Kernel, LoginRecord, ProcessorFlavor,
    ProcessorInfo,
};
use crate::layout::{FieldKind, Layout};
use crate::mach::{HOST_BASIC_INFO, HostBasicInfo, ProcessorTickSample, VM_STATISTICS, VmStatistics};
use crate::memory::XSW_USAGE;

/// Injected misbehaviour of `host_processor_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorFailure {
    /// Return this status and allocate nothing.
    Status(KernReturn),
    /// Succeed, but report (and allocate) only this many `integer_t`s.
    ShortInfo(u32),
}

/// A value for one field when encoding a layout.
enum Value<'a> {
    Int(u64),
    Bytes(&'a [u8]),
    Zero,
}

/// Encode a record by walking `layout`, asking `value` for each field.
fn encode_layout<'a>(layout: &Layout, value: impl Fn(&str) -> Value<'a>) -> Vec<u8> {
    let mut out = Vec::with_capacity(layout.size());
    for field in layout.fields {
        let start = out.len();
        match (field.kind, value(field.name)) {
            (FieldKind::I32 | FieldKind::U32, Value::Int(v)) => {
                out.extend_from_slice(&(v as u32).to_le_bytes())
            }
            (FieldKind::I64 | FieldKind::U64, Value::Int(v)) => {
                out.extend_from_slice(&v.to_le_bytes())
            }
            (FieldKind::Bytes(n), Value::Bytes(b)) => {
                let len = b.len().min(n);
                out.extend_from_slice(&b[..len]);
            }
            _ => {}
        }
        out.resize(start + field.kind.width(), 0);
    }
    out
}

/// Encode a `struct statfs` record.
pub fn encode_statfs(stat: &FilesystemStatRecord) -> Vec<u8> {
    let mut fsid = [0u8; 8];
    fsid[..4].copy_from_slice(&stat.fsid[0].to_le_bytes());
    fsid[4..].copy_from_slice(&stat.fsid[1].to_le_bytes());

    encode_layout(&STATFS, |name| match name {
        "f_version" => Value::Int(stat.version as u64),
        "f_type" => Value::Int(stat.fs_type as u64),
        "f_flags" => Value::Int(stat.flags),
        "f_bsize" => Value::Int(stat.bsize),
        "f_iosize" => Value::Int(stat.iosize),
        "f_blocks" => Value::Int(stat.blocks),
        "f_bfree" => Value::Int(stat.bfree),
        "f_bavail" => Value::Int(stat.bavail as u64),
        "f_files" => Value::Int(stat.files),
        "f_ffree" => Value::Int(stat.ffree as u64),
        "f_syncwrites" => Value::Int(stat.syncwrites),
        "f_asyncwrites" => Value::Int(stat.asyncwrites),
        "f_syncreads" => Value::Int(stat.syncreads),
        "f_asyncreads" => Value::Int(stat.asyncreads),
        "f_namemax" => Value::Int(stat.namemax as u64),
        "f_owner" => Value::Int(stat.owner as u64),
        "f_fsid" => Value::Bytes(&fsid),
        "f_fstypename" => Value::Bytes(stat.fstypename.as_bytes()),
        "f_mntfromname" => Value::Bytes(stat.mntfromname.as_bytes()),
        "f_mntonname" => Value::Bytes(stat.mntonname.as_bytes()),
        _ => Value::Zero,
    })
}

/// A mounted filesystem record with the given names and otherwise plain values.
pub fn mount(from: &str, on: &str, fstype: &str) -> FilesystemStatRecord {
    FilesystemStatRecord {
        version: STATFS_VERSION,
        bsize: 4096,
        iosize: 1 << 20,
        namemax: 255,
        fstypename: fstype.to_string(),
        mntfromname: from.to_string(),
        mntonname: on.to_string(),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
struct ProcessorState {
    ticks: Vec<ProcessorTickSample>,
    failure: Option<ProcessorFailure>,
}

#[derive(Debug, Default)]
struct MountState {
    current: Vec<FilesystemStatRecord>,
    /// Tables that replace `current` after each size probe.
    pending: VecDeque<Vec<FilesystemStatRecord>>,
    error: Option<i32>,
    /// Record size the kernel fills in; `None` means `STATFS.size()`.
    record_width: Option<usize>,
    /// Added to the count a filling call returns.
    over_report: usize,
}

/// In-memory [`Kernel`].
#[derive(Debug)]
pub struct MockKernel {
    sysctls: HashMap<String, Vec<u8>>,
    sysctl_errors: HashMap<String, i32>,
    processors: Mutex<ProcessorState>,
    regions: Mutex<HashMap<usize, (Box<[u8]>, usize)>>,
    allocations: AtomicUsize,
    releases: AtomicUsize,
    released_bytes: AtomicUsize,
    host_info: HashMap<HostSelector, Vec<u8>>,
    host_failures: HashMap<HostSelector, KernReturn>,
    mounts: Mutex<MountState>,
    fsstat_calls: AtomicUsize,
    load: Vec<f64>,
    logins: Vec<LoginRecord>,
    hostname: Option<String>,
    now: i64,
    netstat: Option<String>,
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKernel {
    /// An empty kernel: every sysctl is unknown, no processors, no mounts.
    pub fn new() -> Self {
        Self {
            sysctls: HashMap::new(),
            sysctl_errors: HashMap::new(),
            processors: Mutex::new(ProcessorState::default()),
            regions: Mutex::new(HashMap::new()),
            allocations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            released_bytes: AtomicUsize::new(0),
            host_info: HashMap::new(),
            host_failures: HashMap::new(),
            mounts: Mutex::new(MountState::default()),
            fsstat_calls: AtomicUsize::new(0),
            load: Vec::new(),
            logins: Vec::new(),
            hostname: None,
            now: 0,
            netstat: None,
        }
    }

    pub fn with_sysctl(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.sysctls.insert(name.to_string(), bytes);
        self
    }

    pub fn with_sysctl_i32(self, name: &str, value: i32) -> Self {
        self.with_sysctl(name, value.to_le_bytes().to_vec())
    }

    pub fn with_sysctl_i64(self, name: &str, value: i64) -> Self {
        self.with_sysctl(name, value.to_le_bytes().to_vec())
    }

    pub fn with_sysctl_u64(self, name: &str, value: u64) -> Self {
        self.with_sysctl(name, value.to_le_bytes().to_vec())
    }

    /// A NUL-terminated string attribute.
    pub fn with_sysctl_str(self, name: &str, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.with_sysctl(name, bytes)
    }

    /// Make a sysctl fail with the given errno.
    pub fn with_sysctl_error(mut self, name: &str, errno: i32) -> Self {
        self.sysctl_errors.insert(name.to_string(), errno);
        self
    }

    /// `kern.boottime`.
    pub fn with_boot_time(self, sec: i64, usec: i32) -> Self {
        let bytes = encode_layout(&TIMEVAL, |name| match name {
            "tv_sec" => Value::Int(sec as u64),
            "tv_usec" => Value::Int(usec as u64),
            _ => Value::Zero,
        });
        self.with_sysctl("kern.boottime", bytes)
    }

    /// `vm.swapusage`, in `struct xsw_usage` order.
    pub fn with_swap(self, total: u64, avail: u64, used: u64) -> Self {
        let mut bytes = encode_layout(&XSW_USAGE, |name| match name {
            "xsu_total" => Value::Int(total),
            "xsu_avail" => Value::Int(avail),
            "xsu_used" => Value::Int(used),
            _ => Value::Zero,
        });
        // xsu_pagesize and xsu_encrypted follow in the real struct.
        bytes.extend_from_slice(&4096u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        self.with_sysctl("vm.swapusage", bytes)
    }

    pub fn with_processors(self, ticks: Vec<ProcessorTickSample>) -> Self {
        if let Ok(mut state) = self.processors.lock() {
            state.ticks = ticks;
        }
        self
    }

    /// Change how the next `host_processor_info` calls behave.
    pub fn set_processor_failure(&self, failure: Option<ProcessorFailure>) {
        if let Ok(mut state) = self.processors.lock() {
            state.failure = failure;
        }
    }

    pub fn with_host_basic_info(mut self, info: &HostBasicInfo) -> Self {
        let bytes = encode_layout(&HOST_BASIC_INFO, |name| match name {
            "max_cpus" => Value::Int(info.max_cpus as u64),
            "avail_cpus" => Value::Int(info.avail_cpus as u64),
            "memory_size" => Value::Int(info.memory_size as u64),
            "cpu_type" => Value::Int(info.cpu_type as u64),
            "cpu_subtype" => Value::Int(info.cpu_subtype as u64),
            "cpu_threadtype" => Value::Int(info.cpu_threadtype as u64),
            "physical_cpu" => Value::Int(info.physical_cpu as u64),
            "physical_cpu_max" => Value::Int(info.physical_cpu_max as u64),
            "logical_cpu" => Value::Int(info.logical_cpu as u64),
            "logical_cpu_max" => Value::Int(info.logical_cpu_max as u64),
            "max_mem" => Value::Int(info.max_mem),
            _ => Value::Zero,
        });
        self.host_info.insert(HostSelector::BasicInfo, bytes);
        self
    }

    pub fn with_vm_statistics(mut self, stats: &VmStatistics) -> Self {
        let bytes = encode_layout(&VM_STATISTICS, |name| {
            let count = match name {
                "free_count" => stats.free_count,
                "active_count" => stats.active_count,
                "inactive_count" => stats.inactive_count,
                "wire_count" => stats.wire_count,
                "zero_fill_count" => stats.zero_fill_count,
                "reactivations" => stats.reactivations,
                "pageins" => stats.pageins,
                "pageouts" => stats.pageouts,
                "faults" => stats.faults,
                "cow_faults" => stats.cow_faults,
                "lookups" => stats.lookups,
                "hits" => stats.hits,
                "purgeable_count" => stats.purgeable_count,
                "purges" => stats.purges,
                "speculative_count" => stats.speculative_count,
                _ => 0,
            };
            Value::Int(u64::from(count))
        });
        self.host_info.insert(HostSelector::VmStatistics, bytes);
        self
    }

    pub fn fail_host_info(mut self, selector: HostSelector, code: KernReturn) -> Self {
        self.host_failures.insert(selector, code);
        self
    }

    pub fn with_mounts(self, mounts: Vec<FilesystemStatRecord>) -> Self {
        if let Ok(mut state) = self.mounts.lock() {
            state.current = mounts;
        }
        self
    }

    /// Queue a mount table that takes effect right after the next size probe.
    pub fn then_mounts(self, mounts: Vec<FilesystemStatRecord>) -> Self {
        if let Ok(mut state) = self.mounts.lock() {
            state.pending.push_back(mounts);
        }
        self
    }

    pub fn fail_getfsstat(self, errno: i32) -> Self {
        if let Ok(mut state) = self.mounts.lock() {
            state.error = Some(errno);
        }
        self
    }

    /// Fill records of `width` bytes, left zeroed, like a kernel whose
    /// `struct statfs` differs from ours.
    pub fn with_record_width(self, width: usize) -> Self {
        if let Ok(mut state) = self.mounts.lock() {
            state.record_width = Some(width);
        }
        self
    }

    /// Claim `extra` more records than a filling call actually wrote.
    pub fn over_report_fill(self, extra: usize) -> Self {
        if let Ok(mut state) = self.mounts.lock() {
            state.over_report = extra;
        }
        self
    }

    /// Samples `getloadavg` will report; fewer than three simulates a short read.
    pub fn with_load(mut self, samples: &[f64]) -> Self {
        self.load = samples.to_vec();
        self
    }

    pub fn with_logins(mut self, records: Vec<LoginRecord>) -> Self {
        self.logins = records;
        self
    }

    pub fn with_hostname(mut self, name: &str) -> Self {
        self.hostname = Some(name.to_string());
        self
    }

    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn with_netstat(mut self, output: &str) -> Self {
        self.netstat = Some(output.to_string());
        self
    }

    /// Regions handed out by `host_processor_info`.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Regions given back through `vm_deallocate`.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn released_bytes(&self) -> usize {
        self.released_bytes.load(Ordering::SeqCst)
    }

    /// Regions handed out and not yet released.
    pub fn outstanding_regions(&self) -> usize {
        self.regions.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of `getfsstat` calls, probes included.
    pub fn fsstat_calls(&self) -> usize {
        self.fsstat_calls.load(Ordering::SeqCst)
    }
}

fn poisoned() -> io::Error {
    io::Error::other("mock kernel state poisoned")
}

impl Kernel for MockKernel {
    fn sysctl_by_name(&self, name: &str) -> io::Result<Vec<u8>> {
        if let Some(&errno) = self.sysctl_errors.get(name) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        self.sysctls
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn host_processor_info(
        &self,
        _flavor: ProcessorFlavor,
    ) -> std::result::Result<ProcessorInfo, KernReturn> {
        let state = self.processors.lock().map_err(|_| -1)?;
        let processor_count = state.ticks.len() as u32;
        let info_count = match state.failure {
            Some(ProcessorFailure::Status(code)) => return Err(code),
            Some(ProcessorFailure::ShortInfo(count)) => count,
            None => processor_count * 4,
        };

        let mut bytes: Vec<u8> = state
            .ticks
            .iter()
            .flat_map(|ticks| ticks.iter().flat_map(|t| t.to_le_bytes()))
            .collect();
        let size = info_count as usize * INTEGER_SIZE;
        // Keep at least one byte so every region has a distinct address.
        bytes.resize(size.max(1), 0);
        let region = bytes.into_boxed_slice();
        let address = region.as_ptr();

        let mut regions = self.regions.lock().map_err(|_| -1)?;
        regions.insert(address as usize, (region, size));
        self.allocations.fetch_add(1, Ordering::SeqCst);

        Ok(ProcessorInfo {
            address,
            info_count,
            processor_count,
        })
    }

    unsafe fn vm_deallocate(&self, address: *const u8, size: usize) -> KernReturn {
        let Ok(mut regions) = self.regions.lock() else {
            return -1;
        };
        match regions.remove(&(address as usize)) {
            Some((_, allocated)) => {
                assert_eq!(allocated, size, "vm_deallocate size does not match allocation");
            }
            None => panic!("vm_deallocate of unknown or already released region {address:p}"),
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.released_bytes.fetch_add(size, Ordering::SeqCst);
        KERN_SUCCESS
    }

    fn host_info(&self, selector: HostSelector) -> std::result::Result<Vec<u8>, KernReturn> {
        if let Some(&code) = self.host_failures.get(&selector) {
            return Err(code);
        }
        // An unset selector behaves like KERN_INVALID_ARGUMENT.
        self.host_info.get(&selector).cloned().ok_or(4)
    }

    fn getfsstat(&self, buf: Option<&mut [u8]>, _flags: i32) -> io::Result<usize> {
        self.fsstat_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.mounts.lock().map_err(|_| poisoned())?;
        if let Some(errno) = state.error {
            return Err(io::Error::from_raw_os_error(errno));
        }

        let Some(buf) = buf else {
            let count = state.current.len();
            if let Some(next) = state.pending.pop_front() {
                state.current = next;
            }
            return Ok(count);
        };

        if let Some(width) = state.record_width.filter(|w| *w > 0) {
            let filled = (buf.len() / width).min(state.current.len());
            return Ok(filled + state.over_report);
        }

        let record = STATFS.size();
        let slots = buf.len() / record;
        let filled = slots.min(state.current.len());
        for (slot, stat) in buf.chunks_exact_mut(record).zip(&state.current[..filled]) {
            slot.copy_from_slice(&encode_statfs(stat));
        }
        Ok(filled + state.over_report)
    }

    fn load_average(&self, samples: &mut [f64; 3]) -> i32 {
        if self.load.is_empty() {
            return -1;
        }
        let n = self.load.len().min(3);
        samples[..n].copy_from_slice(&self.load[..n]);
        n as i32
    }

    fn login_records(&self) -> Vec<LoginRecord> {
        self.logins.clone()
    }

    fn hostname(&self) -> io::Result<String> {
        self.hostname
            .clone()
            .ok_or_else(|| io::Error::other("hostname not set"))
    }

    fn now(&self) -> i64 {
        self.now
    }

    fn netstat_interfaces(&self) -> Result<String> {
        self.netstat.clone().ok_or_else(|| StatError::CommandFailed {
            command: "/usr/sbin/netstat -ibdn".to_string(),
            message: "not available".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_sysctl_is_not_found() {
        let kernel = MockKernel::new();
        let err = kernel.sysctl_by_name("kern.nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_regions_are_tracked() {
        let kernel = MockKernel::new().with_processors(vec![[1, 2, 3, 4]]);
        let first = kernel.host_processor_info(ProcessorFlavor::CpuLoadInfo).unwrap();
        let second = kernel.host_processor_info(ProcessorFlavor::CpuLoadInfo).unwrap();
        assert_ne!(first.address, second.address);
        assert_eq!(kernel.outstanding_regions(), 2);

        unsafe {
            kernel.vm_deallocate(first.address, first.byte_len());
            kernel.vm_deallocate(second.address, second.byte_len());
        }
        assert_eq!(kernel.outstanding_regions(), 0);
        assert_eq!(kernel.releases(), 2);
    }

    #[test]
    #[should_panic(expected = "already released")]
    fn test_double_release_panics() {
        let kernel = MockKernel::new().with_processors(vec![[1, 2, 3, 4]]);
        let info = kernel.host_processor_info(ProcessorFlavor::CpuLoadInfo).unwrap();
        unsafe {
            kernel.vm_deallocate(info.address, info.byte_len());
            kernel.vm_deallocate(info.address, info.byte_len());
        }
    }

    #[test]
    fn test_probe_advances_mount_table() {
        let kernel = MockKernel::new()
            .with_mounts(vec![mount("/dev/a", "/", "hfs")])
            .then_mounts(vec![]);
        assert_eq!(kernel.getfsstat(None, 0).unwrap(), 1);
        assert_eq!(kernel.getfsstat(None, 0).unwrap(), 0);
    }

    #[test]
    fn test_fill_respects_buffer_size() {
        let kernel = MockKernel::new().with_mounts(vec![
            mount("/dev/a", "/", "hfs"),
            mount("/dev/b", "/b", "hfs"),
        ]);
        let mut buf = vec![0u8; STATFS.size()];
        assert_eq!(kernel.getfsstat(Some(&mut buf), 0).unwrap(), 1);
        assert_eq!(&buf[..4], &STATFS_VERSION.to_le_bytes());
    }
}
