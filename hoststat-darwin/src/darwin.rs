//! The real kernel, over sysctl, Mach and libc.

use std::ffi::{CString, c_char, c_int, c_void};
use std::io;
use std::process::Command;
use std::ptr;

use tracing::debug;

use crate::error::{Result, StatError};
use crate::kernel::{
    HostSelector, INTEGER_SIZE, KernReturn, Kernel, LoginRecord, ProcessorFlavor, ProcessorInfo,
};

type MachPort = u32;

/// Largest `host_info` output we ask for, in `integer_t` units.
const HOST_INFO_MAX: usize = 64;

const NETSTAT: &str = "/usr/sbin/netstat";

unsafe extern "C" {
    static mach_task_self_: MachPort;

    fn mach_host_self() -> MachPort;

    fn host_processor_info(
        host: MachPort,
        flavor: c_int,
        out_processor_count: *mut u32,
        out_processor_info: *mut *mut i32,
        out_processor_info_count: *mut u32,
    ) -> KernReturn;

    fn host_info(
        host: MachPort,
        flavor: c_int,
        host_info_out: *mut i32,
        host_info_out_count: *mut u32,
    ) -> KernReturn;

    fn host_statistics(
        host: MachPort,
        flavor: c_int,
        host_info_out: *mut i32,
        host_info_out_count: *mut u32,
    ) -> KernReturn;

    fn vm_deallocate(target_task: MachPort, address: usize, size: usize) -> KernReturn;

    fn getfsstat(buf: *mut c_void, bufsize: c_int, flags: c_int) -> c_int;
}

/// [`Kernel`] backed by the running Darwin kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct DarwinKernel;

impl DarwinKernel {
    pub fn new() -> Self {
        Self
    }
}

fn field_string(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Kernel for DarwinKernel {
    fn sysctl_by_name(&self, name: &str) -> io::Result<Vec<u8>> {
        let cname = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut size: libc::size_t = 0;

        // SAFETY: a null output buffer asks only for the size.
        let rc = unsafe {
            libc::sysctlbyname(cname.as_ptr(), ptr::null_mut(), &mut size, ptr::null_mut(), 0)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut buf = vec![0u8; size];
        // SAFETY: `buf` holds `size` writable bytes.
        let rc = unsafe {
            libc::sysctlbyname(
                cname.as_ptr(),
                buf.as_mut_ptr() as *mut c_void,
                &mut size,
                ptr::null_mut(),
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        buf.truncate(size);
        Ok(buf)
    }

    fn host_processor_info(
        &self,
        flavor: ProcessorFlavor,
    ) -> std::result::Result<ProcessorInfo, KernReturn> {
        let mut processor_count: u32 = 0;
        let mut info: *mut i32 = ptr::null_mut();
        let mut info_count: u32 = 0;

        // SAFETY: all out-pointers are valid locals.
        let code = unsafe {
            host_processor_info(
                mach_host_self(),
                flavor.code(),
                &mut processor_count,
                &mut info,
                &mut info_count,
            )
        };
        if code != 0 {
            return Err(code);
        }
        Ok(ProcessorInfo {
            address: info as *const u8,
            info_count,
            processor_count,
        })
    }

    unsafe fn vm_deallocate(&self, address: *const u8, size: usize) -> KernReturn {
        // SAFETY: the caller guarantees the region is ours and still live.
        unsafe { vm_deallocate(mach_task_self_, address as usize, size) }
    }

    fn host_info(&self, selector: HostSelector) -> std::result::Result<Vec<u8>, KernReturn> {
        let mut out = [0i32; HOST_INFO_MAX];
        let mut count = selector.count();
        // SAFETY: no preconditions.
        let host = unsafe { mach_host_self() };

        // SAFETY: `out` holds HOST_INFO_MAX integers, more than any selector's count.
        let code = unsafe {
            match selector {
                HostSelector::BasicInfo => {
                    host_info(host, selector.flavor(), out.as_mut_ptr(), &mut count)
                }
                HostSelector::VmStatistics => {
                    host_statistics(host, selector.flavor(), out.as_mut_ptr(), &mut count)
                }
            }
        };
        if code != 0 {
            return Err(code);
        }

        let filled = (count as usize).min(HOST_INFO_MAX);
        let mut bytes = Vec::with_capacity(filled * INTEGER_SIZE);
        for value in &out[..filled] {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        Ok(bytes)
    }

    fn getfsstat(&self, buf: Option<&mut [u8]>, flags: i32) -> io::Result<usize> {
        let (ptr, len) = match buf {
            Some(b) if !b.is_empty() => (b.as_mut_ptr() as *mut c_void, b.len()),
            _ => (ptr::null_mut(), 0),
        };
        let len = c_int::try_from(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: `ptr` is null or points to `len` writable bytes.
        let n = unsafe { getfsstat(ptr, len, flags) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn load_average(&self, samples: &mut [f64; 3]) -> i32 {
        // SAFETY: `samples` has room for three doubles.
        unsafe { libc::getloadavg(samples.as_mut_ptr(), 3) }
    }

    fn login_records(&self) -> Vec<LoginRecord> {
        let mut records = Vec::new();
        // SAFETY: getutxent returns null or a pointer to a static entry that
        // stays valid until the next call; each entry is copied out at once.
        unsafe {
            libc::setutxent();
            loop {
                let entry = libc::getutxent();
                if entry.is_null() {
                    break;
                }
                let entry = &*entry;
                records.push(LoginRecord {
                    user: field_string(&entry.ut_user),
                    line: field_string(&entry.ut_line),
                    host: field_string(&entry.ut_host),
                    kind: entry.ut_type,
                    started: entry.ut_tv.tv_sec,
                });
            }
            libc::endutxent();
        }
        records
    }

    fn hostname(&self) -> io::Result<String> {
        hostname::get().map(|name| name.to_string_lossy().into_owned())
    }

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn netstat_interfaces(&self) -> Result<String> {
        let command = format!("{} -ibdn", NETSTAT);
        let output = Command::new(NETSTAT)
            .arg("-ibdn")
            .output()
            .map_err(|e| StatError::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StatError::CommandFailed {
                command,
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        debug!(len = output.stdout.len(), "netstat output");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
