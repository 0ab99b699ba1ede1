//! Host identity, boot time and logged-in users.

use hoststat_common::{HostInfoStat, UserStat};
use tracing::warn;

use crate::error::{Result, StatError};
use crate::kernel::Kernel;
use crate::layout::{Field, FieldKind, FieldReader, Layout};
use crate::sysctl::{Shape, SysctlValue, read_attribute, read_string};

/// `struct timeval` on 64-bit Darwin.
pub const TIMEVAL: Layout = Layout {
    name: "timeval",
    version: 1,
    fields: &[
        Field::new("tv_sec", FieldKind::I64),
        Field::new("tv_usec", FieldKind::I32),
        Field::new("pad", FieldKind::Pad(4)),
    ],
};

const _: () = assert!(TIMEVAL.size() == 16);

/// utmpx `ut_type` of a login session.
pub const USER_PROCESS: i16 = 7;

const OS_NAME: &str = "darwin";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i32,
}

impl SysctlValue for Timeval {
    const SHAPE: Shape = Shape::Struct(&TIMEVAL);

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(&TIMEVAL, buf)?;
        Ok(Self {
            sec: r.i64("tv_sec")?,
            usec: r.i32("tv_usec")?,
        })
    }
}

/// Host identity plus the lookups that failed while building it.
#[derive(Debug)]
pub struct HostInfoReport {
    pub info: HostInfoStat,
    pub warnings: Vec<StatError>,
}

/// Boot time, Unix epoch seconds.
pub fn read_boot_time<K: Kernel + ?Sized>(kernel: &K) -> Result<i64> {
    let tv: Timeval = read_attribute(kernel, "kern.boottime")?;
    Ok(tv.sec)
}

/// Host identity.
///
/// Without a boot time there is no report. A failed hostname or release
/// lookup leaves that field empty and is listed in `warnings`.
pub fn read_host_info<K: Kernel + ?Sized>(kernel: &K) -> Result<HostInfoReport> {
    let boot = read_boot_time(kernel).map_err(|e| StatError::BootTimeUnavailable(Box::new(e)))?;
    let uptime = u64::try_from(kernel.now().saturating_sub(boot)).unwrap_or(0);

    let mut info = HostInfoStat {
        uptime,
        os: OS_NAME.to_string(),
        platform: OS_NAME.to_string(),
        platform_family: OS_NAME.to_string(),
        ..Default::default()
    };
    let mut warnings = Vec::new();

    match kernel.hostname() {
        Ok(name) => info.hostname = name,
        Err(e) => {
            warn!(error = %e, "hostname lookup failed");
            warnings.push(StatError::Hostname(e));
        }
    }

    match read_string(kernel, "kern.osrelease") {
        Ok(release) => info.platform_version = release,
        Err(e) => {
            warn!(error = %e, "os release lookup failed");
            warnings.push(e);
        }
    }

    Ok(HostInfoReport { info, warnings })
}

/// Logged-in user sessions.
pub fn read_users<K: Kernel + ?Sized>(kernel: &K) -> Vec<UserStat> {
    kernel
        .login_records()
        .into_iter()
        .filter(|record| record.kind == USER_PROCESS)
        .map(|record| UserStat {
            user: record.user,
            terminal: record.line,
            host: record.host,
            started: record.started,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::LoginRecord;
    use crate::mock::MockKernel;

    fn login(user: &str, line: &str, kind: i16) -> LoginRecord {
        LoginRecord {
            user: user.to_string(),
            line: line.to_string(),
            host: String::new(),
            kind,
            started: 1_700_000_100,
        }
    }

    #[test]
    fn test_boot_time() {
        let kernel = MockKernel::new().with_boot_time(1_700_000_000, 123_456);
        assert_eq!(read_boot_time(&kernel).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_uptime_from_boot_time() {
        let kernel = MockKernel::new()
            .with_boot_time(1_700_000_000, 0)
            .with_now(1_700_003_600)
            .with_hostname("build-01.local")
            .with_sysctl_str("kern.osrelease", "23.4.0");
        let report = read_host_info(&kernel).unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(report.info.uptime, 3600);
        assert_eq!(report.info.hostname, "build-01.local");
        assert_eq!(report.info.platform_version, "23.4.0");
        assert_eq!(report.info.os, "darwin");
        assert_eq!(report.info.platform_family, "darwin");
    }

    #[test]
    fn test_clock_behind_boot_time() {
        let kernel = MockKernel::new()
            .with_boot_time(1_700_000_000, 0)
            .with_now(1_600_000_000)
            .with_hostname("h")
            .with_sysctl_str("kern.osrelease", "23.4.0");
        assert_eq!(read_host_info(&kernel).unwrap().info.uptime, 0);
    }

    #[test]
    fn test_missing_boot_time_is_fatal() {
        let kernel = MockKernel::new().with_hostname("h");
        let err = read_host_info(&kernel).unwrap_err();
        match err {
            StatError::BootTimeUnavailable(inner) => assert!(inner.is_not_found()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hostname_and_release_failures_degrade() {
        let kernel = MockKernel::new()
            .with_boot_time(1_700_000_000, 0)
            .with_now(1_700_000_060);
        let report = read_host_info(&kernel).unwrap();
        assert_eq!(report.info.uptime, 60);
        assert!(report.info.hostname.is_empty());
        assert!(report.info.platform_version.is_empty());
        assert_eq!(report.warnings.len(), 2);
        assert!(matches!(report.warnings[0], StatError::Hostname(_)));
        assert!(report.warnings[1].is_not_found());
    }

    #[test]
    fn test_only_user_sessions_are_reported() {
        let kernel = MockKernel::new().with_logins(vec![
            login("", "~", 2),
            login("marc", "console", USER_PROCESS),
            login("marc", "ttys000", USER_PROCESS),
            login("", "ttys001", 8),
        ]);
        let users = read_users(&kernel);
        let terminals: Vec<_> = users.iter().map(|u| u.terminal.as_str()).collect();
        assert_eq!(terminals, vec!["console", "ttys000"]);
        assert_eq!(users[0].started, 1_700_000_100);
    }
}
