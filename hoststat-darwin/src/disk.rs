//! Filesystem statistics: partitions and per-mount I/O counters.
//!
//! Both views come from `getfsstat`, which is called twice: once without a
//! buffer to learn how many filesystems are mounted, then with that many
//! `struct statfs` slots. The mount table can change between the two calls,
//! so the second call's count is the one that counts.

use std::collections::BTreeMap;
use std::io;

use hoststat_common::{DiskIoCountersStat, DiskPartitionStat};
use tracing::{debug, warn};

use crate::error::{Result, StatError};
use crate::kernel::{Kernel, MNT_WAIT};
use crate::layout::{Field, FieldKind, FieldReader, Layout, c_string};

/// `STATFS_VERSION`.
pub const STATFS_VERSION: u32 = 0x2003_0518;

/// `MFSNAMELEN`.
pub const MFSNAMELEN: usize = 16;

/// `MNAMELEN`.
pub const MNAMELEN: usize = 88;

/// `struct statfs`.
pub const STATFS: Layout = Layout {
    name: "statfs",
    version: STATFS_VERSION,
    fields: &[
        Field::new("f_version", FieldKind::U32),
        Field::new("f_type", FieldKind::U32),
        Field::new("f_flags", FieldKind::U64),
        Field::new("f_bsize", FieldKind::U64),
        Field::new("f_iosize", FieldKind::U64),
        Field::new("f_blocks", FieldKind::U64),
        Field::new("f_bfree", FieldKind::U64),
        Field::new("f_bavail", FieldKind::I64),
        Field::new("f_files", FieldKind::U64),
        Field::new("f_ffree", FieldKind::I64),
        Field::new("f_syncwrites", FieldKind::U64),
        Field::new("f_asyncwrites", FieldKind::U64),
        Field::new("f_syncreads", FieldKind::U64),
        Field::new("f_asyncreads", FieldKind::U64),
        Field::new("f_spare", FieldKind::Bytes(80)),
        Field::new("f_namemax", FieldKind::U32),
        Field::new("f_owner", FieldKind::U32),
        Field::new("f_fsid", FieldKind::Bytes(8)),
        Field::new("f_charspare", FieldKind::Bytes(80)),
        Field::new("f_fstypename", FieldKind::Bytes(MFSNAMELEN)),
        Field::new("f_mntfromname", FieldKind::Bytes(MNAMELEN)),
        Field::new("f_mntonname", FieldKind::Bytes(MNAMELEN)),
    ],
};

const _: () = assert!(STATFS.size() == 472);

/// Probe/fill rounds before a growing mount table is reported as-is.
const MAX_FSSTAT_ATTEMPTS: usize = 4;

pub const MNT_RDONLY: u64 = 0x0000_0001;
pub const MNT_SYNCHRONOUS: u64 = 0x0000_0002;
pub const MNT_NOEXEC: u64 = 0x0000_0004;
pub const MNT_NOSUID: u64 = 0x0000_0008;
pub const MNT_NFS4ACLS: u64 = 0x0000_0010;
pub const MNT_UNION: u64 = 0x0000_0020;
pub const MNT_ASYNC: u64 = 0x0000_0040;
pub const MNT_SUIDDIR: u64 = 0x0010_0000;
pub const MNT_SOFTDEP: u64 = 0x0020_0000;
pub const MNT_NOSYMFOLLOW: u64 = 0x0040_0000;
pub const MNT_GJOURNAL: u64 = 0x0200_0000;
pub const MNT_MULTILABEL: u64 = 0x0400_0000;
pub const MNT_ACLS: u64 = 0x0800_0000;
pub const MNT_NOATIME: u64 = 0x1000_0000;
pub const MNT_NOCLUSTERR: u64 = 0x4000_0000;
pub const MNT_NOCLUSTERW: u64 = 0x8000_0000;

/// Option tokens appended after the `rw`/`ro` base, in output order.
const MOUNT_OPTIONS: &[(u64, &str)] = &[
    (MNT_SYNCHRONOUS, "sync"),
    (MNT_NOEXEC, "noexec"),
    (MNT_NOSUID, "nosuid"),
    (MNT_UNION, "union"),
    (MNT_ASYNC, "async"),
    (MNT_SUIDDIR, "suiddir"),
    (MNT_SOFTDEP, "softdep"),
    (MNT_NOSYMFOLLOW, "nosymfollow"),
    (MNT_GJOURNAL, "gjournal"),
    (MNT_MULTILABEL, "multilabel"),
    (MNT_ACLS, "acls"),
    (MNT_NOATIME, "noatime"),
    (MNT_NOCLUSTERR, "nocluster"),
    (MNT_NOCLUSTERW, "noclusterw"),
    (MNT_NFS4ACLS, "nfs4acls"),
];

/// Render a mount flag bitmask as a comma-joined option list.
pub fn mount_options(flags: u64) -> String {
    let base = if flags & MNT_RDONLY != 0 { "ro" } else { "rw" };
    let mut opts = String::from(base);
    for &(bit, token) in MOUNT_OPTIONS {
        if flags & bit != 0 {
            opts.push(',');
            opts.push_str(token);
        }
    }
    opts
}

/// One decoded `struct statfs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemStatRecord {
    pub version: u32,
    pub fs_type: u32,
    pub flags: u64,
    pub bsize: u64,
    pub iosize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: i64,
    pub files: u64,
    pub ffree: i64,
    pub syncwrites: u64,
    pub asyncwrites: u64,
    pub syncreads: u64,
    pub asyncreads: u64,
    pub namemax: u32,
    pub owner: u32,
    pub fsid: [i32; 2],
    pub fstypename: String,
    pub mntfromname: String,
    pub mntonname: String,
}

impl FilesystemStatRecord {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(&STATFS, buf)?;
        let version = r.u32("f_version")?;
        if version != STATFS.version {
            return Err(StatError::LayoutVersion {
                layout: STATFS.name,
                expected: STATFS.version,
                found: version,
            });
        }

        let fs_type = r.u32("f_type")?;
        let flags = r.u64("f_flags")?;
        let bsize = r.u64("f_bsize")?;
        let iosize = r.u64("f_iosize")?;
        let blocks = r.u64("f_blocks")?;
        let bfree = r.u64("f_bfree")?;
        let bavail = r.i64("f_bavail")?;
        let files = r.u64("f_files")?;
        let ffree = r.i64("f_ffree")?;
        let syncwrites = r.u64("f_syncwrites")?;
        let asyncwrites = r.u64("f_asyncwrites")?;
        let syncreads = r.u64("f_syncreads")?;
        let asyncreads = r.u64("f_asyncreads")?;
        r.skip("f_spare")?;
        let namemax = r.u32("f_namemax")?;
        let owner = r.u32("f_owner")?;
        let fsid = r.bytes("f_fsid")?;
        r.skip("f_charspare")?;

        Ok(Self {
            version,
            fs_type,
            flags,
            bsize,
            iosize,
            blocks,
            bfree,
            bavail,
            files,
            ffree,
            syncwrites,
            asyncwrites,
            syncreads,
            asyncreads,
            namemax,
            owner,
            fsid: [
                i32::from_le_bytes([fsid[0], fsid[1], fsid[2], fsid[3]]),
                i32::from_le_bytes([fsid[4], fsid[5], fsid[6], fsid[7]]),
            ],
            fstypename: c_string(r.bytes("f_fstypename")?),
            mntfromname: c_string(r.bytes("f_mntfromname")?),
            mntonname: c_string(r.bytes("f_mntonname")?),
        })
    }
}

fn probe<K: Kernel + ?Sized>(kernel: &K) -> Result<usize> {
    kernel
        .getfsstat(None, MNT_WAIT)
        .map_err(StatError::StatCollectionFailed)
}

/// Read one `struct statfs` per mounted filesystem.
pub fn read_filesystem_stats<K: Kernel + ?Sized>(kernel: &K) -> Result<Vec<FilesystemStatRecord>> {
    let record = STATFS.size();
    let mut slots = probe(kernel)?;
    let mut attempt = 1;

    let (buf, filled) = loop {
        let mut buf = vec![0u8; slots * record];
        let filled = kernel
            .getfsstat(Some(&mut buf), MNT_WAIT)
            .map_err(StatError::StatCollectionFailed)?
            .min(slots);
        debug!(slots, filled, attempt, "getfsstat");

        if filled == 0 && slots > 0 {
            // A kernel with wider records fits none of them in our slots.
            let now = probe(kernel)?;
            if now > 0 {
                return Err(StatError::StatCollectionFailed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "getfsstat filled no {}-byte records for {} mounts",
                        record, now
                    ),
                )));
            }
            break (buf, filled);
        }

        if filled < slots {
            break (buf, filled);
        }

        let now = probe(kernel)?;
        if now <= slots {
            break (buf, filled);
        }
        if attempt >= MAX_FSSTAT_ATTEMPTS {
            warn!(
                reported = filled,
                mounted = now,
                attempts = attempt,
                "mount table kept growing during getfsstat; returning partial list"
            );
            break (buf, filled);
        }
        slots = now;
        attempt += 1;
    };

    buf[..filled * record]
        .chunks_exact(record)
        .map(FilesystemStatRecord::decode)
        .collect()
}

/// Mounted partitions. Unless `all` is set, only filesystems backed by a
/// device path are reported.
pub fn read_partitions<K: Kernel + ?Sized>(kernel: &K, all: bool) -> Result<Vec<DiskPartitionStat>> {
    Ok(read_filesystem_stats(kernel)?
        .into_iter()
        .filter(|stat| all || stat.mntfromname.starts_with('/'))
        .map(|stat| DiskPartitionStat {
            opts: mount_options(stat.flags),
            device: stat.mntfromname,
            mountpoint: stat.mntonname,
            fstype: stat.fstypename,
        })
        .collect())
}

/// Read and write operation counts per mount point.
pub fn read_io_counters<K: Kernel + ?Sized>(
    kernel: &K,
) -> Result<BTreeMap<String, DiskIoCountersStat>> {
    Ok(read_filesystem_stats(kernel)?
        .into_iter()
        .map(|stat| {
            let counters = DiskIoCountersStat {
                name: stat.mntonname.clone(),
                read_count: stat.syncreads.saturating_add(stat.asyncreads),
                write_count: stat.syncwrites.saturating_add(stat.asyncwrites),
            };
            (stat.mntonname, counters)
        })
        .collect())
}
