//! Network interface counters, parsed from `netstat -ibdn`.
//!
//! Columns are `Name Mtu Network Address Ipkts Ierrs Ibytes Opkts Oerrs
//! Obytes Coll Drop`. Rows for link-level entries have no Address column, so
//! everything after Network shifts left by one.

use std::collections::HashSet;

use hoststat_common::NetIoCountersStat;

use crate::error::Result;
use crate::kernel::Kernel;

/// Name of the aggregate record.
pub const ALL_INTERFACES: &str = "all";

/// Rows with fewer fields than this have no Address column.
const FIELDS_WITH_ADDRESS: usize = 12;

const IPKTS: usize = 3;
const IERRS: usize = 4;
const IBYTES: usize = 5;
const OPKTS: usize = 6;
const OERRS: usize = 7;
const OBYTES: usize = 8;
const DROP: usize = 10;

/// Parse `netstat -ibdn` output into one record per interface.
///
/// An interface appears once per configured address; the first row wins.
pub fn parse_netstat(output: &str) -> Vec<NetIoCountersStat> {
    let mut seen = HashSet::new();
    let mut counters = Vec::new();

    for line in output.lines() {
        let values: Vec<&str> = line.split_whitespace().collect();
        let Some(&name) = values.first() else {
            continue;
        };
        if name == "Name" || !seen.insert(name) {
            continue;
        }

        let base = usize::from(values.len() >= FIELDS_WITH_ADDRESS);
        let column = |offset: usize| {
            values
                .get(base + offset)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        counters.push(NetIoCountersStat {
            name: name.to_string(),
            packets_recv: column(IPKTS),
            errin: column(IERRS),
            bytes_recv: column(IBYTES),
            packets_sent: column(OPKTS),
            errout: column(OERRS),
            bytes_sent: column(OBYTES),
            dropout: column(DROP),
        });
    }

    counters
}

/// Sum every interface into one `all` record.
pub fn aggregate(counters: &[NetIoCountersStat]) -> NetIoCountersStat {
    let mut all = NetIoCountersStat {
        name: ALL_INTERFACES.to_string(),
        ..Default::default()
    };
    for c in counters {
        all.accumulate(c);
    }
    all
}

/// Interface counters, per interface or aggregated.
pub fn read_net_io_counters<K: Kernel + ?Sized>(
    kernel: &K,
    pernic: bool,
) -> Result<Vec<NetIoCountersStat>> {
    let counters = parse_netstat(&kernel.netstat_interfaces()?);
    if pernic {
        Ok(counters)
    } else {
        Ok(vec![aggregate(&counters)])
    }
}
