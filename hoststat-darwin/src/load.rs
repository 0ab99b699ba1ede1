//! System load averages.

use hoststat_common::LoadAvgStat;

use crate::error::{Result, StatError};
use crate::kernel::Kernel;

/// 1, 5 and 15 minute load averages from `getloadavg`.
pub fn read_load_average<K: Kernel + ?Sized>(kernel: &K) -> Result<LoadAvgStat> {
    let mut samples = [0.0f64; 3];
    let written = kernel.load_average(&mut samples);
    if written < 3 {
        return Err(StatError::KernelCallFailed {
            call: "getloadavg",
            code: written,
        });
    }
    Ok(LoadAvgStat {
        load1: samples[0],
        load5: samples[1],
        load15: samples[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKernel;

    #[test]
    fn test_load_average() {
        let kernel = MockKernel::new().with_load(&[1.5, 1.25, 0.75]);
        let load = read_load_average(&kernel).unwrap();
        assert_eq!(load.load1, 1.5);
        assert_eq!(load.load5, 1.25);
        assert_eq!(load.load15, 0.75);
    }

    #[test]
    fn test_short_read_fails() {
        let kernel = MockKernel::new().with_load(&[1.0, 2.0]);
        let err = read_load_average(&kernel).unwrap_err();
        assert!(matches!(
            err,
            StatError::KernelCallFailed {
                call: "getloadavg",
                code: 2
            }
        ));
    }

    #[test]
    fn test_call_failure() {
        let kernel = MockKernel::new();
        assert!(matches!(
            read_load_average(&kernel).unwrap_err(),
            StatError::KernelCallFailed { code: -1, .. }
        ));
    }
}
