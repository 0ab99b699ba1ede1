//! Host telemetry for the BSD/Mach kernel family.
//!
//! Decodes sysctl attributes, Mach host/processor statistics and
//! `getfsstat` records into the platform-independent records of
//! `hoststat-common`.
//!
//! Every reader takes a [`Kernel`]. On macOS [`darwin::DarwinKernel`] talks to
//! the running kernel; [`mock::MockKernel`] serves canned data anywhere.
//!
//! ```ignore
//! use hoststat_darwin::{SnapshotCollector, HoststatConfig, darwin::DarwinKernel};
//!
//! let kernel = DarwinKernel::new();
//! let snapshot = SnapshotCollector::new(&kernel, HoststatConfig::default()).collect();
//! ```

pub mod args;
pub mod collector;
pub mod config;
pub mod cpu;
#[cfg(target_os = "macos")]
pub mod darwin;
pub mod disk;
pub mod error;
pub mod host;
pub mod kernel;
pub mod layout;
pub mod load;
pub mod mach;
pub mod memory;
pub mod mock;
pub mod net;
pub mod sysctl;

pub use collector::SnapshotCollector;
pub use config::{ConfigError, HoststatConfig};
pub use error::{Result, StatError};
pub use kernel::Kernel;
pub use sysctl::{SysctlValue, read_attribute, read_string};
