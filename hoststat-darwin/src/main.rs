//! One-shot host telemetry.
//!
//! Collects one snapshot of every enabled category and writes it to stdout
//! as JSON or CBOR. Logs go to stderr.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use hoststat_common::{Format, Snapshot, encode, encode_pretty, init_tracing};

use hoststat_darwin::args::HoststatArgs;
use hoststat_darwin::config::HoststatConfig;

fn main() -> Result<()> {
    let args = HoststatArgs::parse();

    let mut config = match &args.config {
        Some(path) => HoststatConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HoststatConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    let output = config.output.clone();
    let snapshot = collect(config)?;
    if snapshot.has_errors() {
        tracing::info!(errors = snapshot.errors.len(), "snapshot has failed categories");
    }

    let bytes = if output.pretty {
        encode_pretty(&snapshot)?
    } else {
        encode(&snapshot, output.format)?
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    if output.format == Format::Json {
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn collect(config: HoststatConfig) -> Result<Snapshot> {
    use hoststat_darwin::SnapshotCollector;
    use hoststat_darwin::darwin::DarwinKernel;

    let kernel = DarwinKernel::new();
    Ok(SnapshotCollector::new(&kernel, config).collect())
}

#[cfg(not(target_os = "macos"))]
fn collect(_config: HoststatConfig) -> Result<Snapshot> {
    Err(hoststat_darwin::StatError::Unsupported("kernel statistics collection").into())
}
