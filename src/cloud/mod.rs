// src/cloud/mod.rs

//! Cloud image pipelines
//!
//! Both providers follow the same shape: narrow capability traits describe
//! the provider primitives, a pipeline drives them in dependency order, and
//! a resource record lists everything created so teardown can run later or
//! in another process.
//!
//! - [`aws`]: S3 upload, snapshot import, AMI registration, EC2 boot test
//! - [`azure`]: page blob upload, managed or gallery image, VM boot test
//! - [`waiter`]: constant-interval polling bound to a cancellation token

pub mod aws;
pub mod azure;
pub mod waiter;

pub use waiter::{PollState, Waiter, DEFAULT_POLL_INTERVAL};

use crate::error::{Error, Result, ResultExt};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Treat a missing resource as already deleted
pub(crate) fn ignore_not_found(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(Error::NotFound(msg)) => {
            info!("{} already gone: {}", what, msg);
            Ok(())
        }
        other => other,
    }
}

/// Write `value` as pretty JSON to `path`, replacing it atomically
///
/// A crash leaves either the old file or the new one, never a truncated mix.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
