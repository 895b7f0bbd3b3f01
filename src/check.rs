// src/check.rs

//! Check reports and bounded waits
//!
//! A check either passes or returns an error whose kind decides how the
//! report treats it: skip and warn are shown but do not fail the run.

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of one named check
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub outcome: Result<()>,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, outcome: Result<()>) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }
}

/// Icon shown in front of a check line
pub fn icon_for(outcome: &Result<()>) -> &'static str {
    match outcome {
        Ok(()) => "🟢",
        Err(e) => match e.kind() {
            ErrorKind::Skip => "🔵",
            ErrorKind::Warn => "🟠",
            _ => "🔴",
        },
    }
}

/// Print one line per check, sorted by name
///
/// Returns `false` if any check failed with something other than a skip or
/// a warning.
pub fn render_report(results: &mut [CheckResult], sink: &mut dyn Write) -> Result<bool> {
    results.sort_by(|a, b| a.name.cmp(&b.name));

    let mut passed = true;
    for result in results.iter() {
        let icon = icon_for(&result.outcome);
        match &result.outcome {
            Ok(()) => writeln!(sink, "{} {}: passed", icon, result.name)?,
            Err(e) => {
                writeln!(sink, "{} {}: {}", icon, result.name, e)?;
                if !e.is_skip() && !e.is_warn() {
                    passed = false;
                }
            }
        }
    }
    Ok(passed)
}

/// Call `probe` every `tick` until it yields a value or `timeout` elapses
pub async fn wait_until<T, F, Fut>(timeout: Duration, tick: Duration, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await? {
            return Ok(value);
        }
        if Instant::now() + tick > deadline {
            return Err(Error::TimeoutError(format!(
                "condition not met within {}s",
                timeout.as_secs()
            )));
        }
        debug!("Condition not met, retrying in {:?}", tick);
        tokio::time::sleep(tick).await;
    }
}
