//! Process identity and liveness
//!
//! A reservation is owned by a `(pid, start_time)` pair rather than a bare pid:
//! after a crash the pid may be handed to an unrelated process, and only the
//! creation time tells the two apart.
//!
//! On Linux the creation time comes from `/proc/<pid>/stat` (field 22, in
//! clock ticks since boot) plus `btime` from `/proc/stat`. Other Unix systems
//! only get a pid existence check via `kill(pid, 0)` and report a creation
//! time of `0.0`, which degrades the fingerprint to pid-only matching.
//!
//! External tools are run through [`run_tool`], which puts each tool in its
//! own process group so a cancelled download takes the tool's helpers down
//! with it.

use crate::types::ProcessFingerprint;
use crate::{Error, Result};
use std::process::Output;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for a killed tool's helpers to exit
const GROUP_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Two creation times closer than this are the same process
///
/// `btime` has whole-second resolution, so the computed start time of a
/// process is stable but only accurate to about a second.
pub const START_TIME_TOLERANCE_SECS: f64 = 1.0;

/// Query whether a process exists and when it was created
///
/// Narrow so the ledger can be tested against a fake process table.
pub trait ProcessProbe: Send + Sync {
    /// Creation time of `pid` in seconds since the Unix epoch, or `None` if no
    /// such process exists
    fn creation_time(&self, pid: u32) -> Option<f64>;

    /// Whether the process identified by `fingerprint` is still running
    fn is_alive(&self, fingerprint: ProcessFingerprint) -> bool {
        match self.creation_time(fingerprint.pid) {
            Some(created) => (created - fingerprint.start_time).abs() <= START_TIME_TOLERANCE_SECS,
            None => false,
        }
    }
}

/// Probe backed by the operating system's process table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    fn creation_time(&self, pid: u32) -> Option<f64> {
        platform::creation_time(pid)
    }
}

impl ProcessFingerprint {
    /// Fingerprint of the calling process
    pub fn current() -> Result<Self> {
        Self::of(std::process::id(), &SystemProcessProbe)
    }

    /// Fingerprint of `pid` as seen by `probe`
    pub fn of(pid: u32, probe: &dyn ProcessProbe) -> Result<Self> {
        let start_time = probe.creation_time(pid).ok_or_else(|| {
            Error::Other(format!("Failed to read creation time of process {}", pid))
        })?;
        Ok(Self { pid, start_time })
    }
}

/// Run `command` to completion and collect its output
///
/// The tool leads a new process group. If `cancel` fires first, every
/// process in the group is killed (yt-dlp's ffmpeg merger included), the
/// tool is reaped, and `Ok(None)` is returned once nothing of it is left
/// writing. A token that is already cancelled spawns nothing.
///
/// # Errors
/// The spawn or wait failure of the tool itself.
pub async fn run_tool(
    command: &mut Command,
    cancel: &CancellationToken,
) -> std::io::Result<Option<Output>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }

    #[cfg(unix)]
    command.process_group(0);
    let mut child = command.kill_on_drop(true).spawn()?;

    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = child.wait() => Some(status?),
    };

    let Some(status) = status else {
        kill_tool(&mut child).await;
        stdout.abort();
        stderr.abort();
        return Ok(None);
    };

    Ok(Some(Output {
        status,
        stdout: stdout.await.unwrap_or_default(),
        stderr: stderr.await.unwrap_or_default(),
    }))
}

async fn read_pipe<R>(pipe: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe
        && let Err(e) = pipe.read_to_end(&mut buf).await
    {
        tracing::debug!(error = %e, "failed to read tool output");
    }
    buf
}

/// Kill the tool and everything it started, then reap it
async fn kill_tool(child: &mut Child) {
    let group = child.id().and_then(platform::signal_group);

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "failed to kill tool");
    }

    if let Some(pgid) = group {
        let deadline = tokio::time::Instant::now() + GROUP_EXIT_TIMEOUT;
        while platform::group_exists(pgid) {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(pgid, "tool helpers still running after kill");
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs;

    pub(super) fn creation_time(pid: u32) -> Option<f64> {
        let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        let ticks = parse_start_ticks(&stat)?;
        let boot = boot_time()?;
        let hz = clock_ticks_per_second()?;
        Some(boot + ticks as f64 / hz)
    }

    /// Extract `starttime` (field 22) from a `/proc/<pid>/stat` line
    ///
    /// `comm` (field 2) is parenthesised and may contain spaces or `)`, so
    /// fields are counted from the last `)`: the remainder starts at field 3.
    pub(super) fn parse_start_ticks(stat: &str) -> Option<u64> {
        let rest = &stat[stat.rfind(')')? + 1..];
        rest.split_whitespace().nth(22 - 3)?.parse().ok()
    }

    /// Parse the `btime` line of `/proc/stat`
    pub(super) fn parse_boot_time(proc_stat: &str) -> Option<f64> {
        proc_stat
            .lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|secs| secs as f64)
    }

    fn boot_time() -> Option<f64> {
        parse_boot_time(&fs::read_to_string("/proc/stat").ok()?)
    }

    fn clock_ticks_per_second() -> Option<f64> {
        // SAFETY: sysconf has no preconditions and only reads a constant.
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        (hz > 0).then_some(hz as f64)
    }

    pub(super) use super::unix_groups::{group_exists, signal_group};
}

#[cfg(unix)]
mod unix_groups {
    /// SIGKILL the process group led by `pid`, returning the group id
    pub(super) fn signal_group(pid: u32) -> Option<libc::pid_t> {
        let pgid = libc::pid_t::try_from(pid).ok()?;
        // SAFETY: killpg only delivers a signal to the group this child leads.
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        (rc == 0).then_some(pgid)
    }

    /// Whether any process of group `pgid` remains
    pub(super) fn group_exists(pgid: libc::pid_t) -> bool {
        // SAFETY: signal 0 performs the permission and existence checks only.
        let rc = unsafe { libc::killpg(pgid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    pub(super) fn creation_time(pid: u32) -> Option<f64> {
        let pid = libc::pid_t::try_from(pid).ok()?;
        // SAFETY: signal 0 performs the permission and existence checks only.
        let rc = unsafe { libc::kill(pid, 0) };
        let exists = rc == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
        exists.then_some(0.0)
    }

    pub(super) use super::unix_groups::{group_exists, signal_group};
}

#[cfg(not(unix))]
mod platform {
    // No liveness query; every owner is treated as running so nothing is
    // reclaimed that might still be in use.
    pub(super) fn creation_time(_pid: u32) -> Option<f64> {
        Some(0.0)
    }

    // Tools get no group of their own; killing the child is all there is.
    pub(super) fn signal_group(_pid: u32) -> Option<i32> {
        None
    }

    pub(super) fn group_exists(_pgid: i32) -> bool {
        false
    }
}
