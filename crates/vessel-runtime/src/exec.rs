//! Exec into a running container.
//!
//! The parent re-execs this binary with the hidden `exec-join` verb,
//! passing the target PID through the environment. The child opens all
//! four namespace files up front (once the mount namespace is joined,
//! `/proc` shows the container's view and the remaining files would no
//! longer resolve), then joins them one at a time via `setns` and execs
//! the requested command. The PID namespace is deliberately not joined:
//! only children of the entering process would observe the new PID
//! space, matching expected exec-into-container semantics.

use std::convert::Infallible;
use std::ffi::CString;
use std::path::PathBuf;
use std::process::Command;

use vessel_common::constants::EXEC_PID_ENV;
use vessel_common::error::{Result, VesselError};

use crate::container::ContainerRecord;

/// Parent side: re-execs the binary with the `exec-join` verb and waits.
///
/// Stdio is inherited, so interactive commands work without a pty layer.
/// Returns the joined command's exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or the re-exec
/// fails to start.
pub fn exec_into(record: &ContainerRecord, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(VesselError::config("no command specified for exec"));
    }
    if !record.is_running() || record.pid <= 0 {
        return Err(VesselError::config(format!(
            "container {} is not running",
            record.name
        )));
    }
    tracing::debug!(pid = record.pid, ?command, "exec into container");

    let status = Command::new("/proc/self/exe")
        .arg("exec-join")
        .args(command)
        .env(EXEC_PID_ENV, record.pid.to_string())
        .status()
        .map_err(|e| VesselError::io(PathBuf::from("/proc/self/exe"), e))?;

    Ok(status.code().unwrap_or(-1))
}

/// Child side: entry point for the hidden `exec-join` verb.
///
/// # Errors
///
/// Only ever returns the error arm: on success control transfers to the
/// requested command.
#[cfg(target_os = "linux")]
pub fn run_join(command: &[String]) -> Result<Infallible> {
    use nix::sched::{CloneFlags, setns};

    if command.is_empty() {
        return Err(VesselError::config("no command specified for exec"));
    }

    let pid: u32 = std::env::var(EXEC_PID_ENV)
        .map_err(|_| VesselError::config(format!("{EXEC_PID_ENV} not set")))?
        .parse()
        .map_err(|_| VesselError::config(format!("invalid {EXEC_PID_ENV}")))?;

    // Open every namespace file before joining any of them.
    let namespaces = [
        ("mnt", CloneFlags::CLONE_NEWNS),
        ("uts", CloneFlags::CLONE_NEWUTS),
        ("ipc", CloneFlags::CLONE_NEWIPC),
        ("net", CloneFlags::CLONE_NEWNET),
    ];
    let mut handles = Vec::with_capacity(namespaces.len());
    for (name, flag) in namespaces {
        handles.push((name, flag, vessel_net::netns::open_ns_file(pid, name)?));
    }

    for (name, flag, file) in &handles {
        use std::os::fd::AsFd;
        setns(file.as_fd(), *flag).map_err(|e| {
            tracing::error!(ns = %name, error = %e, "namespace join failed");
            VesselError::Syscall {
                op: "setns",
                source: e,
            }
        })?;
        tracing::debug!(ns = %name, pid, "joined namespace");
    }

    // Land in the container's root, not wherever the caller was.
    nix::unistd::chdir("/").map_err(|e| VesselError::Syscall {
        op: "chdir",
        source: e,
    })?;

    exec_command(command)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — `setns` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn run_join(_command: &[String]) -> Result<Infallible> {
    Err(VesselError::config(
        "Linux required for native container operations",
    ))
}

/// Resolves and execs the command inside the joined namespaces.
fn exec_command(command: &[String]) -> Result<Infallible> {
    let program = if command[0].starts_with('/') {
        PathBuf::from(&command[0])
    } else {
        which::which(&command[0]).map_err(|_| VesselError::NotFound {
            kind: "executable",
            id: command[0].clone(),
        })?
    };

    let path_c = CString::new(program.as_os_str().as_encoded_bytes())
        .map_err(|_| VesselError::config("NUL byte in program path"))?;
    let argv_c: Vec<CString> = command
        .iter()
        .map(|a| {
            CString::new(a.as_str()).map_err(|_| VesselError::config("NUL byte in argument"))
        })
        .collect::<Result<_>>()?;

    nix::unistd::execv(&path_c, &argv_c).map_err(|e| VesselError::Syscall {
        op: "execv",
        source: e,
    })
}
