//! Pinned-thread network namespace execution.
//!
//! Namespace association is per-OS-thread in the kernel, so configuration
//! inside a container's netns must not share its thread with any other
//! work. [`with_netns`] runs a closure on a dedicated, freshly spawned
//! thread that enters the target namespace, and restores the original
//! namespace on every exit path before the thread ends.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::time::Duration;

use vessel_common::error::{Result, VesselError};

/// Attempts made when opening a namespace file that may not be visible
/// yet right after process start.
pub const NS_OPEN_ATTEMPTS: u32 = 3;

/// Backoff between namespace-file open attempts.
pub const NS_OPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Opens `/proc/<pid>/ns/net` with bounded retry.
///
/// # Errors
///
/// Returns an error once all attempts are exhausted.
pub fn open_container_netns(pid: u32) -> Result<File> {
    open_ns_file(pid, "net")
}

/// Opens `/proc/<pid>/ns/<ns>` with bounded retry.
///
/// # Errors
///
/// Returns an error once all attempts are exhausted.
pub fn open_ns_file(pid: u32, ns: &str) -> Result<File> {
    let path = PathBuf::from(format!("/proc/{pid}/ns/{ns}"));
    let mut last: Option<std::io::Error> = None;
    for attempt in 0..NS_OPEN_ATTEMPTS {
        match File::open(&path) {
            Ok(file) => return Ok(file),
            Err(e) => last = Some(e),
        }
        if attempt + 1 < NS_OPEN_ATTEMPTS {
            std::thread::sleep(NS_OPEN_BACKOFF);
        }
    }
    Err(VesselError::io(
        path,
        last.unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound)),
    ))
}

/// Runs `f` inside the network namespace referred to by `target`.
///
/// The closure executes on a dedicated worker thread: the thread enters
/// the target namespace, runs the closure, and switches back to its
/// original namespace before terminating, on success and on error alike.
/// No other work is ever scheduled on that thread, so the rest of the
/// process never observes the namespace switch.
///
/// # Errors
///
/// Returns the closure's error, or a namespace-switch error.
#[cfg(target_os = "linux")]
pub fn with_netns<T, F>(target: &File, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    use nix::sched::{CloneFlags, setns};

    std::thread::scope(|scope| {
        let worker = scope.spawn(move || -> Result<T> {
            let original =
                File::open("/proc/thread-self/ns/net").map_err(|e| {
                    VesselError::io(PathBuf::from("/proc/thread-self/ns/net"), e)
                })?;

            setns(target.as_fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
                VesselError::Syscall {
                    op: "setns(net)",
                    source: e,
                }
            })?;

            let result = f();

            // Restore on every exit path, success or error.
            if let Err(e) = setns(original.as_fd(), CloneFlags::CLONE_NEWNET) {
                tracing::error!(error = %e, "failed to restore original netns");
            }

            result
        });

        worker
            .join()
            .map_err(|_| VesselError::config("netns worker thread panicked"))?
    })
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — network namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn with_netns<T, F>(_target: &File, _f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    Err(VesselError::config(
        "Linux required for native container operations",
    ))
}
