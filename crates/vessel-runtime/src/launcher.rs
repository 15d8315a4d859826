//! Namespace launcher: the parent half of the init handoff.
//!
//! The child is cloned into fresh UTS, PID, mount, and IPC namespaces
//! (plus a network namespace when the container is attached to one) and
//! immediately re-execs this binary with the hidden `init` verb. The user
//! command is not passed as argv: it is only known-complete after the
//! parent has finished cgroup and network setup, so it travels over a
//! pipe whose read end the child inherits as fd 3. Writing the command
//! and dropping the write end signals end-of-command.

use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use vessel_common::error::{Result, VesselError};

/// Pipe read end's fd number inside the child, after stdin/stdout/stderr.
pub const COMMAND_FD: i32 = 3;

/// Clone-child stack size.
const STACK_SIZE: usize = 1024 * 1024;

/// How the child process is created.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Inherit the caller's stdio instead of redirecting to the log file.
    pub interactive: bool,
    /// Also unshare the network namespace.
    pub new_network_ns: bool,
    /// Working directory of the child: the overlay merged dir it will
    /// pivot into.
    pub workdir: PathBuf,
    /// Log file capturing stdout/stderr in non-interactive mode.
    pub log_path: Option<PathBuf>,
}

/// A launched namespace-entry process, still blocked reading fd 3.
#[derive(Debug)]
pub struct Child {
    /// Host-visible PID.
    pub pid: Pid,
    command_fd: Option<OwnedFd>,
}

impl Child {
    /// Relays the user command to the child and closes the pipe,
    /// signaling end-of-command.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe write fails.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        let fd = self.command_fd.take().ok_or_else(|| {
            VesselError::config("command already sent to container init")
        })?;
        let mut pipe = File::from(fd);
        pipe.write_all(command.as_bytes())
            .map_err(|e| VesselError::io(PathBuf::from("init pipe"), e))?;
        tracing::debug!(command, "command relayed to init");
        // Dropping the file closes the write end; the child sees EOF.
        Ok(())
    }

    /// Blocks until the child exits and returns its exit code.
    ///
    /// A signal-terminated child reports `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid` fails.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) => {}
                Err(e) => {
                    return Err(VesselError::Syscall {
                        op: "waitpid",
                        source: e,
                    });
                }
            }
        }
    }
}

/// Clones the namespace-entry child.
///
/// The child callback runs with a copied fd table: it moves the pipe read
/// end to fd 3, redirects stdio to the log file when not interactive,
/// enters the overlay merged dir, and execs `/proc/self/exe init`. Cgroup
/// and network setup happen in the parent after this returns, while the
/// child blocks reading the pipe.
///
/// # Errors
///
/// Returns an error if the pipe, log file, or `clone(2)` fails; all
/// are fatal to the launch attempt.
#[cfg(target_os = "linux")]
pub fn launch(options: &LaunchOptions) -> Result<Child> {
    use nix::sched::CloneFlags;
    use nix::sys::signal::Signal;
    use nix::unistd::pipe;

    let (read_fd, write_fd) = pipe().map_err(|e| VesselError::Syscall {
        op: "pipe",
        source: e,
    })?;

    let log_file = match &options.log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| VesselError::io(parent, e))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| VesselError::io(path.clone(), e))?;
            Some(file)
        }
        None => None,
    };

    let mut flags = CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWIPC;
    if options.new_network_ns {
        flags |= CloneFlags::CLONE_NEWNET;
    }

    // Everything the child touches is prepared before the clone: no
    // allocation happens between fork and exec.
    let exe = CString::new("/proc/self/exe")
        .map_err(|_| VesselError::config("unrepresentable exe path"))?;
    let argv0 = CString::new(vessel_common::constants::BIN_NAME)
        .map_err(|_| VesselError::config("unrepresentable binary name"))?;
    let verb = CString::new("init").map_err(|_| VesselError::config("unrepresentable verb"))?;
    let workdir = CString::new(options.workdir.to_string_lossy().into_owned())
        .map_err(|_| VesselError::config("unrepresentable workdir"))?;

    let read_raw = read_fd.as_raw_fd();
    let log_raw = log_file.as_ref().map(std::os::fd::AsRawFd::as_raw_fd);

    let child_entry = || -> isize {
        // SAFETY: only raw libc calls on pre-built data; this runs in the
        // cloned child before exec.
        #[allow(unsafe_code)]
        unsafe {
            if libc::dup2(read_raw, COMMAND_FD) < 0 {
                return 127;
            }
            if let Some(log_raw) = log_raw {
                if libc::dup2(log_raw, libc::STDOUT_FILENO) < 0
                    || libc::dup2(log_raw, libc::STDERR_FILENO) < 0
                {
                    return 127;
                }
            }
            if libc::chdir(workdir.as_ptr()) < 0 {
                return 127;
            }
            let argv = [argv0.as_ptr(), verb.as_ptr(), std::ptr::null()];
            let _ = libc::execv(exe.as_ptr(), argv.as_ptr());
        }
        127
    };

    let mut stack = vec![0u8; STACK_SIZE];
    // SAFETY: the callback only performs dup2/chdir/execv on data owned
    // by this stack frame, which outlives the child's exec.
    #[allow(unsafe_code)]
    let pid = unsafe {
        nix::sched::clone(
            Box::new(child_entry),
            &mut stack,
            flags,
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| VesselError::Syscall {
        op: "clone",
        source: e,
    })?;

    // Parent keeps only the write end; the child owns its copy of the
    // read end.
    drop(read_fd);
    drop(log_file);

    tracing::info!(pid = pid.as_raw(), ?flags, "namespace child launched");
    Ok(Child {
        pid,
        command_fd: Some(write_fd),
    })
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — namespace creation requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn launch(_options: &LaunchOptions) -> Result<Child> {
    Err(VesselError::config(
        "Linux required for native container operations",
    ))
}
