//! The container-side half of the init handoff.
//!
//! Runs as the hidden `init` verb inside the freshly cloned namespaces,
//! as PID 1 of the new PID namespace. Blocks on the inherited pipe until
//! the parent has finished cgroup and network setup and sent the user
//! command, performs the mount setup, and replaces itself with the user
//! command. After the exec there is no supervisor process inside the
//! container.

use std::convert::Infallible;
use std::ffi::CString;
use std::io::Read;
use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};
use vessel_core::filesystem::pivot_root::setup_rootfs;

use crate::launcher::COMMAND_FD;

/// Entry point for the hidden `init` verb.
///
/// Reads the command from fd 3 (blocking until the parent closes the
/// write end), mounts the private proc, pivots into the overlay root,
/// mounts the tmpfs `/dev`, and execs the command.
///
/// # Errors
///
/// Only ever returns the error arm: on success control transfers to the
/// user command and this function never returns. Any failure is fatal
/// and the process must exit nonzero.
pub fn run() -> Result<Infallible> {
    let command = read_command()?;
    let argv: Vec<&str> = command.split_whitespace().collect();
    if argv.is_empty() {
        return Err(VesselError::config("init received an empty command"));
    }
    tracing::debug!(?argv, "init received command");

    // The parent started us inside the overlay merged dir.
    let new_root = std::env::current_dir()
        .map_err(|e| VesselError::io(PathBuf::from("."), e))?;
    setup_rootfs(&new_root)?;

    exec_command(&argv)
}

/// Reads the command string from the inherited pipe until EOF.
fn read_command() -> Result<String> {
    // SAFETY: the launcher dup'd the pipe read end onto fd 3 before
    // exec'ing this process; nothing else owns it.
    #[allow(unsafe_code)]
    let mut pipe = unsafe {
        use std::os::fd::FromRawFd;
        std::fs::File::from_raw_fd(COMMAND_FD)
    };
    let mut command = String::new();
    let _ = pipe
        .read_to_string(&mut command)
        .map_err(|e| VesselError::io(PathBuf::from("init pipe"), e))?;
    Ok(command)
}

/// Resolves the command against `PATH` when not absolute and replaces
/// the process image with it.
fn exec_command(argv: &[&str]) -> Result<Infallible> {
    let program = resolve_program(argv[0])?;
    tracing::debug!(program = %program.display(), "exec into user command");

    let path_c = CString::new(program.as_os_str().as_encoded_bytes())
        .map_err(|_| VesselError::config("NUL byte in program path"))?;
    let argv_c: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(*a).map_err(|_| VesselError::config("NUL byte in argument")))
        .collect::<Result<_>>()?;

    nix::unistd::execv(&path_c, &argv_c).map_err(|e| VesselError::Syscall {
        op: "execv",
        source: e,
    })
}

/// Finds the program's absolute path.
fn resolve_program(name: &str) -> Result<PathBuf> {
    if name.starts_with('/') {
        let path = Path::new(name);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(VesselError::NotFound {
            kind: "executable",
            id: name.to_string(),
        });
    }
    which::which(name).map_err(|_| VesselError::NotFound {
        kind: "executable",
        id: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_program_must_exist() {
        assert!(resolve_program("/definitely/not/here").is_err());
    }

    #[test]
    fn relative_program_resolves_via_path() {
        // `sh` is on PATH in any environment these tests run in.
        let path = resolve_program("sh").expect("resolve sh");
        assert!(path.is_absolute());
    }

    #[test]
    fn unknown_relative_program_is_not_found() {
        assert!(matches!(
            resolve_program("vessel-test-no-such-binary"),
            Err(VesselError::NotFound { .. })
        ));
    }
}
