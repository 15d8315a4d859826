//! Container log reading.
//!
//! Non-interactive containers have their stdout/stderr captured into
//! `container.log`. Follow mode seeks to the end and polls for new lines
//! with a fixed retry delay on EOF, indefinitely, until the reader is
//! terminated.

use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use vessel_common::error::{Result, VesselError};

/// Delay between polls when follow mode hits EOF.
pub const FOLLOW_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Reads a container's entire log.
///
/// # Errors
///
/// Returns [`VesselError::NotFound`] when the log file does not exist
/// (interactive containers never produce one).
pub fn read_logs(log_path: &Path) -> Result<String> {
    if !log_path.exists() {
        return Err(VesselError::NotFound {
            kind: "log file",
            id: log_path.display().to_string(),
        });
    }
    std::fs::read_to_string(log_path).map_err(|e| VesselError::io(log_path.to_path_buf(), e))
}

/// Streams a container's log to `out`, starting at the current end of
/// file, sleeping and retrying on EOF. Never returns under normal
/// operation; the caller is expected to be killed by the user.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or a read fails
/// for a reason other than EOF.
pub fn follow_logs(log_path: &Path, out: &mut dyn Write) -> Result<()> {
    let file = std::fs::File::open(log_path)
        .map_err(|e| VesselError::io(log_path.to_path_buf(), e))?;
    let mut reader = BufReader::new(file);
    let _ = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| VesselError::io(log_path.to_path_buf(), e))?;

    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| VesselError::io(log_path.to_path_buf(), e))?;
        if read == 0 {
            std::thread::sleep(FOLLOW_RETRY_DELAY);
            continue;
        }
        out.write_all(line.as_bytes())
            .map_err(|e| VesselError::io(log_path.to_path_buf(), e))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_log_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            read_logs(&dir.path().join("container.log")),
            Err(VesselError::NotFound { .. })
        ));
    }

    #[test]
    fn read_returns_captured_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        std::fs::write(&path, "hi\nthere\n").expect("write");

        let logs = read_logs(&path).expect("read");
        assert_eq!(logs, "hi\nthere\n");
    }

    #[test]
    fn follow_on_missing_log_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = Vec::new();
        assert!(follow_logs(&dir.path().join("container.log"), &mut sink).is_err());
    }
}
