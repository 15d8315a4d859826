//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for vessel data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/vessel";

/// Returns the data directory, preferring `$HOME/.vessel` for non-root
/// environments, falling back to `/var/lib/vessel`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".vessel");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Cgroup hierarchy mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// File name of the per-container JSON record.
pub const CONTAINER_CONFIG_FILE: &str = "config.json";

/// File name of the per-container captured stdout/stderr log.
pub const CONTAINER_LOG_FILE: &str = "container.log";

/// KV store bucket holding network records and the IP allocation bitmaps.
pub const NETWORK_BUCKET: &str = "vessel_network";

/// Key inside [`NETWORK_BUCKET`] under which the bitmap map is persisted.
pub const ALLOCATED_IP_KEY: &str = "allocated_ip";

/// Environment variable carrying the target PID for the exec-join verb.
pub const EXEC_PID_ENV: &str = "VESSEL_EXEC_PID";

/// Application name used in CLI output and cgroup paths.
pub const APP_NAME: &str = "vessel";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "vessel";
