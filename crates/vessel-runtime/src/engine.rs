//! Lifecycle engine: run, stop, remove, exec, list, logs.
//!
//! `run` sequences overlay → volume → launch → cgroup → network → record
//! → command relay, then either waits in the foreground or hands the wait
//! to a background thread. Teardown always runs in reverse acquisition
//! order; partial-setup failures roll back what was acquired before
//! surfacing the original error, so no half-started container is ever
//! registered as running.

use std::sync::Arc;

use vessel_common::config::RuntimePaths;
use vessel_common::error::{Result, VesselError};
use vessel_common::store::FileStore;
use vessel_common::types::{ContainerId, ContainerState};
use vessel_core::cgroup::CgroupManager;
use vessel_core::filesystem::{OverlayFs, VolumeSpec};
use vessel_net::nat::PortMapping;
use vessel_net::{Attachment, NetworkManager};

use crate::container::ContainerRecord;
use crate::launcher::{self, Child, LaunchOptions};
use crate::registry::Registry;

/// Options for starting a container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Container name; defaults to a short id prefix.
    pub name: Option<String>,
    /// Image whose archive provides the base layer.
    pub image: String,
    /// Attach the caller's stdio instead of capturing to the log.
    pub interactive: bool,
    /// Return after launch instead of waiting for exit.
    pub detach: bool,
    /// Memory limit, human form ("128MiB") or bytes.
    pub memory: Option<String>,
    /// Fractional CPU limit, e.g. "1.5".
    pub cpus: Option<String>,
    /// `hostDir:containerDir` bind volume.
    pub volume: Option<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// `hostPort:containerPort` publications.
    pub ports: Vec<String>,
}

/// The lifecycle engine, one per process.
pub struct Engine {
    paths: RuntimePaths,
    registry: Registry,
    network: Arc<NetworkManager>,
}

impl Engine {
    /// Creates an engine over the default data directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_paths(RuntimePaths::default())
    }

    /// Creates an engine over a custom data directory.
    #[must_use]
    pub fn with_paths(paths: RuntimePaths) -> Self {
        let store = Arc::new(FileStore::new(paths.store_dir()));
        let registry = Registry::new(paths.containers_dir());
        let network = Arc::new(NetworkManager::new(store));
        Self {
            paths,
            registry,
            network,
        }
    }

    /// The network manager, shared with the `network` CLI commands.
    #[must_use]
    pub fn network(&self) -> &Arc<NetworkManager> {
        &self.network
    }

    /// Runs a command in a new container.
    ///
    /// # Errors
    ///
    /// Returns the first failing setup step's error after rolling back
    /// whatever was already acquired.
    pub fn run(&self, command: &[String], options: RunOptions) -> Result<ContainerRecord> {
        // All user input is validated before any kernel resource exists.
        if command.is_empty() {
            return Err(VesselError::config("no command specified"));
        }
        let volume = VolumeSpec::parse(options.volume.as_deref().unwrap_or(""))?;
        for port in &options.ports {
            let _ = PortMapping::parse(port)?;
        }
        let memory_bytes = options
            .memory
            .as_deref()
            .map(|s| {
                parse_memory(s).ok_or_else(|| {
                    VesselError::config(format!("invalid memory limit {s:?}"))
                })
            })
            .transpose()?;

        let id = ContainerId::generate();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| id.short().to_string());
        if self.registry.find(&name)?.is_some() {
            return Err(VesselError::config(format!(
                "container name {name} is already in use"
            )));
        }

        let container_dir = self.paths.container_dir(id.as_str());
        let overlay = OverlayFs::new(
            self.paths.image_base_dir(&options.image),
            &container_dir,
        );
        overlay.create(&self.paths.image_archive(&options.image))?;

        if let Some(volume) = &volume {
            if let Err(e) = volume.mount(&overlay.merged_dir) {
                overlay.unmount();
                return Err(e);
            }
        }

        let launch_options = LaunchOptions {
            interactive: options.interactive,
            new_network_ns: options.network.is_some(),
            workdir: overlay.merged_dir.clone(),
            log_path: (!options.interactive)
                .then(|| container_dir.join(vessel_common::constants::CONTAINER_LOG_FILE)),
        };
        let mut child = match launcher::launch(&launch_options) {
            Ok(child) => child,
            Err(e) => {
                self.unwind_mounts(&overlay, volume.as_ref());
                return Err(e);
            }
        };
        let pid = child.pid.as_raw();

        // The child is blocked on the pipe read, so limits land before
        // its real work starts.
        let cgroup = match self.setup_cgroup(id.as_str(), memory_bytes, options.cpus.as_deref()) {
            Ok(cgroup) => cgroup,
            Err(e) => {
                self.kill_and_reap(&child);
                self.unwind_mounts(&overlay, volume.as_ref());
                return Err(e);
            }
        };
        #[allow(clippy::cast_sign_loss)]
        if let Err(e) = cgroup.apply(pid as u32) {
            self.kill_and_reap(&child);
            cgroup.cleanup();
            self.unwind_mounts(&overlay, volume.as_ref());
            return Err(e);
        }

        let mut record = ContainerRecord {
            id: id.to_string(),
            name,
            pid,
            command: command.join(" "),
            state: ContainerState::Running,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: String::new(),
            image: options.image.clone(),
            network: options.network.clone().unwrap_or_default(),
            ip: String::new(),
            port_mapping: options.ports.clone(),
        };

        if !record.network.is_empty() {
            #[allow(clippy::cast_sign_loss)]
            let attachment = Attachment {
                container_id: &record.id,
                pid: pid as u32,
                port_mappings: &record.port_mapping,
            };
            match self.network.connect(&record.network, &attachment) {
                Ok(ip) => record.ip = ip.to_string(),
                Err(e) => {
                    self.kill_and_reap(&child);
                    cgroup.cleanup();
                    self.unwind_mounts(&overlay, volume.as_ref());
                    return Err(e);
                }
            }
        }

        self.registry.write(&record)?;
        if let Err(e) = child.send_command(&record.command) {
            self.kill_and_reap(&child);
            self.teardown(&record, &overlay, volume.as_ref(), &cgroup);
            return Err(e);
        }
        tracing::info!(id = %record.id, name = %record.name, pid, "container started");

        if options.detach {
            self.spawn_waiter(child, record.clone(), overlay, volume, cgroup);
            return Ok(record);
        }

        match child.wait() {
            Ok(code) => tracing::info!(id = %record.id, code, "container exited"),
            Err(e) => tracing::warn!(id = %record.id, error = %e, "wait failed"),
        }
        self.teardown(&record, &overlay, volume.as_ref(), &cgroup);
        Ok(record)
    }

    /// Signals a running container with SIGTERM and marks it stopped.
    ///
    /// Resource teardown is not forced here: it happens when the owning
    /// run's wait observes the exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, not running, or
    /// cannot be signaled.
    pub fn stop(&self, name_or_id: &str) -> Result<()> {
        let record = self.must_find(name_or_id)?;
        if !record.is_running() {
            return Err(VesselError::config(format!(
                "container {} is not running",
                record.name
            )));
        }

        #[cfg(target_os = "linux")]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            kill(Pid::from_raw(record.pid), Signal::SIGTERM).map_err(|e| {
                VesselError::Syscall {
                    op: "kill",
                    source: e,
                }
            })?;
        }

        self.registry
            .update_state(&record.id, ContainerState::Stopped)?;
        tracing::info!(name = %record.name, "container stopped");
        Ok(())
    }

    /// Removes a container's record, releasing its address and deleting
    /// its directory.
    ///
    /// # Errors
    ///
    /// Refuses to remove a running container unless `force` is set, in
    /// which case the container is stopped first.
    pub fn remove(&self, name_or_id: &str, force: bool) -> Result<()> {
        let record = self.must_find(name_or_id)?;

        if record.is_running() {
            if !force {
                return Err(VesselError::config(format!(
                    "cannot remove running container {}, use -f to force",
                    record.name
                )));
            }
            self.stop(name_or_id)?;
        }

        self.release_network(&record);

        // The overlay may still be mounted if the owning waiter died with
        // the host; tear it down before deleting the directory.
        let overlay = OverlayFs::new(
            self.paths.image_base_dir(&record.image),
            &self.paths.container_dir(&record.id),
        );
        overlay.unmount();

        self.registry.delete(&record.id)?;
        tracing::info!(name = %record.name, "container removed");
        Ok(())
    }

    /// Executes a command inside a running container and returns its
    /// exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or not running.
    pub fn exec(&self, name_or_id: &str, command: &[String]) -> Result<i32> {
        let record = self.must_find(name_or_id)?;
        crate::exec::exec_into(&record, command)
    }

    /// Lists all container records.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers root cannot be enumerated.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        self.registry.list()
    }

    /// Reads a container's captured log.
    ///
    /// # Errors
    ///
    /// Returns an error if the container or its log is unknown.
    pub fn logs(&self, name_or_id: &str) -> Result<String> {
        let record = self.must_find(name_or_id)?;
        crate::logs::read_logs(&self.registry.log_path(&record.id))
    }

    /// Follows a container's log to `out`, polling on EOF.
    ///
    /// # Errors
    ///
    /// Returns an error if the container or its log is unknown, or a
    /// non-EOF read error occurs.
    pub fn follow_logs(&self, name_or_id: &str, out: &mut dyn std::io::Write) -> Result<()> {
        let record = self.must_find(name_or_id)?;
        crate::logs::follow_logs(&self.registry.log_path(&record.id), out)
    }

    fn must_find(&self, name_or_id: &str) -> Result<ContainerRecord> {
        self.registry
            .find(name_or_id)?
            .ok_or_else(|| VesselError::NotFound {
                kind: "container",
                id: name_or_id.to_string(),
            })
    }

    fn setup_cgroup(
        &self,
        name: &str,
        memory_bytes: Option<u64>,
        cpus: Option<&str>,
    ) -> Result<CgroupManager> {
        let cgroup = CgroupManager::new(name)?;
        if let Some(limit) = memory_bytes {
            cgroup.set_memory_limit(limit)?;
        }
        if let Some(spec) = cpus {
            cgroup.set_cpu_limit(spec)?;
        }
        Ok(cgroup)
    }

    /// Detached mode: a background thread owns the wait and the teardown.
    fn spawn_waiter(
        &self,
        child: Child,
        record: ContainerRecord,
        overlay: OverlayFs,
        volume: Option<VolumeSpec>,
        cgroup: CgroupManager,
    ) {
        let network = Arc::clone(&self.network);
        let registry = self.registry.clone();
        let _ = std::thread::spawn(move || {
            match child.wait() {
                Ok(code) => tracing::info!(id = %record.id, code, "detached container exited"),
                Err(e) => tracing::warn!(id = %record.id, error = %e, "wait failed"),
            }
            release_network_with(&network, &record);
            cgroup.cleanup();
            if let Some(volume) = &volume {
                volume.unmount(&overlay.merged_dir);
            }
            overlay.unmount();
            if let Err(e) = registry.update_state(&record.id, ContainerState::Stopped) {
                tracing::warn!(id = %record.id, error = %e, "state update failed");
            }
        });
    }

    /// Full teardown in reverse acquisition order. Every step is
    /// best-effort so one failure cannot abort the rest.
    fn teardown(
        &self,
        record: &ContainerRecord,
        overlay: &OverlayFs,
        volume: Option<&VolumeSpec>,
        cgroup: &CgroupManager,
    ) {
        self.release_network(record);
        cgroup.cleanup();
        if let Some(volume) = volume {
            volume.unmount(&overlay.merged_dir);
        }
        overlay.unmount();
        if let Err(e) = self
            .registry
            .update_state(&record.id, ContainerState::Stopped)
        {
            tracing::warn!(id = %record.id, error = %e, "state update failed");
        }
    }

    fn release_network(&self, record: &ContainerRecord) {
        release_network_with(&self.network, record);
    }

    fn kill_and_reap(&self, child: &Child) {
        #[cfg(target_os = "linux")]
        {
            use nix::sys::signal::{Signal, kill};
            if let Err(e) = kill(child.pid, Signal::SIGKILL) {
                tracing::warn!(pid = child.pid.as_raw(), error = %e, "kill failed");
            }
        }
        if let Err(e) = child.wait() {
            tracing::warn!(pid = child.pid.as_raw(), error = %e, "reap failed");
        }
    }

    fn unwind_mounts(&self, overlay: &OverlayFs, volume: Option<&VolumeSpec>) {
        if let Some(volume) = volume {
            volume.unmount(&overlay.merged_dir);
        }
        overlay.unmount();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Disconnects a container from its network, best-effort.
fn release_network_with(network: &NetworkManager, record: &ContainerRecord) {
    if record.network.is_empty() || record.ip.is_empty() {
        return;
    }
    let Ok(ip) = record.ip.parse() else {
        tracing::warn!(ip = %record.ip, "unparsable recorded address");
        return;
    };
    #[allow(clippy::cast_sign_loss)]
    let attachment = Attachment {
        container_id: &record.id,
        pid: record.pid as u32,
        port_mappings: &record.port_mapping,
    };
    if let Err(e) = network.disconnect(&record.network, &attachment, ip) {
        tracing::warn!(
            container = %record.id,
            network = %record.network,
            error = %e,
            "network disconnect failed"
        );
    }
}

/// Parses memory strings like "128MiB", "256MB", "1GiB" into bytes.
#[allow(clippy::option_if_let_else)]
fn parse_memory(s: &str) -> Option<u64> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("GiB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix("MiB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix("KiB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('g') {
        (n, 1024 * 1024 * 1024)
    } else {
        (s, 1)
    };
    num_str.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::with_paths(RuntimePaths::new(dir.path()));
        (engine, dir)
    }

    #[test]
    fn parse_memory_mib() {
        assert_eq!(parse_memory("128MiB"), Some(128 * 1024 * 1024));
    }

    #[test]
    fn parse_memory_short_suffixes() {
        assert_eq!(parse_memory("100m"), Some(100 * 1024 * 1024));
        assert_eq!(parse_memory("1g"), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn parse_memory_plain_bytes() {
        assert_eq!(parse_memory("1048576"), Some(1_048_576));
    }

    #[test]
    fn parse_memory_invalid() {
        assert_eq!(parse_memory("abc"), None);
    }

    #[test]
    fn run_rejects_empty_command() {
        let (engine, _dir) = test_engine();
        let result = engine.run(&[], RunOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn run_rejects_malformed_volume_before_any_setup() {
        let (engine, dir) = test_engine();
        let options = RunOptions {
            volume: Some("no-separator".into()),
            image: "busybox".into(),
            ..RunOptions::default()
        };
        assert!(engine.run(&["sh".into()], options).is_err());
        // Validation failed before the container directory was created.
        assert!(!dir.path().join("containers").exists());
    }

    #[test]
    fn run_rejects_malformed_port_mapping() {
        let (engine, _dir) = test_engine();
        let options = RunOptions {
            ports: vec!["not-a-port".into()],
            image: "busybox".into(),
            ..RunOptions::default()
        };
        assert!(engine.run(&["sh".into()], options).is_err());
    }

    #[test]
    fn run_rejects_invalid_memory_limit() {
        let (engine, _dir) = test_engine();
        let options = RunOptions {
            memory: Some("lots".into()),
            image: "busybox".into(),
            ..RunOptions::default()
        };
        assert!(engine.run(&["sh".into()], options).is_err());
    }

    #[test]
    fn stop_of_unknown_container_is_not_found() {
        let (engine, _dir) = test_engine();
        assert!(matches!(
            engine.stop("ghost"),
            Err(VesselError::NotFound { .. })
        ));
    }

    #[test]
    fn remove_of_unknown_container_is_not_found() {
        let (engine, _dir) = test_engine();
        assert!(matches!(
            engine.remove("ghost", false),
            Err(VesselError::NotFound { .. })
        ));
    }

    #[test]
    fn remove_refuses_running_container_without_force() {
        let (engine, _dir) = test_engine();
        let record = ContainerRecord {
            id: "cccc".into(),
            name: "runner".into(),
            pid: i32::MAX, // no such process
            command: "sh".into(),
            state: ContainerState::Running,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: String::new(),
            image: "busybox".into(),
            network: String::new(),
            ip: String::new(),
            port_mapping: Vec::new(),
        };
        engine.registry.write(&record).expect("write");

        let err = engine.remove("runner", false).expect_err("must refuse");
        assert!(err.to_string().contains("use -f"));
    }

    #[test]
    fn remove_deletes_stopped_container() {
        let (engine, _dir) = test_engine();
        let record = ContainerRecord {
            id: "dddd".into(),
            name: "done".into(),
            pid: 0,
            command: "sh".into(),
            state: ContainerState::Stopped,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            image: "busybox".into(),
            network: String::new(),
            ip: String::new(),
            port_mapping: Vec::new(),
        };
        engine.registry.write(&record).expect("write");

        engine.remove("done", false).expect("remove");
        assert!(engine.registry.find("done").expect("find").is_none());
    }
}
