//! Worker process launch and lifecycle polling (§6, §4.4).
//!
//! Two launchers: `ProcessLauncher` spawns the engine's own binary in
//! `worker` mode as a plain sibling OS process (the default — no container
//! runtime assumed); `DockerLauncher` shells out to the `docker` CLI for
//! hosts that offer container isolation, self-inspecting the running
//! container once to discover the image, volume and network a worker should
//! inherit, mirroring the Docker-outside-Docker approach of the system this
//! engine reimplements.

use std::collections::HashMap;
use std::env;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use serde::Deserialize;

use crate::domain::JobManifest;
use crate::error::EngineError;

/// A handle to a launched worker, opaque to callers beyond its name.
#[derive(Debug, Clone)]
pub struct LaunchedWorker {
    pub id: String,
    pub name: String,
}

pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, manifest: &JobManifest, name: &str) -> Result<LaunchedWorker, EngineError>;

    /// `Ok(None)` while still running, `Ok(Some(code))` once exited.
    fn poll_exit(&self, worker: &LaunchedWorker) -> Result<Option<i32>, EngineError>;

    /// Best-effort cleanup; failures are logged by the caller, not raised.
    fn remove(&self, worker: &LaunchedWorker) -> Result<(), EngineError>;

    /// Live workers whose name carries `name_prefix`, for orphan-waiting.
    fn list_by_prefix(&self, name_prefix: &str) -> Vec<String>;
}

/// Default launcher: runs the current executable with `worker` as argv[1].
/// Keeps spawned `Child` handles in-process so `poll_exit` can `try_wait`.
pub struct ProcessLauncher {
    children: Mutex<HashMap<String, Child>>,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, manifest: &JobManifest, name: &str) -> Result<LaunchedWorker, EngineError> {
        let exe = env::current_exe()
            .map_err(|e| EngineError::new(crate::error::ErrorCode::LaunchFailed, e.to_string()))?;
        let manifest_json = manifest.to_json()?;
        let child = Command::new(exe)
            .arg("worker")
            .env("MANIFEST", manifest_json)
            .env("DB_PATH", &manifest.db_path)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EngineError::new(crate::error::ErrorCode::LaunchFailed, e.to_string()))?;

        self.children.lock().unwrap().insert(name.to_string(), child);
        Ok(LaunchedWorker {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    fn poll_exit(&self, worker: &LaunchedWorker) -> Result<Option<i32>, EngineError> {
        let mut children = self.children.lock().unwrap();
        let Some(child) = children.get_mut(&worker.name) else {
            // Process gone from our registry (already reaped) — treat as exit 0.
            return Ok(Some(0));
        };
        match child.try_wait() {
            Ok(Some(status)) => Ok(Some(status.code().unwrap_or(1))),
            Ok(None) => Ok(None),
            Err(e) => Err(EngineError::new(crate::error::ErrorCode::Fatal, e.to_string())),
        }
    }

    fn remove(&self, worker: &LaunchedWorker) -> Result<(), EngineError> {
        self.children.lock().unwrap().remove(&worker.name);
        Ok(())
    }

    fn list_by_prefix(&self, name_prefix: &str) -> Vec<String> {
        self.children
            .lock()
            .unwrap()
            .keys()
            .filter(|n| n.starts_with(name_prefix))
            .cloned()
            .collect()
    }
}

/// Container-based launcher. Uses a cached self-inspect of `DOCKER_SELF_NAME`
/// (or the hostname, which is the container id under Docker) to discover the
/// image, `/data` volume and network a worker container should inherit.
pub struct DockerLauncher {
    image: String,
    volume_arg: Option<String>,
    network: Option<String>,
}

#[derive(Deserialize)]
struct InspectState {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ExitCode")]
    exit_code: i32,
}

#[derive(Deserialize)]
struct InspectEntry {
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "Config")]
    config: Option<InspectConfig>,
    #[serde(rename = "Mounts")]
    mounts: Option<Vec<InspectMount>>,
    #[serde(rename = "NetworkSettings")]
    network_settings: Option<InspectNetworkSettings>,
}

#[derive(Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image")]
    image: String,
}

#[derive(Deserialize)]
struct InspectMount {
    #[serde(rename = "Destination")]
    destination: String,
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Name")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "Networks")]
    networks: HashMap<String, serde_json::Value>,
}

impl DockerLauncher {
    /// Self-inspect the container named `self_container` to learn the image,
    /// `/data` bind and network a sibling worker should inherit. Falls back
    /// to bare defaults if `docker inspect` is unavailable.
    pub fn self_inspect(self_container: &str, fallback_image: &str) -> Self {
        let Ok(entries) = run_inspect(self_container) else {
            return Self {
                image: fallback_image.to_string(),
                volume_arg: None,
                network: None,
            };
        };
        let Some(entry) = entries.into_iter().next() else {
            return Self {
                image: fallback_image.to_string(),
                volume_arg: None,
                network: None,
            };
        };

        let image = entry
            .config
            .map(|c| c.image)
            .unwrap_or_else(|| fallback_image.to_string());

        let volume_arg = entry.mounts.and_then(|mounts| {
            mounts.into_iter().find(|m| m.destination == "/data").map(|m| {
                let src = m.name.unwrap_or(m.source);
                format!("{src}:/data")
            })
        });

        let network = entry
            .network_settings
            .and_then(|ns| ns.networks.keys().next().cloned());

        Self {
            image,
            volume_arg,
            network,
        }
    }
}

fn run_inspect(name: &str) -> Result<Vec<InspectEntry>, EngineError> {
    let output = Command::new("docker")
        .args(["inspect", name])
        .output()
        .map_err(|e| EngineError::new(crate::error::ErrorCode::LaunchFailed, e.to_string()))?;
    if !output.status.success() {
        return Err(EngineError::new(
            crate::error::ErrorCode::LaunchFailed,
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    serde_json::from_slice(&output.stdout).map_err(|e| EngineError::parse_error(e.to_string()))
}

impl WorkerLauncher for DockerLauncher {
    fn launch(&self, manifest: &JobManifest, name: &str) -> Result<LaunchedWorker, EngineError> {
        let manifest_json = manifest.to_json()?;

        // Remove a stale container with the same name before launch.
        let _ = Command::new("docker").args(["rm", "-f", name]).output();

        let mut cmd = Command::new("docker");
        cmd.args(["run", "-d", "--name", name])
            .args(["-e", &format!("MANIFEST={manifest_json}")])
            .args(["-e", &format!("DB_PATH={}", manifest.db_path)]);
        if let Some(v) = &self.volume_arg {
            cmd.args(["-v", v]);
        }
        if let Some(net) = &self.network {
            cmd.args(["--network", net]);
        }
        cmd.arg(&self.image).args(["worker"]);

        let output = cmd
            .output()
            .map_err(|e| EngineError::new(crate::error::ErrorCode::LaunchFailed, e.to_string()))?;
        if !output.status.success() {
            return Err(EngineError::new(
                crate::error::ErrorCode::LaunchFailed,
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(LaunchedWorker {
            id,
            name: name.to_string(),
        })
    }

    fn poll_exit(&self, worker: &LaunchedWorker) -> Result<Option<i32>, EngineError> {
        match run_inspect(&worker.name) {
            Ok(entries) => match entries.into_iter().next() {
                Some(entry) if entry.state.status == "exited" || entry.state.status == "dead" => {
                    Ok(Some(entry.state.exit_code))
                }
                Some(_) => Ok(None),
                None => Ok(Some(0)),
            },
            // `docker inspect` on a removed container fails — treat as a
            // clean exit, matching a self-removed container.
            Err(_) => Ok(Some(0)),
        }
    }

    fn remove(&self, worker: &LaunchedWorker) -> Result<(), EngineError> {
        let _ = Command::new("docker").args(["rm", "-f", &worker.name]).output();
        Ok(())
    }

    fn list_by_prefix(&self, name_prefix: &str) -> Vec<String> {
        let output = Command::new("docker")
            .args(["ps", "--format", "{{.Names}}"])
            .output();
        let Ok(output) = output else { return vec![] };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|n| n.starts_with(name_prefix))
            .map(|n| n.to_string())
            .collect()
    }
}
