use crate::supervisor::{EngineSpec, Readiness};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "proxyvet.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub probe: ProbeSettings,
    pub workspace: WorkspaceSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub path: String,
    pub args: Vec<String>,
    pub socks_addr: SocketAddr,
    pub startup_grace_ms: u64,
    pub readiness: Readiness,
    pub stop_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let spec = EngineSpec::default();
        Self {
            path: spec.program,
            args: spec.args,
            socks_addr: spec.socks_addr,
            startup_grace_ms: spec.startup_grace.as_millis() as u64,
            readiness: spec.readiness,
            stop_timeout_ms: spec.stop_timeout.as_millis() as u64,
        }
    }
}

impl EngineSettings {
    pub fn spec(&self) -> EngineSpec {
        EngineSpec {
            program: self.path.clone(),
            args: self.args.clone(),
            socks_addr: self.socks_addr,
            startup_grace: Duration::from_millis(self.startup_grace_ms),
            readiness: self.readiness,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Curl,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub kind: ProbeKind,
    pub curl_path: String,
    pub target: String,
    pub timeout_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            kind: ProbeKind::Curl,
            curl_path: "curl".to_string(),
            target: "google.com".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Parent directory of the scoped temp directory.
    pub base_dir: PathBuf,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir(),
        }
    }
}

impl Settings {
    /// Only the implicit default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if !explicit && e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{} not found, using defaults", path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
        };

        Self::parse(&data).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(data)?;
        Ok(settings)
    }
}
