//! One engine process per trial, bound to the single SOCKS [`PortSlot`].

use crate::error::TrialError;
use log::{debug, info, warn};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

const DIAGNOSTICS_CAP: usize = 64 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_CHECK_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Fixed,
    /// Until the port accepts a connection or the grace period runs out.
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    EarlyExited,
    Running,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::NotStarted => write!(f, "not-started"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::EarlyExited => write!(f, "early-exited"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub program: String,
    /// Arguments placed before the config path.
    pub args: Vec<String>,
    pub socks_addr: SocketAddr,
    pub startup_grace: Duration,
    pub readiness: Readiness,
    pub stop_timeout: Duration,
}

impl Default for EngineSpec {
    fn default() -> Self {
        Self {
            program: "xray".to_string(),
            args: vec!["-c".to_string()],
            socks_addr: SocketAddr::from(([127, 0, 0, 1], 1080)),
            startup_grace: Duration::from_secs(1),
            readiness: Readiness::Fixed,
            stop_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct PortSlot {
    addr: SocketAddr,
}

impl PortSlot {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn lease(&mut self) -> PortLease<'_> {
        PortLease { slot: self }
    }
}

/// Exclusive use of the [`PortSlot`] for the duration of one trial.
#[derive(Debug)]
pub struct PortLease<'a> {
    slot: &'a mut PortSlot,
}

impl PortLease<'_> {
    pub fn addr(&self) -> SocketAddr {
        self.slot.addr
    }
}

pub struct Supervisor {
    spec: EngineSpec,
}

impl Supervisor {
    pub fn new(spec: EngineSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    pub async fn start<'a>(
        &self,
        config: &Path,
        lease: PortLease<'a>,
    ) -> Result<ProxyProcess<'a>, TrialError> {
        let addr = lease.addr();
        if accepts_connections(addr).await {
            return Err(TrialError::PortBusy(addr));
        }

        debug!("engine {}: {} -> {}", config.display(), EngineState::NotStarted, EngineState::Starting);
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own group, so a terminal Ctrl-C reaches only us and the current
        // trial can still be stopped in order
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(|source| TrialError::Spawn {
            program: self.spec.program.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        let started_at = Instant::now();
        let diagnostics = child.stderr.take().map(|stderr| tokio::spawn(capture(stderr)));

        let exited = match self.spec.readiness {
            Readiness::Fixed => {
                tokio::time::sleep(self.spec.startup_grace).await;
                self.check_exit(&mut child)?
            }
            Readiness::Poll => self.poll_ready(&mut child, addr, started_at).await?,
        };

        if let Some(status) = exited {
            debug!("engine pid {}: {} -> {}", pid, EngineState::Starting, EngineState::EarlyExited);
            let diagnostics = drain(diagnostics).await;
            return Err(TrialError::EarlyExit {
                status: status.to_string(),
                diagnostics: if diagnostics.is_empty() {
                    "<no diagnostics>".to_string()
                } else {
                    diagnostics
                },
            });
        }

        debug!("engine pid {}: {} -> {}", pid, EngineState::Starting, EngineState::Running);
        Ok(ProxyProcess {
            child,
            pid,
            started_at,
            diagnostics,
            lease,
            state: EngineState::Running,
            stop_timeout: self.spec.stop_timeout,
        })
    }

    fn check_exit(&self, child: &mut Child) -> Result<Option<ExitStatus>, TrialError> {
        child.try_wait().map_err(|source| TrialError::Spawn {
            program: self.spec.program.clone(),
            source,
        })
    }

    async fn poll_ready(
        &self,
        child: &mut Child,
        addr: SocketAddr,
        started_at: Instant,
    ) -> Result<Option<ExitStatus>, TrialError> {
        let deadline = started_at + self.spec.startup_grace;
        loop {
            if let Some(status) = self.check_exit(child)? {
                return Ok(Some(status));
            }
            if accepts_connections(addr).await {
                debug!("engine ready on {} after {:?}", addr, started_at.elapsed());
                return Ok(None);
            }
            if Instant::now() >= deadline {
                // still alive; let the probe decide
                return self.check_exit(child);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// A live engine process. Must be finished with [`ProxyProcess::stop`];
/// dropping it instead kills the child without waiting.
pub struct ProxyProcess<'a> {
    child: Child,
    pid: u32,
    started_at: Instant,
    diagnostics: Option<JoinHandle<String>>,
    lease: PortLease<'a>,
    state: EngineState,
    stop_timeout: Duration,
}

impl ProxyProcess<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn socks_addr(&self) -> SocketAddr {
        self.lease.addr()
    }

    /// SIGTERM, then kill after `stop_timeout`, then wait for the port.
    pub async fn stop(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("engine pid {} already exited ({})", self.pid, status),
            _ => self.terminate().await,
        }

        let diagnostics = drain(self.diagnostics.take()).await;
        if !diagnostics.is_empty() {
            debug!("engine pid {} stderr: {}", self.pid, diagnostics.trim_end());
        }

        let addr = self.lease.addr();
        if !wait_port_released(addr, self.stop_timeout).await {
            warn!("SOCKS port {} still accepting connections after engine pid {} stopped", addr, self.pid);
        }

        info!("engine pid {} stopped after {:?}", self.pid, self.started_at.elapsed());
        self.state = EngineState::Stopped;
    }

    async fn terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            signal_group(self.pid, Signal::SIGTERM);
            match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("engine pid {} exited on SIGTERM ({})", self.pid, status);
                    return;
                }
                Ok(Err(e)) => warn!("waiting for engine pid {} failed: {}", self.pid, e),
                Err(_) => warn!("engine pid {} ignored SIGTERM for {:?}, killing", self.pid, self.stop_timeout),
            }
            signal_group(self.pid, Signal::SIGKILL);
        }

        match tokio::time::timeout(self.stop_timeout, self.child.kill()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to kill engine pid {}: {}", self.pid, e),
            Err(_) => warn!("engine pid {} did not exit after kill", self.pid),
        }
    }
}

impl Drop for ProxyProcess<'_> {
    fn drop(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            debug!("kill on drop for engine pid {}: {}", self.pid, e);
        }
        if let Some(task) = self.diagnostics.take() {
            task.abort();
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if killpg(Pid::from_raw(raw), signal).is_ok() {
        return;
    }
    if let Err(e) = kill(Pid::from_raw(raw), signal) {
        debug!("{:?} to engine pid {} failed: {}", signal, pid, e);
    }
}

async fn capture<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = DIAGNOSTICS_CAP.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).trim().to_string()
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

async fn accepts_connections(addr: SocketAddr) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_CHECK_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

async fn wait_port_released(addr: SocketAddr, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if !accepts_connections(addr).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tokio::net::TcpListener;

    fn free_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    /// Runs `sh <script> <config>` so no freshly written file is exec'd.
    fn script_spec(dir: &Path, body: &str, addr: SocketAddr) -> EngineSpec {
        let script = dir.join("engine.sh");
        fs::write(&script, body).unwrap();
        EngineSpec {
            program: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            socks_addr: addr,
            startup_grace: Duration::from_millis(300),
            readiness: Readiness::Fixed,
            stop_timeout: Duration::from_millis(500),
        }
    }

    fn is_alive(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn early_exit_reports_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let spec = script_spec(dir.path(), "echo 'bad outbound' >&2\nexit 3\n", addr);
        let supervisor = Supervisor::new(spec);
        let mut slot = PortSlot::new(addr);

        let err = supervisor
            .start(&dir.path().join("config.json"), slot.lease())
            .await
            .err()
            .unwrap();
        match err {
            TrialError::EarlyExit { diagnostics, .. } => assert_eq!(diagnostics, "bad outbound"),
            other => panic!("expected early exit, got {}", other),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let mut spec = EngineSpec::default();
        spec.program = "proxyvet-no-such-engine-12345".to_string();
        spec.socks_addr = free_addr();
        let mut slot = PortSlot::new(spec.socks_addr);
        let supervisor = Supervisor::new(spec);

        let err = supervisor
            .start(Path::new("/tmp/none.json"), slot.lease())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TrialError::Spawn { .. }));
    }

    #[tokio::test]
    async fn running_engine_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let spec = script_spec(dir.path(), "exec sleep 30\n", addr);
        let supervisor = Supervisor::new(spec);
        let mut slot = PortSlot::new(addr);

        let process = supervisor
            .start(&dir.path().join("config.json"), slot.lease())
            .await
            .unwrap();
        assert_eq!(process.state(), EngineState::Running);
        let pid = process.pid();
        assert!(is_alive(pid));

        let started = Instant::now();
        process.stop().await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn engine_leads_its_own_process_group() {
        use nix::unistd::{getpgid, getpgrp, Pid};

        let dir = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let spec = script_spec(dir.path(), "exec sleep 30\n", addr);
        let supervisor = Supervisor::new(spec);
        let mut slot = PortSlot::new(addr);

        let process = supervisor
            .start(&dir.path().join("config.json"), slot.lease())
            .await
            .unwrap();
        let pid = Pid::from_raw(process.pid() as i32);
        assert_eq!(getpgid(Some(pid)).unwrap(), pid);
        assert_ne!(getpgid(Some(pid)).unwrap(), getpgrp());
        process.stop().await;
    }

    #[tokio::test]
    async fn stubborn_engine_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let spec = script_spec(dir.path(), "trap '' TERM\nwhile true; do sleep 1; done\n", addr);
        let supervisor = Supervisor::new(spec);
        let mut slot = PortSlot::new(addr);

        let process = supervisor
            .start(&dir.path().join("config.json"), slot.lease())
            .await
            .unwrap();
        let pid = process.pid();
        process.stop().await;
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn busy_port_fails_before_spawn() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let spec = script_spec(dir.path(), "exec sleep 30\n", addr);
        let supervisor = Supervisor::new(spec);
        let mut slot = PortSlot::new(addr);

        let err = supervisor
            .start(&dir.path().join("config.json"), slot.lease())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TrialError::PortBusy(a) if a == addr));
    }

    #[tokio::test]
    async fn poll_readiness_returns_once_alive_past_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let mut spec = script_spec(dir.path(), "exec sleep 30\n", addr);
        spec.readiness = Readiness::Poll;
        spec.startup_grace = Duration::from_millis(200);
        let supervisor = Supervisor::new(spec);
        let mut slot = PortSlot::new(addr);

        let process = supervisor
            .start(&dir.path().join("config.json"), slot.lease())
            .await
            .unwrap();
        assert_eq!(process.socks_addr(), addr);
        process.stop().await;
    }
}
