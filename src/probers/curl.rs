use crate::error::ProbeError;
use crate::prober::Prober;
use async_trait::async_trait;
use log::debug;
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const CURL_TIMEOUT_EXIT: i32 = 28;
/// Extra wall time granted to the curl process beyond its own limits.
const PROCESS_SLACK: Duration = Duration::from_secs(1);

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

pub struct CurlProber {
    program: String,
}

impl CurlProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Prober for CurlProber {
    async fn probe(&self, socks: SocketAddr, target: &str, timeout: Duration) -> Result<u64, ProbeError> {
        let mut command = Command::new(&self.program);
        command
            .args(curl_args(socks, target, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|e| ProbeError::Connect(format!("failed to run {}: {}", self.program, e)))?;

        // dropping the future on expiry drops the child, which kills it
        let output = match tokio::time::timeout(timeout + PROCESS_SLACK, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProbeError::Connect(format!("failed to wait for {}: {}", self.program, e))),
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        if !output.status.success() {
            if output.status.code() == Some(CURL_TIMEOUT_EXIT) {
                return Err(ProbeError::Timeout(timeout));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            return Err(ProbeError::Connect(if detail.is_empty() {
                format!("{} {}", self.program, output.status)
            } else {
                format!("{} {}: {}", self.program, output.status, detail)
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("{} reported time_total {:?}", self.program, stdout.trim());
        parse_time_total(&stdout)
    }

    fn name(&self) -> &'static str {
        "curl"
    }
}

fn curl_args(socks: SocketAddr, target: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs_f64().to_string();
    vec![
        "--socks5".to_string(),
        socks.to_string(),
        "--connect-timeout".to_string(),
        secs.clone(),
        "--max-time".to_string(),
        secs,
        "-o".to_string(),
        NULL_DEVICE.to_string(),
        "-s".to_string(),
        "-w".to_string(),
        "%{time_total}".to_string(),
        target.to_string(),
    ]
}

/// Converts curl's decimal seconds into whole milliseconds, truncating.
fn parse_time_total(raw: &str) -> Result<u64, ProbeError> {
    let text = raw.trim();
    let secs: f64 = text
        .parse()
        .map_err(|e| ProbeError::Parse(format!("{:?}: {}", text, e)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ProbeError::Parse(format!("{:?} is not a duration", text)));
    }
    Ok((secs * 1000.0).trunc() as u64)
}
