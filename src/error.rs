use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open input {}: {source}", .path.display())]
    InputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error after line {line}: {source}")]
    InputRead {
        line: usize,
        #[source]
        source: io::Error,
    },
}

/// Fatal errors; the run stops when one of these is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("cannot create workspace under {}: {source}", .base.display())]
    WorkspaceCreate {
        base: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create output file {}: {source}", .path.display())]
    OutputCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write output file {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-candidate failures; they become the reason of a `Failed` outcome.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("failed to create config: {0}")]
    Materialize(#[source] io::Error),

    #[error("local SOCKS port {0} is already in use")]
    PortBusy(SocketAddr),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("engine exited early ({status}): {diagnostics}")]
    EarlyExit { status: String, diagnostics: String },

    #[error("connection test failed: {0}")]
    Probe(#[from] ProbeError),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Connect(String),

    #[error("failed to parse ping time: {0}")]
    Parse(String),
}

impl ProbeError {
    pub fn is_timeout_or_connect(&self) -> bool {
        matches!(self, ProbeError::Timeout(_) | ProbeError::Connect(_))
    }
}
