use std::fmt;

/// Payloads longer than this are shortened in progress output.
pub const DISPLAY_WIDTH: usize = 50;

/// One configuration under test, the bytes of an input line without its
/// line ending. Payloads need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// 1-based physical line number, blank lines included.
    pub line: usize,
    pub raw: Vec<u8>,
}

impl Candidate {
    pub fn new(line: usize, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            line,
            raw: raw.into(),
        }
    }

    pub fn preview(&self) -> String {
        truncate_for_display(&String::from_utf8_lossy(&self.raw), DISPLAY_WIDTH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Working { latency_ms: u64 },
    Failed { reason: String },
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Working { latency_ms } => write!(f, "working ({} ms)", latency_ms),
            Verdict::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub candidate: Candidate,
    pub verdict: Verdict,
}

impl TrialOutcome {
    pub fn working(candidate: Candidate, latency_ms: u64) -> Self {
        Self {
            candidate,
            verdict: Verdict::Working { latency_ms },
        }
    }

    pub fn failed(candidate: Candidate, reason: impl Into<String>) -> Self {
        Self {
            candidate,
            verdict: Verdict::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_working(&self) -> bool {
        matches!(self.verdict, Verdict::Working { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self.verdict {
            Verdict::Working { latency_ms } => Some(latency_ms),
            Verdict::Failed { .. } => None,
        }
    }
}

impl fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} - {}", self.candidate.line, self.candidate.preview(), self.verdict)
    }
}

/// Shortens `s` to at most `max` characters, ending in `...` when cut.
pub fn truncate_for_display(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
