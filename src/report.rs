use crate::aggregate::Summary;
use crate::candidate::{Candidate, TrialOutcome, Verdict};

/// Receives pipeline progress as it happens.
pub trait Reporter {
    fn started(&mut self) {}
    fn testing(&mut self, candidate: &Candidate);
    fn finished(&mut self, outcome: &TrialOutcome);
    fn summary(&mut self, summary: &Summary);
}

/// Human-readable progress on stdout.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

const RULE: &str = "==================================";

impl Reporter for ConsoleReporter {
    fn started(&mut self) {
        println!("Starting proxy config ping test...");
        println!("{}", RULE);
    }

    fn testing(&mut self, candidate: &Candidate) {
        println!("[{}] Testing config: {}", candidate.line, candidate.preview());
    }

    fn finished(&mut self, outcome: &TrialOutcome) {
        match &outcome.verdict {
            Verdict::Working { latency_ms } => println!("    ✅ Working! Ping: {} ms", latency_ms),
            Verdict::Failed { reason } => println!("    ❌ Failed: {}", reason),
        }
    }

    fn summary(&mut self, summary: &Summary) {
        println!("{}", RULE);
        println!(
            "Testing complete: {} configs tested ({} lines read), {} working configs",
            summary.tested, summary.lines_read, summary.working
        );
        println!("Working configs saved to: {}", summary.output.display());
    }
}

