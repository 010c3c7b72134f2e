use crate::candidate::TrialOutcome;
use crate::error::PipelineError;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const OUTPUT_PREFIX: &str = "working_";

/// `dir/working_<name>` next to the input file.
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut name = OsString::from(OUTPUT_PREFIX);
    if let Some(base) = input.file_name() {
        name.push(base);
    }
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Physical input lines consumed, blank ones included.
    pub lines_read: usize,
    pub tested: usize,
    pub working: usize,
    pub output: PathBuf,
}

pub struct ResultAggregator {
    path: PathBuf,
    writer: BufWriter<File>,
    tested: usize,
    working: usize,
}

impl ResultAggregator {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        let file = File::create(path).map_err(|source| PipelineError::OutputCreate {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            tested: 0,
            working: 0,
        })
    }

    pub fn record(&mut self, outcome: &TrialOutcome) -> Result<(), PipelineError> {
        self.tested += 1;
        if !outcome.is_working() {
            return Ok(());
        }
        self.writer
            .write_all(&outcome.candidate.raw)
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|source| PipelineError::OutputWrite {
                path: self.path.clone(),
                source,
            })?;
        self.working += 1;
        Ok(())
    }

    pub fn finish(mut self, lines_read: usize) -> Result<Summary, PipelineError> {
        self.writer.flush().map_err(|source| PipelineError::OutputWrite {
            path: self.path.clone(),
            source,
        })?;
        Ok(Summary {
            lines_read,
            tested: self.tested,
            working: self.working,
            output: self.path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use std::fs;

    #[test]
    fn output_name_is_prefixed_in_same_dir() {
        assert_eq!(
            output_path_for(Path::new("/data/configs.txt")),
            PathBuf::from("/data/working_configs.txt")
        );
        assert_eq!(output_path_for(Path::new("configs.txt")), PathBuf::from("working_configs.txt"));
    }

    #[test]
    fn only_working_lines_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("working_in.txt");
        let mut agg = ResultAggregator::create(&path).unwrap();

        agg.record(&TrialOutcome::working(Candidate::new(1, "A"), 10)).unwrap();
        agg.record(&TrialOutcome::failed(Candidate::new(2, "B"), "refused")).unwrap();
        agg.record(&TrialOutcome::working(Candidate::new(4, " A "), 12)).unwrap();

        let summary = agg.finish(4).unwrap();
        assert_eq!(summary.tested, 3);
        assert_eq!(summary.working, 2);
        assert_eq!(summary.lines_read, 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), "A\n A \n");
    }

    #[test]
    fn binary_payloads_are_written_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("working_in.txt");
        let mut agg = ResultAggregator::create(&path).unwrap();
        agg.record(&TrialOutcome::working(Candidate::new(1, b"good-\xff\xfe".to_vec()), 5))
            .unwrap();
        agg.finish(1).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"good-\xff\xfe\n");
    }

    #[test]
    fn previous_results_are_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("working_in.txt");
        fs::write(&path, "stale\n").unwrap();
        ResultAggregator::create(&path).unwrap().finish(0).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn uncreatable_output_is_fatal() {
        let err = ResultAggregator::create(Path::new("/nonexistent/dir/working_x.txt"))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::OutputCreate { .. }));
    }
}
