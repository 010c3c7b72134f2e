use crate::candidate::Candidate;
use crate::error::SourceError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Non-blank input lines as raw bytes. A read error is yielded once and ends
/// the sequence.
pub struct ConfigSource<R> {
    reader: R,
    lines_read: usize,
    done: bool,
}

impl ConfigSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::InputOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> ConfigSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            lines_read: 0,
            done: false,
        }
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }
}

impl<R: BufRead> Iterator for ConfigSource<R> {
    type Item = Result<Candidate, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        while !self.done {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.lines_read += 1;
                    strip_line_ending(&mut buf);
                    if buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(Ok(Candidate::new(self.lines_read, buf)));
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(SourceError::InputRead {
                        line: self.lines_read,
                        source,
                    }));
                }
            }
        }
        None
    }
}

fn strip_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}
