//! Per-file numeric summaries
//!
//! A data file is a stream of whitespace-separated numbers. The summary
//! keeps running totals so the file is never held in memory: count, sum
//! and sum of squares give the mean and the population standard deviation.

use crate::error::{AnalysisError, ProtocolError};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Read buffer for data files
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Running totals over a sequence of values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    count: u64,
    sum: f64,
    sum_squares: f64,
}

impl Summary {
    /// Add one value
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
    }

    /// Number of values seen
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean, 0 for an empty sequence
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Population standard deviation, 0 for fewer than two values
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let variance = (self.sum_squares - self.sum * self.sum / n) / n;
        // Rounding can push a zero variance slightly negative
        variance.max(0.0).sqrt()
    }
}

/// Summary of one file, as shipped to the collector and printed
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Number of values in the file
    pub count: u64,

    /// Mean of the values
    pub mean: f64,

    /// Population standard deviation of the values
    pub std_dev: f64,

    /// Source file path
    pub path: String,
}

impl ResultRecord {
    /// Build a record from a finished summary
    pub fn from_summary(summary: &Summary, path: &Path) -> Self {
        Self {
            count: summary.count(),
            mean: summary.mean(),
            std_dev: summary.std_dev(),
            path: path.display().to_string(),
        }
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{:.2}\t{:.2}\t{}",
            self.count, self.mean, self.std_dev, self.path
        )
    }
}

impl FromStr for ResultRecord {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidRecord(line.to_string());

        // The path is last and may itself contain tabs
        let mut fields = line.splitn(4, '\t');
        let count = fields.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        let mean = fields.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        let std_dev = fields.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        let path = fields.next().ok_or_else(invalid)?.to_string();

        Ok(Self {
            count,
            mean,
            std_dev,
            path,
        })
    }
}

/// Whitespace-separated tokens pulled from a buffered reader
///
/// Tokens may straddle buffer refills.
struct Tokens<R> {
    reader: R,
    token: Vec<u8>,
}

impl<R: BufRead> Tokens<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            token: Vec::with_capacity(32),
        }
    }

    /// Advance to the next token; false at end of input
    fn advance(&mut self) -> io::Result<bool> {
        self.token.clear();
        loop {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if buf.is_empty() {
                return Ok(!self.token.is_empty());
            }

            let mut used = 0;
            let mut complete = false;
            for &byte in buf {
                used += 1;
                if byte.is_ascii_whitespace() {
                    if !self.token.is_empty() {
                        complete = true;
                        break;
                    }
                } else {
                    self.token.push(byte);
                }
            }
            self.reader.consume(used);

            if complete {
                return Ok(true);
            }
        }
    }

    fn current(&self) -> &[u8] {
        &self.token
    }
}

fn parse_value(token: &[u8]) -> Option<f64> {
    let value: f64 = std::str::from_utf8(token).ok()?.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Summarize every number readable from `reader`
///
/// `path` is only used for error reporting.
pub fn summarize_reader<R: BufRead>(reader: R, path: &Path) -> Result<Summary, AnalysisError> {
    let mut tokens = Tokens::new(reader);
    let mut summary = Summary::default();

    while tokens.advance().map_err(|source| AnalysisError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })? {
        let value = parse_value(tokens.current()).ok_or_else(|| AnalysisError::Malformed {
            path: path.to_path_buf(),
            token: String::from_utf8_lossy(tokens.current()).into_owned(),
        })?;
        summary.add(value);
    }

    Ok(summary)
}

/// Open a data file and compute its record
pub fn analyze_file(path: &Path) -> Result<ResultRecord, AnalysisError> {
    let file = File::open(path).map_err(|source| AnalysisError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let summary = summarize_reader(BufReader::with_capacity(READ_BUFFER_SIZE, file), path)?;
    Ok(ResultRecord::from_summary(&summary, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn summarize(text: &str) -> Result<Summary, AnalysisError> {
        summarize_reader(text.as_bytes(), Path::new("mem.dat"))
    }

    #[test]
    fn test_mean_and_std_dev() {
        let summary = summarize("1 2 3").unwrap();
        assert_eq!(summary.count(), 3);
        assert!((summary.mean() - 2.0).abs() < 1e-12);
        assert!((summary.std_dev() - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let summary = summarize("5 5").unwrap();
        assert_eq!(summary.mean(), 5.0);
        assert_eq!(summary.std_dev(), 0.0);
    }

    #[test]
    fn test_degenerate_counts() {
        let empty = summarize("").unwrap();
        assert_eq!(empty.count(), 0);
        assert_eq!(empty.mean(), 0.0);
        assert_eq!(empty.std_dev(), 0.0);

        let single = summarize("  42.5\n").unwrap();
        assert_eq!(single.count(), 1);
        assert_eq!(single.mean(), 42.5);
        assert_eq!(single.std_dev(), 0.0);
    }

    #[test]
    fn test_mixed_whitespace_and_formats() {
        let summary = summarize("1\t-2.5\n\n3e1\r\n  +4 ").unwrap();
        assert_eq!(summary.count(), 4);
        assert!((summary.mean() - (1.0 - 2.5 + 30.0 + 4.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_tokens_across_buffer_refills() {
        let text = "123.25 456.75 789.5";
        let reader = BufReader::with_capacity(2, text.as_bytes());
        let summary = summarize_reader(reader, Path::new("tiny.dat")).unwrap();
        assert_eq!(summary.count(), 3);
        assert!((summary.mean() - (123.25 + 456.75 + 789.5) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_token_is_fatal() {
        let err = summarize("1 2 three 4").unwrap_err();
        match err {
            AnalysisError::Malformed { token, .. } => assert_eq!(token, "three"),
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            summarize("1 inf").unwrap_err(),
            AnalysisError::Malformed { .. }
        ));
    }

    #[test]
    fn test_record_format() {
        let summary = summarize("1 2 3").unwrap();
        let record = ResultRecord::from_summary(&summary, Path::new("dir/a.dat"));
        assert_eq!(record.to_string(), "3\t2.00\t0.82\tdir/a.dat");
    }

    #[test]
    fn test_record_parse() {
        let record: ResultRecord = "2\t5.00\t0.00\t/data/odd\tname.dat".parse().unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.mean, 5.0);
        assert_eq!(record.path, "/data/odd\tname.dat");
        assert_eq!(record.to_string(), "2\t5.00\t0.00\t/data/odd\tname.dat");

        assert!("2\t5.00".parse::<ResultRecord>().is_err());
        assert!("x\t5.00\t0.00\tp".parse::<ResultRecord>().is_err());
    }

    #[test]
    fn test_analyze_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.dat");
        fs::write(&path, "5 5\n").unwrap();

        let record = analyze_file(&path).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.mean, 5.0);
        assert_eq!(record.std_dev, 0.0);
        assert_eq!(record.path, path.display().to_string());

        let missing = dir.path().join("missing.dat");
        assert!(matches!(
            analyze_file(&missing).unwrap_err(),
            AnalysisError::OpenFailed { .. }
        ));
    }
}
