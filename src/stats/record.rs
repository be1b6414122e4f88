//! Interval record file
//!
//! One CSV-like line per record interval:
//!
//! ```text
//! HH:MM:SS, ops_delta, read_bytes_delta, write_bytes_delta
//! ```
//!
//! Deltas are against the previous line. Clearing stats between barrier
//! groups writes a marker line and restarts the deltas from zero.

use super::WorkerStat;
use chrono::NaiveTime;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const BARRIER_MARKER: &str = "# ---- Barrier request ----";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    ops: u64,
    read_bytes: u64,
    write_bytes: u64,
}

impl Totals {
    fn of(stat: &WorkerStat) -> Self {
        Self {
            ops: stat.total_ops(),
            read_bytes: stat.read.bytes,
            write_bytes: stat.write.bytes,
        }
    }
}

pub struct RecordWriter<W: Write> {
    out: W,
    last: Totals,
}

impl RecordWriter<BufWriter<File>> {
    /// Create (truncate) a record file
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last: Totals::default(),
        }
    }

    /// Append one interval line for the current cumulative stats
    pub fn interval(&mut self, at: NaiveTime, stat: &WorkerStat) -> io::Result<()> {
        let now = Totals::of(stat);
        writeln!(
            self.out,
            "{}, {}, {}, {}",
            at.format("%H:%M:%S"),
            now.ops.saturating_sub(self.last.ops),
            now.read_bytes.saturating_sub(self.last.read_bytes),
            now.write_bytes.saturating_sub(self.last.write_bytes),
        )?;
        self.last = now;
        Ok(())
    }

    /// Mark a stats clear between barrier groups
    pub fn barrier(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", BARRIER_MARKER)?;
        self.last = Totals::default();
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_interval_deltas_and_barrier() {
        let mut w = RecordWriter::new(Vec::new());
        let mut stat = WorkerStat::default();

        for _ in 0..3 {
            stat.record_read(4096, Duration::from_micros(10));
        }
        w.interval(time(9, 5, 1), &stat).unwrap();

        stat.record_write(512, Duration::from_micros(10));
        w.interval(time(9, 5, 2), &stat).unwrap();

        w.barrier().unwrap();
        stat.clear();
        stat.record_write(1024, Duration::from_micros(10));
        w.interval(time(9, 5, 3), &stat).unwrap();

        let text = String::from_utf8(w.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "09:05:01, 3, 12288, 0",
                "09:05:02, 1, 0, 512",
                BARRIER_MARKER,
                "09:05:03, 1, 0, 1024",
            ]
        );
    }

    #[test]
    fn test_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.csv");
        let mut w = RecordWriter::create(&path).unwrap();
        w.barrier().unwrap();
        w.flush().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), BARRIER_MARKER);
    }
}
