//! Live activity strip
//!
//! One fixed-width row per registered job. Each cell covers an equal slice
//! of the job's address space and shows the most recent op that landed in
//! it: `r` read, `w` write, `0` slow (either direction).

use crate::access::IoDirection;
use std::time::Duration;

/// Cells per row
pub const ACTIVITY_WIDTH: usize = 64;

/// Ops slower than this are shown as `0`
pub const SLOW_OP_THRESHOLD: Duration = Duration::from_millis(100);

const IDLE_CELL: u8 = b'.';

#[derive(Debug, Clone)]
struct ActivityRow {
    job: String,
    total_size: u64,
    cells: [u8; ACTIVITY_WIDTH],
}

/// Rows indexed by histogram slot
#[derive(Debug, Clone, Default)]
pub struct ActivityMap {
    rows: Vec<Option<ActivityRow>>,
}

impl ActivityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `slot` to a job and its address-space size
    pub fn register(&mut self, slot: usize, job: &str, total_size: u64) {
        if self.rows.len() <= slot {
            self.rows.resize(slot + 1, None);
        }
        self.rows[slot] = Some(ActivityRow {
            job: job.to_string(),
            total_size: total_size.max(1),
            cells: [IDLE_CELL; ACTIVITY_WIDTH],
        });
    }

    /// Mark the cell for `offset`; unregistered slots are ignored
    pub fn mark(&mut self, slot: usize, offset: u64, direction: IoDirection, latency: Duration) {
        let Some(Some(row)) = self.rows.get_mut(slot) else {
            return;
        };
        let cell = ((offset as u128 * ACTIVITY_WIDTH as u128) / row.total_size as u128) as usize;
        let cell = cell.min(ACTIVITY_WIDTH - 1);
        row.cells[cell] = if latency > SLOW_OP_THRESHOLD {
            b'0'
        } else {
            match direction {
                IoDirection::Read => b'r',
                IoDirection::Write => b'w',
                IoDirection::Idle => return,
            }
        };
    }

    /// Blank every row, keeping registrations
    pub fn clear(&mut self) {
        for row in self.rows.iter_mut().flatten() {
            row.cells = [IDLE_CELL; ACTIVITY_WIDTH];
        }
    }

    pub fn row(&self, slot: usize) -> Option<String> {
        self.rows
            .get(slot)
            .and_then(Option::as_ref)
            .map(|r| String::from_utf8_lossy(&r.cells).into_owned())
    }

    /// One line per registered job
    pub fn render(&self) -> String {
        let width = self
            .rows
            .iter()
            .flatten()
            .map(|r| r.job.len())
            .max()
            .unwrap_or(0);
        self.rows
            .iter()
            .flatten()
            .map(|r| {
                format!(
                    "{:<w$} [{}]\n",
                    r.job,
                    String::from_utf8_lossy(&r.cells),
                    w = width
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_cells() {
        let mut map = ActivityMap::new();
        map.register(1, "mixed", 64 * 4096);

        map.mark(1, 0, IoDirection::Read, Duration::from_micros(50));
        map.mark(1, 4096 * 10, IoDirection::Write, Duration::from_micros(50));
        map.mark(1, 4096 * 63, IoDirection::Read, Duration::from_millis(150));

        let row = map.row(1).unwrap();
        assert_eq!(row.len(), ACTIVITY_WIDTH);
        assert_eq!(row.as_bytes()[0], b'r');
        assert_eq!(row.as_bytes()[10], b'w');
        assert_eq!(row.as_bytes()[63], b'0');
        assert_eq!(row.as_bytes()[5], b'.');
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut map = ActivityMap::new();
        map.register(0, "j", 1024);
        map.mark(0, 0, IoDirection::Write, SLOW_OP_THRESHOLD);
        assert_eq!(map.row(0).unwrap().as_bytes()[0], b'w');
    }

    #[test]
    fn test_unregistered_slot_ignored() {
        let mut map = ActivityMap::new();
        map.mark(4, 0, IoDirection::Read, Duration::ZERO);
        assert!(map.row(4).is_none());
        assert!(map.render().is_empty());
    }

    #[test]
    fn test_clear_and_render() {
        let mut map = ActivityMap::new();
        map.register(0, "a", 1 << 20);
        map.register(2, "longer", 1 << 20);
        map.mark(0, 0, IoDirection::Read, Duration::ZERO);
        map.clear();

        let text = map.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("a      ["));
        assert!(!lines[0].contains('r'));
    }
}
