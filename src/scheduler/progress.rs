//! Per-job progress table

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;

/// Lifecycle of one job within its barrier group
///
/// ```text
/// Admitted -> Preparing -> Ready -> Running -> Completed -> Finalized
///                       \-> Failed          \-> Aborted  -/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Admitted,
    Preparing,
    Ready,
    Failed,
    Running,
    Completed,
    Aborted,
    Finalized,
}

impl JobState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Admitted, Preparing)
                | (Admitted, Failed)
                | (Preparing, Ready)
                | (Preparing, Failed)
                | (Ready, Running)
                | (Running, Completed)
                | (Running, Aborted)
                | (Completed, Finalized)
                | (Aborted, Finalized)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Failed | JobState::Finalized)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Admitted => "admitted",
            JobState::Preparing => "preparing",
            JobState::Ready => "ready",
            JobState::Failed => "failed",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Aborted => "aborted",
            JobState::Finalized => "finalized",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    pub group: usize,
    pub state: JobState,
    pub ops: u64,
}

/// Job name to state and ops done; failed jobs are removed
#[derive(Debug, Clone, Default)]
pub struct Progress {
    entries: BTreeMap<String, ProgressEntry>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, name: &str, group: usize) {
        self.entries.insert(
            name.to_string(),
            ProgressEntry {
                group,
                state: JobState::Admitted,
                ops: 0,
            },
        );
    }

    /// Move a job to `state`; returns false for an unknown job or an illegal step
    pub fn advance(&mut self, name: &str, state: JobState) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) if entry.state.can_advance_to(state) => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    /// Drop a job that failed admission
    pub fn fail(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn set_ops(&mut self, name: &str, ops: u64) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.ops = ops;
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProgressEntry> {
        self.entries.get(name)
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.entries.get(name).map(|e| e.state)
    }

    /// Jobs currently in `state`
    pub fn in_state(&self, state: JobState) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per job, ordered by group then name
    pub fn render(&self) -> String {
        let width = self.entries.keys().map(String::len).max().unwrap_or(0).max(4);
        let mut rows: Vec<_> = self.entries.iter().collect();
        rows.sort_by_key(|(name, e)| (e.group, name.as_str()));

        let mut out = String::new();
        for (name, e) in rows {
            let _ = writeln!(
                out,
                "  [{}] {:<w$} {:<10} {:>12} ops",
                e.group + 1,
                name,
                e.state,
                e.ops,
                w = width
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let mut p = Progress::new();
        p.admit("a", 0);
        assert!(p.advance("a", JobState::Preparing));
        assert!(!p.advance("a", JobState::Running));
        assert!(p.advance("a", JobState::Ready));
        assert!(p.advance("a", JobState::Running));
        assert!(p.advance("a", JobState::Aborted));
        assert!(p.advance("a", JobState::Finalized));
        assert!(p.state("a").unwrap().is_terminal());
    }

    #[test]
    fn test_failed_job_removed() {
        let mut p = Progress::new();
        p.admit("a", 0);
        p.admit("b", 0);
        p.advance("a", JobState::Preparing);
        p.fail("a");
        assert_eq!(p.len(), 1);
        assert!(p.get("a").is_none());
        assert!(!p.advance("a", JobState::Ready));
    }

    #[test]
    fn test_render_orders_by_group() {
        let mut p = Progress::new();
        p.admit("zeta", 0);
        p.admit("alpha", 1);
        p.set_ops("zeta", 1500);
        let text = p.render();
        let zeta = text.find("zeta").unwrap();
        let alpha = text.find("alpha").unwrap();
        assert!(zeta < alpha);
        assert!(text.contains("1500 ops"));
        assert!(text.contains("admitted"));
    }

    #[test]
    fn test_in_state() {
        let mut p = Progress::new();
        p.admit("a", 0);
        p.admit("b", 0);
        p.advance("b", JobState::Preparing);
        assert_eq!(p.in_state(JobState::Admitted), vec!["a"]);
        assert_eq!(p.in_state(JobState::Preparing), vec!["b"]);
    }
}
