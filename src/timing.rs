//! Wall-clock checkpoints and the summary log.
//!
//! Four checkpoints: start, pre-maintenance, post-maintenance, end. The two
//! middle ones bracket vacuumdb. When maintenance never ran (check mode) the
//! maintenance duration is reported as zero and the pre-maintenance duration
//! equals the total.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct TimingRecord {
    start: DateTime<Local>,
    pre_maintenance: Option<DateTime<Local>>,
    post_maintenance: Option<DateTime<Local>>,
    end: Option<DateTime<Local>>,
}

/// Derived durations in whole seconds, never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSummary {
    pub total_secs: u64,
    pub pre_maintenance_secs: u64,
    pub maintenance_secs: u64,
}

impl TimingRecord {
    pub fn start() -> Self {
        Self::starting_at(Local::now())
    }

    pub fn starting_at(start: DateTime<Local>) -> Self {
        Self {
            start,
            pre_maintenance: None,
            post_maintenance: None,
            end: None,
        }
    }

    pub fn mark_pre_maintenance(&mut self) {
        self.mark_pre_maintenance_at(Local::now());
    }

    pub fn mark_pre_maintenance_at(&mut self, at: DateTime<Local>) {
        self.pre_maintenance = Some(at);
    }

    pub fn mark_post_maintenance(&mut self) {
        self.mark_post_maintenance_at(Local::now());
    }

    pub fn mark_post_maintenance_at(&mut self, at: DateTime<Local>) {
        self.post_maintenance = Some(at);
    }

    pub fn finish(&mut self) {
        self.finish_at(Local::now());
    }

    pub fn finish_at(&mut self, at: DateTime<Local>) {
        self.end = Some(at);
    }

    /// True once both maintenance checkpoints were recorded
    pub fn maintenance_ran(&self) -> bool {
        self.pre_maintenance.is_some() && self.post_maintenance.is_some()
    }

    /// Durations up to `end` (or now, if the run has not finished)
    pub fn summary(&self) -> TimingSummary {
        let end = self.end.unwrap_or_else(Local::now);
        let total_secs = seconds_between(self.start, end);
        match (self.pre_maintenance, self.post_maintenance) {
            (Some(pre), Some(post)) => TimingSummary {
                total_secs,
                pre_maintenance_secs: seconds_between(self.start, pre).min(total_secs),
                maintenance_secs: seconds_between(pre, post).min(total_secs),
            },
            _ => TimingSummary {
                total_secs,
                pre_maintenance_secs: total_secs,
                maintenance_secs: 0,
            },
        }
    }

    /// Fixed-format report written to the summary log
    pub fn render(&self) -> String {
        let summary = self.summary();
        let end = self.end.unwrap_or_else(Local::now);
        let mut out = String::new();
        out.push_str("pg_upgrade summary\n");
        out.push_str("==================\n");
        out.push_str(&format!(
            "Started:                 {}\n",
            self.start.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!(
            "Finished:                {}\n",
            end.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push('\n');
        out.push_str(&format!(
            "Total time:              {}\n",
            format_elapsed(summary.total_secs)
        ));
        out.push_str(&format!(
            "Time before maintenance: {}\n",
            format_elapsed(summary.pre_maintenance_secs)
        ));
        out.push_str(&format!(
            "Maintenance time:        {}\n",
            format_elapsed(summary.maintenance_secs)
        ));
        out
    }

    /// Write the report, replacing any previous one
    pub fn write_report(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn seconds_between(from: DateTime<Local>, to: DateTime<Local>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}

/// "5 minutes 12 seconds (312s)"
pub fn format_elapsed(secs: u64) -> String {
    format!("{} minutes {} seconds ({}s)", secs / 60, secs % 60, secs)
}
