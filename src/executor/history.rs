//! Build history with retention
//!
//! Finished runs are archived newest-last. The build discarder prunes by age
//! first (records older than `days_to_keep` go regardless of count), then
//! keeps only the newest `num_to_keep`.

use crate::pipeline::{BuildDiscarder, RunStatus, TriggerFacts};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Archived summary of one finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Build number
    pub build_number: u64,
    /// Terminal status
    pub status: RunStatus,
    /// Selected stage, if any
    pub stage: Option<String>,
    /// Trigger the run was evaluated with
    pub trigger: TriggerFacts,
    /// When the run was created
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal status
    pub finished_at: DateTime<Utc>,
    /// Bounded tail of the console log
    pub log_tail: Vec<String>,
}

/// Archive of finished runs, oldest first
#[derive(Debug, Clone, Default)]
pub struct BuildHistory {
    records: VecDeque<RunRecord>,
}

impl BuildHistory {
    /// Creates an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and applies retention, returning the pruned builds
    pub fn archive(
        &mut self,
        record: RunRecord,
        discarder: Option<&BuildDiscarder>,
        now: DateTime<Utc>,
    ) -> Vec<RunRecord> {
        self.records.push_back(record);
        let Some(discarder) = discarder else {
            return Vec::new();
        };

        let mut pruned = Vec::new();

        if let Some(days) = discarder.days_to_keep {
            let cutoff = now - Duration::days(i64::from(days));
            let (keep, old): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.records)
                .into_iter()
                .partition(|r| r.finished_at >= cutoff);
            self.records = keep;
            pruned.extend(old);
        }

        if let Some(max) = discarder.num_to_keep {
            while self.records.len() > max {
                if let Some(oldest) = self.records.pop_front() {
                    pruned.push(oldest);
                }
            }
        }

        pruned
    }

    /// Number of retained records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retained records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter()
    }

    /// Most recent record
    #[must_use]
    pub fn latest(&self) -> Option<&RunRecord> {
        self.records.back()
    }

    /// Record of a specific build
    #[must_use]
    pub fn get(&self, build_number: u64) -> Option<&RunRecord> {
        self.records.iter().find(|r| r.build_number == build_number)
    }

    /// Build numbers of retained records, oldest first
    #[must_use]
    pub fn build_numbers(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.build_number).collect()
    }
}
