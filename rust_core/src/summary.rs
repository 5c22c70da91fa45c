//! Per-invocation run summary.

use crate::models::MessageId;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// Reasons a message was not reconciled, besides parse failures and
/// reconciler rejections (which carry their own labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Banner,
    OwnMessage,
    UnknownTeam,
    UnresolvedSlot,
    DeadlineReached,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Empty => "empty",
            SkipReason::Banner => "banner",
            SkipReason::OwnMessage => "own_message",
            SkipReason::UnknownTeam => "unknown_team",
            SkipReason::UnresolvedSlot => "unresolved_slot",
            SkipReason::DeadlineReached => "deadline",
        }
    }
}

/// Counts for one poll invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub seen: u64,
    pub parsed: u64,
    pub applied: u64,
    pub new: u64,
    pub edits: u64,
    pub no_change: u64,
    pub forfeits: u64,
    pub skip_same_hash: u64,
    pub dms_sent: u64,
    pub dms_suppressed: u64,
    /// Guidance already sent for the same message content
    pub dms_repeated: u64,
    /// Reason label -> count
    pub skipped: BTreeMap<String, u64>,
    pub backfilled: u64,
    pub stopped_early: bool,
    pub cooled_down: bool,
    pub cursor_before: Option<MessageId>,
    pub cursor_after: Option<MessageId>,
}

impl RunSummary {
    pub fn new(cursor_before: Option<MessageId>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            seen: 0,
            parsed: 0,
            applied: 0,
            new: 0,
            edits: 0,
            no_change: 0,
            forfeits: 0,
            skip_same_hash: 0,
            dms_sent: 0,
            dms_suppressed: 0,
            dms_repeated: 0,
            skipped: BTreeMap::new(),
            backfilled: 0,
            stopped_early: false,
            cooled_down: false,
            cursor_after: cursor_before.clone(),
            cursor_before,
        }
    }

    pub fn skip(&mut self, reason: &str) {
        *self.skipped.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn skip_reason(&mut self, reason: SkipReason) {
        self.skip(reason.as_str());
    }

    pub fn skipped_for(&self, reason: &str) -> u64 {
        self.skipped.get(reason).copied().unwrap_or(0)
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Emit the `[SUMMARY]` line.
    pub fn log(&self) {
        info!("[SUMMARY] {}", self.to_json());
    }
}
