//! Reconciler: validate a resolved report against its slot and apply it.
//!
//! Every accepted outcome appends exactly one receipt. A slot is mutated at
//! most once per call, in one batched write, and never when the stored
//! scores already match (unless no receipt exists yet for the slot).

use crate::league_config::LeagueConfig;
use crate::models::{MessageId, ResolvedCandidate, ScheduleSlot, SlotField, SlotScores};
use crate::receipts::{log_receipt, NoteTag, Receipt};
use crate::resolver::SlotTarget;
use crate::store::{ReceiptLog, ScheduleStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a report was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    AmbiguousAlias,
    RowTeamMismatch,
    PlaceholderToken,
    Protected,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AmbiguousAlias => "ambiguous_alias",
            RejectReason::RowTeamMismatch => "row_team_mismatch",
            RejectReason::PlaceholderToken => "placeholder_token",
            RejectReason::Protected => "protected",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source message details recorded on the receipt.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub message_id: Option<MessageId>,
    pub author_id: Option<String>,
    pub content_hash: String,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Accepted reconciliation.
#[derive(Debug, Clone)]
pub struct Applied {
    /// Slot cells were written
    pub applied_new: bool,
    /// Stored scores already matched; receipt only
    pub no_change: bool,
    pub tag: NoteTag,
    pub prior_receipt: Option<Receipt>,
    pub prior_scores: SlotScores,
    pub new_scores: SlotScores,
    pub receipt: Receipt,
}

#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied(Box<Applied>),
    Rejected(RejectReason),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

pub struct Reconciler {
    schedule: Arc<dyn ScheduleStore>,
    receipts: Arc<dyn ReceiptLog>,
    league: LeagueConfig,
    force_reparse: bool,
}

impl Reconciler {
    pub fn new(
        schedule: Arc<dyn ScheduleStore>,
        receipts: Arc<dyn ReceiptLog>,
        league: LeagueConfig,
        force_reparse: bool,
    ) -> Self {
        Self {
            schedule,
            receipts,
            league,
            force_reparse,
        }
    }

    pub fn force_reparse(&self) -> bool {
        self.force_reparse
    }

    /// Validate and apply one report to its target slot.
    ///
    /// Rejections are values, not errors; `Err` means the store failed.
    pub async fn apply(
        &self,
        target: &SlotTarget,
        candidate: &ResolvedCandidate,
        ctx: &MessageContext,
    ) -> Result<ApplyOutcome> {
        // 1. Ambiguous aliases never write
        let (Some(left), Some(right)) = (candidate.left.name(), candidate.right.name()) else {
            return Ok(self.reject(target, RejectReason::AmbiguousAlias));
        };

        // 2. Reported pair must be the slot's pair, in either order
        let Some(slot) = self.schedule.read_slot(&target.division, target.row).await? else {
            return Ok(self.reject(target, RejectReason::RowTeamMismatch));
        };
        let swapped = match side_mapping(&slot, left, right) {
            Some(swapped) => swapped,
            None => return Ok(self.reject(target, RejectReason::RowTeamMismatch)),
        };

        // 3. Bracket placeholders are reserved
        if candidate.left.is_placeholder()
            || candidate.right.is_placeholder()
            || self.league.is_placeholder_for(&target.division, left)
            || self.league.is_placeholder_for(&target.division, right)
        {
            return Ok(self.reject(target, RejectReason::PlaceholderToken));
        }

        // 4. Orient scores to the slot's team order
        let parsed = &candidate.parsed;
        let (score1, score2) = if swapped {
            (parsed.score2, parsed.score1)
        } else {
            (parsed.score1, parsed.score2)
        };
        let new_scores = SlotScores::from_result(score1, score2);

        // 5. Prior state, read before any mutation
        let prior_receipt = self
            .receipts
            .latest_for_slot(&target.division, target.row)
            .await?;
        let prior_scores = slot.scores;

        // 6. Manual protection is a fail-closed lock
        if self
            .schedule
            .is_protected(&target.division, target.row, &SlotField::ALL)
            .await?
        {
            return Ok(self.reject(target, RejectReason::Protected));
        }

        let unchanged = prior_scores.same_scores(&new_scores);

        // 7-8. Receipt only
        let nochange_tag = if self.force_reparse && unchanged {
            Some(NoteTag::ReparseNochange)
        } else if !self.force_reparse && unchanged && prior_receipt.is_some() {
            Some(NoteTag::EditNochange)
        } else {
            None
        };

        let (tag, applied_new, no_change) = match nochange_tag {
            Some(tag) => (tag, false, true),
            None => {
                // 9. One batched write
                self.schedule
                    .write_result(&target.division, target.row, new_scores)
                    .await?;
                let tag = if parsed.forfeit {
                    NoteTag::Ff
                } else if self.force_reparse {
                    NoteTag::ReparseApplied
                } else if prior_receipt.is_some() {
                    NoteTag::Edit
                } else {
                    NoteTag::New
                };
                (tag, true, false)
            }
        };

        let receipt = Receipt {
            timestamp: Utc::now(),
            division: target.division.clone(),
            row: target.row,
            map: target.map.clone(),
            team1: slot.team1.trim().to_uppercase(),
            team2: slot.team2.trim().to_uppercase(),
            score1,
            score2,
            message_id: ctx.message_id.clone(),
            author_id: ctx.author_id.clone(),
            note: tag,
            content_hash: ctx.content_hash.clone(),
            edited_at: ctx.edited_at,
        };
        self.receipts.append(receipt.clone()).await?;
        log_receipt(&receipt);

        if applied_new {
            info!(
                "{} row {}: {} {} - {} {} ({}, was {})",
                target.division,
                target.row,
                receipt.team1,
                score1,
                score2,
                receipt.team2,
                tag.as_str(),
                prior_scores.display()
            );
        } else {
            debug!(
                "{} row {} already {}; {} receipt only",
                target.division,
                target.row,
                new_scores.display(),
                tag.as_str()
            );
        }

        Ok(ApplyOutcome::Applied(Box::new(Applied {
            applied_new,
            no_change,
            tag,
            prior_receipt,
            prior_scores,
            new_scores,
            receipt,
        })))
    }

    fn reject(&self, target: &SlotTarget, reason: RejectReason) -> ApplyOutcome {
        warn!(
            "Rejected report for {} row {} on {}: {}",
            target.division, target.row, target.map, reason
        );
        ApplyOutcome::Rejected(reason)
    }
}

/// `Some(swapped)` when the reported pair is the slot's pair.
fn side_mapping(slot: &ScheduleSlot, left: &str, right: &str) -> Option<bool> {
    let t1 = slot.team1.trim();
    let t2 = slot.team2.trim();
    if t1.eq_ignore_ascii_case(left) && t2.eq_ignore_ascii_case(right) {
        Some(false)
    } else if t1.eq_ignore_ascii_case(right) && t2.eq_ignore_ascii_case(left) {
        Some(true)
    } else {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
