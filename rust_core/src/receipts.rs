//! Append-only audit receipts for reconciliation outcomes.
//!
//! One receipt is written for every accepted write and for every explicit
//! no-op (edit or reparse that nets the same score). Receipts are never
//! mutated; the latest one for a (division, row) reflects the last accepted
//! write.

use crate::models::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Outcome tag carried by a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteTag {
    /// First write to the slot
    New,
    /// Changed write over a prior receipt
    Edit,
    /// Edited message that nets the same score
    EditNochange,
    /// Forced reparse that changed the slot
    ReparseApplied,
    /// Forced reparse that matched stored scores
    ReparseNochange,
    /// Forfeit result
    Ff,
    /// Written by the external bye-week job
    ByeAuto,
}

impl NoteTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteTag::New => "NEW",
            NoteTag::Edit => "EDIT",
            NoteTag::EditNochange => "EDIT_NOCHANGE",
            NoteTag::ReparseApplied => "REPARSE_APPLIED",
            NoteTag::ReparseNochange => "REPARSE_NOCHANGE",
            NoteTag::Ff => "FF",
            NoteTag::ByeAuto => "BYE_AUTO",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(NoteTag::New),
            "EDIT" => Some(NoteTag::Edit),
            "EDIT_NOCHANGE" => Some(NoteTag::EditNochange),
            "REPARSE_APPLIED" => Some(NoteTag::ReparseApplied),
            "REPARSE_NOCHANGE" => Some(NoteTag::ReparseNochange),
            "FF" => Some(NoteTag::Ff),
            "BYE_AUTO" => Some(NoteTag::ByeAuto),
            _ => None,
        }
    }

    /// Whether this tag records a slot mutation.
    pub fn mutated(&self) -> bool {
        !matches!(self, NoteTag::EditNochange | NoteTag::ReparseNochange)
    }
}

/// Audit record keyed by (division, row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub timestamp: DateTime<Utc>,
    pub division: String,
    pub row: u32,
    pub map: String,
    pub team1: String,
    pub team2: String,
    pub score1: u32,
    pub score2: u32,
    /// Absent for receipts written by jobs without a source message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    pub note: NoteTag,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl Receipt {
    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Scores as written, oriented to the slot's team order.
    pub fn scores(&self) -> (u32, u32) {
        (self.score1, self.score2)
    }
}

/// Echo a receipt to the log at a level chosen by its tag.
pub fn log_receipt(receipt: &Receipt) {
    let json = receipt.to_json();
    if receipt.note.mutated() {
        info!("[RECEIPT] {}", json);
    } else {
        debug!("[RECEIPT] {}", json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(note: NoteTag) -> Receipt {
        Receipt {
            timestamp: Utc::now(),
            division: "Gold".to_string(),
            row: 12,
            map: "dod_lennon2".to_string(),
            team1: "WICKEDS".to_string(),
            team2: "AVENGERS".to_string(),
            score1: 5,
            score2: 3,
            message_id: MessageId::parse("1001"),
            author_id: Some("42".to_string()),
            note,
            content_hash: "abc".to_string(),
            edited_at: None,
        }
    }

    #[test]
    fn test_receipt_serialization() {
        let json = receipt(NoteTag::EditNochange).to_json();
        assert!(json.contains("\"EDIT_NOCHANGE\""));
        assert!(json.contains("\"1001\""));
        assert!(!json.contains("edited_at"));
    }

    #[test]
    fn test_note_tag_parse_matches_serde_names() {
        for tag in [
            NoteTag::New,
            NoteTag::Edit,
            NoteTag::EditNochange,
            NoteTag::ReparseApplied,
            NoteTag::ReparseNochange,
            NoteTag::Ff,
            NoteTag::ByeAuto,
        ] {
            let json = serde_json::to_string(&tag).unwrap();
            assert_eq!(json, format!("\"{}\"", tag.as_str()));
            assert_eq!(NoteTag::parse(tag.as_str()), Some(tag));
        }
    }

    #[test]
    fn test_nochange_tags_do_not_mutate() {
        assert!(NoteTag::New.mutated());
        assert!(NoteTag::Ff.mutated());
        assert!(!NoteTag::EditNochange.mutated());
        assert!(!NoteTag::ReparseNochange.mutated());
    }
}
