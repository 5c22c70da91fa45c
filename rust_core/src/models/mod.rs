//! Shared data model for chat score reports, schedule slots and receipts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Chat messages
// ============================================================================

/// Opaque, monotonically ordered chat message identifier.
///
/// The transport encodes identifiers as unsigned decimal strings that can be
/// wider than 64 bits, so ordering is done on the digit string itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Validate and wrap a decimal identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn significant(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.significant();
        let b = other.significant();
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MessageId::parse(&value).ok_or_else(|| format!("invalid message id: {value:?}"))
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// A chat message as observed from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Most recent activity on the message (edit time if edited).
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.edited_at.unwrap_or(self.created_at)
    }
}

// ============================================================================
// Parsed score reports
// ============================================================================

/// Comparison operator written between the two sides of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Greater,
    Less,
    Dash,
    Colon,
}

impl Operator {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '>' => Some(Operator::Greater),
            '<' => Some(Operator::Less),
            '-' => Some(Operator::Dash),
            ':' => Some(Operator::Colon),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Operator::Greater => '>',
            Operator::Less => '<',
            Operator::Dash => '-',
            Operator::Colon => ':',
        }
    }

    /// Whether the numeric scores contradict a directional operator.
    pub fn contradicts(&self, left: u32, right: u32) -> bool {
        match self {
            Operator::Greater => left <= right,
            Operator::Less => left >= right,
            Operator::Dash | Operator::Colon => false,
        }
    }
}

/// One side of a report as written by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideReport {
    pub team_raw: String,
    pub score: Option<u32>,
    pub forfeit: bool,
}

/// Structured candidate produced from one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCandidate {
    /// Canonical division name when the message carried a prefix
    pub division_hint: Option<String>,
    /// Canonical map token
    pub map: String,
    pub left: SideReport,
    pub right: SideReport,
    pub operator: Operator,
    /// Effective left score after forfeit defaults
    pub score1: u32,
    /// Effective right score after forfeit defaults
    pub score2: u32,
    pub forfeit: bool,
    pub forfeit_note: Option<String>,
    /// Both sides reported a forfeit (scored 0-0)
    pub double_forfeit: bool,
    /// Operator disagrees with the numeric scores
    pub operator_mismatch: bool,
}

/// Result of resolving a raw team token against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamResolution {
    Canonical(String),
    /// Bracket-seeding slot name such as "GOLD A"; never scored
    Placeholder(String),
    Ambiguous { alias: String, candidates: Vec<String> },
    Unresolved(String),
}

impl TeamResolution {
    /// Name usable for slot matching. Ambiguous aliases have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            TeamResolution::Canonical(name)
            | TeamResolution::Placeholder(name)
            | TeamResolution::Unresolved(name) => Some(name),
            TeamResolution::Ambiguous { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, TeamResolution::Placeholder(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TeamResolution::Ambiguous { .. })
    }
}

/// Candidate whose team tokens went through the registry.
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    pub parsed: ParsedCandidate,
    pub left: TeamResolution,
    pub right: TeamResolution,
}

// ============================================================================
// Schedule
// ============================================================================

/// Win/loss flag stored per side of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "L")]
    Loss,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "W",
            Outcome::Loss => "L",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "W" => Some(Outcome::Win),
            "L" => Some(Outcome::Loss),
            _ => None,
        }
    }
}

/// Mutable result fields of a slot, oriented to the slot's team order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotScores {
    pub outcome1: Option<Outcome>,
    pub outcome2: Option<Outcome>,
    pub score1: Option<u32>,
    pub score2: Option<u32>,
}

impl SlotScores {
    /// Flags and scores for a final result; ties leave both flags empty.
    pub fn from_result(score1: u32, score2: u32) -> Self {
        let (outcome1, outcome2) = match score1.cmp(&score2) {
            Ordering::Greater => (Some(Outcome::Win), Some(Outcome::Loss)),
            Ordering::Less => (Some(Outcome::Loss), Some(Outcome::Win)),
            Ordering::Equal => (None, None),
        };
        Self {
            outcome1,
            outcome2,
            score1: Some(score1),
            score2: Some(score2),
        }
    }

    pub fn same_scores(&self, other: &SlotScores) -> bool {
        self.score1.is_some()
            && self.score2.is_some()
            && self.score1 == other.score1
            && self.score2 == other.score2
    }

    pub fn display(&self) -> String {
        match (self.score1, self.score2) {
            (Some(a), Some(b)) => format!("{a}–{b}"),
            _ => "unplayed".to_string(),
        }
    }
}

/// Field of a slot mutated by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Outcome1,
    Outcome2,
    Score1,
    Score2,
}

impl SlotField {
    pub const ALL: [SlotField; 4] = [
        SlotField::Outcome1,
        SlotField::Outcome2,
        SlotField::Score1,
        SlotField::Score2,
    ];
}

/// One scheduled matchup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    /// Row identity, unique within the division
    pub row: u32,
    pub team1: String,
    pub team2: String,
    #[serde(default)]
    pub scores: SlotScores,
}

impl ScheduleSlot {
    /// Order-agnostic pairing check against canonical names.
    pub fn pairs_with(&self, a: &str, b: &str) -> bool {
        let t1 = self.team1.trim();
        let t2 = self.team2.trim();
        (t1.eq_ignore_ascii_case(a) && t2.eq_ignore_ascii_case(b))
            || (t1.eq_ignore_ascii_case(b) && t2.eq_ignore_ascii_case(a))
    }
}

/// Weekly group of slots under one map header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBlock {
    pub division: String,
    pub index: usize,
    pub map_token: String,
    /// None when the header carries no parseable date
    pub week_date: Option<NaiveDate>,
    pub slots: Vec<ScheduleSlot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> MessageId {
        MessageId::parse(raw).unwrap()
    }

    #[test]
    fn test_message_id_big_integer_ordering() {
        // Past 2^53 a float comparison would collapse these
        assert!(id("9007199254740993") > id("9007199254740992"));
        assert!(id("1234567890123456789012") > id("999999999999999999999"));
        assert!(id("10") > id("9"));
        assert_eq!(id("0042").cmp(&id("42")), Ordering::Equal);
    }

    #[test]
    fn test_message_id_rejects_non_digits() {
        assert!(MessageId::parse("").is_none());
        assert!(MessageId::parse("12a").is_none());
        assert!(MessageId::parse("1.5e3").is_none());
        assert_eq!(MessageId::parse(" 77 ").unwrap().as_str(), "77");
    }

    #[test]
    fn test_message_id_serde_roundtrip_validates() {
        let parsed: MessageId = serde_json::from_str("\"1200\"").unwrap();
        assert_eq!(parsed, id("1200"));
        assert!(serde_json::from_str::<MessageId>("\"abc\"").is_err());
    }

    #[test]
    fn test_slot_scores_from_result() {
        let s = SlotScores::from_result(5, 3);
        assert_eq!(s.outcome1, Some(Outcome::Win));
        assert_eq!(s.outcome2, Some(Outcome::Loss));

        let tie = SlotScores::from_result(2, 2);
        assert_eq!(tie.outcome1, None);
        assert_eq!(tie.outcome2, None);
        assert_eq!(tie.score1, Some(2));
    }

    #[test]
    fn test_same_scores_requires_stored_values() {
        let empty = SlotScores::default();
        let computed = SlotScores::from_result(0, 0);
        assert!(!empty.same_scores(&computed));
        assert!(computed.same_scores(&SlotScores::from_result(0, 0)));
    }

    #[test]
    fn test_pairs_with_is_order_agnostic() {
        let slot = ScheduleSlot {
            row: 4,
            team1: "WICKEDS".to_string(),
            team2: "AVENGERS".to_string(),
            scores: SlotScores::default(),
        };
        assert!(slot.pairs_with("WICKEDS", "AVENGERS"));
        assert!(slot.pairs_with("AVENGERS", "WICKEDS"));
        assert!(!slot.pairs_with("WICKEDS", "WICKEDS"));
    }

    #[test]
    fn test_operator_contradiction() {
        assert!(Operator::Greater.contradicts(3, 5));
        assert!(!Operator::Greater.contradicts(5, 3));
        assert!(Operator::Less.contradicts(5, 3));
        assert!(!Operator::Dash.contradicts(0, 9));
    }
}
