//! Line parser for free-form score reports.
//!
//! Grammar, left to right:
//!   [Division]: <map> <side> <op> <side>
//!
//! - The division prefix is optional (`[Gold]:` or `Gold:`)
//! - `<map>` is the first word, resolved through the registry
//! - `<op>` is the first of `>`, `<`, `-`, `:` in the remainder
//! - Each `<side>` is a team name plus a score, or a forfeit keyword
//!
//! Grammar failures come back as `ParseError`; they are expected input and
//! never abort a batch.

use crate::league_config::LeagueConfig;
use crate::models::{Operator, ParsedCandidate, SideReport};
use crate::registry::normalize::{clean_map_token, collapse_whitespace, strip_decorations};
use crate::registry::RegistrySnapshot;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest digit run accepted as a score.
const MAX_SCORE_DIGITS: usize = 4;

const FORFEIT_WORDS: &[&str] = &["ff", "forfeit"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("no map token")]
    MissingMap,
    #[error("unknown map token: {0}")]
    UnknownMap(String),
    #[error("no comparison operator")]
    NoOperator,
    #[error("missing numeric score")]
    MissingScore,
}

impl ParseError {
    /// Stable label used in run summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseError::Empty => "empty",
            ParseError::MissingMap => "missing_map",
            ParseError::UnknownMap(_) => "unknown_map",
            ParseError::NoOperator => "no_operator",
            ParseError::MissingScore => "missing_score",
        }
    }
}

/// Parse one message into a score candidate.
pub fn parse(text: &str, registry: &RegistrySnapshot) -> Result<ParsedCandidate, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let (division_hint, body) = split_division_prefix(text, registry.league());

    let (map_word, remainder) = split_first_word(body);
    let token = clean_map_token(map_word);
    if token.is_empty() {
        return Err(ParseError::MissingMap);
    }
    let map = registry
        .resolve_map(&token)
        .ok_or_else(|| ParseError::UnknownMap(token.clone()))?;

    let (op_index, operator) = remainder
        .char_indices()
        .find_map(|(i, c)| Operator::from_char(c).map(|op| (i, op)))
        .ok_or(ParseError::NoOperator)?;
    let left = parse_side(&remainder[..op_index]);
    let right = parse_side(&remainder[op_index + operator.as_char().len_utf8()..]);

    let (score1, score2, forfeit_note) = match (left.forfeit, right.forfeit) {
        (true, true) => (0, 0, Some("double forfeit".to_string())),
        (true, false) => (
            0,
            right.score.unwrap_or(1),
            Some(format!("forfeit by {}", left.team_raw)),
        ),
        (false, true) => (
            left.score.unwrap_or(1),
            0,
            Some(format!("forfeit by {}", right.team_raw)),
        ),
        (false, false) => match (left.score, right.score) {
            (Some(a), Some(b)) => (a, b, None),
            _ => return Err(ParseError::MissingScore),
        },
    };

    let forfeit = left.forfeit || right.forfeit;
    let double_forfeit = left.forfeit && right.forfeit;
    let operator_mismatch = !forfeit && operator.contradicts(score1, score2);

    if double_forfeit {
        warn!("Both sides forfeited in {:?}; scoring 0-0", text);
    }
    if operator_mismatch {
        warn!(
            "Operator '{}' contradicts scores {}-{} in {:?}; keeping scores",
            operator.as_char(),
            score1,
            score2,
            text
        );
    }
    debug!(
        "Parsed {:?}: map={} {:?} {}-{} {:?}",
        text, map, division_hint, score1, score2, forfeit_note
    );

    Ok(ParsedCandidate {
        division_hint,
        map,
        left,
        right,
        operator,
        score1,
        score2,
        forfeit,
        forfeit_note,
        double_forfeit,
        operator_mismatch,
    })
}

/// Consume an optional `[Division]:` or `Division:` prefix.
fn split_division_prefix<'a>(text: &'a str, league: &LeagueConfig) -> (Option<String>, &'a str) {
    if let Some(inner) = text.strip_prefix('[') {
        if let Some((name, after)) = inner.split_once(']') {
            if let Some(division) = league.get_division(name) {
                let after = after.trim_start();
                let after = after.strip_prefix(':').unwrap_or(after);
                return (Some(division.to_string()), after.trim());
            }
        }
        return (None, text);
    }

    if let Some((name, after)) = text.split_once(':') {
        if let Some(division) = league.get_division(name) {
            return (Some(division.to_string()), after.trim());
        }
    }
    (None, text)
}

fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    }
}

fn is_forfeit_word(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric());
    FORFEIT_WORDS.iter().any(|f| word.eq_ignore_ascii_case(f))
}

fn is_score_word(word: &str) -> bool {
    (1..=MAX_SCORE_DIGITS).contains(&word.len()) && word.bytes().all(|b| b.is_ascii_digit())
}

/// Byte range of the first maximal ASCII digit run of acceptable length.
fn first_digit_run(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start <= MAX_SCORE_DIGITS {
                return Some((start, i));
            }
        } else {
            i += 1;
        }
    }
    None
}

fn parse_side(raw: &str) -> SideReport {
    let cleaned = strip_decorations(raw);
    let words: Vec<&str> = cleaned.split(' ').filter(|w| !w.is_empty()).collect();

    if words.iter().any(|w| is_forfeit_word(w)) {
        let team: Vec<&str> = words.iter().copied().filter(|w| !is_forfeit_word(w)).collect();
        return SideReport {
            team_raw: team.join(" "),
            score: None,
            forfeit: true,
        };
    }

    // A standalone number wins over digits glued to a team name
    if let Some(pos) = words.iter().position(|w| is_score_word(w)) {
        let team: Vec<&str> = words
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != pos)
            .map(|(_, w)| *w)
            .collect();
        return SideReport {
            team_raw: team.join(" "),
            score: words[pos].parse().ok(),
            forfeit: false,
        };
    }

    if let Some((start, end)) = first_digit_run(&cleaned) {
        let team = format!("{}{}", &cleaned[..start], &cleaned[end..]);
        return SideReport {
            team_raw: collapse_whitespace(&team),
            score: cleaned[start..end].parse().ok(),
            forfeit: false,
        };
    }

    SideReport {
        team_raw: cleaned,
        score: None,
        forfeit: false,
    }
}

// ============================================================================
// Tests
// ============================================================================
