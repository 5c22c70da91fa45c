//! User-facing text: guidance DMs and channel replies.

use crate::models::SlotScores;

/// Why the author of a report is being contacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guidance {
    /// One or both team names are not in the registry
    UnknownTeams {
        map: String,
        /// (name as written, closest canonical names)
        unknown: Vec<(String, Vec<String>)>,
    },
    /// Both teams are known but no slot pairs them on this map
    UnresolvedMatchup {
        map: String,
        team1: String,
        team2: String,
        division_hint: Option<String>,
    },
    AmbiguousAlias {
        alias: String,
        candidates: Vec<String>,
    },
}

impl Guidance {
    /// Stable label used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Guidance::UnknownTeams { .. } => "unknown_team",
            Guidance::UnresolvedMatchup { .. } => "unresolved_slot",
            Guidance::AmbiguousAlias { .. } => "ambiguous_alias",
        }
    }
}

pub fn format_guidance(guidance: &Guidance, original: &str, map_prefix: &str) -> String {
    let mut out = String::new();
    out.push_str("⚠️ I couldn't record your result:\n");
    out.push_str(&format!("> {}\n\n", original.trim()));

    match guidance {
        Guidance::UnknownTeams { map, unknown } => {
            for (raw, suggestions) in unknown {
                let shown = if raw.is_empty() { "(no name)" } else { raw.as_str() };
                out.push_str(&format!("• Team \"{shown}\" is not on the {map} roster."));
                if !suggestions.is_empty() {
                    out.push_str(&format!(" Did you mean {}?", suggestions.join(", ")));
                }
                out.push('\n');
            }
            out.push_str("Use team names exactly as they appear on the schedule.\n");
        }
        Guidance::UnresolvedMatchup {
            map,
            team1,
            team2,
            division_hint,
        } => {
            let division = division_hint
                .as_deref()
                .map(|d| format!(" in {d}"))
                .unwrap_or_default();
            out.push_str(&format!(
                "• No scheduled match between {team1} and {team2} on {map}{division}.\n"
            ));
            out.push_str("Check the map for this week and that both teams are in the same slot.\n");
        }
        Guidance::AmbiguousAlias { alias, candidates } => {
            out.push_str(&format!(
                "• \"{alias}\" could mean {}. Please use the full team name.\n",
                candidates.join(" or ")
            ));
        }
    }

    out.push_str(&format!(
        "Format: `{map_prefix}mapname TeamA 5 > 3 TeamB` (or `TeamA FF > TeamB`)."
    ));
    out
}

/// Channel reply after an edit changed a recorded result.
pub fn format_edit_reply(
    division: &str,
    team1: &str,
    team2: &str,
    before: &SlotScores,
    after: &SlotScores,
) -> String {
    format!(
        "✏️ {division}: {team1} vs {team2} updated, was {}, now {}",
        before.display(),
        after.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_team_guidance_lists_suggestions() {
        let text = format_guidance(
            &Guidance::UnknownTeams {
                map: "dod_lennon2".into(),
                unknown: vec![
                    ("WIKEDS".into(), vec!["WICKEDS".into()]),
                    ("".into(), vec![]),
                ],
            },
            "dod_lennon2 Wikeds 5 > 3",
            "dod_",
        );
        assert!(text.contains("Did you mean WICKEDS?"));
        assert!(text.contains("(no name)"));
        assert!(text.contains("`dod_mapname"));
    }

    #[test]
    fn test_matchup_guidance_mentions_division() {
        let g = Guidance::UnresolvedMatchup {
            map: "dod_x".into(),
            team1: "A".into(),
            team2: "B".into(),
            division_hint: Some("Gold".into()),
        };
        assert_eq!(g.kind(), "unresolved_slot");
        assert!(format_guidance(&g, "x", "dod_").contains("between A and B on dod_x in Gold"));
    }

    #[test]
    fn test_edit_reply() {
        let text = format_edit_reply(
            "Gold",
            "WICKEDS",
            "AVENGERS",
            &SlotScores::from_result(5, 3),
            &SlotScores::from_result(2, 4),
        );
        assert_eq!(text, "✏️ Gold: WICKEDS vs AVENGERS updated, was 5–3, now 2–4");
    }
}
