//! Token cleanup shared by the registry and the line parser.

/// Characters kept inside team names besides letters, digits and spaces.
const NAME_PUNCTUATION: &[char] = &['&', '\'', '.', '_', '-'];

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{2060}' | '\u{FEFF}' | '\u{FE0E}' | '\u{FE0F}' | '\u{00AD}'
    )
}

/// Drop decorative glyphs (emoji, markdown, symbols) and invisible
/// characters, and collapse any whitespace run to a single space.
pub fn strip_decorations(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if is_invisible(c) {
            continue;
        }
        if c.is_whitespace() {
            out.push(' ');
        } else if c.is_alphanumeric() || NAME_PUNCTUATION.contains(&c) {
            out.push(c);
        }
    }
    collapse_whitespace(&out)
}

/// Canonical form for team lookups: decorations stripped, uppercase, trimmed.
pub fn clean_team_token(raw: &str) -> String {
    strip_decorations(raw).to_uppercase()
}

/// Team token without a leading "THE "; falls back to the input if that
/// would leave nothing.
pub fn strip_article(cleaned: &str) -> &str {
    match cleaned.strip_prefix("THE ") {
        Some(rest) if !rest.trim().is_empty() => rest.trim(),
        _ => cleaned,
    }
}

/// Map tokens compare lowercase with surrounding noise removed.
pub fn clean_map_token(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
        .to_lowercase()
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_team_token_strips_glyphs() {
        assert_eq!(clean_team_token("  **Wickeds** 🔥 "), "WICKEDS");
        assert_eq!(clean_team_token("The\u{00A0}Avengers"), "THE AVENGERS");
        assert_eq!(clean_team_token("Ro\u{200B}gues"), "ROGUES");
        assert_eq!(clean_team_token("A&M  Aggies"), "A&M AGGIES");
    }

    #[test]
    fn test_strip_article() {
        assert_eq!(strip_article("THE AVENGERS"), "AVENGERS");
        assert_eq!(strip_article("THE "), "THE ");
        assert_eq!(strip_article("THEORY"), "THEORY");
    }

    #[test]
    fn test_clean_map_token() {
        assert_eq!(clean_map_token("`DOD_Lennon2`"), "dod_lennon2");
        assert_eq!(clean_map_token(" flash_b "), "flash_b");
    }
}
