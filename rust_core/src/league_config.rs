//! League configuration: divisions, their search order and token grammars.
//!
//! This module provides:
//! - The configured division list (which is also the fixed search order)
//! - Division lookup for message prefixes
//! - The bracket-placeholder pattern ("<DIVISION> <LETTER>")
//! - The map-token grammar (prefix + alphanumeric/underscore body)

use regex::Regex;

/// Default division names, in search order.
pub const DEFAULT_DIVISIONS: &[&str] = &["Gold", "Silver", "Bronze"];

/// Default map token prefix.
pub const DEFAULT_MAP_PREFIX: &str = "dod_";

/// Division list and token grammar for one league.
#[derive(Debug, Clone)]
pub struct LeagueConfig {
    divisions: Vec<String>,
    map_prefix: String,
    /// None only if the default pattern failed to compile
    map_token_re: Option<Regex>,
}

impl LeagueConfig {
    pub fn new(divisions: Vec<String>, map_prefix: &str) -> Result<Self, regex::Error> {
        let map_prefix = map_prefix.trim().to_lowercase();
        let map_token_re = Regex::new(&format!("^{}[a-z0-9_]+$", regex::escape(&map_prefix)))?;
        let divisions = divisions
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        Ok(Self {
            divisions,
            map_prefix,
            map_token_re: Some(map_token_re),
        })
    }

    /// All divisions in configured search order.
    pub fn divisions(&self) -> &[String] {
        &self.divisions
    }

    pub fn map_prefix(&self) -> &str {
        &self.map_prefix
    }

    /// Canonical division name for a case-insensitive match.
    pub fn get_division(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        self.divisions
            .iter()
            .find(|d| d.eq_ignore_ascii_case(raw))
            .map(|d| d.as_str())
    }

    /// Hinted division first (when valid), then the rest in configured order.
    pub fn search_order(&self, hint: Option<&str>) -> Vec<&str> {
        let hinted = hint.and_then(|h| self.get_division(h));
        let mut order: Vec<&str> = Vec::with_capacity(self.divisions.len());
        if let Some(h) = hinted {
            order.push(h);
        }
        for d in &self.divisions {
            if Some(d.as_str()) != hinted {
                order.push(d);
            }
        }
        order
    }

    /// Whether a cleaned (uppercase) team token is a bracket placeholder
    /// for any division, e.g. "GOLD A".
    pub fn is_placeholder(&self, cleaned: &str) -> bool {
        self.divisions
            .iter()
            .any(|d| Self::matches_placeholder(d, cleaned))
    }

    /// Placeholder check scoped to a single division.
    pub fn is_placeholder_for(&self, division: &str, name: &str) -> bool {
        Self::matches_placeholder(division, &name.trim().to_uppercase())
    }

    fn matches_placeholder(division: &str, cleaned: &str) -> bool {
        let Some((head, tail)) = cleaned.rsplit_once(' ') else {
            return false;
        };
        let mut letters = tail.chars();
        let single_letter = matches!(
            (letters.next(), letters.next()),
            (Some(c), None) if c.is_ascii_alphabetic()
        );
        single_letter && head.trim().eq_ignore_ascii_case(division)
    }

    /// Whether a lowercase token matches the map-token grammar.
    pub fn is_map_token(&self, token: &str) -> bool {
        self.map_token_re
            .as_ref()
            .map_or(false, |re| re.is_match(token))
    }

    /// Token body without the map prefix (lowercased).
    pub fn strip_map_prefix<'a>(&self, token: &'a str) -> &'a str {
        token.strip_prefix(self.map_prefix.as_str()).unwrap_or(token)
    }
}

impl Default for LeagueConfig {
    fn default() -> Self {
        let divisions = DEFAULT_DIVISIONS.iter().map(|d| d.to_string()).collect();
        let map_token_re = Regex::new("^dod_[a-z0-9_]+$").ok();
        Self {
            divisions,
            map_prefix: DEFAULT_MAP_PREFIX.to_string(),
            map_token_re,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_division_case_insensitive() {
        let cfg = LeagueConfig::default();
        assert_eq!(cfg.get_division("gold"), Some("Gold"));
        assert_eq!(cfg.get_division(" SILVER "), Some("Silver"));
        assert_eq!(cfg.get_division("platinum"), None);
    }

    #[test]
    fn test_search_order_with_hint() {
        let cfg = LeagueConfig::default();
        assert_eq!(cfg.search_order(Some("bronze")), vec!["Bronze", "Gold", "Silver"]);
        assert_eq!(cfg.search_order(None), vec!["Gold", "Silver", "Bronze"]);
        assert_eq!(cfg.search_order(Some("nope")), vec!["Gold", "Silver", "Bronze"]);
    }

    #[test]
    fn test_placeholder_pattern() {
        let cfg = LeagueConfig::default();
        assert!(cfg.is_placeholder("GOLD A"));
        assert!(cfg.is_placeholder("BRONZE Z"));
        assert!(!cfg.is_placeholder("GOLD AA"));
        assert!(!cfg.is_placeholder("GOLDEN A"));
        assert!(!cfg.is_placeholder("WICKEDS"));
        assert!(cfg.is_placeholder_for("Silver", "silver b"));
        assert!(!cfg.is_placeholder_for("Gold", "SILVER B"));
    }

    #[test]
    fn test_map_token_grammar() {
        let cfg = LeagueConfig::default();
        assert!(cfg.is_map_token("dod_lennon2"));
        assert!(cfg.is_map_token("dod_flash_b"));
        assert!(!cfg.is_map_token("lennon2"));
        assert!(!cfg.is_map_token("dod_"));
        assert!(!cfg.is_map_token("dod_bad-token"));
    }

    #[test]
    fn test_custom_prefix_is_escaped() {
        let cfg = LeagueConfig::new(vec!["A".into()], "cs.").unwrap();
        assert!(cfg.is_map_token("cs.dust2"));
        assert!(!cfg.is_map_token("csxdust2"));
        assert_eq!(cfg.strip_map_prefix("cs.dust2"), "dust2");
    }
}
