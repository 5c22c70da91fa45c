//! League registry: canonical teams and maps plus alias tables.
//!
//! This module provides:
//! - Team resolution with placeholder and ambiguity detection
//! - Map resolution with tiered alias precedence
//! - A versioned cache with explicit invalidate/reload
//!
//! Resolution always runs against one `RegistrySnapshot`, so a message sees
//! a consistent view even if the cache is reloaded meanwhile.

pub mod normalize;
pub mod source;

pub use source::{FileRegistrySource, RegistrySource, RegistrySourceProvider, StaticRegistrySource};

use crate::league_config::LeagueConfig;
use crate::models::TeamResolution;
use crate::store::ScheduleStore;
use anyhow::Result;
use normalize::{clean_map_token, clean_team_token, strip_article};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

/// Minimum similarity for a canonical name to be offered as a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.80;

/// Immutable registry tables built from one load of the sources.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    version: u64,
    league: LeagueConfig,
    allow_unknown_maps: bool,
    /// Canonical division -> canonical team names
    teams_by_division: BTreeMap<String, BTreeSet<String>>,
    /// Alias -> canonical team names
    team_aliases: HashMap<String, BTreeSet<String>>,
    /// Alias -> canonical map token
    map_aliases: HashMap<String, String>,
}

impl RegistrySnapshot {
    /// Build tables from a registry source and the map tokens found in the
    /// schedule's block headers.
    pub fn build(
        version: u64,
        league: &LeagueConfig,
        allow_unknown_maps: bool,
        source: &RegistrySource,
        schedule_maps: &[String],
    ) -> Self {
        let mut teams_by_division: BTreeMap<String, BTreeSet<String>> = league
            .divisions()
            .iter()
            .map(|d| (d.clone(), BTreeSet::new()))
            .collect();

        for (division, teams) in &source.divisions {
            let Some(canonical) = league.get_division(division) else {
                warn!("Registry lists unknown division {:?}; skipping its roster", division);
                continue;
            };
            let roster = teams_by_division.entry(canonical.to_string()).or_default();
            for team in teams {
                let cleaned = clean_team_token(team);
                if !cleaned.is_empty() {
                    roster.insert(cleaned);
                }
            }
        }

        let all_teams: BTreeSet<String> = teams_by_division.values().flatten().cloned().collect();

        let mut team_aliases: HashMap<String, BTreeSet<String>> = HashMap::new();
        for team in &all_teams {
            let bare = strip_article(team);
            if bare != team.as_str() {
                team_aliases
                    .entry(bare.to_string())
                    .or_default()
                    .insert(team.clone());
            }
        }
        for (alias, targets) in &source.team_aliases {
            let alias = clean_team_token(alias);
            if alias.is_empty() {
                continue;
            }
            for target in targets {
                let target = clean_team_token(target);
                if all_teams.contains(&target) {
                    team_aliases.entry(alias.clone()).or_default().insert(target);
                } else {
                    warn!("Alias {:?} points at unknown team {:?}; ignoring", alias, target);
                }
            }
        }

        let map_aliases = build_map_aliases(league, source, schedule_maps);

        let ambiguous = team_aliases.values().filter(|v| v.len() > 1).count();
        info!(
            "Registry v{} built: {} teams, {} team aliases ({} ambiguous), {} map aliases",
            version,
            all_teams.len(),
            team_aliases.len(),
            ambiguous,
            map_aliases.len()
        );

        Self {
            version,
            league: league.clone(),
            allow_unknown_maps,
            teams_by_division,
            team_aliases,
            map_aliases,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn league(&self) -> &LeagueConfig {
        &self.league
    }

    /// Resolve a raw team token.
    pub fn resolve_team(&self, raw: &str) -> TeamResolution {
        let cleaned = clean_team_token(raw);
        if self.league.is_placeholder(&cleaned) {
            return TeamResolution::Placeholder(cleaned);
        }

        let bare = strip_article(&cleaned);
        if self.is_known_team(&cleaned) {
            return TeamResolution::Canonical(cleaned);
        }
        if self.is_known_team(bare) {
            return TeamResolution::Canonical(bare.to_string());
        }

        for key in [bare, cleaned.as_str()] {
            if let Some(targets) = self.team_aliases.get(key) {
                if targets.len() == 1 {
                    if let Some(only) = targets.iter().next() {
                        return TeamResolution::Canonical(only.clone());
                    }
                }
                debug!("Ambiguous alias {:?} -> {:?}", key, targets);
                return TeamResolution::Ambiguous {
                    alias: key.to_string(),
                    candidates: targets.iter().cloned().collect(),
                };
            }
        }

        TeamResolution::Unresolved(cleaned)
    }

    /// Resolve a raw map token to its canonical form.
    pub fn resolve_map(&self, raw: &str) -> Option<String> {
        let token = clean_map_token(raw);
        if token.is_empty() {
            return None;
        }
        let body = self.league.strip_map_prefix(&token);
        let prefixed = format!("{}{}", self.league.map_prefix(), body);

        for key in [token.as_str(), body, prefixed.as_str()] {
            if let Some(canonical) = self.map_aliases.get(key) {
                return Some(canonical.clone());
            }
        }

        if self.allow_unknown_maps && self.league.is_map_token(&token) {
            debug!("Accepting provisional map token {}", token);
            return Some(token);
        }
        None
    }

    /// Whether a cleaned name is a canonical team in any division.
    pub fn is_known_team(&self, name: &str) -> bool {
        self.teams_by_division.values().any(|t| t.contains(name))
    }

    pub fn teams_in_division(&self, division: &str) -> Option<&BTreeSet<String>> {
        self.league
            .get_division(division)
            .and_then(|d| self.teams_by_division.get(d))
    }

    /// Closest canonical names to an unresolved token, best first.
    pub fn suggest_teams(&self, raw: &str, limit: usize) -> Vec<String> {
        let cleaned = clean_team_token(raw);
        if cleaned.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(f64, &String)> = self
            .teams_by_division
            .values()
            .flatten()
            .map(|team| (jaro_winkler(&cleaned, team), team))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.dedup_by(|a, b| a.1 == b.1);
        scored
            .into_iter()
            .take(limit)
            .map(|(_, team)| team.clone())
            .collect()
    }
}

/// Map alias table with precedence: division-derived canon, then admin
/// overrides, then the global fallback list. Earlier tiers are never
/// overwritten. Within the division tier base tokens claim shared keys
/// before their suffixed variants.
fn build_map_aliases(
    league: &LeagueConfig,
    source: &RegistrySource,
    schedule_maps: &[String],
) -> HashMap<String, String> {
    let mut aliases: HashMap<String, String> = HashMap::new();

    let mut division_tokens: Vec<String> = schedule_maps
        .iter()
        .map(|t| clean_map_token(t))
        .filter(|t| !t.is_empty())
        .collect();
    // Stable sort keeps sheet order within each group
    division_tokens.sort_by_key(|t| base_token(league, t).is_some());
    for token in &division_tokens {
        register_map_token(league, &mut aliases, token);
    }

    for (alias, target) in &source.map_overrides {
        let alias = clean_map_token(alias);
        let target = clean_map_token(target);
        if alias.is_empty() || target.is_empty() {
            continue;
        }
        aliases.entry(target.clone()).or_insert_with(|| target.clone());
        let body = league.strip_map_prefix(&alias).to_string();
        aliases.entry(alias).or_insert_with(|| target.clone());
        aliases.entry(body).or_insert(target);
    }

    for token in &source.fallback_maps {
        let token = clean_map_token(token);
        if !token.is_empty() {
            register_map_token(league, &mut aliases, &token);
        }
    }

    aliases
}

fn register_map_token(league: &LeagueConfig, aliases: &mut HashMap<String, String>, token: &str) {
    let body = league.strip_map_prefix(token);
    let mut keys = vec![token.to_string(), body.to_string()];
    if let Some(base) = base_token(league, token) {
        let base_body = league.strip_map_prefix(&base).to_string();
        keys.push(base);
        keys.push(base_body);
    }
    for key in keys {
        if !key.is_empty() {
            aliases.entry(key).or_insert_with(|| token.to_string());
        }
    }
}

/// "dod_flash_b" -> Some("dod_flash"); tokens without a suffix -> None.
fn base_token(league: &LeagueConfig, token: &str) -> Option<String> {
    let body = league.strip_map_prefix(token);
    let (base, suffix) = body.split_once('_')?;
    if base.is_empty() || suffix.is_empty() {
        return None;
    }
    let prefix = if token.len() > body.len() {
        league.map_prefix()
    } else {
        ""
    };
    Some(format!("{prefix}{base}"))
}

// ============================================================================
// Versioned cache
// ============================================================================

/// Process-wide registry cache with an explicit invalidate/reload lifecycle.
pub struct RegistryCache {
    league: LeagueConfig,
    allow_unknown_maps: bool,
    source: Arc<dyn RegistrySourceProvider>,
    schedule: Arc<dyn ScheduleStore>,
    current: RwLock<Option<Arc<RegistrySnapshot>>>,
    version: AtomicU64,
}

impl RegistryCache {
    pub fn new(
        league: LeagueConfig,
        allow_unknown_maps: bool,
        source: Arc<dyn RegistrySourceProvider>,
        schedule: Arc<dyn ScheduleStore>,
    ) -> Self {
        Self {
            league,
            allow_unknown_maps,
            source,
            schedule,
            current: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Current snapshot, building one if the cache is empty.
    pub async fn snapshot(&self) -> Result<Arc<RegistrySnapshot>> {
        let cached = self.current.read().clone();
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }
        self.reload().await
    }

    /// Rebuild from the sources and swap the snapshot in one step.
    pub async fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        let source = self.source.load_source().await?;
        let schedule_maps = self.schedule.map_tokens().await?;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(RegistrySnapshot::build(
            version,
            &self.league,
            self.allow_unknown_maps,
            &source,
            &schedule_maps,
        ));
        *self.current.write() = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop the cached snapshot; the next `snapshot()` rebuilds.
    pub fn invalidate(&self) {
        *self.current.write() = None;
        debug!("Registry cache invalidated");
    }

    /// Version of the most recently built snapshot (0 before the first build).
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn source() -> RegistrySource {
        let mut src = RegistrySource::default();
        src.divisions.insert(
            "Gold".into(),
            vec!["Wickeds".into(), "Avengers".into(), "The Rogues".into()],
        );
        src.divisions
            .insert("silver".into(), vec!["Saints".into(), "Sinners".into()]);
        src.team_aliases.insert("Wick".into(), vec!["WICKEDS".into()]);
        src.team_aliases
            .insert("S".into(), vec!["SAINTS".into(), "SINNERS".into()]);
        src.map_overrides.insert("lennon".into(), "dod_lennon2".into());
        src.map_overrides.insert("flash".into(), "dod_custom".into());
        src.fallback_maps = vec!["dod_anzio".into(), "dod_flash".into()];
        src
    }

    fn snapshot() -> RegistrySnapshot {
        let maps = vec![
            "dod_flash_b".to_string(),
            "dod_flash".to_string(),
            "dod_lennon2".to_string(),
        ];
        RegistrySnapshot::build(1, &LeagueConfig::default(), false, &source(), &maps)
    }

    #[test]
    fn test_exact_canonical_match() {
        let reg = snapshot();
        assert_eq!(
            reg.resolve_team("  wickeds ✨"),
            TeamResolution::Canonical("WICKEDS".into())
        );
        assert_eq!(
            reg.resolve_team("Saints"),
            TeamResolution::Canonical("SAINTS".into())
        );
    }

    #[test]
    fn test_article_handling() {
        let reg = snapshot();
        assert_eq!(
            reg.resolve_team("the rogues"),
            TeamResolution::Canonical("THE ROGUES".into())
        );
        assert_eq!(
            reg.resolve_team("Rogues"),
            TeamResolution::Canonical("THE ROGUES".into())
        );
        assert_eq!(
            reg.resolve_team("The Wickeds"),
            TeamResolution::Canonical("WICKEDS".into())
        );
    }

    #[test]
    fn test_alias_single_and_ambiguous() {
        let reg = snapshot();
        assert_eq!(
            reg.resolve_team("wick"),
            TeamResolution::Canonical("WICKEDS".into())
        );
        match reg.resolve_team("s") {
            TeamResolution::Ambiguous { alias, candidates } => {
                assert_eq!(alias, "S");
                assert_eq!(candidates, vec!["SAINTS".to_string(), "SINNERS".to_string()]);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_and_unresolved() {
        let reg = snapshot();
        assert_eq!(
            reg.resolve_team("Gold A"),
            TeamResolution::Placeholder("GOLD A".into())
        );
        assert_eq!(
            reg.resolve_team("Nobodies"),
            TeamResolution::Unresolved("NOBODIES".into())
        );
        assert_eq!(reg.resolve_team("🔥"), TeamResolution::Unresolved(String::new()));
    }

    #[test]
    fn test_map_resolution_precedence() {
        let reg = snapshot();
        // Division canon beats the fallback list for the same key
        assert_eq!(reg.resolve_map("flash").as_deref(), Some("dod_flash"));
        // Base token preferred over suffixed variant
        assert_eq!(reg.resolve_map("dod_flash").as_deref(), Some("dod_flash"));
        assert_eq!(reg.resolve_map("flash_b").as_deref(), Some("dod_flash_b"));
        // Admin override
        assert_eq!(reg.resolve_map("LENNON").as_deref(), Some("dod_lennon2"));
        // Fallback list
        assert_eq!(reg.resolve_map("dod_anzio").as_deref(), Some("dod_anzio"));
        assert_eq!(reg.resolve_map("anzio").as_deref(), Some("dod_anzio"));
        assert_eq!(reg.resolve_map("dod_unknown"), None);
    }

    #[test]
    fn test_unknown_maps_when_permitted() {
        let reg =
            RegistrySnapshot::build(1, &LeagueConfig::default(), true, &source(), &[]);
        assert_eq!(reg.resolve_map("dod_newmap").as_deref(), Some("dod_newmap"));
        assert_eq!(reg.resolve_map("newmap"), None);
    }

    #[test]
    fn test_suggestions() {
        let reg = snapshot();
        let suggestions = reg.suggest_teams("Wickeds!", 3);
        assert_eq!(suggestions.first().map(|s| s.as_str()), Some("WICKEDS"));
        assert!(reg.suggest_teams("zzzz", 3).is_empty());
    }

    #[tokio::test]
    async fn test_cache_reload_bumps_version() {
        let cache = RegistryCache::new(
            LeagueConfig::default(),
            false,
            Arc::new(StaticRegistrySource::new(source())),
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(cache.version(), 0);

        let first = cache.snapshot().await.unwrap();
        let again = cache.snapshot().await.unwrap();
        assert_eq!(first.version(), 1);
        assert!(Arc::ptr_eq(&first, &again));

        cache.invalidate();
        let rebuilt = cache.snapshot().await.unwrap();
        assert_eq!(rebuilt.version(), 2);
        // Old snapshot stays usable for an in-flight resolution
        assert_eq!(
            first.resolve_team("wick"),
            TeamResolution::Canonical("WICKEDS".into())
        );
    }
}
