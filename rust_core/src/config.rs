//! Configuration for the reconciliation engine and poll loop

use crate::league_config::{LeagueConfig, DEFAULT_DIVISIONS, DEFAULT_MAP_PREFIX};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

/// Upper bound the chat transport accepts for one page.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // League
    pub league: LeagueConfig,
    pub allow_unknown_maps: bool,

    // Fetching
    pub page_size: usize,
    /// Run a backfill fetch every Nth invocation (0 disables)
    pub backfill_every_n: u64,
    pub backfill_window: Duration,
    pub backfill_max: usize,
    pub fetch_jitter_max_ms: u64,
    pub quota_cooldown: Duration,

    // Run budget
    pub max_messages_per_run: usize,
    pub time_budget: Duration,
    pub safety_margin: Duration,

    // Reconciliation
    pub force_reparse: bool,

    // Message filtering and feedback
    pub banner_markers: Vec<String>,
    pub success_reactions: Vec<String>,
    pub nochange_reaction: Option<String>,
    pub post_edit_replies: bool,
    pub bot_user_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            league: LeagueConfig::default(),
            allow_unknown_maps: false,
            page_size: MAX_PAGE_SIZE,
            backfill_every_n: 5,
            backfill_window: Duration::from_secs(360 * 60),
            backfill_max: 25,
            fetch_jitter_max_ms: 750,
            quota_cooldown: Duration::from_secs(120),
            max_messages_per_run: 200,
            time_budget: Duration::from_secs(280),
            safety_margin: Duration::from_secs(20),
            force_reparse: false,
            banner_markers: vec!["📣".to_string(), "🏆 WEEK".to_string()],
            success_reactions: vec!["✅".to_string()],
            nochange_reaction: Some("👌".to_string()),
            post_edit_replies: true,
            bot_user_id: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let divisions = parse_csv("LEAGUE_DIVISIONS")
            .unwrap_or_else(|| DEFAULT_DIVISIONS.iter().map(|d| d.to_string()).collect());
        let map_prefix =
            env::var("MAP_PREFIX").unwrap_or_else(|_| DEFAULT_MAP_PREFIX.to_string());
        let league = LeagueConfig::new(divisions, &map_prefix)
            .with_context(|| format!("Invalid MAP_PREFIX: {map_prefix}"))?;

        let config = Self {
            league,
            allow_unknown_maps: parse_bool("ALLOW_UNKNOWN_MAPS", defaults.allow_unknown_maps),
            page_size: parse_usize("POLL_PAGE_SIZE", defaults.page_size)?,
            backfill_every_n: parse_u64("BACKFILL_EVERY_N", defaults.backfill_every_n)?,
            backfill_window: Duration::from_secs(parse_u64("BACKFILL_WINDOW_MINS", 360)? * 60),
            backfill_max: parse_usize("BACKFILL_MAX", defaults.backfill_max)?,
            fetch_jitter_max_ms: parse_u64("FETCH_JITTER_MAX_MS", defaults.fetch_jitter_max_ms)?,
            quota_cooldown: Duration::from_secs(parse_u64("QUOTA_COOLDOWN_SECS", 120)?),
            max_messages_per_run: parse_usize(
                "MAX_MESSAGES_PER_RUN",
                defaults.max_messages_per_run,
            )?,
            time_budget: Duration::from_secs(parse_u64("RUN_TIME_BUDGET_SECS", 280)?),
            safety_margin: Duration::from_secs(parse_u64("RUN_SAFETY_MARGIN_SECS", 20)?),
            force_reparse: parse_bool("FORCE_REPARSE", defaults.force_reparse),
            banner_markers: parse_csv("BANNER_MARKERS").unwrap_or(defaults.banner_markers),
            success_reactions: parse_csv("SUCCESS_REACTIONS")
                .unwrap_or(defaults.success_reactions),
            nochange_reaction: match env::var("NOCHANGE_REACTION") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v.trim().to_string()),
                Err(_) => defaults.nochange_reaction,
            },
            post_edit_replies: parse_bool("POST_EDIT_REPLIES", defaults.post_edit_replies),
            bot_user_id: env::var("BOT_USER_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.league.divisions().is_empty() {
            return Err(anyhow!("LEAGUE_DIVISIONS must name at least one division"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(anyhow!("POLL_PAGE_SIZE must be between 1 and {}", MAX_PAGE_SIZE));
        }
        if self.max_messages_per_run == 0 {
            return Err(anyhow!("MAX_MESSAGES_PER_RUN must be > 0"));
        }
        if self.safety_margin >= self.time_budget {
            return Err(anyhow!(
                "RUN_SAFETY_MARGIN_SECS must be smaller than RUN_TIME_BUDGET_SECS"
            ));
        }
        Ok(())
    }

    /// Wall-clock budget left for processing after the safety margin.
    pub fn effective_budget(&self) -> Duration {
        self.time_budget.saturating_sub(self.safety_margin)
    }

    /// Whether message content looks like an announcement banner.
    pub fn is_banner(&self, content: &str) -> bool {
        let upper = content.trim_start().to_uppercase();
        self.banner_markers
            .iter()
            .any(|m| !m.is_empty() && upper.starts_with(&m.to_uppercase()))
    }
}

fn parse_csv(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let vals: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if vals.is_empty() {
        None
    } else {
        Some(vals)
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("Invalid {key}: {raw} (expected integer)")),
        Err(_) => Ok(default),
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("Invalid {key}: {raw} (expected integer)")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_page() {
        let cfg = EngineConfig {
            page_size: 500,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_margin_over_budget() {
        let cfg = EngineConfig {
            time_budget: Duration::from_secs(10),
            safety_margin: Duration::from_secs(10),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_effective_budget() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.effective_budget(), Duration::from_secs(260));
    }

    #[test]
    fn test_banner_detection() {
        let cfg = EngineConfig::default();
        assert!(cfg.is_banner("📣 Results are in"));
        assert!(cfg.is_banner("  🏆 Week 4 standings"));
        assert!(!cfg.is_banner("dod_lennon2 Wickeds 5 > 3 Avengers"));
    }
}
