use anyhow::{anyhow, Context, Result};
use clap::Parser;
use scorekeeper_core::MessageId;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub chat_api_base_url: String,
    pub chat_bot_token: String,
    pub results_channel_id: String,

    pub registry_path: PathBuf,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let chat_api_base_url = env::var("CHAT_API_BASE_URL")
            .unwrap_or_else(|_| "https://discord.com/api/v10".to_string());
        let chat_bot_token = env::var("CHAT_BOT_TOKEN").context("CHAT_BOT_TOKEN must be set")?;
        let results_channel_id =
            env::var("RESULTS_CHANNEL_ID").context("RESULTS_CHANNEL_ID must be set")?;
        if MessageId::parse(&results_channel_id).is_none() {
            return Err(anyhow!(
                "Invalid RESULTS_CHANNEL_ID: {results_channel_id} (expected numeric id)"
            ));
        }

        let registry_path = env::var("REGISTRY_PATH")
            .unwrap_or_else(|_| "league_registry.json".to_string())
            .into();

        let poll_interval_secs = parse_u64_env("POLL_INTERVAL_SECS", 60)?;
        if poll_interval_secs == 0 {
            return Err(anyhow!("POLL_INTERVAL_SECS must be > 0"));
        }

        Ok(Self {
            database_url,
            chat_api_base_url,
            chat_bot_token,
            results_channel_id,
            registry_path,
            poll_interval: Duration::from_secs(poll_interval_secs),
        })
    }
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {key}: {raw} (expected integer)"))
}

/// Command-line control surface.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(
    name = "score_reporter",
    version,
    about = "Reconcile chat score reports into the league schedule"
)]
pub struct Args {
    /// Run a single poll cycle and exit
    #[arg(long)]
    pub once: bool,
    /// Recovery run starting at this message id
    #[arg(long, value_name = "MESSAGE_ID", value_parser = parse_message_id)]
    pub from: Option<MessageId>,
    /// Also process the --from message itself
    #[arg(long, requires = "from")]
    pub include_start: bool,
    /// Rebuild registry caches before running
    #[arg(long)]
    pub reload: bool,
}

fn parse_message_id(raw: &str) -> std::result::Result<MessageId, String> {
    MessageId::parse(raw).ok_or_else(|| format!("expected a numeric message id, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("score_reporter").chain(raw.iter().copied()))
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(args(&[]).unwrap(), Args::default());

        let a = args(&["--from", "1200", "--include-start", "--reload"]).unwrap();
        assert_eq!(a.from, MessageId::parse("1200"));
        assert!(a.include_start);
        assert!(a.reload);
        assert!(!a.once);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(args(&["--from"]).is_err());
        assert!(args(&["--from", "abc"]).is_err());
        assert!(args(&["--verbose"]).is_err());

        let err = args(&["--include-start"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
