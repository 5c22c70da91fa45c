//! Shared fixtures: a scripted chat transport and a seeded league.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use scorekeeper_core::models::{ScheduleBlock, ScheduleSlot, SlotScores};
use scorekeeper_core::registry::{RegistrySource, StaticRegistrySource};
use scorekeeper_core::store::MemoryStore;
use scorekeeper_core::{
    ChatMessage, DmResult, EngineConfig, MessageId, Poller, RegistryCache, Transport,
    TransportError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL: &str = "results";
pub const AUTHOR: &str = "author-1";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

pub fn id(raw: &str) -> MessageId {
    MessageId::parse(raw).unwrap()
}

pub fn message(raw_id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: id(raw_id),
        author_id: AUTHOR.to_string(),
        content: content.to_string(),
        created_at: now() - chrono::Duration::minutes(5),
        edited_at: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub after: Option<String>,
    pub limit: usize,
}

/// In-memory channel with scripted failures and recorded side calls.
#[derive(Default)]
pub struct ScriptedTransport {
    messages: Mutex<Vec<ChatMessage>>,
    failures: Mutex<VecDeque<TransportError>>,
    dm_result: Mutex<Option<DmResult>>,
    reaction_delay: Mutex<Option<Duration>>,
    pub fetches: Mutex<Vec<FetchCall>>,
    pub reactions: Mutex<Vec<(String, String)>>,
    pub replies: Mutex<Vec<String>>,
    pub dms: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, message: ChatMessage) {
        self.messages.lock().push(message);
    }

    /// Replace a message's content as an edit.
    pub fn edit(&self, raw_id: &str, content: &str) {
        let target = id(raw_id);
        for m in self.messages.lock().iter_mut() {
            if m.id == target {
                m.content = content.to_string();
                m.edited_at = Some(now() - chrono::Duration::minutes(1));
            }
        }
    }

    /// Fail the next fetch with `err`.
    pub fn fail_next(&self, err: TransportError) {
        self.failures.lock().push_back(err);
    }

    pub fn set_dm_result(&self, result: DmResult) {
        *self.dm_result.lock() = Some(result);
    }

    /// Make every reaction take `delay` of (tokio) time.
    pub fn set_reaction_delay(&self, delay: Duration) {
        *self.reaction_delay.lock() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.lock().len()
    }

    pub fn dm_count(&self) -> usize {
        self.dms.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch_messages(
        &self,
        _channel: &str,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        self.fetches.lock().push(FetchCall {
            after: after.map(|a| a.to_string()),
            limit,
        });
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let mut all = self.messages.lock().clone();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        let page = match after {
            Some(after) => all
                .into_iter()
                .filter(|m| &m.id > after)
                .take(limit)
                .collect(),
            None => {
                let skip = all.len().saturating_sub(limit);
                all.into_iter().skip(skip).collect()
            }
        };
        Ok(page)
    }

    async fn fetch_one(
        &self,
        _channel: &str,
        target: &MessageId,
    ) -> Result<Option<ChatMessage>, TransportError> {
        Ok(self.messages.lock().iter().find(|m| &m.id == target).cloned())
    }

    async fn post_reaction(
        &self,
        _channel: &str,
        target: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError> {
        let delay = *self.reaction_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.reactions
            .lock()
            .push((target.to_string(), emoji.to_string()));
        Ok(())
    }

    async fn post_reply(&self, _channel: &str, text: &str) -> Result<(), TransportError> {
        self.replies.lock().push(text.to_string());
        Ok(())
    }

    async fn send_direct_message(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<DmResult, TransportError> {
        self.dms.lock().push((user_id.to_string(), text.to_string()));
        Ok((*self.dm_result.lock()).unwrap_or_else(DmResult::delivered))
    }

    fn transport_name(&self) -> &str {
        "scripted"
    }
}

fn slot(row: u32, team1: &str, team2: &str) -> ScheduleSlot {
    ScheduleSlot {
        row,
        team1: team1.to_string(),
        team2: team2.to_string(),
        scores: SlotScores::default(),
    }
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Gold and Silver schedules; the current Gold week on dod_lennon2 is row 23.
pub fn league_blocks() -> Vec<ScheduleBlock> {
    vec![
        ScheduleBlock {
            division: "Gold".to_string(),
            index: 0,
            map_token: "dod_lennon2".to_string(),
            week_date: date(2024, 2, 4),
            slots: vec![slot(3, "WICKEDS", "AVENGERS"), slot(4, "SAINTS", "THE ROGUES")],
        },
        ScheduleBlock {
            division: "Gold".to_string(),
            index: 1,
            map_token: "dod_lennon2".to_string(),
            week_date: date(2024, 3, 10),
            slots: vec![slot(23, "WICKEDS", "AVENGERS"), slot(24, "SAINTS", "THE ROGUES")],
        },
        ScheduleBlock {
            division: "Gold".to_string(),
            index: 2,
            map_token: "dod_anzio".to_string(),
            week_date: date(2024, 3, 17),
            slots: vec![slot(43, "GOLD A", "GOLD B")],
        },
        ScheduleBlock {
            division: "Silver".to_string(),
            index: 0,
            map_token: "dod_flash".to_string(),
            week_date: date(2024, 3, 10),
            slots: vec![slot(7, "SINNERS", "NOMADS")],
        },
    ]
}

pub fn registry_source() -> RegistrySource {
    let mut src = RegistrySource::default();
    src.divisions.insert(
        "Gold".into(),
        vec![
            "Wickeds".into(),
            "Avengers".into(),
            "Saints".into(),
            "The Rogues".into(),
        ],
    );
    src.divisions
        .insert("Silver".into(), vec!["Sinners".into(), "Nomads".into()]);
    src.team_aliases
        .insert("S".into(), vec!["SAINTS".into(), "SINNERS".into()]);
    src.team_aliases.insert("Wick".into(), vec!["WICKEDS".into()]);
    src.fallback_maps = vec!["dod_avalanche".into()];
    src
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        fetch_jitter_max_ms: 0,
        backfill_every_n: 0,
        bot_user_id: Some("bot".to_string()),
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemoryStore>,
    pub poller: Poller,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(MemoryStore::with_blocks(league_blocks()));
        let registry = Arc::new(RegistryCache::new(
            config.league.clone(),
            config.allow_unknown_maps,
            Arc::new(StaticRegistrySource::new(registry_source())),
            store.clone(),
        ));
        let poller = Poller::new(
            config,
            CHANNEL,
            transport.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            registry,
        );
        Self {
            transport,
            store,
            poller,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(test_config())
    }

    pub fn receipt_notes(&self) -> Vec<&'static str> {
        self.store
            .receipts()
            .iter()
            .map(|r| r.note.as_str())
            .collect()
    }
}
