//! Poll loop: fetch chat messages and drive them through the pipeline.
//!
//! One invocation:
//!   FetchPrimary -> (every Nth run) FetchBackfill -> Merge & Sort
//!   -> ProcessBatch -> PersistCursor
//!
//! Invocations are run-to-completion. Re-entrancy is safe because the
//! cursor never regresses and reconciliation is idempotent per content hash.

use crate::config::EngineConfig;
use crate::cooldown::QuotaCooldown;
use crate::cursor::{load_cursor, persist_cursor, CursorStore, Watermark};
use crate::error::{EngineError, EngineResult, TransportError};
use crate::idempotency::{self, content_hash, IdempotencyResult};
use crate::models::{ChatMessage, MessageId, ResolvedCandidate, TeamResolution};
use crate::notify::{format_edit_reply, format_guidance, Guidance};
use crate::parser;
use crate::receipts::NoteTag;
use crate::reconciler::{ApplyOutcome, MessageContext, Reconciler, RejectReason};
use crate::registry::{RegistryCache, RegistrySnapshot};
use crate::resolver::{self, SlotTarget};
use crate::store::{ReceiptLog, ScheduleStore};
use crate::summary::{RunSummary, SkipReason};
use crate::transport::Transport;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Suggestions offered per unknown team in guidance messages.
const MAX_SUGGESTIONS: usize = 3;

/// Messages remembered as already given guidance; oldest ids drop first.
const MAX_NOTIFIED: usize = 4096;

pub struct Poller {
    config: EngineConfig,
    channel: String,
    transport: Arc<dyn Transport>,
    schedule: Arc<dyn ScheduleStore>,
    receipts: Arc<dyn ReceiptLog>,
    cursors: Arc<dyn CursorStore>,
    registry: Arc<RegistryCache>,
    reconciler: Reconciler,
    cooldown: QuotaCooldown,
    invocations: AtomicU64,
    /// Message id -> content hash that guidance was last sent for
    notified: Mutex<BTreeMap<MessageId, String>>,
}

impl Poller {
    pub fn new(
        config: EngineConfig,
        channel: impl Into<String>,
        transport: Arc<dyn Transport>,
        schedule: Arc<dyn ScheduleStore>,
        receipts: Arc<dyn ReceiptLog>,
        cursors: Arc<dyn CursorStore>,
        registry: Arc<RegistryCache>,
    ) -> Self {
        let reconciler = Reconciler::new(
            schedule.clone(),
            receipts.clone(),
            config.league.clone(),
            config.force_reparse,
        );
        let cooldown = QuotaCooldown::new(config.quota_cooldown);
        Self {
            config,
            channel: channel.into(),
            transport,
            schedule,
            receipts,
            cursors,
            registry,
            reconciler,
            cooldown,
            invocations: AtomicU64::new(0),
            notified: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn cooldown(&self) -> &QuotaCooldown {
        &self.cooldown
    }

    /// Rebuild registry tables before the next message.
    pub async fn reload_registry(&self) -> EngineResult<u64> {
        let snapshot = self.registry.reload().await.map_err(EngineError::store)?;
        info!("Registry reloaded (v{})", snapshot.version());
        Ok(snapshot.version())
    }

    /// Run one poll cycle against the persisted cursor.
    pub async fn run_once(&self) -> EngineResult<RunSummary> {
        self.run_once_at(Utc::now()).await
    }

    /// `run_once` with an explicit wall-clock "now" for the backfill window
    /// and week-date matching.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> EngineResult<RunSummary> {
        let started = Instant::now();
        let cursor_before = load_cursor(self.cursors.as_ref(), &self.channel)
            .await
            .map_err(EngineError::store)?;
        let mut summary = RunSummary::new(cursor_before.clone());

        if self.cooldown.is_cooling() {
            debug!(
                "Skipping poll of {}: quota cooldown ({:?} left)",
                self.channel,
                self.cooldown.remaining()
            );
            summary.cooled_down = true;
            summary.log();
            return Ok(summary);
        }

        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;

        // FetchPrimary
        let primary = match self
            .fetch_with_retry(cursor_before.as_ref(), self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => return self.abort_on_transport(e, summary),
        };
        let mut batch: Vec<ChatMessage> = primary
            .into_iter()
            .filter(|m| cursor_before.as_ref().map_or(true, |c| &m.id > c))
            .collect();

        // FetchBackfill, limited to ids already consumed or in the primary
        // page so it never jumps the cursor past unread messages
        if self.backfill_due(invocation) {
            let ceiling = batch
                .iter()
                .map(|m| &m.id)
                .max()
                .or(cursor_before.as_ref())
                .cloned();
            match self.fetch_with_retry(None, self.config.page_size).await {
                Ok(page) => {
                    let extra = self.select_backfill(page, &batch, ceiling.as_ref(), now);
                    summary.backfilled = extra.len() as u64;
                    batch.extend(extra);
                }
                Err(e) => return self.abort_on_transport(e, summary),
            }
        }

        // Merge & Sort
        let batch = merge_sorted(batch);

        let mut watermark = Watermark::new();
        let result = self
            .process_batch(batch, &mut summary, &mut watermark, started, now.date_naive())
            .await;

        // PersistCursor, even when the batch aborted part way
        summary.cursor_after = persist_cursor(
            self.cursors.as_ref(),
            &self.channel,
            cursor_before.as_ref(),
            watermark.furthest(),
        )
        .await
        .map_err(EngineError::store)?;

        result?;
        summary.log();
        Ok(summary)
    }

    /// Recovery run from an explicit message id. Only messages strictly
    /// after `start` (or `start` itself when `include_start`) are processed,
    /// in increasing id order, and no cursor is persisted. Pages are fetched
    /// forward until a short page, the message cap or the deadline.
    pub async fn run_from(&self, start: &MessageId, include_start: bool) -> EngineResult<RunSummary> {
        self.run_from_at(start, include_start, Utc::now()).await
    }

    pub async fn run_from_at(
        &self,
        start: &MessageId,
        include_start: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(Some(start.clone()));

        if self.cooldown.is_cooling() {
            summary.cooled_down = true;
            summary.log();
            return Ok(summary);
        }

        let mut batch = Vec::new();
        if include_start {
            self.jitter().await;
            match self.transport.fetch_one(&self.channel, start).await {
                Ok(Some(message)) => batch.push(message),
                Ok(None) => warn!("Start message {} not found in {}", start, self.channel),
                Err(e) => return self.abort_on_transport(e, summary),
            }
        }

        let deadline = started + self.config.effective_budget();
        let mut after = start.clone();
        loop {
            let page = match self.fetch_with_retry(Some(&after), self.config.page_size).await {
                Ok(page) => page,
                Err(e) => return self.abort_on_transport(e, summary),
            };
            let full = page.len() >= self.config.page_size;
            let fresh: Vec<ChatMessage> = page.into_iter().filter(|m| m.id > after).collect();
            let Some(next) = fresh.iter().map(|m| m.id.clone()).max() else {
                break;
            };
            batch.extend(fresh);
            after = next;
            if !full
                || batch.len() >= self.config.max_messages_per_run
                || Instant::now() >= deadline
            {
                break;
            }
        }

        let batch = merge_sorted(batch);
        let mut watermark = Watermark::new();
        let result = self
            .process_batch(batch, &mut summary, &mut watermark, started, now.date_naive())
            .await;
        summary.cursor_after = watermark.furthest().cloned();
        result?;

        info!(
            "Recovery run from {} (include_start={}) reached {:?}",
            start, include_start, summary.cursor_after
        );
        summary.log();
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------------

    fn backfill_due(&self, invocation: u64) -> bool {
        self.config.backfill_every_n > 0 && invocation % self.config.backfill_every_n == 0
    }

    async fn jitter(&self) {
        if self.config.fetch_jitter_max_ms == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=self.config.fetch_jitter_max_ms);
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    /// Fetch one page; non-quota failures are retried once with half the
    /// page size.
    async fn fetch_with_retry(
        &self,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        self.jitter().await;
        match self.transport.fetch_messages(&self.channel, after, limit).await {
            Ok(page) => Ok(page),
            Err(e) if e.is_quota() => Err(e),
            Err(e) => {
                let reduced = (limit / 2).max(1);
                warn!(
                    "Fetch from {} failed ({}); retrying with limit {}",
                    self.channel, e, reduced
                );
                self.jitter().await;
                self.transport
                    .fetch_messages(&self.channel, after, reduced)
                    .await
            }
        }
    }

    /// Recent messages touched within the backfill window that the primary
    /// page does not already hold, newest first, capped.
    fn select_backfill(
        &self,
        page: Vec<ChatMessage>,
        primary: &[ChatMessage],
        ceiling: Option<&MessageId>,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        let window = chrono::Duration::from_std(self.config.backfill_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = now - window;
        let known: HashSet<&MessageId> = primary.iter().map(|m| &m.id).collect();

        let mut extra: Vec<ChatMessage> = page
            .into_iter()
            .filter(|m| ceiling.map_or(false, |c| &m.id <= c))
            .filter(|m| m.last_activity() >= cutoff && !known.contains(&m.id))
            .collect();
        extra.sort_by(|a, b| b.id.cmp(&a.id));
        extra.truncate(self.config.backfill_max);
        if !extra.is_empty() {
            debug!("Backfill recovered {} message(s)", extra.len());
        }
        extra
    }

    fn abort_on_transport(
        &self,
        err: TransportError,
        mut summary: RunSummary,
    ) -> EngineResult<RunSummary> {
        if let TransportError::QuotaExceeded { retry_after } = &err {
            self.cooldown.trip(*retry_after);
            summary.cooled_down = true;
            summary.log();
            return Ok(summary);
        }
        error!("Poll of {} aborted: {}", self.channel, err);
        Err(err.into())
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    async fn process_batch(
        &self,
        batch: Vec<ChatMessage>,
        summary: &mut RunSummary,
        watermark: &mut Watermark,
        started: Instant,
        today: NaiveDate,
    ) -> EngineResult<()> {
        let deadline = started + self.config.effective_budget();
        let total = batch.len();

        for (index, message) in batch.into_iter().enumerate() {
            if index >= self.config.max_messages_per_run || Instant::now() >= deadline {
                summary.stopped_early = true;
                let remaining = (total - index) as u64;
                for _ in 0..remaining {
                    summary.skip_reason(SkipReason::DeadlineReached);
                }
                info!(
                    "Stopping early after {} message(s); {} left for the next run",
                    index, remaining
                );
                break;
            }

            summary.seen += 1;
            self.process_message(&message, summary, today).await?;
            watermark.observe(&message.id);
        }
        Ok(())
    }

    async fn process_message(
        &self,
        message: &ChatMessage,
        summary: &mut RunSummary,
        today: NaiveDate,
    ) -> EngineResult<()> {
        let content = message.content.trim();
        if content.is_empty() {
            summary.skip_reason(SkipReason::Empty);
            return Ok(());
        }
        if self.config.bot_user_id.as_deref() == Some(message.author_id.as_str()) {
            summary.skip_reason(SkipReason::OwnMessage);
            return Ok(());
        }
        if self.config.is_banner(content) {
            summary.skip_reason(SkipReason::Banner);
            return Ok(());
        }

        let hash = content_hash(content);
        let check = idempotency::check(
            self.receipts.as_ref(),
            &message.id,
            &hash,
            self.config.force_reparse,
        )
        .await
        .map_err(EngineError::store)?;
        if let IdempotencyResult::Duplicate { original_timestamp } = check {
            debug!("Skipping {}: already reconciled at {}", message.id, original_timestamp);
            summary.skip_same_hash += 1;
            return Ok(());
        }

        // One consistent registry view for the whole message
        let registry = self.registry.snapshot().await.map_err(EngineError::store)?;

        let parsed = match parser::parse(content, &registry) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Message {} not a score report: {}", message.id, e);
                summary.skip(e.as_str());
                return Ok(());
            }
        };
        summary.parsed += 1;

        let candidate = ResolvedCandidate {
            left: registry.resolve_team(&parsed.left.team_raw),
            right: registry.resolve_team(&parsed.right.team_raw),
            parsed,
        };

        let unknown = unknown_teams(&candidate, &registry);
        if !unknown.is_empty() {
            info!(
                "Message {}: unknown team(s) {:?}",
                message.id,
                unknown.iter().map(|(raw, _)| raw.as_str()).collect::<Vec<_>>()
            );
            summary.skip_reason(SkipReason::UnknownTeam);
            let guidance = Guidance::UnknownTeams {
                map: candidate.parsed.map.clone(),
                unknown,
            };
            self.send_guidance(message, &hash, &guidance, summary).await;
            return Ok(());
        }

        let Some(target) = self.locate(&candidate, today).await? else {
            let guidance = match ambiguity(&candidate) {
                Some(guidance) => {
                    summary.skip(RejectReason::AmbiguousAlias.as_str());
                    guidance
                }
                None => {
                    summary.skip_reason(SkipReason::UnresolvedSlot);
                    Guidance::UnresolvedMatchup {
                        map: candidate.parsed.map.clone(),
                        team1: candidate.left.name().unwrap_or_default().to_string(),
                        team2: candidate.right.name().unwrap_or_default().to_string(),
                        division_hint: candidate.parsed.division_hint.clone(),
                    }
                }
            };
            info!(
                "Message {}: no scheduled slot for {:?} on {} ({})",
                message.id,
                content,
                candidate.parsed.map,
                guidance.kind()
            );
            self.send_guidance(message, &hash, &guidance, summary).await;
            return Ok(());
        };

        let ctx = MessageContext {
            message_id: Some(message.id.clone()),
            author_id: Some(message.author_id.clone()),
            content_hash: hash,
            edited_at: message.edited_at,
        };
        let outcome = self
            .reconciler
            .apply(&target, &candidate, &ctx)
            .await
            .map_err(EngineError::store)?;

        match outcome {
            ApplyOutcome::Rejected(reason) => {
                summary.skip(reason.as_str());
                if reason == RejectReason::AmbiguousAlias {
                    if let Some(guidance) = ambiguity(&candidate) {
                        self.send_guidance(message, &ctx.content_hash, &guidance, summary)
                            .await;
                    }
                }
            }
            ApplyOutcome::Applied(applied) => {
                match applied.tag {
                    NoteTag::New => summary.new += 1,
                    NoteTag::Edit | NoteTag::ReparseApplied => summary.edits += 1,
                    NoteTag::Ff => summary.forfeits += 1,
                    NoteTag::EditNochange | NoteTag::ReparseNochange | NoteTag::ByeAuto => {}
                }
                if applied.applied_new {
                    summary.applied += 1;
                    for emoji in &self.config.success_reactions {
                        self.react(message, emoji).await;
                    }
                } else {
                    summary.no_change += 1;
                    if let Some(emoji) = &self.config.nochange_reaction {
                        self.react(message, emoji).await;
                    }
                }

                let changed_prior = applied.prior_scores.score1.is_some()
                    && !applied.prior_scores.same_scores(&applied.new_scores);
                if applied.tag == NoteTag::Edit && changed_prior && self.config.post_edit_replies {
                    let text = format_edit_reply(
                        &target.division,
                        &applied.receipt.team1,
                        &applied.receipt.team2,
                        &applied.prior_scores,
                        &applied.new_scores,
                    );
                    self.best_effort("edit reply", self.transport.post_reply(&self.channel, &text))
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Slot for the candidate. Ambiguous sides are tried with each of their
    /// candidates so the reconciler can refuse the write explicitly.
    async fn locate(
        &self,
        candidate: &ResolvedCandidate,
        today: NaiveDate,
    ) -> EngineResult<Option<SlotTarget>> {
        let lefts = candidate_names(&candidate.left);
        let rights = candidate_names(&candidate.right);
        for a in &lefts {
            for b in &rights {
                let found = resolver::resolve(
                    self.schedule.as_ref(),
                    &self.config.league,
                    &candidate.parsed.map,
                    a,
                    b,
                    candidate.parsed.division_hint.as_deref(),
                    today,
                )
                .await
                .map_err(EngineError::store)?;
                if found.is_some() {
                    return Ok(found);
                }
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Side calls
    // ------------------------------------------------------------------------

    /// Run a side call whose failure must not affect the batch.
    async fn best_effort<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Option<T> {
        if self.cooldown.is_cooling() {
            debug!("Skipping {} during quota cooldown", what);
            return None;
        }
        match call.await {
            Ok(value) => Some(value),
            Err(e) => {
                if let TransportError::QuotaExceeded { retry_after } = &e {
                    self.cooldown.trip(*retry_after);
                }
                warn!("{} failed: {}", what, e);
                None
            }
        }
    }

    async fn react(&self, message: &ChatMessage, emoji: &str) {
        self.best_effort(
            "reaction",
            self.transport.post_reaction(&self.channel, &message.id, emoji),
        )
        .await;
    }

    /// DM the author once per message content; backfill re-reads of the
    /// same content stay quiet.
    async fn send_guidance(
        &self,
        message: &ChatMessage,
        hash: &str,
        guidance: &Guidance,
        summary: &mut RunSummary,
    ) {
        if self.notified.lock().get(&message.id).map(String::as_str) == Some(hash) {
            debug!("Guidance for {} already sent ({})", message.id, guidance.kind());
            summary.dms_repeated += 1;
            return;
        }
        let text = format_guidance(guidance, &message.content, self.config.league.map_prefix());
        let result = self
            .best_effort(
                "guidance DM",
                self.transport.send_direct_message(&message.author_id, &text),
            )
            .await;
        if result.is_some() {
            self.remember_notified(&message.id, hash);
        }
        match result {
            Some(dm) if dm.ok => summary.dms_sent += 1,
            Some(dm) if dm.suppressed => {
                debug!("Author {} does not accept DMs", message.author_id);
                summary.dms_suppressed += 1;
            }
            _ => {}
        }
    }

    fn remember_notified(&self, id: &MessageId, hash: &str) {
        let mut notified = self.notified.lock();
        notified.insert(id.clone(), hash.to_string());
        while notified.len() > MAX_NOTIFIED {
            notified.pop_first();
        }
    }
}

/// Deduplicate by id (first occurrence wins) and sort ascending.
fn merge_sorted(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut seen: HashSet<MessageId> = HashSet::with_capacity(messages.len());
    let mut merged: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    merged.sort_by(|a, b| a.id.cmp(&b.id));
    merged
}

fn candidate_names(resolution: &TeamResolution) -> Vec<String> {
    match resolution {
        TeamResolution::Ambiguous { candidates, .. } => candidates.clone(),
        other => other.name().map(|n| vec![n.to_string()]).unwrap_or_default(),
    }
}

fn unknown_teams(
    candidate: &ResolvedCandidate,
    registry: &RegistrySnapshot,
) -> Vec<(String, Vec<String>)> {
    [
        (&candidate.parsed.left.team_raw, &candidate.left),
        (&candidate.parsed.right.team_raw, &candidate.right),
    ]
    .into_iter()
    .filter(|(_, resolution)| matches!(resolution, TeamResolution::Unresolved(_)))
    .map(|(raw, _)| (raw.clone(), registry.suggest_teams(raw, MAX_SUGGESTIONS)))
    .collect()
}

fn ambiguity(candidate: &ResolvedCandidate) -> Option<Guidance> {
    [&candidate.left, &candidate.right]
        .into_iter()
        .find_map(|resolution| match resolution {
            TeamResolution::Ambiguous { alias, candidates } => Some(Guidance::AmbiguousAlias {
                alias: alias.clone(),
                candidates: candidates.clone(),
            }),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, minutes_ago: i64) -> ChatMessage {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        ChatMessage {
            id: MessageId::parse(id).unwrap(),
            author_id: "u".to_string(),
            content: format!("message {id}"),
            created_at: now - chrono::Duration::minutes(minutes_ago),
            edited_at: None,
        }
    }

    #[test]
    fn test_merge_sorted_dedupes_and_orders_by_big_integer() {
        let merged = merge_sorted(vec![
            msg("100", 0),
            msg("9", 0),
            msg("100", 0),
            msg("10", 0),
        ]);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10", "100"]);
    }

    #[test]
    fn test_candidate_names_expand_ambiguity() {
        let amb = TeamResolution::Ambiguous {
            alias: "S".into(),
            candidates: vec!["SAINTS".into(), "SINNERS".into()],
        };
        assert_eq!(candidate_names(&amb), vec!["SAINTS", "SINNERS"]);
        assert_eq!(
            candidate_names(&TeamResolution::Canonical("A".into())),
            vec!["A"]
        );
    }
}
