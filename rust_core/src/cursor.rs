//! Per-source message cursor.
//!
//! The cursor is the largest message identifier successfully observed from a
//! source. The persisted value never decreases: a run only writes it back
//! when its watermark strictly exceeds what was stored before.

use crate::models::MessageId;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Key-value persistence for cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Current key naming scheme.
pub fn cursor_key(source: &str) -> String {
    format!("cursor:{source}")
}

/// Key naming scheme used before cursors were namespaced.
pub fn legacy_cursor_key(source: &str) -> String {
    format!("last_message_id_{source}")
}

/// Load the persisted cursor, migrating a legacy key on first read.
pub async fn load_cursor(store: &dyn CursorStore, source: &str) -> Result<Option<MessageId>> {
    let key = cursor_key(source);
    if let Some(raw) = store.get(&key).await? {
        let parsed = MessageId::parse(&raw);
        if parsed.is_none() {
            warn!("Ignoring malformed cursor {}={:?}", key, raw);
        }
        return Ok(parsed);
    }

    let legacy = legacy_cursor_key(source);
    let Some(raw) = store.get(&legacy).await? else {
        return Ok(None);
    };
    let Some(id) = MessageId::parse(&raw) else {
        warn!("Ignoring malformed legacy cursor {}={:?}", legacy, raw);
        return Ok(None);
    };

    store.set(&key, id.as_str()).await?;
    store.delete(&legacy).await?;
    info!("Migrated cursor {} -> {} ({})", legacy, key, id);
    Ok(Some(id))
}

/// Persist `furthest` only if it strictly exceeds `previous`.
///
/// Returns the cursor value in effect after the call.
pub async fn persist_cursor(
    store: &dyn CursorStore,
    source: &str,
    previous: Option<&MessageId>,
    furthest: Option<&MessageId>,
) -> Result<Option<MessageId>> {
    let advance = match (previous, furthest) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(prev), Some(next)) => next > prev,
    };

    if !advance {
        debug!(
            "Cursor for {} unchanged (stored={:?}, furthest={:?})",
            source,
            previous.map(|m| m.as_str()),
            furthest.map(|m| m.as_str())
        );
        return Ok(previous.cloned());
    }

    let next = furthest.cloned();
    if let Some(id) = &next {
        store.set(&cursor_key(source), id.as_str()).await?;
        debug!("Cursor for {} advanced to {}", source, id);
    }
    Ok(next)
}

/// Largest identifier observed during one invocation.
#[derive(Debug, Clone, Default)]
pub struct Watermark {
    furthest: Option<MessageId>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, id: &MessageId) {
        match &self.furthest {
            Some(current) if current >= id => {}
            _ => self.furthest = Some(id.clone()),
        }
    }

    pub fn furthest(&self) -> Option<&MessageId> {
        self.furthest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn id(raw: &str) -> MessageId {
        MessageId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_cursor() {
        let store = MemoryStore::new();
        assert_eq!(load_cursor(&store, "results").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_legacy_cursor_migrates_once() {
        let store = MemoryStore::new();
        store.set("last_message_id_results", "900").await.unwrap();

        let loaded = load_cursor(&store, "results").await.unwrap();
        assert_eq!(loaded, Some(id("900")));
        assert_eq!(store.get("cursor:results").await.unwrap().as_deref(), Some("900"));
        assert_eq!(store.get("last_message_id_results").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persist_never_regresses() {
        let store = MemoryStore::new();
        let prev = id("500");

        let kept = persist_cursor(&store, "results", Some(&prev), Some(&id("499")))
            .await
            .unwrap();
        assert_eq!(kept, Some(prev.clone()));
        assert_eq!(store.get("cursor:results").await.unwrap(), None);

        let advanced = persist_cursor(&store, "results", Some(&prev), Some(&id("501")))
            .await
            .unwrap();
        assert_eq!(advanced, Some(id("501")));
        assert_eq!(store.get("cursor:results").await.unwrap().as_deref(), Some("501"));
    }

    #[test]
    fn test_watermark_keeps_maximum() {
        let mut mark = Watermark::new();
        mark.observe(&id("20"));
        mark.observe(&id("100"));
        mark.observe(&id("99"));
        assert_eq!(mark.furthest(), Some(&id("100")));
    }
}
