//! Duplicate detection for chat messages.
//!
//! A message is identified by its id; its revision by a SHA-256 of its
//! content. A message whose latest receipt carries the same hash has already
//! been reconciled and is skipped unless a forced reparse is requested.

use crate::models::MessageId;
use crate::receipts::Receipt;
use crate::store::ReceiptLog;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Result of checking a message against the receipt log
#[derive(Debug, Clone)]
pub enum IdempotencyResult {
    /// No receipt for this message yet
    New,
    /// Receipt exists under a different content hash
    Edited { prior: Box<Receipt> },
    /// Same content already reconciled; skip
    Duplicate { original_timestamp: DateTime<Utc> },
}

impl IdempotencyResult {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IdempotencyResult::Duplicate { .. })
    }
}

/// Hex SHA-256 of message content (surrounding whitespace ignored).
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.trim().as_bytes());
    format!("{:x}", digest)
}

/// Compare a message revision with the latest receipt written for it.
pub async fn check(
    receipts: &dyn ReceiptLog,
    message_id: &MessageId,
    hash: &str,
    force_reparse: bool,
) -> Result<IdempotencyResult> {
    let Some(prior) = receipts.latest_for_message(message_id).await? else {
        return Ok(IdempotencyResult::New);
    };

    if prior.content_hash == hash && !force_reparse {
        debug!(
            "Message {} unchanged since {} ({})",
            message_id,
            prior.timestamp,
            prior.note.as_str()
        );
        return Ok(IdempotencyResult::Duplicate {
            original_timestamp: prior.timestamp,
        });
    }

    Ok(IdempotencyResult::Edited {
        prior: Box::new(prior),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipts::NoteTag;
    use crate::store::MemoryStore;

    fn receipt(id: &str, hash: &str) -> Receipt {
        Receipt {
            timestamp: Utc::now(),
            division: "Gold".to_string(),
            row: 4,
            map: "dod_x".to_string(),
            team1: "A".to_string(),
            team2: "B".to_string(),
            score1: 1,
            score2: 0,
            message_id: MessageId::parse(id),
            author_id: None,
            note: NoteTag::New,
            content_hash: hash.to_string(),
            edited_at: None,
        }
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        let h = content_hash("dod_x A 1 > 0 B");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("  dod_x A 1 > 0 B\n"));
        assert_ne!(h, content_hash("dod_x A 2 > 0 B"));
    }

    #[tokio::test]
    async fn test_check_states() {
        let store = MemoryStore::new();
        let id = MessageId::parse("77").unwrap();
        let hash = content_hash("dod_x A 1 > 0 B");

        assert!(matches!(
            check(&store, &id, &hash, false).await.unwrap(),
            IdempotencyResult::New
        ));

        store.append(receipt("77", &hash)).await.unwrap();
        assert!(check(&store, &id, &hash, false).await.unwrap().is_duplicate());
        assert!(matches!(
            check(&store, &id, &hash, true).await.unwrap(),
            IdempotencyResult::Edited { .. }
        ));
        assert!(matches!(
            check(&store, &id, "other", false).await.unwrap(),
            IdempotencyResult::Edited { .. }
        ));
    }
}
