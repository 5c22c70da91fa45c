//! Persistence collaborator interfaces.
//!
//! The concrete storage engine lives outside the core. These traits are the
//! only surface the engine depends on:
//! - `ScheduleStore`: the schedule grid, batched result writes and the
//!   write-protection query
//! - `ReceiptLog`: the append-only receipt log
//!
//! The cursor key-value store lives in [`crate::cursor`].

use crate::models::{MessageId, ScheduleBlock, ScheduleSlot, SlotField, SlotScores};
use crate::receipts::Receipt;
use anyhow::Result;
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// All weekly blocks of a division, in sheet order.
    async fn blocks(&self, division: &str) -> Result<Vec<ScheduleBlock>>;

    /// Map tokens found in block headers across all divisions.
    async fn map_tokens(&self) -> Result<Vec<String>>;

    /// Current contents of one slot.
    async fn read_slot(&self, division: &str, row: u32) -> Result<Option<ScheduleSlot>>;

    /// Write win/loss flags and scores for both sides in one batch.
    async fn write_result(&self, division: &str, row: u32, scores: SlotScores) -> Result<()>;

    /// Whether an external protection range covers any of the given fields.
    async fn is_protected(&self, division: &str, row: u32, fields: &[SlotField]) -> Result<bool>;
}

#[async_trait]
pub trait ReceiptLog: Send + Sync {
    async fn append(&self, receipt: Receipt) -> Result<()>;

    /// Most recent receipt for a (division, row).
    async fn latest_for_slot(&self, division: &str, row: u32) -> Result<Option<Receipt>>;

    /// Most recent receipt written for a source message.
    async fn latest_for_message(&self, message_id: &MessageId) -> Result<Option<Receipt>>;
}
