//! In-memory persistence used by tests and dry runs.

use super::{ReceiptLog, ScheduleStore};
use crate::cursor::CursorStore;
use crate::models::{MessageId, ScheduleBlock, ScheduleSlot, SlotField, SlotScores};
use crate::receipts::Receipt;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Schedule grid, receipt log and cursor store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<Vec<ScheduleBlock>>,
    receipts: RwLock<Vec<Receipt>>,
    cursors: RwLock<HashMap<String, String>>,
    /// (division, row, field) covered by a protection range
    protected: RwLock<HashSet<(String, u32, SlotField)>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<ScheduleBlock>) -> Self {
        let store = Self::new();
        *store.blocks.write() = blocks;
        store
    }

    pub fn add_block(&self, block: ScheduleBlock) {
        self.blocks.write().push(block);
    }

    /// Declare a protection range over one field of a row.
    pub fn protect(&self, division: &str, row: u32, field: SlotField) {
        self.protected
            .write()
            .insert((division.to_lowercase(), row, field));
    }

    /// Number of slot mutations performed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of the receipt log in append order.
    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.read().clone()
    }

    pub fn slot(&self, division: &str, row: u32) -> Option<ScheduleSlot> {
        self.blocks
            .read()
            .iter()
            .filter(|b| b.division.eq_ignore_ascii_case(division))
            .flat_map(|b| b.slots.iter())
            .find(|s| s.row == row)
            .cloned()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn blocks(&self, division: &str) -> Result<Vec<ScheduleBlock>> {
        Ok(self
            .blocks
            .read()
            .iter()
            .filter(|b| b.division.eq_ignore_ascii_case(division))
            .cloned()
            .collect())
    }

    async fn map_tokens(&self) -> Result<Vec<String>> {
        let mut tokens: Vec<String> = Vec::new();
        for block in self.blocks.read().iter() {
            let token = block.map_token.trim().to_lowercase();
            if !token.is_empty() && !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    async fn read_slot(&self, division: &str, row: u32) -> Result<Option<ScheduleSlot>> {
        Ok(self.slot(division, row))
    }

    async fn write_result(&self, division: &str, row: u32, scores: SlotScores) -> Result<()> {
        let mut blocks = self.blocks.write();
        let slot = blocks
            .iter_mut()
            .filter(|b| b.division.eq_ignore_ascii_case(division))
            .flat_map(|b| b.slots.iter_mut())
            .find(|s| s.row == row)
            .ok_or_else(|| anyhow!("no slot at {}:{}", division, row))?;
        slot.scores = scores;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_protected(&self, division: &str, row: u32, fields: &[SlotField]) -> Result<bool> {
        let protected = self.protected.read();
        let division = division.to_lowercase();
        Ok(fields
            .iter()
            .any(|f| protected.contains(&(division.clone(), row, *f))))
    }
}

#[async_trait]
impl ReceiptLog for MemoryStore {
    async fn append(&self, receipt: Receipt) -> Result<()> {
        self.receipts.write().push(receipt);
        Ok(())
    }

    async fn latest_for_slot(&self, division: &str, row: u32) -> Result<Option<Receipt>> {
        Ok(self
            .receipts
            .read()
            .iter()
            .rev()
            .find(|r| r.row == row && r.division.eq_ignore_ascii_case(division))
            .cloned())
    }

    async fn latest_for_message(&self, message_id: &MessageId) -> Result<Option<Receipt>> {
        Ok(self
            .receipts
            .read()
            .iter()
            .rev()
            .find(|r| r.message_id.as_ref() == Some(message_id))
            .cloned())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cursors.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.cursors.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cursors.write().remove(key);
        Ok(())
    }
}
