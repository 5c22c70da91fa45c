//! Postgres-backed schedule grid, receipt log and cursor store.
//!
//! Tables:
//! - `schedule_blocks` / `schedule_slots`: the weekly grid per division
//! - `protected_ranges`: externally maintained write protection
//! - `score_receipts`: append-only audit log
//! - `engine_cursors`: per-source cursor key-value pairs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scorekeeper_core::cursor::CursorStore;
use scorekeeper_core::models::{
    MessageId, Outcome, ScheduleBlock, ScheduleSlot, SlotField, SlotScores,
};
use scorekeeper_core::receipts::{NoteTag, Receipt};
use scorekeeper_core::store::{ReceiptLog, ScheduleStore};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schedule_blocks (
        division TEXT NOT NULL,
        block_index INTEGER NOT NULL,
        map_token TEXT NOT NULL,
        week_date DATE,
        PRIMARY KEY (division, block_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_slots (
        division TEXT NOT NULL,
        row_num INTEGER NOT NULL,
        block_index INTEGER NOT NULL,
        team1 TEXT NOT NULL,
        team2 TEXT NOT NULL,
        outcome1 TEXT,
        outcome2 TEXT,
        score1 INTEGER,
        score2 INTEGER,
        updated_at TIMESTAMPTZ,
        PRIMARY KEY (division, row_num)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS protected_ranges (
        id BIGSERIAL PRIMARY KEY,
        division TEXT NOT NULL,
        row_start INTEGER NOT NULL,
        row_end INTEGER NOT NULL,
        fields TEXT[] NOT NULL DEFAULT '{}',
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS score_receipts (
        id BIGSERIAL PRIMARY KEY,
        recorded_at TIMESTAMPTZ NOT NULL,
        division TEXT NOT NULL,
        row_num INTEGER NOT NULL,
        map_token TEXT NOT NULL,
        team1 TEXT NOT NULL,
        team2 TEXT NOT NULL,
        score1 INTEGER NOT NULL,
        score2 INTEGER NOT NULL,
        message_id TEXT,
        author_id TEXT,
        note TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        edited_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS score_receipts_slot_idx ON score_receipts (division, row_num, id DESC)",
    "CREATE INDEX IF NOT EXISTS score_receipts_message_idx ON score_receipts (message_id, id DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS engine_cursors (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Connect with pool settings from `DB_POOL_*` environment variables.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let max_connections = std::env::var("DB_POOL_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    let acquire_timeout = std::env::var("DB_POOL_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    info!("Database pool ready (max_connections={})", max_connections);
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow!("value out of range: {value}"))
}

fn outcome(raw: Option<String>) -> Option<Outcome> {
    raw.as_deref().and_then(Outcome::parse)
}

fn field_name(field: SlotField) -> &'static str {
    match field {
        SlotField::Outcome1 => "outcome1",
        SlotField::Outcome2 => "outcome2",
        SlotField::Score1 => "score1",
        SlotField::Score2 => "score2",
    }
}

/// An empty field list protects the whole row.
fn covers(protected: &[String], fields: &[SlotField]) -> bool {
    protected.is_empty()
        || fields.iter().any(|f| {
            protected
                .iter()
                .any(|p| p.trim().eq_ignore_ascii_case(field_name(*f)))
        })
}

fn slot_from_row(row: &PgRow) -> Result<Option<ScheduleSlot>> {
    let Some(row_num) = row.try_get::<Option<i32>, _>("row_num")? else {
        return Ok(None);
    };
    Ok(Some(ScheduleSlot {
        row: u32::try_from(row_num).map_err(|_| anyhow!("negative row_num {row_num}"))?,
        team1: row.try_get::<Option<String>, _>("team1")?.unwrap_or_default(),
        team2: row.try_get::<Option<String>, _>("team2")?.unwrap_or_default(),
        scores: SlotScores {
            outcome1: outcome(row.try_get("outcome1")?),
            outcome2: outcome(row.try_get("outcome2")?),
            score1: to_u32(row.try_get("score1")?),
            score2: to_u32(row.try_get("score2")?),
        },
    }))
}

fn receipt_from_row(row: &PgRow) -> Result<Receipt> {
    let note: String = row.try_get("note")?;
    let note = NoteTag::parse(&note).ok_or_else(|| anyhow!("unknown receipt note {note:?}"))?;
    let message_id: Option<String> = row.try_get("message_id")?;
    let row_num: i32 = row.try_get("row_num")?;
    let score1: i32 = row.try_get("score1")?;
    let score2: i32 = row.try_get("score2")?;

    Ok(Receipt {
        timestamp: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
        division: row.try_get("division")?,
        row: u32::try_from(row_num).map_err(|_| anyhow!("negative row_num {row_num}"))?,
        map: row.try_get("map_token")?,
        team1: row.try_get("team1")?,
        team2: row.try_get("team2")?,
        score1: u32::try_from(score1).unwrap_or(0),
        score2: u32::try_from(score2).unwrap_or(0),
        message_id: message_id.as_deref().and_then(MessageId::parse),
        author_id: row.try_get("author_id")?,
        note,
        content_hash: row.try_get("content_hash")?,
        edited_at: row.try_get("edited_at")?,
    })
}

const RECEIPT_COLUMNS: &str = "recorded_at, division, row_num, map_token, team1, team2, \
     score1, score2, message_id, author_id, note, content_hash, edited_at";

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        debug!("Schema ready");
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn blocks(&self, division: &str) -> Result<Vec<ScheduleBlock>> {
        let rows = sqlx::query(
            r#"
            SELECT b.division, b.block_index, b.map_token, b.week_date,
                   s.row_num, s.team1, s.team2, s.outcome1, s.outcome2, s.score1, s.score2
            FROM schedule_blocks b
            LEFT JOIN schedule_slots s
              ON s.division = b.division AND s.block_index = b.block_index
            WHERE lower(b.division) = lower($1)
            ORDER BY b.block_index, s.row_num
            "#,
        )
        .bind(division)
        .fetch_all(&self.pool)
        .await?;

        let mut blocks: Vec<ScheduleBlock> = Vec::new();
        for row in &rows {
            let index: i32 = row.try_get("block_index")?;
            let index = usize::try_from(index).map_err(|_| anyhow!("negative block_index"))?;
            if blocks.last().map(|b| b.index) != Some(index) {
                blocks.push(ScheduleBlock {
                    division: row.try_get("division")?,
                    index,
                    map_token: row.try_get("map_token")?,
                    week_date: row.try_get::<Option<NaiveDate>, _>("week_date")?,
                    slots: Vec::new(),
                });
            }
            if let (Some(slot), Some(block)) = (slot_from_row(row)?, blocks.last_mut()) {
                block.slots.push(slot);
            }
        }
        Ok(blocks)
    }

    async fn map_tokens(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT lower(trim(map_token)) AS token, MIN(block_index) AS first_block
            FROM schedule_blocks
            GROUP BY 1
            ORDER BY first_block, token
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("token").map_err(Into::into))
            .collect()
    }

    async fn read_slot(&self, division: &str, row: u32) -> Result<Option<ScheduleSlot>> {
        let found = sqlx::query(
            r#"
            SELECT row_num, team1, team2, outcome1, outcome2, score1, score2
            FROM schedule_slots
            WHERE lower(division) = lower($1) AND row_num = $2
            "#,
        )
        .bind(division)
        .bind(to_i32(row)?)
        .fetch_optional(&self.pool)
        .await?;

        match found {
            Some(r) => slot_from_row(&r),
            None => Ok(None),
        }
    }

    async fn write_result(&self, division: &str, row: u32, scores: SlotScores) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE schedule_slots
            SET outcome1 = $3, outcome2 = $4, score1 = $5, score2 = $6, updated_at = NOW()
            WHERE lower(division) = lower($1) AND row_num = $2
            "#,
        )
        .bind(division)
        .bind(to_i32(row)?)
        .bind(scores.outcome1.map(|o| o.as_str()))
        .bind(scores.outcome2.map(|o| o.as_str()))
        .bind(scores.score1.map(to_i32).transpose()?)
        .bind(scores.score2.map(to_i32).transpose()?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            anyhow::bail!(
                "write_result touched {} rows for {} row {}",
                result.rows_affected(),
                division,
                row
            );
        }
        Ok(())
    }

    async fn is_protected(&self, division: &str, row: u32, fields: &[SlotField]) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            SELECT fields FROM protected_ranges
            WHERE lower(division) = lower($1) AND $2 BETWEEN row_start AND row_end
            "#,
        )
        .bind(division)
        .bind(to_i32(row)?)
        .fetch_all(&self.pool)
        .await?;

        for r in &rows {
            let protected: Vec<String> = r.try_get("fields")?;
            if covers(&protected, fields) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl ReceiptLog for PgStore {
    async fn append(&self, receipt: Receipt) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO score_receipts ({RECEIPT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(receipt.timestamp)
        .bind(&receipt.division)
        .bind(to_i32(receipt.row)?)
        .bind(&receipt.map)
        .bind(&receipt.team1)
        .bind(&receipt.team2)
        .bind(to_i32(receipt.score1)?)
        .bind(to_i32(receipt.score2)?)
        .bind(receipt.message_id.as_ref().map(|m| m.as_str()))
        .bind(&receipt.author_id)
        .bind(receipt.note.as_str())
        .bind(&receipt.content_hash)
        .bind(receipt.edited_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_for_slot(&self, division: &str, row: u32) -> Result<Option<Receipt>> {
        let found = sqlx::query(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM score_receipts \
             WHERE lower(division) = lower($1) AND row_num = $2 \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(division)
        .bind(to_i32(row)?)
        .fetch_optional(&self.pool)
        .await?;
        found.as_ref().map(receipt_from_row).transpose()
    }

    async fn latest_for_message(&self, message_id: &MessageId) -> Result<Option<Receipt>> {
        let found = sqlx::query(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM score_receipts \
             WHERE message_id = $1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        found.as_ref().map(receipt_from_row).transpose()
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let found = sqlx::query("SELECT value FROM engine_cursors WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match found {
            Some(r) => Some(r.try_get("value")?),
            None => None,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO engine_cursors (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM engine_cursors WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorekeeper_core::cursor::{load_cursor, persist_cursor};

    #[test]
    fn test_protection_field_matching() {
        assert!(covers(&[], &SlotField::ALL));
        assert!(covers(&["Score2".to_string()], &SlotField::ALL));
        assert!(!covers(&["score2".to_string()], &[SlotField::Outcome1]));
    }

    async fn test_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::new(connect(&url).await.unwrap());
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore] // requires a live Postgres
    async fn test_write_and_read_slot() {
        let store = test_store().await;
        sqlx::query("DELETE FROM schedule_slots WHERE division = 'TestDiv'")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO schedule_slots (division, row_num, block_index, team1, team2) \
             VALUES ('TestDiv', 23, 0, 'WICKEDS', 'AVENGERS')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        store
            .write_result("testdiv", 23, SlotScores::from_result(5, 3))
            .await
            .unwrap();
        let slot = store.read_slot("TestDiv", 23).await.unwrap().unwrap();
        assert_eq!(slot.scores.score1, Some(5));
        assert_eq!(slot.scores.outcome2, Some(Outcome::Loss));
        assert!(store
            .write_result("TestDiv", 99, SlotScores::from_result(1, 0))
            .await
            .is_err());
    }

    #[tokio::test]
    #[ignore] // requires a live Postgres
    async fn test_cursor_roundtrip_and_migration() {
        let store = test_store().await;
        store.delete("cursor:pg-test").await.unwrap();
        store.set("last_message_id_pg-test", "1200").await.unwrap();

        let loaded = load_cursor(&store, "pg-test").await.unwrap();
        assert_eq!(loaded, MessageId::parse("1200"));
        assert!(store.get("last_message_id_pg-test").await.unwrap().is_none());

        let next = MessageId::parse("1300");
        persist_cursor(&store, "pg-test", loaded.as_ref(), next.as_ref())
            .await
            .unwrap();
        assert_eq!(store.get("cursor:pg-test").await.unwrap().as_deref(), Some("1300"));
    }
}
