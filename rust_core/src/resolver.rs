//! Slot resolver: locate the schedule slot a report targets.
//!
//! Divisions are searched in order (hinted division first). Within a
//! division the block for the reported map whose week date is closest to
//! today is chosen, and its slots are scanned for the team pair in either
//! order. The first division with a hit wins.

use crate::league_config::LeagueConfig;
use crate::models::{ScheduleBlock, ScheduleSlot};
use crate::store::ScheduleStore;
use anyhow::Result;
use chrono::NaiveDate;
use tracing::debug;

/// Identified schedule slot for one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTarget {
    pub division: String,
    pub block_index: usize,
    pub row: u32,
    /// Slot's team order, canonical names
    pub team1: String,
    pub team2: String,
    pub week_date: Option<NaiveDate>,
    pub map: String,
}

impl SlotTarget {
    /// Whether a report's left team is the slot's second team.
    pub fn is_swapped(&self, left: &str) -> bool {
        !self.team1.eq_ignore_ascii_case(left) && self.team2.eq_ignore_ascii_case(left)
    }
}

/// Find the slot for `map` pairing `team_a` with `team_b`.
pub async fn resolve(
    store: &dyn ScheduleStore,
    league: &LeagueConfig,
    map: &str,
    team_a: &str,
    team_b: &str,
    division_hint: Option<&str>,
    today: NaiveDate,
) -> Result<Option<SlotTarget>> {
    for division in league.search_order(division_hint) {
        let blocks = store.blocks(division).await?;
        let Some(block) = nearest_block(&blocks, map, today) else {
            debug!("No {} block for map {}", division, map);
            continue;
        };

        if let Some(slot) = find_pair(&block.slots, team_a, team_b) {
            debug!(
                "Resolved {} vs {} on {} -> {} row {} (block {}, week {:?})",
                team_a, team_b, map, division, slot.row, block.index, block.week_date
            );
            return Ok(Some(SlotTarget {
                division: division.to_string(),
                block_index: block.index,
                row: slot.row,
                team1: slot.team1.trim().to_uppercase(),
                team2: slot.team2.trim().to_uppercase(),
                week_date: block.week_date,
                map: block.map_token.trim().to_lowercase(),
            }));
        }
    }
    Ok(None)
}

/// Block for `map` closest to `today`; undated blocks rank after dated ones
/// and ties keep sheet order.
fn nearest_block<'a>(
    blocks: &'a [ScheduleBlock],
    map: &str,
    today: NaiveDate,
) -> Option<&'a ScheduleBlock> {
    blocks
        .iter()
        .filter(|b| b.map_token.trim().eq_ignore_ascii_case(map))
        .min_by_key(|b| match b.week_date {
            Some(date) => (0, (date - today).num_days().abs()),
            None => (1, 0),
        })
}

fn find_pair<'a>(slots: &'a [ScheduleSlot], a: &str, b: &str) -> Option<&'a ScheduleSlot> {
    slots.iter().find(|s| s.pairs_with(a, b))
}
