//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::tax::FeeSchedule;
use crate::types::*;

/// Everything a week close persists, written as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct WeekClose {
    pub club: String,
    pub week_start: WeekKey,
    /// Snapshot of the closed week (locked, balances and rates)
    pub snapshot: WeekSnapshot,
    /// Explicit carry map for the following week
    pub carry_forward: CarryForwardMap,
    /// Settlement flipped to FINAL
    pub settlement: SettlementRecord,
}

impl WeekClose {
    pub fn carry_week(&self) -> WeekKey {
        next_week(self.week_start)
    }
}

/// Storage abstraction for the settlement engine
///
/// The engine never touches persistence directly. Tenant scoping and write
/// serialization are the implementor's responsibility.
#[async_trait]
pub trait SettlementStorage: Send + Sync {
    /// Weekly player/agent facts for a club
    async fn get_weekly_metrics(&self, club: &str, week: WeekKey)
        -> SettlementResult<WeeklyMetrics>;

    /// Ledger entries of a week, optionally only those addressed to one key
    async fn list_ledger_entries(
        &self,
        club: &str,
        week: WeekKey,
        entity_id: Option<&str>,
    ) -> SettlementResult<Vec<LedgerEntry>>;

    /// Get a ledger entry by id
    async fn get_ledger_entry(
        &self,
        club: &str,
        entry_id: &str,
    ) -> SettlementResult<Option<LedgerEntry>>;

    /// Append a ledger entry
    async fn save_ledger_entry(&mut self, club: &str, entry: &LedgerEntry)
        -> SettlementResult<()>;

    /// Remove a ledger entry
    async fn delete_ledger_entry(&mut self, club: &str, entry_id: &str) -> SettlementResult<()>;

    /// Every known week of a club, oldest first
    async fn list_week_snapshots(&self, club: &str) -> SettlementResult<Vec<WeekSnapshot>>;

    /// Week keys of locked weeks, oldest first
    async fn get_locked_weeks(&self, club: &str) -> SettlementResult<Vec<WeekKey>> {
        Ok(self
            .list_week_snapshots(club)
            .await?
            .into_iter()
            .filter(|snapshot| snapshot.locked)
            .map(|snapshot| snapshot.week_start)
            .collect())
    }

    /// Frozen rates of a week; `None` unless the week is locked
    async fn get_rate_snapshot(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Option<RateSnapshot>> {
        Ok(self
            .list_week_snapshots(club)
            .await?
            .into_iter()
            .find(|snapshot| snapshot.week_start == week && snapshot.locked)
            .and_then(|snapshot| snapshot.rates))
    }

    /// Explicit carry map written for `week` by the close of the week before
    async fn get_carry_forward_map(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Option<CarryForwardMap>>;

    /// Overwrite the explicit carry map of `week`
    async fn save_carry_forward_map(
        &mut self,
        club: &str,
        week: WeekKey,
        balances: &CarryForwardMap,
    ) -> SettlementResult<()>;

    /// Get the settlement record of a club week
    async fn get_settlement(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Option<SettlementRecord>>;

    /// Insert or replace a settlement record
    async fn save_settlement(&mut self, settlement: &SettlementRecord) -> SettlementResult<()>;

    /// Persist snapshot, next week's carry map and the FINAL settlement
    /// atomically: either all three are written or none is.
    async fn commit_week_close(&mut self, close: &WeekClose) -> SettlementResult<()>;

    /// Operator fee schedule for the DRE roll-up
    async fn get_fee_schedule(&self, club: &str) -> SettlementResult<FeeSchedule>;

    /// Imported bank/PIX lines of a week
    async fn list_bank_transactions(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Vec<BankTransaction>>;

    /// Save `entry` and link the bank line to it atomically: either the
    /// entry exists and the line points at it, or neither changed.
    async fn commit_bank_match(
        &mut self,
        club: &str,
        transaction_id: &str,
        entry: &LedgerEntry,
    ) -> SettlementResult<()>;
}

/// Trait for implementing custom ledger entry validation rules
pub trait LedgerEntryValidator: Send + Sync {
    /// Validate an entry before it is saved
    fn validate_entry(&self, entry: &LedgerEntry) -> SettlementResult<()>;
}

/// Default validator: non-empty target and non-negative amount
pub struct DefaultLedgerEntryValidator;

impl LedgerEntryValidator for DefaultLedgerEntryValidator {
    fn validate_entry(&self, entry: &LedgerEntry) -> SettlementResult<()> {
        if entry.entity_id.trim().is_empty() {
            return Err(SettlementError::Validation(
                "Ledger entry must reference an entity".to_string(),
            ));
        }

        if entry.amount < BigDecimal::from(0) {
            return Err(SettlementError::NegativeAmount {
                entry_id: entry.id.clone(),
                amount: entry.amount.clone(),
            });
        }

        Ok(())
    }
}
