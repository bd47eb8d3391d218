//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ledger::normalize_key;
use crate::tax::FeeSchedule;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct ClubState {
    metrics: BTreeMap<WeekKey, WeeklyMetrics>,
    ledger: BTreeMap<String, LedgerEntry>,
    snapshots: BTreeMap<WeekKey, WeekSnapshot>,
    carry_forward: BTreeMap<WeekKey, CarryForwardMap>,
    settlements: BTreeMap<WeekKey, SettlementRecord>,
    fees: FeeSchedule,
    bank: BTreeMap<String, (WeekKey, BankTransaction)>,
}

#[derive(Debug, Default)]
struct State {
    clubs: HashMap<String, ClubState>,
    fail_commits: bool,
}

impl State {
    fn club(&self, club: &str) -> Option<&ClubState> {
        self.clubs.get(club)
    }

    fn club_mut(&mut self, club: &str) -> &mut ClubState {
        self.clubs.entry(club.to_string()).or_default()
    }
}

/// In-memory storage implementation for testing and development
///
/// Clones share state. All data sits behind a single lock, so a week close
/// is applied in one critical section.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SettlementResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| SettlementError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> SettlementResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| SettlementError::Storage("memory storage lock poisoned".to_string()))
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> SettlementResult<()> {
        self.write()?.clubs.clear();
        Ok(())
    }

    /// Set the weekly metrics a club reports for a week
    pub fn put_metrics(
        &self,
        club: &str,
        week: WeekKey,
        metrics: WeeklyMetrics,
    ) -> SettlementResult<()> {
        self.write()?.club_mut(club).metrics.insert(week, metrics);
        Ok(())
    }

    /// Insert or replace a week snapshot (imported history, legacy rows)
    pub fn put_snapshot(&self, club: &str, snapshot: WeekSnapshot) -> SettlementResult<()> {
        self.write()?
            .club_mut(club)
            .snapshots
            .insert(snapshot.week_start, snapshot);
        Ok(())
    }

    pub fn put_fee_schedule(&self, club: &str, fees: FeeSchedule) -> SettlementResult<()> {
        fees.validate()?;
        self.write()?.club_mut(club).fees = fees;
        Ok(())
    }

    /// Add an imported bank line to a week's statement
    pub fn put_bank_transaction(
        &self,
        club: &str,
        week: WeekKey,
        transaction: BankTransaction,
    ) -> SettlementResult<()> {
        self.write()?
            .club_mut(club)
            .bank
            .insert(transaction.id.clone(), (week, transaction));
        Ok(())
    }

    /// Make every following `commit_week_close` and `commit_bank_match`
    /// fail without writing
    pub fn set_fail_commits(&self, fail: bool) -> SettlementResult<()> {
        self.write()?.fail_commits = fail;
        Ok(())
    }

    /// Remove a carry map, simulating a close interrupted before that write
    pub fn drop_carry_forward_map(&self, club: &str, week: WeekKey) -> SettlementResult<()> {
        self.write()?.club_mut(club).carry_forward.remove(&week);
        Ok(())
    }
}

#[async_trait]
impl SettlementStorage for MemoryStorage {
    async fn get_weekly_metrics(&self, club: &str, week: WeekKey) -> SettlementResult<WeeklyMetrics> {
        Ok(self
            .read()?
            .club(club)
            .and_then(|c| c.metrics.get(&week))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_ledger_entries(
        &self,
        club: &str,
        week: WeekKey,
        entity_id: Option<&str>,
    ) -> SettlementResult<Vec<LedgerEntry>> {
        let state = self.read()?;
        let Some(club_state) = state.club(club) else {
            return Ok(Vec::new());
        };
        let wanted = entity_id.map(normalize_key);

        Ok(club_state
            .ledger
            .values()
            .filter(|entry| entry.week_start == week)
            .filter(|entry| {
                wanted
                    .as_ref()
                    .map_or(true, |key| normalize_key(&entry.entity_id) == *key)
            })
            .cloned()
            .collect())
    }

    async fn get_ledger_entry(
        &self,
        club: &str,
        entry_id: &str,
    ) -> SettlementResult<Option<LedgerEntry>> {
        Ok(self
            .read()?
            .club(club)
            .and_then(|c| c.ledger.get(entry_id))
            .cloned())
    }

    async fn save_ledger_entry(&mut self, club: &str, entry: &LedgerEntry) -> SettlementResult<()> {
        self.write()?
            .club_mut(club)
            .ledger
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_ledger_entry(&mut self, club: &str, entry_id: &str) -> SettlementResult<()> {
        let mut state = self.write()?;
        if state.club_mut(club).ledger.remove(entry_id).is_some() {
            Ok(())
        } else {
            Err(SettlementError::EntryNotFound(entry_id.to_string()))
        }
    }

    /// Snapshots plus an open placeholder for every week that only has
    /// metrics or a settlement
    async fn list_week_snapshots(&self, club: &str) -> SettlementResult<Vec<WeekSnapshot>> {
        let state = self.read()?;
        let Some(club_state) = state.club(club) else {
            return Ok(Vec::new());
        };

        let weeks: BTreeSet<WeekKey> = club_state
            .snapshots
            .keys()
            .chain(club_state.metrics.keys())
            .chain(club_state.settlements.keys())
            .copied()
            .collect();

        Ok(weeks
            .into_iter()
            .map(|week| {
                club_state
                    .snapshots
                    .get(&week)
                    .cloned()
                    .unwrap_or_else(|| WeekSnapshot::open(week))
            })
            .collect())
    }

    async fn get_carry_forward_map(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Option<CarryForwardMap>> {
        Ok(self
            .read()?
            .club(club)
            .and_then(|c| c.carry_forward.get(&week))
            .cloned())
    }

    async fn save_carry_forward_map(
        &mut self,
        club: &str,
        week: WeekKey,
        balances: &CarryForwardMap,
    ) -> SettlementResult<()> {
        self.write()?
            .club_mut(club)
            .carry_forward
            .insert(week, balances.clone());
        Ok(())
    }

    async fn get_settlement(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Option<SettlementRecord>> {
        Ok(self
            .read()?
            .club(club)
            .and_then(|c| c.settlements.get(&week))
            .cloned())
    }

    async fn save_settlement(&mut self, settlement: &SettlementRecord) -> SettlementResult<()> {
        self.write()?
            .club_mut(&settlement.club)
            .settlements
            .insert(settlement.week_start, settlement.clone());
        Ok(())
    }

    async fn commit_week_close(&mut self, close: &WeekClose) -> SettlementResult<()> {
        let mut state = self.write()?;
        if state.fail_commits {
            return Err(SettlementError::Storage(format!(
                "commit of club {} week {} rejected",
                close.club, close.week_start
            )));
        }

        let club = state.club_mut(&close.club);
        let mut snapshot = close.snapshot.clone();
        if snapshot.legacy_balances.is_none() {
            snapshot.legacy_balances = club
                .snapshots
                .get(&close.week_start)
                .and_then(|existing| existing.legacy_balances.clone());
        }
        club.snapshots.insert(close.week_start, snapshot);
        club.carry_forward
            .insert(close.carry_week(), close.carry_forward.clone());
        club.settlements
            .insert(close.week_start, close.settlement.clone());
        Ok(())
    }

    async fn get_fee_schedule(&self, club: &str) -> SettlementResult<FeeSchedule> {
        Ok(self
            .read()?
            .club(club)
            .map(|c| c.fees.clone())
            .unwrap_or_default())
    }

    async fn list_bank_transactions(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Vec<BankTransaction>> {
        Ok(self
            .read()?
            .club(club)
            .map(|c| {
                c.bank
                    .values()
                    .filter(|(tx_week, _)| *tx_week == week)
                    .map(|(_, tx)| tx.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_bank_match(
        &mut self,
        club: &str,
        transaction_id: &str,
        entry: &LedgerEntry,
    ) -> SettlementResult<()> {
        let mut state = self.write()?;
        if state.fail_commits {
            return Err(SettlementError::Storage(format!(
                "match of bank line {} rejected",
                transaction_id
            )));
        }

        let club = state.club_mut(club);
        let (_, transaction) = club
            .bank
            .get_mut(transaction_id)
            .ok_or_else(|| SettlementError::TransactionNotFound(transaction_id.to_string()))?;
        if let Some(linked) = transaction.linked_entry_id.as_deref() {
            return Err(SettlementError::Validation(format!(
                "Bank transaction '{}' is already linked to entry '{}'",
                transaction_id, linked
            )));
        }
        transaction.linked_entry_id = Some(entry.id.clone());
        club.ledger.insert(entry.id.clone(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn week(day: u32) -> WeekKey {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    #[tokio::test]
    async fn test_known_weeks_include_metrics_only_weeks() {
        let storage = MemoryStorage::new();
        storage
            .put_snapshot("club", WeekSnapshot::locked(week(1), BalanceMap::new()))
            .unwrap();
        storage
            .put_metrics("club", week(15), WeeklyMetrics::default())
            .unwrap();

        let history = storage.list_week_snapshots("club").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].locked);
        assert!(!history[1].locked);
        assert_eq!(storage.get_locked_weeks("club").await.unwrap(), vec![week(1)]);
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let mut storage = MemoryStorage::new();
        storage.set_fail_commits(true).unwrap();

        let mut settlement = SettlementRecord::draft("club", week(1));
        settlement.status = SettlementStatus::Final;
        let close = WeekClose {
            club: "club".to_string(),
            week_start: week(1),
            snapshot: WeekSnapshot::locked(week(1), BalanceMap::new()),
            carry_forward: CarryForwardMap::new(),
            settlement,
        };

        assert!(storage.commit_week_close(&close).await.is_err());
        assert!(storage.get_settlement("club", week(1)).await.unwrap().is_none());
        assert!(storage
            .get_carry_forward_map("club", week(8))
            .await
            .unwrap()
            .is_none());

        storage.set_fail_commits(false).unwrap();
        storage.commit_week_close(&close).await.unwrap();
        assert!(storage
            .get_carry_forward_map("club", week(8))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_entity_filter_is_normalized() {
        let mut storage = MemoryStorage::new();
        let entry = LedgerEntry::new(
            "CP_7001".to_string(),
            Direction::In,
            BigDecimal::from(10),
            week(1),
            "pix".to_string(),
        );
        storage.save_ledger_entry("club", &entry).await.unwrap();

        let found = storage
            .list_ledger_entries("club", week(1), Some("cp_7001 "))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(storage
            .list_ledger_entries("club", week(8), None)
            .await
            .unwrap()
            .is_empty());
    }

    fn bank_line(id: &str) -> BankTransaction {
        BankTransaction {
            id: id.to_string(),
            date: week(2),
            amount: BigDecimal::from(-25),
            memo: "PIX ENVIADO".to_string(),
            payer_name: None,
            entity_ref: None,
            linked_entry_id: None,
        }
    }

    fn payout(amount: i64) -> LedgerEntry {
        LedgerEntry::new(
            "p1".to_string(),
            Direction::In,
            BigDecimal::from(amount),
            week(1),
            "bank".to_string(),
        )
    }

    #[tokio::test]
    async fn test_match_unknown_transaction() {
        let mut storage = MemoryStorage::new();
        let result = storage.commit_bank_match("club", "nope", &payout(25)).await;
        assert!(matches!(result, Err(SettlementError::TransactionNotFound(_))));
        assert!(storage
            .list_ledger_entries("club", week(1), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_bank_match_is_all_or_nothing() {
        let mut storage = MemoryStorage::new();
        storage.put_bank_transaction("club", week(1), bank_line("tx-1")).unwrap();
        let entry = payout(25);

        storage.set_fail_commits(true).unwrap();
        assert!(storage.commit_bank_match("club", "tx-1", &entry).await.is_err());
        assert!(storage.get_ledger_entry("club", &entry.id).await.unwrap().is_none());
        let lines = storage.list_bank_transactions("club", week(1)).await.unwrap();
        assert_eq!(lines[0].linked_entry_id, None);

        storage.set_fail_commits(false).unwrap();
        storage.commit_bank_match("club", "tx-1", &entry).await.unwrap();
        let lines = storage.list_bank_transactions("club", week(1)).await.unwrap();
        assert_eq!(lines[0].linked_entry_id.as_deref(), Some(entry.id.as_str()));

        let second = payout(25);
        assert!(matches!(
            storage.commit_bank_match("club", "tx-1", &second).await,
            Err(SettlementError::Validation(_))
        ));
        assert!(storage.get_ledger_entry("club", &second.id).await.unwrap().is_none());
    }
}
