//! Ledger entry writes

use tracing::info;

use crate::traits::*;
use crate::types::*;

/// Write side of the payment ledger
///
/// Entries may only be added to or removed from weeks whose settlement is
/// still a draft (or has not been opened yet). Nothing is cached: the next
/// settlement read recomputes from storage.
pub struct LedgerBook<S: SettlementStorage> {
    storage: S,
    validator: Box<dyn LedgerEntryValidator>,
}

impl<S: SettlementStorage> LedgerBook<S> {
    /// Create a new ledger book
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultLedgerEntryValidator),
        }
    }

    /// Create a new ledger book with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn LedgerEntryValidator>) -> Self {
        Self { storage, validator }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Record a new entry
    pub async fn record_entry(&mut self, club: &str, entry: LedgerEntry) -> SettlementResult<()> {
        self.check_new_entry(club, &entry).await?;

        self.storage.save_ledger_entry(club, &entry).await?;
        info!(
            club,
            entry_id = %entry.id,
            entity = %entry.entity_id,
            direction = ?entry.direction,
            amount = %entry.amount,
            "ledger entry recorded"
        );
        Ok(())
    }

    /// Record an entry committed from a bank line, linking the line in the
    /// same write
    pub async fn record_bank_match(
        &mut self,
        club: &str,
        transaction_id: &str,
        entry: LedgerEntry,
    ) -> SettlementResult<()> {
        self.check_new_entry(club, &entry).await?;

        self.storage
            .commit_bank_match(club, transaction_id, &entry)
            .await?;
        info!(
            club,
            entry_id = %entry.id,
            entity = %entry.entity_id,
            transaction = transaction_id,
            amount = %entry.amount,
            "bank match recorded"
        );
        Ok(())
    }

    async fn check_new_entry(&self, club: &str, entry: &LedgerEntry) -> SettlementResult<()> {
        self.validator.validate_entry(entry)?;
        self.ensure_week_open(club, entry.week_start).await?;

        if self.storage.get_ledger_entry(club, &entry.id).await?.is_some() {
            return Err(SettlementError::Validation(format!(
                "Ledger entry '{}' already exists",
                entry.id
            )));
        }
        Ok(())
    }

    /// Delete an entry
    pub async fn delete_entry(&mut self, club: &str, entry_id: &str) -> SettlementResult<()> {
        let entry = self
            .storage
            .get_ledger_entry(club, entry_id)
            .await?
            .ok_or_else(|| SettlementError::EntryNotFound(entry_id.to_string()))?;

        self.ensure_week_open(club, entry.week_start).await?;
        self.storage.delete_ledger_entry(club, entry_id).await?;
        info!(club, entry_id, "ledger entry deleted");
        Ok(())
    }

    /// Fail unless the week still accepts ledger movements
    pub async fn ensure_week_open(&self, club: &str, week: WeekKey) -> SettlementResult<()> {
        match self.storage.get_settlement(club, week).await? {
            Some(settlement) if !settlement.status.is_editable() => {
                Err(SettlementError::SettlementLocked {
                    club: club.to_string(),
                    week,
                    status: settlement.status,
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn week() -> WeekKey {
        NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
    }

    fn entry(id: &str, amount: i64) -> LedgerEntry {
        LedgerEntry::new(
            "ag-1".to_string(),
            Direction::In,
            BigDecimal::from(amount),
            week(),
            "pix".to_string(),
        )
        .with_id(id)
    }

    #[tokio::test]
    async fn test_record_and_delete() {
        let storage = MemoryStorage::new();
        let mut book = LedgerBook::new(storage.clone());

        book.record_entry("club", entry("e1", 30)).await.unwrap();
        assert_eq!(
            storage.list_ledger_entries("club", week(), None).await.unwrap().len(),
            1
        );

        book.delete_entry("club", "e1").await.unwrap();
        assert!(storage
            .list_ledger_entries("club", week(), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let mut book = LedgerBook::new(MemoryStorage::new());
        let result = book.record_entry("club", entry("e1", -5)).await;
        assert!(matches!(result, Err(SettlementError::NegativeAmount { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let mut book = LedgerBook::new(MemoryStorage::new());
        book.record_entry("club", entry("e1", 5)).await.unwrap();
        let result = book.record_entry("club", entry("e1", 7)).await;
        assert!(matches!(result, Err(SettlementError::Validation(_))));
    }

    #[tokio::test]
    async fn test_final_week_rejects_writes() {
        let mut storage = MemoryStorage::new();
        let mut settlement = SettlementRecord::draft("club", week());
        storage.save_ledger_entry("club", &entry("old", 10)).await.unwrap();
        settlement.status = SettlementStatus::Final;
        storage.save_settlement(&settlement).await.unwrap();

        let mut book = LedgerBook::new(storage);
        let result = book.record_entry("club", entry("e2", 5)).await;
        assert!(matches!(
            result,
            Err(SettlementError::SettlementLocked {
                status: SettlementStatus::Final,
                ..
            })
        ));

        let result = book.delete_entry("club", "old").await;
        assert!(matches!(result, Err(SettlementError::SettlementLocked { .. })));
    }

    #[tokio::test]
    async fn test_delete_missing_entry() {
        let mut book = LedgerBook::new(MemoryStorage::new());
        let result = book.delete_entry("club", "nope").await;
        assert!(matches!(result, Err(SettlementError::EntryNotFound(_))));
    }
}
