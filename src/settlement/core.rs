//! Settlement engine that coordinates reads, week closes and ledger writes

use bigdecimal::BigDecimal;
use tracing::{info, warn};

use crate::config::SettlementConfig;
use crate::ledger::LedgerBook;
use crate::reconciliation::{AutoMatchClassifier, MatchCandidate, Suggestion};
use crate::settlement::aggregator::{AggregationInput, SettlementAggregator, SettlementView};
use crate::settlement::carry_forward::{week_index_of, CarryForwardResolver};
use crate::settlement::closer::{CloseCheck, WeekCloser};
use crate::settlement::rakeback::RateBook;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_rate_percent;

/// Main settlement system
///
/// Reads are full recomputations from storage; nothing computed is cached
/// between calls, so any write is visible to the next read.
pub struct SettlementEngine<S: SettlementStorage> {
    storage: S,
    book: LedgerBook<S>,
    aggregator: SettlementAggregator,
}

impl<S: SettlementStorage + Clone> SettlementEngine<S> {
    /// Create an engine with the default configuration
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, SettlementConfig::default())
    }

    pub fn with_config(storage: S, config: SettlementConfig) -> Self {
        Self {
            book: LedgerBook::new(storage.clone()),
            storage,
            aggregator: SettlementAggregator::new(config),
        }
    }

    /// Create an engine with a custom ledger entry validator
    pub fn with_validator(
        storage: S,
        config: SettlementConfig,
        validator: Box<dyn LedgerEntryValidator>,
    ) -> Self {
        Self {
            book: LedgerBook::with_validator(storage.clone(), validator),
            storage,
            aggregator: SettlementAggregator::new(config),
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        self.aggregator.config()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // Reads

    /// Settle every entity of a club week
    pub async fn compute_settlement(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<SettlementView> {
        let metrics = self.storage.get_weekly_metrics(club, week).await?;
        let ledger = self.storage.list_ledger_entries(club, week, None).await?;
        let history = self.storage.list_week_snapshots(club).await?;
        let explicit = self.storage.get_carry_forward_map(club, week).await?;
        let settlement = self.storage.get_settlement(club, week).await?;
        let snapshot = self.storage.get_rate_snapshot(club, week).await?;
        let fees = self.storage.get_fee_schedule(club).await?;

        if let Some(record) = settlement.as_ref() {
            if snapshot.is_none() && !record.status.is_editable() {
                warn!(
                    club,
                    week = %week,
                    status = ?record.status,
                    "week is not a draft but has no rate snapshot, using live rates"
                );
            }
        }

        let overrides = settlement
            .as_ref()
            .map(|s| s.rate_overrides.clone())
            .unwrap_or_default();
        let rates = RateBook::new(snapshot, overrides);
        let carry = CarryForwardResolver::new(
            club,
            week,
            week_index_of(&history, week),
            &history,
            explicit.as_ref(),
            &self.config().tolerance,
        );

        Ok(self.aggregator.aggregate(AggregationInput {
            club,
            week,
            metrics: &metrics,
            ledger,
            carry: &carry,
            rates: &rates,
            settlement: settlement.as_ref(),
            fees: &fees,
        }))
    }

    /// Propose entity links for the week's unlinked bank transactions
    pub async fn suggest_auto_matches(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<Vec<Suggestion>> {
        let view = self.compute_settlement(club, week).await?;
        let transactions = self.storage.list_bank_transactions(club, week).await?;
        let candidates: Vec<MatchCandidate> = view
            .entities
            .iter()
            .map(MatchCandidate::from_settlement)
            .collect();

        let classifier = AutoMatchClassifier::new(self.config().auto_match.clone(), week);
        Ok(classifier.suggest(&transactions, &candidates))
    }

    /// State of a week's close in storage
    pub async fn verify_week_close(&self, club: &str, week: WeekKey) -> SettlementResult<CloseCheck> {
        let settlement = self.storage.get_settlement(club, week).await?;
        let carry = self
            .storage
            .get_carry_forward_map(club, next_week(week))
            .await?;
        Ok(CloseCheck::inspect(settlement.as_ref(), carry.is_some()))
    }

    // Writes

    /// Finalize a week and hand its closing balances to the next week
    ///
    /// Closing an already FINAL week rewrites the balances frozen in its
    /// snapshot, so the carry map it hands on never changes.
    pub async fn close_week(&mut self, club: &str, week: WeekKey) -> SettlementResult<WeekClose> {
        let view = self.compute_settlement(club, week).await?;
        let settlement = self.storage.get_settlement(club, week).await?;
        let frozen = self
            .storage
            .list_week_snapshots(club)
            .await?
            .into_iter()
            .find(|snapshot| snapshot.week_start == week);
        let close = WeekCloser::plan(
            &view,
            settlement,
            frozen.as_ref(),
            chrono::Utc::now().naive_utc(),
        )?;

        self.storage.commit_week_close(&close).await?;
        info!(
            club,
            week = %week,
            carry_week = %close.carry_week(),
            entities = close.carry_forward.len(),
            warnings = view.warnings.len(),
            "week closed"
        );
        Ok(close)
    }

    /// Rewrite a missing carry map of a FINAL week
    ///
    /// The map is taken from the closed week's snapshot; only when the
    /// snapshot holds no balances is the week recomputed. The settlement
    /// itself is left untouched.
    pub async fn repair_week_close(
        &mut self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<CloseCheck> {
        let check = self.verify_week_close(club, week).await?;
        if check != CloseCheck::MissingCarryForward {
            return Ok(check);
        }

        let snapshot = self
            .storage
            .list_week_snapshots(club)
            .await?
            .into_iter()
            .find(|snapshot| snapshot.week_start == week);

        let carry = match snapshot.as_ref().and_then(WeekCloser::carry_from_snapshot) {
            Some(carry) => carry,
            None => {
                warn!(club, week = %week, "closed week has no snapshot balances, recomputing");
                self.compute_settlement(club, week).await?.closing_balances()
            }
        };

        self.storage
            .save_carry_forward_map(club, next_week(week), &carry)
            .await?;
        info!(club, week = %week, entities = carry.len(), "carry-forward map repaired");

        self.verify_week_close(club, week).await
    }

    /// Record a payment movement on a draft week
    pub async fn record_ledger_entry(
        &mut self,
        club: &str,
        entry: LedgerEntry,
    ) -> SettlementResult<()> {
        self.book.record_entry(club, entry).await
    }

    pub async fn delete_ledger_entry(&mut self, club: &str, entry_id: &str) -> SettlementResult<()> {
        self.book.delete_entry(club, entry_id).await
    }

    /// Set or clear the presentation type of an agent on a draft settlement
    pub async fn set_agent_payment_type(
        &mut self,
        club: &str,
        week: WeekKey,
        agent_id: &str,
        payment_type: Option<AgentPaymentType>,
    ) -> SettlementResult<SettlementRecord> {
        let metrics = self.storage.get_weekly_metrics(club, week).await?;
        if !metrics.agents.iter().any(|a| a.id == agent_id) {
            return Err(SettlementError::EntityNotFound(agent_id.to_string()));
        }

        let mut record = self.editable_settlement(club, week).await?;
        match payment_type {
            Some(kind) => record.payment_types.insert(agent_id.to_string(), kind),
            None => record.payment_types.remove(agent_id),
        };
        self.storage.save_settlement(&record).await?;
        info!(club, week = %week, agent = agent_id, payment_type = ?payment_type, "payment type set");
        Ok(record)
    }

    /// Set or clear the rakeback override of an agent or player
    pub async fn set_rakeback_rate(
        &mut self,
        club: &str,
        week: WeekKey,
        entity_id: &str,
        rate: Option<BigDecimal>,
    ) -> SettlementResult<SettlementRecord> {
        if let Some(rate) = rate.as_ref() {
            validate_rate_percent(rate)?;
        }

        let metrics = self.storage.get_weekly_metrics(club, week).await?;
        let known = metrics.agents.iter().any(|a| a.id == entity_id)
            || metrics.players.iter().any(|p| p.id == entity_id);
        if !known {
            return Err(SettlementError::EntityNotFound(entity_id.to_string()));
        }

        let mut record = self.editable_settlement(club, week).await?;
        match rate.as_ref() {
            Some(rate) => record
                .rate_overrides
                .insert(entity_id.to_string(), rate.clone()),
            None => record.rate_overrides.remove(entity_id),
        };
        self.storage.save_settlement(&record).await?;
        info!(club, week = %week, entity = entity_id, rate = ?rate, "rakeback override set");
        Ok(record)
    }

    /// Commit a bank transaction to an entity as a ledger entry
    ///
    /// The entry direction follows the statement sign: money the club
    /// received is an OUT movement, money it sent is IN. The entry and the
    /// link are written together, so a failed write leaves the line
    /// unlinked and without an entry.
    pub async fn apply_auto_match(
        &mut self,
        club: &str,
        week: WeekKey,
        transaction_id: &str,
        entity_id: &str,
    ) -> SettlementResult<LedgerEntry> {
        let transaction = self
            .storage
            .list_bank_transactions(club, week)
            .await?
            .into_iter()
            .find(|tx| tx.id == transaction_id)
            .ok_or_else(|| SettlementError::TransactionNotFound(transaction_id.to_string()))?;

        if let Some(linked) = transaction.linked_entry_id.as_deref() {
            return Err(SettlementError::Validation(format!(
                "Bank transaction '{}' is already linked to entry '{}'",
                transaction_id, linked
            )));
        }

        let view = self.compute_settlement(club, week).await?;
        if view.entity(entity_id).is_none() {
            return Err(SettlementError::EntityNotFound(entity_id.to_string()));
        }

        let entry = LedgerEntry::new(
            entity_id.to_string(),
            transaction.direction(),
            transaction.amount.abs(),
            week,
            "bank".to_string(),
        )
        .with_description(&transaction.memo);

        self.book
            .record_bank_match(club, transaction_id, entry.clone())
            .await?;
        info!(
            club,
            transaction = transaction_id,
            entity = entity_id,
            entry_id = %entry.id,
            "bank transaction applied"
        );
        Ok(entry)
    }

    /// Draft settlement of the week, created on first edit
    async fn editable_settlement(
        &self,
        club: &str,
        week: WeekKey,
    ) -> SettlementResult<SettlementRecord> {
        match self.storage.get_settlement(club, week).await? {
            Some(record) if !record.status.is_editable() => Err(SettlementError::SettlementLocked {
                club: club.to_string(),
                week,
                status: record.status,
            }),
            Some(record) => Ok(record),
            None => Ok(SettlementRecord::draft(club, week)),
        }
    }
}
