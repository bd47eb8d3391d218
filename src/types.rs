//! Core types and data structures for the settlement engine

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A week is addressed by the date it starts on
pub type WeekKey = NaiveDate;

/// Canonical entity id -> signed balance
pub type BalanceMap = BTreeMap<String, BigDecimal>;

/// Balances a closed week hands to the following week
pub type CarryForwardMap = BalanceMap;

/// Start of the week after `week`
pub fn next_week(week: WeekKey) -> WeekKey {
    week + Duration::days(7)
}

/// Whether a settled entity is an agency or an individual player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Agent,
    Player,
}

/// Per-agent weekly facts supplied by the metrics collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Internal id
    pub id: String,
    /// Numeric id used by the poker platform export
    pub external_id: Option<String>,
    pub name: String,
    pub subclub: Option<String>,
    /// Players of a direct agent are settled one by one
    #[serde(default)]
    pub is_direct: bool,
    /// Live rakeback percentage (e.g. 10 for 10%)
    pub rakeback_rate: Option<BigDecimal>,
}

impl AgentMetrics {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            external_id: None,
            name: name.to_string(),
            subclub: None,
            is_direct: false,
            rakeback_rate: None,
        }
    }
}

/// Per-player weekly facts supplied by the metrics collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMetrics {
    pub id: String,
    pub external_id: Option<String>,
    pub nickname: String,
    /// Internal or external id of the owning agent
    pub agent_id: Option<String>,
    /// Copied from the agent at import time; overrides the agent row when set
    pub agent_is_direct: Option<bool>,
    pub subclub: Option<String>,
    /// Winnings (negative when the player lost)
    pub ganhos: BigDecimal,
    pub rake: BigDecimal,
    pub ggr: BigDecimal,
    /// Player-specific rakeback percentage, beats the agent's rate
    pub rakeback_rate: Option<BigDecimal>,
}

impl PlayerMetrics {
    pub fn new(id: &str, nickname: &str, ganhos: BigDecimal, rake: BigDecimal) -> Self {
        Self {
            id: id.to_string(),
            external_id: None,
            nickname: nickname.to_string(),
            agent_id: None,
            agent_is_direct: None,
            subclub: None,
            ganhos,
            rake,
            ggr: BigDecimal::from(0),
            rakeback_rate: None,
        }
    }
}

/// Operator-side cost booked against a week (DRE input)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostItem {
    pub subclub: Option<String>,
    pub description: String,
    pub amount: BigDecimal,
}

/// Everything the metrics collaborator knows about one club week
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyMetrics {
    pub agents: Vec<AgentMetrics>,
    pub players: Vec<PlayerMetrics>,
    #[serde(default)]
    pub costs: Vec<CostItem>,
}

/// Movement direction of a ledger entry
///
/// `In` means the club paid the entity, `Out` means the entity paid the club.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

/// A recorded payment movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    /// Free-form key the entry was addressed to (any alias of the entity)
    pub entity_id: String,
    pub direction: Direction,
    pub amount: BigDecimal,
    pub week_start: WeekKey,
    pub method: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

impl LedgerEntry {
    /// Create a new entry with a generated id
    pub fn new(
        entity_id: String,
        direction: Direction,
        amount: BigDecimal,
        week_start: WeekKey,
        method: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id,
            direction,
            amount,
            week_start,
            method,
            description: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Signed contribution to `pago`
    pub fn signed_amount(&self) -> BigDecimal {
        match self.direction {
            Direction::In => self.amount.clone(),
            Direction::Out => -self.amount.clone(),
        }
    }
}

/// Lifecycle of a club week settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    Draft,
    Final,
    Void,
}

impl SettlementStatus {
    /// Only drafts accept edits and new ledger entries
    pub fn is_editable(&self) -> bool {
        matches!(self, SettlementStatus::Draft)
    }
}

/// How an agent's statement is presented; does not change any figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPaymentType {
    Fiado,
    Avista,
}

/// One settlement per (club, week)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub club: String,
    pub week_start: WeekKey,
    pub status: SettlementStatus,
    /// Agent id -> presentation override
    pub payment_types: BTreeMap<String, AgentPaymentType>,
    /// Entity id -> rakeback percentage edited on this settlement
    pub rate_overrides: BTreeMap<String, BigDecimal>,
    pub created_at: NaiveDateTime,
    pub finalized_at: Option<NaiveDateTime>,
}

impl SettlementRecord {
    /// Create a new draft settlement
    pub fn draft(club: &str, week_start: WeekKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            club: club.to_string(),
            week_start,
            status: SettlementStatus::Draft,
            payment_types: BTreeMap::new(),
            rate_overrides: BTreeMap::new(),
            created_at: chrono::Utc::now().naive_utc(),
            finalized_at: None,
        }
    }
}

/// Rates frozen when a week is locked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub agents: BTreeMap<String, BigDecimal>,
    pub players: BTreeMap<String, BigDecimal>,
}

/// Historical state of one club week as seen by carry-forward resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSnapshot {
    pub week_start: WeekKey,
    pub locked: bool,
    /// Closing balance per canonical entity id, written at week close
    pub balances: Option<BalanceMap>,
    /// Flat per-entity ledger balance kept by older records
    pub legacy_balances: Option<BalanceMap>,
    pub rates: Option<RateSnapshot>,
}

impl WeekSnapshot {
    pub fn open(week_start: WeekKey) -> Self {
        Self {
            week_start,
            locked: false,
            balances: None,
            legacy_balances: None,
            rates: None,
        }
    }

    pub fn locked(week_start: WeekKey, balances: BalanceMap) -> Self {
        Self {
            week_start,
            locked: true,
            balances: Some(balances),
            legacy_balances: None,
            rates: None,
        }
    }
}

/// Bank/PIX statement line awaiting reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: String,
    pub date: NaiveDate,
    /// Positive when the club received money, negative when it paid out
    pub amount: BigDecimal,
    pub memo: String,
    pub payer_name: Option<String>,
    /// Id captured by the importer (PIX key mapping, OFX memo field)
    pub entity_ref: Option<String>,
    /// Ledger entry this line was committed to, if any
    pub linked_entry_id: Option<String>,
}

impl BankTransaction {
    /// Ledger direction implied by the statement sign
    pub fn direction(&self) -> Direction {
        if self.amount < BigDecimal::from(0) {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Signed contribution to `pago` if this line were committed
    pub fn signed_amount(&self) -> BigDecimal {
        -self.amount.clone()
    }
}

/// Data-integrity problem detected while computing a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityWarning {
    /// Key claimed by more than one canonical entity
    pub key: String,
    pub kept_entity: String,
    pub rejected_entity: String,
    pub message: String,
}

/// Errors that can occur in the settlement engine
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Negative ledger amount {amount} on entry {entry_id}")]
    NegativeAmount { entry_id: String, amount: BigDecimal },
    #[error("Settlement for club {club} week {week} is {status:?}")]
    SettlementLocked {
        club: String,
        week: WeekKey,
        status: SettlementStatus,
    },
    #[error("Settlement not found: club {club} week {week}")]
    SettlementNotFound { club: String, week: WeekKey },
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(String),
    #[error("Bank transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Entity not found: {0}")]
    EntityNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;
