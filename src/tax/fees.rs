//! Operator fee schedule and DRE (operator profit) roll-up

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{CostItem, SettlementError};
use crate::utils::money::{apply_percent, round_cents, sum_cents};

/// What a fee percentage is charged on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeBase {
    Rake,
    Ggr,
    /// Rake plus GGR
    GrossRevenue,
}

/// A named percentage fee (platform fee, league fee, tax)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub name: String,
    /// Percentage, e.g. 8.0 for 8%
    pub rate: BigDecimal,
    pub base: FeeBase,
}

impl Fee {
    pub fn new(name: &str, rate: BigDecimal, base: FeeBase) -> Self {
        Self {
            name: name.to_string(),
            rate,
            base,
        }
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        if self.name.trim().is_empty() {
            return Err(FeeError::InvalidFee("fee name cannot be empty".to_string()));
        }
        if self.rate < BigDecimal::from(0) || self.rate > BigDecimal::from(100) {
            return Err(FeeError::InvalidRate(format!(
                "fee '{}' rate {} outside [0, 100]",
                self.name, self.rate
            )));
        }
        Ok(())
    }

    /// Fee amount in cents for the given revenue figures
    pub fn amount(&self, rake: &BigDecimal, ggr: &BigDecimal) -> BigDecimal {
        let base = match self.base {
            FeeBase::Rake => rake.clone(),
            FeeBase::Ggr => ggr.clone(),
            FeeBase::GrossRevenue => rake + ggr,
        };
        round_cents(&apply_percent(&base, &self.rate))
    }
}

/// Fees an operator pays on its revenue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub fees: Vec<Fee>,
}

impl FeeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fee, rejecting invalid rates and duplicate names
    pub fn add_fee(&mut self, fee: Fee) -> Result<(), FeeError> {
        fee.validate()?;
        if self.fees.iter().any(|f| f.name == fee.name) {
            return Err(FeeError::DuplicateFee(fee.name));
        }
        self.fees.push(fee);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        let mut names = BTreeSet::new();
        for fee in &self.fees {
            fee.validate()?;
            if !names.insert(fee.name.as_str()) {
                return Err(FeeError::DuplicateFee(fee.name.clone()));
            }
        }
        Ok(())
    }

    pub fn lines(&self, rake: &BigDecimal, ggr: &BigDecimal) -> Vec<FeeLine> {
        self.fees
            .iter()
            .map(|fee| FeeLine {
                name: fee.name.clone(),
                base: fee.base,
                rate: fee.rate.clone(),
                amount: fee.amount(rake, ggr),
            })
            .collect()
    }
}

/// One charged fee in a DRE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLine {
    pub name: String,
    pub base: FeeBase,
    pub rate: BigDecimal,
    pub amount: BigDecimal,
}

/// Operator result of one subclub for one week
///
/// `resultado = receita_bruta - total_taxes - total_costs - rakeback`, a pure
/// roll-up of already-computed entity figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreSummary {
    pub subclub: Option<String>,
    pub rake: BigDecimal,
    pub ggr: BigDecimal,
    pub receita_bruta: BigDecimal,
    pub fees: Vec<FeeLine>,
    pub total_taxes: BigDecimal,
    pub costs: Vec<CostItem>,
    pub total_costs: BigDecimal,
    pub rakeback: BigDecimal,
    pub resultado: BigDecimal,
}

impl DreSummary {
    pub fn compute(
        subclub: Option<String>,
        rake: &BigDecimal,
        ggr: &BigDecimal,
        rakeback: &BigDecimal,
        costs: Vec<CostItem>,
        schedule: &FeeSchedule,
    ) -> Self {
        let rake = round_cents(rake);
        let ggr = round_cents(ggr);
        let receita_bruta = round_cents(&(&rake + &ggr));
        let fees = schedule.lines(&rake, &ggr);
        let total_taxes = sum_cents(fees.iter().map(|line| &line.amount));
        let total_costs = sum_cents(costs.iter().map(|cost| &cost.amount));
        let rakeback = round_cents(rakeback);
        let resultado = round_cents(&(&receita_bruta - &total_taxes - &total_costs - &rakeback));

        Self {
            subclub,
            rake,
            ggr,
            receita_bruta,
            fees,
            total_taxes,
            costs,
            total_costs,
            rakeback,
            resultado,
        }
    }
}

/// Fee-related errors
#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("Invalid fee rate: {0}")]
    InvalidRate(String),
    #[error("Invalid fee: {0}")]
    InvalidFee(String),
    #[error("Duplicate fee: {0}")]
    DuplicateFee(String),
}

impl From<FeeError> for SettlementError {
    fn from(err: FeeError) -> Self {
        SettlementError::Validation(err.to_string())
    }
}
