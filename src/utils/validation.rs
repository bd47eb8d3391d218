//! Validation utilities

use crate::traits::*;
use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> SettlementResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(SettlementError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate a rakeback percentage
pub fn validate_rate_percent(rate: &BigDecimal) -> SettlementResult<()> {
    if *rate < BigDecimal::from(0) || *rate > BigDecimal::from(100) {
        return Err(SettlementError::Validation(format!(
            "Rakeback rate {} must lie between 0 and 100",
            rate
        )));
    }
    Ok(())
}

/// Validate an entity key as typed by an operator or importer
pub fn validate_entity_key(key: &str) -> SettlementResult<()> {
    if key.trim().is_empty() {
        return Err(SettlementError::Validation(
            "Entity key cannot be empty".to_string(),
        ));
    }

    if key.len() > 64 {
        return Err(SettlementError::Validation(
            "Entity key cannot exceed 64 characters".to_string(),
        ));
    }

    // alphanumeric, dashes, underscores, dots
    if !key
        .trim()
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(SettlementError::Validation(format!(
            "Entity key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}

/// Validate a payment method label (pix, cash, ted...)
pub fn validate_payment_method(method: &str) -> SettlementResult<()> {
    if method.trim().is_empty() {
        return Err(SettlementError::Validation(
            "Payment method cannot be empty".to_string(),
        ));
    }

    if method.len() > 32 {
        return Err(SettlementError::Validation(
            "Payment method cannot exceed 32 characters".to_string(),
        ));
    }

    Ok(())
}

/// Stricter entry validator for operator-facing input
///
/// On top of the default checks it rejects zero amounts, malformed keys,
/// missing payment methods and overlong descriptions.
pub struct StrictLedgerEntryValidator;

impl LedgerEntryValidator for StrictLedgerEntryValidator {
    fn validate_entry(&self, entry: &LedgerEntry) -> SettlementResult<()> {
        DefaultLedgerEntryValidator.validate_entry(entry)?;

        validate_entity_key(&entry.entity_id)?;
        validate_positive_amount(&entry.amount)?;
        validate_payment_method(&entry.method)?;

        if let Some(description) = &entry.description {
            if description.len() > 500 {
                return Err(SettlementError::Validation(
                    "Entry description cannot exceed 500 characters".to_string(),
                ));
            }
        }

        Ok(())
    }
}
