//! Week close planning
//!
//! Closing a week freezes three things in one write: the week's snapshot
//! (closing balances and applied rates), the explicit carry map of the
//! following week, and the FINAL flag of the settlement. [`WeekCloser`]
//! only builds that write; the storage commits it atomically.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::settlement::aggregator::SettlementView;
use crate::traits::WeekClose;
use crate::types::*;

/// Consistency of a week's close as seen in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCheck {
    Consistent,
    /// Settlement missing or still a draft
    NotClosed,
    /// Settlement is FINAL but the following week has no carry map
    MissingCarryForward,
}

impl CloseCheck {
    pub fn inspect(settlement: Option<&SettlementRecord>, carry_written: bool) -> Self {
        match settlement.map(|s| s.status) {
            Some(SettlementStatus::Final) if carry_written => CloseCheck::Consistent,
            Some(SettlementStatus::Final) => CloseCheck::MissingCarryForward,
            _ => CloseCheck::NotClosed,
        }
    }
}

pub struct WeekCloser;

impl WeekCloser {
    /// Build the close of `view`'s week
    ///
    /// `frozen` is the week's stored snapshot, if any. Closing a FINAL week
    /// again rewrites the balances frozen in that snapshot rather than the
    /// current figures, so later changes to metrics or earlier carry maps
    /// never alter a locked week's output. A VOID settlement cannot be
    /// closed.
    pub fn plan(
        view: &SettlementView,
        settlement: Option<SettlementRecord>,
        frozen: Option<&WeekSnapshot>,
        now: NaiveDateTime,
    ) -> SettlementResult<WeekClose> {
        let mut settlement =
            settlement.unwrap_or_else(|| SettlementRecord::draft(&view.club, view.week_start));

        match settlement.status {
            SettlementStatus::Void => {
                return Err(SettlementError::SettlementLocked {
                    club: view.club.clone(),
                    week: view.week_start,
                    status: SettlementStatus::Void,
                });
            }
            SettlementStatus::Draft => {
                settlement.status = SettlementStatus::Final;
                settlement.finalized_at = Some(now);
            }
            SettlementStatus::Final => {
                if let Some(stored) = frozen.filter(|s| s.locked && s.balances.is_some()) {
                    return Ok(Self::replay(view, stored, settlement));
                }
            }
        }

        let balances = view.closing_balances();
        let snapshot = WeekSnapshot {
            week_start: view.week_start,
            locked: true,
            balances: Some(balances.clone()),
            legacy_balances: None,
            rates: Some(view.applied_rates.clone()),
        };

        Ok(WeekClose {
            club: view.club.clone(),
            week_start: view.week_start,
            snapshot,
            carry_forward: balances,
            settlement,
        })
    }

    /// Close rebuilt from a locked snapshot instead of current figures
    fn replay(
        view: &SettlementView,
        stored: &WeekSnapshot,
        settlement: SettlementRecord,
    ) -> WeekClose {
        let mut snapshot = stored.clone();
        if snapshot.rates.is_none() {
            snapshot.rates = Some(view.applied_rates.clone());
        }
        WeekClose {
            club: view.club.clone(),
            week_start: view.week_start,
            carry_forward: snapshot.balances.clone().unwrap_or_default(),
            snapshot,
            settlement,
        }
    }

    /// Carry map re-derived from a closed week's snapshot
    pub fn carry_from_snapshot(snapshot: &WeekSnapshot) -> Option<CarryForwardMap> {
        if !snapshot.locked {
            return None;
        }
        snapshot
            .balances
            .clone()
            .or_else(|| snapshot.legacy_balances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::aggregator::SettlementTotals;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn week() -> WeekKey {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn now() -> NaiveDateTime {
        week().and_hms_opt(23, 0, 0).unwrap()
    }

    fn empty_view() -> SettlementView {
        SettlementView {
            club: "club".to_string(),
            week_start: week(),
            settlement_status: None,
            locked: false,
            entities: Vec::new(),
            totals: SettlementTotals {
                entity_count: 0,
                ganhos: BigDecimal::from(0),
                rake: BigDecimal::from(0),
                ggr: BigDecimal::from(0),
                rakeback: BigDecimal::from(0),
                resultado: BigDecimal::from(0),
                saldo_anterior: BigDecimal::from(0),
                total_devido: BigDecimal::from(0),
                total_in: BigDecimal::from(0),
                total_out: BigDecimal::from(0),
                pago: BigDecimal::from(0),
                pendente: BigDecimal::from(0),
                status_counts: BTreeMap::new(),
            },
            dre: Vec::new(),
            applied_rates: RateSnapshot::default(),
            unmatched_entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_plan_flips_draft_to_final() {
        let close = WeekCloser::plan(&empty_view(), None, None, now()).unwrap();
        assert_eq!(close.settlement.status, SettlementStatus::Final);
        assert_eq!(close.settlement.finalized_at, Some(now()));
        assert!(close.snapshot.locked);
        assert_eq!(close.carry_week(), next_week(week()));
    }

    #[test]
    fn test_reclose_keeps_finalized_at() {
        let first = WeekCloser::plan(&empty_view(), None, None, now()).unwrap();
        let later = now() + chrono::Duration::hours(5);
        let again = WeekCloser::plan(&empty_view(), Some(first.settlement.clone()), None, later).unwrap();
        assert_eq!(again.settlement, first.settlement);
    }

    #[test]
    fn test_reclose_replays_frozen_balances() {
        let first = WeekCloser::plan(&empty_view(), None, None, now()).unwrap();
        let mut frozen = first.snapshot.clone();
        let mut balances = BalanceMap::new();
        balances.insert("p1".to_string(), BigDecimal::from(-80));
        frozen.balances = Some(balances.clone());

        // the current view settles nobody, the stored balances still win
        let again =
            WeekCloser::plan(&empty_view(), Some(first.settlement.clone()), Some(&frozen), now())
                .unwrap();
        assert_eq!(again.carry_forward, balances);
        assert_eq!(again.snapshot, frozen);

        // a draft is computed from the view whatever is stored
        let draft = WeekCloser::plan(&empty_view(), None, Some(&frozen), now()).unwrap();
        assert!(draft.carry_forward.is_empty());
    }

    #[test]
    fn test_void_cannot_close() {
        let mut record = SettlementRecord::draft("club", week());
        record.status = SettlementStatus::Void;
        let result = WeekCloser::plan(&empty_view(), Some(record), None, now());
        assert!(matches!(
            result,
            Err(SettlementError::SettlementLocked {
                status: SettlementStatus::Void,
                ..
            })
        ));
    }

    #[test]
    fn test_close_check() {
        let mut record = SettlementRecord::draft("club", week());
        assert_eq!(CloseCheck::inspect(None, false), CloseCheck::NotClosed);
        assert_eq!(CloseCheck::inspect(Some(&record), true), CloseCheck::NotClosed);
        record.status = SettlementStatus::Final;
        assert_eq!(
            CloseCheck::inspect(Some(&record), false),
            CloseCheck::MissingCarryForward
        );
        assert_eq!(CloseCheck::inspect(Some(&record), true), CloseCheck::Consistent);
    }

    #[test]
    fn test_carry_from_snapshot() {
        let mut balances = BalanceMap::new();
        balances.insert("ag-1".to_string(), BigDecimal::from(-20));
        let locked = WeekSnapshot::locked(week(), balances.clone());
        assert_eq!(WeekCloser::carry_from_snapshot(&locked), Some(balances));
        assert_eq!(WeekCloser::carry_from_snapshot(&WeekSnapshot::open(week())), None);
    }
}
