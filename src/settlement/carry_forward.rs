//! Carry-forward resolution
//!
//! The balance an entity brings into a week comes from the first source that
//! answers, in order:
//!
//! 1. the explicit carry map written for this exact week by the previous close
//! 2. the balances snapshot of the nearest locked prior week
//! 3. the legacy flat balance field of that same locked week
//! 4. zero
//!
//! Once a locked week is found the scan stops there. An entity missing from
//! that week, or carrying a negligible balance in it, starts from zero even if
//! an older week shows a balance for it.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::types::*;
use crate::utils::money::{is_negligible, round_cents, zero_cents};

/// Which rule produced a carried balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrySource {
    /// First week of the club's history
    FirstWeek,
    ExplicitCarry,
    LockedSnapshot,
    LegacyBalance,
    /// Nearest locked week recorded no balances at all
    EmptyLockedWeek,
    NoLockedHistory,
}

/// Resolved opening balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarryForward {
    pub amount: BigDecimal,
    pub source: CarrySource,
}

impl CarryForward {
    fn zero(source: CarrySource) -> Self {
        Self {
            amount: zero_cents(),
            source,
        }
    }
}

struct CarryContext<'a> {
    entity_id: &'a str,
    explicit: Option<&'a CarryForwardMap>,
    nearest_locked: Option<&'a WeekSnapshot>,
    tolerance: &'a BigDecimal,
}

impl CarryContext<'_> {
    /// Stored balance, or zero when absent or negligible
    fn stored(&self, balances: &BalanceMap) -> BigDecimal {
        match balances.get(self.entity_id) {
            Some(value) if !is_negligible(value, self.tolerance) => round_cents(value),
            _ => zero_cents(),
        }
    }
}

type CarryStep = fn(&CarryContext<'_>) -> Option<CarryForward>;

const STEPS: [CarryStep; 4] = [
    explicit_carry,
    locked_snapshot,
    legacy_balance,
    empty_locked_week,
];

fn explicit_carry(ctx: &CarryContext<'_>) -> Option<CarryForward> {
    ctx.explicit
        .and_then(|map| map.get(ctx.entity_id))
        .map(|value| CarryForward {
            amount: round_cents(value),
            source: CarrySource::ExplicitCarry,
        })
}

fn locked_snapshot(ctx: &CarryContext<'_>) -> Option<CarryForward> {
    let balances = ctx.nearest_locked?.balances.as_ref()?;
    Some(CarryForward {
        amount: ctx.stored(balances),
        source: CarrySource::LockedSnapshot,
    })
}

fn legacy_balance(ctx: &CarryContext<'_>) -> Option<CarryForward> {
    let balances = ctx.nearest_locked?.legacy_balances.as_ref()?;
    Some(CarryForward {
        amount: ctx.stored(balances),
        source: CarrySource::LegacyBalance,
    })
}

fn empty_locked_week(ctx: &CarryContext<'_>) -> Option<CarryForward> {
    ctx.nearest_locked
        .map(|_| CarryForward::zero(CarrySource::EmptyLockedWeek))
}

/// Position `week` has, or would have, in an oldest-first history
pub fn week_index_of(history: &[WeekSnapshot], week: WeekKey) -> usize {
    history.partition_point(|snapshot| snapshot.week_start < week)
}

/// Resolves opening balances for every entity of one club week
#[derive(Debug, Clone)]
pub struct CarryForwardResolver<'a> {
    club: &'a str,
    current_week: WeekKey,
    week_index: usize,
    history: &'a [WeekSnapshot],
    explicit: Option<&'a CarryForwardMap>,
    tolerance: &'a BigDecimal,
}

impl<'a> CarryForwardResolver<'a> {
    /// `history` is the club's weeks oldest first; `week_index` is the
    /// position of `current_week` in it (see [`week_index_of`])
    pub fn new(
        club: &'a str,
        current_week: WeekKey,
        week_index: usize,
        history: &'a [WeekSnapshot],
        explicit: Option<&'a CarryForwardMap>,
        tolerance: &'a BigDecimal,
    ) -> Self {
        Self {
            club,
            current_week,
            week_index: week_index.min(history.len()),
            history,
            explicit,
            tolerance,
        }
    }

    /// Nearest locked week strictly before the current one
    pub fn nearest_locked_week(&self) -> Option<&'a WeekSnapshot> {
        let history: &'a [WeekSnapshot] = self.history;
        history[..self.week_index]
            .iter()
            .rev()
            .find(|snapshot| snapshot.locked)
    }

    /// Every entity id a carry source may hold a balance for: the explicit
    /// map plus both balance fields of the nearest locked week
    pub fn carried_entities(&self) -> BTreeSet<String> {
        if self.week_index == 0 {
            return BTreeSet::new();
        }
        let locked = self.nearest_locked_week();
        self.explicit
            .into_iter()
            .chain(locked.and_then(|s| s.balances.as_ref()))
            .chain(locked.and_then(|s| s.legacy_balances.as_ref()))
            .flat_map(|map| map.keys().cloned())
            .collect()
    }

    pub fn resolve(&self, entity_id: &str) -> CarryForward {
        if self.week_index == 0 {
            return CarryForward::zero(CarrySource::FirstWeek);
        }

        let ctx = CarryContext {
            entity_id,
            explicit: self.explicit,
            nearest_locked: self.nearest_locked_week(),
            tolerance: self.tolerance,
        };

        let resolved = STEPS
            .iter()
            .find_map(|step| step(&ctx))
            .unwrap_or_else(|| CarryForward::zero(CarrySource::NoLockedHistory));

        debug!(
            club = self.club,
            week = %self.current_week,
            entity = entity_id,
            source = ?resolved.source,
            amount = %resolved.amount,
            "carry-forward resolved"
        );
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn week(n: u32) -> WeekKey {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(7 * n as i64)
    }

    fn balances(pairs: &[(&str, &str)]) -> BalanceMap {
        pairs
            .iter()
            .map(|(id, value)| (id.to_string(), dec(value)))
            .collect()
    }

    fn resolve(
        history: &[WeekSnapshot],
        current: WeekKey,
        explicit: Option<&CarryForwardMap>,
        entity: &str,
    ) -> CarryForward {
        let tolerance = dec("0.01");
        let index = week_index_of(history, current);
        CarryForwardResolver::new("club", current, index, history, explicit, &tolerance)
            .resolve(entity)
    }

    #[test]
    fn test_first_week_is_zero() {
        let explicit = balances(&[("ag-1", "99")]);
        let result = resolve(&[], week(0), Some(&explicit), "ag-1");
        assert_eq!(result.source, CarrySource::FirstWeek);
        assert_eq!(result.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_explicit_carry_wins_even_when_zero() {
        let history = vec![WeekSnapshot::locked(week(0), balances(&[("ag-1", "80")]))];
        let explicit = balances(&[("ag-1", "0")]);
        let result = resolve(&history, week(1), Some(&explicit), "ag-1");
        assert_eq!(result.source, CarrySource::ExplicitCarry);
        assert_eq!(result.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_nearest_locked_week_skips_unlocked() {
        let history = vec![
            WeekSnapshot::locked(week(0), balances(&[("ag-1", "5.00")])),
            WeekSnapshot::open(week(1)),
        ];
        let result = resolve(&history, week(2), None, "ag-1");
        assert_eq!(result.source, CarrySource::LockedSnapshot);
        assert_eq!(result.amount, dec("5.00"));
    }

    #[test]
    fn test_missing_entity_stops_at_nearest_locked_week() {
        let history = vec![
            WeekSnapshot::locked(week(0), balances(&[("ag-1", "9.99")])),
            WeekSnapshot::locked(week(1), balances(&[("other", "1")])),
            WeekSnapshot::open(week(2)),
        ];
        let result = resolve(&history, week(3), None, "ag-1");
        assert_eq!(result.source, CarrySource::LockedSnapshot);
        assert_eq!(result.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_negligible_balance_is_zeroed() {
        let history = vec![
            WeekSnapshot::locked(week(0), balances(&[("ag-1", "40")])),
            WeekSnapshot::locked(week(1), balances(&[("ag-1", "-0.01")])),
        ];
        let result = resolve(&history, week(2), None, "ag-1");
        assert_eq!(result.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_legacy_balance_of_locked_week() {
        let mut legacy = WeekSnapshot::open(week(0));
        legacy.locked = true;
        legacy.legacy_balances = Some(balances(&[("ag-1", "-12.5")]));
        let result = resolve(&[legacy], week(1), None, "ag-1");
        assert_eq!(result.source, CarrySource::LegacyBalance);
        assert_eq!(result.amount, dec("-12.50"));
    }

    #[test]
    fn test_locked_week_without_balances() {
        let mut bare = WeekSnapshot::open(week(0));
        bare.locked = true;
        let result = resolve(&[bare], week(1), None, "ag-1");
        assert_eq!(result.source, CarrySource::EmptyLockedWeek);
        assert_eq!(result.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_no_locked_history() {
        let mut open = WeekSnapshot::open(week(0));
        open.legacy_balances = Some(balances(&[("ag-1", "70")]));
        let result = resolve(&[open], week(1), None, "ag-1");
        assert_eq!(result.source, CarrySource::NoLockedHistory);
        assert_eq!(result.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_current_week_present_in_history_is_not_scanned() {
        let history = vec![
            WeekSnapshot::locked(week(0), balances(&[("ag-1", "3")])),
            WeekSnapshot::locked(week(1), balances(&[("ag-1", "8")])),
        ];
        assert_eq!(week_index_of(&history, week(1)), 1);
        let result = resolve(&history, week(1), None, "ag-1");
        assert_eq!(result.amount, dec("3.00"));
    }

    #[test]
    fn test_carried_entities_cover_every_source() {
        let mut snapshot = WeekSnapshot::locked(week(0), balances(&[("ag-1", "4")]));
        snapshot.legacy_balances = Some(balances(&[("old", "2")]));
        let history = vec![snapshot];
        let explicit = balances(&[("p1", "-80")]);
        let tolerance = dec("0.01");

        let resolver =
            CarryForwardResolver::new("club", week(1), 1, &history, Some(&explicit), &tolerance);
        let ids: Vec<String> = resolver.carried_entities().into_iter().collect();
        assert_eq!(ids, vec!["ag-1", "old", "p1"]);

        let first = CarryForwardResolver::new("club", week(0), 0, &history, Some(&explicit), &tolerance);
        assert!(first.carried_entities().is_empty());
    }
}
