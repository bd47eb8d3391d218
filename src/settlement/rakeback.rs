//! Rakeback rate resolution and calculation

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::*;
use crate::utils::money::{apply_percent, round_cents};

/// Where a rate comes from: the locked-week snapshot or live configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSource {
    pub snapshot_rate: Option<BigDecimal>,
    pub live_rate: BigDecimal,
}

impl RateSource {
    pub fn live(live_rate: BigDecimal) -> Self {
        Self {
            snapshot_rate: None,
            live_rate,
        }
    }

    pub fn snapshot(snapshot_rate: BigDecimal, live_rate: BigDecimal) -> Self {
        Self {
            snapshot_rate: Some(snapshot_rate),
            live_rate,
        }
    }

    /// Snapshot first; live configuration only when no snapshot exists
    pub fn effective_rate(&self) -> &BigDecimal {
        self.snapshot_rate.as_ref().unwrap_or(&self.live_rate)
    }

    pub fn is_frozen(&self) -> bool {
        self.snapshot_rate.is_some()
    }
}

/// Resolves the [`RateSource`] of agents and players for one week
#[derive(Debug, Clone, Default)]
pub struct RateBook {
    snapshot: Option<RateSnapshot>,
    overrides: BTreeMap<String, BigDecimal>,
}

impl RateBook {
    /// `snapshot` is the locked-week snapshot, `overrides` the rates edited
    /// on the draft settlement
    pub fn new(snapshot: Option<RateSnapshot>, overrides: BTreeMap<String, BigDecimal>) -> Self {
        Self {
            snapshot,
            overrides,
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Rate applied to an agent's pooled book
    pub fn agent_rate(&self, agent: &AgentMetrics) -> RateSource {
        let live = self
            .overrides
            .get(&agent.id)
            .or(agent.rakeback_rate.as_ref())
            .cloned()
            .unwrap_or_else(|| {
                debug!(agent = %agent.id, "no rakeback rate configured, using 0%");
                BigDecimal::from(0)
            });

        match self.snapshot.as_ref().and_then(|s| s.agents.get(&agent.id)) {
            Some(frozen) => RateSource::snapshot(frozen.clone(), live),
            None => RateSource::live(live),
        }
    }

    /// Individual rate of a player settled directly
    ///
    /// Live precedence: settlement override of the player, the player's own
    /// rate, settlement override of the agent, the agent's rate, 0%.
    pub fn player_rate(&self, player: &PlayerMetrics, agent: Option<&AgentMetrics>) -> RateSource {
        let agent_rate = agent.and_then(|a| {
            self.overrides
                .get(&a.id)
                .or(a.rakeback_rate.as_ref())
        });
        let live = self
            .overrides
            .get(&player.id)
            .or(player.rakeback_rate.as_ref())
            .or(agent_rate)
            .cloned()
            .unwrap_or_else(|| {
                debug!(player = %player.id, "no rakeback rate configured, using 0%");
                BigDecimal::from(0)
            });

        match self.snapshot.as_ref().and_then(|s| s.players.get(&player.id)) {
            Some(frozen) => RateSource::snapshot(frozen.clone(), live),
            None => RateSource::live(live),
        }
    }
}

/// Rakeback formulas
pub struct RakebackCalculator;

impl RakebackCalculator {
    /// Rakeback owed on an agent's book
    ///
    /// Pooled: one agent rate over the summed rake. Direct: each player's
    /// own effective rate over that player's rake.
    pub fn calc_agent_rakeback<F>(
        players: &[&PlayerMetrics],
        agent_rate: &RateSource,
        is_direct: bool,
        player_rate: F,
    ) -> BigDecimal
    where
        F: Fn(&PlayerMetrics) -> RateSource,
    {
        if is_direct {
            let total: BigDecimal = players
                .iter()
                .map(|p| apply_percent(&p.rake, player_rate(*p).effective_rate()))
                .sum();
            round_cents(&total)
        } else {
            let rake: BigDecimal = players.iter().map(|p| &p.rake).sum();
            round_cents(&apply_percent(&rake, agent_rate.effective_rate()))
        }
    }

    /// Rakeback of a single directly-settled player
    pub fn calc_player_rakeback(player: &PlayerMetrics, rate: &RateSource) -> BigDecimal {
        round_cents(&apply_percent(&player.rake, rate.effective_rate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn player(id: &str, rake: &str, rate: Option<&str>) -> PlayerMetrics {
        let mut p = PlayerMetrics::new(id, id, BigDecimal::from(0), dec(rake));
        p.rakeback_rate = rate.map(dec);
        p
    }

    fn agent(rate: Option<&str>) -> AgentMetrics {
        let mut a = AgentMetrics::new("ag-1", "Agency One");
        a.rakeback_rate = rate.map(dec);
        a
    }

    #[test]
    fn test_pooled_uses_single_rate() {
        let p1 = player("p1", "600", Some("50"));
        let p2 = player("p2", "400", None);
        let rate = RateSource::live(dec("10"));

        let amount = RakebackCalculator::calc_agent_rakeback(&[&p1, &p2], &rate, false, |_| {
            RateSource::live(dec("99"))
        });
        assert_eq!(amount, dec("100.00"));
    }

    #[test]
    fn test_direct_uses_each_player_rate() {
        let a = agent(Some("10"));
        let p1 = player("p1", "100", Some("15"));
        let p2 = player("p2", "200", None);
        let book = RateBook::default();

        let amount = RakebackCalculator::calc_agent_rakeback(
            &[&p1, &p2],
            &book.agent_rate(&a),
            true,
            |p| book.player_rate(p, Some(&a)),
        );
        // 100 * 15% + 200 * 10%
        assert_eq!(amount, dec("35.00"));
    }

    #[test]
    fn test_snapshot_beats_live_configuration() {
        let mut snapshot = RateSnapshot::default();
        snapshot.players.insert("p1".to_string(), dec("15"));
        let book = RateBook::new(Some(snapshot), BTreeMap::new());

        let p1 = player("p1", "100", Some("20"));
        let rate = book.player_rate(&p1, None);
        assert!(rate.is_frozen());
        assert_eq!(rate.effective_rate(), &dec("15"));
        assert_eq!(rate.live_rate, dec("20"));
        assert_eq!(RakebackCalculator::calc_player_rakeback(&p1, &rate), dec("15.00"));
    }

    #[test]
    fn test_missing_rate_is_zero() {
        let book = RateBook::default();
        let p = player("p1", "100", None);
        assert_eq!(book.player_rate(&p, None).effective_rate(), &BigDecimal::from(0));
        assert_eq!(book.agent_rate(&agent(None)).effective_rate(), &BigDecimal::from(0));
    }

    #[test]
    fn test_settlement_override_precedence() {
        let mut overrides = BTreeMap::new();
        overrides.insert("ag-1".to_string(), dec("12"));
        let book = RateBook::new(None, overrides);
        let a = agent(Some("10"));

        assert_eq!(book.agent_rate(&a).effective_rate(), &dec("12"));
        // player's own rate still beats the agent-level override
        let p = player("p1", "100", Some("15"));
        assert_eq!(book.player_rate(&p, Some(&a)).effective_rate(), &dec("15"));
        let q = player("p2", "100", None);
        assert_eq!(book.player_rate(&q, Some(&a)).effective_rate(), &dec("12"));
    }

    #[test]
    fn test_direct_rounds_the_sum() {
        let p1 = player("p1", "0.05", Some("10"));
        let p2 = player("p2", "0.05", Some("10"));
        let amount = RakebackCalculator::calc_agent_rakeback(
            &[&p1, &p2],
            &RateSource::live(BigDecimal::from(0)),
            true,
            |p| RateSource::live(p.rakeback_rate.clone().unwrap()),
        );
        // 0.005 + 0.005 = 0.01, not 0.01 + 0.01
        assert_eq!(amount, dec("0.01"));
    }
}
