//! Settlement aggregation: the owed-amount formula and status classification
//!
//! ```text
//! resultado   = ganhos + rakeback
//! totalDevido = resultado + saldoAnterior
//! pago        = totalIn - totalOut
//! pendente    = totalDevido + pago
//! ```
//!
//! Each line is rounded half-up to cents after its addition chain. Nothing is
//! stored: the view is recomputed from its inputs on every read.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

use crate::config::SettlementConfig;
use crate::ledger::{normalize_key, EntityKeyResolver, EntityKeySet, KeyRegistry, LedgerMatcher};
use crate::settlement::carry_forward::{CarryForwardResolver, CarrySource};
use crate::settlement::rakeback::{RakebackCalculator, RateBook};
use crate::tax::{DreSummary, FeeSchedule};
use crate::types::*;
use crate::utils::money::{is_negligible, round_cents, sum_cents, zero_cents};

/// Reconciliation state of one entity line
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PaymentStatus {
    /// Nothing owed and nothing paid
    #[serde(rename = "sem-mov")]
    SemMov,
    #[serde(rename = "quitado")]
    Quitado,
    /// Payments overshot the balance and flipped its sign
    #[serde(rename = "credito")]
    Credito,
    #[serde(rename = "parcial")]
    Parcial,
    #[serde(rename = "aberto")]
    Aberto,
}

impl PaymentStatus {
    /// Classify a line, first matching rule wins:
    ///
    /// 1. `|totalDevido|` and `|pago|` negligible: `SemMov`
    /// 2. `|pendente|` negligible: `Quitado`
    /// 3. `pendente` on the other side of zero from `totalDevido`: `Credito`
    /// 4. entries exist against a positive balance (the club still owes part
    ///    of what it started paying out): `Parcial`
    /// 5. otherwise `Aberto`
    pub fn classify(
        total_devido: &BigDecimal,
        pago: &BigDecimal,
        pendente: &BigDecimal,
        has_entries: bool,
        tolerance: &BigDecimal,
    ) -> Self {
        let zero = BigDecimal::from(0);

        if is_negligible(total_devido, tolerance) && is_negligible(pago, tolerance) {
            return PaymentStatus::SemMov;
        }
        if is_negligible(pendente, tolerance) {
            return PaymentStatus::Quitado;
        }

        let flipped = is_negligible(total_devido, tolerance)
            || (*total_devido > zero) != (*pendente > zero);
        if flipped {
            return PaymentStatus::Credito;
        }

        if has_entries && *total_devido > *tolerance {
            PaymentStatus::Parcial
        } else {
            PaymentStatus::Aberto
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentStatus::SemMov => "sem-mov",
            PaymentStatus::Quitado => "quitado",
            PaymentStatus::Credito => "credito",
            PaymentStatus::Parcial => "parcial",
            PaymentStatus::Aberto => "aberto",
        };
        f.write_str(label)
    }
}

/// Statement direction of an entity's week result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceDirection {
    #[serde(rename = "A Receber")]
    AReceber,
    #[serde(rename = "A Pagar")]
    APagar,
    #[serde(rename = "Neutro")]
    Neutro,
}

impl BalanceDirection {
    pub fn from_resultado(resultado: &BigDecimal, tolerance: &BigDecimal) -> Self {
        if *resultado > *tolerance {
            BalanceDirection::AReceber
        } else if *resultado < -tolerance.clone() {
            BalanceDirection::APagar
        } else {
            BalanceDirection::Neutro
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BalanceDirection::AReceber => "A Receber",
            BalanceDirection::APagar => "A Pagar",
            BalanceDirection::Neutro => "Neutro",
        }
    }
}

/// One settled entity for one week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySettlement {
    pub entity_id: String,
    pub kind: EntityKind,
    pub name: String,
    pub subclub: Option<String>,
    /// Owning agent of a directly settled player
    pub agent_id: Option<String>,
    pub is_direct: bool,
    pub keys: Vec<String>,
    pub player_count: usize,
    pub ganhos: BigDecimal,
    pub rake: BigDecimal,
    pub ggr: BigDecimal,
    /// Rate applied to the pooled book or the single player; `None` when
    /// several player rates were mixed
    pub rakeback_rate: Option<BigDecimal>,
    pub rakeback: BigDecimal,
    pub resultado: BigDecimal,
    pub saldo_anterior: BigDecimal,
    pub carry_source: CarrySource,
    pub total_devido: BigDecimal,
    pub total_in: BigDecimal,
    pub total_out: BigDecimal,
    pub pago: BigDecimal,
    pub pendente: BigDecimal,
    pub ledger_entry_ids: Vec<String>,
    pub status: PaymentStatus,
    pub direction: BalanceDirection,
    pub payment_type: Option<AgentPaymentType>,
}

/// Column sums over every entity line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementTotals {
    pub entity_count: usize,
    pub ganhos: BigDecimal,
    pub rake: BigDecimal,
    pub ggr: BigDecimal,
    pub rakeback: BigDecimal,
    pub resultado: BigDecimal,
    pub saldo_anterior: BigDecimal,
    pub total_devido: BigDecimal,
    pub total_in: BigDecimal,
    pub total_out: BigDecimal,
    pub pago: BigDecimal,
    pub pendente: BigDecimal,
    pub status_counts: BTreeMap<PaymentStatus, usize>,
}

impl SettlementTotals {
    fn from_entities(entities: &[EntitySettlement]) -> Self {
        let mut status_counts = BTreeMap::new();
        for entity in entities {
            *status_counts.entry(entity.status).or_insert(0) += 1;
        }

        Self {
            entity_count: entities.len(),
            ganhos: sum_cents(entities.iter().map(|e| &e.ganhos)),
            rake: sum_cents(entities.iter().map(|e| &e.rake)),
            ggr: sum_cents(entities.iter().map(|e| &e.ggr)),
            rakeback: sum_cents(entities.iter().map(|e| &e.rakeback)),
            resultado: sum_cents(entities.iter().map(|e| &e.resultado)),
            saldo_anterior: sum_cents(entities.iter().map(|e| &e.saldo_anterior)),
            total_devido: sum_cents(entities.iter().map(|e| &e.total_devido)),
            total_in: sum_cents(entities.iter().map(|e| &e.total_in)),
            total_out: sum_cents(entities.iter().map(|e| &e.total_out)),
            pago: sum_cents(entities.iter().map(|e| &e.pago)),
            pendente: sum_cents(entities.iter().map(|e| &e.pendente)),
            status_counts,
        }
    }
}

/// Full settlement of one club week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementView {
    pub club: String,
    pub week_start: WeekKey,
    pub settlement_status: Option<SettlementStatus>,
    /// Rates come from a frozen snapshot
    pub locked: bool,
    pub entities: Vec<EntitySettlement>,
    pub totals: SettlementTotals,
    pub dre: Vec<DreSummary>,
    /// Effective rates used, keyed by agent id and player id
    pub applied_rates: RateSnapshot,
    /// Ledger entries no entity key resolved to
    pub unmatched_entries: Vec<String>,
    pub warnings: Vec<IntegrityWarning>,
}

impl SettlementView {
    pub fn entity(&self, entity_id: &str) -> Option<&EntitySettlement> {
        self.entities.iter().find(|e| e.entity_id == entity_id)
    }

    /// Closing balance of every entity, the next week's carry-forward input
    pub fn closing_balances(&self) -> CarryForwardMap {
        self.entities
            .iter()
            .map(|e| (e.entity_id.clone(), e.pendente.clone()))
            .collect()
    }
}

/// Everything one aggregation reads
pub struct AggregationInput<'a> {
    pub club: &'a str,
    pub week: WeekKey,
    pub metrics: &'a WeeklyMetrics,
    pub ledger: Vec<LedgerEntry>,
    pub carry: &'a CarryForwardResolver<'a>,
    pub rates: &'a RateBook,
    pub settlement: Option<&'a SettlementRecord>,
    pub fees: &'a FeeSchedule,
}

/// A player's merged weekly figures plus the agent it settles under
struct PlayerLine<'m> {
    metrics: PlayerMetrics,
    agent: Option<&'m AgentMetrics>,
}

/// Pure settlement computation
pub struct SettlementAggregator {
    config: SettlementConfig,
    resolver: EntityKeyResolver,
}

impl SettlementAggregator {
    pub fn new(config: SettlementConfig) -> Self {
        let resolver = EntityKeyResolver::from_config(&config);
        Self { config, resolver }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn aggregate(&self, input: AggregationInput<'_>) -> SettlementView {
        let tolerance = &self.config.tolerance;
        let agents = merge_agents(&input.metrics.agents);
        let agent_index = index_agents(&agents);
        let players = merge_players(&input.metrics.players, &agents, &agent_index);

        // pooled books keyed by agent id, direct players settled alone
        let mut pooled: BTreeMap<&str, Vec<&PlayerMetrics>> = agents
            .values()
            .filter(|a| !a.is_direct)
            .map(|a| (a.id.as_str(), Vec::new()))
            .collect();
        let mut direct: Vec<&PlayerLine<'_>> = Vec::new();
        for line in players.values() {
            let is_direct = match line.agent {
                None => true,
                Some(agent) => line.metrics.agent_is_direct.unwrap_or(agent.is_direct),
            };
            match line.agent {
                Some(agent) if !is_direct => pooled
                    .entry(agent.id.as_str())
                    .or_default()
                    .push(&line.metrics),
                _ => direct.push(line),
            }
        }

        let mut registry = KeyRegistry::new();
        let matcher = LedgerMatcher::new(input.ledger);
        let mut applied_rates = RateSnapshot::default();
        let mut entities = Vec::new();

        for (agent_id, book) in &pooled {
            let Some(agent) = agents.get(*agent_id) else {
                continue;
            };
            let keys = registry.register(
                self.resolver
                    .resolve(&agent.id, agent.external_id.as_deref()),
            );
            let rate = input.rates.agent_rate(agent);
            let rakeback = RakebackCalculator::calc_agent_rakeback(book, &rate, false, |p| {
                input.rates.player_rate(p, Some(agent))
            });
            applied_rates
                .agents
                .insert(agent.id.clone(), rate.effective_rate().clone());

            let figures = BookFigures {
                ganhos: sum_cents(book.iter().map(|p| &p.ganhos)),
                rake: sum_cents(book.iter().map(|p| &p.rake)),
                ggr: sum_cents(book.iter().map(|p| &p.ggr)),
                rakeback,
                rakeback_rate: Some(rate.effective_rate().clone()),
                player_count: book.len(),
            };
            let payment_type = input
                .settlement
                .and_then(|s| s.payment_types.get(&agent.id).copied());

            entities.push(self.settle(
                EntityHeader {
                    entity_id: agent.id.clone(),
                    kind: EntityKind::Agent,
                    name: agent.name.clone(),
                    subclub: agent.subclub.clone(),
                    agent_id: None,
                    is_direct: false,
                    payment_type,
                },
                figures,
                &keys,
                &matcher,
                input.carry,
                tolerance,
            ));
        }

        for line in direct {
            let player = &line.metrics;
            let keys = registry.register(
                self.resolver
                    .resolve(&player.id, player.external_id.as_deref()),
            );
            let rate = input.rates.player_rate(player, line.agent);
            let rakeback = RakebackCalculator::calc_player_rakeback(player, &rate);
            applied_rates
                .players
                .insert(player.id.clone(), rate.effective_rate().clone());

            let figures = BookFigures {
                ganhos: round_cents(&player.ganhos),
                rake: round_cents(&player.rake),
                ggr: round_cents(&player.ggr),
                rakeback,
                rakeback_rate: Some(rate.effective_rate().clone()),
                player_count: 1,
            };

            entities.push(self.settle(
                EntityHeader {
                    entity_id: player.id.clone(),
                    kind: EntityKind::Player,
                    name: player.nickname.clone(),
                    subclub: player
                        .subclub
                        .clone()
                        .or_else(|| line.agent.and_then(|a| a.subclub.clone())),
                    agent_id: line.agent.map(|a| a.id.clone()),
                    is_direct: true,
                    payment_type: None,
                },
                figures,
                &keys,
                &matcher,
                input.carry,
                tolerance,
            ));
        }

        // entities with an open balance but no activity this week
        let settled: BTreeSet<String> = entities
            .iter()
            .map(|e| normalize_key(&e.entity_id))
            .collect();
        for entity_id in input.carry.carried_entities() {
            if settled.contains(&normalize_key(&entity_id))
                || registry.owner_of(&entity_id).is_some()
            {
                continue;
            }
            if is_negligible(&input.carry.resolve(&entity_id).amount, tolerance) {
                continue;
            }

            let agent = agents.get(&entity_id);
            let keys = registry.register(self.resolver.resolve(
                &entity_id,
                agent.and_then(|a| a.external_id.as_deref()),
            ));
            debug!(
                club = input.club,
                week = %input.week,
                entity = %entity_id,
                "settling carried balance without activity"
            );

            let header = match agent {
                Some(agent) => EntityHeader {
                    entity_id: entity_id.clone(),
                    kind: EntityKind::Agent,
                    name: agent.name.clone(),
                    subclub: agent.subclub.clone(),
                    agent_id: None,
                    is_direct: agent.is_direct,
                    payment_type: input
                        .settlement
                        .and_then(|s| s.payment_types.get(&agent.id).copied()),
                },
                None => EntityHeader {
                    entity_id: entity_id.clone(),
                    kind: EntityKind::Player,
                    name: entity_id.clone(),
                    subclub: None,
                    agent_id: None,
                    is_direct: true,
                    payment_type: None,
                },
            };
            entities.push(self.settle(
                header,
                BookFigures::inactive(),
                &keys,
                &matcher,
                input.carry,
                tolerance,
            ));
        }

        let unmatched_entries: Vec<String> = matcher
            .unmatched(&registry)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        if !unmatched_entries.is_empty() {
            debug!(
                club = input.club,
                week = %input.week,
                count = unmatched_entries.len(),
                "ledger entries without a matching entity"
            );
        }

        let totals = SettlementTotals::from_entities(&entities);
        let dre = build_dre(&entities, &input.metrics.costs, input.fees);

        SettlementView {
            club: input.club.to_string(),
            week_start: input.week,
            settlement_status: input.settlement.map(|s| s.status),
            locked: input.rates.has_snapshot(),
            entities,
            totals,
            dre,
            applied_rates,
            unmatched_entries,
            warnings: registry.into_warnings(),
        }
    }

    fn settle(
        &self,
        header: EntityHeader,
        figures: BookFigures,
        keys: &EntityKeySet,
        matcher: &LedgerMatcher,
        carry: &CarryForwardResolver<'_>,
        tolerance: &BigDecimal,
    ) -> EntitySettlement {
        let resultado = round_cents(&(&figures.ganhos + &figures.rakeback));
        let saldo = carry.resolve(&header.entity_id);
        let total_devido = round_cents(&(&resultado + &saldo.amount));
        let net = matcher.net_for(keys);
        let pago = net.net.clone();
        let pendente = round_cents(&(&total_devido + &pago));

        let status = PaymentStatus::classify(
            &total_devido,
            &pago,
            &pendente,
            net.has_entries(),
            tolerance,
        );
        let direction = BalanceDirection::from_resultado(&resultado, tolerance);

        EntitySettlement {
            entity_id: header.entity_id,
            kind: header.kind,
            name: header.name,
            subclub: header.subclub,
            agent_id: header.agent_id,
            is_direct: header.is_direct,
            keys: keys.to_vec(),
            player_count: figures.player_count,
            ganhos: figures.ganhos,
            rake: figures.rake,
            ggr: figures.ggr,
            rakeback_rate: figures.rakeback_rate,
            rakeback: figures.rakeback,
            resultado,
            saldo_anterior: saldo.amount,
            carry_source: saldo.source,
            total_devido,
            total_in: net.total_in,
            total_out: net.total_out,
            pago,
            pendente,
            ledger_entry_ids: net.entry_ids,
            status,
            direction,
            payment_type: header.payment_type,
        }
    }
}

struct EntityHeader {
    entity_id: String,
    kind: EntityKind,
    name: String,
    subclub: Option<String>,
    agent_id: Option<String>,
    is_direct: bool,
    payment_type: Option<AgentPaymentType>,
}

struct BookFigures {
    ganhos: BigDecimal,
    rake: BigDecimal,
    ggr: BigDecimal,
    rakeback: BigDecimal,
    rakeback_rate: Option<BigDecimal>,
    player_count: usize,
}

impl BookFigures {
    fn inactive() -> Self {
        Self {
            ganhos: zero_cents(),
            rake: zero_cents(),
            ggr: zero_cents(),
            rakeback: zero_cents(),
            rakeback_rate: None,
            player_count: 0,
        }
    }
}

/// One agent per internal id; the first row's configuration wins
fn merge_agents(rows: &[AgentMetrics]) -> BTreeMap<String, AgentMetrics> {
    let mut agents: BTreeMap<String, AgentMetrics> = BTreeMap::new();
    for row in rows {
        if agents.contains_key(&row.id) {
            debug!(agent = %row.id, "duplicate agent row ignored");
            continue;
        }
        agents.insert(row.id.clone(), row.clone());
    }
    agents
}

/// Normalized internal and external ids -> agent id
fn index_agents(agents: &BTreeMap<String, AgentMetrics>) -> BTreeMap<String, String> {
    let mut index = BTreeMap::new();
    for agent in agents.values() {
        index
            .entry(normalize_key(&agent.id))
            .or_insert_with(|| agent.id.clone());
    }
    for agent in agents.values() {
        if let Some(external) = agent.external_id.as_deref() {
            let key = normalize_key(external);
            match index.get(&key) {
                Some(owner) if *owner != agent.id => {
                    warn!(key = %key, kept = %owner, rejected = %agent.id, "agent external id collides");
                }
                Some(_) => {}
                None => {
                    index.insert(key, agent.id.clone());
                }
            }
        }
    }
    index
}

/// One line per player id: rows of the same player are summed
fn merge_players<'m>(
    rows: &[PlayerMetrics],
    agents: &'m BTreeMap<String, AgentMetrics>,
    agent_index: &BTreeMap<String, String>,
) -> BTreeMap<String, PlayerLine<'m>> {
    let mut players: BTreeMap<String, PlayerLine<'m>> = BTreeMap::new();
    for row in rows {
        match players.get_mut(&row.id) {
            Some(line) => {
                line.metrics.ganhos += &row.ganhos;
                line.metrics.rake += &row.rake;
                line.metrics.ggr += &row.ggr;
            }
            None => {
                let agent = row
                    .agent_id
                    .as_deref()
                    .and_then(|id| agent_index.get(&normalize_key(id)))
                    .and_then(|id| agents.get(id));
                if agent.is_none() {
                    if let Some(missing) = row.agent_id.as_deref() {
                        debug!(player = %row.id, agent = missing, "agent not in metrics, settling player directly");
                    }
                }
                players.insert(
                    row.id.clone(),
                    PlayerLine {
                        metrics: row.clone(),
                        agent,
                    },
                );
            }
        }
    }
    players
}

fn build_dre(
    entities: &[EntitySettlement],
    costs: &[CostItem],
    fees: &FeeSchedule,
) -> Vec<DreSummary> {
    // entities without players or a subclub add nothing to any result
    let subclubs: BTreeSet<Option<String>> = entities
        .iter()
        .filter(|e| e.player_count > 0 || e.subclub.is_some())
        .map(|e| e.subclub.clone())
        .chain(costs.iter().map(|c| c.subclub.clone()))
        .collect();

    subclubs
        .into_iter()
        .map(|subclub| {
            let members: Vec<&EntitySettlement> =
                entities.iter().filter(|e| e.subclub == subclub).collect();
            let rake = sum_cents(members.iter().map(|e| &e.rake));
            let ggr = sum_cents(members.iter().map(|e| &e.ggr));
            let rakeback = sum_cents(members.iter().map(|e| &e.rakeback));
            let subclub_costs: Vec<CostItem> = costs
                .iter()
                .filter(|c| c.subclub == subclub)
                .cloned()
                .collect();
            DreSummary::compute(subclub, &rake, &ggr, &rakeback, subclub_costs, fees)
        })
        .collect()
}
