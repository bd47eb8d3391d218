//! Bank line to entity suggestions
//!
//! Each unlinked bank transaction is run through the tiers in order and the
//! first tier that answers produces its suggestion. Classification is pure:
//! committing a suggestion is a separate write (see
//! `SettlementEngine::apply_auto_match`).

use bigdecimal::BigDecimal;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::AutoMatchConfig;
use crate::ledger::normalize_key;
use crate::reconciliation::similarity::name_similarity;
use crate::settlement::aggregator::{EntitySettlement, PaymentStatus};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    None,
}

/// Proposed link between a bank transaction and an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub transaction_id: String,
    /// `None` when nothing plausible was found
    pub entity_id: Option<String>,
    pub confidence: Confidence,
    /// 1 (exact id) to 5 (no structural match)
    pub tier: u8,
    pub reason: String,
}

/// What the classifier knows about a settled entity
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub entity_id: String,
    pub name: String,
    /// Normalized keys, canonical id included
    pub keys: BTreeSet<String>,
    pub status: PaymentStatus,
    pub pendente: BigDecimal,
}

impl MatchCandidate {
    pub fn from_settlement(line: &EntitySettlement) -> Self {
        Self {
            entity_id: line.entity_id.clone(),
            name: line.name.clone(),
            keys: line.keys.iter().map(|k| normalize_key(k)).collect(),
            status: line.status,
            pendente: line.pendente.clone(),
        }
    }

    fn canonical_key(&self) -> String {
        normalize_key(&self.entity_id)
    }

    fn is_open(&self) -> bool {
        matches!(self.status, PaymentStatus::Aberto | PaymentStatus::Parcial)
    }
}

struct MatchContext<'a> {
    config: &'a AutoMatchConfig,
    week_start: WeekKey,
    candidates: &'a [MatchCandidate],
}

type Tier = fn(&MatchContext<'_>, &BankTransaction) -> Option<Suggestion>;

const TIERS: [Tier; 5] = [exact_id, known_alias, fuzzy_name, open_balance, weak_hint];

/// Five-tier suggestion engine
#[derive(Debug, Clone)]
pub struct AutoMatchClassifier {
    config: AutoMatchConfig,
    week_start: WeekKey,
}

impl AutoMatchClassifier {
    pub fn new(config: AutoMatchConfig, week_start: WeekKey) -> Self {
        Self { config, week_start }
    }

    /// One suggestion per unlinked transaction, in transaction id order
    pub fn suggest(
        &self,
        transactions: &[BankTransaction],
        candidates: &[MatchCandidate],
    ) -> Vec<Suggestion> {
        let ctx = MatchContext {
            config: &self.config,
            week_start: self.week_start,
            candidates,
        };

        let mut pending: Vec<&BankTransaction> = transactions
            .iter()
            .filter(|tx| tx.linked_entry_id.is_none())
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));

        pending
            .into_iter()
            .map(|tx| {
                let suggestion = TIERS
                    .iter()
                    .find_map(|tier| tier(&ctx, tx))
                    .unwrap_or_else(|| no_match(tx));
                debug!(
                    transaction = %tx.id,
                    tier = suggestion.tier,
                    confidence = ?suggestion.confidence,
                    entity = ?suggestion.entity_id,
                    "auto-match suggestion"
                );
                suggestion
            })
            .collect()
    }
}

fn memo_tokens(memo: &str) -> Vec<String> {
    memo.split(|c: char| {
        c.is_whitespace() || matches!(c, ',' | ';' | ':' | '/' | '|' | '(' | ')' | '#' | '*')
    })
    .map(|token| normalize_key(token.trim_matches('.')))
    .filter(|token| !token.is_empty())
    .collect()
}

/// Single candidate satisfying `hit`, or `None` when zero or several do
fn unique<'a, F>(candidates: &'a [MatchCandidate], hit: F) -> Option<&'a MatchCandidate>
where
    F: Fn(&MatchCandidate) -> bool,
{
    let mut found = candidates.iter().filter(|c| hit(c));
    let first = found.next()?;
    match found.next() {
        Some(_) => None,
        None => Some(first),
    }
}

fn suggestion(
    tx: &BankTransaction,
    entity: &MatchCandidate,
    confidence: Confidence,
    tier: u8,
    reason: String,
) -> Suggestion {
    Suggestion {
        transaction_id: tx.id.clone(),
        entity_id: Some(entity.entity_id.clone()),
        confidence,
        tier,
        reason,
    }
}

fn no_match(tx: &BankTransaction) -> Suggestion {
    Suggestion {
        transaction_id: tx.id.clone(),
        entity_id: None,
        confidence: Confidence::None,
        tier: 5,
        reason: "no structural match".to_string(),
    }
}

fn exact_id(ctx: &MatchContext<'_>, tx: &BankTransaction) -> Option<Suggestion> {
    if let Some(reference) = tx.entity_ref.as_deref().map(normalize_key) {
        if let Some(entity) = unique(ctx.candidates, |c| c.canonical_key() == reference) {
            return Some(suggestion(
                tx,
                entity,
                Confidence::High,
                1,
                format!("transaction reference '{}' is the entity id", reference),
            ));
        }
    }

    let tokens = memo_tokens(&tx.memo);
    let min_len = ctx.config.min_memo_key_len;
    let entity = unique(ctx.candidates, |c| {
        let key = c.canonical_key();
        key.chars().count() >= min_len && tokens.contains(&key)
    })?;
    Some(suggestion(
        tx,
        entity,
        Confidence::High,
        1,
        format!("memo contains entity id '{}'", entity.entity_id),
    ))
}

fn known_alias(ctx: &MatchContext<'_>, tx: &BankTransaction) -> Option<Suggestion> {
    let min_len = ctx.config.min_memo_key_len;
    let mut probes = memo_tokens(&tx.memo);
    if let Some(reference) = tx.entity_ref.as_deref() {
        probes.push(normalize_key(reference));
    }

    let alias_of = |c: &MatchCandidate| -> Option<String> {
        let canonical = c.canonical_key();
        probes
            .iter()
            .find(|probe| {
                **probe != canonical && probe.chars().count() >= min_len && c.keys.contains(*probe)
            })
            .cloned()
    };

    let entity = unique(ctx.candidates, |c| alias_of(c).is_some())?;
    let alias = alias_of(entity)?;
    Some(suggestion(
        tx,
        entity,
        Confidence::High,
        2,
        format!("known alias '{}' found", alias),
    ))
}

/// Best name score of a candidate against the payer name and the memo
fn name_score(candidate: &MatchCandidate, tx: &BankTransaction) -> f64 {
    let memo = name_similarity(&candidate.name, &tx.memo);
    tx.payer_name
        .as_deref()
        .map(|payer| name_similarity(&candidate.name, payer))
        .map_or(memo, |payer| payer.max(memo))
}

fn fuzzy_name(ctx: &MatchContext<'_>, tx: &BankTransaction) -> Option<Suggestion> {
    let threshold = ctx.config.name_threshold;
    let entity = unique(ctx.candidates, |c| name_score(c, tx) >= threshold)?;
    Some(suggestion(
        tx,
        entity,
        Confidence::Medium,
        3,
        format!(
            "name '{}' matches with score {:.2}",
            entity.name,
            name_score(entity, tx)
        ),
    ))
}

fn open_balance(ctx: &MatchContext<'_>, tx: &BankTransaction) -> Option<Suggestion> {
    let last_day = ctx.week_start + Duration::days(6 + ctx.config.date_grace_days);
    if tx.date < ctx.week_start || tx.date > last_day {
        return None;
    }

    let settles = tx.signed_amount();
    let epsilon = &ctx.config.amount_epsilon;
    let entity = unique(ctx.candidates, |c| {
        c.is_open() && (&c.pendente + &settles).abs() <= *epsilon
    })?;
    Some(suggestion(
        tx,
        entity,
        Confidence::Medium,
        4,
        format!(
            "amount {} settles the open balance {} of '{}'",
            tx.amount, entity.pendente, entity.entity_id
        ),
    ))
}

fn weak_hint(ctx: &MatchContext<'_>, tx: &BankTransaction) -> Option<Suggestion> {
    let (entity, score) = ctx
        .candidates
        .iter()
        .map(|c| (c, name_score(c, tx)))
        .filter(|(_, score)| *score >= ctx.config.weak_name_threshold)
        .fold(None, |best: Option<(&MatchCandidate, f64)>, (c, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((c, score)),
        })?;
    Some(suggestion(
        tx,
        entity,
        Confidence::Low,
        5,
        format!("weak name resemblance to '{}' ({:.2})", entity.name, score),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn week() -> WeekKey {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn candidate(id: &str, name: &str, keys: &[&str], status: PaymentStatus, pendente: &str) -> MatchCandidate {
        let mut all: BTreeSet<String> = keys.iter().map(|k| normalize_key(k)).collect();
        all.insert(normalize_key(id));
        MatchCandidate {
            entity_id: id.to_string(),
            name: name.to_string(),
            keys: all,
            status,
            pendente: dec(pendente),
        }
    }

    fn candidates() -> Vec<MatchCandidate> {
        vec![
            candidate("ag-1", "Agência Norte", &["7001", "cp_7001"], PaymentStatus::Aberto, "-20"),
            candidate("p-2", "Marcelo Ribeiro", &["8123"], PaymentStatus::Parcial, "45.50"),
            candidate("p-3", "Ana Souza", &["8200"], PaymentStatus::Quitado, "0"),
        ]
    }

    fn tx(id: &str, amount: &str, memo: &str) -> BankTransaction {
        BankTransaction {
            id: id.to_string(),
            date: week() + Duration::days(2),
            amount: dec(amount),
            memo: memo.to_string(),
            payer_name: None,
            entity_ref: None,
            linked_entry_id: None,
        }
    }

    fn classify(transactions: &[BankTransaction]) -> Vec<Suggestion> {
        AutoMatchClassifier::new(AutoMatchConfig::default(), week()).suggest(transactions, &candidates())
    }

    #[test]
    fn test_tier1_entity_ref() {
        let mut t = tx("t1", "-10", "PIX");
        t.entity_ref = Some("AG-1".to_string());
        let s = &classify(&[t])[0];
        assert_eq!((s.tier, s.confidence), (1, Confidence::High));
        assert_eq!(s.entity_id.as_deref(), Some("ag-1"));
    }

    #[test]
    fn test_tier1_memo_token() {
        let s = &classify(&[tx("t1", "-10", "acerto p-2 semana")])[0];
        assert_eq!(s.tier, 1);
        assert_eq!(s.entity_id.as_deref(), Some("p-2"));
    }

    #[test]
    fn test_tier2_alias_in_memo() {
        let s = &classify(&[tx("t1", "50", "PIX RECEBIDO CP_7001")])[0];
        assert_eq!((s.tier, s.confidence), (2, Confidence::High));
        assert_eq!(s.entity_id.as_deref(), Some("ag-1"));
    }

    #[test]
    fn test_tier3_fuzzy_name() {
        let mut t = tx("t1", "12", "TED");
        t.payer_name = Some("MARCELO RIBEIRO".to_string());
        let s = &classify(&[t])[0];
        assert_eq!((s.tier, s.confidence), (3, Confidence::Medium));
        assert_eq!(s.entity_id.as_deref(), Some("p-2"));
    }

    #[test]
    fn test_tier4_open_balance() {
        // club pays out 20.00, settling ag-1's -20 pendente
        let s = &classify(&[tx("t1", "-20.00", "PIX ENVIADO")])[0];
        assert_eq!((s.tier, s.confidence), (4, Confidence::Medium));
        assert_eq!(s.entity_id.as_deref(), Some("ag-1"));
    }

    #[test]
    fn test_tier4_ignores_dates_outside_window() {
        let mut t = tx("t1", "-20.00", "PIX ENVIADO");
        t.date = week() + Duration::days(9);
        let s = &classify(&[t])[0];
        assert_eq!((s.tier, s.confidence), (5, Confidence::None));
        assert!(s.entity_id.is_none());
    }

    #[test]
    fn test_tier5_weak_hint() {
        // "anita souzza" resembles "Ana Souza" at about 0.72, between the
        // weak and the fuzzy thresholds
        let s = &classify(&[tx("t1", "3", "PIX ANITA SOUZZA")])[0];
        assert_eq!((s.tier, s.confidence), (5, Confidence::Low));
        assert_eq!(s.entity_id.as_deref(), Some("p-3"));
    }

    #[test]
    fn test_close_spelling_is_a_fuzzy_match() {
        let s = &classify(&[tx("t1", "3", "ana sousa")])[0];
        assert_eq!((s.tier, s.confidence), (3, Confidence::Medium));
        assert_eq!(s.entity_id.as_deref(), Some("p-3"));
    }

    #[test]
    fn test_ambiguous_alias_skips_tier() {
        let s = &classify(&[tx("t1", "1", "7001 8123")])[0];
        assert_ne!(s.tier, 2);
    }

    #[test]
    fn test_linked_transactions_are_skipped() {
        let mut linked = tx("t1", "-20", "x");
        linked.linked_entry_id = Some("e1".to_string());
        let out = classify(&[linked, tx("t2", "1", "nothing here")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].transaction_id, "t2");
    }

    #[test]
    fn test_classification_does_not_touch_inputs() {
        let transactions = vec![tx("t1", "-20.00", "PIX")];
        let before = transactions.clone();
        classify(&transactions);
        assert_eq!(transactions, before);
    }
}
