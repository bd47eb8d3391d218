//! Weekly settlement walkthrough: compute, pay, reconcile, close, carry

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use std::str::FromStr;

use settlement_core::{
    AgentMetrics, BankTransaction, Direction, Fee, FeeBase, FeeSchedule, LedgerEntry,
    MemoryStorage, PlayerMetrics, SettlementEngine, SettlementView, WeeklyMetrics,
};

const CLUB: &str = "club-1";

fn dec(s: &str) -> Result<BigDecimal, Box<dyn std::error::Error>> {
    Ok(BigDecimal::from_str(s)?)
}

fn print_view(view: &SettlementView) {
    println!(
        "  {:<10} {:>10} {:>10} {:>10} {:>10} {:>10}  status",
        "entity", "resultado", "anterior", "devido", "pago", "pendente"
    );
    for line in &view.entities {
        println!(
            "  {:<10} {:>10} {:>10} {:>10} {:>10} {:>10}  {} ({})",
            line.entity_id,
            line.resultado,
            line.saldo_anterior,
            line.total_devido,
            line.pago,
            line.pendente,
            line.status,
            line.direction.label()
        );
    }
    println!("  total pendente: {}\n", view.totals.pendente);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Settlement Core - Weekly Close Example\n");

    let week1 = NaiveDate::from_ymd_opt(2024, 6, 3).ok_or("invalid date")?;
    let week2 = week1 + Duration::days(7);

    let storage = MemoryStorage::new();

    // 1. Weekly metrics: one pooled agency and one direct player
    let mut agency = AgentMetrics::new("AG1", "Agência Norte");
    agency.external_id = Some("7001".to_string());
    agency.rakeback_rate = Some(dec("10")?);

    let mut p1 = PlayerMetrics::new("p1", "alice", dec("-150")?, dec("600")?);
    p1.agent_id = Some("7001".to_string());
    let mut p2 = PlayerMetrics::new("p2", "bob", dec("-50")?, dec("400")?);
    p2.agent_id = Some("AG1".to_string());
    let mut solo = PlayerMetrics::new("p3", "Carla Mendes", dec("120")?, dec("80")?);
    solo.rakeback_rate = Some(dec("15")?);

    storage.put_metrics(
        CLUB,
        week1,
        WeeklyMetrics {
            agents: vec![agency.clone()],
            players: vec![p1, p2, solo],
            costs: Vec::new(),
        },
    )?;

    let mut fees = FeeSchedule::new();
    fees.add_fee(Fee::new("plataforma", dec("8")?, FeeBase::Rake))?;
    storage.put_fee_schedule(CLUB, fees)?;

    let mut engine = SettlementEngine::new(storage.clone());

    println!("Week {} before payments:", week1);
    print_view(&engine.compute_settlement(CLUB, week1).await?);

    // 2. Record a payment to the agency through its importer alias
    engine
        .record_ledger_entry(
            CLUB,
            LedgerEntry::new(
                "cp_7001".to_string(),
                Direction::In,
                dec("60")?,
                week1,
                "pix".to_string(),
            )
            .with_description("partial payout"),
        )
        .await?;

    // 3. Reconcile a bank line from the statement
    storage.put_bank_transaction(
        CLUB,
        week1,
        BankTransaction {
            id: "tx-1".to_string(),
            date: week1 + Duration::days(4),
            amount: dec("132")?,
            memo: "PIX RECEBIDO CARLA MENDES".to_string(),
            payer_name: None,
            entity_ref: None,
            linked_entry_id: None,
        },
    )?;

    for suggestion in engine.suggest_auto_matches(CLUB, week1).await? {
        println!(
            "  suggestion for {}: {:?} tier {} ({:?}) - {}",
            suggestion.transaction_id,
            suggestion.entity_id,
            suggestion.tier,
            suggestion.confidence,
            suggestion.reason
        );
        if let Some(entity) = suggestion.entity_id.as_deref() {
            engine
                .apply_auto_match(CLUB, week1, &suggestion.transaction_id, entity)
                .await?;
        }
    }
    println!();

    let view = engine.compute_settlement(CLUB, week1).await?;
    println!("Week {} after payments:", week1);
    print_view(&view);
    for dre in &view.dre {
        println!(
            "  DRE {:?}: receita {} - taxas {} - custos {} - rakeback {} = {}\n",
            dre.subclub, dre.receita_bruta, dre.total_taxes, dre.total_costs, dre.rakeback, dre.resultado
        );
    }

    // 4. Close the week and let week 2 inherit the balances
    let close = engine.close_week(CLUB, week1).await?;
    println!(
        "Closed week {}: {} balances carried to {}\n",
        week1,
        close.carry_forward.len(),
        close.carry_week()
    );

    storage.put_metrics(
        CLUB,
        week2,
        WeeklyMetrics {
            agents: vec![agency],
            players: Vec::new(),
            costs: Vec::new(),
        },
    )?;

    println!("Week {} opening:", week2);
    print_view(&engine.compute_settlement(CLUB, week2).await?);
    println!(
        "Week {} close check: {:?}",
        week1,
        engine.verify_week_close(CLUB, week1).await?
    );

    Ok(())
}
