//! Economy ledger tests.

use rebellion_core::{
    config::{CampaignConfig, EconomyConfig},
    economy::{EconomyLedger, TransactionReason},
    error::SimError,
    event::CampaignEvent,
    types::Faction,
    zone::{GarrisonUnit, Zone},
};

fn economy() -> EconomyConfig {
    CampaignConfig::default_test().economy
}

fn owned_zones(owner: Faction, count: usize) -> Vec<Zone> {
    CampaignConfig::default_test()
        .zones
        .iter()
        .take(count)
        .map(|cfg| {
            let mut zone = Zone::from_config(cfg);
            zone.owner = owner;
            zone
        })
        .collect()
}

/// Balance 100, debit 150 → InsufficientFunds, balance still 100, no log entry.
#[test]
fn overdraft_is_rejected_without_trace() {
    let mut ledger = EconomyLedger::new(&economy());
    let log_len = ledger.account(Faction::FactionA).unwrap().log.len();

    let err = ledger
        .debit(7, Faction::FactionA, 150, TransactionReason::ShopPurchase { item_id: "tank".into() })
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::InsufficientFunds { faction: Faction::FactionA, requested: 150, available: 100 }
    ));
    assert_eq!(ledger.balance(Faction::FactionA), 100);
    assert_eq!(ledger.account(Faction::FactionA).unwrap().log.len(), log_len);
}

#[test]
fn every_mutation_is_logged_and_replays() {
    let mut ledger = EconomyLedger::new(&economy());
    let event = ledger
        .credit(3, Faction::FactionB, 25, TransactionReason::Adjustment { note: "bonus".into() })
        .unwrap();
    assert_eq!(
        event,
        CampaignEvent::EconomyTransaction {
            tick: 3,
            faction: Faction::FactionB,
            delta: 25,
            reason: TransactionReason::Adjustment { note: "bonus".into() },
            balance_after: 125,
        }
    );
    ledger.debit(4, Faction::FactionB, 40, TransactionReason::ShopPurchase { item_id: "rifle".into() }).unwrap();

    let account = ledger.account(Faction::FactionB).unwrap();
    assert_eq!(account.balance, 85);
    assert_eq!(account.replay_balance(), Some(85));
    account.audit().expect("clean audit");
    assert_eq!(account.log.last().unwrap().delta, -40);
}

#[test]
fn zero_amount_is_a_validation_error() {
    let mut ledger = EconomyLedger::new(&economy());
    assert!(matches!(
        ledger.credit(1, Faction::FactionA, 0, TransactionReason::ZoneIncome),
        Err(SimError::Validation(_))
    ));
}

#[test]
fn income_sums_owned_zone_values() {
    let mut ledger = EconomyLedger::new(&EconomyConfig { income_multiplier: 3, ..economy() });
    let mut zones = owned_zones(Faction::FactionA, 3);
    zones[2].owner = Faction::FactionB;

    let income = ledger.compute_income(&zones);
    assert_eq!(income[&Faction::FactionA], 60);
    assert_eq!(income[&Faction::FactionB], 30);

    let events = ledger.apply_income(10, &zones).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(ledger.balance(Faction::FactionA), 160);
    assert_eq!(ledger.account(Faction::FactionA).unwrap().income_rate, 60);
}

#[test]
fn unpaid_upkeep_drains_to_zero_and_degrades() {
    let mut ledger = EconomyLedger::new(&EconomyConfig { starting_balance: 5, ..economy() });
    let mut zones = owned_zones(Faction::FactionB, 1);
    for i in 0..4 {
        zones[0].garrison.insert(GarrisonUnit { unit_id: format!("u{i}"), faction: Faction::FactionB });
    }

    // 4 units × 2 upkeep = 8 against a balance of 5.
    let events = ledger.apply_upkeep(10, &zones).unwrap();
    assert_eq!(ledger.balance(Faction::FactionB), 0);
    assert!(ledger.account(Faction::FactionB).unwrap().degraded);
    assert!(events.contains(&CampaignEvent::FactionDegraded {
        tick: 10,
        faction: Faction::FactionB,
        shortfall: 3,
    }));
    assert!(!ledger.account(Faction::FactionA).unwrap().degraded);

    // Broke and still garrisoned: degraded again, no transaction, never negative.
    let events = ledger.apply_upkeep(20, &zones).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(ledger.balance(Faction::FactionB), 0);
    ledger.account(Faction::FactionB).unwrap().audit().unwrap();
}

#[test]
fn balances_never_go_negative_under_random_traffic() {
    let mut ledger = EconomyLedger::new(&economy());
    let mut x: u64 = 0x9E37_79B9;
    for tick in 0..2_000 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let faction = if x & 1 == 0 { Faction::FactionA } else { Faction::FactionB };
        let amount = 1 + (x >> 8) % 90;
        let _ = if (x >> 4) % 3 == 0 {
            ledger.credit(tick, faction, amount, TransactionReason::ZoneIncome)
        } else {
            ledger.debit(tick, faction, amount, TransactionReason::GarrisonUpkeep)
        };
    }
    for account in ledger.accounts() {
        account.audit().expect("ledger replays cleanly");
    }
}

#[test]
fn restored_ledger_requires_both_clean_accounts() {
    let config = economy();
    let ledger = EconomyLedger::new(&config);
    let mut accounts = ledger.snapshot();

    assert!(EconomyLedger::from_accounts(&config, accounts.clone()).is_ok());

    accounts[0].balance += 1;
    assert!(EconomyLedger::from_accounts(&config, accounts.clone()).is_err());

    accounts.truncate(1);
    accounts[0].balance -= 1;
    assert!(EconomyLedger::from_accounts(&config, accounts).is_err());
}
