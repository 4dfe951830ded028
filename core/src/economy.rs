//! Economy ledger: per-faction balances and the append-only transaction log.
//!
//! RULES:
//!   - Balances are non-negative integers. A debit larger than the balance
//!     is refused with InsufficientFunds and leaves no trace.
//!   - Every mutation appends to the log BEFORE the balance changes, so the
//!     balance can always be rebuilt by replaying the log.
//!   - Income and upkeep run on the economy cadence, not every tick.

use crate::{
    config::EconomyConfig,
    error::{SimError, SimResult},
    event::CampaignEvent,
    types::{Faction, Tick},
    zone::Zone,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionReason {
    Opening,
    ZoneIncome,
    GarrisonUpkeep,
    ShopPurchase { item_id: String },
    Adjustment { note: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub tick: Tick,
    pub delta: i64,
    pub reason: TransactionReason,
    pub balance_after: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub faction: Faction,
    pub balance: u64,
    pub log: Vec<Transaction>,
    /// Income granted at the last economy tick.
    pub income_rate: u64,
    /// Set while the faction is failing to cover garrison upkeep.
    pub degraded: bool,
}

impl Account {
    pub fn open(faction: Faction, opening_balance: u64, tick: Tick) -> Self {
        let mut account = Self {
            faction,
            balance: 0,
            log: Vec::new(),
            income_rate: 0,
            degraded: false,
        };
        account.log.push(Transaction {
            tick,
            delta: opening_balance as i64,
            reason: TransactionReason::Opening,
            balance_after: opening_balance,
        });
        account.balance = opening_balance;
        account
    }

    /// Rebuild the balance from the log alone.
    pub fn replay_balance(&self) -> Option<u64> {
        self.log.iter().try_fold(0u64, |balance, txn| {
            if txn.delta >= 0 {
                balance.checked_add(txn.delta as u64)
            } else {
                balance.checked_sub(txn.delta.unsigned_abs())
            }
        })
    }

    /// Verify that every logged `balance_after` and the live balance agree
    /// with a replay of the log.
    pub fn audit(&self) -> Result<(), String> {
        let mut balance = 0u64;
        for (i, txn) in self.log.iter().enumerate() {
            balance = if txn.delta >= 0 {
                balance.checked_add(txn.delta as u64)
            } else {
                balance.checked_sub(txn.delta.unsigned_abs())
            }
            .ok_or_else(|| format!("{}: entry {i} drives the balance out of range", self.faction))?;
            if balance != txn.balance_after {
                return Err(format!(
                    "{}: entry {i} records balance {} but replay gives {balance}",
                    self.faction, txn.balance_after
                ));
            }
        }
        if balance != self.balance {
            return Err(format!(
                "{}: live balance {} differs from replayed {balance}",
                self.faction, self.balance
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EconomyLedger {
    accounts: BTreeMap<Faction, Account>,
    income_multiplier: u64,
    upkeep_per_unit: u64,
}

impl EconomyLedger {
    /// One account per combatant faction, funded with the starting balance.
    pub fn new(config: &EconomyConfig) -> Self {
        let accounts = Faction::COMBATANTS
            .iter()
            .map(|&f| (f, Account::open(f, config.starting_balance, 0)))
            .collect();
        Self {
            accounts,
            income_multiplier: config.income_multiplier,
            upkeep_per_unit: config.upkeep_per_unit,
        }
    }

    /// Rebuild a ledger from saved accounts. Requires exactly one account per
    /// combatant and a clean audit for each.
    pub fn from_accounts(config: &EconomyConfig, saved: Vec<Account>) -> SimResult<Self> {
        let mut accounts = BTreeMap::new();
        for account in saved {
            if !account.faction.is_combatant() {
                return Err(SimError::Validation(format!(
                    "account for non-combatant faction {}",
                    account.faction
                )));
            }
            account.audit().map_err(SimError::Validation)?;
            if accounts.insert(account.faction, account).is_some() {
                return Err(SimError::Validation("duplicate faction account".to_string()));
            }
        }
        for faction in Faction::COMBATANTS {
            if !accounts.contains_key(&faction) {
                return Err(SimError::Validation(format!("missing account for {faction}")));
            }
        }
        Ok(Self {
            accounts,
            income_multiplier: config.income_multiplier,
            upkeep_per_unit: config.upkeep_per_unit,
        })
    }

    pub fn account(&self, faction: Faction) -> Option<&Account> {
        self.accounts.get(&faction)
    }

    pub fn balance(&self, faction: Faction) -> u64 {
        self.accounts.get(&faction).map_or(0, |a| a.balance)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Immutable copies for persistence and replication.
    pub fn snapshot(&self) -> Vec<Account> {
        self.accounts.values().cloned().collect()
    }

    pub fn credit(
        &mut self,
        tick: Tick,
        faction: Faction,
        amount: u64,
        reason: TransactionReason,
    ) -> SimResult<CampaignEvent> {
        let delta = signed_amount(amount)?;
        let account = self.account_mut(faction)?;
        let balance_after = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| SimError::Validation(format!("{faction} balance would overflow")))?;
        Ok(post(account, tick, delta, reason, balance_after))
    }

    pub fn debit(
        &mut self,
        tick: Tick,
        faction: Faction,
        amount: u64,
        reason: TransactionReason,
    ) -> SimResult<CampaignEvent> {
        let delta = signed_amount(amount)?;
        let account = self.account_mut(faction)?;
        if amount > account.balance {
            return Err(SimError::InsufficientFunds {
                faction,
                requested: amount,
                available: account.balance,
            });
        }
        let balance_after = account.balance - amount;
        Ok(post(account, tick, -delta, reason, balance_after))
    }

    /// Income per faction: Σ value of owned zones × multiplier.
    pub fn compute_income(&self, zones: &[Zone]) -> BTreeMap<Faction, u64> {
        let mut income: BTreeMap<Faction, u64> =
            Faction::COMBATANTS.iter().map(|&f| (f, 0)).collect();
        for zone in zones {
            if let Some(total) = income.get_mut(&zone.owner) {
                *total = total.saturating_add(zone.value.saturating_mul(self.income_multiplier));
            }
        }
        income
    }

    pub fn apply_income(&mut self, tick: Tick, zones: &[Zone]) -> SimResult<Vec<CampaignEvent>> {
        let mut events = Vec::new();
        for (faction, amount) in self.compute_income(zones) {
            self.account_mut(faction)?.income_rate = amount;
            if amount > 0 {
                events.push(self.credit(tick, faction, amount, TransactionReason::ZoneIncome)?);
            }
        }
        Ok(events)
    }

    /// Charge garrison upkeep. A faction that cannot pay in full spends what
    /// it has, is marked degraded and a FactionDegraded event fires; the
    /// balance never goes negative.
    pub fn apply_upkeep(&mut self, tick: Tick, zones: &[Zone]) -> SimResult<Vec<CampaignEvent>> {
        let mut events = Vec::new();
        for faction in Faction::COMBATANTS {
            let units: u64 = zones.iter().map(|z| z.garrison_count(faction)).sum();
            let cost = units.saturating_mul(self.upkeep_per_unit);
            let balance = self.balance(faction);

            if cost <= balance {
                if cost > 0 {
                    events.push(self.debit(tick, faction, cost, TransactionReason::GarrisonUpkeep)?);
                }
                self.account_mut(faction)?.degraded = false;
                continue;
            }

            if balance > 0 {
                events.push(self.debit(tick, faction, balance, TransactionReason::GarrisonUpkeep)?);
            }
            let shortfall = cost - balance;
            self.account_mut(faction)?.degraded = true;
            log::warn!("tick={tick} {faction} cannot cover upkeep {cost}, short by {shortfall}");
            events.push(CampaignEvent::FactionDegraded { tick, faction, shortfall });
        }
        Ok(events)
    }

    fn account_mut(&mut self, faction: Faction) -> SimResult<&mut Account> {
        self.accounts
            .get_mut(&faction)
            .ok_or_else(|| SimError::Validation(format!("no account for {faction}")))
    }
}

fn signed_amount(amount: u64) -> SimResult<i64> {
    if amount == 0 {
        return Err(SimError::Validation("transaction amount must be positive".to_string()));
    }
    i64::try_from(amount)
        .map_err(|_| SimError::Validation(format!("transaction amount {amount} too large")))
}

fn post(
    account: &mut Account,
    tick: Tick,
    delta: i64,
    reason: TransactionReason,
    balance_after: u64,
) -> CampaignEvent {
    account.log.push(Transaction {
        tick,
        delta,
        reason: reason.clone(),
        balance_after,
    });
    account.balance = balance_after;
    CampaignEvent::EconomyTransaction {
        tick,
        faction: account.faction,
        delta,
        reason,
        balance_after,
    }
}
