//! In-process ledger used by tests and by single-node development servers.
//!
//! A single mutex guards every row, so handles for different users also serialize. Writes
//! made through a handle are staged and only applied on commit. Row overwrites and fault
//! injection are only compiled with the `mocks` feature.

use crate::store::{now_ms, LedgerHandle, LedgerStore, PaidTransition, Settings};
use anyhow::{anyhow, bail, Context as _, Result};
use raspa_types::{
    Account, Deposit, DepositStatus, GameRound, Money, NewRound, UserId, Withdrawal,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Rows {
    accounts: BTreeMap<UserId, Account>,
    rounds: Vec<GameRound>,
    deposits: BTreeMap<i64, Deposit>,
    withdrawals: Vec<Withdrawal>,
    next_user: i64,
    next_round: i64,
    next_deposit: i64,
    next_withdrawal: i64,
    fail_next_round: bool,
}

impl Rows {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

#[derive(Default)]
pub struct Memory {
    rows: Mutex<Rows>,
    settings: Mutex<HashMap<String, String>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, Rows>> {
        self.rows.lock().map_err(|_| anyhow!("memory ledger poisoned"))
    }

    /// Makes the next round append fail, simulating a storage error mid-transaction.
    #[cfg(any(test, feature = "mocks"))]
    pub fn fail_next_round_append(&self) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.fail_next_round = true;
        }
    }

    /// Overwrites a row directly, bypassing any lock. Test setup only.
    #[cfg(any(test, feature = "mocks"))]
    pub fn put_account(&self, account: Account) -> Result<()> {
        let mut rows = self.rows()?;
        rows.next_user = rows.next_user.max(account.id.0);
        rows.accounts.insert(account.id, account);
        Ok(())
    }

    pub fn round_count(&self) -> Result<usize> {
        Ok(self.rows()?.rounds.len())
    }
}

impl LedgerStore for Memory {
    fn create_account(&self) -> Result<Account> {
        let mut rows = self.rows()?;
        let id = UserId(Rows::next_id(&mut rows.next_user));
        let account = Account::new(id, now_ms());
        rows.accounts.insert(id, account.clone());
        Ok(account)
    }

    fn account(&self, user: UserId) -> Result<Option<Account>> {
        Ok(self.rows()?.accounts.get(&user).cloned())
    }

    fn lock(&self, user: UserId) -> Result<Option<Box<dyn LedgerHandle + '_>>> {
        let rows = self.rows()?;
        let Some(account) = rows.accounts.get(&user).cloned() else {
            return Ok(None);
        };
        Ok(Some(Box::new(MemoryHandle {
            rows,
            account,
            rounds: Vec::new(),
            withdrawals: Vec::new(),
        })))
    }

    fn activate_first_deposit(&self, user: UserId, amount: Money) -> Result<bool> {
        let mut rows = self.rows()?;
        let Some(account) = rows.accounts.get_mut(&user) else {
            return Ok(false);
        };
        if account.first_deposit_made {
            return Ok(false);
        }
        account.rollover_required = account
            .rollover_required
            .checked_add(amount)
            .context("rollover overflow")?;
        account.first_deposit_made = true;
        Ok(true)
    }

    fn rounds(&self, user: UserId, limit: usize) -> Result<Vec<GameRound>> {
        let rows = self.rows()?;
        Ok(rows
            .rounds
            .iter()
            .rev()
            .filter(|round| round.user_id == user)
            .take(limit)
            .cloned()
            .collect())
    }

    fn create_deposit(&self, user: UserId, amount: Money) -> Result<Option<Deposit>> {
        let mut rows = self.rows()?;
        if !rows.accounts.contains_key(&user) {
            return Ok(None);
        }
        let id = Rows::next_id(&mut rows.next_deposit);
        let deposit = Deposit {
            id,
            user_id: user,
            amount,
            status: DepositStatus::Pending,
            created_at_ms: now_ms(),
            paid_at_ms: None,
        };
        rows.deposits.insert(id, deposit.clone());
        Ok(Some(deposit))
    }

    fn deposit(&self, id: i64) -> Result<Option<Deposit>> {
        Ok(self.rows()?.deposits.get(&id).cloned())
    }

    fn mark_deposit_paid(&self, id: i64) -> Result<PaidTransition> {
        let mut rows = self.rows()?;
        let Some(deposit) = rows.deposits.get(&id).cloned() else {
            return Ok(PaidTransition::Missing);
        };
        if deposit.status == DepositStatus::Paid {
            return Ok(PaidTransition::AlreadyPaid(deposit));
        }
        let account = rows
            .accounts
            .get_mut(&deposit.user_id)
            .context("deposit owner missing")?;
        account.balance = account
            .balance
            .checked_add(deposit.amount)
            .context("balance overflow")?;
        let paid = Deposit {
            status: DepositStatus::Paid,
            paid_at_ms: Some(now_ms()),
            ..deposit
        };
        rows.deposits.insert(id, paid.clone());
        Ok(PaidTransition::Applied(paid))
    }

    fn withdrawals(&self, user: UserId, limit: usize) -> Result<Vec<Withdrawal>> {
        let rows = self.rows()?;
        Ok(rows
            .withdrawals
            .iter()
            .rev()
            .filter(|withdrawal| withdrawal.user_id == user)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl Settings for Memory {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let settings = self
            .settings
            .lock()
            .map_err(|_| anyhow!("memory settings poisoned"))?;
        Ok(settings.get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut settings = self
            .settings
            .lock()
            .map_err(|_| anyhow!("memory settings poisoned"))?;
        settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

struct MemoryHandle<'a> {
    rows: MutexGuard<'a, Rows>,
    account: Account,
    rounds: Vec<GameRound>,
    withdrawals: Vec<Withdrawal>,
}

impl LedgerHandle for MemoryHandle<'_> {
    fn account(&self) -> &Account {
        &self.account
    }

    fn set_balances(&mut self, balance: Money, rollover_required: Money) -> Result<()> {
        self.account.balance = balance;
        self.account.rollover_required = rollover_required;
        Ok(())
    }

    fn append_round(&mut self, round: NewRound) -> Result<GameRound> {
        if std::mem::take(&mut self.rows.fail_next_round) {
            bail!("injected round append failure");
        }
        let id = Rows::next_id(&mut self.rows.next_round);
        let round = GameRound::from_new(id, round, now_ms());
        self.rounds.push(round.clone());
        Ok(round)
    }

    fn append_withdrawal(&mut self, amount: Money) -> Result<Withdrawal> {
        let id = Rows::next_id(&mut self.rows.next_withdrawal);
        let withdrawal = Withdrawal {
            id,
            user_id: self.account.id,
            amount,
            created_at_ms: now_ms(),
        };
        self.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryHandle {
            mut rows,
            account,
            rounds,
            withdrawals,
        } = *self;
        rows.accounts.insert(account.id, account);
        rows.rounds.extend(rounds);
        rows.withdrawals.extend(withdrawals);
        Ok(())
    }
}
