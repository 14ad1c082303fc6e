//! Storage seam for the ledger.
//!
//! Backends implement [`LedgerStore`] and [`Settings`]. All methods are blocking; async callers
//! run them on a blocking thread.

use anyhow::Result;
use raspa_types::{
    Account, Deposit, GameRound, Money, NewRound, Rtp, UserId, Withdrawal, RTP_SETTING_KEY,
};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Outcome of flipping a deposit from pending to paid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaidTransition {
    /// This call performed the flip and credited the balance.
    Applied(Deposit),
    /// The deposit was already paid; nothing changed.
    AlreadyPaid(Deposit),
    Missing,
}

pub trait LedgerStore: Send + Sync {
    /// Creates an account with zero balance, zero rollover and no first deposit.
    fn create_account(&self) -> Result<Account>;

    /// Unlocked read of the latest committed state.
    fn account(&self, user: UserId) -> Result<Option<Account>>;

    /// Opens a transaction holding `user`'s ledger row exclusively until the handle is
    /// committed or dropped. Returns `None` if the user does not exist.
    fn lock(&self, user: UserId) -> Result<Option<Box<dyn LedgerHandle + '_>>>;

    /// Single conditional update: adds `amount` to the rollover requirement and sets the
    /// first-deposit flag, only if the flag was unset. Returns whether it applied.
    fn activate_first_deposit(&self, user: UserId, amount: Money) -> Result<bool>;

    /// Most recent rounds first.
    fn rounds(&self, user: UserId, limit: usize) -> Result<Vec<GameRound>>;

    /// Returns `None` if the user does not exist.
    fn create_deposit(&self, user: UserId, amount: Money) -> Result<Option<Deposit>>;

    fn deposit(&self, id: i64) -> Result<Option<Deposit>>;

    /// Single conditional pending-to-paid flip that credits the balance in the same
    /// transaction.
    fn mark_deposit_paid(&self, id: i64) -> Result<PaidTransition>;

    /// Most recent withdrawals first.
    fn withdrawals(&self, user: UserId, limit: usize) -> Result<Vec<Withdrawal>>;
}

/// Exclusive read-modify-write access to one user's ledger row.
///
/// Dropping a handle without calling [`LedgerHandle::commit`] rolls back every write made
/// through it.
pub trait LedgerHandle {
    /// Row state as read under the lock, including writes staged through this handle.
    fn account(&self) -> &Account;

    fn set_balances(&mut self, balance: Money, rollover_required: Money) -> Result<()>;

    fn append_round(&mut self, round: NewRound) -> Result<GameRound>;

    fn append_withdrawal(&mut self, amount: Money) -> Result<Withdrawal>;

    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait Settings: Send + Sync {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// Reads the RTP in effect. A missing setting means the default; an unparsable one is
/// logged and also falls back to the default.
pub fn read_rtp(settings: &dyn Settings) -> Result<Rtp> {
    let Some(raw) = settings.get_setting(RTP_SETTING_KEY)? else {
        return Ok(Rtp::DEFAULT);
    };
    match raw.parse::<Rtp>() {
        Ok(rtp) => Ok(rtp),
        Err(err) => {
            warn!(value = %raw, ?err, "unparsable rtp setting; using default");
            Ok(Rtp::DEFAULT)
        }
    }
}

pub fn write_rtp(settings: &dyn Settings, rtp: Rtp) -> Result<()> {
    settings.set_setting(RTP_SETTING_KEY, &rtp.to_string())
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
