//! First-deposit rollover activation.
//!
//! Deposit confirmation can be observed more than once (webhook redelivery, client polling),
//! so activation is a single conditional update on the first-deposit flag. Only one caller
//! can ever see it applied; every other call is a silent no-op.

use crate::error::LedgerError;
use crate::store::LedgerStore;
use raspa_types::{Money, UserId};
use tracing::{debug, info};

pub fn activate_first_deposit_rollover(
    ledger: &dyn LedgerStore,
    user: UserId,
    deposit_amount: Money,
) -> Result<bool, LedgerError> {
    if !deposit_amount.is_positive() {
        // An activated user gets the usual silent no-op whatever the amount.
        return match ledger.account(user)? {
            None => Err(LedgerError::UserNotFound(user)),
            Some(account) if account.first_deposit_made => Ok(false),
            Some(_) => Err(LedgerError::InvalidAmount(deposit_amount)),
        };
    }
    if ledger.activate_first_deposit(user, deposit_amount)? {
        info!(%user, amount = %deposit_amount, "first deposit rollover activated");
        return Ok(true);
    }
    if ledger.account(user)?.is_none() {
        return Err(LedgerError::UserNotFound(user));
    }
    debug!(%user, "first deposit rollover already active");
    Ok(false)
}
