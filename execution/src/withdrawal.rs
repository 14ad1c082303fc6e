use crate::error::LedgerError;
use crate::store::LedgerStore;
use raspa_types::{Account, Money, UserId, Withdrawal};
use tracing::info;

/// Withdrawals stay blocked until the rollover requirement has been wagered down to zero.
pub fn can_withdraw(account: &Account) -> bool {
    account.rollover_required == Money::ZERO
}

/// Debits `amount` and records the withdrawal under the user's ledger lock.
pub fn request_withdrawal(
    ledger: &dyn LedgerStore,
    user: UserId,
    amount: Money,
) -> Result<(Withdrawal, Money), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let mut handle = ledger.lock(user)?.ok_or(LedgerError::UserNotFound(user))?;
    let account = handle.account().clone();
    if !can_withdraw(&account) {
        return Err(LedgerError::RolloverPending {
            remaining: account.rollover_required,
        });
    }
    let Some(new_balance) = account.balance.checked_sub(amount).filter(|b| !b.is_negative())
    else {
        return Err(LedgerError::InsufficientFunds {
            balance: account.balance,
            required: amount,
        });
    };

    handle.set_balances(new_balance, account.rollover_required)?;
    let withdrawal = handle.append_withdrawal(amount)?;
    handle.commit()?;

    info!(%user, withdrawal_id = withdrawal.id, %amount, balance = %new_balance, "withdrawal recorded");
    Ok((withdrawal, new_balance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn cents(value: i64) -> Money {
        Money::from_cents(value)
    }

    fn account_with(memory: &Memory, balance: i64, rollover: i64) -> UserId {
        let mut account = memory.create_account().unwrap();
        account.balance = cents(balance);
        account.rollover_required = cents(rollover);
        memory.put_account(account.clone()).unwrap();
        account.id
    }

    #[test]
    fn debits_when_rollover_cleared() {
        let memory = Memory::new();
        let user = account_with(&memory, 10_000, 0);

        let (withdrawal, balance) = request_withdrawal(&memory, user, cents(4_000)).unwrap();
        assert_eq!(withdrawal.amount, cents(4_000));
        assert_eq!(balance, cents(6_000));
        assert_eq!(memory.account(user).unwrap().unwrap().balance, cents(6_000));
        assert_eq!(memory.withdrawals(user, 10).unwrap().len(), 1);
    }

    #[test]
    fn blocked_while_rollover_pending() {
        let memory = Memory::new();
        let user = account_with(&memory, 10_000, 1);

        let err = request_withdrawal(&memory, user, cents(100)).unwrap_err();
        assert!(matches!(err, LedgerError::RolloverPending { remaining } if remaining == cents(1)));
        assert_eq!(memory.account(user).unwrap().unwrap().balance, cents(10_000));
    }

    #[test]
    fn rejects_overdraft_and_bad_amounts() {
        let memory = Memory::new();
        let user = account_with(&memory, 500, 0);

        assert!(matches!(
            request_withdrawal(&memory, user, cents(501)).unwrap_err(),
            LedgerError::InsufficientFunds { .. }
        ));
        assert!(matches!(
            request_withdrawal(&memory, user, cents(-5)).unwrap_err(),
            LedgerError::InvalidAmount(_)
        ));
        assert!(matches!(
            request_withdrawal(&memory, UserId(99), cents(5)).unwrap_err(),
            LedgerError::UserNotFound(UserId(99))
        ));
        assert!(memory.withdrawals(user, 10).unwrap().is_empty());
    }
}
