use crate::error::LedgerError;
use crate::rollover::activate_first_deposit_rollover;
use crate::store::{LedgerStore, PaidTransition};
use raspa_types::{Deposit, Money, UserId};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositConfirmation {
    pub deposit: Deposit,
    /// Whether this call moved the deposit to paid and credited the balance.
    pub credited: bool,
    /// Whether this call activated the first-deposit rollover.
    pub rollover_applied: bool,
}

pub fn create_deposit(
    ledger: &dyn LedgerStore,
    user: UserId,
    amount: Money,
) -> Result<Deposit, LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let deposit = ledger
        .create_deposit(user, amount)?
        .ok_or(LedgerError::UserNotFound(user))?;
    info!(%user, deposit_id = deposit.id, %amount, "deposit created");
    Ok(deposit)
}

/// Confirms a deposit as paid. Safe to call any number of times, from any number of
/// confirmation paths: the balance is credited once and the rollover activates once.
pub fn confirm_deposit(
    ledger: &dyn LedgerStore,
    deposit_id: i64,
) -> Result<DepositConfirmation, LedgerError> {
    let (deposit, credited) = match ledger.mark_deposit_paid(deposit_id)? {
        PaidTransition::Applied(deposit) => (deposit, true),
        PaidTransition::AlreadyPaid(deposit) => (deposit, false),
        PaidTransition::Missing => return Err(LedgerError::DepositNotFound(deposit_id)),
    };
    if credited {
        info!(
            user = %deposit.user_id,
            deposit_id,
            amount = %deposit.amount,
            "deposit credited"
        );
    }
    let rollover_applied =
        activate_first_deposit_rollover(ledger, deposit.user_id, deposit.amount)?;
    Ok(DepositConfirmation {
        deposit,
        credited,
        rollover_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use raspa_types::DepositStatus;
    use std::sync::{Arc, Barrier};

    fn cents(value: i64) -> Money {
        Money::from_cents(value)
    }

    #[test]
    fn confirmation_credits_and_activates() {
        let memory = Memory::new();
        let user = memory.create_account().unwrap().id;
        let deposit = create_deposit(&memory, user, cents(50_000)).unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);

        let first = confirm_deposit(&memory, deposit.id).unwrap();
        assert!(first.credited);
        assert!(first.rollover_applied);
        assert_eq!(first.deposit.status, DepositStatus::Paid);
        assert!(first.deposit.paid_at_ms.is_some());

        let again = confirm_deposit(&memory, deposit.id).unwrap();
        assert!(!again.credited);
        assert!(!again.rollover_applied);

        let account = memory.account(user).unwrap().unwrap();
        assert_eq!(account.balance, cents(50_000));
        assert_eq!(account.rollover_required, cents(50_000));
    }

    #[test]
    fn second_deposit_credits_without_rollover() {
        let memory = Memory::new();
        let user = memory.create_account().unwrap().id;
        let first = create_deposit(&memory, user, cents(2_000)).unwrap();
        let second = create_deposit(&memory, user, cents(3_000)).unwrap();

        confirm_deposit(&memory, first.id).unwrap();
        let confirmation = confirm_deposit(&memory, second.id).unwrap();
        assert!(confirmation.credited);
        assert!(!confirmation.rollover_applied);

        let account = memory.account(user).unwrap().unwrap();
        assert_eq!(account.balance, cents(5_000));
        assert_eq!(account.rollover_required, cents(2_000));
    }

    #[test]
    fn rejects_unknown_deposit_and_user() {
        let memory = Memory::new();
        assert!(matches!(
            confirm_deposit(&memory, 12).unwrap_err(),
            LedgerError::DepositNotFound(12)
        ));
        assert!(matches!(
            create_deposit(&memory, UserId(3), cents(100)).unwrap_err(),
            LedgerError::UserNotFound(UserId(3))
        ));
        let user = memory.create_account().unwrap().id;
        assert!(matches!(
            create_deposit(&memory, user, Money::ZERO).unwrap_err(),
            LedgerError::InvalidAmount(_)
        ));
    }

    #[test]
    fn racing_webhook_and_polling_confirm_once() {
        let memory = Arc::new(Memory::new());
        let user = memory.create_account().unwrap().id;
        let deposit = create_deposit(memory.as_ref(), user, cents(50_000)).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles = (0..2)
            .map(|_| {
                let memory = memory.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    confirm_deposit(memory.as_ref(), deposit.id).unwrap()
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| r.credited).count(), 1);
        assert_eq!(results.iter().filter(|r| r.rollover_applied).count(), 1);
        let account = memory.account(user).unwrap().unwrap();
        assert_eq!(account.balance, cents(50_000));
        assert_eq!(account.rollover_required, cents(50_000));
        assert!(account.first_deposit_made);
    }
}
